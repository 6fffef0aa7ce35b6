// Copyright 2016 Pierre-Étienne Meunier
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

/// Terminal modes, sent with a `pty-req` channel request.
/// <https://tools.ietf.org/html/rfc4254#section-8>
#[allow(non_camel_case_types, missing_docs)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Pty {
    TTY_OP_END = 0,
    VINTR = 1,
    VQUIT = 2,
    VERASE = 3,
    VKILL = 4,
    VEOF = 5,
    VEOL = 6,
    VEOL2 = 7,
    VSTART = 8,
    VSTOP = 9,
    VSUSP = 10,
    VDSUSP = 11,

    VREPRINT = 12,
    VWERASE = 13,
    VLNEXT = 14,
    VFLUSH = 15,
    VSWTCH = 16,
    VSTATUS = 17,
    VDISCARD = 18,
    IGNPAR = 30,
    PARMRK = 31,
    INPCK = 32,
    ISTRIP = 33,
    INLCR = 34,
    IGNCR = 35,
    ICRNL = 36,
    IUCLC = 37,
    IXON = 38,
    IXANY = 39,
    IXOFF = 40,
    IMAXBEL = 41,
    IUTF8 = 42,
    ISIG = 50,
    ICANON = 51,
    XCASE = 52,
    ECHO = 53,
    ECHOE = 54,
    ECHOK = 55,
    ECHONL = 56,
    NOFLSH = 57,
    TOSTOP = 58,
    IEXTEN = 59,
    ECHOCTL = 60,
    ECHOKE = 61,
    PENDIN = 62,
    OPOST = 70,
    OLCUC = 71,
    ONLCR = 72,
    OCRNL = 73,
    ONOCR = 74,
    ONLRET = 75,

    CS7 = 90,
    CS8 = 91,
    PARENB = 92,
    PARODD = 93,

    TTY_OP_ISPEED = 128,
    TTY_OP_OSPEED = 129,
}

impl Pty {
    #[doc(hidden)]
    pub fn from_u8(x: u8) -> Option<Pty> {
        use Pty::*;
        Some(match x {
            0 => TTY_OP_END,
            1 => VINTR,
            2 => VQUIT,
            3 => VERASE,
            4 => VKILL,
            5 => VEOF,
            6 => VEOL,
            7 => VEOL2,
            8 => VSTART,
            9 => VSTOP,
            10 => VSUSP,
            11 => VDSUSP,
            12 => VREPRINT,
            13 => VWERASE,
            14 => VLNEXT,
            15 => VFLUSH,
            16 => VSWTCH,
            17 => VSTATUS,
            18 => VDISCARD,
            30 => IGNPAR,
            31 => PARMRK,
            32 => INPCK,
            33 => ISTRIP,
            34 => INLCR,
            35 => IGNCR,
            36 => ICRNL,
            37 => IUCLC,
            38 => IXON,
            39 => IXANY,
            40 => IXOFF,
            41 => IMAXBEL,
            42 => IUTF8,
            50 => ISIG,
            51 => ICANON,
            52 => XCASE,
            53 => ECHO,
            54 => ECHOE,
            55 => ECHOK,
            56 => ECHONL,
            57 => NOFLSH,
            58 => TOSTOP,
            59 => IEXTEN,
            60 => ECHOCTL,
            61 => ECHOKE,
            62 => PENDIN,
            70 => OPOST,
            71 => OLCUC,
            72 => ONLCR,
            73 => OCRNL,
            74 => ONOCR,
            75 => ONLRET,
            90 => CS7,
            91 => CS8,
            92 => PARENB,
            93 => PARODD,
            128 => TTY_OP_ISPEED,
            129 => TTY_OP_OSPEED,
            _ => return None,
        })
    }
}

/// The `encoded terminal modes` string of a `pty-req`: opcode and
/// `uint32` argument pairs, terminated by `TTY_OP_END`.
pub(crate) fn encode_modes(modes: &[(Pty, u32)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(modes.len() * 5 + 1);
    for &(code, value) in modes {
        if code == Pty::TTY_OP_END {
            continue;
        }
        out.push(code as u8);
        out.extend_from_slice(&value.to_be_bytes());
    }
    out.push(Pty::TTY_OP_END as u8);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encode_modes() {
        let modes = encode_modes(&[(Pty::ECHO, 1), (Pty::TTY_OP_END, 7), (Pty::TTY_OP_OSPEED, 38400)]);
        assert_eq!(modes, [53, 0, 0, 0, 1, 129, 0, 0, 0x96, 0, 0]);
        assert_eq!(encode_modes(&[]), [0]);
        assert_eq!(Pty::from_u8(53), Some(Pty::ECHO));
        assert_eq!(Pty::from_u8(200), None);
    }
}
