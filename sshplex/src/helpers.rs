use std::fmt::Debug;

use ssh_encoding::{Decode, Encode, Writer};

#[doc(hidden)]
pub trait EncodedExt {
    fn encoded(&self) -> Result<Vec<u8>, ssh_encoding::Error>;
}

impl<E: Encode> EncodedExt for E {
    fn encoded(&self) -> Result<Vec<u8>, ssh_encoding::Error> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }
}

/// A comma-separated list of algorithm names.
#[derive(Clone, PartialEq, Eq)]
pub struct NameList(pub Vec<String>);

impl Debug for NameList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl NameList {
    pub fn as_encoded_string(&self) -> String {
        self.0.join(",")
    }

    pub fn from_encoded_string(value: &str) -> Self {
        if value.is_empty() {
            return Self(Vec::new());
        }
        Self(value.split(',').map(|x| x.to_string()).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|x| x == name)
    }
}

impl Encode for NameList {
    fn encoded_len(&self) -> Result<usize, ssh_encoding::Error> {
        self.as_encoded_string().encoded_len()
    }

    fn encode(&self, writer: &mut impl ssh_encoding::Writer) -> Result<(), ssh_encoding::Error> {
        self.as_encoded_string().encode(writer)
    }
}

impl Decode for NameList {
    fn decode(reader: &mut impl ssh_encoding::Reader) -> Result<Self, ssh_encoding::Error> {
        let s = String::decode(reader)?;
        Ok(Self::from_encoded_string(&s))
    }

    type Error = ssh_encoding::Error;
}

/// Encodes an unsigned big-endian magnitude as an SSH `mpint`:
/// leading zeros stripped, and a zero byte prepended when the high bit
/// would otherwise be set.
pub fn encode_mpint(
    magnitude: &[u8],
    writer: &mut impl Writer,
) -> Result<(), ssh_encoding::Error> {
    let start = magnitude
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(magnitude.len());
    let digits = magnitude.get(start..).unwrap_or_default();
    let pad = digits.first().is_some_and(|&b| b & 0x80 != 0);
    let len = digits.len() + usize::from(pad);
    (len as u32).encode(writer)?;
    if pad {
        writer.write(&[0])?;
    }
    writer.write(digits)
}


/// SSH `boolean` wire encoding (RFC 4251 §5), which `ssh-encoding` 0.2
/// does not provide: one byte, zero is false, anything else is true.
pub(crate) trait SshBool: Sized {
    fn decode(reader: &mut impl ssh_encoding::Reader) -> Result<Self, ssh_encoding::Error>;
    fn encode(&self, writer: &mut impl Writer) -> Result<(), ssh_encoding::Error>;
}

impl SshBool for bool {
    fn decode(reader: &mut impl ssh_encoding::Reader) -> Result<Self, ssh_encoding::Error> {
        Ok(u8::decode(reader)? != 0)
    }

    fn encode(&self, writer: &mut impl Writer) -> Result<(), ssh_encoding::Error> {
        u8::from(*self).encode(writer)
    }
}
