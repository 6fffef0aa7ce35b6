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

use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::Error;

/// Longest identification line allowed, terminator included.
const MAX_ID_LINE_LEN: usize = 255;
/// Cap on the pre-identification banner the server may send.
const MAX_BANNER_LEN: usize = 64 * 1024;

/// The SSH client/server identification string.
#[derive(Debug, Clone)]
pub enum SshId {
    /// When sending the id, append RFC standard `\r\n`. Example: `SshId::Standard("SSH-2.0-acme")`
    Standard(String),
    /// When sending the id, use this buffer as it is and do not append additional line terminators.
    Raw(String),
}

impl SshId {
    pub(crate) fn as_kex_hash_bytes(&self) -> &[u8] {
        match self {
            Self::Standard(s) => s.as_bytes(),
            Self::Raw(s) => s.trim_end_matches(['\n', '\r']).as_bytes(),
        }
    }

    pub(crate) fn write(&self, buffer: &mut Vec<u8>) {
        match self {
            Self::Standard(s) => buffer.extend(format!("{}\r\n", s).as_bytes()),
            Self::Raw(s) => buffer.extend(s.as_bytes()),
        }
    }
}

/// Reads the server identification line, skipping any banner lines
/// sent before it. Returns the line without its terminator, and the
/// bytes that arrived after it.
pub(crate) async fn read_ssh_id<R: AsyncRead + Unpin>(
    stream: &mut R,
) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let mut buffer = Vec::new();
    let mut chunk = [0; 256];
    let mut skipped = 0;
    loop {
        while let Some(end) = buffer.iter().position(|&c| c == b'\n') {
            let rest = buffer.split_off(end + 1);
            let mut line = std::mem::replace(&mut buffer, rest);
            line.truncate(end);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.starts_with(b"SSH-") {
                if end + 1 > MAX_ID_LINE_LEN
                    || !(line.starts_with(b"SSH-2.0-") || line.starts_with(b"SSH-1.99-"))
                {
                    debug!("unsupported server id {:?}", String::from_utf8_lossy(&line));
                    return Err(Error::Version);
                }
                debug!("server id: {:?}", String::from_utf8_lossy(&line));
                return Ok((line, buffer));
            }
            trace!("banner line: {:?}", String::from_utf8_lossy(&line));
            skipped += end + 1;
            if skipped > MAX_BANNER_LEN {
                return Err(Error::Version);
            }
        }
        if buffer.len() > MAX_BANNER_LEN {
            return Err(Error::Version);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::HUP);
        }
        buffer.extend_from_slice(chunk.get(..n).unwrap_or_default());
    }
}
