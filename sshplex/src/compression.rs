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

//!
//! This module exports compression names and factories for use with [Preferred](crate::Preferred).
use std::sync::Arc;

use crate::registry::Registry;
use crate::Error;

/// A compression method as negotiated.
pub trait CompressionAlgorithm: Send + Sync {
    /// Whether compression only starts once the user is authenticated
    /// (`zlib@openssh.com`).
    fn is_delayed(&self) -> bool {
        false
    }

    /// `None` when packets go through unchanged.
    fn make_compressor(&self) -> Option<Box<dyn Compressor + Send>>;

    fn make_decompressor(&self) -> Option<Box<dyn Decompressor + Send>>;
}

/// Outbound stream state. One packet at a time, flushed at the end of
/// each packet.
pub trait Compressor {
    fn compress(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(), Error>;
}

/// Inbound stream state.
pub trait Decompressor {
    fn decompress(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(), Error>;
}

/// `none`
pub const NONE: &str = "none";
/// `zlib`
pub const ZLIB: &str = "zlib";
/// `zlib@openssh.com`
pub const ZLIB_LEGACY: &str = "zlib@openssh.com";

/// Advertised by default, most preferred first.
pub const DEFAULT_ORDER: &[&str] = &[
    NONE,
    #[cfg(feature = "flate2")]
    ZLIB,
    #[cfg(feature = "flate2")]
    ZLIB_LEGACY,
];

/// Every compression method compiled into this crate.
pub const ALL_COMPRESSION_ALGORITHMS: &[&str] = DEFAULT_ORDER;

pub fn builtin(name: &str) -> Option<Arc<dyn CompressionAlgorithm>> {
    Some(match name {
        NONE => Arc::new(NoCompression),
        #[cfg(feature = "flate2")]
        ZLIB => Arc::new(zlib::Zlib { delayed: false }),
        #[cfg(feature = "flate2")]
        ZLIB_LEGACY => Arc::new(zlib::Zlib { delayed: true }),
        _ => return None,
    })
}

/// A registry holding the built-in compression methods listed in
/// `names`, in order.
pub fn registry(names: &[&'static str]) -> Registry<dyn CompressionAlgorithm> {
    let mut r = Registry::new();
    for &name in names {
        if let Some(f) = builtin(name) {
            r.register(name, f);
        }
    }
    r
}

struct NoCompression;

impl CompressionAlgorithm for NoCompression {
    fn make_compressor(&self) -> Option<Box<dyn Compressor + Send>> {
        None
    }

    fn make_decompressor(&self) -> Option<Box<dyn Decompressor + Send>> {
        None
    }
}

#[cfg(feature = "flate2")]
mod zlib {
    use flate2::{FlushCompress, FlushDecompress, Status};
    use log::debug;

    use super::*;
    use crate::cipher::MAXIMUM_PACKET_LEN;

    pub(super) struct Zlib {
        pub(super) delayed: bool,
    }

    impl CompressionAlgorithm for Zlib {
        fn is_delayed(&self) -> bool {
            self.delayed
        }

        fn make_compressor(&self) -> Option<Box<dyn Compressor + Send>> {
            Some(Box::new(flate2::Compress::new(
                flate2::Compression::fast(),
                true,
            )))
        }

        fn make_decompressor(&self) -> Option<Box<dyn Decompressor + Send>> {
            Some(Box::new(flate2::Decompress::new(true)))
        }
    }

    impl Compressor for flate2::Compress {
        fn compress(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(), Error> {
            output.clear();
            output.reserve(input.len() + 64);
            let start = self.total_in();
            loop {
                let consumed = (self.total_in() - start) as usize;
                let rest = input.get(consumed..).unwrap_or_default();
                self.compress_vec(rest, output, FlushCompress::Partial)
                    .map_err(|_| Error::Compress)?;
                let consumed = (self.total_in() - start) as usize;
                // The flush is complete once zlib stops filling the
                // whole output buffer.
                if consumed == input.len() && output.len() < output.capacity() {
                    return Ok(());
                }
                output.reserve(output.capacity().max(64));
            }
        }
    }

    impl Decompressor for flate2::Decompress {
        fn decompress(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(), Error> {
            output.clear();
            output.reserve(input.len() * 2 + 64);
            let start = self.total_in();
            loop {
                let consumed = (self.total_in() - start) as usize;
                let rest = input.get(consumed..).unwrap_or_default();
                let status = self
                    .decompress_vec(rest, output, FlushDecompress::Sync)
                    .map_err(|e| {
                        debug!("inflate: {e:?}");
                        Error::Decompress
                    })?;
                let consumed = (self.total_in() - start) as usize;
                if output.len() > MAXIMUM_PACKET_LEN {
                    return Err(Error::Decompress);
                }
                if consumed == input.len() && output.len() < output.capacity() {
                    return Ok(());
                }
                if status == Status::StreamEnd {
                    // The stream must stay open for the whole connection.
                    return Err(Error::Decompress);
                }
                output.reserve(output.capacity().max(64));
            }
        }
    }
}
