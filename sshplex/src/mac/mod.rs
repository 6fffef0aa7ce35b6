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
//! This module exports MAC names and factories for use with [Preferred](crate::Preferred).
use std::sync::Arc;

use hmac::Hmac;
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use self::crypto::CryptoMacAlgorithm;
use self::none::NoMacAlgorithm;
use crate::registry::Registry;
use crate::Error;

mod crypto;
mod none;

/// A MAC algorithm as negotiated: builds keyed instances.
pub trait MacAlgorithm: Send + Sync {
    fn key_len(&self) -> usize;
    fn make_mac(&self, key: &[u8]) -> Result<Box<dyn Mac + Send>, Error>;
}

/// A keyed MAC for one direction of the connection.
pub trait Mac {
    fn mac_len(&self) -> usize;
    /// Encrypt-then-MAC: the tag covers the packet length and the
    /// ciphertext instead of the plaintext.
    fn is_etm(&self) -> bool {
        false
    }
    fn compute(&self, sequence_number: u32, payload: &[u8], output: &mut [u8]);
    fn verify(&self, sequence_number: u32, payload: &[u8], mac: &[u8]) -> bool;
}

/// `none`
pub const NONE: &str = "none";
/// `hmac-sha1`
pub const HMAC_SHA1: &str = "hmac-sha1";
/// `hmac-sha2-256`
pub const HMAC_SHA256: &str = "hmac-sha2-256";
/// `hmac-sha2-512`
pub const HMAC_SHA512: &str = "hmac-sha2-512";
/// `hmac-sha1-etm@openssh.com`
pub const HMAC_SHA1_ETM: &str = "hmac-sha1-etm@openssh.com";
/// `hmac-sha2-256-etm@openssh.com`
pub const HMAC_SHA256_ETM: &str = "hmac-sha2-256-etm@openssh.com";
/// `hmac-sha2-512-etm@openssh.com`
pub const HMAC_SHA512_ETM: &str = "hmac-sha2-512-etm@openssh.com";

/// Advertised by default, most preferred first.
pub const DEFAULT_ORDER: &[&str] = &[
    HMAC_SHA512_ETM,
    HMAC_SHA256_ETM,
    HMAC_SHA512,
    HMAC_SHA256,
    HMAC_SHA1_ETM,
    HMAC_SHA1,
];

/// Every MAC implemented by this crate.
pub const ALL_MAC_ALGORITHMS: &[&str] = &[
    NONE,
    HMAC_SHA1,
    HMAC_SHA256,
    HMAC_SHA512,
    HMAC_SHA1_ETM,
    HMAC_SHA256_ETM,
    HMAC_SHA512_ETM,
];

/// The built-in factory for `name`.
pub fn builtin(name: &str) -> Option<Arc<dyn MacAlgorithm>> {
    Some(match name {
        NONE => Arc::new(NoMacAlgorithm {}),
        HMAC_SHA1 => Arc::new(CryptoMacAlgorithm::<Hmac<Sha1>>::new(20, false)),
        HMAC_SHA256 => Arc::new(CryptoMacAlgorithm::<Hmac<Sha256>>::new(32, false)),
        HMAC_SHA512 => Arc::new(CryptoMacAlgorithm::<Hmac<Sha512>>::new(64, false)),
        HMAC_SHA1_ETM => Arc::new(CryptoMacAlgorithm::<Hmac<Sha1>>::new(20, true)),
        HMAC_SHA256_ETM => Arc::new(CryptoMacAlgorithm::<Hmac<Sha256>>::new(32, true)),
        HMAC_SHA512_ETM => Arc::new(CryptoMacAlgorithm::<Hmac<Sha512>>::new(64, true)),
        _ => return None,
    })
}

/// A registry holding the built-in MACs listed in `names`, in order.
pub fn registry(names: &[&'static str]) -> Registry<dyn MacAlgorithm> {
    let mut r = Registry::new();
    for &name in names {
        if let Some(f) = builtin(name) {
            r.register(name, f);
        }
    }
    r
}
