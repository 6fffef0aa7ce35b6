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
//! This module exports host key algorithm names and verifiers for use with [Preferred](crate::Preferred).
use std::sync::Arc;

use log::debug;
use signature::Verifier;
use ssh_encoding::Decode;
use ssh_key::public::KeyData;
use ssh_key::{Algorithm, EcdsaCurve, HashAlg, PublicKey, Signature};

use crate::registry::Registry;
use crate::Error;

/// A host key (signature) algorithm as negotiated. The server proves
/// its identity by signing the exchange hash with its host key.
pub trait HostKeyAlgorithm: Send + Sync {
    /// Parses `K_S`, the host key blob of the key exchange reply.
    fn decode_key(&self, blob: &[u8]) -> Result<PublicKey, Error>;

    /// Checks `signature`, as sent on the wire, over `message`.
    fn verify(&self, key: &PublicKey, message: &[u8], signature: &[u8]) -> Result<(), Error>;
}

/// Decides whether a server may be trusted with a host key, once the
/// key has proven that it signed the exchange. Known hosts policy
/// lives behind this trait.
pub trait ServerKeyVerifier: Send + Sync {
    fn verify(&self, host: &str, port: u16, key: &PublicKey) -> bool;
}

impl<F> ServerKeyVerifier for F
where
    F: Fn(&str, u16, &PublicKey) -> bool + Send + Sync,
{
    fn verify(&self, host: &str, port: u16, key: &PublicKey) -> bool {
        self(host, port, key)
    }
}

/// `ssh-ed25519`
pub const ED25519: &str = "ssh-ed25519";
/// `ecdsa-sha2-nistp256`
pub const ECDSA_SHA2_NISTP256: &str = "ecdsa-sha2-nistp256";
/// `ecdsa-sha2-nistp384`
pub const ECDSA_SHA2_NISTP384: &str = "ecdsa-sha2-nistp384";
/// `ecdsa-sha2-nistp521`
pub const ECDSA_SHA2_NISTP521: &str = "ecdsa-sha2-nistp521";
/// `rsa-sha2-512`
pub const RSA_SHA2_512: &str = "rsa-sha2-512";
/// `rsa-sha2-256`
pub const RSA_SHA2_256: &str = "rsa-sha2-256";
/// `ssh-rsa`, RSA with SHA-1 signatures
pub const SSH_RSA: &str = "ssh-rsa";

/// Advertised by default, most preferred first.
pub const DEFAULT_ORDER: &[&str] = &[
    ED25519,
    ECDSA_SHA2_NISTP256,
    ECDSA_SHA2_NISTP384,
    ECDSA_SHA2_NISTP521,
    #[cfg(feature = "rsa")]
    RSA_SHA2_512,
    #[cfg(feature = "rsa")]
    RSA_SHA2_256,
    #[cfg(feature = "rsa")]
    SSH_RSA,
];

/// Every host key algorithm implemented by this crate.
pub const ALL_KEY_ALGORITHMS: &[&str] = DEFAULT_ORDER;

pub fn builtin(name: &str) -> Option<Arc<dyn HostKeyAlgorithm>> {
    let algorithm = match name {
        ED25519 => Algorithm::Ed25519,
        ECDSA_SHA2_NISTP256 => Algorithm::Ecdsa {
            curve: EcdsaCurve::NistP256,
        },
        ECDSA_SHA2_NISTP384 => Algorithm::Ecdsa {
            curve: EcdsaCurve::NistP384,
        },
        ECDSA_SHA2_NISTP521 => Algorithm::Ecdsa {
            curve: EcdsaCurve::NistP521,
        },
        #[cfg(feature = "rsa")]
        RSA_SHA2_512 => Algorithm::Rsa {
            hash: Some(HashAlg::Sha512),
        },
        #[cfg(feature = "rsa")]
        RSA_SHA2_256 => Algorithm::Rsa {
            hash: Some(HashAlg::Sha256),
        },
        #[cfg(feature = "rsa")]
        SSH_RSA => Algorithm::Rsa { hash: None },
        _ => return None,
    };
    Some(Arc::new(SshKeyAlgorithm { algorithm }))
}

/// A registry holding the built-in algorithms listed in `names`, in
/// order.
pub fn registry(names: &[&'static str]) -> Registry<dyn HostKeyAlgorithm> {
    let mut r = Registry::new();
    for &name in names {
        if let Some(f) = builtin(name) {
            r.register(name, f);
        }
    }
    r
}

/// Verification through `ssh-key`, for one signature algorithm.
struct SshKeyAlgorithm {
    algorithm: Algorithm,
}

impl SshKeyAlgorithm {
    /// All RSA keys work with all RSA signature hashes. Other keys have
    /// to match exactly.
    fn accepts_key(&self, key: &Algorithm) -> bool {
        match self.algorithm {
            Algorithm::Rsa { .. } => key.clone().is_rsa(),
            ref a => a == key,
        }
    }
}

impl HostKeyAlgorithm for SshKeyAlgorithm {
    fn decode_key(&self, mut blob: &[u8]) -> Result<PublicKey, Error> {
        let key: PublicKey = KeyData::decode(&mut blob)?.into();
        if !self.accepts_key(&key.algorithm()) {
            debug!(
                "host key {:?} does not match the negotiated {:?}",
                key.algorithm(),
                self.algorithm
            );
            return Err(Error::Kex);
        }
        Ok(key)
    }

    fn verify(&self, key: &PublicKey, message: &[u8], mut signature: &[u8]) -> Result<(), Error> {
        let signature = Signature::decode(&mut signature)?;
        if signature.algorithm() != self.algorithm {
            debug!(
                "signature made with {:?}, expected {:?}",
                signature.algorithm(),
                self.algorithm
            );
            return Err(Error::WrongServerSig);
        }
        if let Err(e) = Verifier::verify(key, message, &signature) {
            debug!("wrong server sig: {e:?}");
            return Err(Error::WrongServerSig);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing)]
    use rand::rngs::OsRng;
    use ssh_key::PrivateKey;

    use super::*;
    use crate::helpers::EncodedExt;

    fn sign(key: &PrivateKey, message: &[u8]) -> Vec<u8> {
        let signature: Signature = signature::Signer::try_sign(key, message).unwrap();
        signature.encoded().unwrap()
    }

    #[test]
    fn test_ed25519_signature() {
        let _ = env_logger::try_init();
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let blob = key.public_key().key_data().encoded().unwrap();
        let algo = builtin(ED25519).unwrap();

        let public = algo.decode_key(&blob).unwrap();
        assert_eq!(&public, key.public_key());

        let sig = sign(&key, b"exchange hash");
        algo.verify(&public, b"exchange hash", &sig).unwrap();
        assert!(matches!(
            algo.verify(&public, b"another hash", &sig),
            Err(Error::WrongServerSig)
        ));
    }

    #[test]
    fn test_key_must_match_algorithm() {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let blob = key.public_key().key_data().encoded().unwrap();
        let ecdsa = builtin(ECDSA_SHA2_NISTP256).unwrap();
        assert!(matches!(ecdsa.decode_key(&blob), Err(Error::Kex)));
    }

    #[test]
    fn test_ecdsa_signature() {
        let key = PrivateKey::random(
            &mut OsRng,
            Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP256,
            },
        )
        .unwrap();
        let blob = key.public_key().key_data().encoded().unwrap();
        let algo = builtin(ECDSA_SHA2_NISTP256).unwrap();
        let public = algo.decode_key(&blob).unwrap();
        let sig = sign(&key, b"H");
        algo.verify(&public, b"H", &sig).unwrap();

        // A signature from another key type is refused before checking.
        let other = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        assert!(matches!(
            algo.verify(&public, b"H", &sign(&other, b"H")),
            Err(Error::WrongServerSig)
        ));
    }

    #[test]
    fn test_verifier_closure() {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let expected = key.public_key().clone();
        let verifier = move |host: &str, port: u16, key: &PublicKey| {
            host == "example.com" && port == 22 && key == &expected
        };
        assert!(ServerKeyVerifier::verify(
            &verifier,
            "example.com",
            22,
            key.public_key()
        ));
        assert!(!ServerKeyVerifier::verify(
            &verifier,
            "example.org",
            22,
            key.public_key()
        ));
    }

    #[test]
    fn test_registry_defaults() {
        let r = registry(DEFAULT_ORDER);
        assert_eq!(r.names().next(), Some(ED25519));
        assert!(r.contains(ECDSA_SHA2_NISTP521));
        assert!(builtin("ssh-dss").is_none());
    }
}
