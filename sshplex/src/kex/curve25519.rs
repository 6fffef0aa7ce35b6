use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use log::debug;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::{compute_keys, exchange_hash, Direction, KexAlgorithm, KexType};
use crate::cipher::CipherPair;
use crate::session::Exchange;
use crate::Error;

pub struct Curve25519KexType {}

impl KexType for Curve25519KexType {
    fn make(&self) -> Box<dyn KexAlgorithm + Send> {
        Box::new(Curve25519Kex {
            local_secret: None,
            shared_secret: None,
        })
    }
}

#[doc(hidden)]
pub struct Curve25519Kex {
    local_secret: Option<Scalar>,
    shared_secret: Option<Zeroizing<[u8; 32]>>,
}

impl std::fmt::Debug for Curve25519Kex {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Algorithm {{ local_secret: [hidden], shared_secret: [hidden] }}",
        )
    }
}

// https://tools.ietf.org/html/rfc8731
impl KexAlgorithm for Curve25519Kex {
    fn generate_ephemeral(&mut self) -> Result<Vec<u8>, Error> {
        let secret = Scalar::from_bytes_mod_order(rand::random::<[u8; 32]>());
        let public = (ED25519_BASEPOINT_TABLE * &secret).to_montgomery();
        self.local_secret = Some(secret);
        Ok(public.0.to_vec())
    }

    fn compute_shared_secret(&mut self, remote_public: &[u8]) -> Result<(), Error> {
        let local_secret = self.local_secret.take().ok_or(Error::KexInit)?;
        let remote: [u8; 32] = remote_public.try_into().map_err(|_| {
            debug!("curve25519 public key of {} bytes", remote_public.len());
            Error::Kex
        })?;
        let shared = local_secret * MontgomeryPoint(remote);
        // A low-order point yields an all-zero secret.
        if bool::from(shared.0.as_slice().ct_eq([0u8; 32].as_slice())) {
            return Err(Error::Kex);
        }
        self.shared_secret = Some(Zeroizing::new(shared.0));
        Ok(())
    }

    fn compute_exchange_hash(
        &self,
        host_key: &[u8],
        exchange: &Exchange,
    ) -> Result<Vec<u8>, Error> {
        let shared = self.shared_secret.as_ref().ok_or(Error::KexInit)?;
        exchange_hash::<Sha256>(host_key, exchange, shared.as_slice())
    }

    fn compute_keys(
        &self,
        session_id: &[u8],
        exchange_hash: &[u8],
        local_to_remote: Direction<'_>,
        remote_to_local: Direction<'_>,
        is_server: bool,
    ) -> Result<CipherPair, Error> {
        let shared = self.shared_secret.as_ref().ok_or(Error::KexInit)?;
        compute_keys::<Sha256>(
            shared.as_slice(),
            session_id,
            exchange_hash,
            local_to_remote,
            remote_to_local,
            is_server,
        )
    }
}
