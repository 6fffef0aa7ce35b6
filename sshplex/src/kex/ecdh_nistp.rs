use std::marker::PhantomData;

use elliptic_curve::ecdh::{EphemeralSecret, SharedSecret};
use elliptic_curve::point::PointCompression;
use elliptic_curve::sec1::{FromEncodedPoint, ModulusSize, ToEncodedPoint};
use elliptic_curve::{AffinePoint, Curve, CurveArithmetic, FieldBytesSize};
use log::debug;
use p256::NistP256;
use p384::NistP384;
use p521::NistP521;
use sha2::{Digest, Sha256, Sha384, Sha512};

use super::{compute_keys, exchange_hash, Direction, KexAlgorithm, KexType};
use crate::cipher::CipherPair;
use crate::session::Exchange;
use crate::Error;

pub struct EcdhNistP256KexType {}

impl KexType for EcdhNistP256KexType {
    fn make(&self) -> Box<dyn KexAlgorithm + Send> {
        Box::new(EcdhNistPKex::<NistP256, Sha256>::new())
    }
}

pub struct EcdhNistP384KexType {}

impl KexType for EcdhNistP384KexType {
    fn make(&self) -> Box<dyn KexAlgorithm + Send> {
        Box::new(EcdhNistPKex::<NistP384, Sha384>::new())
    }
}

pub struct EcdhNistP521KexType {}

impl KexType for EcdhNistP521KexType {
    fn make(&self) -> Box<dyn KexAlgorithm + Send> {
        Box::new(EcdhNistPKex::<NistP521, Sha512>::new())
    }
}

/// ECDH over a NIST curve (RFC 5656), public points in uncompressed
/// SEC1 form.
#[doc(hidden)]
pub struct EcdhNistPKex<C: Curve + CurveArithmetic, D: Digest> {
    local_secret: Option<EphemeralSecret<C>>,
    shared_secret: Option<SharedSecret<C>>,
    _digest: PhantomData<fn() -> D>,
}

impl<C: Curve + CurveArithmetic, D: Digest> EcdhNistPKex<C, D> {
    fn new() -> Self {
        EcdhNistPKex {
            local_secret: None,
            shared_secret: None,
            _digest: PhantomData,
        }
    }
}

impl<C: Curve + CurveArithmetic, D: Digest> std::fmt::Debug for EcdhNistPKex<C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Algorithm {{ local_secret: [hidden], shared_secret: [hidden] }}",
        )
    }
}

impl<C: Curve + CurveArithmetic, D: Digest> KexAlgorithm for EcdhNistPKex<C, D>
where
    C: PointCompression,
    FieldBytesSize<C>: ModulusSize,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
{
    fn generate_ephemeral(&mut self) -> Result<Vec<u8>, Error> {
        let secret = EphemeralSecret::<C>::random(&mut rand_core::OsRng);
        let public = secret.public_key().to_sec1_bytes().to_vec();
        self.local_secret = Some(secret);
        Ok(public)
    }

    fn compute_shared_secret(&mut self, remote_public: &[u8]) -> Result<(), Error> {
        let local_secret = self.local_secret.take().ok_or(Error::KexInit)?;
        let remote = elliptic_curve::PublicKey::<C>::from_sec1_bytes(remote_public).map_err(|_| {
            debug!("invalid ECDH public point");
            Error::Kex
        })?;
        self.shared_secret = Some(local_secret.diffie_hellman(&remote));
        Ok(())
    }

    fn compute_exchange_hash(
        &self,
        host_key: &[u8],
        exchange: &Exchange,
    ) -> Result<Vec<u8>, Error> {
        let shared = self.shared_secret.as_ref().ok_or(Error::KexInit)?;
        exchange_hash::<D>(host_key, exchange, shared.raw_secret_bytes())
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
        compute_keys::<D>(
            shared.raw_secret_bytes(),
            session_id,
            exchange_hash,
            local_to_remote,
            remote_to_local,
            is_server,
        )
    }
}
