pub(crate) mod groups;
use std::marker::PhantomData;

use digest::Digest;
use groups::DH;
use log::debug;
use num_bigint::BigUint;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use ssh_encoding::Encode;
use zeroize::Zeroizing;

use self::groups::{DhGroup, DH_GROUP1, DH_GROUP14, DH_GROUP16};
use super::{compute_keys, encode_exchange_prefix, exchange_hash, Direction, KexAlgorithm, KexType};
use crate::cipher::CipherPair;
use crate::helpers::encode_mpint;
use crate::session::Exchange;
use crate::Error;

pub struct DhGroup1Sha1KexType {}

impl KexType for DhGroup1Sha1KexType {
    fn make(&self) -> Box<dyn KexAlgorithm + Send> {
        Box::new(DhGroupKex::<Sha1>::new(Some(&DH_GROUP1)))
    }
}

pub struct DhGroup14Sha1KexType {}

impl KexType for DhGroup14Sha1KexType {
    fn make(&self) -> Box<dyn KexAlgorithm + Send> {
        Box::new(DhGroupKex::<Sha1>::new(Some(&DH_GROUP14)))
    }
}

pub struct DhGroup14Sha256KexType {}

impl KexType for DhGroup14Sha256KexType {
    fn make(&self) -> Box<dyn KexAlgorithm + Send> {
        Box::new(DhGroupKex::<Sha256>::new(Some(&DH_GROUP14)))
    }
}

pub struct DhGroup16Sha512KexType {}

impl KexType for DhGroup16Sha512KexType {
    fn make(&self) -> Box<dyn KexAlgorithm + Send> {
        Box::new(DhGroupKex::<Sha512>::new(Some(&DH_GROUP16)))
    }
}

/// Group exchange: the group comes from the server.
pub struct DhGexSha256KexType {}

impl KexType for DhGexSha256KexType {
    fn make(&self) -> Box<dyn KexAlgorithm + Send> {
        Box::new(DhGroupKex::<Sha256>::new(None))
    }
}

#[doc(hidden)]
pub struct DhGroupKex<D: Digest> {
    /// `None` until the group is known, for group exchange.
    dh: Option<DH>,
    gex: bool,
    shared_secret: Option<Zeroizing<Vec<u8>>>,
    _digest: PhantomData<fn() -> D>,
}

impl<D: Digest> DhGroupKex<D> {
    pub fn new(group: Option<&DhGroup>) -> DhGroupKex<D> {
        DhGroupKex {
            dh: group.map(DH::new),
            gex: group.is_none(),
            shared_secret: None,
            _digest: PhantomData,
        }
    }

    fn dh(&self) -> Result<&DH, Error> {
        self.dh.as_ref().ok_or(Error::KexInit)
    }
}

impl<D: Digest> std::fmt::Debug for DhGroupKex<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Algorithm {{ local_secret: [hidden], shared_secret: [hidden] }}",
        )
    }
}

/// The wire form of an mpint, without its length prefix.
pub(crate) fn biguint_to_mpint(biguint: &BigUint) -> Vec<u8> {
    let mut mpint = Vec::new();
    let bytes = biguint.to_bytes_be();
    if let Some(b) = bytes.first() {
        if b > &0x7f {
            mpint.push(0);
        }
    }
    mpint.extend(&bytes);
    mpint
}

impl<D: Digest> KexAlgorithm for DhGroupKex<D> {
    fn is_dh_gex(&self) -> bool {
        self.gex
    }

    fn dh_gex_set_group(&mut self, group: DhGroup) -> Result<(), Error> {
        if !self.gex {
            return Err(Error::Inconsistent);
        }
        let dh = DH::new(&group);
        if !dh.is_valid_group() {
            debug!("invalid group: {group:?}");
            return Err(Error::Kex);
        }
        self.dh = Some(dh);
        Ok(())
    }

    fn generate_ephemeral(&mut self) -> Result<Vec<u8>, Error> {
        let dh = self.dh.as_mut().ok_or(Error::KexInit)?;
        dh.generate_private_key();
        let public = dh.generate_public_key();
        if !dh.is_in_range(&public) {
            return Err(Error::Inconsistent);
        }
        Ok(biguint_to_mpint(&public))
    }

    fn compute_shared_secret(&mut self, remote_public: &[u8]) -> Result<(), Error> {
        let dh = self.dh()?;
        let remote = DH::decode_public_key(remote_public);
        if !dh.is_in_range(&remote) {
            debug!("DH public value out of range");
            return Err(Error::Kex);
        }
        let shared = dh.compute_shared_secret(&remote);
        if !dh.is_in_range(&shared) {
            return Err(Error::Kex);
        }
        self.shared_secret = Some(Zeroizing::new(shared.to_bytes_be()));
        Ok(())
    }

    fn compute_exchange_hash(
        &self,
        host_key: &[u8],
        exchange: &Exchange,
    ) -> Result<Vec<u8>, Error> {
        let shared = self.shared_secret.as_ref().ok_or(Error::KexInit)?;
        let Some(ref gex) = exchange.gex else {
            return exchange_hash::<D>(host_key, exchange, shared.as_slice());
        };
        // https://tools.ietf.org/html/rfc4419#section-3
        let mut buffer = Zeroizing::new(Vec::new());
        encode_exchange_prefix(host_key, exchange, &mut buffer)?;
        (gex.params.min_group_size as u32).encode(&mut *buffer)?;
        (gex.params.preferred_group_size as u32).encode(&mut *buffer)?;
        (gex.params.max_group_size as u32).encode(&mut *buffer)?;
        encode_mpint(gex.group.prime(), &mut *buffer)?;
        encode_mpint(gex.group.generator(), &mut *buffer)?;
        exchange.client_ephemeral.as_slice().encode(&mut *buffer)?;
        exchange.server_ephemeral.as_slice().encode(&mut *buffer)?;
        encode_mpint(shared.as_slice(), &mut *buffer)?;
        Ok(D::digest(buffer.as_slice()).to_vec())
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
            shared.as_slice(),
            session_id,
            exchange_hash,
            local_to_remote,
            remote_to_local,
            is_server,
        )
    }
}
