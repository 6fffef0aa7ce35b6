use std::marker::PhantomData;

use digest::{KeyInit, Mac as DigestMac};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::{Mac, MacAlgorithm};
use crate::Error;

/// HMAC over `sequence_number || data`, in either the classic or the
/// encrypt-then-MAC packet layout.
pub struct CryptoMacAlgorithm<M> {
    key_len: usize,
    etm: bool,
    p: PhantomData<fn() -> M>,
}

impl<M> CryptoMacAlgorithm<M> {
    pub fn new(key_len: usize, etm: bool) -> Self {
        CryptoMacAlgorithm {
            key_len,
            etm,
            p: PhantomData,
        }
    }
}

pub struct CryptoMac<M> {
    keyed: M,
    etm: bool,
}

impl<M: DigestMac + KeyInit + Clone + Send + 'static> MacAlgorithm for CryptoMacAlgorithm<M> {
    fn key_len(&self) -> usize {
        self.key_len
    }

    fn make_mac(&self, mac_key: &[u8]) -> Result<Box<dyn Mac + Send>, Error> {
        let key = Zeroizing::new(mac_key.to_vec());
        let keyed = <M as DigestMac>::new_from_slice(&key).map_err(|_| Error::Kex)?;
        Ok(Box::new(CryptoMac {
            keyed,
            etm: self.etm,
        }))
    }
}

impl<M: DigestMac + Clone> Mac for CryptoMac<M> {
    fn mac_len(&self) -> usize {
        <M as digest::OutputSizeUser>::output_size()
    }

    fn is_etm(&self) -> bool {
        self.etm
    }

    fn compute(&self, sequence_number: u32, payload: &[u8], output: &mut [u8]) {
        let mut hmac = self.keyed.clone();
        DigestMac::update(&mut hmac, &sequence_number.to_be_bytes());
        DigestMac::update(&mut hmac, payload);
        for (o, b) in output.iter_mut().zip(DigestMac::finalize(hmac).into_bytes()) {
            *o = b;
        }
    }

    fn verify(&self, sequence_number: u32, payload: &[u8], mac: &[u8]) -> bool {
        let mut buf = vec![0; self.mac_len()];
        self.compute(sequence_number, payload, &mut buf);
        buf.ct_eq(mac).into()
    }
}
