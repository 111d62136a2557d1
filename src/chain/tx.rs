//! Legacy (EIP-155) transaction construction, RLP encoding, and signing.
//!
//! Flare's C-chain accepts legacy transactions, which keeps the wire format
//! small: one RLP list, keccak sighash, one recoverable secp256k1 signature.
//! Signing is deterministic (RFC 6979), so identical inputs always produce
//! identical raw bytes.

use bytes::{BufMut, BytesMut};
use k256::ecdsa::SigningKey;
use sha3::{Digest, Keccak256};

use crate::chain::address::{Address, hex_encode};
use crate::error::ChainError;

/// An unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// `None` would be contract creation; the agent never deploys, but the
    /// encoder handles it for completeness.
    pub to: Option<Address>,
    pub value: u128,
    pub data: Vec<u8>,
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: [u8; 32],
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex_encode(&self.raw))
    }

    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex_encode(&self.hash))
    }
}

impl LegacyTransaction {
    /// The EIP-155 signing hash: keccak of the RLP list with
    /// `(chain_id, 0, 0)` in the signature slots.
    pub fn sighash(&self, chain_id: u64) -> [u8; 32] {
        let mut list = RlpList::new();
        self.append_body(&mut list);
        list.append_uint(chain_id as u128);
        list.append_uint(0);
        list.append_uint(0);

        let mut out = [0u8; 32];
        out.copy_from_slice(&Keccak256::digest(list.finish()));
        out
    }

    /// Sign with the EIP-155 replay-protected `v`.
    pub fn sign(&self, key: &SigningKey, chain_id: u64) -> Result<SignedTransaction, ChainError> {
        let sighash = self.sighash(chain_id);
        let (signature, recovery) = key
            .sign_prehash_recoverable(&sighash)
            .map_err(|e| ChainError::Signing(e.to_string()))?;

        let v = chain_id * 2 + 35 + recovery.to_byte() as u64;
        let sig_bytes = signature.to_bytes();

        let mut list = RlpList::new();
        self.append_body(&mut list);
        list.append_uint(v as u128);
        list.append_scalar(&sig_bytes[..32]);
        list.append_scalar(&sig_bytes[32..]);

        let raw = list.finish();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&Keccak256::digest(&raw));

        Ok(SignedTransaction { raw, hash })
    }

    fn append_body(&self, list: &mut RlpList) {
        list.append_uint(self.nonce as u128);
        list.append_uint(self.gas_price);
        list.append_uint(self.gas_limit as u128);
        match &self.to {
            Some(address) => list.append_bytes(address.as_bytes()),
            None => list.append_bytes(&[]),
        }
        list.append_uint(self.value);
        list.append_bytes(&self.data);
    }
}

/// Incremental RLP list builder. Only what a legacy transaction needs.
struct RlpList {
    payload: BytesMut,
}

impl RlpList {
    fn new() -> Self {
        Self {
            payload: BytesMut::with_capacity(128),
        }
    }

    /// Append an integer: minimal big-endian bytes, zero as the empty string.
    fn append_uint(&mut self, value: u128) {
        let bytes = minimal_be(value);
        self.append_bytes(&bytes);
    }

    /// Append a signature scalar, stripping leading zero bytes.
    fn append_scalar(&mut self, scalar: &[u8]) {
        let start = scalar.iter().position(|b| *b != 0).unwrap_or(scalar.len());
        self.append_bytes(&scalar[start..]);
    }

    /// Append a byte string with the standard RLP string header.
    fn append_bytes(&mut self, data: &[u8]) {
        match data.len() {
            1 if data[0] < 0x80 => self.payload.put_u8(data[0]),
            len if len <= 55 => {
                self.payload.put_u8(0x80 + len as u8);
                self.payload.put_slice(data);
            }
            len => {
                let len_bytes = minimal_be(len as u128);
                self.payload.put_u8(0xb7 + len_bytes.len() as u8);
                self.payload.put_slice(&len_bytes);
                self.payload.put_slice(data);
            }
        }
    }

    fn finish(self) -> Vec<u8> {
        let payload = self.payload;
        let mut out = Vec::with_capacity(payload.len() + 4);
        if payload.len() <= 55 {
            out.push(0xc0 + payload.len() as u8);
        } else {
            let len_bytes = minimal_be(payload.len() as u128);
            out.push(0xf7 + len_bytes.len() as u8);
            out.extend_from_slice(&len_bytes);
        }
        out.extend_from_slice(&payload);
        out
    }
}

fn minimal_be(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn unhex(s: &str) -> Vec<u8> {
        let s = s.trim_start_matches("0x");
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    /// The worked example from the EIP-155 specification.
    fn eip155_example() -> LegacyTransaction {
        LegacyTransaction {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: Some(Address::parse("0x3535353535353535353535353535353535353535").unwrap()),
            value: 1_000_000_000_000_000_000,
            data: Vec::new(),
        }
    }

    #[test]
    fn test_eip155_sighash() {
        let tx = eip155_example();
        assert_eq!(
            hex_encode(&tx.sighash(1)),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn test_eip155_signed_raw() {
        let key_bytes =
            unhex("4646464646464646464646464646464646464646464646464646464646464646");
        let key = SigningKey::from_slice(&key_bytes).unwrap();
        let signed = eip155_example().sign(&key, 1).unwrap();
        assert_eq!(
            signed.raw_hex(),
            "0xf86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
    }

    #[test]
    fn test_signing_is_deterministic() {
        let key = SigningKey::from_slice(&unhex(
            "4646464646464646464646464646464646464646464646464646464646464646",
        ))
        .unwrap();
        let a = eip155_example().sign(&key, 14).unwrap();
        let b = eip155_example().sign(&key, 14).unwrap();
        assert_eq!(a.raw, b.raw);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_rlp_small_values() {
        // Single bytes below 0x80 encode as themselves.
        let mut list = RlpList::new();
        list.append_uint(0);
        list.append_uint(1);
        list.append_uint(0x7f);
        list.append_uint(0x80);
        assert_eq!(list.finish(), vec![0xc6, 0x80, 0x01, 0x7f, 0x81, 0x80]);
    }

    #[test]
    fn test_rlp_long_string() {
        // Calldata longer than 55 bytes takes the long-string header.
        let data = vec![0xabu8; 60];
        let mut list = RlpList::new();
        list.append_bytes(&data);
        let encoded = list.finish();
        assert_eq!(encoded[0], 0xf8);
        assert_eq!(encoded[1], 62);
        assert_eq!(encoded[2], 0xb8);
        assert_eq!(encoded[3], 60);
        assert_eq!(&encoded[4..], &data[..]);
    }

    #[test]
    fn test_scalar_strips_leading_zeros() {
        let mut list = RlpList::new();
        let mut scalar = [0u8; 32];
        scalar[30] = 0x01;
        scalar[31] = 0x02;
        list.append_scalar(&scalar);
        assert_eq!(list.finish(), vec![0xc3, 0x82, 0x01, 0x02]);
    }
}
