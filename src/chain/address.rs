//! EVM account addresses with EIP-55 checksum handling.
//!
//! Mixed-case input must carry a correct EIP-55 checksum; all-lowercase and
//! all-uppercase hex are accepted as unchecksummed and normalized. Every
//! address the agent renders back to the user is checksummed.

use std::fmt;
use std::str::FromStr;

use sha3::{Digest, Keccak256};

use crate::error::ValidationError;

/// A 20-byte EVM account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; 20]);

impl Address {
    pub const LEN: usize = 20;

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Derive the address from a 64-byte uncompressed secp256k1 public key
    /// (x || y, without the 0x04 prefix byte).
    pub fn from_uncompressed_pubkey(xy: &[u8; 64]) -> Self {
        let digest = Keccak256::digest(xy);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parse a user-supplied address string.
    ///
    /// Accepts `0x` + 40 hex chars. If the hex carries mixed case the
    /// EIP-55 checksum must verify; otherwise the case carries no
    /// information and the address is accepted as-is.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| ValidationError::MalformedAddress {
                value: trimmed.to_string(),
                reason: "missing 0x prefix".to_string(),
            })?;

        if hex.len() != 40 {
            return Err(ValidationError::MalformedAddress {
                value: trimmed.to_string(),
                reason: format!("expected 40 hex characters, got {}", hex.len()),
            });
        }

        let mut bytes = [0u8; 20];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let high = hex_nibble(chunk[0]).ok_or_else(|| malformed_hex(trimmed))?;
            let low = hex_nibble(chunk[1]).ok_or_else(|| malformed_hex(trimmed))?;
            bytes[i] = (high << 4) | low;
        }

        let address = Self(bytes);

        let has_lower = hex.bytes().any(|b| b.is_ascii_lowercase());
        let has_upper = hex.bytes().any(|b| b.is_ascii_uppercase());
        if has_lower && has_upper {
            let expected = address.to_checksum();
            if expected[2..] != hex[..] {
                return Err(ValidationError::ChecksumMismatch {
                    value: trimmed.to_string(),
                });
            }
        }

        Ok(address)
    }

    /// Render with the EIP-55 mixed-case checksum, `0x`-prefixed.
    pub fn to_checksum(&self) -> String {
        let lower = hex_encode(&self.0);
        let digest = Keccak256::digest(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, ch) in lower.chars().enumerate() {
            let nibble = if i % 2 == 0 {
                digest[i / 2] >> 4
            } else {
                digest[i / 2] & 0x0f
            };
            if ch.is_ascii_alphabetic() && nibble >= 8 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }
}

fn malformed_hex(value: &str) -> ValidationError {
    ValidationError::MalformedAddress {
        value: value.to_string(),
        reason: "contains non-hex characters".to_string(),
    }
}

fn hex_nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(char::from_digit((b >> 4) as u32, 16).unwrap_or('0'));
        out.push(char::from_digit((b & 0x0f) as u32, 16).unwrap_or('0'));
    }
    out
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl FromStr for Address {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // Vectors from the EIP-55 reference list.
    const CHECKSUMMED: &[&str] = &[
        "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
        "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
        "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
        "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
    ];

    #[test]
    fn test_checksum_round_trip() {
        for raw in CHECKSUMMED {
            let addr = Address::parse(raw).unwrap();
            assert_eq!(addr.to_checksum(), *raw);
        }
    }

    #[test]
    fn test_lowercase_accepted_and_normalized() {
        let lower = CHECKSUMMED[0].to_lowercase();
        let addr = Address::parse(&lower).unwrap();
        assert_eq!(addr.to_checksum(), CHECKSUMMED[0]);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        // Flip case on one alphabetic character.
        let mut chars: Vec<char> = CHECKSUMMED[0].chars().collect();
        chars[4] = chars[4].to_ascii_lowercase();
        let tampered: String = chars.into_iter().collect();
        assert!(matches!(
            Address::parse(&tampered),
            Err(ValidationError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let err = Address::parse("0x1234").unwrap_err();
        assert!(matches!(err, ValidationError::MalformedAddress { .. }));
    }

    #[test]
    fn test_missing_prefix_rejected() {
        let no_prefix = &CHECKSUMMED[0][2..];
        assert!(matches!(
            Address::parse(no_prefix),
            Err(ValidationError::MalformedAddress { .. })
        ));
    }

    #[test]
    fn test_non_hex_rejected() {
        let err = Address::parse("0xZZ6916095ca1df60bB79Ce92cE3Ea74c37c5d359").unwrap_err();
        assert!(matches!(err, ValidationError::MalformedAddress { .. }));
    }

    #[test]
    fn test_display_is_checksummed() {
        let addr = Address::parse(&CHECKSUMMED[1].to_lowercase()).unwrap();
        assert_eq!(format!("{}", addr), CHECKSUMMED[1]);
    }
}
