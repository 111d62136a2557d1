//! Minimal ABI encoding for the handful of contract calls the agent makes.
//!
//! Covers exactly: ERC-20 `transfer` / `balanceOf`, the UniswapV2-style
//! `swapExactTokensForTokens` / `getAmountsOut`, and FTSOv2 `getFeedById`.
//! A general ABI machine would be overkill for five fixed call shapes.

use sha3::{Digest, Keccak256};

use crate::chain::address::Address;
use crate::error::ChainError;

pub const WORD: usize = 32;

/// First four bytes of the keccak-256 of the canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

fn word_u128(value: u128) -> [u8; WORD] {
    let mut out = [0u8; WORD];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

fn word_address(address: &Address) -> [u8; WORD] {
    let mut out = [0u8; WORD];
    out[12..].copy_from_slice(address.as_bytes());
    out
}

fn word_bytes21(value: &[u8; 21]) -> [u8; WORD] {
    let mut out = [0u8; WORD];
    out[..21].copy_from_slice(value);
    out
}

/// `transfer(address,uint256)` call data.
pub fn encode_erc20_transfer(to: &Address, amount: u128) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 2 * WORD);
    data.extend_from_slice(&selector("transfer(address,uint256)"));
    data.extend_from_slice(&word_address(to));
    data.extend_from_slice(&word_u128(amount));
    data
}

/// `balanceOf(address)` call data.
pub fn encode_balance_of(owner: &Address) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&selector("balanceOf(address)"));
    data.extend_from_slice(&word_address(owner));
    data
}

/// `getFeedById(bytes21)` call data.
pub fn encode_get_feed_by_id(feed_id: &[u8; 21]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&selector("getFeedById(bytes21)"));
    data.extend_from_slice(&word_bytes21(feed_id));
    data
}

/// `swapExactTokensForTokens(uint256,uint256,address[],address,uint256)`
/// call data. The path array is the only dynamic argument, so its tail
/// starts right after the five head words.
pub fn encode_swap_exact_tokens(
    amount_in: u128,
    amount_out_min: u128,
    path: &[Address],
    to: &Address,
    deadline: u64,
) -> Vec<u8> {
    let head_words = 5;
    let mut data = Vec::with_capacity(4 + (head_words + 1 + path.len()) * WORD);
    data.extend_from_slice(&selector(
        "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)",
    ));
    data.extend_from_slice(&word_u128(amount_in));
    data.extend_from_slice(&word_u128(amount_out_min));
    data.extend_from_slice(&word_u128((head_words * WORD) as u128));
    data.extend_from_slice(&word_address(to));
    data.extend_from_slice(&word_u128(deadline as u128));
    data.extend_from_slice(&word_u128(path.len() as u128));
    for hop in path {
        data.extend_from_slice(&word_address(hop));
    }
    data
}

/// `getAmountsOut(uint256,address[])` call data, for swap output quotes.
pub fn encode_get_amounts_out(amount_in: u128, path: &[Address]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + (3 + path.len()) * WORD);
    data.extend_from_slice(&selector("getAmountsOut(uint256,address[])"));
    data.extend_from_slice(&word_u128(amount_in));
    data.extend_from_slice(&word_u128((2 * WORD) as u128));
    data.extend_from_slice(&word_u128(path.len() as u128));
    for hop in path {
        data.extend_from_slice(&word_address(hop));
    }
    data
}

/// Decode a dynamic `uint256[]` return value.
pub fn decode_u128_array(data: &[u8]) -> Result<Vec<u128>, ChainError> {
    if data.len() < 2 * WORD {
        return Err(ChainError::MalformedResponse(format!(
            "uint256[] needs at least 64 bytes, got {}",
            data.len()
        )));
    }
    let offset = decode_u128(&data[..WORD])? as usize;
    let len_start = offset;
    if data.len() < len_start + WORD {
        return Err(ChainError::MalformedResponse(
            "uint256[] offset out of range".to_string(),
        ));
    }
    let len = decode_u128(&data[len_start..len_start + WORD])? as usize;
    let body = len_start + WORD;
    if data.len() < body + len * WORD {
        return Err(ChainError::MalformedResponse(
            "uint256[] truncated".to_string(),
        ));
    }
    (0..len)
        .map(|i| decode_u128(&data[body + i * WORD..body + (i + 1) * WORD]))
        .collect()
}

/// Decode a single `uint256` return word into `u128`.
///
/// Values wider than 128 bits are rejected rather than truncated.
pub fn decode_u128(data: &[u8]) -> Result<u128, ChainError> {
    if data.len() < WORD {
        return Err(ChainError::MalformedResponse(format!(
            "expected a 32-byte return word, got {} bytes",
            data.len()
        )));
    }
    if data[..16].iter().any(|b| *b != 0) {
        return Err(ChainError::QuantityOverflow(format!(
            "0x{}",
            crate::chain::address::hex_encode(&data[..WORD])
        )));
    }
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&data[16..WORD]);
    Ok(u128::from_be_bytes(raw))
}

/// Decode the `(uint256 value, int8 decimals, uint64 timestamp)` tuple
/// returned by FTSOv2 `getFeedById`.
pub fn decode_feed_value(data: &[u8]) -> Result<(u128, i8, u64), ChainError> {
    if data.len() < 3 * WORD {
        return Err(ChainError::MalformedResponse(format!(
            "feed tuple needs 96 bytes, got {}",
            data.len()
        )));
    }

    let value = decode_u128(&data[..WORD])?;

    let decimals_word = &data[WORD..2 * WORD];
    let sign_fill = if decimals_word[WORD - 1] & 0x80 != 0 {
        0xff
    } else {
        0x00
    };
    if decimals_word[..WORD - 1].iter().any(|b| *b != sign_fill) {
        return Err(ChainError::MalformedResponse(
            "int8 word is not sign-extended".to_string(),
        ));
    }
    let decimals = decimals_word[WORD - 1] as i8;

    let ts_word = &data[2 * WORD..3 * WORD];
    if ts_word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(ChainError::MalformedResponse(
            "uint64 word has high bits set".to_string(),
        ));
    }
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&ts_word[WORD - 8..]);
    let timestamp = u64::from_be_bytes(ts);

    Ok((value, decimals, timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn test_known_selectors() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(selector("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(
            selector("swapExactTokensForTokens(uint256,uint256,address[],address,uint256)"),
            [0x38, 0xed, 0x17, 0x39]
        );
    }

    #[test]
    fn test_transfer_layout() {
        let data = encode_erc20_transfer(&addr(0xaa), 1_000_000);
        assert_eq!(data.len(), 4 + 2 * WORD);
        // Address is right-aligned in its word.
        assert_eq!(&data[4..16], &[0u8; 12]);
        assert_eq!(&data[16..36], &[0xaa; 20]);
        assert_eq!(decode_u128(&data[36..]).unwrap(), 1_000_000);
    }

    #[test]
    fn test_swap_layout() {
        let path = [addr(0x11), addr(0x22)];
        let data = encode_swap_exact_tokens(500, 490, &path, &addr(0x33), 1_700_000_000);
        // 4 selector + 5 head words + length word + 2 path words.
        assert_eq!(data.len(), 4 + 8 * WORD);
        // Third head word is the offset to the path tail (5 * 32 = 160).
        let offset = decode_u128(&data[4 + 2 * WORD..4 + 3 * WORD]).unwrap();
        assert_eq!(offset, 160);
        // Tail starts with the array length.
        let len = decode_u128(&data[4 + 5 * WORD..4 + 6 * WORD]).unwrap();
        assert_eq!(len, 2);
        // Deadline is the fifth head word.
        let deadline = decode_u128(&data[4 + 4 * WORD..4 + 5 * WORD]).unwrap();
        assert_eq!(deadline, 1_700_000_000);
    }

    #[test]
    fn test_feed_id_padding() {
        let mut feed = [0u8; 21];
        feed[0] = 0x01;
        feed[1..4].copy_from_slice(b"FLR");
        let data = encode_get_feed_by_id(&feed);
        assert_eq!(data.len(), 4 + WORD);
        assert_eq!(&data[4..25], &feed);
        assert_eq!(&data[25..], &[0u8; 11]);
    }

    #[test]
    fn test_decode_u128_rejects_wide_values() {
        let mut word = [0u8; WORD];
        word[0] = 1;
        assert!(matches!(
            decode_u128(&word),
            Err(ChainError::QuantityOverflow(_))
        ));
    }

    #[test]
    fn test_decode_feed_value() {
        let mut data = Vec::new();
        let mut value = [0u8; WORD];
        value[WORD - 2..].copy_from_slice(&31_415u16.to_be_bytes());
        data.extend_from_slice(&value);

        // decimals = -3, sign-extended.
        let mut decimals = [0xffu8; WORD];
        decimals[WORD - 1] = (-3i8) as u8;
        data.extend_from_slice(&decimals);

        let mut ts = [0u8; WORD];
        ts[WORD - 8..].copy_from_slice(&1_700_000_000u64.to_be_bytes());
        data.extend_from_slice(&ts);

        let (v, d, t) = decode_feed_value(&data).unwrap();
        assert_eq!(v, 31_415);
        assert_eq!(d, -3);
        assert_eq!(t, 1_700_000_000);
    }

    #[test]
    fn test_decode_feed_value_short_buffer() {
        assert!(decode_feed_value(&[0u8; 64]).is_err());
    }

    #[test]
    fn test_get_amounts_out_round_trip() {
        let path = [addr(0x01), addr(0x02)];
        let call = encode_get_amounts_out(1_000, &path);
        assert_eq!(call.len(), 4 + 5 * WORD);

        // Simulate the return: [1000, 987].
        let mut ret = Vec::new();
        let mut offset = [0u8; WORD];
        offset[WORD - 1] = 0x20;
        ret.extend_from_slice(&offset);
        let mut len = [0u8; WORD];
        len[WORD - 1] = 2;
        ret.extend_from_slice(&len);
        let mut a = [0u8; WORD];
        a[WORD - 2..].copy_from_slice(&1_000u16.to_be_bytes());
        ret.extend_from_slice(&a);
        let mut b = [0u8; WORD];
        b[WORD - 2..].copy_from_slice(&987u16.to_be_bytes());
        ret.extend_from_slice(&b);

        assert_eq!(decode_u128_array(&ret).unwrap(), vec![1_000, 987]);
    }

    #[test]
    fn test_decode_u128_array_truncated() {
        let mut ret = Vec::new();
        let mut offset = [0u8; WORD];
        offset[WORD - 1] = 0x20;
        ret.extend_from_slice(&offset);
        let mut len = [0u8; WORD];
        len[WORD - 1] = 3;
        ret.extend_from_slice(&len);
        assert!(decode_u128_array(&ret).is_err());
    }
}
