//! Minimal Solidity ABI helpers for the mint contract.

use anyhow::{bail, Context, Result};
use sha3::{Digest, Keccak256};

pub const TRANSFER_EVENT: &str = "Transfer(address,address,uint256)";

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// `0x`-prefixed topic hash for an event signature.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

pub fn encode_no_arg_call(signature: &str) -> String {
    format!("0x{}", hex::encode(selector(signature)))
}

/// Calldata for a `(address, string)` function such as `mint(address,string)`.
pub fn encode_address_string_call(signature: &str, address: &str, text: &str) -> Result<String> {
    let mut data = Vec::with_capacity(4 + 32 * 4 + text.len());
    data.extend_from_slice(&selector(signature));
    data.extend_from_slice(&address_word(address)?);
    data.extend_from_slice(&u64_word(64));
    data.extend_from_slice(&u64_word(text.len() as u64));
    data.extend_from_slice(text.as_bytes());
    let padding = (32 - text.len() % 32) % 32;
    data.extend(std::iter::repeat(0_u8).take(padding));
    Ok(format!("0x{}", hex::encode(data)))
}

fn address_word(address: &str) -> Result<[u8; 32]> {
    let raw = address.trim_start_matches("0x");
    let bytes = hex::decode(raw).with_context(|| format!("invalid address {address}"))?;
    if bytes.len() != 20 {
        bail!("address {address} is not 20 bytes");
    }
    let mut word = [0_u8; 32];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}

fn u64_word(value: u64) -> [u8; 32] {
    let mut word = [0_u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Parses a `0x` quantity into u128; `None` if it does not fit or is not hex.
pub fn parse_quantity(hex_value: &str) -> Option<u128> {
    let digits = hex_value.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Some(0);
    }
    let significant = digits.trim_start_matches('0');
    if significant.len() > 32 {
        return None;
    }
    u128::from_str_radix(if significant.is_empty() { "0" } else { significant }, 16).ok()
}

pub fn to_quantity(value: u128) -> String {
    format!("0x{value:x}")
}

/// Decimal rendering of an arbitrary-width big-endian hex word.
pub fn uint_hex_to_decimal(hex_value: &str) -> Option<String> {
    let digits = hex_value.trim().trim_start_matches("0x");
    let padded = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };
    let mut bytes = hex::decode(padded).ok()?;

    let mut decimal_digits: Vec<u8> = Vec::new();
    while bytes.iter().any(|byte| *byte != 0) {
        let mut remainder: u32 = 0;
        for byte in bytes.iter_mut() {
            let acc = (remainder << 8) | u32::from(*byte);
            *byte = (acc / 10) as u8;
            remainder = acc % 10;
        }
        decimal_digits.push(remainder as u8);
    }
    if decimal_digits.is_empty() {
        return Some("0".to_string());
    }
    Some(
        decimal_digits
            .iter()
            .rev()
            .map(|digit| char::from(b'0' + digit))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_selectors_and_topics() {
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(
            event_topic(TRANSFER_EVENT),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn encodes_address_and_dynamic_string() -> anyhow::Result<()> {
        let data = encode_address_string_call(
            "mint(address,string)",
            "0x1111111111111111111111111111111111111111",
            "ipfs://x",
        )?;
        let body = data.trim_start_matches("0x");
        assert_eq!(&body[..8], hex::encode(selector("mint(address,string)")));
        let words: Vec<&str> = (0..4).map(|index| &body[8 + index * 64..8 + (index + 1) * 64]).collect();
        assert_eq!(words[0], format!("{}{}", "0".repeat(24), "11".repeat(20)));
        assert!(words[1].ends_with("40"));
        assert!(words[2].ends_with("08"));
        assert!(words[3].starts_with(&hex::encode("ipfs://x")));
        assert_eq!(body.len(), 8 + 64 * 4);
        Ok(())
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(encode_address_string_call("mint(address,string)", "0x12", "x").is_err());
    }

    #[test]
    fn quantities_and_decimals() {
        assert_eq!(parse_quantity("0x5208"), Some(21_000));
        assert_eq!(parse_quantity("0x"), Some(0));
        assert_eq!(to_quantity(25_200), "0x6270");
        assert_eq!(
            uint_hex_to_decimal("0x000000000000000000000000000000000000000000000000000000000000002a").as_deref(),
            Some("42")
        );
        assert_eq!(
            uint_hex_to_decimal(&format!("0x{}", "f".repeat(64))).as_deref(),
            Some("115792089237316195423570985008687907853269984665640564039457584007913129639935")
        );
        assert_eq!(uint_hex_to_decimal("0x0").as_deref(), Some("0"));
    }
}
