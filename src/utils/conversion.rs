//! Type conversion and formatting utilities.
//!
//! Bridges alloy primitives to the representations stored in PostgreSQL:
//! lowercase `0x` hex strings for addresses and hashes, decimal strings for
//! `uint256` amounts, `i64` for block coordinates and chrono timestamps.

use alloy::primitives::{hex, Address, B256, U256};
use anyhow::Context;
use chrono::{DateTime, Utc};

// ============================================
// Hex Encoding
// ============================================

/// Encode bytes as a lowercase hex string with 0x prefix.
pub fn hex_encode(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Lowercase `0x` representation of an address (no EIP-55 checksum).
pub fn address_to_string(address: &Address) -> String {
    hex_encode(address.as_slice())
}

pub fn b256_to_string(hash: &B256) -> String {
    hex_encode(hash.as_slice())
}

// ============================================
// U256 Conversions
// ============================================

/// Decimal string of a `uint256`, bound as `text` and cast to `NUMERIC`.
pub fn u256_to_string(value: &U256) -> String {
    value.to_string()
}

pub fn u256s_to_strings(values: &[U256]) -> Vec<String> {
    values.iter().map(u256_to_string).collect()
}

/// On-chain request IDs are `uint256`; records key them as 32-byte words.
pub fn u256_to_b256(value: U256) -> B256 {
    B256::from(value)
}

// ============================================
// Block coordinates
// ============================================

/// Convert a block coordinate to the signed column type used by PostgreSQL.
pub fn to_i64(value: u64) -> anyhow::Result<i64> {
    i64::try_from(value).with_context(|| format!("value {} does not fit a BIGINT column", value))
}

/// Convert a unix timestamp (seconds) from a block header.
pub fn timestamp_to_datetime(timestamp: u64) -> DateTime<Utc> {
    i64::try_from(timestamp)
        .ok()
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
