//! Utility functions for the indexer.
//!
//! - [`conversion`] - Conversions between alloy primitives and stored column types

mod conversion;

// ============================================
// Re-exports
// ============================================

pub use conversion::{
    address_to_string, b256_to_string, hex_encode, timestamp_to_datetime, to_i64, u256_to_b256,
    u256_to_string, u256s_to_strings,
};
