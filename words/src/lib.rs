//! Derive deterministic mnemonic word sequences from account addresses.
//!
//! Every [Address] maps to exactly one [WordSequence] of [SEQUENCE_LENGTH] words drawn from a
//! fixed 2048-word dictionary. Leading slices of a sequence ([Prefix]) serve as short,
//! human-memorable identifiers for the address.
//!
//! # Encoding
//!
//! ```text
//! +----------------------------------------+--------------------+
//! |          address (20 bytes)            | SHA-256[0..2] (2B) |
//! +----------------------------------------+--------------------+
//!  ^ least-significant byte                 most-significant byte ^
//!
//! word[i] = bits [11 * i, 11 * i + 11) of the little-endian integer (i = 0..16)
//! ```
//!
//! Because the address occupies the least-significant bits, addresses that share leading bytes
//! share leading words.
//!
//! # Example
//!
//! ```rust
//! use shorthash_words::{Address, WordSequence};
//!
//! let address: Address = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().unwrap();
//! assert_eq!(address.to_string(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
//!
//! let words = WordSequence::from_address(&address);
//! assert_eq!(words.display_prefix().to_string(), "slender survey");
//! ```

use thiserror::Error;

mod address;
pub use address::Address;
mod english;
mod sequence;
pub use sequence::{index, word, Prefix, Word, WordSequence};

/// Length of an address in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// Number of checksum bytes appended to the address before encoding.
pub const CHECKSUM_LENGTH: usize = 2;

/// Bits consumed per word (`2^11 = 2048` dictionary entries).
pub const WORD_BITS: usize = 11;

/// Number of words in a [WordSequence].
pub const SEQUENCE_LENGTH: usize = (ADDRESS_LENGTH + CHECKSUM_LENGTH) * 8 / WORD_BITS;

/// Shortest prefix ever assigned as a shorthash.
pub const MIN_SHORTHASH_WORDS: usize = 2;

/// Number of words in a display prefix or suffix.
pub const DISPLAY_WORDS: usize = 2;

/// Errors that can occur when parsing addresses or word prefixes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid address length: {0} bytes")]
    InvalidAddressLength(usize),
    #[error("unknown word: {0}")]
    UnknownWord(String),
    #[error("invalid word index: {0}")]
    InvalidWordIndex(Word),
    #[error("invalid prefix length: {0}")]
    InvalidPrefixLength(usize),
}

/// Converts bytes to a lowercase hexadecimal string.
pub fn hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[]), "");
        assert_eq!(hex(&[0x00, 0x0f, 0xab, 0xff]), "000fabff");
    }
}
