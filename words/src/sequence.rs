use crate::{
    english::WORDS, Address, Error, ADDRESS_LENGTH, CHECKSUM_LENGTH, DISPLAY_WORDS,
    MIN_SHORTHASH_WORDS, SEQUENCE_LENGTH, WORD_BITS,
};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

/// Mask selecting a single word index from the encoded integer.
const WORD_MASK: u32 = (1 << WORD_BITS) - 1;

/// Index of a word in the dictionary (always less than 2048).
pub type Word = u16;

/// Return the dictionary word at `index`.
///
/// # Panics
///
/// Panics if `index` is not a valid dictionary index.
pub fn word(index: Word) -> &'static str {
    WORDS[index as usize]
}

/// Return the dictionary index of `word`, if present.
pub fn index(word: &str) -> Option<Word> {
    WORDS.binary_search(&word).ok().map(|i| i as Word)
}

fn write_words(f: &mut fmt::Formatter<'_>, words: &[Word]) -> fmt::Result {
    for (i, w) in words.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        f.write_str(word(*w))?;
    }
    Ok(())
}

/// The deterministic 16-word encoding of an [Address] and its checksum.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WordSequence([Word; SEQUENCE_LENGTH]);

impl WordSequence {
    /// Encode `address`.
    ///
    /// The address bytes are followed by the first two bytes of their SHA-256 digest. The
    /// resulting 22 bytes are read as a little-endian integer and split into 11-bit chunks,
    /// starting from the least-significant end.
    pub fn from_address(address: &Address) -> Self {
        // Pad so that every 3-byte window below stays in bounds
        let mut data = [0u8; ADDRESS_LENGTH + CHECKSUM_LENGTH + 2];
        data[..ADDRESS_LENGTH].copy_from_slice(address.as_bytes());
        let digest = Sha256::digest(address.as_bytes());
        data[ADDRESS_LENGTH..ADDRESS_LENGTH + CHECKSUM_LENGTH]
            .copy_from_slice(&digest[..CHECKSUM_LENGTH]);

        let mut words = [0; SEQUENCE_LENGTH];
        for (i, w) in words.iter_mut().enumerate() {
            let bit = i * WORD_BITS;
            let byte = bit / 8;
            let window = u32::from_le_bytes([data[byte], data[byte + 1], data[byte + 2], 0]);
            *w = ((window >> (bit % 8)) & WORD_MASK) as Word;
        }
        Self(words)
    }

    /// Borrow the word indices.
    pub fn words(&self) -> &[Word; SEQUENCE_LENGTH] {
        &self.0
    }

    /// Return the first `len` words as a [Prefix].
    pub fn prefix(&self, len: usize) -> Result<Prefix, Error> {
        Prefix::new(self.0.get(..len).ok_or(Error::InvalidPrefixLength(len))?)
    }

    /// Return every prefix that may be assigned as a shorthash, shortest first.
    pub fn candidates(&self) -> impl Iterator<Item = Prefix> + '_ {
        (MIN_SHORTHASH_WORDS..=SEQUENCE_LENGTH).map(move |len| Prefix(self.0[..len].to_vec()))
    }

    /// Number of leading words shared with `other`.
    pub fn common_run(&self, other: &WordSequence) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// The first [DISPLAY_WORDS] words, used to group accounts for display.
    pub fn display_prefix(&self) -> Prefix {
        Prefix(self.0[..DISPLAY_WORDS].to_vec())
    }

    /// The last [DISPLAY_WORDS] words.
    pub fn display_suffix(&self) -> Prefix {
        Prefix(self.0[SEQUENCE_LENGTH - DISPLAY_WORDS..].to_vec())
    }
}

impl From<&Address> for WordSequence {
    fn from(address: &Address) -> Self {
        Self::from_address(address)
    }
}

impl fmt::Display for WordSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_words(f, &self.0)
    }
}

impl fmt::Debug for WordSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WordSequence({})", self)
    }
}

/// A non-empty leading slice of a [WordSequence] (between 1 and 16 words).
///
/// Shorthashes, reserved prefixes, and display prefixes/suffixes are all prefixes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Prefix(Vec<Word>);

impl Prefix {
    /// Create a prefix from word indices.
    pub fn new(words: &[Word]) -> Result<Self, Error> {
        if words.is_empty() || words.len() > SEQUENCE_LENGTH {
            return Err(Error::InvalidPrefixLength(words.len()));
        }
        if let Some(w) = words.iter().find(|w| **w as usize >= WORDS.len()) {
            return Err(Error::InvalidWordIndex(*w));
        }
        Ok(Self(words.to_vec()))
    }

    /// Borrow the word indices.
    pub fn words(&self) -> &[Word] {
        &self.0
    }

    /// Number of words.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this prefix is a leading slice of `sequence`.
    pub fn is_prefix_of(&self, sequence: &WordSequence) -> bool {
        sequence.0.starts_with(&self.0)
    }

    /// Return every shorter-or-equal prefix of `self` with length in `1..=len`.
    pub fn ancestors(&self, len: usize) -> impl Iterator<Item = Prefix> + '_ {
        (1..=len.min(self.0.len())).map(move |l| Prefix(self.0[..l].to_vec()))
    }
}

impl FromStr for Prefix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words = s
            .split_whitespace()
            .map(|w| index(&w.to_lowercase()).ok_or_else(|| Error::UnknownWord(w.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(&words)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_words(f, &self.0)
    }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prefix({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use shorthash_macros::test_traced;
    use test_case::test_case;

    fn sequence(address: &str) -> WordSequence {
        WordSequence::from_address(&address.parse().unwrap())
    }

    #[test_case(
        "0x0000000000000000000000000000000000000000",
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon useless elephant";
        "zero"
    )]
    #[test_case(
        "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
        "slender survey lizard token chronic include alarm panic shoe face onion wrist daughter kind polar life";
        "checksummed"
    )]
    #[test_case(
        "0xb979f6f0b2a8d6d14f8e69ee5de64e27a7c3eb41",
        "damp supreme journey menu pull virtual include hat saddle offer polar include mansion kit old talk";
        "lowercase"
    )]
    fn test_vectors(address: &str, expected: &str) {
        assert_eq!(sequence(address).to_string(), expected);
    }

    #[test_traced]
    fn test_neighbors_share_long_run() {
        let a = sequence("0xb979f6f0b2a8d6d14f8e69ee5de64e27a7c3eb41");
        let b = sequence("0xb979f6f0b2a8d6d14f8e69ee5de64e27a7c3eb42");
        assert_eq!(a.common_run(&b), 13);
        assert_eq!(b.common_run(&a), 13);
        assert_eq!(a.common_run(&a), SEQUENCE_LENGTH);
    }

    #[test]
    fn test_leading_bytes_determine_leading_words() {
        // Byte `j` only influences words covering bits `8j..8j+8`
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..100 {
            let mut a = [0u8; ADDRESS_LENGTH];
            rng.fill(&mut a[..]);
            let mut b = a;
            let byte = rng.gen_range(0..ADDRESS_LENGTH);
            b[byte] ^= 1 << rng.gen_range(0..8);
            let wa = WordSequence::from_address(&Address::new(a));
            let wb = WordSequence::from_address(&Address::new(b));
            assert!(wa.common_run(&wb) >= (8 * byte) / WORD_BITS);
            assert_ne!(wa, wb);
        }
    }

    #[test]
    fn test_deterministic() {
        let address: Address = "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB".parse().unwrap();
        assert_eq!(
            WordSequence::from_address(&address),
            WordSequence::from_address(&address)
        );
    }

    #[test]
    fn test_candidates() {
        let w = sequence("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
        let candidates: Vec<_> = w.candidates().collect();
        assert_eq!(candidates.len(), SEQUENCE_LENGTH - MIN_SHORTHASH_WORDS + 1);
        for (i, candidate) in candidates.iter().enumerate() {
            assert_eq!(candidate.len(), MIN_SHORTHASH_WORDS + i);
            assert!(candidate.is_prefix_of(&w));
        }
        assert_eq!(candidates[0].to_string(), "slender survey");
        assert_eq!(w.display_prefix().to_string(), "slender survey");
        assert_eq!(w.display_suffix().to_string(), "polar life");
    }

    #[test]
    fn test_prefix_parse() {
        let prefix: Prefix = "slender   Survey\tlizard".parse().unwrap();
        assert_eq!(prefix.len(), 3);
        assert_eq!(prefix.to_string(), "slender survey lizard");
        assert_eq!(
            "slender notaword".parse::<Prefix>().unwrap_err(),
            Error::UnknownWord("notaword".into())
        );
        assert_eq!(
            "".parse::<Prefix>().unwrap_err(),
            Error::InvalidPrefixLength(0)
        );
        let long = vec!["zoo"; SEQUENCE_LENGTH + 1].join(" ");
        assert_eq!(
            long.parse::<Prefix>().unwrap_err(),
            Error::InvalidPrefixLength(SEQUENCE_LENGTH + 1)
        );
    }

    #[test]
    fn test_prefix_ancestors() {
        let w = sequence("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
        let p = w.prefix(4).unwrap();
        let ancestors: Vec<_> = p.ancestors(3).collect();
        assert_eq!(ancestors.len(), 3);
        assert_eq!(ancestors[0], w.prefix(1).unwrap());
        assert_eq!(ancestors[2], w.prefix(3).unwrap());
        assert_eq!(p.ancestors(10).count(), 4);
        assert!(w.prefix(0).is_err());
        assert!(w.prefix(17).is_err());
    }

    #[test]
    fn test_dictionary() {
        assert_eq!(word(0), "abandon");
        assert_eq!(word(2047), "zoo");
        assert_eq!(index("zoo"), Some(2047));
        assert_eq!(index("zzz"), None);
        assert_eq!(Prefix::new(&[2048]).unwrap_err(), Error::InvalidWordIndex(2048));
    }
}
