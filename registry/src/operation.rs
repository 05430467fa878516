//! Operations persisted in the registry journal.
//!
//! Each committed transaction is a single journal item:
//!
//! ```text
//! +-------------+---------------+-----------+-----------+-----+
//! | Version(u8) | Count (u32)   | Operation | Operation | ... |
//! +-------------+---------------+-----------+-----------+-----+
//!
//! Reserve: 0x00 | Len(u8) | Word(u16) * Len
//! Remove:  0x01 | Address(20)
//! Put:     0x02 | Address(20) | Shorthash Len(u8)
//! ```
//!
//! Accounts are persisted as `(address, shorthash length)`: the words, display prefix, and
//! display suffix are recomputed from the address during replay.

use crate::Error;
use bytes::{Buf, BufMut};
use shorthash_words::{Address, Prefix, ADDRESS_LENGTH, SEQUENCE_LENGTH};

/// Encoding version of a transaction.
const VERSION: u8 = 0;

const RESERVE: u8 = 0;
const REMOVE: u8 = 1;
const PUT: u8 = 2;

/// A single change to the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Add a prefix to the reserved set.
    Reserve(Prefix),
    /// Delete the account of an address.
    Remove(Address),
    /// Insert an account whose shorthash is the first `length` words of its sequence.
    Put { address: Address, length: u8 },
}

impl Operation {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Operation::Reserve(prefix) => {
                buf.put_u8(RESERVE);
                buf.put_u8(prefix.len() as u8);
                for word in prefix.words() {
                    buf.put_u16(*word);
                }
            }
            Operation::Remove(address) => {
                buf.put_u8(REMOVE);
                buf.put_slice(address.as_bytes());
            }
            Operation::Put { address, length } => {
                buf.put_u8(PUT);
                buf.put_slice(address.as_bytes());
                buf.put_u8(*length);
            }
        }
    }

    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        if !buf.has_remaining() {
            return Err(Error::InvalidOperation("missing tag"));
        }
        match buf.get_u8() {
            RESERVE => {
                if !buf.has_remaining() {
                    return Err(Error::InvalidOperation("missing prefix length"));
                }
                let len = buf.get_u8() as usize;
                if len == 0 || len > SEQUENCE_LENGTH || buf.remaining() < 2 * len {
                    return Err(Error::InvalidOperation("invalid prefix"));
                }
                let words: Vec<_> = (0..len).map(|_| buf.get_u16()).collect();
                Ok(Operation::Reserve(Prefix::new(&words)?))
            }
            REMOVE => Ok(Operation::Remove(read_address(buf)?)),
            PUT => {
                let address = read_address(buf)?;
                if !buf.has_remaining() {
                    return Err(Error::InvalidOperation("missing shorthash length"));
                }
                Ok(Operation::Put {
                    address,
                    length: buf.get_u8(),
                })
            }
            _ => Err(Error::InvalidOperation("unknown tag")),
        }
    }
}

fn read_address(buf: &mut impl Buf) -> Result<Address, Error> {
    if buf.remaining() < ADDRESS_LENGTH {
        return Err(Error::InvalidOperation("missing address"));
    }
    let mut bytes = [0u8; ADDRESS_LENGTH];
    buf.copy_to_slice(&mut bytes);
    Ok(Address::new(bytes))
}

/// Encode a transaction.
pub fn encode(operations: &[Operation]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_u8(VERSION);
    buf.put_u32(operations.len() as u32);
    for operation in operations {
        operation.write(&mut buf);
    }
    buf
}

/// Decode a transaction, rejecting trailing bytes.
pub fn decode(mut buf: impl Buf) -> Result<Vec<Operation>, Error> {
    if buf.remaining() < 5 {
        return Err(Error::InvalidOperation("missing header"));
    }
    let version = buf.get_u8();
    if version != VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let count = buf.get_u32() as usize;
    let mut operations = Vec::with_capacity(count.min(buf.remaining()));
    for _ in 0..count {
        operations.push(Operation::read(&mut buf)?);
    }
    if buf.has_remaining() {
        return Err(Error::InvalidOperation("trailing bytes"));
    }
    Ok(operations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn address(byte: u8) -> Address {
        Address::new([byte; ADDRESS_LENGTH])
    }

    #[test]
    fn test_transaction() {
        let operations = vec![
            Operation::Reserve("damp".parse().unwrap()),
            Operation::Reserve("damp supreme journey".parse().unwrap()),
            Operation::Remove(address(1)),
            Operation::Put {
                address: address(1),
                length: 4,
            },
            Operation::Put {
                address: address(2),
                length: 4,
            },
        ];
        let encoded = encode(&operations);
        assert_eq!(encoded[0], VERSION);
        assert_eq!(decode(&encoded[..]).unwrap(), operations);
        assert_eq!(decode(&encode(&[])[..]).unwrap(), Vec::new());
    }

    #[test_case(&[], "missing header"; "empty")]
    #[test_case(&[0, 0, 0, 0, 1], "missing tag"; "missing operation")]
    #[test_case(&[0, 0, 0, 0, 1, 9], "unknown tag"; "unknown tag")]
    #[test_case(&[0, 0, 0, 0, 1, 0, 0], "invalid prefix"; "empty prefix")]
    #[test_case(&[0, 0, 0, 0, 1, 0, 17], "invalid prefix"; "long prefix")]
    #[test_case(&[0, 0, 0, 0, 1, 1, 0xaa], "missing address"; "short address")]
    #[test_case(&[0, 0, 0, 0, 1, 2, 0xaa], "missing address"; "short put")]
    #[test_case(&[0, 0, 0, 0, 0, 0], "trailing bytes"; "trailing")]
    fn test_decode_invalid(data: &[u8], reason: &'static str) {
        match decode(data) {
            Err(Error::InvalidOperation(found)) => assert_eq!(found, reason),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_version() {
        let mut encoded = encode(&[Operation::Remove(address(1))]);
        encoded[0] = 7;
        assert!(matches!(
            decode(&encoded[..]),
            Err(Error::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_decode_invalid_word() {
        // Word index 2048 is outside the dictionary
        let data = [0, 0, 0, 0, 1, 0, 1, 0x08, 0x00];
        assert!(matches!(decode(&data[..]), Err(Error::Words(_))));
    }
}
