//! Accounts allocated in a geth-style genesis file.
//!
//! Only the `alloc` section is read:
//!
//! ```json
//! {
//!   "alloc": {
//!     "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed": { "balance": "0x1" },
//!     "b979f6f0b2a8d6d14f8e69ee5de64e27a7c3eb41": { "balance": "1000" }
//!   }
//! }
//! ```

use super::Error;
use serde::Deserialize;
use shorthash_words::Address;
use std::{collections::BTreeMap, collections::BTreeSet, path::Path};
use tracing::debug;

#[derive(Deserialize)]
struct Allocation {
    #[serde(default)]
    balance: Option<String>,
}

#[derive(Deserialize)]
struct Genesis {
    #[serde(default)]
    alloc: BTreeMap<String, Allocation>,
}

/// Whether a hex (`0x`-prefixed) or decimal balance is nonzero.
fn nonzero(balance: &str) -> Result<bool, Error> {
    let balance = balance.trim();
    let (digits, radix) = match balance
        .strip_prefix("0x")
        .or_else(|| balance.strip_prefix("0X"))
    {
        Some(digits) => (digits, 16),
        None => (balance, 10),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(Error::InvalidGenesis(format!("invalid balance: {}", balance)));
    }
    Ok(digits.chars().any(|c| c != '0'))
}

/// Parse the addresses holding a nonzero balance, in ascending order.
pub fn parse(content: &str) -> Result<Vec<Address>, Error> {
    let genesis: Genesis = serde_json::from_str(content)?;
    let mut addresses = BTreeSet::new();
    for (address, allocation) in genesis.alloc {
        let Some(balance) = allocation.balance else {
            continue;
        };
        if !nonzero(&balance)? {
            continue;
        }
        let parsed: Address = address
            .parse()
            .map_err(|err| Error::InvalidGenesis(format!("{}: {}", address, err)))?;
        addresses.insert(parsed);
    }
    debug!(accounts = addresses.len(), "parsed genesis");
    Ok(addresses.into_iter().collect())
}

/// Read the genesis file at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<Address>, Error> {
    parse(&std::fs::read_to_string(path)?)
}
