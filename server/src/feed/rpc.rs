//! Read blocks from an Ethereum JSON-RPC endpoint.

use super::{Block, Error, Transaction};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tracing::trace;

/// Maximum time to wait for a single request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct Response<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcTransaction {
    from: Option<String>,
    to: Option<String>,
}

#[derive(Deserialize)]
struct RpcBlock {
    number: String,
    #[serde(default)]
    transactions: Vec<RpcTransaction>,
}

/// Parse a hex-encoded quantity (`0x1b4`).
pub fn parse_quantity(value: &str) -> Result<u64, Error> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| Error::InvalidResponse(format!("quantity without prefix: {}", value)))?;
    u64::from_str_radix(digits, 16)
        .map_err(|_| Error::InvalidResponse(format!("invalid quantity: {}", value)))
}

/// A [super::Feed] backed by JSON-RPC over HTTP.
pub struct Client {
    http: reqwest::Client,
    url: String,
    id: AtomicU64,
}

impl Client {
    /// Create a client for the endpoint at `url`.
    pub fn new(url: impl Into<String>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
            id: AtomicU64::new(0),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>, Error> {
        let id = self.id.fetch_add(1, Ordering::Relaxed);
        trace!(id, method, "sending request");
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response: Response<T> = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(err) = response.error {
            return Err(Error::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result)
    }
}

impl super::Feed for Client {
    async fn latest_block(&self) -> Result<u64, Error> {
        let latest: String = self
            .call("eth_blockNumber", json!([]))
            .await?
            .ok_or_else(|| Error::InvalidResponse("missing block number".into()))?;
        parse_quantity(&latest)
    }

    async fn block(&self, number: u64) -> Result<Block, Error> {
        let block: RpcBlock = self
            .call(
                "eth_getBlockByNumber",
                json!([format!("{:#x}", number), true]),
            )
            .await?
            .ok_or(Error::MissingBlock(number))?;
        let found = parse_quantity(&block.number)?;
        if found != number {
            return Err(Error::InvalidResponse(format!(
                "requested block {} but received {}",
                number, found
            )));
        }
        Ok(Block {
            number,
            transactions: block
                .transactions
                .into_iter()
                .map(|tx| Transaction {
                    from: tx.from,
                    to: tx.to,
                })
                .collect(),
        })
    }
}
