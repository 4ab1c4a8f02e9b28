//! Upstream event source: the raw event model and the trait ingestion jobs
//! consume. `bitquery` holds the HTTP implementation.

pub mod bitquery;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::EventKind;

pub use bitquery::BitqueryClient;

// ---------------------------------------------------------------------------
// Raw event model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub time: DateTime<Utc>,
    pub number: i64,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxMeta {
    pub hash: String,
    pub from: String,
    pub to: String,
}

/// A decoded ABI argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgValue {
    Address(String),
    String(String),
    Integer(i64),
    /// Decimal string; uint256 values do not fit any native integer.
    BigInteger(String),
    /// `0x`-prefixed hex.
    Bytes(String),
    Bool(bool),
}

impl ArgValue {
    /// Text form used for storage and comparison.
    pub fn as_text(&self) -> String {
        match self {
            ArgValue::Address(s) | ArgValue::String(s) | ArgValue::BigInteger(s) | ArgValue::Bytes(s) => {
                s.clone()
            }
            ArgValue::Integer(i) => i.to_string(),
            ArgValue::Bool(b) => b.to_string(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Integer(i) => Some(*i),
            ArgValue::BigInteger(s) | ArgValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedArgument {
    pub name: String,
    pub value: ArgValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub block: BlockMeta,
    pub transaction: TxMeta,
    pub arguments: Vec<NamedArgument>,
}

impl RawEvent {
    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.arguments.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    /// Argument as text; empty strings count as missing.
    pub fn arg_text(&self, name: &str) -> Option<String> {
        self.arg(name).map(ArgValue::as_text).filter(|s| !s.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Window/limit part shared by every event request.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub kind: EventKind,
    /// Emitting contract address.
    pub contract: String,
    /// Only events with block time at or after this instant.
    pub since: DateTime<Utc>,
    pub limit: usize,
}

/// Restricts an event request to events where any of `names` carries any of `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentFilter {
    pub names: Vec<String>,
    pub values: Vec<String>,
}

impl ArgumentFilter {
    pub fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            names: vec![name.to_string()],
            values: vec![value.into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    pub name: String,
    pub contract: String,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub currency: Currency,
    pub holder_address: String,
    /// Token id the balance is held in.
    pub id: String,
    pub balance: String,
}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

/// Supplier of raw on-chain events and token balances.
///
/// Transport, authentication and endpoint selection are entirely the
/// implementor's concern. Any error returned here is a job failure.
pub trait EventSource: Send + Sync + 'static {
    fn fetch_events(&self, query: &EventQuery) -> impl Future<Output = Result<Vec<RawEvent>>> + Send;

    fn fetch_events_by_argument(
        &self,
        query: &EventQuery,
        filter: &ArgumentFilter,
    ) -> impl Future<Output = Result<Vec<RawEvent>>> + Send;

    fn fetch_balances_by_ids(&self, ids: &[String]) -> impl Future<Output = Result<Vec<BalanceRecord>>> + Send;
}

#[cfg(test)]
pub mod testing {
    //! In-process source for store/ingest/API tests.

    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;
    use crate::error::AppError;

    #[derive(Default)]
    pub struct MockSource {
        events: Mutex<Vec<(EventKind, RawEvent)>>,
        balances: Mutex<Vec<BalanceRecord>>,
        /// Errors returned (front first) before events are served.
        failures: Mutex<Vec<AppError>>,
        /// Every (kind, filter) requested, in order.
        pub requests: Mutex<Vec<(EventKind, Option<ArgumentFilter>)>>,
        pub balance_requests: Mutex<Vec<Vec<String>>>,
    }

    impl MockSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, kind: EventKind, event: RawEvent) {
            self.events.lock().unwrap().push((kind, event));
        }

        pub fn push_balance(&self, balance: BalanceRecord) {
            self.balances.lock().unwrap().push(balance);
        }

        pub fn fail_next(&self, err: AppError) {
            self.failures.lock().unwrap().push(err);
        }

        fn take_failure(&self) -> Option<AppError> {
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                None
            } else {
                Some(failures.remove(0))
            }
        }

        fn matching(&self, query: &EventQuery, filter: Option<&ArgumentFilter>) -> Vec<RawEvent> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(kind, ev)| *kind == query.kind && ev.block.time >= query.since)
                .filter(|(_, ev)| match filter {
                    None => true,
                    Some(f) => f.names.iter().any(|n| {
                        ev.arg_text(n)
                            .is_some_and(|v| f.values.iter().any(|want| want.eq_ignore_ascii_case(&v)))
                    }),
                })
                .map(|(_, ev)| ev.clone())
                .take(query.limit)
                .collect()
        }
    }

    impl EventSource for MockSource {
        async fn fetch_events(&self, query: &EventQuery) -> Result<Vec<RawEvent>> {
            self.requests.lock().unwrap().push((query.kind, None));
            if let Some(err) = self.take_failure() {
                return Err(err);
            }
            Ok(self.matching(query, None))
        }

        async fn fetch_events_by_argument(
            &self,
            query: &EventQuery,
            filter: &ArgumentFilter,
        ) -> Result<Vec<RawEvent>> {
            self.requests.lock().unwrap().push((query.kind, Some(filter.clone())));
            if let Some(err) = self.take_failure() {
                return Err(err);
            }
            Ok(self.matching(query, Some(filter)))
        }

        async fn fetch_balances_by_ids(&self, ids: &[String]) -> Result<Vec<BalanceRecord>> {
            self.balance_requests.lock().unwrap().push(ids.to_vec());
            if let Some(err) = self.take_failure() {
                return Err(err);
            }
            Ok(self
                .balances
                .lock()
                .unwrap()
                .iter()
                .filter(|b| ids.contains(&b.id))
                .cloned()
                .collect())
        }
    }

    /// Builds a raw event at `minutes_ago` before now with the given arguments.
    pub fn raw_event(minutes_ago: i64, block_number: i64, args: &[(&str, ArgValue)]) -> RawEvent {
        let time = Utc::now() - chrono::Duration::minutes(minutes_ago);
        RawEvent {
            block: BlockMeta {
                time,
                number: block_number,
                hash: format!("0xblock{block_number}"),
            },
            transaction: TxMeta {
                hash: format!("0xtx{block_number}"),
                from: "0xfrom".to_string(),
                to: "0xto".to_string(),
            },
            arguments: args
                .iter()
                .map(|(name, value)| NamedArgument {
                    name: name.to_string(),
                    value: value.clone(),
                })
                .collect(),
        }
    }

    /// Fixed timestamp helper for records built directly in tests.
    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    pub fn big(v: &str) -> ArgValue {
        ArgValue::BigInteger(v.to_string())
    }

    pub fn bytes(v: &str) -> ArgValue {
        ArgValue::Bytes(v.to_string())
    }

    pub fn addr(v: &str) -> ArgValue {
        ArgValue::Address(v.to_string())
    }
}
