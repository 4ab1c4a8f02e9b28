use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ancillary::AncillaryRecord;

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// The four on-chain events this indexer ingests, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    QuestionInitialized,
    ConditionPreparation,
    TokenRegistered,
    OrderFilled,
}

impl EventKind {
    /// Dependency order: later kinds reference rows written by earlier ones.
    pub const ALL: [EventKind; 4] = [
        EventKind::QuestionInitialized,
        EventKind::ConditionPreparation,
        EventKind::TokenRegistered,
        EventKind::OrderFilled,
    ];

    /// Solidity event name as emitted on chain.
    pub fn event_name(&self) -> &'static str {
        match self {
            EventKind::QuestionInitialized => "QuestionInitialized",
            EventKind::ConditionPreparation => "ConditionPreparation",
            EventKind::TokenRegistered => "TokenRegistered",
            EventKind::OrderFilled => "OrderFilled",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::QuestionInitialized => "question",
            EventKind::ConditionPreparation => "condition",
            EventKind::TokenRegistered => "token",
            EventKind::OrderFilled => "trade",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

/// Root of the relationship chain. Keyed by `question_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub question_id: String,
    pub creator: String,
    /// Raw ancillary bytes, hex encoded, as emitted.
    pub ancillary_data: String,
    pub ancillary: AncillaryRecord,
    pub reward_token: Option<String>,
    pub reward: Option<String>,
    pub proposal_bond: Option<String>,
    pub request_timestamp: Option<String>,
    pub block_time: DateTime<Utc>,
    pub block_number: i64,
    pub tx_hash: String,
}

/// Keyed by `condition_id`; `question_id` is also unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRecord {
    pub condition_id: String,
    pub question_id: String,
    pub oracle: String,
    pub outcome_slot_count: Option<i64>,
    pub block_time: DateTime<Utc>,
    pub block_number: i64,
    pub tx_hash: String,
}

/// The two outcome token ids registered for a condition, as decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPairRecord {
    pub condition_id: String,
    pub token0: String,
    pub token1: String,
    pub block_time: DateTime<Utc>,
    pub block_number: i64,
    pub tx_hash: String,
}

/// A single exchange fill. Amounts are raw fixed-point integers (6 decimals) kept as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub order_hash: String,
    pub maker: String,
    pub taker: String,
    pub maker_asset_id: String,
    pub taker_asset_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub fee: String,
    pub block_time: DateTime<Utc>,
    pub block_number: i64,
    pub tx_hash: String,
}

// ---------------------------------------------------------------------------
// Ingestion outcome
// ---------------------------------------------------------------------------

/// Per-run counters for one ingestion job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Raw events returned by the source.
    pub fetched: usize,
    /// Rows actually created.
    pub inserted: usize,
    /// Events whose natural key was already stored.
    pub duplicates: usize,
    /// Events dropped for missing or invalid arguments.
    pub skipped: usize,
}
