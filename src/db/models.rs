//! Database row types for the four event tables in `migrations/`.
//! Used by sqlx for typed queries; converted into the domain records in `types.rs`.
use chrono::{DateTime, Utc};

use crate::ancillary::AncillaryRecord;
use crate::types::{ConditionRecord, QuestionRecord, TokenPairRecord, TradeRecord};

#[derive(Debug, sqlx::FromRow)]
pub struct QuestionRow {
    pub question_id: String,
    pub creator: String,
    pub ancillary_data: String,
    /// JSON-serialized `AncillaryRecord`.
    pub ancillary_decoded: String,
    pub reward_token: Option<String>,
    pub reward: Option<String>,
    pub proposal_bond: Option<String>,
    pub request_timestamp: Option<String>,
    pub block_time: DateTime<Utc>,
    pub block_number: i64,
    pub tx_hash: String,
}

impl From<QuestionRow> for QuestionRecord {
    fn from(r: QuestionRow) -> Self {
        // A row written by an older build may hold JSON we no longer
        // understand; fall back to an empty record rather than failing reads.
        let ancillary: AncillaryRecord = serde_json::from_str(&r.ancillary_decoded).unwrap_or_default();
        QuestionRecord {
            question_id: r.question_id,
            creator: r.creator,
            ancillary_data: r.ancillary_data,
            ancillary,
            reward_token: r.reward_token,
            reward: r.reward,
            proposal_bond: r.proposal_bond,
            request_timestamp: r.request_timestamp,
            block_time: r.block_time,
            block_number: r.block_number,
            tx_hash: r.tx_hash,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ConditionRow {
    pub condition_id: String,
    pub question_id: String,
    pub oracle: String,
    pub outcome_slot_count: Option<i64>,
    pub block_time: DateTime<Utc>,
    pub block_number: i64,
    pub tx_hash: String,
}

impl From<ConditionRow> for ConditionRecord {
    fn from(r: ConditionRow) -> Self {
        ConditionRecord {
            condition_id: r.condition_id,
            question_id: r.question_id,
            oracle: r.oracle,
            outcome_slot_count: r.outcome_slot_count,
            block_time: r.block_time,
            block_number: r.block_number,
            tx_hash: r.tx_hash,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct TokenPairRow {
    pub condition_id: String,
    pub token0: String,
    pub token1: String,
    pub block_time: DateTime<Utc>,
    pub block_number: i64,
    pub tx_hash: String,
}

impl From<TokenPairRow> for TokenPairRecord {
    fn from(r: TokenPairRow) -> Self {
        TokenPairRecord {
            condition_id: r.condition_id,
            token0: r.token0,
            token1: r.token1,
            block_time: r.block_time,
            block_number: r.block_number,
            tx_hash: r.tx_hash,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct TradeRow {
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

impl From<TradeRow> for TradeRecord {
    fn from(r: TradeRow) -> Self {
        TradeRecord {
            order_hash: r.order_hash,
            maker: r.maker,
            taker: r.taker,
            maker_asset_id: r.maker_asset_id,
            taker_asset_id: r.taker_asset_id,
            maker_amount: r.maker_amount,
            taker_amount: r.taker_amount,
            fee: r.fee,
            block_time: r.block_time,
            block_number: r.block_number,
            tx_hash: r.tx_hash,
        }
    }
}

/// One question joined down its relationship chain. Condition and token
/// columns are NULL when that stage has not been ingested yet.
#[derive(Debug, sqlx::FromRow)]
pub struct MarketChainRow {
    #[sqlx(flatten)]
    pub question: QuestionRow,
    pub c_condition_id: Option<String>,
    pub c_oracle: Option<String>,
    pub c_outcome_slot_count: Option<i64>,
    pub c_block_time: Option<DateTime<Utc>>,
    pub c_block_number: Option<i64>,
    pub c_tx_hash: Option<String>,
    pub t_token0: Option<String>,
    pub t_token1: Option<String>,
    pub t_block_time: Option<DateTime<Utc>>,
    pub t_block_number: Option<i64>,
    pub t_tx_hash: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct StoreCountsRow {
    pub questions: i64,
    pub conditions: i64,
    pub token_pairs: i64,
    pub trades: i64,
}
