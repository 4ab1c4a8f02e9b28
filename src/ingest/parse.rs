//! Raw event → stored record. An `Err(Skip)` names why the event cannot be
//! stored (missing key argument, unusable amounts); the caller counts it.

use crate::ancillary::{self, AncillaryRecord};
use crate::market::matcher::{is_quote_currency, normalize_id};
use crate::source::RawEvent;
use crate::types::{ConditionRecord, QuestionRecord, TokenPairRecord, TradeRecord};

/// Reason an event was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Skip(pub &'static str);

impl std::fmt::Display for Skip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

fn required(ev: &RawEvent, name: &'static str) -> Result<String, Skip> {
    ev.arg_text(name).ok_or(Skip(name))
}

fn is_amount(raw: &str) -> bool {
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit())
}

pub fn question(ev: &RawEvent) -> Result<QuestionRecord, Skip> {
    let question_id = normalize_id(&required(ev, "questionID")?);
    let ancillary_data = ev.arg_text("ancillaryData").unwrap_or_default();
    let ancillary = if ancillary_data.is_empty() {
        AncillaryRecord::default()
    } else {
        ancillary::decode(&ancillary_data)
    };

    Ok(QuestionRecord {
        question_id,
        creator: ev.arg_text("creator").unwrap_or_default(),
        ancillary_data,
        ancillary,
        reward_token: ev.arg_text("rewardToken"),
        reward: ev.arg_text("reward"),
        proposal_bond: ev.arg_text("proposalBond"),
        request_timestamp: ev.arg_text("requestTimestamp"),
        block_time: ev.block.time,
        block_number: ev.block.number,
        tx_hash: ev.transaction.hash.clone(),
    })
}

pub fn condition(ev: &RawEvent) -> Result<ConditionRecord, Skip> {
    Ok(ConditionRecord {
        condition_id: normalize_id(&required(ev, "conditionId")?),
        question_id: normalize_id(&required(ev, "questionId")?),
        oracle: ev.arg_text("oracle").unwrap_or_default(),
        outcome_slot_count: ev.arg("outcomeSlotCount").and_then(|v| v.as_i64()),
        block_time: ev.block.time,
        block_number: ev.block.number,
        tx_hash: ev.transaction.hash.clone(),
    })
}

pub fn token_pair(ev: &RawEvent) -> Result<TokenPairRecord, Skip> {
    Ok(TokenPairRecord {
        condition_id: normalize_id(&required(ev, "conditionId")?),
        token0: normalize_id(&required(ev, "token0")?),
        token1: normalize_id(&required(ev, "token1")?),
        block_time: ev.block.time,
        block_number: ev.block.number,
        tx_hash: ev.transaction.hash.clone(),
    })
}

pub fn trade(ev: &RawEvent) -> Result<TradeRecord, Skip> {
    let order_hash = normalize_id(&required(ev, "orderHash")?);
    let maker_asset_id = normalize_id(&required(ev, "makerAssetId")?);
    let taker_asset_id = normalize_id(&required(ev, "takerAssetId")?);
    let maker_amount = required(ev, "makerAmountFilled")?.trim().to_string();
    let taker_amount = required(ev, "takerAmountFilled")?.trim().to_string();

    if !is_amount(&maker_amount) || !is_amount(&taker_amount) {
        return Err(Skip("non-numeric fill amount"));
    }
    if maker_asset_id == taker_asset_id {
        return Err(Skip("same asset on both sides"));
    }
    if is_quote_currency(&maker_asset_id) && is_quote_currency(&taker_asset_id) {
        return Err(Skip("quote currency on both sides"));
    }

    Ok(TradeRecord {
        order_hash,
        maker: ev.arg_text("maker").unwrap_or_default(),
        taker: ev.arg_text("taker").unwrap_or_default(),
        maker_asset_id,
        taker_asset_id,
        maker_amount,
        taker_amount,
        fee: ev.arg_text("fee").unwrap_or_else(|| "0".to_string()),
        block_time: ev.block.time,
        block_number: ev.block.number,
        tx_hash: ev.transaction.hash.clone(),
    })
}
