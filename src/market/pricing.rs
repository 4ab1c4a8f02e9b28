//! Latest-trade pricing for binary outcome tokens.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ancillary::AncillaryRecord;
use crate::config::AMOUNT_SCALE;
use crate::market::matcher::{is_quote_currency, normalize_id, MarketTokens};
use crate::types::TradeRecord;

/// Which registered token is which outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeMapping {
    /// token0 is NO, token1 is YES.
    Token1Yes,
    /// token0 is YES, token1 is NO.
    Token0Yes,
}

impl OutcomeMapping {
    /// Infer the mapping from the `p1`/`p2` outcome labels. `None` when the
    /// labels give no reliable answer.
    pub fn from_labels(p1: Option<&str>, p2: Option<&str>) -> Option<Self> {
        let p1 = p1.map(label);
        let p2 = p2.map(label);
        match (p1, p2) {
            (Some(Label::No), Some(Label::Yes)) => Some(OutcomeMapping::Token1Yes),
            (Some(Label::Yes), Some(Label::Yes)) => None,
            (Some(Label::Yes), _) => Some(OutcomeMapping::Token0Yes),
            (_, Some(Label::Yes)) => Some(OutcomeMapping::Token1Yes),
            _ => None,
        }
    }

    pub fn from_ancillary(record: &AncillaryRecord) -> Option<Self> {
        Self::from_labels(record.p1.as_deref(), record.p2.as_deref())
    }

    /// `(yes_token, no_token)`.
    pub fn split<'a>(&self, tokens: &'a MarketTokens) -> (&'a str, &'a str) {
        match self {
            OutcomeMapping::Token1Yes => (&tokens.token1, &tokens.token0),
            OutcomeMapping::Token0Yes => (&tokens.token0, &tokens.token1),
        }
    }
}

enum Label {
    Yes,
    No,
    Other,
}

fn label(raw: &str) -> Label {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "1" => Label::Yes,
        "no" | "0" => Label::No,
        _ => Label::Other,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenPrice {
    pub token_id: String,
    pub price: f64,
    /// e.g. `"0.5500 USDC"`
    pub formatted: String,
    /// e.g. `"55.0%"`
    pub cents: String,
    pub block_time: DateTime<Utc>,
    pub order_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketPrices {
    pub yes: Option<TokenPrice>,
    pub no: Option<TokenPrice>,
}

/// Fixed-point amount to a positive float; `None` for zero or non-numeric input.
fn scaled_amount(raw: &str) -> Option<f64> {
    let v: f64 = raw.trim().parse().ok()?;
    if !v.is_finite() || v <= 0.0 {
        return None;
    }
    Some(v / AMOUNT_SCALE)
}

/// Quote and token amounts of a trade that swaps `token_id` against the quote
/// currency. `None` for token-vs-token fills and unrelated trades.
fn quote_leg<'a>(trade: &'a TradeRecord, token_id: &str) -> Option<(&'a str, &'a str)> {
    let maker = normalize_id(&trade.maker_asset_id);
    let taker = normalize_id(&trade.taker_asset_id);
    if maker == token_id && taker != token_id && is_quote_currency(&taker) {
        Some((&trade.taker_amount, &trade.maker_amount))
    } else if taker == token_id && maker != token_id && is_quote_currency(&maker) {
        Some((&trade.maker_amount, &trade.taker_amount))
    } else {
        None
    }
}

/// Price of `token_id` from the most recent valid trade against the quote currency.
pub fn latest_price(token_id: &str, trades: &[&TradeRecord], quote_symbol: &str) -> Option<TokenPrice> {
    let token_id = normalize_id(token_id);
    let mut candidates: Vec<&TradeRecord> = trades
        .iter()
        .copied()
        .filter(|t| quote_leg(t, &token_id).is_some())
        .collect();
    candidates.sort_by(|a, b| {
        b.block_time
            .cmp(&a.block_time)
            .then(b.block_number.cmp(&a.block_number))
    });

    candidates.into_iter().find_map(|trade| {
        let (quote_raw, token_raw) = quote_leg(trade, &token_id)?;
        let quote = scaled_amount(quote_raw)?;
        let token = scaled_amount(token_raw)?;
        let price = quote / token;
        Some(TokenPrice {
            token_id: token_id.clone(),
            price,
            formatted: format!("{price:.4} {quote_symbol}"),
            cents: format!("{:.1}%", price * 100.0),
            block_time: trade.block_time,
            order_hash: trade.order_hash.clone(),
        })
    })
}

/// YES/NO prices for a market, or both null when the outcome labels are ambiguous.
pub fn market_prices(
    ancillary: &AncillaryRecord,
    tokens: &MarketTokens,
    trades: &[&TradeRecord],
    quote_symbol: &str,
) -> MarketPrices {
    let Some(mapping) = OutcomeMapping::from_ancillary(ancillary) else {
        return MarketPrices::default();
    };
    let (yes, no) = mapping.split(tokens);
    MarketPrices {
        yes: latest_price(yes, trades, quote_symbol),
        no: latest_price(no, trades, quote_symbol),
    }
}
