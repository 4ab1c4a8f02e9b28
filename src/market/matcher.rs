//! Which trades belong to which market.
//!
//! A fill has two sides (maker asset, taker asset). A side matches a market
//! when it is one of the market's outcome tokens, or when it is a
//! quote-currency id and the market itself registered a quote-class token.
//! A trade matches if either side matches.

use crate::config::QUOTE_CURRENCY_IDS;
use crate::types::{TokenPairRecord, TradeRecord};

/// Trimmed, lowercased form used for every id comparison.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

pub fn is_quote_currency(id: &str) -> bool {
    let id = normalize_id(id);
    QUOTE_CURRENCY_IDS.iter().any(|q| *q == id)
}

/// Normalized outcome token ids of one market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketTokens {
    pub token0: String,
    pub token1: String,
}

impl MarketTokens {
    pub fn new(token0: &str, token1: &str) -> Self {
        Self {
            token0: normalize_id(token0),
            token1: normalize_id(token1),
        }
    }

    fn has_quote_token(&self) -> bool {
        is_quote_currency(&self.token0) || is_quote_currency(&self.token1)
    }

    pub fn side_matches(&self, asset_id: &str) -> bool {
        let id = normalize_id(asset_id);
        if id.is_empty() {
            return false;
        }
        id == self.token0 || id == self.token1 || (is_quote_currency(&id) && self.has_quote_token())
    }

    pub fn matches(&self, trade: &TradeRecord) -> bool {
        self.side_matches(&trade.maker_asset_id) || self.side_matches(&trade.taker_asset_id)
    }
}

impl From<&TokenPairRecord> for MarketTokens {
    fn from(pair: &TokenPairRecord) -> Self {
        Self::new(&pair.token0, &pair.token1)
    }
}

/// Trades from `trades` that belong to the market, preserving order.
pub fn filter_trades<'a>(tokens: &MarketTokens, trades: &'a [TradeRecord]) -> Vec<&'a TradeRecord> {
    trades.iter().filter(|t| tokens.matches(t)).collect()
}
