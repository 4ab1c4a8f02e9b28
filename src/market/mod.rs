//! Market assembly: joins the relationship chain, then matches and prices trades.

pub mod matcher;
pub mod pricing;

use serde::Serialize;

use crate::ancillary::AncillaryRecord;
use crate::db::{EventStore, MarketChain};
use crate::error::{AppError, Result};
use crate::source::{BalanceRecord, EventSource};
use crate::types::{TokenPairRecord, TradeRecord};

use matcher::{is_quote_currency, normalize_id, MarketTokens};
use pricing::{market_prices, MarketPrices};

#[derive(Debug, Clone, Serialize)]
pub struct MarketSummary {
    pub question_id: String,
    pub ancillary: AncillaryRecord,
    pub condition_id: Option<String>,
    pub token_pair: Option<TokenPairRecord>,
    pub trade_count: usize,
    pub prices: MarketPrices,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketDetail {
    #[serde(flatten)]
    pub summary: MarketSummary,
    pub trades: Vec<TradeRecord>,
}

/// Assemble one market from its chain and the candidate trades for its tokens.
fn assemble(chain: MarketChain, candidates: &[TradeRecord], quote_symbol: &str) -> MarketDetail {
    let condition_id = chain.condition.as_ref().map(|c| c.condition_id.clone());

    let (trades, prices) = match &chain.token_pair {
        Some(pair) => {
            let tokens = MarketTokens::from(pair);
            let matched = matcher::filter_trades(&tokens, candidates);
            let prices = market_prices(&chain.question.ancillary, &tokens, &matched, quote_symbol);
            (matched.into_iter().cloned().collect(), prices)
        }
        None => (Vec::new(), MarketPrices::default()),
    };

    MarketDetail {
        summary: MarketSummary {
            question_id: chain.question.question_id,
            ancillary: chain.question.ancillary,
            condition_id,
            token_pair: chain.token_pair,
            trade_count: trades.len(),
            prices,
        },
        trades,
    }
}

async fn candidate_trades(store: &EventStore, chain: &MarketChain) -> Result<Vec<TradeRecord>> {
    match &chain.token_pair {
        Some(pair) => store.trades_for_tokens(&[pair.token0.clone(), pair.token1.clone()]).await,
        None => Ok(Vec::new()),
    }
}

/// Every known market, newest question first.
pub async fn list_markets(store: &EventStore, quote_symbol: &str) -> Result<Vec<MarketSummary>> {
    let chains = store.market_chains().await?;
    let mut out = Vec::with_capacity(chains.len());
    for chain in chains {
        let candidates = candidate_trades(store, &chain).await?;
        out.push(assemble(chain, &candidates, quote_symbol).summary);
    }
    Ok(out)
}

pub async fn get_market(store: &EventStore, question_id: &str, quote_symbol: &str) -> Result<MarketDetail> {
    let chain = store
        .market_chain(&normalize_id(question_id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("market {question_id}")))?;
    let candidates = candidate_trades(store, &chain).await?;
    Ok(assemble(chain, &candidates, quote_symbol))
}

/// Current balances of a market's outcome tokens. Quote-currency ids are
/// never sent to the source.
pub async fn holders<S: EventSource>(
    store: &EventStore,
    source: &S,
    question_id: &str,
) -> Result<Vec<BalanceRecord>> {
    let chain = store
        .market_chain(&normalize_id(question_id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("market {question_id}")))?;
    let Some(pair) = chain.token_pair else {
        return Ok(Vec::new());
    };
    let ids: Vec<String> = [pair.token0, pair.token1]
        .into_iter()
        .filter(|id| !is_quote_currency(id))
        .collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    source.fetch_balances_by_ids(&ids).await
}
