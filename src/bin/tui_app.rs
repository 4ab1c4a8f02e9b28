use chrono::{DateTime, Utc};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// API response types (mirror routes.rs shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct AncillaryResponse {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenPairResponse {
    pub token0: String,
    pub token1: String,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct PriceResponse {
    pub token_id: String,
    pub formatted: String,
    pub cents: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PricesResponse {
    pub yes: Option<PriceResponse>,
    pub no: Option<PriceResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketResponse {
    pub question_id: String,
    pub ancillary: AncillaryResponse,
    pub condition_id: Option<String>,
    pub token_pair: Option<TokenPairResponse>,
    pub trade_count: usize,
    #[serde(default)]
    pub prices: PricesResponse,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct TradeResponse {
    pub order_hash: String,
    pub maker_asset_id: String,
    pub taker_asset_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub block_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDetailResponse {
    #[serde(flatten)]
    pub market: MarketResponse,
    pub trades: Vec<TradeResponse>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CountsResponse {
    pub questions: i64,
    pub conditions: i64,
    pub token_pairs: i64,
    pub trades: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SchedulerResponse {
    pub queued: usize,
    pub running: bool,
    pub completed: u64,
    pub retried: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct HealthResponse {
    pub status: String,
    pub counts: CountsResponse,
    pub scheduler: SchedulerResponse,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct LatencyResponse {
    pub count: u64,
    pub p50_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub markets: Vec<MarketResponse>,
    /// Detail of the market opened with Enter; refreshed with everything else.
    pub detail: Option<MarketDetailResponse>,
    pub health: HealthResponse,
    pub latency: LatencyResponse,
    /// One-line feedback for the last user action.
    pub notice: Option<String>,
    pub base_url: String,
}

impl AppState {
    pub fn new(base_url: String) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            markets: Vec::new(),
            detail: None,
            health: HealthResponse::default(),
            latency: LatencyResponse::default(),
            notice: None,
            base_url,
        }
    }

    pub async fn open_market(&mut self, client: &reqwest::Client, question_id: &str) {
        let url = format!("{}/markets/{}?trades=100", self.base_url, question_id);
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<MarketDetailResponse>().await {
                Ok(detail) => self.detail = Some(detail),
                Err(e) => self.notice = Some(format!("parse error: {e}")),
            },
            Ok(resp) => self.notice = Some(format!("market lookup failed: {}", resp.status())),
            Err(e) => self.notice = Some(format!("{e}")),
        }
    }

    pub fn close_market(&mut self) {
        self.detail = None;
    }

    /// Ask the indexer to run the on-demand chain for one market.
    pub async fn request_sync(&mut self, client: &reqwest::Client, question_id: &str) {
        let url = format!("{}/markets/{}/sync", self.base_url, question_id);
        self.notice = match client.post(&url).send().await {
            Ok(resp) if resp.status().is_success() => Some(format!("sync queued for {}", truncate(question_id, 18))),
            Ok(resp) => Some(format!("sync rejected: {}", resp.status())),
            Err(e) => Some(format!("{e}")),
        };
    }

    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let markets_url = format!("{}/markets", self.base_url);
        let health_url = format!("{}/health", self.base_url);
        let latency_url = format!("{}/stats/latency", self.base_url);

        let (markets_res, health_res, latency_res) = tokio::join!(
            client.get(&markets_url).send(),
            client.get(&health_url).send(),
            client.get(&latency_url).send(),
        );

        let markets = match markets_res {
            Ok(resp) => resp.json::<Vec<MarketResponse>>().await,
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("{e}"));
                return;
            }
        };

        match markets {
            Ok(m) => {
                self.markets = m;
                self.status = ConnectionStatus::Connected;
            }
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("parse error: {e}"));
                return;
            }
        }

        if let Ok(h) = health_res {
            if let Ok(health) = h.json::<HealthResponse>().await {
                self.health = health;
            }
        }
        if let Ok(l) = latency_res {
            if let Ok(latency) = l.json::<LatencyResponse>().await {
                self.latency = latency;
            }
        }

        if let Some(id) = self.detail.as_ref().map(|d| d.market.question_id.clone()) {
            self.open_market(client, &id).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

const QUOTE_IDS: [&str; 3] = ["0", "0x0", "0x0000000000000000000000000000000000000000"];

pub fn is_quote(id: &str) -> bool {
    QUOTE_IDS.contains(&id.trim().to_ascii_lowercase().as_str())
}

/// Raw 6-decimal fixed-point amount for display.
pub fn format_amount(raw: &str) -> String {
    match raw.trim().parse::<f64>() {
        Ok(v) => format!("{:.2}", v / 1_000_000.0),
        Err(_) => "—".to_string(),
    }
}

/// Which outcome a trade touched, given the market's YES/NO token ids.
pub fn trade_outcome(trade: &TradeResponse, prices: &PricesResponse) -> &'static str {
    let touches = |id: &str| trade.maker_asset_id == id || trade.taker_asset_id == id;
    match (&prices.yes, &prices.no) {
        (Some(y), _) if touches(&y.token_id) => "YES",
        (_, Some(n)) if touches(&n.token_id) => "NO",
        _ => "—",
    }
}

/// Quote paid per outcome token, or `None` for token-vs-token fills.
pub fn trade_price(trade: &TradeResponse) -> Option<f64> {
    let maker: f64 = trade.maker_amount.parse().ok()?;
    let taker: f64 = trade.taker_amount.parse().ok()?;
    let (quote, token) = if is_quote(&trade.maker_asset_id) {
        (maker, taker)
    } else if is_quote(&trade.taker_asset_id) {
        (taker, maker)
    } else {
        return None;
    };
    (token > 0.0).then(|| quote / token)
}

pub fn format_time(t: &DateTime<Utc>) -> String {
    t.format("%m-%d %H:%M").to_string()
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
