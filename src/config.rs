use std::time::Duration;

use crate::error::{AppError, Result};
use crate::types::EventKind;

pub const BITQUERY_URL: &str = "https://streaming.bitquery.io/graphql";
pub const BITQUERY_NETWORK: &str = "matic";

/// UMA CTF adapter: emits `QuestionInitialized`.
pub const UMA_ADAPTER_ADDRESS: &str = "0x6A9D222616C90FcA5754cd1333cFD9b7fb6a4F74";
/// Gnosis ConditionalTokens: emits `ConditionPreparation`, holds outcome token balances.
pub const CONDITIONAL_TOKENS_ADDRESS: &str = "0x4D97DCd97eC945f40cF65F87097ACe5EA0476045";
/// CTF exchange: emits `TokenRegistered` and `OrderFilled`.
pub const CTF_EXCHANGE_ADDRESS: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

/// Identifiers the exchange uses for the settlement (quote) currency side of a fill.
pub const QUOTE_CURRENCY_IDS: &[&str] = &[
    "0",
    "0x0",
    "0x0000000000000000000000000000000000000000",
];

/// Fixed-point scale of both outcome tokens and the quote currency (6 decimals).
pub const AMOUNT_SCALE: f64 = 1_000_000.0;

/// Default RetryScheduler ceiling.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default first retry delay; doubles on every subsequent retry.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;

/// Default polling cadence for every event kind (seconds).
pub const DEFAULT_POLL_SECS: u64 = 3_600;

/// WAL checkpoint cadence (seconds).
pub const CHECKPOINT_INTERVAL_SECS: u64 = 30;

/// HTTP timeout for event source requests.
pub const SOURCE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub bitquery_url: String,
    /// Bearer credential (BITQUERY_API_KEY). Absence is reported when a request is built.
    pub bitquery_api_key: Option<String>,
    pub network: String,
    pub uma_adapter_address: String,
    pub conditional_tokens_address: String,
    pub exchange_address: String,
    /// Events per request for question/condition/token jobs (BATCH_LIMIT)
    pub batch_limit: usize,
    /// Events per request for the trade job (TRADE_BATCH_LIMIT)
    pub trade_batch_limit: usize,
    /// Trailing window for periodic jobs (SYNC_WINDOW_HOURS)
    pub sync_window_hours: i64,
    /// Trailing window for on-demand jobs (ON_DEMAND_WINDOW_HOURS)
    pub on_demand_window_hours: i64,
    pub job_max_retries: u32,
    pub job_initial_backoff_ms: u64,
    pub question_poll_secs: u64,
    pub condition_poll_secs: u64,
    pub token_poll_secs: u64,
    pub trade_poll_secs: u64,
    pub checkpoint_interval_secs: u64,
    /// Unit suffix for formatted prices (QUOTE_SYMBOL)
    pub quote_symbol: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "events.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            bitquery_url: std::env::var("BITQUERY_URL")
                .unwrap_or_else(|_| BITQUERY_URL.to_string()),
            bitquery_api_key: std::env::var("BITQUERY_API_KEY")
                .ok()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            network: std::env::var("BITQUERY_NETWORK")
                .unwrap_or_else(|_| BITQUERY_NETWORK.to_string()),
            uma_adapter_address: std::env::var("UMA_ADAPTER_ADDRESS")
                .unwrap_or_else(|_| UMA_ADAPTER_ADDRESS.to_string()),
            conditional_tokens_address: std::env::var("CONDITIONAL_TOKENS_ADDRESS")
                .unwrap_or_else(|_| CONDITIONAL_TOKENS_ADDRESS.to_string()),
            exchange_address: std::env::var("CTF_EXCHANGE_ADDRESS")
                .unwrap_or_else(|_| CTF_EXCHANGE_ADDRESS.to_string()),
            batch_limit: env_or("BATCH_LIMIT", 10_000),
            trade_batch_limit: env_or("TRADE_BATCH_LIMIT", 20_000),
            sync_window_hours: env_or("SYNC_WINDOW_HOURS", 72),
            on_demand_window_hours: env_or("ON_DEMAND_WINDOW_HOURS", 144),
            job_max_retries: env_or("JOB_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            job_initial_backoff_ms: env_or("JOB_INITIAL_BACKOFF_MS", DEFAULT_INITIAL_BACKOFF_MS),
            question_poll_secs: env_or("QUESTION_POLL_SECS", DEFAULT_POLL_SECS),
            condition_poll_secs: env_or("CONDITION_POLL_SECS", DEFAULT_POLL_SECS),
            token_poll_secs: env_or("TOKEN_POLL_SECS", DEFAULT_POLL_SECS),
            trade_poll_secs: env_or("TRADE_POLL_SECS", DEFAULT_POLL_SECS),
            checkpoint_interval_secs: env_or("CHECKPOINT_INTERVAL_SECS", CHECKPOINT_INTERVAL_SECS),
            quote_symbol: std::env::var("QUOTE_SYMBOL").unwrap_or_else(|_| "USDC".to_string()),
        })
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.job_initial_backoff_ms)
    }

    /// Periodic re-sync cadence for one event kind.
    pub fn poll_interval(&self, kind: EventKind) -> Duration {
        let secs = match kind {
            EventKind::QuestionInitialized => self.question_poll_secs,
            EventKind::ConditionPreparation => self.condition_poll_secs,
            EventKind::TokenRegistered => self.token_poll_secs,
            EventKind::OrderFilled => self.trade_poll_secs,
        };
        Duration::from_secs(secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "events.db".to_string(),
            api_port: 3000,
            bitquery_url: BITQUERY_URL.to_string(),
            bitquery_api_key: None,
            network: BITQUERY_NETWORK.to_string(),
            uma_adapter_address: UMA_ADAPTER_ADDRESS.to_string(),
            conditional_tokens_address: CONDITIONAL_TOKENS_ADDRESS.to_string(),
            exchange_address: CTF_EXCHANGE_ADDRESS.to_string(),
            batch_limit: 10_000,
            trade_batch_limit: 20_000,
            sync_window_hours: 72,
            on_demand_window_hours: 144,
            job_max_retries: DEFAULT_MAX_RETRIES,
            job_initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            question_poll_secs: DEFAULT_POLL_SECS,
            condition_poll_secs: DEFAULT_POLL_SECS,
            token_poll_secs: DEFAULT_POLL_SECS,
            trade_poll_secs: DEFAULT_POLL_SECS,
            checkpoint_interval_secs: CHECKPOINT_INTERVAL_SECS,
            quote_symbol: "USDC".to_string(),
        }
    }
}

/// Parse an env var, falling back to `default` when unset or unparseable.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
