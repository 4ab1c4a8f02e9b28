use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::{Config, SOURCE_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::source::{
    ArgValue, ArgumentFilter, BalanceRecord, BlockMeta, Currency, EventQuery, EventSource,
    NamedArgument, RawEvent, TxMeta,
};

const EVENTS_QUERY: &str = r#"
query ($network: evm_network, $where: EVM_Event_Filter, $limit: Int) {
  EVM(dataset: combined, network: $network) {
    Events(limit: {count: $limit}, orderBy: {descending: Block_Time}, where: $where) {
      Block { Time Number Hash }
      Transaction { Hash From To }
      Arguments {
        Name
        Value {
          __typename
          ... on EVM_ABI_Integer_Value_Arg { integer }
          ... on EVM_ABI_String_Value_Arg { string }
          ... on EVM_ABI_Address_Value_Arg { address }
          ... on EVM_ABI_BigInt_Value_Arg { bigInteger }
          ... on EVM_ABI_Bytes_Value_Arg { hex }
          ... on EVM_ABI_Boolean_Value_Arg { bool }
        }
      }
    }
  }
}
"#;

const BALANCES_QUERY: &str = r#"
query ($network: evm_network, $contract: String!, $ids: [BigInt!]) {
  EVM(dataset: combined, network: $network) {
    BalanceUpdates(
      where: {Currency: {SmartContract: {is: $contract}}, BalanceUpdate: {Id: {in: $ids}}}
      orderBy: {descendingByField: "balance"}
    ) {
      Currency { Name SmartContract Symbol }
      BalanceUpdate { Address Id }
      balance: sum(of: BalanceUpdate_Amount, selectWhere: {gt: "0"})
    }
  }
}
"#;

/// GraphQL client for the Bitquery EVM streaming API.
pub struct BitqueryClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    network: String,
    /// Contract whose token balances `fetch_balances_by_ids` reports.
    balance_contract: String,
}

impl BitqueryClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(SOURCE_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            url: cfg.bitquery_url.clone(),
            api_key: cfg.bitquery_api_key.clone(),
            network: cfg.network.clone(),
            balance_contract: cfg.conditional_tokens_address.clone(),
        })
    }

    fn bearer(&self) -> Result<String> {
        match &self.api_key {
            Some(key) => Ok(format!("Bearer {key}")),
            None => Err(AppError::Auth("BITQUERY_API_KEY is not set".to_string())),
        }
    }

    async fn post<T: DeserializeOwned>(&self, query: &str, variables: serde_json::Value) -> Result<T> {
        let bearer = self.bearer()?;
        let body = serde_json::json!({ "query": query, "variables": variables });

        let resp = self
            .http
            .post(&self.url)
            .header(reqwest::header::AUTHORIZATION, bearer)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AppError::Auth(format!("event source rejected credential: HTTP {status}")));
        }
        let text = resp.text().await?;
        if !status.is_success() {
            let sample: String = text.chars().take(300).collect();
            return Err(AppError::Upstream(format!("HTTP {status}: {sample}")));
        }

        let parsed: GraphQlResponse<T> = serde_json::from_str(&text)?;
        if !parsed.errors.is_empty() {
            let messages: Vec<&str> = parsed.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(AppError::Upstream(messages.join("; ")));
        }
        parsed
            .data
            .ok_or_else(|| AppError::Upstream("response carried no data".to_string()))
    }

    async fn run_events_query(&self, query: &EventQuery, filter: Option<&ArgumentFilter>) -> Result<Vec<RawEvent>> {
        let variables = serde_json::json!({
            "network": self.network,
            "where": event_filter(query, filter),
            "limit": query.limit,
        });
        let data: EventsData = self.post(EVENTS_QUERY, variables).await?;
        let events: Vec<RawEvent> = data.evm.events.into_iter().filter_map(BqEvent::into_raw).collect();
        debug!(kind = %query.kind, count = events.len(), "event source returned batch");
        Ok(events)
    }
}

impl EventSource for BitqueryClient {
    async fn fetch_events(&self, query: &EventQuery) -> Result<Vec<RawEvent>> {
        self.run_events_query(query, None).await
    }

    async fn fetch_events_by_argument(&self, query: &EventQuery, filter: &ArgumentFilter) -> Result<Vec<RawEvent>> {
        self.run_events_query(query, Some(filter)).await
    }

    async fn fetch_balances_by_ids(&self, ids: &[String]) -> Result<Vec<BalanceRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let variables = serde_json::json!({
            "network": self.network,
            "contract": self.balance_contract,
            "ids": ids,
        });
        let data: BalancesData = self.post(BALANCES_QUERY, variables).await?;
        Ok(data.evm.balance_updates.into_iter().map(BqBalance::into_record).collect())
    }
}

/// Build the `where` clause for an events request.
fn event_filter(query: &EventQuery, filter: Option<&ArgumentFilter>) -> serde_json::Value {
    let mut clause = serde_json::json!({
        "Block": { "Time": { "since": query.since.to_rfc3339() } },
        "Log": { "Signature": { "Name": { "is": query.kind.event_name() } } },
        "LogHeader": { "Address": { "is": query.contract } },
    });

    if let Some(f) = filter {
        // Hex values are bytes32 keys; anything else is a uint256.
        let value_type = if f.values.iter().all(|v| v.starts_with("0x")) {
            "Bytes"
        } else {
            "BigInteger"
        };
        let per_name: Vec<serde_json::Value> = f
            .names
            .iter()
            .map(|name| {
                serde_json::json!({
                    "Arguments": { "includes": [{
                        "Name": { "is": name },
                        "Value": { value_type: { "in": f.values } },
                    }]}
                })
            })
            .collect();
        clause["any"] = serde_json::Value::Array(per_name);
    }
    clause
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct EventsData {
    #[serde(rename = "EVM")]
    evm: EvmEvents,
}

#[derive(Debug, Deserialize)]
struct EvmEvents {
    #[serde(rename = "Events", default)]
    events: Vec<BqEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BqEvent {
    block: BqBlock,
    transaction: BqTx,
    #[serde(default)]
    arguments: Vec<BqArgument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BqBlock {
    time: DateTime<Utc>,
    /// Delivered as either a JSON number or a numeric string.
    number: serde_json::Value,
    #[serde(default)]
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BqTx {
    hash: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BqArgument {
    name: String,
    value: BqValue,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum BqValue {
    #[serde(rename = "EVM_ABI_Integer_Value_Arg")]
    Integer { integer: i64 },
    #[serde(rename = "EVM_ABI_String_Value_Arg")]
    String { string: String },
    #[serde(rename = "EVM_ABI_Address_Value_Arg")]
    Address { address: String },
    #[serde(rename = "EVM_ABI_BigInt_Value_Arg")]
    BigInt {
        #[serde(rename = "bigInteger")]
        big_integer: String,
    },
    #[serde(rename = "EVM_ABI_Bytes_Value_Arg")]
    Bytes { hex: String },
    #[serde(rename = "EVM_ABI_Boolean_Value_Arg")]
    Boolean { bool: bool },
    #[serde(other)]
    Unknown,
}

impl BqEvent {
    fn into_raw(self) -> Option<RawEvent> {
        let number = self
            .block
            .number
            .as_i64()
            .or_else(|| self.block.number.as_str().and_then(|s| s.parse().ok()))?;
        let arguments = self
            .arguments
            .into_iter()
            .filter_map(|a| {
                let value = match a.value {
                    BqValue::Integer { integer } => ArgValue::Integer(integer),
                    BqValue::String { string } => ArgValue::String(string),
                    BqValue::Address { address } => ArgValue::Address(address),
                    BqValue::BigInt { big_integer } => ArgValue::BigInteger(big_integer),
                    BqValue::Bytes { hex } => ArgValue::Bytes(hex),
                    BqValue::Boolean { bool } => ArgValue::Bool(bool),
                    BqValue::Unknown => return None,
                };
                Some(NamedArgument { name: a.name, value })
            })
            .collect();

        Some(RawEvent {
            block: BlockMeta {
                time: self.block.time,
                number,
                hash: self.block.hash,
            },
            transaction: TxMeta {
                hash: self.transaction.hash,
                from: self.transaction.from,
                to: self.transaction.to,
            },
            arguments,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BalancesData {
    #[serde(rename = "EVM")]
    evm: EvmBalances,
}

#[derive(Debug, Deserialize)]
struct EvmBalances {
    #[serde(rename = "BalanceUpdates", default)]
    balance_updates: Vec<BqBalance>,
}

#[derive(Debug, Deserialize)]
struct BqBalance {
    #[serde(rename = "Currency")]
    currency: BqCurrency,
    #[serde(rename = "BalanceUpdate")]
    update: BqBalanceUpdate,
    balance: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BqCurrency {
    #[serde(default)]
    name: String,
    #[serde(default)]
    smart_contract: String,
    #[serde(default)]
    symbol: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BqBalanceUpdate {
    address: String,
    id: String,
}

impl BqBalance {
    fn into_record(self) -> BalanceRecord {
        let balance = match self.balance {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => "0".to_string(),
            other => other.to_string(),
        };
        BalanceRecord {
            currency: Currency {
                name: self.currency.name,
                contract: self.currency.smart_contract,
                symbol: self.currency.symbol,
            },
            holder_address: self.update.address,
            id: self.update.id,
            balance,
        }
    }
}
