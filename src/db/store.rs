use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, info};

use crate::config::QUOTE_CURRENCY_IDS;
use crate::db::models::{
    ConditionRow, MarketChainRow, QuestionRow, StoreCountsRow, TokenPairRow, TradeRow,
};
use crate::error::Result;
use crate::market::matcher::is_quote_currency;
use crate::types::{ConditionRecord, QuestionRecord, TokenPairRecord, TradeRecord};

/// Number of pooled read connections for a file-backed store.
const READ_POOL_SIZE: u32 = 4;

const QUESTION_COLUMNS: &str = "q.question_id AS question_id, q.creator AS creator, \
     q.ancillary_data AS ancillary_data, q.ancillary_decoded AS ancillary_decoded, \
     q.reward_token AS reward_token, q.reward AS reward, q.proposal_bond AS proposal_bond, \
     q.request_timestamp AS request_timestamp, q.block_time AS block_time, \
     q.block_number AS block_number, q.tx_hash AS tx_hash";

const CHAIN_SELECT: &str = "c.condition_id AS c_condition_id, c.oracle AS c_oracle, \
     c.outcome_slot_count AS c_outcome_slot_count, c.block_time AS c_block_time, \
     c.block_number AS c_block_number, c.tx_hash AS c_tx_hash, \
     t.token0 AS t_token0, t.token1 AS t_token1, t.block_time AS t_block_time, \
     t.block_number AS t_block_number, t.tx_hash AS t_tx_hash \
     FROM questions q \
     LEFT JOIN conditions c ON c.question_id = q.question_id \
     LEFT JOIN token_pairs t ON t.condition_id = c.condition_id";

/// A question with whatever parts of its chain have been ingested.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketChain {
    pub question: QuestionRecord,
    pub condition: Option<ConditionRecord>,
    pub token_pair: Option<TokenPairRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub questions: i64,
    pub conditions: i64,
    pub token_pairs: i64,
    pub trades: i64,
}

/// Append-only SQLite store for the four event kinds.
///
/// Writes go through a single-connection pool; reads use a separate pool so
/// relationship queries never wait behind an ingestion batch (WAL mode).
/// Cloning is cheap and shares both pools.
#[derive(Clone)]
pub struct EventStore {
    writer: SqlitePool,
    reader: SqlitePool,
}

impl EventStore {
    /// Open (creating if needed) a file-backed store and apply migrations.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("./migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READ_POOL_SIZE)
            .connect_with(options.read_only(true))
            .await?;

        info!(path, "event store ready (WAL)");
        Ok(Self { writer, reader })
    }

    /// Private in-memory store. Both paths share one connection, since each
    /// in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            writer: pool.clone(),
            reader: pool,
        })
    }

    // -----------------------------------------------------------------------
    // Idempotent inserts: true when a new row was created
    // -----------------------------------------------------------------------

    pub async fn insert_question(&self, q: &QuestionRecord) -> Result<bool> {
        let decoded = serde_json::to_string(&q.ancillary)?;
        let res = sqlx::query(
            r#"
            INSERT INTO questions (
                question_id, creator, ancillary_data, ancillary_decoded,
                reward_token, reward, proposal_bond, request_timestamp,
                block_time, block_number, tx_hash
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&q.question_id)
        .bind(&q.creator)
        .bind(&q.ancillary_data)
        .bind(decoded)
        .bind(&q.reward_token)
        .bind(&q.reward)
        .bind(&q.proposal_bond)
        .bind(&q.request_timestamp)
        .bind(q.block_time)
        .bind(q.block_number)
        .bind(&q.tx_hash)
        .execute(&self.writer)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    /// Conflicts on either `condition_id` or `question_id` are absorbed.
    pub async fn insert_condition(&self, c: &ConditionRecord) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO conditions (
                condition_id, question_id, oracle, outcome_slot_count,
                block_time, block_number, tx_hash
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&c.condition_id)
        .bind(&c.question_id)
        .bind(&c.oracle)
        .bind(c.outcome_slot_count)
        .bind(c.block_time)
        .bind(c.block_number)
        .bind(&c.tx_hash)
        .execute(&self.writer)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn insert_token_pair(&self, t: &TokenPairRecord) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO token_pairs (
                condition_id, token0, token1, block_time, block_number, tx_hash
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&t.condition_id)
        .bind(&t.token0)
        .bind(&t.token1)
        .bind(t.block_time)
        .bind(t.block_number)
        .bind(&t.tx_hash)
        .execute(&self.writer)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn insert_trade(&self, t: &TradeRecord) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO trades (
                order_hash, maker, taker, maker_asset_id, taker_asset_id,
                maker_amount, taker_amount, fee, block_time, block_number, tx_hash
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&t.order_hash)
        .bind(&t.maker)
        .bind(&t.taker)
        .bind(&t.maker_asset_id)
        .bind(&t.taker_asset_id)
        .bind(&t.maker_amount)
        .bind(&t.taker_amount)
        .bind(&t.fee)
        .bind(t.block_time)
        .bind(t.block_number)
        .bind(&t.tx_hash)
        .execute(&self.writer)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    // -----------------------------------------------------------------------
    // Relationship chain
    // -----------------------------------------------------------------------

    pub async fn question(&self, question_id: &str) -> Result<Option<QuestionRecord>> {
        let row: Option<QuestionRow> = sqlx::query_as(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions q WHERE q.question_id = ?"
        ))
        .bind(question_id)
        .fetch_optional(&self.reader)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn condition_for_question(&self, question_id: &str) -> Result<Option<ConditionRecord>> {
        let row: Option<ConditionRow> = sqlx::query_as(
            r#"
            SELECT condition_id, question_id, oracle, outcome_slot_count,
                   block_time, block_number, tx_hash
            FROM conditions
            WHERE question_id = ?
            "#,
        )
        .bind(question_id)
        .fetch_optional(&self.reader)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn token_pair_for_condition(&self, condition_id: &str) -> Result<Option<TokenPairRecord>> {
        let row: Option<TokenPairRow> = sqlx::query_as(
            r#"
            SELECT condition_id, token0, token1, block_time, block_number, tx_hash
            FROM token_pairs
            WHERE condition_id = ?
            "#,
        )
        .bind(condition_id)
        .fetch_optional(&self.reader)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Every question with its condition and token pair, newest question first.
    pub async fn market_chains(&self) -> Result<Vec<MarketChain>> {
        let rows: Vec<MarketChainRow> = sqlx::query_as(&format!(
            "SELECT {QUESTION_COLUMNS}, {CHAIN_SELECT} ORDER BY q.block_time DESC, q.block_number DESC"
        ))
        .fetch_all(&self.reader)
        .await?;
        Ok(rows.into_iter().map(chain_from_row).collect())
    }

    pub async fn market_chain(&self, question_id: &str) -> Result<Option<MarketChain>> {
        let row: Option<MarketChainRow> = sqlx::query_as(&format!(
            "SELECT {QUESTION_COLUMNS}, {CHAIN_SELECT} WHERE q.question_id = ?"
        ))
        .bind(question_id)
        .fetch_optional(&self.reader)
        .await?;
        Ok(row.map(chain_from_row))
    }

    // -----------------------------------------------------------------------
    // Trade matching
    // -----------------------------------------------------------------------

    /// Candidate trades touching any of `token_ids`, newest first.
    ///
    /// This is a coarse SQL prefilter; callers apply `matcher::matches` for the
    /// exact rule. Quote-currency ids are only added to the lookup when one of
    /// the market's own tokens is itself in the quote class.
    pub async fn trades_for_tokens(&self, token_ids: &[String]) -> Result<Vec<TradeRecord>> {
        let mut ids: Vec<String> = token_ids.iter().map(|t| t.trim().to_ascii_lowercase()).collect();
        if ids.iter().any(|t| is_quote_currency(t)) {
            ids.extend(QUOTE_CURRENCY_IDS.iter().map(|s| s.to_string()));
        }
        ids.sort();
        ids.dedup();
        ids.retain(|t| !t.is_empty());
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT order_hash, maker, taker, maker_asset_id, taker_asset_id, maker_amount, \
             taker_amount, fee, block_time, block_number, tx_hash FROM trades WHERE maker_asset_id IN (",
        );
        {
            let mut sep = qb.separated(", ");
            for id in &ids {
                sep.push_bind(id.clone());
            }
        }
        qb.push(") OR taker_asset_id IN (");
        {
            let mut sep = qb.separated(", ");
            for id in &ids {
                sep.push_bind(id.clone());
            }
        }
        qb.push(") ORDER BY block_time DESC, block_number DESC");

        let rows: Vec<TradeRow> = qb.build_query_as().fetch_all(&self.reader).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    pub async fn counts(&self) -> Result<StoreCounts> {
        let row: StoreCountsRow = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM questions)   AS questions,
                (SELECT COUNT(*) FROM conditions)  AS conditions,
                (SELECT COUNT(*) FROM token_pairs) AS token_pairs,
                (SELECT COUNT(*) FROM trades)      AS trades
            "#,
        )
        .fetch_one(&self.reader)
        .await?;
        Ok(StoreCounts {
            questions: row.questions,
            conditions: row.conditions,
            token_pairs: row.token_pairs,
            trades: row.trades,
        })
    }

    /// Delete every row of every table and restart autoincrement ids, in one
    /// transaction. Callers must hold the ingestion lane (see
    /// `RetryScheduler::run_exclusive`).
    pub async fn reset(&self) -> Result<()> {
        let mut tx = self.writer.begin().await?;
        for table in ["trades", "token_pairs", "conditions", "questions"] {
            sqlx::query(&format!("DELETE FROM {table}")).execute(&mut *tx).await?;
        }
        sqlx::query(
            "DELETE FROM sqlite_sequence WHERE name IN ('questions', 'conditions', 'token_pairs', 'trades')",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!("event store reset: all tables emptied");
        Ok(())
    }

    /// Fold the WAL back into the main database so read connections see a
    /// compact file. PASSIVE never blocks writers.
    pub async fn checkpoint(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(PASSIVE)")
            .execute(&self.writer)
            .await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

fn chain_from_row(r: MarketChainRow) -> MarketChain {
    let question: QuestionRecord = r.question.into();

    let condition = match (r.c_condition_id, r.c_block_time, r.c_block_number, r.c_tx_hash) {
        (Some(condition_id), Some(block_time), Some(block_number), Some(tx_hash)) => Some(ConditionRecord {
            condition_id,
            question_id: question.question_id.clone(),
            oracle: r.c_oracle.unwrap_or_default(),
            outcome_slot_count: r.c_outcome_slot_count,
            block_time,
            block_number,
            tx_hash,
        }),
        _ => None,
    };

    let token_pair = match (&condition, r.t_token0, r.t_token1, r.t_block_time, r.t_block_number, r.t_tx_hash) {
        (Some(c), Some(token0), Some(token1), Some(block_time), Some(block_number), Some(tx_hash)) => {
            Some(TokenPairRecord {
                condition_id: c.condition_id.clone(),
                token0,
                token1,
                block_time,
                block_number,
                tx_hash,
            })
        }
        _ => None,
    };

    MarketChain {
        question,
        condition,
        token_pair,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::ancillary::AncillaryRecord;
    use crate::source::testing::at;

    pub fn question(id: &str, secs: i64) -> QuestionRecord {
        QuestionRecord {
            question_id: id.to_string(),
            creator: "0xcreator".to_string(),
            ancillary_data: "0x".to_string(),
            ancillary: AncillaryRecord {
                title: format!("Question {id}"),
                ..Default::default()
            },
            reward_token: None,
            reward: None,
            proposal_bond: None,
            request_timestamp: None,
            block_time: at(secs),
            block_number: secs,
            tx_hash: format!("0xq{id}"),
        }
    }

    pub fn condition(id: &str, question_id: &str) -> ConditionRecord {
        ConditionRecord {
            condition_id: id.to_string(),
            question_id: question_id.to_string(),
            oracle: "0xoracle".to_string(),
            outcome_slot_count: Some(2),
            block_time: at(10),
            block_number: 10,
            tx_hash: format!("0xc{id}"),
        }
    }

    pub fn token_pair(condition_id: &str, token0: &str, token1: &str) -> TokenPairRecord {
        TokenPairRecord {
            condition_id: condition_id.to_string(),
            token0: token0.to_string(),
            token1: token1.to_string(),
            block_time: at(20),
            block_number: 20,
            tx_hash: format!("0xt{condition_id}"),
        }
    }

    pub fn trade(hash: &str, maker_asset: &str, taker_asset: &str, maker_amt: &str, taker_amt: &str, secs: i64) -> TradeRecord {
        TradeRecord {
            order_hash: hash.to_string(),
            maker: "0xmaker".to_string(),
            taker: "0xtaker".to_string(),
            maker_asset_id: maker_asset.to_string(),
            taker_asset_id: taker_asset.to_string(),
            maker_amount: maker_amt.to_string(),
            taker_amount: taker_amt.to_string(),
            fee: "0".to_string(),
            block_time: at(secs),
            block_number: secs,
            tx_hash: format!("0xtx{hash}"),
        }
    }

    #[tokio::test]
    async fn inserts_are_idempotent_per_natural_key() {
        let store = EventStore::in_memory().await.unwrap();

        assert!(store.insert_question(&question("Q1", 0)).await.unwrap());
        assert!(!store.insert_question(&question("Q1", 0)).await.unwrap());
        assert!(store.insert_condition(&condition("C1", "Q1")).await.unwrap());
        assert!(!store.insert_condition(&condition("C1", "Q1")).await.unwrap());
        assert!(store.insert_token_pair(&token_pair("C1", "100", "200")).await.unwrap());
        assert!(!store.insert_token_pair(&token_pair("C1", "200", "100")).await.unwrap());
        let t = trade("0xh1", "0", "200", "550000", "1000000", 30);
        assert!(store.insert_trade(&t).await.unwrap());
        assert!(!store.insert_trade(&t).await.unwrap());

        let counts = store.counts().await.unwrap();
        assert_eq!(
            counts,
            StoreCounts { questions: 1, conditions: 1, token_pairs: 1, trades: 1 }
        );

        // First registration wins; the reversed redelivery was a no-op.
        let pair = store.token_pair_for_condition("C1").await.unwrap().unwrap();
        assert_eq!((pair.token0.as_str(), pair.token1.as_str()), ("100", "200"));
    }

    #[tokio::test]
    async fn second_condition_for_same_question_is_ignored() {
        let store = EventStore::in_memory().await.unwrap();
        assert!(store.insert_condition(&condition("C1", "Q1")).await.unwrap());
        assert!(!store.insert_condition(&condition("C2", "Q1")).await.unwrap());
        let c = store.condition_for_question("Q1").await.unwrap().unwrap();
        assert_eq!(c.condition_id, "C1");
    }

    #[tokio::test]
    async fn ancillary_record_survives_storage() {
        let store = EventStore::in_memory().await.unwrap();
        let mut q = question("Q1", 0);
        q.ancillary.p1 = Some("No".to_string());
        q.ancillary.p2 = Some("Yes".to_string());
        store.insert_question(&q).await.unwrap();

        let loaded = store.question("Q1").await.unwrap().unwrap();
        assert_eq!(loaded, q);
    }

    #[tokio::test]
    async fn chain_tolerates_missing_stages() {
        let store = EventStore::in_memory().await.unwrap();
        store.insert_question(&question("Q1", 0)).await.unwrap();
        store.insert_question(&question("Q2", 5)).await.unwrap();
        store.insert_condition(&condition("C2", "Q2")).await.unwrap();

        let chains = store.market_chains().await.unwrap();
        assert_eq!(chains.len(), 2);
        // Newest question first.
        assert_eq!(chains[0].question.question_id, "Q2");
        assert_eq!(chains[0].condition.as_ref().unwrap().condition_id, "C2");
        assert!(chains[0].token_pair.is_none());
        assert!(chains[1].condition.is_none());
        assert!(chains[1].token_pair.is_none());

        store.insert_token_pair(&token_pair("C2", "1", "2")).await.unwrap();
        let chain = store.market_chain("Q2").await.unwrap().unwrap();
        assert_eq!(chain.token_pair.unwrap().token1, "2");
        assert!(store.market_chain("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trade_prefilter_returns_newest_first() {
        let store = EventStore::in_memory().await.unwrap();
        store.insert_trade(&trade("a", "0", "555", "400000", "1000000", 1)).await.unwrap();
        store.insert_trade(&trade("b", "555", "0", "1000000", "550000", 2)).await.unwrap();
        store.insert_trade(&trade("c", "0", "999", "100000", "1000000", 3)).await.unwrap();

        let trades = store
            .trades_for_tokens(&["555".to_string(), "777".to_string()])
            .await
            .unwrap();
        let hashes: Vec<&str> = trades.iter().map(|t| t.order_hash.as_str()).collect();
        assert_eq!(hashes, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn reset_empties_tables_and_restarts_ids() {
        let store = EventStore::in_memory().await.unwrap();
        store.insert_question(&question("Q1", 0)).await.unwrap();
        store.insert_question(&question("Q2", 1)).await.unwrap();
        store.insert_trade(&trade("a", "0", "1", "1", "1", 1)).await.unwrap();

        store.reset().await.unwrap();
        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());

        store.insert_question(&question("Q3", 2)).await.unwrap();
        let id: i64 = sqlx::query_scalar("SELECT id FROM questions WHERE question_id = 'Q3'")
            .fetch_one(&store.reader)
            .await
            .unwrap();
        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn checkpoint_succeeds() {
        let store = EventStore::in_memory().await.unwrap();
        store.checkpoint().await.unwrap();
    }
}
