//! SQLite analysis store
//!
//! Metrics, funding chains and flags are stored as JSON text; timestamps as
//! unix seconds. Traces are indexed by analysis id and rank.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    AnalysisStatus, AnalysisStore, HolderAnalysis, TraceFilter, TracePage, TraceQuery,
    WalletTrace,
};
use crate::types::{AddressType, TokenKey};

pub struct SqliteAnalysisStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

fn to_ts(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(|d| d.timestamp())
}

fn from_ts(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| Utc.timestamp_opt(t, 0).single())
}

fn filter_clause(filter: TraceFilter) -> &'static str {
    match filter {
        TraceFilter::All => "",
        TraceFilter::Suspicious => " AND (has_critical_flag = 1 OR risk_flag_count >= 2)",
        TraceFilter::Fresh => " AND is_fresh = 1",
        TraceFilter::Clustered => " AND cluster_id IS NOT NULL",
    }
}

impl SqliteAnalysisStore {
    /// Open (or create) the database at `db_path`
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `pool_size` - Maximum number of connections in the pool
    pub async fn new(db_path: &str, pool_size: u32) -> Result<Self> {
        info!(
            "Initializing SqliteAnalysisStore at: {} with pool size: {}",
            db_path, pool_size
        );

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self {
            pool,
            db_path: db_path.to_string(),
        };
        store.initialize_schema().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS holder_analyses (
                id TEXT PRIMARY KEY,
                chain TEXT NOT NULL,
                token TEXT NOT NULL,
                status TEXT NOT NULL,
                analyzed_at INTEGER,
                last_error TEXT,
                metrics TEXT,
                updated_at INTEGER NOT NULL,
                UNIQUE(chain, token)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create holder_analyses table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_traces (
                analysis_id TEXT NOT NULL,
                address TEXT NOT NULL,
                percentage REAL NOT NULL,
                rank INTEGER NOT NULL,
                age_days INTEGER,
                first_tx_date INTEGER,
                wallet_type TEXT NOT NULL,
                cluster_id INTEGER,
                funding_chain TEXT,
                funding_depth INTEGER NOT NULL,
                primary_funding_source TEXT,
                primary_funding_type TEXT,
                risk_flags TEXT NOT NULL,
                has_critical_flag INTEGER NOT NULL,
                risk_flag_count INTEGER NOT NULL,
                is_fresh INTEGER NOT NULL,
                PRIMARY KEY (analysis_id, address)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create wallet_traces table")?;

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_traces_analysis ON wallet_traces(analysis_id);",
            "CREATE INDEX IF NOT EXISTS idx_traces_rank ON wallet_traces(analysis_id, rank);",
            "CREATE INDEX IF NOT EXISTS idx_analyses_status ON holder_analyses(status);",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(&self.pool)
                .await
                .context(format!("Failed to create index: {}", index_sql))?;
        }

        info!("Analysis store schema initialized with indexes");
        Ok(())
    }

    fn analysis_from_row(row: &SqliteRow) -> Result<HolderAnalysis> {
        let id: String = row.try_get("id")?;
        let chain: String = row.try_get("chain")?;
        let token: String = row.try_get("token")?;
        let status: String = row.try_get("status")?;
        let metrics: Option<String> = row.try_get("metrics")?;

        Ok(HolderAnalysis {
            id: Uuid::parse_str(&id).context("Invalid analysis id")?,
            token: TokenKey::new(
                token,
                chain.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            ),
            status: status.parse()?,
            analyzed_at: from_ts(row.try_get("analyzed_at")?),
            last_error: row.try_get("last_error")?,
            metrics: metrics
                .map(|m| serde_json::from_str(&m))
                .transpose()
                .context("Failed to decode stored metrics")?,
        })
    }

    fn trace_from_row(row: &SqliteRow) -> Result<WalletTrace> {
        let analysis_id: String = row.try_get("analysis_id")?;
        let wallet_type: String = row.try_get("wallet_type")?;
        let primary_type: Option<String> = row.try_get("primary_funding_type")?;
        let funding_chain: Option<String> = row.try_get("funding_chain")?;
        let risk_flags: String = row.try_get("risk_flags")?;
        let age_days: Option<i64> = row.try_get("age_days")?;
        let cluster_id: Option<i64> = row.try_get("cluster_id")?;
        let rank: i64 = row.try_get("rank")?;
        let funding_depth: i64 = row.try_get("funding_depth")?;
        let risk_flag_count: i64 = row.try_get("risk_flag_count")?;

        Ok(WalletTrace {
            analysis_id: Uuid::parse_str(&analysis_id).context("Invalid analysis id")?,
            address: row.try_get("address")?,
            percentage: row.try_get("percentage")?,
            rank: rank as usize,
            age_days: age_days.map(|a| a as u32),
            first_tx_date: from_ts(row.try_get("first_tx_date")?),
            wallet_type: AddressType::from_label(&wallet_type),
            cluster_id: cluster_id.map(|c| c as u32),
            funding_chain: funding_chain
                .map(|c| serde_json::from_str(&c))
                .transpose()
                .context("Failed to decode funding chain")?,
            funding_depth: funding_depth as u8,
            primary_funding_source: row.try_get("primary_funding_source")?,
            primary_funding_type: primary_type.as_deref().map(AddressType::from_label),
            risk_flags: serde_json::from_str(&risk_flags).context("Failed to decode risk flags")?,
            has_critical_flag: row.try_get::<i64, _>("has_critical_flag")? != 0,
            risk_flag_count: risk_flag_count as usize,
            is_fresh: row.try_get::<i64, _>("is_fresh")? != 0,
        })
    }
}

#[async_trait]
impl AnalysisStore for SqliteAnalysisStore {
    async fn get_analysis(&self, token: &TokenKey) -> Result<Option<HolderAnalysis>> {
        let row = sqlx::query("SELECT * FROM holder_analyses WHERE chain = ? AND token = ?")
            .bind(token.chain.as_str())
            .bind(&token.address)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load analysis")?;

        row.as_ref().map(Self::analysis_from_row).transpose()
    }

    async fn mark_running(&self, token: &TokenKey) -> Result<HolderAnalysis> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO holder_analyses (id, chain, token, status, updated_at)
            VALUES (?, ?, ?, 'RUNNING', ?)
            ON CONFLICT(chain, token) DO UPDATE SET
                status = 'RUNNING',
                last_error = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(token.chain.as_str())
        .bind(&token.address)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to mark analysis running")?;

        self.get_analysis(token)
            .await?
            .context("Analysis row missing after upsert")
    }

    async fn mark_failed(&self, token: &TokenKey, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE holder_analyses SET status = 'FAILED', last_error = ?, updated_at = ? \
             WHERE chain = ? AND token = ?",
        )
        .bind(error)
        .bind(Utc::now().timestamp())
        .bind(token.chain.as_str())
        .bind(&token.address)
        .execute(&self.pool)
        .await
        .context("Failed to mark analysis failed")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("No analysis row for {}", token);
        }
        Ok(())
    }

    async fn save_completed(
        &self,
        analysis: &HolderAnalysis,
        traces: &[WalletTrace],
    ) -> Result<()> {
        let metrics = analysis
            .metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode metrics")?;
        let id = analysis.id.to_string();

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO holder_analyses
                (id, chain, token, status, analyzed_at, last_error, metrics, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chain, token) DO UPDATE SET
                id = excluded.id,
                status = excluded.status,
                analyzed_at = excluded.analyzed_at,
                last_error = excluded.last_error,
                metrics = excluded.metrics,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&id)
        .bind(analysis.token.chain.as_str())
        .bind(&analysis.token.address)
        .bind(analysis.status.as_str())
        .bind(to_ts(analysis.analyzed_at))
        .bind(&analysis.last_error)
        .bind(metrics)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .context("Failed to upsert analysis")?;

        sqlx::query("DELETE FROM wallet_traces WHERE analysis_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear previous traces")?;

        for trace in traces {
            let chain = trace
                .funding_chain
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let flags = serde_json::to_string(&trace.risk_flags)?;

            sqlx::query(
                r#"
                INSERT INTO wallet_traces (
                    analysis_id, address, percentage, rank, age_days, first_tx_date,
                    wallet_type, cluster_id, funding_chain, funding_depth,
                    primary_funding_source, primary_funding_type, risk_flags,
                    has_critical_flag, risk_flag_count, is_fresh
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&trace.address)
            .bind(trace.percentage)
            .bind(trace.rank as i64)
            .bind(trace.age_days.map(|a| a as i64))
            .bind(to_ts(trace.first_tx_date))
            .bind(trace.wallet_type.as_str())
            .bind(trace.cluster_id.map(|c| c as i64))
            .bind(chain)
            .bind(trace.funding_depth as i64)
            .bind(&trace.primary_funding_source)
            .bind(trace.primary_funding_type.map(|t| t.as_str()))
            .bind(flags)
            .bind(trace.has_critical_flag as i64)
            .bind(trace.risk_flag_count as i64)
            .bind(trace.is_fresh as i64)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert trace for {}", trace.address))?;
        }

        tx.commit().await.context("Failed to commit analysis")?;
        debug!(token = %analysis.token, traces = traces.len(), "Saved completed analysis");
        Ok(())
    }

    async fn list_traces(&self, analysis_id: Uuid, query: &TraceQuery) -> Result<TracePage> {
        let id = analysis_id.to_string();
        let clause = filter_clause(query.filter);

        let total: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM wallet_traces WHERE analysis_id = ?{}",
            clause
        ))
        .bind(&id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count traces")?
        .try_get("n")?;

        let rows = sqlx::query(&format!(
            "SELECT * FROM wallet_traces WHERE analysis_id = ?{} ORDER BY rank ASC LIMIT ? OFFSET ?",
            clause
        ))
        .bind(&id)
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list traces")?;

        Ok(TracePage {
            traces: rows
                .iter()
                .map(Self::trace_from_row)
                .collect::<Result<Vec<_>>>()?,
            total: total as usize,
        })
    }

    async fn get_trace(&self, analysis_id: Uuid, address: &str) -> Result<Option<WalletTrace>> {
        let row = sqlx::query("SELECT * FROM wallet_traces WHERE analysis_id = ? AND address = ?")
            .bind(analysis_id.to_string())
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load trace")?;

        row.as_ref().map(Self::trace_from_row).transpose()
    }

    async fn update_trace_funding(&self, trace: &WalletTrace) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let row = sqlx::query("SELECT * FROM wallet_traces WHERE analysis_id = ? AND address = ?")
            .bind(trace.analysis_id.to_string())
            .bind(&trace.address)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to load trace for update")?;
        let Some(row) = row else {
            return Ok(false);
        };
        let mut current = Self::trace_from_row(&row)?;
        current.merge_funding(trace);

        let chain = current
            .funding_chain
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let flags = serde_json::to_string(&current.risk_flags)?;

        let result = sqlx::query(
            r#"
            UPDATE wallet_traces SET
                funding_chain = ?,
                funding_depth = ?,
                primary_funding_source = ?,
                primary_funding_type = ?,
                risk_flags = ?,
                has_critical_flag = ?,
                risk_flag_count = ?
            WHERE analysis_id = ? AND address = ?
            "#,
        )
        .bind(chain)
        .bind(current.funding_depth as i64)
        .bind(&current.primary_funding_source)
        .bind(current.primary_funding_type.map(|t| t.as_str()))
        .bind(flags)
        .bind(current.has_critical_flag as i64)
        .bind(current.risk_flag_count as i64)
        .bind(current.analysis_id.to_string())
        .bind(&current.address)
        .execute(&mut *tx)
        .await
        .context("Failed to update trace funding")?;

        tx.commit().await.context("Failed to commit trace update")?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FlagKind, RiskFlag};
    use crate::types::Chain;

    async fn test_store() -> SqliteAnalysisStore {
        let db_path = format!("/tmp/holder_risk_test_{}.db", rand::random::<u64>());
        SqliteAnalysisStore::new(&db_path, 5).await.unwrap()
    }

    #[tokio::test]
    async fn test_schema_and_running_row() {
        let store = test_store().await;
        let token = TokenKey::new("0xabc", Chain::Polygon);
        assert!(store.get_analysis(&token).await.unwrap().is_none());

        let running = store.mark_running(&token).await.unwrap();
        assert_eq!(running.status, AnalysisStatus::Running);
        assert!(running.metrics.is_none());

        store.mark_failed(&token, "gateway down").await.unwrap();
        let failed = store.get_analysis(&token).await.unwrap().unwrap();
        assert_eq!(failed.status, AnalysisStatus::Failed);
        assert_eq!(failed.id, running.id);
        assert_eq!(failed.last_error.as_deref(), Some("gateway down"));
    }

    #[tokio::test]
    async fn test_trace_rows_and_filters() {
        let store = test_store().await;
        let token = TokenKey::new("0xabc", Chain::Polygon);
        let mut analysis = store.mark_running(&token).await.unwrap();
        analysis.status = AnalysisStatus::Completed;
        analysis.analyzed_at = Some(Utc::now());

        let mut fresh = WalletTrace::new(analysis.id, "0x01", 20.0, 1);
        fresh.is_fresh = true;
        fresh.age_days = Some(2);
        let mut mixer = WalletTrace::new(analysis.id, "0x02", 10.0, 2);
        mixer.push_flag(RiskFlag::new(FlagKind::Mixer, "mixer"));
        mixer.cluster_id = Some(1);
        let plain = WalletTrace::new(analysis.id, "0x03", 5.0, 3);

        store
            .save_completed(&analysis, &[plain.clone(), mixer.clone(), fresh.clone()])
            .await
            .unwrap();

        let all = store
            .list_traces(analysis.id, &TraceQuery::default())
            .await
            .unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.traces[0].address, "0x01");
        assert_eq!(all.traces[0].age_days, Some(2));

        let suspicious = store
            .list_traces(analysis.id, &TraceQuery::page(TraceFilter::Suspicious, 1, 10))
            .await
            .unwrap();
        assert_eq!(suspicious.total, 1);
        assert_eq!(suspicious.traces[0], mixer);

        let clustered = store
            .list_traces(analysis.id, &TraceQuery::page(TraceFilter::Clustered, 1, 10))
            .await
            .unwrap();
        assert_eq!(clustered.traces[0].address, "0x02");

        let second_page = store
            .list_traces(analysis.id, &TraceQuery::page(TraceFilter::All, 2, 2))
            .await
            .unwrap();
        assert_eq!(second_page.traces.len(), 1);
        assert_eq!(second_page.traces[0].rank, 3);
    }

    #[tokio::test]
    async fn test_update_trace_funding_keeps_rank() {
        let store = test_store().await;
        let token = TokenKey::new("0xabc", Chain::Polygon);
        let analysis = store.mark_running(&token).await.unwrap();
        let trace = WalletTrace::new(analysis.id, "0x01", 20.0, 1);
        store.save_completed(&analysis, &[trace.clone()]).await.unwrap();

        let mut refreshed = trace.clone();
        refreshed.rank = 99;
        refreshed.percentage = 0.5;
        refreshed.funding_depth = 5;
        refreshed.push_flag(RiskFlag::new(FlagKind::PreLaunchFunding, "early"));
        assert!(store.update_trace_funding(&refreshed).await.unwrap());

        let stored = store.get_trace(analysis.id, "0x01").await.unwrap().unwrap();
        assert_eq!(stored.rank, 1);
        assert_eq!(stored.percentage, 20.0);
        assert_eq!(stored.funding_depth, 5);
        assert_eq!(stored.risk_flag_count, 1);

        let missing = WalletTrace::new(analysis.id, "0xff", 1.0, 9);
        assert!(!store.update_trace_funding(&missing).await.unwrap());
    }
}
