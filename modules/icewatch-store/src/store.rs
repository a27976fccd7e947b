//! Durable persistence for reports, clusters, and alert markers.
//!
//! SQLite behind an async pool. The store is the only cross-task shared
//! resource; writes serialize through it. Every operation is idempotent so
//! a report retried after a crash lands exactly once.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use icewatch_common::{
    AlertRecord, Cluster, ClusterState, GeoPoint, IceWatchError, Report, TrustTier, Verdict,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS reports (
    dedup_key   TEXT PRIMARY KEY,
    source      TEXT NOT NULL,
    trust       TEXT NOT NULL,
    obs_ts      TEXT NOT NULL,
    ingest_ts   TEXT NOT NULL,
    content     TEXT NOT NULL,
    url         TEXT,
    author      TEXT,
    coords_json TEXT,
    verdict     TEXT,
    cluster_id  TEXT
);

CREATE TABLE IF NOT EXISTS clusters (
    id                  TEXT PRIMARY KEY,
    state               TEXT NOT NULL,
    first_seen          TEXT NOT NULL,
    last_updated        TEXT NOT NULL,
    centroid_lat        REAL,
    centroid_lon        REAL,
    label               TEXT,
    confidence          REAL NOT NULL DEFAULT 0,
    alerts_emitted_json TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS cluster_members (
    cluster_id TEXT NOT NULL,
    dedup_key  TEXT NOT NULL,
    PRIMARY KEY (cluster_id, dedup_key)
);

CREATE INDEX IF NOT EXISTS idx_reports_cluster ON reports(cluster_id);
CREATE INDEX IF NOT EXISTS idx_clusters_state ON clusters(state);
"#;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database file and run schema setup.
    pub async fn connect(db_path: &str) -> Result<Self, IceWatchError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(store_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(db_path, "Store initialized");
        Ok(store)
    }

    /// In-memory database for tests.
    pub async fn connect_in_memory() -> Result<Self, IceWatchError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(store_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), IceWatchError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert a report if its dedup key is unseen. Returns true when the row
    /// is new, false for a duplicate.
    pub async fn put_report(&self, report: &Report) -> Result<bool, IceWatchError> {
        let coords_json = report
            .coords
            .map(|c| serde_json::to_string(&c).unwrap_or_default());
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO reports
                (dedup_key, source, trust, obs_ts, ingest_ts, content, url, author, coords_json, verdict)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.dedup_key)
        .bind(&report.source)
        .bind(report.trust.to_string())
        .bind(report.observed_at)
        .bind(report.ingested_at)
        .bind(&report.content)
        .bind(&report.url)
        .bind(&report.author)
        .bind(coords_json)
        .bind(report.verdict.map(|v| v.to_string()))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn has_report(&self, dedup_key: &str) -> Result<bool, IceWatchError> {
        let row = sqlx::query("SELECT 1 FROM reports WHERE dedup_key = ?")
            .bind(dedup_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.is_some())
    }

    /// Write or replace a cluster row and its membership, atomically.
    pub async fn upsert_cluster(&self, cluster: &Cluster) -> Result<(), IceWatchError> {
        let alerts_json =
            serde_json::to_string(&cluster.alerts_emitted).map_err(|e| store_err_str(&e))?;

        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query(
            r#"
            INSERT INTO clusters
                (id, state, first_seen, last_updated, centroid_lat, centroid_lon, label, confidence, alerts_emitted_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                last_updated = excluded.last_updated,
                centroid_lat = excluded.centroid_lat,
                centroid_lon = excluded.centroid_lon,
                label = excluded.label,
                confidence = excluded.confidence,
                alerts_emitted_json = excluded.alerts_emitted_json
            "#,
        )
        .bind(cluster.id.to_string())
        .bind(cluster.state.to_string())
        .bind(cluster.first_seen)
        .bind(cluster.last_updated)
        .bind(cluster.centroid.map(|c| c.lat))
        .bind(cluster.centroid.map(|c| c.lon))
        .bind(&cluster.label)
        .bind(cluster.confidence)
        .bind(alerts_json)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        for member in &cluster.members {
            sqlx::query("INSERT OR IGNORE INTO cluster_members (cluster_id, dedup_key) VALUES (?, ?)")
                .bind(cluster.id.to_string())
                .bind(&member.dedup_key)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            sqlx::query("UPDATE reports SET cluster_id = ? WHERE dedup_key = ?")
                .bind(cluster.id.to_string())
                .bind(&member.dedup_key)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    /// Persist an alert emission: the appended record plus the cluster's
    /// current stats, in one transaction.
    pub async fn mark_alert(
        &self,
        cluster: &Cluster,
        record: &AlertRecord,
    ) -> Result<(), IceWatchError> {
        let mut alerts = cluster.alerts_emitted.clone();
        // Caller may have already appended; only add when the tail differs.
        let already = alerts
            .last()
            .map(|a| a.member_count == record.member_count && a.kind == record.kind)
            .unwrap_or(false);
        if !already {
            alerts.push(record.clone());
        }
        let alerts_json = serde_json::to_string(&alerts).map_err(|e| store_err_str(&e))?;

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        sqlx::query(
            "UPDATE clusters SET alerts_emitted_json = ?, confidence = ?, last_updated = ? WHERE id = ?",
        )
        .bind(alerts_json)
        .bind(cluster.confidence)
        .bind(cluster.last_updated)
        .bind(cluster.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    /// Restore all ACTIVE clusters with their member reports, for the
    /// correlator's warm start. Members come back in ingest order.
    pub async fn load_active_clusters(&self) -> Result<Vec<Cluster>, IceWatchError> {
        let rows = sqlx::query(
            r#"
            SELECT id, state, first_seen, last_updated, centroid_lat, centroid_lon,
                   label, confidence, alerts_emitted_json
            FROM clusters WHERE state = 'active'
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut clusters = Vec::with_capacity(rows.len());
        for row in rows {
            let id_str: String = row.try_get("id").map_err(store_err)?;
            let id = Uuid::parse_str(&id_str).map_err(|e| store_err_str(&e))?;

            let alerts_json: String = row.try_get("alerts_emitted_json").map_err(store_err)?;
            let alerts_emitted: Vec<AlertRecord> =
                serde_json::from_str(&alerts_json).map_err(|e| store_err_str(&e))?;

            let centroid_lat: Option<f64> = row.try_get("centroid_lat").map_err(store_err)?;
            let centroid_lon: Option<f64> = row.try_get("centroid_lon").map_err(store_err)?;
            let centroid = match (centroid_lat, centroid_lon) {
                (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
                _ => None,
            };

            let members = self.load_members(&id_str).await?;

            clusters.push(Cluster {
                id,
                centroid,
                label: row.try_get("label").map_err(store_err)?,
                first_seen: row.try_get("first_seen").map_err(store_err)?,
                last_updated: row.try_get("last_updated").map_err(store_err)?,
                members,
                confidence: row.try_get("confidence").map_err(store_err)?,
                state: ClusterState::Active,
                alerts_emitted,
            });
        }

        Ok(clusters)
    }

    async fn load_members(&self, cluster_id: &str) -> Result<Vec<Report>, IceWatchError> {
        let rows = sqlx::query(
            r#"
            SELECT r.dedup_key, r.source, r.trust, r.obs_ts, r.ingest_ts, r.content,
                   r.url, r.author, r.coords_json, r.verdict
            FROM reports r
            JOIN cluster_members m ON m.dedup_key = r.dedup_key
            WHERE m.cluster_id = ?
            ORDER BY r.ingest_ts ASC
            "#,
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut members = Vec::with_capacity(rows.len());
        for row in rows {
            members.push(row_to_report(&row)?);
        }
        Ok(members)
    }

    /// Delete reports and terminal clusters older than the cutoff. Returns
    /// the number of report rows removed.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, IceWatchError> {
        let reports = sqlx::query("DELETE FROM reports WHERE ingest_ts < ? AND cluster_id IS NULL")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        sqlx::query(
            r#"
            DELETE FROM cluster_members WHERE cluster_id IN
                (SELECT id FROM clusters WHERE state = 'expired' AND last_updated < ?)
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        sqlx::query("DELETE FROM clusters WHERE state = 'expired' AND last_updated < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(reports.rows_affected())
    }

    /// Count of persisted reports (test/diagnostic helper).
    pub async fn report_count(&self) -> Result<i64, IceWatchError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM reports")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        row.try_get("n").map_err(store_err)
    }
}

fn row_to_report(row: &sqlx::sqlite::SqliteRow) -> Result<Report, IceWatchError> {
    let trust: String = row.try_get("trust").map_err(store_err)?;
    let verdict: Option<String> = row.try_get("verdict").map_err(store_err)?;
    let coords_json: Option<String> = row.try_get("coords_json").map_err(store_err)?;
    let coords = coords_json
        .as_deref()
        .and_then(|j| serde_json::from_str::<GeoPoint>(j).ok());

    Ok(Report {
        dedup_key: row.try_get("dedup_key").map_err(store_err)?,
        source: row.try_get("source").map_err(store_err)?,
        trust: TrustTier::from_str_loose(&trust),
        observed_at: row.try_get("obs_ts").map_err(store_err)?,
        ingested_at: row.try_get("ingest_ts").map_err(store_err)?,
        content: row.try_get("content").map_err(store_err)?,
        url: row.try_get("url").map_err(store_err)?,
        author: row.try_get("author").map_err(store_err)?,
        coords,
        locations: Vec::new(),
        verdict: verdict.as_deref().map(Verdict::from_str_loose),
    })
}

fn store_err(e: sqlx::Error) -> IceWatchError {
    IceWatchError::Store(e.to_string())
}

fn store_err_str(e: &dyn std::fmt::Display) -> IceWatchError {
    IceWatchError::Store(e.to_string())
}
