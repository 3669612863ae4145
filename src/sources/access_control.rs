//! Pull adapter for the legacy access-control database (MySQL).
//!
//! Each run reads the door/reader/controller tables with their raw status
//! words, then the access log strictly after the committed cursor, in
//! ascending `(log_date, log_time, log_idx)` order and capped at
//! `batch_size` rows.
//!
//! The pool is created lazily and rebuilt only when a settings reload
//! changes the connection string.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;
use tokio::sync::Mutex;

use super::SourceAdapter;
use crate::config::SourceSettings;
use crate::domain::{
    ChannelStatus, CursorPosition, DeviceKey, DeviceType, ObservedDevice, PollCursor,
    RawLogRecord, ServiceType, SourceBatch,
};
use crate::error::PipelineError;

/// Source name and cursor key.
pub const SOURCE_NAME: &str = "access_control";

const SELECT_DOORS: &str = r#"
    SELECT d.door_id AS device_id, d.door_name AS name, c.ip_address AS ip,
           CAST(d.channel AS SIGNED) AS channel,
           CAST(c.link_status AS SIGNED) AS link_word,
           CAST(c.lock_status AS SIGNED) AS lock_word
    FROM doors d
    JOIN controllers c ON c.controller_id = d.controller_id
    ORDER BY d.door_id
"#;

const SELECT_READERS: &str = r#"
    SELECT r.reader_id AS device_id, r.reader_name AS name, c.ip_address AS ip,
           CAST(r.channel AS SIGNED) AS channel,
           CAST(c.reader_status AS SIGNED) AS link_word,
           CAST(NULL AS SIGNED) AS lock_word
    FROM readers r
    JOIN controllers c ON c.controller_id = r.controller_id
    ORDER BY r.reader_id
"#;

const SELECT_CONTROLLERS: &str = r#"
    SELECT controller_id AS device_id, controller_name AS name, ip_address AS ip,
           CAST(0 AS SIGNED) AS channel,
           CAST(link_status AS SIGNED) AS link_word,
           CAST(NULL AS SIGNED) AS lock_word
    FROM controllers
    ORDER BY controller_id
"#;

const SELECT_LOGS_FROM_START: &str = r#"
    SELECT CAST(log_idx AS SIGNED) AS log_idx, log_date, log_time, log_type,
           CAST(log_status AS SIGNED) AS log_status, device_id,
           CAST(device_kind AS SIGNED) AS device_kind, card_no, user_name
    FROM access_logs
    ORDER BY log_date, log_time, log_idx
    LIMIT ?
"#;

const SELECT_LOGS_AFTER: &str = r#"
    SELECT CAST(log_idx AS SIGNED) AS log_idx, log_date, log_time, log_type,
           CAST(log_status AS SIGNED) AS log_status, device_id,
           CAST(device_kind AS SIGNED) AS device_kind, card_no, user_name
    FROM access_logs
    WHERE (log_date, log_time, log_idx) > (?, ?, ?)
    ORDER BY log_date, log_time, log_idx
    LIMIT ?
"#;

/// Device row with raw status words, shared by the three device queries.
///
/// Numeric columns are cast to `BIGINT` in SQL so every query decodes the
/// same way regardless of the legacy column widths.
#[derive(Debug, sqlx::FromRow)]
struct DeviceStatusRow {
    device_id: String,
    name: String,
    ip: Option<String>,
    channel: i64,
    link_word: i64,
    lock_word: Option<i64>,
}

/// Status words are 32 bits wide; anything else reads as "all clear".
fn status_word(raw: i64) -> u32 {
    u32::try_from(raw).unwrap_or(0)
}

impl DeviceStatusRow {
    fn into_observed(self, device_type: DeviceType) -> ObservedDevice {
        ObservedDevice {
            key: DeviceKey::new(self.device_id, device_type),
            name: self.name,
            ip: self.ip,
            service: ServiceType::AccessControl,
            status: ChannelStatus {
                // out-of-range channels decode to "not set"
                channel: u8::try_from(self.channel).unwrap_or(u8::MAX),
                link_word: status_word(self.link_word),
                lock_word: self.lock_word.map(status_word),
            },
        }
    }
}

/// Row of the legacy `access_logs` table.
#[derive(Debug, sqlx::FromRow)]
struct LogRow {
    log_idx: i64,
    log_date: NaiveDate,
    log_time: NaiveTime,
    log_type: String,
    log_status: i64,
    device_id: String,
    device_kind: i64,
    card_no: Option<String>,
    user_name: Option<String>,
}

/// Legacy device kind codes. Anything unknown was reported by the panel
/// itself.
fn device_type_of(kind: i64) -> DeviceType {
    match kind {
        1 => DeviceType::Door,
        2 => DeviceType::Reader,
        _ => DeviceType::Controller,
    }
}

impl From<LogRow> for RawLogRecord {
    fn from(row: LogRow) -> Self {
        let occurred_at = row.log_date.and_time(row.log_time).and_utc();
        Self {
            log_type: row.log_type.trim().to_ascii_lowercase(),
            // codes outside i32 are unmapped anyway
            status_code: i32::try_from(row.log_status).unwrap_or(-1),
            device: DeviceKey::new(row.device_id, device_type_of(row.device_kind)),
            occurred_at,
            ended_at: None,
            position: Some(CursorPosition::new(row.log_date, row.log_time, row.log_idx)),
            correlation_token: None,
            payload: serde_json::json!({
                "card_no": row.card_no,
                "user_name": row.user_name,
            }),
        }
    }
}

#[derive(Debug)]
struct CachedPool {
    url: String,
    pool: MySqlPool,
}

/// Adapter over the legacy access-control MySQL database.
#[derive(Debug, Default)]
pub struct AccessControlAdapter {
    pool: Mutex<Option<CachedPool>>,
}

impl AccessControlAdapter {
    /// Creates an adapter; the pool is opened on first use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn pool(&self, settings: &SourceSettings) -> Result<MySqlPool, PipelineError> {
        let url = settings
            .access_control
            .database_url
            .as_deref()
            .ok_or_else(|| PipelineError::unreachable(SOURCE_NAME, "ACCESS_CONTROL_URL not set"))?;

        let mut cached = self.pool.lock().await;
        if let Some(existing) = cached.as_ref()
            && existing.url == url
        {
            return Ok(existing.pool.clone());
        }

        if let Some(old) = cached.take() {
            tracing::info!(version = settings.version, "access-control settings changed, reopening pool");
            old.pool.close().await;
        }
        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(url)
            .map_err(|e| PipelineError::unreachable(SOURCE_NAME, e))?;
        *cached = Some(CachedPool {
            url: url.to_string(),
            pool: pool.clone(),
        });
        Ok(pool)
    }
}

async fn fetch_devices(
    pool: &MySqlPool,
    query: &str,
    device_type: DeviceType,
) -> Result<Vec<ObservedDevice>, PipelineError> {
    let rows: Vec<DeviceStatusRow> = sqlx::query_as(query)
        .fetch_all(pool)
        .await
        .map_err(|e| PipelineError::unreachable(SOURCE_NAME, e))?;
    Ok(rows
        .into_iter()
        .map(|row| row.into_observed(device_type))
        .collect())
}

async fn fetch_logs(
    pool: &MySqlPool,
    after: Option<CursorPosition>,
    limit: u32,
) -> Result<Vec<LogRow>, PipelineError> {
    let query = match after {
        Some(position) => sqlx::query_as::<_, LogRow>(SELECT_LOGS_AFTER)
            .bind(position.date)
            .bind(position.time)
            .bind(position.index)
            .bind(limit),
        None => sqlx::query_as::<_, LogRow>(SELECT_LOGS_FROM_START).bind(limit),
    };
    query
        .fetch_all(pool)
        .await
        .map_err(|e| PipelineError::unreachable(SOURCE_NAME, e))
}

#[async_trait]
impl SourceAdapter for AccessControlAdapter {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn service(&self) -> ServiceType {
        ServiceType::AccessControl
    }

    fn configured(&self, settings: &SourceSettings) -> bool {
        settings.access_control.database_url.is_some()
    }

    fn interval(&self, settings: &SourceSettings) -> Duration {
        settings.access_control.interval
    }

    async fn fetch(
        &self,
        cursor: &PollCursor,
        settings: &SourceSettings,
    ) -> Result<SourceBatch, PipelineError> {
        let pool = self.pool(settings).await?;

        let mut devices = fetch_devices(&pool, SELECT_CONTROLLERS, DeviceType::Controller).await?;
        devices.extend(fetch_devices(&pool, SELECT_DOORS, DeviceType::Door).await?);
        devices.extend(fetch_devices(&pool, SELECT_READERS, DeviceType::Reader).await?);

        let batch_size = settings.access_control.batch_size.max(1);
        let rows = fetch_logs(&pool, cursor.position, batch_size).await?;
        if rows.len() >= batch_size as usize {
            tracing::debug!(batch_size, "log batch full, more rows pending");
        }
        let records = rows.into_iter().map(RawLogRecord::from).collect();

        Ok(SourceBatch { devices, records })
    }
}
