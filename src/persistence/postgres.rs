//! PostgreSQL implementation of the persistence layer.
//!
//! Every statement is a fixed, parameterized shape. Upserts use
//! `ON CONFLICT ... DO UPDATE ... WHERE ... IS DISTINCT FROM ...` so that a
//! no-op poll writes nothing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::FacilityStore;
use super::models::{
    CommitBatch, CommitOutcome, CursorRow, DeviceRow, DeviceWrite, EventOutcome, EventTypeRow,
    SnapshotRequest, StoreSnapshot,
};
use crate::config::GatewayConfig;
use crate::domain::{
    CursorPosition, Device, DeviceKey, EventId, EventTypeConfig, NewEvent, PollCursor,
    ServiceType,
};
use crate::error::PipelineError;

const SELECT_DEVICES: &str = "\
    SELECT d.device_id, d.device_type, d.name, d.ip, d.service, \
           d.map_building, d.map_floor, d.map_x, d.map_y, \
           d.outside_area, d.inside_area, d.linked_status, d.is_lock, \
           d.alarm_status, d.camera_id \
    FROM devices d \
    JOIN UNNEST($1::text[], $2::text[]) AS k(device_id, device_type) \
      ON d.device_id = k.device_id AND d.device_type = k.device_type";

const SELECT_EVENT_TYPES: &str = "\
    SELECT id, name, severity, enabled, use_sop, workflow_index, use_popup, \
           service, sms_recipients \
    FROM event_types";

const SELECT_OPEN_CORRELATIONS: &str = "\
    SELECT DISTINCT ON (e.device_id, e.device_type, e.event_type_id) \
           e.device_id, e.device_type, e.event_type_id, e.correlation_key \
    FROM events e \
    JOIN UNNEST($1::text[], $2::text[]) AS k(device_id, device_type) \
      ON e.device_id = k.device_id AND e.device_type = k.device_type \
    WHERE e.correlation_key IS NOT NULL AND e.ended_at IS NULL \
    ORDER BY e.device_id, e.device_type, e.event_type_id, e.occurred_at DESC";

const UPSERT_DEVICE: &str = "\
    INSERT INTO devices (device_id, device_type, name, ip, service, linked_status, is_lock) \
    VALUES ($1, $2, $3, $4, $5, $6, $7) \
    ON CONFLICT (device_id, device_type) DO UPDATE \
    SET name = EXCLUDED.name, ip = EXCLUDED.ip, \
        linked_status = EXCLUDED.linked_status, is_lock = EXCLUDED.is_lock \
    WHERE (devices.name, devices.ip, devices.linked_status, devices.is_lock) \
          IS DISTINCT FROM \
          (EXCLUDED.name, EXCLUDED.ip, EXCLUDED.linked_status, EXCLUDED.is_lock)";

const UPSERT_EVENT: &str = "\
    INSERT INTO events (name, description, location, device_id, device_type, event_type_id, \
                        occurred_at, ended_at, severity, correlation_key) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
    ON CONFLICT (correlation_key) WHERE correlation_key IS NOT NULL DO UPDATE \
    SET description = EXCLUDED.description, \
        ended_at = COALESCE(EXCLUDED.ended_at, events.ended_at) \
    WHERE (events.description, events.ended_at) \
          IS DISTINCT FROM \
          (EXCLUDED.description, COALESCE(EXCLUDED.ended_at, events.ended_at)) \
    RETURNING id, (xmax = 0) AS created";

const DERIVE_ALARMS: &str = "\
    WITH derived AS ( \
        SELECT d.device_id, d.device_type, EXISTS ( \
            SELECT 1 FROM events e \
            JOIN event_types t ON t.id = e.event_type_id \
            WHERE e.device_id = d.device_id AND e.device_type = d.device_type \
              AND NOT e.acknowledged AND t.enabled AND e.occurred_at >= $2 \
        ) AS alarm \
        FROM devices d WHERE d.service = $1 \
    ) \
    UPDATE devices SET alarm_status = derived.alarm \
    FROM derived \
    WHERE devices.device_id = derived.device_id \
      AND devices.device_type = derived.device_type \
      AND devices.alarm_status IS DISTINCT FROM derived.alarm";

const ADVANCE_CURSOR: &str = "\
    INSERT INTO poll_cursors (source, last_date, last_time, last_index, updated_at) \
    VALUES ($1, $2, $3, $4, $5) \
    ON CONFLICT (source) DO UPDATE \
    SET last_date = EXCLUDED.last_date, last_time = EXCLUDED.last_time, \
        last_index = EXCLUDED.last_index, updated_at = EXCLUDED.updated_at \
    WHERE (poll_cursors.last_date, poll_cursors.last_time, poll_cursors.last_index) \
          < (EXCLUDED.last_date, EXCLUDED.last_time, EXCLUDED.last_index)";

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects with the configured pool sizing and applies migrations.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persistence`] if the database is unreachable
    /// or a migration fails.
    pub async fn connect(config: &GatewayConfig) -> Result<Self, PipelineError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        tracing::info!("postgres store ready");
        Ok(Self::new(pool))
    }
}

fn key_columns(keys: &[DeviceKey]) -> (Vec<String>, Vec<String>) {
    keys.iter()
        .map(|k| (k.device_id.clone(), k.device_type.as_str().to_string()))
        .unzip()
}

fn parse_key(device_id: String, device_type: &str) -> Result<DeviceKey, PipelineError> {
    let device_type = device_type.parse().map_err(PipelineError::Persistence)?;
    Ok(DeviceKey::new(device_id, device_type))
}

async fn upsert_device(
    tx: &mut sqlx::PgConnection,
    write: &DeviceWrite,
) -> Result<bool, PipelineError> {
    let result = sqlx::query(UPSERT_DEVICE)
        .bind(&write.key.device_id)
        .bind(write.key.device_type.as_str())
        .bind(&write.name)
        .bind(&write.ip)
        .bind(write.service.as_str())
        .bind(write.linked_status)
        .bind(write.is_lock)
        .execute(tx)
        .await?;
    Ok(result.rows_affected() > 0)
}

async fn upsert_event(
    tx: &mut sqlx::PgConnection,
    event: &NewEvent,
) -> Result<EventOutcome, PipelineError> {
    let row = sqlx::query_as::<_, (i64, bool)>(UPSERT_EVENT)
        .bind(&event.name)
        .bind(&event.description)
        .bind(&event.location)
        .bind(&event.device.device_id)
        .bind(event.device.device_type.as_str())
        .bind(event.event_type_id)
        .bind(event.occurred_at)
        .bind(event.ended_at)
        .bind(event.severity)
        .bind(&event.correlation_key)
        .fetch_optional(tx)
        .await?;

    Ok(match row {
        Some((id, true)) => EventOutcome::Created(EventId::new(id)),
        Some((id, false)) => EventOutcome::Updated(EventId::new(id)),
        None => EventOutcome::Unchanged,
    })
}

async fn advance_cursor(
    tx: &mut sqlx::PgConnection,
    source: &str,
    position: CursorPosition,
    at: chrono::DateTime<chrono::Utc>,
) -> Result<(), PipelineError> {
    sqlx::query(ADVANCE_CURSOR)
        .bind(source)
        .bind(position.date)
        .bind(position.time)
        .bind(position.index)
        .bind(at)
        .execute(tx)
        .await?;
    Ok(())
}

#[async_trait]
impl FacilityStore for PostgresStore {
    async fn load_cursor(&self, source: &str) -> Result<PollCursor, PipelineError> {
        let row = sqlx::query_as::<_, CursorRow>(
            "SELECT last_date, last_time, last_index, updated_at FROM poll_cursors WHERE source = $1",
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => PollCursor {
                source: source.to_string(),
                position: Some(CursorPosition::new(r.last_date, r.last_time, r.last_index)),
                updated_at: Some(r.updated_at),
            },
            None => PollCursor::empty(source),
        })
    }

    async fn load_snapshot(
        &self,
        request: &SnapshotRequest,
    ) -> Result<StoreSnapshot, PipelineError> {
        let (ids, types) = key_columns(&request.device_keys);

        let device_rows = sqlx::query_as::<_, DeviceRow>(SELECT_DEVICES)
            .bind(&ids)
            .bind(&types)
            .fetch_all(&self.pool)
            .await?;
        let mut devices = HashMap::with_capacity(device_rows.len());
        for row in device_rows {
            let device = Device::try_from(row).map_err(PipelineError::Persistence)?;
            devices.insert(device.key.clone(), device);
        }

        let type_rows = sqlx::query_as::<_, EventTypeRow>(SELECT_EVENT_TYPES)
            .fetch_all(&self.pool)
            .await?;
        let mut event_types = HashMap::with_capacity(type_rows.len());
        for row in type_rows {
            let config = EventTypeConfig::try_from(row).map_err(PipelineError::Persistence)?;
            event_types.insert(config.id, config);
        }

        let service_rows =
            sqlx::query_as::<_, (String, bool)>("SELECT service, enabled FROM services")
                .fetch_all(&self.pool)
                .await?;
        let mut services = HashMap::with_capacity(service_rows.len());
        for (service, enabled) in service_rows {
            match service.parse::<ServiceType>() {
                Ok(s) => {
                    services.insert(s, enabled);
                }
                Err(e) => tracing::warn!(error = %e, "ignoring unknown service row"),
            }
        }

        let open_rows = sqlx::query_as::<_, (String, String, i32, String)>(SELECT_OPEN_CORRELATIONS)
            .bind(&ids)
            .bind(&types)
            .fetch_all(&self.pool)
            .await?;
        let mut open_correlations = HashMap::with_capacity(open_rows.len());
        for (device_id, device_type, event_type_id, key) in open_rows {
            open_correlations.insert((parse_key(device_id, &device_type)?, event_type_id), key);
        }

        Ok(StoreSnapshot {
            devices,
            event_types,
            services,
            open_correlations,
        })
    }

    async fn commit(&self, batch: CommitBatch) -> Result<CommitOutcome, PipelineError> {
        let mut tx = self.pool.begin().await?;

        let mut devices_written = 0;
        for write in &batch.devices {
            if upsert_device(&mut tx, write).await? {
                devices_written += 1;
            }
        }

        let mut events = Vec::with_capacity(batch.events.len());
        for event in &batch.events {
            events.push(upsert_event(&mut tx, event).await?);
        }

        let flipped = sqlx::query(DERIVE_ALARMS)
            .bind(batch.service.as_str())
            .bind(batch.alarm_since)
            .execute(&mut *tx)
            .await?;

        if let Some(position) = batch.cursor {
            advance_cursor(&mut tx, &batch.source, position, batch.committed_at).await?;
        }

        // dropping `tx` on any `?` above rolls the whole batch back
        tx.commit().await?;

        Ok(CommitOutcome {
            events,
            devices_written,
            alarm_flips: usize::try_from(flipped.rows_affected()).unwrap_or(usize::MAX),
        })
    }
}
