//! Durable, priority-ordered, size-bounded send queue. Backed
//! by SQLite through `sqlx`, following the runtime-checked query style
//! `agent-sql` uses against Postgres — we use `sqlx::query`/`query_as`
//! directly rather than the `query!` macro, since there is no live database
//! available at build time to check against.

mod schema;

use crate::error::Error;
use crate::packet::DataPacket;
use crate::prioritizer::DataPacketPrioritizer;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// One row of the durable queue. `packet_id` is assigned by
/// storage; `transaction_id` is `None` iff the row is free for reservation.
#[derive(Debug, Clone)]
pub struct QueuedPacketEntity {
    pub packet_id: i64,
    pub attributes_blob: Vec<u8>,
    pub content_blob: Vec<u8>,
    pub estimated_size: i64,
    pub created_at_millis: i64,
    pub expires_at_millis: i64,
    pub priority: i32,
    pub transaction_id: Option<String>,
}

impl QueuedPacketEntity {
    pub fn from_packet(
        packet: &DataPacket,
        content: &[u8],
        prioritizer: &dyn DataPacketPrioritizer,
    ) -> crate::Result<Self> {
        let now = now_millis();
        let attributes_blob = serde_json::to_vec(packet.attributes())
            .map_err(|e| Error::DatabaseWrite(sqlx::Error::Decode(Box::new(e))))?;
        let ttl_millis = prioritizer.ttl(packet).as_millis() as i64;

        Ok(Self {
            packet_id: 0,
            attributes_blob,
            content_blob: content.to_vec(),
            estimated_size: (content.len() as i64) + (attributes_blob_len(packet)),
            created_at_millis: now,
            expires_at_millis: now + ttl_millis,
            priority: prioritizer.priority(packet),
            transaction_id: None,
        })
    }

    pub fn attributes(&self) -> crate::Result<BTreeMap<String, String>> {
        serde_json::from_slice(&self.attributes_blob)
            .map_err(|e| Error::DatabaseRead(sqlx::Error::Decode(Box::new(e))))
    }
}

fn attributes_blob_len(packet: &DataPacket) -> i64 {
    packet
        .attributes()
        .iter()
        .map(|(k, v)| (k.len() + v.len()) as i64)
        .sum()
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Default limits.
pub const DEFAULT_MAX_QUEUED_PACKET_COUNT: i64 = 10_000;
pub const DEFAULT_MAX_QUEUED_PACKET_SIZE: i64 = 100 * 1024 * 1024;

pub struct Queue {
    pool: SqlitePool,
    max_count: i64,
    max_size: i64,
}

impl Queue {
    /// Opens (creating if needed) the queue's schema, and resets any
    /// reservations left over from a prior process.
    pub async fn open(pool: SqlitePool) -> crate::Result<Self> {
        sqlx::query(schema::CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(Error::DatabaseWrite)?;
        sqlx::query(schema::CREATE_INDEX_PRIORITY)
            .execute(&pool)
            .await
            .map_err(Error::DatabaseWrite)?;
        sqlx::query(schema::CREATE_INDEX_TRANSACTION)
            .execute(&pool)
            .await
            .map_err(Error::DatabaseWrite)?;
        sqlx::query(schema::CREATE_INDEX_EXPIRES)
            .execute(&pool)
            .await
            .map_err(Error::DatabaseWrite)?;
        sqlx::query(schema::RESET_RESERVATIONS_ON_STARTUP)
            .execute(&pool)
            .await
            .map_err(Error::DatabaseWrite)?;

        Ok(Self {
            pool,
            max_count: DEFAULT_MAX_QUEUED_PACKET_COUNT,
            max_size: DEFAULT_MAX_QUEUED_PACKET_SIZE,
        })
    }

    pub fn with_limits(mut self, max_count: i64, max_size: i64) -> Self {
        self.max_count = max_count;
        self.max_size = max_size;
        self
    }

    /// Single-entity convenience wrapper over `insert_many`.
    pub async fn insert(&self, entity: QueuedPacketEntity) -> crate::Result<()> {
        self.insert_many(vec![entity]).await
    }

    /// Rejects the whole request when `count >= max_queued_packet_count` or
    /// `sum_size + estimated_size > max_queued_packet_size`, unless the
    /// request holds multiple entities — in which case as many as fit are
    /// committed, in order, and `QueueFull` is still reported.
    pub async fn insert_many(&self, entities: Vec<QueuedPacketEntity>) -> crate::Result<()> {
        if entities.is_empty() {
            return Ok(());
        }

        let mut count = self.count().await?;
        let mut size = self.sum_size().await?;

        let mut tx = self.pool.begin().await.map_err(Error::DatabaseTransaction)?;
        let mut inserted = 0usize;
        let mut was_full = false;

        for entity in &entities {
            if count >= self.max_count || size + entity.estimated_size > self.max_size {
                was_full = true;
                break;
            }

            sqlx::query(
                r#"
                INSERT INTO queued_packets
                    (attributes_blob, content_blob, estimated_size, created_at_millis,
                     expires_at_millis, priority, transaction_id)
                VALUES (?, ?, ?, ?, ?, ?, NULL)
                "#,
            )
            .bind(&entity.attributes_blob)
            .bind(&entity.content_blob)
            .bind(entity.estimated_size)
            .bind(entity.created_at_millis)
            .bind(entity.expires_at_millis)
            .bind(entity.priority)
            .execute(&mut *tx)
            .await
            .map_err(Error::DatabaseWrite)?;

            count += 1;
            size += entity.estimated_size;
            inserted += 1;
        }

        tx.commit().await.map_err(Error::DatabaseTransaction)?;

        if was_full || inserted < entities.len() {
            tracing::warn!(inserted, requested = entities.len(), "queue full, partial insert");
            Err(Error::QueueFull)
        } else {
            Ok(())
        }
    }

    /// Atomically reserves up to `count_limit` rows (0 = unbounded) whose
    /// running `estimated_size` stays within `byte_limit` (0 = unbounded),
    /// ordered `(priority, created_at_millis, packet_id)` ascending among
    /// free rows. At least one row is taken if any free row exists.
    pub async fn create_batch(
        &self,
        tx_id: &str,
        count_limit: i64,
        byte_limit: i64,
    ) -> crate::Result<Vec<QueuedPacketEntity>> {
        let mut tx = self.pool.begin().await.map_err(Error::DatabaseTransaction)?;

        let rows = sqlx::query(
            r#"
            SELECT packet_id, attributes_blob, content_blob, estimated_size,
                   created_at_millis, expires_at_millis, priority, transaction_id
            FROM queued_packets
            WHERE transaction_id IS NULL
            ORDER BY priority ASC, created_at_millis ASC, packet_id ASC
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::DatabaseRead)?;

        let mut selected = Vec::new();
        let mut running_size: i64 = 0;

        for row in rows {
            let estimated_size: i64 = row.try_get("estimated_size").map_err(Error::DatabaseRead)?;

            if count_limit > 0 && selected.len() as i64 >= count_limit {
                break;
            }
            if byte_limit > 0 && !selected.is_empty() && running_size + estimated_size > byte_limit {
                break;
            }

            selected.push(row_to_entity(&row)?);
            running_size += estimated_size;
        }

        for entity in &selected {
            sqlx::query("UPDATE queued_packets SET transaction_id = ? WHERE packet_id = ?")
                .bind(tx_id)
                .bind(entity.packet_id)
                .execute(&mut *tx)
                .await
                .map_err(Error::DatabaseWrite)?;
        }

        tx.commit().await.map_err(Error::DatabaseTransaction)?;

        Ok(selected
            .into_iter()
            .map(|mut e| {
                e.transaction_id = Some(tx_id.to_string());
                e
            })
            .collect())
    }

    pub async fn get_packets(&self, tx_id: &str) -> crate::Result<Vec<QueuedPacketEntity>> {
        let rows = sqlx::query(
            r#"
            SELECT packet_id, attributes_blob, content_blob, estimated_size,
                   created_at_millis, expires_at_millis, priority, transaction_id
            FROM queued_packets
            WHERE transaction_id = ?
            ORDER BY priority ASC, created_at_millis ASC, packet_id ASC
            "#,
        )
        .bind(tx_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseRead)?;

        rows.iter().map(row_to_entity).collect()
    }

    pub async fn delete(&self, tx_id: &str) -> crate::Result<()> {
        sqlx::query("DELETE FROM queued_packets WHERE transaction_id = ?")
            .bind(tx_id)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseWrite)?;
        Ok(())
    }

    /// Re-opens every row under `tx_id` for future batches, restoring them
    /// to the priority position they held before reservation — the
    /// ordering key is unchanged by reservation.
    pub async fn mark_for_retry(&self, tx_id: &str) -> crate::Result<()> {
        sqlx::query("UPDATE queued_packets SET transaction_id = NULL WHERE transaction_id = ?")
            .bind(tx_id)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseWrite)?;
        Ok(())
    }

    pub async fn age_off_expired(&self) -> crate::Result<u64> {
        let now = now_millis();
        let result = sqlx::query("DELETE FROM queued_packets WHERE expires_at_millis <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseWrite)?;
        Ok(result.rows_affected())
    }

    /// Keeps the top-priority `k` rows, deleting the remainder.
    pub async fn truncate_max_rows(&self, k: i64) -> crate::Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM queued_packets
            WHERE packet_id NOT IN (
                SELECT packet_id FROM queued_packets
                ORDER BY priority ASC, created_at_millis ASC, packet_id ASC
                LIMIT ?
            )
            "#,
        )
        .bind(k)
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseWrite)?;
        Ok(result.rows_affected())
    }

    /// Keeps the priority-minimal prefix whose summed `estimated_size`
    /// stays within `b`, deleting the remainder.
    pub async fn truncate_max_bytes(&self, b: i64) -> crate::Result<u64> {
        let rows = sqlx::query(
            r#"
            SELECT packet_id, estimated_size FROM queued_packets
            ORDER BY priority ASC, created_at_millis ASC, packet_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseRead)?;

        let mut running = 0i64;
        let mut keep = Vec::new();
        for row in &rows {
            let size: i64 = row.try_get("estimated_size").map_err(Error::DatabaseRead)?;
            if !keep.is_empty() && running + size > b {
                break;
            }
            running += size;
            keep.push(row.try_get::<i64, _>("packet_id").map_err(Error::DatabaseRead)?);
        }

        let to_delete: Vec<i64> = rows
            .iter()
            .map(|r| r.try_get::<i64, _>("packet_id"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(Error::DatabaseRead)?
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();

        if to_delete.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(Error::DatabaseTransaction)?;
        for id in &to_delete {
            sqlx::query("DELETE FROM queued_packets WHERE packet_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(Error::DatabaseWrite)?;
        }
        tx.commit().await.map_err(Error::DatabaseTransaction)?;

        Ok(to_delete.len() as u64)
    }

    pub async fn count(&self) -> crate::Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM queued_packets")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::DatabaseRead)?;
        row.try_get("n").map_err(Error::DatabaseRead)
    }

    pub async fn sum_size(&self) -> crate::Result<i64> {
        let row = sqlx::query("SELECT COALESCE(SUM(estimated_size), 0) AS n FROM queued_packets")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::DatabaseRead)?;
        row.try_get("n").map_err(Error::DatabaseRead)
    }

    pub async fn average_size(&self) -> crate::Result<f64> {
        let count = self.count().await?;
        if count == 0 {
            return Ok(0.0);
        }
        let sum = self.sum_size().await?;
        Ok(sum as f64 / count as f64)
    }
}

fn row_to_entity(row: &sqlx::sqlite::SqliteRow) -> crate::Result<QueuedPacketEntity> {
    Ok(QueuedPacketEntity {
        packet_id: row.try_get("packet_id").map_err(Error::DatabaseRead)?,
        attributes_blob: row.try_get("attributes_blob").map_err(Error::DatabaseRead)?,
        content_blob: row.try_get("content_blob").map_err(Error::DatabaseRead)?,
        estimated_size: row.try_get("estimated_size").map_err(Error::DatabaseRead)?,
        created_at_millis: row.try_get("created_at_millis").map_err(Error::DatabaseRead)?,
        expires_at_millis: row.try_get("expires_at_millis").map_err(Error::DatabaseRead)?,
        priority: row.try_get("priority").map_err(Error::DatabaseRead)?,
        transaction_id: row.try_get("transaction_id").map_err(Error::DatabaseRead)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prioritizer::DefaultPrioritizer;
    use std::collections::BTreeMap;

    async fn open_memory_pool() -> SqlitePool {
        // A single-connection pool so that all queries see the same
        // `:memory:` database instead of each pooled connection getting its
        // own private, empty one.
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap()
    }

    async fn open_memory_queue() -> Queue {
        Queue::open(open_memory_pool().await).await.unwrap()
    }

    fn entity(priority: i32, size: i64) -> QueuedPacketEntity {
        let mut attrs = BTreeMap::new();
        attrs.insert("k".to_string(), "v".to_string());
        let packet = DataPacket::with_bytes(attrs, vec![0u8; size as usize]);
        let mut e = QueuedPacketEntity::from_packet(&packet, &vec![0u8; size as usize], &DefaultPrioritizer)
            .unwrap();
        e.priority = priority;
        e.expires_at_millis = now_millis() + 60_000;
        e
    }

    #[tokio::test]
    async fn create_batch_respects_count_and_byte_limits_and_ordering() {
        let queue = open_memory_queue().await;
        queue.insert(entity(2, 10)).await.unwrap();
        queue.insert(entity(1, 10)).await.unwrap();
        queue.insert(entity(0, 10)).await.unwrap();

        let batch = queue.create_batch("tx1", 2, 0).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].priority, 0);
        assert_eq!(batch[1].priority, 1);
    }

    #[tokio::test]
    async fn create_batch_zero_zero_reserves_all_free_rows() {
        let queue = open_memory_queue().await;
        for _ in 0..5 {
            queue.insert(entity(0, 5)).await.unwrap();
        }
        let batch = queue.create_batch("tx1", 0, 0).await.unwrap();
        assert_eq!(batch.len(), 5);
    }

    #[tokio::test]
    async fn mark_for_retry_reopens_rows_in_original_priority_position() {
        let queue = open_memory_queue().await;
        queue.insert(entity(0, 5)).await.unwrap();
        queue.insert(entity(1, 5)).await.unwrap();

        let first_batch = queue.create_batch("tx1", 1, 0).await.unwrap();
        assert_eq!(first_batch.len(), 1);
        assert_eq!(first_batch[0].priority, 0);

        queue.mark_for_retry("tx1").await.unwrap();

        let second_batch = queue.create_batch("tx2", 1, 0).await.unwrap();
        assert_eq!(second_batch[0].priority, 0);
        assert_eq!(second_batch[0].packet_id, first_batch[0].packet_id);
    }

    #[tokio::test]
    async fn process_success_decreases_count_by_batch_size() {
        let queue = open_memory_queue().await;
        for _ in 0..3 {
            queue.insert(entity(0, 5)).await.unwrap();
        }
        let batch = queue.create_batch("tx1", 2, 0).await.unwrap();
        queue.delete("tx1").await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 3 - batch.len() as i64);
    }

    #[tokio::test]
    async fn truncate_max_rows_keeps_priority_minimal_survivors() {
        let queue = open_memory_queue().await;
        queue.insert(entity(2, 5)).await.unwrap();
        queue.insert(entity(0, 5)).await.unwrap();
        queue.insert(entity(1, 5)).await.unwrap();

        queue.truncate_max_rows(2).await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 2);

        let remaining = queue.create_batch("tx1", 0, 0).await.unwrap();
        assert_eq!(remaining[0].priority, 0);
        assert_eq!(remaining[1].priority, 1);
    }

    #[tokio::test]
    async fn restart_recovery_reopens_all_rows() {
        let pool = open_memory_pool().await;
        let queue = Queue::open(pool.clone()).await.unwrap();
        for _ in 0..10 {
            queue.insert(entity(0, 1)).await.unwrap();
        }
        queue.create_batch("tx1", 5, 0).await.unwrap();

        // Simulate a process restart against the same backing store.
        let restarted = Queue::open(pool).await.unwrap();
        assert_eq!(restarted.count().await.unwrap(), 10);
        let batch = restarted.create_batch("tx2", 0, 0).await.unwrap();
        assert_eq!(batch.len(), 10);
    }
}
