//! Live update feed for the dashboard: one poller watches the `readings`
//! table and broadcasts each new row exactly once; any number of SSE
//! connections subscribe. Dropping a receiver releases the subscription,
//! so a closed dashboard tab cannot leak anything.

use crate::dto::ReadingRow;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::error;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct ReadingFeed {
    sender: broadcast::Sender<ReadingRow>,
}

impl ReadingFeed {
    pub fn start(pool: SqlitePool) -> Self {
        let (sender, _) = broadcast::channel(64);
        tokio::spawn(poll_new_rows(pool, sender.clone()));

        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReadingRow> {
        self.sender.subscribe()
    }
}

async fn poll_new_rows(pool: SqlitePool, sender: broadcast::Sender<ReadingRow>) {
    // Start at the live edge; history comes from the initial fetch instead.
    let mut last_id: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM readings")
        .fetch_one(&pool)
        .await
        .unwrap_or_else(|err| {
            error!("Error occurred while reading the feed position: {}", err);
            0
        });

    loop {
        let rows = sqlx::query_as::<_, ReadingRow>(
            "SELECT id, device_id, time, current, voltage, power, created_at
             FROM readings
             WHERE id > ?
             ORDER BY id ASC",
        )
        .bind(last_id)
        .fetch_all(&pool)
        .await;

        match rows {
            Ok(rows) => {
                for row in rows {
                    last_id = row.id;
                    // No receivers is fine; rows are simply dropped.
                    let _ = sender.send(row);
                }
            }
            Err(err) => {
                error!("Error occurred while fetching readings: {}", err);
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
