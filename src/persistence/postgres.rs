//! PostgreSQL storage backend.

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

use crate::config::DatabaseConfig;

use super::backend::StorageBackend;
use super::error::Result;
use super::models::StoredMessage;

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY,
    destination TEXT NOT NULL,
    priority    INTEGER NOT NULL,
    ts          TIMESTAMPTZ NOT NULL,
    body        BYTEA NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_destination_idx
    ON messages (destination, priority, ts);
";

/// Durable message store backed by a PostgreSQL table.
pub struct PostgresBackend {
    client: Client,
}

impl PostgresBackend {
    /// Connect and bootstrap the message table.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        let mut pg = tokio_postgres::Config::new();
        if let Some(dir) = &cfg.sockdir {
            pg.host_path(dir);
        } else if let Some(host) = &cfg.host {
            pg.host(host);
        }
        pg.port(cfg.port);
        pg.dbname(&cfg.database);
        if let Some(user) = &cfg.user {
            pg.user(user);
        }
        if let Some(password) = &cfg.password {
            pg.password(password);
        }

        let (client, connection) = pg.connect(NoTls).await?;
        // The connection object drives the socket; it runs until the client
        // is dropped.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("postgres connection error: {}", e);
            }
        });

        client.batch_execute(SCHEMA).await?;
        info!("connected to postgres database {}", cfg.database);
        Ok(Self { client })
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    async fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO messages (id, destination, priority, ts, body) \
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &message.id,
                    &message.destination,
                    &message.priority,
                    &message.timestamp,
                    &message.body,
                ],
            )
            .await?;
        Ok(())
    }

    async fn fetch_messages_for_destination(
        &self,
        destination: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        // Single-statement consume; DELETE .. RETURNING does not guarantee
        // row order, so the replay order is restored client-side.
        let rows = self
            .client
            .query(
                "DELETE FROM messages
                 WHERE id IN (
                     SELECT id FROM messages
                     WHERE destination = $1
                     ORDER BY priority ASC, ts ASC
                     LIMIT $2
                 )
                 RETURNING id, destination, ts, priority, body",
                &[&destination, &(limit as i64)],
            )
            .await?;

        let mut messages: Vec<StoredMessage> = rows
            .iter()
            .map(|row| StoredMessage {
                id: row.get(0),
                destination: row.get(1),
                timestamp: row.get(2),
                priority: row.get(3),
                body: row.get(4),
            })
            .collect();
        messages.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });
        Ok(messages)
    }
}
