//! SQLite-backed [`MetadataStore`].
//!
//! Content payloads are stored as JSON text and timestamps as RFC 3339 strings. The schema is
//! created idempotently on connect.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use super::{IndexClaim, MetadataStore, StoreError};
use crate::knowledge::{Agent, ContentItem, ContentPayload, KnowledgeSource};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS knowledge_sources (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        index_id TEXT,
        index_updated_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS content_items (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL REFERENCES knowledge_sources(id) ON DELETE CASCADE,
        payload TEXT NOT NULL,
        external_file_id TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        remote_id TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agent_sources (
        agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
        source_id TEXT NOT NULL REFERENCES knowledge_sources(id) ON DELETE CASCADE,
        PRIMARY KEY (agent_id, source_id)
    )
    "#,
];

/// Metadata store persisted in SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and ensure the schema exists.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to `:memory:` opens a distinct database.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(url, "Metadata store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|err| StoreError::Corrupt(format!("uuid '{value}': {err}")))
}

fn format_timestamp(at: OffsetDateTime) -> Result<String, StoreError> {
    at.format(&Rfc3339)
        .map_err(|err| StoreError::Corrupt(format!("timestamp: {err}")))
}

fn source_from_row(row: &SqliteRow) -> Result<KnowledgeSource, StoreError> {
    let id: String = row.try_get("id")?;
    let updated: Option<String> = row.try_get("index_updated_at")?;
    let index_updated_at = updated
        .map(|value| {
            OffsetDateTime::parse(&value, &Rfc3339)
                .map_err(|err| StoreError::Corrupt(format!("timestamp '{value}': {err}")))
        })
        .transpose()?;
    Ok(KnowledgeSource {
        id: parse_uuid(&id)?,
        name: row.try_get("name")?,
        index_id: row.try_get("index_id")?,
        index_updated_at,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<ContentItem, StoreError> {
    let id: String = row.try_get("id")?;
    let source_id: String = row.try_get("source_id")?;
    let payload: String = row.try_get("payload")?;
    Ok(ContentItem {
        id: parse_uuid(&id)?,
        source_id: parse_uuid(&source_id)?,
        payload: serde_json::from_str::<ContentPayload>(&payload)?,
        external_file_id: row.try_get("external_file_id")?,
    })
}

fn agent_from_row(row: &SqliteRow) -> Result<Agent, StoreError> {
    let id: String = row.try_get("id")?;
    Ok(Agent {
        id: parse_uuid(&id)?,
        name: row.try_get("name")?,
        remote_id: row.try_get("remote_id")?,
    })
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn insert_source(&self, source: &KnowledgeSource) -> Result<(), StoreError> {
        let updated = source
            .index_updated_at
            .map(format_timestamp)
            .transpose()?;
        sqlx::query(
            "INSERT INTO knowledge_sources (id, name, index_id, index_updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(source.id.to_string())
        .bind(&source.name)
        .bind(&source.index_id)
        .bind(updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<KnowledgeSource>, StoreError> {
        sqlx::query("SELECT * FROM knowledge_sources WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(source_from_row)
            .transpose()
    }

    async fn list_sources(&self) -> Result<Vec<KnowledgeSource>, StoreError> {
        sqlx::query("SELECT * FROM knowledge_sources ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(source_from_row)
            .collect()
    }

    async fn claim_index_id(
        &self,
        source_id: Uuid,
        index_id: &str,
    ) -> Result<IndexClaim, StoreError> {
        let result = sqlx::query(
            "UPDATE knowledge_sources SET index_id = ? WHERE id = ? AND index_id IS NULL",
        )
        .bind(index_id)
        .bind(source_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(IndexClaim::Claimed);
        }

        let existing: Option<Option<String>> =
            sqlx::query_scalar("SELECT index_id FROM knowledge_sources WHERE id = ?")
                .bind(source_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        match existing {
            Some(Some(existing)) => Ok(IndexClaim::Existing(existing)),
            Some(None) => Err(StoreError::Corrupt(format!(
                "index claim on source {source_id} neither applied nor visible"
            ))),
            None => Err(StoreError::NotFound {
                entity: "knowledge source",
                id: source_id,
            }),
        }
    }

    async fn touch_index_updated_at(
        &self,
        source_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE knowledge_sources SET index_updated_at = ? WHERE id = ?")
            .bind(format_timestamp(at)?)
            .bind(source_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "knowledge source",
                id: source_id,
            });
        }
        Ok(())
    }

    async fn delete_source(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM knowledge_sources WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_content_item(&self, item: &ContentItem) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&item.payload)?;
        let result = sqlx::query(
            r#"
            INSERT INTO content_items (id, source_id, payload, external_file_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_id = excluded.source_id,
                payload = excluded.payload,
                external_file_id = excluded.external_file_id
            "#,
        )
        .bind(item.id.to_string())
        .bind(item.source_id.to_string())
        .bind(payload)
        .bind(&item.external_file_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(StoreError::NotFound {
                    entity: "knowledge source",
                    id: item.source_id,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_content_item(&self, id: Uuid) -> Result<Option<ContentItem>, StoreError> {
        sqlx::query("SELECT * FROM content_items WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(item_from_row)
            .transpose()
    }

    async fn list_content_items(&self, source_id: Uuid) -> Result<Vec<ContentItem>, StoreError> {
        sqlx::query("SELECT * FROM content_items WHERE source_id = ? ORDER BY id")
            .bind(source_id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(item_from_row)
            .collect()
    }

    async fn set_external_file_id(
        &self,
        item_id: Uuid,
        file_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE content_items SET external_file_id = ? WHERE id = ?")
            .bind(file_id)
            .bind(item_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "content item",
                id: item_id,
            });
        }
        Ok(())
    }

    async fn delete_content_item(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM content_items WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO agents (id, name, remote_id) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, remote_id = excluded.remote_id
            "#,
        )
        .bind(agent.id.to_string())
        .bind(&agent.name)
        .bind(&agent.remote_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, StoreError> {
        sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(agent_from_row)
            .transpose()
    }

    async fn link_agent_source(&self, agent_id: Uuid, source_id: Uuid) -> Result<(), StoreError> {
        if self.get_agent(agent_id).await?.is_none() {
            return Err(StoreError::NotFound {
                entity: "agent",
                id: agent_id,
            });
        }
        if self.get_source(source_id).await?.is_none() {
            return Err(StoreError::NotFound {
                entity: "knowledge source",
                id: source_id,
            });
        }
        sqlx::query("INSERT OR IGNORE INTO agent_sources (agent_id, source_id) VALUES (?, ?)")
            .bind(agent_id.to_string())
            .bind(source_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn agents_for_source(&self, source_id: Uuid) -> Result<Vec<Agent>, StoreError> {
        sqlx::query(
            r#"
            SELECT a.id, a.name, a.remote_id
            FROM agents a
            JOIN agent_sources l ON l.agent_id = a.id
            WHERE l.source_id = ?
            ORDER BY a.name, a.id
            "#,
        )
        .bind(source_id.to_string())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(agent_from_row)
        .collect()
    }

    async fn sources_for_agent(&self, agent_id: Uuid) -> Result<Vec<KnowledgeSource>, StoreError> {
        sqlx::query(
            r#"
            SELECT s.id, s.name, s.index_id, s.index_updated_at
            FROM knowledge_sources s
            JOIN agent_sources l ON l.source_id = s.id
            WHERE l.agent_id = ?
            ORDER BY s.name, s.id
            "#,
        )
        .bind(agent_id.to_string())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(source_from_row)
        .collect()
    }
}
