//! Postgres-backed document store. Documents live in a single `documents`
//! table as JSONB rows keyed by path; `transact` is an optimistic
//! compare-and-swap on the observed row value.

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::Row;
use uuid::Uuid;

use crate::{CollectionPath, DocPath, Document, Store, TransactFn, Transacted};

/// Attempts before a conflicting compare-and-swap gives up.
const MAX_CAS_ATTEMPTS: u32 = 10;
/// Base of the linear backoff between attempts.
const CAS_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> anyhow::Result<PgStore> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await
            .context("opening document store")?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                path TEXT PRIMARY KEY,
                parent TEXT NOT NULL,
                data JSONB NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .context("creating documents table")?;
        sqlx::query("CREATE INDEX IF NOT EXISTS documents_parent_idx ON documents (parent)")
            .execute(&pool)
            .await
            .context("indexing documents by parent")?;
        Ok(PgStore { pool })
    }

    pub fn num_idle(&self) -> usize {
        self.pool.num_idle()
    }
}

fn fields_of(data: serde_json::Value) -> anyhow::Result<Document> {
    match data {
        serde_json::Value::Object(fields) => Ok(fields),
        other => Err(anyhow!("data column is not a JSON object: {other}")),
    }
}

fn id_of(path: &str) -> anyhow::Result<Uuid> {
    let id = path.rsplit_once('/').map(|(_, id)| id).unwrap_or(path);
    id.parse()
        .with_context(|| format!("document id of {path:?} is not a uuid"))
}

#[async_trait]
impl Store for PgStore {
    async fn get(&self, doc: &DocPath) -> anyhow::Result<Option<Document>> {
        sqlx::query("SELECT data FROM documents WHERE path = $1")
            .bind(doc.as_str())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("fetching {doc}"))?
            .map(|row| {
                let data = row.try_get("data").context("decoding data column")?;
                fields_of(data)
            })
            .transpose()
    }

    async fn set(&self, doc: &DocPath, fields: Document, merge: bool) -> anyhow::Result<()> {
        // `||` on JSONB is a shallow field merge, exactly the gateway's
        // merge semantics.
        let sql = if merge {
            "INSERT INTO documents (path, parent, data) VALUES ($1, $2, $3)
             ON CONFLICT (path) DO UPDATE SET data = documents.data || EXCLUDED.data"
        } else {
            "INSERT INTO documents (path, parent, data) VALUES ($1, $2, $3)
             ON CONFLICT (path) DO UPDATE SET data = EXCLUDED.data"
        };
        sqlx::query(sql)
            .bind(doc.as_str())
            .bind(doc.parent())
            .bind(serde_json::Value::Object(fields))
            .execute(&self.pool)
            .await
            .with_context(|| format!("writing {doc}"))?;
        Ok(())
    }

    async fn update(&self, doc: &DocPath, fields: Document) -> anyhow::Result<()> {
        let updated = sqlx::query("UPDATE documents SET data = data || $2 WHERE path = $1")
            .bind(doc.as_str())
            .bind(serde_json::Value::Object(fields))
            .execute(&self.pool)
            .await
            .with_context(|| format!("updating {doc}"))?;
        if updated.rows_affected() == 0 {
            bail!("updating {doc}: document does not exist");
        }
        Ok(())
    }

    async fn add(&self, collection: &CollectionPath, fields: Document) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        let doc = collection.doc(id);
        sqlx::query("INSERT INTO documents (path, parent, data) VALUES ($1, $2, $3)")
            .bind(doc.as_str())
            .bind(collection.as_str())
            .bind(serde_json::Value::Object(fields))
            .execute(&self.pool)
            .await
            .with_context(|| format!("adding document to {collection}"))?;
        Ok(id)
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        order_by: Option<&str>,
    ) -> anyhow::Result<Vec<(Uuid, Document)>> {
        // JSONB comparison orders numbers numerically and strings by
        // collation, which covers both rating and timestamp fields.
        let rows = match order_by {
            Some(field) => {
                sqlx::query(
                    "SELECT path, data FROM documents WHERE parent = $1 ORDER BY data -> $2",
                )
                .bind(collection.as_str())
                .bind(field)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT path, data FROM documents WHERE parent = $1 ORDER BY path")
                    .bind(collection.as_str())
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .with_context(|| format!("listing {collection}"))?;
        rows.into_iter()
            .map(|row| {
                let path: String = row.try_get("path").context("decoding path column")?;
                let data = row.try_get("data").context("decoding data column")?;
                Ok((id_of(&path)?, fields_of(data)?))
            })
            .collect()
    }

    async fn transact(&self, doc: &DocPath, apply: TransactFn<'_>) -> anyhow::Result<Transacted> {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(CAS_BACKOFF * attempt).await;
            }
            let before = self.get(doc).await?;
            let after = apply(before.as_ref())?;
            let swapped = match &before {
                None => {
                    sqlx::query(
                        "INSERT INTO documents (path, parent, data) VALUES ($1, $2, $3)
                         ON CONFLICT (path) DO NOTHING",
                    )
                    .bind(doc.as_str())
                    .bind(doc.parent())
                    .bind(serde_json::Value::Object(after.clone()))
                    .execute(&self.pool)
                    .await
                }
                Some(observed) => {
                    sqlx::query("UPDATE documents SET data = $3 WHERE path = $1 AND data = $2")
                        .bind(doc.as_str())
                        .bind(serde_json::Value::Object(observed.clone()))
                        .bind(serde_json::Value::Object(after.clone()))
                        .execute(&self.pool)
                        .await
                }
            }
            .with_context(|| format!("swapping {doc}"))?;
            if swapped.rows_affected() == 1 {
                return Ok(Transacted { before, after });
            }
            tracing::debug!(%doc, attempt, "lost the compare-and-swap, retrying");
        }
        Err(anyhow!(
            "transact on {doc} kept conflicting after {MAX_CAS_ATTEMPTS} attempts"
        ))
    }
}
