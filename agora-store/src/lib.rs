//! Contract of the document store every domain operation runs against.
//!
//! Documents are JSON objects addressed by slash-separated paths, grouped in
//! collections (`forums/<id>`, `forums/<id>/comments/<id>`). The server only
//! ever sees `&dyn Store`, so tests can swap the Postgres backend for an
//! in-memory one.

use std::fmt;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use uuid::Uuid;

pub mod pg;

pub use pg::PgStore;

pub type Document = serde_json::Map<String, serde_json::Value>;

/// Closure applied inside [`Store::transact`]: current value of the document
/// (`None` when absent) to the value to store. Must be pure, it can run more
/// than once.
pub type TransactFn<'a> =
    &'a (dyn Fn(Option<&Document>) -> anyhow::Result<Document> + Send + Sync);

/// Result of a [`Store::transact`] call.
#[derive(Clone, Debug)]
pub struct Transacted {
    /// Value the closure observed; this is what the write actually replaced.
    pub before: Option<Document>,
    /// Value durably written.
    pub after: Document,
}

/// Path of a collection of documents, e.g. `forums/<id>/comments`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CollectionPath(String);

/// Path of a single document, e.g. `forums/<id>`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DocPath(String);

impl CollectionPath {
    pub fn root(name: &str) -> CollectionPath {
        CollectionPath(String::from(name))
    }

    pub fn doc(&self, id: Uuid) -> DocPath {
        DocPath(format!("{}/{}", self.0, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl DocPath {
    pub fn collection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}", self.0, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path of the collection this document lives in.
    pub fn parent(&self) -> &str {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => parent,
            None => "",
        }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch one document, `None` when absent.
    async fn get(&self, doc: &DocPath) -> anyhow::Result<Option<Document>>;

    /// Write `fields` at `doc`, creating the document when absent. With
    /// `merge`, existing fields not named in `fields` survive; without it
    /// the document is replaced.
    async fn set(&self, doc: &DocPath, fields: Document, merge: bool) -> anyhow::Result<()>;

    /// Merge `fields` into an existing document; fails when absent.
    async fn update(&self, doc: &DocPath, fields: Document) -> anyhow::Result<()>;

    /// Create a document with a store-assigned id.
    async fn add(&self, collection: &CollectionPath, fields: Document) -> anyhow::Result<Uuid>;

    /// Direct children of `collection`, ascending by the `order_by` field
    /// (by document id when `None`).
    async fn query(
        &self,
        collection: &CollectionPath,
        order_by: Option<&str>,
    ) -> anyhow::Result<Vec<(Uuid, Document)>>;

    /// Atomic read-modify-write of one document. The closure's view and the
    /// write must form a single unit: implementations either hold the
    /// document locked or compare-and-swap against the observed value,
    /// retrying on conflict with bounded backoff.
    async fn transact(&self, doc: &DocPath, apply: TransactFn<'_>) -> anyhow::Result<Transacted>;
}

pub fn to_document<T: serde::Serialize>(value: &T) -> anyhow::Result<Document> {
    match serde_json::to_value(value).context("serializing document")? {
        serde_json::Value::Object(fields) => Ok(fields),
        other => Err(anyhow!("document must be a JSON object, got {other}")),
    }
}

pub fn from_document<T: serde::de::DeserializeOwned>(doc: Document) -> anyhow::Result<T> {
    serde_json::from_value(serde_json::Value::Object(doc)).context("deserializing document")
}
