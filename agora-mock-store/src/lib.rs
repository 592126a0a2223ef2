//! In-memory implementation of the document-store contract, for tests.
//!
//! A single mutex guards the whole map, so every operation is atomic.
//! `transact` in particular runs its closure under the lock, which is what
//! the concurrency tests in the server lean on.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::bail;
use async_trait::async_trait;
use uuid::Uuid;

use agora_store::{CollectionPath, DocPath, Document, Store, TransactFn, Transacted};

pub struct MemStore {
    docs: Mutex<BTreeMap<String, Document>>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore {
            docs: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Document>> {
        self.docs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of every stored document; tests use it to assert that a
    /// rejected operation mutated nothing.
    pub fn test_dump(&self) -> BTreeMap<String, Document> {
        self.lock().clone()
    }
}

impl Default for MemStore {
    fn default() -> MemStore {
        MemStore::new()
    }
}

fn children(
    docs: &BTreeMap<String, Document>,
    collection: &CollectionPath,
) -> Vec<(Uuid, Document)> {
    let prefix = format!("{}/", collection.as_str());
    docs.range(prefix.clone()..)
        .take_while(|(path, _)| path.starts_with(&prefix))
        .filter(|(path, _)| !path[prefix.len()..].contains('/'))
        .filter_map(|(path, doc)| {
            let id: Uuid = path[prefix.len()..].parse().ok()?;
            Some((id, doc.clone()))
        })
        .collect()
}

// JSON values have no total order; rank by type, then within the types the
// store actually sorts on (numbers, strings).
fn value_cmp(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Ordering {
    use serde_json::Value;

    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(a), Value::Number(b)) => a
                .as_f64()
                .unwrap_or(f64::NAN)
                .total_cmp(&b.as_f64().unwrap_or(f64::NAN)),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (a, b) => rank(a).cmp(&rank(b)),
        },
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get(&self, doc: &DocPath) -> anyhow::Result<Option<Document>> {
        Ok(self.lock().get(doc.as_str()).cloned())
    }

    async fn set(&self, doc: &DocPath, fields: Document, merge: bool) -> anyhow::Result<()> {
        let mut docs = self.lock();
        let entry = docs.entry(String::from(doc.as_str())).or_default();
        if merge {
            entry.extend(fields);
        } else {
            *entry = fields;
        }
        Ok(())
    }

    async fn update(&self, doc: &DocPath, fields: Document) -> anyhow::Result<()> {
        let mut docs = self.lock();
        match docs.get_mut(doc.as_str()) {
            Some(entry) => {
                entry.extend(fields);
                Ok(())
            }
            None => bail!("updating {doc}: document does not exist"),
        }
    }

    async fn add(&self, collection: &CollectionPath, fields: Document) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        self.lock()
            .insert(String::from(collection.doc(id).as_str()), fields);
        Ok(id)
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        order_by: Option<&str>,
    ) -> anyhow::Result<Vec<(Uuid, Document)>> {
        let mut found = children(&self.lock(), collection);
        if let Some(field) = order_by {
            found.sort_by(|(_, a), (_, b)| value_cmp(a.get(field), b.get(field)));
        }
        Ok(found)
    }

    async fn transact(&self, doc: &DocPath, apply: TransactFn<'_>) -> anyhow::Result<Transacted> {
        let mut docs = self.lock();
        let before = docs.get(doc.as_str()).cloned();
        let after = apply(before.as_ref())?;
        docs.insert(String::from(doc.as_str()), after.clone());
        Ok(Transacted { before, after })
    }
}
