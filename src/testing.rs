//! An in-process test harness: since this crate has no router or HTTP client of its own to drive
//! requests through, this module instead gives tests a [`FakeContext`] builder, an in-memory
//! [`Store`] implementation, and a scriptable [`FnScript`] for exercising lifecycle hooks
//! deterministically.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{Body, Context, Session};
use crate::domain::ScriptDomain;
use crate::errors::CollectionError;
use crate::permissions::{Method, Permission};
use crate::script::{EngineError, Script};
use crate::store::{Document, Query, Store, StoreError};

/// A `Context` built directly in test code, bypassing the HTTP transport and router this crate
/// doesn't own.
pub struct FakeContext {
    method: Method,
    url: String,
    query: Query,
    body: Body,
    session: Session,
    /// Permissions always denied for this context, regardless of what's required. Empty by
    /// default, i.e. every permission check passes.
    pub denied: Mutex<BTreeSet<Permission>>,
}

impl FakeContext {
    /// Build a GET request for `url` with the given query map.
    pub fn get(url: impl Into<String>, query: Query) -> FakeContext {
        FakeContext {
            method: Method::Get,
            url: url.into(),
            query,
            body: Body::None,
            session: Session::anonymous(),
            denied: Mutex::new(BTreeSet::new()),
        }
    }

    /// Build a POST request for `url` carrying `body` as a single document.
    pub fn post(url: impl Into<String>, body: Document) -> FakeContext {
        FakeContext {
            method: Method::Post,
            url: url.into(),
            query: Query::new(),
            body: Body::Single(body),
            session: Session::anonymous(),
            denied: Mutex::new(BTreeSet::new()),
        }
    }

    /// Build a bulk-create POST request.
    pub fn post_many(url: impl Into<String>, items: Vec<Document>) -> FakeContext {
        FakeContext {
            method: Method::Post,
            url: url.into(),
            query: Query::new(),
            body: Body::Many(items),
            session: Session::anonymous(),
            denied: Mutex::new(BTreeSet::new()),
        }
    }

    /// Build a PUT request for `url` carrying `body` as a single document (or no body, for a
    /// query-only bulk `saveAll`).
    pub fn put(url: impl Into<String>, body: Option<Document>) -> FakeContext {
        FakeContext {
            method: Method::Put,
            url: url.into(),
            query: Query::new(),
            body: body.map(Body::Single).unwrap_or(Body::None),
            session: Session::anonymous(),
            denied: Mutex::new(BTreeSet::new()),
        }
    }

    /// Build a DELETE request for `url`.
    pub fn delete(url: impl Into<String>, query: Query) -> FakeContext {
        FakeContext {
            method: Method::Delete,
            url: url.into(),
            query,
            body: Body::None,
            session: Session::anonymous(),
            denied: Mutex::new(BTreeSet::new()),
        }
    }

    /// Attach a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: Value) -> FakeContext {
        self.query.insert(key.into(), value);
        self
    }

    /// Run this request as root.
    pub fn as_root(mut self) -> FakeContext {
        self.session.is_root = true;
        self
    }

    /// Deny a specific permission tag for this request, to exercise the forbidden path.
    pub fn denying(self, permission: Permission) -> FakeContext {
        self.denied.lock().unwrap().insert(permission);
        self
    }
}

#[async_trait]
impl Context for FakeContext {
    fn method(&self) -> Method {
        self.method
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn query(&self) -> &Query {
        &self.query
    }

    fn body(&self) -> &Body {
        &self.body
    }

    fn session(&self) -> &Session {
        &self.session
    }

    async fn verify_permissions(
        &self,
        required: &BTreeSet<Permission>,
    ) -> Result<(), CollectionError> {
        let denied = self.denied.lock().unwrap();
        if required.iter().any(|p| denied.contains(p)) {
            return Err(CollectionError::Forbidden);
        }
        Ok(())
    }
}

/// An in-memory [`Store`], suitable for deterministic unit tests: a `Mutex<HashMap<id, Document>>`
/// plus an atomic counter minting sequential ids.
#[derive(Default)]
pub struct InMemoryStore {
    documents: Mutex<HashMap<String, Document>>,
    next_id: AtomicU64,
}

impl InMemoryStore {
    /// Build an empty store.
    pub fn new() -> InMemoryStore {
        InMemoryStore::default()
    }

    /// Seed the store with a document. The document must already carry an `id`.
    pub fn seed(&self, doc: Document) {
        let id = doc
            .get("id")
            .and_then(Value::as_str)
            .expect("seeded document must carry an id")
            .to_string();
        self.documents.lock().unwrap().insert(id, doc);
    }

    fn matches(doc: &Document, query: &Query) -> bool {
        query.iter().all(|(k, v)| {
            if k.starts_with('$') {
                return true;
            }
            doc.get(k) == Some(v)
        })
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let docs = self.documents.lock().unwrap();
        Ok(docs
            .values()
            .filter(|d| Self::matches(d, query))
            .cloned()
            .collect())
    }

    async fn first(&self, query: &Query) -> Result<Option<Document>, StoreError> {
        let docs = self.documents.lock().unwrap();
        Ok(docs.values().find(|d| Self::matches(d, query)).cloned())
    }

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        let docs = self.documents.lock().unwrap();
        Ok(docs.values().filter(|d| Self::matches(d, query)).count() as u64)
    }

    async fn insert(&self, doc: Document) -> Result<Document, StoreError> {
        let id = doc
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::new("insert requires a pre-assigned id"))?
            .to_string();
        self.documents.lock().unwrap().insert(id, doc.clone());
        Ok(doc)
    }

    async fn update(&self, query: &Query, partial: &Document) -> Result<(), StoreError> {
        let mut docs = self.documents.lock().unwrap();
        let ids: Vec<String> = docs
            .iter()
            .filter(|(_, d)| Self::matches(d, query))
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            if let Some(doc) = docs.get_mut(&id) {
                for (k, v) in partial {
                    doc.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, query: &Query) -> Result<(), StoreError> {
        let mut docs = self.documents.lock().unwrap();
        docs.retain(|_, d| !Self::matches(d, query));
        Ok(())
    }

    async fn rename(&self, _new_name: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn create_unique_identifier(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("doc-{n}")
    }
}

/// A [`Script`] backed by a plain closure, for exercising lifecycle hooks without a real
/// sandboxed runtime.
pub struct FnScript<F>(pub F)
where
    F: Fn(&dyn Context, &mut ScriptDomain) -> Result<(), EngineError> + Send + Sync;

#[async_trait]
impl<F> Script for FnScript<F>
where
    F: Fn(&dyn Context, &mut ScriptDomain) -> Result<(), EngineError> + Send + Sync,
{
    async fn run(&self, ctx: &dyn Context, domain: &mut ScriptDomain) -> Result<(), EngineError> {
        (self.0)(ctx, domain)
    }
}
