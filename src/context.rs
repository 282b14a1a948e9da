//! The per-request `Context` this crate consumes from its HTTP transport. Only the interface
//! consumed from it is specified; the actual router and adapter are external collaborators.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::CollectionError;
use crate::notify::ChangeNotifier;
use crate::permissions::{Method, Permission};
use crate::store::Document;

/// The request payload shape: a single object for single-item operations, or an ordered sequence
/// of objects for bulk create.
#[derive(Debug, Clone)]
pub enum Body {
    /// No request body (e.g. GET, DELETE).
    None,
    /// A single JSON object.
    Single(Document),
    /// An ordered sequence of JSON objects, for bulk create.
    Many(Vec<Document>),
}

impl Body {
    /// Whether this body is the bulk (`Many`) shape.
    pub fn is_sequence(&self) -> bool {
        matches!(self, Body::Many(_))
    }

    /// Borrow the body as a single document, if it is one.
    pub fn as_single(&self) -> Option<&Document> {
        match self {
            Body::Single(doc) => Some(doc),
            _ => None,
        }
    }
}

/// The caller's session: the two capabilities the orchestrator consumes from the surrounding
/// session/auth subsystem.
#[derive(Clone)]
pub struct Session {
    /// Whether this caller holds root/superuser privilege. Gates the `count` and `index-of`
    /// virtual routes, and whether `$skipEvents` is honored.
    pub is_root: bool,
    /// The change notification sink, if this session can reach one.
    pub notifier: Option<Arc<dyn ChangeNotifier>>,
}

impl Session {
    /// A non-root session with no notifier attached.
    pub fn anonymous() -> Session {
        Session {
            is_root: false,
            notifier: None,
        }
    }

    /// A root session with no notifier attached.
    pub fn root() -> Session {
        Session {
            is_root: true,
            notifier: None,
        }
    }
}

/// The per-request object mediating transport, session, and permission verification. Only this
/// interface is consumed; the router and adapter that produce it live outside this crate.
#[async_trait]
pub trait Context: Send + Sync {
    /// The HTTP method this request arrived as.
    fn method(&self) -> Method;
    /// The request URL, used to extract a path-segment id for routes that don't carry one in the
    /// query or body.
    fn url(&self) -> &str;
    /// The query map (already JSON-shaped; transport-level parsing is out of scope here).
    fn query(&self) -> &crate::store::Query;
    /// The request body.
    fn body(&self) -> &Body;
    /// The caller's session.
    fn session(&self) -> &Session;
    /// An opaque client handle passed through to scripts without interpretation by this crate.
    fn dpd(&self) -> Option<&(dyn Any + Send + Sync)> {
        None
    }
    /// Resolve `required` against session/role policy. Errs with [`CollectionError::Forbidden`]
    /// (or whatever the external verifier raises) if the caller lacks any of them.
    async fn verify_permissions(
        &self,
        required: &std::collections::BTreeSet<Permission>,
    ) -> Result<(), CollectionError>;
}

/// Extract the id implied by a request: `query.id`, else the URL's second path segment, else
/// `body.id`. The reserved subresource names `count` and `index-of` are returned the same as any
/// other segment; [`crate::collection::Collection::handle`] is what recognizes them and routes
/// to the virtual `count`/`index-of` handlers instead of treating them as a real id.
pub fn resolve_id(ctx: &dyn Context) -> Option<String> {
    if let Some(id) = ctx.query().get("id").and_then(|v| v.as_str()) {
        return Some(id.to_string());
    }

    if let Some(segment) = url_second_segment(ctx.url()) {
        return Some(segment);
    }

    if let Some(body) = ctx.body().as_single() {
        if let Some(id) = body.get("id").and_then(|v| v.as_str()) {
            return Some(id.to_string());
        }
    }

    None
}

fn url_second_segment(url: &str) -> Option<String> {
    url_segment(url, 1)
}

/// Return the `n`th (0-indexed) path segment of `url`, ignoring any query string.
pub fn url_segment(url: &str, n: usize) -> Option<String> {
    let path = url.split('?').next().unwrap_or(url);
    path.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .nth(n)
        .map(|s| s.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn second_segment_extraction() {
        assert_eq!(url_second_segment("/todos/abc"), Some("abc".to_string()));
        assert_eq!(url_second_segment("/todos/abc/comments"), Some("abc".to_string()));
        assert_eq!(url_second_segment("/todos"), None);
    }
}
