#![warn(missing_docs)]
//! A schema-validated, event-scriptable collection resource: the request-handling pipeline that
//! sits between an HTTP router and a document store.
//!
//! For each incoming request addressed to a named [`collection::Collection`], this crate resolves
//! the intent (query / create / update / delete, single or multi), validates and sanitizes the
//! payload against a declared [`schema::Schema`], enforces permissions, runs user-supplied event
//! [`script::Script`]s at defined lifecycle points with a sandboxed [`domain::ScriptDomain`],
//! applies [`commands`] mutation operators and persists through a [`store::Store`], and emits
//! change notifications via [`notify`].
//!
//! The HTTP transport, router, and [`context::Context`] adapter; the sandboxed script runtime;
//! and the document store itself are all external collaborators. Only the interfaces this crate
//! consumes from them are specified here.

/// The lifecycle orchestrator: `Collection`, `CollectionConfig`, and the GET/POST/PUT/DELETE
/// pipelines.
pub mod collection;
/// In-place mutation commands (`$inc`, `$push`, `$pushAll`, `$pull`, `$pullAll`).
pub mod commands;
/// Environment-variable configuration helpers and this crate's operational settings.
pub mod config;
/// The per-request `Context` this crate consumes from its transport.
pub mod context;
/// The per-invocation script sandbox (`ScriptDomain`).
pub mod domain;
/// Error handling: the `HttpError` trait, the two wire error shapes, and the obfuscation hook.
pub mod errors;
/// Change notification (`<collection>:changed`).
pub mod notify;
/// Permission tag derivation from request shape.
pub mod permissions;
/// Property schema declaration, payload validation, and sanitization.
pub mod schema;
/// The event script invocation contract.
pub mod script;
/// The document store contract this crate consumes.
pub mod store;
/// An in-process test harness: `FakeContext`, `InMemoryStore`, and `FnScript`.
#[cfg(any(test, feature = "testing"))]
pub mod testing;
/// A minimal dev-time `tracing` subscriber for examples and local test runs.
#[cfg(feature = "tracing-init")]
pub mod tracing_config;
