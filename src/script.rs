//! The event script invocation contract. Only the contract is specified; the sandboxed runtime
//! that actually executes user-supplied script source is an external collaborator.

use async_trait::async_trait;

use crate::context::Context;
use crate::domain::ScriptDomain;

/// The lifecycle point a compiled script is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Event {
    /// Runs once per document in a list GET response.
    Get,
    /// Runs after merge/command-apply and schema validation, before `Put`/`Post`.
    Validate,
    /// Runs after a new document's schema validation passes, before the permission check.
    Post,
    /// Runs after `Validate`, before the permission check, for a single or bulk update.
    Put,
    /// Runs against the fetched result before a delete commits.
    Delete,
    /// Runs before permission verification, only for a root-path list GET.
    Query,
}

/// An engine-level failure from the script runtime (as opposed to a value error reported through
/// [`ScriptDomain::error`]). A non-null value here aborts the request outright.
#[derive(Debug, thiserror::Error)]
#[error("script engine error: {0}")]
pub struct EngineError(pub String);

/// A compiled, invocable event script. Each invocation is handed the request [`Context`] and a
/// `&mut` [`ScriptDomain`] and signals completion by returning; [`Err`] here means an
/// engine-level failure, not a value error (those go through `domain.error(...)` and are read
/// back via `domain.has_errors()` after a successful return).
#[async_trait]
pub trait Script: Send + Sync {
    /// Run this script against `ctx` and `domain`.
    async fn run(&self, ctx: &dyn Context, domain: &mut ScriptDomain) -> Result<(), EngineError>;
}

/// Whether a configured event should run for this request: the handle must exist, and it must
/// not be the case that a root caller asked to skip events.
///
/// Non-root callers can never suppress event execution via `$skipEvents`; only a root session's
/// `$skipEvents` has any effect.
pub fn should_run_event(has_handler: bool, skip_events_requested: bool, is_root: bool) -> bool {
    has_handler && !(skip_events_requested && is_root)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn non_root_cannot_skip() {
        assert!(should_run_event(true, true, false));
    }

    #[test]
    fn root_can_skip() {
        assert!(!should_run_event(true, true, true));
    }

    #[test]
    fn absent_handler_never_runs() {
        assert!(!should_run_event(false, false, true));
    }
}
