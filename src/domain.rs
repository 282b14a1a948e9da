//! The per-invocation sandbox (`ScriptDomain`) passed to an event script.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// The sandbox handed to an event script for a single document. Created fresh per document per
/// event and discarded after the script returns; `data` is what the orchestrator persists or
/// emits once the script has had a chance to mutate it.
///
/// Modeled as a capability object (`error`, `protect`, `hide`, `changed`, `allow`, `prevent`)
/// backed by captured per-request state: the script runtime is handed a `&mut ScriptDomain`, not
/// a shared mutable bag several actors poke at.
#[derive(Debug)]
pub struct ScriptDomain {
    /// The current document, exposed once here as `data` rather than aliased under multiple
    /// names.
    pub data: Map<String, Value>,
    /// A snapshot of the document before mutation. Empty for `create`.
    pub previous: Map<String, Value>,
    errors: BTreeMap<String, String>,
    allowed: bool,
}

impl ScriptDomain {
    /// Build a domain for a document being created: `previous` is empty.
    pub fn for_create(data: Map<String, Value>) -> ScriptDomain {
        ScriptDomain {
            data,
            previous: Map::new(),
            errors: BTreeMap::new(),
            allowed: true,
        }
    }

    /// Build a domain for a document being read, updated, or deleted: `previous` is a snapshot of
    /// the document as it stood before this request's mutation (equal to `data` if there is none
    /// yet, e.g. for `Get`/`Delete`).
    pub fn for_existing(data: Map<String, Value>, previous: Map<String, Value>) -> ScriptDomain {
        ScriptDomain {
            data,
            previous,
            errors: BTreeMap::new(),
            allowed: true,
        }
    }

    /// Record a validation error against `key`. Separate from schema validation errors, but
    /// reported through the same wire shape by the orchestrator.
    pub fn error(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(key.into(), message.into());
    }

    /// `error(key, message)` iff `condition` is true.
    pub fn error_if(&mut self, condition: bool, key: impl Into<String>, message: impl Into<String>) {
        if condition {
            self.error(key, message);
        }
    }

    /// `error(key, message)` iff `condition` is false.
    pub fn error_unless(
        &mut self,
        condition: bool,
        key: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.error_if(!condition, key, message);
    }

    /// Whether any script-level error has been recorded.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The accumulated script-level errors.
    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// Remove `prop` from the outgoing `data`. See [`ScriptDomain::hide`] for the companion call:
    /// both names remove the property the same way, kept distinct only because scripts call them
    /// in different situations (protecting a field from ever leaving vs. hiding it this time).
    pub fn protect(&mut self, prop: &str) {
        self.data.remove(prop);
    }

    /// Remove `prop` from the outgoing `data`. See [`ScriptDomain::protect`].
    pub fn hide(&mut self, prop: &str) {
        self.data.remove(prop);
    }

    /// True iff `data[prop]` differs from `previous[prop]`. On create (`previous` empty), true
    /// iff `prop` is present in `data` at all.
    pub fn changed(&self, prop: &str) -> bool {
        self.data.get(prop) != self.previous.get(prop)
    }

    /// Deny permission for this request; consulted by the orchestrator's permission check.
    pub fn prevent(&mut self) {
        self.allowed = false;
    }

    /// Explicitly allow permission for this request, overriding a prior [`ScriptDomain::prevent`].
    pub fn allow(&mut self) {
        self.allowed = true;
    }

    /// Whether the script left this request in an allowed state.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}
