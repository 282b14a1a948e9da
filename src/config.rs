//! Helpers for parsing configuration, and the operational knobs this crate owns.

use std::env::VarError;

/// Get an environment variable with an optional prefix.
pub fn prefixed_env_var(prefix: &str, key: &str) -> Result<String, VarError> {
    if prefix.is_empty() {
        std::env::var(key)
    } else {
        std::env::var(format!("{prefix}{key}"))
    }
}

/// Parse an `Option<String>`, returning an error if the value is present and fails to parse to
/// the expected type.
pub fn parse_option<T: std::str::FromStr>(value: Option<String>) -> Result<Option<T>, T::Err> {
    match value {
        Some(v) => Ok(Some(v.parse()?)),
        None => Ok(None),
    }
}

/// Set `dest` to the value of `src`, if `src` is `Some`.
pub fn merge_option_if_set<T>(dest: &mut Option<T>, src: Option<T>) {
    if src.is_some() {
        *dest = src;
    }
}

/// The operational knobs this crate owns: everything else (schema, scripts, permissions) is
/// supplied directly by the caller when building a [`crate::collection::Collection`], but these
/// two have no natural home in a resource-registration layer this crate doesn't have, so they're
/// read from the environment instead.
#[derive(Debug, Clone)]
pub struct CollectionSettings {
    /// Whether `<collection>:changed` notifications are emitted after mutations.
    pub notifications_enabled: bool,
    /// How many per-document `onGet` script invocations may run concurrently for a single list
    /// response. `None` means unbounded (all documents fan out at once via `join_all`).
    pub get_script_concurrency: Option<usize>,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        CollectionSettings {
            notifications_enabled: true,
            get_script_concurrency: None,
        }
    }
}

/// An error produced while reading [`CollectionSettings`] from the environment.
#[derive(Debug, thiserror::Error)]
pub enum CollectionSettingsError {
    /// `<PREFIX>NOTIFICATIONS_ENABLED` failed to parse as a bool.
    #[error("failed to parse NOTIFICATIONS_ENABLED")]
    NotificationsEnabled(#[source] std::str::ParseBoolError),
    /// `<PREFIX>GET_SCRIPT_CONCURRENCY` failed to parse as an integer.
    #[error("failed to parse GET_SCRIPT_CONCURRENCY")]
    GetScriptConcurrency(#[source] std::num::ParseIntError),
}

impl CollectionSettings {
    /// Read settings from the environment, applying `prefix` to each variable name (e.g.
    /// `TODOS_` for `TODOS_NOTIFICATIONS_ENABLED`). Unset variables fall back to
    /// [`CollectionSettings::default`].
    pub fn from_env(prefix: &str) -> Result<CollectionSettings, CollectionSettingsError> {
        let mut settings = CollectionSettings::default();

        let notifications_enabled =
            parse_option::<bool>(prefixed_env_var(prefix, "NOTIFICATIONS_ENABLED").ok())
                .map_err(CollectionSettingsError::NotificationsEnabled)?;
        if let Some(value) = notifications_enabled {
            settings.notifications_enabled = value;
        }

        let get_script_concurrency =
            parse_option::<usize>(prefixed_env_var(prefix, "GET_SCRIPT_CONCURRENCY").ok())
                .map_err(CollectionSettingsError::GetScriptConcurrency)?;
        merge_option_if_set(&mut settings.get_script_concurrency, get_script_concurrency);

        Ok(settings)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let settings = CollectionSettings::from_env("NO_SUCH_PREFIX_XYZ_").unwrap();
        assert!(settings.notifications_enabled);
        assert_eq!(settings.get_script_concurrency, None);
    }
}
