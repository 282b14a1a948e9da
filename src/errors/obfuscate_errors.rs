use super::{CollectionError, ErrorResponseData, MessageError};

/// Settings controlling how much detail an error response carries to a client.
///
/// Exposed as a plain function rather than an HTTP middleware layer, since this crate owns no
/// HTTP server of its own: the orchestrator's caller decides when to apply it to a constructed
/// error body.
#[derive(Debug, Clone)]
pub struct ObfuscateErrorSettings {
    /// Enable obfuscation at all.
    pub enabled: bool,
    /// Obfuscate [`CollectionError::Forbidden`] detail.
    pub obfuscate_forbidden: bool,
}

impl Default for ObfuscateErrorSettings {
    /// Obfuscation is on, but forbidden errors keep their detail by default since they're
    /// already the caller's own root/permission decision, not a leak of internal state.
    fn default() -> Self {
        ObfuscateErrorSettings {
            enabled: true,
            obfuscate_forbidden: false,
        }
    }
}

/// Downgrade a `Forbidden`-shaped error's detail before it reaches a client, if configured to.
///
/// Validation errors are always returned verbatim: they're caller-facing by construction, not
/// an internal detail to hide.
pub fn obfuscate(error: &CollectionError, settings: &ObfuscateErrorSettings) -> ErrorResponseData {
    use super::HttpError;

    if !settings.enabled {
        return error.response_body();
    }

    match error {
        CollectionError::Forbidden | CollectionError::RootRequired(_)
            if settings.obfuscate_forbidden =>
        {
            ErrorResponseData::Message(MessageError::new("forbidden", "Forbidden", None))
        }
        other => other.response_body(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn passes_through_by_default() {
        let settings = ObfuscateErrorSettings::default();
        let body = obfuscate(&CollectionError::Forbidden, &settings);
        match body {
            ErrorResponseData::Message(_) => {}
            _ => panic!("expected message shape"),
        }
    }

    #[test]
    fn obfuscates_when_enabled() {
        let settings = ObfuscateErrorSettings {
            enabled: true,
            obfuscate_forbidden: true,
        };
        let body = obfuscate(&CollectionError::RootRequired("count"), &settings);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["message"], "Forbidden");
    }

    #[test]
    fn validation_errors_are_never_obfuscated() {
        let mut errors = std::collections::BTreeMap::new();
        errors.insert("title".to_string(), "is required".to_string());
        let settings = ObfuscateErrorSettings {
            enabled: true,
            obfuscate_forbidden: true,
        };
        let body = obfuscate(&CollectionError::Validation(errors), &settings);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["errors"]["title"], "is required");
    }
}
