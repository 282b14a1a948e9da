//! Property schema declaration, payload validation, and sanitization.

use std::collections::BTreeMap;

use serde_json::Value;

/// The declared type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    /// A JSON string.
    String,
    /// A JSON number, coerced from decimal strings on the way in.
    Number,
    /// A JSON boolean, defaulted to `false` when absent.
    Boolean,
    /// A JSON array. Sanitization accepts any JSON array regardless of element types.
    Array,
    /// A JSON object.
    Object,
    /// A date, represented on the wire as an RFC 3339 string.
    Date,
}

/// The declaration for a single schema property. Created at collection configuration time and
/// immutable for the lifetime of the [`crate::collection::Collection`].
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    /// The property name, matching the key under which it appears in a [`Document`].
    ///
    /// [`Document`]: crate::store::Document
    pub name: String,
    /// The declared type.
    pub property_type: PropertyType,
    /// Whether the property must be present (and non-empty) on create.
    pub required: bool,
}

impl PropertyDescriptor {
    /// Construct an optional property.
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> PropertyDescriptor {
        PropertyDescriptor {
            name: name.into(),
            property_type,
            required: false,
        }
    }

    /// Construct a required property.
    pub fn required(name: impl Into<String>, property_type: PropertyType) -> PropertyDescriptor {
        PropertyDescriptor {
            name: name.into(),
            property_type,
            required: true,
        }
    }
}

/// The declared property set for a collection. Keys are unique; order is irrelevant.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    properties: BTreeMap<String, PropertyDescriptor>,
}

impl Schema {
    /// Build a schema from a list of property descriptors.
    pub fn new(properties: impl IntoIterator<Item = PropertyDescriptor>) -> Schema {
        Schema {
            properties: properties.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    /// Iterate the declared properties.
    pub fn properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.values()
    }

    /// Look up a declared property by name.
    pub fn get(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(name)
    }
}

/// `exists` treats `null`, a missing key, and the empty string as absent.
fn exists(value: Option<&Value>) -> bool {
    match value {
        None => false,
        Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Whether `s` parses as an RFC 3339 timestamp, the wire representation [`PropertyType::Date`]
/// declares.
fn is_rfc3339(s: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(s).is_ok()
}

fn runtime_type_matches(value: &Value, property_type: PropertyType) -> bool {
    match property_type {
        PropertyType::String => value.is_string(),
        PropertyType::Number => value.is_number(),
        PropertyType::Boolean => value.is_boolean(),
        PropertyType::Array => value.is_array(),
        PropertyType::Object => value.is_object(),
        PropertyType::Date => value.as_str().map(is_rfc3339).unwrap_or(false),
    }
}

fn type_name(property_type: PropertyType) -> &'static str {
    match property_type {
        PropertyType::String => "string",
        PropertyType::Number => "number",
        PropertyType::Boolean => "boolean",
        PropertyType::Array => "array",
        PropertyType::Object => "object",
        PropertyType::Date => "date",
    }
}

/// Attempt the narrow coercion `validate` applies before comparing against the declared type:
/// numeric strings parse into numbers.
fn coerce_for_validate(value: &Value, property_type: PropertyType) -> Value {
    if property_type == PropertyType::Number {
        if let Some(s) = value.as_str() {
            if let Ok(n) = s.parse::<f64>() {
                if let Some(num) = serde_json::Number::from_f64(n) {
                    return Value::Number(num);
                }
            }
        }
    }
    value.clone()
}

/// Validate `body` against `schema`, returning a field-to-message map of violations.
///
/// `create` controls whether missing required fields are an error: partial updates (`create =
/// false`) never report a required-field violation, since an update is only setting the fields
/// it mentions. As a side effect, missing `boolean` properties are defaulted to `false` in place.
///
/// Returns `None` when there are no errors.
pub fn validate(
    body: &mut serde_json::Map<String, Value>,
    schema: &Schema,
    create: bool,
) -> Option<BTreeMap<String, String>> {
    let mut errors = BTreeMap::new();

    for prop in schema.properties() {
        let present = exists(body.get(&prop.name));

        if present {
            let raw = body.get(&prop.name).unwrap().clone();
            let coerced = coerce_for_validate(&raw, prop.property_type);
            if runtime_type_matches(&coerced, prop.property_type) {
                body.insert(prop.name.clone(), coerced);
            } else {
                errors.insert(
                    prop.name.clone(),
                    format!("must be a {}", type_name(prop.property_type)),
                );
            }
        } else if prop.required && create {
            errors.insert(prop.name.clone(), "is required".to_string());
        } else if prop.property_type == PropertyType::Boolean {
            body.insert(prop.name.clone(), Value::Bool(false));
        }
    }

    if errors.is_empty() {
        None
    } else {
        Some(errors)
    }
}

/// Narrow coercion applied by [`sanitize`] and [`sanitize_query`]: `array` accepts any JSON
/// array, `number` accepts decimal strings.
fn sanitize_value(value: &Value, property_type: PropertyType) -> Option<Value> {
    if runtime_type_matches(value, property_type) {
        return Some(value.clone());
    }

    match property_type {
        PropertyType::Number => value
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

/// Produce a new map containing only properties declared in `schema`, each coerced to its
/// declared type or dropped silently if it can't be.
pub fn sanitize(
    body: &serde_json::Map<String, Value>,
    schema: &Schema,
) -> serde_json::Map<String, Value> {
    let mut clean = serde_json::Map::new();
    for prop in schema.properties() {
        if let Some(value) = body.get(&prop.name) {
            if let Some(sanitized) = sanitize_value(value, prop.property_type) {
                clean.insert(prop.name.clone(), sanitized);
            }
        }
    }
    clean
}

/// Like [`sanitize`], but for query maps: `$`-prefixed keys pass through unchanged except
/// `$limitRecursion` and `$skipEvents`, which are stripped here (consumed by the orchestrator
/// directly from the raw query, not from the sanitized one); `id` passes through unchanged;
/// `boolean`-typed properties accept the literal string `"true"`; `null` values are dropped.
pub fn sanitize_query(
    query: &serde_json::Map<String, Value>,
    schema: &Schema,
) -> serde_json::Map<String, Value> {
    let mut clean = serde_json::Map::new();

    for (key, value) in query {
        if value.is_null() {
            continue;
        }

        if key == "id" {
            clean.insert(key.clone(), value.clone());
            continue;
        }

        if let Some(stripped) = key.strip_prefix('$') {
            if stripped == "limitRecursion" || stripped == "skipEvents" {
                continue;
            }
            clean.insert(key.clone(), value.clone());
            continue;
        }

        let Some(prop) = schema.get(key) else {
            continue;
        };

        if prop.property_type == PropertyType::Boolean {
            let truthy = value.as_str().map(|s| s == "true").unwrap_or(false);
            clean.insert(key.clone(), Value::Bool(truthy));
            continue;
        }

        if let Some(sanitized) = sanitize_value(value, prop.property_type) {
            clean.insert(key.clone(), sanitized);
        }
    }

    clean
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn todo_schema() -> Schema {
        Schema::new([
            PropertyDescriptor::required("title", PropertyType::String),
            PropertyDescriptor::new("votes", PropertyType::Number),
            PropertyDescriptor::new("done", PropertyType::Boolean),
        ])
    }

    fn event_schema() -> Schema {
        Schema::new([
            PropertyDescriptor::new("occurred_at", PropertyType::Date),
            PropertyDescriptor::new("tags", PropertyType::Array),
            PropertyDescriptor::new("metadata", PropertyType::Object),
        ])
    }

    #[test]
    fn validate_requires_on_create_only() {
        let schema = todo_schema();
        let mut body = json!({"votes": 3}).as_object().unwrap().clone();
        let errors = validate(&mut body, &schema, true).unwrap();
        assert_eq!(errors.get("title").unwrap(), "is required");

        let mut body = json!({"votes": 3}).as_object().unwrap().clone();
        assert!(validate(&mut body, &schema, false).is_none());
    }

    #[test]
    fn validate_defaults_missing_boolean() {
        let schema = todo_schema();
        let mut body = json!({"title": "a"}).as_object().unwrap().clone();
        assert!(validate(&mut body, &schema, true).is_none());
        assert_eq!(body.get("done").unwrap(), &Value::Bool(false));
    }

    #[test]
    fn validate_coerces_numeric_strings() {
        let schema = todo_schema();
        let mut body = json!({"title": "a", "votes": "7"}).as_object().unwrap().clone();
        assert!(validate(&mut body, &schema, true).is_none());
        assert_eq!(body.get("votes").unwrap(), &json!(7.0));
    }

    #[test]
    fn validate_accepts_rfc3339_date_and_rejects_plain_string() {
        let schema = event_schema();
        let mut body = json!({"occurred_at": "2024-02-20T10:00:00Z"})
            .as_object()
            .unwrap()
            .clone();
        assert!(validate(&mut body, &schema, false).is_none());

        let mut body = json!({"occurred_at": "not a date"}).as_object().unwrap().clone();
        let errors = validate(&mut body, &schema, false).unwrap();
        assert_eq!(errors.get("occurred_at").unwrap(), "must be a date");
    }

    #[test]
    fn validate_accepts_array_and_object_properties() {
        let schema = event_schema();
        let mut body = json!({"tags": ["a", "b"], "metadata": {"k": "v"}})
            .as_object()
            .unwrap()
            .clone();
        assert!(validate(&mut body, &schema, false).is_none());

        let mut body = json!({"tags": "not an array", "metadata": "not an object"})
            .as_object()
            .unwrap()
            .clone();
        let errors = validate(&mut body, &schema, false).unwrap();
        assert_eq!(errors.get("tags").unwrap(), "must be a array");
        assert_eq!(errors.get("metadata").unwrap(), "must be a object");
    }

    #[test]
    fn sanitize_drops_invalid_date_string_but_keeps_valid_one() {
        let schema = event_schema();
        let body = json!({"occurred_at": "garbage"}).as_object().unwrap().clone();
        let clean = sanitize(&body, &schema);
        assert!(!clean.contains_key("occurred_at"));

        let body = json!({"occurred_at": "2024-02-20T10:00:00Z"})
            .as_object()
            .unwrap()
            .clone();
        let clean = sanitize(&body, &schema);
        assert_eq!(clean.get("occurred_at").unwrap(), "2024-02-20T10:00:00Z");
    }

    #[test]
    fn sanitize_keeps_array_and_object_values() {
        let schema = event_schema();
        let body = json!({"tags": ["a", "b"], "metadata": {"k": "v"}})
            .as_object()
            .unwrap()
            .clone();
        let clean = sanitize(&body, &schema);
        assert_eq!(clean.get("tags").unwrap(), &json!(["a", "b"]));
        assert_eq!(clean.get("metadata").unwrap(), &json!({"k": "v"}));
    }

    #[test]
    fn sanitize_drops_unknown_keys() {
        let schema = todo_schema();
        let body = json!({"title": "a", "evil": "x"}).as_object().unwrap().clone();
        let clean = sanitize(&body, &schema);
        assert!(!clean.contains_key("evil"));
        assert_eq!(clean.get("title").unwrap(), "a");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let schema = todo_schema();
        let body = json!({"title": "a", "votes": "7", "evil": "x"})
            .as_object()
            .unwrap()
            .clone();
        let once = sanitize(&body, &schema);
        let twice = sanitize(&once, &schema);
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_query_keeps_dollar_keys_except_reserved() {
        let schema = todo_schema();
        let query = json!({
            "id": "abc",
            "$fields": {"id": 1},
            "$limitRecursion": 2,
            "$skipEvents": true,
            "done": "true",
        })
        .as_object()
        .unwrap()
        .clone();
        let clean = sanitize_query(&query, &schema);
        assert_eq!(clean.get("id").unwrap(), "abc");
        assert!(clean.contains_key("$fields"));
        assert!(!clean.contains_key("$limitRecursion"));
        assert!(!clean.contains_key("$skipEvents"));
        assert_eq!(clean.get("done").unwrap(), &Value::Bool(true));
    }
}
