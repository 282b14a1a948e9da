//! In-place mutation commands (`$inc`, `$push`, `$pushAll`, `$pull`, `$pullAll`) extracted from a
//! payload and applied against a stored document.

use serde_json::{Map, Value};
use tracing::debug;

/// A single field's command, as scanned from a raw request body by [`build_commands`].
#[derive(Debug, Clone)]
pub struct Command {
    /// The field the command applies to.
    pub field: String,
    /// The `$`-prefixed operators and their operands for this field.
    pub operators: Map<String, Value>,
}

/// Scan `item` for fields whose value is a JSON object containing at least one `$`-prefixed
/// sub-key; such fields are recorded as commands. The field itself is left untouched here: the
/// caller still sanitizes it into the item normally, and the command form overwrites on apply.
///
/// Must run against the raw body, before [`crate::schema::sanitize`]: sanitize would otherwise
/// strip a command-shaped field since its shape never matches the declared property type.
pub fn build_commands(item: &Map<String, Value>) -> Vec<Command> {
    let mut commands = Vec::new();

    for (field, value) in item {
        let Value::Object(obj) = value else {
            continue;
        };
        let has_operator = obj.keys().any(|k| k.starts_with('$'));
        if has_operator {
            commands.push(Command {
                field: field.clone(),
                operators: obj.clone(),
            });
        }
    }

    commands
}

fn as_array_mut(obj: &mut Map<String, Value>, key: &str) -> Option<&mut Vec<Value>> {
    match obj.get_mut(key) {
        Some(Value::Array(arr)) => Some(arr),
        _ => None,
    }
}

fn apply_one(obj: &mut Map<String, Value>, key: &str, operators: &Map<String, Value>) {
    for (op, operand) in operators {
        match op.as_str() {
            "$inc" => {
                let current = obj.get(key).and_then(Value::as_f64).unwrap_or(0.0);
                let delta = operand.as_f64().unwrap_or(0.0);
                let Some(num) = serde_json::Number::from_f64(current + delta) else {
                    continue;
                };
                obj.insert(key.to_string(), Value::Number(num));
            }
            "$push" => {
                if let Some(arr) = as_array_mut(obj, key) {
                    arr.push(operand.clone());
                } else {
                    obj.insert(key.to_string(), Value::Array(vec![operand.clone()]));
                }
            }
            "$pushAll" => {
                let Value::Array(incoming) = operand else {
                    continue;
                };
                if let Some(arr) = as_array_mut(obj, key) {
                    arr.extend(incoming.iter().cloned());
                } else {
                    obj.insert(key.to_string(), operand.clone());
                }
            }
            "$pull" => {
                if let Some(arr) = as_array_mut(obj, key) {
                    arr.retain(|v| v != operand);
                }
            }
            "$pullAll" => {
                let Value::Array(targets) = operand else {
                    continue;
                };
                if let Some(arr) = as_array_mut(obj, key) {
                    arr.retain(|v| !targets.contains(v));
                }
            }
            other => {
                debug!(operator = other, field = key, "unknown command operator, ignored");
            }
        }
    }
}

/// Apply each command in `commands` against `obj` in place. Operators with operands of the wrong
/// shape (e.g. `$pushAll` with a non-array operand against a non-array target) are skipped rather
/// than erroring; the partially-applied object always survives so one field's bad command never
/// blocks the others.
pub fn exec_commands(obj: &mut Map<String, Value>, commands: &[Command]) {
    for command in commands {
        apply_one(obj, &command.field, &command.operators);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_commands_finds_dollar_fields() {
        let item = json!({"votes": {"$inc": 2}, "title": "a"})
            .as_object()
            .unwrap()
            .clone();
        let commands = build_commands(&item);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].field, "votes");
    }

    #[test]
    fn inc_applies_against_missing_field() {
        let mut obj = Map::new();
        let commands = vec![Command {
            field: "votes".to_string(),
            operators: json!({"$inc": 2}).as_object().unwrap().clone(),
        }];
        exec_commands(&mut obj, &commands);
        assert_eq!(obj.get("votes").unwrap(), &json!(2.0));
    }

    #[test]
    fn push_on_fresh_object_yields_one_element() {
        let mut obj = Map::new();
        let commands = vec![Command {
            field: "tags".to_string(),
            operators: json!({"$push": "a"}).as_object().unwrap().clone(),
        }];
        exec_commands(&mut obj, &commands);
        assert_eq!(obj.get("tags").unwrap(), &json!(["a"]));
    }

    #[test]
    fn pull_of_absent_value_is_noop() {
        let mut obj = json!({"tags": ["a", "b"]}).as_object().unwrap().clone();
        let commands = vec![Command {
            field: "tags".to_string(),
            operators: json!({"$pull": "z"}).as_object().unwrap().clone(),
        }];
        exec_commands(&mut obj, &commands);
        assert_eq!(obj.get("tags").unwrap(), &json!(["a", "b"]));
    }

    #[test]
    fn pull_all_removes_matching_members() {
        let mut obj = json!({"tags": ["a", "b", "c"]}).as_object().unwrap().clone();
        let commands = vec![Command {
            field: "tags".to_string(),
            operators: json!({"$pullAll": ["a", "c"]}).as_object().unwrap().clone(),
        }];
        exec_commands(&mut obj, &commands);
        assert_eq!(obj.get("tags").unwrap(), &json!(["b"]));
    }
}
