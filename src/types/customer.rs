//! Customer record and identity key

use crate::error::SelectionError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw customer record as received from the outside world.
///
/// Field values are kept as JSON values so that heterogeneous sources
/// (numbers encoded as strings, booleans, nulls) survive until the
/// canonicalizer decides what to do with them. Extra fields are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerRecord {
    fields: Map<String, Value>,
}

impl CustomerRecord {
    /// Create a record from a JSON object map
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Builder-style field insertion, mostly useful in tests and tools
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Raw value of a field, `None` when absent
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Numeric view of a field. Numeric strings and booleans are accepted.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(value_as_f64)
    }

    /// Numeric view with a fallback for absent or unparseable values
    pub fn number_or(&self, name: &str, default: f64) -> f64 {
        self.number(name).unwrap_or(default)
    }

    /// True when the field is a truthy flag (non-zero number, `true`, "1")
    pub fn flag(&self, name: &str) -> bool {
        self.number(name).map(|v| v != 0.0).unwrap_or(false)
    }

    /// Trimmed text view of a field
    pub fn text(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            Value::Null => None,
            Value::String(s) => Some(s.trim().to_string()),
            other => Some(normalize_scalar(other)),
        }
    }

    /// Field names present on the record
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of fields on the record
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy of the record without the given fields (used to strip personal data)
    pub fn without(&self, excluded: &[&str]) -> CustomerRecord {
        let fields = self
            .fields
            .iter()
            .filter(|(k, _)| !excluded.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        CustomerRecord { fields }
    }

    /// Normalize a selection payload into a single record.
    ///
    /// Grid widgets hand back either a single row object or a list of rows;
    /// only the first row is used. NaN-like markers and blank strings become
    /// nulls so downstream code never has to sniff types.
    pub fn from_selection(payload: Value) -> Result<CustomerRecord, SelectionError> {
        let row = match payload {
            Value::Object(map) => map,
            Value::Array(rows) => match rows.into_iter().next() {
                Some(Value::Object(map)) => map,
                Some(other) => {
                    return Err(SelectionError::MalformedPayload(type_name(&other).into()))
                }
                None => return Err(SelectionError::EmptyPayload),
            },
            Value::Null => return Err(SelectionError::EmptyPayload),
            other => return Err(SelectionError::MalformedPayload(type_name(&other).into())),
        };

        let fields = row
            .into_iter()
            .map(|(k, v)| (k, clean_selection_value(v)))
            .collect();
        Ok(CustomerRecord { fields })
    }
}

impl From<Map<String, Value>> for CustomerRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn clean_selection_value(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
                Value::Null
            } else {
                Value::String(s)
            }
        }
        other => other,
    }
}

/// Lenient numeric coercion shared by the record accessors and the canonicalizer.
/// Returns `None` for nulls, non-numeric text and non-finite values.
pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// Render a scalar so that incidental type differences (`7` vs `7.0` vs `"7"`)
/// compare equal.
fn normalize_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            Some(f) => f.to_string(),
            None => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Names of the record fields that make up the identity key
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IdentityFields {
    #[serde(default = "default_first_name_field")]
    pub first_name: String,
    #[serde(default = "default_last_name_field")]
    pub last_name: String,
    #[serde(default = "default_contact_field")]
    pub contact: String,
}

fn default_first_name_field() -> String {
    "Name".to_string()
}

fn default_last_name_field() -> String {
    "Surname".to_string()
}

fn default_contact_field() -> String {
    "email".to_string()
}

impl Default for IdentityFields {
    fn default() -> Self {
        Self {
            first_name: default_first_name_field(),
            last_name: default_last_name_field(),
            contact: default_contact_field(),
        }
    }
}

impl IdentityFields {
    /// Personal fields that must never reach a model or an external strategy
    pub fn personal_fields(&self) -> [&str; 5] {
        [
            self.first_name.as_str(),
            self.last_name.as_str(),
            self.contact.as_str(),
            "phone",
            "address",
        ]
    }
}

/// Ordered (first name, last name, contact) triple identifying a customer.
///
/// Blank fields are part of the key; a key where every part is blank is
/// rejected because it cannot tell two customers apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub first_name: String,
    pub last_name: String,
    pub contact: String,
}

impl IdentityKey {
    pub fn new(first_name: &str, last_name: &str, contact: &str) -> Result<Self, SelectionError> {
        let key = Self {
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            contact: contact.trim().to_string(),
        };
        if key.is_blank() {
            return Err(SelectionError::InvalidIdentity);
        }
        Ok(key)
    }

    /// Extract the key from a record using the configured field names
    pub fn from_record(
        record: &CustomerRecord,
        fields: &IdentityFields,
    ) -> Result<Self, SelectionError> {
        let part = |name: &str| record.get(name).map(normalize_scalar).unwrap_or_default();
        Self::new(
            &part(&fields.first_name),
            &part(&fields.last_name),
            &part(&fields.contact),
        )
    }

    fn is_blank(&self) -> bool {
        self.first_name.is_empty() && self.last_name.is_empty() && self.contact.is_empty()
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} <{}>", self.first_name, self.last_name, self.contact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> CustomerRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_numeric_coercion() {
        let r = record(json!({"age": 42, "score": " 612.5 ", "flag": true, "bad": "n/a"}));
        assert_eq!(r.number("age"), Some(42.0));
        assert_eq!(r.number("score"), Some(612.5));
        assert_eq!(r.number("flag"), Some(1.0));
        assert_eq!(r.number("bad"), None);
        assert_eq!(r.number("missing"), None);
        assert_eq!(r.number_or("missing", 3.0), 3.0);
    }

    #[test]
    fn test_identity_tolerates_type_differences() {
        let fields = IdentityFields::default();
        let a = record(json!({"Name": " Ana ", "Surname": "Ruiz", "email": 7}));
        let b = record(json!({"Name": "Ana", "Surname": "Ruiz ", "email": 7.0}));
        let c = record(json!({"Name": "Ana", "Surname": "Ruiz", "email": "7"}));
        let ka = IdentityKey::from_record(&a, &fields).unwrap();
        assert_eq!(ka, IdentityKey::from_record(&b, &fields).unwrap());
        assert_eq!(ka, IdentityKey::from_record(&c, &fields).unwrap());
    }

    #[test]
    fn test_identity_blank_fields_are_part_of_key() {
        let fields = IdentityFields::default();
        let a = record(json!({"Name": "Ana", "Surname": null, "email": ""}));
        let key = IdentityKey::from_record(&a, &fields).unwrap();
        assert_eq!(key.last_name, "");
        assert_eq!(key.contact, "");

        let empty = record(json!({"Name": "  ", "Surname": null}));
        assert_eq!(
            IdentityKey::from_record(&empty, &fields),
            Err(SelectionError::InvalidIdentity)
        );
    }

    #[test]
    fn test_selection_payload_shapes() {
        let row = CustomerRecord::from_selection(json!({"Name": "Ana", "age": 30})).unwrap();
        assert_eq!(row.number("age"), Some(30.0));

        let list = CustomerRecord::from_selection(json!([
            {"Name": "Ana", "housing": "nan"},
            {"Name": "Luis"}
        ]))
        .unwrap();
        assert_eq!(list.text("Name").as_deref(), Some("Ana"));
        assert_eq!(list.get("housing"), Some(&Value::Null));

        assert_eq!(
            CustomerRecord::from_selection(json!([])),
            Err(SelectionError::EmptyPayload)
        );
        assert!(matches!(
            CustomerRecord::from_selection(json!(12)),
            Err(SelectionError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_without_strips_personal_fields() {
        let r = record(json!({"Name": "Ana", "email": "a@x", "age": 30}));
        let stripped = r.without(&IdentityFields::default().personal_fields());
        assert_eq!(stripped.len(), 1);
        assert_eq!(stripped.number("age"), Some(30.0));
    }
}
