//! Record model
//!
//! A [`Record`] is a row of typed [`FieldValue`]s backed by a shared
//! [`Schema`]. Schemas are described with Avro-style record schema text:
//!
//! ```json
//! {
//!   "type": "record",
//!   "name": "cdr",
//!   "fields": [
//!     { "name": "chargingCharacteristics", "type": "string" },
//!     { "name": "duration", "type": ["null", "long"] }
//!   ]
//! }
//! ```
//!
//! A union with `"null"` marks the field as nullable.

use crate::error::{ProcessError, ProcessResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Declared type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Int,
    Long,
    Float,
    Double,
    Boolean,
}

impl FieldType {
    /// Parse an Avro primitive type name
    pub fn from_avro(name: &str) -> Option<Self> {
        match name {
            "string" => Some(FieldType::String),
            "int" => Some(FieldType::Int),
            "long" => Some(FieldType::Long),
            "float" => Some(FieldType::Float),
            "double" => Some(FieldType::Double),
            "boolean" => Some(FieldType::Boolean),
            _ => None,
        }
    }

    pub fn avro_name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Long => "long",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Boolean => "boolean",
        }
    }

    /// Parse raw text into a value of this type
    pub fn parse_text(&self, raw: &str) -> Result<FieldValue, String> {
        match self {
            FieldType::String => Ok(FieldValue::String(raw.to_string())),
            FieldType::Int => raw
                .trim()
                .parse::<i32>()
                .map(|v| FieldValue::Long(v as i64))
                .map_err(|e| format!("'{}' is not an int: {}", raw, e)),
            FieldType::Long => raw
                .trim()
                .parse::<i64>()
                .map(FieldValue::Long)
                .map_err(|e| format!("'{}' is not a long: {}", raw, e)),
            FieldType::Float | FieldType::Double => raw
                .trim()
                .parse::<f64>()
                .map(FieldValue::Double)
                .map_err(|e| format!("'{}' is not a {}: {}", raw, self.avro_name(), e)),
            FieldType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(FieldValue::Boolean(true)),
                "false" => Ok(FieldValue::Boolean(false)),
                _ => Err(format!("'{}' is not a boolean", raw)),
            },
        }
    }
}

/// A field descriptor: name, declared type and nullability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: FieldType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable,
        }
    }
}

/// Ordered sequence of field descriptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: Option<String>,
    fields: Vec<SchemaField>,
}

impl Schema {
    pub fn new(fields: Vec<SchemaField>) -> Self {
        Self { name: None, fields }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Parse Avro-style record schema text
    pub fn from_avro_text(text: &str) -> ProcessResult<Self> {
        let parsed: AvroRecordSchema = serde_json::from_str(text)
            .map_err(|e| ProcessError::schema(format!("Invalid schema text: {}", e)))?;

        if parsed.kind != "record" {
            return Err(ProcessError::schema(format!(
                "Schema type must be 'record', got '{}'",
                parsed.kind
            )));
        }

        if parsed.fields.is_empty() {
            return Err(ProcessError::schema("Schema must declare at least one field"));
        }

        let mut fields = Vec::with_capacity(parsed.fields.len());
        for field in parsed.fields {
            let (field_type, nullable) = parse_avro_type(&field.name, &field.field_type)?;
            if fields.iter().any(|f: &SchemaField| f.name == field.name) {
                return Err(ProcessError::schema(format!(
                    "Duplicate field '{}' in schema",
                    field.name
                )));
            }
            fields.push(SchemaField::new(field.name, field_type, nullable));
        }

        Ok(Self {
            name: parsed.name,
            fields,
        })
    }

    /// Render this schema as Avro-style record schema text
    pub fn to_avro_text(&self) -> String {
        let fields: Vec<AvroField> = self
            .fields
            .iter()
            .map(|f| AvroField {
                name: f.name.clone(),
                field_type: if f.nullable {
                    serde_json::json!(["null", f.field_type.avro_name()])
                } else {
                    Value::String(f.field_type.avro_name().to_string())
                },
            })
            .collect();

        let schema = AvroRecordSchema {
            kind: "record".to_string(),
            name: Some(self.name.clone().unwrap_or_else(|| "record".to_string())),
            fields,
        };

        serde_json::to_string(&schema).unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AvroRecordSchema {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    fields: Vec<AvroField>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AvroField {
    name: String,
    #[serde(rename = "type")]
    field_type: Value,
}

/// Resolve an Avro field type into (type, nullable)
fn parse_avro_type(field: &str, value: &Value) -> ProcessResult<(FieldType, bool)> {
    let unsupported = || {
        ProcessError::schema(format!(
            "Unsupported type for field '{}': {}",
            field, value
        ))
    };

    match value {
        Value::String(name) => FieldType::from_avro(name)
            .map(|t| (t, false))
            .ok_or_else(unsupported),
        Value::Array(branches) => {
            let mut nullable = false;
            let mut resolved = None;
            for branch in branches {
                match branch.as_str() {
                    Some("null") => nullable = true,
                    Some(name) if resolved.is_none() => {
                        resolved = Some(FieldType::from_avro(name).ok_or_else(unsupported)?);
                    }
                    _ => return Err(unsupported()),
                }
            }
            resolved.map(|t| (t, nullable)).ok_or_else(unsupported)
        }
        Value::Object(map) => match map.get("type") {
            Some(inner) => parse_avro_type(field, inner),
            None => Err(unsupported()),
        },
        _ => Err(unsupported()),
    }
}

/// A typed field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce this value to the given output type
    pub fn coerce(&self, target: FieldType) -> Result<FieldValue, String> {
        match (self, target) {
            (FieldValue::Null, _) => Ok(FieldValue::Null),
            (FieldValue::String(s), FieldType::String) => Ok(FieldValue::String(s.clone())),
            (FieldValue::String(s), other) => other.parse_text(s),
            (value, FieldType::String) => Ok(FieldValue::String(value.to_string())),
            (FieldValue::Long(v), FieldType::Int) => i32::try_from(*v)
                .map(|v| FieldValue::Long(v as i64))
                .map_err(|_| format!("{} does not fit in an int", v)),
            (FieldValue::Long(v), FieldType::Long) => Ok(FieldValue::Long(*v)),
            (FieldValue::Long(v), FieldType::Float | FieldType::Double) => {
                Ok(FieldValue::Double(*v as f64))
            }
            (FieldValue::Double(v), FieldType::Float | FieldType::Double) => {
                Ok(FieldValue::Double(*v))
            }
            (FieldValue::Boolean(b), FieldType::Boolean) => Ok(FieldValue::Boolean(*b)),
            (value, target) => Err(format!(
                "cannot convert {} to {}",
                value.type_name(),
                target.avro_name()
            )),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::String(_) => "string",
            FieldValue::Long(_) => "long",
            FieldValue::Double(_) => "double",
            FieldValue::Boolean(_) => "boolean",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::String(s) => f.write_str(s),
            FieldValue::Long(v) => write!(f, "{}", v),
            FieldValue::Double(v) => write!(f, "{}", v),
            FieldValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

/// One structured record conforming to exactly one schema
///
/// Values can be overwritten in place; fields are never added or removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<FieldValue>,
}

impl Record {
    pub fn new(schema: Arc<Schema>, values: Vec<FieldValue>) -> ProcessResult<Self> {
        if values.len() != schema.len() {
            return Err(ProcessError::schema(format!(
                "Record has {} values but schema declares {} fields",
                values.len(),
                schema.len()
            )));
        }
        Ok(Self { schema, values })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn get_value(&self, name: &str) -> Option<&FieldValue> {
        self.schema.index_of(name).map(|idx| &self.values[idx])
    }

    /// Overwrite an existing field; returns false if the schema has no such field
    pub fn set_value(&mut self, name: &str, value: FieldValue) -> bool {
        match self.schema.index_of(name) {
            Some(idx) => {
                self.values[idx] = value;
                true
            }
            None => false,
        }
    }
}
