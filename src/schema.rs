//! Recursive Schema / Spec validation (design notes §9, GLOSSARY).
//!
//! `Schema` is a tagged tree of leaves (`Integer`, `String`, `Number`,
//! `Boolean`), ordered `List`s, and keyed `Map`s. `validate` walks a
//! `serde_json::Value` against the schema applying constraints, defaults,
//! `required`, and version gates; `resolve` coerces a raw value into its
//! canonical form. `Spec` is a lazy, validated projection of a data map onto
//! a schema — indexing a key triggers validation and default insertion.

use crate::error::{EngineError, Result};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub enum Constraint {
    AllowedValues(Vec<String>),
}

impl Constraint {
    fn validate(&self, value: &Value) -> Result<()> {
        match self {
            Constraint::AllowedValues(allowed) => {
                let s = value.as_str().map(|s| s.to_string()).unwrap_or_else(|| value.to_string());
                if allowed.iter().any(|a| a == &s) {
                    Ok(())
                } else {
                    Err(EngineError::Validation(format!(
                        "\"{s}\" is not an allowed value, must be one of {allowed:?}"
                    )))
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Schema {
    Integer(LeafMeta),
    String(LeafMeta),
    Number(LeafMeta),
    Boolean(LeafMeta),
    List { meta: LeafMeta, item: Box<Schema> },
    Map { meta: LeafMeta, schema: BTreeMap<String, Schema> },
}

#[derive(Debug, Clone, Default)]
pub struct LeafMeta {
    pub description: Option<String>,
    pub default: Option<Value>,
    pub required: bool,
    pub updatable: bool,
    pub constraints: Vec<Constraint>,
    pub min_version: Option<String>,
    pub max_version: Option<String>,
}

impl LeafMeta {
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }

    pub fn with_default(default: Value) -> Self {
        Self {
            default: Some(default),
            ..Default::default()
        }
    }

    pub fn with_constraints(mut self, constraints: Vec<Constraint>) -> Self {
        self.constraints = constraints;
        self
    }
}

impl Schema {
    fn meta(&self) -> &LeafMeta {
        match self {
            Schema::Integer(m) | Schema::String(m) | Schema::Number(m) | Schema::Boolean(m) => m,
            Schema::List { meta, .. } | Schema::Map { meta, .. } => meta,
        }
    }

    pub fn has_default(&self) -> bool {
        self.meta().default.is_some()
    }

    pub fn default_value(&self) -> Option<Value> {
        self.meta().default.clone()
    }

    pub fn required(&self) -> bool {
        self.meta().required
    }

    /// Coerce `value` into canonical form for this schema's type.
    pub fn resolve(&self, value: &Value) -> Result<Value> {
        match self {
            Schema::Integer(_) => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                Value::String(s) => s
                    .parse::<i64>()
                    .map(|n| Value::from(n))
                    .map_err(|_| EngineError::Validation(format!("\"{s}\" cannot be converted into an integer"))),
                _ => Err(EngineError::Validation(format!("{value} cannot be converted into an integer"))),
            },
            Schema::Number(_) => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => s
                    .parse::<f64>()
                    .map(|n| Value::from(n))
                    .map_err(|_| EngineError::Validation(format!("\"{s}\" cannot be converted into a number"))),
                _ => Err(EngineError::Validation(format!("{value} cannot be converted into a number"))),
            },
            Schema::String(_) => Ok(Value::String(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })),
            Schema::Boolean(_) => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) => match s.to_lowercase().as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(EngineError::Validation(format!("\"{s}\" is not a valid Boolean"))),
                },
                _ => Err(EngineError::Validation(format!("{value} is not a valid Boolean"))),
            },
            Schema::List { item, .. } => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| EngineError::Validation(format!("\"{value}\" is not a List")))?;
                let mut out = Vec::with_capacity(arr.len());
                for v in arr {
                    out.push(item.resolve(v)?);
                }
                Ok(Value::Array(out))
            }
            Schema::Map { schema, .. } => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| EngineError::Validation(format!("\"{value}\" is not a Map")))?;
                for key in obj.keys() {
                    if !schema.contains_key(key) {
                        return Err(EngineError::Validation(format!("Unrecognizable spec item \"{key}\"")));
                    }
                }
                let mut out = serde_json::Map::new();
                for (key, child) in schema {
                    let resolved = match obj.get(key) {
                        Some(v) => child.resolve(v)?,
                        None if child.has_default() => child.default_value().unwrap(),
                        None if child.required() => {
                            return Err(EngineError::Validation(format!(
                                "Required spec item \"{key}\" not assigned"
                            )))
                        }
                        None => continue,
                    };
                    out.insert(key.clone(), resolved);
                }
                Ok(Value::Object(out))
            }
        }
    }

    /// Validate `value` (already resolved or raw) against this schema,
    /// applying constraints recursively.
    pub fn validate(&self, value: &Value, version: Option<&str>) -> Result<()> {
        if let Some(v) = version {
            self.validate_version(v)?;
        }
        let resolved = self.resolve(value)?;
        for c in &self.meta().constraints {
            c.validate(&resolved)?;
        }
        if let Schema::Map { schema, .. } = self {
            let obj = resolved.as_object().expect("resolve produced a Map");
            for (key, child) in schema {
                if let Some(v) = obj.get(key) {
                    child.validate(v, version)?;
                }
            }
        }
        if let Schema::List { item, .. } = self {
            let arr = resolved.as_array().expect("resolve produced a List");
            for v in arr {
                item.validate(v, version)?;
            }
        }
        Ok(())
    }

    fn validate_version(&self, version: &str) -> Result<()> {
        let meta = self.meta();
        if let Some(min) = &meta.min_version {
            if min.as_str() > version {
                return Err(EngineError::Validation(format!(
                    "min_version={min} is not supported by spec version {version}"
                )));
            }
        }
        if let Some(max) = &meta.max_version {
            if version > max.as_str() {
                return Err(EngineError::Validation(format!(
                    "max_version={max} is not supported by spec version {version}"
                )));
            }
        }
        Ok(())
    }
}

/// A lazy, validated view binding a data map onto a schema.
pub struct Spec<'a> {
    schema: &'a BTreeMap<String, Schema>,
    data: &'a serde_json::Map<String, Value>,
    version: Option<String>,
}

impl<'a> Spec<'a> {
    pub fn new(
        schema: &'a BTreeMap<String, Schema>,
        data: &'a serde_json::Map<String, Value>,
        version: Option<String>,
    ) -> Self {
        Self { schema, data, version }
    }

    pub fn validate(&self) -> Result<()> {
        for (key, s) in self.schema {
            self.resolve_value(key)?;
            if let Some(v) = &self.version {
                s.validate(self.data.get(key).unwrap_or(&Value::Null), Some(v))?;
            }
        }
        for key in self.data.keys() {
            if !self.schema.contains_key(key) {
                return Err(EngineError::Validation(format!("Unrecognizable spec item \"{key}\"")));
            }
        }
        Ok(())
    }

    pub fn resolve_value(&self, key: &str) -> Result<Value> {
        let schema_item = self
            .schema
            .get(key)
            .ok_or_else(|| EngineError::Validation(format!("Invalid spec item: \"{key}\"")))?;
        if let Some(raw) = self.data.get(key) {
            schema_item.resolve(raw)
        } else if schema_item.has_default() {
            Ok(schema_item.default_value().unwrap())
        } else if schema_item.required() {
            Err(EngineError::Validation(format!("Required spec item \"{key}\" not assigned")))
        } else {
            Ok(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scaling_schema() -> BTreeMap<String, Schema> {
        let mut adjustment = BTreeMap::new();
        adjustment.insert(
            "type".to_string(),
            Schema::String(LeafMeta::with_default(json!("CHANGE_IN_CAPACITY")).with_constraints(vec![
                Constraint::AllowedValues(vec![
                    "EXACT_CAPACITY".into(),
                    "CHANGE_IN_CAPACITY".into(),
                    "CHANGE_IN_PERCENTAGE".into(),
                ]),
            ])),
        );
        adjustment.insert("number".to_string(), Schema::Number(LeafMeta::with_default(json!(1))));
        adjustment.insert("min_step".to_string(), Schema::Integer(LeafMeta::with_default(json!(1))));
        adjustment.insert(
            "best_effort".to_string(),
            Schema::Boolean(LeafMeta::with_default(json!(false))),
        );
        let mut top = BTreeMap::new();
        top.insert(
            "adjustment".to_string(),
            Schema::Map {
                meta: LeafMeta::default(),
                schema: adjustment,
            },
        );
        top
    }

    #[test]
    fn defaults_fill_in_missing_keys() {
        let schema = scaling_schema();
        let data = serde_json::Map::new();
        let spec = Spec::new(&schema, &data, None);
        let resolved = spec.resolve_value("adjustment").unwrap();
        assert_eq!(resolved["type"], json!("CHANGE_IN_CAPACITY"));
        assert_eq!(resolved["number"], json!(1));
    }

    #[test]
    fn unknown_key_rejected() {
        let schema = scaling_schema();
        let mut data = serde_json::Map::new();
        data.insert("bogus".to_string(), json!(1));
        let spec = Spec::new(&schema, &data, None);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn allowed_values_constraint_enforced() {
        let schema = scaling_schema();
        let mut adjustment = serde_json::Map::new();
        adjustment.insert("type".to_string(), json!("NOT_A_TYPE"));
        let mut data = serde_json::Map::new();
        data.insert("adjustment".to_string(), Value::Object(adjustment));
        let spec = Spec::new(&schema, &data, None);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn required_leaf_without_default_errors() {
        let mut schema = BTreeMap::new();
        schema.insert("detection_type".to_string(), Schema::String(LeafMeta::required()));
        let data = serde_json::Map::new();
        let spec = Spec::new(&schema, &data, None);
        assert!(spec.validate().is_err());
    }
}
