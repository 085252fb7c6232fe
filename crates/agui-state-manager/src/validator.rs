//! Per-agent state schemas.
//!
//! A schema maps top-level field names to a [`FieldType`] and lists the
//! fields that must be present. Fields the schema does not mention are
//! accepted as-is, and agents without a registered schema always pass.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use agui_state_store::{StateData, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structural type of a JSON value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    /// Any number, integers included
    Float,
    Boolean,
    Array,
    Object,
    Null,
    Any,
}

impl FieldType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Null => value.is_null(),
            FieldType::Any => true,
        }
    }

    /// Narrowest type describing `value`.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => FieldType::Null,
            Value::Bool(_) => FieldType::Boolean,
            Value::Number(n) if n.is_f64() => FieldType::Float,
            Value::Number(_) => FieldType::Integer,
            Value::String(_) => FieldType::String,
            Value::Array(_) => FieldType::Array,
            Value::Object(_) => FieldType::Object,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Null => "null",
            FieldType::Any => "any",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected shape of one agent's state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSchema {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldType>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl AgentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an optional typed field.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    /// Declare a required typed field.
    pub fn required_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        self.fields.insert(name.clone(), field_type);
        if !self.required.contains(&name) {
            self.required.push(name);
        }
        self
    }

    /// Every problem with `data`, in a stable order: missing fields first,
    /// then type mismatches by field name.
    pub fn check(&self, data: &StateData) -> Vec<String> {
        let mut problems: Vec<String> = self
            .required
            .iter()
            .filter(|name| !data.contains_key(name.as_str()))
            .map(|name| format!("missing required field '{name}'"))
            .collect();

        for (name, expected) in &self.fields {
            if let Some(value) = data.get(name) {
                if !expected.matches(value) {
                    problems.push(format!(
                        "field '{name}' expected {expected}, got {}",
                        FieldType::of(value)
                    ));
                }
            }
        }
        problems
    }
}

/// Registry of agent schemas.
#[derive(Debug, Default)]
pub struct StateValidator {
    schemas: RwLock<HashMap<String, AgentSchema>>,
}

impl StateValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, HashMap<String, AgentSchema>>> {
        self.schemas
            .read()
            .map_err(|_| StorageError::poisoned("schema registry"))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, HashMap<String, AgentSchema>>> {
        self.schemas
            .write()
            .map_err(|_| StorageError::poisoned("schema registry"))
    }

    /// Register or replace the schema for `agent_name`.
    pub fn register_schema(
        &self,
        agent_name: impl Into<String>,
        schema: AgentSchema,
    ) -> StorageResult<()> {
        self.write()?.insert(agent_name.into(), schema);
        Ok(())
    }

    /// Remove the schema for `agent_name`. Returns `true` if one existed.
    pub fn remove_schema(&self, agent_name: &str) -> StorageResult<bool> {
        Ok(self.write()?.remove(agent_name).is_some())
    }

    pub fn schema(&self, agent_name: &str) -> StorageResult<Option<AgentSchema>> {
        Ok(self.read()?.get(agent_name).cloned())
    }

    /// Check `data` against `agent_name`'s schema, reporting every problem.
    pub fn validate_state(&self, agent_name: &str, data: &StateData) -> StorageResult<()> {
        let problems = match self.read()?.get(agent_name) {
            Some(schema) => schema.check(data),
            None => return Ok(()),
        };
        if problems.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Validation {
                agent_name: agent_name.to_string(),
                problems,
            })
        }
    }
}
