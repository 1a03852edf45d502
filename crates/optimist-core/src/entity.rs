//! # Entity State
//!
//! An entity is a bag of named models; each model is a JSON object of
//! fields. The engine never interprets field values, it only reads, writes
//! and compares them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Fields of a single model.
pub type ModelState = Map<String, Value>;

/// Address of one field inside an entity: `model.field`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldPath {
    /// Model name, e.g. `dojo_starter-Moves`
    pub model: String,
    /// Field name inside the model
    pub field: String,
}

impl FieldPath {
    /// Build a field path
    pub fn new(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.model, self.field)
    }
}

/// State of one entity: model name -> model fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    models: BTreeMap<String, ModelState>,
}

impl EntityState {
    /// Create an empty entity
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a model from a JSON value.
    ///
    /// Non-object values are stored as an empty model.
    pub fn with_model(mut self, name: impl Into<String>, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.models.insert(name.into(), fields);
        self
    }

    /// Look up a model
    pub fn model(&self, name: &str) -> Option<&ModelState> {
        self.models.get(name)
    }

    /// Check whether a model is present
    pub fn has_model(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Look up a field value
    pub fn field(&self, model: &str, field: &str) -> Option<&Value> {
        self.models.get(model).and_then(|m| m.get(field))
    }

    /// Look up a field by path
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        self.field(&path.model, &path.field)
    }

    /// Write a field, creating the model if needed
    pub fn set_field(&mut self, model: &str, field: &str, value: Value) {
        self.models
            .entry(model.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    /// Remove a field, returning its previous value
    pub fn remove_field(&mut self, model: &str, field: &str) -> Option<Value> {
        self.models.get_mut(model).and_then(|m| m.remove(field))
    }

    /// Insert or replace a whole model
    pub fn insert_model(&mut self, name: impl Into<String>, fields: ModelState) {
        self.models.insert(name.into(), fields);
    }

    /// Remove a whole model
    pub fn remove_model(&mut self, name: &str) -> Option<ModelState> {
        self.models.remove(name)
    }

    /// Iterate over models in name order
    pub fn models(&self) -> impl Iterator<Item = (&str, &ModelState)> {
        self.models.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of models
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// True when the entity carries no models
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Replace the models named in `other`, keeping all others.
    pub fn merge_models(&mut self, other: &EntityState) {
        for (name, fields) in &other.models {
            self.models.insert(name.clone(), fields.clone());
        }
    }
}
