//! # Patches
//!
//! A [`Patch`] is an ordered list of field writes. Applying it is a pure
//! state transition that also yields a [`PreImage`]: the prior value of
//! every field the patch actually touched. Restoring the pre-image rewrites
//! exactly those fields, which is what makes field-level revert possible
//! when several speculative patches overlap on one entity.

use crate::entity::{EntityState, FieldPath};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// What a single patch operation does to its field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldWrite {
    /// Write the value, creating the field (and model) when absent
    Set(Value),
    /// Delete the field if present
    Remove,
}

/// One field write inside a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOp {
    /// Target field
    pub path: FieldPath,
    /// Operation on the field
    pub write: FieldWrite,
    /// Skip the write when the model is not already present
    pub require_model: bool,
}

/// Ordered, replayable set of field writes against one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    ops: Vec<PatchOp>,
}

impl Patch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` into `model.field`, creating the model if needed
    pub fn set(self, model: impl Into<String>, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(FieldPath::new(model, field), FieldWrite::Set(value.into()), false)
    }

    /// Write `value` into `model.field` only when the model already exists.
    ///
    /// Mirrors the "only touch the draft if the model is loaded" pattern:
    /// a patch against an entity that has not been indexed yet is a no-op.
    pub fn set_existing(
        self,
        model: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.push(FieldPath::new(model, field), FieldWrite::Set(value.into()), true)
    }

    /// Delete `model.field`
    pub fn remove(self, model: impl Into<String>, field: impl Into<String>) -> Self {
        self.push(FieldPath::new(model, field), FieldWrite::Remove, true)
    }

    fn push(mut self, path: FieldPath, write: FieldWrite, require_model: bool) -> Self {
        self.ops.push(PatchOp {
            path,
            write,
            require_model,
        });
        self
    }

    /// Operations in application order
    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    /// True when the patch has no operations
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Fields this patch declares a write for
    pub fn declared_fields(&self) -> BTreeSet<FieldPath> {
        self.ops.iter().map(|op| op.path.clone()).collect()
    }

    /// Apply the patch to a copy of `state`.
    pub fn apply(&self, state: &EntityState) -> (EntityState, PreImage) {
        let mut next = state.clone();
        let pre_image = self.apply_in_place(&mut next);
        (next, pre_image)
    }

    /// Apply the patch to `state` directly, returning the pre-image.
    pub fn apply_in_place(&self, state: &mut EntityState) -> PreImage {
        let mut pre_image = PreImage::default();
        let mut recorded: BTreeSet<&FieldPath> = BTreeSet::new();

        for op in &self.ops {
            let model_existed = state.has_model(&op.path.model);
            if op.require_model && !model_existed {
                continue;
            }

            match &op.write {
                FieldWrite::Set(value) => {
                    if recorded.insert(&op.path) {
                        pre_image.fields.push(PriorField {
                            path: op.path.clone(),
                            prior: state.get_path(&op.path).cloned(),
                            model_existed,
                        });
                    }
                    state.set_field(&op.path.model, &op.path.field, value.clone());
                }
                FieldWrite::Remove => {
                    if state.get_path(&op.path).is_none() {
                        continue;
                    }
                    if recorded.insert(&op.path) {
                        pre_image.fields.push(PriorField {
                            path: op.path.clone(),
                            prior: state.get_path(&op.path).cloned(),
                            model_existed,
                        });
                    }
                    state.remove_field(&op.path.model, &op.path.field);
                }
            }
        }

        pre_image
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PriorField {
    path: FieldPath,
    prior: Option<Value>,
    model_existed: bool,
}

/// Prior values of the fields a patch touched, in first-touch order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreImage {
    fields: Vec<PriorField>,
}

impl PreImage {
    /// Fields the patch actually changed
    pub fn touched(&self) -> impl Iterator<Item = &FieldPath> {
        self.fields.iter().map(|f| &f.path)
    }

    /// Prior value of a touched field: `None` if the field was not touched,
    /// `Some(None)` if it did not exist before the patch.
    pub fn prior(&self, path: &FieldPath) -> Option<Option<&Value>> {
        self.fields
            .iter()
            .find(|f| &f.path == path)
            .map(|f| f.prior.as_ref())
    }

    /// True when the patch left the state unchanged
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Restore the touched fields on a copy of `state`.
    pub fn restore(&self, state: &EntityState) -> EntityState {
        let mut restored = state.clone();
        self.restore_in_place(&mut restored);
        restored
    }

    /// Restore the touched fields in place. Models created by the patch are
    /// dropped again once they are empty.
    pub fn restore_in_place(&self, state: &mut EntityState) {
        for prior in self.fields.iter().rev() {
            let FieldPath { model, field } = &prior.path;
            match &prior.prior {
                Some(value) => state.set_field(model, field, value.clone()),
                None => {
                    state.remove_field(model, field);
                }
            }
            if !prior.model_existed && state.model(model).is_some_and(|m| m.is_empty()) {
                state.remove_model(model);
            }
        }
    }
}
