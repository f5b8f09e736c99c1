//! Explicit field tables for syncable entity types.
//!
//! Every type that syncs is registered up front with a descriptor listing
//! its domain fields. The same table drives both directions: building an
//! outgoing record copies exactly the listed fields, and applying an
//! incoming record accepts exactly the listed fields. Nothing is derived
//! from the entity at runtime.

use crate::entity::is_reserved_field;
use crate::error::{StoreError, StoreResult};
use zonesync_protocol::FieldValue;

/// The kind of value a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Boolean.
    Bool,
    /// Signed 64-bit integer.
    Int,
    /// 64-bit float.
    Float,
    /// UTF-8 text.
    Text,
    /// Timestamp in unix milliseconds.
    Timestamp,
    /// Raw bytes.
    Bytes,
}

impl FieldKind {
    /// Returns true when `value` is of this kind.
    pub fn matches(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (FieldKind::Bool, FieldValue::Bool(_))
                | (FieldKind::Int, FieldValue::Int(_))
                | (FieldKind::Float, FieldValue::Float(_))
                | (FieldKind::Text, FieldValue::Text(_))
                | (FieldKind::Timestamp, FieldValue::Timestamp(_))
                | (FieldKind::Bytes, FieldValue::Bytes(_))
        )
    }
}

/// One field in a descriptor table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name as it appears on both the entity and the record.
    pub name: String,
    /// Value kind.
    pub kind: FieldKind,
    /// Optional fields may be absent on either side; a missing required
    /// field keeps its previous local value on apply.
    pub optional: bool,
}

/// Field table for one syncable record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Record type this table describes.
    pub record_type: String,
    /// Declared domain fields.
    pub fields: Vec<FieldSpec>,
}

impl EntityDescriptor {
    /// Creates an empty descriptor for a record type.
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a required field.
    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            optional: false,
        });
        self
    }

    /// Adds an optional field.
    pub fn with_optional_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            optional: true,
        });
        self
    }

    /// Looks up a field spec by name.
    pub fn field_spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    /// Checks the table for reserved or duplicate field names.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidDescriptor`] when a field name collides
    /// with the engine's bookkeeping columns or appears twice.
    pub fn validate(&self) -> StoreResult<()> {
        for (i, spec) in self.fields.iter().enumerate() {
            if is_reserved_field(&spec.name) {
                return Err(StoreError::invalid_descriptor(
                    &self.record_type,
                    format!("field '{}' is reserved for sync bookkeeping", spec.name),
                ));
            }
            if self.fields[..i].iter().any(|prev| prev.name == spec.name) {
                return Err(StoreError::invalid_descriptor(
                    &self.record_type,
                    format!("field '{}' declared twice", spec.name),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matching() {
        assert!(FieldKind::Text.matches(&FieldValue::Text("x".into())));
        assert!(FieldKind::Int.matches(&FieldValue::Int(1)));
        assert!(!FieldKind::Int.matches(&FieldValue::Timestamp(1)));
        assert!(!FieldKind::Bool.matches(&FieldValue::Text("true".into())));
    }

    #[test]
    fn builder_collects_fields() {
        let descriptor = EntityDescriptor::new("Note")
            .with_field("title", FieldKind::Text)
            .with_optional_field("body", FieldKind::Text);

        assert_eq!(descriptor.fields.len(), 2);
        assert!(!descriptor.field_spec("title").unwrap().optional);
        assert!(descriptor.field_spec("body").unwrap().optional);
        assert!(descriptor.field_spec("missing").is_none());
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn validate_rejects_reserved_names() {
        let descriptor = EntityDescriptor::new("Note").with_field("synced", FieldKind::Bool);
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicates() {
        let descriptor = EntityDescriptor::new("Note")
            .with_field("title", FieldKind::Text)
            .with_field("title", FieldKind::Text);
        assert!(descriptor.validate().is_err());
    }

    mod properties {
        use super::*;
        use crate::entity::RESERVED_FIELD_NAMES;
        use proptest::prelude::*;

        proptest! {
            // Descriptors are the only path into outgoing records, so a
            // reserved name that cannot be registered can never be sent.
            #[test]
            fn reserved_names_never_validate(
                domain in proptest::collection::btree_set("[a-z]{1,8}", 0..5),
                reserved in 0usize..RESERVED_FIELD_NAMES.len(),
            ) {
                let mut descriptor = EntityDescriptor::new("Note");
                for name in &domain {
                    if !is_reserved_field(name) {
                        descriptor = descriptor.with_field(name.as_str(), FieldKind::Text);
                    }
                }
                descriptor =
                    descriptor.with_field(RESERVED_FIELD_NAMES[reserved], FieldKind::Text);
                prop_assert!(descriptor.validate().is_err());
            }
        }
    }
}
