//! # Property Module
//!
//! Name-indexed access to entity fields. Each entity kind declares a static
//! [`PropertyTable`] listing its fields with a typed getter and setter, so
//! properties can be addressed by string (as keys and notifications do)
//! while every accessor stays checked at compile time.

use crate::error::{Result, TagError};
use crate::gateway::Reply;

/// Declared kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Int,
    Int64,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Text => write!(f, "string"),
            FieldKind::Int => write!(f, "int"),
            FieldKind::Int64 => write!(f, "int64"),
        }
    }
}

/// A field value tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Int(i32),
    Int64(i64),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::Int64(_) => FieldKind::Int64,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Text(text) => write!(f, "{text}"),
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Int64(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int64(value)
    }
}

impl From<FieldValue> for Reply {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Text(text) => Reply::Text(text),
            FieldValue::Int(value) => Reply::Int(value as i64),
            FieldValue::Int64(value) => Reply::Int(value),
        }
    }
}

/// One addressable field of `T`.
pub struct Property<T> {
    pub name: &'static str,
    pub kind: FieldKind,
    pub get: fn(&T) -> FieldValue,
    /// Only called with a value whose kind equals `kind`.
    pub set: fn(&mut T, FieldValue),
}

/// The complete set of addressable fields of one entity kind.
pub struct PropertyTable<T: 'static> {
    pub entity: &'static str,
    pub properties: &'static [Property<T>],
}

impl<T: 'static> PropertyTable<T> {
    /// Find a property, ignoring ASCII case.
    pub fn lookup(&self, name: &str) -> Result<&'static Property<T>> {
        self.properties
            .iter()
            .find(|property| property.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| TagError::UnknownProperty {
                entity: self.entity.to_string(),
                property: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.properties.iter().map(|property| property.name)
    }

    pub fn read(&self, target: &T, name: &str) -> Result<FieldValue> {
        let property = self.lookup(name)?;
        Ok((property.get)(target))
    }

    /// Check `value` against the declared kind without writing it.
    pub fn check(&self, name: &str, value: &FieldValue) -> Result<&'static Property<T>> {
        let property = self.lookup(name)?;
        if value.kind() != property.kind {
            return Err(TagError::TypeMismatch {
                property: property.name.to_string(),
                expected: property.kind,
                found: value.kind(),
            });
        }
        Ok(property)
    }

    pub fn write(&self, target: &mut T, name: &str, value: FieldValue) -> Result<()> {
        let property = self.check(name, &value)?;
        (property.set)(target, value);
        Ok(())
    }
}

/// Convert a raw store reply into a value of `kind`.
pub fn convert(property: &str, kind: FieldKind, reply: &Reply) -> Result<FieldValue> {
    let converted = match kind {
        FieldKind::Text => reply.as_text().map(FieldValue::Text),
        FieldKind::Int => reply.as_i32().map(FieldValue::Int),
        FieldKind::Int64 => reply.as_i64().map(FieldValue::Int64),
    };
    converted.map_err(|err| TagError::Conversion {
        property: property.to_string(),
        reason: err.to_string(),
    })
}
