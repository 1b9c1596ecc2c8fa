//! Lightweight secondary index over entity names.
//!
//! A [`Vector`] holds names only; reads and writes go straight to the store
//! under `<entity>:<property>` with no local caching.

use crate::error::{Result, TagError};
use crate::gateway::{Reply, StoreGateway};
use crate::property::{FieldKind, FieldValue, Property, PropertyTable};
use crate::tag::Entity;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

struct VectorFields {
    name: String,
}

static VECTOR_PROPERTIES: PropertyTable<VectorFields> = PropertyTable {
    entity: "Vector",
    properties: &[Property {
        name: "name",
        kind: FieldKind::Text,
        get: |v| FieldValue::Text(v.name.clone()),
        set: |v, value| {
            if let FieldValue::Text(name) = value {
                v.name = name;
            }
        },
    }],
};

/// A named list of entity names.
pub struct Vector {
    store: Arc<dyn StoreGateway>,
    fields: VectorFields,
    members: Vec<String>,
}

impl Vector {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn StoreGateway>,
        members: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            store,
            fields: VectorFields { name: name.into() },
            members: members.into_iter().collect(),
        }
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Record `entity`'s current name. Entities without a readable name are
    /// logged and skipped.
    pub fn append(&mut self, entity: &dyn Entity) -> Result<()> {
        match entity.property("name") {
            Ok(FieldValue::Text(name)) => {
                self.members.push(name);
                Ok(())
            }
            Ok(other) => {
                warn!(vector = %self.fields.name, name = %other, "entity has improper name");
                Err(TagError::TypeMismatch {
                    property: "name".to_string(),
                    expected: FieldKind::Text,
                    found: other.kind(),
                })
            }
            Err(err) => {
                warn!(vector = %self.fields.name, entity = %entity, error = %err, "could not append entity");
                Err(err)
            }
        }
    }

    fn key(entity: &str, property: &str) -> String {
        format!("{entity}:{property}")
    }
}

#[async_trait]
impl Entity for Vector {
    fn property(&self, property: &str) -> Result<FieldValue> {
        VECTOR_PROPERTIES.read(&self.fields, property)
    }

    fn assign(&mut self, property: &str, value: FieldValue) -> Result<()> {
        VECTOR_PROPERTIES.write(&mut self.fields, property, value)
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, path: &str, property: &str) -> Result<Reply> {
        self.store
            .get(&Self::key(path, property))
            .await
            .map_err(TagError::Store)
    }

    async fn set(&self, path: &str, property: &str, value: FieldValue) -> Result<()> {
        self.store
            .set(&Self::key(path, property), &value.to_string())
            .await
            .map_err(TagError::Store)?;
        Ok(())
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vector{{Name: {}, Tag#len: {}}}",
            self.fields.name,
            self.members.len()
        )
    }
}
