//! # Registry Module
//!
//! [`TagManager`] owns a named collection of entities. Admission namespaces
//! the entity as `<registry>:<name>`, persists it, and only then appends it.
//! Members are found by linear scan over their current names.

use crate::error::{Result, TagError};
use crate::gateway::Reply;
use crate::property::{FieldKind, FieldValue, Property, PropertyTable};
use crate::tag::Entity;
use async_trait::async_trait;
use std::fmt;
use tracing::{error, info, instrument};

struct RegistryFields {
    name: String,
}

static REGISTRY_PROPERTIES: PropertyTable<RegistryFields> = PropertyTable {
    entity: "TagManager",
    properties: &[Property {
        name: "name",
        kind: FieldKind::Text,
        get: |r| FieldValue::Text(r.name.clone()),
        set: |r, v| {
            if let FieldValue::Text(name) = v {
                r.name = name;
            }
        },
    }],
};

/// A named, append-only collection of entities.
pub struct TagManager {
    fields: RegistryFields,
    members: Vec<Box<dyn Entity>>,
}

impl TagManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            fields: RegistryFields { name: name.into() },
            members: Vec::new(),
        }
    }

    /// Namespace prefix of every admitted member.
    pub fn registry_name(&self) -> &str {
        &self.fields.name
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> impl Iterator<Item = &dyn Entity> + '_ {
        self.members.iter().map(|member| member.as_ref())
    }

    /// Current member names, in admission order.
    pub fn names(&self) -> Vec<String> {
        self.members.iter().map(|member| member.name()).collect()
    }

    /// Rename, initialize and append `entity`.
    ///
    /// On initialization failure the entity is dropped and the error is
    /// returned; the registry is left unchanged.
    pub async fn admit<E: Entity + 'static>(&mut self, entity: E) -> Result<()> {
        self.admit_boxed(Box::new(entity)).await
    }

    #[instrument(skip(self, entity), fields(registry = %self.fields.name), level = "debug")]
    pub async fn admit_boxed(&mut self, mut entity: Box<dyn Entity>) -> Result<()> {
        let name = format!("{}:{}", self.fields.name, entity.name());
        entity.assign("name", FieldValue::Text(name.clone()))?;

        if let Err(err) = entity.initialize().await {
            error!(registry = %self.fields.name, tag = %name, error = %err, "could not initialize tag");
            entity.shutdown().await;
            return Err(TagError::Admission {
                name,
                source: Box::new(err),
            });
        }

        info!(registry = %self.fields.name, tag = %name, "admitted");
        self.members.push(entity);
        Ok(())
    }

    fn find(&self, name: &str) -> Result<&dyn Entity> {
        self.members
            .iter()
            .find(|member| member.name() == name)
            .map(|member| member.as_ref())
            .ok_or_else(|| TagError::NotFound {
                name: name.to_string(),
            })
    }

    /// In-memory value of `property` on the member named exactly `name`.
    pub fn get(&self, name: &str, property: &str) -> Result<FieldValue> {
        self.find(name)?.property(property)
    }

    /// Validated write-through update of `property` on member `name`.
    pub async fn set(&self, name: &str, property: &str, value: FieldValue) -> Result<()> {
        self.find(name)?.set(name, property, value).await
    }

    /// Remove a member, stopping its background work.
    pub async fn remove(&mut self, name: &str) -> Option<Box<dyn Entity>> {
        let index = self.members.iter().position(|member| member.name() == name)?;
        let mut entity = self.members.remove(index);
        entity.shutdown().await;
        Some(entity)
    }

    /// Stop every member's background work. Members stay registered.
    pub async fn shutdown_all(&mut self) {
        for member in &mut self.members {
            member.shutdown().await;
        }
    }
}

#[async_trait]
impl Entity for TagManager {
    fn property(&self, property: &str) -> Result<FieldValue> {
        REGISTRY_PROPERTIES.read(&self.fields, property)
    }

    fn assign(&mut self, property: &str, value: FieldValue) -> Result<()> {
        REGISTRY_PROPERTIES.write(&mut self.fields, property, value)
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, path: &str, property: &str) -> Result<Reply> {
        TagManager::get(self, path, property).map(Reply::from)
    }

    async fn set(&self, path: &str, property: &str, value: FieldValue) -> Result<()> {
        TagManager::set(self, path, property, value).await
    }

    async fn shutdown(&mut self) {
        self.shutdown_all().await;
    }
}

impl fmt::Display for TagManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TagManager{{Name: {}, Tags#len: {}}}",
            self.fields.name,
            self.members.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryStore;
    use crate::tag::{Tag, TagContext};

    #[tokio::test]
    async fn test_admit_namespaces_member() {
        let store = MemoryStore::new();
        let ctx = TagContext::in_memory(&store);
        let mut manager = TagManager::new("@pressure");

        manager
            .admit(Tag::new(&ctx, "tank-0", "tank 0", 0, 100))
            .await
            .unwrap();

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.names(), vec!["@pressure:tank-0".to_string()]);
        assert_eq!(
            manager.get("@pressure:tank-0", "quality").unwrap(),
            FieldValue::Int(100)
        );
        assert_eq!(manager.to_string(), "TagManager{Name: @pressure, Tags#len: 1}");
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_lookup_requires_namespaced_name() {
        let store = MemoryStore::new();
        let ctx = TagContext::in_memory(&store);
        let mut manager = TagManager::new("@pressure");
        manager
            .admit(Tag::new(&ctx, "tank-0", "tank 0", 0, 100))
            .await
            .unwrap();

        let err = manager.get("tank-0", "value").unwrap_err();
        assert!(matches!(err, TagError::NotFound { .. }));
        assert!(manager
            .set("tank-0", "value", FieldValue::Int(1))
            .await
            .is_err());
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_remove_stops_member() {
        let store = MemoryStore::new();
        let ctx = TagContext::in_memory(&store);
        let mut manager = TagManager::new("@pressure");
        manager
            .admit(Tag::new(&ctx, "tank-0", "tank 0", 0, 100))
            .await
            .unwrap();

        let removed = manager.remove("@pressure:tank-0").await.expect("member");
        assert_eq!(removed.name(), "@pressure:tank-0");
        assert!(manager.is_empty());
        assert!(manager.remove("@pressure:tank-0").await.is_none());
    }

    #[tokio::test]
    async fn test_registry_is_an_entity() {
        let store = MemoryStore::new();
        let ctx = TagContext::in_memory(&store);
        let mut inner = TagManager::new("@pressure");
        inner
            .admit(Tag::new(&ctx, "tank-0", "tank 0", 3, 100))
            .await
            .unwrap();

        let mut plant = TagManager::new("plant");
        plant.admit(inner).await.unwrap();
        assert_eq!(plant.names(), vec!["plant:@pressure".to_string()]);

        let reply = Entity::get(&plant, "plant:@pressure", "name").await.unwrap();
        assert_eq!(reply, Reply::Text("plant:@pressure".to_string()));
        plant.shutdown_all().await;
    }
}
