//! Error type shared by tags, registries and the reconciliation loop.

use crate::property::FieldKind;

/// Errors returned by entity, registry and batch operations.
#[derive(Debug)]
pub enum TagError {
    /// The property exists but may only be changed by internal update paths.
    NotEditable { property: String },
    /// The entity kind has no property with this name.
    UnknownProperty { entity: String, property: String },
    /// The replacement value does not match the declared field kind.
    TypeMismatch {
        property: String,
        expected: FieldKind,
        found: FieldKind,
    },
    /// No registry member carries this name.
    NotFound { name: String },
    /// A raw store reply could not be converted to the field kind.
    Conversion { property: String, reason: String },
    /// The store gateway failed.
    Store(anyhow::Error),
    /// Registry admission failed while initializing the entity.
    Admission { name: String, source: Box<TagError> },
    /// The batch holding this command was aborted before commit.
    BatchAborted,
}

impl TagError {
    /// Validation errors are caller mistakes, never loop failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TagError::NotEditable { .. }
                | TagError::UnknownProperty { .. }
                | TagError::TypeMismatch { .. }
        )
    }
}

impl std::fmt::Display for TagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagError::NotEditable { property } => {
                write!(f, "{property} property is not user editable")
            }
            TagError::UnknownProperty { entity, property } => {
                write!(f, "property {property} does not exist in {entity}")
            }
            TagError::TypeMismatch {
                property,
                expected,
                found,
            } => write!(
                f,
                "property {property} is of type {expected}, can't receive value of type {found}"
            ),
            TagError::NotFound { name } => write!(f, "tag {name} not found"),
            TagError::Conversion { property, reason } => {
                write!(f, "could not convert value for {property}: {reason}")
            }
            TagError::Store(err) => write!(f, "store error: {err:#}"),
            TagError::Admission { name, source } => {
                write!(f, "could not initialize {name}: {source}")
            }
            TagError::BatchAborted => write!(f, "batch aborted before commit"),
        }
    }
}

impl std::error::Error for TagError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TagError::Store(err) => Some(&**err),
            TagError::Admission { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for TagError {
    fn from(err: anyhow::Error) -> Self {
        TagError::Store(err)
    }
}

pub type Result<T, E = TagError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_editable_message() {
        let err = TagError::NotEditable {
            property: "timestamp".to_string(),
        };
        assert_eq!(err.to_string(), "timestamp property is not user editable");
        assert!(err.is_validation());
    }

    #[test]
    fn test_admission_exposes_source() {
        let err = TagError::Admission {
            name: "@pressure:tank-0".to_string(),
            source: Box::new(TagError::Store(anyhow::anyhow!("connection refused"))),
        };
        assert!(!err.is_validation());
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("connection refused"));
    }
}
