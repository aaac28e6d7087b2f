//! Allow-listed metadata patches
//!
//! Updates go through one explicit structure per node kind. Fields owned by
//! the lifecycle engine or the ordering manager (`id`, `ownerId`, `isTrash`,
//! `parentId`, child arrays, `prerequisites`, `version`) have no patch field,
//! so they cannot be changed through an update.
//!
//! # Double-Option Pattern for Nullable Fields
//!
//! - `None`: don't change the field
//! - `Some(None)`: clear the field
//! - `Some(Some(value))`: set the field

use super::node::{validate_title, Collection, Content, NodeKind, ValidationError};
use serde::{Deserialize, Deserializer, Serialize};

/// Fields that exist on stored nodes but may only be changed by dedicated operations
pub const PROTECTED_FIELDS: &[&str] = &[
    "id",
    "kind",
    "ownerId",
    "parentId",
    "isTrash",
    "version",
    "revision",
    "childCollections",
    "childContent",
    "prerequisites",
    "createdAt",
    "updatedAt",
    "lastModifiedAt",
];

const COLLECTION_FIELDS: &[&str] = &["title", "description", "tags", "thumbnailRef"];
const CONTENT_FIELDS: &[&str] = &["title", "data", "thumbnailRef"];

/// Maps missing → None, null → Some(None), value → Some(Some(value))
fn deserialize_optional_field<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}

/// Updatable fields of a Collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub description: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub thumbnail_ref: Option<Option<String>>,
}

impl CollectionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.tags.is_none()
            && self.thumbnail_ref.is_none()
    }

    /// Apply to a collection, refreshing `updated_at`
    pub fn apply_to(self, collection: &mut Collection) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::EmptyPatch);
        }
        if let Some(title) = self.title {
            collection.title = validate_title(&title)?;
        }
        if let Some(description) = self.description {
            collection.description = description;
        }
        if let Some(tags) = self.tags {
            collection.tags = tags;
        }
        if let Some(thumbnail_ref) = self.thumbnail_ref {
            collection.thumbnail_ref = thumbnail_ref;
        }
        collection.touch();
        Ok(())
    }
}

/// Updatable fields of a Content item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Replacement editor document (opaque)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub thumbnail_ref: Option<Option<String>>,
}

impl ContentPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_thumbnail_ref(mut self, thumbnail_ref: Option<String>) -> Self {
        self.thumbnail_ref = Some(thumbnail_ref);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.data.is_none() && self.thumbnail_ref.is_none()
    }

    /// Apply to a content item: bumps `version` by one and refreshes `last_modified_at`
    pub fn apply_to(self, content: &mut Content) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::EmptyPatch);
        }
        if let Some(title) = self.title {
            content.title = validate_title(&title)?;
        }
        if let Some(data) = self.data {
            content.data = data;
        }
        if let Some(thumbnail_ref) = self.thumbnail_ref {
            content.thumbnail_ref = thumbnail_ref;
        }
        content.version += 1;
        content.touch();
        Ok(())
    }
}

/// Kind-tagged patch accepted by `update_metadata`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NodePatch {
    Collection(CollectionPatch),
    Content(ContentPatch),
}

impl NodePatch {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodePatch::Collection(_) => NodeKind::Collection,
            NodePatch::Content(_) => NodeKind::Content,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            NodePatch::Collection(p) => p.is_empty(),
            NodePatch::Content(p) => p.is_empty(),
        }
    }

    /// Parse a loosely-typed JSON object at the boundary
    ///
    /// Protected and unknown fields are rejected by name before deserializing,
    /// so callers get a precise error instead of a silently ignored key.
    pub fn from_json(kind: NodeKind, value: serde_json::Value) -> Result<Self, ValidationError> {
        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::InvalidPatch("patch must be a JSON object".into()))?;

        let allowed = match kind {
            NodeKind::Collection => COLLECTION_FIELDS,
            NodeKind::Content => CONTENT_FIELDS,
        };

        for field in object.keys() {
            if PROTECTED_FIELDS.contains(&field.as_str()) {
                return Err(ValidationError::ProtectedField(field.clone()));
            }
            if !allowed.contains(&field.as_str()) {
                return Err(ValidationError::UnknownField {
                    field: field.clone(),
                    kind,
                });
            }
        }

        let patch = match kind {
            NodeKind::Collection => serde_json::from_value::<CollectionPatch>(value)
                .map(NodePatch::Collection),
            NodeKind::Content => {
                serde_json::from_value::<ContentPatch>(value).map(NodePatch::Content)
            }
        }
        .map_err(|e| ValidationError::InvalidPatch(e.to_string()))?;

        if patch.is_empty() {
            return Err(ValidationError::EmptyPatch);
        }
        Ok(patch)
    }
}

impl From<CollectionPatch> for NodePatch {
    fn from(patch: CollectionPatch) -> Self {
        NodePatch::Collection(patch)
    }
}

impl From<ContentPatch> for NodePatch {
    fn from(patch: ContentPatch) -> Self {
        NodePatch::Content(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_protected_fields_rejected() {
        for field in ["ownerId", "isTrash", "id", "prerequisites", "childContent"] {
            let mut object = serde_json::Map::new();
            object.insert(field.to_string(), json!("x"));
            let err = NodePatch::from_json(NodeKind::Content, serde_json::Value::Object(object))
                .unwrap_err();
            assert_eq!(err, ValidationError::ProtectedField(field.to_string()));
        }
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err =
            NodePatch::from_json(NodeKind::Collection, json!({ "data": {} })).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownField { .. }));
    }

    #[test]
    fn test_null_clears_nullable_field() {
        let patch =
            NodePatch::from_json(NodeKind::Collection, json!({ "description": null })).unwrap();
        match patch {
            NodePatch::Collection(p) => assert_eq!(p.description, Some(None)),
            other => panic!("unexpected patch {:?}", other),
        }
    }

    #[test]
    fn test_empty_patch_rejected() {
        assert_eq!(
            NodePatch::from_json(NodeKind::Content, json!({})),
            Err(ValidationError::EmptyPatch)
        );
    }

    #[test]
    fn test_content_patch_bumps_version() {
        let mut content = Content::new("owner", "Draft", None, None).unwrap();
        let before = content.last_modified_at;

        ContentPatch::new()
            .with_data(json!({ "blocks": [] }))
            .apply_to(&mut content)
            .unwrap();
        assert_eq!(content.version, 2);
        assert!(content.last_modified_at >= before);

        ContentPatch::new()
            .with_title("Final")
            .apply_to(&mut content)
            .unwrap();
        assert_eq!(content.version, 3);
        assert_eq!(content.title, "Final");
    }

    #[test]
    fn test_invalid_title_leaves_version_untouched() {
        let mut content = Content::new("owner", "Draft", None, None).unwrap();
        let err = ContentPatch::new()
            .with_title("  ")
            .apply_to(&mut content)
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("title".into()));
        assert_eq!(content.version, 1);
    }
}
