use serde::{Deserialize, Serialize};

use crate::compositor::Anchor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Flyer,
    Meme,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Flyer => "flyer",
            ContentType::Meme => "meme",
        }
    }
}

/// What every item of a batch is about. Shared by all items unless an
/// [`ItemOverride`] replaces the copy for one index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSpec {
    pub content_type: ContentType,
    pub headline: String,
    #[serde(default)]
    pub details: Option<String>,
    /// Asset key of the tenant logo. No logo step when absent.
    #[serde(default)]
    pub logo_key: Option<String>,
    /// Overrides the style's own logo anchor for every item.
    #[serde(default)]
    pub anchor: Option<Anchor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemOverride {
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl ContentSpec {
    /// Applies a per-item override on top of the shared copy.
    pub fn for_item(&self, item: Option<&ItemOverride>) -> ContentSpec {
        let mut spec = self.clone();
        if let Some(item) = item {
            if let Some(headline) = &item.headline {
                spec.headline = headline.clone();
            }
            if item.details.is_some() {
                spec.details = item.details.clone();
            }
        }
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_replaces_copy_only() {
        let spec = ContentSpec {
            content_type: ContentType::Flyer,
            headline: "Brake special".to_string(),
            details: Some("$99".to_string()),
            logo_key: Some("logos/t.png".to_string()),
            anchor: None,
        };
        let item = ItemOverride {
            headline: Some("Oil change".to_string()),
            details: None,
        };

        let merged = spec.for_item(Some(&item));
        assert_eq!(merged.headline, "Oil change");
        assert_eq!(merged.details.as_deref(), Some("$99"));
        assert_eq!(merged.logo_key.as_deref(), Some("logos/t.png"));
        assert_eq!(spec.for_item(None).headline, "Brake special");
    }

    #[test]
    fn test_deserialize_minimal() {
        let spec: ContentSpec =
            serde_json::from_str(r#"{"content_type":"meme","headline":"When the check engine light..."}"#)
                .unwrap();
        assert_eq!(spec.content_type, ContentType::Meme);
        assert!(spec.logo_key.is_none());
        assert!(spec.anchor.is_none());
    }
}
