use serde::{Deserialize, Serialize};

/// Opaque serialized classifier and label encoder for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifacts {
    pub model: Vec<u8>,
    pub encoder: Vec<u8>,
}

/// Human-readable summary of a user's most recent training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub user_id: String,
    pub accuracy: f64,
    /// RFC 3339 timestamp.
    pub last_trained: String,
    pub tracks_used: usize,
    pub unique_tags: usize,
    pub classes: Vec<String>,
}

/// Kind of artifact row in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Model,
    Encoder,
    Info,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Encoder => "encoder",
            Self::Info => "info",
        }
    }

    /// Store key for this artifact of `user_id`.
    pub fn key(self, user_id: &str) -> String {
        format!("user_{user_id}_{}", self.as_str())
    }
}

/// One row of `models` output.
#[derive(Debug, Clone)]
pub struct StoredModelSummary {
    pub user_id: String,
    pub updated_at: String,
    pub info: Option<ModelInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_scheme() {
        assert_eq!(ArtifactKind::Model.key("42"), "user_42_model");
        assert_eq!(ArtifactKind::Encoder.key("42"), "user_42_encoder");
        assert_eq!(ArtifactKind::Info.key("alice"), "user_alice_info");
    }

    #[test]
    fn test_info_uses_camel_case() {
        let info = ModelInfo {
            user_id: "7".into(),
            accuracy: 0.5,
            last_trained: "2024-01-01T00:00:00+00:00".into(),
            tracks_used: 6,
            unique_tags: 2,
            classes: vec!["jazz".into(), "rock".into()],
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["userId"], "7");
        assert_eq!(json["lastTrained"], "2024-01-01T00:00:00+00:00");
        assert_eq!(json["tracksUsed"], 6);
        assert_eq!(json["uniqueTags"], 2);
        assert!(json.get("user_id").is_none());
    }
}
