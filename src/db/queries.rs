use super::models::{ArtifactKind, ModelArtifacts, ModelInfo, StoredModelSummary};
use super::{Database, Result};
use rusqlite::{OptionalExtension, params};

impl Database {
    /// Store model, encoder and info for a user in a single transaction,
    /// replacing any previous model.
    pub fn save_model(&self, user_id: &str, artifacts: &ModelArtifacts, info: &ModelInfo) -> Result<()> {
        let info_json = serde_json::to_vec(info)?;
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO model_artifacts (key, user_id, kind, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET
                    body = excluded.body,
                    updated_at = excluded.updated_at",
            )?;
            for (kind, body) in [
                (ArtifactKind::Model, artifacts.model.as_slice()),
                (ArtifactKind::Encoder, artifacts.encoder.as_slice()),
                (ArtifactKind::Info, info_json.as_slice()),
            ] {
                stmt.execute(params![kind.key(user_id), user_id, kind.as_str(), body])?;
            }
        }
        tx.commit()?;
        log::debug!("Saved model for user {user_id}");
        Ok(())
    }

    /// Load the model and encoder for a user. `None` unless both exist.
    pub fn load_model(&self, user_id: &str) -> Result<Option<ModelArtifacts>> {
        let model = self.load_artifact(user_id, ArtifactKind::Model)?;
        let encoder = self.load_artifact(user_id, ArtifactKind::Encoder)?;
        Ok(match (model, encoder) {
            (Some(model), Some(encoder)) => Some(ModelArtifacts { model, encoder }),
            _ => None,
        })
    }

    pub fn load_model_info(&self, user_id: &str) -> Result<Option<ModelInfo>> {
        match self.load_artifact(user_id, ArtifactKind::Info)? {
            Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
    }

    /// Users with a stored model, ordered by user id.
    pub fn list_models(&self) -> Result<Vec<StoredModelSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.user_id, m.updated_at, i.body
             FROM model_artifacts m
             LEFT JOIN model_artifacts i ON i.user_id = m.user_id AND i.kind = 'info'
             WHERE m.kind = 'model'
             ORDER BY m.user_id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<Vec<u8>>>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let summaries = rows
            .into_iter()
            .map(|(user_id, updated_at, body)| {
                let info = body.and_then(|b| match serde_json::from_slice(&b) {
                    Ok(info) => Some(info),
                    Err(e) => {
                        log::warn!("Unreadable model info for user {user_id}: {e}");
                        None
                    }
                });
                StoredModelSummary {
                    user_id,
                    updated_at,
                    info,
                }
            })
            .collect();

        Ok(summaries)
    }

    fn load_artifact(&self, user_id: &str, kind: ArtifactKind) -> Result<Option<Vec<u8>>> {
        let body = self
            .conn
            .query_row(
                "SELECT body FROM model_artifacts WHERE key = ?1",
                params![kind.key(user_id)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts(tag: &str) -> ModelArtifacts {
        ModelArtifacts {
            model: format!("model-{tag}").into_bytes(),
            encoder: format!("encoder-{tag}").into_bytes(),
        }
    }

    fn info(user_id: &str, accuracy: f64) -> ModelInfo {
        ModelInfo {
            user_id: user_id.to_string(),
            accuracy,
            last_trained: "2024-05-01T12:00:00+00:00".to_string(),
            tracks_used: 6,
            unique_tags: 2,
            classes: vec!["jazz".to_string(), "rock".to_string()],
        }
    }

    #[test]
    fn test_save_and_load() {
        let db = Database::open_in_memory().unwrap();
        db.save_model("1", &artifacts("a"), &info("1", 0.5)).unwrap();

        assert_eq!(db.load_model("1").unwrap(), Some(artifacts("a")));
        assert_eq!(db.load_model_info("1").unwrap(), Some(info("1", 0.5)));
    }

    #[test]
    fn test_missing_user_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.load_model("nobody").unwrap(), None);
        assert_eq!(db.load_model_info("nobody").unwrap(), None);
    }

    #[test]
    fn test_retrain_replaces_previous() {
        let db = Database::open_in_memory().unwrap();
        db.save_model("1", &artifacts("old"), &info("1", 0.25)).unwrap();
        db.save_model("1", &artifacts("new"), &info("1", 1.0)).unwrap();

        assert_eq!(db.load_model("1").unwrap(), Some(artifacts("new")));
        assert_eq!(db.load_model_info("1").unwrap().unwrap().accuracy, 1.0);
        let rows: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM model_artifacts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 3);
    }

    #[test]
    fn test_users_are_isolated() {
        let db = Database::open_in_memory().unwrap();
        db.save_model("1", &artifacts("one"), &info("1", 0.5)).unwrap();
        db.save_model("2", &artifacts("two"), &info("2", 0.75)).unwrap();

        assert_eq!(db.load_model("1").unwrap(), Some(artifacts("one")));
        assert_eq!(db.load_model("2").unwrap(), Some(artifacts("two")));
    }

    #[test]
    fn test_partial_model_is_not_loaded() {
        let db = Database::open_in_memory().unwrap();
        db.save_model("1", &artifacts("a"), &info("1", 0.5)).unwrap();
        db.conn
            .execute("DELETE FROM model_artifacts WHERE key = 'user_1_encoder'", [])
            .unwrap();
        assert_eq!(db.load_model("1").unwrap(), None);
    }

    #[test]
    fn test_documented_keys() {
        let db = Database::open_in_memory().unwrap();
        db.save_model("9", &artifacts("a"), &info("9", 0.5)).unwrap();
        let mut stmt = db
            .conn
            .prepare("SELECT key FROM model_artifacts ORDER BY key")
            .unwrap();
        let keys: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(keys, ["user_9_encoder", "user_9_info", "user_9_model"]);
    }

    #[test]
    fn test_list_models() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.list_models().unwrap().is_empty());
        db.save_model("b", &artifacts("b"), &info("b", 0.5)).unwrap();
        db.save_model("a", &artifacts("a"), &info("a", 0.75)).unwrap();

        let models = db.list_models().unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].user_id, "a");
        assert_eq!(models[0].info.as_ref().unwrap().accuracy, 0.75);
        assert_eq!(models[1].user_id, "b");
    }
}
