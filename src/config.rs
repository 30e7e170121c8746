use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// All fields have defaults, so the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Classifier training parameters.
    pub training: TrainingConfig,
    /// Prediction parameters.
    pub prediction: PredictionConfig,
}

/// Parameters threaded into the split and forest fit.
///
/// Two runs with the same config on the same tracks produce the same model.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Seed for the stratified split and for every tree in the forest.
    pub seed: u64,
    /// Number of trees in the forest.
    pub n_trees: usize,
    /// Fraction of examples held out for evaluation.
    pub test_fraction: f64,
    /// Minimum number of usable labeled tracks.
    pub min_examples: usize,
    /// Worker threads for extraction and tree fitting.
    #[serde(skip)]
    pub workers: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            n_trees: 100,
            test_fraction: 0.2,
            min_examples: 5,
            workers: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Number of ranked tags returned per clip.
    pub top_k: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

impl AppConfig {
    /// Load config from `~/.config/tagsmith/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::from_toml(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!(
                            "Failed to parse {}: {}. Using defaults.",
                            path.display(),
                            e
                        );
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!(
                        "Failed to read {}: {}. Using defaults.",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Parse a config from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<AppConfig>(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Training parameters with the resolved worker count filled in.
    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            workers: self.resolve_workers(),
            ..self.training.clone()
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("tagsmith.db")
    } else {
        // Fallback: current directory
        PathBuf::from("tagsmith.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_training_parameters() {
        let config = AppConfig::default();
        assert_eq!(config.training.seed, 42);
        assert_eq!(config.training.n_trees, 100);
        assert!((config.training.test_fraction - 0.2).abs() < 1e-12);
        assert_eq!(config.training.min_examples, 5);
        assert_eq!(config.prediction.top_k, 3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            "workers = 4\n[training]\nseed = 7\n",
        )
        .unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.training.seed, 7);
        assert_eq!(config.training.n_trees, 100);
        assert_eq!(config.prediction.top_k, 3);
    }

    #[test]
    fn test_training_config_resolves_workers() {
        let config = AppConfig {
            workers: 3,
            ..Default::default()
        };
        assert_eq!(config.training_config().workers, 3);
        assert_eq!(config.training_config().seed, 42);
    }
}
