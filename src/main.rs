use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tagsmith::predictor::{AudioInput, PredictError};
use tagsmith::response::{PredictResponse, TrainResponse};
use tagsmith::trainer::read_tracks;

#[derive(Parser)]
#[command(name = "tagsmith", version, about = "Personal audio tagging classifier")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a personal model from a JSON list of tagged tracks
    Train {
        /// User the model belongs to
        #[arg(short, long)]
        user: String,

        /// JSON file: [{"audio_reference": "...", "tags": [{"tag": "...", "confidence": 0.9}]}]
        tracks: PathBuf,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Predict tags for an audio file with a user's model
    Predict {
        #[arg(short, long)]
        user: String,

        /// Audio file to classify
        audio: PathBuf,

        /// Number of tags to return (defaults to config)
        #[arg(short = 'n', long)]
        top_k: Option<usize>,
    },

    /// Show the stored training summary for a user
    Info {
        #[arg(short, long)]
        user: String,
    },

    /// Print the feature vector extracted from an audio file
    Features {
        audio: PathBuf,
    },

    /// List users with a trained model
    Models,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = tagsmith::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli.db_path
        .or(config.db_path.clone())
        .unwrap_or_else(tagsmith::config::default_db_path);
    let open_db = || {
        log::info!("Database: {}", db_path.display());
        tagsmith::db::Database::open(&db_path)
    };

    match cli.command {
        Commands::Train { user, tracks, jobs } => {
            let mut training = config.training_config();
            if jobs > 0 {
                training.workers = jobs;
            }

            let result = read_tracks(&tracks).and_then(|records| {
                let db = open_db()?;
                log::info!(
                    "Training user {} on {} tracks with {} workers",
                    user,
                    records.len(),
                    training.workers
                );
                tagsmith::trainer::train(&db, &user, &records, &training)
            });
            let response = TrainResponse::from_result(&user, result);
            println!("{}", serde_json::to_string(&response)?);
        }

        Commands::Predict { user, audio, top_k } => {
            let top_k = top_k.unwrap_or(config.prediction.top_k);
            let result = open_db().map_err(PredictError::from).and_then(|db| {
                tagsmith::predictor::predict(&db, &user, AudioInput::Path(audio), top_k)
            });
            let response = PredictResponse::from_result(result);
            println!("{}", serde_json::to_string(&response)?);
        }

        Commands::Info { user } => {
            let db = open_db().context("Failed to open database")?;
            let info = db.load_model_info(&user).context("Failed to read model info")?;
            match info {
                Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
                None => println!(
                    "{}",
                    serde_json::json!({
                        "success": false,
                        "error": format!("Model not found for user {user}"),
                    })
                ),
            }
        }

        Commands::Models => {
            let db = open_db().context("Failed to open database")?;
            let models = db.list_models().context("Failed to list models")?;
            if models.is_empty() {
                println!("No trained models.");
                return Ok(());
            }

            println!(
                "{:<20} {:>8} {:>7} {:>5}  {:<25}",
                "User", "Accuracy", "Tracks", "Tags", "Last trained"
            );
            println!("{}", "-".repeat(70));
            for m in &models {
                match &m.info {
                    Some(info) => println!(
                        "{:<20} {:>8.3} {:>7} {:>5}  {:<25}",
                        m.user_id, info.accuracy, info.tracks_used, info.unique_tags, info.last_trained
                    ),
                    None => println!(
                        "{:<20} {:>8} {:>7} {:>5}  {:<25}",
                        m.user_id, "-", "-", "-", m.updated_at
                    ),
                }
            }
        }

        Commands::Features { audio } => {
            let features = tagsmith::analyzer::extract_file(&audio)
                .with_context(|| format!("Failed to extract features from {}", audio.display()))?;
            println!("{}", serde_json::to_string_pretty(&features)?);
        }
    }

    Ok(())
}
