use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{error::ErrorKind, Parser, Subcommand};
use facefind::config::{self, Config};
use facefind::error::{Error, ErrorReport};
use facefind::fetch::{Fetcher, PhotoSource};
use facefind::matcher::{match_candidates, Metric};
use facefind::search::Searcher;
use facefind::storage::{CollectionId, Store};
use facefind::{input, Extractor, OnnxFaceModel};
use log::info;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "facefind")]
#[command(version, about = "Find photos containing the faces of a selfie")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the face embeddings of an image file or URL
    Encode {
        /// Image path, file:// or http(s):// URL
        source: String,
    },
    /// Match reference embeddings against a candidate collection
    Compare {
        /// JSON embedding or list of embeddings (`@file` to read from a file)
        reference: String,
        /// JSON list of {"id", "embeddings"} objects (`@file` to read from a file)
        candidates: String,
        #[arg(long, value_enum)]
        metric: Option<Metric>,
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Find the photos of a stored collection that match a selfie
    Search {
        /// Collection id (24 hex characters)
        collection: String,
        /// Selfie path, file:// or http(s):// URL
        selfie: String,
        #[arg(long, value_enum)]
        metric: Option<Metric>,
        #[arg(long)]
        threshold: Option<f32>,
        /// Fetch and embed every photo again instead of using stored embeddings
        #[arg(long)]
        refetch: bool,
    },
    /// Manage stored photo collections
    Collection {
        #[command(subcommand)]
        action: CollectionCommand,
    },
    /// Open config file in editor
    Config,
}

#[derive(Subcommand)]
enum CollectionCommand {
    /// Create an empty collection
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        client: Option<String>,
    },
    /// List all collections
    List,
    /// Show one collection and its photos
    Show { id: String },
    /// Fetch, embed and store photos
    Add {
        id: String,
        #[arg(required = true)]
        locations: Vec<String>,
    },
    /// Remove a photo from a collection
    Remove { id: String, location: String },
    /// Recompute every photo with the current model
    Reindex { id: String },
    /// Delete a collection and everything in it
    Delete { id: String },
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let err = anyhow::Error::new(Error::InvalidInput(e.to_string().trim().to_string()));
            fail(&err)
        }
    };

    match run(cli) {
        Ok(doc) => println!("{doc}"),
        Err(err) => fail(&err),
    }
}

fn fail(err: &anyhow::Error) -> ! {
    log::error!("{:#}", err);
    println!("{}", json!(ErrorReport::from(err)));
    std::process::exit(1)
}

fn run(cli: Cli) -> Result<Value> {
    let cfg = config::load_config(None)?;

    match cli.command {
        Commands::Encode { source } => encode(&cfg, &source),
        Commands::Compare {
            reference,
            candidates,
            metric,
            threshold,
        } => {
            let reference = input::parse_reference(&reference)?;
            let candidates = input::parse_candidates(&candidates)?;
            let outcome = match_candidates(&reference, &candidates, cfg.policy(metric, threshold))?;
            Ok(serde_json::to_value(outcome)?)
        }
        Commands::Search {
            collection,
            selfie,
            metric,
            threshold,
            refetch,
        } => {
            let id: CollectionId = collection.parse()?;
            let mut searcher = searcher(&cfg)?;
            let selfie = fetcher(&cfg).fetch(&selfie).context("reading selfie")?;
            let report = searcher.search(&id, &selfie, cfg.policy(metric, threshold), refetch)?;
            Ok(serde_json::to_value(report)?)
        }
        Commands::Collection { action } => collection(&cfg, action),
        Commands::Config => open_config(&cfg),
    }
}

fn fetcher(cfg: &Config) -> Fetcher {
    Fetcher::new(Duration::from_secs(cfg.fetch_timeout_secs))
}

fn extractor(cfg: &Config) -> Result<Extractor<OnnxFaceModel>> {
    let model = OnnxFaceModel::load(
        &cfg.models.detector,
        &cfg.models.recognizer,
        cfg.models.score_threshold,
        cfg.models.nms_threshold,
    )
    .map_err(|e| Error::ExternalResource(format!("{e:#}")))
    .context("Failed to initialize face recognition models")?;
    Ok(Extractor::new(model, cfg.extractor))
}

fn searcher(cfg: &Config) -> Result<Searcher<OnnxFaceModel, Fetcher>> {
    let store = Store::open(&cfg.store_dir)?;
    Ok(Searcher::new(store, fetcher(cfg), extractor(cfg)?))
}

fn encode(cfg: &Config, source: &str) -> Result<Value> {
    let bytes = fetcher(cfg).fetch(source)?;
    let mut extractor = extractor(cfg)?;
    let embeddings = extractor.extract(&bytes).map_err(Error::from)?;
    info!("{} face(s) in {}", embeddings.len(), source);
    Ok(serde_json::to_value(embeddings)?)
}

fn collection(cfg: &Config, action: CollectionCommand) -> Result<Value> {
    let store = Store::open(&cfg.store_dir)?;

    match action {
        CollectionCommand::Create { name, client } => {
            let record = store.create(&name, client, OnnxFaceModel::MODEL_ID)?;
            info!("Created collection {} ({})", record.id, record.name);
            Ok(serde_json::to_value(record.summary())?)
        }
        CollectionCommand::List => Ok(serde_json::to_value(store.list()?)?),
        CollectionCommand::Show { id } => {
            let record = store.load(&id.parse()?)?;
            let photos: Vec<Value> = record
                .photos
                .iter()
                .map(|p| json!({ "location": p.location, "faces": p.embeddings.len() }))
                .collect();
            Ok(json!({ "collection": record.summary(), "photos": photos }))
        }
        CollectionCommand::Add { id, locations } => {
            let id: CollectionId = id.parse()?;
            let mut searcher = Searcher::new(store, fetcher(cfg), extractor(cfg)?);
            Ok(serde_json::to_value(searcher.index(&id, &locations)?)?)
        }
        CollectionCommand::Remove { id, location } => {
            let mut record = store.load(&id.parse()?)?;
            if !record.remove_photo(&location) {
                return Err(Error::InvalidInput(format!(
                    "{location} is not in collection {}",
                    record.id
                ))
                .into());
            }
            store.save(&record)?;
            Ok(json!({ "removed": location, "collection": record.summary() }))
        }
        CollectionCommand::Reindex { id } => {
            let id: CollectionId = id.parse()?;
            let mut searcher = Searcher::new(store, fetcher(cfg), extractor(cfg)?);
            Ok(serde_json::to_value(searcher.reindex(&id)?)?)
        }
        CollectionCommand::Delete { id } => {
            let id: CollectionId = id.parse()?;
            store.delete(&id)?;
            info!("Deleted collection {}", id);
            Ok(json!({ "deleted": id }))
        }
    }
}

fn open_config(cfg: &Config) -> Result<Value> {
    let config_path = *config::CONFIG_PATH;
    if !config_path.exists() {
        config::save_config(cfg, None).context("Failed to write default config")?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(json!({ "config": config_path }))
}
