use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::{json, Map, Value};

use convsearch::config::{self, Config};
use convsearch::message::Message;
use convsearch::priority::MessagePrioritizer;
use convsearch::semantic::{EmbeddingModel, SemanticStore};

mod cli;

fn read_messages(file: Option<&Path>) -> anyhow::Result<Vec<Message>> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("couldn't read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("couldn't read stdin")?;
            buf
        }
    };

    serde_json::from_str(&raw).context("messages must be a JSON array of message objects")
}

fn parse_annotations(raw: Option<&str>) -> anyhow::Result<Option<Map<String, Value>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    match serde_json::from_str(raw).context("annotations are not valid JSON")? {
        Value::Object(map) => Ok(Some(map)),
        other => bail!("annotations must be a JSON object, got {other}"),
    }
}

fn open_store(config: &Config) -> anyhow::Result<SemanticStore> {
    let settings = &config.semantic_store;

    let model = EmbeddingModel::new(&settings.model, config.base_path().to_path_buf())
        .context("couldn't load embedding model")?;

    let store = SemanticStore::open(config.store_dir(), settings.dimension, Box::new(model))
        .context("couldn't open semantic store")?;

    log::info!("store load outcome: {:?}", store.load_outcome());
    Ok(store)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let base_path = config::base_path()?;
    let config = Config::load_with(&base_path)
        .with_context(|| format!("couldn't load config from {}", base_path.display()))?;

    match args.command {
        cli::Command::Ingest {
            conversation,
            file,
            annotations,
        } => {
            let messages = read_messages(file.as_deref())?;
            let annotations = parse_annotations(annotations.as_deref())?;

            let store = open_store(&config)?;
            let result = store.ingest(&conversation, &messages, annotations)?;

            print_json(&result)
        }

        cli::Command::Search { query, top_k } => {
            let top_k = top_k.unwrap_or(config.semantic_store.default_top_k);

            let store = open_store(&config)?;
            let results = store.search(&query, top_k)?;

            print_json(&json!({ "results": results }))
        }

        cli::Command::Stats {} => {
            let store = open_store(&config)?;
            print_json(&store.stats()?)
        }

        cli::Command::Priority { file } => {
            let messages = read_messages(file.as_deref())?;
            let ranked = MessagePrioritizer::new().rank(&messages);

            print_json(&json!({ "ranked_messages": ranked }))
        }
    }
}
