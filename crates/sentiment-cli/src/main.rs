use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use sentiment_core::app::{AnalysisPipeline, AnalyserClient, WorkerBuilder};
use sentiment_core::config::AnalyserConfig;
use sentiment_core::impls::{InMemoryBus, InMemoryDiscovery, InMemoryStore};
use sentiment_core::ports::{ANNOUNCE_TOPIC, MessageBus};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: sentiment-cli <articles.json> [--config <config.json>] [--collection <name>]";

#[derive(Debug)]
struct Args {
    articles: PathBuf,
    config: Option<PathBuf>,
    collection: String,
}

impl Args {
    fn parse(mut raw: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut articles = None;
        let mut config = None;
        let mut collection = "news".to_string();

        while let Some(arg) = raw.next() {
            match arg.as_str() {
                "--config" => config = Some(PathBuf::from(raw.next().context("--config needs a path")?)),
                "--collection" => collection = raw.next().context("--collection needs a name")?,
                "-h" | "--help" => bail!(USAGE),
                other if other.starts_with("--") => bail!("unknown option `{other}`\n{USAGE}"),
                other => articles = Some(PathBuf::from(other)),
            }
        }

        Ok(Self {
            articles: articles.context(USAGE)?,
            config,
            collection,
        })
    }
}

/// `RUST_LOG` filters (default `info`); `SENTIMENT_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("SENTIMENT_LOG_JSON").is_ok_and(|v| v == "1");

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// A JSON array of articles, or a search response with the array under `value`/`articles`.
fn read_articles(path: &Path) -> anyhow::Result<Vec<serde_json::Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading articles from {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    match value {
        serde_json::Value::Array(items) => Ok(items),
        serde_json::Value::Object(mut obj) => {
            for key in ["value", "articles"] {
                if let Some(serde_json::Value::Array(items)) = obj.remove(key) {
                    return Ok(items);
                }
            }
            bail!("{} has no article array", path.display())
        }
        _ => bail!("{} is not a JSON array of articles", path.display()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse(std::env::args().skip(1))?;
    let config = AnalyserConfig::load(args.config.as_deref()).context("loading configuration")?;
    let articles = read_articles(&args.articles)?;

    let bus = Arc::new(InMemoryBus::new());
    let discovery = Arc::new(InMemoryDiscovery::new(bus.clone()));

    let mut announcements = bus.subscribe(ANNOUNCE_TOPIC);
    tokio::spawn(async move {
        while let Ok(record) = announcements.recv().await {
            info!(%record, "discovery announcement");
        }
    });

    let group = WorkerBuilder::new(config.clone())
        .deploy(bus.clone(), discovery.clone())
        .await
        .context("deploying analyser workers")?;

    let client = AnalyserClient::discover(bus.clone(), discovery.as_ref(), &config.service_name)
        .await
        .context("looking up analyser")?
        .with_job_defaults(config.timeout, config.retry_strategy);
    let store = Arc::new(InMemoryStore::new());
    let pipeline = AnalysisPipeline::new(client, store).with_max_in_flight(config.instances);

    let outcome = tokio::select! {
        report = pipeline.run(&args.collection, articles) => Some(report),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, shutting down");
            None
        }
    };

    let counts = group.counts();
    group.stop().await.context("stopping analyser workers")?;
    info!(?counts, "analyser stopped");

    if let Some(report) = outcome {
        let report = report.context("running analysis pipeline")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
