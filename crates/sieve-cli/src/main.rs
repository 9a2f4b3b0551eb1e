//! sieve - URL をまとめて分類して結果を JSON で出す
//!
//! 1. .env / SIEVE_CONFIG / 環境変数 / フラグから EngineConfig を組む
//! 2. HttpFetcher と LLM コラボレータ（OPENAI_API_KEY がなければヒューリスティック）をつなぐ
//! 3. job を投入して、全タスクが決着（review 待ちを含む）するまで worker を回す
//! 4. job / task / review キューの状態を JSON で出力

mod classifier;
mod fetcher;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;
use sieve_core::ports::LlmClassifier;
use sieve_core::review::ReviewFilter;
use sieve_core::{AppBuilder, EngineConfig};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::classifier::{HeuristicClassifier, OpenAiClassifier};
use crate::fetcher::HttpFetcher;

#[derive(Debug, Parser)]
#[command(name = "sieve", version, about = "Classify a batch of URLs")]
struct Cli {
    /// URLs to classify
    urls: Vec<String>,

    /// File with one URL per line (# starts a comment)
    #[arg(long, short = 'f')]
    file: Option<PathBuf>,

    /// JSON engine config
    #[arg(long, env = "SIEVE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "SIEVE_CONCURRENCY")]
    concurrency: Option<usize>,

    #[arg(long, env = "SIEVE_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    #[arg(long, env = "SIEVE_QUEUE_SIZE_LIMIT")]
    queue_size_limit: Option<usize>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_MODEL")]
    openai_model: Option<String>,

    /// Per-request timeout for page fetches and LLM calls
    #[arg(long, default_value_t = 30)]
    http_timeout_secs: u64,
}

impl Cli {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(n) = self.concurrency {
            config.worker.concurrency = n;
        }
        if let Some(n) = self.max_attempts {
            config.retry.max_attempts = n;
        }
        if let Some(n) = self.queue_size_limit {
            config.review.queue_size_limit = Some(n);
        }
        config.validate().context("Invalid engine config")?;
        Ok(config)
    }

    fn collect_urls(&self) -> Result<Vec<String>> {
        let mut urls = self.urls.clone();
        if let Some(path) = &self.file {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            urls.extend(
                raw.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(String::from),
            );
        }
        if urls.is_empty() {
            bail!("no URLs given (pass them as arguments or with --file)");
        }
        Ok(urls)
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sieve_core=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env がなくてもよい
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = cli.engine_config()?;
    let urls = cli.collect_urls()?;
    let timeout = Duration::from_secs(cli.http_timeout_secs);

    let llm: Arc<dyn LlmClassifier> = match cli.openai_api_key.clone() {
        Some(key) if !key.trim().is_empty() => {
            info!("using OpenAI classifier");
            Arc::new(OpenAiClassifier::new(key, cli.openai_model.clone(), timeout)?)
        }
        _ => {
            warn!("OPENAI_API_KEY not set; using keyword heuristic for layer 3");
            Arc::new(HeuristicClassifier::new(&config.layer3))
        }
    };

    let poll = config.worker.poll_interval();
    let service = AppBuilder::new(config)
        .fetcher(Arc::new(HttpFetcher::new(timeout)?))
        .llm(llm)
        .build()
        .context("Failed to build queue service")?;

    service.start().await?;
    let job_id = service.submit_job(urls).await?;
    info!(job_id = %job_id, "waiting for job to settle (ctrl-c to stop early)");

    tokio::select! {
        settled = service.wait_until_settled(job_id, poll) => {
            settled?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; draining in-flight tasks");
        }
    }
    service.shutdown().await;

    let report = json!({
        "job": service.job_status(job_id).await?,
        "tasks": service.job_tasks(job_id).await?,
        "review": {
            "status": service.review_status().await,
            "pending": service.list_review_queue(&ReviewFilter::default()).await,
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
