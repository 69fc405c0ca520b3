//! Operator command line.

mod sink;

pub use sink::JsonlSink;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

use crate::captcha::{CaptchaChallenge, CaptchaKind, ChallengeListener};
use crate::config::{RunConfig, SearchEngineKind};
use crate::error::ConfigError;
use crate::models::{Query, RunStats};
use crate::orchestrator::{ResultSink, RunHandle, RunHooks, ScrapeOrchestrator};

#[derive(Parser)]
#[command(name = "docsift")]
#[command(about = "Search, extract and filter documents for topic queries")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run every query through search, extraction and filtering
    Run {
        /// TOML file with [[query]] entries
        #[arg(short, long)]
        queries: PathBuf,
        /// Run configuration (TOML)
        #[arg(short, long, env = "DOCSIFT_CONFIG")]
        config: Option<PathBuf>,
        /// Output directory for results and omitted records
        #[arg(short, long, default_value = "results")]
        out: PathBuf,
        /// Override the configured search engine
        #[arg(long, value_enum)]
        engine: Option<SearchEngineKind>,
        /// Override the configured site domain
        #[arg(long)]
        site_domain: Option<String>,
        /// Process only the first N queries (0 = all)
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },

    /// Validate a run configuration and print it
    CheckConfig {
        /// Run configuration (TOML)
        #[arg(short, long, env = "DOCSIFT_CONFIG")]
        config: Option<PathBuf>,
    },
}

/// Query list file: `[[query]]` tables with `code` and `name`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryFile {
    #[serde(default, rename = "query")]
    queries: Vec<Query>,
}

fn parse_queries(content: &str) -> anyhow::Result<Vec<Query>> {
    let file: QueryFile = toml::from_str(content)?;
    Ok(file.queries)
}

fn load_queries(path: &Path) -> anyhow::Result<Vec<Query>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
    parse_queries(&content)
}

fn load_config(path: Option<&Path>) -> Result<RunConfig, ConfigError> {
    let config = match path {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::new(SearchEngineKind::Google),
    };
    Ok(config.with_env_overrides())
}

/// Run the command line.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            queries,
            config,
            out,
            engine,
            site_domain,
            limit,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(engine) = engine {
                config.search_engine = engine;
            }
            if site_domain.is_some() {
                config.site_domain = site_domain;
            }
            let mut queries = load_queries(&queries)?;
            if limit > 0 {
                queries.truncate(limit);
            }
            cmd_run(config, queries, &out).await
        }
        Commands::CheckConfig { config } => cmd_check_config(config.as_deref()),
    }
}

fn cmd_check_config(path: Option<&Path>) -> anyhow::Result<()> {
    let mut config = load_config(path)?;
    if let Err(e) = config.validate() {
        println!("{} {}", style("✗").red(), e);
        return Err(e.into());
    }
    println!("{} Configuration is valid", style("✓").green());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Prints challenges so an operator can answer them on stdin.
struct ConsoleListener {
    pb: ProgressBar,
}

impl ChallengeListener for ConsoleListener {
    fn on_challenge(&self, challenge: &CaptchaChallenge) {
        self.pb.suspend(|| {
            eprintln!(
                "\n{} CAPTCHA on {}",
                style("!").yellow(),
                style(&challenge.page_url).cyan()
            );
            eprintln!("  id:   {}", challenge.id);
            eprintln!("  {}", describe_payload(challenge, &std::env::temp_dir()));
            eprintln!("  Answer with: {} <solution>", challenge.id);
        });
    }
}

/// One console line for the challenge payload. Image bodies are written to
/// `dir` so the operator can open them.
fn describe_payload(challenge: &CaptchaChallenge, dir: &Path) -> String {
    match challenge.kind {
        CaptchaKind::Widget => format!("key:  {}", challenge.payload),
        CaptchaKind::Image => match save_image(challenge, dir) {
            Ok(path) => format!("image: {}", path.display()),
            Err(e) => {
                warn!(challenge_id = %challenge.id, "Could not save CAPTCHA image: {}", e);
                let preview: String = challenge.payload.chars().take(32).collect();
                format!("image: {}... ({} bytes of base64)", preview, challenge.payload.len())
            }
        },
    }
}

fn save_image(challenge: &CaptchaChallenge, dir: &Path) -> anyhow::Result<PathBuf> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(challenge.payload.trim())?;
    let extension = infer::get(&bytes).map_or("png", |kind| kind.extension());
    let path = dir.join(format!("docsift-captcha-{}.{}", challenge.id, extension));
    std::fs::write(&path, bytes)?;
    Ok(path)
}

/// Parse an operator answer line: `<challenge id> <solution>`.
fn parse_answer(line: &str) -> Option<(Uuid, String)> {
    let (id, solution) = line.trim().split_once(char::is_whitespace)?;
    let solution = solution.trim();
    if solution.is_empty() {
        return None;
    }
    Some((Uuid::parse_str(id).ok()?, solution.to_string()))
}

async fn read_answers(handle: RunHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_answer(&line) {
            Some((id, solution)) => match handle.submit_solution(id, solution) {
                Ok(()) => info!(challenge_id = %id, "Solution submitted"),
                Err(e) => warn!("{}", e),
            },
            None if line.trim() == "resume" => handle.resume(),
            None if line.trim() == "stop" => handle.request_stop(),
            None if !line.trim().is_empty() => {
                warn!("Expected '<challenge id> <solution>', 'resume' or 'stop'")
            }
            None => {}
        }
    }
}

async fn cmd_run(config: RunConfig, queries: Vec<Query>, out_dir: &Path) -> anyhow::Result<()> {
    if queries.is_empty() {
        println!("{} No queries to run", style("!").yellow());
        return Ok(());
    }

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos:>3}% {wide_msg}")?
            .progress_chars("█▓░"),
    );

    let listener: Arc<dyn ChallengeListener> = Arc::new(ConsoleListener { pb: pb.clone() });
    let hooks = RunHooks::with_listener(listener);
    let orchestrator = match ScrapeOrchestrator::launch(config, hooks).await {
        Ok(o) => o,
        Err(e) => {
            pb.finish_and_clear();
            println!("{} Error: {}", style("✗").red(), e);
            return Err(e.into());
        }
    };

    let handle = orchestrator.handle();
    let answers = tokio::spawn(read_answers(handle.clone()));
    let interrupt = {
        let handle = handle.clone();
        let pb = pb.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                pb.println("Stopping after the current step...");
                handle.request_stop();
            }
        })
    };

    let mut sink = JsonlSink::new(out_dir);
    let progress = {
        let pb = pb.clone();
        move |percent: f64, message: &str, _stats: &RunStats| {
            pb.set_position(percent.round() as u64);
            pb.set_message(message.to_string());
        }
    };

    let records = orchestrator.run(&queries, &mut sink, &progress).await;
    orchestrator.shutdown().await;
    answers.abort();
    interrupt.abort();
    let summary = pb.message();
    pb.finish_and_clear();

    println!("{} {}", style("✓").green(), summary);
    println!(
        "  {} kept, {} omitted",
        records.len(),
        sink.omitted_count()
    );
    if let Some(path) = sink.results_path() {
        println!("  Results: {}", style(path.display()).cyan());
    }
    if let Some(path) = sink.finalize_omitted() {
        println!("  Omitted: {}", style(path.display()).dim());
    }
    Ok(())
}
