use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

use cie::config::{Config, RepoSource};
use cie::model::{Phase, Progress};
use cie::pipeline::{CancelToken, Engine};

#[derive(Debug, Parser)]
#[command(name = "cie")]
#[command(version)]
#[command(about = "Code intelligence engine: incremental repository ingestion into a CozoDB fact store")]
struct Cli {
    /// Path to the config file (JSON).
    #[arg(long, global = true, default_value = ".cie.json")]
    config: PathBuf,

    /// Repository root; overrides the config's repo path.
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Project namespace; overrides the config's project_id.
    #[arg(long, global = true)]
    project: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest the repository (incremental by default).
    Index {
        /// Drop the checkpoint and store, then reindex from scratch.
        #[arg(long)]
        force: bool,
    },
    /// Run a CozoScript query against the fact store and print the rows.
    Query {
        /// The script text, e.g. "?[name] := *cie_function{name}".
        script: String,
        /// Query parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
        /// Per-query timeout in seconds.
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Print row counts per relation.
    Stats,
    /// Delete the checkpoint and the store's data directory.
    Wipe,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(&cli.config)?;
    if let Some(repo) = &cli.repo {
        config.repo = RepoSource::LocalPath(repo.clone());
    }
    if let Some(project) = &cli.project {
        config.project_id = project.clone();
    }
    if config.project_id.is_empty() {
        // Default the namespace to the repo directory name.
        let root = config.repo.path().canonicalize().unwrap_or_else(|_| config.repo.path().to_path_buf());
        if let Some(name) = root.file_name().and_then(|n| n.to_str()) {
            config.project_id = name.to_string();
        }
    }
    Ok(config)
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Walking => "walking",
        Phase::Parsing => "parsing",
        Phase::Embedding => "embedding functions",
        Phase::EmbeddingTypes => "embedding types",
        Phase::Writing => "writing",
    }
}

fn run_index(config: Config) -> Result<()> {
    let engine = Engine::open(config)?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{msg:>20} [{bar:30}] {pos}/{len}")
            .context("progress template")?
            .progress_chars("=> "),
    );

    let cancel = CancelToken::new();

    let mut on_progress = |p: Progress| {
        bar.set_message(phase_label(p.phase).to_string());
        bar.set_length(p.total as u64);
        bar.set_position(p.current as u64);
    };

    let report = engine.index(&mut on_progress, &cancel)?;
    bar.finish_and_clear();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_query(config: Config, script: &str, params: &str, timeout: u64) -> Result<()> {
    let engine = Engine::open(config)?;
    let params: serde_json::Value =
        serde_json::from_str(params).context("params must be a JSON object")?;
    let params = params
        .as_object()
        .ok_or_else(|| anyhow!("params must be a JSON object"))?;

    let result = engine.query(script, params, Duration::from_secs(timeout))?;
    println!("{}", result.headers.join("\t"));
    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }
    Ok(())
}

fn run_stats(config: Config) -> Result<()> {
    let engine = Engine::open(config)?;
    for (relation, count) in engine.store().relation_counts()? {
        println!("{relation:>24}  {count}");
    }
    Ok(())
}

fn run_wipe(config: Config) -> Result<()> {
    let checkpoints = config.checkpoint_dir();
    let db = config.db_dir();
    cie::checkpoint::Checkpointer::new(checkpoints).wipe(&db)?;
    println!("wiped {}", config.project_dir().display());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cie=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    match cli.command {
        Command::Index { force } => {
            config.force_reindex = config.force_reindex || force;
            run_index(config).map_err(render_error)
        }
        Command::Query {
            ref script,
            ref params,
            timeout,
        } => run_query(config, script, params, timeout).map_err(render_error),
        Command::Stats => run_stats(config).map_err(render_error),
        Command::Wipe => run_wipe(config).map_err(render_error),
    }
}

/// Translate core errors into the CLI's error envelope: category, summary,
/// and a remediation hint when the error carries one.
fn render_error(err: anyhow::Error) -> anyhow::Error {
    if let Some(cie_err) = err.downcast_ref::<cie::CieError>() {
        let mut msg = format!("[{}] {}", cie_err.category().as_str(), cie_err);
        if let Some(hint) = cie_err.remediation() {
            msg.push_str(&format!("\n  hint: {hint}"));
        }
        return anyhow!(msg);
    }
    err
}
