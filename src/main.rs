use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use inkflow_core::config::{AppConfig, LogConfig, ModelConfig};
use inkflow_core::error::Result as InkResult;
use inkflow_core::event::EventBus;
use inkflow_core::traits::{CardLookup, Generator, ProjectStore};
use inkflow_core::types::ProgressEvent;

use inkflow_engine::{
    order, CheckpointStore, ExecutionContext, Graph, HandlerEnv, Orchestrator, PromptLibrary,
    RunLogger, RunRequest, SqliteProjectStore,
};

#[derive(Parser)]
#[command(name = "inkflow", version, about = "Run novel-writing workflows")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "inkflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow for a project
    Run {
        /// Workflow graph (JSON)
        #[arg(short, long)]
        workflow: PathBuf,
        /// Project identifier
        #[arg(short, long)]
        project: String,
        /// Seed context (JSON object with projectName, genre, targetChapters, ...)
        #[arg(short, long)]
        seed: Option<PathBuf>,
        /// Directory of content cards, one `<id>.md` or `<id>.txt` per card
        #[arg(long)]
        cards: Option<PathBuf>,
    },
    /// Resume the project's last interrupted run
    Resume {
        #[arg(short, long)]
        workflow: PathBuf,
        #[arg(short, long)]
        project: String,
        #[arg(short, long)]
        seed: Option<PathBuf>,
        #[arg(long)]
        cards: Option<PathBuf>,
    },
    /// Print the execution order of a workflow
    Order {
        #[arg(short, long)]
        workflow: PathBuf,
    },
    /// List a project's stored versions
    History {
        #[arg(short, long)]
        project: String,
        /// Print the current content instead of the version list
        #[arg(long)]
        show: bool,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("inkflow=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "inkflow", &mut std::io::stdout());
            Ok(())
        }
        Commands::Order { workflow } => {
            let graph = Graph::load(&workflow)?;
            for (i, id) in order(&graph)?.iter().enumerate() {
                let name = graph.node(id).map(|n| n.name.as_str()).unwrap_or_default();
                println!("{:>3}. {} ({})", i + 1, id, name);
            }
            Ok(())
        }
        Commands::Config => {
            let mut config = load_config(&cli.config)?;
            if config.model.api_key.is_some() {
                config.model.api_key = Some("***".to_string());
            }
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::History { project, show } => {
            let config = load_config(&cli.config)?;
            let store = SqliteProjectStore::open(&config.database_path())?;
            if show {
                match store.current_content(&project).await? {
                    Some(content) => println!("{}", content),
                    None => eprintln!("No versions for project {}", project),
                }
                return Ok(());
            }
            for snapshot in store.history(&project).await? {
                println!(
                    "{}  {}  {} chars",
                    snapshot.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    snapshot.id,
                    snapshot.content.chars().count()
                );
            }
            Ok(())
        }
        Commands::Run {
            workflow,
            project,
            seed,
            cards,
        } => execute(&cli.config, &workflow, project, seed, cards, false).await,
        Commands::Resume {
            workflow,
            project,
            seed,
            cards,
        } => execute(&cli.config, &workflow, project, seed, cards, true).await,
    }
}

async fn execute(
    config_path: &Path,
    workflow: &Path,
    project: String,
    seed: Option<PathBuf>,
    cards: Option<PathBuf>,
    resume: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let graph = Graph::load(workflow)?;
    let seed = match seed {
        Some(path) => {
            let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            anyhow::ensure!(value.is_object(), "seed file {} is not a JSON object", path.display());
            ExecutionContext::from_value(value)
        }
        None => ExecutionContext::new(),
    };

    let workspace = config.workspace_dir();
    std::fs::create_dir_all(&workspace)?;

    let event_bus = Arc::new(EventBus::new(config.engine.event_capacity));
    let generator: Arc<dyn Generator> = Arc::from(inkflow_llm::create_generator(&config));
    let cards: Arc<dyn CardLookup> = Arc::new(DirectoryCards {
        dir: cards.unwrap_or_else(|| workspace.join("cards")),
    });
    let env = HandlerEnv::new(
        generator,
        cards,
        event_bus.clone(),
        config.engine.clone(),
        PromptLibrary::new(config.prompts.clone()),
    );
    let store = Arc::new(SqliteProjectStore::open(&config.database_path())?);
    let mut orchestrator = Orchestrator::new(env, store);
    if config.storage.checkpoints {
        let checkpoints = CheckpointStore::open(&workspace.join("checkpoints.db"))?;
        orchestrator = orchestrator.with_checkpoints(Arc::new(checkpoints));
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current node");
            interrupt.cancel();
        }
    });

    let log_config = config.log.clone().unwrap_or_default();
    let log_task = log_config.enabled.then(|| {
        let logger = RunLogger::new(config.log_dir(), log_config.level);
        tokio::spawn(logger.run(event_bus.subscribe(), project.clone(), CancellationToken::new()))
    });
    let printer = tokio::spawn(print_events(event_bus.subscribe()));

    let request = RunRequest::new(project.clone(), graph)
        .with_seed(seed)
        .with_cancel(cancel);
    let report = if resume {
        orchestrator.resume(request).await?
    } else {
        orchestrator.run(request).await
    };

    printer.await.ok();
    if let Some(task) = log_task {
        if let Ok(Some(path)) = task.await {
            info!(path = %path.display(), "Run log written");
        }
    }

    match report.failure {
        None => {
            if let Some(content) = report.final_content {
                println!("{}", content);
            }
            Ok(())
        }
        Some(failure) => anyhow::bail!(
            "run {} failed{}: {}",
            report.run_id,
            failure
                .node_id
                .map(|id| format!(" at node {}", id))
                .unwrap_or_default(),
            failure.message
        ),
    }
}

async fn print_events(mut rx: tokio::sync::broadcast::Receiver<ProgressEvent>) {
    while let Ok(event) = rx.recv().await {
        match &event {
            ProgressEvent::StepStarted { node_id } => eprintln!("[{}] started", node_id),
            ProgressEvent::StepCompleted { node_id, summary } => {
                eprintln!("[{}] done: {}", node_id, summary)
            }
            ProgressEvent::StepFailed { node_id, error } => {
                eprintln!("[{}] FAILED: {}", node_id, error)
            }
            ProgressEvent::StepSkipped { node_id, reason } => {
                eprintln!("[{}] skipped: {}", node_id, reason)
            }
            ProgressEvent::Warning { node_id, message } => {
                eprintln!("[{}] warning: {}", node_id, message)
            }
            ProgressEvent::ChapterCompleted {
                node_id,
                chapter,
                title,
                chars,
            } => eprintln!("[{}] chapter {} \"{}\" ({} chars)", node_id, chapter, title, chars),
            ProgressEvent::RunCompleted { .. } => eprintln!("Run completed"),
            ProgressEvent::RunFailed { kind, error, .. } => {
                eprintln!("Run failed ({:?}): {}", kind, error)
            }
        }
        if event.is_terminal() {
            break;
        }
    }
}

/// Content cards stored as files named after their id.
struct DirectoryCards {
    dir: PathBuf,
}

impl CardLookup for DirectoryCards {
    fn resolve(&self, card_id: &str) -> BoxFuture<'_, InkResult<Option<String>>> {
        let candidates = ["md", "txt"].map(|ext| self.dir.join(format!("{}.{}", card_id, ext)));
        Box::pin(async move {
            for path in candidates {
                match tokio::fs::read_to_string(&path).await {
                    Ok(text) => return Ok(Some(text)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(None)
        })
    }
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    let home_config = dirs_home().map(|h| h.join(".inkflow").join("config.toml"));
    if let Some(path) = home_config.filter(|p| p.exists()) {
        info!(path = %path.display(), "Loading config from home directory");
        return Ok(AppConfig::load(&path)?);
    }

    eprintln!("Warning: No config file found. Set OPENAI_API_KEY or create inkflow.toml");
    Ok(create_env_config())
}

fn create_env_config() -> AppConfig {
    let api_key = std::env::var("OPENAI_API_KEY").ok();
    let (model_id, base_url) = match &api_key {
        Some(_) => ("gpt-4o".to_string(), None),
        // Local Ollama
        None => (
            "llama3.2".to_string(),
            Some("http://localhost:11434/v1".to_string()),
        ),
    };

    AppConfig {
        model: ModelConfig {
            provider: "openai".to_string(),
            model_id,
            api_key,
            base_url,
            max_tokens: 8192,
            temperature: 0.7,
            image_model: None,
            speech_model: None,
            voice: None,
            retry: None,
        },
        fallback_models: vec![],
        engine: Default::default(),
        prompts: Default::default(),
        log: Some(LogConfig::default()),
        storage: Default::default(),
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
