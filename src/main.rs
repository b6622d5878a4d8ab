use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use atrium_core::config::{AppConfig, ModelConfig, RetryConfig};
use atrium_core::event::EventBus;
use atrium_core::traits::LlmClient;
use atrium_core::types::{SessionId, WorkflowEvent};

use atrium_agent::{Collaborators, LlmAnswerModel, SessionManager, WorkflowGraph};
use atrium_memory::KnowledgeStore;
use atrium_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "atrium", version, about = "Smart-building question answering")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "atrium.toml")]
    config: PathBuf,

    /// Session ID (auto-generated if not provided)
    #[arg(short, long)]
    session: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question and print the result as JSON
    Ask {
        /// The question; read from stdin when omitted
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Start interactive REPL mode
    Repl,
    /// Show current configuration
    Config,
    /// Manage the equipment manual store
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum KbAction {
    /// Split text files into passages and add them to the store
    Ingest {
        /// Files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Search the store
    Search {
        /// Search text
        query: String,
        /// Maximum number of passages
        #[arg(long, default_value = "5")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `ask` output stays valid JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("atrium=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "atrium", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    let workspace = config.workspace_dir();
    std::fs::create_dir_all(&workspace).ok();

    let store = Arc::new(KnowledgeStore::open(
        &config.knowledge_db_path(),
        config.knowledge.max_results,
    )?);

    match &cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Some(Commands::Kb { action }) => return handle_kb(action, &store),
        Some(Commands::Completions { .. }) => unreachable!("handled before config load"),
        _ => {}
    }

    let event_bus = Arc::new(EventBus::default());
    let tools = Arc::new(ToolRegistry::with_builtins(&config)?);
    info!(tools = ?tools.list(), "Tools registered");

    let llm = build_llm(&config.model, &config.fallback_models);
    let grader_config = config.grader_model().clone();
    let grader_llm = build_llm(&grader_config, &[]);

    let graph = WorkflowGraph::new(
        &config.workflow,
        &config.rooms,
        Collaborators {
            model: Arc::new(LlmAnswerModel::new(llm, config.model.clone())),
            grader: Arc::new(LlmAnswerModel::new(grader_llm, grader_config)),
            tools,
            knowledge: store,
        },
    )
    .with_event_bus(event_bus.clone());
    let sessions = SessionManager::new(Arc::new(graph));

    let session_id = cli
        .session
        .map(|s| SessionId::from_str(&s))
        .unwrap_or_else(SessionId::new);

    match cli.command {
        Some(Commands::Ask { query }) => {
            let text = if query.is_empty() {
                io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                query.join(" ")
            };
            let output = sessions.ask(&session_id.0, &text).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Some(Commands::Repl) | None => run_repl(&sessions, &event_bus, &session_id).await?,
        Some(Commands::Config) | Some(Commands::Kb { .. }) | Some(Commands::Completions { .. }) => {
            unreachable!("handled before workflow setup")
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    if let Some(home_config) = dirs_home().map(|h| h.join(".atrium").join("atrium.toml")) {
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home_config)?);
        }
    }

    eprintln!("Warning: No config file found. Set ANTHROPIC_API_KEY or create atrium.toml");
    create_env_config()
}

/// Primary client, wrapped for retries and fallbacks when configured.
fn build_llm(model: &ModelConfig, fallback_models: &[ModelConfig]) -> Arc<dyn LlmClient> {
    let primary = atrium_llm::create_client(model);
    if fallback_models.is_empty() && model.retry.is_none() {
        return Arc::from(primary);
    }

    let retry_config = model.retry.clone().unwrap_or_default();
    let fallbacks: Vec<_> = fallback_models
        .iter()
        .map(|mc| (mc.clone(), atrium_llm::create_client(mc)))
        .collect();
    Arc::new(atrium_llm::RetryingClient::new(primary, fallbacks, retry_config))
}

fn handle_kb(action: &KbAction, store: &KnowledgeStore) -> anyhow::Result<()> {
    match action {
        KbAction::Ingest { files } => {
            for path in files {
                let text = std::fs::read_to_string(path)?;
                let title = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                let added = store.ingest_document(&title, &path.display().to_string(), &text)?;
                println!("{}: {} passages", path.display(), added);
            }
            println!("Store holds {} passages", store.count()?);
        }
        KbAction::Search { query, limit } => {
            let passages = store.search(query, *limit)?;
            if passages.is_empty() {
                println!("No passages found.");
            }
            for (i, p) in passages.iter().enumerate() {
                println!("[{}] {} ({}) score {:.2}", i + 1, p.title, p.uri, p.score);
                println!("{}\n", p.content);
            }
        }
    }
    Ok(())
}

async fn run_repl(
    sessions: &SessionManager,
    event_bus: &EventBus,
    session_id: &SessionId,
) -> anyhow::Result<()> {
    println!("Atrium v{} (session {})", env!("CARGO_PKG_VERSION"), session_id);
    println!("Ask about a room, a device, or the weather. Type /quit to exit.\n");

    let mut rx = event_bus.subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                WorkflowEvent::StageEntered { stage, pass, .. } => {
                    eprintln!("[{} pass {}]", stage, pass);
                }
                WorkflowEvent::EvidenceCollected { total, errors, .. } => {
                    eprintln!("[evidence: {} items, {} errors]", total, errors);
                }
                WorkflowEvent::Graded {
                    passed,
                    lowest_score,
                    ..
                } => {
                    let verdict = if passed { "pass" } else { "fail" };
                    eprintln!("[graded: {} (lowest {})]", verdict, lowest_score);
                }
                WorkflowEvent::RetryScheduled { retry_count, .. } => {
                    eprintln!("[retry {}]", retry_count);
                }
                WorkflowEvent::OutputReused { .. } => eprintln!("[same question, reusing answer]"),
                WorkflowEvent::RunStarted { .. } | WorkflowEvent::RunComplete { .. } => {}
            }
        }
    });

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        match input {
            "/quit" | "/exit" => break,
            "" => continue,
            _ => {}
        }

        match sessions.ask(&session_id.0, input).await {
            Ok(output) => {
                println!("\n{}", output.answer);
                if let Some(err) = &output.error {
                    warn!(error = %err, "Run finished with an error");
                }
                println!();
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    progress.abort();
    Ok(())
}

fn create_env_config() -> anyhow::Result<AppConfig> {
    let (provider, model_id, api_key, base_url) =
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            ("anthropic", "claude-sonnet-4-20250514", Some(key), None)
        } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            ("openai", "gpt-4o", Some(key), None)
        } else {
            // Default to Ollama (local)
            (
                "ollama",
                "llama3.2",
                None,
                Some("http://localhost:11434/v1/chat/completions".to_string()),
            )
        };

    let model = ModelConfig {
        provider: provider.to_string(),
        model_id: model_id.to_string(),
        api_key,
        base_url,
        max_tokens: 2048,
        temperature: 0.0,
        retry: Some(RetryConfig::default()),
    };

    Ok(AppConfig {
        workflow: Default::default(),
        model,
        fallback_models: vec![],
        grader: None,
        telemetry: None,
        weather: Default::default(),
        knowledge: Default::default(),
        rooms: atrium_core::config::default_room_aliases(),
    })
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
