//! convoy - durable conversational orchestrator for streaming LLM agents.
//!
//! This binary wires the crates together into the collaborator surface
//! §6 defines: conversation CRUD, the message queue, attaching to a
//! conversation's live event stream, and cancellation.

use clap::{Parser, Subcommand};
use convoy_core::{Config, ConversationCoordinator, ConversationRepository, PromptEngine};
use convoy_provider::anthropic::AnthropicProvider;
use convoy_provider::mock::MockProvider;
use convoy_provider::model::anthropic::{claude_haiku_4_5, claude_sonnet_4_5};
use convoy_provider::{BoxedLanguageModel, ModelInfo};
use convoy_storage::json::JsonStorage;
use convoy_tools::{ShellSessionPool, ToolRegistry};
use convoy_util::log::{self, LogConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "convoy")]
#[command(author, version, about = "Durable conversational orchestrator for streaming LLM agents", long_about = None)]
struct Cli {
    /// Model to use, "provider/model" (defaults to config, then anthropic/claude-sonnet-4-5).
    #[arg(long, global = true)]
    model: Option<String>,

    /// Root directory for the JSON event store (defaults to config, then the OS data dir).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Shell executable for tool sessions (defaults to config, then /bin/bash).
    #[arg(long, global = true)]
    shell: Option<String>,

    /// Increase log verbosity (can be repeated).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new conversation.
    New {
        user_id: String,
        #[arg(long, default_value = "New conversation")]
        title: String,
    },
    /// List a user's conversations, most recent first.
    List { user_id: String },
    /// Print a conversation's full snapshot (messages, blocks, tool calls).
    Show { conversation_id: String },
    /// Rename a conversation.
    SetTitle {
        conversation_id: String,
        title: String,
    },
    /// Delete a conversation and everything it owns.
    Delete { conversation_id: String },
    /// Queue a user message; starts a Prompt immediately if none is active.
    Send {
        conversation_id: String,
        #[arg(num_args = 1.., required = true)]
        content: Vec<String>,
    },
    /// Replace the content of a still-queued message.
    Edit {
        conversation_id: String,
        message_id: String,
        #[arg(num_args = 1.., required = true)]
        content: Vec<String>,
    },
    /// Remove a still-queued message.
    Unqueue {
        conversation_id: String,
        message_id: String,
    },
    /// Print the active prompt for a conversation, if any.
    Status { conversation_id: String },
    /// Request cancellation of the active prompt.
    Cancel { conversation_id: String },
    /// Attach to a conversation's live event stream (snapshot replay, then real-time).
    Attach { conversation_id: String },
    /// Convenience: create a conversation, send one message, and print
    /// streamed output until the turn settles.
    Chat {
        user_id: String,
        #[arg(num_args = 1.., required = true)]
        message: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = Config::load(std::env::current_dir().ok().as_deref()).await?;
    init_logging(&config, cli.verbose);
    for source in &sources {
        tracing::debug!(path = %source.display(), "loaded config file");
    }
    if let Some(model) = cli.model.clone() {
        config.model = Some(model);
    }
    if let Some(data_dir) = cli.data_dir.clone() {
        config.data_dir = Some(data_dir.display().to_string());
    }
    if let Some(shell) = cli.shell.clone() {
        config.shell.get_or_insert_with(Default::default).path = Some(shell);
    }

    let coordinator = build_coordinator(&config)?;

    match cli.command {
        Commands::New { user_id, title } => {
            let conversation = coordinator.create_conversation(&user_id, title).await?;
            println!("{}", serde_json::to_string_pretty(&conversation)?);
        }
        Commands::List { user_id } => {
            let conversations = coordinator.list_conversations(&user_id).await?;
            println!("{}", serde_json::to_string_pretty(&conversations)?);
        }
        Commands::Show { conversation_id } => {
            let snapshot = coordinator.get_conversation(&conversation_id).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::SetTitle { conversation_id, title } => {
            let conversation = coordinator.set_title(&conversation_id, title).await?;
            println!("{}", serde_json::to_string_pretty(&conversation)?);
        }
        Commands::Delete { conversation_id } => {
            coordinator.delete_conversation(&conversation_id).await?;
            println!("deleted {conversation_id}");
        }
        Commands::Send { conversation_id, content } => {
            let message = coordinator.queue_message(&conversation_id, content.join(" ")).await?;
            println!("{}", serde_json::to_string_pretty(&message)?);
        }
        Commands::Edit {
            conversation_id,
            message_id,
            content,
        } => {
            coordinator
                .edit_queued_message(&conversation_id, &message_id, content.join(" "))
                .await?;
            println!("updated {message_id}");
        }
        Commands::Unqueue { conversation_id, message_id } => {
            coordinator.delete_queued_message(&conversation_id, &message_id).await?;
            println!("removed {message_id}");
        }
        Commands::Status { conversation_id } => {
            let prompt = coordinator.get_active_prompt(&conversation_id).await?;
            println!("{}", serde_json::to_string_pretty(&prompt)?);
        }
        Commands::Cancel { conversation_id } => {
            coordinator.cancel_active_prompt(&conversation_id).await?;
            println!("cancellation requested for {conversation_id}");
        }
        Commands::Attach { conversation_id } => attach_and_print(&coordinator, &conversation_id).await?,
        Commands::Chat { user_id, message } => {
            let conversation = coordinator.create_conversation(&user_id, "Chat").await?;
            coordinator.queue_message(&conversation.id, message.join(" ")).await?;
            attach_and_print(&coordinator, &conversation.id).await?;
        }
    }

    Ok(())
}

/// Attach to a conversation and print every event until its active prompt
/// (if any) settles.
async fn attach_and_print(coordinator: &ConversationCoordinator, conversation_id: &str) -> anyhow::Result<()> {
    let mut stream = coordinator.stream_conversation(conversation_id).await?;
    println!("{}", serde_json::to_string_pretty(&stream.snapshot)?);

    while let Some(event) = stream.events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        if event.event_type == "prompt-completed" || event.event_type == "prompt-failed" {
            break;
        }
    }
    Ok(())
}

fn init_logging(config: &convoy_core::Config, verbosity: u8) {
    let level = match verbosity {
        0 => config.log_level.map(|l| match l {
            convoy_core::config::LogLevel::Debug => log::LogLevel::Debug,
            convoy_core::config::LogLevel::Info => log::LogLevel::Info,
            convoy_core::config::LogLevel::Warn => log::LogLevel::Warn,
            convoy_core::config::LogLevel::Error => log::LogLevel::Error,
        }),
        1 => Some(log::LogLevel::Debug),
        _ => Some(log::LogLevel::Trace),
    }
    .unwrap_or_default();

    log::init(LogConfig {
        print: true,
        level,
        include_location: verbosity > 1,
        file: None,
    });
}

fn build_coordinator(config: &Config) -> anyhow::Result<ConversationCoordinator> {
    let data_dir = config
        .data_dir
        .as_ref()
        .map(PathBuf::from)
        .or_else(Config::data_dir)
        .ok_or_else(|| anyhow::anyhow!("could not determine a data directory; pass --data-dir"))?;
    std::fs::create_dir_all(&data_dir)?;

    let storage = JsonStorage::new(data_dir);
    let bus = convoy_core::Bus::new();
    let repo = ConversationRepository::new(storage, bus);

    let registry = Arc::new(ToolRegistry::with_builtins());

    let shell_path = config
        .shell
        .as_ref()
        .and_then(|s| s.path.clone())
        .unwrap_or_else(|| "/bin/bash".to_string());
    let shell_pool = Arc::new(ShellSessionPool::new(shell_path));

    let model = config
        .model
        .clone()
        .unwrap_or_else(|| "anthropic/claude-sonnet-4-5".to_string());
    let (provider_id, model_id) = Config::parse_model(&model)
        .ok_or_else(|| anyhow::anyhow!("model must be in \"provider/model\" form, got {model}"))?;

    let provider = build_provider(config, provider_id, model_id)?;

    let mut engine = PromptEngine::new(provider, repo.clone(), registry, shell_pool);
    if let Some(max_retry_attempts) = config.max_retry_attempts {
        engine = engine.with_config(convoy_core::PromptEngineConfig {
            max_retry_attempts,
            ..Default::default()
        });
    }

    Ok(ConversationCoordinator::new(
        repo,
        Arc::new(engine),
        model,
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    ))
}

fn build_provider(config: &Config, provider_id: &str, model_id: &str) -> anyhow::Result<BoxedLanguageModel> {
    match provider_id {
        "anthropic" => {
            let model_info = resolve_anthropic_model(model_id);
            let provider_config = config.provider.as_ref().and_then(|p| p.get("anthropic"));
            let api_key = provider_config
                .and_then(|p| p.api_key.clone())
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok());

            let Some(api_key) = api_key else {
                tracing::warn!("no Anthropic API key configured; falling back to the mock provider (conversations can be created and inspected, but no turn will actually run)");
                return Ok(Arc::new(MockProvider::new(model_info)));
            };

            let provider = match provider_config.and_then(|p| p.base_url.clone()) {
                Some(base_url) => AnthropicProvider::with_base_url(&api_key, &base_url, model_info)?,
                None => AnthropicProvider::new(&api_key, model_info)?,
            };
            Ok(Arc::new(provider))
        }
        other => Err(anyhow::anyhow!("unsupported provider: {other}")),
    }
}

fn resolve_anthropic_model(model_id: &str) -> ModelInfo {
    match model_id {
        "claude-haiku-4-5" | "claude-haiku-4-5-20251001" => claude_haiku_4_5(),
        _ => claude_sonnet_4_5(),
    }
}
