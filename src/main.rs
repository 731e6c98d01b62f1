//! relaychat - interactive chat client
//!
//! Joins a room, prints the transcript to stdout and reads lines from stdin.
//! Logs go to stderr so they never interleave with the conversation.

use clap::{Parser, Subcommand};
use relaychat::agent::{ChatEntry, ChatSession, EntryOrigin, LlmResponder, SessionEvent};
use relaychat::config::{find_config_file, ChatConfig};
use relaychat::llm::provider::LlmProvider;
use relaychat::llm::providers::{OpenAiConfig, OpenAiProvider};
use relaychat::observability::{
    init_default_logging, init_logging, logging::parse_level, HealthServer, LogFormat,
};
use relaychat::preferences::{
    apply_preferences, set_preference, PreferenceStore, TomlFilePreferences,
};
use relaychat::transport::mqtt::MqttClient;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

/// Peer-to-peer chat over a fanout MQTT room with an LLM auto-responder
#[derive(Parser)]
#[command(name = "relaychat")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Preference file path
    #[arg(long, value_name = "FILE", env = "RELAYCHAT_PREFS")]
    prefs: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the room and chat interactively
    Run {
        /// Display name for this session, overriding config and preferences
        #[arg(short, long)]
        name: Option<String>,

        /// Start with auto-reply switched off
        #[arg(long)]
        no_auto: bool,

        /// Serve /health, /metrics and /live on this port
        #[arg(long, env = "HEALTH_PORT")]
        health_port: Option<u16>,
    },
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
    /// List the models the LLM server offers
    Models,
    /// Read or change stored preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Print one stored preference
    Get { key: String },
    /// Store a preference (session.name, broker.exchange, llm.model)
    Set { key: String, value: String },
    /// Print every stored preference
    List,
}

/// Interactive input while a session runs
#[derive(Debug, PartialEq)]
enum InputCommand {
    Quit,
    Auto(bool),
    Clear,
    Help,
    Unknown(String),
    Say(String),
}

fn parse_input(line: &str) -> InputCommand {
    let trimmed = line.trim();
    if !trimmed.starts_with('/') {
        return InputCommand::Say(trimmed.to_string());
    }

    let mut parts = trimmed.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("/quit") | Some("/exit"), _) => InputCommand::Quit,
        (Some("/auto"), Some("on")) => InputCommand::Auto(true),
        (Some("/auto"), Some("off")) => InputCommand::Auto(false),
        (Some("/clear"), _) => InputCommand::Clear,
        (Some("/help"), _) => InputCommand::Help,
        _ => InputCommand::Unknown(trimmed.to_string()),
    }
}

const HELP: &str = "Commands: /auto on|off, /clear, /quit";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(parse_level("INFO"), LogFormat::Compact, false),
        2 => init_logging(parse_level("DEBUG"), LogFormat::Compact, false),
        _ => init_logging(parse_level("TRACE"), LogFormat::Compact, true),
    }

    let store = TomlFilePreferences::locate(cli.prefs.as_deref());

    let config = match load_configuration(cli.config.as_ref(), &store) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            name,
            no_auto,
            health_port,
        } => run_session(config, name, no_auto, health_port).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Models => list_models(&config).await,
        Commands::Prefs { action } => handle_prefs_command(&config, &store, action),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_configuration(
    config_path: Option<&PathBuf>,
    store: &dyn PreferenceStore,
) -> Result<ChatConfig, Box<dyn std::error::Error>> {
    let path = find_config_file(config_path.map(PathBuf::as_path))?;
    info!("Loading configuration from: {}", path.display());

    let mut config = ChatConfig::load_from_file(&path)?;
    apply_preferences(store, &mut config)?;
    Ok(config)
}

/// Provider factory for creating the LLM provider from configuration
fn create_provider(
    config: &ChatConfig,
) -> Result<Arc<dyn LlmProvider>, Box<dyn std::error::Error>> {
    let provider = OpenAiProvider::new(OpenAiConfig::from_section(&config.llm))?;
    Ok(Arc::new(provider))
}

async fn run_session(
    mut config: ChatConfig,
    name: Option<String>,
    no_auto: bool,
    health_port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(name) = name {
        config.apply_setting("session.name", &name)?;
    }
    if no_auto {
        config.auto_reply.enabled = false;
    }

    info!(
        identity = %config.session.name,
        topic = %config.room_topic(),
        "Starting relaychat v{}",
        env!("CARGO_PKG_VERSION")
    );

    let transport = MqttClient::new(config.broker.clone())?;
    let provider = create_provider(&config)?;
    let mut session = ChatSession::new(&config, transport, provider);

    let renderer = tokio::spawn(render_events(session.subscribe()));

    if let Some(port) = health_port {
        let health_server = Arc::new(HealthServer::new(session.identity(), port));
        tokio::spawn(health_server.clone().start());
        tokio::spawn(watch_connection(health_server, session.transport().clone()));
    }

    session.connect().await?;
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    InputCommand::Quit => break,
                    InputCommand::Auto(enabled) => session.set_auto(enabled),
                    InputCommand::Clear => session.clear_history(),
                    InputCommand::Help => println!("{HELP}"),
                    InputCommand::Unknown(command) => {
                        println!("Unknown command {command}. {HELP}");
                    }
                    InputCommand::Say(text) => {
                        if let Err(e) = session.send(&text).await {
                            session.notify(&e.user_message());
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, leaving the room");
                break;
            }
            _ = wait_for_permanent_disconnect(session.transport().clone()) => {
                error!("Broker connection permanently lost");
                session.notify("Connection to the broker was lost");
                break;
            }
        }
    }

    session.disconnect().await?;
    // Let the renderer flush the final status line
    sleep(Duration::from_millis(50)).await;
    renderer.abort();
    Ok(())
}

async fn render_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => render_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                println!("* ({skipped} updates skipped)");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn render_event(event: &SessionEvent) {
    match event {
        SessionEvent::MessageAppended(entry) => println!("{}", format_entry(entry)),
        SessionEvent::TypingChanged {
            sender,
            is_typing: true,
        } => println!("  {sender} is typing..."),
        SessionEvent::TypingChanged { .. } => {}
        SessionEvent::StatusChanged(status) => println!("* {status}"),
        SessionEvent::HistoryCleared => println!("* Transcript cleared"),
    }
}

fn format_entry(entry: &ChatEntry) -> String {
    let time = entry.timestamp.with_timezone(&chrono::Local).format("%H:%M");
    match entry.origin {
        EntryOrigin::Local => format!("[{time}] {} (you): {}", entry.sender, entry.content),
        EntryOrigin::Remote => format!("[{time}] {}: {}", entry.sender, entry.content),
        EntryOrigin::System => format!("[{time}] ! {}", entry.content),
    }
}

/// Mirror the transport's connection flag into the health server
async fn watch_connection(health_server: Arc<HealthServer>, transport: Arc<MqttClient>) {
    loop {
        health_server.set_connected(transport.is_connected());
        sleep(Duration::from_millis(500)).await;
    }
}

async fn wait_for_permanent_disconnect(transport: Arc<MqttClient>) {
    loop {
        if transport.is_permanently_disconnected() {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
}

fn handle_config_command(
    config: &ChatConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", config.to_toml_string()?);
    } else {
        println!(
            "Configuration is valid: {} on {}",
            config.session.name,
            config.room_topic()
        );
    }
    Ok(())
}

async fn list_models(config: &ChatConfig) -> Result<(), Box<dyn std::error::Error>> {
    let provider = create_provider(config)?;
    let responder = LlmResponder::new(provider, &config.llm, &config.auto_reply);

    let models = responder.list_models().await;
    if models.is_empty() {
        println!("No models available from {}", config.llm.base_url);
    }
    for model in models {
        let marker = if model == config.llm.model { "*" } else { " " };
        println!("{marker} {model}");
    }
    Ok(())
}

fn handle_prefs_command(
    config: &ChatConfig,
    store: &TomlFilePreferences,
    action: PrefsAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        PrefsAction::Get { key } => match store.get(&key)? {
            Some(value) => println!("{value}"),
            None => println!("(not set)"),
        },
        PrefsAction::Set { key, value } => {
            set_preference(store, config, &key, &value)?;
            println!("Saved {key} to {}", store.path().display());
        }
        PrefsAction::List => {
            for (key, value) in store.all()? {
                println!("{key} = {value}");
            }
        }
    }
    Ok(())
}
