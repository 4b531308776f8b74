//! revsync CLI - Command line client for revision-synchronized documents.
//!
//! This tool creates documents at an authority, inspects their history and
//! runs an interactive editing session with commit, update, undo and redo.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use revsync_changes::{ChangeOp, ChangeSet, Statement, Value};
use revsync_common::{DocumentId, RemoteLocation, Revision, UserId};
use revsync_remote::{create_default_registry, LocalAuthority, RemoteAuthority, UpdateRequest};
use revsync_sync::{
    ClientSession, LocalStateStore, SyncConfig, SyncEngine, SyncScheduler, SyncStatus,
};

type Engine = SyncEngine<dyn RemoteAuthority>;

#[derive(Parser)]
#[command(name = "revsync")]
#[command(about = "revsync - Revision-synchronized document editing")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Directory for local state and the default file authority.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Sync configuration file (JSON).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Identity to act as.
    #[arg(short, long, default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty document at the authority.
    Init {
        /// Remote document name.
        #[arg(short, long)]
        document: String,
    },

    /// Show the committed history of a document.
    Log {
        /// Remote document name.
        #[arg(short, long)]
        document: String,
    },

    /// Show local revisions, remote heads and unsent edits.
    Status,

    /// Open documents and start an interactive editing session.
    Session {
        /// Remote document names; the first one becomes active.
        #[arg(short, long, required = true)]
        document: Vec<String>,

        /// Commit on every sync tick.
        #[arg(long)]
        auto_commit: bool,

        /// Update on every sync tick.
        #[arg(long)]
        auto_update: bool,

        /// Seconds between sync ticks.
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .init();

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("revsync")
        });
    let config = load_config(cli.config.as_deref(), &data_dir).await?;
    let user = UserId::new(&cli.user).context("Invalid user name")?;

    match cli.command {
        Commands::Init { document } => cmd_init(&config, &data_dir, &document).await,
        Commands::Log { document } => cmd_log(&config, &data_dir, &user, &document).await,
        Commands::Status => cmd_status(&config, &data_dir, user).await,
        Commands::Session {
            document,
            auto_commit,
            auto_update,
            interval,
        } => {
            let mut config = config;
            config.auto_commit |= auto_commit;
            config.auto_update |= auto_update;
            if let Some(secs) = interval {
                config.sync_interval_secs = secs;
            }
            config.validate().context("Invalid sync configuration")?;
            cmd_session(&config, &data_dir, user, &document).await
        }
    }
}

/// Explicit config file, else `config.json` in the data directory, else defaults.
async fn load_config(path: Option<&Path>, data_dir: &Path) -> Result<SyncConfig> {
    if let Some(path) = path {
        return SyncConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    let default_path = data_dir.join("config.json");
    if tokio::fs::try_exists(&default_path).await.unwrap_or(false) {
        return SyncConfig::load(&default_path)
            .await
            .with_context(|| format!("Failed to load config from {}", default_path.display()));
    }
    Ok(SyncConfig::default())
}

fn authority_root(data_dir: &Path) -> PathBuf {
    data_dir.join("authority")
}

fn resolve_authority(config: &SyncConfig, data_dir: &Path) -> Result<Arc<dyn RemoteAuthority>> {
    let mut authority_config = config.authority_config.clone();
    if config.authority == "local" && authority_config.is_null() {
        authority_config = serde_json::json!({
            "root": authority_root(data_dir).to_string_lossy()
        });
    }

    let registry = create_default_registry();
    registry
        .resolve(&config.authority, authority_config)
        .with_context(|| format!("Failed to open authority '{}'", config.authority))
}

async fn open_store(data_dir: &Path) -> Result<Arc<Mutex<LocalStateStore>>> {
    let store = LocalStateStore::open(data_dir.join("state"))
        .await
        .context("Failed to open local state")?;
    Ok(Arc::new(Mutex::new(store)))
}

/// Create a document at the file authority.
async fn cmd_init(config: &SyncConfig, data_dir: &Path, document: &str) -> Result<()> {
    if config.authority != "local" {
        anyhow::bail!("Documents can only be created at the local authority");
    }

    let root = match config.authority_config.get("root").and_then(|v| v.as_str()) {
        Some(root) => PathBuf::from(root),
        None => authority_root(data_dir),
    };
    let authority = LocalAuthority::new(&root).context("Failed to open authority")?;
    let location = RemoteLocation::new(document).context("Invalid document name")?;

    authority
        .create_document(location.clone())
        .await
        .context("Failed to create document")?;

    println!("Document created: {}", location);
    println!("  Authority: {}", root.display());
    Ok(())
}

/// Print the committed history of a document.
async fn cmd_log(config: &SyncConfig, data_dir: &Path, user: &UserId, document: &str) -> Result<()> {
    let authority = resolve_authority(config, data_dir)?;
    let location = RemoteLocation::new(document).context("Invalid document name")?;

    let history = authority
        .update(UpdateRequest {
            location: location.clone(),
            from_revision: Revision::ZERO,
            acting_as: user.clone(),
        })
        .await
        .context("Failed to fetch history")?;

    if history.is_empty() {
        println!("{} has no commits.", location);
        return Ok(());
    }

    for entry in history.entries().iter().rev() {
        println!(
            "r{}  {}  {}  ({} changes)",
            entry.revision,
            entry.metadata.timestamp().format("%Y-%m-%d %H:%M:%S"),
            entry.metadata.author(),
            entry.changes.len()
        );
        if !entry.metadata.comment().is_empty() {
            println!("    {}", entry.metadata.comment());
        }
    }
    Ok(())
}

/// Print what the local store knows against the remote heads.
async fn cmd_status(config: &SyncConfig, data_dir: &Path, user: UserId) -> Result<()> {
    let authority = resolve_authority(config, data_dir)?;
    let store = open_store(data_dir).await?;
    let store = store.lock().await;

    let records = store.records();
    if records.is_empty() {
        println!("No documents have been opened yet.");
        return Ok(());
    }

    for record in records {
        let pending = store.pending(&record.document).len();
        match authority.head(&record.remote, &user).await {
            Ok(head) => println!(
                "{}  local r{}  remote r{}  {} behind  {} unsent changes",
                record.document,
                record.revision,
                head,
                head.difference(record.revision),
                pending
            ),
            Err(err) => println!(
                "{}  local r{}  remote unavailable ({})  {} unsent changes",
                record.document, record.revision, err, pending
            ),
        }
    }
    Ok(())
}

/// Interactive editing session.
async fn cmd_session(
    config: &SyncConfig,
    data_dir: &Path,
    user: UserId,
    documents: &[String],
) -> Result<()> {
    let authority = resolve_authority(config, data_dir)?;
    let store = open_store(data_dir).await?;
    let session = Arc::new(ClientSession::new(user, config.auto_commit, config.auto_update));
    let engine: Arc<Engine> =
        Arc::new(SyncEngine::new(authority, session.clone(), config).with_store(store));

    let mut ids = Vec::new();
    for name in documents {
        let id = DocumentId::new(name.as_str()).context("Invalid document name")?;
        let location = RemoteLocation::new(name.as_str()).context("Invalid document name")?;
        let outcome = engine
            .checkout(id.clone(), location)
            .await
            .with_context(|| format!("Failed to open {}", name))?;
        println!("Opened {}: {}", id, outcome);
        ids.push(id);
    }
    if let Some(first) = ids.first() {
        session.set_active_document(first).await?;
    }

    let (scheduler, handle) = SyncScheduler::new(Some(config.sync_interval()));
    let worker = tokio::spawn(handle.run(engine.clone()));
    info!(
        "Sync every {:?} (auto-commit: {}, auto-update: {})",
        config.sync_interval(),
        config.auto_commit,
        config.auto_update
    );

    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let active = session.active_document().await;
        let prompt = active.as_ref().map(|id| id.to_string()).unwrap_or_default();
        eprint!("{}> ", prompt);

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = words.split_first() else {
            continue;
        };
        if command == "quit" || command == "exit" {
            break;
        }

        if let Err(err) = run_command(&engine, &scheduler, active, command, args).await {
            println!("error: {:#}", err);
        }
    }

    scheduler.shutdown().await;
    if let Err(err) = worker.await {
        warn!("Sync worker ended abnormally: {}", err);
    }
    for id in session.document_ids().await {
        engine
            .close_document(&id)
            .await
            .with_context(|| format!("Failed to save {}", id))?;
    }
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  add <subject> <predicate> <object>     object is a resource, or a literal in quotes");
    println!("  remove <subject> <predicate> <object>");
    println!("  identity <value> | identity none");
    println!("  undo | redo | show | pending");
    println!("  commit [comment] | update | status");
    println!("  switch <document> | user <name>");
    println!("  auto commit|update on|off");
    println!("  quit");
}

async fn run_command(
    engine: &Arc<Engine>,
    scheduler: &SyncScheduler,
    active: Option<DocumentId>,
    command: &str,
    args: &[&str],
) -> Result<()> {
    let session = engine.session();
    let editor = session.editor();
    let active_id = || active.clone().context("No active document");

    match command {
        "help" => print_help(),
        "add" | "remove" => {
            let statement = parse_statement(args)?;
            let op = if command == "add" {
                ChangeOp::Add(statement)
            } else {
                ChangeOp::Remove(statement)
            };
            let applied = editor.apply_edit(&ChangeSet::from(vec![op]))?;
            if applied.is_empty() {
                println!("No effect.");
            }
        }
        "identity" => {
            let to = match args {
                ["none"] => None,
                [value] => Some(value.to_string()),
                _ => anyhow::bail!("Usage: identity <value> | identity none"),
            };
            let id = active_id()?;
            let from = statement_identity(&editor.contents(&id)?);
            editor.apply_edit(&ChangeSet::from(vec![ChangeOp::SetIdentity { from, to }]))?;
        }
        "undo" => {
            if !editor.undo()? {
                println!("Nothing to undo.");
            }
        }
        "redo" => {
            if !editor.redo()? {
                println!("Nothing to redo.");
            }
        }
        "show" => print_changes(&editor.contents(&active_id()?)?),
        "pending" => print_changes(&editor.uncommitted(&active_id()?)?),
        "commit" => {
            let outcome = scheduler.request_commit(active_id()?, args.join(" ")).await?;
            println!("{}", outcome);
        }
        "update" => {
            let outcome = scheduler.request_update(active_id()?).await?;
            println!("{}", outcome);
        }
        "status" => {
            for id in session.document_ids().await {
                let document = session.lookup(&id).await?;
                let behind = engine
                    .revisions_behind(&id)
                    .await
                    .map(|n| n.to_string())
                    .unwrap_or_else(|_| "?".to_string());
                let marker = if document.status() == SyncStatus::Conflict {
                    "  CONFLICT: update before committing"
                } else {
                    ""
                };
                println!(
                    "{}  r{}  {} behind  {} unsent{}",
                    id,
                    document.revision(),
                    behind,
                    editor.uncommitted(&id)?.len(),
                    marker
                );
            }
        }
        "switch" => {
            let [name] = args else {
                anyhow::bail!("Usage: switch <document>");
            };
            session.set_active_document(&DocumentId::new(*name)?).await?;
        }
        "user" => {
            let [name] = args else {
                anyhow::bail!("Usage: user <name>");
            };
            let identity = UserId::new(*name).context("Invalid user name")?;
            if let Some(record) = session.set_active_identity(identity).await? {
                let id = record.document.clone();
                engine.rebind(record).await?;
                println!("Kept {} and its unsent edits", id);
            }
        }
        "auto" => {
            let (which, enabled) = match args {
                [which, "on"] => (*which, true),
                [which, "off"] => (*which, false),
                _ => anyhow::bail!("Usage: auto commit|update on|off"),
            };
            match which {
                "commit" => session.preferences().set_auto_commit(enabled),
                "update" => session.preferences().set_auto_update(enabled),
                _ => anyhow::bail!("Usage: auto commit|update on|off"),
            }
        }
        other => anyhow::bail!("Unknown command '{}'; try 'help'", other),
    }
    Ok(())
}

fn parse_statement(args: &[&str]) -> Result<Statement> {
    if args.len() < 3 {
        anyhow::bail!("Expected <subject> <predicate> <object>");
    }
    let object = args[2..].join(" ");
    let object = match object.strip_prefix('"').and_then(|o| o.strip_suffix('"')) {
        Some(literal) => Value::Literal(literal.to_string()),
        None => Value::Resource(object),
    };
    Ok(Statement::new(args[0], args[1], object))
}

fn statement_identity(contents: &ChangeSet) -> Option<String> {
    contents.iter().find_map(|op| match op {
        ChangeOp::SetIdentity { to, .. } => to.clone(),
        _ => None,
    })
}

fn print_changes(changes: &ChangeSet) {
    if changes.is_empty() {
        println!("(empty)");
    }
    for op in changes.iter() {
        println!("  {}", op);
    }
}
