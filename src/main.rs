use acss::config::{Config, StreamConfig};
use acss::live::{FileSink, LiveContextManager};
use acss::mutate::{self, TaskUpdate};
use acss::prompt::{self, PromptTarget};
use acss::session::{self, ErrorRecord, ProjectMetadata, SessionContext, SessionDocument, TaskStatus};
use acss::{git, llm, server, store, watch, Compressor};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "acss")]
#[command(about = "AI Coding Session State - capture, merge, compress and stream session context")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a session in the current project
    Init {
        /// Project name (defaults to the directory name)
        #[arg(short, long)]
        name: Option<String>,
        /// Tech stack, comma-separated
        #[arg(short, long)]
        tech: Option<String>,
        /// Entry points, comma-separated
        #[arg(short, long)]
        entry: Option<String>,
        /// Current task intent
        #[arg(short, long, default_value = "Starting development")]
        intent: String,
        /// Overwrite an existing session
        #[arg(long)]
        force: bool,
    },
    /// Log session events
    Log {
        #[command(subcommand)]
        entry: LogEntry,
    },
    /// Mark a logged error as resolved
    Resolve {
        /// Exact error message
        message: String,
    },
    /// Update the current task
    Task {
        #[arg(short, long)]
        intent: Option<String>,
        #[arg(short, long, value_enum)]
        status: Option<TaskStatus>,
    },
    /// Merge several session files; earlier files take precedence for identity
    Merge {
        /// Session files, in precedence order
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(short, long, default_value = "merged.acss.json")]
        output: PathBuf,
    },
    /// Shrink the session with the configured LLM, falling back to a heuristic
    Compress {
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short, long)]
        endpoint: Option<String>,
    },
    /// Export the session (stdout by default)
    Export {
        output: Option<PathBuf>,
        #[arg(short, long)]
        pretty: bool,
    },
    /// Generate a handoff prompt for another assistant
    #[command(alias = "load")]
    Prompt {
        #[arg(short = 'f', long = "for", value_enum, default_value_t = PromptTarget::Other)]
        target: PromptTarget,
        /// Approximate maximum prompt length in tokens
        #[arg(short, long)]
        max_tokens: Option<usize>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Apply one JSON-encoded event (file, git or chat) from a file or stdin
    Apply {
        path: Option<PathBuf>,
    },
    /// Fold file changes and git commits into the session until interrupted
    Watch {
        /// Also stream the live session over WebSocket
        #[arg(short, long)]
        stream: bool,
        /// Stream port (defaults to stream.port from the config)
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(long)]
        no_files: bool,
        #[arg(long)]
        no_git: bool,
    },
    /// Show or change configuration
    Config {
        key: Option<String>,
        value: Option<String>,
    },
}

#[derive(Subcommand)]
enum LogEntry {
    /// Log a technical decision
    Decision { text: String },
    /// Log an error encountered
    Error {
        message: String,
        #[arg(short, long)]
        file: Option<String>,
        #[arg(short, long)]
        line: Option<u32>,
        #[arg(short, long)]
        resolved: bool,
    },
    /// Log a next step
    Next { text: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            name,
            tech,
            entry,
            intent,
            force,
        } => init_session(name, tech, entry, intent, force)?,
        Commands::Log { entry } => log_entry(entry)?,
        Commands::Resolve { message } => {
            update_session(|doc| Ok(mutate::resolve_error(doc, &message)?))?;
            println!("Resolved: {}", message);
        }
        Commands::Task { intent, status } => {
            if intent.is_none() && status.is_none() {
                bail!("Nothing to update: pass --intent and/or --status");
            }
            let doc = update_session(|doc| {
                Ok(mutate::update_task(
                    doc,
                    TaskUpdate {
                        intent: intent.clone(),
                        status,
                        started_at: None,
                    },
                )?)
            })?;
            println!(
                "Task: {} ({})",
                doc.current_task.intent,
                doc.current_task.status.as_str()
            );
        }
        Commands::Merge { files, output } => merge_files(&files, &output)?,
        Commands::Compress { model, endpoint } => compress_session(model, endpoint).await?,
        Commands::Export { output, pretty } => export_session(output, pretty)?,
        Commands::Prompt {
            target,
            max_tokens,
            output,
        } => {
            let (doc, _) = load_current()?;
            let text = prompt::generate_prompt(&doc, target, max_tokens)
                .context("Failed to render prompt")?;
            write_or_print(output.as_deref(), &text)?;
        }
        Commands::Apply { path } => apply_event(path).await?,
        Commands::Watch {
            stream,
            port,
            no_files,
            no_git,
        } => watch_session(stream || port.is_some(), port, !no_files, !no_git).await?,
        Commands::Config { key, value } => configure(key, value)?,
    }

    Ok(())
}

fn project_root() -> Result<PathBuf> {
    std::env::current_dir().context("Failed to get current directory")
}

fn load_current() -> Result<(SessionDocument, PathBuf)> {
    let path = store::session_path(&project_root()?);
    if !path.exists() {
        bail!("No ACSS session found. Run \"acss init\" first.");
    }
    let doc = store::load_session(&path)?;
    Ok((doc, path))
}

fn update_session<F>(apply: F) -> Result<SessionDocument>
where
    F: FnOnce(&SessionDocument) -> Result<SessionDocument>,
{
    let (doc, path) = load_current()?;
    let updated = apply(&doc)?;
    store::save_session(&path, &updated)?;
    Ok(updated)
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn init_session(
    name: Option<String>,
    tech: Option<String>,
    entry: Option<String>,
    intent: String,
    force: bool,
) -> Result<()> {
    let root = project_root()?;
    let path = store::session_path(&root);
    if path.exists() && !force {
        bail!("Session already exists at {} (use --force to overwrite)", path.display());
    }

    let name = name.unwrap_or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string())
    });

    let mut doc = session::create_empty_session(
        session::new_session_id(),
        root.to_string_lossy(),
        ProjectMetadata {
            name,
            tech_stack: split_list(tech),
            entry_points: split_list(entry),
        },
    );
    doc.context = Some(SessionContext {
        git_branch: git::current_branch(&root),
        platform: Some(std::env::consts::OS.to_string()),
        ..Default::default()
    });
    let doc = mutate::update_task(
        &doc,
        TaskUpdate {
            intent: Some(intent),
            status: Some(TaskStatus::InProgress),
            started_at: None,
        },
    )?;

    store::save_session(&path, &doc)?;
    println!("Initialized ACSS session in {}", path.display());
    Ok(())
}

fn log_entry(entry: LogEntry) -> Result<()> {
    match entry {
        LogEntry::Decision { text } => {
            update_session(|doc| Ok(mutate::add_decision(doc, text.as_str())?))?;
            println!("Decision logged: {}", text);
        }
        LogEntry::Error {
            message,
            file,
            line,
            resolved,
        } => {
            let record = ErrorRecord {
                message: message.clone(),
                file,
                line,
                resolved,
            };
            update_session(|doc| Ok(mutate::add_error(doc, record)?))?;
            println!("Error logged: {}", message);
        }
        LogEntry::Next { text } => {
            update_session(|doc| Ok(mutate::add_next_step(doc, text.as_str())?))?;
            println!("Next step logged: {}", text);
        }
    }
    Ok(())
}

fn merge_files(files: &[PathBuf], output: &Path) -> Result<()> {
    let mut sessions = Vec::new();
    for file in files {
        if !file.exists() {
            eprintln!("Warning: File not found: {} (skipping)", file.display());
            continue;
        }
        sessions.push(store::load_session(file)?);
    }

    if sessions.is_empty() {
        bail!("No valid session files found to merge.");
    }

    eprintln!("Merging {} sessions...", sessions.len());
    let merged = acss::merge(&sessions)?;
    store::save_session(output, &merged)?;

    println!("Merged session saved to {}", output.display());
    Ok(())
}

async fn compress_session(model: Option<String>, endpoint: Option<String>) -> Result<()> {
    let (doc, path) = load_current()?;
    let mut config = Config::load()?;
    if let Some(model) = model {
        config.llm.model = model;
    }
    if let Some(endpoint) = endpoint {
        config.llm.endpoint = endpoint;
    }

    let client = llm::client_from_config(&config.llm)?;
    eprintln!("Compressing session using {}...", client.name());

    let compressed = Compressor::new(client, config.compression.clone())
        .compress(&doc)
        .await;
    store::save_session(&path, &compressed)?;

    if let Some(source) = compressed.sources.last() {
        println!("{}", source.note);
    }
    Ok(())
}

fn export_session(output: Option<PathBuf>, pretty: bool) -> Result<()> {
    let (doc, _) = load_current()?;
    acss::validate(&doc).into_result()?;

    let json = if pretty {
        serde_json::to_string_pretty(&doc)
    } else {
        serde_json::to_string(&doc)
    }
    .context("Failed to serialize session")?;

    write_or_print(output.as_deref(), &json)
}

fn write_or_print(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn read_event_input(path: Option<PathBuf>) -> Result<String> {
    use std::io::Read;

    if let Some(path) = path {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read event file: {}", path.display()));
    }

    if atty::is(atty::Stream::Stdin) {
        bail!("No event given: pass a file path or pipe JSON on stdin");
    }

    let mut content = String::new();
    std::io::stdin()
        .read_to_string(&mut content)
        .context("Failed to read event from stdin")?;
    Ok(content)
}

async fn apply_event(path: Option<PathBuf>) -> Result<()> {
    let raw = read_event_input(path)?;
    let (doc, session_path) = load_current()?;
    let config = Config::load()?;

    let mut manager = LiveContextManager::new(doc, FileSink::new(session_path), config.live);
    manager.handle_raw(raw.trim()).await?;

    println!("Applied event to session {}", manager.session().session_id);
    Ok(())
}

async fn watch_session(stream: bool, port: Option<u16>, files: bool, commits: bool) -> Result<()> {
    let root = project_root()?;
    let (doc, session_path) = load_current()?;
    let config = Config::load()?;

    let manager = LiveContextManager::new(doc, FileSink::new(session_path.clone()), config.live.clone());
    let (handle, task) = manager.spawn();

    let watcher = if files {
        Some(watch::watch_files(&root, handle.clone())?)
    } else {
        None
    };

    let observer = if commits {
        let observer = git::GitObserver::new(&root, Duration::from_secs(config.live.git_poll_secs.max(1)));
        Some(tokio::spawn(observer.run(handle.clone())))
    } else {
        None
    };

    let (stop_server, server_stopped) = tokio::sync::oneshot::channel::<()>();
    let server_task = if stream {
        let stream_config = StreamConfig {
            port: port.unwrap_or(config.stream.port),
        };
        let live = handle.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = server_stopped.await;
            };
            if let Err(e) = server::run_server(&stream_config, live, shutdown).await {
                log::error!("Stream server stopped: {:#}", e);
            }
        }))
    } else {
        None
    };

    println!("Watch mode started");
    println!("  Monitoring: {}", root.display());
    println!("  Session:    {}", session_path.display());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    drop(watcher);
    if let Some(job) = observer {
        job.abort();
        let _ = job.await;
    }
    // graceful shutdown waits for open connections, which hold live handles
    let _ = stop_server.send(());
    if let Some(job) = server_task {
        let _ = job.await;
    }
    drop(handle);

    let final_doc = task.await.context("Live context loop panicked")?;
    println!(
        "Watch mode stopped ({} file changes, {} decisions recorded)",
        final_doc.files_modified.len(),
        final_doc.decisions.len()
    );
    Ok(())
}

fn configure(key: Option<String>, value: Option<String>) -> Result<()> {
    let mut config = Config::load()?;

    match (key, value) {
        (None, _) => {
            let text = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("{}", text);
        }
        (Some(key), None) => println!("{}: {}", key, config.get(&key)?),
        (Some(key), Some(value)) => {
            config.set(&key, &value)?;
            config.save()?;
            println!("Set {} to {}", key, value);
        }
    }
    Ok(())
}
