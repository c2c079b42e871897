//! quire - Markdown notes with folders, trash and background Dropbox sync.
//!
//! Usage:
//!   quire note new TITLE        Create a note
//!   quire link TITLE            Follow a [[link]], creating the note if needed
//!   quire trash list            Show trashed notes and folders
//!   quire auth login            Start connecting to Dropbox
//!   quire sync                  Run one sync round
//!   quire watch                 Keep syncing in the background
//!   quire --help                Show help

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result, bail, eyre};
use itertools::Itertools;
use tracing_subscriber::EnvFilter;

use quire_core::{FolderId, NoteId, QuireConfig, SyncSettings};
use quire_store::{LocalStore, StateLock};
use quire_sync::{
    AuthManager, AutoSyncScheduler, Credentials, DropboxStore, FileSyncJob, SyncEngine,
    SyncStatus, TokenSource,
};

#[derive(Parser)]
#[command(
    name = "quire",
    version,
    about = "Markdown notes with background Dropbox sync",
    long_about = "quire keeps markdown notes in nested folders and mirrors them to a \
                  Dropbox folder.\n\n\
                  Notes are addressed by their path, e.g. `Work/Plan.md`, or by title."
)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create, edit and organize notes
    #[command(subcommand)]
    Note(NoteCommand),

    /// Create, rename and move folders
    #[command(subcommand)]
    Folder(FolderCommand),

    /// Open the note a [[link]] points to, creating it if needed
    Link {
        /// Link target title
        title: String,
    },

    /// Manage bookmarked notes
    #[command(subcommand)]
    Bookmark(BookmarkCommand),

    /// Inspect and manage the trash
    #[command(subcommand)]
    Trash(TrashCommand),

    /// Connect to or disconnect from Dropbox
    #[command(subcommand)]
    Auth(AuthCommand),

    /// Run one sync round now
    Sync,

    /// Sync in the background until interrupted
    Watch,
}

#[derive(Subcommand)]
enum NoteCommand {
    /// Create a note
    New {
        title: String,

        /// Folder path to create the note in
        #[arg(short, long)]
        folder: Option<String>,
    },

    /// List live notes with their paths
    List,

    /// Print a note's content
    Show { note: String },

    /// Replace a note's content (reads stdin when --content is omitted)
    Edit {
        note: String,

        #[arg(long)]
        content: Option<String>,
    },

    /// Change a note's title
    Rename { note: String, title: String },

    /// Move a note to another folder
    Move {
        note: String,

        /// Target folder path; omit for the root
        #[arg(long)]
        to: Option<String>,
    },

    /// Move a note to the trash
    Delete { note: String },

    /// Delete a note for good
    Purge { note: String },
}

#[derive(Subcommand)]
enum FolderCommand {
    /// Create a folder
    New {
        name: String,

        /// Parent folder path
        #[arg(short, long)]
        parent: Option<String>,
    },

    /// List live folders
    List,

    /// Rename a folder
    Rename { folder: String, name: String },

    /// Move a folder under another one
    Move {
        folder: String,

        /// Target parent path; omit for the top level
        #[arg(long)]
        to: Option<String>,
    },

    /// Move a folder and everything in it to the trash
    Delete { folder: String },

    /// Delete a folder and everything in it for good
    Purge { folder: String },
}

#[derive(Subcommand)]
enum BookmarkCommand {
    /// Bookmark a note
    Add { note: String },

    /// Remove a bookmark
    Remove { note: String },

    /// List bookmarks in order
    List,

    /// Put the given notes first, in this order
    Reorder { notes: Vec<String> },
}

#[derive(Subcommand)]
enum TrashCommand {
    /// List trashed notes and folders
    List,

    /// Restore a trashed note or folder by path
    Restore { path: String },

    /// Permanently delete everything in the trash
    Empty,

    /// Permanently delete items past the retention period
    Reap,
}

#[derive(Subcommand)]
enum AuthCommand {
    /// Print the authorization URL to open in a browser
    Login,

    /// Finish authorization with the URL the browser was redirected to
    Complete { redirect_url: String },

    /// Store a long-lived access token directly
    SetToken { token: String },

    /// Forget stored credentials
    Logout,

    /// Show whether credentials are stored
    Status,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => QuireConfig::load(path),
        None => QuireConfig::load(&QuireConfig::default_path()),
    }
    .context("Failed to load configuration")?;
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

    let settings = config.sync_settings()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    match cli.command {
        Command::Note(command) => run_note(&config, &settings, command),
        Command::Folder(command) => run_folder(&config, &settings, command),
        Command::Link { title } => with_store(&config, &settings, |store| {
            let id = store.open_or_create_linked_note(&title)?;
            println!("{}", store.note_path(&id)?);
            Ok(())
        }),
        Command::Bookmark(command) => run_bookmark(&config, &settings, command),
        Command::Trash(command) => run_trash(&config, &settings, command),
        Command::Auth(command) => runtime.block_on(run_auth(&config, &settings, command)),
        Command::Sync => runtime.block_on(run_sync(&config, &settings)),
        Command::Watch => runtime.block_on(run_watch(&config, &settings)),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "quire=info",
        1 => "quire=debug",
        _ => "quire=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the state file, reap expired trash, apply `f` and save, all under
/// the state lock.
fn with_store<T>(
    config: &QuireConfig,
    settings: &SyncSettings,
    f: impl FnOnce(&mut LocalStore) -> Result<T>,
) -> Result<T> {
    let path = config.state_path();
    let _lock = StateLock::acquire(&path)?;
    let mut store = LocalStore::load(&path)?;
    let report = store.reap_expired(Utc::now(), settings.retention_chrono());
    if !report.is_empty() {
        eprintln!("Trash: {}", report.summary());
    }

    let value = f(&mut store)?;
    store.save(&path)?;
    Ok(value)
}

/// Find a note by path (`Work/Plan.md`) or, failing that, by title.
fn find_note(store: &LocalStore, query: &str, include_trashed: bool) -> Result<NoteId> {
    let wanted = query.trim_matches('/').to_lowercase();
    let candidates = || {
        store
            .notes()
            .iter()
            .filter(move |n| include_trashed || !n.is_deleted())
    };

    if let Some(note) = candidates().find(|n| {
        store
            .note_path(&n.id)
            .is_ok_and(|path| path.to_lowercase() == wanted)
    }) {
        return Ok(note.id.clone());
    }

    let by_title: Vec<_> = candidates().filter(|n| n.title == query).collect();
    match by_title.as_slice() {
        [note] => Ok(note.id.clone()),
        [] => bail!("No note matches {query:?}"),
        many => bail!(
            "{query:?} is ambiguous, use a path: {}",
            many.iter()
                .filter_map(|n| store.note_path(&n.id).ok())
                .join(", ")
        ),
    }
}

fn find_folder(store: &LocalStore, path: &str) -> Result<FolderId> {
    store
        .find_folder_by_path(path)
        .cloned()
        .ok_or_else(|| eyre!("No folder at {path:?}"))
}

fn find_optional_folder(store: &LocalStore, path: Option<&str>) -> Result<Option<FolderId>> {
    path.map(|p| find_folder(store, p)).transpose()
}

fn run_note(config: &QuireConfig, settings: &SyncSettings, command: NoteCommand) -> Result<()> {
    with_store(config, settings, |store| {
        match command {
            NoteCommand::New { title, folder } => {
                let folder_id = find_optional_folder(store, folder.as_deref())?;
                let id = store.create_note(title, folder_id)?;
                println!("{}", store.note_path(&id)?);
            }
            NoteCommand::List => {
                let listed = store
                    .live_notes()
                    .filter_map(|n| store.note_path(&n.id).ok().map(|path| (path, &n.id)))
                    .sorted();
                for (path, id) in listed {
                    let marker = if store.unsynced().contains(id) { "*" } else { " " };
                    println!("{marker} {path}");
                }
            }
            NoteCommand::Show { note } => {
                let id = find_note(store, &note, false)?;
                store.open_note_id(&id)?;
                if let Some(note) = store.note(&id) {
                    println!("{}", note.content);
                }
            }
            NoteCommand::Edit { note, content } => {
                let id = find_note(store, &note, false)?;
                let content = match content {
                    Some(content) => content,
                    None => {
                        let mut buf = String::new();
                        std::io::stdin()
                            .read_to_string(&mut buf)
                            .context("Failed to read note content from stdin")?;
                        buf
                    }
                };
                store.update_note_content(&id, content)?;
            }
            NoteCommand::Rename { note, title } => {
                let id = find_note(store, &note, false)?;
                store.rename_note(&id, title)?;
                println!("{}", store.note_path(&id)?);
            }
            NoteCommand::Move { note, to } => {
                let id = find_note(store, &note, false)?;
                let folder_id = find_optional_folder(store, to.as_deref())?;
                store.move_note(&id, folder_id)?;
                println!("{}", store.note_path(&id)?);
            }
            NoteCommand::Delete { note } => {
                let id = find_note(store, &note, false)?;
                store.soft_delete_note(&id)?;
            }
            NoteCommand::Purge { note } => {
                let id = find_note(store, &note, true)?;
                let path = store.permanently_delete_note(&id)?;
                println!("Queued remote delete of {path}");
            }
        }
        Ok(())
    })
}

fn run_folder(config: &QuireConfig, settings: &SyncSettings, command: FolderCommand) -> Result<()> {
    with_store(config, settings, |store| {
        match command {
            FolderCommand::New { name, parent } => {
                let parent_id = find_optional_folder(store, parent.as_deref())?;
                let id = store.create_folder(name, parent_id)?;
                println!("{}", store.folder_path(&id)?);
            }
            FolderCommand::List => {
                for path in store
                    .folders()
                    .iter()
                    .filter(|f| !f.is_deleted())
                    .filter_map(|f| store.folder_path(&f.id).ok())
                    .sorted()
                {
                    println!("{path}/");
                }
            }
            FolderCommand::Rename { folder, name } => {
                let id = find_folder(store, &folder)?;
                store.rename_folder(&id, name)?;
                println!("{}", store.folder_path(&id)?);
            }
            FolderCommand::Move { folder, to } => {
                let id = find_folder(store, &folder)?;
                let parent_id = find_optional_folder(store, to.as_deref())?;
                store.move_folder(&id, parent_id)?;
                println!("{}", store.folder_path(&id)?);
            }
            FolderCommand::Delete { folder } => {
                let id = find_folder(store, &folder)?;
                store.soft_delete_folder(&id)?;
            }
            FolderCommand::Purge { folder } => {
                let id = find_folder(store, &folder)?;
                let path = store.permanently_delete_folder(&id)?;
                println!("Queued remote delete of {path}");
            }
        }
        Ok(())
    })
}

fn run_bookmark(
    config: &QuireConfig,
    settings: &SyncSettings,
    command: BookmarkCommand,
) -> Result<()> {
    with_store(config, settings, |store| {
        match command {
            BookmarkCommand::Add { note } => {
                let id = find_note(store, &note, false)?;
                store.set_bookmarked(&id, true)?;
            }
            BookmarkCommand::Remove { note } => {
                let id = find_note(store, &note, false)?;
                store.set_bookmarked(&id, false)?;
            }
            BookmarkCommand::List => {
                for (rank, note) in store.bookmarks().iter().enumerate() {
                    println!("{:>3}. {}", rank + 1, store.note_path(&note.id)?);
                }
            }
            BookmarkCommand::Reorder { notes } => {
                let order = notes
                    .iter()
                    .map(|n| find_note(store, n, false))
                    .collect::<Result<Vec<_>>>()?;
                store.reorder_bookmarks(&order);
            }
        }
        Ok(())
    })
}

fn run_trash(config: &QuireConfig, settings: &SyncSettings, command: TrashCommand) -> Result<()> {
    with_store(config, settings, |store| {
        match command {
            TrashCommand::List => {
                let now = Utc::now();
                let (notes, folders) = store.trashed();
                if notes.is_empty() && folders.is_empty() {
                    println!("Trash is empty");
                }
                for folder in folders {
                    let age = folder.deleted_at.map(|at| (now - at).num_days()).unwrap_or(0);
                    println!("{}/  ({age}d ago)", store.folder_path(&folder.id)?);
                }
                for note in notes {
                    let age = note.deleted_at.map(|at| (now - at).num_days()).unwrap_or(0);
                    println!("{}  ({age}d ago)", store.note_path(&note.id)?);
                }
            }
            TrashCommand::Restore { path } => restore(store, &path)?,
            TrashCommand::Empty => {
                let report = store.empty_trash();
                println!("{}", report.summary());
            }
            TrashCommand::Reap => {
                let report = store.reap_expired(Utc::now(), settings.retention_chrono());
                println!("{}", report.summary());
            }
        }
        Ok(())
    })
}

/// Restore a trashed folder by path, or else a trashed note.
fn restore(store: &mut LocalStore, path: &str) -> Result<()> {
    let wanted = path.trim_matches('/').to_lowercase();
    let (_, folders) = store.trashed();
    let folder = folders
        .iter()
        .find(|f| {
            store
                .folder_path(&f.id)
                .is_ok_and(|p| p.to_lowercase() == wanted)
        })
        .map(|f| f.id.clone());

    match folder {
        Some(id) => store.restore_folder(&id)?,
        None => {
            let id = find_note(store, path, true)?;
            store.restore_note(&id)?;
        }
    }
    Ok(())
}

fn auth_manager(config: &QuireConfig, settings: &SyncSettings) -> Result<AuthManager> {
    let auth = AuthManager::load(config.auth.clone(), config.credentials_path())
        .context("Failed to load stored credentials")?
        .with_token_skew(settings.token_skew);
    Ok(auth)
}

async fn run_auth(config: &QuireConfig, settings: &SyncSettings, command: AuthCommand) -> Result<()> {
    let auth = auth_manager(config, settings)?;
    match command {
        AuthCommand::Login => {
            if config.auth.client_id.is_empty() {
                bail!("Set auth.client_id in the configuration file first");
            }
            let url = auth.begin_auth().await?;
            println!("Open this URL, approve access, then run `quire auth complete <redirect-url>`:");
            println!("{url}");
        }
        AuthCommand::Complete { redirect_url } => {
            if auth.complete_auth(&redirect_url).await? {
                println!("Connected");
            } else {
                println!("No authorization in progress");
            }
        }
        AuthCommand::SetToken { token } => {
            auth.set_credentials(Credentials {
                access_token: token,
                refresh_token: None,
                expires_at: None,
            })
            .await?;
            println!("Connected");
        }
        AuthCommand::Logout => {
            auth.disconnect().await?;
            println!("Disconnected");
        }
        AuthCommand::Status => match auth.credentials().await {
            Some(credentials) => match credentials.expires_at {
                Some(at) => println!("Connected, access token expires {at}"),
                None => println!("Connected"),
            },
            None => println!("Not connected"),
        },
    }
    Ok(())
}

fn sync_job(config: &QuireConfig, settings: &SyncSettings) -> Result<(FileSyncJob, Arc<AuthManager>)> {
    let auth = Arc::new(auth_manager(config, settings)?);
    let remote = Arc::new(DropboxStore::new(&config.remote));
    let tokens: Arc<dyn TokenSource> = auth.clone();
    let job = FileSyncJob::new(
        config.state_path(),
        SyncEngine::new(remote),
        tokens,
        settings.clone(),
    );
    Ok((job, auth))
}

async fn run_sync(config: &QuireConfig, settings: &SyncSettings) -> Result<()> {
    let (job, _) = sync_job(config, settings)?;
    let log = job.run_once().await.map_err(|e| {
        if e.needs_reconnect() {
            eyre!("{e}\nRun `quire auth login` to reconnect.")
        } else {
            eyre!(e)
        }
    })?;

    for entry in log.entries() {
        println!("{entry}");
    }
    println!("{}", log.summary());
    Ok(())
}

async fn run_watch(config: &QuireConfig, settings: &SyncSettings) -> Result<()> {
    if !config.schedule.enabled {
        bail!("Auto-sync is disabled in the configuration");
    }

    let (job, auth) = sync_job(config, settings)?;
    let connected = auth.is_connected().await;
    let (scheduler, handle) = AutoSyncScheduler::new(Arc::new(job), settings, connected);
    if !connected {
        eprintln!("Not connected; run `quire auth login` first");
    }

    let task = tokio::spawn(scheduler.run());
    let mut status = handle.subscribe();
    print_status(&status.borrow(), &config.state_path());

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for interrupt")?;
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                print_status(&status.borrow_and_update(), &config.state_path());
            }
        }
    }

    handle.shutdown();
    task.await.context("Scheduler task failed")?;
    Ok(())
}

fn print_status(status: &SyncStatus, state: &Path) {
    match status {
        SyncStatus::Idle => eprintln!("Watching {}", state.display()),
        SyncStatus::Syncing { trigger } => eprintln!("Syncing ({trigger})..."),
        SyncStatus::Synced { at, summary } => {
            eprintln!("Synced at {}: {summary}", at.format("%H:%M:%S"))
        }
        SyncStatus::Failed { message, retryable } => {
            let hint = if *retryable { ", will retry" } else { "" };
            eprintln!("Sync failed{hint}: {message}");
        }
        SyncStatus::Disconnected => eprintln!("Disconnected; run `quire auth login`"),
    }
}
