use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dnp_core::paths::data_dir;
use dnp_core::{
    Bundle, FileKv, KvBackend, MemoryRelay, NoteBody, NotePatch, NotepadConfig, Priority,
    Session, StatusReport, StorageInfo, TaskBody, TaskPatch, Transport,
};

mod prompt;

const DEFAULT_LOG_FILTER: &str = "dnp_cli=info,dnp_core=info,dnp_sync=info,dnp_store=info";
const PEER_ID: &str = "local";

#[derive(Parser, Debug)]
#[command(name = "dnp", version, about = "Encrypted local-first notes and tasks", long_about = None)]
struct Cli {
    /// Data directory (defaults to the platform data dir, or DNP_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the account and print the recovery phrase
    Init,
    /// Check the passphrase and print a summary
    Unlock,
    /// Set a new passphrase using the recovery phrase
    Recover,
    /// Change the passphrase
    Passwd,
    /// Print the recovery phrase again
    Phrase,
    /// Sync status and storage use
    Status,
    #[command(subcommand)]
    Note(NoteCommand),
    #[command(subcommand)]
    Task(TaskCommand),
    /// Write every live record to a plain JSON bundle
    Export {
        /// Output file; stdout when omitted
        path: Option<PathBuf>,
    },
    /// Merge a bundle written by `export`
    Import { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum NoteCommand {
    Add {
        title: String,
        #[arg(short, long, default_value = "")]
        content: String,
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    List {
        /// Archived notes instead of active ones
        #[arg(long)]
        archived: bool,
        #[arg(long)]
        tag: Option<String>,
    },
    Search { query: String },
    Show { id: String },
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
    },
    Rm { id: String },
    Dup { id: String },
    Tag { id: String, tag: String },
    Untag { id: String, tag: String },
    Archive { id: String },
    Unarchive { id: String },
    Tags,
    Stats,
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    Add {
        title: String,
        #[command(flatten)]
        fields: TaskFields,
    },
    List {
        #[arg(long)]
        pending: bool,
        #[arg(long)]
        overdue: bool,
        #[arg(long)]
        priority: Option<Priority>,
    },
    Search { query: String },
    Show { id: String },
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: TaskFields,
        /// Remove the due date
        #[arg(long, conflicts_with = "due")]
        no_due: bool,
    },
    /// Toggle completion
    Done { id: String },
    Rm { id: String },
    Dup { id: String },
    ClearCompleted,
    Stats,
}

#[derive(Args, Debug)]
struct TaskFields {
    #[arg(short, long)]
    description: Option<String>,
    /// RFC 3339, e.g. 2026-11-01T09:00:00Z
    #[arg(long)]
    due: Option<DateTime<Utc>>,
    #[arg(short, long)]
    priority: Option<Priority>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data = match cli.data_dir {
        Some(dir) => dir,
        None => data_dir()?,
    };
    std::fs::create_dir_all(&data)
        .with_context(|| format!("creating data directory {}", data.display()))?;
    let config = NotepadConfig::load(&data.join("config.json"))?;
    let app = App { data, config };

    match cli.command {
        Commands::Init => init_command(&app).await,
        Commands::Recover => recover_command(&app).await,
        command => {
            let (session, pass) = app.open().await?;
            let result = run(&session, &pass, command).await;
            session.close().await;
            result
        }
    }
}

struct App {
    data: PathBuf,
    config: NotepadConfig,
}

impl App {
    fn backend(&self) -> Result<Arc<dyn KvBackend>> {
        Ok(Arc::new(FileKv::open(self.data.join("store"))?))
    }

    /// No network client ships with the CLI: the session runs alone on an
    /// in-process relay and keeps changes queued for a later sync.
    fn transport(&self) -> Arc<dyn Transport> {
        MemoryRelay::new().transport(PEER_ID)
    }

    /// Returns the passphrase too, so commands that need it again do not re-prompt.
    async fn open(&self) -> Result<(Session, String)> {
        let backend = self.backend()?;
        if !Session::has_credential(backend.as_ref())? {
            return Err(anyhow!("no account in {}; run `dnp init` first", self.data.display()));
        }
        let pass = prompt::passphrase("Passphrase: ")?;
        let session = Session::open(backend, self.transport(), self.config.clone(), &pass).await?;
        Ok((session, pass))
    }
}

async fn init_command(app: &App) -> Result<()> {
    let backend = app.backend()?;
    if Session::has_credential(backend.as_ref())? {
        return Err(anyhow!("an account already exists in {}", app.data.display()));
    }
    let pass = prompt::new_passphrase("New passphrase: ", prompt::PASSPHRASE_ENV)?;
    let (session, phrase) =
        Session::create(backend, app.transport(), app.config.clone(), &pass).await?;
    session.close().await;
    info!(data_dir = %app.data.display(), "account created");
    println!("Recovery phrase (write it down, it is shown only once):\n");
    println!("    {}\n", phrase.expose());
    Ok(())
}

async fn recover_command(app: &App) -> Result<()> {
    let phrase = prompt::recovery_phrase()?;
    let pass = prompt::new_passphrase("New passphrase: ", prompt::NEW_PASSPHRASE_ENV)?;
    let session = Session::recover(
        app.backend()?,
        app.transport(),
        app.config.clone(),
        &phrase,
        &pass,
    )
    .await?;
    println!(
        "Passphrase reset. {} notes and {} tasks available.",
        session.notes().len(),
        session.tasks().len()
    );
    session.close().await;
    Ok(())
}

async fn run(session: &Session, pass: &str, command: Commands) -> Result<()> {
    match command {
        Commands::Init | Commands::Recover => {
            return Err(anyhow!("this command does not run inside an open session"))
        }
        Commands::Unlock => {
            println!(
                "Unlocked. {} notes, {} tasks, {} changes waiting to sync.",
                session.notes().len(),
                session.tasks().len(),
                session.status().queue_length
            );
        }
        Commands::Passwd => {
            let new = prompt::new_passphrase("New passphrase: ", prompt::NEW_PASSPHRASE_ENV)?;
            session.change_passphrase(pass, &new)?;
            println!("Passphrase changed.");
        }
        Commands::Phrase => {
            println!("{}", session.reveal_recovery_phrase(pass)?.expose());
        }
        Commands::Status => {
            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct Summary {
                sync: StatusReport,
                storage: StorageInfo,
                notes: usize,
                tasks: usize,
            }
            print_json(&Summary {
                sync: session.status(),
                storage: session.storage_info()?,
                notes: session.notes().len(),
                tasks: session.tasks().len(),
            })?;
        }
        Commands::Note(cmd) => note_command(session, cmd).await?,
        Commands::Task(cmd) => task_command(session, cmd).await?,
        Commands::Export { path } => {
            let json = session.export()?.to_json()?;
            match path {
                Some(path) => {
                    write_file(&path, &json)?;
                    println!("Exported to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Import { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let report = session.import(&Bundle::from_json(&raw)?).await?;
            print_json(&report)?;
        }
    }
    Ok(())
}

async fn note_command(session: &Session, cmd: NoteCommand) -> Result<()> {
    let notes = session.notes();
    match cmd {
        NoteCommand::Add {
            title,
            content,
            tags,
        } => print_json(&notes.create(NoteBody::new(title, content).with_tags(tags)).await?)?,
        NoteCommand::List { archived, tag } => {
            let listed = match tag {
                Some(tag) => notes.by_tag(&tag),
                None if archived => notes.archived(),
                None => notes.active(),
            };
            print_json(&listed)?
        }
        NoteCommand::Search { query } => print_json(&notes.search(&query))?,
        NoteCommand::Show { id } => print_json(&notes.get(&id).ok_or_else(|| missing("note", &id))?)?,
        NoteCommand::Edit { id, title, content } => {
            let patch = NotePatch {
                title,
                content,
                ..NotePatch::default()
            };
            print_json(&notes.update(&id, &patch).await?)?
        }
        NoteCommand::Rm { id } => {
            if !notes.delete(&id).await? {
                return Err(missing("note", &id));
            }
            println!("Deleted {id}");
        }
        NoteCommand::Dup { id } => print_json(&notes.duplicate(&id).await?)?,
        NoteCommand::Tag { id, tag } => {
            if !notes.add_tag(&id, &tag).await? {
                println!("Already tagged.");
            }
        }
        NoteCommand::Untag { id, tag } => {
            if !notes.remove_tag(&id, &tag).await? {
                println!("Tag not present.");
            }
        }
        NoteCommand::Archive { id } => print_json(&notes.set_archived(&id, true).await?)?,
        NoteCommand::Unarchive { id } => print_json(&notes.set_archived(&id, false).await?)?,
        NoteCommand::Tags => print_json(&notes.all_tags())?,
        NoteCommand::Stats => print_json(&notes.stats())?,
    }
    Ok(())
}

async fn task_command(session: &Session, cmd: TaskCommand) -> Result<()> {
    let tasks = session.tasks();
    match cmd {
        TaskCommand::Add { title, fields } => {
            let body = TaskBody {
                description: fields.description.unwrap_or_default(),
                due: fields.due,
                priority: fields.priority.unwrap_or_default(),
                ..TaskBody::new(title)
            };
            print_json(&tasks.create(body).await?)?
        }
        TaskCommand::List {
            pending,
            overdue,
            priority,
        } => {
            let now = Utc::now();
            let listed = tasks.filter(|t| {
                (!pending || !t.body.completed)
                    && (!overdue || t.body.is_overdue(now))
                    && priority.map_or(true, |p| t.body.priority == p)
            });
            print_json(&listed)?
        }
        TaskCommand::Search { query } => print_json(&tasks.search(&query))?,
        TaskCommand::Show { id } => print_json(&tasks.get(&id).ok_or_else(|| missing("task", &id))?)?,
        TaskCommand::Edit {
            id,
            title,
            fields,
            no_due,
        } => {
            let patch = TaskPatch {
                title,
                description: fields.description,
                due: if no_due { Some(None) } else { fields.due.map(Some) },
                priority: fields.priority,
                completed: None,
            };
            print_json(&tasks.update(&id, &patch).await?)?
        }
        TaskCommand::Done { id } => print_json(&tasks.toggle(&id).await?)?,
        TaskCommand::Rm { id } => {
            if !tasks.delete(&id).await? {
                return Err(missing("task", &id));
            }
            println!("Deleted {id}");
        }
        TaskCommand::Dup { id } => print_json(&tasks.duplicate(&id).await?)?,
        TaskCommand::ClearCompleted => {
            let n = tasks.clear_completed().await?;
            println!("Removed {n} completed tasks");
        }
        TaskCommand::Stats => print_json(&tasks.stats(Utc::now()))?,
    }
    Ok(())
}

fn missing(kind: &str, id: &str) -> anyhow::Error {
    anyhow!("{kind} {id} not found")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_task_add_with_fields() {
        let cli = Cli::try_parse_from([
            "dnp",
            "task",
            "add",
            "Pay rent",
            "--priority",
            "high",
            "--due",
            "2026-11-01T09:00:00Z",
        ])
        .unwrap();
        let Commands::Task(TaskCommand::Add { title, fields }) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(title, "Pay rent");
        assert_eq!(fields.priority, Some(Priority::High));
        assert!(fields.due.is_some());
    }

    #[test]
    fn edit_refuses_due_and_no_due_together() {
        let res = Cli::try_parse_from([
            "dnp",
            "task",
            "edit",
            "id",
            "--due",
            "2026-11-01T09:00:00Z",
            "--no-due",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn note_tags_repeat() {
        let cli = Cli::try_parse_from(["dnp", "note", "add", "T", "-t", "a", "-t", "b"]).unwrap();
        let Commands::Note(NoteCommand::Add { tags, .. }) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(tags, vec!["a", "b"]);
    }
}
