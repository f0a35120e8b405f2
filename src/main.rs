use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use time::Date;

use dreamflow::config::ConfigError;
use dreamflow::net::types::TaskId;
use dreamflow::util::guard::{self, Route};
use dreamflow::util::timefmt;
use dreamflow::{
    ApiClient, ApiError, ClientConfig, FileStore, FilterCriteria, LoadState, Priority, Recurrence, SessionError,
    SessionManager, StatusFilter, StoreError, Task, TaskDraft, TaskError, TaskListClient, TaskPatch,
};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("not signed in; run `dreamflow login` first")]
    NotSignedIn,
    #[error("nothing to change; pass at least one field to edit")]
    EmptyEdit,
    #[error("output encode failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "dreamflow", about = "DreamFlow task client")]
struct Cli {
    #[arg(long, env = "DREAMFLOW_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "DREAMFLOW_STATE_DIR", help = "Directory holding the persisted session")]
    state_dir: Option<PathBuf>,

    #[arg(short, long, action = ArgAction::Count, global = true, help = "Log more (-v info, -vv debug)")]
    verbose: u8,

    #[arg(long, global = true, help = "Print results as JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        email: String,
        #[arg(long, env = "DREAMFLOW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register {
        email: String,
        username: String,
        #[arg(long, env = "DREAMFLOW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    Whoami,
    Tasks(TasksCommand),
}

#[derive(Args, Debug)]
struct TasksCommand {
    #[command(subcommand)]
    command: TasksSubcommand,
}

#[derive(Subcommand, Debug)]
enum TasksSubcommand {
    List {
        #[arg(long, default_value_t = StatusFilter::All)]
        status: StatusFilter,
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, help = "Filter on the server instead of locally")]
        server: bool,
    },
    Add(AddArgs),
    Toggle {
        id: TaskId,
        #[arg(long, help = "Let the server flip the flag")]
        server: bool,
    },
    Remove {
        id: TaskId,
    },
    Edit(EditArgs),
    Stats {
        #[arg(long, help = "Ask the server for its counts")]
        server: bool,
    },
}

#[derive(Args, Debug)]
struct AddArgs {
    title: String,
    #[arg(long, default_value_t = Priority::Medium)]
    priority: Priority,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long, value_parser = parse_due)]
    due: Option<Date>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    recurring: Option<Recurrence>,
    #[arg(long)]
    progress: Option<i64>,
    #[arg(long = "subtask")]
    subtasks: Vec<String>,
    #[arg(long, help = "Reminder lead time in minutes")]
    notify_before: Option<u32>,
}

#[derive(Args, Debug)]
struct EditArgs {
    id: TaskId,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    priority: Option<Priority>,
    #[arg(long = "tag", help = "Replaces all tags")]
    tags: Option<Vec<String>>,
    #[arg(long, value_parser = parse_due)]
    due: Option<Date>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long, conflicts_with = "no_recurring")]
    recurring: Option<Recurrence>,
    #[arg(long)]
    no_recurring: bool,
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    progress: Option<u8>,
    #[arg(long, conflicts_with = "no_reminder")]
    notify_before: Option<u32>,
    #[arg(long)]
    no_reminder: bool,
}

impl EditArgs {
    fn patch(&self) -> TaskPatch {
        let recurring = match (self.recurring, self.no_recurring) {
            (Some(r), _) => Some(Some(r)),
            (None, true) => Some(None),
            (None, false) => None,
        };
        let notify_before_minutes = match (self.notify_before, self.no_reminder) {
            (Some(m), _) => Some(Some(m)),
            (None, true) => Some(None),
            (None, false) => None,
        };
        TaskPatch {
            title: self.title.clone(),
            completed: None,
            priority: self.priority,
            tags: self.tags.as_ref().map(|tags| tags.iter().map(|t| t.trim().to_owned()).collect()),
            due_date: self.due,
            category: self.category.clone(),
            recurring,
            progress: self.progress,
            notify_before_minutes,
        }
    }
}

fn parse_due(raw: &str) -> Result<Date, String> {
    timefmt::parse_date(raw).map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url)?;
    }
    if let Some(state_dir) = cli.state_dir {
        config = config.with_state_dir(state_dir);
    }

    let store = Arc::new(FileStore::open(&config.state_dir)?);
    let api = Arc::new(ApiClient::new(&config)?);
    let sessions = Arc::new(SessionManager::new(api, store));
    sessions.restore();

    match cli.command {
        Command::Login { email, password } => run_login(&sessions, &email, &password).await,
        Command::Register { email, username, password } => {
            run_register(&sessions, &email, &username, &password).await
        }
        Command::Logout => {
            sessions.logout();
            println!("signed out");
            Ok(())
        }
        Command::Whoami => run_whoami(&sessions, cli.json),
        Command::Tasks(tasks) => {
            if guard::resolve(Route::Tasks, &sessions.state()) != Route::Tasks {
                return Err(CliError::NotSignedIn);
            }
            let client = TaskListClient::new(Arc::clone(&sessions), &config);
            run_tasks(&client, tasks.command, cli.json).await
        }
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

// =============================================================================
// SESSION COMMANDS
// =============================================================================

fn already_signed_in(sessions: &SessionManager, route: Route) -> bool {
    if guard::resolve(route, &sessions.state()) == Route::Tasks {
        if let Some(user) = sessions.current_user() {
            println!("already signed in as {} <{}>; run `dreamflow logout` to switch", user.username, user.email);
        }
        return true;
    }
    false
}

async fn run_login(sessions: &SessionManager, email: &str, password: &str) -> Result<(), CliError> {
    if already_signed_in(sessions, Route::Login) {
        return Ok(());
    }
    let session = sessions.try_login(email, password).await?;
    println!("signed in as {} <{}>", session.username, session.email);
    Ok(())
}

async fn run_register(sessions: &SessionManager, email: &str, username: &str, password: &str) -> Result<(), CliError> {
    if already_signed_in(sessions, Route::Register) {
        return Ok(());
    }
    let session = sessions.try_register(email, username, password).await?;
    println!("registered and signed in as {} <{}>", session.username, session.email);
    Ok(())
}

fn run_whoami(sessions: &SessionManager, json: bool) -> Result<(), CliError> {
    let user = sessions.current_user().ok_or(CliError::NotSignedIn)?;
    if json {
        return print_json(&user);
    }
    println!("{} <{}> (id {}, joined {})", user.username, user.email, user.id, timefmt::format_date(user.created_at.date()));
    Ok(())
}

// =============================================================================
// TASK COMMANDS
// =============================================================================

async fn run_tasks(client: &TaskListClient, command: TasksSubcommand, json: bool) -> Result<(), CliError> {
    match command {
        TasksSubcommand::List { status, search, server } => {
            let criteria = FilterCriteria::new(status, search);
            let tasks = if server {
                client.fetch_matching(&criteria).await?
            } else {
                load(client).await?;
                client.filtered(&criteria)
            };
            print_tasks(&tasks, json)
        }
        TasksSubcommand::Add(args) => {
            let draft = TaskDraft {
                title: args.title,
                priority: args.priority,
                tags: args.tags,
                due_date: args.due,
                category: args.category,
                recurring: args.recurring,
                progress: args.progress,
                subtasks: args.subtasks,
                notify_before_minutes: args.notify_before,
            };
            let local = client.add(draft)?;
            let task = client.sync_created(local.id).await?;
            print_task(&task, json)
        }
        TasksSubcommand::Toggle { id, server } => {
            load(client).await?;
            let task = if server {
                client.toggle_remote(id).await?
            } else {
                client.toggle(id).ok_or(TaskError::NotFound(id))?;
                client.sync_toggled(id).await?
            };
            print_task(&task, json)
        }
        TasksSubcommand::Remove { id } => {
            load(client).await?;
            let task = client.remove(id).ok_or(TaskError::NotFound(id))?;
            client.sync_removed(&task).await?;
            if json {
                return print_json(&task);
            }
            println!("removed {id}: {}", task.title);
            Ok(())
        }
        TasksSubcommand::Edit(args) => {
            let patch = args.patch();
            if patch.is_empty() {
                return Err(CliError::EmptyEdit);
            }
            load(client).await?;
            client.edit(args.id, &patch)?;
            let task = client.sync_edited(args.id).await?;
            print_task(&task, json)
        }
        TasksSubcommand::Stats { server } => {
            let stats = if server {
                client.remote_stats().await?
            } else {
                load(client).await?;
                client.stats()
            };
            if json {
                return print_json(&stats);
            }
            println!("total {}  completed {}  active {}", stats.total, stats.completed, stats.active);
            let p = stats.by_priority;
            println!("high {}  medium {}  low {}", p.high, p.medium, p.low);
            Ok(())
        }
    }
}

async fn load(client: &TaskListClient) -> Result<(), CliError> {
    client.fetch_all().await?;
    if client.load_state() == LoadState::Degraded {
        eprintln!("could not load tasks; showing an empty list");
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_task(task: &Task, json: bool) -> Result<(), CliError> {
    if json {
        return print_json(task);
    }
    println!("{}", task_line(task));
    Ok(())
}

fn print_tasks(tasks: &[Task], json: bool) -> Result<(), CliError> {
    if json {
        return print_json(tasks);
    }
    if tasks.is_empty() {
        println!("no tasks");
    }
    for task in tasks {
        println!("{}", task_line(task));
    }
    Ok(())
}

fn task_line(task: &Task) -> String {
    let mark = if task.completed { "x" } else { " " };
    let mut line = format!(
        "[{mark}] {:>5}  {:<6}  {}  {}",
        task.id,
        task.priority.as_str(),
        timefmt::format_date(task.due_date),
        task.title
    );
    let (done, total) = task.subtask_summary();
    if total > 0 {
        line.push_str(&format!("  ({done}/{total} subtasks)"));
    }
    if let Some(recurring) = task.recurring {
        line.push_str(&format!("  [{recurring}]"));
    }
    if !task.tags.is_empty() {
        let tags: Vec<&str> = task.tags.iter().map(String::as_str).collect();
        line.push_str(&format!("  #{}", tags.join(" #")));
    }
    line
}
