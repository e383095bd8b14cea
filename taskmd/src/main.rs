use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use taskmd::core::{Priority, Task, TaskDraft, TaskId, TaskStatus};
use taskmd::export::{ExportFormat, ExportOptions, Grouping};
use taskmd::query::{ExportScope, SortSpec, TaskFilter, apply};
use taskmd::store::{JsonFileTaskStore, NotificationSink, Severity, TaskPatch, TaskStore};
use taskmd::transfer::TaskTransfer;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "taskmd",
    about = "Task list with Markdown, text and JSON import/export",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// JSON file holding the task list.
    #[arg(long, global = true, env = "TASKMD_STORE", default_value = "tasks.json")]
    store: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List stored tasks.
    List(ListArgs),

    /// Add a task.
    Add(AddArgs),

    /// Export tasks as Markdown, plain text or JSON.
    Export(ExportArgs),

    /// Import tasks from a Markdown or JSON document.
    Import(ImportArgs),

    /// Focus a task and mark it in progress, unfocusing every other one.
    Focus(FocusArgs),

    /// Change a task's status. Completing also clears focus and today.
    Status(StatusArgs),

    /// Complete a task.
    Done(TaskRef),

    /// Add a task to today's list, or remove it.
    Today(TodayArgs),

    /// Turn an interruption into a regular task at normal priority.
    Promote(TaskRef),

    /// Delete a task.
    Delete(TaskRef),
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long, value_enum)]
    status: Option<StatusArg>,
    #[arg(long)]
    category: Option<String>,
    /// Only tasks marked for today.
    #[arg(long)]
    today: bool,
    /// Only interruptions.
    #[arg(long)]
    interruption: bool,
    /// Terms that must all appear in title, description or category.
    #[arg(long)]
    search: Option<String>,
    /// Sort order as <field>.<asc|desc>.
    #[arg(long, default_value = "created_at.desc")]
    sort: SortSpec,
    /// Emit JSON instead of a human-readable list.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct AddArgs {
    title: String,
    #[arg(long)]
    description: Option<String>,
    /// 1-5 or a label such as `high` or `最高`. Interruptions default to high.
    #[arg(long, value_parser = parse_priority)]
    priority: Option<Priority>,
    #[arg(long)]
    category: Option<String>,
    /// Due date (YYYY-MM-DD).
    #[arg(long)]
    due: Option<NaiveDate>,
    #[arg(long)]
    today: bool,
    #[arg(long)]
    interruption: bool,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long, value_enum, default_value_t = ScopeArg::All)]
    scope: ScopeArg,
    /// Ignored for JSON.
    #[arg(long, value_enum, default_value_t = GroupingArg::Status)]
    grouping: GroupingArg,
    #[arg(long, value_enum, default_value_t = FormatArg::Markdown)]
    format: FormatArg,
    /// Write the export to this path instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Write the export into the current directory (auto-named tasks_YYYY-MM-DD.<ext>).
    #[arg(long)]
    write: bool,
}

#[derive(Debug, Args)]
struct ImportArgs {
    /// Markdown (.md, .txt) or JSON file. Reads stdin when omitted.
    input: Option<PathBuf>,
    /// Show what would be imported without storing anything.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct FocusArgs {
    id: TaskId,
    /// Unfocus the task instead.
    #[arg(long)]
    clear: bool,
}

#[derive(Debug, Args)]
struct StatusArgs {
    id: TaskId,
    #[arg(value_enum)]
    status: StatusArg,
}

#[derive(Debug, Args)]
struct TaskRef {
    id: TaskId,
}

#[derive(Debug, Args)]
struct TodayArgs {
    id: TaskId,
    /// Remove the task from today instead.
    #[arg(long)]
    remove: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StatusArg {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl From<StatusArg> for TaskStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => TaskStatus::Pending,
            StatusArg::InProgress => TaskStatus::InProgress,
            StatusArg::Completed => TaskStatus::Completed,
            StatusArg::Cancelled => TaskStatus::Cancelled,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ScopeArg {
    All,
    Today,
    Pending,
    Completed,
}

impl From<ScopeArg> for ExportScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::All => ExportScope::All,
            ScopeArg::Today => ExportScope::Today,
            ScopeArg::Pending => ExportScope::Pending,
            ScopeArg::Completed => ExportScope::Completed,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum GroupingArg {
    Status,
    Category,
    Priority,
    Date,
    None,
}

impl From<GroupingArg> for Grouping {
    fn from(arg: GroupingArg) -> Self {
        match arg {
            GroupingArg::Status => Grouping::Status,
            GroupingArg::Category => Grouping::Category,
            GroupingArg::Priority => Grouping::Priority,
            GroupingArg::Date => Grouping::CreatedDate,
            GroupingArg::None => Grouping::None,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatArg {
    Markdown,
    Text,
    Json,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Markdown => ExportFormat::Markdown,
            FormatArg::Text => ExportFormat::PlainText,
            FormatArg::Json => ExportFormat::Json,
        }
    }
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    Priority::from_label(s).ok_or_else(|| format!("unknown priority {s:?} (expected 1-5 or a label)"))
}

/// Prints notifications to stderr so stdout stays clean for exports.
struct ConsoleSink;

impl NotificationSink for ConsoleSink {
    fn notify(&self, message: &str, severity: Severity) {
        let prefix = match severity {
            Severity::Info => "info",
            Severity::Success => "ok",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        eprintln!("{prefix}: {message}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let store = JsonFileTaskStore::open(&cli.store)
        .with_context(|| format!("opening task store {:?}", cli.store))?;
    match cli.command {
        Commands::List(args) => handle_list(args, &store),
        Commands::Add(args) => handle_add(args, store),
        Commands::Export(args) => handle_export(args, store),
        Commands::Import(args) => handle_import(args, store),
        Commands::Focus(args) => handle_focus(args, store),
        Commands::Status(StatusArgs { id, status }) => {
            handle_update(id, TaskPatch::status(status.into()), store)
        }
        Commands::Done(TaskRef { id }) => {
            handle_update(id, TaskPatch::status(TaskStatus::Completed), store)
        }
        Commands::Today(TodayArgs { id, remove }) => {
            handle_update(id, TaskPatch::today(!remove), store)
        }
        Commands::Promote(TaskRef { id }) => {
            handle_update(id, TaskPatch::promote_interruption(), store)
        }
        Commands::Delete(TaskRef { id }) => handle_delete(id, store),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "taskmd=debug" } else { "taskmd=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn handle_list(args: ListArgs, store: &impl TaskStore) -> Result<()> {
    let ListArgs {
        status,
        category,
        today,
        interruption,
        search,
        sort,
        json,
    } = args;

    let filter = TaskFilter {
        status: status.map(TaskStatus::from),
        category,
        is_today: today.then_some(true),
        is_interruption: interruption.then_some(true),
        search,
        ..TaskFilter::default()
    };
    let tasks = apply(&store.list(&TaskFilter::default())?, &filter, sort);

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }
    if tasks.is_empty() {
        eprintln!("No tasks match.");
        return Ok(());
    }
    for task in &tasks {
        println!("{}", list_line(task));
    }
    Ok(())
}

fn list_line(task: &Task) -> String {
    let id = task.id.map(|id| id.to_string()).unwrap_or_default();
    let mark = if task.status.is_completed() { "[x]" } else { "[ ]" };
    let due = task
        .due_date
        .map(|d| format!(" due {d}"))
        .unwrap_or_default();
    let flags: Vec<&str> = task.tags().iter().map(|t| t.label()).collect();
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };
    format!(
        "{id} {mark} {:<12} {:<8} {}{due}{flags}",
        task.status.label(),
        task.priority.label(),
        task.title
    )
}

fn handle_add(args: AddArgs, mut store: impl TaskStore) -> Result<()> {
    let AddArgs {
        title,
        description,
        priority,
        category,
        due,
        today,
        interruption,
    } = args;

    let draft = TaskDraft {
        description,
        priority: priority.unwrap_or(if interruption {
            Priority::HIGH
        } else {
            Priority::default()
        }),
        category,
        due_date: due,
        is_today: today,
        is_interruption: interruption,
        ..TaskDraft::new(title)
    };
    let task = store.create(draft)?;
    println!("{}", list_line(&task));
    Ok(())
}

fn handle_export(args: ExportArgs, store: impl TaskStore) -> Result<()> {
    let ExportArgs {
        scope,
        grouping,
        format,
        output,
        write,
    } = args;

    if write && output.is_some() {
        anyhow::bail!("--write cannot be combined with --output");
    }

    let options = ExportOptions::new(grouping.into(), format.into(), Utc::now());
    let transfer = TaskTransfer::new(store, ConsoleSink);
    let artifact = transfer.export(scope.into(), &options)?;

    let target = if write {
        Some(PathBuf::from(&artifact.file_name))
    } else {
        output
    };
    match target {
        Some(path) => fs::write(&path, artifact.content.as_bytes())
            .with_context(|| format!("writing {:?}", path))?,
        None => print!("{}", artifact.content),
    }
    Ok(())
}

fn handle_import(args: ImportArgs, store: impl TaskStore) -> Result<()> {
    let ImportArgs { input, dry_run } = args;

    let text = match &input {
        Some(path) => read_import_file(path)?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("reading import data from stdin")?;
            buf
        }
    };

    let mut transfer = TaskTransfer::new(store, ConsoleSink);
    let drafts = transfer.preview_import(&text)?;
    if dry_run {
        for draft in &drafts {
            println!("{}", list_line(&Task::from(draft.clone())));
        }
        return Ok(());
    }
    transfer.execute_import(drafts)?;
    Ok(())
}

fn read_import_file(path: &Path) -> Result<String> {
    let supported = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ExportFormat::from_extension)
        .is_some();
    if !supported {
        anyhow::bail!("{:?} is not a .md, .txt or .json file", path);
    }
    fs::read_to_string(path).with_context(|| format!("reading {:?}", path))
}

fn handle_focus(args: FocusArgs, store: impl TaskStore) -> Result<()> {
    let FocusArgs { id, clear } = args;
    let patch = if clear {
        TaskPatch::unfocus()
    } else {
        TaskPatch::focus()
    };
    handle_update(id, patch, store)
}

fn handle_update(id: TaskId, patch: TaskPatch, mut store: impl TaskStore) -> Result<()> {
    let task = store
        .update(id, patch)
        .with_context(|| format!("updating task {id}"))?;
    println!("{}", list_line(&task));
    Ok(())
}

fn handle_delete(id: TaskId, mut store: impl TaskStore) -> Result<()> {
    store
        .delete(id)
        .with_context(|| format!("deleting task {id}"))?;
    eprintln!("Deleted {id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_import_file_rejects_unknown_extensions() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("tasks.csv");
        fs::write(&path, "title\nx\n").expect("write csv");

        let err = read_import_file(&path).unwrap_err();
        assert!(err.to_string().contains("not a .md"));
    }

    #[test]
    fn read_import_file_accepts_markdown() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("tasks.md");
        fs::write(&path, "- [ ] Water plants\n").expect("write md");

        let text = read_import_file(&path).expect("read md");
        assert_eq!(taskmd::decode(&text).expect("decode").len(), 1);
    }

    #[test]
    fn import_then_focus_updates_store_file() {
        let tmp = tempdir().expect("tempdir");
        let md = tmp.path().join("in.md");
        let store_path = tmp.path().join("tasks.json");
        fs::write(&md, "## work\n- [ ] First\n- [ ] Second [focused]\n").expect("write md");

        let store = JsonFileTaskStore::open(&store_path).expect("open store");
        handle_import(
            ImportArgs {
                input: Some(md),
                dry_run: false,
            },
            store,
        )
        .expect("import");

        let store = JsonFileTaskStore::open(&store_path).expect("reopen store");
        let tasks = store.list(&TaskFilter::default()).expect("list");
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.category.as_deref() == Some("work")));
        let first = tasks.iter().find(|t| t.title == "First").expect("first");

        handle_focus(
            FocusArgs {
                id: first.id.expect("id"),
                clear: false,
            },
            store,
        )
        .expect("focus");

        let store = JsonFileTaskStore::open(&store_path).expect("reopen store");
        let focused: Vec<_> = store
            .list(&TaskFilter::default())
            .expect("list")
            .into_iter()
            .filter(|t| t.is_focused)
            .map(|t| t.title)
            .collect();
        assert_eq!(focused, ["First"]);
    }

    #[test]
    fn dry_run_leaves_store_untouched() {
        let tmp = tempdir().expect("tempdir");
        let md = tmp.path().join("in.md");
        let store_path = tmp.path().join("tasks.json");
        fs::write(&md, "- [ ] Only a preview\n").expect("write md");

        let store = JsonFileTaskStore::open(&store_path).expect("open store");
        handle_import(
            ImportArgs {
                input: Some(md),
                dry_run: true,
            },
            store,
        )
        .expect("dry run");
        assert!(!store_path.exists());
    }

    #[test]
    fn export_writes_to_output_path() {
        let tmp = tempdir().expect("tempdir");
        let store_path = tmp.path().join("tasks.json");
        let out = tmp.path().join("out.json");

        let mut store = JsonFileTaskStore::open(&store_path).expect("open store");
        store.create(TaskDraft::new("Exported")).expect("create");

        handle_export(
            ExportArgs {
                scope: ScopeArg::All,
                grouping: GroupingArg::None,
                format: FormatArg::Json,
                output: Some(out.clone()),
                write: false,
            },
            store,
        )
        .expect("export");

        let text = fs::read_to_string(&out).expect("read export");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["totalTasks"], 1);
        assert_eq!(value["tasks"][0]["title"], "Exported");
    }

    fn seeded_store(dir: &Path, draft: TaskDraft) -> (PathBuf, TaskId) {
        let path = dir.join("tasks.json");
        let mut store = JsonFileTaskStore::open(&path).expect("open store");
        let task = store.create(draft).expect("create");
        (path, task.id.expect("id"))
    }

    fn reload(path: &Path, id: TaskId) -> Option<Task> {
        JsonFileTaskStore::open(path)
            .expect("reopen store")
            .list(&TaskFilter::default())
            .expect("list")
            .into_iter()
            .find(|t| t.id == Some(id))
    }

    #[test]
    fn focus_marks_task_in_progress() {
        let tmp = tempdir().expect("tempdir");
        let (path, id) = seeded_store(tmp.path(), TaskDraft::new("Write tests"));

        let store = JsonFileTaskStore::open(&path).expect("open store");
        handle_focus(FocusArgs { id, clear: false }, store).expect("focus");
        let task = reload(&path, id).expect("task");
        assert!(task.is_focused);
        assert_eq!(task.status, TaskStatus::InProgress);

        let store = JsonFileTaskStore::open(&path).expect("open store");
        handle_focus(FocusArgs { id, clear: true }, store).expect("unfocus");
        let task = reload(&path, id).expect("task");
        assert!(!task.is_focused);
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[test]
    fn completing_clears_focus_and_today() {
        let tmp = tempdir().expect("tempdir");
        let draft = TaskDraft {
            is_today: true,
            is_focused: true,
            ..TaskDraft::new("Send invoice")
        };
        let (path, id) = seeded_store(tmp.path(), draft);

        let store = JsonFileTaskStore::open(&path).expect("open store");
        handle_update(id, TaskPatch::status(StatusArg::Cancelled.into()), store)
            .expect("cancel");
        let task = reload(&path, id).expect("task");
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.is_today && task.is_focused);

        let store = JsonFileTaskStore::open(&path).expect("open store");
        handle_update(id, TaskPatch::status(TaskStatus::Completed), store).expect("done");
        let task = reload(&path, id).expect("task");
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(!task.is_today);
        assert!(!task.is_focused);
    }

    #[test]
    fn today_promote_and_delete_update_store_file() {
        let tmp = tempdir().expect("tempdir");
        let draft = TaskDraft {
            is_interruption: true,
            priority: Priority::HIGH,
            ..TaskDraft::new("Fix printer")
        };
        let (path, id) = seeded_store(tmp.path(), draft);

        let store = JsonFileTaskStore::open(&path).expect("open store");
        handle_update(id, TaskPatch::today(true), store).expect("today");
        assert!(reload(&path, id).expect("task").is_today);

        let store = JsonFileTaskStore::open(&path).expect("open store");
        handle_update(id, TaskPatch::promote_interruption(), store).expect("promote");
        let task = reload(&path, id).expect("task");
        assert!(!task.is_interruption);
        assert_eq!(task.priority, Priority::MEDIUM);

        let store = JsonFileTaskStore::open(&path).expect("open store");
        handle_delete(id, store).expect("delete");
        assert!(reload(&path, id).is_none());

        let store = JsonFileTaskStore::open(&path).expect("open store");
        assert!(handle_delete(id, store).is_err());
    }

    #[test]
    fn interruptions_default_to_high_priority() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("tasks.json");
        let store = JsonFileTaskStore::open(&path).expect("open store");
        handle_add(
            AddArgs {
                title: "Phone call".into(),
                description: None,
                priority: None,
                category: None,
                due: None,
                today: false,
                interruption: true,
            },
            store,
        )
        .expect("add");

        let tasks = JsonFileTaskStore::open(&path)
            .expect("reopen store")
            .list(&TaskFilter::default())
            .expect("list");
        assert_eq!(tasks[0].priority, Priority::HIGH);
        assert!(tasks[0].is_interruption);
    }

    #[test]
    fn priority_argument_accepts_labels() {
        assert_eq!(parse_priority("最高"), Ok(Priority::HIGHEST));
        assert_eq!(parse_priority("2"), Ok(Priority::LOW));
        assert!(parse_priority("soon").is_err());
    }
}
