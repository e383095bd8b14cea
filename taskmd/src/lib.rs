//! Task tracking domain library.
//! The core model and the Markdown/JSON codec stay pure; persistence and user
//! feedback sit behind the `store` traits and are wired together in `transfer`.

pub mod core {
    use chrono::{DateTime, NaiveDate, Utc};
    use serde::{Deserialize, Serialize};
    use std::{fmt, str::FromStr};
    use uuid::Uuid;

    /* ------------------------------- IDs ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TaskId(pub Uuid);

    impl TaskId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl fmt::Display for TaskId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl FromStr for TaskId {
        type Err = uuid::Error;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Uuid::parse_str(s.trim()).map(Self)
        }
    }

    /* ---------------------------- Sentinels ---------------------------- */

    /// Group and metadata label for tasks without a category.
    pub const UNCATEGORIZED: &str = "Uncategorized";

    /// Group label for tasks whose creation time is unknown.
    pub const UNKNOWN_DATE: &str = "Unknown date";

    /* ------------------------------ Status ------------------------------ */

    #[derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
    )]
    #[serde(rename_all = "snake_case")]
    pub enum TaskStatus {
        #[default]
        Pending,
        InProgress,
        Completed,
        Cancelled,
    }

    impl TaskStatus {
        /// Fixed order used for status grouping.
        pub const ALL: [TaskStatus; 4] = [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Cancelled,
        ];

        /// Wire key, e.g. `in_progress`.
        pub fn key(self) -> &'static str {
            match self {
                Self::Pending => "pending",
                Self::InProgress => "in_progress",
                Self::Completed => "completed",
                Self::Cancelled => "cancelled",
            }
        }

        pub fn label(self) -> &'static str {
            match self {
                Self::Pending => "Pending",
                Self::InProgress => "In Progress",
                Self::Completed => "Completed",
                Self::Cancelled => "Cancelled",
            }
        }

        /// Parse a wire key, a display label, or one of the Japanese labels.
        pub fn parse(s: &str) -> Option<Self> {
            let norm = s.trim().to_lowercase().replace([' ', '-'], "_");
            match norm.as_str() {
                "pending" | "todo" | "未着手" => Some(Self::Pending),
                "in_progress" | "進行中" => Some(Self::InProgress),
                "completed" | "done" | "完了" => Some(Self::Completed),
                "cancelled" | "canceled" | "キャンセル" => Some(Self::Cancelled),
                _ => None,
            }
        }

        pub fn is_completed(self) -> bool {
            matches!(self, Self::Completed)
        }
    }

    impl fmt::Display for TaskStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.label())
        }
    }

    /* ----------------------------- Priority ----------------------------- */

    /// Five-step priority, 5 being the most urgent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(try_from = "u8", into = "u8")]
    pub struct Priority(u8);

    impl Priority {
        pub const LOWEST: Self = Self(1);
        pub const LOW: Self = Self(2);
        pub const MEDIUM: Self = Self(3);
        pub const HIGH: Self = Self(4);
        pub const HIGHEST: Self = Self(5);

        /// Highest first; the order priority groups are emitted in.
        pub const DESCENDING: [Priority; 5] = [
            Self::HIGHEST,
            Self::HIGH,
            Self::MEDIUM,
            Self::LOW,
            Self::LOWEST,
        ];

        pub fn new(value: u8) -> Option<Self> {
            (1..=5).contains(&value).then_some(Self(value))
        }

        pub fn value(self) -> u8 {
            self.0
        }

        pub fn label(self) -> &'static str {
            match self.0 {
                1 => "lowest",
                2 => "low",
                4 => "high",
                5 => "highest",
                _ => "medium",
            }
        }

        /// Section heading used when grouping by priority.
        pub fn heading(self) -> &'static str {
            match self.0 {
                1 => "Lowest priority",
                2 => "Low priority",
                4 => "High priority",
                5 => "Highest priority",
                _ => "Medium priority",
            }
        }

        /// Accepts `1`..=`5`, the English labels, the tri-level words, and their
        /// Japanese equivalents.
        pub fn from_label(s: &str) -> Option<Self> {
            let s = s.trim();
            if let Ok(n) = s.parse::<u8>() {
                return Self::new(n);
            }
            match s.to_lowercase().as_str() {
                "lowest" | "最低" => Some(Self::LOWEST),
                "low" | "低" => Some(Self::LOW),
                "medium" | "normal" | "普通" | "中" => Some(Self::MEDIUM),
                "high" | "高" => Some(Self::HIGH),
                "highest" | "最高" => Some(Self::HIGHEST),
                _ => None,
            }
        }

        pub fn level(self) -> PriorityLevel {
            PriorityLevel::from(self)
        }
    }

    impl Default for Priority {
        fn default() -> Self {
            Self::MEDIUM
        }
    }

    impl TryFrom<u8> for Priority {
        type Error = DomainError;

        fn try_from(value: u8) -> Result<Self, Self::Error> {
            Self::new(value).ok_or(DomainError::InvalidPriority(value))
        }
    }

    impl From<Priority> for u8 {
        fn from(p: Priority) -> Self {
            p.0
        }
    }

    impl fmt::Display for Priority {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.label())
        }
    }

    /// Three-step priority used by the quick-add forms.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum PriorityLevel {
        Low,
        #[default]
        Medium,
        High,
    }

    impl PriorityLevel {
        pub fn label(self) -> &'static str {
            match self {
                Self::Low => "low",
                Self::Medium => "medium",
                Self::High => "high",
            }
        }

        pub fn parse(s: &str) -> Option<Self> {
            match s.trim().to_lowercase().as_str() {
                "low" | "低" => Some(Self::Low),
                "medium" | "中" => Some(Self::Medium),
                "high" | "高" => Some(Self::High),
                _ => None,
            }
        }
    }

    impl From<Priority> for PriorityLevel {
        fn from(p: Priority) -> Self {
            match p.0 {
                1 | 2 => Self::Low,
                4 | 5 => Self::High,
                _ => Self::Medium,
            }
        }
    }

    impl From<PriorityLevel> for Priority {
        fn from(level: PriorityLevel) -> Self {
            match level {
                PriorityLevel::Low => Priority::LOW,
                PriorityLevel::Medium => Priority::MEDIUM,
                PriorityLevel::High => Priority::HIGH,
            }
        }
    }

    /* ------------------------------- Tags ------------------------------- */

    /// Boolean task flags as they appear in a rendered tag list.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum TaskTag {
        Today,
        Interruption,
        Focused,
    }

    impl TaskTag {
        pub fn label(self) -> &'static str {
            match self {
                Self::Today => "today",
                Self::Interruption => "interruption",
                Self::Focused => "focused",
            }
        }

        pub fn parse(s: &str) -> Option<Self> {
            match s.trim().to_lowercase().as_str() {
                "today" | "今日" => Some(Self::Today),
                "interruption" | "割り込み" => Some(Self::Interruption),
                "focused" | "focus" | "フォーカス中" => Some(Self::Focused),
                _ => None,
            }
        }
    }

    /* ------------------------------- Task ------------------------------- */

    /// A stored task. `id` and the timestamps are owned by the store and stay
    /// empty for tasks rendered straight from drafts.
    #[serde_with::skip_serializing_none]
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Task {
        pub id: Option<TaskId>,
        pub title: String,
        pub description: Option<String>,
        #[serde(default)]
        pub status: TaskStatus,
        #[serde(default)]
        pub priority: Priority,
        pub category: Option<String>,
        pub due_date: Option<NaiveDate>,
        #[serde(default)]
        pub is_today: bool,
        #[serde(default)]
        pub is_interruption: bool,
        #[serde(default)]
        pub is_focused: bool,
        pub created_at: Option<DateTime<Utc>>,
        pub updated_at: Option<DateTime<Utc>>,
    }

    impl Task {
        pub fn has_title(&self) -> bool {
            !self.title.trim().is_empty()
        }

        /// Category with surrounding whitespace removed; blank counts as none.
        pub fn category_name(&self) -> Option<&str> {
            self.category
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
        }

        pub fn category_label(&self) -> &str {
            self.category_name().unwrap_or(UNCATEGORIZED)
        }

        pub fn description_text(&self) -> Option<&str> {
            self.description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
        }

        /// Set flags in the fixed order today, interruption, focused.
        pub fn tags(&self) -> Vec<TaskTag> {
            [
                (self.is_today, TaskTag::Today),
                (self.is_interruption, TaskTag::Interruption),
                (self.is_focused, TaskTag::Focused),
            ]
            .into_iter()
            .filter_map(|(set, tag)| set.then_some(tag))
            .collect()
        }
    }

    /// A task that has not been handed to a store yet.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TaskDraft {
        pub title: String,
        pub description: Option<String>,
        pub status: TaskStatus,
        pub priority: Priority,
        pub category: Option<String>,
        pub due_date: Option<NaiveDate>,
        pub is_today: bool,
        pub is_interruption: bool,
        pub is_focused: bool,
    }

    impl TaskDraft {
        pub fn new(title: impl Into<String>) -> Self {
            Self {
                title: title.into(),
                description: None,
                status: TaskStatus::default(),
                priority: Priority::default(),
                category: None,
                due_date: None,
                is_today: false,
                is_interruption: false,
                is_focused: false,
            }
        }
    }

    impl From<&Task> for TaskDraft {
        fn from(task: &Task) -> Self {
            Self {
                title: task.title.clone(),
                description: task.description.clone(),
                status: task.status,
                priority: task.priority,
                category: task.category.clone(),
                due_date: task.due_date,
                is_today: task.is_today,
                is_interruption: task.is_interruption,
                is_focused: task.is_focused,
            }
        }
    }

    impl From<TaskDraft> for Task {
        fn from(draft: TaskDraft) -> Self {
            Self {
                id: None,
                title: draft.title,
                description: draft.description,
                status: draft.status,
                priority: draft.priority,
                category: draft.category,
                due_date: draft.due_date,
                is_today: draft.is_today,
                is_interruption: draft.is_interruption,
                is_focused: draft.is_focused,
                created_at: None,
                updated_at: None,
            }
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum DomainError {
        #[error("priority {0} is out of bounds (1..=5)")]
        InvalidPriority(u8),
    }

    #[derive(Debug, thiserror::Error)]
    pub enum CodecError {
        #[error("malformed JSON input: {0}")]
        MalformedInput(#[from] serde_json::Error),
    }

}

pub mod query {
    //! Filtering and sorting over task slices, shared by views and exports.

    use crate::core::*;
    use std::{cmp::Ordering, str::FromStr};

    /// Every `Some` criterion must match.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct TaskFilter {
        pub status: Option<TaskStatus>,
        pub priority: Option<Priority>,
        pub category: Option<String>,
        pub is_today: Option<bool>,
        pub is_interruption: Option<bool>,
        pub is_focused: Option<bool>,
        pub search: Option<String>,
    }

    impl TaskFilter {
        pub fn matches(&self, task: &Task) -> bool {
            self.status.is_none_or(|s| task.status == s)
                && self.priority.is_none_or(|p| task.priority == p)
                && self
                    .category
                    .as_deref()
                    .is_none_or(|c| task.category_name() == Some(c))
                && self.is_today.is_none_or(|v| task.is_today == v)
                && self.is_interruption.is_none_or(|v| task.is_interruption == v)
                && self.is_focused.is_none_or(|v| task.is_focused == v)
                && self
                    .search
                    .as_deref()
                    .is_none_or(|q| matches_search(task, q))
        }
    }

    /// Every whitespace-separated term must appear in title, description, or category.
    pub fn matches_search(task: &Task, query: &str) -> bool {
        let haystack = [
            task.title.as_str(),
            task.description.as_deref().unwrap_or(""),
            task.category.as_deref().unwrap_or(""),
        ]
        .join(" ")
        .to_lowercase();
        query
            .split_whitespace()
            .all(|term| haystack.contains(&term.to_lowercase()))
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SortField {
        CreatedAt,
        UpdatedAt,
        DueDate,
        Priority,
        Title,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SortDirection {
        Asc,
        Desc,
    }

    /// Sort order written as `<field>.<asc|desc>`, e.g. `created_at.desc`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SortSpec {
        pub field: SortField,
        pub direction: SortDirection,
    }

    impl Default for SortSpec {
        fn default() -> Self {
            Self {
                field: SortField::CreatedAt,
                direction: SortDirection::Desc,
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    pub enum QueryError {
        #[error("unknown sort field {0:?}")]
        UnknownField(String),
        #[error("unknown sort direction {0:?}")]
        UnknownDirection(String),
    }

    impl FromStr for SortSpec {
        type Err = QueryError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let (field, direction) = s.trim().split_once('.').unwrap_or((s.trim(), "asc"));
            let field = match field {
                "created_at" => SortField::CreatedAt,
                "updated_at" => SortField::UpdatedAt,
                "due_date" => SortField::DueDate,
                "priority" => SortField::Priority,
                "title" => SortField::Title,
                other => return Err(QueryError::UnknownField(other.to_string())),
            };
            let direction = match direction {
                "asc" => SortDirection::Asc,
                "desc" => SortDirection::Desc,
                other => return Err(QueryError::UnknownDirection(other.to_string())),
            };
            Ok(Self { field, direction })
        }
    }

    impl SortSpec {
        /// Missing dates order before any present date.
        pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
            let ord = match self.field {
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
                SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                SortField::DueDate => a.due_date.cmp(&b.due_date),
                SortField::Priority => a.priority.cmp(&b.priority),
                SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            };
            match self.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        }

        pub fn sort(&self, tasks: &mut [Task]) {
            tasks.sort_by(|a, b| self.compare(a, b));
        }
    }

    /// Which tasks an export covers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum ExportScope {
        #[default]
        All,
        Today,
        /// Neither completed nor cancelled.
        Pending,
        Completed,
    }

    impl ExportScope {
        pub fn includes(self, task: &Task) -> bool {
            match self {
                Self::All => true,
                Self::Today => task.is_today,
                Self::Pending => !matches!(
                    task.status,
                    TaskStatus::Completed | TaskStatus::Cancelled
                ),
                Self::Completed => task.status == TaskStatus::Completed,
            }
        }

        pub fn select(self, tasks: &[Task]) -> Vec<Task> {
            tasks.iter().filter(|t| self.includes(t)).cloned().collect()
        }
    }

    pub fn apply(tasks: &[Task], filter: &TaskFilter, sort: SortSpec) -> Vec<Task> {
        let mut out: Vec<Task> = tasks.iter().filter(|t| filter.matches(t)).cloned().collect();
        sort.sort(&mut out);
        out
    }

}

pub mod store {
    //! Collaborator seams around the codec: where tasks live and where user-facing
    //! messages go. The codec itself never touches either.

    use crate::core::*;
    use crate::query::{self, SortSpec, TaskFilter};
    use anyhow::{Context, Result};
    use chrono::{NaiveDate, Utc};
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    pub trait TaskStore {
        /// Tasks matching `filter`, newest first.
        fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

        /// Persist a draft, assigning id and timestamps.
        fn create(&mut self, draft: TaskDraft) -> Result<Task>;

        fn update(&mut self, id: TaskId, patch: TaskPatch) -> Result<Task>;

        fn delete(&mut self, id: TaskId) -> Result<()>;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Severity {
        Info,
        Success,
        Warning,
        Error,
    }

    /// Receives transient user-facing messages.
    pub trait NotificationSink {
        fn notify(&self, message: &str, severity: Severity);
    }

    impl<T: NotificationSink + ?Sized> NotificationSink for &T {
        fn notify(&self, message: &str, severity: Severity) {
            (**self).notify(message, severity)
        }
    }

    /// Sends notifications to the `tracing` subscriber.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TracingSink;

    impl NotificationSink for TracingSink {
        fn notify(&self, message: &str, severity: Severity) {
            match severity {
                Severity::Info | Severity::Success => tracing::info!(?severity, "{message}"),
                Severity::Warning => tracing::warn!("{message}"),
                Severity::Error => tracing::error!("{message}"),
            }
        }
    }

    /// Partial update; `None` leaves a field untouched. Nested options clear a value.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct TaskPatch {
        pub title: Option<String>,
        pub description: Option<Option<String>>,
        pub status: Option<TaskStatus>,
        pub priority: Option<Priority>,
        pub category: Option<Option<String>>,
        pub due_date: Option<Option<NaiveDate>>,
        pub is_today: Option<bool>,
        pub is_interruption: Option<bool>,
        pub is_focused: Option<bool>,
    }

    impl TaskPatch {
        /// Change status; completing a task also takes it out of focus and today.
        pub fn status(status: TaskStatus) -> Self {
            let completed = status.is_completed();
            Self {
                status: Some(status),
                is_focused: completed.then_some(false),
                is_today: completed.then_some(false),
                ..Self::default()
            }
        }

        /// Focus a task and start working on it.
        pub fn focus() -> Self {
            Self {
                is_focused: Some(true),
                status: Some(TaskStatus::InProgress),
                ..Self::default()
            }
        }

        pub fn unfocus() -> Self {
            Self {
                is_focused: Some(false),
                ..Self::default()
            }
        }

        pub fn today(on: bool) -> Self {
            Self {
                is_today: Some(on),
                ..Self::default()
            }
        }

        /// Turn an interruption into a regular task at normal priority.
        pub fn promote_interruption() -> Self {
            Self {
                is_interruption: Some(false),
                priority: Some(Priority::MEDIUM),
                ..Self::default()
            }
        }

        fn apply(self, task: &mut Task) {
            if let Some(title) = self.title {
                task.title = title;
            }
            if let Some(description) = self.description {
                task.description = description;
            }
            if let Some(status) = self.status {
                task.status = status;
            }
            if let Some(priority) = self.priority {
                task.priority = priority;
            }
            if let Some(category) = self.category {
                task.category = category;
            }
            if let Some(due_date) = self.due_date {
                task.due_date = due_date;
            }
            if let Some(v) = self.is_today {
                task.is_today = v;
            }
            if let Some(v) = self.is_interruption {
                task.is_interruption = v;
            }
            if let Some(v) = self.is_focused {
                task.is_focused = v;
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    pub enum StoreError {
        #[error("no task with id {0}")]
        NotFound(TaskId),
        #[error("task title must not be empty")]
        EmptyTitle,
    }

    /// Vec-backed store. At most one task is focused at a time.
    #[derive(Debug, Clone, Default)]
    pub struct InMemoryTaskStore {
        tasks: Vec<Task>,
    }

    impl InMemoryTaskStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_tasks(tasks: Vec<Task>) -> Self {
            Self { tasks }
        }

        pub fn tasks(&self) -> &[Task] {
            &self.tasks
        }

        fn position(&self, id: TaskId) -> Result<usize> {
            self.tasks
                .iter()
                .position(|t| t.id == Some(id))
                .ok_or_else(|| StoreError::NotFound(id).into())
        }

        fn clear_focus_except(&mut self, keep: TaskId) {
            for task in self.tasks.iter_mut().filter(|t| t.id != Some(keep)) {
                task.is_focused = false;
            }
        }
    }

    impl TaskStore for InMemoryTaskStore {
        fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
            Ok(query::apply(&self.tasks, filter, SortSpec::default()))
        }

        fn create(&mut self, draft: TaskDraft) -> Result<Task> {
            if draft.title.trim().is_empty() {
                return Err(StoreError::EmptyTitle.into());
            }
            let now = Utc::now();
            let id = TaskId::new();
            let mut task = Task::from(draft);
            task.id = Some(id);
            task.created_at = Some(now);
            task.updated_at = Some(now);
            if task.is_focused {
                self.clear_focus_except(id);
            }
            tracing::debug!(%id, title = %task.title, "created task");
            self.tasks.push(task.clone());
            Ok(task)
        }

        fn update(&mut self, id: TaskId, patch: TaskPatch) -> Result<Task> {
            if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
                return Err(StoreError::EmptyTitle.into());
            }
            let idx = self.position(id)?;
            let focus = patch.is_focused == Some(true);
            let task = &mut self.tasks[idx];
            patch.apply(task);
            task.updated_at = Some(Utc::now());
            let updated = task.clone();
            if focus {
                self.clear_focus_except(id);
            }
            Ok(updated)
        }

        fn delete(&mut self, id: TaskId) -> Result<()> {
            let idx = self.position(id)?;
            self.tasks.remove(idx);
            Ok(())
        }
    }

    /// Keeps the task list in one pretty-printed JSON file, rewritten on every change.
    #[derive(Debug)]
    pub struct JsonFileTaskStore {
        path: PathBuf,
        inner: InMemoryTaskStore,
    }

    impl JsonFileTaskStore {
        /// Open `path`; a missing or empty file is an empty store.
        pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
            let path = path.into();
            let tasks: Vec<Task> = if path.exists() {
                let text =
                    fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?;
                if text.trim().is_empty() {
                    Vec::new()
                } else {
                    serde_json::from_str(&text)
                        .with_context(|| format!("parsing task store {:?}", path))?
                }
            } else {
                Vec::new()
            };
            tracing::debug!(path = %path.display(), count = tasks.len(), "opened task store");
            Ok(Self {
                path,
                inner: InMemoryTaskStore::with_tasks(tasks),
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        fn save(&self) -> Result<()> {
            let json = serde_json::to_string_pretty(self.inner.tasks())?;
            fs::write(&self.path, json.as_bytes())
                .with_context(|| format!("writing {:?}", self.path))
        }
    }

    impl TaskStore for JsonFileTaskStore {
        fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
            self.inner.list(filter)
        }

        fn create(&mut self, draft: TaskDraft) -> Result<Task> {
            let task = self.inner.create(draft)?;
            self.save()?;
            Ok(task)
        }

        fn update(&mut self, id: TaskId, patch: TaskPatch) -> Result<Task> {
            let task = self.inner.update(id, patch)?;
            self.save()?;
            Ok(task)
        }

        fn delete(&mut self, id: TaskId) -> Result<()> {
            self.inner.delete(id)?;
            self.save()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn focused(title: &str) -> TaskDraft {
            TaskDraft {
                is_focused: true,
                ..TaskDraft::new(title)
            }
        }

        #[test]
        fn create_assigns_identity_and_rejects_blank_titles() {
            let mut store = InMemoryTaskStore::new();
            let task = store.create(TaskDraft::new("Plan week")).unwrap();
            assert!(task.id.is_some());
            assert!(task.created_at.is_some());

            let err = store.create(TaskDraft::new("  ")).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<StoreError>(),
                Some(StoreError::EmptyTitle)
            ));
        }

        #[test]
        fn focusing_a_task_unfocuses_the_rest() {
            let mut store = InMemoryTaskStore::new();
            let first = store.create(focused("first")).unwrap();
            let second = store.create(focused("second")).unwrap();

            let focused_titles: Vec<_> = store
                .tasks()
                .iter()
                .filter(|t| t.is_focused)
                .map(|t| t.title.clone())
                .collect();
            assert_eq!(focused_titles, ["second"]);

            let first_id = first.id.unwrap();
            store
                .update(
                    first_id,
                    TaskPatch {
                        is_focused: Some(true),
                        ..TaskPatch::default()
                    },
                )
                .unwrap();
            let second_now = store
                .tasks()
                .iter()
                .find(|t| t.id == second.id)
                .unwrap();
            assert!(!second_now.is_focused);
        }

        #[test]
        fn workflow_patches_carry_side_effects() {
            let mut store = InMemoryTaskStore::new();
            let task = store
                .create(TaskDraft {
                    is_today: true,
                    is_interruption: true,
                    priority: Priority::HIGH,
                    ..TaskDraft::new("Answer support ticket")
                })
                .unwrap();
            let id = task.id.unwrap();

            let focused = store.update(id, TaskPatch::focus()).unwrap();
            assert!(focused.is_focused);
            assert_eq!(focused.status, TaskStatus::InProgress);

            let promoted = store.update(id, TaskPatch::promote_interruption()).unwrap();
            assert!(!promoted.is_interruption);
            assert_eq!(promoted.priority, Priority::MEDIUM);

            let cancelled = store
                .update(id, TaskPatch::status(TaskStatus::Cancelled))
                .unwrap();
            assert!(cancelled.is_focused && cancelled.is_today);

            let done = store
                .update(id, TaskPatch::status(TaskStatus::Completed))
                .unwrap();
            assert_eq!(done.status, TaskStatus::Completed);
            assert!(!done.is_focused);
            assert!(!done.is_today);

            let back = store.update(id, TaskPatch::today(true)).unwrap();
            assert!(back.is_today);
            assert!(!store.update(id, TaskPatch::unfocus()).unwrap().is_focused);
        }

        #[test]
        fn update_and_delete_unknown_ids_fail() {
            let mut store = InMemoryTaskStore::new();
            let id = TaskId::new();
            let err = store.delete(id).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<StoreError>(),
                Some(StoreError::NotFound(missing)) if *missing == id
            ));
            assert!(store.update(id, TaskPatch::default()).is_err());
        }

        #[test]
        fn list_applies_filter() {
            let mut store = InMemoryTaskStore::new();
            store
                .create(TaskDraft {
                    is_interruption: true,
                    ..TaskDraft::new("Answer call")
                })
                .unwrap();
            store.create(TaskDraft::new("Read book")).unwrap();

            let filter = TaskFilter {
                is_interruption: Some(true),
                ..TaskFilter::default()
            };
            let listed = store.list(&filter).unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].title, "Answer call");
        }

        #[test]
        fn sinks_work_behind_references_and_trait_objects() {
            let sink = TracingSink;
            let dynamic: &dyn NotificationSink = &sink;
            dynamic.notify("imported 2 tasks", Severity::Success);
            (&sink).notify("nothing to import", Severity::Warning);
        }

        #[test]
        fn json_file_store_persists_changes() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("tasks.json");

            let mut store = JsonFileTaskStore::open(&path).expect("open empty");
            let kept = store.create(TaskDraft::new("Keep me")).expect("create");
            let gone = store.create(TaskDraft::new("Drop me")).expect("create");
            store.delete(gone.id.unwrap()).expect("delete");

            let reopened = JsonFileTaskStore::open(&path).expect("reopen");
            let tasks = reopened.list(&TaskFilter::default()).expect("list");
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].id, kept.id);

            let raw = fs::read_to_string(&path).expect("read store file");
            assert!(!raw.contains("\"description\""));
        }
    }
}

pub mod export {
    //! Rendering tasks as Markdown, plain text, or JSON.
    //!
    //! A Markdown export looks like:
    //!
    //! ```text
    //! # Task List
    //!
    //! _Exported: 2025-03-01 09:30:00 UTC_
    //!
    //! ## Pending
    //!
    //! - [ ] [work] **Write report** (due: 2025-03-04) [today]
    //!   > Quarterly numbers
    //!   - work | priority: high | status: Pending
    //! ```
    //!
    //! followed by a statistics footer. `import::decode` reads this layout back.

    use crate::core::*;
    use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
    use indexmap::IndexMap;
    use serde_json::{Value, json};
    use std::fmt::Write;

    pub const DOCUMENT_TITLE: &str = "Task List";
    pub const STATISTICS_HEADING: &str = "Statistics";
    const EMPTY_NOTICE: &str = "No tasks to export";
    const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";
    const DATE_FORMAT: &str = "%Y-%m-%d";

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum Grouping {
        #[default]
        Status,
        Category,
        Priority,
        CreatedDate,
        None,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum ExportFormat {
        #[default]
        Markdown,
        PlainText,
        Json,
    }

    impl ExportFormat {
        pub fn extension(self) -> &'static str {
            match self {
                Self::Markdown => "md",
                Self::PlainText => "txt",
                Self::Json => "json",
            }
        }

        pub fn mime_type(self) -> &'static str {
            match self {
                Self::Markdown => "text/markdown",
                Self::PlainText => "text/plain",
                Self::Json => "application/json",
            }
        }

        pub fn from_extension(ext: &str) -> Option<Self> {
            match ext.to_lowercase().as_str() {
                "md" | "markdown" => Some(Self::Markdown),
                "txt" => Some(Self::PlainText),
                "json" => Some(Self::Json),
                _ => None,
            }
        }
    }

    /// `tasks_<YYYY-MM-DD>.<ext>`
    pub fn export_file_name(format: ExportFormat, date: NaiveDate) -> String {
        format!("tasks_{}.{}", date.format(DATE_FORMAT), format.extension())
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExportOptions {
        pub grouping: Grouping,
        pub format: ExportFormat,
        /// Stamped into the document header; the caller supplies it so output is reproducible.
        pub exported_at: DateTime<Utc>,
    }

    impl ExportOptions {
        pub fn new(grouping: Grouping, format: ExportFormat, exported_at: DateTime<Utc>) -> Self {
            Self {
                grouping,
                format,
                exported_at,
            }
        }
    }

    /// A labelled section of an export. `label` is `None` only for `Grouping::None`.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TaskGroup<'a> {
        pub label: Option<String>,
        pub tasks: Vec<&'a Task>,
    }

    /// Partition tasks into sections, keeping input order inside each section.
    pub fn group_tasks<'a>(tasks: &[&'a Task], grouping: Grouping) -> Vec<TaskGroup<'a>> {
        match grouping {
            Grouping::Status => TaskStatus::ALL
                .iter()
                .filter_map(|&status| {
                    fixed_group(tasks, status.label(), |t| t.status == status)
                })
                .collect(),
            Grouping::Priority => Priority::DESCENDING
                .iter()
                .filter_map(|&p| fixed_group(tasks, p.heading(), |t| t.priority == p))
                .collect(),
            Grouping::Category => keyed_groups(tasks, |t| t.category_label().to_string()),
            Grouping::CreatedDate => keyed_groups(tasks, |t| {
                t.created_at
                    .map(|ts| ts.date_naive().format(DATE_FORMAT).to_string())
                    .unwrap_or_else(|| UNKNOWN_DATE.to_string())
            }),
            Grouping::None => vec![TaskGroup {
                label: None,
                tasks: tasks.to_vec(),
            }],
        }
    }

    fn fixed_group<'a>(
        tasks: &[&'a Task],
        label: &str,
        pred: impl Fn(&Task) -> bool,
    ) -> Option<TaskGroup<'a>> {
        let members: Vec<&'a Task> = tasks.iter().copied().filter(|&t| pred(t)).collect();
        (!members.is_empty()).then(|| TaskGroup {
            label: Some(label.to_string()),
            tasks: members,
        })
    }

    /// One group per distinct key, in first-seen order.
    fn keyed_groups<'a>(tasks: &[&'a Task], key: impl Fn(&Task) -> String) -> Vec<TaskGroup<'a>> {
        let mut groups: IndexMap<String, Vec<&'a Task>> = IndexMap::new();
        for &task in tasks {
            groups.entry(key(task)).or_default().push(task);
        }
        groups
            .into_iter()
            .map(|(label, tasks)| TaskGroup {
                label: Some(label),
                tasks,
            })
            .collect()
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExportStats {
        pub total: usize,
        pub completed: usize,
        pub in_progress: usize,
        pub pending: usize,
        pub today: usize,
        pub interruption: usize,
    }

    impl ExportStats {
        pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
            let mut stats = Self::default();
            for task in tasks {
                stats.total += 1;
                match task.status {
                    TaskStatus::Completed => stats.completed += 1,
                    TaskStatus::InProgress => stats.in_progress += 1,
                    TaskStatus::Pending => stats.pending += 1,
                    TaskStatus::Cancelled => {}
                }
                stats.today += usize::from(task.is_today);
                stats.interruption += usize::from(task.is_interruption);
            }
            stats
        }

        /// Completed share in whole percent, halves rounded up.
        pub fn completion_rate(&self) -> usize {
            if self.total == 0 {
                return 0;
            }
            (self.completed * 200 + self.total) / (self.total * 2)
        }
    }

    /// Render `tasks` in input order. Tasks with a blank title are skipped.
    pub fn encode(tasks: &[Task], options: &ExportOptions) -> String {
        let kept: Vec<&Task> = tasks
            .iter()
            .filter(|task| {
                let keep = task.has_title();
                if !keep {
                    tracing::debug!(id = ?task.id, "skipping task with empty title");
                }
                keep
            })
            .collect();

        let out = match options.format {
            ExportFormat::Markdown => render_markdown(&kept, options),
            ExportFormat::PlainText => render_plain_text(&kept, options),
            ExportFormat::Json => render_json(&kept, options),
        };
        tracing::info!(
            tasks = kept.len(),
            format = ?options.format,
            grouping = ?options.grouping,
            "encoded tasks"
        );
        out
    }

    /* ------------------------------ Markdown ------------------------------ */

    fn render_markdown(tasks: &[&Task], options: &ExportOptions) -> String {
        if tasks.is_empty() {
            return format!("# {DOCUMENT_TITLE}\n\n_{EMPTY_NOTICE}_\n");
        }

        let mut out = String::new();
        let _ = write!(
            out,
            "# {DOCUMENT_TITLE}\n\n_Exported: {}_\n\n",
            options.exported_at.format(TIMESTAMP_FORMAT)
        );

        for group in group_tasks(tasks, options.grouping) {
            if let Some(label) = &group.label {
                let _ = write!(out, "## {label}\n\n");
            }
            for task in &group.tasks {
                render_markdown_task(&mut out, task);
            }
        }

        render_markdown_stats(&mut out, &ExportStats::from_tasks(tasks.iter().copied()));
        out
    }

    fn render_markdown_task(out: &mut String, task: &Task) {
        let checkbox = if task.status.is_completed() { "[x]" } else { "[ ]" };
        let _ = write!(out, "- {checkbox} ");
        if let Some(category) = task.category_name() {
            let _ = write!(out, "[{category}] ");
        }
        let _ = write!(out, "**{}**", task.title.trim());
        if let Some(due) = task.due_date {
            let _ = write!(out, " (due: {})", due.format(DATE_FORMAT));
        }
        let tags = task.tags();
        if !tags.is_empty() {
            let labels: Vec<&str> = tags.iter().map(|t| t.label()).collect();
            let _ = write!(out, " [{}]", labels.join(", "));
        }
        out.push('\n');

        if let Some(description) = task.description_text() {
            for line in description.lines() {
                let _ = writeln!(out, "  > {line}");
            }
        }
        let _ = writeln!(
            out,
            "  - {} | priority: {} | status: {}",
            task.category_label(),
            task.priority.label(),
            task.status.label()
        );
        if let Some(line) = timestamps_line(task, "created", "updated") {
            let _ = writeln!(out, "  - {line}");
        }
        out.push('\n');
    }

    fn render_markdown_stats(out: &mut String, stats: &ExportStats) {
        let _ = write!(out, "---\n\n## {STATISTICS_HEADING}\n\n");
        let _ = writeln!(out, "- **Total**: {}", stats.total);
        let _ = writeln!(
            out,
            "- **Completed**: {} ({}%)",
            stats.completed,
            stats.completion_rate()
        );
        let _ = writeln!(out, "- **In progress**: {}", stats.in_progress);
        let _ = writeln!(out, "- **Pending**: {}", stats.pending);
        let _ = writeln!(out, "- **Today**: {}", stats.today);
        let _ = writeln!(out, "- **Interruptions**: {}", stats.interruption);
    }

    fn timestamps_line(task: &Task, created: &str, updated: &str) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(ts) = task.created_at {
            parts.push(format!("{created}: {}", ts.date_naive().format(DATE_FORMAT)));
        }
        if let Some(ts) = task.updated_at {
            parts.push(format!("{updated}: {}", ts.date_naive().format(DATE_FORMAT)));
        }
        (!parts.is_empty()).then(|| parts.join(" | "))
    }

    /* ----------------------------- Plain text ----------------------------- */

    fn render_plain_text(tasks: &[&Task], options: &ExportOptions) -> String {
        if tasks.is_empty() {
            return format!("{DOCUMENT_TITLE}\n\n{EMPTY_NOTICE}\n");
        }

        let mut out = String::new();
        let _ = write!(
            out,
            "{DOCUMENT_TITLE}\n{}\n\nExported: {}\n\n",
            "=".repeat(20),
            options.exported_at.format(TIMESTAMP_FORMAT)
        );

        for group in group_tasks(tasks, options.grouping) {
            if let Some(label) = &group.label {
                let _ = write!(out, "{label}\n{}\n\n", "-".repeat(label.chars().count()));
            }
            for (idx, task) in group.tasks.iter().enumerate() {
                let mark = if task.status.is_completed() { '✓' } else { '○' };
                let _ = write!(out, "{}. {mark} {}", idx + 1, task.title.trim());
                if let Some(due) = task.due_date {
                    let _ = write!(out, " (due: {})", due.format(DATE_FORMAT));
                }
                let tags = task.tags();
                if !tags.is_empty() {
                    let labels: Vec<&str> = tags.iter().map(|t| t.label()).collect();
                    let _ = write!(out, " [{}]", labels.join(", "));
                }
                out.push('\n');
                if let Some(description) = task.description_text() {
                    let _ = writeln!(out, "   Description: {}", description.replace('\n', " "));
                }
                let _ = writeln!(
                    out,
                    "   Category: {} | Priority: {} | Status: {}",
                    task.category_label(),
                    task.priority.label(),
                    task.status.label()
                );
                if let Some(line) = timestamps_line(task, "Created", "Updated") {
                    let _ = writeln!(out, "   {line}");
                }
                out.push('\n');
            }
        }

        let stats = ExportStats::from_tasks(tasks.iter().copied());
        let _ = write!(
            out,
            "{STATISTICS_HEADING}\n{}\n",
            "-".repeat(STATISTICS_HEADING.len())
        );
        let _ = writeln!(out, "Total: {}", stats.total);
        let _ = writeln!(
            out,
            "Completed: {} ({}%)",
            stats.completed,
            stats.completion_rate()
        );
        let _ = writeln!(out, "In progress: {}", stats.in_progress);
        let _ = writeln!(out, "Pending: {}", stats.pending);
        let _ = writeln!(out, "Today: {}", stats.today);
        let _ = writeln!(out, "Interruptions: {}", stats.interruption);
        out
    }

    /* -------------------------------- JSON -------------------------------- */

    fn render_json(tasks: &[&Task], options: &ExportOptions) -> String {
        let records: Vec<Value> = tasks.iter().map(|t| json_record(t)).collect();
        let doc = json!({
            "exportDate": options.exported_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "totalTasks": records.len(),
            "tasks": records,
        });
        format!("{doc:#}\n")
    }

    fn json_record(task: &Task) -> Value {
        json!({
            "id": task.id.map(|id| id.to_string()),
            "title": task.title,
            "description": task.description,
            "status": task.status.key(),
            "priority": task.priority.value(),
            "category": task.category,
            "dueDate": task.due_date.map(|d| d.format(DATE_FORMAT).to_string()),
            "isToday": task.is_today,
            "isInterruption": task.is_interruption,
            "isFocused": task.is_focused,
            "createdAt": task.created_at.map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
            "updatedAt": task.updated_at.map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
        })
    }

}

pub mod import {
    //! Reading task drafts back from text.
    //!
    //! Text starting with `{` or `[` is JSON (an export document or a bare array of
    //! task-like objects). Anything else is scanned line by line: `## ` headings set
    //! the section context, checklist items become drafts, and every other line is
    //! skipped.

    use crate::core::*;
    use crate::export::STATISTICS_HEADING;
    use chrono::{DateTime, NaiveDate};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::tag,
        character::complete::{char, one_of, space0, space1},
        combinator::map,
        error::VerboseError,
        sequence::{preceded, terminated, tuple},
    };
    use regex::Regex;
    use serde_json::{Map, Value};
    use std::sync::LazyLock;

    /// Title given to JSON records that carry neither `title` nor `name`.
    pub const UNTITLED: &str = "Untitled";

    pub fn decode(text: &str) -> Result<Vec<TaskDraft>, CodecError> {
        let text = text.trim();
        let drafts = if text.starts_with('{') || text.starts_with('[') {
            decode_json(text)?
        } else {
            decode_markdown(text)
        };
        tracing::info!(drafts = drafts.len(), "decoded task drafts");
        Ok(drafts)
    }

    /* -------------------------------- JSON -------------------------------- */

    // Keys consulted in order for each field; the first usable value wins.
    // `null`, blank strings and `false` are not usable and fall through.
    const TITLE_KEYS: &[&str] = &["title", "name"];
    const DESCRIPTION_KEYS: &[&str] = &["description"];
    const STATUS_KEYS: &[&str] = &["status"];
    const PRIORITY_KEYS: &[&str] = &["priority"];
    const CATEGORY_KEYS: &[&str] = &["category"];
    const DUE_DATE_KEYS: &[&str] = &["due_date", "dueDate"];
    const TODAY_KEYS: &[&str] = &["is_today", "isToday"];
    const INTERRUPTION_KEYS: &[&str] = &["is_interruption", "isInterruption"];
    const FOCUSED_KEYS: &[&str] = &["is_focused", "isFocused"];

    /// Fails only when the text is not valid JSON; unknown shapes yield no drafts.
    pub fn decode_json(text: &str) -> Result<Vec<TaskDraft>, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        let records = match &value {
            Value::Object(obj) => match obj.get("tasks") {
                Some(Value::Array(items)) => items.as_slice(),
                _ => {
                    tracing::debug!("JSON object without a tasks array");
                    return Ok(Vec::new());
                }
            },
            Value::Array(items) => items.as_slice(),
            _ => return Ok(Vec::new()),
        };
        Ok(records
            .iter()
            .filter_map(Value::as_object)
            .map(draft_from_record)
            .collect())
    }

    fn draft_from_record(record: &Map<String, Value>) -> TaskDraft {
        TaskDraft {
            title: text_field(record, TITLE_KEYS).unwrap_or_else(|| UNTITLED.to_string()),
            description: text_field(record, DESCRIPTION_KEYS),
            status: text_field(record, STATUS_KEYS)
                .and_then(|s| TaskStatus::parse(&s))
                .unwrap_or_default(),
            priority: first_usable(record, PRIORITY_KEYS)
                .and_then(priority_value)
                .unwrap_or_default(),
            category: text_field(record, CATEGORY_KEYS),
            due_date: text_field(record, DUE_DATE_KEYS).and_then(|s| parse_date(&s)),
            is_today: flag_field(record, TODAY_KEYS),
            is_interruption: flag_field(record, INTERRUPTION_KEYS),
            is_focused: flag_field(record, FOCUSED_KEYS),
        }
    }

    fn first_usable<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
        keys.iter()
            .filter_map(|key| record.get(*key))
            .find(|value| match value {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::String(s) => !s.trim().is_empty(),
                _ => true,
            })
    }

    /// Strings come back as written; only blank ones fall through.
    fn text_field(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
        match first_usable(record, keys)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn flag_field(record: &Map<String, Value>, keys: &[&str]) -> bool {
        first_usable(record, keys).is_some_and(|v| v.as_bool() == Some(true))
    }

    fn priority_value(value: &Value) -> Option<Priority> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .and_then(Priority::new),
            Value::String(s) => Priority::from_label(s),
            _ => None,
        }
    }

    /// ISO dates, a few common separators, or an RFC 3339 timestamp.
    pub fn parse_date(s: &str) -> Option<NaiveDate> {
        const FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y年%m月%d日"];
        let s = s.trim();
        FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
            .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
    }

    /* ------------------------------ Markdown ------------------------------ */

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Line<'a> {
        Heading(&'a str),
        Item { checked: bool, text: &'a str },
        Quote(&'a str),
        Other,
    }

    fn classify(line: &str) -> Line<'_> {
        if let Ok((_, text)) = parse_heading(line) {
            return Line::Heading(text);
        }
        if let Ok((text, checked)) = parse_checklist_item(line) {
            return Line::Item {
                checked,
                text: text.trim(),
            };
        }
        match line.strip_prefix('>') {
            Some(quote) => Line::Quote(quote.trim()),
            None => Line::Other,
        }
    }

    fn parse_heading(i: &str) -> PResult<'_, &str> {
        // Exactly two hashes: the `# ` document title and deeper headings are skipped.
        let (rest, _) = terminated(tag("##"), space1)(i)?;
        Ok(("", rest.trim()))
    }

    fn parse_checklist_item(i: &str) -> PResult<'_, bool> {
        // "- [ ] text", "* [x] text", "+ [X] text"
        preceded(tuple((one_of("-*+"), space0)), parse_checkbox)(i)
    }

    fn parse_checkbox(i: &str) -> PResult<'_, bool> {
        let (i, _) = char('[')(i)?;
        let (i, checked) = alt((map(char(' '), |_| false), map(one_of("xX"), |_| true)))(i)?;
        let (i, _) = char(']')(i)?;
        Ok((i, checked))
    }

    /// What a `## ` heading means for the items below it.
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Section {
        Status(TaskStatus),
        Priority(Priority),
        /// Creation-date groups and the statistics footer carry no task context.
        Neutral,
        Category(Option<String>),
    }

    fn classify_heading(text: &str) -> Section {
        let lower = text.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if lower == STATISTICS_HEADING.to_lowercase() || has(&["統計"]) {
            return Section::Neutral;
        }
        if has(&["done", "complete", "完了"]) {
            return Section::Status(TaskStatus::Completed);
        }
        if has(&["progress", "進行"]) {
            return Section::Status(TaskStatus::InProgress);
        }
        if has(&["cancel", "キャンセル"]) {
            return Section::Status(TaskStatus::Cancelled);
        }
        if has(&["pending", "todo", "未着手"]) {
            return Section::Status(TaskStatus::Pending);
        }
        if let Some(p) = priority_heading(&lower) {
            return Section::Priority(p);
        }
        if lower == UNKNOWN_DATE.to_lowercase() || parse_date(text).is_some() {
            return Section::Neutral;
        }
        if lower == UNCATEGORIZED.to_lowercase() || text == "未分類" {
            return Section::Category(None);
        }
        Section::Category(Some(text.to_string()))
    }

    fn priority_heading(lower: &str) -> Option<Priority> {
        let word = lower
            .strip_suffix(" priority")
            .or_else(|| lower.strip_suffix("優先度"))?;
        Priority::from_label(word)
    }

    /// Item metadata written under a checklist line:
    /// `- work | priority: high | status: In Progress`.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    struct Metadata {
        priority: Option<Priority>,
        status: Option<TaskStatus>,
    }

    impl Metadata {
        fn apply(self, draft: &mut TaskDraft, checked: bool) {
            if let Some(priority) = self.priority {
                draft.priority = priority;
            }
            // The checkbox alone decides completion.
            if let Some(status) = self.status.filter(|s| !checked && !s.is_completed()) {
                draft.status = status;
            }
        }
    }

    fn parse_bullet(i: &str) -> PResult<'_, char> {
        terminated(one_of("-*+"), space1)(i)
    }

    /// `None` unless at least one `priority:` or `status:` field is present.
    fn parse_metadata(line: &str) -> Option<Metadata> {
        let (fields, _) = parse_bullet(line).ok()?;
        let mut meta = Metadata::default();
        for field in fields.split('|') {
            let Some((key, value)) = field.split_once([':', '：']) else {
                continue;
            };
            match key.trim().to_lowercase().as_str() {
                "priority" | "優先度" => {
                    meta.priority = Some(Priority::from_label(value).unwrap_or_default())
                }
                "status" | "ステータス" => meta.status = TaskStatus::parse(value),
                _ => {}
            }
        }
        (meta.priority.is_some() || meta.status.is_some()).then_some(meta)
    }

    #[derive(Debug, Default)]
    struct ScanState {
        category: Option<String>,
        status: TaskStatus,
        priority: Option<Priority>,
        /// Checkbox state of the last draft while blockquotes and metadata still
        /// attach to it; cleared by the next heading.
        open_item: Option<bool>,
    }

    impl ScanState {
        fn enter_section(&mut self, heading: &str) {
            self.open_item = None;
            match classify_heading(heading) {
                Section::Status(status) => self.status = status,
                Section::Priority(p) => self.priority = Some(p),
                Section::Neutral => {}
                Section::Category(category) => {
                    self.category = category;
                    self.status = TaskStatus::Pending;
                    self.priority = None;
                }
            }
        }
    }

    /// Never fails: lines that do not parse are skipped.
    pub fn decode_markdown(text: &str) -> Vec<TaskDraft> {
        let mut state = ScanState::default();
        let mut drafts: Vec<TaskDraft> = Vec::new();

        for raw in text.lines() {
            let line = raw.trim();
            match classify(line) {
                Line::Heading(heading) => state.enter_section(heading),
                Line::Item { checked, text } => match draft_from_item(checked, text, &state) {
                    Some(draft) => {
                        drafts.push(draft);
                        state.open_item = Some(checked);
                    }
                    None => {
                        tracing::debug!(line, "dropping checklist item without a title");
                        state.open_item = None;
                    }
                },
                // Metadata lines are indented under their item.
                Line::Other if raw.starts_with([' ', '\t']) => {
                    let (Some(checked), Some(meta)) = (state.open_item, parse_metadata(line))
                    else {
                        continue;
                    };
                    if let Some(draft) = drafts.last_mut() {
                        meta.apply(draft, checked);
                    }
                }
                Line::Quote(quote) if state.open_item.is_some() => {
                    if let Some(draft) = drafts.last_mut() {
                        match &mut draft.description {
                            Some(existing) => {
                                existing.push('\n');
                                existing.push_str(quote);
                            }
                            None => draft.description = Some(quote.to_string()),
                        }
                    }
                }
                Line::Quote(_) | Line::Other => {}
            }
        }
        drafts
    }

    static TAG_LIST: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\[\]]+)\]\s*$").expect("tag list regex"));
    static DUE_DATE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\(\s*(?:due|期限)\s*[:：]\s*([^)]*)\)").expect("due date regex")
    });
    static PRIORITY: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\(?\s*(?:priority|優先度)\s*[:：]\s*([^\s,)\]|*]+)\s*\)?")
            .expect("priority regex")
    });
    static CATEGORY: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\[\]]+)\]").expect("category regex"));
    static BOLD: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\*\*(.+)\*\*").expect("bold regex"));

    #[derive(Debug, Default, Clone, Copy)]
    struct Flags {
        today: bool,
        interruption: bool,
        focused: bool,
    }

    fn draft_from_item(checked: bool, text: &str, state: &ScanState) -> Option<TaskDraft> {
        let mut rest = text.to_string();

        // The bold title comes out first so markers only match text around it.
        let bold = take_match(&mut rest, &BOLD).filter(|b| !b.is_empty());
        let flags = take_tags(&mut rest);
        let due_date = take_match(&mut rest, &DUE_DATE).and_then(|v| parse_date(&v));
        let priority = take_match(&mut rest, &PRIORITY)
            .map(|v| Priority::from_label(&v).unwrap_or_default());
        let category = take_match(&mut rest, &CATEGORY).filter(|c| !c.is_empty());

        let leftover = rest.trim();
        let title = match bold {
            Some(inner) if leftover.is_empty() => inner,
            Some(inner) => format!("{inner} {leftover}"),
            None => leftover.to_string(),
        };
        if title.is_empty() {
            return None;
        }

        Some(TaskDraft {
            title,
            description: None,
            status: if checked {
                TaskStatus::Completed
            } else {
                state.status
            },
            priority: priority.or(state.priority).unwrap_or_default(),
            category: category.or_else(|| state.category.clone()),
            due_date,
            is_today: flags.today,
            is_interruption: flags.interruption,
            is_focused: flags.focused,
        })
    }

    /// Remove the first match of `re` from `rest`, returning its trimmed first group.
    fn take_match(rest: &mut String, re: &Regex) -> Option<String> {
        let caps = re.captures(rest.as_str())?;
        let whole = caps.get(0)?.range();
        let value = caps
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        rest.replace_range(whole, "");
        Some(value)
    }

    /// A trailing bracket is a tag list only if every entry is a known tag.
    fn take_tags(rest: &mut String) -> Flags {
        let Some(caps) = TAG_LIST.captures(rest.as_str()) else {
            return Flags::default();
        };
        let Some(tags) = caps[1]
            .split([',', '、'])
            .map(TaskTag::parse)
            .collect::<Option<Vec<_>>>()
        else {
            return Flags::default();
        };
        let mut flags = Flags::default();
        for tag in tags {
            match tag {
                TaskTag::Today => flags.today = true,
                TaskTag::Interruption => flags.interruption = true,
                TaskTag::Focused => flags.focused = true,
            }
        }
        if let Some(whole) = caps.get(0).map(|m| m.range()) {
            rest.replace_range(whole, "");
        }
        flags
    }

}

pub mod transfer {
    //! Import/export flows over an injected store and notification sink.

    use crate::core::{CodecError, Task, TaskDraft};
    use crate::export::{ExportOptions, encode, export_file_name};
    use crate::import::decode;
    use crate::query::{ExportScope, TaskFilter};
    use crate::store::{NotificationSink, Severity, TaskStore};
    use anyhow::Result;

    /// Encoded export plus what a download needs.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ExportArtifact {
        pub file_name: String,
        pub mime_type: &'static str,
        pub content: String,
        pub task_count: usize,
    }

    pub struct TaskTransfer<S, N> {
        store: S,
        sink: N,
    }

    impl<S: TaskStore, N: NotificationSink> TaskTransfer<S, N> {
        pub fn new(store: S, sink: N) -> Self {
            Self { store, sink }
        }

        pub fn store(&self) -> &S {
            &self.store
        }

        pub fn store_mut(&mut self) -> &mut S {
            &mut self.store
        }

        pub fn into_parts(self) -> (S, N) {
            (self.store, self.sink)
        }

        pub fn export(&self, scope: ExportScope, options: &ExportOptions) -> Result<ExportArtifact> {
            let tasks = match self.store.list(&TaskFilter::default()) {
                Ok(tasks) => tasks,
                Err(err) => {
                    self.sink
                        .notify(&format!("Export failed: {err:#}"), Severity::Error);
                    return Err(err);
                }
            };
            let selected = scope.select(&tasks);
            let content = encode(&selected, options);
            let file_name = export_file_name(options.format, options.exported_at.date_naive());
            self.sink.notify(
                &format!("Exported {} tasks as {file_name}", selected.len()),
                Severity::Success,
            );
            Ok(ExportArtifact {
                file_name,
                mime_type: options.format.mime_type(),
                content,
                task_count: selected.len(),
            })
        }

        /// Decode `text` without touching the store.
        pub fn preview_import(&self, text: &str) -> Result<Vec<TaskDraft>, CodecError> {
            if text.trim().is_empty() {
                self.sink
                    .notify("Nothing to import: the input is empty", Severity::Warning);
                return Ok(Vec::new());
            }
            match decode(text) {
                Ok(drafts) if drafts.is_empty() => {
                    self.sink
                        .notify("No importable tasks were found", Severity::Warning);
                    Ok(drafts)
                }
                Ok(drafts) => {
                    self.sink.notify(
                        &format!("{} tasks ready to import", drafts.len()),
                        Severity::Info,
                    );
                    Ok(drafts)
                }
                Err(err) => {
                    self.sink.notify(
                        &format!("Could not parse the import data: {err}"),
                        Severity::Error,
                    );
                    Err(err)
                }
            }
        }

        /// Create drafts one by one, in order. Stops at the first failure.
        pub fn execute_import(&mut self, drafts: Vec<TaskDraft>) -> Result<Vec<Task>> {
            if drafts.is_empty() {
                self.sink
                    .notify("There are no tasks to import", Severity::Warning);
                return Ok(Vec::new());
            }
            let total = drafts.len();
            let mut created = Vec::with_capacity(total);
            for draft in drafts {
                match self.store.create(draft) {
                    Ok(task) => created.push(task),
                    Err(err) => {
                        self.sink.notify(
                            &format!(
                                "Import failed after {} of {total} tasks: {err:#}",
                                created.len()
                            ),
                            Severity::Error,
                        );
                        return Err(err.context(format!(
                            "importing task {} of {total}",
                            created.len() + 1
                        )));
                    }
                }
            }
            self.sink.notify(
                &format!("Imported {} tasks", created.len()),
                Severity::Success,
            );
            Ok(created)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::TaskId;
        use crate::export::{ExportFormat, Grouping};
        use crate::store::{InMemoryTaskStore, StoreError, TaskPatch};
        use chrono::{TimeZone, Utc};
        use std::cell::RefCell;

        #[derive(Default)]
        struct RecordingSink(RefCell<Vec<(String, Severity)>>);

        impl RecordingSink {
            fn severities(&self) -> Vec<Severity> {
                self.0.borrow().iter().map(|(_, s)| *s).collect()
            }
        }

        impl NotificationSink for RecordingSink {
            fn notify(&self, message: &str, severity: Severity) {
                self.0.borrow_mut().push((message.to_string(), severity));
            }
        }

        /// Accepts `limit` creates, then refuses.
        struct FlakyStore {
            inner: InMemoryTaskStore,
            limit: usize,
        }

        impl TaskStore for FlakyStore {
            fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
                self.inner.list(filter)
            }
            fn create(&mut self, draft: TaskDraft) -> Result<Task> {
                if self.inner.tasks().len() >= self.limit {
                    anyhow::bail!("service unavailable");
                }
                self.inner.create(draft)
            }
            fn update(&mut self, id: TaskId, patch: TaskPatch) -> Result<Task> {
                self.inner.update(id, patch)
            }
            fn delete(&mut self, id: TaskId) -> Result<()> {
                self.inner.delete(id)
            }
        }

        #[test]
        fn preview_then_execute_creates_tasks() {
            let sink = RecordingSink::default();
            let mut transfer = TaskTransfer::new(InMemoryTaskStore::new(), &sink);

            let drafts = transfer
                .preview_import("## home\n- [ ] Water plants\n- [x] Take out trash\n")
                .unwrap();
            assert_eq!(drafts.len(), 2);
            assert!(transfer.store().tasks().is_empty());

            let created = transfer.execute_import(drafts).unwrap();
            assert_eq!(created.len(), 2);
            assert!(created.iter().all(|t| t.id.is_some()));
            assert_eq!(transfer.store().tasks().len(), 2);
            assert_eq!(sink.severities(), [Severity::Info, Severity::Success]);
        }

        #[test]
        fn preview_reports_empty_and_malformed_input() {
            let sink = RecordingSink::default();
            let transfer = TaskTransfer::new(InMemoryTaskStore::new(), &sink);

            assert!(transfer.preview_import("   ").unwrap().is_empty());
            assert!(transfer.preview_import("just prose").unwrap().is_empty());
            assert!(transfer.preview_import("{oops").is_err());
            assert_eq!(
                sink.severities(),
                [Severity::Warning, Severity::Warning, Severity::Error]
            );
        }

        #[test]
        fn execute_stops_at_first_failure() {
            let sink = RecordingSink::default();
            let store = FlakyStore {
                inner: InMemoryTaskStore::new(),
                limit: 1,
            };
            let mut transfer = TaskTransfer::new(store, &sink);

            let drafts = vec![TaskDraft::new("one"), TaskDraft::new("two")];
            let err = transfer.execute_import(drafts).unwrap_err();
            assert!(format!("{err:#}").contains("service unavailable"));
            assert_eq!(transfer.store().inner.tasks().len(), 1);
            assert_eq!(sink.severities(), [Severity::Error]);
        }

        #[test]
        fn execute_rejects_blank_titles_from_store() {
            let sink = RecordingSink::default();
            let mut transfer = TaskTransfer::new(InMemoryTaskStore::new(), &sink);
            let err = transfer
                .execute_import(vec![TaskDraft::new(" ")])
                .unwrap_err();
            assert!(err.chain().any(|e| e.downcast_ref::<StoreError>().is_some()));
        }

        #[test]
        fn export_respects_scope_and_names_file() {
            let sink = RecordingSink::default();
            let mut store = InMemoryTaskStore::new();
            store
                .create(TaskDraft {
                    is_today: true,
                    ..TaskDraft::new("Today thing")
                })
                .unwrap();
            store.create(TaskDraft::new("Someday thing")).unwrap();
            let transfer = TaskTransfer::new(store, &sink);

            let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
            let options = ExportOptions::new(Grouping::None, ExportFormat::Markdown, at);
            let artifact = transfer.export(ExportScope::Today, &options).unwrap();

            assert_eq!(artifact.file_name, "tasks_2025-03-01.md");
            assert_eq!(artifact.mime_type, "text/markdown");
            assert_eq!(artifact.task_count, 1);
            assert!(artifact.content.contains("**Today thing**"));
            assert!(!artifact.content.contains("Someday thing"));
            assert_eq!(sink.severities(), [Severity::Success]);
        }
    }
}

pub use export::encode;
pub use import::decode;
