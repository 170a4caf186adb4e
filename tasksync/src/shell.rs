//! Line-oriented interactive shell over the sync engine.
//!
//! Each input line is parsed into a [`ShellCommand`] and applied to the
//! [`SyncController`]. Engine events (settle timers, store responses) are
//! handled between lines, so edits keep flowing to the store while the
//! shell waits for input.

use std::fmt::Write as _;

use tasksync_proto::CreateTaskRequest;
use tasksync_proto::task::{Task, TaskId, TaskPriority, TaskStatus};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::store::TaskStore;
use crate::sync::collection::{TaskCollection, by_priority_desc, insertion_order, with_status};
use crate::sync::{Field, NoticeLevel, SyncController, SyncError, SyncEvents};

const HELP: &str = "\
commands:
  list                              show all tasks
  add <title> [!low|!medium|!high] [@YYYY-MM-DD]
  select <id prefix>                open a task for editing
  deselect                          close the open task
  show                              show the open task
  title <text>                      rename
  desc <text>                       set description
  priority <none|low|medium|high>
  due <YYYY-MM-DD|none>
  toggle                            flip todo/done
  tag +<tag> | tag -<tag>
  delete                            delete the open task
  refresh                           reload from the store
  search <term>                     highlight and select matches
  help
  quit";

/// Characters of a task id shown in listings.
const SHORT_ID_LEN: usize = 8;

/// A parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    List,
    Add {
        title: String,
        priority: TaskPriority,
        due: Option<u64>,
    },
    Select(String),
    Deselect,
    Show,
    Title(String),
    Desc(String),
    Priority(TaskPriority),
    /// `None` clears the due date.
    Due(Option<u64>),
    Toggle,
    Tag {
        add: bool,
        tag: String,
    },
    Delete,
    Refresh,
    Search(String),
    Help,
    Quit,
}

/// Why a line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty line")]
    Empty,
    #[error("unknown command {0:?} (try help)")]
    Unknown(String),
    #[error("{0} needs an argument")]
    MissingArgument(&'static str),
    #[error("unknown priority {0:?}")]
    InvalidPriority(String),
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("tag must start with + or -")]
    InvalidTag,
}

/// Parses one input line.
///
/// # Errors
///
/// [`CommandError::Empty`] for a blank line, otherwise the reason the
/// line is not a valid command.
pub fn parse_command(line: &str) -> Result<ShellCommand, CommandError> {
    let line = line.trim();
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(w, r)| (w, r.trim()));

    let required = |name: &'static str| {
        if rest.is_empty() {
            Err(CommandError::MissingArgument(name))
        } else {
            Ok(rest.to_string())
        }
    };

    match word.to_ascii_lowercase().as_str() {
        "" => Err(CommandError::Empty),
        "list" | "ls" => Ok(ShellCommand::List),
        "add" => parse_add(rest),
        "select" | "sel" => required("select").map(ShellCommand::Select),
        "deselect" => Ok(ShellCommand::Deselect),
        "show" => Ok(ShellCommand::Show),
        "title" => Ok(ShellCommand::Title(rest.to_string())),
        "desc" => Ok(ShellCommand::Desc(rest.to_string())),
        "priority" => parse_priority(&required("priority")?).map(ShellCommand::Priority),
        "due" => {
            let arg = required("due")?;
            if arg.eq_ignore_ascii_case("none") {
                Ok(ShellCommand::Due(None))
            } else {
                parse_date(&arg).map(|ms| ShellCommand::Due(Some(ms)))
            }
        }
        "toggle" => Ok(ShellCommand::Toggle),
        "tag" => {
            let arg = required("tag")?;
            if let Some(tag) = arg.strip_prefix('+') {
                Ok(ShellCommand::Tag {
                    add: true,
                    tag: tag.to_string(),
                })
            } else if let Some(tag) = arg.strip_prefix('-') {
                Ok(ShellCommand::Tag {
                    add: false,
                    tag: tag.to_string(),
                })
            } else {
                Err(CommandError::InvalidTag)
            }
        }
        "delete" | "rm" => Ok(ShellCommand::Delete),
        "refresh" => Ok(ShellCommand::Refresh),
        "search" | "/" => Ok(ShellCommand::Search(rest.to_string())),
        "help" | "?" => Ok(ShellCommand::Help),
        "quit" | "exit" | "q" => Ok(ShellCommand::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// `add` takes a free-form title with optional `!priority` and `@date`
/// markers anywhere in it.
fn parse_add(rest: &str) -> Result<ShellCommand, CommandError> {
    let mut title_words = Vec::new();
    let mut priority = TaskPriority::None;
    let mut due = None;
    for word in rest.split_whitespace() {
        if let Some(p) = word.strip_prefix('!') {
            priority = parse_priority(p)?;
        } else if let Some(d) = word.strip_prefix('@') {
            due = Some(parse_date(d)?);
        } else {
            title_words.push(word);
        }
    }
    if title_words.is_empty() {
        return Err(CommandError::MissingArgument("add"));
    }
    Ok(ShellCommand::Add {
        title: title_words.join(" "),
        priority,
        due,
    })
}

fn parse_priority(raw: &str) -> Result<TaskPriority, CommandError> {
    raw.parse()
        .map_err(|_| CommandError::InvalidPriority(raw.to_string()))
}

/// Parses `YYYY-MM-DD` as midnight UTC, in milliseconds since epoch.
///
/// # Errors
///
/// [`CommandError::InvalidDate`] if the text is not a calendar date.
pub fn parse_date(raw: &str) -> Result<u64, CommandError> {
    let invalid = || CommandError::InvalidDate(raw.to_string());
    let date = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())?;
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?;
    u64::try_from(midnight.and_utc().timestamp_millis()).map_err(|_| invalid())
}

/// Formats a due date as `YYYY-MM-DD` (UTC).
#[must_use]
pub fn format_date(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map_or_else(|| "????-??-??".to_string(), |dt| dt.format("%Y-%m-%d").to_string())
}

/// The first characters of an id, as shown in listings.
#[must_use]
pub fn short_id(id: &TaskId) -> &str {
    let s = id.as_str();
    s.char_indices()
        .nth(SHORT_ID_LEN)
        .map_or(s, |(end, _)| &s[..end])
}

/// One listing line. `marker` flags the selected task or a search hit.
#[must_use]
pub fn format_task(task: &Task, marker: char) -> String {
    let check = match task.status {
        TaskStatus::Todo => ' ',
        TaskStatus::Done => 'x',
    };
    let mut line = format!("{marker} {} [{check}] {}", short_id(&task.id), task.title);
    if task.priority != TaskPriority::None {
        let _ = write!(line, " !{}", task.priority);
    }
    if let Some(due) = task.due_date {
        let _ = write!(line, " @{}", format_date(due));
    }
    for tag in &task.tags {
        let _ = write!(line, " #{tag}");
    }
    line
}

/// Open tasks by priority, then done tasks in the order they were added.
/// `status` restricts the result to one group.
#[must_use]
pub fn ordered_tasks(collection: &TaskCollection, status: Option<TaskStatus>) -> Vec<&Task> {
    let mut tasks = Vec::new();
    if status.is_none_or(|s| s == TaskStatus::Todo) {
        let todo = collection.project(with_status(TaskStatus::Todo), by_priority_desc);
        tasks.extend(todo.iter());
    }
    if status.is_none_or(|s| s == TaskStatus::Done) {
        let done = collection.project(with_status(TaskStatus::Done), insertion_order);
        tasks.extend(done.iter());
    }
    tasks
}

/// Renders the task list as printed by `list`.
pub fn render_list<S: TaskStore>(
    controller: &SyncController<S>,
    status: Option<TaskStatus>,
) -> Vec<String> {
    let collection = controller.collection();
    let selected = collection.selected_id();
    let lines: Vec<String> = ordered_tasks(collection, status)
        .into_iter()
        .map(|task| {
            let marker = if selected == Some(&task.id) {
                '>'
            } else if controller.is_highlighted(task) {
                '*'
            } else {
                ' '
            };
            format_task(task, marker)
        })
        .collect();
    if lines.is_empty() {
        return vec!["no tasks".to_string()];
    }
    lines
}

/// The interactive shell.
pub struct Shell<S> {
    controller: SyncController<S>,
    events: SyncEvents,
}

impl<S: TaskStore> Shell<S> {
    #[must_use]
    pub const fn new(controller: SyncController<S>, events: SyncEvents) -> Self {
        Self { controller, events }
    }

    #[must_use]
    pub const fn controller(&self) -> &SyncController<S> {
        &self.controller
    }

    /// Reads commands from `input` until `quit` or end of input, writing
    /// replies and engine notices to `output`. Queued edits are sent and
    /// awaited before returning.
    ///
    /// # Errors
    ///
    /// I/O errors on `input` or `output`.
    pub async fn run<R, W>(mut self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        write_lines(&mut output, &["type help for commands".to_string()]).await?;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    match parse_command(&line) {
                        Ok(ShellCommand::Quit) => break,
                        Ok(command) => {
                            let reply = self.execute(command).await;
                            write_lines(&mut output, &reply).await?;
                        }
                        Err(CommandError::Empty) => {}
                        Err(e) => {
                            write_lines(&mut output, &[format!("error: {e}")]).await?;
                        }
                    }
                }
                Some(event) = self.events.recv() => {
                    self.controller.handle_event(event);
                    let notices = self.drain_notices();
                    write_lines(&mut output, &notices).await?;
                }
            }
        }

        self.controller.shutdown(&mut self.events).await;
        let notices = self.drain_notices();
        write_lines(&mut output, &notices).await?;
        output.flush().await
    }

    /// Applies one command and returns the lines to print.
    pub async fn execute(&mut self, command: ShellCommand) -> Vec<String> {
        let mut out = Vec::new();
        if let Err(e) = self.apply(command, &mut out).await {
            out.push(format!("error: {e}"));
        }
        out.extend(self.drain_notices());
        out
    }

    async fn apply(&mut self, command: ShellCommand, out: &mut Vec<String>) -> Result<(), SyncError> {
        match command {
            ShellCommand::List => out.extend(render_list(&self.controller, None)),
            ShellCommand::Add {
                title,
                priority,
                due,
            } => {
                let mut req = CreateTaskRequest::new(title, priority);
                if let Some(due) = due {
                    req = req.with_due_date(due);
                }
                let task = self.controller.create_task(req).await?;
                out.push(format_task(&task, '+'));
            }
            ShellCommand::Select(prefix) => {
                let found = self
                    .controller
                    .collection()
                    .find_by_prefix(&prefix)
                    .map(|t| t.id.clone());
                match found {
                    Ok(id) => {
                        self.controller.select(&id)?;
                        out.extend(self.show());
                    }
                    Err(e) => out.push(format!("error: {e}")),
                }
            }
            ShellCommand::Deselect => self.controller.deselect(),
            ShellCommand::Show => out.extend(self.show()),
            ShellCommand::Title(title) => self.controller.set_title(title)?,
            ShellCommand::Desc(description) => self.controller.set_description(description)?,
            ShellCommand::Priority(priority) => self.controller.set_priority(priority)?,
            ShellCommand::Due(due) => self.controller.set_due_date(due)?,
            ShellCommand::Toggle => self.controller.toggle_status()?,
            ShellCommand::Tag { add: true, tag } => self.controller.add_tag(&tag)?,
            ShellCommand::Tag { add: false, tag } => self.controller.remove_tag(&tag)?,
            ShellCommand::Delete => {
                let id = self
                    .controller
                    .selected()
                    .map(|t| t.id.clone())
                    .ok_or(SyncError::NoSelection)?;
                self.controller.delete_task(&id).await?;
            }
            ShellCommand::Refresh => {
                if self.controller.refresh().await? {
                    out.extend(render_list(&self.controller, None));
                } else {
                    out.push("no changes".to_string());
                }
            }
            ShellCommand::Search(term) => {
                self.controller.search(&term);
                if !term.trim().is_empty() {
                    out.extend(render_list(&self.controller, None));
                }
            }
            ShellCommand::Help => out.extend(HELP.lines().map(String::from)),
            ShellCommand::Quit => {}
        }
        Ok(())
    }

    /// The open task with pending and invalid values marked.
    fn show(&self) -> Vec<String> {
        let Some(task) = self.controller.view() else {
            return vec!["no task selected".to_string()];
        };
        let due = task.due_date.map_or_else(|| "-".to_string(), format_date);
        let mut lines = vec![
            format!("id          {}", task.id),
            self.field_line(Field::Title, &task.title),
            self.field_line(Field::Status, &task.status.to_string()),
            self.field_line(Field::Priority, &task.priority.to_string()),
            self.field_line(Field::DueDate, &due),
            self.field_line(Field::Description, &task.description),
            self.field_line(Field::Tags, &task.tags.join(", ")),
        ];
        if let Some(err) = self.controller.last_error() {
            lines.push(format!("last error  {}", err.message));
        }
        lines
    }

    fn field_line(&self, field: Field, value: &str) -> String {
        let mut line = format!("{:<12}{value}", field.to_string());
        if let Some(err) = self.controller.field_error(field) {
            let _ = write!(line, "  [invalid: {err}]");
        } else if self.controller.is_pending(field) {
            line.push_str("  (saving)");
        }
        line
    }

    fn drain_notices(&mut self) -> Vec<String> {
        self.controller
            .take_notices()
            .into_iter()
            .map(|n| match n.level {
                NoticeLevel::Info => format!("* {}", n.message),
                NoticeLevel::Error => format!("! {}", n.message),
            })
            .collect()
    }
}

async fn write_lines<W: AsyncWrite + Unpin>(output: &mut W, lines: &[String]) -> std::io::Result<()> {
    for line in lines {
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
    }
    output.flush().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::EmbeddedStore;
    use crate::sync::SyncConfig;

    fn shell() -> (Shell<EmbeddedStore>, Arc<EmbeddedStore>) {
        let store = Arc::new(EmbeddedStore::new());
        let (controller, events) = SyncController::new(Arc::clone(&store), SyncConfig::default());
        (Shell::new(controller, events), store)
    }

    #[test]
    fn parses_add_with_markers() {
        assert_eq!(
            parse_command("add Buy milk !high @2030-01-31").unwrap(),
            ShellCommand::Add {
                title: "Buy milk".to_string(),
                priority: TaskPriority::High,
                due: Some(parse_date("2030-01-31").unwrap()),
            }
        );
        assert_eq!(
            parse_command("add  Walk the dog ").unwrap(),
            ShellCommand::Add {
                title: "Walk the dog".to_string(),
                priority: TaskPriority::None,
                due: None,
            }
        );
        assert_eq!(
            parse_command("add !low"),
            Err(CommandError::MissingArgument("add"))
        );
        assert_eq!(
            parse_command("add Thing !urgent"),
            Err(CommandError::InvalidPriority("urgent".to_string()))
        );
    }

    #[test]
    fn parses_edit_commands() {
        assert_eq!(
            parse_command("title Buy oat milk").unwrap(),
            ShellCommand::Title("Buy oat milk".to_string())
        );
        // An empty title is passed through so validation can reject it.
        assert_eq!(
            parse_command("title").unwrap(),
            ShellCommand::Title(String::new())
        );
        assert_eq!(
            parse_command("PRIORITY medium").unwrap(),
            ShellCommand::Priority(TaskPriority::Medium)
        );
        assert_eq!(parse_command("due none").unwrap(), ShellCommand::Due(None));
        assert_eq!(
            parse_command("tag +home").unwrap(),
            ShellCommand::Tag {
                add: true,
                tag: "home".to_string()
            }
        );
        assert_eq!(parse_command("tag home"), Err(CommandError::InvalidTag));
        assert_eq!(
            parse_command("select"),
            Err(CommandError::MissingArgument("select"))
        );
    }

    #[test]
    fn parses_misc() {
        assert_eq!(parse_command("   "), Err(CommandError::Empty));
        assert_eq!(parse_command("q").unwrap(), ShellCommand::Quit);
        assert_eq!(
            parse_command("frobnicate"),
            Err(CommandError::Unknown("frobnicate".to_string()))
        );
    }

    #[test]
    fn dates_are_utc_midnight() {
        assert_eq!(parse_date("1970-01-02").unwrap(), 86_400_000);
        assert_eq!(format_date(86_400_000), "1970-01-02");
        assert!(parse_date("2030-02-30").is_err());
        assert!(parse_date("tomorrow").is_err());
    }

    #[test]
    fn short_ids() {
        assert_eq!(short_id(&TaskId::new("0123456789abcdef")), "01234567");
        assert_eq!(short_id(&TaskId::new("abc")), "abc");
    }

    #[test]
    fn task_line_format() {
        let task = Task {
            id: TaskId::new("0123456789"),
            title: "Buy milk".to_string(),
            status: TaskStatus::Done,
            priority: TaskPriority::High,
            due_date: Some(86_400_000),
            description: String::new(),
            tags: vec!["home".to_string()],
            created_at: 0,
            modified_at: 0,
        };
        assert_eq!(
            format_task(&task, '>'),
            "> 01234567 [x] Buy milk !high @1970-01-02 #home"
        );
    }

    #[tokio::test]
    async fn add_select_and_edit() {
        let (mut shell, store) = shell();
        let out = shell
            .execute(parse_command("add Buy milk !low").unwrap())
            .await;
        assert!(out[0].contains("Buy milk !low"));
        let id = store.tasks()[0].id.clone();

        let out = shell
            .execute(ShellCommand::Select(short_id(&id).to_string()))
            .await;
        assert!(out.iter().any(|l| l.starts_with("title") && l.contains("Buy milk")));

        let out = shell.execute(ShellCommand::Title("ab".to_string())).await;
        assert!(out[0].starts_with("error: invalid value"));
        let out = shell.execute(ShellCommand::Show).await;
        assert!(out.iter().any(|l| l.contains("ab  [invalid")));
    }

    #[tokio::test]
    async fn listing_orders_open_tasks_by_priority() {
        let (mut shell, _store) = shell();
        for line in ["add Low task !low", "add High task !high", "add Plain task"] {
            shell.execute(parse_command(line).unwrap()).await;
        }
        let out = shell.execute(ShellCommand::List).await;
        let titles: Vec<&str> = out
            .iter()
            .map(|l| l.split("] ").nth(1).unwrap_or_default())
            .collect();
        assert_eq!(
            titles,
            vec!["High task !high", "Low task !low", "Plain task"]
        );
    }

    #[tokio::test]
    async fn errors_are_reported_inline() {
        let (mut shell, _store) = shell();
        let out = shell.execute(ShellCommand::Toggle).await;
        assert_eq!(out, vec!["error: no task selected"]);
        let out = shell.execute(ShellCommand::Select("zzz".to_string())).await;
        assert!(out[0].starts_with("error:"));
    }

    #[tokio::test]
    async fn run_flushes_edits_on_exit() {
        let store = Arc::new(EmbeddedStore::new());
        let task = store
            .create_task(CreateTaskRequest::new("Buy milk", TaskPriority::None))
            .await
            .unwrap();
        let (mut controller, events) =
            SyncController::new(Arc::clone(&store), SyncConfig::default());
        controller.refresh().await.unwrap();

        let script = format!("select {}\ntitle Buy oat milk\nquit\n", short_id(&task.id));
        let mut output = Vec::new();
        Shell::new(controller, events)
            .run(script.as_bytes(), &mut output)
            .await
            .unwrap();

        assert_eq!(store.tasks()[0].title, "Buy oat milk");
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("type help for commands"));
    }
}
