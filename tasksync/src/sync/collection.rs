//! Canonical client-side task collection.
//!
//! [`TaskCollection`] is a mapping `id -> Task` plus the "selected task"
//! pointer. Display order is never stored: [`TaskCollection::project`]
//! computes a filtered, sorted view on every iteration. Entries remember
//! their insertion sequence so ties sort stably.

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use tasksync_proto::task::{Task, TaskId, TaskStatus};

/// Errors from collection operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectionError {
    /// A task with this id is already present.
    #[error("duplicate task id: {0}")]
    DuplicateId(TaskId),

    /// No task with this id (or id prefix).
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The id prefix matches more than one task.
    #[error("ambiguous task id prefix: {0}")]
    Ambiguous(String),
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    task: Task,
}

/// The canonical task map and selection pointer.
#[derive(Debug, Default)]
pub struct TaskCollection {
    entries: HashMap<TaskId, Entry>,
    next_seq: u64,
    selected: Option<TaskId>,
}

impl TaskCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a newly created task.
    ///
    /// # Errors
    ///
    /// [`CollectionError::DuplicateId`] if the id is already present; the
    /// existing entry is kept.
    pub fn apply_create(&mut self, task: Task) -> Result<(), CollectionError> {
        if self.entries.contains_key(&task.id) {
            return Err(CollectionError::DuplicateId(task.id));
        }
        self.insert(task);
        Ok(())
    }

    /// Replaces the entry for `task.id`.
    ///
    /// Returns `false` (and changes nothing) if the id is unknown, so a late
    /// response cannot resurrect a deleted task.
    pub fn apply_update(&mut self, task: Task) -> bool {
        match self.entries.get_mut(&task.id) {
            Some(entry) => {
                entry.task = task;
                true
            }
            None => {
                tracing::debug!(task_id = %task.id, "ignoring update for unknown task");
                false
            }
        }
    }

    /// Removes a task, clearing the selection if it pointed at it.
    pub fn apply_delete(&mut self, id: &TaskId) -> Option<Task> {
        let removed = self.entries.remove(id)?;
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
        Some(removed.task)
    }

    /// Merges a full listing from the store.
    ///
    /// Known ids keep their position, new ids are appended in listing
    /// order, and ids missing from the listing are removed. `overlay` runs
    /// on every incoming task before it is stored so optimistic values
    /// survive the refresh.
    pub fn apply_snapshot(&mut self, tasks: Vec<Task>, overlay: impl Fn(&mut Task)) {
        let incoming: std::collections::HashSet<TaskId> =
            tasks.iter().map(|t| t.id.clone()).collect();
        let stale: Vec<TaskId> = self
            .entries
            .keys()
            .filter(|id| !incoming.contains(*id))
            .cloned()
            .collect();
        for id in &stale {
            self.apply_delete(id);
        }

        let mut added = 0_usize;
        for mut task in tasks {
            overlay(&mut task);
            if let Some(entry) = self.entries.get_mut(&task.id) {
                entry.task = task;
            } else {
                self.insert(task);
                added += 1;
            }
        }
        tracing::debug!(
            added,
            removed = stale.len(),
            total = self.entries.len(),
            "applied snapshot"
        );
    }

    /// Points the selection at `id`.
    ///
    /// # Errors
    ///
    /// [`CollectionError::NotFound`] if the id is unknown; the selection is
    /// left unchanged.
    pub fn select(&mut self, id: &TaskId) -> Result<&Task, CollectionError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| CollectionError::NotFound(id.clone()))?;
        self.selected = Some(id.clone());
        Ok(&entry.task)
    }

    /// Clears the selection.
    pub fn deselect(&mut self) {
        self.selected = None;
    }

    /// The selected task, always resolved through the canonical map.
    #[must_use]
    pub fn selected(&self) -> Option<&Task> {
        self.selected
            .as_ref()
            .and_then(|id| self.entries.get(id))
            .map(|e| &e.task)
    }

    /// The id of the selected task.
    #[must_use]
    pub const fn selected_id(&self) -> Option<&TaskId> {
        self.selected.as_ref()
    }

    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.entries.get(id).map(|e| &e.task)
    }

    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.entries.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves a unique id prefix to a task.
    ///
    /// An exact id match wins even if it is also a prefix of other ids.
    ///
    /// # Errors
    ///
    /// [`CollectionError::NotFound`] if nothing matches,
    /// [`CollectionError::Ambiguous`] if several tasks match.
    pub fn find_by_prefix(&self, prefix: &str) -> Result<&Task, CollectionError> {
        if let Some(entry) = self.entries.get(&TaskId::new(prefix)) {
            return Ok(&entry.task);
        }
        let mut matches = self
            .entries
            .values()
            .filter(|e| e.task.id.as_str().starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(entry), None) => Ok(&entry.task),
            (None, _) => Err(CollectionError::NotFound(TaskId::new(prefix))),
            (Some(_), Some(_)) => Err(CollectionError::Ambiguous(prefix.to_string())),
        }
    }

    /// The task whose title best matches `pattern`: the shortest matching
    /// title, earliest inserted on ties.
    #[must_use]
    pub fn best_match(&self, pattern: &Regex) -> Option<&Task> {
        self.entries
            .values()
            .filter(|e| pattern.is_match(&e.task.title))
            .min_by_key(|e| (e.task.title.chars().count(), e.seq))
            .map(|e| &e.task)
    }

    /// A filtered, ordered view over the current tasks.
    ///
    /// Nothing is computed until the projection is iterated, and every
    /// iteration reflects the collection as it is at that moment. Ties
    /// under `order` keep insertion order.
    pub fn project<F, O>(&self, filter: F, order: O) -> Projection<'_, F, O>
    where
        F: Fn(&Task) -> bool,
        O: Fn(&Task, &Task) -> Ordering,
    {
        Projection {
            entries: &self.entries,
            filter,
            order,
        }
    }

    fn insert(&mut self, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(task.id.clone(), Entry { seq, task });
    }
}

/// A lazily computed, restartable view over a [`TaskCollection`].
pub struct Projection<'a, F, O> {
    entries: &'a HashMap<TaskId, Entry>,
    filter: F,
    order: O,
}

impl<'a, F, O> Projection<'a, F, O>
where
    F: Fn(&Task) -> bool,
    O: Fn(&Task, &Task) -> Ordering,
{
    /// Filters and sorts the current entries.
    #[must_use]
    pub fn iter(&self) -> std::vec::IntoIter<&'a Task> {
        let mut selected: Vec<&'a Entry> = self
            .entries
            .values()
            .filter(|e| (self.filter)(&e.task))
            .collect();
        selected.sort_by(|a, b| (self.order)(&a.task, &b.task).then(a.seq.cmp(&b.seq)));
        selected
            .into_iter()
            .map(|e| &e.task)
            .collect::<Vec<_>>()
            .into_iter()
    }
}

impl<'p, 'a, F, O> IntoIterator for &'p Projection<'a, F, O>
where
    F: Fn(&Task) -> bool,
    O: Fn(&Task, &Task) -> Ordering,
{
    type Item = &'a Task;
    type IntoIter = std::vec::IntoIter<&'a Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Higher priority first (HIGH, MEDIUM, LOW, NONE).
#[must_use]
pub fn by_priority_desc(a: &Task, b: &Task) -> Ordering {
    b.priority.rank().cmp(&a.priority.rank())
}

/// Keeps insertion order.
#[must_use]
pub const fn insertion_order(_: &Task, _: &Task) -> Ordering {
    Ordering::Equal
}

/// Filter accepting every task.
#[must_use]
pub const fn any_task(_: &Task) -> bool {
    true
}

/// Filter accepting tasks with the given status.
pub fn with_status(status: TaskStatus) -> impl Fn(&Task) -> bool {
    move |task| task.status == status
}

/// Compiles a case-insensitive title search.
///
/// Terms that are not valid regular expressions are matched literally.
/// Returns `None` for a blank term.
#[must_use]
pub fn search_pattern(term: &str) -> Option<Regex> {
    if term.trim().is_empty() {
        return None;
    }
    RegexBuilder::new(term)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(term))
                .case_insensitive(true)
                .build()
        })
        .ok()
}
