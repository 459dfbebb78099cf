//! Three-index task table guarded by the registry's data lock.
//!
//! ```text
//! by_id      BTreeMap<TaskId,    Arc<TaskEntry>>      ordered: mass stop walks it backwards
//! by_thread  HashMap<ThreadUid,  Arc<TaskEntry>>
//! by_name    HashMap<Arc<str>,   Vec<Arc<TaskEntry>>> names are not strictly unique
//! ```
//! Insert and remove always touch all three indices together. Removed tasks
//! leave a [`RetiredTask`] record; at most [`RETIRED_CAPACITY`] are kept,
//! oldest ids are dropped first.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{RegistryError, TaskError};
use crate::tasks::{TaskEntry, TaskId, TaskState, ThreadUid};

pub(crate) const RETIRED_CAPACITY: usize = 1024;

/// Final record of a task removed from the table.
#[derive(Debug, Clone)]
pub struct RetiredTask {
    pub name: Arc<str>,
    pub state: TaskState,
    pub error: Option<TaskError>,
}

#[derive(Debug, Default)]
pub(crate) struct TaskTable {
    pub(crate) by_id: BTreeMap<TaskId, Arc<TaskEntry>>,
    pub(crate) by_thread: HashMap<ThreadUid, Arc<TaskEntry>>,
    pub(crate) by_name: HashMap<Arc<str>, Vec<Arc<TaskEntry>>>,
    pub(crate) retired: BTreeMap<TaskId, RetiredTask>,
    /// Threads currently being auto-enclosed.
    pub(crate) enclosing: HashSet<ThreadUid>,
}

impl TaskTable {
    pub(crate) fn insert(&mut self, entry: Arc<TaskEntry>) -> Result<(), RegistryError> {
        let id = entry.key_id();
        let uid = entry.key_thread();
        if self.by_id.contains_key(&id) {
            return Err(RegistryError::DuplicateTaskId(id));
        }
        if let Some(owner) = self.by_thread.get(&uid) {
            return Err(RegistryError::ThreadCollision {
                uid,
                owner: owner.key_id(),
            });
        }
        self.by_thread.insert(uid, Arc::clone(&entry));
        self.by_name
            .entry(Arc::clone(entry.key_name()))
            .or_default()
            .push(Arc::clone(&entry));
        self.by_id.insert(id, entry);
        Ok(())
    }

    /// Removes `id` from all indices and remembers it as retired.
    pub(crate) fn remove(&mut self, id: TaskId) -> Option<Arc<TaskEntry>> {
        let entry = self.by_id.remove(&id)?;

        let uid = entry.key_thread();
        if self
            .by_thread
            .get(&uid)
            .is_some_and(|e| Arc::ptr_eq(e, &entry))
        {
            self.by_thread.remove(&uid);
        }

        let name = entry.key_name();
        if let Some(list) = self.by_name.get_mut(name) {
            list.retain(|e| !Arc::ptr_eq(e, &entry));
            if list.is_empty() {
                self.by_name.remove(name);
            }
        }

        let (state, error) = match entry.task_inst() {
            Some(inst) => (inst.state(), inst.error()),
            None => (TaskState::Done, None),
        };
        self.retired.insert(
            id,
            RetiredTask {
                name: Arc::clone(name),
                state,
                error,
            },
        );
        while self.retired.len() > RETIRED_CAPACITY {
            self.retired.pop_first();
        }
        Some(entry)
    }

    pub(crate) fn by_name_first(&self, name: &str) -> Option<&Arc<TaskEntry>> {
        self.by_name
            .get(name)
            .and_then(|list| list.iter().find(|e| !e.is_cleaned_up()))
    }

    /// Every entry is reachable through all three indices.
    pub(crate) fn is_consistent(&self) -> bool {
        let by_name_count: usize = self.by_name.values().map(Vec::len).sum();
        self.by_id.len() == self.by_thread.len()
            && self.by_id.len() == by_name_count
            && self.by_id.values().all(|e| {
                self.by_thread
                    .get(&e.key_thread())
                    .is_some_and(|t| Arc::ptr_eq(t, e))
            })
    }
}
