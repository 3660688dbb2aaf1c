//! Priority queue of pending tasks.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::core::task::{Task, TaskId, TaskPriority};

/// Heap entry. Higher priority first, then lower sequence first.
#[derive(Debug, Clone, Copy)]
pub struct QueueEntry {
    pub priority: TaskPriority,
    pub sequence: u64,
    pub task_id: TaskId,
}

impl QueueEntry {
    pub fn for_task(task: &Task) -> Self {
        Self {
            priority: task.priority,
            sequence: task.sequence,
            task_id: task.id,
        }
    }
}

// Sequences are unique per scheduler, so (priority, sequence) identifies
// an entry.
impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// What to do with an entry when looking for the next task to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Hand it out.
    Ready,
    /// Keep it queued; look further down.
    Blocked,
    /// Drop it; the task is no longer pending.
    Discard,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: QueueEntry) {
        self.heap.push(entry);
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }

    /// Pop the best entry `check` accepts.
    ///
    /// Blocked entries are put back untouched, so they keep their place
    /// for later calls.
    pub fn pop_ready<F>(&mut self, mut check: F) -> Option<QueueEntry>
    where
        F: FnMut(&QueueEntry) -> Readiness,
    {
        let mut blocked = Vec::new();
        let mut found = None;
        while let Some(entry) = self.heap.pop() {
            match check(&entry) {
                Readiness::Ready => {
                    found = Some(entry);
                    break;
                }
                Readiness::Blocked => blocked.push(entry),
                Readiness::Discard => {}
            }
        }
        self.heap.extend(blocked);
        found
    }

    /// Drop the entry for `task_id`, if queued.
    pub fn remove(&mut self, task_id: TaskId) -> bool {
        let before = self.heap.len();
        self.heap.retain(|entry| entry.task_id != task_id);
        self.heap.len() != before
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
