use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Cancel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipTask {
    pub video_path: String,
    pub source_key: String,
    pub line_index: usize,
    pub key: String,
    pub operation: Operation,
    // stamped by put()
    pub seq: u64,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Mutex<HashMap<String, ClipTask>>,
    next_seq: AtomicU64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, ClipTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, mut task: ClipTask) -> u64 {
        task.seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let seq = task.seq;
        self.tasks().insert(task.key.clone(), task);
        seq
    }

    pub fn get(&self, key: &str) -> Option<ClipTask> {
        self.tasks().get(key).cloned()
    }

    pub fn operation(&self, key: &str) -> Option<Operation> {
        self.tasks().get(key).map(|t| t.operation)
    }

    pub fn snapshot(&self) -> HashMap<String, ClipTask> {
        self.tasks().clone()
    }

    pub fn remove_if_current(&self, key: &str, seq: u64) -> bool {
        let mut tasks = self.tasks();
        match tasks.get(key) {
            Some(task) if task.seq == seq => {
                tasks.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }
}
