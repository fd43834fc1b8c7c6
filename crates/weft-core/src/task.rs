// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Explicit cooperative task queue.
//!
//! Deferred store work is queued here and runs only when the host calls
//! `tick` or `flush` on the environment. A task never preempts another; long
//! work (garbage collection) re-enqueues its continuation so other tasks can
//! run between its batches.
use std::collections::VecDeque;

/// Deferred unit of store work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Run the publish queue and deliver notifications.
    Run,
    /// Execute one garbage-collection batch.
    CollectGarbage,
}

/// FIFO of pending tasks. Each task kind is queued at most once.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `task` unless an identical task is already waiting.
    /// Returns `true` if it was added.
    pub fn schedule(&mut self, task: Task) -> bool {
        if self.tasks.contains(&task) {
            return false;
        }
        self.tasks.push_back(task);
        true
    }

    /// Takes the next task.
    pub fn pop(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    /// Returns `true` if `task` is waiting.
    pub fn contains(&self, task: Task) -> bool {
        self.tasks.contains(&task)
    }

    /// Number of waiting tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
