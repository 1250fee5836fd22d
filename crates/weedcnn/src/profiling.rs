//! Stage timing hooks for the forward pass.
//!
//! A [`crate::model::Cnn`] reports every pipeline stage to a [`StageHook`]. The default
//! [`NoopHook`] costs one virtual call per stage; [`TimerTree`] aggregates the stages into a
//! hierarchy of mean timings that can be rendered as an indented report or flattened into
//! [`TimerRow`]s.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Receives stage boundaries. Implementations must tolerate being shared across threads: networks
/// derived from one master share its hook and may run concurrently.
pub trait StageHook: Send + Sync {
    fn enter(&self, stage: &str);

    fn exit(&self, stage: &str, elapsed: Duration);

    /// Free-form annotation for the innermost active stage.
    fn note(&self, _note: &str) {}
}

/// Hook that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl StageHook for NoopHook {
    #[inline(always)]
    fn enter(&self, _stage: &str) {}

    #[inline(always)]
    fn exit(&self, _stage: &str, _elapsed: Duration) {}
}

/// RAII guard that reports `exit` with the elapsed time when dropped.
pub struct ScopeGuard<'a> {
    hook: &'a dyn StageHook,
    name: &'a str,
    start: Instant,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.hook.exit(self.name, self.start.elapsed());
    }
}

/// Opens a stage on `hook`; the stage closes when the returned guard drops.
#[inline]
pub fn stage_scope<'a>(hook: &'a dyn StageHook, name: &'a str) -> ScopeGuard<'a> {
    hook.enter(name);
    ScopeGuard {
        hook,
        name,
        start: Instant::now(),
    }
}

#[derive(Debug, Clone)]
struct TimerNode {
    name: String,
    note: Option<String>,
    parent: Option<usize>,
    children: Vec<usize>,
    calls: u64,
    total: Duration,
}

#[derive(Debug, Default)]
struct TimerState {
    nodes: Vec<TimerNode>,
    roots: Vec<usize>,
    /// Open stages per calling thread, innermost last.
    active: HashMap<ThreadId, Vec<usize>>,
}

impl TimerState {
    fn child_named(&mut self, thread: ThreadId, name: &str) -> usize {
        let parent = self.active.get(&thread).and_then(|stack| stack.last().copied());
        let siblings = match parent {
            Some(parent) => &self.nodes[parent].children,
            None => &self.roots,
        };
        if let Some(&existing) = siblings.iter().find(|&&id| self.nodes[id].name == name) {
            return existing;
        }
        let id = self.nodes.len();
        self.nodes.push(TimerNode {
            name: name.to_string(),
            note: None,
            parent,
            children: Vec::new(),
            calls: 0,
            total: Duration::ZERO,
        });
        match parent {
            Some(parent) => self.nodes[parent].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    fn path(&self, mut id: usize) -> String {
        let mut parts = vec![self.nodes[id].name.as_str()];
        while let Some(parent) = self.nodes[id].parent {
            parts.push(self.nodes[parent].name.as_str());
            id = parent;
        }
        parts.reverse();
        parts.join("/")
    }

    fn visit(&self, id: usize, depth: usize, rows: &mut Vec<TimerRow>) {
        let node = &self.nodes[id];
        let total_ms = node.total.as_secs_f64() * 1e3;
        rows.push(TimerRow {
            path: self.path(id),
            name: node.name.clone(),
            depth,
            calls: node.calls,
            mean_ms: if node.calls == 0 {
                0.0
            } else {
                total_ms / node.calls as f64
            },
            total_ms,
            note: node.note.clone(),
        });
        for &child in &node.children {
            self.visit(child, depth + 1, rows);
        }
    }
}

/// One flattened timer entry, in depth-first order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerRow {
    pub path: String,
    pub name: String,
    pub depth: usize,
    pub calls: u64,
    pub mean_ms: f64,
    pub total_ms: f64,
    pub note: Option<String>,
}

/// Hierarchical stage timer. Re-entering a stage under the same parent reuses its node, so
/// repeated forward passes accumulate into a mean per stage.
///
/// Nesting is tracked per thread, so networks on different threads can report into one tree.
#[derive(Debug, Default)]
pub struct TimerTree {
    state: Mutex<TimerState>,
}

impl TimerTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Depth-first snapshot of every recorded stage.
    pub fn rows(&self) -> Vec<TimerRow> {
        let state = self.lock();
        let mut rows = Vec::with_capacity(state.nodes.len());
        for &root in &state.roots {
            state.visit(root, 0, &mut rows);
        }
        rows
    }

    /// Indented text report, two spaces per level.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for row in self.rows() {
            let _ = write!(
                out,
                "{:indent$}{}: {:.3} ms mean over {} call(s)",
                "",
                row.name,
                row.mean_ms,
                row.calls,
                indent = row.depth * 2
            );
            if let Some(note) = &row.note {
                let _ = write!(out, " [{note}]");
            }
            out.push('\n');
        }
        out
    }

    pub fn reset(&self) {
        *self.lock() = TimerState::default();
    }
}

impl StageHook for TimerTree {
    fn enter(&self, stage: &str) {
        let thread = thread::current().id();
        let mut state = self.lock();
        let id = state.child_named(thread, stage);
        state.active.entry(thread).or_default().push(id);
    }

    fn exit(&self, stage: &str, elapsed: Duration) {
        let thread = thread::current().id();
        let mut state = self.lock();
        let Some(stack) = state.active.get_mut(&thread) else {
            return;
        };
        let Some(id) = stack.pop() else {
            return;
        };
        if stack.is_empty() {
            state.active.remove(&thread);
        }
        // Mismatched names mean a guard outlived its parent; drop the sample.
        if state.nodes[id].name != stage {
            return;
        }
        let node = &mut state.nodes[id];
        node.calls = node.calls.saturating_add(1);
        node.total = node.total.saturating_add(elapsed);
    }

    fn note(&self, note: &str) {
        let thread = thread::current().id();
        let mut state = self.lock();
        let Some(&id) = state.active.get(&thread).and_then(|stack| stack.last()) else {
            return;
        };
        let node = &mut state.nodes[id];
        if node.note.as_deref() != Some(note) {
            node.note = Some(note.to_string());
        }
    }
}
