use std::collections::VecDeque;

use crate::io::ImageArtifact;

// ============================================================================
// HISTORY LOG - Linear undo/redo over immutable scene artifacts
// ============================================================================

/// Default number of scene states kept.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Ordered scene states with a cursor on the active one.
///
/// The history is linear: committing while the cursor is not on the newest
/// state discards everything after it. Only `reset` and `commit` change the
/// number of entries; `undo`/`redo` move the cursor and nothing else.
pub struct HistoryLog {
    entries: VecDeque<ImageArtifact>,
    /// `None` exactly when `entries` is empty.
    cursor: Option<usize>,
    /// Bumped by every `reset`. Requests remember the generation they started
    /// in so a late response can tell the scene was replaced underneath it.
    generation: u64,
    max_entries: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across all entries.
    total_memory: usize,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: None,
            generation: 0,
            max_entries: max_entries.max(1),
            max_memory_bytes: Some(256 * 1024 * 1024), // 256 MB default limit
            total_memory: 0,
        }
    }

    pub fn with_memory_limit(mut self, max_memory_bytes: Option<usize>) -> Self {
        self.max_memory_bytes = max_memory_bytes;
        self
    }

    /// Start over from a single scene, or from nothing.
    pub fn reset(&mut self, initial: Option<ImageArtifact>) {
        self.entries.clear();
        self.total_memory = 0;
        self.generation = self.generation.wrapping_add(1);
        match initial {
            Some(artifact) => {
                self.total_memory = artifact.memory_size();
                self.entries.push_back(artifact);
                self.cursor = Some(0);
            }
            None => self.cursor = None,
        }
    }

    /// Make `artifact` the new current state, dropping any redo branch.
    pub fn commit(&mut self, artifact: ImageArtifact) {
        // Discard states after the cursor
        let keep = self.cursor.map_or(0, |c| c + 1);
        for dropped in self.entries.drain(keep..) {
            self.total_memory = self.total_memory.saturating_sub(dropped.memory_size());
        }

        self.total_memory += artifact.memory_size();
        self.entries.push_back(artifact);
        self.cursor = Some(self.entries.len() - 1);

        self.prune();
    }

    pub fn undo(&mut self) -> bool {
        match self.cursor {
            Some(c) if c > 0 => {
                self.cursor = Some(c - 1);
                true
            }
            _ => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.cursor {
            Some(c) if c + 1 < self.entries.len() => {
                self.cursor = Some(c + 1);
                true
            }
            _ => false,
        }
    }

    /// Undo `steps` times, stopping early at the oldest state.
    pub fn undo_to(&mut self, steps: usize) -> usize {
        (0..steps).take_while(|_| self.undo()).count()
    }

    pub fn current(&self) -> Option<&ImageArtifact> {
        self.cursor.and_then(|c| self.entries.get(c))
    }

    pub fn can_undo(&self) -> bool {
        self.cursor.is_some_and(|c| c > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.cursor.is_some_and(|c| c + 1 < self.entries.len())
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entries(&self) -> impl Iterator<Item = &ImageArtifact> {
        self.entries.iter()
    }

    /// Name of the state that `undo` would step away from.
    pub fn undo_description(&self) -> Option<&str> {
        if self.can_undo() {
            self.current().map(|a| a.filename())
        } else {
            None
        }
    }

    /// Name of the state that `redo` would restore.
    pub fn redo_description(&self) -> Option<&str> {
        let next = self.cursor? + 1;
        self.entries.get(next).map(|a| a.filename())
    }

    pub fn undo_count(&self) -> usize {
        self.cursor.unwrap_or(0)
    }

    pub fn redo_count(&self) -> usize {
        self.cursor.map_or(0, |c| self.entries.len() - c - 1)
    }

    /// Current memory usage of the history (O(1) via cached total)
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    /// Drop the oldest states to stay within limits. Never drops the current
    /// state, which after a commit is always the newest.
    fn prune(&mut self) {
        while self.entries.len() > self.max_entries && self.pop_oldest() {}

        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.pop_oldest() {}
        }
    }

    fn pop_oldest(&mut self) -> bool {
        match self.cursor {
            Some(c) if c > 0 => {
                if let Some(removed) = self.entries.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                    log::info!("History limit reached, dropped {}", removed.filename());
                }
                self.cursor = Some(c - 1);
                true
            }
            _ => false,
        }
    }
}
