//! Background context enhancement (§4.8). Project/session context is
//! extracted asynchronously off the request's hot path and injected into
//! later turns' system prompts. Grounded on the Python original's
//! `AsyncContextManager`/`AsyncSummaryManager`: a bounded pending-task map
//! keyed by session id with "latest wins" semantics — starting a new
//! extraction for a session that already has one in flight simply lets the
//! old task keep running and ignores the new request rather than queuing.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::JoinHandle;

/// Cached enhancement text for a session, plus the turn count it was built
/// at so callers can decide whether it's due for a refresh (§4.8
/// `update_interval_messages`).
#[derive(Debug, Clone, Default)]
pub struct ContextEntry {
    pub text: String,
    pub built_at_message_count: usize,
}

#[derive(Default)]
struct Stats {
    started: u64,
    completed: u64,
    dropped_pending_full: u64,
}

/// Tracks in-flight and completed background context-extraction tasks for
/// up to `max_pending_tasks` sessions at a time.
pub struct ContextManager {
    max_pending_tasks: usize,
    entries: Mutex<HashMap<String, ContextEntry>>,
    pending: Mutex<HashMap<String, JoinHandle<()>>>,
    stats: Mutex<Stats>,
}

impl ContextManager {
    pub fn new(max_pending_tasks: usize) -> Self {
        Self {
            max_pending_tasks,
            entries: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            stats: Mutex::new(Stats::default()),
        }
    }

    pub fn get(&self, session_id: &str) -> Option<ContextEntry> {
        self.entries.lock().expect("context entries mutex poisoned").get(session_id).cloned()
    }

    /// Whether the cached entry for `session_id` is due for a refresh given
    /// the current message count and refresh interval.
    pub fn is_stale(&self, session_id: &str, current_message_count: usize, update_interval: usize) -> bool {
        match self.get(session_id) {
            Some(entry) => current_message_count.saturating_sub(entry.built_at_message_count) >= update_interval,
            None => true,
        }
    }

    /// Spawns `extractor` as a background task for `session_id` unless one
    /// is already running for that session, or the pending-task table is
    /// full ("latest wins": an in-flight extraction is never cancelled or
    /// superseded, and a full table drops the new request rather than
    /// blocking the caller).
    pub fn spawn_extraction<F>(&self, session_id: String, extractor: F)
    where
        F: std::future::Future<Output = ContextEntry> + Send + 'static,
    {
        let mut pending = self.pending.lock().expect("pending mutex poisoned");
        self.sweep_done(&mut pending);

        if pending.contains_key(&session_id) {
            return;
        }
        if pending.len() >= self.max_pending_tasks {
            self.stats.lock().expect("stats mutex poisoned").dropped_pending_full += 1;
            return;
        }

        self.stats.lock().expect("stats mutex poisoned").started += 1;

        let entries = self.entries_handle();
        let stats = self.stats_handle();
        let session_id_for_task = session_id.clone();
        let handle = tokio::spawn(async move {
            let result = extractor.await;
            entries.lock().expect("context entries mutex poisoned").insert(session_id_for_task, result);
            stats.lock().expect("stats mutex poisoned").completed += 1;
        });

        pending.insert(session_id, handle);
    }

    fn sweep_done(&self, pending: &mut HashMap<String, JoinHandle<()>>) {
        pending.retain(|_, handle| !handle.is_finished());
    }

    fn entries_handle(&self) -> &Mutex<HashMap<String, ContextEntry>> {
        &self.entries
    }

    fn stats_handle(&self) -> &Mutex<Stats> {
        &self.stats
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending mutex poisoned").len()
    }

    pub fn stats_snapshot(&self) -> (u64, u64, u64) {
        let stats = self.stats.lock().expect("stats mutex poisoned");
        (stats.started, stats.completed, stats.dropped_pending_full)
    }
}

/// Builds the system-prompt injection text for a given context entry,
/// truncated to `max_tokens`-worth of characters as a cheap proxy (exact
/// token counting happens downstream via [`crate::token`]).
pub fn build_injection_text(entry: &ContextEntry, max_chars: usize) -> String {
    let truncated: String = entry.text.chars().take(max_chars).collect();
    if truncated.is_empty() {
        String::new()
    } else {
        format!("\n\n<project_context>\n{truncated}\n</project_context>")
    }
}
