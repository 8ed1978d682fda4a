//! Session table and bounded history

use crate::session::{ExecutionSession, SessionSummary};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Live session plus the token that scopes its process
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session: Arc<ExecutionSession>,
    pub cancel: CancellationToken,
}

/// Concurrent session table.
///
/// Terminal sessions stay queryable until cleaned up or until more than
/// `history_limit` of them are retained, at which point the oldest are
/// evicted. Summaries of finished sessions are kept separately.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, SessionHandle>,
    history: Mutex<VecDeque<SessionSummary>>,
    finished: Mutex<VecDeque<String>>,
    history_limit: usize,
}

impl SessionStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            finished: Mutex::new(VecDeque::new()),
            history_limit: history_limit.max(1),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions
            .insert(handle.session.id().to_string(), handle);
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<SessionHandle> {
        let removed = self.sessions.remove(id).map(|(_, handle)| handle);
        if removed.is_some() {
            lock(&self.finished).retain(|f| f != id);
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Record a session that reached a terminal state
    pub fn record_finished(&self, summary: SessionSummary) {
        let id = summary.id.clone();
        {
            let mut history = lock(&self.history);
            history.push_front(summary);
            history.truncate(self.history_limit);
        }

        let evicted: Vec<String> = {
            let mut finished = lock(&self.finished);
            if self.sessions.contains_key(&id) {
                finished.push_back(id);
            }
            let excess = finished.len().saturating_sub(self.history_limit);
            finished.drain(..excess).collect()
        };
        for old in evicted {
            debug!("Evicting finished session {}", old);
            self.sessions.remove(&old);
        }
    }

    /// Most recent terminal sessions, newest first
    pub fn history(&self, limit: usize) -> Vec<SessionSummary> {
        lock(&self.history).iter().take(limit).cloned().collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
