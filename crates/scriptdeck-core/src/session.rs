//! Execution session state.
//!
//! A session is written by exactly one driver task (see `manager.rs`).
//! Everyone else reads through snapshots, the event broadcast, or the
//! terminal-status watch channel.

use crate::error::{Result, ScriptDeckError};
use crate::types::ScriptDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::sync::{broadcast, watch, RwLock};

/// Capacity of the live event channel per session
const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub type SessionId = String;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Failed
                | SessionStatus::Cancelled
                | SessionStatus::TimedOut
        )
    }

    /// Legal lifecycle edges
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, TimedOut)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One captured line of output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    /// Per-session sequence number, starting at 0 and never reused
    pub seq: u64,
    pub stream: OutputStream,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Fixed-capacity line buffer; the oldest line is evicted when full
#[derive(Debug)]
pub struct OutputBuffer {
    lines: VecDeque<OutputLine>,
    capacity: usize,
    next_seq: u64,
    dropped: u64,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_seq: 0,
            dropped: 0,
        }
    }

    pub fn push(&mut self, stream: OutputStream, text: String) -> OutputLine {
        let line = OutputLine {
            seq: self.next_seq,
            stream,
            text,
            timestamp: Utc::now(),
        };
        self.next_seq += 1;

        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(line.clone());
        line
    }

    pub fn lines(&self) -> Vec<OutputLine> {
        self.lines.iter().cloned().collect()
    }

    /// Buffered lines with a sequence number greater than `seq`
    pub fn lines_after(&self, seq: Option<u64>) -> Vec<OutputLine> {
        match seq {
            None => self.lines(),
            Some(seq) => self
                .lines
                .iter()
                .filter(|l| l.seq > seq)
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lines evicted so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Live events published by a session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Line(OutputLine),
    Finished(SessionStatus),
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    pid: Option<u32>,
    exit_code: Option<i32>,
    error: Option<String>,
    output: OutputBuffer,
}

/// Read-only copy of a session, including buffered output
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub script_id: String,
    pub script_name: String,
    pub script_path: PathBuf,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub output: Vec<OutputLine>,
    pub dropped_lines: u64,
}

impl SessionSnapshot {
    /// Buffered text, one entry per line
    pub fn output_text(&self) -> Vec<&str> {
        self.output.iter().map(|l| l.text.as_str()).collect()
    }
}

/// Session record without output, as kept in history
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub script_name: String,
    pub script_path: PathBuf,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub output_lines: u64,
}

impl SessionSummary {
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.created_at)
    }
}

/// One execution attempt of one script
#[derive(Debug)]
pub struct ExecutionSession {
    id: SessionId,
    script: ScriptDescriptor,
    created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    terminal: watch::Sender<Option<SessionStatus>>,
}

impl ExecutionSession {
    pub fn new(script: ScriptDescriptor, max_output_lines: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (terminal, _) = watch::channel(None);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            script,
            created_at: Utc::now(),
            state: RwLock::new(SessionState {
                status: SessionStatus::Pending,
                started_at: None,
                ended_at: None,
                pid: None,
                exit_code: None,
                error: None,
                output: OutputBuffer::new(max_output_lines),
            }),
            events,
            terminal,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn script(&self) -> &ScriptDescriptor {
        &self.script
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.read().await.status
    }

    /// Terminal status without taking the state lock
    pub fn terminal_status(&self) -> Option<SessionStatus> {
        *self.terminal.borrow()
    }

    pub async fn pid(&self) -> Option<u32> {
        self.state.read().await.pid
    }

    pub async fn mark_running(&self, pid: Option<u32>) -> Result<()> {
        let mut state = self.state.write().await;
        self.check_transition(state.status, SessionStatus::Running)?;
        state.status = SessionStatus::Running;
        state.started_at = Some(Utc::now());
        state.pid = pid;
        Ok(())
    }

    /// Append a line and publish it to live subscribers
    pub async fn push_line(&self, stream: OutputStream, text: String) {
        let mut state = self.state.write().await;
        let line = state.output.push(stream, text);
        // No receivers is fine
        let _ = self.events.send(SessionEvent::Line(line));
    }

    /// Move to a terminal status. Fails if the session already finished or
    /// the edge is not legal.
    pub async fn finish(
        &self,
        status: SessionStatus,
        exit_code: Option<i32>,
        error: Option<String>,
    ) -> Result<()> {
        self.finish_with(status, exit_code, error, |_| {}).await
    }

    /// Like [`finish`](Self::finish), but hands the final summary to `record`
    /// before any waiter can observe the terminal status.
    pub async fn finish_with<F>(
        &self,
        status: SessionStatus,
        exit_code: Option<i32>,
        error: Option<String>,
        record: F,
    ) -> Result<()>
    where
        F: FnOnce(SessionSummary),
    {
        let mut state = self.state.write().await;
        if !status.is_terminal() {
            return Err(self.invalid_state(state.status));
        }
        self.check_transition(state.status, status)?;
        state.status = status;
        state.ended_at = Some(Utc::now());
        state.exit_code = exit_code;
        state.error = error;
        record(self.summary_of(&state));
        let _ = self.events.send(SessionEvent::Finished(status));
        self.terminal.send_replace(Some(status));
        Ok(())
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read().await;
        SessionSnapshot {
            id: self.id.clone(),
            script_id: self.script.id.clone(),
            script_name: self.script.name.clone(),
            script_path: self.script.path.clone(),
            status: state.status,
            created_at: self.created_at,
            started_at: state.started_at,
            ended_at: state.ended_at,
            pid: state.pid,
            exit_code: state.exit_code,
            error: state.error.clone(),
            output: state.output.lines(),
            dropped_lines: state.output.dropped(),
        }
    }

    pub async fn summary(&self) -> SessionSummary {
        let state = self.state.read().await;
        self.summary_of(&state)
    }

    fn summary_of(&self, state: &SessionState) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            script_name: self.script.name.clone(),
            script_path: self.script.path.clone(),
            status: state.status,
            created_at: self.created_at,
            ended_at: state.ended_at,
            exit_code: state.exit_code,
            error: state.error.clone(),
            output_lines: state.output.len() as u64 + state.output.dropped(),
        }
    }

    /// Buffered lines plus a live receiver, taken atomically so nothing is
    /// duplicated or missed between the two. Also returns the terminal status
    /// if the session has already finished.
    pub async fn subscribe(
        &self,
    ) -> (
        Vec<OutputLine>,
        Option<SessionStatus>,
        broadcast::Receiver<SessionEvent>,
    ) {
        let state = self.state.read().await;
        let rx = self.events.subscribe();
        let terminal = Some(state.status).filter(|s| s.is_terminal());
        (state.output.lines(), terminal, rx)
    }

    pub async fn lines_after(&self, seq: Option<u64>) -> Vec<OutputLine> {
        self.state.read().await.output.lines_after(seq)
    }

    /// Wait until the session reaches a terminal status
    pub async fn wait_terminal(&self) -> SessionStatus {
        let mut rx = self.terminal.subscribe();
        let waited = rx.wait_for(|s| s.is_some()).await.map(|s| *s);
        match waited {
            Ok(Some(status)) => status,
            _ => self.status().await,
        }
    }

    fn check_transition(&self, from: SessionStatus, to: SessionStatus) -> Result<()> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(self.invalid_state(from))
        }
    }

    fn invalid_state(&self, status: SessionStatus) -> ScriptDeckError {
        ScriptDeckError::InvalidState {
            id: self.id.clone(),
            status,
        }
    }
}
