//! Session manager: launches scripts and supervises their processes.
//!
//! Every execution gets its own driver task. The driver is the only writer
//! of its session; it spawns the process in its own process group, drains
//! stdout and stderr on separate tasks, and races process exit against the
//! deadline and the session's cancellation token. Expiry and cancellation
//! both go through the same SIGTERM, grace window, SIGKILL sequence.

use crate::error::{Result, ScriptDeckError};
use crate::interpreter;
use crate::policy::SecurityPolicy;
use crate::session::{
    ExecutionSession, OutputLine, OutputStream, SessionEvent, SessionId, SessionSnapshot,
    SessionStatus, SessionSummary,
};
use crate::store::{SessionHandle, SessionStore};
use crate::types::ScriptDescriptor;
use crate::validator::PathValidator;
use futures::Stream;
use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Time a process gets between SIGTERM and SIGKILL
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Finished sessions kept in history
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// How long to wait for the pipes to close after the process is gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Pipes still open this long after a killed leader mean group members survived
const SURVIVOR_WINDOW: Duration = Duration::from_millis(100);

/// Longest output line kept in one piece; longer runs are split
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct SessionManager {
    policy: Arc<SecurityPolicy>,
    validator: PathValidator,
    store: Arc<SessionStore>,
    scope: CancellationToken,
    grace_period: Duration,
}

impl SessionManager {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self {
            validator: PathValidator::new(policy.clone()),
            policy,
            store: Arc::new(SessionStore::new(DEFAULT_HISTORY_LIMIT)),
            scope: CancellationToken::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.store = Arc::new(SessionStore::new(limit));
        self
    }

    /// Share an existing session table
    pub fn with_store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = store;
        self
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Start executing `script` and return the new session id.
    ///
    /// The path is validated before anything else; a rejected script
    /// creates no session. Must be called from within a tokio runtime.
    pub fn execute_script(&self, script: &ScriptDescriptor) -> Result<SessionId> {
        let resolved = self.validator.validate_file(&script.path)?;
        let mut script = script.clone();
        script.path = resolved;

        let session = Arc::new(ExecutionSession::new(
            script,
            self.policy.max_output_lines(),
        ));
        let cancel = self.scope.child_token();
        let id = session.id().to_string();

        self.store.insert(SessionHandle {
            session: session.clone(),
            cancel: cancel.clone(),
        });
        info!("Created session {} for {}", id, session.script().name);

        let driver = Driver {
            session,
            cancel,
            store: self.store.clone(),
            policy: self.policy.clone(),
            grace_period: self.grace_period,
        };
        tokio::spawn(driver.run());

        Ok(id)
    }

    pub async fn get_execution_status(&self, id: &str) -> Result<SessionSnapshot> {
        Ok(self.handle(id)?.session.snapshot().await)
    }

    /// Buffered output followed by live lines until the session ends
    pub async fn stream_output(
        &self,
        id: &str,
    ) -> Result<impl Stream<Item = OutputLine> + Send + 'static> {
        let session = self.handle(id)?.session;
        let (replay, terminal, rx) = session.subscribe().await;

        let state = OutputFollower {
            seen: replay.last().map(|l| l.seq),
            pending: replay.into(),
            session,
            rx,
            done: terminal.is_some(),
        };
        Ok(futures::stream::unfold(state, |mut follower| async move {
            let line = follower.next_line().await?;
            Some((line, follower))
        }))
    }

    /// Terminate a running session and return its final state
    pub async fn cancel_execution(&self, id: &str) -> Result<SessionSnapshot> {
        let handle = self.handle(id)?;
        let status = handle.session.status().await;
        if status != SessionStatus::Running {
            return Err(ScriptDeckError::InvalidState {
                id: id.to_string(),
                status,
            });
        }

        info!("Cancelling session {}", id);
        handle.cancel.cancel();
        handle.session.wait_terminal().await;
        Ok(handle.session.snapshot().await)
    }

    /// Most recent finished sessions, newest first
    pub fn get_execution_history(&self, limit: usize) -> Vec<SessionSummary> {
        self.store.history(limit)
    }

    /// Drop a session, terminating its process if it is still running
    pub fn cleanup_session(&self, id: &str) -> Result<()> {
        let handle = self
            .store
            .remove(id)
            .ok_or_else(|| ScriptDeckError::NotFound(format!("session {}", id)))?;
        handle.cancel.cancel();
        debug!("Cleaned up session {}", id);
        Ok(())
    }

    pub async fn wait_for_completion(&self, id: &str) -> Result<SessionSnapshot> {
        let session = self.handle(id)?.session;
        session.wait_terminal().await;
        Ok(session.snapshot().await)
    }

    /// Summaries of every session still in the table
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut sessions = Vec::new();
        for handle in self.store.handles() {
            sessions.push(handle.session.summary().await);
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Cancel every session and wait for all of them to finish
    pub async fn shutdown(&self) {
        let handles = self.store.handles();
        info!("Shutting down {} sessions", handles.len());
        self.scope.cancel();
        futures::future::join_all(handles.iter().map(|h| h.session.wait_terminal())).await;
    }

    fn handle(&self, id: &str) -> Result<SessionHandle> {
        self.store
            .get(id)
            .ok_or_else(|| ScriptDeckError::NotFound(format!("session {}", id)))
    }
}

enum Wake {
    Exited(std::io::Result<ExitStatus>),
    Deadline,
    Cancelled,
}

/// How the wait on the process ended
enum Ended {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(std::io::Result<ExitStatus>),
    Cancelled(std::io::Result<ExitStatus>),
}

struct Outcome {
    status: SessionStatus,
    exit_code: Option<i32>,
    error: Option<String>,
}

impl Outcome {
    fn failed(exit_code: Option<i32>, error: String) -> Self {
        Self {
            status: SessionStatus::Failed,
            exit_code,
            error: Some(error),
        }
    }
}

struct Driver {
    session: Arc<ExecutionSession>,
    cancel: CancellationToken,
    store: Arc<SessionStore>,
    policy: Arc<SecurityPolicy>,
    grace_period: Duration,
}

impl Driver {
    async fn run(self) {
        let outcome = self.execute().await;
        let id = self.session.id();

        if let Some(err) = &outcome.error {
            debug!("Session {}: {}", id, err);
        }
        // History is written before waiters on the terminal status wake
        let store = &self.store;
        match self
            .session
            .finish_with(outcome.status, outcome.exit_code, outcome.error, |summary| {
                store.record_finished(summary)
            })
            .await
        {
            Ok(()) => info!(
                "Session {} finished: {} (exit code {:?})",
                id, outcome.status, outcome.exit_code
            ),
            Err(e) => error!("Session {} could not finish: {}", id, e),
        }
    }

    async fn execute(&self) -> Outcome {
        let script = self.session.script();
        if self.cancel.is_cancelled() {
            return Outcome {
                status: SessionStatus::Cancelled,
                exit_code: None,
                error: None,
            };
        }

        let plan = match interpreter::resolve(script) {
            Ok(plan) => plan,
            Err(e) => return Outcome::failed(None, e.to_string()),
        };
        self.warn_restricted(script).await;

        let mut command = Command::new(&plan.program);
        command
            .args(&plan.args)
            .current_dir(script.directory())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Outcome::failed(
                    None,
                    format!("failed to start {}: {}", plan.program.display(), e),
                )
            }
        };
        let pid = child.id();
        if let Err(e) = self.session.mark_running(pid).await {
            error!("Session {}: {}", self.session.id(), e);
        }
        info!(
            "Session {} running {} (pid {:?})",
            self.session.id(),
            script.name,
            pid
        );

        let mut drains = Vec::new();
        if let Some(out) = child.stdout.take() {
            drains.push(self.spawn_drain(out, OutputStream::Stdout));
        }
        if let Some(err) = child.stderr.take() {
            drains.push(self.spawn_drain(err, OutputStream::Stderr));
        }

        let limit = self.policy.max_execution_time();
        let wake = tokio::select! {
            res = child.wait() => Wake::Exited(res),
            _ = tokio::time::sleep(limit) => Wake::Deadline,
            _ = self.cancel.cancelled() => Wake::Cancelled,
        };
        let ended = match wake {
            Wake::Exited(res) => Ended::Exited(res),
            Wake::Deadline => {
                warn!(
                    "Session {} hit its {}s limit",
                    self.session.id(),
                    limit.as_secs()
                );
                Ended::TimedOut(self.terminate(&mut child, pid).await)
            }
            Wake::Cancelled => Ended::Cancelled(self.terminate(&mut child, pid).await),
        };

        let terminated = !matches!(ended, Ended::Exited(_));
        let mut swept = false;
        for mut drain in drains {
            if terminated && !swept {
                if tokio::time::timeout(SURVIVOR_WINDOW, &mut drain).await.is_ok() {
                    continue;
                }
                // Someone in the group still holds the pipe, so the group id is still ours
                swept = true;
                #[cfg(unix)]
                if let Some(pid) = pid {
                    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                }
            }
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut drain).await.is_err() {
                warn!(
                    "Session {}: output pipe still open after exit, abandoning it",
                    self.session.id()
                );
                drain.abort();
            }
        }

        classify(ended, limit)
    }

    /// SIGTERM the process group, then SIGKILL if it outlives the grace window
    async fn terminate(&self, child: &mut Child, pid: Option<u32>) -> std::io::Result<ExitStatus> {
        #[cfg(unix)]
        if let Some(pid) = pid {
            signal_group(pid, nix::sys::signal::Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        let _ = child.start_kill();

        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(res) => res,
            Err(_) => {
                warn!(
                    "Session {} ignored SIGTERM for {:?}, killing",
                    self.session.id(),
                    self.grace_period
                );
                #[cfg(unix)]
                if let Some(pid) = pid {
                    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                }
                let _ = child.start_kill();
                child.wait().await
            }
        }
    }

    fn spawn_drain<R>(&self, reader: R, stream: OutputStream) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let session = self.session.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = Vec::new();
            // Set after a forced split, so a newline right at the cut adds no empty line
            let mut split = false;
            loop {
                let (used, newline) = match reader.fill_buf().await {
                    Ok([]) => break,
                    Ok(chunk) => {
                        let room = MAX_LINE_BYTES - line.len();
                        let window = &chunk[..chunk.len().min(room)];
                        match window.iter().position(|b| *b == b'\n') {
                            Some(i) => {
                                line.extend_from_slice(&window[..i]);
                                (i + 1, true)
                            }
                            None => {
                                line.extend_from_slice(window);
                                (window.len(), false)
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Session {}: {:?} read failed: {}", session.id(), stream, e);
                        break;
                    }
                };
                reader.consume(used);
                if newline && line.is_empty() && split {
                    split = false;
                } else if newline || line.len() >= MAX_LINE_BYTES {
                    session.push_line(stream, line_text(&line)).await;
                    line.clear();
                    split = !newline;
                }
            }
            if !line.is_empty() {
                session.push_line(stream, line_text(&line)).await;
            }
        })
    }

    async fn warn_restricted(&self, script: &ScriptDescriptor) {
        if self.policy.restricted_commands().is_empty() {
            return;
        }
        let Ok(content) = tokio::fs::read_to_string(&script.path).await else {
            return;
        };
        let hits = self.policy.restricted_hits(&content);
        if !hits.is_empty() {
            warn!(
                "Script {} uses restricted commands: {}",
                script.name,
                hits.join(", ")
            );
        }
    }
}

fn line_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.trim_end_matches('\r').to_string()
}

fn classify(ended: Ended, limit: Duration) -> Outcome {
    match ended {
        Ended::TimedOut(res) => Outcome {
            status: SessionStatus::TimedOut,
            exit_code: res.ok().and_then(|s| s.code()),
            error: Some(format!("timed out after {}s", limit.as_secs())),
        },
        Ended::Cancelled(res) => Outcome {
            status: SessionStatus::Cancelled,
            exit_code: res.ok().and_then(|s| s.code()),
            error: None,
        },
        Ended::Exited(Err(e)) => {
            Outcome::failed(None, format!("failed to wait for process: {}", e))
        }
        Ended::Exited(Ok(status)) => match status.code() {
            Some(0) => Outcome {
                status: SessionStatus::Completed,
                exit_code: Some(0),
                error: None,
            },
            Some(code) => Outcome::failed(Some(code), format!("exited with code {}", code)),
            None => Outcome::failed(None, describe_signal(status)),
        },
    }
}

#[cfg(unix)]
fn describe_signal(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(sig) => format!("killed by signal {}", sig),
        None => "terminated abnormally".to_string(),
    }
}

#[cfg(not(unix))]
fn describe_signal(_status: ExitStatus) -> String {
    "terminated abnormally".to_string()
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::unistd::Pid;
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = nix::sys::signal::killpg(Pid::from_raw(raw), signal) {
        // ESRCH: the group is already gone
        debug!("killpg({}, {:?}) failed: {}", raw, signal, e);
    }
}

/// Replays the buffer, then follows live events until the session ends
struct OutputFollower {
    session: Arc<ExecutionSession>,
    rx: Receiver<SessionEvent>,
    pending: VecDeque<OutputLine>,
    /// Highest sequence number queued so far
    seen: Option<u64>,
    done: bool,
}

impl OutputFollower {
    async fn next_line(&mut self) -> Option<OutputLine> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(line);
            }
            if self.done {
                return None;
            }
            match self.rx.recv().await {
                Ok(SessionEvent::Line(line)) => self.enqueue(line),
                Ok(SessionEvent::Finished(_)) | Err(RecvError::Closed) => self.done = true,
                Err(RecvError::Lagged(missed)) => {
                    debug!(
                        "Session {}: stream lagged by {} events, resyncing",
                        self.session.id(),
                        missed
                    );
                    let terminal = self.session.terminal_status().is_some();
                    for line in self.session.lines_after(self.seen).await {
                        self.enqueue(line);
                    }
                    // Every line is buffered before the terminal status is set
                    self.done = terminal;
                }
            }
        }
    }

    fn enqueue(&mut self, line: OutputLine) {
        if self.seen.map_or(true, |seen| line.seq > seen) {
            self.seen = Some(line.seq);
            self.pending.push_back(line);
        }
    }
}
