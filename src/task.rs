//! Runs one long operation at a time off the UI thread.
//!
//! Every start gets a fresh worker thread, a [`RequestId`] and a
//! [`CancellationToken`]. Starting again while an operation is still running
//! cancels and abandons the old one, so only the most recently started
//! operation can ever complete.

use std::fmt;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{AerialRoadsError, Result};

/// Called from the worker thread after its result has been posted.
pub type Notifier = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of a finished operation as seen from the UI thread.
#[derive(Debug)]
pub struct TaskEvent<T> {
    pub id: RequestId,
    pub result: Result<T>,
}

struct RunningTask<T> {
    id: RequestId,
    receiver: Receiver<(RequestId, Result<T>)>,
    token: CancellationToken,
    deadline: Option<Instant>,
}

enum RunnerState<T> {
    Idle,
    Running(RunningTask<T>),
}

pub struct TaskRunner<T> {
    name: &'static str,
    state: RunnerState<T>,
    last_id: u64,
    timeout: Option<Duration>,
    notifier: Notifier,
}

impl<T: Send + 'static> TaskRunner<T> {
    pub fn new(name: &'static str, timeout: Option<Duration>, notifier: Notifier) -> Self {
        Self {
            name,
            state: RunnerState::Idle,
            last_id: 0,
            timeout,
            notifier,
        }
    }

    pub const fn is_running(&self) -> bool {
        matches!(self.state, RunnerState::Running(_))
    }

    /// Id of the operation currently in flight.
    pub fn current(&self) -> Option<RequestId> {
        match &self.state {
            RunnerState::Running(task) => Some(task.id),
            RunnerState::Idle => None,
        }
    }

    /// Spawns `operation` on a new thread.
    ///
    /// An operation already in flight is cancelled and its result will never
    /// be delivered.
    pub fn start<F>(&mut self, operation: F) -> Result<RequestId>
    where
        F: FnOnce(&CancellationToken) -> Result<T> + Send + 'static,
    {
        self.cancel();

        self.last_id += 1;
        let id = RequestId(self.last_id);
        let token = CancellationToken::new();
        let (sender, receiver) = mpsc::channel();

        let worker_token = token.clone();
        let notifier = Arc::clone(&self.notifier);
        let thread_name = format!("{}-{}", self.name, id.0);
        thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let result = operation(&worker_token);
                // 新しいリクエストに置き換えられた場合は受信側が既に破棄されている
                if sender.send((id, result)).is_ok() {
                    notifier();
                }
            })
            .map_err(|source| AerialRoadsError::Spawn {
                name: thread_name,
                source,
            })?;

        debug!(runner = self.name, %id, "started background task");
        self.state = RunnerState::Running(RunningTask {
            id,
            receiver,
            token,
            deadline: self.timeout.map(|timeout| Instant::now() + timeout),
        });
        Ok(id)
    }

    /// Cancels the operation in flight, if any. Its result is discarded.
    pub fn cancel(&mut self) {
        if let RunnerState::Running(task) = std::mem::replace(&mut self.state, RunnerState::Idle) {
            debug!(runner = self.name, id = %task.id, "abandoning background task");
            task.token.cancel();
        }
    }

    /// Delivers the completion of the operation in flight, at most once.
    ///
    /// Must be called from the thread that owns the runner. Returns `None`
    /// while the operation is still running or when nothing was started.
    pub fn poll(&mut self) -> Option<TaskEvent<T>> {
        let RunnerState::Running(task) = &self.state else {
            return None;
        };

        let event = match task.receiver.try_recv() {
            Ok((id, result)) => TaskEvent { id, result },
            Err(TryRecvError::Empty) => match task.deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    let after = self.timeout.unwrap_or_default();
                    warn!(runner = self.name, id = %task.id, ?after, "background task timed out");
                    task.token.cancel();
                    TaskEvent {
                        id: task.id,
                        result: Err(AerialRoadsError::TimedOut { after }),
                    }
                }
                _ => return None,
            },
            Err(TryRecvError::Disconnected) => {
                warn!(runner = self.name, id = %task.id, "worker thread exited without a result");
                TaskEvent {
                    id: task.id,
                    result: Err(AerialRoadsError::WorkerLost),
                }
            }
        };

        self.state = RunnerState::Idle;
        Some(event)
    }
}

impl<T> Drop for TaskRunner<T> {
    fn drop(&mut self) {
        if let RunnerState::Running(task) = &self.state {
            task.token.cancel();
        }
    }
}
