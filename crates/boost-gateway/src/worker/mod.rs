//! Isolated units of execution.
//!
//! A [`WorkerProcess`] is moved onto its own named OS thread when its
//! [`Worker`] starts, so it owns all of its state. The owner keeps only two
//! handles into the worker: the [`ReadySignal`] the body raises once it can
//! serve, and a [`CancellationToken`] used to ask it to stop.
//!
//! The body is wrapped in a catch-all: a returned error or a panic is logged
//! at error severity and the thread ends normally. The owner notices through
//! [`Worker::wait_ready`] or [`Worker::is_finished`].

mod signal;

pub use signal::ReadySignal;

use crate::error::WorkerError;
use crate::pipeline::panic_message;
use serde::Serialize;
use serde_json::Value;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Body of a worker.
///
/// The serialized form of the process is its parameter list; it is logged
/// when the [`Worker`] is constructed.
pub trait WorkerProcess: Serialize + Send + 'static {
    /// Thread name and log label.
    fn name(&self) -> &str;

    /// Run until done or until `ctx` is cancelled.
    fn run(self, ctx: WorkerContext) -> eyre::Result<()>;
}

/// Handles a running body shares with its owner.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    ready: ReadySignal,
    cancel: CancellationToken,
}

impl WorkerContext {
    pub fn new(ready: ReadySignal, cancel: CancellationToken) -> Self {
        Self { ready, cancel }
    }

    pub fn ready(&self) -> &ReadySignal {
        &self.ready
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Where a worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Constructed,
    Started,
    Ready,
    Stopped,
}

/// Owner-side handle of a [`WorkerProcess`].
pub struct Worker<W: WorkerProcess> {
    name: String,
    process: Option<W>,
    ready: ReadySignal,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    stopped: bool,
}

impl<W: WorkerProcess> Worker<W> {
    /// Wrap `process`, logging its parameters.
    pub fn new(process: W) -> Self {
        let name = process.name().to_string();
        log_parameters(&name, &process);
        Self {
            name,
            process: Some(process),
            ready: ReadySignal::new(),
            cancel: CancellationToken::new(),
            handle: None,
            stopped: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ready(&self) -> &ReadySignal {
        &self.ready
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn state(&self) -> WorkerState {
        if self.stopped {
            WorkerState::Stopped
        } else if self.ready.is_set() {
            WorkerState::Ready
        } else if self.handle.is_some() {
            WorkerState::Started
        } else {
            WorkerState::Constructed
        }
    }

    /// Spawn the body on its own thread.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        let process = self
            .process
            .take()
            .ok_or_else(|| WorkerError::AlreadyStarted(self.name.clone()))?;
        let ctx = WorkerContext::new(self.ready.clone(), self.cancel.clone());
        let name = self.name.clone();

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_body(&name, process, ctx))
            .map_err(|source| WorkerError::Spawn {
                name: self.name.clone(),
                source,
            })?;

        info!(worker = %self.name, "worker started");
        self.handle = Some(handle);
        Ok(())
    }

    /// Block until the body raises its ready signal.
    ///
    /// Fails early with [`WorkerError::Exited`] if the body ends first.
    pub fn wait_ready(&self, timeout: Duration) -> Result<(), WorkerError> {
        const SLICE: Duration = Duration::from_millis(50);
        // `None`: the timeout is too large to represent, wait indefinitely.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    SLICE.min(deadline - now)
                }
                None => SLICE,
            };
            if self.ready.wait(slice) {
                return Ok(());
            }
            if self.is_finished() {
                return Err(WorkerError::Exited(self.name.clone()));
            }
        }
        if self.ready.is_set() {
            return Ok(());
        }
        Err(WorkerError::ReadyTimeout {
            name: self.name.clone(),
            timeout,
        })
    }

    /// Whether the body has returned (or was never started).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel the body and join its thread. Calling this again is a no-op.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(worker = %self.name, "worker thread ended abnormally");
            }
            info!(worker = %self.name, "worker stopped");
        }
    }

    /// Start the worker and stop it when the returned guard is dropped.
    pub fn enter(mut self) -> Result<WorkerGuard<W>, WorkerError> {
        self.start()?;
        Ok(WorkerGuard { worker: self })
    }
}

/// Scoped worker: dropping it stops the worker on every path.
pub struct WorkerGuard<W: WorkerProcess> {
    worker: Worker<W>,
}

impl<W: WorkerProcess> WorkerGuard<W> {
    /// Stop now instead of at drop.
    pub fn stop(mut self) {
        self.worker.stop();
    }
}

impl<W: WorkerProcess> Deref for WorkerGuard<W> {
    type Target = Worker<W>;

    fn deref(&self) -> &Worker<W> {
        &self.worker
    }
}

impl<W: WorkerProcess> Drop for WorkerGuard<W> {
    fn drop(&mut self) {
        self.worker.stop();
    }
}

fn run_body<W: WorkerProcess>(name: &str, process: W, ctx: WorkerContext) {
    match panic::catch_unwind(AssertUnwindSafe(move || process.run(ctx))) {
        Ok(Ok(())) => info!(worker = %name, "worker body finished"),
        Ok(Err(err)) => error!(worker = %name, error = ?err, "worker body failed"),
        Err(payload) => error!(
            worker = %name,
            panic = %panic_message(payload.as_ref()),
            "worker body panicked"
        ),
    }
}

/// Log each parameter as `--name value (type)`.
fn log_parameters<W: Serialize>(worker: &str, process: &W) {
    match serde_json::to_value(process) {
        Ok(Value::Object(params)) => {
            for (key, value) in &params {
                let key: String = key.chars().take(14).collect();
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                info!(worker = %worker, "--{key:<15} {rendered} ({})", type_name(value));
            }
        }
        Ok(other) => info!(worker = %worker, "--{:<15} {other} ({})", "value", type_name(&other)),
        Err(e) => warn!(worker = %worker, error = %e, "worker parameters are not serializable"),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Idle {
        name: String,
        port: u16,
    }

    impl WorkerProcess for Idle {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(self, ctx: WorkerContext) -> eyre::Result<()> {
            ctx.ready().set();
            while !ctx.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }
    }

    #[derive(Serialize)]
    struct Failing;

    impl WorkerProcess for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(self, _ctx: WorkerContext) -> eyre::Result<()> {
            Err(eyre::eyre!("cannot bind").wrap_err("startup failed"))
        }
    }

    #[derive(Serialize)]
    struct Panicking;

    impl WorkerProcess for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn run(self, _ctx: WorkerContext) -> eyre::Result<()> {
            panic!("worker exploded");
        }
    }

    fn idle() -> Idle {
        Idle {
            name: "idle".to_string(),
            port: 1,
        }
    }

    #[test]
    fn lifecycle_states() {
        let mut worker = Worker::new(idle());
        assert_eq!(worker.state(), WorkerState::Constructed);
        assert!(worker.is_finished());

        worker.start().unwrap();
        worker.wait_ready(Duration::from_secs(5)).unwrap();
        assert_eq!(worker.state(), WorkerState::Ready);
        assert!(matches!(worker.start(), Err(WorkerError::AlreadyStarted(_))));

        worker.stop();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(worker.is_finished());
        worker.stop();
    }

    #[test]
    fn guard_stops_on_drop() {
        let cancel = {
            let guard = Worker::new(idle()).enter().unwrap();
            guard.wait_ready(Duration::from_secs(5)).unwrap();
            guard.cancellation().clone()
        };
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn failing_body_never_becomes_ready() {
        let guard = Worker::new(Failing).enter().unwrap();
        let err = guard.wait_ready(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, WorkerError::Exited(ref name) if name == "failing"));
        assert!(!guard.ready().is_set());
    }

    #[test]
    fn panicking_body_is_contained() {
        let guard = Worker::new(Panicking).enter().unwrap();
        let err = guard.wait_ready(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, WorkerError::Exited(_)));
        guard.stop();
    }

    #[test]
    fn unbounded_timeouts_do_not_overflow() {
        let guard = Worker::new(idle()).enter().unwrap();
        guard.wait_ready(Duration::MAX).unwrap();

        let failing = Worker::new(Failing).enter().unwrap();
        assert!(matches!(failing.wait_ready(Duration::MAX), Err(WorkerError::Exited(_))));
    }

    #[test]
    fn ready_timeout_is_reported() {
        #[derive(Serialize)]
        struct Sleepy;

        impl WorkerProcess for Sleepy {
            fn name(&self) -> &str {
                "sleepy"
            }

            fn run(self, ctx: WorkerContext) -> eyre::Result<()> {
                while !ctx.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            }
        }

        let guard = Worker::new(Sleepy).enter().unwrap();
        let err = guard.wait_ready(Duration::from_millis(60)).unwrap_err();
        assert!(matches!(err, WorkerError::ReadyTimeout { .. }));
    }

    #[test]
    fn type_names() {
        assert_eq!(type_name(&json!("a")), "string");
        assert_eq!(type_name(&json!(1)), "integer");
        assert_eq!(type_name(&json!(1.5)), "float");
        assert_eq!(type_name(&json!(null)), "null");
        assert_eq!(type_name(&json!([1])), "array");
    }
}
