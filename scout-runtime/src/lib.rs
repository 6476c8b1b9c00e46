//! Tokio runtime for the scout binary plus the run-wide cancellation token.
//!
//! A run owns one [`ScoutRuntime`]. Everything that should stop on Ctrl-C
//! takes a child of [`ScoutRuntime::cancellation`]; cancellation is
//! cooperative and callers check the token between units of work.
use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ScoutHandle {
    inner: Handle,
    cancel: CancellationToken,
}

pub struct ScoutRuntime {
    runtime: Runtime,
    cancel: CancellationToken,
}

impl ScoutRuntime {
    /// Build a multi-threaded runtime with named worker threads.
    ///
    /// ```
    /// use scout_runtime::ScoutRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = ScoutRuntime::build("doctest-runtime", Some(1)).expect("runtime builds");
    /// assert_eq!(runtime.block_on(async { 2 + 2 }), 4);
    /// runtime.shutdown(Duration::from_millis(10));
    /// ```
    pub fn build(thread_name: &str, worker_threads: Option<usize>) -> Result<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name(thread_name);
        if let Some(workers) = worker_threads {
            builder.worker_threads(workers.max(1));
        }
        let runtime = builder
            .build()
            .with_context(|| format!("building tokio runtime {thread_name:?}"))?;
        Ok(Self {
            runtime,
            cancel: CancellationToken::new(),
        })
    }

    /// Cloneable handle for spawning and for reaching the token from tasks.
    ///
    /// ```
    /// use scout_runtime::ScoutRuntime;
    ///
    /// let runtime = ScoutRuntime::build("handle-example", Some(1)).unwrap();
    /// assert!(!runtime.handle().cancellation().is_cancelled());
    /// ```
    pub fn handle(&self) -> ScoutHandle {
        ScoutHandle {
            inner: self.runtime.handle().clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Root token of the run. Cancelling it cancels every child.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the root token on the first Ctrl-C. A second Ctrl-C is left to
    /// the default handler.
    ///
    /// ```
    /// use scout_runtime::ScoutRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = ScoutRuntime::build("ctrl-c-example", Some(1)).unwrap();
    /// let _watcher = runtime.cancel_on_ctrl_c();
    /// assert!(!runtime.cancellation().is_cancelled());
    /// runtime.shutdown(Duration::from_millis(10));
    /// ```
    pub fn cancel_on_ctrl_c(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        info!(target: "scout.runtime", "runtime.interrupted");
                        cancel.cancel();
                    }
                    Err(err) => warn!(target: "scout.runtime", error = %err, "runtime.signal_unavailable"),
                },
            }
        })
    }

    /// Run a future to completion on the runtime.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Cancel outstanding work and give tasks `graceful` to finish.
    ///
    /// ```
    /// use scout_runtime::ScoutRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = ScoutRuntime::build("shutdown-example", Some(1)).unwrap();
    /// let token = runtime.cancellation();
    /// runtime.shutdown(Duration::from_millis(5));
    /// assert!(token.is_cancelled());
    /// ```
    pub fn shutdown(self, graceful: Duration) {
        self.cancel.cancel();
        self.runtime.shutdown_timeout(graceful);
    }
}

impl ScoutHandle {
    /// Spawn onto the shared runtime.
    ///
    /// ```
    /// use scout_runtime::ScoutRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = ScoutRuntime::build("handle-doctest", Some(1)).unwrap();
    /// let task = runtime.handle().spawn(async { 21 * 2 });
    /// assert_eq!(runtime.block_on(async move { task.await.unwrap() }), 42);
    /// runtime.shutdown(Duration::from_millis(10));
    /// ```
    pub fn spawn<F, T>(&self, fut: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.spawn(fut)
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Token for one run: cancelled with the root, cancellable on its own.
    ///
    /// ```
    /// use scout_runtime::ScoutRuntime;
    ///
    /// let runtime = ScoutRuntime::build("child-example", Some(1)).unwrap();
    /// let handle = runtime.handle();
    /// let run = handle.run_token();
    /// run.cancel();
    /// assert!(!handle.cancellation().is_cancelled());
    ///
    /// let other = handle.run_token();
    /// handle.cancellation().cancel();
    /// assert!(other.is_cancelled());
    /// ```
    pub fn run_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}
