//! One-shot process lifecycle.
//!
//! Listeners run as independent tasks and report their terminal outcome on a
//! shared channel, next to a task that watches for termination signals. The
//! first event read starts shutdown: every listener is cancelled at once and
//! given its own deadline to finish. Listener failures that lost the race for
//! the trigger are folded into their listener's outcome.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::errors::{ListenerError, ShutdownError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

/// A network endpoint run by the launcher.
#[async_trait]
pub trait Listener: Send + 'static {
    fn name(&self) -> &'static str;

    /// Serves until `shutdown` is cancelled or the listener fails.
    async fn serve(self: Box<Self>, shutdown: CancellationToken) -> Result<(), ListenerError>;
}

/// The event that ended the running state.
#[derive(Debug)]
pub enum Trigger {
    ListenerClosed {
        listener: &'static str,
        error: Option<ListenerError>,
    },
    Signal(&'static str),
    SignalWatch(std::io::Error),
    Exhausted,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::ListenerClosed { listener, error: None } => write!(f, "{} closed", listener),
            Trigger::ListenerClosed { listener, error: Some(e) } => write!(f, "{}: {}", listener, e),
            Trigger::Signal(name) => write!(f, "{}", name),
            Trigger::SignalWatch(e) => write!(f, "signal handler: {}", e),
            Trigger::Exhausted => write!(f, "no event sources left"),
        }
    }
}

/// What ended the process and how each listener stopped.
#[derive(Debug)]
pub struct ShutdownReport {
    pub trigger: Trigger,
    pub outcomes: Vec<(&'static str, Result<(), ShutdownError>)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| outcome.is_ok())
    }
}

impl fmt::Display for ShutdownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit: {}", self.trigger)?;
        for (name, outcome) in &self.outcomes {
            match outcome {
                Ok(()) => write!(f, ", {}: ok", name)?,
                Err(e) => write!(f, ", {}: {}", name, e)?,
            }
        }
        Ok(())
    }
}

pub struct Launcher {
    listeners: Vec<Box<dyn Listener>>,
    shutdown_timeout: Duration,
    state: watch::Sender<LaunchState>,
}

impl Launcher {
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (state, _) = watch::channel(LaunchState::Starting);
        Self {
            listeners: Vec::new(),
            shutdown_timeout,
            state,
        }
    }

    pub fn with_listener(mut self, listener: impl Listener) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn state(&self) -> watch::Receiver<LaunchState> {
        self.state.subscribe()
    }

    /// Runs until SIGINT, SIGTERM or the first listener terminates.
    pub async fn run(self) -> ShutdownReport {
        self.run_until(termination_signal()).await
    }

    pub async fn run_until<F>(self, signal: F) -> ShutdownReport
    where
        F: Future<Output = Trigger> + Send + 'static,
    {
        let Launcher {
            listeners,
            shutdown_timeout,
            state,
        } = self;

        // Sized so that no source ever blocks on send.
        let (events_tx, mut events_rx) = mpsc::channel(listeners.len() + 1);
        let root = CancellationToken::new();

        let running: Vec<Running> = listeners
            .into_iter()
            .map(|listener| Running::spawn(listener, root.child_token(), events_tx.clone()))
            .collect();

        let signal_tx = events_tx.clone();
        let watcher = tokio::spawn(
            async move {
                let _ = signal_tx.send(signal.await).await;
            }
            .in_current_span(),
        );
        drop(events_tx);

        state.send_replace(LaunchState::Running);
        tracing::info!(listeners = running.len(), "running");

        let trigger = events_rx.recv().await.unwrap_or(Trigger::Exhausted);

        state.send_replace(LaunchState::ShuttingDown);
        tracing::warn!(%trigger, "shutting down");
        root.cancel();

        let mut outcomes = join_all(running.into_iter().map(|r| r.stop(shutdown_timeout))).await;
        watcher.abort();

        // A listener that failed before the cancel still reports on the channel.
        while let Ok(event) = events_rx.try_recv() {
            if let Trigger::ListenerClosed {
                listener,
                error: Some(source),
            } = event
            {
                if let Some((_, outcome)) = outcomes.iter_mut().find(|(name, _)| *name == listener) {
                    *outcome = Err(ShutdownError::Listener { listener, source });
                }
            }
        }

        for (name, outcome) in &outcomes {
            if let Err(e) = outcome {
                tracing::error!(listener = name, error = %e, "unclean shutdown");
            }
        }

        state.send_replace(LaunchState::Stopped);
        ShutdownReport { trigger, outcomes }
    }
}

struct Running {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<Result<(), ListenerError>>,
}

impl Running {
    fn spawn(listener: Box<dyn Listener>, token: CancellationToken, events: mpsc::Sender<Trigger>) -> Self {
        let name = listener.name();
        let shutdown = token.clone();
        let handle = tokio::spawn(
            async move {
                let result = listener.serve(shutdown.clone()).await;
                if shutdown.is_cancelled() {
                    return result;
                }
                let _ = events
                    .send(Trigger::ListenerClosed {
                        listener: name,
                        error: result.err(),
                    })
                    .await;
                Ok(())
            }
            .in_current_span(),
        );
        Self { name, token, handle }
    }

    /// A listener still running when the deadline passes is left detached.
    async fn stop(self, deadline: Duration) -> (&'static str, Result<(), ShutdownError>) {
        let Running { name, token, handle } = self;
        token.cancel();
        let outcome = match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(source))) => Err(ShutdownError::Listener {
                listener: name,
                source,
            }),
            Ok(Err(_)) => Err(ShutdownError::Panicked { listener: name }),
            Err(_) => Err(ShutdownError::Timeout {
                listener: name,
                deadline,
            }),
        };
        (name, outcome)
    }
}

/// Resolves on SIGINT or, on unix, SIGTERM.
pub async fn termination_signal() -> Trigger {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Trigger::Signal("SIGINT"),
            Err(e) => Trigger::SignalWatch(e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                Trigger::Signal("SIGTERM")
            }
            Err(e) => Trigger::SignalWatch(e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Trigger>();

    tokio::select! {
        trigger = ctrl_c => trigger,
        trigger = terminate => trigger,
    }
}
