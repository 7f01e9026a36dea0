//! Inactivity timer that prompts the hamster to speak up when the user goes
//! quiet.
//!
//! Runs as one tokio task fed by a `flume` channel. Any user activity re-arms
//! the deadline; a playing video or a disabled watchdog keeps it disarmed.
//! After each firing (successful, ineligible or failed) the timer re-arms.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    PointerMove,
    PointerDown,
    KeyDown,
    TouchStart,
    Scroll,
}

#[async_trait]
pub trait IdleHandler: Send + Sync {
    async fn is_eligible(&self) -> bool;
    async fn on_idle(&self) -> Result<()>;
}

#[derive(Debug)]
enum Signal {
    Activity(ActivityKind),
    VideoPlaying(bool),
    Enabled(bool),
    Shutdown,
}

pub struct IdleWatchdog {
    tx: flume::Sender<Signal>,
    task: JoinHandle<()>,
}

impl IdleWatchdog {
    pub fn spawn(handler: Arc<dyn IdleHandler>, timeout: Duration, enabled: bool) -> Self {
        let (tx, rx) = flume::unbounded();
        let task = tokio::spawn(run(handler, rx, timeout, enabled));
        Self { tx, task }
    }

    pub fn activity(&self, kind: ActivityKind) {
        self.send(Signal::Activity(kind));
    }

    pub fn set_video_playing(&self, playing: bool) {
        self.send(Signal::VideoPlaying(playing));
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.send(Signal::Enabled(enabled));
    }

    pub async fn shutdown(self) {
        self.send(Signal::Shutdown);
        if let Err(e) = self.task.await {
            tracing::warn!("Idle watchdog task ended abnormally: {}", e);
        }
    }

    fn send(&self, signal: Signal) {
        if self.tx.send(signal).is_err() {
            tracing::debug!("Idle watchdog already stopped");
        }
    }
}

async fn run(
    handler: Arc<dyn IdleHandler>,
    rx: flume::Receiver<Signal>,
    timeout: Duration,
    mut enabled: bool,
) {
    let mut playing = false;
    let arm = |enabled: bool, playing: bool| -> Option<Instant> {
        (enabled && !playing).then(|| Instant::now() + timeout)
    };
    let mut deadline = arm(enabled, playing);
    tracing::debug!("Idle watchdog started (enabled: {})", enabled);

    loop {
        let sleeper = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            signal = rx.recv_async() => {
                match signal {
                    Ok(Signal::Activity(_)) => {}
                    Ok(Signal::VideoPlaying(now_playing)) => playing = now_playing,
                    Ok(Signal::Enabled(now_enabled)) => enabled = now_enabled,
                    Ok(Signal::Shutdown) | Err(_) => break,
                }
                deadline = arm(enabled, playing);
            }
            _ = sleeper => {
                if handler.is_eligible().await {
                    tracing::debug!("Idle timeout reached, prompting");
                    if let Err(e) = handler.on_idle().await {
                        tracing::warn!("Idle prompt failed: {:#}", e);
                    }
                } else {
                    tracing::debug!("Idle timeout reached but not eligible");
                }
                deadline = arm(enabled, playing);
            }
        }
    }

    tracing::debug!("Idle watchdog stopped");
}
