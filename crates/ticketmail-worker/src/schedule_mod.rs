use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::settings_mod::ScheduleSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TaskKind {
    Receive,
    Send,
    Resend,
    Notification,
}

impl TaskKind {
    pub(crate) fn args(self) -> &'static [&'static str] {
        match self {
            TaskKind::Receive => &["receive"],
            TaskKind::Send => &["send", "queued"],
            TaskKind::Resend => &["send", "error"],
            TaskKind::Notification => &["notify", "queued"],
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            TaskKind::Receive => "receive",
            TaskKind::Send => "send",
            TaskKind::Resend => "resend",
            TaskKind::Notification => "notification",
        }
    }
}

/// Tracks which task kinds currently have a run in flight.
#[derive(Clone, Default)]
pub(crate) struct LeaseRegistry {
    running: Arc<Mutex<HashSet<TaskKind>>>,
}

impl LeaseRegistry {
    /// `None` while another run of `kind` still holds its lease.
    pub(crate) fn try_acquire(&self, kind: TaskKind) -> Option<Lease> {
        let mut running = self.running.lock().ok()?;
        if !running.insert(kind) {
            return None;
        }
        Some(Lease {
            kind,
            registry: self.clone(),
        })
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self, kind: TaskKind) -> bool {
        self.running
            .lock()
            .map(|running| running.contains(&kind))
            .unwrap_or(false)
    }
}

/// Released on drop, including when the run panics.
pub(crate) struct Lease {
    kind: TaskKind,
    registry: LeaseRegistry,
}

impl Drop for Lease {
    fn drop(&mut self) {
        match self.registry.running.lock() {
            Ok(mut running) => {
                running.remove(&self.kind);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&self.kind);
            }
        }
    }
}

#[async_trait]
pub(crate) trait WorkerLauncher: Send + Sync {
    async fn launch(&self, args: &[&str]) -> Result<()>;
}

/// Runs each worker as a child process of the current executable and waits
/// for it to exit.
pub(crate) struct ProcessLauncher {
    config: Option<String>,
}

impl ProcessLauncher {
    pub(crate) fn new(config: Option<&str>) -> Self {
        Self {
            config: config.map(str::to_string),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, args: &[&str]) -> Result<()> {
        let exe = std::env::current_exe().context("locate worker executable")?;
        let mut command = tokio::process::Command::new(exe);
        if let Some(config) = &self.config {
            command.arg("--config").arg(config);
        }
        let status = command
            .args(args)
            .stdin(std::process::Stdio::null())
            .status()
            .await
            .with_context(|| format!("start worker {}", args.join(" ")))?;
        // Workers exit 1 whatever the outcome; only signals are unusual.
        if status.code().is_none() {
            tracing::warn!(from = "scheduler", args = %args.join(" "), "worker terminated by signal");
        }
        Ok(())
    }
}

pub(crate) struct Scheduler<L> {
    launcher: Arc<L>,
    leases: LeaseRegistry,
}

impl<L> Clone for Scheduler<L> {
    fn clone(&self) -> Self {
        Self {
            launcher: Arc::clone(&self.launcher),
            leases: self.leases.clone(),
        }
    }
}

impl<L: WorkerLauncher + 'static> Scheduler<L> {
    pub(crate) fn new(launcher: L) -> Self {
        Self {
            launcher: Arc::new(launcher),
            leases: LeaseRegistry::default(),
        }
    }

    /// Starts a run of `kind` unless one is already in flight.
    pub(crate) fn fire(&self, kind: TaskKind) -> Option<JoinHandle<()>> {
        let Some(lease) = self.leases.try_acquire(kind) else {
            tracing::info!(from = "scheduler", task = kind.name(), "previous run still in progress, skipped");
            return None;
        };
        let launcher = Arc::clone(&self.launcher);
        Some(tokio::spawn(async move {
            let _lease = lease;
            tracing::debug!(from = "scheduler", task = kind.name(), "run started");
            if let Err(err) = launcher.launch(kind.args()).await {
                tracing::error!(from = "scheduler", task = kind.name(), error = %format!("{:#}", err), "run failed");
            }
        }))
    }

    /// Ticks every enabled task until Ctrl-C.
    pub(crate) async fn run(&self, schedule: &ScheduleSettings) -> Result<()> {
        let tasks: Vec<(TaskKind, u64)> = [
            (TaskKind::Receive, schedule.receive_secs),
            (TaskKind::Send, schedule.send_secs),
            (TaskKind::Resend, schedule.resend_secs),
            (TaskKind::Notification, schedule.notification_secs),
        ]
        .into_iter()
        .filter(|(_, secs)| *secs > 0)
        .collect();
        if tasks.is_empty() {
            tracing::warn!(from = "scheduler", "every task is disabled, nothing to do");
            return Ok(());
        }

        let mut tickers = Vec::with_capacity(tasks.len());
        for (kind, secs) in tasks {
            tracing::info!(from = "scheduler", task = kind.name(), every_secs = secs, "task scheduled");
            let scheduler = self.clone();
            tickers.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(secs));
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    scheduler.fire(kind);
                }
            }));
        }

        tokio::signal::ctrl_c().await.context("wait for shutdown signal")?;
        tracing::info!(from = "scheduler", "shutdown requested");
        for ticker in tickers {
            ticker.abort();
        }
        Ok(())
    }
}
