//! 后台任务
//!
//! 服务器启动后常驻的任务都挂在 [`BackgroundTasks`] 上:
//!
//! | 名称 | 类型 | 周期 |
//! |------|------|------|
//! | snapshot_sweeper | Periodic | 30s |
//! | scheduled_activator | Periodic | 10s |
//! | notification_listener | Listener | - |
//!
//! 派单会话不在这里登记，它们随订单结束而结束。

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Drains a channel until shutdown
    Listener,
    /// Runs a tick on a fixed period
    Periodic,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Listener => "listener",
            TaskKind::Periodic => "periodic",
        }
    }
}

struct Supervised {
    name: &'static str,
    kind: TaskKind,
    handle: JoinHandle<()>,
}

/// Registry of long-running tasks sharing one shutdown token
pub struct BackgroundTasks {
    tasks: Vec<Supervised>,
    shutdown: CancellationToken,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic".to_string())
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn `future` under supervision: a panic is logged, not propagated,
    /// and an exit before shutdown is reported.
    pub fn spawn<F>(&mut self, name: &'static str, kind: TaskKind, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(()) if shutdown.is_cancelled() => {}
                Ok(()) => tracing::warn!(task = name, kind = kind.as_str(), "Background task exited early"),
                Err(payload) => tracing::error!(
                    task = name,
                    kind = kind.as_str(),
                    panic = %panic_message(payload.as_ref()),
                    "Background task panicked"
                ),
            }
        });
        self.tasks.push(Supervised { name, kind, handle });
    }

    /// Call `tick` every `period` until shutdown. The first tick fires
    /// immediately; ticks missed while one is running are not replayed.
    pub fn every<F, Fut>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.shutdown.clone();
        self.spawn(name, TaskKind::Periodic, async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => tick().await,
                }
            }
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Names of tasks that are no longer running
    pub fn finished(&self) -> Vec<&'static str> {
        self.tasks
            .iter()
            .filter(|t| t.handle.is_finished())
            .map(|t| t.name)
            .collect()
    }

    pub fn log_summary(&self) {
        let periodic = self
            .tasks
            .iter()
            .filter(|t| t.kind == TaskKind::Periodic)
            .count();
        tracing::info!(
            total = self.tasks.len(),
            periodic,
            listeners = self.tasks.len() - periodic,
            "Background tasks running"
        );
    }

    /// Cancel the shared token and wait for every task
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.handle.await
                && !e.is_cancelled()
            {
                tracing::error!(task = task.name, error = %e, "Background task failed during shutdown");
            }
        }
        tracing::info!("Background tasks stopped");
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_every_ticks_until_shutdown() {
        let mut tasks = BackgroundTasks::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        tasks.every("counter", Duration::from_millis(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(tasks.finished().is_empty());
        tasks.shutdown().await;

        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "only {seen} ticks");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_panicking_task_is_contained() {
        let mut tasks = BackgroundTasks::new();
        tasks.spawn("boom", TaskKind::Listener, async { panic!("boom") });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(tasks.finished(), vec!["boom"]);
        tasks.shutdown().await;
    }
}
