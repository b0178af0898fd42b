use crate::domain::models::GlobalSettings;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerTask {
    PriorityScan,
    CacheRefresh,
    CardManagement,
}

/// Period per task; `None` leaves the task stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerConfig {
    pub priority_scan: Option<Duration>,
    pub cache_refresh: Option<Duration>,
    pub card_management: Option<Duration>,
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

impl TimerConfig {
    pub fn from_settings(settings: &GlobalSettings) -> Self {
        Self {
            priority_scan: settings
                .priority_scan_enabled
                .then(|| minutes(settings.priority_scan_interval)),
            cache_refresh: Some(minutes(settings.cache_update_interval)),
            card_management: settings
                .card_management_enabled
                .then(|| minutes(settings.card_management_interval)),
        }
    }

    fn entries(&self) -> [(TimerTask, Option<Duration>); 3] {
        [
            (TimerTask::PriorityScan, self.priority_scan),
            (TimerTask::CacheRefresh, self.cache_refresh),
            (TimerTask::CardManagement, self.card_management),
        ]
    }
}

#[async_trait]
pub trait TimerJobs: Send + Sync + 'static {
    async fn run(&self, task: TimerTask) -> Result<(), InfraError>;
}

/// Owns one interval loop per running task. Each tick runs the task body as
/// its own tokio task, so a failing or slow body never stalls the schedule.
pub struct TimerOrchestrator<J>
where
    J: TimerJobs,
{
    jobs: Arc<J>,
    handles: Mutex<HashMap<TimerTask, JoinHandle<()>>>,
}

impl<J> TimerOrchestrator<J>
where
    J: TimerJobs,
{
    pub fn new(jobs: Arc<J>) -> Self {
        Self {
            jobs,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Stops whatever is running, then starts every configured task. Each
    /// started task runs once immediately. Must be called inside a tokio runtime.
    pub fn start(&self, config: &TimerConfig) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        abort_all(&mut handles);

        for (task, period) in config.entries() {
            let Some(period) = period else {
                tracing::debug!(?task, "timer disabled");
                continue;
            };
            if period.is_zero() {
                tracing::warn!(?task, "timer period is zero; not scheduling");
                continue;
            }

            let jobs = self.jobs.clone();
            let handle = tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let jobs = jobs.clone();
                    tokio::spawn(async move {
                        if let Err(error) = jobs.run(task).await {
                            tracing::error!(?task, %error, "scheduled task failed");
                        }
                    });
                }
            });
            if let Some(replaced) = handles.insert(task, handle) {
                replaced.abort();
            }
            tracing::info!(?task, period_secs = period.as_secs(), "timer started");
        }
    }

    /// Aborts every interval loop. Safe to call repeatedly or before `start`.
    pub fn stop(&self) -> usize {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        abort_all(&mut handles)
    }

    pub fn restart(&self, config: &TimerConfig) {
        self.start(config);
    }

    pub fn live_timers(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    pub fn running_tasks(&self) -> Vec<TimerTask> {
        let mut tasks = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect::<Vec<_>>();
        tasks.sort();
        tasks
    }

    pub fn is_running(&self) -> bool {
        self.live_timers() > 0
    }
}

impl<J> Drop for TimerOrchestrator<J>
where
    J: TimerJobs,
{
    fn drop(&mut self) {
        self.stop();
    }
}

fn abort_all(handles: &mut HashMap<TimerTask, JoinHandle<()>>) -> usize {
    let stopped = handles.len();
    for (task, handle) in handles.drain() {
        handle.abort();
        tracing::info!(?task, "timer stopped");
    }
    stopped
}
