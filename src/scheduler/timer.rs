use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};

use crate::{
    error::Result,
    models::{Identity, SyncState, WorkerBody, WorkerMessage},
};

pub type Poster = mpsc::UnboundedSender<WorkerMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncInterval {
    Every(Duration),
    /// Run once on start, no ticker.
    Disabled,
}

impl SyncInterval {
    pub fn from_millis(millis: u64) -> Self {
        if millis == 0 {
            SyncInterval::Disabled
        } else {
            SyncInterval::Every(Duration::from_millis(millis))
        }
    }
}

/// Parameters handed over by the host when starting or triggering a timer.
#[derive(Debug, Clone, Deserialize)]
pub struct TimerParams<D> {
    #[serde(default)]
    pub identity: Option<Identity>,
    #[serde(flatten)]
    pub data: D,
}

/// Parameters a job runs with once the identity precondition is met.
#[derive(Debug, Clone)]
pub struct JobParams<D> {
    pub identity: Identity,
    pub data: D,
}

#[async_trait]
pub trait SchedulerJob<D>: Send + Sync {
    async fn run(&self, params: &JobParams<D>, ctx: &JobContext<'_>) -> Result<()>;
}

/// Timer generation a start or trigger was requested under.
///
/// Taken synchronously when the request is accepted; a `stop()` in between
/// makes the request void.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEpoch(u64);

/// Post handle bound to the run that created it.
pub struct JobContext<'a> {
    timer: &'a SchedulerTimer,
    epoch: u64,
}

impl JobContext<'_> {
    /// False once the timer was stopped after this run began.
    pub fn is_current(&self) -> bool {
        self.timer.inner().epoch == self.epoch
    }

    pub fn post(&self, body: WorkerBody) {
        if !self.is_current() {
            tracing::debug!("Dropping late '{}' message after stop", body.msg());
            return;
        }
        self.timer.post(body);
    }
}

struct TimerInner {
    status: SyncState,
    running: bool,
    ticker: Option<JoinHandle<()>>,
    epoch: u64,
}

/// Interval-driven job runner allowing at most one job in flight.
pub struct SchedulerTimer {
    reference: Option<String>,
    poster: Poster,
    inner: Mutex<TimerInner>,
}

impl SchedulerTimer {
    pub fn new(reference: Option<String>, poster: Poster) -> Arc<Self> {
        Arc::new(Self {
            reference,
            poster,
            inner: Mutex::new(TimerInner {
                status: SyncState::Idle,
                running: false,
                ticker: None,
                epoch: 0,
            }),
        })
    }

    fn inner(&self) -> MutexGuard<'_, TimerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> SyncState {
        self.inner().status
    }

    pub fn epoch(&self) -> TimerEpoch {
        TimerEpoch(self.inner().epoch)
    }

    /// Runs the job now, then every `interval`. No-op if already started.
    pub async fn start<D, J>(
        self: &Arc<Self>,
        requested: TimerEpoch,
        params: TimerParams<D>,
        interval_kind: SyncInterval,
        job: Arc<J>,
    ) where
        D: Clone + Send + Sync + 'static,
        J: SchedulerJob<D> + ?Sized + 'static,
    {
        let Some(identity) = params.identity else {
            tracing::debug!("No identity yet, timer {:?} not started", self.reference);
            return;
        };
        let epoch = {
            let mut inner = self.inner();
            if inner.epoch != requested.0 {
                tracing::debug!("Timer {:?} stopped before start ran", self.reference);
                return;
            }
            if inner.running {
                return;
            }
            inner.running = true;
            inner.epoch
        };

        let job_params = JobParams {
            identity,
            data: params.data,
        };
        self.execute_job(&job_params, job.as_ref(), epoch).await;

        let period = match interval_kind {
            SyncInterval::Every(period) => period,
            SyncInterval::Disabled => {
                let mut inner = self.inner();
                if inner.epoch == epoch {
                    inner.running = false;
                }
                return;
            }
        };

        let mut inner = self.inner();
        // Stopped (or failed) while the first run was in flight.
        if inner.epoch != epoch || !inner.running {
            return;
        }
        let timer = Arc::clone(self);
        inner.ticker = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                timer.execute_job(&job_params, job.as_ref(), epoch).await;
            }
        }));
    }

    /// Runs the job once, independent of the ticker.
    pub async fn trigger<D, J>(&self, requested: TimerEpoch, params: TimerParams<D>, job: &J)
    where
        D: Send + Sync,
        J: SchedulerJob<D> + ?Sized,
    {
        let Some(identity) = params.identity else {
            tracing::debug!("No identity yet, trigger on {:?} skipped", self.reference);
            return;
        };
        let job_params = JobParams {
            identity,
            data: params.data,
        };
        self.execute_job(&job_params, job, requested.0).await;
    }

    pub fn stop(&self) {
        let mut inner = self.inner();
        if let Some(ticker) = inner.ticker.take() {
            ticker.abort();
        }
        inner.running = false;
        inner.status = SyncState::Idle;
        inner.epoch = inner.epoch.wrapping_add(1);
    }

    async fn execute_job<D, J>(&self, params: &JobParams<D>, job: &J, epoch: u64)
    where
        D: Send + Sync,
        J: SchedulerJob<D> + ?Sized,
    {
        {
            let mut inner = self.inner();
            if inner.epoch != epoch || inner.status != SyncState::Idle {
                return;
            }
            inner.status = SyncState::InProgress;
        }
        let ctx = JobContext { timer: self, epoch };
        ctx.post(WorkerBody::SyncStatus {
            state: SyncState::InProgress,
        });

        match job.run(params, &ctx).await {
            Ok(()) => {
                ctx.post(WorkerBody::SyncStatus {
                    state: SyncState::Idle,
                });
                let mut inner = self.inner();
                if inner.epoch == epoch {
                    inner.status = SyncState::Idle;
                }
            }
            Err(err) => {
                tracing::error!("Scheduler job {:?} failed: {}", self.reference, err);
                ctx.post(WorkerBody::SyncStatus {
                    state: SyncState::Error,
                });
                if ctx.is_current() {
                    self.inner().status = SyncState::Error;
                    self.stop();
                }
            }
        }
    }

    fn post(&self, body: WorkerBody) {
        let message = WorkerMessage {
            reference: self.reference.clone(),
            body,
        };
        if self.poster.send(message).is_err() {
            tracing::debug!("Host receiver gone for timer {:?}", self.reference);
        }
    }
}
