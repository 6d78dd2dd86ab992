use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use statum::{machine, state};
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::JobError;

pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), JobError>> + Send>>;

/// Body of a recurring job, called once per tick
#[derive(Clone)]
pub struct JobBody(Arc<dyn Fn() -> JobFuture + Send + Sync>);

impl JobBody {
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Self(Arc::new(move || Box::pin(body()) as JobFuture))
    }
}

impl fmt::Debug for JobBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JobBody")
    }
}

/// When the first tick happens
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FirstRun {
    Immediately,
    AfterOnePeriod,
}

#[state]
#[derive(Debug, Clone)]
pub enum JobState {
    Idle,
    Sleeping(Duration),
    Running,
}

#[machine]
#[derive(Debug)]
pub struct PeriodicJob<S: JobState> {
    name: String,
    interval: Duration,
    first_run: FirstRun,
    body: JobBody,
    runs: u64,
}

impl<S: JobState> PeriodicJob<S> {
    pub fn runs(&self) -> u64 {
        self.runs
    }
}

impl PeriodicJob<Idle> {
    pub fn create(
        name: impl Into<String>,
        interval: Duration,
        first_run: FirstRun,
        body: JobBody,
    ) -> Self {
        Self::new(name.into(), interval, first_run, body, 0)
    }

    pub fn arm(self) -> PeriodicJob<Sleeping> {
        let delay = match self.first_run {
            FirstRun::Immediately => Duration::ZERO,
            FirstRun::AfterOnePeriod => self.interval,
        };
        debug!("{}: first run in {:?}", self.name, delay);
        self.transition_with(delay)
    }

    /// Drives the job for the rest of the process lifetime
    pub async fn run_forever(self) {
        info!("Starting job {} every {:?}", self.name, self.interval);
        let mut job = self.arm();
        loop {
            job = job.sleep().await.run_once().await;
        }
    }
}

impl PeriodicJob<Sleeping> {
    pub async fn sleep(self) -> PeriodicJob<Running> {
        if let Some(delay) = self.get_state_data() {
            tokio::time::sleep(*delay).await;
        }
        self.transition()
    }
}

impl PeriodicJob<Running> {
    /// Runs the body once in its own task and rearms the timer.
    ///
    /// Errors and panics end the tick, never the job.
    pub async fn run_once(mut self) -> PeriodicJob<Sleeping> {
        let started = Instant::now();
        let tick = tokio::spawn((self.body.0)());

        match tick.await {
            Ok(Ok(())) => debug!("{}: tick done", self.name),
            Ok(Err(e)) => error!("{}: tick failed: {}", self.name, e),
            Err(e) if e.is_panic() => error!("{}: tick panicked", self.name),
            Err(e) => error!("{}: tick aborted: {}", self.name, e),
        }
        self.runs += 1;

        let next = self.interval.saturating_sub(started.elapsed());
        self.transition_with(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: Arc<AtomicUsize>, outcome: fn(usize) -> Result<(), JobError>) -> JobBody {
        JobBody::new(move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                outcome(n)
            }
        })
    }

    fn spawn(interval: u64, first_run: FirstRun, body: JobBody) {
        let job = PeriodicJob::create("test", Duration::from_secs(interval), first_run, body);
        tokio::spawn(job.run_forever());
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_job_ticks_every_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        spawn(10, FirstRun::Immediately, counting(counter.clone(), |_| Ok(())));

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_job_waits_one_period() {
        let counter = Arc::new(AtomicUsize::new(0));
        spawn(10, FirstRun::AfterOnePeriod, counting(counter.clone(), |_| Ok(())));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_ticks_are_rearmed() {
        let counter = Arc::new(AtomicUsize::new(0));
        spawn(
            10,
            FirstRun::Immediately,
            counting(counter.clone(), |_| {
                Err(JobError::Device(DeviceError::Io("timed out".into())))
            }),
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_ticks_are_rearmed() {
        let counter = Arc::new(AtomicUsize::new(0));
        spawn(
            10,
            FirstRun::Immediately,
            counting(counter.clone(), |n| panic!("tick {n} blew up")),
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn run_once_counts_and_sleeps_the_remainder() {
        let job = PeriodicJob::create(
            "slow",
            Duration::from_secs(10),
            FirstRun::Immediately,
            JobBody::new(|| async {
                tokio::time::sleep(Duration::from_secs(4)).await;
                Ok::<(), JobError>(())
            }),
        );

        let sleeping = job.arm().sleep().await.run_once().await;

        assert_eq!(sleeping.runs(), 1);
        assert_eq!(sleeping.get_state_data(), Some(&Duration::from_secs(6)));
    }
}
