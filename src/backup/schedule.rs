//! Interval scheduler.
//!
//! A single polling loop reads a fresh [`ScheduleConfig`] from the settings source on every
//! tick and drives a two-state machine: [`SchedulerState::Disabled`] or
//! [`SchedulerState::Armed`] with the next trigger instant. Cadence is anchored to the
//! scheduled trigger, not to job completion, and only one launched job may be in flight.
//! Trigger instants are kept in UTC so daylight-saving shifts do not move the cadence.

use crate::backup::result_error::result::Result;
use crate::backup::settings::SettingsSource;
use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleUnit {
    Minutes,
    #[default]
    Hours,
    Days,
}

impl ScheduleUnit {
    pub fn period(self, interval: u32) -> Duration {
        let interval = i64::from(interval);
        match self {
            ScheduleUnit::Minutes => Duration::minutes(interval),
            ScheduleUnit::Hours => Duration::hours(interval),
            ScheduleUnit::Days => Duration::days(interval),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub interval: u32,
    pub unit: ScheduleUnit,
}

impl ScheduleConfig {
    pub fn period(&self) -> Duration {
        self.unit.period(self.interval.max(1))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchedulerState {
    #[default]
    Disabled,
    Armed {
        next: DateTime<Utc>,
        config: ScheduleConfig,
    },
}

/// What a single [`Scheduler::tick`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    Idle,
    Armed(DateTime<Utc>),
    Waiting(DateTime<Utc>),
    Triggered(DateTime<Utc>),
    Skipped(DateTime<Utc>),
}

/// Proof that a launched job is the only one running. Released on drop.
#[derive(Debug)]
pub struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Starts a job without waiting for it. The job must hold `guard` until it finishes.
pub trait JobLauncher: Send + Sync {
    fn launch(&self, guard: InFlight) -> Result<()>;
}

pub struct Scheduler {
    settings: Arc<dyn SettingsSource>,
    launcher: Arc<dyn JobLauncher>,
    state: SchedulerState,
    busy: Arc<AtomicBool>,
    poll_interval: std::time::Duration,
}

impl Scheduler {
    pub fn new(settings: Arc<dyn SettingsSource>, launcher: Arc<dyn JobLauncher>) -> Self {
        Self {
            settings,
            launcher,
            state: SchedulerState::Disabled,
            busy: Arc::new(AtomicBool::new(false)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: std::time::Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<Tick> {
        let config = self.settings.snapshot()?.schedule_config();
        if !config.enabled {
            if self.state != SchedulerState::Disabled {
                info!("Scheduler disabled");
            }
            self.state = SchedulerState::Disabled;
            return Ok(Tick::Idle);
        }

        let next = match self.state {
            SchedulerState::Armed { next, config: armed } if armed == config => next,
            _ => {
                let next = now + config.period();
                info!(
                    "Scheduler armed every {} {:?}, next backup at {}",
                    config.interval,
                    config.unit,
                    local(next)
                );
                self.state = SchedulerState::Armed { next, config };
                return Ok(Tick::Armed(next));
            }
        };

        if now < next {
            debug!("Next backup at {}", local(next));
            return Ok(Tick::Waiting(next));
        }

        let following = next_after(next, config.period(), now);
        self.state = SchedulerState::Armed {
            next: following,
            config,
        };

        match InFlight::acquire(&self.busy) {
            Some(guard) => {
                info!("Scheduled backup triggered, next at {}", local(following));
                self.launcher.launch(guard)?;
                Ok(Tick::Triggered(following))
            }
            None => {
                warn!(
                    "Previous backup still running, skipping trigger at {}, next at {}",
                    local(next),
                    local(following)
                );
                Ok(Tick::Skipped(following))
            }
        }
    }

    /// Ticks immediately, then once per poll interval until `stop` receives or disconnects.
    pub fn run(&mut self, stop: Receiver<()>) {
        info!("Scheduler loop started");
        loop {
            if let Err(e) = self.tick(Utc::now()) {
                error!("Scheduler tick failed: {e}");
            }
            match stop.recv_timeout(self.poll_interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("Scheduler loop stopped");
    }

    pub fn spawn(mut self) -> Result<SchedulerHandle> {
        let (stop_tx, stop_rx) = channel();
        let handle = std::thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || self.run(stop_rx))?;
        Ok(SchedulerHandle { stop_tx, handle })
    }
}

/// First slot of the `trigger + k * period` grid strictly after `now`, `k >= 1`.
fn next_after(trigger: DateTime<Utc>, period: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    let next = trigger + period;
    if next > now {
        return next;
    }
    let period_secs = period.num_seconds().max(1);
    let missed = (now - next).num_seconds() / period_secs + 1;
    warn!("Skipping {missed} missed backup slot(s)");
    next + Duration::seconds(missed * period_secs)
}

fn local(instant: DateTime<Utc>) -> DateTime<Local> {
    instant.with_timezone(&Local)
}

pub struct SchedulerHandle {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            error!("Scheduler thread panicked");
        }
    }

    /// Blocks until the loop exits, which only happens after a stop.
    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("Scheduler thread panicked");
        }
    }
}
