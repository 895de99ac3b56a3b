use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Fixed-interval polling; no backoff. `max_polls` of `None` polls until the
/// predicate holds or the loop is cancelled.
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    pub interval: Duration,
    pub max_polls: Option<usize>,
}

impl PollSchedule {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_polls: None,
        }
    }

    pub fn with_max_polls(mut self, max_polls: usize) -> Self {
        self.max_polls = Some(max_polls);
        self
    }
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration, cancel: &CancelFlag);
}

/// Sleeps in short slices so a raised [`CancelFlag`] ends the wait early.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancelFlag) {
        const SLICE: Duration = Duration::from_millis(250);
        let deadline = Instant::now() + duration;
        while !cancel.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLICE.min(deadline - now));
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    Done,
    Exhausted,
    Cancelled,
}

/// Runs `check` until it returns `Ok(true)`, sleeping `schedule.interval`
/// between attempts. Errors from `check` end the loop immediately.
pub fn poll_until<E, F>(
    schedule: &PollSchedule,
    sleeper: &dyn Sleeper,
    cancel: &CancelFlag,
    mut check: F,
) -> Result<(PollExit, usize), E>
where
    F: FnMut(usize) -> Result<bool, E>,
{
    let mut polls = 0usize;
    loop {
        if cancel.is_cancelled() {
            return Ok((PollExit::Cancelled, polls));
        }
        polls += 1;
        if check(polls)? {
            return Ok((PollExit::Done, polls));
        }
        if schedule.max_polls.is_some_and(|max| polls >= max) {
            return Ok((PollExit::Exhausted, polls));
        }
        sleeper.sleep(schedule.interval, cancel);
    }
}
