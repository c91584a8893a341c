use std::thread;
use std::time::Duration;

use atelier_contracts::error::{GatewayError, GatewayResult};

use crate::gateway::VideoReference;

/// Fixed delay between status checks of a pending animation.
pub const ANIMATION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Provider view of a long-running animation operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSnapshot {
    pub name: String,
    pub done: bool,
    pub video: Option<VideoReference>,
}

impl OperationSnapshot {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            video: None,
        }
    }

    pub fn finished(name: impl Into<String>, video: Option<VideoReference>) -> Self {
        Self {
            name: name.into(),
            done: true,
            video,
        }
    }
}

pub trait OperationPoller {
    fn poll_operation(&self, name: &str) -> GatewayResult<OperationSnapshot>;
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationState {
    Submitted,
    Polling,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationOutcome {
    pub video: VideoReference,
    pub poll_attempts: u32,
}

/// Waits for a submitted animation. Polls are unbounded; the provider is
/// relied on to eventually report done or an error.
#[derive(Debug, Clone)]
pub struct AnimationJob {
    snapshot: OperationSnapshot,
    state: AnimationState,
    poll_attempts: u32,
    interval: Duration,
}

impl AnimationJob {
    pub fn new(snapshot: OperationSnapshot, interval: Duration) -> Self {
        Self {
            snapshot,
            state: AnimationState::Submitted,
            poll_attempts: 0,
            interval,
        }
    }

    pub fn state(&self) -> AnimationState {
        self.state
    }

    pub fn poll_attempts(&self) -> u32 {
        self.poll_attempts
    }

    pub fn run(
        &mut self,
        poller: &dyn OperationPoller,
        sleeper: &dyn Sleeper,
    ) -> GatewayResult<AnimationOutcome> {
        if matches!(self.state, AnimationState::Done | AnimationState::Failed) {
            return self.finish();
        }
        self.state = AnimationState::Polling;
        while !self.snapshot.done {
            sleeper.sleep(self.interval);
            self.poll_attempts += 1;
            match poller.poll_operation(&self.snapshot.name) {
                Ok(mut next) => {
                    if next.name.is_empty() {
                        next.name = self.snapshot.name.clone();
                    }
                    self.snapshot = next;
                }
                Err(err) => {
                    self.state = AnimationState::Failed;
                    return Err(err);
                }
            }
        }
        self.finish()
    }

    fn finish(&mut self) -> GatewayResult<AnimationOutcome> {
        match self.snapshot.video.clone() {
            Some(video) if !video.uri.trim().is_empty() => {
                self.state = AnimationState::Done;
                Ok(AnimationOutcome {
                    video,
                    poll_attempts: self.poll_attempts,
                })
            }
            _ => {
                self.state = AnimationState::Failed;
                Err(GatewayError::NoVideoProduced)
            }
        }
    }
}
