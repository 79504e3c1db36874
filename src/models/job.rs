use std::time::{Duration, Instant};

use serde::Serialize;
use strum::Display;
use uuid::Uuid;

use crate::models::verification::VerificationKey;

/// Lifecycle of a verification job. `Queued → Running` on slot acquisition,
/// then exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::TimedOut)
    }
}

/// A single verification job. Created on admission, owned by the
/// orchestrator for its whole lifetime, dropped once the result is
/// delivered; never persisted.
#[derive(Debug, Clone)]
pub struct VerificationJob {
    pub id: Uuid,
    pub key: VerificationKey,
    pub state: JobState,
    pub enqueued_at: Instant,
    pub started_at: Option<Instant>,
    pub deadline: Option<Instant>,
}

impl VerificationJob {
    pub fn new(key: VerificationKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            state: JobState::Queued,
            enqueued_at: Instant::now(),
            started_at: None,
            deadline: None,
        }
    }

    /// Transition `Queued → Running`, stamping the start time and the hard
    /// deadline the supervisor will enforce.
    pub fn start(&mut self, hard_timeout: Duration) {
        debug_assert_eq!(self.state, JobState::Queued);
        let now = Instant::now();
        self.state = JobState::Running;
        self.started_at = Some(now);
        self.deadline = Some(now + hard_timeout);
    }

    pub fn finish(&mut self, state: JobState) {
        debug_assert_eq!(self.state, JobState::Running);
        debug_assert!(state.is_terminal());
        self.state = state;
    }

    /// Time spent waiting for a pool slot.
    pub fn queued_for(&self) -> Duration {
        self.started_at
            .map(|started| started.duration_since(self.enqueued_at))
            .unwrap_or_else(|| self.enqueued_at.elapsed())
    }
}
