use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::model::{ArrivalRate, LoadShape, Phase};
use crate::session::SessionId;

const MILLI_SESSIONS_PER_SESSION_MS: i128 = 1_000_000;

/// Starts and cancels sessions on behalf of the engine. Completions come
/// back asynchronously through [`ConcurrencyEngine::session_finished`].
pub trait SessionLauncher {
    fn launch(&mut self, phase: &Arc<Phase>, session: SessionId);
    fn cancel(&mut self, phase: &str, session: SessionId);
    /// A session ended on its own.
    fn completed(&mut self, phase: &str, session: SessionId);
    /// The phase terminated; drop anything held for it.
    fn release(&mut self, phase: &Phase);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCompletion {
    /// Not one of ours, or already cancelled.
    Unknown,
    Completed,
    /// The last repeat of a sequential load finished.
    Exhausted,
}

/// Number of sessions a rate-based load should have started `elapsed`
/// after the phase began. Other load shapes return zero.
///
/// A ramp holds its target rate once the phase duration has passed.
#[must_use]
pub fn sessions_due(load: &LoadShape, duration: Duration, elapsed: Duration) -> u64 {
    let elapsed_ms = i128::try_from(elapsed.as_millis()).unwrap_or(i128::MAX);
    let due = match load {
        LoadShape::ConstantPerSec { rate, .. } => constant_integral(*rate, elapsed_ms),
        LoadShape::RampPerSec {
            initial_rate,
            target_rate,
            ..
        } => {
            let duration_ms = i128::try_from(duration.as_millis()).unwrap_or(i128::MAX);
            if duration_ms == 0 {
                constant_integral(*target_rate, elapsed_ms)
            } else if elapsed_ms <= duration_ms {
                ramp_integral(*initial_rate, *target_rate, duration_ms, elapsed_ms)
            } else {
                ramp_integral(*initial_rate, *target_rate, duration_ms, duration_ms).saturating_add(
                    constant_integral(*target_rate, elapsed_ms.saturating_sub(duration_ms)),
                )
            }
        }
        LoadShape::AtOnce { .. }
        | LoadShape::Always { .. }
        | LoadShape::Sequentially { .. }
        | LoadShape::Noop => 0,
    };
    u64::try_from(due.max(0)).unwrap_or(u64::MAX)
}

fn constant_integral(rate: ArrivalRate, elapsed_ms: i128) -> i128 {
    i128::from(rate.millis())
        .saturating_mul(elapsed_ms)
        .checked_div(MILLI_SESSIONS_PER_SESSION_MS)
        .unwrap_or(0)
}

/// Integral of `r0 + (r1 - r0) * t / d` from 0 to `t`, in sessions.
fn ramp_integral(initial: ArrivalRate, target: ArrivalRate, duration_ms: i128, elapsed_ms: i128) -> i128 {
    let r0 = i128::from(initial.millis());
    let r1 = i128::from(target.millis());
    let twice_duration = duration_ms.saturating_mul(2);
    let numerator = r0
        .saturating_mul(elapsed_ms)
        .saturating_mul(twice_duration)
        .saturating_add(
            r1.saturating_sub(r0)
                .saturating_mul(elapsed_ms)
                .saturating_mul(elapsed_ms),
        );
    numerator
        .checked_div(twice_duration.saturating_mul(MILLI_SESSIONS_PER_SESSION_MS))
        .unwrap_or(0)
}

/// Tracks the sessions of one phase and decides when new ones start.
#[derive(Debug)]
pub struct ConcurrencyEngine {
    phase: Arc<Phase>,
    active: HashSet<SessionId>,
    estimate: usize,
    next_session: SessionId,
    started: u64,
    completed: u64,
    accepting: bool,
    overflow_warned: bool,
}

impl ConcurrencyEngine {
    #[must_use]
    pub fn new(phase: Arc<Phase>) -> Self {
        let estimate = phase.load.session_estimate();
        Self {
            phase,
            active: HashSet::with_capacity(estimate),
            estimate,
            next_session: 0,
            started: 0,
            completed: 0,
            accepting: false,
            overflow_warned: false,
        }
    }

    /// Begin accepting sessions and start the initial ones. Returns `true`
    /// when there is nothing to do at all, e.g. zero sequential repeats.
    pub fn start<L: SessionLauncher>(&mut self, launcher: &mut L) -> bool {
        self.accepting = true;
        match self.phase.load {
            LoadShape::AtOnce { users } | LoadShape::Always { users } => {
                self.launch_many(u64::from(users), launcher);
                false
            }
            LoadShape::Sequentially { repeats } => {
                if repeats == 0 {
                    return true;
                }
                self.launch_one(launcher);
                false
            }
            LoadShape::RampPerSec { .. } | LoadShape::ConstantPerSec { .. } => {
                self.tick(Duration::ZERO, launcher);
                false
            }
            LoadShape::Noop => false,
        }
    }

    /// Catch rate-based loads up to the number of sessions due at
    /// `elapsed`. Returns how many sessions were started.
    pub fn tick<L: SessionLauncher>(&mut self, elapsed: Duration, launcher: &mut L) -> u64 {
        if !self.accepting {
            return 0;
        }
        let due = sessions_due(&self.phase.load, self.phase.duration, elapsed);
        let missing = due.saturating_sub(self.started);
        self.launch_many(missing, launcher);
        missing
    }

    pub fn session_finished<L: SessionLauncher>(
        &mut self,
        session: SessionId,
        launcher: &mut L,
    ) -> SessionCompletion {
        if !self.active.remove(&session) {
            return SessionCompletion::Unknown;
        }
        self.completed = self.completed.saturating_add(1);
        match self.phase.load {
            LoadShape::Always { .. } => {
                if self.accepting {
                    self.launch_one(launcher);
                }
                SessionCompletion::Completed
            }
            LoadShape::Sequentially { repeats } => {
                if self.completed >= u64::from(repeats) {
                    return SessionCompletion::Exhausted;
                }
                if self.accepting {
                    self.launch_one(launcher);
                }
                SessionCompletion::Completed
            }
            LoadShape::AtOnce { .. }
            | LoadShape::RampPerSec { .. }
            | LoadShape::ConstantPerSec { .. }
            | LoadShape::Noop => SessionCompletion::Completed,
        }
    }

    /// Stop starting new sessions; running ones continue.
    pub const fn stop_accepting(&mut self) {
        self.accepting = false;
    }

    /// Cancel every active session. Returns how many were cancelled.
    pub fn cancel_all<L: SessionLauncher>(&mut self, launcher: &mut L) -> usize {
        self.accepting = false;
        let cancelled = self.active.len();
        for session in self.active.drain() {
            launcher.cancel(&self.phase.name, session);
        }
        cancelled
    }

    #[must_use]
    pub fn is_active(&self, session: SessionId) -> bool {
        self.active.contains(&session)
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub const fn started_sessions(&self) -> u64 {
        self.started
    }

    fn launch_many<L: SessionLauncher>(&mut self, count: u64, launcher: &mut L) {
        for _ in 0..count {
            self.launch_one(launcher);
        }
    }

    fn launch_one<L: SessionLauncher>(&mut self, launcher: &mut L) {
        let session = self.next_session;
        self.next_session = self.next_session.saturating_add(1);
        self.started = self.started.saturating_add(1);
        self.active.insert(session);
        if !self.overflow_warned && self.estimate > 0 && self.active.len() > self.estimate {
            warn!(
                "Phase '{}' exceeded its session estimate of {}; allocating more.",
                self.phase.name, self.estimate
            );
            self.overflow_warned = true;
        }
        launcher.launch(&self.phase, session);
    }
}
