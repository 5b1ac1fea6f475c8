use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Watchdog bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailsafeConfig {
    /// Absolute cap on one recording
    pub max_recording_ms: u64,

    /// Secondary cap, fires even if VAD never reports silence
    pub force_stop_ms: u64,

    /// Recording is stopped after this long without a clearly voiced tick
    pub low_activity_timeout_ms: u64,

    /// Wait for the assessment after `end_interview`
    pub assessment_timeout_ms: u64,

    /// Delay before listening resumes after a server error
    pub error_rearm_delay_ms: u64,
}

impl Default for FailsafeConfig {
    fn default() -> Self {
        Self {
            max_recording_ms: 60_000,
            force_stop_ms: 65_000,
            low_activity_timeout_ms: 8_000,
            assessment_timeout_ms: 30_000,
            error_rearm_delay_ms: 1_500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailsafeKind {
    MaxRecording,
    ForceStop,
    LowActivity,
    Assessment,
    ErrorRearm,
    /// Interview time limit announced in the greeting
    TimeLimit,
}

impl FailsafeKind {
    const ALL: [FailsafeKind; 6] = [
        FailsafeKind::MaxRecording,
        FailsafeKind::ForceStop,
        FailsafeKind::LowActivity,
        FailsafeKind::Assessment,
        FailsafeKind::ErrorRearm,
        FailsafeKind::TimeLimit,
    ];
}

impl fmt::Display for FailsafeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailsafeKind::MaxRecording => "max-recording",
            FailsafeKind::ForceStop => "force-stop",
            FailsafeKind::LowActivity => "low-activity",
            FailsafeKind::Assessment => "assessment",
            FailsafeKind::ErrorRearm => "error-rearm",
            FailsafeKind::TimeLimit => "time-limit",
        };
        f.write_str(name)
    }
}

/// A single cancelable deadline
#[derive(Debug, Default, Clone, Copy)]
pub struct Watchdog {
    deadline: Option<Instant>,
}

impl Watchdog {
    /// Arm (or re-arm) to fire `after` from now
    ///
    /// A delay too large to represent leaves the watchdog disarmed.
    pub fn arm(&mut self, after: Duration) {
        self.deadline = Instant::now().checked_add(after);
        if self.deadline.is_none() {
            warn!("Watchdog delay {:?} out of range, not armed", after);
        }
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// All watchdogs of one session
///
/// Holds deadlines only; the controller sleeps until [`next_deadline`](Self::next_deadline)
/// and reports the firing back with [`fire`](Self::fire).
#[derive(Debug, Default)]
pub struct Failsafes {
    config: FailsafeConfig,
    max_recording: Watchdog,
    force_stop: Watchdog,
    low_activity: Watchdog,
    assessment: Watchdog,
    error_rearm: Watchdog,
    time_limit: Watchdog,
}

impl Failsafes {
    pub fn new(config: FailsafeConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Configured delay for a watchdog; `None` for the time limit, which is per interview
    pub fn delay(&self, kind: FailsafeKind) -> Option<Duration> {
        let ms = match kind {
            FailsafeKind::MaxRecording => self.config.max_recording_ms,
            FailsafeKind::ForceStop => self.config.force_stop_ms,
            FailsafeKind::LowActivity => self.config.low_activity_timeout_ms,
            FailsafeKind::Assessment => self.config.assessment_timeout_ms,
            FailsafeKind::ErrorRearm => self.config.error_rearm_delay_ms,
            FailsafeKind::TimeLimit => return None,
        };
        Some(Duration::from_millis(ms))
    }

    /// Arm with the configured delay
    pub fn arm(&mut self, kind: FailsafeKind) {
        match self.delay(kind) {
            Some(delay) => self.arm_for(kind, delay),
            None => debug!("Watchdog {} has no configured delay, not armed", kind),
        }
    }

    pub fn arm_for(&mut self, kind: FailsafeKind, delay: Duration) {
        self.watchdog_mut(kind).arm(delay);
    }

    pub fn disarm(&mut self, kind: FailsafeKind) {
        self.watchdog_mut(kind).disarm();
    }

    /// Disarm the watchdogs bounding a recording
    pub fn disarm_recording(&mut self) {
        self.max_recording.disarm();
        self.force_stop.disarm();
        self.low_activity.disarm();
    }

    pub fn disarm_all(&mut self) {
        for kind in FailsafeKind::ALL {
            self.disarm(kind);
        }
    }

    pub fn is_armed(&self, kind: FailsafeKind) -> bool {
        self.watchdog(kind).is_armed()
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<(FailsafeKind, Instant)> {
        FailsafeKind::ALL
            .into_iter()
            .filter_map(|kind| self.watchdog(kind).deadline().map(|at| (kind, at)))
            .min_by_key(|(_, at)| *at)
    }

    /// Record that a watchdog fired; it is disarmed and will not fire again
    pub fn fire(&mut self, kind: FailsafeKind) {
        debug!("Watchdog fired: {}", kind);
        self.disarm(kind);
    }

    fn watchdog(&self, kind: FailsafeKind) -> &Watchdog {
        match kind {
            FailsafeKind::MaxRecording => &self.max_recording,
            FailsafeKind::ForceStop => &self.force_stop,
            FailsafeKind::LowActivity => &self.low_activity,
            FailsafeKind::Assessment => &self.assessment,
            FailsafeKind::ErrorRearm => &self.error_rearm,
            FailsafeKind::TimeLimit => &self.time_limit,
        }
    }

    fn watchdog_mut(&mut self, kind: FailsafeKind) -> &mut Watchdog {
        match kind {
            FailsafeKind::MaxRecording => &mut self.max_recording,
            FailsafeKind::ForceStop => &mut self.force_stop,
            FailsafeKind::LowActivity => &mut self.low_activity,
            FailsafeKind::Assessment => &mut self.assessment,
            FailsafeKind::ErrorRearm => &mut self.error_rearm,
            FailsafeKind::TimeLimit => &mut self.time_limit,
        }
    }
}

/// Sleep until the given deadline, or forever when there is none
pub async fn sleep_until_deadline(next: Option<(FailsafeKind, Instant)>) -> FailsafeKind {
    match next {
        Some((kind, at)) => {
            tokio::time::sleep_until(at).await;
            kind
        }
        None => std::future::pending().await,
    }
}
