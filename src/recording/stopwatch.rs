//! Stopwatch with pause.
//!
//! Elapsed and paused time are derived from the state, so
//! `active = elapsed - paused` holds by construction.

use chrono::{DateTime, Utc};

/// Tagged-state session timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stopwatch {
    /// Not timing
    #[default]
    Stopped,
    /// Counting active time
    Running {
        started_at: DateTime<Utc>,
        paused_total_ms: i64,
    },
    /// Counting paused time since `paused_at`
    Paused {
        started_at: DateTime<Utc>,
        paused_total_ms: i64,
        paused_at: DateTime<Utc>,
    },
}

impl Stopwatch {
    /// A stopwatch running since `now`.
    pub fn started(now: DateTime<Utc>) -> Self {
        Stopwatch::Running {
            started_at: now,
            paused_total_ms: 0,
        }
    }

    /// Pause a running stopwatch. Returns false in any other state.
    pub fn pause(&mut self, now: DateTime<Utc>) -> bool {
        match *self {
            Stopwatch::Running {
                started_at,
                paused_total_ms,
            } => {
                *self = Stopwatch::Paused {
                    started_at,
                    paused_total_ms,
                    paused_at: now,
                };
                true
            }
            _ => false,
        }
    }

    /// Resume a paused stopwatch, committing the pause gap.
    pub fn resume(&mut self, now: DateTime<Utc>) -> bool {
        match *self {
            Stopwatch::Paused {
                started_at,
                paused_total_ms,
                paused_at,
            } => {
                let gap = (now - paused_at).num_milliseconds().max(0);
                *self = Stopwatch::Running {
                    started_at,
                    paused_total_ms: paused_total_ms + gap,
                };
                true
            }
            _ => false,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match *self {
            Stopwatch::Stopped => None,
            Stopwatch::Running { started_at, .. } | Stopwatch::Paused { started_at, .. } => {
                Some(started_at)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Stopwatch::Running { .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Stopwatch::Paused { .. })
    }

    /// Wall-clock time since start.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        self.started_at()
            .map(|start| (now - start).num_milliseconds().max(0))
            .unwrap_or(0)
    }

    /// Paused time committed by completed pauses.
    pub fn paused_ms(&self) -> i64 {
        match *self {
            Stopwatch::Stopped => 0,
            Stopwatch::Running {
                paused_total_ms, ..
            }
            | Stopwatch::Paused {
                paused_total_ms, ..
            } => paused_total_ms,
        }
    }

    /// Paused time including an open pause, never more than elapsed.
    pub fn paused_ms_at(&self, now: DateTime<Utc>) -> i64 {
        let open = match *self {
            Stopwatch::Paused { paused_at, .. } => (now - paused_at).num_milliseconds().max(0),
            _ => 0,
        };
        (self.paused_ms() + open).min(self.elapsed_ms(now))
    }

    /// Elapsed minus paused time.
    pub fn active_ms(&self, now: DateTime<Utc>) -> i64 {
        self.elapsed_ms(now) - self.paused_ms_at(now)
    }
}
