// ==============================================================================
// shift.rs — GEAR SHIFT STATE MACHINE
// ------------------------------------------------------------------------------
// A shift is a time-sliced sequence advanced by dt every tick:
//
//   Idle ──shift_into──▶ Shifting{elapsed, duration, from, to}
//                            │  gear changes once, at elapsed >= duration / 2
//                            ▼
//                        PostShiftBan{elapsed, duration}   (optional)
//                            │
//                            ▼
//                          Idle
//
// Only one sequence exists at a time: starting a new one replaces whatever
// state was there (including a ban).
// ==============================================================================

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransmissionEvent {
    Upshift { from: i32, to: i32 },
    Downshift { from: i32, to: i32 },
    Shift { from: i32, to: i32 },
    TriedToShiftWithoutClutch,
}

impl TransmissionEvent {
    /// The direction event plus the generic one, in firing order.
    pub fn for_change(from: i32, to: i32) -> [TransmissionEvent; 2] {
        let direction = if to > from {
            TransmissionEvent::Upshift { from, to }
        } else {
            TransmissionEvent::Downshift { from, to }
        };
        [direction, TransmissionEvent::Shift { from, to }]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ShiftRejection {
    #[error("clutch is engaged past the shift threshold")]
    ClutchEngaged,
    #[error("already in gear {0}")]
    SameGear(i32),
    #[error("gear {0} does not exist")]
    OutOfRange(i32),
    #[error("transmission is destroyed")]
    Destroyed,
    #[error("a shift is already in progress")]
    AlreadyShifting,
    #[error("post-shift ban is active")]
    PostShiftBan,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ShiftState {
    #[default]
    Idle,
    Shifting {
        elapsed: f32,
        duration: f32,
        from: i32,
        to: i32,
        gear_changed: bool,
    },
    PostShiftBan {
        elapsed: f32,
        duration: f32,
    },
}

impl ShiftState {
    pub fn begin(from: i32, to: i32, duration: f32) -> Self {
        ShiftState::Shifting { elapsed: 0.0, duration: duration.max(0.0), from, to, gear_changed: false }
    }

    pub fn is_shifting(&self) -> bool {
        matches!(self, ShiftState::Shifting { .. })
    }

    pub fn ban_active(&self) -> bool {
        matches!(self, ShiftState::PostShiftBan { .. })
    }

    /// 0..1 through the ramp, `None` when not shifting.
    pub fn progress(&self) -> Option<f32> {
        match *self {
            ShiftState::Shifting { elapsed, duration, .. } => {
                if duration <= 0.0 {
                    Some(1.0)
                } else {
                    Some((elapsed / duration).clamp(0.0, 1.0))
                }
            }
            _ => None,
        }
    }

    /// Advances the sequence by `dt`. Returns `(from, to)` on the tick the gear
    /// must change. `ban` is the post-shift ban to enter once the ramp ends
    /// (zero skips it).
    pub fn advance(&mut self, dt: f32, ban: f32) -> Option<(i32, i32)> {
        let dt = dt.max(0.0);
        let mut change = None;
        let mut next = None;

        match self {
            ShiftState::Idle => {}
            ShiftState::Shifting { elapsed, duration, from, to, gear_changed } => {
                *elapsed += dt;
                if !*gear_changed && *elapsed >= *duration * 0.5 {
                    *gear_changed = true;
                    change = Some((*from, *to));
                }
                if *elapsed >= *duration {
                    next = Some(if ban > 0.0 {
                        ShiftState::PostShiftBan { elapsed: 0.0, duration: ban }
                    } else {
                        ShiftState::Idle
                    });
                }
            }
            ShiftState::PostShiftBan { elapsed, duration } => {
                *elapsed += dt;
                if *elapsed >= *duration {
                    next = Some(ShiftState::Idle);
                }
            }
        }

        if let Some(next) = next {
            *self = next;
        }

        change
    }
}
