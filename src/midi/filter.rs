// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Input filtering and SysEx continuation tracking.
//!
//! Every raw fragment is classified by its leading byte. Classification
//! decides whether the fragment is accumulated and whether a completed
//! message is delivered. SysEx continuation state is tracked even when
//! SysEx delivery is switched off, so the fragment after an ignored SysEx is
//! still recognised as a fresh message.

use serde::{Deserialize, Serialize};

use super::messages;

/// Which classes of incoming messages to drop. Fixed for the lifetime of an
/// input endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_ignore")]
    pub ignore_sysex: bool,
    /// MIDI Time Code and Timing Clock
    #[serde(default = "default_ignore")]
    pub ignore_timing: bool,
    /// Active Sensing
    #[serde(default = "default_ignore")]
    pub ignore_sensing: bool,
}

fn default_ignore() -> bool {
    true
}

impl FilterConfig {
    /// Deliver everything.
    pub const NONE: FilterConfig = FilterConfig {
        ignore_sysex: false,
        ignore_timing: false,
        ignore_sensing: false,
    };

    /// Drop SysEx, timing and sensing.
    pub const ALL: FilterConfig = FilterConfig {
        ignore_sysex: true,
        ignore_timing: true,
        ignore_sensing: true,
    };
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::ALL
    }
}

/// Whether a SysEx is spread over several fragments and not yet terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SysexState {
    pub continuing: bool,
}

impl SysexState {
    pub fn reset(&mut self) {
        self.continuing = false;
    }
}

/// What a fragment turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// Starts with `F0`.
    SysexStart,
    /// Any non-timing fragment arriving while a SysEx is open.
    SysexContinuation,
    /// `F1` or `F8`.
    Timing,
    /// `FE`.
    Sensing,
    /// Everything else.
    Message,
}

impl EventClass {
    pub fn is_sysex(self) -> bool {
        matches!(self, EventClass::SysexStart | EventClass::SysexContinuation)
    }
}

/// Outcome of [`FilterPolicy::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub class: EventClass,
    /// The fragment's bytes go into the message being built.
    pub accumulate: bool,
    /// The message being built is complete and should be handed out.
    pub deliver: bool,
}

impl Decision {
    /// Filtered out on purpose (as opposed to held back for more fragments).
    pub fn is_suppressed(self) -> bool {
        !self.accumulate
    }
}

/// Applies a [`FilterConfig`] to incoming fragments.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterPolicy {
    config: FilterConfig,
}

impl FilterPolicy {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> FilterConfig {
        self.config
    }

    /// Classify `fragment` and update `state`.
    ///
    /// Empty fragments must be rejected by the caller.
    pub fn apply(&self, fragment: &[u8], state: &mut SysexState) -> Decision {
        let (first, last) = match (fragment.first(), fragment.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => {
                return Decision {
                    class: EventClass::Message,
                    accumulate: false,
                    deliver: false,
                }
            }
        };

        match first {
            messages::SYSEX_START => {
                state.continuing = last != messages::SYSEX_END;
                self.sysex(EventClass::SysexStart, state)
            }
            messages::TIME_CODE | messages::TIMING_CLOCK => {
                self.realtime(EventClass::Timing, self.config.ignore_timing, state)
            }
            messages::ACTIVE_SENSING => {
                self.realtime(EventClass::Sensing, self.config.ignore_sensing, state)
            }
            _ if state.continuing => {
                state.continuing = last != messages::SYSEX_END;
                self.sysex(EventClass::SysexContinuation, state)
            }
            _ => self.standalone(EventClass::Message, false),
        }
    }

    fn sysex(&self, class: EventClass, state: &SysexState) -> Decision {
        let keep = !self.config.ignore_sysex;
        Decision {
            class,
            accumulate: keep,
            deliver: keep && !state.continuing,
        }
    }

    /// Timing and sensing bytes. Inside a SysEx they join the pending
    /// message and are delivered with it.
    fn realtime(&self, class: EventClass, ignored: bool, state: &SysexState) -> Decision {
        if !state.continuing {
            return self.standalone(class, ignored);
        }
        Decision {
            class,
            accumulate: !ignored && !self.config.ignore_sysex,
            deliver: false,
        }
    }

    fn standalone(&self, class: EventClass, ignored: bool) -> Decision {
        Decision {
            class,
            accumulate: !ignored,
            deliver: !ignored,
        }
    }
}
