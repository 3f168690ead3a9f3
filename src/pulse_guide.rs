// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::clock::Clock;
use crate::dispatcher::CommandDispatcher;
use crate::error::{MountError, MountResult};
use crate::motion_state::{MotionFlags, MotionState};
use crate::profile::GuideCompensation;
use crate::protocol;

pub const MAX_PULSE_MS: u32 = 9999;

// cos() of anything above this is too close to zero to divide by.
const MAX_COMPENSATION_ALTITUDE: f64 = 89.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuideDirection {
    North,
    South,
    East,
    West,
}

impl GuideDirection {
    fn letter(&self) -> char {
        match self {
            GuideDirection::North => 'n',
            GuideDirection::South => 's',
            GuideDirection::East => 'e',
            GuideDirection::West => 'w',
        }
    }

    fn is_east_west(&self) -> bool {
        matches!(self, GuideDirection::East | GuideDirection::West)
    }
}

/// `:Mg<d><NNNN>#`, duration zero padded to four digits.
pub fn guide_command(direction: GuideDirection, duration_ms: u32) -> String {
    format!(":Mg{}{:04}#", direction.letter(), duration_ms.min(MAX_PULSE_MS))
}

/// Lengthens an E/W pulse by 1/cos(altitude), so that the sky motion it
/// produces does not shrink as the mount points higher. Never exceeds
/// `duration_ms + max_delta_ms - buffer_ms` once the raw value would pass
/// `duration_ms + max_delta_ms`, nor the four digits the command carries.
pub fn compensated_duration(duration_ms: u32, altitude: f64,
                            compensation: &GuideCompensation) -> u32 {
    let altitude = altitude.min(MAX_COMPENSATION_ALTITUDE);
    let compensated =
        (duration_ms as f64 / altitude.to_radians().cos()).round() as u32;
    let limit = duration_ms.saturating_add(compensation.max_delta_ms);
    let result = if compensated > limit {
        limit.saturating_sub(compensation.buffer_ms)
    } else {
        compensated
    };
    result.min(MAX_PULSE_MS)
}

// Clears the guiding flag however the pulse ends.
struct GuidingGuard<'a> {
    state: &'a MotionState,
    east_west: bool,
}

impl Drop for GuidingGuard<'_> {
    fn drop(&mut self) {
        let mut flags = self.state.lock();
        if self.east_west {
            flags.guiding_east_west = false;
        } else {
            flags.guiding_north_south = false;
        }
    }
}

/// Timed guide pulses, blocking for the pulse length.
pub struct PulseGuideController {
    dispatcher: Arc<CommandDispatcher>,
    state: Arc<MotionState>,
    clock: Arc<dyn Clock>,
    compensation: GuideCompensation,
}

impl PulseGuideController {
    pub fn new(dispatcher: Arc<CommandDispatcher>,
               state: Arc<MotionState>,
               clock: Arc<dyn Clock>,
               compensation: GuideCompensation) -> Self {
        PulseGuideController { dispatcher, state, clock, compensation }
    }

    pub fn pulse_guide(&self, direction: GuideDirection, duration_ms: i32)
                       -> MountResult<()> {
        self.dispatcher.ensure_connected("PulseGuide")?;
        let duration_ms = match u32::try_from(duration_ms) {
            Ok(d) if d <= MAX_PULSE_MS => d,
            _ => {
                return Err(MountError::InvalidValue(format!(
                    "pulse duration {} ms outside 0..={}", duration_ms,
                    MAX_PULSE_MS)));
            }
        };
        let east_west = direction.is_east_west();
        {
            let mut flags = self.state.lock();
            check_guide_allowed(&flags, east_west)?;
            if east_west {
                flags.guiding_east_west = true;
            } else {
                flags.guiding_north_south = true;
            }
        }
        let _guard = GuidingGuard { state: &self.state, east_west };

        let pulse_ms = if east_west && self.compensation.enabled {
            let altitude = protocol::read_altitude(&self.dispatcher)?;
            let pulse_ms =
                compensated_duration(duration_ms, altitude, &self.compensation);
            debug!("Compensated {} ms to {} ms at altitude {:.2}",
                   duration_ms, pulse_ms, altitude);
            pulse_ms
        } else {
            duration_ms
        };

        self.dispatcher.send_blind(&guide_command(direction, pulse_ms))?;
        self.clock.sleep(Duration::from_millis(pulse_ms as u64));
        info!("Guided {:?} for {} ms", direction, pulse_ms);
        Ok(())
    }
}

fn check_guide_allowed(flags: &MotionFlags, east_west: bool)
                       -> MountResult<()> {
    if flags.is_parked {
        return Err(MountError::Parked("PulseGuide".to_string()));
    }
    if flags.goto_in_flight() {
        return Err(MountError::ConcurrencyConflict(
            "GoTo in progress".to_string()));
    }
    let (moving, guiding) = if east_west {
        (flags.moving_primary, flags.guiding_east_west)
    } else {
        (flags.moving_secondary, flags.guiding_north_south)
    };
    if moving {
        return Err(MountError::ConcurrencyConflict(
            "axis is being moved".to_string()));
    }
    if guiding {
        return Err(MountError::ConcurrencyConflict(
            "axis is already guiding".to_string()));
    }
    Ok(())
}
