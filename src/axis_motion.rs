// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::clock::Clock;
use crate::dispatcher::CommandDispatcher;
use crate::error::{MountError, MountResult};
use crate::motion_state::MotionState;
use crate::protocol;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TelescopeAxis {
    Primary,  // RA, E/W.
    Secondary,  // Dec, N/S.
    Tertiary,
}

pub const GUIDE_RATE: f64 = 1.0 / 3600.0;

/// The fixed jog rates, degrees per second. The firmware has no continuous
/// rate control.
pub const AXIS_RATES: [f64; 4] = [GUIDE_RATE, 1.4, 2.2, 3.0];

const RATE_TOLERANCE: f64 = 1e-6;

// After a halt the firmware resumes tracking by itself; wait this long for it.
const HALT_TRACKING_WAIT: Duration = Duration::from_secs(2);
const HALT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// Returns the preset select command for a non-zero rate magnitude.
pub fn rate_select_command(rate: f64) -> Option<&'static str> {
    let magnitude = rate.abs();
    let commands = [protocol::RATE_GUIDE, protocol::RATE_CENTER,
                    protocol::RATE_FIND, protocol::RATE_SLEW];
    AXIS_RATES.iter().zip(commands)
        .find(|(preset, _)| (magnitude - **preset).abs() < RATE_TOLERANCE)
        .map(|(_, command)| command)
}

pub fn can_move_axis(axis: TelescopeAxis) -> bool {
    axis != TelescopeAxis::Tertiary
}

/// Handles MoveAxis: jogs an axis at one of the preset rates until told to
/// stop with rate 0.
pub struct AxisMotionController {
    dispatcher: Arc<CommandDispatcher>,
    state: Arc<MotionState>,
    clock: Arc<dyn Clock>,
}

impl AxisMotionController {
    pub fn new(dispatcher: Arc<CommandDispatcher>,
               state: Arc<MotionState>,
               clock: Arc<dyn Clock>) -> Self {
        AxisMotionController { dispatcher, state, clock }
    }

    /// `rate` is degrees per second; its sign picks the direction. Primary
    /// positive is east, secondary positive is north.
    pub fn move_axis(&self, axis: TelescopeAxis, rate: f64) -> MountResult<()> {
        self.dispatcher.ensure_connected("MoveAxis")?;
        if self.state.lock().is_parked {
            return Err(MountError::Parked("MoveAxis".to_string()));
        }
        if axis == TelescopeAxis::Tertiary {
            return Err(MountError::InvalidValue(
                "tertiary axis is not supported".to_string()));
        }
        if self.state.lock().goto_in_flight() {
            return Err(MountError::ConcurrencyConflict(
                "GoTo in progress".to_string()));
        }
        if rate == 0.0 {
            return self.halt_axis(axis);
        }
        let Some(select) = rate_select_command(rate) else {
            return Err(MountError::InvalidValue(format!(
                "rate {} is not one of {:?} deg/s", rate, AXIS_RATES)));
        };

        {
            let flags = self.state.lock();
            let (moving, guiding) = match axis {
                TelescopeAxis::Primary =>
                    (flags.moving_primary, flags.guiding_east_west),
                _ => (flags.moving_secondary, flags.guiding_north_south),
            };
            if moving {
                return Err(MountError::ConcurrencyConflict(format!(
                    "{:?} axis already in motion", axis)));
            }
            if guiding {
                return Err(MountError::ConcurrencyConflict(format!(
                    "{:?} axis is pulse guiding", axis)));
            }
        }

        let direction = match (axis, rate > 0.0) {
            (TelescopeAxis::Primary, true) => protocol::MOVE_EAST,
            (TelescopeAxis::Primary, false) => protocol::MOVE_WEST,
            (_, true) => protocol::MOVE_NORTH,
            (_, false) => protocol::MOVE_SOUTH,
        };
        self.dispatcher.send_blind(select)?;
        self.dispatcher.send_blind(direction)?;

        let mut flags = self.state.lock();
        match axis {
            TelescopeAxis::Primary => flags.moving_primary = true,
            _ => flags.moving_secondary = true,
        }
        flags.is_slewing = true;
        info!("Moving {:?} axis at {} deg/s", axis, rate);
        Ok(())
    }

    fn halt_axis(&self, axis: TelescopeAxis) -> MountResult<()> {
        let (first, second) = match axis {
            TelescopeAxis::Primary => (protocol::HALT_EAST, protocol::HALT_WEST),
            _ => (protocol::HALT_NORTH, protocol::HALT_SOUTH),
        };
        self.dispatcher.send_blind(first)?;
        self.dispatcher.send_blind(second)?;

        // Only a mount that was commanded to track will resume on its own.
        if self.state.lock().track_set_follower {
            self.wait_for_tracking()?;
        }

        let mut flags = self.state.lock();
        match axis {
            TelescopeAxis::Primary => flags.moving_primary = false,
            _ => flags.moving_secondary = false,
        }
        flags.is_slewing = flags.moving_primary || flags.moving_secondary;
        info!("Stopped {:?} axis", axis);
        Ok(())
    }

    fn wait_for_tracking(&self) -> MountResult<()> {
        let start = self.clock.now();
        loop {
            if protocol::read_tracking(&self.dispatcher)? {
                debug!("Tracking resumed after {:?}", self.clock.now() - start);
                return Ok(());
            }
            if self.clock.now() - start >= HALT_TRACKING_WAIT {
                warn!("Tracking did not resume within {:?} of halt",
                      HALT_TRACKING_WAIT);
                return Ok(());
            }
            self.clock.sleep(HALT_POLL_INTERVAL);
        }
    }
}
