// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Drive rates the mount firmware offers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrackingRate {
    #[default]
    Sidereal,
    Lunar,
    Solar,
}

pub const TRACKING_RATES: [TrackingRate; 3] =
    [TrackingRate::Sidereal, TrackingRate::Lunar, TrackingRate::Solar];

/// Slew/sync target. The firmware cannot report its target, so the driver
/// remembers what it last sent.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Target {
    pub right_ascension: f64,  // Hours.
    pub declination: f64,  // Degrees.
    pub ra_set: bool,
    pub dec_set: bool,
}

impl Target {
    pub fn is_set(&self) -> bool {
        self.ra_set && self.dec_set
    }

    // Values are kept for logging; only the set flags are dropped.
    pub fn invalidate(&mut self) {
        self.ra_set = false;
        self.dec_set = false;
    }
}

#[derive(Clone, Debug, Default)]
pub struct MotionFlags {
    // Jog in progress per axis. Primary is RA (E/W), secondary is Dec (N/S).
    pub moving_primary: bool,
    pub moving_secondary: bool,

    // Three views of motion: anything moving; a GoTo started through the
    // async entry point; a GoTo to the target in flight.
    pub is_slewing: bool,
    pub is_slewing_async: bool,
    pub is_slewing_to_target: bool,

    // Pulse guide in progress on the N/S and E/W pairs.
    pub guiding_north_south: bool,
    pub guiding_east_west: bool,

    pub is_parked: bool,
    pub tracking_rate: TrackingRate,
    pub target: Target,

    // Set when an async GoTo has arrived and is waiting out the settle time.
    pub slew_settle_start: Option<Instant>,

    // Last commanded tracking on/off, restored after an abort.
    pub track_set_follower: bool,

    // Lets an Alt/Az derived GoTo start while tracking is off.
    pub slew_alt_az_track_override: bool,
}

impl MotionFlags {
    pub fn is_pulse_guiding(&self) -> bool {
        self.guiding_north_south || self.guiding_east_west
    }

    pub fn goto_in_flight(&self) -> bool {
        self.is_slewing_to_target
    }

    // Clears everything that describes motion, leaving configuration-like
    // state (parked, rate, follower) alone.
    pub fn clear_motion(&mut self) {
        self.moving_primary = false;
        self.moving_secondary = false;
        self.is_slewing = false;
        self.is_slewing_async = false;
        self.is_slewing_to_target = false;
        self.guiding_north_south = false;
        self.guiding_east_west = false;
        self.slew_settle_start = None;
    }
}

/// Motion state shared by the controllers. One coarse lock guards all flags;
/// it is never held across device I/O.
#[derive(Debug, Default)]
pub struct MotionState {
    flags: Mutex<MotionFlags>,
}

impl MotionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, MotionFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> MotionFlags {
        self.lock().clone()
    }

    pub fn reset(&self) {
        *self.lock() = MotionFlags::default();
    }
}
