// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

pub mod axis_motion;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod motion_state;
pub mod mount;
pub mod profile;
pub mod protocol;
pub mod pulse_guide;
pub mod slew;
pub mod transport;

#[cfg(feature = "alpaca")]
pub mod alpaca;

#[cfg(test)]
mod testing;
