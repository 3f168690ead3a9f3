// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{info, warn};
use tts160_elements::astro_util::{
    equatorial_from_horizon, local_sidereal_time, HorizonCoordinates};

use crate::axis_motion::{self, AxisMotionController, TelescopeAxis, AXIS_RATES};
use crate::clock::{Clock, SystemClock};
use crate::dispatcher::CommandDispatcher;
use crate::error::{MountError, MountResult};
use crate::motion_state::{MotionFlags, MotionState, TrackingRate, TRACKING_RATES};
use crate::profile::{Profile, MAX_SLEW_SETTLE_TIME};
use crate::protocol;
use crate::pulse_guide::{GuideDirection, PulseGuideController};
use crate::slew::SlewController;
use crate::transport::{SerialTransport, Transport};

fn tracking_rate_command(rate: TrackingRate) -> &'static str {
    match rate {
        TrackingRate::Sidereal => protocol::TRACK_SIDEREAL,
        TrackingRate::Lunar => protocol::TRACK_LUNAR,
        TrackingRate::Solar => protocol::TRACK_SOLAR,
    }
}

fn check_right_ascension(hours: f64) -> MountResult<()> {
    if (0.0..24.0).contains(&hours) {
        Ok(())
    } else {
        Err(MountError::InvalidValue(format!(
            "right ascension {} outside [0, 24)", hours)))
    }
}

fn check_declination(degrees: f64) -> MountResult<()> {
    if (-90.0..=90.0).contains(&degrees) {
        Ok(())
    } else {
        Err(MountError::InvalidValue(format!(
            "declination {} outside [-90, 90]", degrees)))
    }
}

/// A TTS-160 mount. All methods take `&self`; share it with `Arc`.
pub struct Mount {
    profile: Profile,
    dispatcher: Arc<CommandDispatcher>,
    state: Arc<MotionState>,
    axes: AxisMotionController,
    slew: SlewController,
    guide: PulseGuideController,
}

impl Mount {
    pub fn new(profile: Profile) -> Self {
        Self::with_clock(profile, Arc::new(SystemClock))
    }

    pub fn with_clock(profile: Profile, clock: Arc<dyn Clock>) -> Self {
        let dispatcher = Arc::new(CommandDispatcher::new());
        let state = Arc::new(MotionState::new());
        let axes = AxisMotionController::new(
            dispatcher.clone(), state.clone(), clock.clone());
        let slew = SlewController::new(
            dispatcher.clone(), state.clone(), clock.clone(),
            profile.settle_duration());
        let guide = PulseGuideController::new(
            dispatcher.clone(), state.clone(), clock,
            profile.guide_compensation);
        Mount { profile, dispatcher, state, axes, slew, guide }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Current motion flags, for diagnostics.
    pub fn motion_flags(&self) -> MotionFlags {
        self.state.snapshot()
    }

    // Connection.

    pub fn connect(&self, transport: Box<dyn Transport>) -> MountResult<()> {
        self.dispatcher.attach(transport);
        self.state.reset();
        let status = match protocol::read_status(&self.dispatcher) {
            Ok(status) => status,
            Err(e) => {
                self.dispatcher.detach();
                return Err(e);
            }
        };
        {
            let mut flags = self.state.lock();
            flags.track_set_follower = status.tracking;
            flags.is_parked = status.parked;
        }
        if let Some(rate) = self.profile.tracking_rate_on_connect.rate() {
            if let Err(e) = self.set_tracking_rate(rate) {
                self.dispatcher.detach();
                return Err(e);
            }
        }
        info!("Connected; tracking {} parked {}", status.tracking, status.parked);
        Ok(())
    }

    pub fn connect_serial(&self) -> MountResult<()> {
        let transport = SerialTransport::open(&self.profile.com_port,
                                              self.profile.serial_timeout())?;
        self.connect(Box::new(transport))
    }

    pub fn disconnect(&self) {
        if self.state.lock().is_slewing {
            warn!("Disconnecting while the mount is in motion");
        }
        self.dispatcher.detach();
    }

    pub fn is_connected(&self) -> bool {
        self.dispatcher.is_connected()
    }

    // Position.

    pub fn right_ascension(&self) -> MountResult<f64> {
        protocol::parse_sexagesimal(
            &self.dispatcher.send_string(protocol::GET_RIGHT_ASCENSION)?)
    }

    pub fn declination(&self) -> MountResult<f64> {
        protocol::parse_sexagesimal(
            &self.dispatcher.send_string(protocol::GET_DECLINATION)?)
    }

    pub fn altitude(&self) -> MountResult<f64> {
        protocol::read_altitude(&self.dispatcher)
    }

    pub fn azimuth(&self) -> MountResult<f64> {
        protocol::read_azimuth(&self.dispatcher)
    }

    /// Hours. From the mount's clock when connected, otherwise computed for
    /// the profile's site longitude.
    pub fn sidereal_time(&self) -> MountResult<f64> {
        if !self.is_connected() {
            return Ok(local_sidereal_time(self.profile.site_longitude,
                                          &SystemTime::now()));
        }
        protocol::read_sidereal_time(&self.dispatcher)
    }

    // Site coordinates come from the mount once connected; the profile's
    // values stand in before that.

    pub fn site_latitude(&self) -> MountResult<f64> {
        if !self.is_connected() {
            return Ok(self.profile.site_latitude);
        }
        protocol::read_site_latitude(&self.dispatcher)
    }

    pub fn site_longitude(&self) -> MountResult<f64> {
        if !self.is_connected() {
            return Ok(self.profile.site_longitude);
        }
        protocol::read_site_longitude(&self.dispatcher)
    }

    pub fn site_elevation(&self) -> f64 {
        self.profile.site_elevation
    }

    // Target.

    pub fn target_right_ascension(&self) -> MountResult<f64> {
        let flags = self.state.lock();
        if flags.target.ra_set {
            Ok(flags.target.right_ascension)
        } else {
            Err(MountError::ValueNotSet("target right ascension".to_string()))
        }
    }

    pub fn target_declination(&self) -> MountResult<f64> {
        let flags = self.state.lock();
        if flags.target.dec_set {
            Ok(flags.target.declination)
        } else {
            Err(MountError::ValueNotSet("target declination".to_string()))
        }
    }

    pub fn set_target_right_ascension(&self, hours: f64) -> MountResult<()> {
        self.dispatcher.ensure_connected("TargetRightAscension")?;
        check_right_ascension(hours)?;
        let command = protocol::set_target_ra_command(hours);
        if !self.dispatcher.send_bool(&command)? {
            return Err(MountError::InvalidValue(format!(
                "mount rejected target right ascension {}",
                protocol::format_ra(hours))));
        }
        let mut flags = self.state.lock();
        flags.target.right_ascension = hours;
        flags.target.ra_set = true;
        Ok(())
    }

    pub fn set_target_declination(&self, degrees: f64) -> MountResult<()> {
        self.dispatcher.ensure_connected("TargetDeclination")?;
        check_declination(degrees)?;
        let command = protocol::set_target_dec_command(degrees);
        if !self.dispatcher.send_bool(&command)? {
            return Err(MountError::InvalidValue(format!(
                "mount rejected target declination {}",
                protocol::format_dec(degrees))));
        }
        let mut flags = self.state.lock();
        flags.target.declination = degrees;
        flags.target.dec_set = true;
        Ok(())
    }

    fn set_target(&self, ra: f64, dec: f64) -> MountResult<()> {
        check_right_ascension(ra)?;
        check_declination(dec)?;
        self.set_target_right_ascension(ra)?;
        self.set_target_declination(dec)
    }

    // Tracking.

    pub fn tracking(&self) -> MountResult<bool> {
        protocol::read_tracking(&self.dispatcher)
    }

    pub fn set_tracking(&self, enabled: bool) -> MountResult<()> {
        self.dispatcher.ensure_connected("Tracking")?;
        if self.state.lock().is_parked {
            return Err(MountError::Parked("Tracking".to_string()));
        }
        self.dispatcher.send_blind(if enabled {
            protocol::TRACKING_ON
        } else {
            protocol::TRACKING_OFF
        })?;
        self.state.lock().track_set_follower = enabled;
        info!("Tracking {}", if enabled { "on" } else { "off" });
        Ok(())
    }

    pub fn tracking_rate(&self) -> TrackingRate {
        self.state.lock().tracking_rate
    }

    pub fn set_tracking_rate(&self, rate: TrackingRate) -> MountResult<()> {
        self.dispatcher.ensure_connected("TrackingRate")?;
        self.dispatcher.send_blind(tracking_rate_command(rate))?;
        self.state.lock().tracking_rate = rate;
        info!("Tracking rate {:?}", rate);
        Ok(())
    }

    pub fn tracking_rates(&self) -> &'static [TrackingRate] {
        &TRACKING_RATES
    }

    // Jog and guide.

    pub fn can_move_axis(&self, axis: TelescopeAxis) -> bool {
        axis_motion::can_move_axis(axis)
    }

    /// Degrees per second. Each rate is a single value, not a range.
    pub fn axis_rates(&self, axis: TelescopeAxis) -> &'static [f64] {
        if axis_motion::can_move_axis(axis) {
            &AXIS_RATES
        } else {
            &[]
        }
    }

    pub fn move_axis(&self, axis: TelescopeAxis, rate: f64) -> MountResult<()> {
        self.axes.move_axis(axis, rate)
    }

    pub fn pulse_guide(&self, direction: GuideDirection, duration_ms: i32)
                       -> MountResult<()> {
        self.guide.pulse_guide(direction, duration_ms)
    }

    pub fn is_pulse_guiding(&self) -> bool {
        self.state.lock().is_pulse_guiding()
    }

    // GoTo.

    pub fn slew_to_target(&self) -> MountResult<()> {
        self.slew.slew_to_target()
    }

    pub fn slew_to_target_async(&self) -> MountResult<()> {
        self.slew.slew_to_target_async()
    }

    pub fn slew_to_coordinates(&self, ra: f64, dec: f64) -> MountResult<()> {
        self.set_target(ra, dec)?;
        self.slew.slew_to_target()
    }

    pub fn slew_to_coordinates_async(&self, ra: f64, dec: f64)
                                     -> MountResult<()> {
        self.set_target(ra, dec)?;
        self.slew.slew_to_target_async()
    }

    pub fn slew_to_alt_az(&self, altitude: f64, azimuth: f64)
                          -> MountResult<()> {
        self.slew_from_horizon(altitude, azimuth, /*async_slew=*/false)
    }

    pub fn slew_to_alt_az_async(&self, altitude: f64, azimuth: f64)
                                -> MountResult<()> {
        self.slew_from_horizon(altitude, azimuth, /*async_slew=*/true)
    }

    // Converts to RA/Dec for the mount's site and slews there, allowing the
    // GoTo even with tracking off.
    fn slew_from_horizon(&self, altitude: f64, azimuth: f64, async_slew: bool)
                         -> MountResult<()> {
        self.dispatcher.ensure_connected("SlewToAltAz")?;
        if !(-90.0..=90.0).contains(&altitude) {
            return Err(MountError::InvalidValue(format!(
                "altitude {} outside [-90, 90]", altitude)));
        }
        if !(0.0..360.0).contains(&azimuth) {
            return Err(MountError::InvalidValue(format!(
                "azimuth {} outside [0, 360)", azimuth)));
        }
        let latitude = self.site_latitude()?;
        let longitude = self.site_longitude()?;
        let eq = equatorial_from_horizon(
            &HorizonCoordinates { altitude, azimuth },
            latitude, longitude, &SystemTime::now());
        info!("Alt {:.4} Az {:.4} is RA {} Dec {}", altitude, azimuth,
              protocol::format_ra(eq.right_ascension),
              protocol::format_dec(eq.declination));

        self.state.lock().slew_alt_az_track_override = true;
        let result = if async_slew {
            self.slew_to_coordinates_async(eq.right_ascension, eq.declination)
        } else {
            self.slew_to_coordinates(eq.right_ascension, eq.declination)
        };
        self.state.lock().slew_alt_az_track_override = false;
        result
    }

    pub fn slewing(&self) -> MountResult<bool> {
        self.slew.slewing()
    }

    pub fn abort_slew(&self) {
        self.slew.abort_slew();
    }

    pub fn slew_settle_time(&self) -> u32 {
        self.slew.settle_time().as_secs() as u32
    }

    pub fn set_slew_settle_time(&self, seconds: i32) -> MountResult<()> {
        match u32::try_from(seconds) {
            Ok(s) if s <= MAX_SLEW_SETTLE_TIME => {
                self.slew.set_settle_time(Duration::from_secs(s as u64));
                Ok(())
            }
            _ => Err(MountError::InvalidValue(format!(
                "settle time {} outside 0..={} s", seconds,
                MAX_SLEW_SETTLE_TIME))),
        }
    }

    // Sync.

    pub fn sync_to_target(&self) -> MountResult<()> {
        self.dispatcher.ensure_connected("SyncToTarget")?;
        let target = {
            let flags = self.state.lock();
            if flags.is_parked {
                return Err(MountError::Parked("SyncToTarget".to_string()));
            }
            if !flags.target.is_set() {
                return Err(MountError::ValueNotSet("target".to_string()));
            }
            flags.target
        };
        let reply = self.dispatcher.send_string(protocol::SYNC)?;
        info!("Synced to RA {} Dec {}: {}",
              protocol::format_ra(target.right_ascension),
              protocol::format_dec(target.declination), reply.trim());
        Ok(())
    }

    pub fn sync_to_coordinates(&self, ra: f64, dec: f64) -> MountResult<()> {
        self.set_target(ra, dec)?;
        self.sync_to_target()
    }

    // Park. The firmware has no unpark command; the parked state is read
    // back from the mount on the next connect.

    pub fn at_park(&self) -> bool {
        self.state.lock().is_parked
    }

    pub fn park(&self) -> MountResult<()> {
        self.dispatcher.ensure_connected("Park")?;
        if self.state.lock().is_parked {
            return Ok(());
        }
        self.dispatcher.send_blind(protocol::PARK)?;
        let mut flags = self.state.lock();
        flags.clear_motion();
        flags.is_parked = true;
        info!("Parked");
        Ok(())
    }
}
