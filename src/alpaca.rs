// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::borrow::Cow;
use std::sync::Arc;

use log::debug;

use ascom_alpaca::{ASCOMError, ASCOMErrorCode, ASCOMResult, Server};
use ascom_alpaca::api::{AlignmentMode, Axis, AxisRate, CargoServerInfo, Device,
                        DriveRate, EquatorialSystem, PutPulseGuideDirection as AlpacaGuideDirection,
                        Telescope};
use async_trait::async_trait;

use crate::axis_motion::TelescopeAxis;
use crate::error::{MountError, MountResult};
use crate::motion_state::TrackingRate;
use crate::mount::Mount;
use crate::pulse_guide::GuideDirection;

fn ascom_error(error: MountError) -> ASCOMError {
    let code = match &error {
        MountError::NotConnected(_) => ASCOMErrorCode::NOT_CONNECTED,
        MountError::Parked(_) => ASCOMErrorCode::INVALID_WHILE_PARKED,
        MountError::InvalidValue(_) => ASCOMErrorCode::INVALID_VALUE,
        MountError::ValueNotSet(_) => ASCOMErrorCode::VALUE_NOT_SET,
        MountError::InvalidOperation(_) |
        MountError::ConcurrencyConflict(_) |
        MountError::RejectedByDevice(_) => ASCOMErrorCode::INVALID_OPERATION,
        MountError::Stall(_) |
        MountError::Timeout(_) |
        MountError::Protocol(_) |
        MountError::Io(_) => ASCOMErrorCode::UNSPECIFIED,
    };
    ASCOMError{code, message: Cow::Owned(error.to_string())}
}

fn to_axis(axis: Axis) -> TelescopeAxis {
    match axis {
        Axis::Primary => TelescopeAxis::Primary,
        Axis::Secondary => TelescopeAxis::Secondary,
        Axis::Tertiary => TelescopeAxis::Tertiary,
    }
}

fn to_drive_rate(rate: TrackingRate) -> DriveRate {
    match rate {
        TrackingRate::Sidereal => DriveRate::Sidereal,
        TrackingRate::Lunar => DriveRate::Lunar,
        TrackingRate::Solar => DriveRate::Solar,
    }
}

// Serves a Mount over Alpaca. Device I/O blocks, so every call that may
// touch the serial line runs on the blocking thread pool.
struct AlpacaTelescope {
    mount: Arc<Mount>,
}

impl std::fmt::Debug for AlpacaTelescope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AlpacaTelescope({})", self.mount.profile().com_port)
    }
}

impl AlpacaTelescope {
    async fn blocking<T, F>(&self, op: F) -> ASCOMResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Mount) -> MountResult<T> + Send + 'static,
    {
        let mount = self.mount.clone();
        match tokio::task::spawn_blocking(move || op(&mount)).await {
            Ok(result) => result.map_err(ascom_error),
            Err(e) => Err(ASCOMError{code: ASCOMErrorCode::UNSPECIFIED,
                                     message: Cow::Owned(e.to_string())}),
        }
    }
}

#[async_trait]
impl Device for AlpacaTelescope {
    fn static_name(&self) -> &str { "TTS-160" }
    fn unique_id(&self) -> &str { "TTS-160-mount-driver" }

    async fn connected(&self) -> ASCOMResult<bool> {
        Ok(self.mount.is_connected())
    }
    async fn set_connected(&self, connected: bool) -> ASCOMResult {
        debug!("set_connected {}", connected);
        if connected == self.mount.is_connected() {
            return Ok(());
        }
        self.blocking(move |m| {
            if connected {
                m.connect_serial()
            } else {
                m.disconnect();
                Ok(())
            }
        }).await
    }
}

#[async_trait]
impl Telescope for AlpacaTelescope {
    async fn alignment_mode(&self) -> ASCOMResult<AlignmentMode> {
        Ok(AlignmentMode::AltAz)
    }

    async fn equatorial_system(&self) -> ASCOMResult<EquatorialSystem> {
        Ok(EquatorialSystem::Topocentric)
    }

    // Position.

    async fn right_ascension(&self) -> ASCOMResult<f64> {
        self.blocking(|m| m.right_ascension()).await
    }
    async fn declination(&self) -> ASCOMResult<f64> {
        self.blocking(|m| m.declination()).await
    }
    async fn altitude(&self) -> ASCOMResult<f64> {
        self.blocking(|m| m.altitude()).await
    }
    async fn azimuth(&self) -> ASCOMResult<f64> {
        self.blocking(|m| m.azimuth()).await
    }
    async fn sidereal_time(&self) -> ASCOMResult<f64> {
        self.blocking(|m| m.sidereal_time()).await
    }
    async fn site_latitude(&self) -> ASCOMResult<f64> {
        self.blocking(|m| m.site_latitude()).await
    }
    async fn site_longitude(&self) -> ASCOMResult<f64> {
        self.blocking(|m| m.site_longitude()).await
    }
    async fn site_elevation(&self) -> ASCOMResult<f64> {
        Ok(self.mount.site_elevation())
    }

    // Target.

    async fn target_right_ascension(&self) -> ASCOMResult<f64> {
        self.mount.target_right_ascension().map_err(ascom_error)
    }
    async fn set_target_right_ascension(&self, target_ra: f64) -> ASCOMResult {
        debug!("set_target_right_ascension {}", target_ra);
        self.blocking(move |m| m.set_target_right_ascension(target_ra)).await
    }
    async fn target_declination(&self) -> ASCOMResult<f64> {
        self.mount.target_declination().map_err(ascom_error)
    }
    async fn set_target_declination(&self, target_dec: f64) -> ASCOMResult {
        debug!("set_target_declination {}", target_dec);
        self.blocking(move |m| m.set_target_declination(target_dec)).await
    }

    // Tracking.

    async fn can_set_tracking(&self) -> ASCOMResult<bool> {
        Ok(true)
    }
    async fn tracking(&self) -> ASCOMResult<bool> {
        self.blocking(|m| m.tracking()).await
    }
    async fn set_tracking(&self, tracking: bool) -> ASCOMResult {
        debug!("set_tracking {}", tracking);
        self.blocking(move |m| m.set_tracking(tracking)).await
    }
    async fn tracking_rate(&self) -> ASCOMResult<DriveRate> {
        Ok(to_drive_rate(self.mount.tracking_rate()))
    }
    async fn set_tracking_rate(&self, tracking_rate: DriveRate) -> ASCOMResult {
        debug!("set_tracking_rate {:?}", tracking_rate);
        let rate = match tracking_rate {
            DriveRate::Sidereal => TrackingRate::Sidereal,
            DriveRate::Lunar => TrackingRate::Lunar,
            DriveRate::Solar => TrackingRate::Solar,
            other => {
                return Err(ascom_error(MountError::InvalidValue(format!(
                    "unsupported drive rate {:?}", other))));
            }
        };
        self.blocking(move |m| m.set_tracking_rate(rate)).await
    }
    async fn tracking_rates(&self) -> ASCOMResult<Vec<DriveRate>> {
        Ok(self.mount.tracking_rates().iter().copied().map(to_drive_rate).collect())
    }

    // Jog.

    async fn can_move_axis(&self, axis: Axis) -> ASCOMResult<bool> {
        Ok(self.mount.can_move_axis(to_axis(axis)))
    }
    async fn axis_rates(&self, axis: Axis) -> ASCOMResult<Vec<AxisRate>> {
        Ok(self.mount.axis_rates(to_axis(axis)).iter()
           .map(|r| AxisRate{minimum: *r, maximum: *r})
           .collect())
    }
    async fn move_axis(&self, axis: Axis, rate: f64) -> ASCOMResult {
        debug!("move_axis {:?} {}", axis, rate);
        let axis = to_axis(axis);
        self.blocking(move |m| m.move_axis(axis, rate)).await
    }

    // Guiding.

    async fn can_pulse_guide(&self) -> ASCOMResult<bool> {
        Ok(true)
    }
    async fn is_pulse_guiding(&self) -> ASCOMResult<bool> {
        Ok(self.mount.is_pulse_guiding())
    }
    async fn pulse_guide(&self, direction: AlpacaGuideDirection, duration: i32)
                         -> ASCOMResult {
        debug!("pulse_guide {:?} {}", direction, duration);
        let direction = match direction {
            AlpacaGuideDirection::North => GuideDirection::North,
            AlpacaGuideDirection::South => GuideDirection::South,
            AlpacaGuideDirection::East => GuideDirection::East,
            AlpacaGuideDirection::West => GuideDirection::West,
        };
        self.blocking(move |m| m.pulse_guide(direction, duration)).await
    }

    // GoTo.

    async fn can_slew(&self) -> ASCOMResult<bool> {
        Ok(true)
    }
    async fn can_slew_async(&self) -> ASCOMResult<bool> {
        Ok(true)
    }
    async fn can_slew_alt_az(&self) -> ASCOMResult<bool> {
        Ok(true)
    }
    async fn can_slew_alt_az_async(&self) -> ASCOMResult<bool> {
        Ok(true)
    }
    async fn slew_to_target(&self) -> ASCOMResult {
        debug!("slew_to_target");
        self.blocking(|m| m.slew_to_target()).await
    }
    async fn slew_to_target_async(&self) -> ASCOMResult {
        debug!("slew_to_target_async");
        self.blocking(|m| m.slew_to_target_async()).await
    }
    async fn slew_to_coordinates(&self, right_ascension: f64, declination: f64)
                                 -> ASCOMResult {
        debug!("slew_to_coordinates {} {}", right_ascension, declination);
        self.blocking(move |m| m.slew_to_coordinates(right_ascension, declination))
            .await
    }
    async fn slew_to_coordinates_async(&self, right_ascension: f64, declination: f64)
                                       -> ASCOMResult {
        debug!("slew_to_coordinates_async {} {}", right_ascension, declination);
        self.blocking(move |m| m.slew_to_coordinates_async(right_ascension,
                                                           declination))
            .await
    }
    async fn slew_to_alt_az(&self, azimuth: f64, altitude: f64) -> ASCOMResult {
        debug!("slew_to_alt_az {} {}", azimuth, altitude);
        self.blocking(move |m| m.slew_to_alt_az(altitude, azimuth)).await
    }
    async fn slew_to_alt_az_async(&self, azimuth: f64, altitude: f64) -> ASCOMResult {
        debug!("slew_to_alt_az_async {} {}", azimuth, altitude);
        self.blocking(move |m| m.slew_to_alt_az_async(altitude, azimuth)).await
    }
    async fn slewing(&self) -> ASCOMResult<bool> {
        self.blocking(|m| m.slewing()).await
    }
    async fn abort_slew(&self) -> ASCOMResult {
        debug!("abort_slew");
        self.blocking(|m| { m.abort_slew(); Ok(()) }).await
    }
    async fn slew_settle_time(&self) -> ASCOMResult<i32> {
        Ok(self.mount.slew_settle_time() as i32)
    }
    async fn set_slew_settle_time(&self, slew_settle_time: i32) -> ASCOMResult {
        self.mount.set_slew_settle_time(slew_settle_time).map_err(ascom_error)
    }

    // Sync.

    async fn can_sync(&self) -> ASCOMResult<bool> {
        Ok(true)
    }
    async fn sync_to_target(&self) -> ASCOMResult {
        debug!("sync_to_target");
        self.blocking(|m| m.sync_to_target()).await
    }
    async fn sync_to_coordinates(&self, right_ascension: f64, declination: f64)
                                 -> ASCOMResult {
        debug!("sync_to_coordinates {} {}", right_ascension, declination);
        self.blocking(move |m| m.sync_to_coordinates(right_ascension, declination))
            .await
    }

    // Park.

    async fn can_park(&self) -> ASCOMResult<bool> {
        Ok(true)
    }
    async fn at_park(&self) -> ASCOMResult<bool> {
        Ok(self.mount.at_park())
    }
    async fn park(&self) -> ASCOMResult {
        debug!("park");
        self.blocking(|m| m.park()).await
    }
}

pub fn create_alpaca_server(mount: Arc<Mount>, port: u16) -> Server {
    let mut server = Server {
        info: CargoServerInfo!(),
        ..Default::default()
    };
    server.listen_addr.set_port(port);
    server.devices.register(AlpacaTelescope{mount});
    server
}
