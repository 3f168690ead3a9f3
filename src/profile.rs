// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::Path;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::motion_state::TrackingRate;
use crate::pulse_guide::MAX_PULSE_MS;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("cannot access profile {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("cannot parse profile {path}: {source}")]
    Parse { path: String, source: toml::de::Error },

    #[error("cannot serialize profile: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid profile: {0}")]
    Invalid(String),
}

/// Stretching of E/W guide pulses with altitude. See
/// `pulse_guide::compensated_duration()`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuideCompensation {
    pub enabled: bool,
    // Upper bound on how much longer than requested a pulse may become.
    pub max_delta_ms: u32,
    // Kept below max_delta_ms so the result stays under the guider's limit.
    pub buffer_ms: u32,
}

impl Default for GuideCompensation {
    fn default() -> Self {
        GuideCompensation { enabled: false, max_delta_ms: 1000, buffer_ms: 20 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingRateOnConnect {
    // Leave whatever the hand controller selected.
    None,
    #[default]
    Sidereal,
    Lunar,
    Solar,
}

impl TrackingRateOnConnect {
    pub fn rate(&self) -> Option<TrackingRate> {
        match self {
            TrackingRateOnConnect::None => None,
            TrackingRateOnConnect::Sidereal => Some(TrackingRate::Sidereal),
            TrackingRateOnConnect::Lunar => Some(TrackingRate::Lunar),
            TrackingRateOnConnect::Solar => Some(TrackingRate::Solar),
        }
    }
}

/// Persisted driver settings. Read once when the mount is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub com_port: String,
    pub serial_timeout_ms: u64,
    // Seconds.
    pub slew_settle_time: u32,
    // Meters.
    pub site_elevation: f64,
    pub site_latitude: f64,
    pub site_longitude: f64,
    pub tracking_rate_on_connect: TrackingRateOnConnect,
    pub alpaca_port: u16,
    pub guide_compensation: GuideCompensation,
}

pub const MAX_SLEW_SETTLE_TIME: u32 = 100;

impl Default for Profile {
    fn default() -> Self {
        Profile {
            com_port: "/dev/ttyUSB0".to_string(),
            serial_timeout_ms: 2000,
            slew_settle_time: 2,
            site_elevation: 0.0,
            site_latitude: 0.0,
            site_longitude: 0.0,
            tracking_rate_on_connect: TrackingRateOnConnect::default(),
            alpaca_port: 11111,
            guide_compensation: GuideCompensation::default(),
        }
    }
}

impl Profile {
    /// Reads `path`, or returns the defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Profile, ProfileError> {
        if !path.exists() {
            info!("No profile at {}, using defaults", path.display());
            return Ok(Profile::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| ProfileError::Io {
            path: path.display().to_string(), source: e })?;
        let profile: Profile = toml::from_str(&text).map_err(|e| ProfileError::Parse {
            path: path.display().to_string(), source: e })?;
        profile.validate()?;
        info!("Loaded profile {}", path.display());
        Ok(profile)
    }

    pub fn save(&self, path: &Path) -> Result<(), ProfileError> {
        self.validate()?;
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| ProfileError::Io {
            path: path.display().to_string(), source: e })
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        let comp = &self.guide_compensation;
        if comp.buffer_ms >= comp.max_delta_ms {
            return Err(ProfileError::Invalid(format!(
                "guide_compensation.buffer_ms {} must be less than max_delta_ms {}",
                comp.buffer_ms, comp.max_delta_ms)));
        }
        if comp.max_delta_ms > MAX_PULSE_MS {
            return Err(ProfileError::Invalid(format!(
                "guide_compensation.max_delta_ms {} exceeds {}",
                comp.max_delta_ms, MAX_PULSE_MS)));
        }
        if self.slew_settle_time > MAX_SLEW_SETTLE_TIME {
            return Err(ProfileError::Invalid(format!(
                "slew_settle_time {} exceeds {} seconds",
                self.slew_settle_time, MAX_SLEW_SETTLE_TIME)));
        }
        if !(-90.0..=90.0).contains(&self.site_latitude) {
            return Err(ProfileError::Invalid(format!(
                "site_latitude {} out of range", self.site_latitude)));
        }
        if !(-180.0..=180.0).contains(&self.site_longitude) {
            return Err(ProfileError::Invalid(format!(
                "site_longitude {} out of range", self.site_longitude)));
        }
        Ok(())
    }

    pub fn serial_timeout(&self) -> Duration {
        Duration::from_millis(self.serial_timeout_ms)
    }

    pub fn settle_duration(&self) -> Duration {
        Duration::from_secs(self.slew_settle_time as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let profile = Profile::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(profile, Profile::default());
        assert_eq!(profile.settle_duration(), Duration::from_secs(2));
        assert_eq!(profile.tracking_rate_on_connect.rate(),
                   Some(TrackingRate::Sidereal));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tts160.toml");
        let mut profile = Profile::default();
        profile.com_port = "COM4".to_string();
        profile.slew_settle_time = 0;
        profile.guide_compensation.enabled = true;
        profile.tracking_rate_on_connect = TrackingRateOnConnect::None;
        profile.save(&path).unwrap();
        assert_eq!(Profile::load(&path).unwrap(), profile);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tts160.toml");
        std::fs::write(&path, "com_port = \"/dev/ttyACM0\"\n\
                               tracking_rate_on_connect = \"lunar\"\n\
                               [guide_compensation]\n\
                               enabled = true\n").unwrap();
        let profile = Profile::load(&path).unwrap();
        assert_eq!(profile.com_port, "/dev/ttyACM0");
        assert_eq!(profile.tracking_rate_on_connect.rate(),
                   Some(TrackingRate::Lunar));
        assert!(profile.guide_compensation.enabled);
        assert_eq!(profile.guide_compensation.max_delta_ms, 1000);
        assert_eq!(profile.alpaca_port, 11111);
    }

    #[test]
    fn test_invalid_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tts160.toml");

        std::fs::write(&path, "slew_settle_time = \"soon\"\n").unwrap();
        assert!(matches!(Profile::load(&path), Err(ProfileError::Parse { .. })));

        std::fs::write(&path, "[guide_compensation]\nmax_delta_ms = 10\n\
                               buffer_ms = 10\n").unwrap();
        assert!(matches!(Profile::load(&path), Err(ProfileError::Invalid(_))));

        let mut profile = Profile::default();
        profile.guide_compensation.max_delta_ms = u32::MAX;
        assert!(matches!(profile.validate(), Err(ProfileError::Invalid(_))));
        profile.guide_compensation.max_delta_ms = MAX_PULSE_MS;
        assert!(profile.validate().is_ok());

        let mut profile = Profile::default();
        profile.slew_settle_time = 101;
        assert!(matches!(profile.save(&path), Err(ProfileError::Invalid(_))));
    }
}
