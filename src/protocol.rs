// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

// Wire vocabulary of the TTS-160 LX200 dialect, plus sexagesimal encoding
// and the typed queries built on top of the dispatcher.

use tts160_elements::astro_util::EquatorialCoordinates;

use crate::dispatcher::CommandDispatcher;
use crate::error::{MountError, MountResult};

// GoTo. Bool reply: '0' accepted, '1' refused followed by a text message.
pub const SLEW_TO_TARGET: &str = ":MS#";

// Halts.
pub const HALT_ALL: &str = ":Q#";
pub const HALT_EAST: &str = ":Qe#";
pub const HALT_WEST: &str = ":Qw#";
pub const HALT_NORTH: &str = ":Qn#";
pub const HALT_SOUTH: &str = ":Qs#";

// Jogs, at the most recently selected rate.
pub const MOVE_EAST: &str = ":Me#";
pub const MOVE_WEST: &str = ":Mw#";
pub const MOVE_NORTH: &str = ":Mn#";
pub const MOVE_SOUTH: &str = ":Ms#";

// Jog rate presets.
pub const RATE_GUIDE: &str = ":RG#";
pub const RATE_CENTER: &str = ":RC#";
pub const RATE_FIND: &str = ":RM#";
pub const RATE_SLEW: &str = ":RS#";

pub const GET_RIGHT_ASCENSION: &str = ":GR#";
pub const GET_DECLINATION: &str = ":GD#";
pub const GET_ALTITUDE: &str = ":GA#";
pub const GET_AZIMUTH: &str = ":GZ#";
pub const GET_SITE_LATITUDE: &str = ":Gt#";
pub const GET_SITE_LONGITUDE: &str = ":Gg#";
pub const GET_SIDEREAL_TIME: &str = ":GS#";
pub const GET_STATUS: &str = ":GW#";

pub const TRACKING_ON: &str = ":T1#";
pub const TRACKING_OFF: &str = ":T0#";
pub const TRACK_SIDEREAL: &str = ":TQ#";
pub const TRACK_LUNAR: &str = ":TL#";
pub const TRACK_SOLAR: &str = ":TS#";

pub const SYNC: &str = ":CM#";
pub const PARK: &str = ":hP#";

pub fn set_target_ra_command(hours: f64) -> String {
    format!(":Sr{}#", format_ra(hours))
}

pub fn set_target_dec_command(degrees: f64) -> String {
    format!(":Sd{}#", format_dec(degrees))
}

/// Formats hours as `HH:MM:SS`, rounded to the nearest second.
pub fn format_ra(hours: f64) -> String {
    let total = ((hours * 3600.0).round() as i64).rem_euclid(24 * 3600);
    format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

/// Formats degrees as `sDD*MM:SS`, rounded to the nearest arcsecond.
pub fn format_dec(degrees: f64) -> String {
    let sign = if degrees < 0.0 { '-' } else { '+' };
    let total = (degrees.abs() * 3600.0).round() as i64;
    format!("{}{:02}*{:02}:{:02}", sign, total / 3600, (total / 60) % 60, total % 60)
}

/// Parses `[s]D[sep]M[sep]S` with any of `: * ' ° "` as separators. Also
/// accepts the low precision `HH:MM.T` and `sDD*MM` forms and a trailing '#'.
pub fn parse_sexagesimal(text: &str) -> MountResult<f64> {
    let trimmed = text.trim().trim_end_matches('#').trim();
    let (negative, body) = match trimmed.chars().next() {
        Some('-') => (true, &trimmed[1..]),
        Some('+') => (false, &trimmed[1..]),
        Some(_) => (false, trimmed),
        None => {
            return Err(MountError::Protocol("empty coordinate reply".to_string()));
        }
    };
    let fields: Vec<&str> = body
        .split(|c| matches!(c, ':' | '*' | '\'' | '°' | '"' | ' '))
        .filter(|f| !f.is_empty())
        .collect();
    if fields.is_empty() || fields.len() > 3 {
        return Err(MountError::Protocol(format!("malformed coordinate {:?}", text)));
    }
    let mut value = 0.0;
    let mut scale = 1.0;
    for field in fields {
        let v: f64 = field.parse().map_err(|_| {
            MountError::Protocol(format!("malformed coordinate {:?}", text))
        })?;
        value += v / scale;
        scale *= 60.0;
    }
    Ok(if negative { -value } else { value })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    pub tracking: bool,
    pub parked: bool,
}

// `:GW#` reply: first char is the mount type, second is 'T' while
// tracking, third is 'P' when parked.
pub fn parse_status(reply: &str) -> MountResult<DeviceStatus> {
    let bytes = reply.as_bytes();
    if bytes.len() < 2 {
        return Err(MountError::Protocol(format!("short status reply {:?}", reply)));
    }
    Ok(DeviceStatus {
        tracking: bytes[1] == b'T',
        parked: bytes.get(2) == Some(&b'P'),
    })
}

pub fn read_status(dispatcher: &CommandDispatcher) -> MountResult<DeviceStatus> {
    parse_status(&dispatcher.send_string(GET_STATUS)?)
}

pub fn read_tracking(dispatcher: &CommandDispatcher) -> MountResult<bool> {
    Ok(read_status(dispatcher)?.tracking)
}

pub fn read_equatorial(dispatcher: &CommandDispatcher)
                       -> MountResult<EquatorialCoordinates> {
    let ra = parse_sexagesimal(&dispatcher.send_string(GET_RIGHT_ASCENSION)?)?;
    let dec = parse_sexagesimal(&dispatcher.send_string(GET_DECLINATION)?)?;
    Ok(EquatorialCoordinates { right_ascension: ra, declination: dec })
}

pub fn read_altitude(dispatcher: &CommandDispatcher) -> MountResult<f64> {
    parse_sexagesimal(&dispatcher.send_string(GET_ALTITUDE)?)
}

pub fn read_azimuth(dispatcher: &CommandDispatcher) -> MountResult<f64> {
    parse_sexagesimal(&dispatcher.send_string(GET_AZIMUTH)?)
}

pub fn read_site_latitude(dispatcher: &CommandDispatcher) -> MountResult<f64> {
    parse_sexagesimal(&dispatcher.send_string(GET_SITE_LATITUDE)?)
}

/// Degrees east of Greenwich, -180..180. The mount reports west-positive.
pub fn read_site_longitude(dispatcher: &CommandDispatcher) -> MountResult<f64> {
    let west = parse_sexagesimal(&dispatcher.send_string(GET_SITE_LONGITUDE)?)?;
    let mut east = -west;
    if east <= -180.0 {
        east += 360.0;
    } else if east > 180.0 {
        east -= 360.0;
    }
    Ok(east)
}

/// Local sidereal time in hours.
pub fn read_sidereal_time(dispatcher: &CommandDispatcher) -> MountResult<f64> {
    parse_sexagesimal(&dispatcher.send_string(GET_SIDEREAL_TIME)?)
}
