// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::{f64::consts::PI, time::SystemTime};

use astro::{
    angle::limit_to_two_PI,
    coords::hr_angl_frm_hz,
    time::{julian_day, mn_sidr, CalType, Date},
};
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Local horizon position, degrees. Azimuth is clockwise from north.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HorizonCoordinates {
    pub altitude: f64,
    pub azimuth: f64,
}

/// Equatorial position as a mount reports it: right ascension in hours
/// (0..24), declination in degrees (-90..90).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EquatorialCoordinates {
    pub right_ascension: f64,
    pub declination: f64,
}

/// Returns (ra, dec) in radians, ra normalized to 0..2PI.
/// alt: elevation in radians
/// az: radians, clockwise from north
/// lat: observer latitude in radians.
/// long: observer longitude in radians.
pub fn equatorial_from_alt_az(
    alt: f64,
    az: f64,
    lat: f64,
    long: f64,
    time: &SystemTime,
) -> (f64, f64) {
    let meeus_az = limit_to_two_PI(az - PI);
    let gmst = greenwich_mean_sidereal_time_from_system_time(time);

    // astro::coords::dec_frm_hz() is incorrect.
    let dec =
        (lat.sin() * alt.sin() - lat.cos() * alt.cos() * meeus_az.cos()).asin();
    let hour_angle = hr_angl_frm_hz(meeus_az, alt, lat);
    let ra = limit_to_two_PI(gmst + long - hour_angle);

    (ra, dec)
}

/// Converts a horizon position to the equatorial position (hours/degrees)
/// seen from the given site at the given time. Refraction is not applied.
/// lat, long: observer site in degrees, longitude positive east.
pub fn equatorial_from_horizon(
    horizon: &HorizonCoordinates,
    lat: f64,
    long: f64,
    time: &SystemTime,
) -> EquatorialCoordinates {
    let (ra, dec) = equatorial_from_alt_az(
        horizon.altitude.to_radians(),
        horizon.azimuth.to_radians(),
        lat.to_radians(),
        long.to_radians(),
        time,
    );
    EquatorialCoordinates {
        right_ascension: ra.to_degrees() / 15.0,
        declination: dec.to_degrees(),
    }
}

/// Local mean sidereal time in hours (0..24) for the given longitude
/// (degrees, positive east).
pub fn local_sidereal_time(long: f64, time: &SystemTime) -> f64 {
    let gmst = greenwich_mean_sidereal_time_from_system_time(time);
    limit_to_two_PI(gmst + long.to_radians()).to_degrees() / 15.0
}

fn greenwich_mean_sidereal_time_from_system_time(time: &SystemTime) -> f64 {
    let dt_utc = DateTime::<Utc>::from(*time);
    let date = Date {
        year: dt_utc.date_naive().year() as i16,
        month: dt_utc.date_naive().month() as u8,
        decimal_day: dt_utc.date_naive().day() as f64,
        cal_type: CalType::Gregorian,
    };
    let jd = julian_day(&date);

    let utc_hours = dt_utc.time().num_seconds_from_midnight() as f64 / 3600.0;
    let gmst_hours =
        mn_sidr(jd).to_degrees() / 15.0 + utc_hours * 1.00273790935;

    limit_to_two_PI((gmst_hours * 15.0).to_radians())
}
