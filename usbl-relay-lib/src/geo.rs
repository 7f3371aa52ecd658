//! Coordinate kernel: degree/minute conversion, latitude-dependent metre
//! scale, and the RMC⊕RTH combiner that projects a USBL relative fix onto a
//! GPS absolute fix.

use crate::nmea::{RmcData, RthData};

/// Splits a signed decimal-degree value into (is_positive, integer degrees,
/// minutes within the degree). `minutes` is always in `[0, 60)`.
pub fn degrees_to_sdm(signed_degrees: f64) -> (bool, i32, f64) {
    let is_positive = signed_degrees >= 0.0;
    let unsigned_degrees = signed_degrees.abs();
    let int_degrees = unsigned_degrees.trunc() as i32;
    let minutes = (unsigned_degrees - int_degrees as f64) * 60.0;
    (is_positive, int_degrees, minutes)
}

/// Returns `(metres per degree latitude, metres per degree longitude)` at
/// the given latitude, using the standard length-of-a-degree series.
/// https://en.wikipedia.org/wiki/Geographic_coordinate_system#Length_of_a_degree
pub fn lat_long_per_meter(current_latitude_degrees: f64) -> (f64, f64) {
    let phi = current_latitude_degrees.to_radians();
    let m_per_deg_lat = 111132.92 - 559.82 * (2.0 * phi).cos() + 1.175 * (4.0 * phi).cos()
        - 0.0023 * (6.0 * phi).cos();
    let m_per_deg_lon =
        111412.84 * phi.cos() - 93.5 * (3.0 * phi).cos() + 0.118 * (5.0 * phi).cos();
    (m_per_deg_lat, m_per_deg_lon)
}

/// Projects a USBL relative fix (`rth`) onto a GPS absolute fix (`rmc`),
/// returning a new RMC at the transponder's absolute position. Speed and
/// course are cleared; timestamp, status, date, and magnetic variation are
/// carried over from `rmc` unchanged.
pub fn combine(rmc: &RmcData, rth: &RthData) -> RmcData {
    let horizontal_range = rth.sr * rth.te.to_radians().cos();
    let (m_per_deg_lat, m_per_deg_lon) = lat_long_per_meter(rmc.latitude);

    let cb = rth.cb.to_radians();
    let d_lat_deg = horizontal_range * cb.cos() / m_per_deg_lat;
    let d_lon_deg = horizontal_range * cb.sin() / m_per_deg_lon;

    let new_lat = rmc.latitude + d_lat_deg;
    let new_lon = rmc.longitude + d_lon_deg;

    RmcData {
        timestamp: rmc.timestamp.clone(),
        status: rmc.status.clone(),
        latitude: new_lat,
        lat_hemi: if new_lat >= 0.0 { 'N' } else { 'S' },
        longitude: new_lon,
        lon_hemi: if new_lon >= 0.0 { 'E' } else { 'W' },
        speed: String::new(),
        course: String::new(),
        date: rmc.date.clone(),
        mag_var: rmc.mag_var.clone(),
        mag_var_dir: rmc.mag_var_dir.clone(),
        mode: rmc.mode.clone(),
    }
}
