//! NMEA-0183 line codec: parsing into typed sentences, checksum
//! verification, and re-encoding. Only RMC and the Cerulean vendor RTH
//! sentence are interpreted; everything else is returned as `Sentence::Other`
//! so callers can still echo it without understanding it.
//!
//! RTH has no public crate support (it is a Cerulean USBL vendor extension),
//! so this codec is hand-rolled rather than delegated to an upstream NMEA
//! parsing crate.

use thiserror::Error;

use crate::geo::degrees_to_sdm;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NmeaError {
    #[error("NMEA checksum mismatch")]
    BadChecksum,
    #[error("unknown NMEA sentence type")]
    UnknownSentenceType,
    #[error("malformed NMEA sentence")]
    MalformedSentence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RmcData {
    pub timestamp: String,
    pub status: String,
    pub latitude: f64,
    pub lat_hemi: char,
    pub longitude: f64,
    pub lon_hemi: char,
    pub speed: String,
    pub course: String,
    pub date: String,
    pub mag_var: String,
    pub mag_var_dir: String,
    pub mode: Option<String>,
}

impl RmcData {
    /// The validity flag is `"A"` (active fix); anything else, most commonly
    /// `"V"` (void), means the fix must not be trusted.
    pub fn is_valid_fix(&self) -> bool {
        self.status == "A"
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RthData {
    /// Compass bearing to the transponder, degrees, 0 = north, 90 = east.
    pub cb: f64,
    /// Slant range to the transponder, metres.
    pub sr: f64,
    /// True elevation to the transponder, degrees; negative = below horizontal.
    pub te: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sentence {
    Rmc(RmcData),
    Rth(RthData),
    Other { talker: String, kind: String },
}

/// Cheaply inspects the sentence-type field (characters 3..6, e.g. the
/// `RMC` in `$GPRMC`) without doing a full parse or checksum check.
pub fn sentence_kind_hint(line: &str) -> Option<&str> {
    line.get(3..6)
}

fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Parses one NMEA-0183 line (with or without a trailing `\r\n`) into a
/// typed [`Sentence`], verifying the checksum along the way.
pub fn parse_line(line: &str) -> Result<Sentence, NmeaError> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let body_with_prefix = trimmed
        .strip_prefix('$')
        .ok_or(NmeaError::MalformedSentence)?;

    let (body, checksum_hex) = body_with_prefix
        .split_once('*')
        .ok_or(NmeaError::MalformedSentence)?;

    let expected = u8::from_str_radix(checksum_hex, 16).map_err(|_| NmeaError::MalformedSentence)?;
    if checksum(body) != expected {
        return Err(NmeaError::BadChecksum);
    }

    let mut fields = body.split(',');
    let address = fields.next().ok_or(NmeaError::MalformedSentence)?;
    if address.len() < 5 {
        return Err(NmeaError::MalformedSentence);
    }
    let talker = &address[0..2];
    let kind = &address[2..];
    let rest: Vec<&str> = fields.collect();

    match kind {
        "RMC" => parse_rmc(&rest).map(Sentence::Rmc),
        "RTH" => parse_rth(&rest).map(Sentence::Rth),
        _ => Ok(Sentence::Other {
            talker: talker.to_string(),
            kind: kind.to_string(),
        }),
    }
}

fn parse_lat_lon(deg_min: &str, hemi: &str, degree_digits: usize) -> Result<f64, NmeaError> {
    if deg_min.is_empty() || hemi.is_empty() {
        return Err(NmeaError::MalformedSentence);
    }
    if deg_min.len() <= degree_digits {
        return Err(NmeaError::MalformedSentence);
    }
    let deg: f64 = deg_min[..degree_digits]
        .parse()
        .map_err(|_| NmeaError::MalformedSentence)?;
    let min: f64 = deg_min[degree_digits..]
        .parse()
        .map_err(|_| NmeaError::MalformedSentence)?;
    let magnitude = deg + min / 60.0;
    match hemi {
        "N" | "E" => Ok(magnitude),
        "S" | "W" => Ok(-magnitude),
        _ => Err(NmeaError::MalformedSentence),
    }
}

fn parse_rmc(fields: &[&str]) -> Result<RmcData, NmeaError> {
    // hhmmss.ss,A,ddmm.mm,a,dddmm.mm,a,x.x,x.x,ddmmyy,x.x,a[,m]
    if fields.len() < 11 {
        return Err(NmeaError::MalformedSentence);
    }
    let latitude = parse_lat_lon(fields[2], fields[3], 2)?;
    let longitude = parse_lat_lon(fields[4], fields[5], 3)?;
    Ok(RmcData {
        timestamp: fields[0].to_string(),
        status: fields[1].to_string(),
        latitude,
        lat_hemi: fields[3].chars().next().unwrap_or('N'),
        longitude,
        lon_hemi: fields[5].chars().next().unwrap_or('E'),
        speed: fields[6].to_string(),
        course: fields[7].to_string(),
        date: fields[8].to_string(),
        mag_var: fields[9].to_string(),
        mag_var_dir: fields[10].to_string(),
        mode: fields.get(11).map(|s| s.to_string()),
    })
}

fn parse_rth(fields: &[&str]) -> Result<RthData, NmeaError> {
    if fields.len() < 3 {
        return Err(NmeaError::MalformedSentence);
    }
    let cb: f64 = fields[0].parse().map_err(|_| NmeaError::MalformedSentence)?;
    let sr: f64 = fields[1].parse().map_err(|_| NmeaError::MalformedSentence)?;
    let te: f64 = fields[2].parse().map_err(|_| NmeaError::MalformedSentence)?;
    Ok(RthData { cb, sr, te })
}

fn format_lat_lon(value: f64, degree_digits: usize) -> String {
    let (_, deg, min) = degrees_to_sdm(value);
    format!("{:0width$}{:0>8.5}", deg, min, width = degree_digits)
}

/// Encodes a sentence back into a `$...*HH` line (without a trailing
/// `\r\n` — callers append that themselves, matching the wire format each
/// consumer expects).
pub fn encode(sentence: &Sentence) -> String {
    let body = match sentence {
        Sentence::Rmc(rmc) => {
            let lat = format_lat_lon(rmc.latitude, 2);
            let lon = format_lat_lon(rmc.longitude, 3);
            let mut fields = vec![
                "GNRMC".to_string(),
                rmc.timestamp.clone(),
                rmc.status.clone(),
                lat,
                rmc.lat_hemi.to_string(),
                lon,
                rmc.lon_hemi.to_string(),
                rmc.speed.clone(),
                rmc.course.clone(),
                rmc.date.clone(),
                rmc.mag_var.clone(),
                rmc.mag_var_dir.clone(),
            ];
            if let Some(mode) = &rmc.mode {
                fields.push(mode.clone());
            }
            fields.join(",")
        }
        Sentence::Rth(rth) => format!("USRTH,{},{},{}", rth.cb, rth.sr, rth.te),
        Sentence::Other { talker, kind } => format!("{talker}{kind}"),
    };
    format!("${}*{:02X}", body, checksum(&body))
}
