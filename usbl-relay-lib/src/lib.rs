//! Core of the USBL/GPS relay: coordinate kernel, NMEA line codec, serial
//! worker, and controller. CLI parsing, log formatting, and device pickers
//! live in the `usbl-relay` binary crate, outside this library's scope.

pub mod controller;
pub mod geo;
pub mod nmea;
pub mod serial_worker;

pub use controller::{AddrParseError, ChangeCallback, Controller};
pub use nmea::{NmeaError, RmcData, RthData, Sentence};
pub use serial_worker::{DeviceChangedHandler, LineHandler, OpenParams, SerialWorker};
