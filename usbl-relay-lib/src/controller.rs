//! Top-level state holder: owns the GPS and USBL serial workers, the most
//! recent valid RMC, the two optional UDP destinations, the shared outbound
//! UDP socket, and a change-notification sink. This is the single mutable
//! point an external CLI/UI touches; every public operation here is
//! non-blocking.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, info};
use thiserror::Error;

use crate::geo::combine;
use crate::nmea::{self, NmeaError, RmcData, Sentence};
use crate::serial_worker::{OpenParams, SerialWorker};

const GPS_BAUD: u32 = 4800;
const USBL_BAUD: u32 = 115_200;
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddrParseError {
    #[error("address must be in host:port form")]
    MissingPort,
    #[error("port is not a valid number")]
    InvalidPort,
    #[error("host could not be resolved")]
    UnresolvableHost,
}

/// Splits on the rightmost `:` (so hostnames are supported, unlike a plain
/// `SocketAddr::from_str`) and resolves the host via the standard DNS path.
fn parse_host_port(s: &str) -> Result<SocketAddr, AddrParseError> {
    let (host, port_str) = s.rsplit_once(':').ok_or(AddrParseError::MissingPort)?;
    let port: u16 = port_str.parse().map_err(|_| AddrParseError::InvalidPort)?;
    (host, port)
        .to_socket_addrs()
        .map_err(|_| AddrParseError::UnresolvableHost)?
        .next()
        .ok_or(AddrParseError::UnresolvableHost)
}

pub type ChangeCallback = Box<dyn Fn(&str, Option<&str>) + Send + Sync>;

struct Shared {
    addr_echo: RwLock<Option<SocketAddr>>,
    addr_mav: RwLock<Option<SocketAddr>>,
    dev_gps_path: RwLock<Option<String>>,
    dev_usbl_path: RwLock<Option<String>>,
    last_rmc: RwLock<Option<Arc<RmcData>>>,
    out_udp: UdpSocket,
    on_change: RwLock<ChangeCallback>,
}

impl Shared {
    fn fire_change(&self, key: &str, value: Option<&str>) {
        (self.on_change.read().unwrap())(key, value);
    }
}

pub struct Controller {
    shared: Arc<Shared>,
    gps_worker: SerialWorker,
    usbl_worker: SerialWorker,
}

fn send_udp_best_effort(socket: &UdpSocket, addr: SocketAddr, payload: &[u8]) {
    match socket.send_to(payload, addr) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
            debug!("UDP send to {addr} would block, dropping datagram");
        }
        Err(e) => {
            debug!("UDP send to {addr} failed: {e}, dropping datagram");
        }
    }
}

fn gps_line_handler(shared: &Arc<Shared>, line: &str) {
    if let Some(addr) = *shared.addr_echo.read().unwrap() {
        send_udp_best_effort(&shared.out_udp, addr, line.as_bytes());
    }

    if nmea::sentence_kind_hint(line) != Some("RMC") {
        return;
    }

    match nmea::parse_line(line) {
        Ok(Sentence::Rmc(rmc)) => {
            if rmc.is_valid_fix() {
                *shared.last_rmc.write().unwrap() = Some(Arc::new(rmc));
            } else {
                info!("no GPS fix");
            }
        }
        Ok(_) => {}
        Err(NmeaError::BadChecksum) => debug!("GPS line failed checksum: {line:?}"),
        Err(NmeaError::UnknownSentenceType) => debug!("GPS line has unknown sentence type: {line:?}"),
        Err(NmeaError::MalformedSentence) => debug!("GPS line is malformed: {line:?}"),
    }
}

fn usbl_line_handler(shared: &Arc<Shared>, line: &str) {
    let rth = match nmea::parse_line(line) {
        Ok(Sentence::Rth(rth)) => rth,
        Ok(_) => {
            debug!("USBL line is not RTH: {line:?}");
            return;
        }
        Err(e) => {
            debug!("USBL line failed to parse: {line:?} ({e})");
            return;
        }
    };

    let rmc = match shared.last_rmc.read().unwrap().clone() {
        Some(rmc) => rmc,
        None => {
            info!("ignoring RTH because RMC is not ready yet");
            return;
        }
    };

    let addr_mav = match *shared.addr_mav.read().unwrap() {
        Some(addr) => addr,
        None => return,
    };

    let combined = combine(&rmc, &rth);
    let mut payload = nmea::encode(&Sentence::Rmc(combined)).into_bytes();
    payload.extend_from_slice(b"\r\n");
    send_udp_best_effort(&shared.out_udp, addr_mav, &payload);
}

impl Controller {
    pub fn new() -> std::io::Result<Self> {
        let out_udp = UdpSocket::bind("0.0.0.0:0")?;
        out_udp.set_nonblocking(true)?;
        // SO_REUSEADDR is set by default by the platform for UDP sockets we
        // bind ourselves to an ephemeral port; nothing further is required
        // here, matching the original driver's `setsockopt(SO_REUSEADDR, 1)`
        // on an outbound-only socket.

        let shared = Arc::new(Shared {
            addr_echo: RwLock::new(None),
            addr_mav: RwLock::new(None),
            dev_gps_path: RwLock::new(None),
            dev_usbl_path: RwLock::new(None),
            last_rmc: RwLock::new(None),
            out_udp,
            on_change: RwLock::new(Box::new(|_, _| {})),
        });

        let gps_shared = shared.clone();
        let gps_worker = SerialWorker::spawn(
            "gps",
            Box::new(move |line| gps_line_handler(&gps_shared, line)),
            Box::new({
                let shared = shared.clone();
                move |path| {
                    *shared.dev_gps_path.write().unwrap() = path.map(str::to_string);
                    shared.fire_change("dev_gps", path);
                }
            }),
        );

        let usbl_shared = shared.clone();
        let usbl_worker = SerialWorker::spawn(
            "usbl",
            Box::new(move |line| usbl_line_handler(&usbl_shared, line)),
            Box::new({
                let shared = shared.clone();
                move |path| {
                    *shared.dev_usbl_path.write().unwrap() = path.map(str::to_string);
                    shared.fire_change("dev_usbl", path);
                }
            }),
        );

        Ok(Controller { shared, gps_worker, usbl_worker })
    }

    pub fn set_change_callback(&self, callback: ChangeCallback) {
        *self.shared.on_change.write().unwrap() = callback;
    }

    pub fn set_addr_echo(&self, value: Option<&str>) -> Result<(), AddrParseError> {
        let parsed = match value {
            Some(s) if !s.is_empty() => Some(parse_host_port(s)?),
            _ => None,
        };
        *self.shared.addr_echo.write().unwrap() = parsed;
        self.shared.fire_change("addr_echo", value);
        Ok(())
    }

    pub fn set_addr_mav(&self, value: Option<&str>) -> Result<(), AddrParseError> {
        let parsed = match value {
            Some(s) if !s.is_empty() => Some(parse_host_port(s)?),
            _ => None,
        };
        *self.shared.addr_mav.write().unwrap() = parsed;
        self.shared.fire_change("addr_mav", value);
        Ok(())
    }

    pub fn set_dev_gps(&self, path: Option<&str>) {
        let params = path.map(|p| OpenParams {
            path: p.to_string(),
            baud_rate: GPS_BAUD,
            exclusive: true,
            timeout: SERIAL_READ_TIMEOUT,
        });
        self.gps_worker.rebind(params);
    }

    pub fn set_dev_usbl(&self, path: Option<&str>) {
        let params = path.map(|p| OpenParams {
            path: p.to_string(),
            baud_rate: USBL_BAUD,
            exclusive: true,
            timeout: SERIAL_READ_TIMEOUT,
        });
        self.usbl_worker.rebind(params);
    }

    pub fn dev_gps(&self) -> Option<String> {
        self.shared.dev_gps_path.read().unwrap().clone()
    }

    pub fn dev_usbl(&self) -> Option<String> {
        self.shared.dev_usbl_path.read().unwrap().clone()
    }

    pub fn shutdown(&mut self) {
        self.gps_worker.shutdown();
        self.usbl_worker.shutdown();
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn valid_rmc() -> RmcData {
        RmcData {
            timestamp: "203637.00".to_string(),
            status: "A".to_string(),
            latitude: 44.969_555_5,
            lat_hemi: 'N',
            longitude: -93.517_503_2,
            lon_hemi: 'W',
            speed: "0.606".to_string(),
            course: String::new(),
            date: "120919".to_string(),
            mag_var: String::new(),
            mag_var_dir: String::new(),
            mode: Some("A".to_string()),
        }
    }

    fn test_shared() -> Arc<Shared> {
        let out_udp = UdpSocket::bind("127.0.0.1:0").unwrap();
        out_udp.set_nonblocking(true).unwrap();
        Arc::new(Shared {
            addr_echo: RwLock::new(None),
            addr_mav: RwLock::new(None),
            dev_gps_path: RwLock::new(None),
            dev_usbl_path: RwLock::new(None),
            last_rmc: RwLock::new(None),
            out_udp,
            on_change: RwLock::new(Box::new(|_, _| {})),
        })
    }

    #[test]
    fn parse_host_port_splits_on_rightmost_colon() {
        let addr = parse_host_port("127.0.0.1:25100").unwrap();
        assert_eq!(addr, "127.0.0.1:25100".parse().unwrap());
    }

    #[test]
    fn parse_host_port_rejects_missing_port() {
        assert_eq!(parse_host_port("127.0.0.1"), Err(AddrParseError::MissingPort));
    }

    #[test]
    fn gps_handler_caches_valid_rmc_and_ignores_invalid() {
        let shared = test_shared();
        let valid_line = "$GNRMC,203637.00,A,4458.17333,N,09331.05019,W,0.606,,120919,,,A*70";
        gps_line_handler(&shared, valid_line);
        assert!(shared.last_rmc.read().unwrap().is_some());

        let invalid_line = "$GNRMC,203638.00,V,,,,,,,120919,,,N*43";
        gps_line_handler(&shared, invalid_line);
        // Invalid fix must not overwrite a prior valid one.
        let cached = shared.last_rmc.read().unwrap().clone().unwrap();
        assert_eq!(cached.timestamp, "203637.00");
    }

    #[test]
    fn usbl_handler_drops_rth_before_any_rmc() {
        let shared = test_shared();
        let rth_body = "USRTH,90,1000,0";
        let cksum = rth_body.bytes().fold(0u8, |a, b| a ^ b);
        let line = format!("${rth_body}*{cksum:02X}");
        usbl_line_handler(&shared, &line);
        // No RMC cached, so no panic and no mav send attempted (nothing to
        // assert on the socket directly, but this must not crash).
        assert!(shared.last_rmc.read().unwrap().is_none());
    }

    #[test]
    fn usbl_handler_requires_mav_address_to_send() {
        let shared = test_shared();
        *shared.last_rmc.write().unwrap() = Some(Arc::new(valid_rmc()));

        let recv_sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        recv_sock.set_nonblocking(true).unwrap();
        let recv_addr = recv_sock.local_addr().unwrap();

        let rth_body = "USRTH,90,1000,0";
        let cksum = rth_body.bytes().fold(0u8, |a, b| a ^ b);
        let line = format!("${rth_body}*{cksum:02X}");

        // No addr_mav set: nothing should arrive.
        usbl_line_handler(&shared, &line);
        let mut buf = [0u8; 256];
        assert!(recv_sock.recv_from(&mut buf).is_err());

        *shared.addr_mav.write().unwrap() = Some(recv_addr);
        usbl_line_handler(&shared, &line);
        std::thread::sleep(std::time::Duration::from_millis(20));
        let (len, _) = recv_sock.recv_from(&mut buf).expect("expected a MAV datagram");
        let payload = String::from_utf8_lossy(&buf[..len]);
        assert!(payload.starts_with("$GNRMC,203637.00,A,"));
        assert!(payload.ends_with("\r\n"));
    }

    #[test]
    fn echo_forwards_raw_bytes_regardless_of_parse_result() {
        let shared = test_shared();
        let recv_sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        recv_sock.set_nonblocking(true).unwrap();
        let recv_addr = recv_sock.local_addr().unwrap();
        *shared.addr_echo.write().unwrap() = Some(recv_addr);

        let garbage_line = "not a valid nmea line at all\r\n";
        gps_line_handler(&shared, garbage_line);

        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut buf = [0u8; 256];
        let (len, _) = recv_sock.recv_from(&mut buf).expect("expected an echo datagram");
        assert_eq!(&buf[..len], garbage_line.as_bytes());
    }

    #[test]
    fn on_change_fires_for_address_setters() {
        let events: Arc<Mutex<Vec<(String, Option<String>)>>> = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let shared = test_shared();
        *shared.on_change.write().unwrap() = Box::new(move |key, value| {
            events_clone.lock().unwrap().push((key.to_string(), value.map(str::to_string)));
        });
        shared.fire_change("addr_echo", Some("127.0.0.1:9000"));
        let recorded = events.lock().unwrap();
        assert_eq!(recorded[0].0, "addr_echo");
        assert_eq!(recorded[0].1.as_deref(), Some("127.0.0.1:9000"));
    }
}
