//! Per-device serial worker: owns one serial port at a time, turns bytes
//! into lines, and dispatches each line to a caller-supplied handler. Accepts
//! rebind/shutdown commands over a small bounded channel so the owning
//! thread (the UI/CLI caller) never touches serial I/O directly.
//!
//! Built on the blocking `serialport` crate — the synchronous counterpart of
//! the async `tokio-serial` dependency used elsewhere in this workspace's
//! ancestry, chosen here because spec.md mandates OS threads with blocking
//! reads rather than an async runtime (see DESIGN.md).

use std::io::{ErrorKind, Read};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender, TrySendError};
use log::{debug, error, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 8;
const READ_CHUNK_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct OpenParams {
    pub path: String,
    pub baud_rate: u32,
    pub exclusive: bool,
    pub timeout: Duration,
}

enum Command {
    Rebind(Option<OpenParams>),
    Shutdown,
}

pub type LineHandler = Box<dyn Fn(&str) + Send + 'static>;
pub type DeviceChangedHandler = Box<dyn Fn(Option<&str>) + Send + 'static>;

/// Handle to a running serial worker thread. Dropping this without calling
/// [`shutdown`](SerialWorker::shutdown) leaves the worker thread running;
/// always shut down explicitly.
pub struct SerialWorker {
    name: String,
    commands: Sender<Command>,
    join_handle: Option<JoinHandle<()>>,
}

impl SerialWorker {
    pub fn spawn(name: &str, line_handler: LineHandler, device_changed: DeviceChangedHandler) -> Self {
        let (tx, rx) = bounded(COMMAND_CHANNEL_CAPACITY);
        let worker_name = name.to_string();
        let join_handle = std::thread::Builder::new()
            .name(format!("serial-worker-{worker_name}"))
            .spawn(move || run(&worker_name, rx, line_handler, device_changed))
            .expect("failed to spawn serial worker thread");

        SerialWorker {
            name: name.to_string(),
            commands: tx,
            join_handle: Some(join_handle),
        }
    }

    /// Enqueues a rebind. Non-blocking: if the command channel is full this
    /// logs and drops the request rather than blocking the caller.
    pub fn rebind(&self, params: Option<OpenParams>) {
        if let Err(TrySendError::Full(_)) = self.commands.try_send(Command::Rebind(params)) {
            warn!("{}: command channel full, dropping rebind request", self.name);
        }
    }

    /// Enqueues a shutdown and waits for the worker thread to exit.
    pub fn shutdown(&mut self) {
        let _ = self.commands.try_send(Command::Shutdown);
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SerialWorker {
    fn drop(&mut self) {
        if self.join_handle.is_some() {
            self.shutdown();
        }
    }
}

fn open_port(params: &OpenParams) -> serialport::Result<Box<dyn serialport::SerialPort>> {
    let builder = serialport::new(&params.path, params.baud_rate).timeout(params.timeout);

    // set_exclusive is Unix-specific (TTYPort from open_native), not part of
    // the cross-platform SerialPort trait returned by plain open().
    #[cfg(unix)]
    {
        let mut port = builder.open_native()?;
        if let Err(e) = port.set_exclusive(params.exclusive) {
            warn!("{}: failed to set exclusive={}: {e}", params.path, params.exclusive);
        }
        Ok(Box::new(port))
    }
    #[cfg(not(unix))]
    {
        builder.open()
    }
}

fn run(
    name: &str,
    commands: crossbeam_channel::Receiver<Command>,
    line_handler: LineHandler,
    device_changed: DeviceChangedHandler,
) {
    let mut port: Option<Box<dyn serialport::SerialPort>> = None;
    let mut accumulator: Vec<u8> = Vec::new();
    let mut read_buf = [0u8; READ_CHUNK_SIZE];

    loop {
        if port.is_some() {
            // Drain as many lines as are available until a command shows up.
            match commands.try_recv() {
                Ok(command) => {
                    if !handle_command(name, command, &mut port, &mut accumulator, &device_changed) {
                        return;
                    }
                    continue;
                }
                Err(crossbeam_channel::TryRecvError::Empty) => {}
                Err(crossbeam_channel::TryRecvError::Disconnected) => return,
            }

            let active = port.as_mut().unwrap();
            match active.read(&mut read_buf) {
                Ok(0) => {}
                Ok(n) => {
                    accumulator.extend_from_slice(&read_buf[..n]);
                    while let Some(pos) = accumulator.iter().position(|&b| b == b'\n') {
                        let line_bytes: Vec<u8> = accumulator.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line_bytes);
                        line_handler(&line);
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => {
                    error!("{name}: serial read error: {e}");
                    port = None;
                    accumulator.clear();
                    device_changed(None);
                }
            }
        } else {
            // No port open: block on the next command.
            match commands.recv() {
                Ok(command) => {
                    if !handle_command(name, command, &mut port, &mut accumulator, &device_changed) {
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    }
}

/// Returns `false` when the worker should exit.
fn handle_command(
    name: &str,
    command: Command,
    port: &mut Option<Box<dyn serialport::SerialPort>>,
    accumulator: &mut Vec<u8>,
    device_changed: &DeviceChangedHandler,
) -> bool {
    match command {
        Command::Rebind(new_params) => {
            if port.take().is_some() {
                debug!("{name}: closing current port");
                accumulator.clear();
                device_changed(None);
            }
            if let Some(params) = new_params {
                match open_port(&params) {
                    Ok(opened) => {
                        info!("{name}: opened {} @ {} baud", params.path, params.baud_rate);
                        *port = Some(opened);
                        device_changed(Some(&params.path));
                    }
                    Err(e) => {
                        error!("{name}: failed to open {}: {e}", params.path);
                    }
                }
            }
            true
        }
        Command::Shutdown => {
            if port.take().is_some() {
                accumulator.clear();
                device_changed(None);
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn shutdown_without_any_rebind_joins_cleanly() {
        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let lines_clone = lines.clone();
        let mut worker = SerialWorker::spawn(
            "test",
            Box::new(move |line| lines_clone.lock().unwrap().push(line.to_string())),
            Box::new(|_| {}),
        );
        worker.shutdown();
        assert!(lines.lock().unwrap().is_empty());
    }

    #[test]
    fn rebind_to_missing_device_logs_and_does_not_crash() {
        let changes: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let changes_clone = changes.clone();
        let mut worker = SerialWorker::spawn(
            "test",
            Box::new(|_| {}),
            Box::new(move |p| changes_clone.lock().unwrap().push(p.map(str::to_string))),
        );
        worker.rebind(Some(OpenParams {
            path: "/dev/nonexistent-usbl-relay-test".to_string(),
            baud_rate: 4800,
            exclusive: true,
            timeout: Duration::from_millis(50),
        }));
        worker.shutdown();
        // Open failure: no device-changed event for the new path, and no
        // event for "closing" a port that was never opened.
        assert!(changes.lock().unwrap().is_empty());
    }

    #[test]
    fn rebind_to_none_is_a_close_with_no_reopen() {
        let changes: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let changes_clone = changes.clone();
        let mut worker = SerialWorker::spawn(
            "test",
            Box::new(|_| {}),
            Box::new(move |p| changes_clone.lock().unwrap().push(p.map(str::to_string))),
        );
        worker.rebind(None);
        worker.shutdown();
        assert!(changes.lock().unwrap().is_empty());
    }
}
