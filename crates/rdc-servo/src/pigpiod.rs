//! Client for the pigpio daemon's socket interface.
//!
//! pigpiod listens on TCP port 8888. Each command is a 16-byte request of
//! four little-endian `u32` words `(cmd, p1, p2, p3)`, where `p3` is the
//! length of an optional extension (always 0 here). The daemon answers with
//! 16 bytes echoing `(cmd, p1, p2)` followed by the signed result; a negative
//! result is a pigpio error code.
//!
//! All calls block on the socket. pigpiod runs on the same host, so a
//! command completes in well under a millisecond.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{PinMode, PwmDriver, PwmError};

/// Host pigpiod listens on unless `PIGPIO_ADDR` says otherwise.
pub const DEFAULT_PIGPIOD_HOST: &str = "localhost";

/// Port pigpiod listens on unless `PIGPIO_PORT` says otherwise.
pub const DEFAULT_PIGPIOD_PORT: u16 = 8888;

const CMD_MODES: u32 = 0;
const CMD_PWM: u32 = 5;
const CMD_PRS: u32 = 6;
const CMD_PFS: u32 = 7;

const FRAME_LEN: usize = 16;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection to pigpiod.
#[derive(Debug)]
pub struct PigpiodDriver {
    addr: String,
    stream: Option<TcpStream>,
}

impl PigpiodDriver {
    /// Connects to pigpiod at `host:port`.
    ///
    /// # Errors
    ///
    /// Returns `PwmError::Connect` if the address does not resolve or no
    /// resolved address accepts the connection.
    pub fn connect(host: &str, port: u16) -> Result<Self, PwmError> {
        let addr = format!("{host}:{port}");
        let connect_err = |source: std::io::Error| PwmError::Connect {
            addr: format!("{host}:{port}"),
            source,
        };

        let mut last_err = None;
        for sock_addr in (host, port).to_socket_addrs().map_err(connect_err)? {
            match TcpStream::connect_timeout(&sock_addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_nodelay(true).map_err(connect_err)?;
                    stream.set_read_timeout(Some(IO_TIMEOUT)).map_err(connect_err)?;
                    stream.set_write_timeout(Some(IO_TIMEOUT)).map_err(connect_err)?;

                    info!(addr = %addr, "Connected to pigpiod");
                    return Ok(Self {
                        addr,
                        stream: Some(stream),
                    });
                }
                Err(e) => {
                    debug!(addr = %sock_addr, error = %e, "pigpiod connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(connect_err(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "address did not resolve")
        })))
    }

    /// Address this driver is connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends one command and returns pigpiod's non-negative result.
    fn command(&mut self, name: &'static str, cmd: u32, pin: u32, value: u32) -> Result<u32, PwmError> {
        let stream = self.stream.as_mut().ok_or(PwmError::Stopped)?;

        stream.write_all(&encode_request(cmd, pin, value))?;

        let mut response = [0u8; FRAME_LEN];
        stream.read_exact(&mut response)?;

        let code = decode_result(&response);
        u32::try_from(code).map_err(|_| PwmError::Command {
            command: name,
            pin,
            code,
        })
    }
}

impl PwmDriver for PigpiodDriver {
    fn set_mode(&mut self, pin: u32, mode: PinMode) -> Result<(), PwmError> {
        self.command("set_mode", CMD_MODES, pin, mode.code()).map(|_| ())
    }

    fn set_pwm_frequency(&mut self, pin: u32, frequency: u32) -> Result<u32, PwmError> {
        let actual = self.command("set_PWM_frequency", CMD_PFS, pin, frequency)?;
        if actual != frequency {
            warn!(pin, requested = frequency, actual, "pigpiod picked a different PWM frequency");
        }
        Ok(actual)
    }

    fn set_pwm_range(&mut self, pin: u32, range: u32) -> Result<(), PwmError> {
        self.command("set_PWM_range", CMD_PRS, pin, range).map(|_| ())
    }

    fn set_pwm_duty_cycle(&mut self, pin: u32, duty_cycle: u32) -> Result<(), PwmError> {
        self.command("set_PWM_dutycycle", CMD_PWM, pin, duty_cycle)
            .map(|_| ())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Peer may already be gone
            let _ = stream.shutdown(Shutdown::Both);
            info!(addr = %self.addr, "Disconnected from pigpiod");
        }
    }
}

impl Drop for PigpiodDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn encode_request(cmd: u32, p1: u32, p2: u32) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    for (chunk, word) in frame.chunks_exact_mut(4).zip([cmd, p1, p2, 0]) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    frame
}

fn decode_result(frame: &[u8; FRAME_LEN]) -> i32 {
    let [.., a, b, c, d] = *frame;
    i32::from_le_bytes([a, b, c, d])
}
