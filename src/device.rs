//! The byte-oriented link to the sensor.
//!
//! The acquisition session only needs two things from the hardware: a way to
//! open it ([`Connector`]) and a way to pull whatever bytes have arrived
//! ([`Device`]). Real hardware goes through [`SerialConnector`]; tests and
//! demos can plug in anything else that implements the traits.

use log::debug;
use serial2::SerialPort;
use std::{io, path::PathBuf, time::Duration};

/// A source of raw bytes from the sensor.
pub trait Device: Send + 'static {
    /// Reads whatever bytes are currently available into `buf`.
    ///
    /// Must not block much longer than the read timeout the device was opened
    /// with. Returns `Ok(0)` when nothing arrived in that time.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Something that knows how to open a [`Device`].
pub trait Connector {
    /// The kind of device this connector produces.
    type Device: Device;

    /// Opens the device at `address`, configured for `baud_rate` and a read
    /// timeout of `read_timeout`.
    fn connect(
        &self,
        address: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> io::Result<Self::Device>;
}

/// Opens serial ports with [`serial2`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

/// An open serial port.
pub struct SerialDevice {
    port: SerialPort,
}

impl Connector for SerialConnector {
    type Device = SerialDevice;

    fn connect(
        &self,
        address: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> io::Result<SerialDevice> {
        let mut port = SerialPort::open(address, baud_rate)?;
        port.set_read_timeout(read_timeout)?;
        debug!("Opened {} at {} baud", address, baud_rate);
        Ok(SerialDevice { port })
    }
}

impl Device for SerialDevice {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_no_data(&e) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

fn is_no_data(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Lists the serial devices present on this machine.
pub fn available_ports() -> io::Result<Vec<PathBuf>> {
    SerialPort::available_ports()
}
