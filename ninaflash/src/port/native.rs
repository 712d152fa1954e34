//! Native serial port implementation using the `serialport` crate.
//!
//! Besides the byte stream, USB serial adapters expose the DTR and RTS
//! modem lines. Arduino boards carrying a NINA module route them to the
//! module's GPIO0 and RESETN pins (DTR asserted pulls GPIO0 low, RTS
//! asserted pulls RESETN low), which is what [`SerialControlLine`] drives.

use {
    crate::{
        error::{Error, Result},
        port::{
            DataBits, FlowControl, Parity, Port, PortEnumerator, PortInfo, SerialConfig, StopBits,
        },
    },
    embedded_hal::digital::{self, ErrorKind, ErrorType, OutputPin},
    log::trace,
    serialport::ClearBuffer,
    std::{
        io::{Read, Write},
        time::Duration,
    },
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
    baud_rate: u32,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(
                config
                    .data_bits
                    .into(),
            )
            .parity(
                config
                    .parity
                    .into(),
            )
            .stop_bits(
                config
                    .stop_bits
                    .into(),
            )
            .flow_control(
                config
                    .flow_control
                    .into(),
            )
            .open()?;

        Ok(Self {
            port: Some(port),
            name: config
                .port_name
                .clone(),
            timeout: config.timeout,
            baud_rate: config.baud_rate,
        })
    }

    /// Open a serial port with default settings.
    pub fn open_simple(port_name: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig::new(port_name, baud_rate);
        Self::open(&config)
    }

    /// Handles for the boot (DTR) and reset (RTS) lines of this port.
    pub fn control_lines(&self) -> Result<(SerialControlLine, SerialControlLine)> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| {
                Error::Serial(serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    "Port is closed",
                ))
            })?;

        Ok((
            SerialControlLine::new(port.try_clone()?, ControlSignal::Dtr),
            SerialControlLine::new(port.try_clone()?, ControlSignal::Rts),
        ))
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_timeout(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_baud_rate(baud_rate)?;
        }
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        // Take ownership of the port and let it drop (close)
        self.port
            .take();
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(std::io::Write::flush)
    }
}

/// Modem control signal backing a [`SerialControlLine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Data Terminal Ready, wired to GPIO0.
    Dtr,
    /// Request To Send, wired to RESETN.
    Rts,
}

/// Error raised when a modem line cannot be driven.
#[derive(Debug, thiserror::Error)]
#[error("failed to drive {signal:?}: {source}")]
pub struct ControlLineError {
    signal: ControlSignal,
    #[source]
    source: serialport::Error,
}

impl digital::Error for ControlLineError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// A DTR or RTS line exposed as an active-low output pin.
///
/// Driving the pin low asserts the signal, which pulls the target pin low
/// through the adapter's inverting transistor or passthrough firmware.
pub struct SerialControlLine {
    port: Box<dyn serialport::SerialPort>,
    signal: ControlSignal,
}

impl SerialControlLine {
    /// Wrap a cloned port handle.
    pub fn new(port: Box<dyn serialport::SerialPort>, signal: ControlSignal) -> Self {
        Self { port, signal }
    }

    /// Signal driven by this line.
    pub fn signal(&self) -> ControlSignal {
        self.signal
    }

    fn assert(&mut self, asserted: bool) -> std::result::Result<(), ControlLineError> {
        trace!("Setting {:?} to {asserted}", self.signal);
        let result = match self.signal {
            ControlSignal::Dtr => self
                .port
                .write_data_terminal_ready(asserted),
            ControlSignal::Rts => self
                .port
                .write_request_to_send(asserted),
        };
        result.map_err(|source| ControlLineError {
            signal: self.signal,
            source,
        })
    }
}

impl ErrorType for SerialControlLine {
    type Error = ControlLineError;
}

impl OutputPin for SerialControlLine {
    fn set_low(&mut self) -> std::result::Result<(), Self::Error> {
        self.assert(true)
    }

    fn set_high(&mut self) -> std::result::Result<(), Self::Error> {
        self.assert(false)
    }
}

/// Native port enumerator.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let (vid, pid, manufacturer, product, serial_number) = match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => (
                        Some(info.vid),
                        Some(info.pid),
                        info.manufacturer
                            .clone(),
                        info.product
                            .clone(),
                        info.serial_number
                            .clone(),
                    ),
                    _ => (None, None, None, None, None),
                };

                PortInfo {
                    name: p.port_name,
                    vid,
                    pid,
                    manufacturer,
                    product,
                    serial_number,
                }
            })
            .collect())
    }
}

// Type conversions from our types to serialport types

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => Self::Five,
            DataBits::Six => Self::Six,
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
            FlowControl::Software => Self::Software,
        }
    }
}
