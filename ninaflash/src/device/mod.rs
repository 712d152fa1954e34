//! Serial port discovery and classification.
//!
//! Boards carrying an ESP32 module expose it through one of a handful of
//! USB bridges: the board's own USB controller (Arduino, Espressif native
//! USB) or a USB-to-UART chip. Ports are classified by VID/PID so that the
//! most likely candidate can be picked automatically.

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use {
    crate::port::{NativePortEnumerator, PortEnumerator, PortInfo},
    log::{debug, info, trace},
};

/// Transport type for discovered endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransportKind {
    /// Serial transport (UART/USB CDC).
    Serial,
    /// Unknown or unclassified transport.
    Unknown,
}

/// Known USB devices that front an ESP32 boot ROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceKind {
    /// Arduino board with a NINA module behind its USB controller.
    Arduino,
    /// Espressif native USB (USB-Serial-JTAG or USB-OTG CDC).
    Espressif,
    /// Silicon Labs CP210x USB-to-UART bridge.
    Cp210x,
    /// WCH CH340/CH341/CH9102 USB-to-UART bridge.
    Ch340,
    /// FTDI FT232/FT2232/FT4232 USB-to-UART bridge.
    Ftdi,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs; an empty PID list matches the whole vendor.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0x2341, &[], DeviceKind::Arduino),
    (0x303A, &[0x1001, 0x1002, 0x0002], DeviceKind::Espressif),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], DeviceKind::Cp210x),
    (0x1A86, &[0x7523, 0x7522, 0x5523, 0x55D4], DeviceKind::Ch340),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
];

impl DeviceKind {
    /// Classify a VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Arduino => "Arduino",
            Self::Espressif => "Espressif USB",
            Self::Cp210x => "CP210x",
            Self::Ch340 => "CH340/CH9102",
            Self::Ftdi => "FTDI",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Boards whose USB controller is wired to the module itself.
    pub fn is_high_priority(&self) -> bool {
        matches!(self, Self::Arduino | Self::Espressif)
    }
}

/// Discovered device endpoint information.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Endpoint name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Transport type.
    pub transport: TransportKind,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Check if this endpoint likely leads to an ESP32 boot ROM.
    pub fn is_likely_esp(&self) -> bool {
        self.device
            .is_known()
    }
}

#[cfg(feature = "native")]
impl From<PortInfo> for DetectedPort {
    fn from(info: PortInfo) -> Self {
        let device = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => DeviceKind::from_vid_pid(vid, pid),
            _ => DeviceKind::Unknown,
        };
        Self {
            name: info.name,
            transport: TransportKind::Serial,
            device,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
        }
    }
}

/// Detect all available endpoints with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    match NativePortEnumerator::list_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(DetectedPort::from)
            .inspect(|port| {
                if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                    trace!(
                        "Found USB port: {} (VID: {vid:04X}, PID: {pid:04X}, Device: {:?})",
                        port.name, port.device
                    );
                }
            })
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Detect all available endpoints (no serial backend compiled in).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Detect endpoints that likely lead to an ESP32 boot ROM.
pub fn detect_esp_ports() -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(DetectedPort::is_likely_esp)
        .collect()
}

/// Pick the best candidate from a list of endpoints.
///
/// Board controllers win over USB-UART bridges, known bridges over unknown
/// ports, and the first port is used when nothing is recognised.
pub fn select_port(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    let best = ports
        .iter()
        .position(|p| {
            p.device
                .is_high_priority()
        })
        .or_else(|| {
            ports
                .iter()
                .position(|p| {
                    p.device
                        .is_known()
                })
        })
        .unwrap_or(0);
    ports
        .into_iter()
        .nth(best)
        .ok_or(Error::DeviceNotFound)
}

/// Auto-detect a single ESP32 endpoint.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let port = select_port(detect_ports())?;
    if port
        .device
        .is_known()
    {
        info!("Auto-detected {} device: {}", port.device.name(), port.name);
    } else {
        info!("Using first available port: {}", port.name);
    }
    Ok(port)
}

/// Auto-detect a single ESP32 endpoint (no serial backend compiled in).
#[cfg(not(feature = "native"))]
pub fn auto_detect_port() -> Result<DetectedPort> {
    Err(Error::DeviceNotFound)
}

/// Format a list of detected endpoints for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port
                .device
                .is_known()
            {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.name, device_info, product_info)
        })
        .collect()
}
