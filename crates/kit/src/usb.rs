//! USB device lookup through `lsusb`.
//!
//! `lsusb -d <vendor:product>` prints one line per matching device:
//!
//! ```text
//! Bus 002 Device 005: ID 1234:5678 Some Camera
//! ```
//!
//! We only need the bus and address, which together name the device node
//! under `/dev/bus/usb`.

use std::process::Command;

use camino::Utf8PathBuf;
use color_eyre::eyre::Context;
use color_eyre::Result;
use tracing::debug;

use crate::command_run::CommandRun;

/// Where a USB device sits on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDevice {
    pub bus: String,
    pub address: String,
}

impl UsbDevice {
    /// The usbfs node QEMU opens to pass the device through.
    pub fn node(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("/dev/bus/usb/{}/{}", self.bus, self.address))
    }
}

/// `lsusb` printed something we don't know how to read.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("unexpected lsusb output, expected 'Bus <bus> Device <addr>: ...', got {line:?}")]
pub struct MalformedReport {
    pub line: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UsbLookupError {
    #[error("couldn't find camera with id '{id}'")]
    NotFound { id: String },
    #[error(transparent)]
    Malformed(#[from] MalformedReport),
}

/// Split off everything up to the first `delim`.
fn chop(s: &str, delim: char) -> (&str, &str) {
    s.split_once(delim).unwrap_or((s, ""))
}

/// Parse a single device line into its bus and address.
pub fn parse_device_line(line: &str) -> Result<UsbDevice, MalformedReport> {
    let malformed = || MalformedReport {
        line: line.to_owned(),
    };

    let (bus_lit, rest) = chop(line, ' ');
    let (bus, rest) = chop(rest, ' ');
    let (device_lit, rest) = chop(rest, ' ');
    if bus_lit != "Bus" || device_lit != "Device" || bus.is_empty() {
        return Err(malformed());
    }
    let (address, _) = rest.split_once(':').ok_or_else(malformed)?;
    let address = address.trim();
    if address.is_empty() || address.contains(char::is_whitespace) {
        return Err(malformed());
    }

    Ok(UsbDevice {
        bus: bus.to_owned(),
        address: address.to_owned(),
    })
}

/// Interpret the full `lsusb -d` output for `id`. Only the first device is used.
pub fn parse_report(id: &str, report: &str) -> Result<UsbDevice, UsbLookupError> {
    let Some(line) = report.lines().find(|l| !l.trim().is_empty()) else {
        return Err(UsbLookupError::NotFound { id: id.to_owned() });
    };
    Ok(parse_device_line(line)?)
}

/// Ask `lsusb` where the device `id` is.
///
/// The outer error is for failing to run `lsusb` at all; the inner one
/// classifies the answer.
pub fn lookup(id: &str) -> Result<Result<UsbDevice, UsbLookupError>> {
    let (status, report) = Command::new("lsusb")
        .args(["-d", id])
        .run_capture_stdout()
        .context("Failed to run lsusb")?;
    if !status.success() {
        // lsusb exits 1 when nothing matches
        debug!("lsusb -d {id} exited with {status}");
        return Ok(Err(UsbLookupError::NotFound { id: id.to_owned() }));
    }
    Ok(parse_report(id, &report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_line() {
        let dev = parse_device_line("Bus 002 Device 005: ID 1234:5678 Some Camera").unwrap();
        assert_eq!(
            dev,
            UsbDevice {
                bus: "002".into(),
                address: "005".into()
            }
        );
        assert_eq!(dev.node(), "/dev/bus/usb/002/005");
    }

    #[test]
    fn test_description_is_ignored() {
        for desc in [
            "",
            "X",
            "Logitech, Inc. HD Pro Webcam C920",
            "Chicony Electronics Co., Ltd Integrated Camera: with: colons",
        ] {
            let line = format!("Bus 001 Device 004: ID 046d:082d {desc}");
            let dev = parse_device_line(&line).unwrap();
            assert_eq!(dev.bus, "001");
            assert_eq!(dev.address, "004");
        }
    }

    #[test]
    fn test_address_whitespace_trimmed() {
        let dev = parse_device_line("Bus 003 Device 012 : ID 1234:5678 cam\n").unwrap();
        assert_eq!(dev.address, "012");
    }

    #[test]
    fn test_malformed_lines() {
        for line in [
            "Device 002 Bus 005: ID 1234:5678 Some Camera",
            "bus 002 Device 005: ID 1234:5678 Some Camera",
            "Bus 002 Port 005: ID 1234:5678 Some Camera",
            "Bus 002 Device 005 ID 1234:5678",
            "Bus 002 Device : ID 1234:5678",
            "Bus  Device 005: ID 1234:5678",
            "garbage",
        ] {
            let err = parse_device_line(line).unwrap_err();
            assert_eq!(err.line, line);
        }
    }

    #[test]
    fn test_parse_report() {
        let report = "Bus 002 Device 005: ID 1234:5678 First\nBus 002 Device 006: ID 1234:5678 Second\n";
        assert_eq!(
            parse_report("1234:5678", report).unwrap(),
            UsbDevice {
                bus: "002".into(),
                address: "005".into()
            }
        );
    }

    #[test]
    fn test_empty_report_is_not_found() {
        for report in ["", "\n", "  \n"] {
            assert_eq!(
                parse_report("1234:5678", report),
                Err(UsbLookupError::NotFound {
                    id: "1234:5678".into()
                })
            );
        }
    }

    #[test]
    fn test_malformed_report() {
        let err = parse_report("1234:5678", "Device 002 Bus 005: ID 1234:5678 cam").unwrap_err();
        assert!(matches!(err, UsbLookupError::Malformed(_)));
        assert!(err.to_string().contains("unexpected lsusb output"));
    }
}
