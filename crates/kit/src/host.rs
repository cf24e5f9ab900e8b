//! [`HostProbe`] backed by the real system.

use camino::Utf8Path;
use color_eyre::Result;
use rustix::fs::Access;

use crate::plan::HostProbe;
use crate::usb::{self, UsbDevice, UsbLookupError};

#[derive(Debug)]
pub struct SystemProbe;

impl HostProbe for SystemProbe {
    fn file_exists(&self, path: &Utf8Path) -> bool {
        path.exists()
    }

    fn resolve_usb_device(&self, id: &str) -> Result<Result<UsbDevice, UsbLookupError>> {
        usb::lookup(id)
    }

    fn device_accessible(&self, node: &Utf8Path) -> bool {
        rustix::fs::access(node.as_std_path(), Access::READ_OK | Access::WRITE_OK).is_ok()
    }
}
