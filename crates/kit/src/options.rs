//! The validated form of [`LaunchOpts`].
//!
//! Validation is a pure function of the raw options and a file-existence
//! predicate. Each mode carries exactly the fields it needs, so downstream
//! code never has to re-check that e.g. a mount point is present.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::opts::LaunchOpts;

/// Top-level action selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Run,
    Mount,
    Umount,
}

impl Mode {
    /// Pick the mode from the `-mount`/`-umount` flags.
    ///
    /// Unmount wins when both are given.
    pub fn from_flags(mount: bool, umount: bool) -> Self {
        match (mount, umount) {
            (true, true) => {
                warn!("both -mount and -umount given, unmounting");
                Mode::Umount
            }
            (_, true) => Mode::Umount,
            (true, false) => Mode::Mount,
            (false, false) => Mode::Run,
        }
    }

    /// Privilege requirement of the mode as a whole.
    pub fn precondition(self) -> Precondition {
        match self {
            // Audio only works from inside the desktop user's session.
            Mode::Run => Precondition::Unprivileged,
            Mode::Mount | Mode::Umount => Precondition::Escalated,
        }
    }
}

/// What the effective user has to be for a mode to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Must not be root.
    Unprivileged,
    /// Individual steps get root, either because we are root or through
    /// the configured escalation.
    Escalated,
}

impl Precondition {
    pub fn check(self, is_root: bool) -> Result<(), PrivilegeError> {
        match self {
            Precondition::Unprivileged if is_root => Err(PrivilegeError),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("do not run the VM as root, otherwise audio won't work")]
pub struct PrivilegeError;

/// A guest device that can be left out with `-no`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
)]
pub enum Device {
    #[strum(to_string = "audio", serialize = "aud")]
    Audio,
    #[strum(to_string = "network", serialize = "net")]
    Network,
}

/// A disk image, and whether it may be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    pub path: Utf8PathBuf,
    pub create_if_missing: bool,
}

/// Options for booting the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub disk: Disk,
    pub iso: Option<Utf8PathBuf>,
    pub memory: String,
    pub camera: Option<String>,
    pub disabled: BTreeSet<Device>,
}

impl RunOptions {
    pub fn is_disabled(&self, device: Device) -> bool {
        self.disabled.contains(&device)
    }
}

/// Validated user intent for one run of the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Options {
    Run(RunOptions),
    Mount { disk: Disk, mount_point: Utf8PathBuf },
    Umount { mount_point: Utf8PathBuf },
}

impl Options {
    pub fn mode(&self) -> Mode {
        match self {
            Options::Run(_) => Mode::Run,
            Options::Mount { .. } => Mode::Mount,
            Options::Umount { .. } => Mode::Umount,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no mount point provided")]
    MissingMountPoint,
    #[error("no drive provided")]
    MissingDrive,
    #[error("no iso provided, one is needed to install onto the new drive {0}")]
    MissingIso(Utf8PathBuf),
}

/// Map `-no` tokens to devices. Unknown tokens are skipped.
pub fn disabled_devices<S: AsRef<str>>(tokens: &[S]) -> BTreeSet<Device> {
    tokens
        .iter()
        .filter_map(|token| {
            let token = token.as_ref();
            token
                .parse::<Device>()
                .map_err(|_| warn!("ignoring unknown device '{token}' given to -no"))
                .ok()
        })
        .collect()
}

impl LaunchOpts {
    /// Check option combinations and produce the [`Options`] for one run.
    pub fn validate(
        &self,
        file_exists: &dyn Fn(&Utf8Path) -> bool,
    ) -> Result<Options, ValidationError> {
        let mode = Mode::from_flags(self.mount, self.umount);

        let mount_point = match (mode, &self.path) {
            (Mode::Mount | Mode::Umount, None) => return Err(ValidationError::MissingMountPoint),
            (_, path) => path.clone(),
        };

        if let (Mode::Umount, Some(mount_point)) = (mode, &mount_point) {
            return Ok(Options::Umount {
                mount_point: mount_point.clone(),
            });
        }

        let drive = self.drive.clone().ok_or(ValidationError::MissingDrive)?;
        if self.make && !file_exists(&drive) && self.iso.is_none() {
            return Err(ValidationError::MissingIso(drive));
        }
        let disk = Disk {
            path: drive,
            create_if_missing: self.make,
        };

        match (mode, mount_point) {
            (Mode::Mount, Some(mount_point)) => Ok(Options::Mount { disk, mount_point }),
            _ => {
                let mut disabled = disabled_devices(self.disable.as_slice());
                if self.nonet {
                    disabled.insert(Device::Network);
                }
                for device in &disabled {
                    debug!("{device} disabled");
                }
                Ok(Options::Run(RunOptions {
                    disk,
                    iso: self.iso.clone(),
                    memory: self.memory.memory.clone(),
                    camera: self.camera.clone(),
                    disabled,
                }))
            }
        }
    }
}
