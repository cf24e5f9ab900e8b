//! Turning validated [`Options`] into the commands to run.
//!
//! A [`Plan`] is an ordered list of [`Invocation`]s. Building one never
//! changes the host: the only outside information comes through
//! [`HostProbe`], which answers whether files exist and where a USB device
//! is. Running the plan is [`crate::command_run::execute_plan`]'s job.
//!
//! For booting, the steps are always ordered as:
//!
//! 1. create the disk image (only with `-make`, and only if it's missing)
//! 2. open up the camera's device node (only if we can't already use it)
//! 3. start QEMU

use std::fmt;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::nbd;
use crate::options::{Disk, Options, RunOptions};
use crate::opts::Escalation;
use crate::qemu;
use crate::usb::{MalformedReport, UsbDevice, UsbLookupError};

/// One external command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub executable: String,
    pub args: Vec<String>,
    /// Needs root to succeed.
    pub privileged: bool,
}

impl Invocation {
    pub fn new<I, S>(executable: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            executable: executable.to_owned(),
            args: args.into_iter().map(Into::into).collect(),
            privileged: false,
        }
    }

    pub fn privileged<I, S>(executable: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            privileged: true,
            ..Self::new(executable, args)
        }
    }

    /// The full argument vector, executable first.
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.executable.as_str()).chain(self.args.iter().map(String::as_str))
    }

    /// The invocation as it will actually be run: privileged steps go through
    /// `sudo` unless we're already root or escalation is turned off.
    pub fn escalate(&self, escalation: Escalation, is_root: bool) -> Invocation {
        if !self.privileged || is_root || escalation == Escalation::Direct {
            return self.clone();
        }
        Invocation {
            executable: "sudo".to_owned(),
            args: self.argv().map(str::to_owned).collect(),
            privileged: true,
        }
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match shlex::try_join(self.argv()) {
            Ok(line) => f.write_str(&line),
            // Only fails on NUL bytes, which can't be passed to exec anyway
            Err(_) => write!(f, "{:?}", self.argv().collect::<Vec<_>>()),
        }
    }
}

/// The ordered commands for one launcher run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    steps: Vec<Invocation>,
}

impl Plan {
    pub fn steps(&self) -> &[Invocation] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Questions about the host that plan building needs answered.
pub trait HostProbe {
    fn file_exists(&self, path: &Utf8Path) -> bool;

    /// Find the bus and address of the USB device with the given
    /// `vendor:product` id.
    fn resolve_usb_device(&self, id: &str) -> Result<Result<UsbDevice, UsbLookupError>>;

    /// Whether the current user can already read and write `node`.
    fn device_accessible(&self, node: &Utf8Path) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("'{0}' doesn't exist")]
    MissingIso(Utf8PathBuf),
    #[error("couldn't find camera with id '{id}'")]
    DeviceNotFound { id: String },
    #[error("unsupported environment: {0}")]
    MalformedEnvironment(#[from] MalformedReport),
    #[error("failed to look up USB devices: {0:#}")]
    Probe(color_eyre::Report),
}

/// Work out every command needed for `options`.
pub fn build_plan(options: &Options, probe: &dyn HostProbe) -> Result<Plan, PlanError> {
    let steps = match options {
        Options::Umount { mount_point } => nbd::disconnect_steps(mount_point),
        Options::Mount { disk, mount_point } => {
            let mut steps: Vec<_> = creation_step(disk, probe).into_iter().collect();
            steps.extend(nbd::connect_steps(&disk.path, mount_point));
            steps
        }
        Options::Run(run) => run_steps(run, probe)?,
    };
    debug!("planned {} step(s)", steps.len());
    Ok(Plan { steps })
}

fn creation_step(disk: &Disk, probe: &dyn HostProbe) -> Option<Invocation> {
    if !disk.create_if_missing {
        return None;
    }
    if probe.file_exists(&disk.path) {
        info!("'{}' already exists", disk.path);
        return None;
    }
    Some(nbd::create_image(&disk.path))
}

fn resolve_camera(id: &str, probe: &dyn HostProbe) -> Result<UsbDevice, PlanError> {
    match probe.resolve_usb_device(id).map_err(PlanError::Probe)? {
        Ok(dev) => {
            info!(
                "found camera with id '{id}' at bus '{}', addr '{}'",
                dev.bus, dev.address
            );
            Ok(dev)
        }
        Err(UsbLookupError::NotFound { id }) => Err(PlanError::DeviceNotFound { id }),
        Err(UsbLookupError::Malformed(e)) => Err(e.into()),
    }
}

fn run_steps(opts: &RunOptions, probe: &dyn HostProbe) -> Result<Vec<Invocation>, PlanError> {
    let mut steps = Vec::new();
    steps.extend(creation_step(&opts.disk, probe));

    let camera = opts
        .camera
        .as_deref()
        .map(|id| resolve_camera(id, probe))
        .transpose()?;
    if let Some(cam) = &camera {
        let node = cam.node();
        if probe.device_accessible(&node) {
            debug!("{node} is already readable and writable");
        } else {
            info!("setting camera permissions on {node}");
            steps.push(Invocation::privileged("chmod", ["a+rw", node.as_str()]));
        }
    }

    let cdrom = match &opts.iso {
        Some(iso) if probe.file_exists(iso) => Some(iso.as_path()),
        Some(iso) => return Err(PlanError::MissingIso(iso.clone())),
        None => None,
    };

    steps.push(Invocation::new(
        qemu::QEMU_SYSTEM,
        qemu::system_args(opts, camera.as_ref(), cdrom),
    ));
    Ok(steps)
}
