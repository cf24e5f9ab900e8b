//! Command-line options for the launcher

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use std::fmt;

pub const DEFAULT_MEMORY_STR: &str = "8G";

/// Memory size options
#[derive(Parser, Debug, Clone)]
pub struct MemoryOpts {
    /// Guest memory, passed to QEMU verbatim (e.g. 8G, 4096M)
    #[clap(
        short = 'm',
        long = "memory",
        value_name = "SIZE",
        env = "WINVM_MEMORY",
        default_value = DEFAULT_MEMORY_STR
    )]
    pub memory: String,
}

impl Default for MemoryOpts {
    fn default() -> Self {
        Self {
            memory: DEFAULT_MEMORY_STR.to_owned(),
        }
    }
}

impl fmt::Display for MemoryOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.memory)
    }
}

/// Everything the user can ask of a single launcher run.
///
/// This is the raw, unvalidated form; see [`crate::options::Options`].
#[derive(Parser, Debug, Clone, Default)]
pub struct LaunchOpts {
    /// QEMU drive path
    #[clap(long, value_name = "PATH", env = "WINVM_DRIVE")]
    pub drive: Option<Utf8PathBuf>,

    /// Path to the Windows installation ISO
    #[clap(long, value_name = "PATH", env = "WINVM_ISO")]
    pub iso: Option<Utf8PathBuf>,

    /// Mount <drive> to <path>
    #[clap(long)]
    pub mount: bool,

    /// Unmount the disk from <path>
    #[clap(long)]
    pub umount: bool,

    /// Mount point for <drive>
    #[clap(long, value_name = "PATH", env = "WINVM_MOUNT_PATH")]
    pub path: Option<Utf8PathBuf>,

    /// Camera id from lsusb (in format 123f:bd32)
    #[clap(long, value_name = "VENDOR:PRODUCT")]
    pub camera: Option<String>,

    #[clap(flatten)]
    pub memory: MemoryOpts,

    /// Create <drive> before boot (needs a valid iso to boot)
    #[clap(long)]
    pub make: bool,

    /// Disable a device: audio (aud) or network (net); may be repeated
    #[clap(long = "no", value_name = "DEVICE")]
    pub disable: Vec<String>,

    /// Don't add a network card (same as `-no net`)
    #[clap(long, hide = true)]
    pub nonet: bool,
}

/// How steps that need root are run when we are not root ourselves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum Escalation {
    /// Prefix privileged steps with `sudo`
    #[default]
    Sudo,
    /// Run privileged steps as-is
    #[value(name = "none")]
    Direct,
}
