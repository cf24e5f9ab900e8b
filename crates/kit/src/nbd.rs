//! Disk image creation, and mounting the image on the host via `qemu-nbd`.
//!
//! Only one network block device slot is used. Two launchers mounting
//! at the same time will trample each other.

use camino::Utf8Path;

use crate::plan::Invocation;

pub const NBD_DEVICE: &str = "/dev/nbd0";

/// Partition 2 is the Windows system volume; 1 is the EFI system partition.
const NBD_PARTITION: &str = "/dev/nbd0p2";

/// Virtual size of newly created images. qcow2 grows on demand.
pub const IMAGE_SIZE: &str = "50G";

/// Create an empty qcow2 image at `path`.
pub fn create_image(path: &Utf8Path) -> Invocation {
    Invocation::new(
        "qemu-img",
        ["create", "-f", "qcow2", path.as_str(), IMAGE_SIZE],
    )
}

/// Attach `drive` to the NBD slot and mount its system volume at `mount_point`.
pub fn connect_steps(drive: &Utf8Path, mount_point: &Utf8Path) -> Vec<Invocation> {
    vec![
        Invocation::privileged("modprobe", ["nbd", "max_part=8"]),
        Invocation::privileged(
            "qemu-nbd",
            [format!("--connect={NBD_DEVICE}"), drive.to_string()],
        ),
        Invocation::privileged("mount", [NBD_PARTITION, mount_point.as_str()]),
    ]
}

/// Undo [`connect_steps`]. Both steps run even if nothing is mounted.
pub fn disconnect_steps(mount_point: &Utf8Path) -> Vec<Invocation> {
    vec![
        Invocation::privileged("umount", [mount_point.as_str()]),
        Invocation::privileged("qemu-nbd", ["--disconnect", NBD_DEVICE]),
    ]
}
