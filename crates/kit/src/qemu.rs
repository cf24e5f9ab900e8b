//! QEMU command line for the Windows guest.
//!
//! The machine description is fixed: the guest was installed against this
//! exact hardware, and Windows notices when it changes.

use camino::Utf8Path;

use crate::options::{Device, RunOptions};
use crate::usb::UsbDevice;

pub const QEMU_SYSTEM: &str = "qemu-system-x86_64";

const AUDIO_BACKEND: &str = "pipewire";

const MACHINE_FLAGS: &[&str] = &[
    "-M",
    "q35,usb=on,acpi=on,hpet=off",
];

const CPU_FLAGS: &[&str] = &[
    "-cpu",
    "host,hv_relaxed,hv_frequencies,hv_vpindex,hv_ipi,hv_tlbflush,hv_spinlocks=0x1fff,hv_synic,hv_runtime,hv_time,hv_stimer,hv_vapic",
];

/// Display, SPICE agent channel, CPU count, acceleration and USB controller.
const DEVICE_FLAGS: &[&str] = &[
    "-vga",
    "qxl",
    "-device",
    "virtio-serial-pci",
    "-spice",
    "port=5930,disable-ticketing=on",
    "-device",
    "virtserialport,chardev=spicechannel0,name=com.redhat.spice.0",
    "-chardev",
    "spicevmc,id=spicechannel0,name=vdagent",
    "-display",
    "spice-app",
    "-smp",
    "cores=4",
    "-accel",
    "kvm",
    "-device",
    "usb-tablet",
    "-usb",
    "-device",
    "usb-ehci,id=ehci",
    "-monitor",
    "stdio",
];

fn audio_flags() -> Vec<String> {
    vec![
        "-device".into(),
        "ich9-intel-hda".into(),
        "-device".into(),
        "hda-duplex,audiodev=snd0".into(),
        "-audiodev".into(),
        format!("{AUDIO_BACKEND},id=snd0"),
    ]
}

/// Build the full argument list for `qemu-system-x86_64`.
///
/// `camera` is the already resolved passthrough device, and `cdrom` the
/// installation media if it should be attached.
pub fn system_args(
    opts: &RunOptions,
    camera: Option<&UsbDevice>,
    cdrom: Option<&Utf8Path>,
) -> Vec<String> {
    let mut args: Vec<String> = MACHINE_FLAGS.iter().map(|s| s.to_string()).collect();
    args.extend(["-m".to_owned(), opts.memory.clone()]);
    args.extend(CPU_FLAGS.iter().map(|s| s.to_string()));
    if !opts.is_disabled(Device::Audio) {
        args.extend(audio_flags());
    }
    args.extend(DEVICE_FLAGS.iter().map(|s| s.to_string()));

    args.push("-drive".into());
    args.push(format!("file={}", opts.disk.path));

    if let Some(cam) = camera {
        args.push("-device".into());
        args.push(format!(
            "usb-host,hostbus={},hostaddr={},bus=ehci.0",
            cam.bus, cam.address
        ));
    }

    args.push("-nic".into());
    if opts.is_disabled(Device::Network) {
        args.push("none".into());
    } else {
        args.push("user,model=e1000".into());
    }

    if let Some(iso) = cdrom {
        args.push("-cdrom".into());
        args.push(iso.to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Disk;
    use std::collections::BTreeSet;

    fn opts() -> RunOptions {
        RunOptions {
            disk: Disk {
                path: "/vm/win.qcow2".into(),
                create_if_missing: false,
            },
            iso: None,
            memory: "8G".into(),
            camera: None,
            disabled: BTreeSet::new(),
        }
    }

    #[test]
    fn test_default_machine() {
        let args = system_args(&opts(), None, None);
        let expected = [
            "-M",
            "q35,usb=on,acpi=on,hpet=off",
            "-m",
            "8G",
            "-cpu",
            "host,hv_relaxed,hv_frequencies,hv_vpindex,hv_ipi,hv_tlbflush,hv_spinlocks=0x1fff,hv_synic,hv_runtime,hv_time,hv_stimer,hv_vapic",
            "-device",
            "ich9-intel-hda",
            "-device",
            "hda-duplex,audiodev=snd0",
            "-audiodev",
            "pipewire,id=snd0",
            "-vga",
            "qxl",
            "-device",
            "virtio-serial-pci",
            "-spice",
            "port=5930,disable-ticketing=on",
            "-device",
            "virtserialport,chardev=spicechannel0,name=com.redhat.spice.0",
            "-chardev",
            "spicevmc,id=spicechannel0,name=vdagent",
            "-display",
            "spice-app",
            "-smp",
            "cores=4",
            "-accel",
            "kvm",
            "-device",
            "usb-tablet",
            "-usb",
            "-device",
            "usb-ehci,id=ehci",
            "-monitor",
            "stdio",
            "-drive",
            "file=/vm/win.qcow2",
            "-nic",
            "user,model=e1000",
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn test_disabled_devices() {
        let mut o = opts();
        o.disabled = BTreeSet::from([Device::Audio, Device::Network]);
        let args = system_args(&o, None, None);
        assert!(!args.iter().any(|a| a.contains("audiodev") || a == "ich9-intel-hda"));
        assert_eq!(&args[args.len() - 2..], ["-nic", "none"]);
    }

    #[test]
    fn test_camera_and_cdrom() {
        let mut o = opts();
        o.memory = "16G".into();
        let cam = UsbDevice {
            bus: "001".into(),
            address: "007".into(),
        };
        let args = system_args(&o, Some(&cam), Some(Utf8Path::new("/iso/win11.iso")));
        assert_eq!(&args[2..4], ["-m", "16G"]);
        let tail = &args[args.len() - 8..];
        assert_eq!(
            tail,
            [
                "-drive",
                "file=/vm/win.qcow2",
                "-device",
                "usb-host,hostbus=001,hostaddr=007,bus=ehci.0",
                "-nic",
                "user,model=e1000",
                "-cdrom",
                "/iso/win11.iso",
            ]
        );
    }
}
