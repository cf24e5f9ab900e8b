//! Integration tests for winvm
//!
//! These drive the built binary, and never boot a guest or touch a disk:
//! everything that would run a command goes through `--dry-run`.

use camino::Utf8Path;

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use libtest_mimic::{Arguments, Trial};
use serde_json::Value;
use xshell::{cmd, Shell};

/// Get the path to the winvm binary, checking WINVM_PATH env var first, then falling back to "winvm"
fn get_winvm_command() -> Result<String> {
    if let Ok(path) = std::env::var("WINVM_PATH") {
        return Ok(path);
    }
    // Force the user to set this if we're running from the project dir
    if let Some(path) = ["target/debug/winvm", "target/release/winvm"]
        .into_iter()
        .find(|p| Utf8Path::new(p).exists())
    {
        return Err(eyre!(
            "Detected {path} - set WINVM_PATH={path} to run using this binary"
        ));
    }
    Ok("winvm".to_owned())
}

/// Captured output from a command with decoded stdout/stderr strings
struct CapturedOutput {
    output: std::process::Output,
    stdout: String,
    stderr: String,
}

impl CapturedOutput {
    fn new(output: std::process::Output) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Self {
            output,
            stdout,
            stderr,
        }
    }

    fn assert_success(&self, context: &str) {
        assert!(
            self.output.status.success(),
            "{} failed: {}",
            context,
            self.stderr
        );
    }

    fn exit_code(&self) -> Option<i32> {
        self.output.status.code()
    }
}

/// Run winvm with the given arguments, capturing output
fn run_winvm(args: &[&str]) -> Result<CapturedOutput> {
    let sh = Shell::new()?;
    let winvm = get_winvm_command()?;
    let output = cmd!(sh, "{winvm} {args...}")
        .env_remove("WINVM_DRIVE")
        .env_remove("WINVM_ISO")
        .env_remove("WINVM_MOUNT_PATH")
        .env_remove("WINVM_MEMORY")
        .env_remove("WINVM_ESCALATION")
        .ignore_status()
        .output()
        .context("Failed to run winvm")?;
    Ok(CapturedOutput::new(output))
}

fn running_as_root() -> Result<bool> {
    let sh = Shell::new()?;
    let uid = cmd!(sh, "id -u").read()?;
    Ok(uid.trim() == "0")
}

fn test_help() -> Result<()> {
    let out = run_winvm(&["-help"])?;
    out.assert_success("winvm -help");
    for needle in ["--drive", "--camera", "--make", "NOTE:"] {
        if !out.stdout.contains(needle) {
            return Err(eyre!("help output lacks {needle}: {}", out.stdout));
        }
    }
    Ok(())
}

fn test_unknown_option() -> Result<()> {
    let out = run_winvm(&["-frobnicate"])?;
    assert_eq!(out.exit_code(), Some(1), "stderr: {}", out.stderr);
    Ok(())
}

fn test_missing_drive() -> Result<()> {
    let out = run_winvm(&[])?;
    assert_eq!(out.exit_code(), Some(1));
    assert!(out.stderr.contains("no drive provided"), "{}", out.stderr);
    assert!(out.stderr.contains("Usage"), "{}", out.stderr);
    Ok(())
}

fn test_mount_without_path() -> Result<()> {
    let out = run_winvm(&["-mount", "-drive", "win.qcow2"])?;
    assert_eq!(out.exit_code(), Some(1));
    assert!(out.stderr.contains("no mount point provided"), "{}", out.stderr);
    Ok(())
}

fn test_umount_dry_run() -> Result<()> {
    let out = run_winvm(&[
        "-umount",
        "-path",
        "/mnt/x",
        "--dry-run",
        "--escalation",
        "none",
    ])?;
    out.assert_success("umount dry run");
    assert_eq!(
        out.stdout.lines().collect::<Vec<_>>(),
        ["umount /mnt/x", "qemu-nbd --disconnect /dev/nbd0"]
    );
    Ok(())
}

fn test_mount_dry_run_json() -> Result<()> {
    let out = run_winvm(&[
        "-mount",
        "-drive",
        "/vm/win.qcow2",
        "-path",
        "/mnt/win",
        "--dry-run",
        "--json",
    ])?;
    out.assert_success("mount dry run");
    let plan: Value = serde_json::from_str(&out.stdout).context("Failed to parse JSON output")?;
    let steps = plan["steps"]
        .as_array()
        .ok_or_else(|| eyre!("Expected steps array, got: {}", out.stdout))?;
    let executables: Vec<_> = steps.iter().map(|s| s["executable"].clone()).collect();
    assert_eq!(executables, ["modprobe", "qemu-nbd", "mount"]);
    assert!(steps.iter().all(|s| s["privileged"] == true));
    Ok(())
}

fn test_run_dry_run() -> Result<()> {
    let out = run_winvm(&["-drive", "/vm/win.qcow2", "-no", "net", "--dry-run"])?;
    if running_as_root()? {
        assert_eq!(out.exit_code(), Some(1));
        assert!(out.stderr.contains("do not run the VM as root"), "{}", out.stderr);
        return Ok(());
    }
    out.assert_success("run dry run");
    let lines: Vec<_> = out.stdout.lines().collect();
    assert_eq!(lines.len(), 1, "{}", out.stdout);
    assert!(lines[0].starts_with("qemu-system-x86_64 -M q35,usb=on,acpi=on,hpet=off"));
    assert!(lines[0].contains("-nic none"));
    assert!(lines[0].contains("file=/vm/win.qcow2"));
    Ok(())
}

fn test_missing_iso() -> Result<()> {
    let out = run_winvm(&[
        "-drive",
        "/vm/win.qcow2",
        "-iso",
        "/nonexistent/win.iso",
        "--dry-run",
    ])?;
    assert_eq!(out.exit_code(), Some(1));
    if !running_as_root()? {
        assert!(out.stderr.contains("doesn't exist"), "{}", out.stderr);
    }
    Ok(())
}

const TESTS: &[(&str, fn() -> Result<()>)] = &[
    ("test_help", test_help),
    ("test_unknown_option", test_unknown_option),
    ("test_missing_drive", test_missing_drive),
    ("test_mount_without_path", test_mount_without_path),
    ("test_umount_dry_run", test_umount_dry_run),
    ("test_mount_dry_run_json", test_mount_dry_run_json),
    ("test_run_dry_run", test_run_dry_run),
    ("test_missing_iso", test_missing_iso),
];

fn main() {
    if std::env::consts::OS != "linux" {
        eprintln!(
            "Integration tests are only supported on Linux (current OS: {})",
            std::env::consts::OS
        );
        std::process::exit(0);
    }

    let args = Arguments::from_args();

    let tests: Vec<Trial> = TESTS
        .iter()
        .map(|&(name, f)| Trial::test(name, move || f().map_err(|e| format!("{:?}", e).into())))
        .collect();

    libtest_mimic::run(&args, tests).exit();
}
