//! winvm - boot a Windows guest under QEMU, or mount its disk image on the host

use std::ffi::OsString;

use clap::{CommandFactory, FromArgMatches, Parser};
use color_eyre::{eyre::Context as _, Report, Result};
use indoc::indoc;
use tracing::{debug, info};

mod command_run;
mod host;
mod nbd;
mod options;
mod opts;
mod plan;
mod qemu;
mod usb;
mod utils;

use command_run::{execute_plan, SystemExecutor};
use host::SystemProbe;
use options::{Options, ValidationError};
use opts::{Escalation, LaunchOpts};
use plan::{HostProbe, Plan};

const NOTES: &str = indoc! {"
    NOTE:
     - do not start the VM as root (e.g. through sudo), otherwise audio won't work.
     - modifies permissions of /dev/bus/usb/<bus>/<addr> if `-camera` is provided.
"};

/// Boot a Windows guest under QEMU, or mount its disk image on the host.
///
/// Options may be spelled with a single dash (`-drive`) or two (`--drive`).
#[derive(Parser, Debug)]
#[command(version, after_help = NOTES, args_override_self = true)]
struct Cli {
    #[clap(flatten)]
    launch: LaunchOpts,

    /// Print the commands instead of running them
    #[clap(long)]
    dry_run: bool,

    /// Print the plan as JSON (with --dry-run)
    #[clap(long, requires = "dry_run")]
    json: bool,

    /// How to get root for the steps that need it
    #[clap(long, value_enum, default_value_t, env = "WINVM_ESCALATION")]
    escalation: Escalation,
}

/// Long option names that may also be given with a single dash.
const LONG_OPTIONS: &[&str] = &[
    "drive",
    "iso",
    "mount",
    "umount",
    "path",
    "camera",
    "memory",
    "make",
    "no",
    "nonet",
    "help",
    "version",
    "dry-run",
    "json",
    "escalation",
];

/// Values are not told apart from options, so `-no -make` rewrites the
/// value too and clap then rejects it.
fn single_dash_to_long(arg: &str) -> Option<String> {
    let rest = arg.strip_prefix('-')?;
    if rest.starts_with('-') {
        return None;
    }
    let name = rest.split_once('=').map_or(rest, |(name, _)| name);
    LONG_OPTIONS.contains(&name).then(|| format!("-{arg}"))
}

/// Rewrite `-drive x` style options to `--drive x`, leaving everything
/// after a bare `--` alone.
fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut args = args.into_iter();
    let mut out: Vec<OsString> = args.next().into_iter().collect();
    for arg in args.by_ref() {
        if arg == "--" {
            out.push(arg);
            break;
        }
        match arg.to_str().and_then(single_dash_to_long) {
            Some(long) => out.push(long.into()),
            None => out.push(arg),
        }
    }
    out.extend(args);
    out
}

/// Install and configure the tracing/logging system.
///
/// Logs are filtered by the RUST_LOG environment variable, defaulting to
/// 'info', and written to stderr so they interleave with QEMU's monitor.
fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let format = fmt::format().without_time().with_target(false).compact();

    let fmt_layer = fmt::layer()
        .event_format(format)
        .with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn print_plan(plan: &Plan, cli: &Cli, is_root: bool) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(plan).context("Serializing plan")?;
        println!("{json}");
        return Ok(());
    }
    for step in plan.steps() {
        println!("{}", step.escalate(cli.escalation, is_root));
    }
    Ok(())
}

/// Validate the options and work out the steps, without running anything.
///
/// The privilege check comes before plan building, which may already call
/// out to `lsusb`.
fn plan_for(cli: &Cli, probe: &dyn HostProbe, is_root: bool) -> Result<(Options, Plan)> {
    let options = cli.launch.validate(&|p| probe.file_exists(p))?;
    debug!("{options:?}");

    options.mode().precondition().check(is_root)?;

    let plan = plan::build_plan(&options, probe)?;
    Ok((options, plan))
}

fn run(cli: Cli, command: &mut clap::Command) -> Result<()> {
    let is_root = utils::is_root();

    let (options, plan) = match plan_for(&cli, &SystemProbe, is_root) {
        Ok(planned) => planned,
        Err(e) => {
            if e.downcast_ref::<ValidationError>().is_some() {
                eprintln!("{}", command.render_help());
            }
            return Err(e);
        }
    };
    if cli.dry_run {
        return print_plan(&plan, &cli, is_root);
    }

    let mut executor = SystemExecutor::new(cli.escalation, is_root);
    execute_plan(&plan, &mut executor)?;

    match &options {
        Options::Mount { mount_point, .. } => info!("mounted disk to '{mount_point}'"),
        Options::Umount { mount_point } => info!("unmounted '{mount_point}'"),
        Options::Run(_) => debug!("guest exited"),
    }
    Ok(())
}

/// Main entry point.
///
/// Parse errors exit with status 1 like every other failure; `--help` and
/// `--version` exit with 0.
fn main() -> Result<(), Report> {
    install_tracing();
    color_eyre::install()?;

    let mut command = Cli::command().bin_name(utils::program_name());
    let matches = match command.try_get_matches_from_mut(normalize_args(std::env::args_os())) {
        Ok(matches) => matches,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    let cli = Cli::from_arg_matches(&matches)?;

    run(cli, &mut command)
}
