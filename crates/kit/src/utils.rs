/// Whether we're running with an effective uid of 0.
pub(crate) fn is_root() -> bool {
    rustix::process::geteuid().is_root()
}

/// The name to show in usage text: our own path as invoked, resolved if
/// possible.
pub(crate) fn program_name() -> String {
    let Some(argv0) = std::env::args_os().next() else {
        return env!("CARGO_PKG_NAME").to_owned();
    };
    std::fs::canonicalize(&argv0)
        .unwrap_or_else(|_| argv0.into())
        .to_string_lossy()
        .into_owned()
}
