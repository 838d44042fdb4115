//! Build metadata for the health endpoint and the `--version` flag.

/// Release version; overridable at build time.
pub const VERSION: &str = match option_env!("WARDEN_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

/// Git commit the binary was built from.
pub const GIT_COMMIT: &str = match option_env!("WARDEN_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};

/// Build timestamp.
pub const BUILD_DATE: &str = match option_env!("WARDEN_BUILD_DATE") {
    Some(date) => date,
    None => "unknown",
};
