//! Relay version.

/// The short version information for relay.
pub const RELAY_SHORT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The long version information for relay.
pub const RELAY_LONG_VERSION: &str = concat!(
    "Version: ",
    env!("CARGO_PKG_VERSION"),
    "\n",
    "Package: ",
    env!("CARGO_PKG_NAME"),
);
