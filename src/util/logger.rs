//! The crate's built-in logger, installed once when a [`crate::Runtime`] is
//! created.
//!
//! Enabled by the default Cargo feature `builtin_env_logger`, which wires up
//! `env_logger` against the `log` facade so a host sees scheduler and region
//! diagnostics out of the box. A host embedding this runtime into a larger
//! program that already installs its own `log` backend should disable the
//! default feature and do so instead; this module then becomes a no-op.

/// Attempts to install the built-in `env_logger`. Does nothing if the
/// `builtin_env_logger` feature is disabled, and is safe to call more than
/// once (a runtime's `init -> run -> wait -> shutdown -> init` lifecycle may
/// construct more than one [`crate::Runtime`] in a process).
pub(crate) fn init() {
    #[cfg(feature = "builtin_env_logger")]
    {
        let result = env_logger::try_init_from_env(
            env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
        );
        match result {
            Ok(()) => log::debug!("boc initialized the built-in logger"),
            Err(e) => log::debug!("boc did not initialize the built-in logger: {e}"),
        }
    }
}
