//! A built-in logger implementation.
//!
//! Uses the `env_logger` crate, enabled by the default Cargo feature "builtin_env_logger". When
//! enabled, it is initialized by `Coordinator::new` and shows logs of level INFO or lower (the
//! lower, the more important).
//!
//! This gives out-of-the-box visibility into collection cycles without configuration, while
//! still letting embedders configure verbosity from the environment. A host that wants its logs
//! integrated with its own subscriber should disable "builtin_env_logger" and register its own
//! `log` implementation.

/// Attempt to init an `env_logger`. Does nothing if "builtin_env_logger" is disabled.
pub(crate) fn try_init() {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            let result = env_logger::try_init_from_env(
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            );

            match result {
                Ok(()) => {
                    log::debug!("gcore initialized the logger.");
                }
                Err(e) => {
                    log::debug!("gcore failed to initialize the built-in env_logger: {e}");
                }
            }
        } else {
            log::debug!("gcore didn't initialize the built-in env_logger; the \"builtin_env_logger\" feature is disabled.");
        }
    }
}
