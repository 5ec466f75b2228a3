use log::SetLoggerError;

/// Install `env_logger` so that scheduler events show up without any setup by the runtime:
/// worker creation failures and the code store filling up at `warn`, `print_compilation` and
/// `print_compile_queue` output at `info`, rejected submissions at `debug`, and the lock
/// protocol at `trace`.  The level can be changed with `RUST_LOG`.
///
/// Does nothing if the "builtin_env_logger" feature is disabled.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            env_logger::try_init_from_env(
                // By default, use info level logging.
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            )
        } else {
            Ok(())
        }
    }
}
