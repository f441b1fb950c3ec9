use env_logger::Env;

/// Initialize logging using env_logger.
///
/// `RUST_LOG` wins when set, e.g. `RUST_LOG=orz_core=debug orz cloud attach i-1`.
/// Otherwise warnings only, or debug with `verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .try_init();
}
