use env_logger::Env;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Installs the global logger. Safe to call more than once; only the first
/// call has an effect.
pub fn init() {
    let env = Env::default().default_filter_or(DEFAULT_FILTER);
    if env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init()
        .is_ok()
    {
        log::debug!("Logger initialized");
    }
}
