use log::LevelFilter;

/// Inits logging for host. Safe to call more than once, later calls only
/// adjust the max level.
pub fn init_logging(level: LevelFilter) {
    env_logger::Builder::new().filter(None, level).parse_default_env().try_init().ok();
    log::set_max_level(level)
}
