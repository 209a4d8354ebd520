pub mod args;
pub mod auth;
pub mod blob;
pub mod commands;
pub mod config;
pub mod result;
pub mod term;
pub mod tpm;

/// Logs warnings to stderr, or everything if `debug` is set.
pub fn init_logging(debug: bool) {
    let level = if debug { log::Level::Trace } else { log::Level::Warn };
    if let Err(e) = stderrlog::new().verbosity(level).init() {
        eprintln!("couldn't initialize logging: {}", e);
    }
}
