//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Level directive for the given verbosity.
///
/// `quiet` wins over everything; otherwise `-v` or `debug = true` in the
/// config selects debug, `-vv` trace.
pub fn level_for(verbosity: u8, quiet: bool, debug: bool) -> &'static str {
    if quiet {
        return "warn";
    }
    match verbosity {
        0 if debug => "debug",
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` overrides the level picked from the flags. Calling this twice
/// is harmless; the second call is ignored.
pub fn init(verbosity: u8, quiet: bool, debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbosity, quiet, debug)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity > 1)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_default_is_info() {
        assert_eq!(level_for(0, false, false), "info");
    }

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for(1, false, false), "debug");
        assert_eq!(level_for(2, false, false), "trace");
        assert_eq!(level_for(5, false, false), "trace");
    }

    #[test]
    fn test_level_for_config_debug() {
        assert_eq!(level_for(0, false, true), "debug");
        assert_eq!(level_for(2, false, true), "trace");
    }

    #[test]
    fn test_level_for_quiet_wins() {
        assert_eq!(level_for(2, true, true), "warn");
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init(0, false, false);
        init(1, false, false);
    }
}
