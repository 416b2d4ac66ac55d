//! Tracing subscriber setup for the `cursor-docs` binary.
//!
//! Logs go to stderr so command output on stdout stays clean. The filter
//! comes from, in order: `CURSOR_DOCS_LOG`, `RUST_LOG`, then the `-v`/`-q`
//! flags (default `info` for this crate, `warn` for everything else).

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Verbosity requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    /// `-v` wins when both flags are given.
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    fn directives(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "warn,cursor_docs=info",
            Self::Verbose => "info,cursor_docs=debug",
        }
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_tracing(verbosity: Verbosity) {
    let filter = build_env_filter(verbosity);
    let ansi = std::io::IsTerminal::is_terminal(&std::io::stderr());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .with_target(verbosity == Verbosity::Verbose)
                .compact(),
        )
        .try_init();
}

fn build_env_filter(verbosity: Verbosity) -> EnvFilter {
    // Unparseable values fall through rather than failing startup.
    if let Ok(directives) = std::env::var("CURSOR_DOCS_LOG") {
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return filter;
        }
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(verbosity.directives())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_from_flags() {
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Verbose);
    }

    #[test]
    fn test_default_directives_parse() {
        for v in [Verbosity::Quiet, Verbosity::Normal, Verbosity::Verbose] {
            assert!(EnvFilter::try_new(v.directives()).is_ok());
        }
    }
}
