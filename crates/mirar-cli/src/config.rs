//! CLI configuration

use std::io::IsTerminal;

/// Verbosity level for CLI output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only
    Quiet,
    /// Standard output
    #[default]
    Normal,
    /// Detailed output
    Verbose,
    /// Everything, including engine internals
    Debug,
}

impl Verbosity {
    /// Whether non-error output is suppressed
    #[must_use]
    pub const fn is_quiet(self) -> bool {
        matches!(self, Self::Quiet)
    }

    /// Whether detailed output is enabled
    #[must_use]
    pub const fn is_verbose(self) -> bool {
        matches!(self, Self::Verbose | Self::Debug)
    }

    /// Whether debug output is enabled
    #[must_use]
    pub const fn is_debug(self) -> bool {
        matches!(self, Self::Debug)
    }

    /// Tracing directives used when `RUST_LOG` is not set
    #[must_use]
    pub const fn log_directives(self) -> &'static str {
        match self {
            Self::Quiet => "mirador=error,mirar=error",
            Self::Normal => "mirador=info,mirar=info",
            Self::Verbose => "mirador=debug,mirar=debug,tower_http=debug",
            Self::Debug => "trace",
        }
    }
}

/// Color output preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorChoice {
    /// Always use color
    Always,
    /// Use color when stdout is a terminal
    #[default]
    Auto,
    /// Never use color
    Never,
}

impl ColorChoice {
    /// Resolve the preference against the current stdout
    #[must_use]
    pub fn should_color(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => std::io::stdout().is_terminal(),
        }
    }
}

/// Resolved CLI configuration shared by all commands
#[derive(Debug, Clone, Copy, Default)]
pub struct CliConfig {
    /// Output verbosity
    pub verbosity: Verbosity,
    /// Color preference
    pub color: ColorChoice,
}

impl CliConfig {
    /// Create a configuration with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the verbosity level
    #[must_use]
    pub const fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set the color preference
    #[must_use]
    pub const fn with_color(mut self, color: ColorChoice) -> Self {
        self.color = color;
        self
    }
}
