//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use mirar::{MaskRegion, Viewport};
use std::path::PathBuf;

/// Mirador: CLI for Mirar - hybrid visual regression testing for web pages
#[derive(Parser, Debug)]
#[command(name = "mirador")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP testing service
    Serve(ServeArgs),

    /// Compare two screenshot files pixel by pixel
    Compare(CompareArgs),

    /// Capture a screenshot of a live page
    Capture(CaptureArgs),

    /// Show the effective engine configuration
    Config(ConfigArgs),
}

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, default_value = "3000", env = "MIRAR_PORT")]
    pub port: u16,

    /// Name of the project created at startup
    #[arg(long, default_value = "default", env = "MIRAR_PROJECT_NAME")]
    pub project_name: String,

    /// Base URL of the project created at startup
    #[arg(long, default_value = "http://localhost:8080", env = "MIRAR_PROJECT_URL")]
    pub project_url: String,

    /// Maximum runs executing at once
    #[arg(long, env = "MIRAR_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Retries granted to each run beyond its first attempt
    #[arg(long, env = "MIRAR_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Directory screenshots are persisted under
    #[arg(long, env = "MIRAR_SCREENSHOT_DIR")]
    pub screenshot_dir: Option<PathBuf>,

    /// Disable AI vision analysis for the startup project
    #[arg(long)]
    pub no_ai: bool,
}

/// Arguments for the compare command
#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// Baseline screenshot (PNG or JPEG)
    pub baseline: PathBuf,

    /// Candidate screenshot compared against the baseline
    pub current: PathBuf,

    /// Mismatch percentage treated as a regression
    #[arg(short, long, default_value = "5.0")]
    pub threshold: f64,

    /// Region excluded from comparison, as x,y,width,height (repeatable)
    #[arg(long = "mask", value_name = "X,Y,W,H", value_parser = parse_mask_region)]
    pub masks: Vec<MaskRegion>,

    /// Write the side-by-side diff image here when pixels differ
    #[arg(long)]
    pub diff_output: Option<PathBuf>,

    /// Print the result as JSON instead of human-readable text
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the capture command
#[derive(Parser, Debug)]
pub struct CaptureArgs {
    /// Page URL to capture
    pub url: String,

    /// Output path for the PNG screenshot
    #[arg(short, long, default_value = "screenshot.png")]
    pub output: PathBuf,

    /// Viewport size, as WIDTHxHEIGHT
    #[arg(long, default_value = "1280x720", value_parser = parse_viewport)]
    pub viewport: Viewport,

    /// Capture only the viewport instead of the full scrollable page
    #[arg(long)]
    pub viewport_only: bool,

    /// Milliseconds to let the page settle before the shot
    #[arg(long, default_value = "500")]
    pub wait: u64,

    /// CSS selector blanked out before the shot (repeatable)
    #[arg(long = "mask-selector", value_name = "SELECTOR")]
    pub mask_selectors: Vec<String>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

/// Color argument for CLI
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Parse a `x,y,width,height` mask region argument
fn parse_mask_region(s: &str) -> Result<MaskRegion, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(format!("expected X,Y,W,H, got {s:?}"));
    }
    let mut values = [0u32; 4];
    for (value, part) in values.iter_mut().zip(&parts) {
        *value = part
            .parse()
            .map_err(|_| format!("invalid number {part:?} in mask region"))?;
    }
    Ok(MaskRegion::new(values[0], values[1], values[2], values[3]))
}

/// Parse a `WIDTHxHEIGHT` viewport argument
fn parse_viewport(s: &str) -> Result<Viewport, String> {
    let (width, height) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let width = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width {width:?}"))?;
    let height = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height {height:?}"))?;
    Ok(Viewport::new(width, height))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    mod cli_tests {
        use super::*;

        #[test]
        fn test_parse_serve_command() {
            let cli = Cli::parse_from(["mirador", "serve"]);
            if let Commands::Serve(args) = cli.command {
                assert_eq!(args.port, 3000);
                assert_eq!(args.project_name, "default");
                assert!(args.max_concurrency.is_none());
                assert!(!args.no_ai);
            } else {
                panic!("expected serve command");
            }
        }

        #[test]
        fn test_parse_serve_with_port() {
            let cli = Cli::parse_from(["mirador", "serve", "--port", "8099"]);
            if let Commands::Serve(args) = cli.command {
                assert_eq!(args.port, 8099);
            } else {
                panic!("expected serve command");
            }
        }

        #[test]
        fn test_parse_serve_with_limits() {
            let cli = Cli::parse_from([
                "mirador",
                "serve",
                "--max-concurrency",
                "5",
                "--max-retries",
                "0",
                "--no-ai",
            ]);
            if let Commands::Serve(args) = cli.command {
                assert_eq!(args.max_concurrency, Some(5));
                assert_eq!(args.max_retries, Some(0));
                assert!(args.no_ai);
            } else {
                panic!("expected serve command");
            }
        }

        #[test]
        fn test_parse_compare_command() {
            let cli = Cli::parse_from(["mirador", "compare", "base.png", "new.png"]);
            if let Commands::Compare(args) = cli.command {
                assert_eq!(args.baseline, PathBuf::from("base.png"));
                assert_eq!(args.current, PathBuf::from("new.png"));
                assert!((args.threshold - 5.0).abs() < f64::EPSILON);
                assert!(args.masks.is_empty());
                assert!(!args.json);
            } else {
                panic!("expected compare command");
            }
        }

        #[test]
        fn test_parse_compare_with_masks() {
            let cli = Cli::parse_from([
                "mirador",
                "compare",
                "base.png",
                "new.png",
                "--mask",
                "0,0,100,40",
                "--mask",
                "10,200,64,64",
            ]);
            if let Commands::Compare(args) = cli.command {
                assert_eq!(args.masks.len(), 2);
                assert_eq!(args.masks[0], MaskRegion::new(0, 0, 100, 40));
                assert_eq!(args.masks[1], MaskRegion::new(10, 200, 64, 64));
            } else {
                panic!("expected compare command");
            }
        }

        #[test]
        fn test_parse_compare_with_threshold_and_output() {
            let cli = Cli::parse_from([
                "mirador",
                "compare",
                "base.png",
                "new.png",
                "--threshold",
                "0.5",
                "--diff-output",
                "diff.png",
                "--json",
            ]);
            if let Commands::Compare(args) = cli.command {
                assert!((args.threshold - 0.5).abs() < f64::EPSILON);
                assert_eq!(args.diff_output, Some(PathBuf::from("diff.png")));
                assert!(args.json);
            } else {
                panic!("expected compare command");
            }
        }

        #[test]
        fn test_parse_capture_command() {
            let cli = Cli::parse_from(["mirador", "capture", "https://example.com"]);
            if let Commands::Capture(args) = cli.command {
                assert_eq!(args.url, "https://example.com");
                assert_eq!(args.output, PathBuf::from("screenshot.png"));
                assert_eq!(args.viewport, Viewport::new(1280, 720));
                assert!(!args.viewport_only);
                assert_eq!(args.wait, 500);
            } else {
                panic!("expected capture command");
            }
        }

        #[test]
        fn test_parse_capture_with_viewport() {
            let cli = Cli::parse_from([
                "mirador",
                "capture",
                "https://example.com",
                "--viewport",
                "375x812",
                "--viewport-only",
            ]);
            if let Commands::Capture(args) = cli.command {
                assert_eq!(args.viewport, Viewport::new(375, 812));
                assert!(args.viewport_only);
            } else {
                panic!("expected capture command");
            }
        }

        #[test]
        fn test_parse_capture_with_mask_selectors() {
            let cli = Cli::parse_from([
                "mirador",
                "capture",
                "https://example.com",
                "--mask-selector",
                ".ad-banner",
                "--mask-selector",
                "#clock",
            ]);
            if let Commands::Capture(args) = cli.command {
                assert_eq!(args.mask_selectors, vec![".ad-banner", "#clock"]);
            } else {
                panic!("expected capture command");
            }
        }

        #[test]
        fn test_parse_config_command() {
            let cli = Cli::parse_from(["mirador", "config", "--json"]);
            if let Commands::Config(args) = cli.command {
                assert!(args.json);
            } else {
                panic!("expected config command");
            }
        }

        #[test]
        fn test_global_verbose_flag() {
            let cli = Cli::parse_from(["mirador", "-vv", "config"]);
            assert_eq!(cli.verbose, 2);
        }

        #[test]
        fn test_global_quiet_flag() {
            let cli = Cli::parse_from(["mirador", "--quiet", "config"]);
            assert!(cli.quiet);
        }

        #[test]
        fn test_global_color_flag() {
            let cli = Cli::parse_from(["mirador", "--color", "never", "config"]);
            assert!(matches!(cli.color, ColorArg::Never));
        }
    }

    mod parser_tests {
        use super::*;

        #[test]
        fn test_parse_mask_region_valid() {
            let mask = parse_mask_region("10,20,300,40").unwrap();
            assert_eq!(mask, MaskRegion::new(10, 20, 300, 40));
        }

        #[test]
        fn test_parse_mask_region_tolerates_spaces() {
            let mask = parse_mask_region("10, 20, 300, 40").unwrap();
            assert_eq!(mask, MaskRegion::new(10, 20, 300, 40));
        }

        #[test]
        fn test_parse_mask_region_wrong_arity() {
            assert!(parse_mask_region("10,20,300").is_err());
            assert!(parse_mask_region("10,20,300,40,50").is_err());
        }

        #[test]
        fn test_parse_mask_region_not_a_number() {
            let err = parse_mask_region("10,20,wide,40").unwrap_err();
            assert!(err.contains("wide"));
        }

        #[test]
        fn test_parse_viewport_valid() {
            assert_eq!(parse_viewport("1920x1080").unwrap(), Viewport::new(1920, 1080));
            assert_eq!(parse_viewport("375X812").unwrap(), Viewport::new(375, 812));
        }

        #[test]
        fn test_parse_viewport_missing_separator() {
            assert!(parse_viewport("1920").is_err());
        }

        #[test]
        fn test_parse_viewport_not_a_number() {
            let err = parse_viewport("widextall").unwrap_err();
            assert!(err.contains("wide"));
        }
    }

    mod color_tests {
        use super::*;

        #[test]
        fn test_color_arg_conversion() {
            use crate::config::ColorChoice;

            let auto: ColorChoice = ColorArg::Auto.into();
            assert!(matches!(auto, ColorChoice::Auto));

            let always: ColorChoice = ColorArg::Always.into();
            assert!(matches!(always, ColorChoice::Always));

            let never: ColorChoice = ColorArg::Never.into();
            assert!(matches!(never, ColorChoice::Never));
        }
    }
}
