//! Mirador: visual regression testing from the command line
//!
//! ## Usage
//!
//! ```bash
//! mirador serve --port 3000            # Run the HTTP testing service
//! mirador compare base.png new.png     # Gate a deploy on a pixel diff
//! mirador capture https://example.com  # One-shot page screenshot
//! mirador config                       # Show the effective configuration
//! ```

use clap::Parser;
use mirador::{
    ApiServer, Cli, CliConfig, CliError, CliResult, ColorChoice, Commands, OutputFormat,
    ProgressReporter, Verbosity,
};
use mirar::{EngineConfig, PixelCompareOptions, PixelDiffEngine};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();

    // Build configuration from CLI args
    let config = build_config(&cli);

    match cli.command {
        Commands::Serve(args) => run_serve(&config, &args),
        Commands::Compare(args) => run_compare(&config, &args),
        #[cfg(feature = "browser")]
        Commands::Capture(args) => run_capture(&config, &args),
        #[cfg(not(feature = "browser"))]
        Commands::Capture(_) => Err(CliError::invalid_argument(
            "Browser capture not enabled. Rebuild with --features browser",
        )),
        Commands::Config(args) => run_config(&config, &args),
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else {
        match cli.verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Debug,
        }
    };

    let color: ColorChoice = cli.color.clone().into();

    CliConfig::new().with_verbosity(verbosity).with_color(color)
}

fn init_tracing(verbosity: Verbosity) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(verbosity.log_directives())),
        )
        .with_writer(std::io::stderr)
        .init();
}

const fn output_format(json: bool) -> OutputFormat {
    if json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    }
}

fn run_serve(config: &CliConfig, args: &mirador::ServeArgs) -> CliResult<()> {
    init_tracing(config.verbosity);

    let mut engine_config = EngineConfig::from_env();
    if let Some(max_concurrency) = args.max_concurrency {
        engine_config.max_concurrency = max_concurrency;
    }
    if let Some(max_retries) = args.max_retries {
        engine_config.max_retries = max_retries;
    }
    if let Some(dir) = &args.screenshot_dir {
        engine_config.screenshot_dir = Some(dir.clone());
    }

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::server(format!("Failed to create runtime: {e}")))?;
    rt.block_on(async {
        let server = ApiServer::new(engine_config, args.port);
        let project = server
            .bootstrap_project(&args.project_name, &args.project_url, !args.no_ai)
            .await?;
        tracing::info!(project_id = %project.id, name = %project.name, "Project ready");

        server
            .run()
            .await
            .map_err(|e| CliError::server(format!("Server error: {e}")))
    })
}

fn run_compare(config: &CliConfig, args: &mirador::CompareArgs) -> CliResult<()> {
    let reporter = ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());

    let baseline = std::fs::read(&args.baseline)?;
    let current = std::fs::read(&args.current)?;

    let mut options = PixelCompareOptions::new().with_threshold(args.threshold);
    for mask in &args.masks {
        options = options.with_mask(*mask);
    }

    let result = PixelDiffEngine::new().compare(&baseline, &current, &options)?;

    if result.dimensions_resized {
        reporter.warning("Input dimensions differ; images were resized to a common size");
    }
    if let (Some(path), Some(png)) = (&args.diff_output, &result.diff_image) {
        std::fs::write(path, png)?;
        reporter.info(&format!("Diff image written to {}", path.display()));
    }

    let summary = format!(
        "{:.3}% of pixels differ ({} of {}), threshold {:.1}%",
        result.mismatch_percentage, result.diff_pixels, result.total_pixels, args.threshold
    );
    match output_format(args.json) {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text if result.is_different => reporter.failure(&summary),
        OutputFormat::Text => reporter.success(&summary),
    }

    if result.is_different {
        return Err(CliError::Regression {
            mismatch: result.mismatch_percentage,
        });
    }
    Ok(())
}

#[cfg(feature = "browser")]
fn run_capture(config: &CliConfig, args: &mirador::CaptureArgs) -> CliResult<()> {
    use mirar::{CaptureOptions, MirarError, PageCapturer};

    init_tracing(config.verbosity);
    let mut reporter =
        ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());

    let mut options = CaptureOptions::new()
        .with_viewport(args.viewport)
        .with_full_page(!args.viewport_only)
        .with_wait_time_ms(args.wait);
    if !args.mask_selectors.is_empty() {
        options = options.with_mask_selectors(args.mask_selectors.clone());
    }

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::server(format!("Failed to create runtime: {e}")))?;

    reporter.start_spinner(&format!("Capturing {}", args.url));
    let captured = rt.block_on(async {
        let capturer = PageCapturer::new();
        let page = capturer.capture(&args.url, &options).await?;
        capturer.close().await?;
        Ok::<_, MirarError>(page)
    });
    reporter.finish_and_clear();
    let page = captured?;

    std::fs::write(&args.output, &page.screenshot)?;
    reporter.success(&format!(
        "Captured {} ({} bytes) to {}",
        args.url,
        page.screenshot.len(),
        args.output.display()
    ));
    Ok(())
}

fn run_config(config: &CliConfig, args: &mirador::ConfigArgs) -> CliResult<()> {
    let engine = EngineConfig::from_env();

    match output_format(args.json) {
        OutputFormat::Json => {
            // API keys are reported as present or absent, never echoed
            let value = serde_json::json!({
                "provider": engine.provider.name(),
                "pixelThreshold": engine.pixel_threshold,
                "aiThreshold": engine.ai_threshold,
                "forceAi": engine.force_ai,
                "maxConcurrency": engine.max_concurrency,
                "maxRetries": engine.max_retries,
                "diffThreshold": engine.diff_threshold,
                "screenshotDir": engine.screenshot_dir,
                "networkIdleTimeoutMs": engine.network_idle_timeout_ms,
                "openaiConfigured": engine.openai_api_key.is_some(),
                "groqConfigured": engine.groq_api_key.is_some(),
                "openrouterConfigured": engine.openrouter_api_key.is_some(),
                "disableAnimations": engine.dynamic.disable_animations,
                "blockAds": engine.dynamic.block_ads,
                "scrollToTriggerLazyLoad": engine.dynamic.scroll_to_trigger_lazy_load,
                "multipleScreenshots": engine.dynamic.multiple_screenshots,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            let reporter =
                ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());
            reporter.header("Engine configuration");
            println!("  provider:             {}", engine.provider.name());
            println!("  pixel threshold:      {:.1}%", engine.pixel_threshold);
            println!("  ai threshold:         {:.2}", engine.ai_threshold);
            println!("  force ai:             {}", engine.force_ai);
            println!("  max concurrency:      {}", engine.max_concurrency);
            println!("  max retries:          {}", engine.max_retries);
            println!("  diff threshold:       {:.1}%", engine.diff_threshold);
            match &engine.screenshot_dir {
                Some(dir) => println!("  screenshot dir:       {}", dir.display()),
                None => println!("  screenshot dir:       (persistence disabled)"),
            }
            println!(
                "  network idle timeout: {}ms",
                engine.network_idle_timeout_ms
            );
            println!(
                "  api keys:             openai={} groq={} openrouter={}",
                key_status(engine.openai_api_key.as_deref()),
                key_status(engine.groq_api_key.as_deref()),
                key_status(engine.openrouter_api_key.as_deref()),
            );
        }
    }
    Ok(())
}

const fn key_status(key: Option<&str>) -> &'static str {
    if key.is_some() {
        "set"
    } else {
        "unset"
    }
}
