mod cli;

use vidconvert::{
    codec::{CodecBackend, LoopbackBackend},
    config,
    conversion::{ConversionExecutor, ConversionQueue, ConversionRequest},
    pipeline::{ConversionError, PipelineOptions, TranscodePipeline, VideoMode},
    planner::TrimPlanner,
    probe,
    quirks::DeviceQuirkResolver,
    state::ConversionListener,
};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use vidconvert_common::paths::{default_output_path, is_mp4_file};

/// Longest the CLI waits for a queued conversion.
const CONVERT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vidconvert=trace,vidconvert_media=debug,vidconvert_common=debug".to_string()
        } else {
            "vidconvert=info,vidconvert_media=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Probe { file, json } => probe_file(&file, json),
        Commands::Plan {
            file,
            width,
            height,
        } => plan_file(&file, width, height, cli.config.as_deref()),
        Commands::Codecs => show_codecs(cli.config.as_deref()),
        Commands::Convert {
            input,
            output,
            start_ms,
            end_ms,
            width,
            height,
            bitrate,
            copy_video,
        } => {
            let output = output.unwrap_or_else(|| default_output_path(&input));
            let overrides = ConvertOverrides {
                start_ms,
                end_ms,
                width,
                height,
                bitrate,
                copy_video,
            };
            convert_file(&input, &output, overrides, cli.config.as_deref())
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("vidconvert {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn probe_file(file: &Path, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let info = probe::probe_file(file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File: {}", info.path.display());
    println!("Size: {} bytes", info.size_bytes);
    let secs = info.duration_ms() / 1000;
    println!("Duration: {:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60);
    println!(
        "Video: {}x{} rotated {} ({})",
        info.original_width,
        info.original_height,
        info.rotation,
        if info.is_avc { "avc" } else { "other" }
    );
    println!("Audio: {}", if info.has_audio { "aac" } else { "none" });
    if info.is_convertible() {
        println!("\nOutput: {}x{} @ {} bps", info.result_width, info.result_height, info.bitrate);
        println!("Estimated size: {} bytes", info.estimated_size());
    } else {
        println!("\nNot convertible: an AAC audio track and a sized video track are required");
    }
    Ok(())
}

fn plan_file(file: &Path, width: Option<u32>, height: Option<u32>, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let info = probe::probe_file(file)?;
    let mut request = ConversionRequest::from_probe(&info, default_output_path(file));
    if let (Some(w), Some(h)) = (width, height) {
        request = request.with_output_size(w, h);
    }

    let plan = TrimPlanner::new(config.platform.api_level).plan(&request)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn show_codecs(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let platform = config.platform.to_platform();
    let backend = LoopbackBackend::new();
    let codecs = backend.codec_infos();

    println!("Platform: api {} ({})", platform.api_level, platform.manufacturer);
    println!("\nCodecs: {}", codecs.len());
    for codec in &codecs {
        let role = if codec.is_encoder { "encoder" } else { "decoder" };
        println!("  {} [{}] {}", codec.name, role, codec.mime_types.join(", "));
    }

    let profile = DeviceQuirkResolver::new(&platform).resolve(&codecs, &config.encoder.mime)?;
    println!("\nResolved profile:");
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

struct ConvertOverrides {
    start_ms: Option<i64>,
    end_ms: Option<i64>,
    width: Option<u32>,
    height: Option<u32>,
    bitrate: Option<u32>,
    copy_video: bool,
}

/// Collects the terminal callback for the CLI.
#[derive(Default)]
struct CliListener {
    outcome: Mutex<Option<std::result::Result<u64, String>>>,
}

impl ConversionListener for CliListener {
    fn on_started(&self, request: &ConversionRequest, output: &Path) {
        tracing::info!("Converting {:?} -> {:?}", request.source, output);
    }

    fn on_completed(&self, _request: &ConversionRequest, _output: &Path, output_len: u64) {
        *self.outcome.lock() = Some(Ok(output_len));
    }

    fn on_failed(&self, _request: &ConversionRequest, _output: &Path, error: &ConversionError) {
        *self.outcome.lock() = Some(Err(error.to_string()));
    }
}

fn convert_file(input: &Path, output: &Path, overrides: ConvertOverrides, config_path: Option<&Path>) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    if overrides.copy_video {
        config.pipeline.video_mode = VideoMode::Copy;
    }

    if !input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", input);
    }
    if !is_mp4_file(input) {
        tracing::warn!("Input {:?} does not have an MP4-family extension", input);
    }

    let info = probe::probe_file(input)?;
    let mut request = ConversionRequest::from_probe(&info, output);
    if let (Some(w), Some(h)) = (overrides.width, overrides.height) {
        request = request.with_output_size(w, h);
    } else if !info.is_convertible() {
        anyhow::bail!(
            "Source cannot be converted: {:?} needs an AAC audio track and a sized video track",
            input
        );
    }
    let start_us = overrides.start_ms.map_or(-1, |ms| ms * 1000);
    let end_us = overrides.end_ms.map_or(-1, |ms| ms * 1000);
    request = request.with_trim_us(start_us, end_us);
    if let Some(bitrate) = overrides.bitrate {
        request = request.with_bitrate(bitrate);
    }

    let pipeline = TranscodePipeline::new(
        Arc::new(LoopbackBackend::new()),
        config.platform.to_platform(),
        PipelineOptions::from_config(&config),
    );
    let executor = ConversionExecutor::new(pipeline, config::crash_guard_store(&config.state));
    let queue = ConversionQueue::new(executor);

    let listener = Arc::new(CliListener::default());
    queue.enqueue(request, listener.clone())?;
    if !queue.wait_until_idle(CONVERT_TIMEOUT) {
        anyhow::bail!("Conversion did not finish within {:?}", CONVERT_TIMEOUT);
    }

    let outcome = listener.outcome.lock().take();
    match outcome {
        Some(Ok(len)) => {
            println!("✓ Converted {} ({} bytes)", output.display(), len);
            Ok(())
        }
        Some(Err(e)) => anyhow::bail!("Conversion failed: {}", e),
        None => anyhow::bail!("Conversion ended without a result"),
    }
}

fn validate_config(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    config::validate_config(&config)?;

    println!("✓ Configuration is valid");
    println!("  Platform: api {} ({})", config.platform.api_level, config.platform.manufacturer);
    println!("  Encoder: {} @ {} bps", config.encoder.mime, config.encoder.default_bitrate);
    println!("  Video mode: {:?}", config.pipeline.video_mode);
    println!(
        "  Crash guard: {}",
        if config.state.persist {
            config.state.resolved_crash_guard_path().display().to_string()
        } else {
            "in memory".to_string()
        }
    );

    Ok(())
}
