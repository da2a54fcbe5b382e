use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vidconvert")]
#[command(author, version, about = "Hardware-codec style MP4 video converter")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect a source file and show the derived conversion parameters
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the output geometry a conversion would use on the configured platform
    Plan {
        /// Source file
        #[arg(required = true)]
        file: PathBuf,

        /// Override the output width
        #[arg(long)]
        width: Option<u32>,

        /// Override the output height
        #[arg(long)]
        height: Option<u32>,
    },

    /// Show the codecs on offer and the encoder quirks resolved for the platform
    Codecs,

    /// Convert a file
    Convert {
        /// Source MP4
        #[arg(required = true)]
        input: PathBuf,

        /// Output path (defaults to <input>_converted.mp4)
        output: Option<PathBuf>,

        /// Trim start in milliseconds
        #[arg(long)]
        start_ms: Option<i64>,

        /// Trim end in milliseconds
        #[arg(long)]
        end_ms: Option<i64>,

        /// Override the output width
        #[arg(long)]
        width: Option<u32>,

        /// Override the output height
        #[arg(long)]
        height: Option<u32>,

        /// Target bitrate in bits per second
        #[arg(long)]
        bitrate: Option<u32>,

        /// Copy the video track instead of transcoding it
        #[arg(long)]
        copy_video: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
