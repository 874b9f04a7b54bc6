use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediaflow")]
#[command(author, version, about = "Distributed media conversion workers and job dispatch")]
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
    /// Run a conversion worker until interrupted
    Worker {
        /// Worker id (defaults to the configured id, then the hostname)
        #[arg(long)]
        worker_id: Option<String>,
    },

    /// Submit a conversion job
    Submit {
        /// Owner namespace of the input
        #[arg(long)]
        owner: String,

        /// Input path inside the owner namespace
        #[arg(long)]
        input: String,

        /// Target format (mp3, flac, wav, aac, ogg, m4a, mp4, avi, mkv, webm, mov, flv)
        #[arg(short, long)]
        format: String,

        /// Conversion option as key=value (repeatable); JSON values are parsed
        #[arg(short, long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
    },

    /// Show one job
    Status {
        /// Job id
        job_id: String,
    },

    /// List jobs, newest first
    List {
        /// Only jobs in this status (pending, processing, completed, failed)
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of jobs to show
        #[arg(long)]
        limit: Option<i64>,

        /// Number of jobs to skip
        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// Show queue lengths and job counts by status
    QueueStats,

    /// Show the load of every worker that has published telemetry
    Workers,

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
