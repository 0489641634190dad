use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uav_restore::JobStatus;

#[derive(Parser, Debug)]
#[command(
    name = "uav-restore",
    version,
    about = "Restore blurred UAV images and reconstruct terrain meshes from them"
)]
pub struct Args {
    /// Configuration file (JSON). Built-in defaults are used when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory from the config
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the number of worker threads
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload images and run them through the pipeline
    Process {
        /// Image files to restore
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Give up waiting after this many seconds per job
        #[arg(long)]
        timeout: Option<u64>,

        /// Only upload; print the job ids for a later `run`
        #[arg(long)]
        no_wait: bool,
    },

    /// Run already uploaded jobs and wait for them
    Run {
        #[arg(required = true)]
        job_ids: Vec<String>,

        /// Give up waiting after this many seconds per job
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show the full record of a job
    Status { job_id: String },

    /// Show the outputs of a completed job, or its progress
    Results { job_id: String },

    /// List known jobs
    List {
        /// Only jobs with this status
        #[arg(long, value_parser = parse_status)]
        status: Option<JobStatus>,
    },

    /// Remove a job
    Delete {
        job_id: String,

        /// Also delete the upload and every artifact
        #[arg(long)]
        purge: bool,
    },
}

fn parse_status(s: &str) -> Result<JobStatus, String> {
    JobStatus::parse(&s.to_ascii_lowercase()).ok_or_else(|| {
        format!(
            "unknown status '{}' (expected uploaded, processing, completed or failed)",
            s
        )
    })
}
