mod cli;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use uav_restore::{
    load_config, JobStatus, RestorationService, RestoreConfig, Result, StorageError, StoreError,
};

use crate::cli::{Args, Commands};

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose, args.json_logs) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("Application error: {}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns `false` when the command ran but a job did not succeed.
fn run(args: Args) -> Result<bool> {
    let mut config = match args.config {
        Some(ref path) => load_config(path)?,
        None => RestoreConfig::default(),
    };
    if let Some(dir) = args.data_dir {
        config.data_directory = dir.to_string_lossy().to_string();
    }
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }

    let service = Arc::new(RestorationService::with_default_stages(&config)?);
    let result = execute(&service, args.command);
    service.shutdown();
    result
}

fn execute(service: &Arc<RestorationService>, command: Commands) -> Result<bool> {
    match command {
        Commands::Process {
            images,
            timeout,
            no_wait,
        } => process(service, &images, timeout.map(Duration::from_secs), no_wait),

        Commands::Run { job_ids, timeout } => {
            prepare_run(service);
            for job_id in &job_ids {
                service.process(job_id)?;
            }
            wait_all(service, &job_ids, timeout.map(Duration::from_secs))
        }

        Commands::Status { job_id } => {
            let job = service.status(&job_id)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(true)
        }

        Commands::Results { job_id } => {
            let view = service.results(&job_id)?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(view.is_ready())
        }

        Commands::List { status } => {
            let jobs = service.list(status);
            for job in &jobs {
                println!(
                    "{}  {:<10} {:>3}%  {}",
                    job.id,
                    job.status.as_str(),
                    job.progress,
                    job.original_filename
                );
            }
            let counts = service.counts();
            println!(
                "{} jobs ({} uploaded, {} processing, {} completed, {} failed)",
                counts.total(),
                counts.uploaded,
                counts.processing,
                counts.completed,
                counts.failed
            );
            Ok(true)
        }

        Commands::Delete { job_id, purge } => match service.delete(&job_id, purge)? {
            Some(job) => {
                println!("Deleted job {} ({})", job.id, job.original_filename);
                Ok(true)
            }
            None => Err(StoreError::NotFound(job_id).into()),
        },
    }
}

fn process(
    service: &Arc<RestorationService>,
    images: &[std::path::PathBuf],
    timeout: Option<Duration>,
    no_wait: bool,
) -> Result<bool> {
    if !no_wait {
        prepare_run(service);
    }

    let mut job_ids = Vec::with_capacity(images.len());
    for path in images {
        let content = std::fs::read(path).map_err(|e| StorageError::ReadFile {
            path: path.clone(),
            source: e,
        })?;
        let job = service.upload(&display_name(path), &content)?;
        if !no_wait {
            service.process(&job.id)?;
        }
        info!("Submitted {} as job {}", path.display(), job.id);
        job_ids.push(job.id);
    }

    if no_wait {
        println!("{}", serde_json::to_string_pretty(&job_ids)?);
        return Ok(true);
    }
    wait_all(service, &job_ids, timeout)
}

/// Recovers jobs a crashed run left behind and routes Ctrl-C to
/// cancellation. Runs before anything is dispatched.
fn prepare_run(service: &Arc<RestorationService>) {
    let recovered = service.recover_interrupted();
    if recovered > 0 {
        warn!("{} jobs from an earlier run were marked failed", recovered);
    }

    let handler_service = Arc::clone(service);
    if let Err(e) = ctrlc::set_handler(move || {
        let cancelled = handler_service.cancel_all();
        warn!("Interrupted, cancelling {} jobs", cancelled);
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }
}

fn wait_all(
    service: &RestorationService,
    job_ids: &[String],
    timeout: Option<Duration>,
) -> Result<bool> {
    let mut all_completed = true;
    for job_id in job_ids {
        let job = service.wait_for(job_id, timeout)?;
        if job.status != JobStatus::Completed {
            all_completed = false;
        }
        println!("{}", serde_json::to_string_pretty(&service.results(job_id)?)?);
    }
    Ok(all_completed)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string())
}

fn init_logging(verbose: bool, json: bool) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // Logs go to stderr; stdout carries command output.
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer);

    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}
