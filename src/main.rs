//! Media Uploader CLI
//!
//! Uploads a directory of media files to a remote media-library service,
//! skipping content the service already holds.

use clap::Parser;
use env_logger::Env;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use media_uploader::remote::{DEFAULT_API_URL, DEFAULT_UPLOAD_URL};
use media_uploader::runner::RunPlan;
use media_uploader::{
    HttpRemote, LogObserver, NullObserver, ProgressObserver, RunSummary, UploadConfig, UploadError,
    Uploader,
};

const ABOUT: &str = "\
Run this tool against the parent directory of your media files. To acquire
a login token, enable simple uploaders in your account settings on the
service's web interface.";

/// Content-addressed media library uploader
#[derive(Parser)]
#[command(name = "media-uploader")]
#[command(author, version, about = ABOUT, long_about = None)]
struct Cli {
    /// Login token for the media-library service
    login_token: String,

    /// Directory to upload (defaults to the current directory)
    directory: Option<PathBuf>,

    /// Do not consult the local fingerprint cache
    #[arg(short = 'n', long)]
    no_cache: bool,

    /// Be verbose (includes retry attempts)
    #[arg(short, long, conflicts_with = "silent")]
    verbose: bool,

    /// Be silent
    #[arg(short, long)]
    silent: bool,

    /// Skip the confirmation dialogue
    #[arg(short = 'y', long)]
    skip_confirmation: bool,

    /// Number of parallel uploads
    #[arg(short = 'p', long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=6))]
    parallel_uploads: u8,

    /// Apply this tag to uploaded and matched files (repeatable)
    #[arg(short = 't', long = "tag")]
    tags: Vec<String>,

    /// Add uploaded and matched files to this playlist
    #[arg(short = 'l', long)]
    playlist: Option<String>,

    /// Force re-uploading files already present remotely
    #[arg(short = 'r', long)]
    reupload: bool,

    /// Fingerprint cache file (defaults to the home directory)
    #[arg(long)]
    cache_file: Option<PathBuf>,

    /// JSON API endpoint of the service
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Upload endpoint of the service
    #[arg(long, default_value = DEFAULT_UPLOAD_URL)]
    upload_url: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.silent {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    match run(cli) {
        Ok(summary) => {
            println!(
                "Uploaded/Skipped/Failed/Total: {}/{}/{}/{}.",
                summary.uploaded, summary.skipped, summary.failed, summary.total
            );
            for failure in &summary.failures {
                eprintln!(" - {} [{}]: {}", failure.path, failure.kind.as_str(), failure.message);
            }
            for failure in &summary.post_process_failures {
                eprintln!(" - post-processing: {}", failure);
            }
            // Per-file failures still count as a completed run
            ExitCode::SUCCESS
        }
        Err(RunAbort::Cancelled) => {
            println!("Aborted.");
            ExitCode::SUCCESS
        }
        Err(RunAbort::Fatal(err)) => {
            log::error!("{}", err);
            ExitCode::from(2)
        }
    }
}

enum RunAbort {
    Cancelled,
    Fatal(UploadError),
}

impl From<UploadError> for RunAbort {
    fn from(err: UploadError) -> Self {
        RunAbort::Fatal(err)
    }
}

fn run(cli: Cli) -> Result<RunSummary, RunAbort> {
    let mut builder = UploadConfig::builder()
        .root(cli.directory.unwrap_or_else(|| PathBuf::from(".")))
        .parallel_uploads(cli.parallel_uploads as usize)
        .tags(cli.tags)
        .playlist(cli.playlist)
        .reupload(cli.reupload)
        .use_cache(!cli.no_cache)
        .skip_confirmation(cli.skip_confirmation)
        .verbose(cli.verbose)
        .silent(cli.silent);
    if let Some(cache_file) = cli.cache_file {
        builder = builder.cache_path(cache_file);
    }
    let config = builder.build();

    let remote = HttpRemote::new(cli.api_url, cli.upload_url, cli.login_token)?;
    let mut uploader = Uploader::new(config, Arc::new(remote))?;

    let plan = uploader.prepare()?;
    if !uploader.config().silent {
        println!(
            "Found {} files ({} to upload, {} already present).",
            plan.tasks.len(),
            plan.upload_count(),
            plan.tasks.len() - plan.upload_count()
        );
    }

    if !uploader.config().skip_confirmation && !confirm(&plan) {
        return Err(RunAbort::Cancelled);
    }

    let observer: Box<dyn ProgressObserver> = if uploader.config().silent {
        Box::new(NullObserver)
    } else {
        Box::new(LogObserver::new(uploader.config().verbose))
    };
    let summary = uploader.execute(plan, vec![observer])?;
    Ok(summary)
}

/// Interactive dialog: list the files, start the upload, or abort
fn confirm(plan: &RunPlan) -> bool {
    println!("Press 'L' to list, or 'U' to start the upload.");
    let mut response = prompt();
    if response.eq_ignore_ascii_case("l") {
        for task in &plan.tasks {
            println!(" - {}", task.file.path.display());
        }
        println!("Press 'U' to start the upload if this looks reasonable.");
        response = prompt();
    }
    response.eq_ignore_ascii_case("u")
}

fn prompt() -> String {
    print!("--> ");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).ok();
    line.trim().to_string()
}
