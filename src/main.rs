//! `mp3-dl` command line interface

use clap::Parser;
use mp3_dl::progress::status_line;
use mp3_dl::{
    BatchController, BatchError, BatchReport, Browser, Config, CredentialSource, Error,
    FetchWorker, JobQueue, JobStatus, OutputFormat, PacingConfig, Phase, run_with_shutdown,
};
use mp3_dl::{Event, Result};
use std::io::{IsTerminal, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

/// Download audio from a list of URLs and convert it to MP3 (or another audio format)
#[derive(Parser, Debug)]
#[command(name = "mp3-dl", version, about)]
struct Cli {
    /// URLs to download, one job per URL
    urls: Vec<String>,

    /// Read URLs from a file, one per line (`-` for stdin)
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Destination directory for audio files
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Output format (mp3, m4a, opus, flac, wav)
    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// Audio bitrate in kbps for lossy formats
    #[arg(long, value_name = "KBPS")]
    bitrate: Option<u32>,

    /// Read cookies from this browser (firefox, chrome, edge, brave, opera, safari)
    #[arg(short, long)]
    browser: Option<Browser>,

    /// Directory of Netscape cookie files; one is picked at random per job
    #[arg(long, value_name = "DIR")]
    cookies_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Skip the pause between jobs
    #[arg(long)]
    no_sleep: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(report) if report.outcome.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(Error::Batch(BatchError::Interrupted)) => {
            eprintln!("Interrupted");
            ExitCode::from(130)
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "mp3_dl=warn",
        1 => "mp3_dl=info",
        2 => "mp3_dl=debug",
        _ => "mp3_dl=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<BatchReport> {
    let config = build_config(&cli)?;
    let input = read_urls(&cli)?;
    let queue = JobQueue::from_lines(&input, &config.download.output_dir, config.download.format)?;
    if queue.is_empty() {
        return Err(Error::InvalidInput(
            "no URLs given (pass them as arguments, with --input, or on stdin)".to_string(),
        ));
    }

    let controller = BatchController::new(FetchWorker::from_config(config)?);
    let printer = tokio::spawn(print_events(controller.subscribe()));

    let report = run_with_shutdown(&controller, queue).await?;
    printer.await.ok();
    print_summary(&report);
    Ok(report)
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_toml_file(path)?,
        None => Config::default(),
    };

    if let Some(dir) = &cli.output_dir {
        config.download.output_dir = dir.clone();
    }
    if let Some(format) = cli.format {
        config.download.format = format;
    }
    if let Some(bitrate) = cli.bitrate {
        config.download.bitrate_kbps = bitrate;
    }
    if cli.no_sleep {
        config.pacing = PacingConfig::disabled();
    }
    config.credentials = match (cli.browser, &cli.cookies_dir) {
        (Some(browser), Some(dir)) => CredentialSource::BrowserWithFallback {
            browser,
            dir: dir.clone(),
        },
        (Some(browser), None) => CredentialSource::Browser { browser },
        (None, Some(dir)) => CredentialSource::CookieFiles { dir: dir.clone() },
        (None, None) => config.credentials,
    };

    config.validate()?;
    Ok(config)
}

fn read_urls(cli: &Cli) -> Result<String> {
    let mut input = cli.urls.join("\n");
    let from_stdin = match &cli.input {
        Some(path) if path.as_os_str() == "-" => true,
        Some(path) => {
            input.push('\n');
            input.push_str(&std::fs::read_to_string(path)?);
            false
        }
        None => cli.urls.is_empty() && !std::io::stdin().is_terminal(),
    };
    if from_stdin {
        input.push('\n');
        std::io::stdin().read_to_string(&mut input)?;
    }
    Ok(input)
}

async fn print_events(mut rx: broadcast::Receiver<Event>) {
    let mut stdout = std::io::stdout();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event printer lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if let Some(line) = status_line(&event) {
            let transient = matches!(
                &event,
                Event::Progress(p) if p.phase == Phase::Downloading && p.bytes_done > 0
            );
            // Byte progress overwrites itself; everything else gets its own line
            if transient {
                print!("\r\x1b[2K{}", line);
                stdout.flush().ok();
            } else {
                println!("\r\x1b[2K{}", line);
            }
        }

        if matches!(event, Event::BatchFinished { .. }) {
            break;
        }
    }
}

fn print_summary(report: &BatchReport) {
    let count = |status| report.jobs_with_status(status).count();
    println!();
    println!(
        "Summary: {} succeeded, {} failed, {} cancelled ({:.1}s)",
        count(JobStatus::Succeeded),
        count(JobStatus::Failed),
        count(JobStatus::Cancelled),
        (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
    );
    for job in report.jobs_with_status(JobStatus::Failed) {
        println!(
            "  failed: {} ({})",
            job.url,
            job.error.as_deref().unwrap_or("unknown error")
        );
    }
}
