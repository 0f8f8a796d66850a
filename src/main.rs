use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process;
use tracing::info;

mod analyzer;
mod cache;
mod config;
mod message;

use analyzer::RecordInfo;
use cache::{Cache, CacheError};

const EXIT_RUN_ERROR: i32 = 1;
const EXIT_FAIL_REDIS: i32 = 12;
const EXIT_FAIL_CONFIG: i32 = 13;

#[derive(Parser, Debug)]
#[command(author, version, about = "Collects bounce messages and caches failing recipients", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = "/etc/bouncer.conf")]
    config: PathBuf,

    /// Email address to check for an existing suppression record
    #[arg(short = 'r', long = "rcpt")]
    rcpt: Option<String>,

    /// Bounce message file; reads stdin when omitted
    file: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    setup_logging(&args.log_level);

    let conf = match config::load_config(&args.config) {
        Ok(conf) => conf,
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(EXIT_FAIL_CONFIG);
        }
    };

    let cache = match Cache::connect(&conf.redis).await {
        Ok(cache) => cache,
        Err(err) => {
            eprintln!("{err}");
            process::exit(EXIT_FAIL_REDIS);
        }
    };

    // Check mode: only an existence lookup, answered in the wording the
    // mail router expects.
    if let Some(addr) = args.rcpt.as_deref() {
        match cache.find(&addr.to_lowercase()).await {
            Ok(true) => println!("Pass"),
            Ok(false) => println!("Decline"),
            Err(err) => {
                eprintln!("{err}");
                process::exit(EXIT_FAIL_REDIS);
            }
        }
        return;
    }

    let raw = match message::read_input(args.file.as_deref()) {
        Ok(raw) => raw,
        Err(err) => {
            eprintln!("{err:#}");
            print_usage();
            process::exit(EXIT_RUN_ERROR);
        }
    };

    if let Err(err) = process_mail(&raw, &cache).await {
        if err.downcast_ref::<CacheError>().is_some() {
            eprintln!("collector error: {err:#}");
            process::exit(EXIT_FAIL_REDIS);
        }
        eprintln!("{err:#}");
        process::exit(EXIT_RUN_ERROR);
    }
}

async fn process_mail(raw: &[u8], cache: &Cache) -> Result<()> {
    let bounce = message::parse_bounce(raw)?;
    let signal = analyzer::analyze(&bounce.body);

    let info = RecordInfo {
        domain: message::domain_from_address(&bounce.rcpt),
        reason: signal.reason,
        reporter: bounce.reporter,
        smtp_code: signal.smtp_code,
        smtp_status: signal.smtp_status,
        date: bounce.date,
    };

    let ttl = analyzer::determine_ttl(&info);
    info!(
        rcpt = %bounce.rcpt,
        code = info.smtp_code,
        status = %info.smtp_status,
        reason = %info.reason,
        ttl_secs = ttl.as_secs(),
        "bounce classified"
    );

    let payload = serde_json::to_string(&info).context("unable to serialize record")?;
    cache.insert(&bounce.rcpt, &payload, ttl).await?;

    Ok(())
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  bouncer -c config.yaml file.eml");
    eprintln!("or");
    eprintln!("  cat file.eml | bouncer -c config.yaml");
}

fn setup_logging(level: &str) {
    let filter = match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "warn",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
