mod config;

use clap::{CommandFactory, Parser};
use config::{config_path, get_default_config_toml, load_config, load_env_file, ProxySettings};
use futures::{stream, Stream};
use libsurvivor_storm::{Prober, ScanConfig, ScanStats, Scanner, DEFAULT_IP_ECHO_URL};
use std::{
    error::Error,
    io,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader, BufWriter},
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ds")]
#[command(about = "Domain Survivor - find which domains in a list are alive or match a status", long_about = None)]
struct Args {
    /// Input file containing a list of domains (stdin when omitted or "-")
    #[arg(short = 'l', long = "list")]
    input: Option<PathBuf>,

    /// Output file for domains matching criteria (stdout when omitted)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(short = 't', long = "threads", default_value_t = 100)]
    workers: usize,

    /// Timeout in seconds for each HTTP request
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// HTTP status code to match
    #[arg(long, default_value_t = 200)]
    status: u16,

    /// Match any domain that answers at all, whatever the status
    #[arg(long)]
    alive: bool,

    /// Compare matches against a random-path baseline to drop catch-all pages
    #[arg(long)]
    baseline: bool,

    /// Baseline similarity threshold; responses at least this similar are dropped
    #[arg(long, default_value_t = 0.9, value_parser = parse_threshold)]
    threshold: f64,

    /// Treat any 3xx answer as a non-match and stop probing that domain
    #[arg(long)]
    drop_redirects: bool,

    /// Open a new connection for every request so each one can leave through a different proxy
    #[arg(long, alias = "new_connection")]
    new_connection: bool,

    /// Log the egress IP after each fetch to verify proxy rotation
    #[arg(long, alias = "log_fetch_ip")]
    log_fetch_ip: bool,

    /// IP echo service queried by --log-fetch-ip
    #[arg(long, default_value = DEFAULT_IP_ECHO_URL)]
    ip_echo_url: String,

    /// Number of domains read ahead of the worker pool
    #[arg(long, default_value_t = 1000)]
    batch_size: usize,

    /// Write final scan statistics as JSON to this path
    #[arg(long)]
    stats_json: Option<PathBuf>,

    /// Config file (defaults to the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// .env file with PROXY_ADDRESSES / PROXY_USERNAME / PROXY_PASSWORD (defaults to ./.env)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the default config to stdout and exit
    #[arg(long)]
    print_default_config: bool,

    /// Write the default config to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

impl Args {
    fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            workers: self.workers.max(1),
            timeout: Duration::from_secs(self.timeout),
            target_status: self.status,
            check_alive: self.alive,
            use_baseline: self.baseline,
            baseline_threshold: self.threshold,
            drop_redirects: self.drop_redirects,
            new_connection: self.new_connection,
            log_fetch_ip: self.log_fetch_ip,
            ip_echo_url: self.ip_echo_url.clone(),
            batch_size: self.batch_size.max(1),
        }
    }
}

fn parse_threshold(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("threshold must be between 0 and 1, got {}", value))
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{default},hyper=info,reqwest=info,rustls=warn"))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<(), Box<dyn Error>> {
    if std::env::args_os().len() <= 1 {
        Args::command().print_help()?;
        return Ok(());
    }

    let args = Args::parse();

    if args.print_default_config {
        println!("{}", get_default_config_toml());
        return Ok(());
    }

    if args.write_default_config {
        if let Some(path) = config_path() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, get_default_config_toml())?;
            println!("Default config written to: {}", path.display());
        } else {
            eprintln!("Error: Could not determine config path");
            std::process::exit(1);
        }
        return Ok(());
    }

    init_tracing(args.verbose);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    load_env_file(args.env_file.as_deref())?;
    let config = load_config(args.config.as_deref())?;
    let rotator = ProxySettings::resolve(&config, |key| std::env::var(key).ok()).into_rotator()?;
    if !rotator.is_empty() {
        info!(proxies = rotator.len(), "rotating through configured proxies");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let prober = Prober::with_rotator(args.scan_config(), Arc::new(rotator))?;
        let scanner = Scanner::new(prober);

        let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
            Some(path) if path.as_os_str() != "-" => {
                let file = File::open(path)
                    .await
                    .map_err(|e| format!("Error opening input file {}: {}", path.display(), e))?;
                Box::new(BufReader::new(file))
            }
            _ => Box::new(BufReader::new(tokio::io::stdin())),
        };

        let writer: Box<dyn AsyncWrite + Unpin + Send> = match &args.output {
            Some(path) => {
                let file = File::create(path)
                    .await
                    .map_err(|e| format!("Error creating output file {}: {}", path.display(), e))?;
                Box::new(BufWriter::new(file))
            }
            None => Box::new(tokio::io::stdout()),
        };

        let input_error = Arc::new(OnceLock::new());
        let domains = domain_lines(reader, Arc::clone(&input_error));
        let outcome = scanner.run(domains, writer).await?;
        report(&outcome.stats, &args)?;

        if let Some(e) = input_error.get() {
            return Err(format!("Error reading input: {}", e).into());
        }
        Ok::<(), Box<dyn Error>>(())
    })
}

/// Non-blank, trimmed lines from `reader`. A read error ends the stream and
/// is left in `failed` so the caller can fail once the scan has drained.
fn domain_lines<R>(reader: R, failed: Arc<OnceLock<io::Error>>) -> impl Stream<Item = String>
where
    R: AsyncBufRead + Unpin,
{
    stream::unfold(reader.lines(), move |mut lines| {
        let failed = Arc::clone(&failed);
        async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            return Some((line.to_string(), lines));
                        }
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        tracing::error!(error = %e, "error reading input, stopping");
                        let _ = failed.set(e);
                        return None;
                    }
                }
            }
        }
    })
}

fn report(stats: &ScanStats, args: &Args) -> Result<(), Box<dyn Error>> {
    let destination = args
        .output
        .as_ref()
        .map_or_else(|| "stdout".to_string(), |p| p.display().to_string());
    info!(
        "Scanning completed in {:.1}s: {} processed, {} matched, {} redirects dropped, {} baseline failures, {} transport errors. Results saved to {}",
        stats.elapsed.as_secs_f64(),
        stats.processed,
        stats.matched,
        stats.redirects_dropped,
        stats.baseline_failures,
        stats.transport_errors,
        destination
    );
    if stats.write_errors > 0 {
        tracing::warn!(write_errors = stats.write_errors, "some results could not be written");
    }

    if let Some(path) = &args.stats_json {
        std::fs::write(path, serde_json::to_string_pretty(stats)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_documented_values() {
        let args = Args::parse_from(["ds", "-l", "domains.txt"]);
        let config = args.scan_config();
        assert_eq!(config.workers, 100);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.target_status, 200);
        assert_eq!(config.baseline_threshold, 0.9);
        assert_eq!(config.batch_size, 1000);
        assert!(!config.check_alive && !config.use_baseline && !config.drop_redirects);
    }

    #[test]
    fn underscore_aliases_are_accepted() {
        let args = Args::parse_from(["ds", "--new_connection", "--log_fetch_ip", "-t", "7"]);
        let config = args.scan_config();
        assert!(config.new_connection);
        assert!(config.log_fetch_ip);
        assert_eq!(config.workers, 7);
    }

    #[test]
    fn threshold_must_be_a_ratio() {
        assert!(Args::try_parse_from(["ds", "--threshold", "1.5"]).is_err());
        assert!(Args::try_parse_from(["ds", "--threshold", "abc"]).is_err());
        assert_eq!(parse_threshold("0.75"), Ok(0.75));
    }

    #[tokio::test]
    async fn input_lines_are_trimmed_and_blanks_dropped() {
        use futures::StreamExt;

        let input: &[u8] = b"  example.com \n\n\t\nexample.org\r\nlast.test";
        let failed = Arc::new(OnceLock::new());
        let domains: Vec<String> = domain_lines(input, Arc::clone(&failed)).collect().await;
        assert_eq!(domains, ["example.com", "example.org", "last.test"]);
        assert!(failed.get().is_none());
    }

    struct Broken;

    impl tokio::io::AsyncRead for Broken {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Err(io::Error::other("disk gone")))
        }
    }

    #[tokio::test]
    async fn input_read_error_is_kept_for_the_caller() {
        use futures::StreamExt;
        use tokio::io::AsyncReadExt;

        let input = BufReader::new(AsyncReadExt::chain(&b"first.test\n"[..], Broken));
        let failed = Arc::new(OnceLock::new());
        let domains: Vec<String> = domain_lines(input, Arc::clone(&failed)).collect().await;

        assert_eq!(domains, ["first.test"]);
        assert_eq!(failed.get().map(|e| e.to_string()).as_deref(), Some("disk gone"));
    }

    #[tokio::test]
    async fn scans_a_file_into_an_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("domains.txt");
        let output = dir.path().join("alive.txt");
        std::fs::write(&input, "127.0.0.1:1\n\n").unwrap();

        let args = Args::parse_from([
            "ds",
            "--alive",
            "--timeout",
            "1",
            "-l",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ]);
        let scanner = Scanner::new(Prober::new(args.scan_config()).unwrap());
        let reader = BufReader::new(File::open(&input).await.unwrap());
        let writer = BufWriter::new(File::create(&output).await.unwrap());

        let outcome = scanner
            .run(domain_lines(reader, Arc::new(OnceLock::new())), writer)
            .await
            .unwrap();

        assert_eq!(outcome.stats.processed, 1);
        assert_eq!(outcome.stats.matched, 0);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "");
    }
}
