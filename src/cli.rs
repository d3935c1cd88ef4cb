//! Command surface of the `unibench` binary.
use std::{
    io::Write,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use unibench::{
    AppConfig, BackendAdapter, BackendConfig, ConsoleReporter, JsonFileReporter, LoadTestConfig, LoadTester,
    MetricsCollector, QueryPattern, QueryRequest, Reporter,
    adapter::OutputSink,
    config::DEFAULT_CONFIG_FILE,
    telemetry,
};

#[derive(Parser, Debug)]
#[command(name = "unibench", version)]
#[command(about = "Benchmark heterogeneous data backends through one query contract")]
pub struct Cli {
    /// Backend to test, as named in the config file
    #[arg(long, short = 'b')]
    pub backend: String,

    /// Path to the YAML config file
    #[arg(long, short = 'c', default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check backend health
    Health,

    /// List available connectors
    List,

    /// Execute a single query
    Query {
        /// Connector/tenant id
        connector: String,

        /// Dataset name
        dataset: String,

        #[arg(long, short = 'p', value_enum, default_value_t = QueryPattern::Sync)]
        pattern: QueryPattern,

        /// Timeout in seconds (default: the backend's configured timeout)
        #[arg(long, short = 't')]
        timeout: Option<u64>,

        /// Number of rows to request
        #[arg(long, short = 'r')]
        rows: Option<u64>,

        /// Where streamed or offloaded data is written
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Run a load test
    LoadTest {
        /// Total requests
        #[arg(long, short = 'n', default_value_t = 100)]
        requests: usize,

        /// Concurrent workers
        #[arg(long, short = 'c', default_value_t = 10)]
        concurrency: usize,

        /// Dataset name
        #[arg(long, short = 'd', default_value = "default")]
        dataset: String,

        /// Comma-separated connector ids (default: every listed connector)
        #[arg(long, value_delimiter = ',')]
        connectors: Vec<String>,

        #[arg(long, short = 'p', value_enum, default_value_t = QueryPattern::Sync)]
        pattern: QueryPattern,

        /// Rows per request
        #[arg(long, short = 'r')]
        rows: Option<u64>,

        /// Per-request timeout in seconds (default: the backend's configured timeout)
        #[arg(long, short = 't')]
        timeout: Option<u64>,

        /// CSV log for raw results (default: metrics.output_file from config)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Export the summary to this JSON file
        #[arg(long, short = 'j')]
        json: Option<PathBuf>,
    },
}

pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    telemetry::init(&config.logging);

    println!("{}", "Unified Benchmark".bold().cyan());
    println!("{}\n", format!("Backend: {}", cli.backend).yellow());

    let backend = config.backend(&cli.backend)?;
    let adapter = backend.build(&cli.backend, reqwest::Client::new());

    match cli.command {
        Commands::Health => Ok(health(adapter.as_ref(), &cli.backend).await),
        Commands::List => {
            list(adapter.as_ref()).await;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Query {
            connector,
            dataset,
            pattern,
            timeout,
            rows,
            output,
        } => {
            let request = QueryRequest::new(connector, dataset)
                .timeout(request_timeout(timeout, backend))
                .rows(rows);
            let mut collector = MetricsCollector::new(&config.metrics.output_file);
            query(adapter.as_ref(), &request, pattern, output.as_deref(), &mut collector).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::LoadTest {
            requests,
            concurrency,
            dataset,
            connectors,
            pattern,
            rows,
            timeout,
            output,
            json,
        } => {
            let load = LoadTestConfig::builder()
                .total_requests(requests)
                .concurrency(concurrency)
                .dataset(dataset)
                .connector_ids(connectors)
                .pattern(pattern)
                .rows(rows)
                .timeout(request_timeout(timeout, backend))
                .output_file(output.unwrap_or(config.metrics.output_file))
                .build();
            load_test(adapter, &load, json.as_deref()).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// The `--timeout` flag when given, otherwise the backend's configured timeout.
fn request_timeout(flag: Option<u64>, backend: &BackendConfig) -> Duration {
    flag.map(Duration::from_secs).unwrap_or_else(|| backend.timeout())
}

async fn health(adapter: &dyn BackendAdapter, backend: &str) -> ExitCode {
    if adapter.health_check().await {
        println!("{} {backend} is healthy", "✓".green());
        ExitCode::SUCCESS
    } else {
        println!("{} {backend} is not healthy", "✗".red());
        ExitCode::FAILURE
    }
}

async fn list(adapter: &dyn BackendAdapter) {
    let connectors = adapter.list_connectors().await;
    if connectors.is_empty() {
        println!("{}", "No connectors found".yellow());
        return;
    }

    println!(
        "{}",
        format!("{:<24}{:<12}{:<28}{}", "ID", "Status", "Connected At", "Last Ping").bold()
    );
    for c in &connectors {
        let status = if c.status == "online" || c.status == "active" {
            c.status.green()
        } else {
            c.status.normal()
        };
        println!(
            "{:<24}{:<12}{:<28}{}",
            c.id,
            status,
            c.connected_at.as_deref().unwrap_or("-"),
            c.last_ping.as_deref().unwrap_or("-")
        );
    }
    println!("\n{} connector(s)", connectors.len());
}

async fn query(
    adapter: &dyn BackendAdapter,
    request: &QueryRequest,
    pattern: QueryPattern,
    output: Option<&Path>,
    collector: &mut MetricsCollector,
) -> anyhow::Result<()> {
    anyhow::ensure!(
        adapter.supports(pattern),
        "pattern {pattern} not supported by {}. Supported: {:?}",
        adapter.name(),
        adapter.supported_patterns()
    );

    let result = match pattern {
        QueryPattern::Sync => adapter.query_sync(request).await,
        QueryPattern::Stream => {
            let sink: Option<OutputSink> = match output {
                Some(path) => Some(Box::new(
                    tokio::fs::File::create(path)
                        .await
                        .with_context(|| format!("creating {}", path.display()))?,
                )),
                None => None,
            };
            adapter.query_stream(request, sink).await.collect().await
        }
        QueryPattern::Offload => adapter.query_offload(request, output).await,
    };

    ConsoleReporter.print_result(&result);
    collector.add_result(result);
    collector.flush()?;
    Ok(())
}

async fn load_test(
    adapter: Arc<dyn BackendAdapter>,
    config: &LoadTestConfig,
    json: Option<&Path>,
) -> anyhow::Result<()> {
    let metrics = LoadTester::new(adapter)
        .run_with_progress(config, |done, total| {
            print!("\r  Progress: {done}/{total}");
            let _ = std::io::stdout().flush();
        })
        .await?;
    println!();

    ConsoleReporter.report(&metrics).await?;
    if let Some(path) = json {
        JsonFileReporter::new(path).report(&metrics).await?;
    }
    Ok(())
}
