//! CLI command definitions, routing, and tracing setup.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use specpress_core::{
    PipelineOrchestrator, ProgressReporter, PublishTrigger, RunReport, RunRequest, SpecTrigger,
    execute_generation, publish_spec,
};
use specpress_crawler::{CrawlService, CrawlSettings, FirecrawlService};
use specpress_github::{GitHubClient, PublishSettings, PullRequestPublisher};
use specpress_llm::{OpenRouterGenerator, TextGenerator};
use specpress_shared::{
    AppConfig, PipelineConfig, RunId, RunState, database_path, init_config, load_config,
};
use specpress_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SpecPress: turn API documentation into OpenAPI documents.
#[derive(Parser)]
#[command(
    name = "specpress",
    version,
    about = "Crawl API documentation, generate an OpenAPI document and publish it as a pull request.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl a docs site and print the merged document as a `{message, data}` response.
    Generate {
        /// Root URL of the documentation site.
        url: String,

        /// Regex restricting which paths are crawled.
        #[arg(long)]
        path_pattern: Option<String>,

        /// Maximum number of pages to crawl.
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Publish an existing document as a pull request.
    Publish {
        /// File holding the document to publish.
        #[arg(long)]
        spec_file: PathBuf,

        /// Integration name; determines the package directory.
        #[arg(long)]
        integration: String,

        /// Docs URL the document was generated from.
        #[arg(long)]
        crawled_url: String,
    },

    /// Run the full pipeline, publishing the result.
    Run {
        /// Root URL of the documentation site.
        url: String,

        /// Integration name; determines the package directory.
        #[arg(long)]
        integration: String,

        /// Regex restricting which paths are crawled.
        #[arg(long)]
        path_pattern: Option<String>,

        /// Maximum number of pages to crawl.
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Re-run a previous run from its stored pages, skipping the crawl.
    Retry {
        /// Id of the run whose pages are reused.
        run_id: RunId,

        /// Override the integration name of the source run.
        #[arg(long)]
        integration: Option<String>,
    },

    /// Inspect recorded runs.
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },

    /// Manage configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Run inspection subcommands.
#[derive(Subcommand)]
pub(crate) enum RunsAction {
    /// List the most recent runs.
    List {
        /// Number of runs to show.
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Show one run with its pages, chunks and fragments.
    Show {
        /// Run id.
        run_id: RunId,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Create a default config file at ~/.specpress/specpress.toml.
    Init,
    /// Print the current configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialise the tracing subscriber from CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "specpress=info",
        1 => "specpress=debug",
        _ => "specpress=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so trigger responses on stdout stay machine-readable.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Generate {
            url,
            path_pattern,
            limit,
        } => cmd_generate(url, path_pattern, limit).await,
        Command::Publish {
            spec_file,
            integration,
            crawled_url,
        } => cmd_publish(&spec_file, integration, crawled_url).await,
        Command::Run {
            url,
            integration,
            path_pattern,
            limit,
        } => cmd_run(url, integration, path_pattern, limit).await,
        Command::Retry {
            run_id,
            integration,
        } => cmd_retry(run_id, integration).await,
        Command::Runs { action } => match action {
            RunsAction::List { limit } => cmd_runs_list(limit).await,
            RunsAction::Show { run_id } => cmd_runs_show(run_id).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Which external services a command talks to.
#[derive(Clone, Copy)]
struct Stages {
    crawl: bool,
    publish: bool,
}

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = database_path(config)?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .wrap_err_with(|| format!("cannot create {}", dir.display()))?;
    }
    Ok(Arc::new(Storage::open(&path).await?))
}

/// Wire the orchestrator from config. Only the credentials of the requested
/// stages are required.
async fn build_orchestrator(config: &AppConfig, stages: Stages) -> Result<PipelineOrchestrator> {
    let crawl: Arc<dyn CrawlService> = if stages.crawl {
        Arc::new(FirecrawlService::from_config(config)?)
    } else {
        Arc::new(FirecrawlService::new(
            &config.crawl.api_base,
            "",
            CrawlSettings::from(config),
        )?)
    };
    let generator: Arc<dyn TextGenerator> = Arc::new(OpenRouterGenerator::from_config(config)?);
    let storage = open_storage(config).await?;

    let orchestrator =
        PipelineOrchestrator::new(crawl, generator, storage, PipelineConfig::from(config));
    if !stages.publish {
        return Ok(orchestrator);
    }

    let host = Arc::new(GitHubClient::from_config(config)?);
    let publisher = Arc::new(PullRequestPublisher::new(host, PublishSettings::from(config)));
    Ok(orchestrator.with_publisher(publisher, config.github.repo_coords()?))
}

/// How a driven run ended.
enum Outcome<T> {
    Finished(T),
    Cancelled,
}

/// Drive `run` until it finishes or Ctrl-C arrives; on Ctrl-C the run is
/// recorded as cancelled.
async fn until_interrupted<T>(
    orchestrator: &PipelineOrchestrator,
    run_id: RunId,
    progress: &CliProgress,
    run: impl Future<Output = T>,
) -> Result<Outcome<T>> {
    tokio::select! {
        result = run => Ok(Outcome::Finished(result)),
        signal = tokio::signal::ctrl_c() => {
            signal.wrap_err("failed to listen for Ctrl-C")?;
            progress.spinner.finish_and_clear();
            orchestrator.mark_cancelled(run_id).await?;
            eprintln!("Run {run_id} cancelled.");
            Ok(Outcome::Cancelled)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_generate(url: String, path_pattern: Option<String>, limit: Option<u32>) -> Result<()> {
    let config = load_config()?;
    let orchestrator = build_orchestrator(
        &config,
        Stages {
            crawl: true,
            publish: false,
        },
    )
    .await?;

    let trigger = SpecTrigger {
        url,
        path_regex: path_pattern,
    };
    let mut request = trigger.to_request(&config.defaults);
    if let Some(limit) = limit {
        request.page_limit = limit;
    }

    let progress = CliProgress::new();
    let run_id = orchestrator.begin(&request).await?;
    let run = execute_generation(&orchestrator, run_id, &request, &progress);

    match until_interrupted(&orchestrator, run_id, &progress, run).await? {
        Outcome::Finished(response) => {
            progress.spinner.finish_and_clear();
            print_json(&response)
        }
        Outcome::Cancelled => Ok(()),
    }
}

async fn cmd_publish(spec_file: &Path, integration: String, crawled_url: String) -> Result<()> {
    let config = load_config()?;
    let yaml = std::fs::read_to_string(spec_file)
        .wrap_err_with(|| format!("cannot read {}", spec_file.display()))?;

    let orchestrator = build_orchestrator(
        &config,
        Stages {
            crawl: false,
            publish: true,
        },
    )
    .await?;

    info!(integration = %integration, "publishing document");
    let response = publish_spec(
        &orchestrator,
        &PublishTrigger {
            yaml,
            integration_name: integration,
            crawled_url,
        },
    )
    .await;
    print_json(&response)
}

async fn cmd_run(
    url: String,
    integration: String,
    path_pattern: Option<String>,
    limit: Option<u32>,
) -> Result<()> {
    let config = load_config()?;
    let orchestrator = build_orchestrator(
        &config,
        Stages {
            crawl: true,
            publish: true,
        },
    )
    .await?;

    let request = RunRequest {
        site_url: url,
        path_pattern: path_pattern.unwrap_or_else(|| config.defaults.path_pattern.clone()),
        page_limit: limit.unwrap_or(config.defaults.page_limit),
        integration_name: Some(integration),
    };

    let progress = CliProgress::new();
    let run_id = orchestrator.begin(&request).await?;
    let run = orchestrator.execute(run_id, &request, &progress);

    finish_run(until_interrupted(&orchestrator, run_id, &progress, run).await?, &progress)
}

async fn cmd_retry(source_run_id: RunId, integration: Option<String>) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let publish = match &integration {
        Some(_) => true,
        None => storage
            .get_run(source_run_id)
            .await?
            .ok_or_else(|| eyre!("run {source_run_id} not found"))?
            .integration_name
            .is_some(),
    };

    let orchestrator = build_orchestrator(
        &config,
        Stages {
            crawl: false,
            publish,
        },
    )
    .await?;

    let plan = orchestrator.begin_retry(source_run_id, integration).await?;
    let run_id = plan.run_id;
    println!("Retrying {source_run_id} as {run_id}");

    let progress = CliProgress::new();
    let run = orchestrator.execute_retry(plan, &progress);

    finish_run(until_interrupted(&orchestrator, run_id, &progress, run).await?, &progress)
}

fn finish_run(
    outcome: Outcome<specpress_shared::Result<RunReport>>,
    progress: &CliProgress,
) -> Result<()> {
    let report = match outcome {
        Outcome::Finished(result) => {
            progress.spinner.finish_and_clear();
            result?
        }
        Outcome::Cancelled => return Ok(()),
    };

    println!();
    println!("  Run completed successfully!");
    println!("  ID:        {}", report.run_id);
    println!("  Pages:     {}", report.page_count);
    println!("  Chunks:    {}", report.chunk_count);
    println!(
        "  Fragments: {} ({} skipped)",
        report.fragment_count,
        report.skipped.len()
    );
    if let Some(pr) = &report.pull_request {
        println!("  Branch:    {}", pr.branch_name);
        println!("  PR:        {}", pr.pr_url);
    }
    println!("  Time:      {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_runs_list(limit: u32) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let runs = storage.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!("{:<36}  {:<10}  {:<20}  SITE", "ID", "STATE", "CREATED");
    for run in runs {
        println!(
            "{:<36}  {:<10}  {:<20}  {}",
            run.id,
            run.state.as_str(),
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            run.site_url
        );
    }
    Ok(())
}

async fn cmd_runs_show(run_id: RunId) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let run = storage
        .get_run(run_id)
        .await?
        .ok_or_else(|| eyre!("run {run_id} not found"))?;

    let pages = storage.list_pages(run_id).await?;
    let chunks = storage.list_chunks(run_id).await?;
    let fragments = storage.list_fragments(run_id).await?;
    let skipped = storage.list_skipped_fragments(run_id).await?;

    println!("Run:          {}", run.id);
    println!("State:        {}", run.state);
    println!("Site:         {}", run.site_url);
    println!("Path pattern: {}", run.path_pattern);
    println!("Page limit:   {}", run.page_limit);
    if let Some(name) = &run.integration_name {
        println!("Integration:  {name}");
    }
    if let Some(parent) = &run.parent_run_id {
        println!("Retry of:     {parent}");
    }
    if let Some(job) = &run.crawl_job_id {
        println!("Crawl job:    {job}");
    }
    println!("Created:      {}", run.created_at.to_rfc3339());
    println!("Updated:      {}", run.updated_at.to_rfc3339());
    println!("Pages:        {}", pages.len());
    println!("Chunks:       {}", chunks.len());
    println!("Fragments:    {} ({} skipped)", fragments.len(), skipped.len());
    for skip in &skipped {
        println!(
            "  skipped #{} {}[{}]: {}",
            skip.order, skip.chunk_ref.parent_url, skip.chunk_ref.index, skip.error
        );
    }
    if let Some(spec) = &run.merged_spec {
        println!("Merged spec:  {} chars", spec.chars().count());
    }
    if let Some(pr) = &run.pr_url {
        println!("PR:           {pr}");
    }
    if run.state == RunState::Failed {
        println!(
            "Error:        [{}] {}",
            run.error_kind.as_deref().unwrap_or("unknown"),
            run.error_message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, state: RunState) {
        let message = match state {
            RunState::Submitted => "Submitting",
            RunState::Crawling => "Crawling documentation",
            RunState::Chunking => "Chunking pages",
            RunState::Generating => "Generating fragments",
            RunState::Merging => "Merging fragments",
            RunState::Publishing => "Opening pull request",
            RunState::Succeeded => "Done",
            RunState::Failed => "Failed",
        };
        self.spinner.set_message(message);
    }

    fn fragment_generated(&self, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Generating fragments [{current}/{total}]"));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}
