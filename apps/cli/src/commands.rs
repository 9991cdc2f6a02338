//! CLI command definitions, routing, and tracing setup.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use prospector_core::progress::{self, JobProgress};
use prospector_core::{JobRegistry, RegistryOptions};
use prospector_research::ChatResearchClient;
use prospector_shared::{
    AppConfig, JobEvent, JobId, JobSettings, JobStatus, ResumePolicy, init_config, load_config,
    validate_query,
};
use prospector_storage::Storage;
use prospector_storage::seed::{bundled_catalog, load_catalog_file};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Prospector: find organizations and contacts across every sub-region of a region.
#[derive(Parser)]
#[command(
    name = "prospector",
    version,
    about = "Research organizations and contacts across a region's sub-regions, one resumable job at a time.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database file (overrides `defaults.database_path`).
    #[arg(long, env = "PROSPECTOR_DB", global = true)]
    pub database: Option<PathBuf>,

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
    /// Create a job for a region and run it.
    Start {
        /// Region code, e.g. DE.
        #[arg(short, long)]
        region: String,

        /// What to look for in each sub-region.
        #[arg(short, long)]
        query: String,

        /// Seconds to wait between sub-regions.
        #[arg(long)]
        delay: Option<u64>,

        /// Organizations to request per sub-region.
        #[arg(long)]
        max_results: Option<u32>,

        /// revisit-all or remaining-only.
        #[arg(long)]
        resume_policy: Option<String>,

        /// Only create the job (pending); launch it later with `run`.
        #[arg(long)]
        create_only: bool,
    },

    /// Launch a pending job.
    Run {
        /// Job ID.
        job: String,
    },

    /// Restart a paused job.
    Resume {
        /// Job ID.
        job: String,
    },

    /// Pause a running job at the next sub-region boundary.
    Pause {
        /// Job ID.
        job: String,
    },

    /// Force-stop a running or paused job.
    Stop {
        /// Job ID.
        job: String,
    },

    /// Show a job's progress.
    Status {
        /// Job ID.
        job: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Export a job's results as JSON lines.
    Export {
        /// Job ID.
        job: String,

        /// Write to a file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List recent jobs.
    Jobs {
        /// Maximum number of jobs to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// List regions, or the sub-regions of one region.
    Regions {
        /// Region code to expand.
        code: Option<String>,
    },

    /// Load the region catalog.
    Seed {
        /// JSON catalog file; defaults to the bundled US catalog.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "prospector=info",
        1 => "prospector=debug",
        _ => "prospector=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        };
    }

    let config = load_config()?;
    let db_path = match cli.database {
        Some(path) => path,
        None => config.database_path()?,
    };

    match cli.command {
        Command::Start {
            region,
            query,
            delay,
            max_results,
            resume_policy,
            create_only,
        } => {
            let settings = job_settings(&config, delay, max_results, resume_policy.as_deref())?;
            cmd_start(&config, &db_path, &region, &query, &settings, create_only).await
        }
        Command::Run { job } => cmd_run(&config, &db_path, &parse_job_id(&job)?).await,
        Command::Resume { job } => cmd_resume(&config, &db_path, &parse_job_id(&job)?).await,
        Command::Pause { job } => {
            cmd_transition(&db_path, &parse_job_id(&job)?, JobEvent::Pause).await
        }
        Command::Stop { job } => {
            cmd_transition(&db_path, &parse_job_id(&job)?, JobEvent::ForceStop).await
        }
        Command::Status { job, json } => cmd_status(&db_path, &parse_job_id(&job)?, json).await,
        Command::Export { job, out } => {
            cmd_export(&db_path, &parse_job_id(&job)?, out.as_deref()).await
        }
        Command::Jobs { limit } => cmd_jobs(&db_path, limit).await,
        Command::Regions { code } => cmd_regions(&db_path, code.as_deref()).await,
        Command::Seed { file } => cmd_seed(&db_path, file.as_deref()).await,
        Command::Config { .. } => Ok(()),
    }
}

fn parse_job_id(raw: &str) -> Result<JobId> {
    raw.parse().map_err(|e| eyre!("invalid job id '{raw}': {e}"))
}

fn job_settings(
    config: &AppConfig,
    delay: Option<u64>,
    max_results: Option<u32>,
    resume_policy: Option<&str>,
) -> Result<JobSettings> {
    let mut settings = JobSettings::from(config);
    if let Some(secs) = delay {
        settings.delay_between_searches = Duration::from_secs(secs);
    }
    if let Some(n) = max_results {
        settings.max_results_per_sub_region = n;
    }
    if let Some(policy) = resume_policy {
        settings.resume_policy = policy.parse::<ResumePolicy>()?;
    }
    settings.validate()?;
    Ok(settings)
}

/// Open read-write and load the bundled catalog on first use.
async fn open_storage(db_path: &Path) -> Result<Arc<Storage>> {
    let storage = Storage::open(db_path)
        .await
        .wrap_err_with(|| format!("opening {}", db_path.display()))?;
    if let Some(stats) = storage.ensure_seeded().await? {
        info!(
            regions = stats.regions_added,
            sub_regions = stats.sub_regions_added,
            "loaded bundled region catalog"
        );
    }
    Ok(Arc::new(storage))
}

fn build_registry(config: &AppConfig, storage: Arc<Storage>) -> Result<JobRegistry> {
    let client = ChatResearchClient::from_config(config)?;
    Ok(JobRegistry::new(
        storage,
        Arc::new(client),
        RegistryOptions::from(&config.orchestrator),
    ))
}

// ---------------------------------------------------------------------------
// Job commands
// ---------------------------------------------------------------------------

async fn cmd_start(
    config: &AppConfig,
    db_path: &Path,
    region_code: &str,
    query: &str,
    settings: &JobSettings,
    create_only: bool,
) -> Result<()> {
    let query = validate_query(query)?;
    let storage = open_storage(db_path).await?;
    let region = storage
        .get_region_by_code(region_code)
        .await?
        .ok_or_else(|| eyre!("unknown region '{region_code}'. List regions with `prospector regions`."))?;

    if create_only {
        let job_id = storage.insert_job(region.id, query, settings).await?.id;
        println!("Created job {job_id} for {} (pending).", region.name);
        println!("Launch it with: prospector run {job_id}");
        return Ok(());
    }

    let registry = build_registry(config, storage)?;
    let job_id = registry.start(region.id, query, settings).await?;

    info!(%job_id, region = %region.code, query, "job started");
    println!("Started job {job_id} for {}.", region.name);
    watch(&registry, &job_id).await
}

async fn cmd_run(config: &AppConfig, db_path: &Path, job_id: &JobId) -> Result<()> {
    let registry = build_registry(config, open_storage(db_path).await?)?;
    registry.launch(job_id).await?;
    println!("Started job {job_id}.");
    watch(&registry, job_id).await
}

async fn cmd_resume(config: &AppConfig, db_path: &Path, job_id: &JobId) -> Result<()> {
    let registry = build_registry(config, open_storage(db_path).await?)?;
    let job = registry.resume(job_id).await?;
    println!(
        "Resumed job {job_id} ({} policy).",
        job.settings.resume_policy.as_str()
    );
    watch(&registry, job_id).await
}

/// Pause or stop a job, possibly run by another process. Its worker notices
/// at the next sub-region boundary.
async fn cmd_transition(db_path: &Path, job_id: &JobId, event: JobEvent) -> Result<()> {
    let storage = Storage::open(db_path).await?;
    let job = storage.apply_transition(job_id, &event).await?;
    match job.status {
        JobStatus::Paused => println!(
            "Paused job {job_id} at {}.",
            job.resume_hint.as_deref().unwrap_or("start")
        ),
        status => println!("Job {job_id} is now {status}."),
    }
    Ok(())
}

/// Follow a job until it leaves `running`. Ctrl-C pauses it.
async fn watch(registry: &JobRegistry, job_id: &JobId) -> Result<()> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {percent}% {msg}",
        )?
        .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                bar.finish_and_clear();
                match registry.pause(job_id).await {
                    Ok(_) => println!("Pausing job {job_id}. Resume with: prospector resume {job_id}"),
                    Err(e) if e.is_invalid_transition() => warn!(error = %e, "could not pause"),
                    Err(e) => return Err(e.into()),
                }
                registry.wait(job_id).await?;
                break;
            }
            _ = ticker.tick() => {
                let progress = registry.status(job_id).await?;
                bar.set_length(progress.total_units);
                bar.set_position(progress.processed_units);
                bar.set_message(format!(
                    "{} | {} found",
                    progress.current_sub_region.as_deref().unwrap_or("-"),
                    progress.organizations_found
                ));
                if progress.status != JobStatus::Running {
                    bar.finish_and_clear();
                    registry.wait(job_id).await?;
                    break;
                }
            }
        }
    }

    print_progress(&registry.status(job_id).await?);
    Ok(())
}

async fn cmd_status(db_path: &Path, job_id: &JobId, json: bool) -> Result<()> {
    let storage = Storage::open_readonly(db_path).await?;
    let progress = progress::snapshot(&storage, job_id, 0).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&progress)?);
    } else {
        print_progress(&progress);
    }
    Ok(())
}

fn print_progress(p: &JobProgress) {
    println!();
    println!("  Job:       {}", p.job_id);
    println!("  Query:     {}", p.query);
    println!("  Region:    {}", p.region);
    println!("  Status:    {}", p.status);
    if let Some(current) = &p.current_sub_region {
        println!("  Current:   {current}");
    }
    if let Some(hint) = &p.resume_hint {
        println!("  Paused at: {hint}");
    }
    println!(
        "  Progress:  {}/{} ({:.1}%)",
        p.processed_units, p.total_units, p.percentage
    );
    println!("  Found:     {}", p.organizations_found);
    if let Some(secs) = p.elapsed_secs {
        println!("  Elapsed:   {secs}s");
    }
    if let Some(error) = &p.error_message {
        println!("  Error:     {error}");
    }
    println!();
}

async fn cmd_export(db_path: &Path, job_id: &JobId, out: Option<&Path>) -> Result<()> {
    let storage = Storage::open_readonly(db_path).await?;
    storage.require_job(job_id).await?;
    let rows = storage.list_results(job_id).await?;

    let mut writer: Box<dyn Write> = match out {
        Some(path) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(path).wrap_err_with(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };
    for row in &rows {
        writeln!(writer, "{}", serde_json::to_string(row)?)?;
    }
    writer.flush()?;

    if let Some(path) = out {
        println!("Exported {} rows to {}", rows.len(), path.display());
    }
    Ok(())
}

async fn cmd_jobs(db_path: &Path, limit: u32) -> Result<()> {
    let storage = Storage::open_readonly(db_path).await?;
    let jobs = storage.list_jobs(limit).await?;
    if jobs.is_empty() {
        println!("No jobs yet. Start one with: prospector start --region DE --query \"...\"");
        return Ok(());
    }

    for job in jobs {
        let region = storage
            .get_region(job.region_id)
            .await?
            .map(|r| r.code)
            .unwrap_or_else(|| "?".into());
        println!(
            "{}  {:<9}  {:<3}  {}  {}",
            job.id,
            job.status.as_str(),
            region,
            job.created_at.format("%Y-%m-%d %H:%M"),
            job.query
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Catalog commands
// ---------------------------------------------------------------------------

async fn cmd_regions(db_path: &Path, code: Option<&str>) -> Result<()> {
    let storage = open_storage(db_path).await?;

    match code {
        Some(code) => {
            let region = storage
                .get_region_by_code(code)
                .await?
                .ok_or_else(|| eyre!("unknown region '{code}'"))?;
            let units = storage.list_sub_regions(region.id).await?;
            println!("{} ({}): {} sub-regions", region.name, region.code, units.len());
            for unit in units {
                let fips = unit.external_id.as_deref().unwrap_or("");
                println!("  {:<24} {fips}", unit.name);
            }
        }
        None => {
            for region in storage.list_regions().await? {
                let count = storage.count_sub_regions(region.id).await?;
                println!("{:<3} {:<20} {count}", region.code, region.name);
            }
        }
    }
    Ok(())
}

async fn cmd_seed(db_path: &Path, file: Option<&Path>) -> Result<()> {
    let storage = Storage::open(db_path).await?;
    let catalog = match file {
        Some(path) => load_catalog_file(path)?,
        None => bundled_catalog()?,
    };
    let stats = storage.seed_catalog(&catalog).await?;

    println!(
        "Seeded {} regions and {} sub-regions ({} already present).",
        stats.regions_added, stats.sub_regions_added, stats.sub_regions_skipped
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
