use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use harvest::cli::{Cli, Commands};
use harvest::config::Config;
use harvest::domain::{CriteriaResult, NewSource};
use harvest::errors::{HarvestError, HarvestResult};
use harvest::sandbox::{ProgramRunner, Sandbox};
use harvest::services::expression::parse_schedule;
use harvest::services::{HarvestOptions, Harvester, SystemClock};
use harvest::storage::{Repositories, SqliteStorage};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

async fn run() -> HarvestResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;
    init_tracing(&config.log_filter);

    // Initialize storage
    let storage = SqliteStorage::new(&config.db_path)?;
    let repos = Repositories::sqlite(storage);

    let sandbox = Arc::new(Sandbox::new(config.sandbox.clone()));
    let harvester = Harvester::new(
        repos.clone(),
        sandbox.clone(),
        Arc::new(SystemClock),
        HarvestOptions {
            gate_capacity: config.gate_capacity,
            retry: config.retry.clone(),
        },
    );

    match cli.command {
        Commands::Subscribe { name, criteria } => cmd_subscribe(&repos, &name, &criteria),
        Commands::Add {
            subscription,
            schedule,
            file,
            name,
            disabled,
        } => cmd_add(&repos, &sandbox, subscription, &schedule, &file, name, disabled),
        Commands::List => cmd_list(&repos),
        Commands::Remove { id } => cmd_remove(&repos, id),
        Commands::Enable { id } => cmd_set_enabled(&repos, id, true),
        Commands::Disable { id } => cmd_set_enabled(&repos, id, false),
        Commands::Run { id } => cmd_run(&harvester, id).await,
        Commands::Items { id, limit } => cmd_items(&repos, id, limit),
        Commands::Notifications { limit } => cmd_notifications(&repos, limit),
        Commands::Check { file } => cmd_check(&sandbox, &file),
        Commands::Exec { file } => cmd_exec(sandbox, &file).await,
        Commands::Daemon => cmd_daemon(&harvester).await,
    }
}

fn cmd_subscribe(repos: &Repositories, name: &str, criteria: &str) -> HarvestResult<()> {
    if name.trim().is_empty() {
        return Err(HarvestError::InvalidInput("Name must not be empty".to_string()));
    }

    let id = repos.subscriptions.add(name.trim(), criteria.trim())?;
    println!("Subscription created: {} (id {})", name.trim(), id);
    Ok(())
}

fn cmd_add(
    repos: &Repositories,
    sandbox: &Sandbox,
    subscription_id: i64,
    schedule: &str,
    file: &str,
    name: Option<String>,
    disabled: bool,
) -> HarvestResult<()> {
    if repos.subscriptions.get_by_id(subscription_id)?.is_none() {
        return Err(HarvestError::SubscriptionNotFound(subscription_id));
    }
    parse_schedule(schedule)?;

    let program = fs::read_to_string(file)?;
    sandbox
        .verify(&program)
        .map_err(|failure| HarvestError::InvalidInput(failure.to_string()))?;

    let name = name.unwrap_or_else(|| {
        Path::new(file)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.to_string())
    });

    let source = NewSource::new(subscription_id, name.clone(), program, schedule.to_string())
        .with_enabled(!disabled);
    let id = repos.sources.add(&source)?;

    println!("Source added: {} (id {})", name, id);
    if disabled {
        println!("  Disabled; enable it with `harvest enable {}`", id);
    }
    Ok(())
}

fn cmd_list(repos: &Repositories) -> HarvestResult<()> {
    let sources = repos.sources.get_all()?;

    if sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!("Configured sources:\n");
    for source in sources {
        println!("  {}. {} [{}]", source.id, source.name, source.status);
        println!("    Schedule: {}", source.schedule);
        println!(
            "    Runs: {} ({} ok), items: {}",
            source.total_runs, source.success_runs, source.items_collected
        );
        if let Some(at) = source.last_run_at {
            println!("    Last run: {}", at.to_rfc3339());
        }
        if let Some(at) = source.next_run_at {
            println!("    Next run: {}", at.to_rfc3339());
        }
        if let Some(error) = &source.last_error {
            println!("    Last error: {}", error);
        }
        println!();
    }

    Ok(())
}

fn cmd_remove(repos: &Repositories, id: i64) -> HarvestResult<()> {
    let source = repos
        .sources
        .get_by_id(id)?
        .ok_or(HarvestError::SourceNotFound(id))?;

    repos.sources.remove(id)?;
    println!("Removed: {}", source.name);
    Ok(())
}

fn cmd_set_enabled(repos: &Repositories, id: i64, enabled: bool) -> HarvestResult<()> {
    repos.sources.set_enabled(id, enabled)?;
    println!(
        "Source {} {}",
        id,
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

async fn cmd_run(harvester: &Harvester, id: i64) -> HarvestResult<()> {
    println!("Collecting from source {}...", id);

    let result = harvester.collect(id).await?;
    match &result.error {
        None => println!(
            "Collected {} new items ({} already seen).",
            result.new_items, result.skipped
        ),
        Some(error) => {
            println!("Run failed: {}", error);
            if let Some(retry) = harvester.collector().retry_status(id) {
                println!(
                    "  Retry {}/{} would be due at {}",
                    retry.attempt,
                    retry.max_attempts,
                    retry.next_retry_at.to_rfc3339()
                );
            }
        }
    }

    Ok(())
}

fn cmd_items(repos: &Repositories, id: i64, limit: usize) -> HarvestResult<()> {
    if repos.sources.get_by_id(id)?.is_none() {
        return Err(HarvestError::SourceNotFound(id));
    }

    let items = repos.items.list_for_source(id, limit)?;
    if items.is_empty() {
        println!("No items collected yet.");
        return Ok(());
    }

    for stored in items {
        let marker = match stored.item.criteria_result {
            Some(CriteriaResult::Matched) => "*",
            _ => " ",
        };
        println!("{} {}", marker, stored.item.title);
        println!("    {}", stored.item.url);
    }

    Ok(())
}

fn cmd_notifications(repos: &Repositories, limit: usize) -> HarvestResult<()> {
    let notifications = repos.notifications.recent(limit)?;

    if notifications.is_empty() {
        println!("No notifications.");
        return Ok(());
    }

    for notification in notifications {
        println!(
            "{} {}",
            notification.created_at.format("%Y-%m-%d %H:%M"),
            notification.format()
        );
    }

    Ok(())
}

fn cmd_check(sandbox: &Sandbox, file: &str) -> HarvestResult<()> {
    let program = fs::read_to_string(file)?;

    match sandbox.verify(&program) {
        Ok(_) => {
            println!("Program OK: {}", file);
            Ok(())
        }
        Err(failure) => Err(HarvestError::InvalidInput(failure.to_string())),
    }
}

async fn cmd_exec(sandbox: Arc<Sandbox>, file: &str) -> HarvestResult<()> {
    let program = fs::read_to_string(file)?;

    let result = tokio::task::spawn_blocking(move || sandbox.run(&program))
        .await
        .map_err(|e| HarvestError::InvalidInput(format!("sandbox task failed: {e}")))?;

    let items = result.map_err(|failure| HarvestError::InvalidInput(failure.to_string()))?;
    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}

async fn cmd_daemon(harvester: &Harvester) -> HarvestResult<()> {
    let report = harvester.start()?;
    println!(
        "Harvesting: {} scheduled, {} recovering. Press Ctrl-C to stop.",
        report.scheduled,
        report.recovering.len()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
