use chrono::Utc;
use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use quizpool::Config;
use quizpool::domain::{User, UserId};
use quizpool::generator::GeneratorRegistry;
use quizpool::scheduler::{ConcurrencyGate, DailyAssignmentPlanner, PoolMonitor, Scheduler, refill_target, thin_type};
use quizpool::storage::{SqliteStorage, Storage};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quizpool")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("quizpool.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn open_storage(config: &Config) -> Result<Arc<SqliteStorage>> {
    let path = &config.storage.database_path;
    let storage = SqliteStorage::open(path).with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(Arc::new(storage))
}

fn load_user(storage: &SqliteStorage, id: i64) -> Result<User> {
    storage
        .get_user(UserId(id))
        .context("Failed to load user")?
        .ok_or_else(|| eyre!("User {} not found", id))
}

async fn run_application(cli: &Cli, config: Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match cli.command.clone().unwrap_or(Commands::Run { paused: false }) {
        Commands::Run { paused } => handle_run_command(config, paused).await,
        Commands::Evaluate { user } => handle_evaluate_command(&config, user),
        Commands::Plan { user, days } => handle_plan_command(&config, user, days),
        Commands::Config => handle_config_command(&config),
    }
}

async fn handle_run_command(mut config: Config, paused: bool) -> Result<()> {
    if paused {
        config.scheduler.start_paused = true;
    }
    let storage = open_storage(&config)?;
    let registry = Arc::new(GeneratorRegistry::from_config(&config.providers));

    let scheduler = Scheduler::new(&config, storage, registry);
    let handle = scheduler.handle();
    let task = tokio::spawn(scheduler.run());

    println!(
        "{} scanning every {}s{}",
        "Scheduler running:".green(),
        config.scheduler.scan_interval_secs,
        if paused { " (paused)" } else { "" }
    );

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    println!("{}", "Shutting down...".yellow());
    handle.shutdown().await.context("Failed to stop scheduler")?;

    task.await.context("Scheduler task failed")??;

    let status = handle.status();
    println!(
        "{} {} run(s) completed, {} failed",
        "Stopped:".green(),
        status.runs_completed,
        status.runs_failed
    );
    Ok(())
}

fn handle_evaluate_command(config: &Config, user_id: i64) -> Result<()> {
    info!("Evaluating pool for user {}", user_id);
    let storage = open_storage(config)?;
    let user = load_user(&storage, user_id)?;
    let monitor = PoolMonitor::new(config);
    let now = Utc::now();

    let pool = user.pool_key();
    let stats = monitor.stats(storage.as_ref(), &pool, now).context("Failed to read pool stats")?;
    println!("{} {}", "Pool:".green(), pool);
    println!("  questions: {}", stats.pool_count);
    println!("  fresh:     {} ({:.0}%)", stats.fresh_count, stats.fresh_ratio() * 100.0);
    println!(
        "  refill target: {}",
        refill_target(
            &stats,
            config.pool.question_refill_threshold,
            config.pool.daily_fresh_question_ratio
        )
    );
    if let Some((question_type, deficit)) = thin_type(&stats, config.pool.question_refill_threshold) {
        println!("  thinnest type: {} (short by {})", question_type, deficit);
    }

    let gate = ConcurrencyGate::from_config(&config.concurrency);
    match monitor
        .evaluate(storage.as_ref(), &user, &gate, now)
        .context("Failed to evaluate pool")?
    {
        Some(request) => println!(
            "{} {} x{} via {}",
            "Would generate:".yellow(),
            request.question_type,
            request.target_count,
            request.provider
        ),
        None => println!("{}", "No generation needed".green()),
    }
    Ok(())
}

fn handle_plan_command(config: &Config, user_id: i64, days: Option<u32>) -> Result<()> {
    info!("Planning assignments for user {}", user_id);
    let storage = open_storage(config)?;
    let user = load_user(&storage, user_id)?;
    let planner = DailyAssignmentPlanner::new(config);
    let now = Utc::now();

    let outcome = planner
        .plan_horizon(
            storage.as_ref(),
            &user,
            days.unwrap_or_else(|| planner.horizon_days()),
            user.today(now),
            now,
        )
        .context("Failed to plan assignments")?;

    for day in &outcome.days {
        let ids: Vec<String> = day.questions.iter().map(|q| q.to_string()).collect();
        println!("{} {}", day.date.to_string().cyan(), ids.join(", "));
        if !day.reused.is_empty() {
            println!("  {} {} recently-correct question(s)", "reused".yellow(), day.reused.len());
        }
        if day.shortfall > 0 {
            println!("  {} {}", "short by".red(), day.shortfall);
        }
    }
    if let Some(request) = outcome.request {
        println!(
            "{} {} x{} via {}",
            "Needs generation:".yellow(),
            request.question_type,
            request.target_count,
            request.provider
        );
    }
    Ok(())
}

fn handle_config_command(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to render configuration")?;
    print!("{}", yaml);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, config).await.context("Application failed")?;

    Ok(())
}
