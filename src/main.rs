//! Leveled Backup Tool
//!
//! CLI entry point: loads config.json, then runs one scheduled invocation,
//! prints the schedule, or checks the ledger connection.

// levelbak/src/main.rs
use anyhow::{Context, Result};
use chrono::Local;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use levelbak::backup::{InvocationReport, NbackupExecutor, Orchestrator, TimestampNaming};
use levelbak::chain::{ChainValidator, FirebirdLedger, Ledger, SqlLedger};
use levelbak::config::{AppConfig, LedgerBackend, default_config_path};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "levelbak=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run_app().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the operation ended in a state that needs no operator attention.
async fn run_app() -> Result<bool> {
    let config_path = default_config_path();
    let app_config = AppConfig::load_from_json(&config_path)
        .with_context(|| format!("Failed to load application configuration from {}", config_path.display()))?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    match choice.as_str() {
        "1" | "run" => run_once(&app_config).await,
        "2" | "schedule" => {
            println!("{}", app_config);
            Ok(true)
        }
        "3" | "check" => {
            let validator = connect_ledger(&app_config)
                .await
                .context("Failed to open backup ledger")?;
            validator.close().await;
            println!("✅ Backup ledger reachable.");
            Ok(true)
        }
        _ => {
            println!("❌ Invalid choice. Please enter '1' (run), '2' (schedule), or '3' (check).");
            anyhow::bail!("Invalid operation choice");
        }
    }
}

async fn connect_ledger(app_config: &AppConfig) -> Result<ChainValidator> {
    let settings = &app_config.ledger;
    let ledger: Arc<dyn Ledger> = match &settings.backend {
        LedgerBackend::Firebird(target) => Arc::new(
            FirebirdLedger::connect(target, &settings.table, &settings.column, settings.query_timeout).await?,
        ),
        LedgerBackend::Postgres { url } => Arc::new(
            SqlLedger::connect(url, &settings.table, &settings.column, settings.query_timeout).await?,
        ),
    };
    Ok(ChainValidator::new(ledger, settings.query_timeout))
}

fn print_report(report: &InvocationReport) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(report).context("Failed to serialize invocation report")?
    );
    Ok(())
}

async fn run_once(app_config: &AppConfig) -> Result<bool> {
    let now = Local::now().naive_local();
    let validator = match connect_ledger(app_config).await {
        Ok(validator) => validator,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Backup ledger unavailable, nothing executed");
            print_report(&InvocationReport::failed(None, format!("{:#}", e)))?;
            return Ok(false);
        }
    };
    let naming = TimestampNaming::new(&app_config.backup_dir, app_config.base_name.clone());
    let executor = NbackupExecutor {
        tool: app_config.backup_tool.clone(),
        database: app_config.database.clone(),
        user: app_config.user.clone(),
        password: app_config.password.clone(),
        direct_io: app_config.direct_io,
    };

    let orchestrator = Orchestrator::new(&app_config.levels, &validator, &naming, &executor);
    let report = orchestrator.invoke(&now).await;
    validator.close().await;

    print_report(&report)?;
    Ok(report.is_success())
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    use std::io::{Write, stdin, stdout};

    println!("Select an operation:");
    println!("1. Run scheduled backup now (or type 'run')");
    println!("2. Show schedule (or type 'schedule')");
    println!("3. Check ledger connection (or type 'check')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
