use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use whyline_core::{Engine, ModelCatalog, ModelInfo, QueryLog, Settings};
use whyline_dbt::DbtArtifacts;
use whyline_engine::{BigQueryEngine, DuckDbEngine, QueryCache, QueryEngine, QueryRunner, RunOutcome};
use whyline_llm::{provider_from_settings, FilterState, PromptCache, SqlGenerator};
use whyline_sql::{adapt_validated_sql, sanitize_sql, GuardrailConfig, PREBUILT};

/// WhyLine - governed natural-language-to-SQL for Denver transit data
#[derive(Parser)]
#[command(name = "whyline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: whyline.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Engine to validate for: duckdb or bigquery (default from config / ENGINE)
    #[arg(short, long, global = true)]
    engine: Option<Engine>,

    /// dbt target directory holding manifest.json and catalog.json
    #[arg(short, long, global = true)]
    target_path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run SQL through the guardrails and print the executable form
    Check {
        /// SQL text, or `-` to read stdin
        sql: String,
    },

    /// Generate guarded SQL for a natural-language question
    Ask {
        question: String,

        /// Restrict to routes (repeatable)
        #[arg(long = "route")]
        routes: Vec<String>,

        #[arg(long)]
        stop_id: Option<String>,

        /// Service date range start (YYYY-MM-DD)
        #[arg(long, requires = "end")]
        start: Option<NaiveDate>,

        /// Service date range end (YYYY-MM-DD)
        #[arg(long, requires = "start")]
        end: Option<NaiveDate>,

        /// Precipitation bins: none, light, mod, heavy (repeatable)
        #[arg(long)]
        weather: Vec<String>,
    },

    /// List the allow-listed models from the dbt artifacts
    Models,

    /// List the prebuilt questions, or render one for the engine
    Prebuilt {
        index: Option<usize>,
    },

    /// Execute SQL through the guarded runner on the selected engine
    Run {
        /// SQL text, or `-` to read stdin
        sql: String,

        /// Question recorded (hashed) in the audit log
        #[arg(short, long, default_value = "")]
        question: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let mut settings = load_settings(cli.config.as_deref(), cli.verbose)?;
    if let Some(engine) = cli.engine {
        settings.warehouse.default_engine = engine;
    }
    if let Some(target_path) = &cli.target_path {
        settings.dbt.target_path = target_path.clone();
    }

    if cli.verbose {
        eprintln!("{} engine: {}", "Using".cyan(), settings.warehouse.default_engine);
    }

    match cli.command {
        Commands::Check { sql } => check_command(&settings, &read_sql(&sql)?, cli.verbose),
        Commands::Ask {
            question,
            routes,
            stop_id,
            start,
            end,
            weather,
        } => {
            let mut filters = FilterState::default().with_routes(routes).with_weather(weather);
            if let Some(stop_id) = stop_id {
                filters = filters.with_stop_id(stop_id);
            }
            if let (Some(start), Some(end)) = (start, end) {
                filters = filters.with_date_range(start, end);
            }
            ask_command(&settings, &question, &filters, cli.verbose).await
        }
        Commands::Models => models_command(&settings),
        Commands::Prebuilt { index } => prebuilt_command(&settings, index, cli.verbose),
        Commands::Run { sql, question } => run_command(&settings, &read_sql(&sql)?, &question, cli.verbose).await,
    }
}

/// Config file (explicit, else ./whyline.toml, else defaults) plus environment
fn load_settings(path: Option<&Path>, verbose: bool) -> Result<Settings> {
    let mut settings = if let Some(path) = path {
        Settings::from_file(path)?
    } else if Path::new("whyline.toml").exists() {
        Settings::from_file(Path::new("whyline.toml"))?
    } else {
        if verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Settings::default()
    };

    settings.apply_env_overrides()?;
    Ok(settings)
}

fn read_sql(arg: &str) -> Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut sql = String::new();
    std::io::stdin()
        .read_to_string(&mut sql)
        .context("Failed to read SQL from stdin")?;
    Ok(sql)
}

/// Allow-listed models from dbt artifacts, falling back to bare mart names
fn load_models(settings: &Settings, verbose: bool) -> ModelCatalog {
    match DbtArtifacts::from_settings(&settings.dbt) {
        Ok(artifacts) => artifacts.allowed_models(),
        Err(e) => {
            tracing::warn!(error = %e, "dbt artifacts unavailable, using configured mart names");
            if verbose {
                eprintln!("{} {}", "No dbt artifacts:".yellow(), e);
            }
            settings
                .dbt
                .allowlisted_marts
                .iter()
                .map(|name| (name.clone(), ModelInfo::new(name.as_str())))
                .collect()
        }
    }
}

fn guardrail_config(settings: &Settings, models: &ModelCatalog) -> GuardrailConfig {
    GuardrailConfig::for_engine(
        settings.warehouse.default_engine,
        models,
        &settings.warehouse.target(),
        &settings.guardrails,
    )
}

/// Check command - sanitize and adapt, exit 1 on a violation
fn check_command(settings: &Settings, sql: &str, verbose: bool) -> Result<()> {
    let models = load_models(settings, verbose);
    let config = guardrail_config(settings, &models);

    if verbose {
        eprintln!("{} {} allow-listed models", "Checking against".cyan(), models.len());
    }

    let target = settings.warehouse.target();
    match sanitize_sql(sql, &config).and_then(|sanitized| adapt_validated_sql(&sanitized, &config, Some(&models), &target)) {
        Ok(adapted) => {
            eprintln!("{}", "✓ SQL passed guardrails".green());
            println!("{}", adapted);
            Ok(())
        }
        Err(e) => {
            eprintln!("{} [{}] {}", "✗".red(), e.code().red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Ask command - question to guarded SQL through the configured provider
async fn ask_command(settings: &Settings, question: &str, filters: &FilterState, verbose: bool) -> Result<()> {
    let models = load_models(settings, verbose);
    let provider = provider_from_settings(&settings.llm)?;

    if verbose {
        eprintln!("{} {}", "Provider:".cyan(), provider.name());
    }

    let generator = SqlGenerator::new(
        provider,
        models,
        settings.warehouse.target(),
        settings.guardrails.clone(),
    )
    .with_cache(PromptCache::from_settings(&settings.cache));

    match generator
        .generate(question, settings.warehouse.default_engine, filters)
        .await
    {
        Ok(generated) => {
            println!("{}", generated.sql);
            println!();
            println!("{} {}", "Explanation:".bold(), generated.explanation);
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            std::process::exit(1);
        }
    }
}

/// Models command - list allow-listed models
fn models_command(settings: &Settings) -> Result<()> {
    let artifacts = DbtArtifacts::from_settings(&settings.dbt).with_context(|| {
        format!(
            "Failed to load dbt artifacts from {}. Run 'dbt docs generate' first.",
            settings.dbt.target_path.display()
        )
    })?;

    let models = artifacts.allowed_models();
    let mut names: Vec<&String> = models.keys().collect();
    names.sort();

    println!("{}", format!("{} allow-listed models", names.len()).bold());
    for name in names {
        let model = &models[name];
        println!("  {} {}", model.name.green(), model.fq_name.dimmed());
        if let Some(description) = &model.description {
            println!("    {}", description);
        }
        println!("    {} {}", "cols:".dimmed(), model.column_names().collect::<Vec<_>>().join(", "));
    }

    Ok(())
}

/// Prebuilt command - list questions or render one
fn prebuilt_command(settings: &Settings, index: Option<usize>, verbose: bool) -> Result<()> {
    let Some(index) = index else {
        for (i, query) in PREBUILT.iter().enumerate() {
            println!("  [{}] {}", i, query.label);
        }
        return Ok(());
    };

    let Some(query) = whyline_sql::prebuilt(index) else {
        bail!("No prebuilt query {} (0-{})", index, PREBUILT.len() - 1);
    };

    let models = load_models(settings, verbose);
    let config = guardrail_config(settings, &models);
    let sql = query.render(&config, Some(&models), &settings.warehouse.target())?;

    eprintln!("{}", query.label.bold());
    println!("{}", sql);
    Ok(())
}

/// Run command - execute with caching and audit logging
async fn run_command(settings: &Settings, sql: &str, question: &str, verbose: bool) -> Result<()> {
    let models = load_models(settings, verbose);
    let engine = open_engine(settings, verbose).await?;

    let runner = QueryRunner::new(
        engine,
        models,
        settings.warehouse.target(),
        &settings.guardrails,
    )
    .with_cache(QueryCache::from_settings(&settings.cache))
    .with_query_log(QueryLog::from_settings(&settings.logging));

    let outcome = runner.run(sql, question).await?;
    print_outcome(&outcome);
    Ok(())
}

async fn open_engine(settings: &Settings, verbose: bool) -> Result<Box<dyn QueryEngine>> {
    match settings.warehouse.default_engine {
        Engine::DuckDb => {
            let engine = DuckDbEngine::from_settings(&settings.duckdb)?;
            if verbose {
                eprintln!(
                    "{} {}{}",
                    "Running on".cyan(),
                    engine.path().display(),
                    if engine.read_only() { " (read-only)" } else { "" }
                );
            }
            Ok(Box::new(engine))
        }
        Engine::BigQuery => {
            let engine = BigQueryEngine::from_settings(&settings.warehouse).await?;
            if verbose {
                eprintln!(
                    "{} {} (max {} bytes billed)",
                    "Running on project".cyan(),
                    engine.project_id(),
                    engine.max_bytes_billed()
                );
            }
            Ok(Box::new(engine))
        }
    }
}

fn print_outcome(outcome: &RunOutcome) {
    println!("{}", outcome.columns.join("\t").bold());
    for row in &outcome.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|value| match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }

    eprintln!();
    if outcome.truncated() {
        eprintln!(
            "{} showing {} of {} rows",
            "⚠".yellow(),
            outcome.rows.len(),
            outcome.total_rows
        );
    } else {
        eprintln!("{} rows", outcome.total_rows);
    }
    if let Some(bytes) = outcome.stats.bq_est_bytes {
        eprintln!("Estimated bytes scanned: {}", bytes);
    }
    eprintln!(
        "Latency: {:.2} ms{}",
        outcome.latency_ms,
        if outcome.cache_hit { " (cached)" } else { "" }
    );
}
