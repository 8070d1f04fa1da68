//! Lumen CLI - run, check, and replay declarative AI flows

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use lumen::error::{EngineError, FixSuggestion};
use lumen::{check_program, ir, replay, AppConfig, Engine};

#[derive(Parser)]
#[command(name = "lumen")]
#[command(about = "Lumen - flow execution engine for declarative AI apps")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow from a lowered app file
    Run {
        /// Path to the .lumen.yaml app file
        file: PathBuf,

        /// Flow to run (defaults to the first flow in the file)
        #[arg(short, long)]
        flow: Option<String>,

        /// JSON input passed to the flow
        #[arg(short, long)]
        input: Option<String>,

        /// Persist the explain log for later replay
        #[arg(long)]
        explain: bool,
    },

    /// Statically check a program's concurrency contracts
    Check {
        /// Path to the .lumen.yaml app file
        file: PathBuf,

        /// Emit findings as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify and summarize a persisted explain log
    Replay {
        /// Project root containing .lumen/ (defaults to the current dir)
        app: Option<PathBuf>,

        /// Explicit log path instead of the project default
        #[arg(long)]
        log: Option<PathBuf>,

        /// Emit the summary as JSON
        #[arg(long)]
        json: bool,

        /// Skip hash verification
        #[arg(long)]
        no_verify: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            file,
            flow,
            input,
            explain,
        } => run_flow(&file, flow, input, explain),
        Commands::Check { file, json } => check_file(&file, json),
        Commands::Replay {
            app,
            log,
            json,
            no_verify,
        } => replay_log(app, log, json, no_verify),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn load_program(file: &Path) -> Result<ir::Program, EngineError> {
    let yaml = std::fs::read_to_string(file)?;
    ir::parse_program(&yaml)
}

fn project_root_of(file: &Path) -> PathBuf {
    file.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn run_flow(
    file: &Path,
    flow: Option<String>,
    input: Option<String>,
    explain: bool,
) -> Result<(), EngineError> {
    let program = load_program(file)?;
    let project_root = project_root_of(file);
    let config = AppConfig::load(&project_root)?;

    let flow_name = match flow {
        Some(name) => name,
        None => program
            .flows
            .first()
            .map(|f| f.name.clone())
            .ok_or_else(|| EngineError::Config {
                message: format!("{} declares no flows", file.display()),
            })?,
    };

    let input_value: Value = match input {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| EngineError::Config {
            message: format!("--input is not valid JSON: {e}"),
        })?,
        None => Value::Null,
    };

    println!(
        "{} Running flow: {}",
        "→".cyan(),
        flow_name.cyan().bold()
    );

    let engine = Engine::new(program, config, project_root);
    let result = engine.run_flow(&flow_name, input_value, explain)?;

    println!("{}", "Output:".cyan().bold());
    println!("{}", serde_json::to_string_pretty(&result.value).unwrap_or_default());
    if explain {
        if let Some(path) = &result.explain_path {
            println!(
                "{} Explain log: {} (replay hash {})",
                "✓".green(),
                path.display(),
                &result.replay_hash[..12.min(result.replay_hash.len())]
            );
        }
    }
    Ok(())
}

fn check_file(file: &Path, as_json: bool) -> Result<(), EngineError> {
    let program = load_program(file)?;
    let violations = check_program(&program);

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&violations).unwrap_or_default()
        );
    } else if violations.is_empty() {
        println!(
            "{} Program '{}' passes all concurrency checks",
            "✓".green(),
            program.name
        );
    } else {
        for v in &violations {
            println!(
                "{} {}:{}:{} {}",
                "✗".red(),
                v.flow_name.bold(),
                v.line,
                v.column,
                v.reason
            );
            println!("  {} {}", "Fix:".yellow(), v.suggestion);
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Execution(format!(
            "{} concurrency finding{}",
            violations.len(),
            if violations.len() == 1 { "" } else { "s" }
        )))
    }
}

fn replay_log(
    app: Option<PathBuf>,
    log: Option<PathBuf>,
    as_json: bool,
    no_verify: bool,
) -> Result<(), EngineError> {
    let log_path = match log {
        Some(path) => path,
        None => {
            let root = app.unwrap_or_else(|| PathBuf::from("."));
            let config = AppConfig::load(&root)?;
            replay::default_log_path(&root.join(&config.explain_dir))
        }
    };

    let summary = replay::replay(&log_path, !no_verify)?;

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary.to_json()).unwrap_or_default()
        );
        return Ok(());
    }

    println!("{} Flow: {}", "→".cyan(), summary.flow_name.cyan().bold());
    println!("  Events: {}", summary.entry_count);
    let verified = if summary.hash_verified {
        "yes".green()
    } else {
        "no".yellow()
    };
    println!("  Hash verified: {verified}");
    if !summary.seeds.is_empty() {
        println!("  Seeds: {}", summary.seeds.join(", "));
    }
    for event in &summary.retrieval_events {
        println!(
            "  Retrieval #{}: {} ({} selected)",
            event.event_index, event.modality, event.selected
        );
    }
    Ok(())
}
