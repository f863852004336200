use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use ustmatch::config::Config;
use ustmatch::error::MatchError;
use ustmatch::output::OutputFormat;
use ustmatch::pattern::{JsonPatternSerializer, PatternLibrary};
use ustmatch::ust::Language;
use ustmatch::workflow::{CancellationToken, Stage};
use ustmatch::RunOptions;

#[derive(Parser)]
#[command(
    name = "ustmatch",
    about = "Structural pattern matching over a unified syntax tree",
    version,
    author
)]
struct Cli {
    /// Log debug output (overridden by RUST_LOG)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match patterns against a file or directory
    Scan(ScanArgs),

    /// Compile the pattern library and report errors
    CheckPatterns {
        /// JSON pattern file (defaults to the built-in library)
        #[arg(long, short = 'p')]
        patterns: Option<PathBuf>,

        /// Config file path
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// List the patterns of a library
    ListPatterns {
        /// JSON pattern file (defaults to the built-in library)
        #[arg(long, short = 'p')]
        patterns: Option<PathBuf>,

        /// Output format (table, json)
        #[arg(long, short = 'f', default_value = "table")]
        format: String,
    },

    /// Generate a starter .ustmatch.toml config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "ustmatch=debug" } else { "ustmatch=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Cancel `token` on the first Ctrl-C. Files already in flight finish their
/// current stage and the partial result is still reported.
fn cancel_on_ctrl_c(token: CancellationToken) {
    let spawned = std::thread::Builder::new()
        .name("ustmatch-ctrl-c".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::warn!(error = %e, "ctrl-c handler unavailable");
                    return;
                }
            };
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                eprintln!("\nInterrupted, stopping after the current stage");
                token.cancel();
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "ctrl-c handler unavailable");
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Scan(args) => cmd_scan(args),
        Commands::CheckPatterns { patterns, config } => cmd_check_patterns(patterns, config),
        Commands::ListPatterns { patterns, format } => cmd_list_patterns(patterns, format),
        Commands::Init { force } => cmd_init(force),
    };

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

#[derive(Args)]
struct ScanArgs {
    /// File or directory to scan
    #[arg(default_value = ".")]
    path: PathBuf,

    /// JSON pattern file (defaults to the built-in library)
    #[arg(long, short = 'p')]
    patterns: Option<PathBuf>,

    /// Last stage to run (read, parse, convert, preprocess, match, patterns)
    #[arg(long)]
    stage: Option<String>,

    /// First stage to run; preprocess or match resume from tree dumps
    #[arg(long)]
    start_stage: Option<String>,

    /// Worker threads (0 = one per core)
    #[arg(long, short = 't')]
    threads: Option<usize>,

    /// Languages to analyze, comma separated
    #[arg(long, short = 'l', value_delimiter = ',')]
    languages: Vec<String>,

    /// Output format (console, json, sarif)
    #[arg(long, short = 'f', default_value = "console")]
    format: String,

    /// Write output to file instead of stdout
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Config file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Write converted trees as JSON into this directory
    #[arg(long)]
    dump_dir: Option<PathBuf>,
}

fn parse_stage(value: Option<String>) -> Result<Option<Stage>, MatchError> {
    value
        .map(|s| Stage::from_str_lenient(&s).ok_or_else(|| MatchError::Config(format!("unknown stage: {s}"))))
        .transpose()
}

fn cmd_scan(args: ScanArgs) -> Result<i32, MatchError> {
    let format = OutputFormat::from_str_lenient(&args.format).unwrap_or_else(|| {
        eprintln!("Warning: unknown format '{}', using console", args.format);
        OutputFormat::Console
    });

    let languages = args
        .languages
        .iter()
        .map(|name| {
            Language::from_str_lenient(name)
                .ok_or_else(|| MatchError::Config(format!("unknown language: {name}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let options = RunOptions {
        config_path: args.config,
        patterns_path: args.patterns,
        stage: parse_stage(args.stage)?,
        start_stage: parse_stage(args.start_stage)?,
        threads: args.threads,
        languages,
        dump_dir: args.dump_dir,
    };

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let result = ustmatch::run_with_cancellation(&args.path, &options, &cancel)?;
    let target_name = args
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scan".into());
    let rendered = ustmatch::render_report(&result, format, &target_name)?;

    match args.output {
        Some(out) => std::fs::write(&out, &rendered)?,
        None => print!("{}", rendered),
    }

    // Exit code: 130 = cancelled, 1 = matches found, 0 = clean
    Ok(if result.is_cancelled() {
        MatchError::Cancelled.exit_code()
    } else if result.matches().is_empty() {
        0
    } else {
        1
    })
}

fn cmd_check_patterns(patterns: Option<PathBuf>, config: Option<PathBuf>) -> Result<i32, MatchError> {
    let config = match config {
        Some(path) => Config::load(&path)?,
        None => Config::load(&PathBuf::from(".ustmatch.toml"))?,
    };
    let result = ustmatch::check_patterns(patterns.as_deref(), &config)?;
    println!(
        "{} pattern(s) compiled, {} error(s)",
        result.pattern_count(),
        result.error_count()
    );
    Ok(if result.error_count() == 0 { 0 } else { 1 })
}

fn cmd_list_patterns(patterns: Option<PathBuf>, format_str: String) -> Result<i32, MatchError> {
    let repository = ustmatch::patterns_repository(patterns.as_deref(), &Default::default())?;
    let (library, errors) = PatternLibrary::compile(&repository.get_all()?);
    for error in &errors {
        eprintln!("Warning: {error}");
    }

    match format_str.as_str() {
        "json" => {
            let dtos = library.to_dtos(&JsonPatternSerializer::default())?;
            let json = serde_json::to_string_pretty(&dtos)?;
            println!("{}", json);
        }
        _ => {
            println!("{:<24} {:<34} {:<10} DESCRIPTION", "KEY", "PATTERN", "LANGUAGES");
            println!("{}", "-".repeat(96));
            for pattern in library.iter() {
                let languages: Vec<String> = pattern.languages().iter().map(|l| l.to_string()).collect();
                let rendered = pattern.node.to_string();
                let rendered = if rendered.chars().count() > 32 {
                    format!("{}..", rendered.chars().take(30).collect::<String>())
                } else {
                    rendered
                };
                println!(
                    "{:<24} {:<34} {:<10} {}",
                    pattern.key,
                    rendered,
                    languages.join(","),
                    pattern.description,
                );
            }
        }
    }

    Ok(0)
}

fn cmd_init(force: bool) -> Result<i32, MatchError> {
    let path = PathBuf::from(".ustmatch.toml");

    if path.exists() && !force {
        eprintln!(".ustmatch.toml already exists. Use --force to overwrite.");
        return Ok(1);
    }

    std::fs::write(&path, Config::starter_toml())?;
    println!("Created .ustmatch.toml");

    Ok(0)
}
