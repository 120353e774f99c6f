use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use depgraph_cache::{AnalysisCacheOptions, PersistentAnalysisCache};
use depgraph_core::{init_tracing, ConfigManager, FsStat, ParserConfig};
use depgraph_graph::{IndexSnapshot, ReverseIndex};
use depgraph_parser::{Language, ParserFactory};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "depgraph")]
#[command(about = "DepGraph CLI - inspect parsers and persisted dependency data", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Workspace root used to locate configuration
    #[arg(long, global = true, env = "DEPGRAPH_ROOT", default_value = ".")]
    root: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a source file and print its syntax tree
    Parse {
        file: PathBuf,

        /// Language override (rust, python, javascript, typescript, tsx, go)
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Summarize a persisted reverse-index snapshot
    InspectIndex {
        snapshot: PathBuf,

        /// Also list callers of this target symbol
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Summarize a persisted analysis cache
    InspectCache { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::load(&cli.root).context("Failed to load configuration")?;
    let mut config = manager.into_config();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_tracing(&config.logging).context("Failed to initialize logging")?;

    let result = match &cli.command {
        Commands::Parse { file, language } => {
            execute_parse(file, language.as_deref(), &config.parser).await
        }
        Commands::InspectIndex { snapshot, target } => {
            execute_inspect_index(snapshot, target.as_deref()).await
        }
        Commands::InspectCache { file } => execute_inspect_cache(file).await,
    };

    match result {
        Ok(output) => {
            print_output(&cli.output, &output)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

async fn execute_parse(
    file: &Path,
    language: Option<&str>,
    parser_config: &ParserConfig,
) -> Result<serde_json::Value> {
    let factory = ParserFactory::shared();
    factory
        .init(parser_config.runtime_module_path.as_deref())
        .await
        .context("Failed to initialize parser runtime")?;

    let language = match language {
        Some(name) => match Language::from_name(name) {
            Some(lang) => lang,
            None => bail!("unsupported language: {}", name),
        },
        None => match factory.loader().registry().detect_language(file) {
            Some(lang) => lang,
            None => bail!("cannot detect language of {}", file.display()),
        },
    };

    let source = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let grammar = parser_config.grammar_path(language.name());
    let engine = factory.get_parser(language.name(), grammar.as_deref()).await?;
    let tree = engine.parse(&source)?;
    let root = tree.root_node();
    debug!("Parsed {} ({} bytes)", file.display(), source.len());

    Ok(json!({
        "file": file.display().to_string(),
        "language": language.name(),
        "rootKind": root.kind(),
        "hasError": root.has_error(),
        "tree": root.to_sexp(),
    }))
}

async fn execute_inspect_index(snapshot: &Path, target: Option<&str>) -> Result<serde_json::Value> {
    let raw = tokio::fs::read_to_string(snapshot)
        .await
        .with_context(|| format!("Failed to read {}", snapshot.display()))?;
    let parsed: IndexSnapshot =
        serde_json::from_str(&raw).context("Snapshot is not a reverse-index file")?;
    let version = parsed.version;

    let mut index = ReverseIndex::new(&parsed.root_dir);
    if !index.deserialize(parsed) {
        bail!("unsupported snapshot version {}", version);
    }

    let stats = index.get_stats();
    let mut output = json!({
        "rootDir": index.root_dir(),
        "version": version,
        "targetSymbols": stats.total_target_symbols,
        "callerEntries": stats.total_caller_entries,
        "sourceFiles": stats.total_source_files,
        "lastUpdated": stats.last_updated_at().map(|t| t.to_rfc3339()),
    });

    if let Some(target) = target {
        output["callers"] = serde_json::to_value(index.get_callers(target))?;
    }
    Ok(output)
}

async fn execute_inspect_cache(file: &Path) -> Result<serde_json::Value> {
    if !file.exists() {
        bail!("{} does not exist", file.display());
    }

    let options = AnalysisCacheOptions {
        enabled: true,
        max_entries: usize::MAX,
        cache_file: Some(file.to_path_buf()),
    };
    let mut cache = PersistentAnalysisCache::new(options, Arc::new(FsStat));
    if !cache.load().await {
        bail!("{} is not a readable analysis cache", file.display());
    }

    let entries: Vec<serde_json::Value> = cache
        .entries()
        .map(|e| {
            json!({
                "sourceFile": e.source_file,
                "targets": e.targets.len(),
                "storedAt": chrono::DateTime::from_timestamp_millis(e.timestamp)
                    .map(|t| t.to_rfc3339()),
            })
        })
        .collect();

    Ok(json!({
        "file": file.display().to_string(),
        "entries": entries.len(),
        "sources": entries,
    }))
}

fn print_output(format: &OutputFormat, value: &serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Pretty => print_pretty(value)?,
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    serde_json::Value::String(s) => println!("{}: {}", key_colored, s.green()),
                    serde_json::Value::Number(n) => {
                        println!("{}: {}", key_colored, n.to_string().yellow())
                    }
                    serde_json::Value::Bool(b) => {
                        let val_colored = if *b { "true".green() } else { "false".red() };
                        println!("{}: {}", key_colored, val_colored);
                    }
                    serde_json::Value::Array(arr) => {
                        println!("{}:", key_colored);
                        for item in arr {
                            println!("  {}", item);
                        }
                    }
                    _ => println!("{}: {}", key_colored, val),
                }
            }
        }
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
