use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use datacmp_common::{
    default_plugin_cache_dir, load_config, AppConfig, CollisionPolicy, ComparisonRow, RowStatus,
    Side,
};
use datacmp_core::registry::ModuleInfo;
use datacmp_core::{
    ComparisonEngine, ComparisonReport, EngineOptions, ModuleRegistry, PluginLoader, SchemeDocument,
};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status when the run succeeded and found differences
const EXIT_DIFFERENCES: i32 = 2;

#[derive(Parser)]
#[command(name = "datacmp")]
#[command(author = "DataCmp Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Key-based comparison of two tabular data sources", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a saved comparison scheme
    Compare {
        /// Scheme file (TOML)
        scheme: PathBuf,

        /// Extra plugin directories (can be specified multiple times)
        #[arg(short, long)]
        plugins: Vec<PathBuf>,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,

        /// Show only rows with differences
        #[arg(short = 'd', long)]
        diff_only: bool,

        /// Disable ANSI colors in output
        #[arg(long)]
        no_color: bool,

        /// Upper bound in seconds for each source fetch
        #[arg(long)]
        fetch_timeout: Option<u64>,

        /// What to do when a plugin reuses a registered module name
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,
    },

    /// List the data sources and comparators available
    Modules {
        /// Extra plugin directories (can be specified multiple times)
        #[arg(short, long)]
        plugins: Vec<PathBuf>,

        /// Output the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the column names one side of a scheme reports
    Columns {
        /// Scheme file (TOML)
        scheme: PathBuf,

        #[arg(long, value_enum, default_value = "primary")]
        side: SideArg,

        /// Extra plugin directories (can be specified multiple times)
        #[arg(short, long)]
        plugins: Vec<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Override,
    Reject,
}

impl From<PolicyArg> for CollisionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Override => CollisionPolicy::Override,
            PolicyArg::Reject => CollisionPolicy::Reject,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SideArg {
    Primary,
    Shadow,
}

impl From<SideArg> for Side {
    fn from(arg: SideArg) -> Self {
        match arg {
            SideArg::Primary => Side::Primary,
            SideArg::Shadow => Side::Shadow,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing to stderr (so JSON output can go cleanly to stdout)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Compare {
            scheme,
            plugins,
            json,
            diff_only,
            no_color,
            fetch_timeout,
            policy,
        } => {
            run_compare(CompareArgs {
                scheme,
                plugins,
                json,
                diff_only,
                no_color,
                fetch_timeout,
                policy,
            })
            .await
        }
        Commands::Modules { plugins, json } => run_modules(plugins, json),
        Commands::Columns {
            scheme,
            side,
            plugins,
        } => run_columns(scheme, side.into(), plugins).await,
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

struct CompareArgs {
    scheme: PathBuf,
    plugins: Vec<PathBuf>,
    json: bool,
    diff_only: bool,
    no_color: bool,
    fetch_timeout: Option<u64>,
    policy: Option<PolicyArg>,
}

/// Registry with built-ins and every configured plugin directory loaded
fn prepare_registry(
    config: &AppConfig,
    config_path: &Path,
    extra_dirs: Vec<PathBuf>,
) -> anyhow::Result<(&'static ModuleRegistry, Vec<(PathBuf, String)>)> {
    let registry = ModuleRegistry::init();
    registry.set_policy(config.collision_policy);

    let mut dirs = config.plugin_dirs.clone();
    dirs.extend(extra_dirs);
    if dirs.is_empty() {
        return Ok((registry, Vec::new()));
    }

    let cache_dir = match config.plugin_cache_dir.clone() {
        Some(path) => path,
        None => default_plugin_cache_dir(config.portable_mode, config_path)?,
    };
    info!("Using plugin cache directory: {}", cache_dir.display());

    let report = PluginLoader::new(cache_dir).discover_all(&dirs, registry);
    let skipped = report
        .skipped
        .into_iter()
        .map(|s| (s.archive, s.reason))
        .collect();
    Ok((registry, skipped))
}

fn cancel_on_ctrl_c() -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    (cancel, handle)
}

async fn run_compare(args: CompareArgs) -> anyhow::Result<i32> {
    let loaded = load_config(false)?;
    let mut config = loaded.config;
    if let Some(policy) = args.policy {
        config.collision_policy = policy.into();
    }
    if let Some(secs) = args.fetch_timeout {
        config.fetch_timeout_secs = secs;
    }

    let document = SchemeDocument::load(&args.scheme)
        .with_context(|| format!("Cannot load scheme {}", args.scheme.display()))?;
    let (registry, _) = prepare_registry(&config, &loaded.path, args.plugins)?;
    let scheme = document.resolve(registry)?;

    info!("Comparing:");
    info!("  Primary: {}", scheme.primary.describe());
    info!("  Shadow:  {}", scheme.shadow.describe());

    let engine = ComparisonEngine::new(EngineOptions::from_config(&config));
    let (cancel, ctrl_c) = cancel_on_ctrl_c();
    let result = engine.run(&scheme, &cancel).await;
    ctrl_c.abort();
    let report = result?;

    if args.json {
        let output = serde_json::to_string_pretty(&JsonReport::new(&report, args.diff_only))?;
        println!("{output}");
    } else {
        let use_color = !args.no_color && std::io::stdout().is_terminal();
        print_report(&report, args.diff_only, use_color);
    }

    Ok(if report.has_differences() { EXIT_DIFFERENCES } else { 0 })
}

fn run_modules(plugins: Vec<PathBuf>, json: bool) -> anyhow::Result<i32> {
    let loaded = load_config(false)?;
    let (registry, skipped) = prepare_registry(&loaded.config, &loaded.path, plugins)?;
    let modules = registry.list();

    if json {
        let listing = JsonModules {
            modules,
            skipped: skipped
                .into_iter()
                .map(|(archive, reason)| JsonSkipped {
                    archive: archive.display().to_string(),
                    reason,
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(0);
    }

    println!("{:<12} {:<24} {:<28} {}", "Group", "Name", "Origin", "Summary");
    println!("{}", "-".repeat(96));
    for module in &modules {
        println!(
            "{:<12} {:<24} {:<28} {}",
            module.group.to_string(),
            module.name,
            module.origin,
            module.summary
        );
    }
    for (archive, reason) in &skipped {
        println!("skipped {}: {}", archive.display(), reason);
    }
    Ok(0)
}

async fn run_columns(scheme: PathBuf, side: Side, plugins: Vec<PathBuf>) -> anyhow::Result<i32> {
    let loaded = load_config(false)?;
    let document = SchemeDocument::load(&scheme)
        .with_context(|| format!("Cannot load scheme {}", scheme.display()))?;
    let (registry, _) = prepare_registry(&loaded.config, &loaded.path, plugins)?;
    let source = registry
        .create_source(document.descriptor(side))
        .map_err(|e| e.on_side(side))?;

    let engine = ComparisonEngine::new(EngineOptions::from_config(&loaded.config));
    let (cancel, ctrl_c) = cancel_on_ctrl_c();
    let result = engine.column_names(source.as_ref(), side, &cancel).await;
    ctrl_c.abort();

    for name in result? {
        let code = source.key_to_code().iter().find(|(field, _)| *field == name.as_str());
        match code {
            Some((_, code)) => println!("{} -> {}", name, code),
            None => println!("{}", name),
        }
    }
    Ok(0)
}

fn status_symbol(status: RowStatus, different: bool) -> &'static str {
    match (status, different) {
        (RowStatus::Matched, false) => "==",
        (RowStatus::Matched, true) => "!=",
        (RowStatus::PrimaryOnly, _) => "<<",
        (RowStatus::ShadowOnly, _) => ">>",
    }
}

fn status_color(status: RowStatus, different: bool) -> &'static str {
    match (status, different) {
        (RowStatus::Matched, false) => "\x1b[32m", // Green
        (RowStatus::Matched, true) => "\x1b[31m",  // Red
        (RowStatus::PrimaryOnly, _) => "\x1b[33m", // Yellow
        (RowStatus::ShadowOnly, _) => "\x1b[34m",  // Blue
    }
}

fn print_report(report: &ComparisonReport, diff_only: bool, use_color: bool) {
    let width = 100;
    println!("\n{}", "=".repeat(width));
    if report.scheme.is_empty() {
        println!("Comparison Results");
    } else {
        println!("Comparison Results: {}", report.scheme);
    }
    println!("{}", "=".repeat(width));
    println!("      {}", report.columns.join(" | "));
    println!("{}", "-".repeat(width));

    for row in &report.rows {
        let different = row.cells.iter().any(|c| c.is_different);
        if diff_only && !row.has_differences() {
            continue;
        }
        let (color, reset) = if use_color {
            (status_color(row.status, different), "\x1b[0m")
        } else {
            ("", "")
        };
        println!(
            "{}  {}  {} {}",
            color,
            status_symbol(row.status, different),
            reset,
            render_cells(row)
        );
    }

    let summary = &report.summary;
    let mark = |text: &str, color: &str| {
        if use_color {
            format!("{}({}){}", color, text, "\x1b[0m")
        } else {
            format!("({})", text)
        }
    };
    println!("\n{}", "=".repeat(width));
    println!("Summary:");
    println!("  Total rows:      {}", summary.total);
    println!(
        "  Identical:       {} {}",
        summary.matched - summary.matched_with_differences,
        mark("==", "\x1b[32m")
    );
    println!("  Different:       {} {}", summary.matched_with_differences, mark("!=", "\x1b[31m"));
    println!("  Primary only:    {} {}", summary.primary_only, mark("<<", "\x1b[33m"));
    println!("  Shadow only:     {} {}", summary.shadow_only, mark(">>", "\x1b[34m"));
    println!("  Different cells: {}", summary.different_cells);
    if summary.comparator_errors > 0 {
        println!("  Comparator errors: {}", summary.comparator_errors);
    }
    println!("{}", "=".repeat(width));
}

fn render_cells(row: &ComparisonRow) -> String {
    row.cells
        .iter()
        .map(|cell| cell.display_value())
        .collect::<Vec<_>>()
        .join(" | ")
}

#[derive(Serialize)]
struct JsonReport<'a> {
    run_id: String,
    scheme: &'a str,
    columns: &'a [String],
    summary: &'a datacmp_core::ReportSummary,
    warnings: &'a [String],
    rows: Vec<&'a ComparisonRow>,
}

impl<'a> JsonReport<'a> {
    fn new(report: &'a ComparisonReport, diff_only: bool) -> Self {
        Self {
            run_id: report.run_id.to_string(),
            scheme: &report.scheme,
            columns: &report.columns,
            summary: &report.summary,
            warnings: &report.warnings,
            rows: report
                .rows
                .iter()
                .filter(|row| !diff_only || row.has_differences())
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct JsonModules {
    modules: Vec<ModuleInfo>,
    skipped: Vec<JsonSkipped>,
}

#[derive(Serialize)]
struct JsonSkipped {
    archive: String,
    reason: String,
}
