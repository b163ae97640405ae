//! Binary entry point for the strata bundle administration CLI.
#![forbid(unsafe_code)]

#[path = "cli/config.rs"]
mod config;
#[path = "cli/ui.rs"]
mod ui;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use strata::admin::{self, AuditLevel, AuditOptions, AuditReport, PruneReport, StatsReport};
use strata::check::CheckReport;
use strata::deps::DependencyLoader;
use strata::logging::init_logging;
use strata::migrate::Migrator;
use strata::schema::SchemaRegistry;
use strata::types::BundleId;

use config::{CliConfig, Profile, ProfileUpdate};
use ui::{format_duration, Theme, Ui};

const DEFAULT_LOG_FILTER: &str = "warn";
const MIGRATION_NOTE: &str = "Bundles are read at the schema's version. The CLI registers no \
migration steps, so older bundles are reported as no_migration_path. Call \
strata::admin::audit with a populated Migrator to check a historical corpus.";

#[derive(Parser, Debug)]
#[command(
    name = "strata",
    version,
    about = "Audit and maintain stores of model bundles",
    after_help = MIGRATION_NOTE,
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "STRATA_CONFIG",
        value_name = "FILE",
        help = "Path to the CLI config file"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_name = "NAME", help = "Config profile to use")]
    profile: Option<String>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        value_name = "FILTER",
        help = "Tracing filter, e.g. info or strata::deps=debug"
    )]
    log: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = Theme::Auto)]
    theme: Theme,

    #[arg(short, long, global = true, help = "Plain output without spinners")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct StoreArg {
    #[arg(
        value_name = "STORE",
        help = "Bundle directory (defaults to the profile or config store)"
    )]
    store: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SchemaArg {
    #[arg(long, value_name = "FILE", help = "Schema document, JSON or TOML")]
    schema: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Check every bundle in a store", after_help = MIGRATION_NOTE)]
    Audit {
        #[command(flatten)]
        store: StoreArg,
        #[command(flatten)]
        schema: SchemaArg,
        #[arg(long, value_enum, help = "Audit level")]
        level: Option<LevelArg>,
        #[arg(long, help = "Bundles checked concurrently")]
        jobs: Option<usize>,
        #[arg(long, help = "Findings kept per bundle")]
        max_findings: Option<usize>,
    },

    #[command(about = "Check a single bundle", after_help = MIGRATION_NOTE)]
    Verify {
        #[arg(value_name = "ID")]
        id: String,
        #[command(flatten)]
        store: StoreArg,
        #[command(flatten)]
        schema: SchemaArg,
        #[arg(long, value_enum, help = "Audit level")]
        level: Option<LevelArg>,
    },

    #[command(about = "Print statistics about a stored bundle")]
    Stats {
        #[arg(value_name = "ID")]
        id: String,
        #[command(flatten)]
        store: StoreArg,
    },

    #[command(
        about = "Print the order in which a bundle and its dependencies load",
        after_help = MIGRATION_NOTE
    )]
    Deps {
        #[arg(value_name = "ID")]
        id: String,
        #[command(flatten)]
        store: StoreArg,
        #[command(flatten)]
        schema: SchemaArg,
    },

    #[command(about = "Remove unreachable instances and unused dependencies")]
    Prune {
        #[arg(value_name = "ID")]
        id: String,
        #[command(flatten)]
        store: StoreArg,
        #[arg(long, help = "Report what would change without writing")]
        dry_run: bool,
    },

    #[command(subcommand, about = "Inspect or edit the CLI config")]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    #[command(about = "Print the effective config")]
    Show,

    #[command(about = "Set the default profile, or clear it when no name is given")]
    SetDefault {
        #[arg(value_name = "NAME")]
        name: Option<String>,
    },

    #[command(about = "Create or update a profile")]
    Upsert {
        #[arg(value_name = "NAME")]
        name: String,
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        schema: Option<PathBuf>,
        #[arg(long)]
        max_findings: Option<usize>,
        #[arg(long, value_enum)]
        level: Option<LevelArg>,
        #[arg(long)]
        jobs: Option<usize>,
    },

    #[command(about = "Delete a profile")]
    Delete {
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LevelArg {
    Fast,
    Full,
}

impl From<LevelArg> for AuditLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Fast => AuditLevel::Fast,
            LevelArg::Full => AuditLevel::Full,
        }
    }
}

/// Config plus the selected profile, used to fill in omitted arguments.
struct Context {
    config: CliConfig,
    profile: Option<Profile>,
}

impl Context {
    fn new(config: CliConfig, requested: Option<&str>) -> Result<Self, Box<dyn Error>> {
        let name = requested.or_else(|| config.default_profile_name());
        let profile = match name {
            Some(name) => Some(config.profile(name)?.clone()),
            None => None,
        };
        Ok(Self { config, profile })
    }

    fn store(&self, explicit: Option<PathBuf>) -> Result<PathBuf, Box<dyn Error>> {
        explicit
            .or_else(|| self.profile.as_ref().and_then(|p| p.store.clone()))
            .or_else(|| self.config.default_store().cloned())
            .ok_or_else(|| "no bundle store given; pass STORE or configure store.default".into())
    }

    fn schema(&self, explicit: Option<PathBuf>) -> Result<Arc<SchemaRegistry>, Box<dyn Error>> {
        let path = explicit
            .or_else(|| self.profile.as_ref().and_then(|p| p.schema.clone()))
            .or_else(|| self.config.schema().cloned())
            .ok_or("no schema given; pass --schema or configure one")?;
        Ok(Arc::new(SchemaRegistry::load(&path)?))
    }

    fn audit_options(
        &self,
        level: Option<LevelArg>,
        jobs: Option<usize>,
        max_findings: Option<usize>,
    ) -> AuditOptions {
        let mut opts = AuditOptions::default();
        let profile = self.profile.as_ref();
        if let Some(level) = level
            .map(AuditLevel::from)
            .or_else(|| profile.and_then(|p| p.level))
        {
            opts.level = level;
        }
        if let Some(jobs) = jobs.or_else(|| profile.and_then(|p| p.jobs)) {
            opts.jobs = jobs;
        }
        if let Some(max) = max_findings.or_else(|| profile.and_then(|p| p.max_findings)) {
            opts.max_findings = Some(max);
        }
        opts
    }
}

/// Migrator for bundles already at the schema's version. See [`MIGRATION_NOTE`].
fn migrator_for(registry: &SchemaRegistry) -> Migrator {
    Migrator::new(registry.version())
}

#[derive(Serialize)]
struct DepsOutput {
    bundle_id: BundleId,
    order: Vec<BundleId>,
}

#[derive(Serialize)]
struct ConfigOutput<'a> {
    path: Option<&'a Path>,
    default_profile: Option<&'a str>,
    store: Option<&'a PathBuf>,
    schema: Option<&'a PathBuf>,
    log_filter: Option<&'a str>,
    profiles: Vec<&'a Profile>,
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when a check ran but found errors.
async fn run() -> Result<bool, Box<dyn Error>> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.clone())?;

    let filter = cli
        .log
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .or_else(|| config.log_filter().map(str::to_string))
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    init_logging(&filter)?;

    let ui = Ui::new(cli.theme, cli.quiet || cli.format == OutputFormat::Json);
    match cli.command {
        Command::Config(cmd) => {
            run_config(cmd, config, cli.format, &ui)?;
            Ok(true)
        }
        command => {
            let ctx = Context::new(config, cli.profile.as_deref())?;
            run_command(command, &ctx, cli.format, &ui).await
        }
    }
}

async fn run_command(
    command: Command,
    ctx: &Context,
    format: OutputFormat,
    ui: &Ui,
) -> Result<bool, Box<dyn Error>> {
    match command {
        Command::Audit {
            store,
            schema,
            level,
            jobs,
            max_findings,
        } => {
            let store_path = ctx.store(store.store)?;
            let store = admin::open_store(&store_path)?;
            let registry = ctx.schema(schema.schema)?;
            let migrator = Arc::new(migrator_for(&registry));
            let opts = ctx.audit_options(level, jobs, max_findings);

            let task = ui.task(format!("Auditing {}", store_path.display()));
            let mut done = 0usize;
            let report = admin::audit(Arc::new(store), registry, migrator, opts, |id, _| {
                done += 1;
                task.progress(format_args!("{done} checked, last {id}"));
            })
            .await?;
            let elapsed = task.finish();
            emit(format, &report, || {
                print_audit_text(ui, &report, &format_duration(elapsed))
            })?;
            Ok(report.success)
        }
        Command::Verify {
            id,
            store,
            schema,
            level,
        } => {
            let store = admin::open_store(ctx.store(store.store)?)?;
            let registry = ctx.schema(schema.schema)?;
            let migrator = migrator_for(&registry);
            let opts = ctx.audit_options(level, None, None);
            let report = admin::verify(&store, &registry, &migrator, &BundleId::new(id), &opts);
            emit(format, &report, || print_verify_text(ui, &report))?;
            Ok(report.success)
        }
        Command::Stats { id, store } => {
            let store = admin::open_store(ctx.store(store.store)?)?;
            let report = admin::stats(&store, &BundleId::new(id))?;
            emit(format, &report, || print_stats_text(ui, &report))?;
            Ok(true)
        }
        Command::Deps { id, store, schema } => {
            let store = admin::open_store(ctx.store(store.store)?)?;
            let registry = ctx.schema(schema.schema)?;
            let migrator = migrator_for(&registry);
            let bundle_id = BundleId::new(id);
            let plan = DependencyLoader::new(&store, &migrator).plan(&bundle_id)?;
            let output = DepsOutput {
                bundle_id,
                order: plan.order().to_vec(),
            };
            emit(format, &output, || {
                ui.list(
                    &format!("Load order for {}", output.bundle_id),
                    output
                        .order
                        .iter()
                        .enumerate()
                        .map(|(idx, id)| format!("{}. {id}", idx + 1)),
                )
            })?;
            Ok(true)
        }
        Command::Prune { id, store, dry_run } => {
            let store = admin::open_store(ctx.store(store.store)?)?;
            let report = admin::prune(&store, &BundleId::new(id), dry_run)?;
            emit(format, &report, || print_prune_text(ui, &report))?;
            Ok(true)
        }
        Command::Config(_) => Ok(true),
    }
}

fn run_config(
    cmd: ConfigCommand,
    mut config: CliConfig,
    format: OutputFormat,
    ui: &Ui,
) -> Result<(), Box<dyn Error>> {
    match cmd {
        ConfigCommand::Show => {
            let output = ConfigOutput {
                path: config.path(),
                default_profile: config.default_profile_name(),
                store: config.default_store(),
                schema: config.schema(),
                log_filter: config.log_filter(),
                profiles: config.profiles().collect(),
            };
            emit(format, &output, || print_config_text(ui, &output))?;
        }
        ConfigCommand::SetDefault { name } => {
            config.set_default_profile(name.as_deref())?;
            let path = config.persist()?;
            match name {
                Some(name) => ui.success(&format!("Default profile set to {name} in {}", path.display())),
                None => ui.success(&format!("Default profile cleared in {}", path.display())),
            }
        }
        ConfigCommand::Upsert {
            name,
            store,
            schema,
            max_findings,
            level,
            jobs,
        } => {
            let update = ProfileUpdate {
                store,
                schema,
                max_findings,
                level: level.map(AuditLevel::from),
                jobs,
            };
            config.upsert_profile(&name, update)?;
            let path = config.persist()?;
            ui.success(&format!("Profile {name} saved to {}", path.display()));
        }
        ConfigCommand::Delete { name } => {
            config.delete_profile(&name)?;
            let path = config.persist()?;
            ui.success(&format!("Profile {name} removed from {}", path.display()));
        }
    }
    Ok(())
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_audit_text(ui: &Ui, report: &AuditReport, elapsed: &str) {
    ui.section(
        "Audit",
        [
            ("level", report.level.to_string()),
            ("bundles", report.totals.bundles.to_string()),
            ("passed", report.totals.passed.to_string()),
            ("failed", report.totals.failed.to_string()),
            ("errors", report.totals.errors.to_string()),
            ("warnings", report.totals.warnings.to_string()),
            ("elapsed", elapsed.to_string()),
        ],
    );
    for (id, bundle) in &report.bundles {
        if bundle.findings.is_empty() {
            continue;
        }
        ui.spacer();
        ui.findings(&format!("Bundle {id}"), &bundle.findings);
        if bundle.truncated > 0 {
            ui.warn(&format!("{} more findings in {id} not shown", bundle.truncated));
        }
    }
    ui.spacer();
    if report.success {
        ui.success("All bundles passed");
    } else {
        ui.warn(&format!("{} bundle(s) failed", report.totals.failed));
    }
}

fn print_verify_text(ui: &Ui, report: &CheckReport) {
    let id = report
        .bundle_id
        .as_ref()
        .map(BundleId::to_string)
        .unwrap_or_default();
    ui.section(
        &format!("Verify {id}"),
        [
            ("success", report.success.to_string()),
            ("instances", report.counts.instances.to_string()),
            ("references", report.counts.references.to_string()),
            ("cross_references", report.counts.cross_references.to_string()),
            ("errors", report.counts.errors.to_string()),
            ("warnings", report.counts.warnings.to_string()),
        ],
    );
    ui.findings("Findings", &report.findings);
}

fn print_stats_text(ui: &Ui, report: &StatsReport) {
    ui.section(
        &format!("Bundle {}", report.bundle_id),
        [
            ("version", report.version.to_string()),
            ("instances", report.instances.to_string()),
            ("roots", report.roots.to_string()),
            ("unreachable", report.unreachable.to_string()),
            ("local_refs", report.references.local.to_string()),
            ("cross_refs", report.references.cross.to_string()),
            ("size_bytes", report.size_bytes.to_string()),
            ("digest", report.digest.clone()),
        ],
    );
    ui.list(
        "Classes",
        report
            .classes
            .iter()
            .map(|(class, count)| format!("{class}: {count}")),
    );
    ui.list(
        "Dependencies",
        report.deps.iter().map(|dep| {
            let refs = report.references.by_bundle.get(dep).copied().unwrap_or(0);
            format!("{dep} ({refs} refs)")
        }),
    );
}

fn print_prune_text(ui: &Ui, report: &PruneReport) {
    let verb = if report.dry_run { "Would remove" } else { "Removed" };
    ui.info(&format!(
        "{verb} {} instance(s) from {}, {} left",
        report.removed, report.bundle_id, report.remaining
    ));
    ui.list(
        "Dropped dependencies",
        report.deps_removed.iter().map(BundleId::to_string),
    );
}

fn print_config_text(ui: &Ui, output: &ConfigOutput<'_>) {
    let show = |path: Option<&PathBuf>| {
        path.map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    ui.section(
        "Config",
        [
            (
                "path",
                output
                    .path
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            ("default_profile", output.default_profile.unwrap_or("-").to_string()),
            ("store", show(output.store)),
            ("schema", show(output.schema)),
            ("log_filter", output.log_filter.unwrap_or("-").to_string()),
        ],
    );
    for profile in &output.profiles {
        ui.section(
            &format!("Profile {}", profile.name),
            [
                ("store", show(profile.store.as_ref())),
                ("schema", show(profile.schema.as_ref())),
                (
                    "level",
                    profile
                        .level
                        .map(|l| l.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
                (
                    "jobs",
                    profile
                        .jobs
                        .map(|j| j.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
                (
                    "max_findings",
                    profile
                        .max_findings
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
            ],
        );
    }
}
