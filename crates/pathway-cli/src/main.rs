use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pathway_api::{PathwayApi, PathwayConfig};
use pathway_core::{
    mapping_table, AcademicLevel, DeliveryMode, FinancialSituation, RecommendationRequest,
    ResourceId, StudentProfile, SupportLevel, MAPPING_TABLE_VERSION,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "pw")]
#[command(about = "Pathway CLI")]
struct Cli {
    #[arg(long, default_value = "./pathway.sqlite3")]
    db: PathBuf,

    /// YAML file with `engine` and `training` settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log stage boundaries to stderr at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },
    Model {
        #[command(subcommand)]
        command: ModelCommand,
    },
    Recommend(Box<RecommendArgs>),
    /// Print the tier → ordinal tables the encoder uses.
    MappingTable,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Backup(DbBackupArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum CatalogCommand {
    Import(CatalogImportArgs),
    List(CatalogListArgs),
    /// Resources whose text most resembles one resource.
    Similar(CatalogSimilarArgs),
}

#[derive(Debug, Args)]
struct CatalogImportArgs {
    #[arg(long)]
    csv: PathBuf,
}

#[derive(Debug, Args)]
struct CatalogListArgs {
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct CatalogSimilarArgs {
    #[arg(long)]
    id: u32,
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

#[derive(Debug, Subcommand)]
enum ModelCommand {
    Train,
    Show,
    /// Score recommendations for a JSON array of profiles.
    Evaluate(ModelEvaluateArgs),
}

#[derive(Debug, Args)]
struct ModelEvaluateArgs {
    #[arg(long)]
    profiles: PathBuf,
    #[arg(long)]
    top_n: Option<usize>,
}

#[derive(Debug, Args)]
struct RecommendArgs {
    /// JSON profile file; the profile flags below are ignored when given.
    #[arg(long)]
    profile: Option<PathBuf>,
    #[arg(long)]
    top_n: Option<usize>,
    #[arg(long)]
    grade: Option<u8>,
    #[arg(long, value_enum)]
    financial: Option<FinancialArg>,
    #[arg(long, value_enum)]
    location: Option<LocationArg>,
    #[arg(long, default_value_t = false)]
    transportation: bool,
    #[arg(long, value_enum)]
    academic_level: Option<AcademicArg>,
    /// Hours per week.
    #[arg(long)]
    time: Option<f32>,
    #[arg(long, value_enum)]
    support: Option<SupportArg>,
    #[arg(long)]
    interests: Option<String>,
    #[arg(long = "subject")]
    subjects: Vec<String>,
    #[arg(long = "format")]
    formats: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FinancialArg {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LocationArg {
    Virtual,
    Hybrid,
    InPerson,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AcademicArg {
    Beginner,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SupportArg {
    Low,
    Medium,
    High,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => PathwayConfig::from_path(path)?,
        None => PathwayConfig::default(),
    };
    tracing::debug!(db = %cli.db.display(), "opening pathway database");
    let api = PathwayApi::with_config(cli.db, config);
    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Catalog { command } => run_catalog(command, &api),
        Command::Model { command } => run_model(command, &api),
        Command::Recommend(args) => run_recommend(&args, &api),
        Command::MappingTable => run_mapping_table(),
    }
}

fn run_db(command: DbCommand, api: &PathwayApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
                "inferred_from_legacy": status.inferred_from_legacy
            }))
        }
        DbCommand::Migrate(args) => {
            let result = api.migrate(args.dry_run)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize migration")?)
        }
        DbCommand::Backup(args) => {
            api.migrate(false)?;
            api.backup(&args.out)?;
            emit_json(serde_json::json!({
                "backup_path": args.out,
                "status": "ok"
            }))
        }
        DbCommand::IntegrityCheck => {
            let report = api.integrity_check()?;
            let value =
                serde_json::to_value(&report).context("failed to serialize integrity report")?;
            emit_json(value)
        }
    }
}

fn run_catalog(command: CatalogCommand, api: &PathwayApi) -> Result<()> {
    match command {
        CatalogCommand::Import(args) => {
            let import = api.import_catalog(&args.csv)?;
            let value =
                serde_json::to_value(&import).context("failed to serialize catalog import")?;
            emit_json(value)
        }
        CatalogCommand::List(args) => {
            let resources = api.list_resources(args.limit)?;
            let rows = resources
                .iter()
                .map(|resource| {
                    serde_json::json!({
                        "resource_id": resource.resource_id,
                        "name": resource.name,
                        "category": resource.category.tier1,
                        "subjects": resource
                            .subjects
                            .iter()
                            .map(|tag| tag.tier1.as_str())
                            .collect::<Vec<_>>(),
                    })
                })
                .collect::<Vec<_>>();
            emit_json(serde_json::json!({
                "count": rows.len(),
                "resources": rows
            }))
        }
        CatalogCommand::Similar(args) => {
            let neighbours = api.similar_resources(ResourceId(args.id), args.limit)?;
            emit_json(serde_json::json!({
                "resource_id": args.id,
                "count": neighbours.len(),
                "similar": neighbours
            }))
        }
    }
}

fn run_model(command: ModelCommand, api: &PathwayApi) -> Result<()> {
    match command {
        ModelCommand::Train => {
            let result = api.train()?;
            let value =
                serde_json::to_value(&result).context("failed to serialize training result")?;
            emit_json(value)
        }
        ModelCommand::Show => {
            let status = api.model_status()?;
            emit_json(serde_json::to_value(&status).context("failed to serialize model status")?)
        }
        ModelCommand::Evaluate(args) => {
            let profiles = read_profiles(&args.profiles)?;
            let report = api.evaluate(&profiles, args.top_n)?;
            emit_json(
                serde_json::to_value(&report).context("failed to serialize evaluation report")?,
            )
        }
    }
}

fn run_recommend(args: &RecommendArgs, api: &PathwayApi) -> Result<()> {
    let profile = match &args.profile {
        Some(path) => read_profile(path)?,
        None => profile_from_flags(args)?,
    };
    let package = api.recommend(&RecommendationRequest { profile, top_n: args.top_n })?;
    emit_json(serde_json::to_value(&package).context("failed to serialize recommendations")?)
}

fn run_mapping_table() -> Result<()> {
    emit_json(serde_json::json!({
        "mapping_table_version": MAPPING_TABLE_VERSION,
        "entries": mapping_table()
    }))
}

fn read_profile(path: &Path) -> Result<StudentProfile> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read profile file {}", path.display()))?;
    serde_json::from_str(&body)
        .with_context(|| format!("failed to parse profile file {}", path.display()))
}

fn read_profiles(path: &Path) -> Result<Vec<StudentProfile>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read profiles file {}", path.display()))?;
    serde_json::from_str(&body)
        .with_context(|| format!("failed to parse profiles file {}", path.display()))
}

fn profile_from_flags(args: &RecommendArgs) -> Result<StudentProfile> {
    let grade = args.grade.ok_or_else(|| anyhow!("--grade is required without --profile"))?;
    let financial =
        args.financial.ok_or_else(|| anyhow!("--financial is required without --profile"))?;
    let mut profile = StudentProfile::new(
        grade,
        match financial {
            FinancialArg::Low => FinancialSituation::Low,
            FinancialArg::Medium => FinancialSituation::Medium,
            FinancialArg::High => FinancialSituation::High,
        },
    );

    if let Some(location) = args.location {
        profile.location_preference = match location {
            LocationArg::Virtual => DeliveryMode::Virtual,
            LocationArg::Hybrid => DeliveryMode::Hybrid,
            LocationArg::InPerson => DeliveryMode::InPerson,
        };
    }
    if let Some(level) = args.academic_level {
        profile.academic_level = match level {
            AcademicArg::Beginner => AcademicLevel::Beginner,
            AcademicArg::Intermediate => AcademicLevel::Intermediate,
            AcademicArg::Advanced => AcademicLevel::Advanced,
        };
    }
    if let Some(support) = args.support {
        profile.support_needed = match support {
            SupportArg::Low => SupportLevel::Low,
            SupportArg::Medium => SupportLevel::Medium,
            SupportArg::High => SupportLevel::High,
        };
    }
    if let Some(time) = args.time {
        profile.time_availability = time;
    }
    profile.transportation_available = args.transportation;
    profile.interests = args.interests.clone().unwrap_or_default();
    profile.subject_areas.clone_from(&args.subjects);
    profile.format_preferences.clone_from(&args.formats);
    Ok(profile)
}
