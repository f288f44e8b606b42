use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use arches_ext_core::backup::{BackupOptions, SystemRunner, local_today, run_backup};
use arches_ext_core::config::{ArchesConfig, load_config};
use arches_ext_core::files::{
    FileScope, ResourceSelection, build_file_name_table, collect_file_info, file_archive_name,
    file_csv_name, file_name_csv_name, write_file_archive, write_file_csv, write_file_name_csv,
};
use arches_ext_core::kind::ExtensionKind;
use arches_ext_core::maplayer::{
    AddMapLayerOptions, DEFAULT_LAYER_ICON, add_map_layer, list_map_layers, remove_map_layer,
};
use arches_ext_core::migrate::{
    current_version, latest_version, pending_migration_count, run_migrations,
};
use arches_ext_core::registry::{ExtensionRegistry, RegisterAction};
use arches_ext_core::resource::{GraphLookup, GraphRef, inspect_graphs, resolve_graph, resource_graphs};
use arches_ext_core::runtime::{
    InitOptions, MIGRATIONS_POLICY_MESSAGE, PathOverrides, ResolutionContext, ResolvedPaths,
    init_layout, inspect_runtime, normalize_for_display, resolve_paths,
};
use arches_ext_core::search::{ElasticsearchClient, IndexCheckOptions, check_index};
use arches_ext_core::services::{
    CeleryLogLevel, CeleryUnitOptions, celery_bin_for, render_celery_units, write_service_units,
};
use arches_ext_core::store::{open_connection, open_store, table_counts};
use arches_ext_core::style::Palette;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use rusqlite::Connection;
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "ARCHES_EXT_LOG";
const DEFAULT_LOG_FILTER: &str = "arches_ext=info,arches_ext_core=info";
const SAMPLE_LIMIT: usize = 5;

#[derive(Debug, Parser)]
#[command(
    name = "arches-ext",
    version,
    about = "Manage Arches extensions, map layers and project maintenance tasks"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Disable ANSI colors in output")]
    no_color: bool,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
    palette: Palette,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
            palette: Palette::detect(cli.no_color),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "List, register, unregister, activate or deactivate extensions")]
    Extension(ExtensionArgs),
    #[command(about = "Create the .arches-ext layout and default config")]
    Init(InitArgs),
    Db(DbArgs),
    #[command(about = "Add, remove or list map layers built from Mapbox styles")]
    Maplayer(MaplayerArgs),
    Resource(ResourceArgs),
    #[command(about = "Report on uploaded files and export them as CSV or zip")]
    Files(FilesArgs),
    #[command(name = "file-list", about = "Write original file names per file-list node to CSV")]
    FileList(FileListArgs),
    Indexes(IndexesArgs),
    #[command(about = "Dump the database and sync backups to S3")]
    Backup(BackupArgs),
    Configure(ConfigureArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExtensionOperation {
    List,
    Register,
    Unregister,
    Activate,
    Deactivate,
}

#[derive(Debug, Args)]
struct ExtensionArgs {
    #[arg(value_enum)]
    operation: ExtensionOperation,
    #[arg(value_parser = parse_extension_kind, value_name = "TYPE")]
    extension_type: ExtensionKind,
    #[arg(short = 's', long, value_name = "PATH", help = "Source definition (.json, .yaml, .toml or trusted .py)")]
    source: Option<PathBuf>,
    #[arg(short = 'n', long, value_name = "NAME", help = "Extension name, as printed by `list`")]
    name: Option<String>,
    #[arg(long, help = "Replace an existing extension with the same key")]
    overwrite: bool,
    #[arg(long, help = "Show the change `register` would make without writing it")]
    dry_run: bool,
    #[arg(long, help = "Print `list` output as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Migrate,
    Stats,
}

#[derive(Debug, Args)]
struct MaplayerArgs {
    #[command(subcommand)]
    command: MaplayerSubcommand,
}

#[derive(Debug, Subcommand)]
enum MaplayerSubcommand {
    Add {
        #[arg(short = 'n', long, value_name = "NAME")]
        name: String,
        #[arg(short = 's', long, value_name = "PATH", help = "Mapbox style JSON")]
        style: PathBuf,
        #[arg(long, default_value = DEFAULT_LAYER_ICON)]
        icon: String,
        #[arg(long, help = "Register as a basemap instead of an overlay")]
        basemap: bool,
    },
    Remove {
        #[arg(short = 'n', long, value_name = "NAME")]
        name: String,
    },
    List,
}

#[derive(Debug, Args)]
struct ResourceArgs {
    #[command(subcommand)]
    command: ResourceSubcommand,
}

#[derive(Debug, Subcommand)]
enum ResourceSubcommand {
    #[command(about = "Count resource instances per graph")]
    Inspect {
        #[arg(short = 'g', long, value_name = "NAME_OR_ID")]
        graph: Option<String>,
    },
}

#[derive(Debug, Args)]
struct FilesArgs {
    #[arg(long, value_name = "ID", conflicts_with = "graph")]
    resource: Option<String>,
    #[arg(long, value_name = "NAME_OR_ID")]
    graph: Option<String>,
    #[arg(long)]
    make_csv: bool,
    #[arg(long)]
    make_archive: bool,
    #[arg(long, help = "Include files no longer referenced by tile data")]
    include_orphans: bool,
    #[arg(long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Debug, Args)]
struct FileListArgs {
    #[arg(long, value_name = "ID", conflicts_with = "graph", required_unless_present = "graph")]
    resourceid: Option<String>,
    #[arg(long, value_name = "NAME_OR_ID")]
    graph: Option<String>,
    #[arg(long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Debug, Args)]
struct IndexesArgs {
    #[command(subcommand)]
    command: IndexesSubcommand,
}

#[derive(Debug, Subcommand)]
enum IndexesSubcommand {
    #[command(about = "Compare database resources with the search index")]
    Check {
        #[arg(long, help = "Write ids missing from the index to the logs directory")]
        write_missing: bool,
    },
}

#[derive(Debug, Args)]
struct BackupArgs {
    bucket: String,
    #[arg(long, value_name = "PROFILE")]
    aws_profile: Option<String>,
    #[arg(long)]
    skip_sync: bool,
    #[arg(long)]
    skip_rotate: bool,
}

#[derive(Debug, Args)]
struct ConfigureArgs {
    #[command(subcommand)]
    command: ConfigureSubcommand,
}

#[derive(Debug, Subcommand)]
enum ConfigureSubcommand {
    #[command(about = "Write systemd units for a celery worker and beat")]
    Celery(CeleryArgs),
}

#[derive(Debug, Args)]
struct CeleryArgs {
    #[arg(short = 'a', long, value_name = "APP")]
    app: Option<String>,
    #[arg(short = 'd', long, value_name = "DIR", default_value = ".services")]
    destination: PathBuf,
    #[arg(long, value_name = "DIR", default_value = ".logs")]
    log_dir: PathBuf,
    #[arg(long, value_parser = parse_log_level, default_value = "DEBUG")]
    log_level: CeleryLogLevel,
    #[arg(long)]
    prefix: Option<String>,
    #[arg(long)]
    require_rabbitmq: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();
    let runtime = RuntimeOptions::from_cli(&cli);
    let palette = runtime.palette;
    match run(&runtime, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", palette.error(&format!("error: {err:#}")));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run(runtime: &RuntimeOptions, command: Option<Commands>) -> Result<()> {
    match command {
        Some(Commands::Extension(args)) => run_extension(runtime, args),
        Some(Commands::Init(args)) => run_init(runtime, args),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Migrate => run_db_migrate(runtime),
            DbSubcommand::Stats => run_db_stats(runtime),
        },
        Some(Commands::Maplayer(MaplayerArgs { command })) => run_maplayer(runtime, command),
        Some(Commands::Resource(ResourceArgs { command })) => match command {
            ResourceSubcommand::Inspect { graph } => run_resource_inspect(runtime, graph.as_deref()),
        },
        Some(Commands::Files(args)) => run_files(runtime, args),
        Some(Commands::FileList(args)) => run_file_list(runtime, args),
        Some(Commands::Indexes(IndexesArgs { command })) => match command {
            IndexesSubcommand::Check { write_missing } => run_indexes_check(runtime, write_missing),
        },
        Some(Commands::Backup(args)) => run_backup_command(runtime, args),
        Some(Commands::Configure(ConfigureArgs { command })) => match command {
            ConfigureSubcommand::Celery(args) => run_configure_celery(runtime, args),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_extension(runtime: &RuntimeOptions, args: ExtensionArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let palette = runtime.palette;
    let kind = args.extension_type;
    let mut connection = open_store(&paths)?;
    let mut registry =
        ExtensionRegistry::new(&mut connection, kind, config.source_options(&paths.project_root));

    match args.operation {
        ExtensionOperation::List => {
            let listed = registry.list()?;
            if args.json {
                let items: Vec<_> = listed
                    .iter()
                    .map(|item| json!({ "name": item.name, "key": item.key, "active": item.active }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&items)?);
                return Ok(());
            }
            for item in &listed {
                match item.active {
                    Some(active) => println!("{} {}", palette.activation(active), item.name),
                    None => println!("{}", item.name),
                }
            }
            println!("---\nregistered {kind} count: {}", listed.len());
        }
        ExtensionOperation::Register => {
            let source = require_arg(args.source.as_deref(), "register", "-s/--source", palette)?;
            println!(
                "Register {kind}: {} (overwrite = {})",
                normalize_for_display(source),
                args.overwrite
            );
            if args.dry_run {
                let plan = registry.plan_register(source, args.overwrite)?;
                let diff = plan.render_diff();
                println!("dry run: would {} {}", plan.action.as_str(), plan.proposed.name());
                if diff.is_empty() {
                    println!("no changes");
                } else {
                    print!("{diff}");
                }
                return Ok(());
            }
            let report = registry.register(source, args.overwrite)?;
            let verb = match report.action {
                RegisterAction::Insert => "registered",
                RegisterAction::Update => "updated",
            };
            println!("{verb} {kind} {} ({})", report.name, report.key);
        }
        ExtensionOperation::Unregister => {
            let name = require_arg(args.name.as_deref(), "unregister", "-n/--name", palette)?;
            println!("Unregister {kind}: {name}");
            let removed = registry.unregister(name)?;
            println!("removed {kind} {} ({})", removed.name(), removed.key);
        }
        ExtensionOperation::Activate | ExtensionOperation::Deactivate => {
            let active = matches!(args.operation, ExtensionOperation::Activate);
            let operation = if active { "activate" } else { "deactivate" };
            let name = require_arg(args.name.as_deref(), operation, "-n/--name", palette)?;
            if !active {
                println!(
                    "{}",
                    palette.warn(
                        "Warning: Deactivating core Arches extensions, like the Advanced search filter, may cause unintended consequences."
                    )
                );
            }
            println!("{} {kind}: {name}", capitalize(operation));
            match registry.set_active(name, active) {
                Ok(report) => {
                    let state = palette.activation(report.active);
                    if report.changed {
                        println!("{} is now {state}", report.name);
                    } else {
                        println!("{} was already {state}", report.name);
                    }
                }
                Err(err) if err.is_unsupported_operation() => {
                    println!("{}", palette.warn(&format!("Warning: {err}")));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;
    println!("Initialized arches-ext runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    if !paths.db_path.exists() {
        println!("next: {MIGRATIONS_POLICY_MESSAGE}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = run_migrations(&paths)?;
    println!("db migrate");
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    if report.applied.is_empty() {
        println!("applied: <none> (schema is up to date)");
    }
    for migration in &report.applied {
        println!("applied: v{:03} {}", migration.version, migration.name);
    }
    println!("schema_version: {}", report.current_version);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    println!("db stats");
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    if status.db_exists {
        let connection = open_connection(&paths.db_path)?;
        let pending = pending_migration_count(&connection)?;
        println!(
            "schema_version: {}/{}",
            current_version(&connection)?,
            latest_version()
        );
        if pending == 0 {
            for count in table_counts(&connection)? {
                println!("table.{}: {}", count.table, count.rows);
            }
        } else {
            println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
        }
    }
    for warning in &status.warnings {
        println!("warning: {warning}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_maplayer(runtime: &RuntimeOptions, command: MaplayerSubcommand) -> Result<()> {
    let (paths, _) = load_runtime(runtime)?;
    let mut connection = open_store(&paths)?;
    match command {
        MaplayerSubcommand::Add {
            name,
            style,
            icon,
            basemap,
        } => {
            let report = add_map_layer(
                &mut connection,
                &AddMapLayerOptions {
                    name,
                    style_path: style,
                    icon,
                    is_basemap: basemap,
                },
            )?;
            println!(
                "added Map Layer \"{}\" ({}) with {} layer definition(s)",
                report.name, report.maplayerid, report.layer_count
            );
            println!(
                "  source(s): {} ({} new)",
                report.sources.join(", "),
                report.created_sources
            );
        }
        MaplayerSubcommand::Remove { name } => {
            let removal = remove_map_layer(&mut connection, &name)?;
            for source in &removal.removed_sources {
                println!("removing Map Source \"{source}\"");
            }
            println!("removing Map Layer \"{}\"", removal.name);
        }
        MaplayerSubcommand::List => {
            let layers = list_map_layers(&connection)?;
            println!("-- {} Map Layers --", layers.len());
            for layer in &layers {
                println!("{}", layer.name);
                println!("  source(s): {}", layer.sources.join(", "));
            }
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_resource_inspect(runtime: &RuntimeOptions, graph: Option<&str>) -> Result<()> {
    let (paths, _) = load_runtime(runtime)?;
    let connection = open_store(&paths)?;
    let graphs = match graph {
        Some(needle) => vec![pick_graph(&connection, needle)?],
        None => resource_graphs(&connection)?,
    };
    for inspection in inspect_graphs(&connection, &graphs)? {
        println!("{}", inspection.graph.name);
        println!("{}", inspection.resource_count);
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_files(runtime: &RuntimeOptions, args: FilesArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let connection = open_store(&paths)?;
    let media_root = config.media_root(&paths.project_root);
    let graph = match args.graph.as_deref() {
        Some(needle) => Some(pick_graph(&connection, needle)?),
        None => None,
    };
    let scopes = FileScope::select(&connection, args.resource.as_deref(), graph)?;

    for scope in &scopes {
        println!("Getting files for: {}", scope.label());
        let info = collect_file_info(&connection, &media_root, scope, args.include_orphans)?;
        println!("File objects: {}", info.file_count);
        println!("Missing files to be skipped: {}", info.missing.len());
        println!("Tiles with files in them: {}", info.tiles_with_files);
        println!("Files in tiles without fileids: {}", info.files_without_id);
        println!("Number of files actually referenced in tiles: {}", info.matched);
        println!("Number of orphaned files: {}", info.orphans);

        if args.make_csv {
            if info.entries.is_empty() {
                println!("no data to write, skipping");
            } else {
                let destination = args
                    .output_dir
                    .join(file_csv_name(scope, args.include_orphans));
                write_file_csv(&info.entries, &destination)?;
                println!("wrote {}", normalize_for_display(&destination));
            }
        }
        if args.make_archive {
            if info.entries.is_empty() {
                println!("no files to archive, skipping");
            } else {
                let destination = args
                    .output_dir
                    .join(file_archive_name(scope, args.include_orphans));
                let count = write_file_archive(&info.entries, &destination)?;
                println!(
                    "wrote {} ({count} files)",
                    normalize_for_display(&destination)
                );
            }
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_file_list(runtime: &RuntimeOptions, args: FileListArgs) -> Result<()> {
    let (paths, _) = load_runtime(runtime)?;
    let connection = open_store(&paths)?;
    let selection = match (args.resourceid, args.graph.as_deref()) {
        (Some(id), _) => ResourceSelection::Resource(id),
        (None, Some(needle)) => ResourceSelection::Graph(pick_graph(&connection, needle)?),
        (None, None) => bail!("file-list requires --resourceid or --graph"),
    };
    let table = build_file_name_table(&connection, &selection)?;
    let destination = args.output_dir.join(file_name_csv_name(&selection));
    write_file_name_csv(&table, &destination)?;
    println!(
        "wrote {} ({} resources, {} file nodes)",
        normalize_for_display(&destination),
        table.rows.len(),
        table.node_columns.len()
    );
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_indexes_check(runtime: &RuntimeOptions, write_missing: bool) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let connection = open_store(&paths)?;
    let mut client = ElasticsearchClient::new(&config.search_url())?;
    let report = check_index(
        &connection,
        &mut client,
        &IndexCheckOptions {
            index: config.resources_index(),
            page_size: config.page_size(),
            keep_alive: config.scroll_keep_alive(),
            missing_log_dir: write_missing.then(|| paths.logs_dir.clone()),
        },
    )?;

    for status in &report.graphs {
        println!("{}", status.graph.name);
        println!("- in db: {}", status.in_db);
        println!("- in index: {}", status.in_index);
        print_sample("indexed resources not in db", &status.indexed_not_in_db);
        print_sample("db resources not in index", &status.db_not_in_index);
        if let Some(log) = &status.missing_log {
            println!("  missing ids written to {}", normalize_for_display(log));
        }
    }
    let inconsistent = report
        .graphs
        .iter()
        .filter(|status| !status.is_consistent())
        .count();
    println!("---\ngraphs checked: {}, out of sync: {inconsistent}", report.graphs.len());
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_backup_command(runtime: &RuntimeOptions, args: BackupArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let options = BackupOptions {
        bucket: args.bucket,
        aws_profile: args.aws_profile.or_else(|| config.backup.aws_profile.clone()),
        skip_sync: args.skip_sync,
        skip_rotate: args.skip_rotate,
        backup_dir: config.backup_dir(&paths.project_root),
        keep_dailies: config.keep_dailies(),
        postgres: config.postgres(),
        today: local_today(),
    };
    let report = run_backup(&mut SystemRunner, &options)?;
    for command in &report.commands {
        println!("{command}");
    }
    println!("dump: {}", normalize_for_display(&report.dump_path));
    if let Some(destination) = &report.archived_to {
        println!("archived: {destination}");
    }
    println!("rotated: {}", report.rotated.len());
    if let Some(destination) = &report.synced_to {
        println!("synced: {destination}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_configure_celery(runtime: &RuntimeOptions, args: CeleryArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let app = require_arg(args.app.as_deref(), "configure celery", "-a/--app", runtime.palette)?;
    let units = render_celery_units(&CeleryUnitOptions {
        app: app.to_string(),
        celery_bin: celery_bin_for(Path::new(&config.python_interpreter())),
        working_dir: paths.project_root.clone(),
        log_dir: absolutize(&args.log_dir, &paths.project_root),
        log_level: args.log_level,
        prefix: args.prefix,
        require_rabbitmq: args.require_rabbitmq,
    })?;
    let destination = absolutize(&args.destination, &paths.project_root);
    for path in write_service_units(&destination, &units)? {
        println!("wrote {}", normalize_for_display(&path));
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn pick_graph(connection: &Connection, needle: &str) -> Result<GraphRef> {
    match resolve_graph(connection, needle)? {
        GraphLookup::Found(graph) => Ok(graph),
        GraphLookup::Missing => bail!("invalid graph: {needle}"),
        GraphLookup::Ambiguous(graphs) => choose_graph(needle, graphs),
    }
}

fn choose_graph(needle: &str, graphs: Vec<GraphRef>) -> Result<GraphRef> {
    println!("Multiple graphs are named \"{needle}\":");
    for (position, graph) in graphs.iter().enumerate() {
        println!("  {}. {} ({})", position + 1, graph.name, graph.graphid);
    }
    print!("Choose a graph [1-{}]: ", graphs.len());
    io::stdout().flush().context("failed to flush stdout")?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read graph choice")?;
    let choice: usize = answer
        .trim()
        .parse()
        .with_context(|| format!("not a number: {}", answer.trim()))?;
    debug!(choice, "graph chosen");
    match choice.checked_sub(1).and_then(|index| graphs.get(index)) {
        Some(graph) => Ok(graph.clone()),
        None => bail!("choice {choice} is out of range"),
    }
}

fn print_sample(label: &str, ids: &[String]) {
    if ids.is_empty() {
        return;
    }
    println!("  {} {label}:", ids.len());
    for id in ids.iter().take(SAMPLE_LIMIT) {
        println!("    {id}");
    }
    if ids.len() > SAMPLE_LIMIT {
        println!("    ...");
    }
}

fn require_arg<'a, T: ?Sized>(
    value: Option<&'a T>,
    operation: &str,
    flag: &str,
    palette: Palette,
) -> Result<&'a T> {
    match value {
        Some(value) => Ok(value),
        None => bail!(
            "{} requires {}",
            palette.req(operation),
            palette.opt(flag)
        ),
    }
}

fn parse_extension_kind(value: &str) -> Result<ExtensionKind, String> {
    ExtensionKind::parse(value).ok_or_else(|| {
        format!(
            "unknown extension type `{value}` (expected one of: {})",
            ExtensionKind::names().join(", ")
        )
    })
}

fn parse_log_level(value: &str) -> Result<CeleryLogLevel, String> {
    CeleryLogLevel::parse(value).ok_or_else(|| {
        format!("unknown log level `{value}` (expected DEBUG, INFO, WARNING, ERROR, CRITICAL or FATAL)")
    })
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn load_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, ArchesConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };
    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }
    resolve_paths(&context, &overrides)
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
