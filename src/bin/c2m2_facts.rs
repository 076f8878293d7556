use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use c2m2_facts::config::{ConfigLoader, ResolvedConfig, Source};
use c2m2_facts::domain::{CyclePolicy, EntityKey, EntityKind};
use c2m2_facts::error::FactError;
use c2m2_facts::keywords::keywords;
use c2m2_facts::output::{JsonOutput, OutputMode, TextOutput};
use c2m2_facts::pipeline::{
    DerivedLayer, Pipeline, PipelineOptions, ProgressSink, source_names,
};
use c2m2_facts::stats::{Dimension, StatsQuery, aggregate};
use c2m2_facts::store::OutputStore;

#[derive(Parser)]
#[command(name = "c2m2-facts")]
#[command(about = "Derive deduplicated C2M2 core facts and containment closures")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the full derivation and write the derived layer")]
    Run(RunArgs),
    #[command(about = "Load, resolve and compute closures without deriving facts")]
    Check(SourceArgs),
    #[command(about = "Print a statistics rollup")]
    Stats(StatsArgs),
    #[command(about = "Print the keyword blob of one entity")]
    Keywords(EntityArgs),
    #[command(about = "Print the resolved core fact of one entity")]
    Fact(EntityArgs),
}

#[derive(Args)]
struct SourceArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long = "source")]
    sources: Vec<Utf8PathBuf>,

    #[arg(long)]
    cycle_policy: Option<CyclePolicy>,

    #[arg(long)]
    sequential: bool,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long)]
    output: Option<Utf8PathBuf>,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct StatsArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long = "dimension", required = true)]
    dimensions: Vec<Dimension>,

    #[arg(long)]
    slim: bool,
}

#[derive(Args)]
struct EntityArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long)]
    kind: EntityKind,

    #[arg(long)]
    id: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<FactError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &FactError) -> u8 {
    match error {
        FactError::ReferentialViolation { .. }
        | FactError::DuplicateKey { .. }
        | FactError::ContainmentCycle { .. }
        | FactError::UnknownTerm { .. } => 2,
        FactError::MissingConfig
        | FactError::ConfigRead(_)
        | FactError::ConfigParse(_)
        | FactError::NoSources => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Run(args) => run_derive(args, output_mode),
        Commands::Check(args) => run_check(args, output_mode),
        Commands::Stats(args) => run_stats(args, output_mode),
        Commands::Keywords(args) => run_keywords(args, output_mode),
        Commands::Fact(args) => run_fact(args),
    }
}

fn resolve(args: &SourceArgs) -> miette::Result<ResolvedConfig> {
    let mut config = if args.sources.is_empty() {
        ConfigLoader::resolve(args.config.as_deref())?
    } else {
        ConfigLoader::resolve_or_default(args.config.as_deref())?
    };
    if !args.sources.is_empty() {
        config.sources = args
            .sources
            .iter()
            .map(|path| Source {
                path: path.clone(),
                label: path.to_string(),
            })
            .collect();
    }
    if let Some(policy) = args.cycle_policy {
        config.cycle_policy = policy;
    }
    if args.sequential {
        config.parallel = false;
    }
    Ok(config)
}

fn sink(output_mode: OutputMode) -> Box<dyn ProgressSink> {
    match output_mode {
        OutputMode::Interactive => Box::new(TextOutput),
        OutputMode::NonInteractive => Box::new(JsonOutput),
    }
}

fn pipeline(config: &ResolvedConfig) -> Pipeline {
    Pipeline::new(PipelineOptions {
        cycle_policy: config.cycle_policy,
        parallel: config.parallel,
    })
}

fn derive(
    config: &ResolvedConfig,
    sink: &dyn ProgressSink,
) -> miette::Result<(DerivedLayer, Vec<String>)> {
    let pipeline = pipeline(config);
    let submission = pipeline.load(&config.source_paths(), sink)?;
    let layer = pipeline.derive(&submission, sink)?;
    Ok((layer, source_names(&submission)))
}

fn run_derive(args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    let mut config = resolve(&args.source)?;
    if let Some(output) = args.output {
        config.output = output;
    }
    let sink = sink(output_mode);
    let (layer, sources) = derive(&config, sink.as_ref())?;

    let output = if args.dry_run {
        None
    } else {
        let stats: Vec<_> = config
            .stats
            .iter()
            .map(|query| aggregate(&layer, query))
            .collect();
        let store = OutputStore::new(config.output.clone());
        store.write(&layer, sources.clone(), &stats)?;
        Some(store.root().to_string())
    };

    let result = layer.summary(sources, output);
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_run(&result).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::print_run(&result);
            Ok(())
        }
    }
}

fn run_check(args: SourceArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = resolve(&args)?;
    let sink = sink(output_mode);
    let pipeline = pipeline(&config);
    let submission = pipeline.load(&config.source_paths(), sink.as_ref())?;
    let result = pipeline.check(&submission, sink.as_ref())?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_check(&result).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::print_check(&result);
            Ok(())
        }
    }
}

fn run_stats(args: StatsArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = resolve(&args.source)?;
    let sink = sink(output_mode);
    let (layer, _) = derive(&config, sink.as_ref())?;
    let result = aggregate(&layer, &StatsQuery::new(args.dimensions, args.slim));
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_stats(&result).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::print_stats(&result);
            Ok(())
        }
    }
}

fn run_keywords(args: EntityArgs, output_mode: OutputMode) -> miette::Result<()> {
    args.id.parse::<EntityKey>()?;
    let config = resolve(&args.source)?;
    let sink = sink(output_mode);
    let (layer, _) = derive(&config, sink.as_ref())?;
    let key = layer.find_entity(args.kind, &args.id)?;
    let blob = keywords(&layer, args.kind, &key)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_keywords(&blob).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::print_keywords(&blob);
            Ok(())
        }
    }
}

fn run_fact(args: EntityArgs) -> miette::Result<()> {
    args.id.parse::<EntityKey>()?;
    let config = resolve(&args.source)?;
    let (layer, _) = derive(&config, &JsonOutput)?;
    let key = layer.find_entity(args.kind, &args.id)?;
    let (_, refs) = layer.entity(args.kind, &key)?;
    let fact = layer.describe_fact(refs.core)?;
    JsonOutput::print_json(&fact).into_diagnostic()
}
