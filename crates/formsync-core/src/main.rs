use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use formsync_control::{ControlTree, FormDefinition};
use formsync_core::simulate::{run_simulator, SimulatorConfig};
use formsync_core::EngineConfig;
use formsync_diff::{diff_repeat_indexes, Comparator, Instruction, MarkupRenderer};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Command::new("formsync")
        .version(formsync_core::VERSION)
        .about("Server-side form engine: snapshot diffing and request orchestration")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Engine configuration file (TOML)"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Drive concurrent simulated clients against the demo form")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("documents")
                        .long("documents")
                        .default_value("8")
                        .value_parser(value_parser!(usize))
                        .help("Number of concurrently edited documents"),
                )
                .arg(
                    Arg::new("requests")
                        .long("requests")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Requests per document"),
                )
                .arg(
                    Arg::new("retry-rate")
                        .long("retry-rate")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Probability of retransmitting the previous request"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop a document's run on its first violation"),
                ),
        )
        .subcommand(
            Command::new("diff")
                .about("Compare two control snapshots and print the instructions")
                .arg(
                    Arg::new("before")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Snapshot before the change (JSON)"),
                )
                .arg(
                    Arg::new("after")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Snapshot after the change (JSON)"),
                ),
        )
        .subcommand(Command::new("config").about("Print the effective engine configuration"));

    let matches = cli.get_matches();
    init_tracing(matches.get_flag("log-json"));

    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match matches.subcommand() {
        Some(("simulate", args)) => simulate(config, args).await,
        Some(("diff", args)) => diff(&config, args),
        Some(("config", _)) => {
            print!("{}", config.to_toml_string().context("failed to render configuration")?);
            Ok(())
        }
        _ => Ok(()),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn simulate(engine: EngineConfig, args: &ArgMatches) -> Result<()> {
    let config = SimulatorConfig {
        seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
        documents: args.get_one::<usize>("documents").copied().unwrap_or(8),
        requests: args.get_one::<u64>("requests").copied().unwrap_or(200),
        retry_rate: args.get_one::<f64>("retry-rate").copied().unwrap_or(0.1),
        stop_on_first_violation: args.get_flag("stop-on-violation"),
        engine,
    };

    println!("Running formsync simulator...");
    println!("Seed: {}", config.seed);
    println!("Documents: {}", config.documents);
    println!("Requests per document: {}", config.requests);
    println!();

    let report = run_simulator(config).await;
    println!("{}", report.generate_text());

    std::process::exit(if report.passed() { 0 } else { 1 });
}

fn diff(config: &EngineConfig, args: &ArgMatches) -> Result<()> {
    let before = args.get_one::<PathBuf>("before").context("missing before snapshot")?;
    let after = args.get_one::<PathBuf>("after").context("missing after snapshot")?;
    let before = load_snapshot(before)?;
    let after = load_snapshot(after)?;

    let definition = FormDefinition::new();
    let renderer = MarkupRenderer::new(config.render_config());
    let mut instructions: Vec<Instruction> = Vec::new();
    Comparator::new(&definition, &renderer)
        .with_threshold(config.full_update_threshold)
        .diff(Some(before.roots()), Some(after.roots()), &mut instructions)
        .context("snapshots cannot be compared")?;
    diff_repeat_indexes(&before.repeat_indexes(), &after.repeat_indexes(), &mut instructions);

    println!("{}", serde_json::to_string_pretty(&instructions)?);
    Ok(())
}

fn load_snapshot(path: &Path) -> Result<ControlTree> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let tree: ControlTree =
        serde_json::from_str(&text).with_context(|| format!("{} is not a control snapshot", path.display()))?;
    ControlTree::new(tree.roots().to_vec()).with_context(|| format!("{} is not a valid snapshot", path.display()))
}
