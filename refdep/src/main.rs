//! refdep CLI

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fmt;
use std::path::{Path, PathBuf};

use refdep::ast::Program;
use refdep::baseline::{AnalysisMode, BaselineAnalysis};
use refdep::callgraph::CallGraph;
use refdep::config::{Backend, RefineConfig};
use refdep::deps::DependencyMap;
use refdep::error::report_error;
use refdep::harness::{HARNESS_FILE_SUFFIX, build_all, build_harness, prepare_target};
use refdep::refine::{Refiner, check_dependencies};
use refdep::types::TypeChecker;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "refdep", version, about = "Prover-refined dependency inference for IVP programs")]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Type check an IVP source file
    Check {
        /// Source file to check
        file: PathBuf,
    },
    /// Print the syntactic dependency map
    Baseline {
        file: PathBuf,
        /// Ignore control dependencies
        #[arg(long)]
        data_only: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Add check-dependency harnesses and print the program
    Harness {
        file: PathBuf,
        /// Only build the harness of this procedure
        #[arg(long = "proc")]
        procedure: Option<String>,
        /// Output file, `-` for stdout [default: <file>.CD.ivp]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Refine the dependency map with a theorem prover
    Refine {
        file: PathBuf,
        /// Only refine this procedure
        #[arg(long = "proc")]
        procedure: Option<String>,
        /// Dependency map (JSON) taken as given for the procedures it names
        #[arg(long)]
        reuse: Option<PathBuf>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        prover: ProverArgs,
    },
    /// Analyze the harnesses of a program such as a `.CD.ivp` file
    CheckDeps {
        file: PathBuf,
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        prover: ProverArgs,
    },
    /// Parse and dump declarations (debug)
    Parse {
        /// Source file to parse
        file: PathBuf,
    },
    /// Tokenize and dump tokens (debug)
    Tokens {
        /// Source file to tokenize
        file: PathBuf,
    },
}

#[derive(Args)]
struct ProverArgs {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,
    /// Path to the z3 binary
    #[arg(long = "z3")]
    z3_path: Option<String>,
    /// Prover timeout in seconds
    #[arg(long)]
    timeout: Option<u32>,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Z3,
    Bounded,
}

impl ProverArgs {
    fn resolve(&self) -> Result<RefineConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => RefineConfig::load(path)?,
            None => RefineConfig::default(),
        };
        if let Some(backend) = self.backend {
            config.prover.backend = match backend {
                BackendArg::Z3 => Backend::Z3,
                BackendArg::Bounded => Backend::Bounded,
            };
        }
        if let Some(path) = &self.z3_path {
            config.prover.z3_path = path.clone();
        }
        if let Some(secs) = self.timeout {
            config.prover.timeout_secs = secs;
        }
        Ok(config)
    }
}

/// Error already shown to the user
#[derive(Debug)]
struct Reported;

impl fmt::Display for Reported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aborting due to previous error")
    }
}

impl std::error::Error for Reported {}

fn main() {
    let cli = Cli::parse();

    let config = match &cli.command {
        Command::Refine { prover, .. } | Command::CheckDeps { prover, .. } => prover.resolve(),
        _ => Ok(RefineConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    init_logging(&config.log.filter, cli.verbose);

    let result = match cli.command {
        Command::Check { file } => check_file(&file),
        Command::Baseline {
            file,
            data_only,
            json,
        } => baseline_file(&file, data_only, json),
        Command::Harness {
            file,
            procedure,
            output,
        } => harness_file(&file, procedure.as_deref(), output.as_deref()),
        Command::Refine {
            file,
            procedure,
            reuse,
            json,
            ..
        } => refine_file(&file, &config, procedure.as_deref(), reuse.as_deref(), json),
        Command::CheckDeps { file, json, .. } => check_deps_file(&file, &config, json),
        Command::Parse { file } => parse_file(&file),
        Command::Tokens { file } => tokenize_file(&file),
    };

    if let Err(e) = result {
        if !e.is::<Reported>() {
            eprintln!("Error: {e}");
        }
        std::process::exit(1);
    }
}

fn init_logging(default_filter: &str, verbose: bool) {
    let fallback = if verbose { "debug" } else { default_filter };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Parse and type check, rendering front-end errors against the source
fn load_program(path: &Path) -> Result<Program, Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    let filename = path.display().to_string();
    let loaded = refdep::parser::parse_source(&filename, &source).and_then(|program| {
        TypeChecker::new().check_program(&program)?;
        Ok(program)
    });
    match loaded {
        Ok(program) => Ok(program),
        Err(e) => {
            report_error(&filename, &source, &e);
            Err(Box::new(Reported))
        }
    }
}

fn print_map(map: &DependencyMap, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", map.to_json()?);
    } else {
        print!("{map}");
    }
    Ok(())
}

fn check_file(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let program = load_program(path)?;
    println!(
        "✓ {} type checks successfully ({} procedures)",
        path.display(),
        program.procedures().count()
    );
    Ok(())
}

fn baseline_file(path: &Path, data_only: bool, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let program = load_program(path)?;
    let mode = if data_only {
        AnalysisMode::DataOnly
    } else {
        AnalysisMode::DataAndControl
    };
    print_map(&BaselineAnalysis::new(&program, mode).analyze(), json)
}

fn harness_file(
    path: &Path,
    procedure: Option<&str>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let program = load_program(path)?;
    let candidates = BaselineAnalysis::new(&program, AnalysisMode::DataAndControl).analyze();

    let with_harnesses = match procedure {
        None => build_all(&program, &candidates)?.0,
        Some(target) => {
            let proc = program
                .procedure(target)
                .ok_or_else(|| format!("unknown procedure `{target}`"))?;
            let mut deps = candidates.get(target).cloned().unwrap_or_default();
            deps.prune(&program, proc);
            let reads = deps.read_set(&program, proc);
            let mods = deps.mod_set(&program, proc);

            let mut out = program.clone();
            let mut call_graph = CallGraph::build(&out);
            prepare_target(&mut out, target)?;
            build_harness(&mut out, &mut call_graph, target, &reads, &mods)?;
            TypeChecker::new().check_program(&out)?;
            out
        }
    };

    let text = refdep::printer::print_program(&with_harnesses);
    let destination = match output {
        Some(p) => p.to_path_buf(),
        None => path.with_extension("").with_extension(&HARNESS_FILE_SUFFIX[1..]),
    };
    if destination.as_os_str() == "-" {
        print!("{text}");
    } else {
        std::fs::write(&destination, text)?;
        eprintln!("wrote {}", destination.display());
    }
    Ok(())
}

fn refine_file(
    path: &Path,
    config: &RefineConfig,
    procedure: Option<&str>,
    reuse: Option<&Path>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let program = load_program(path)?;
    let reuse = match reuse {
        Some(p) => DependencyMap::load(p)?,
        None => DependencyMap::new(),
    };
    let mut candidates = BaselineAnalysis::new(&program, AnalysisMode::DataAndControl)
        .with_known(reuse.clone())
        .analyze();
    candidates.overlay(&reuse);

    let mut prover = config.make_prover()?;
    tracing::info!(prover = prover.name(), "refining {}", path.display());
    let mut refiner = Refiner::new(&program, prover.as_mut(), config.refine_options()).with_reuse(reuse);

    match procedure {
        Some(target) => {
            refiner.refine_procedure(&mut candidates, target)?;
            if json {
                let mut single = DependencyMap::new();
                if let Some(deps) = candidates.get(target) {
                    single.insert(target, deps.clone());
                }
                println!("{}", single.to_json()?);
            } else {
                println!("{}", candidates.render(target));
            }
        }
        None => {
            let report = refiner.refine_all(candidates)?;
            tracing::info!(queries = report.queries(), rounds = report.rounds.len(), "refinement finished");
            print_map(&report.dependencies, json)?;
        }
    }
    Ok(())
}

fn check_deps_file(path: &Path, config: &RefineConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let program = load_program(path)?;
    let mut prover = config.make_prover()?;
    let map = check_dependencies(&program, prover.as_mut(), config.expand_options())?;
    print_map(&map, json)
}

fn parse_file(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    let filename = path.display().to_string();

    let program = refdep::parser::parse_source(&filename, &source)?;
    let decls: Vec<_> = program.decls().map(|(_, d)| d).collect();
    println!("{}", serde_json::to_string_pretty(&decls)?);
    Ok(())
}

fn tokenize_file(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;

    let tokens = refdep::lexer::tokenize(&source)?;
    for (tok, span) in &tokens {
        println!("{:?} @ {}..{}", tok, span.start, span.end);
    }

    Ok(())
}
