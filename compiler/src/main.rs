use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use stencil_opt::ir::Module;
use stencil_opt::pass::PassId;
use stencil_opt::pipeline::{run_pipeline, PipelineOptions};
use stencil_opt::unroll::RemainderPolicy;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitFormat {
    Ir,
    Json,
    Dot,
}

#[derive(Parser, Debug)]
#[command(
    name = "stencil-opt",
    version,
    about = "Stencil IR optimizer: shape inference, inlining and unrolling"
)]
struct Cli {
    /// Input module: textual IR, or JSON when the extension is .json
    source: PathBuf,

    /// Output file path (stdout when absent)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pass list, comma separated (default: shape-inference,inlining,unrolling)
    #[arg(long = "pass", value_delimiter = ',')]
    passes: Vec<PassId>,

    /// JSON pipeline configuration; command-line flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Unroll axis
    #[arg(long)]
    unroll_axis: Option<usize>,

    /// Unroll factor
    #[arg(long)]
    unroll_factor: Option<u32>,

    /// What to do when the factor does not divide the extent
    #[arg(long)]
    remainder: Option<RemainderPolicy>,

    /// Output format
    #[arg(long, value_enum, default_value_t = EmitFormat::Ir)]
    emit: EmitFormat,

    /// Log pass progress and timing
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("stencil-opt: error: {}", message);
    std::process::exit(2);
}

fn load_input(path: &Path) -> Module {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => fail(format_args!("{}: {}", path.display(), e)),
    };
    if path.extension().is_some_and(|ext| ext == "json") {
        return match Module::from_json(&source) {
            Ok(m) => m,
            Err(e) => fail(format_args!("{}: invalid JSON module: {}", path.display(), e)),
        };
    }
    match stencil_opt::resolve::load_module(&source) {
        Ok(m) => m,
        Err(diags) => {
            for d in &diags {
                match d.span {
                    Some(span) => eprintln!("stencil-opt: {}:{}: {}", path.display(), span.start, d),
                    None => eprintln!("stencil-opt: {}: {}", path.display(), d),
                }
            }
            std::process::exit(2);
        }
    }
}

fn load_options(cli: &Cli) -> PipelineOptions {
    let mut options = match &cli.config {
        Some(path) => {
            let text = match std::fs::read_to_string(path) {
                Ok(t) => t,
                Err(e) => fail(format_args!("{}: {}", path.display(), e)),
            };
            match PipelineOptions::from_json(&text) {
                Ok(o) => o,
                Err(e) => fail(format_args!("{}: invalid configuration: {}", path.display(), e)),
            }
        }
        None => PipelineOptions::default(),
    };
    if !cli.passes.is_empty() {
        options.passes = cli.passes.clone();
    }
    if let Some(axis) = cli.unroll_axis {
        options.unroll.axis = axis;
    }
    if let Some(factor) = cli.unroll_factor {
        options.unroll.factor = factor;
    }
    if let Some(remainder) = cli.remainder {
        options.unroll.remainder = remainder;
    }
    options
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    debug!(source = %cli.source.display(), emit = ?cli.emit, "starting");

    let mut module = load_input(&cli.source);
    let options = load_options(&cli);

    let report = run_pipeline(&mut module, &options, |func, _pass, diags| {
        for d in diags {
            eprintln!("stencil-opt: {}: {}", func, d);
        }
    });

    let rendered = match cli.emit {
        EmitFormat::Ir => stencil_opt::print::print_module(&module),
        EmitFormat::Json => match module.to_json() {
            Ok(json) => json + "\n",
            Err(e) => fail(e),
        },
        EmitFormat::Dot => stencil_opt::dot::emit_dot(&module),
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, rendered) {
                fail(format_args!("{}: {}", path.display(), e));
            }
        }
        None => print!("{}", rendered),
    }

    if !report.all_succeeded() {
        for f in report.failed() {
            eprintln!("stencil-opt: function '{}' failed", f.name);
        }
        std::process::exit(1);
    }
}
