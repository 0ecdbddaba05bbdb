use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::Level;

use tvm_core::bytecode::{disassemble, samples};
use tvm_core::{logging, Program, VirtualMachine, VmConfig, VmEvent, Word};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run teaching VM programs and print their event stream", long_about = None)]
struct Cli {
    /// Built-in sample to run (hello, loop, factorial)
    #[arg(conflicts_with = "file")]
    sample: Option<String>,
    /// Program file of little-endian 32-bit words
    #[arg(short, long)]
    file: Option<PathBuf>,
    /// Read --file as a whitespace separated text listing instead
    #[arg(long, requires = "file")]
    text: bool,
    /// Number of global memory cells
    #[arg(short, long)]
    globals: Option<usize>,
    /// Entry point address
    #[arg(short, long, allow_negative_numbers = true)]
    entry: Option<Word>,
    /// Milliseconds to wait between instructions
    #[arg(long)]
    delay_ms: Option<u64>,
    /// Only publish register and output events
    #[arg(long)]
    no_trace: bool,
    /// Abort after this many instructions
    #[arg(long)]
    step_limit: Option<u64>,
    /// TOML file with trace, step_delay_ms and step_limit keys
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
    /// Print the program listing and exit
    #[arg(long)]
    list: bool,
}

struct Loaded {
    program: Program,
    nglobals: usize,
    entry: Word,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init("tvm-runtime", Level::WARN);

    let loaded = load_program(&cli)?;
    if cli.list {
        for line in disassemble(&loaded.program) {
            println!("{}", line.text);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config = build_config(&cli)?;
    let vm = VirtualMachine::new(loaded.program, loaded.nglobals, loaded.entry).with_config(config);
    let events = vm.subscribe();
    let handle = vm.start()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for event in events {
        if cli.json {
            writeln!(out, "{}", serde_json::to_string(&event)?)?;
        } else {
            print_event(&mut out, &event)?;
        }
    }

    match handle.join() {
        Ok(outcome) => {
            if cli.json {
                writeln!(out, "{}", serde_json::to_string(&outcome)?)?;
            } else {
                writeln!(
                    out,
                    "{:?} after {} steps, globals {:?}",
                    outcome.termination, outcome.steps, outcome.globals
                )?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("Execution failed: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn load_program(cli: &Cli) -> Result<Loaded> {
    if let Some(path) = &cli.file {
        let program = if cli.text {
            let source = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Program::parse_text(&source)?
        } else {
            Program::load_file(path)?
        };
        return Ok(Loaded {
            program,
            nglobals: cli.globals.unwrap_or(0),
            entry: cli.entry.unwrap_or(0),
        });
    }

    let name = cli.sample.as_deref().unwrap_or("hello");
    let Some(sample) = samples::by_name(name) else {
        bail!(
            "unknown sample {name:?}; expected one of {}",
            samples::NAMES.join(", ")
        );
    };
    Ok(Loaded {
        program: sample.program,
        nglobals: cli.globals.unwrap_or(sample.nglobals),
        entry: cli.entry.unwrap_or(sample.entry),
    })
}

fn build_config(cli: &Cli) -> Result<VmConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            VmConfig::from_toml_str(&text)
                .with_context(|| format!("invalid configuration {}", path.display()))?
        }
        None => VmConfig::default(),
    };
    if let Some(delay) = cli.delay_ms {
        config = config.with_step_delay(Duration::from_millis(delay));
    }
    if cli.no_trace {
        config = config.with_trace(false);
    }
    if let Some(limit) = cli.step_limit {
        config = config.with_step_limit(limit)?;
    }
    Ok(config)
}

fn print_event(out: &mut impl Write, event: &VmEvent) -> io::Result<()> {
    match event {
        VmEvent::StdoutProduced(text) => writeln!(out, "> {text}"),
        VmEvent::Finished => Ok(()),
        other => writeln!(out, "  {other}"),
    }
}
