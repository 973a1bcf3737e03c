use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use tauc::config::{DEFAULT_MEMORY_CAPACITY, DEFAULT_STACK_CAPACITY};
use tauc::toolchain::{run_and_echo, BuildError, NasmLd, Toolchain};
use tauc::{compile_source, prepare, Config, Error, Interpreter};

const SOURCE_EXT: &str = "tau";

/// Compiler and interpreter for the tau stack language
#[derive(Parser, Debug)]
#[command(name = "tauc", version, about, long_about = None)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate a program to NASM assembly and build an executable
    Compile {
        input: PathBuf,

        #[command(flatten)]
        build: BuildArgs,

        /// Stop after writing the .asm file
        #[arg(long)]
        asm_only: bool,
    },

    /// Compile a program, then execute the resulting binary
    Run {
        input: PathBuf,

        #[command(flatten)]
        build: BuildArgs,

        /// Arguments passed to the program
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Execute a program directly
    Interpret {
        input: PathBuf,

        #[arg(long, default_value_t = DEFAULT_STACK_CAPACITY)]
        stack_capacity: usize,

        #[arg(long, default_value_t = DEFAULT_MEMORY_CAPACITY)]
        memory_capacity: usize,

        /// Print the remaining stack, bottom to top, when the program halts
        #[arg(long)]
        dump_stack: bool,

        /// Arguments visible to the program through `argc`/`argv`
        #[arg(last = true)]
        args: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Output path; `.asm` and `.o` are placed next to it
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Bytes reserved for the `mem` region
    #[arg(long, default_value_t = DEFAULT_MEMORY_CAPACITY)]
    memory_capacity: usize,

    #[arg(long, default_value = "nasm")]
    assembler: String,

    #[arg(long, default_value = "ld")]
    linker: String,
}

impl BuildArgs {
    fn config(&self) -> Config {
        Config {
            memory_capacity: self.memory_capacity,
            assembler: self.assembler.clone(),
            linker: self.linker.clone(),
            ..Config::default()
        }
    }

    fn output_base(&self, input: &Path) -> PathBuf {
        match &self.output {
            Some(out) => out.clone(),
            None if input.extension().is_some_and(|e| e == SOURCE_EXT) => input.with_extension(""),
            None => input.with_extension("out"),
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn read_source(path: &Path) -> Result<String, Error> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Emits `<base>.asm` and, unless `asm_only`, links `<base>`.
fn build(input: &Path, args: &BuildArgs, asm_only: bool) -> Result<PathBuf, Error> {
    let config = args.config();
    let src = read_source(input)?;
    let artifact = compile_source(&src, &config)?;

    let base = args.output_base(input);
    let asm_path = base.with_extension("asm");
    info!("Generating {}", asm_path.display());
    artifact.write_to(&asm_path)?;
    if !asm_only {
        NasmLd::new(&config).assemble_and_link(&asm_path, &base)?;
    }
    Ok(base)
}

fn execute(cli: Cli) -> Result<u8, Error> {
    match cli.command {
        Commands::Compile {
            input,
            build: args,
            asm_only,
        } => {
            build(&input, &args, asm_only)?;
            Ok(0)
        }
        Commands::Run {
            input,
            build: args,
            args: program_args,
        } => {
            let binary = build(&input, &args, false)?;
            // a bare relative name would be looked up on PATH
            let binary = if binary.is_relative() {
                Path::new(".").join(binary)
            } else {
                binary
            };
            let mut cmd = Command::new(&binary);
            cmd.args(&program_args);
            let status = match run_and_echo(cmd) {
                Ok(status) => status,
                Err(BuildError::Failed { status, .. }) => status,
                Err(e) => return Err(e.into()),
            };
            debug!(?status, "program finished");
            Ok(status.code().map_or(1, |c| (c & 0xff) as u8))
        }
        Commands::Interpret {
            input,
            stack_capacity,
            memory_capacity,
            dump_stack,
            args,
        } => {
            // argv[0] is the program, as for a compiled binary
            let argv = std::iter::once(input.display().to_string())
                .chain(args)
                .collect();
            let config = Config {
                stack_capacity,
                memory_capacity,
                args: argv,
                ..Config::default()
            };
            let resolved = prepare(&read_source(&input)?)?;
            let stdout = io::stdout();
            let mut interp = Interpreter::new(&config, stdout.lock());
            let result = interp.run(&resolved);
            if dump_stack {
                let dump = interp.render_stack();
                let mut out = interp.into_output();
                out.write_all(dump.as_bytes())
                    .and_then(|_| out.flush())
                    .map_err(Error::Output)?;
            }
            Ok(result?.status() as u8)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match execute(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("[ERROR] {e}");
            ExitCode::from(1)
        }
    }
}
