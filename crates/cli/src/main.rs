//! RV32 emulator CLI.
//!
//! This binary is the single entry point for running guest executables. It
//! performs:
//! 1. **Setup:** Parses flags, reads the optional JSON configuration, and
//!    initialises `tracing` from `RUST_LOG`.
//! 2. **Run:** Loads the ELF, lays out the guest stack, and drives the
//!    machine until the guest exits.
//! 3. **Reporting:** Optional register dump (JSON), architectural-test
//!    signature dump, and execution statistics.
//!
//! The process exit code mirrors the guest's `exit` syscall argument.

use std::fs;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rivet_core::{Config, Machine};

#[derive(Parser, Debug)]
#[command(
    name = "rivet",
    author,
    version,
    about = "RV32IMAFC user-mode emulator with a two-tier JIT",
    long_about = "Run a statically linked RV32 ELF executable under binary translation.\n\n\
        Examples:\n  rivet guest.elf\n  rivet -t guest.elf arg1 arg2\n  rivet -d - -q guest.elf"
)]
struct Cli {
    /// Guest ELF executable.
    elf: String,

    /// Arguments passed to the guest as argv[1:].
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Trace executed instructions.
    #[arg(short = 't', long)]
    trace: bool,

    /// Dump all x-registers and pc as JSON on exit ("-" for stdout).
    #[arg(short = 'd', long, value_name = "FILE")]
    dump_registers: Option<String>,

    /// Dump the architectural test signature range as hex words.
    #[arg(short = 'a', long, value_name = "FILE")]
    arch_test: Option<String>,

    /// Suppress ordinary stdout (statistics and dumps still flow).
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Allow misaligned loads and stores instead of trapping.
    #[arg(short = 'm', long)]
    misalign: bool,

    /// Disable the JIT tiers; run as a block-caching interpreter.
    #[arg(long)]
    no_jit: bool,

    /// JSON configuration overriding the built-in defaults.
    #[arg(long, value_name = "FILE")]
    config: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config.as_deref() {
        Some(path) => match load_config(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("rivet: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };
    config.general.trace = cli.trace;
    config.general.quiet = cli.quiet;
    config.general.allow_misalign = cli.misalign;
    if cli.no_jit {
        config.jit.enabled = false;
    }

    let quiet = config.general.quiet;

    let elf_data = match fs::read(&cli.elf) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("rivet: cannot read '{}': {e}", cli.elf);
            return ExitCode::FAILURE;
        }
    };

    let mut machine = match Machine::new(config) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("rivet: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut guest_args = vec![cli.elf.clone()];
    guest_args.extend(cli.args.iter().cloned());
    if let Err(e) = machine.load_elf(&elf_data, &guest_args) {
        eprintln!("rivet: {e}");
        return ExitCode::FAILURE;
    }

    let exit_code = machine.run();

    if let Some(target) = cli.dump_registers.as_deref()
        && let Err(e) = write_output(target, &format!("{:#}\n", machine.dump_registers()))
    {
        eprintln!("rivet: register dump failed: {e}");
        return ExitCode::FAILURE;
    }

    if let Some(target) = cli.arch_test.as_deref() {
        match machine.signature() {
            Some(sig) => {
                if let Err(e) = write_output(target, &sig) {
                    eprintln!("rivet: signature dump failed: {e}");
                    return ExitCode::FAILURE;
                }
            }
            None => {
                eprintln!("rivet: image carries no begin_signature/end_signature symbols");
                return ExitCode::FAILURE;
            }
        }
    }

    if !quiet {
        machine.stats.print(machine.cpu.csr_cycle);
    }
    let _ = std::io::stdout().flush();

    match exit_code {
        Some(code) => ExitCode::from((code & 0xff) as u8),
        None => ExitCode::SUCCESS,
    }
}

/// Reads and parses a JSON configuration file.
fn load_config(path: &str) -> Result<Config, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("cannot read '{path}': {e}"))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid config '{path}': {e}"))
}

/// Writes `content` to a file or, for `-`, to stdout.
fn write_output(target: &str, content: &str) -> std::io::Result<()> {
    if target == "-" {
        std::io::stdout().write_all(content.as_bytes())
    } else {
        fs::write(target, content)
    }
}
