// CLI application
use clap::Parser;
use rdec_cli::commands::{self, Flags, Inputs};
use rdec_core::decompiler::pipeline::RunOutcome;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "rdec")]
#[command(about = "Pseudo-C decompiler for disassembler control-flow graphs")]
#[command(version)]
struct Cli {
    /// Graph document (agj); read from stdin when omitted
    #[arg(short, long)]
    graph: Option<PathBuf>,

    /// Cross-reference table (isj)
    #[arg(long)]
    xref_table: Option<PathBuf>,

    /// String table (izj)
    #[arg(long)]
    string_table: Option<PathBuf>,

    /// Replay an issue bundle written by --issue
    #[arg(long, conflicts_with_all = ["graph", "xref_table", "string_table"])]
    bundle: Option<PathBuf>,

    /// Architecture of the routine (see --list-archs)
    #[arg(short, long)]
    arch: Option<String>,

    /// Show the output with colors
    #[arg(long)]
    colors: bool,

    /// Show pseudo code and the assembly side by side
    #[arg(long)]
    assembly: bool,

    /// Show all casts in the pseudo code
    #[arg(long)]
    casts: bool,

    /// Generates the json issue data instead of pseudo code
    #[arg(long)]
    issue: bool,

    /// Do not catch internal faults; show the full error instead
    #[arg(long)]
    debug: bool,

    /// Outputs html data instead of text
    #[arg(long)]
    html: bool,

    /// Only the block containing this address
    #[arg(long, value_parser = commands::parse_address)]
    address: Option<u64>,

    /// Show only the scopes, without statements
    #[arg(long)]
    blocks: bool,

    /// Show the xrefs leaving each instruction
    #[arg(long)]
    xrefs: bool,

    /// Show physical addresses in the assembly column and xrefs
    #[arg(long)]
    paddr: bool,

    /// Color theme (default, dark, light)
    #[arg(long)]
    theme: Option<String>,

    /// Configuration file (defaults to <config dir>/rdec/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// List the supported architectures and exit
    #[arg(long)]
    list_archs: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if cli.list_archs {
        commands::list_architectures(&mut out)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = commands::load_config(cli.config.as_deref())?;
    let inputs = Inputs {
        graph: cli.graph,
        xrefs: cli.xref_table,
        strings: cli.string_table,
        bundle: cli.bundle,
    };
    let flags = Flags {
        colors: cli.colors,
        casts: cli.casts,
        assembly: cli.assembly,
        html: cli.html,
        blocks: cli.blocks,
        xrefs: cli.xrefs,
        paddr: cli.paddr,
        theme: cli.theme,
        address: cli.address,
        issue: cli.issue,
        debug: cli.debug,
    };

    let outcome = commands::decompile(&inputs, cli.arch.as_deref(), &config, &flags, &mut out)?;
    out.flush()?;

    Ok(match outcome {
        RunOutcome::Rendered(_) | RunOutcome::Captured => ExitCode::SUCCESS,
        RunOutcome::Rejected => ExitCode::from(1),
        RunOutcome::Crashed => ExitCode::from(2),
    })
}
