//! picodecl - dump the binary info of RP2040/RP2350 firmware images.

use clap::Parser;
use picodecl::cli::{run, Cli};
use picodecl::logging;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.log_json {
        logging::init_tracing_json();
    } else {
        logging::init_tracing_with_level(logging::level_for_verbosity(cli.verbose));
    }

    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    let summary = run(&cli, &mut stdout.lock(), &mut stderr.lock())?;

    std::process::exit(summary.exit_code());
}
