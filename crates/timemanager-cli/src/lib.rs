pub mod cli;
pub mod config;
pub mod dispatch;
pub mod logging;

use clap::Parser;

/// Parses arguments, initializes logging and color-eyre, and dispatches to
/// the selected command. Returns the process exit code.
pub fn run() -> i32 {
    if let Err(err) = color_eyre::install() {
        eprintln!("failed to install error handler: {err}");
    }

    let opts = cli::Opts::parse();
    logging::init(opts.flags.verbose);

    let names = config::names_from(&opts.flags);
    dispatch::run(opts.command, &names)
}
