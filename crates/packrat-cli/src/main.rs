use clap::Parser;

mod cli;
pub mod exit_codes;
mod logging;

use cli::args::Cli;
use cli::commands::dispatch;

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init(&cli.log) {
        eprintln!("fatal: {e:?}");
        std::process::exit(exit_codes::FATAL);
    }

    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("fatal: {e:?}");
            exit_codes::FATAL
        }
    };
    std::process::exit(code);
}
