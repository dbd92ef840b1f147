use super::args::*;

pub(crate) mod run;
pub(crate) mod scan;

use crate::exit_codes::SUCCESS;

pub fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => run::run(args),
        Command::Scan(args) => scan::run(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}
