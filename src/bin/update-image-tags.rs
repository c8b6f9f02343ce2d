use std::process::ExitCode;

use chart_ops::{config::UpdateConfig, process, update};
use clap::Parser;

fn main() -> ExitCode {
    chart_ops::init();

    let config = UpdateConfig::parse();
    process::report(update::run(&config))
}
