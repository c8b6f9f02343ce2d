use std::process::ExitCode;

use chart_ops::{config::ValidateConfig, process, validate};
use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
    chart_ops::init();

    let config = ValidateConfig::parse();
    let result = validate::run(&config).await;
    if let Ok(outcome) = &result {
        log::debug!("Validation finished: {outcome:?}");
    }
    process::report(result.map(|_| ()))
}
