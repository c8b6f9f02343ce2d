//! Helpers for the Helm deployment pipeline: image tag bumps in values files
//! and promtool validation of the rendered Prometheus config and rules.

pub mod config;
pub mod helm;
pub mod manifest;
pub mod process;
pub mod promtool;
pub mod update;
pub mod validate;
pub mod values;

/// Loads `.env` and sets up `env_logger`, logging at `info` unless
/// `RUST_LOG` says otherwise.
pub fn init() {
    let _ = dotenvy::dotenv();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
}
