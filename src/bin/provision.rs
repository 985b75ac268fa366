//! CLI tool to provision the router once and print what was done
//!
//! Usage: cargo run --bin provision
//!
//! Uses the same environment variables as the service.

use hotspot_gate::{
    config::AppConfig,
    routeros_client::RouterOsClient,
    services::provisioning::{NetworkPlan, ProvisioningService},
};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            std::process::exit(1);
        }
    };

    let router = RouterOsClient::new(config.router);
    let plan = NetworkPlan::default_plan(&config.provisioning.purchase_site_address);
    let report = ProvisioningService::run_all(&router, &plan).await;

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to serialize report: {e:#}"),
    }

    if !report.is_success() {
        std::process::exit(1);
    }
}
