use actix_web::{
    App, HttpServer,
    dev::ServerHandle,
    web::{self, Data},
};
use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use hotspot_gate::{
    api::Api,
    config::{AppConfig, TlsConfig},
    http_response::json_config,
    routeros_client::RouterOsClient,
    services::{
        access::AccessGrantService,
        grant_store::GrantStore,
        provisioning::{NetworkPlan, ProvisioningService},
    },
};
use log::{debug, error, info, warn};
use rustls::crypto::{CryptoProvider, ring::default_provider};
use std::{io::Write, sync::Arc};
use tokio::signal::unix::{SignalKind, signal};

type GateApi = Api<RouterOsClient>;

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize()?;

    let config = AppConfig::from_env().context("failed to load configuration")?;
    debug!("configuration: {config:?}");

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let router = Arc::new(RouterOsClient::new(config.router.clone()));

    if config.provisioning.on_startup {
        let plan = NetworkPlan::default_plan(&config.provisioning.purchase_site_address);
        let report = ProvisioningService::run_all(router.as_ref(), &plan).await;
        if !report.is_success() {
            warn!("router provisioning finished with failed steps");
        }
    }

    let store = Arc::new(
        GrantStore::open(&config.grants.store_path).context("failed to open grant store")?,
    );
    let access = AccessGrantService::new(router, store);

    let restored = access.restore_pending();
    if restored > 0 {
        info!("rescheduled {restored} pending revocations");
    }

    let api = GateApi::new(access, &config.webhook);
    let (server_handle, server_task) = run_server(api, &config)?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            debug!("ctrl-c received");
        },
        _ = sigterm.recv() => {
            debug!("SIGTERM received");
        },
        result = server_task => {
            match result {
                Ok(Ok(())) => debug!("server stopped normally"),
                Ok(Err(e)) => error!("server stopped with error: {e}"),
                Err(e) => error!("server task panicked: {e}"),
            }
        },
    }

    info!("shutting down");
    server_handle.stop(true).await;
    info!("shutdown complete");

    Ok(())
}

fn initialize() -> Result<()> {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));

    CryptoProvider::install_default(default_provider())
        .map_err(|_| anyhow::anyhow!("crypto provider already installed"))?;

    Ok(())
}

fn run_server(
    api: GateApi,
    config: &AppConfig,
) -> Result<(
    ServerHandle,
    tokio::task::JoinHandle<Result<(), std::io::Error>>,
)> {
    let api = Data::new(api);
    let address = format!("{}:{}", config.server.bind_address, config.server.port);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(json_config())
            .app_data(api.clone())
            .route(
                "/payment-notification",
                web::post().to(GateApi::payment_notification),
            )
            .route("/add_mac", web::post().to(GateApi::add_mac))
            .route("/remove_mac", web::post().to(GateApi::remove_mac))
            .route("/grants", web::get().to(GateApi::grants))
            .route("/healthcheck", web::get().to(GateApi::healthcheck))
            .route("/version", web::get().to(GateApi::version))
    });

    let server = match &config.server.tls {
        Some(tls) => {
            let tls_config = load_tls_config(tls).context("failed to load tls config")?;
            info!("listening on https://{address}");
            server.bind_rustls_0_23(&address, tls_config)
        }
        None => {
            info!("listening on http://{address}");
            server.bind(&address)
        }
    }
    .context("failed to bind server")?
    .disable_signals()
    .run();

    Ok((server.handle(), tokio::spawn(server)))
}

fn load_tls_config(paths: &TlsConfig) -> Result<rustls::ServerConfig> {
    let mut tls_certs = std::io::BufReader::new(
        std::fs::File::open(&paths.cert_path).context("failed to open certificate file")?,
    );

    let mut tls_key = std::io::BufReader::new(
        std::fs::File::open(&paths.key_path).context("failed to open key file")?,
    );

    let tls_certs = rustls_pemfile::certs(&mut tls_certs)
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse certificate pem")?;

    let key_item = rustls_pemfile::read_one(&mut tls_key)
        .context("failed to read key pem file")?
        .context("no valid key found in pem file")?;

    let key = match key_item {
        rustls_pemfile::Item::Pkcs1Key(key) => rustls::pki_types::PrivateKeyDer::Pkcs1(key),
        rustls_pemfile::Item::Pkcs8Key(key) => rustls::pki_types::PrivateKeyDer::Pkcs8(key),
        _ => anyhow::bail!("unexpected key type in pem file"),
    };

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(tls_certs, key)
        .context("failed to create tls config")
}
