#![allow(dead_code)]

use actix_web::{App, dev::ServiceResponse, test, web};
use anyhow::{Result, bail};
use hotspot_gate::{
    api::Api,
    config::WebhookConfig,
    http_response::json_config,
    routeros_client::{Attributes, Menu, Record, RouterClient},
    services::{access::AccessGrantService, grant_store::GrantStore, payment::PayloadFormat},
};
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

/// In-memory router keeping one record list per menu
#[derive(Clone, Default)]
pub struct FakeRouter {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    menus: HashMap<Menu, Vec<Record>>,
    calls: Vec<String>,
    next_id: usize,
    offline: bool,
}

impl FakeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, menu: Menu, record: Record) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let mut record = record;
        record.insert(".id", format!("*{:X}", state.next_id));
        state.menus.entry(menu).or_default().push(record);
    }

    pub fn records(&self, menu: Menu) -> Vec<Record> {
        self.state
            .lock()
            .unwrap()
            .menus
            .get(&menu)
            .cloned()
            .unwrap_or_default()
    }

    /// Commands received so far, e.g. `/ip/hotspot/ip-binding/add`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls().iter().filter(|c| *c == command).count()
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    fn enter(&self, menu: Menu, verb: &str) -> Result<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().unwrap();
        if state.offline {
            bail!("failed to connect to router at 127.0.0.1:8728: connection refused");
        }
        state.calls.push(menu.command(verb));
        Ok(state)
    }
}

impl RouterClient for FakeRouter {
    async fn print(&self, menu: Menu) -> Result<Vec<Record>> {
        let records = {
            let state = self.enter(menu, "print")?;
            state.menus.get(&menu).cloned().unwrap_or_default()
        };
        // other requests run while the listing is on the wire
        tokio::task::yield_now().await;
        Ok(records)
    }

    async fn add(&self, menu: Menu, attributes: Attributes) -> Result<String> {
        let mut state = self.enter(menu, "add")?;
        state.next_id += 1;
        let id = format!("*{:X}", state.next_id);

        let mut record: Record = attributes.into_iter().collect();
        record.insert(".id", id.clone());
        state.menus.entry(menu).or_default().push(record);

        Ok(id)
    }

    async fn remove(&self, menu: Menu, id: String) -> Result<()> {
        let mut state = self.enter(menu, "remove")?;
        let records = state.menus.entry(menu).or_default();
        let before = records.len();
        records.retain(|record| record.id() != Some(id.as_str()));

        if records.len() == before {
            bail!("no such item ({id})");
        }
        Ok(())
    }
}

pub type TestApi = Api<FakeRouter>;

pub fn make_api(router: &FakeRouter, store_path: &Path, payload_format: PayloadFormat) -> TestApi {
    let store = GrantStore::open(store_path).unwrap();
    let access = AccessGrantService::new(Arc::new(router.clone()), Arc::new(store));

    Api::new(
        access,
        &WebhookConfig {
            payload_format,
            ledger_capacity: 64,
            ledger_ttl: Duration::from_secs(3600),
        },
    )
}

pub async fn call(api: web::Data<TestApi>, req: test::TestRequest) -> ServiceResponse {
    let app = test::init_service(
        App::new()
            .app_data(api)
            .app_data(json_config())
            .route(
                "/payment-notification",
                web::post().to(TestApi::payment_notification),
            )
            .route("/add_mac", web::post().to(TestApi::add_mac))
            .route("/remove_mac", web::post().to(TestApi::remove_mac))
            .route("/grants", web::get().to(TestApi::grants))
            .route("/healthcheck", web::get().to(TestApi::healthcheck))
            .route("/version", web::get().to(TestApi::version)),
    )
    .await;

    test::call_service(&app, req.to_request()).await
}

pub fn binding_macs(router: &FakeRouter) -> Vec<String> {
    router
        .records(Menu::HotspotIpBinding)
        .iter()
        .filter_map(|record| record.get("mac-address").map(str::to_string))
        .collect()
}
