use crate::{
    config::WebhookConfig,
    http_response::{ApiResponse, ServiceResultResponse, handle_service_result},
    mac_address::MacAddress,
    routeros_client::{Menu, RouterClient},
    services::{
        access::AccessGrantService,
        grant_store::MAX_GRANT_DURATION,
        notification_ledger::NotificationLedger,
        payment::{PayloadAdapter, decode_body},
    },
};
use actix_web::{HttpMessage, HttpRequest, HttpResponse, Responder, web};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::time::Duration;

const NOTIFICATION_PROCESSED: &str = "Notificação processada com sucesso";
const NOTIFICATION_DUPLICATE: &str = "Notificação já processada";
const MAC_REQUIRED: &str = "O campo 'mac_address' é obrigatório.";
const DURATION_INVALID: &str = "O campo 'duration' deve ser um número inteiro maior que zero.";

#[derive(Debug, Deserialize, Validate)]
pub struct AddMacRequest {
    #[serde(default)]
    #[validate(min_length = 1)]
    pub mac_address: String,
    #[serde(default)]
    #[validate(minimum = 1)]
    pub duration: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RemoveMacRequest {
    #[serde(default)]
    #[validate(min_length = 1)]
    pub mac_address: String,
}

#[derive(Debug, Serialize)]
struct HealthcheckInfo {
    version: &'static str,
    router_reachable: bool,
}

pub struct Api<R> {
    pub access: AccessGrantService<R>,
    pub adapter: Box<dyn PayloadAdapter>,
    pub ledger: NotificationLedger,
}

impl<R> Api<R>
where
    R: RouterClient + Send + Sync + 'static,
{
    pub fn new(access: AccessGrantService<R>, webhook: &WebhookConfig) -> Self {
        Api {
            access,
            adapter: webhook.payload_format.adapter(),
            ledger: NotificationLedger::new(webhook.ledger_capacity, webhook.ledger_ttl),
        }
    }

    pub async fn payment_notification(
        req: HttpRequest,
        body: web::Bytes,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("payment_notification() called");

        let event = match decode_body(req.content_type(), &body)
            .and_then(|payload| api.adapter.extract(&payload))
        {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    "payment_notification rejected ({} payload): {e}",
                    api.adapter.name()
                );
                return ApiResponse::bad_request(e.user_message());
            }
        };

        let key = event.dedup_key();

        if !api.ledger.record(&key) {
            info!("notification {key} already processed");
            return ApiResponse::ok(NOTIFICATION_DUPLICATE);
        }

        if !event.status.triggers_grant() {
            info!(
                "notification {} with status {} ignored",
                event.notification_id, event.status
            );
            return ApiResponse::ok(NOTIFICATION_PROCESSED);
        }

        let grant = &event.grant;

        match api.access.grant(&grant.mac, grant.duration).await {
            Ok(outcome) => info!("notification {}: {}", event.notification_id, outcome.message()),
            Err(e) => {
                error!("grant for notification {} failed: {e:#}", event.notification_id);
                api.ledger.forget(&key);
            }
        }

        ApiResponse::ok(NOTIFICATION_PROCESSED)
    }

    pub async fn add_mac(body: web::Json<AddMacRequest>, api: web::Data<Self>) -> impl Responder {
        debug!("add_mac() called: {body:?}");

        if let Err(e) = body.validate() {
            debug!("add_mac validation failed: {e}");
            return ApiResponse::bad_request(if body.mac_address.is_empty() {
                MAC_REQUIRED
            } else {
                DURATION_INVALID
            });
        }

        let mac = match Self::parse_mac(&body.mac_address) {
            Ok(mac) => mac,
            Err(response) => return response,
        };

        // validated to be positive
        let duration = Duration::from_secs(body.duration.unsigned_abs());
        if duration > MAX_GRANT_DURATION {
            debug!("add_mac duration {}s out of range", body.duration);
            return ApiResponse::bad_request(DURATION_INVALID);
        }

        handle_service_result(
            api.access.grant(&mac, duration).await,
            "add_mac",
            "Erro ao adicionar MAC ao IP Binding",
        )
    }

    pub async fn remove_mac(
        body: web::Json<RemoveMacRequest>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("remove_mac() called: {body:?}");

        if let Err(e) = body.validate() {
            debug!("remove_mac validation failed: {e}");
            return ApiResponse::bad_request(MAC_REQUIRED);
        }

        let mac = match Self::parse_mac(&body.mac_address) {
            Ok(mac) => mac,
            Err(response) => return response,
        };

        handle_service_result(
            api.access.revoke(&mac).await,
            "remove_mac",
            "Erro ao remover MAC",
        )
    }

    pub async fn grants(api: web::Data<Self>) -> impl Responder {
        debug!("grants() called");
        api.access.pending_grants().into_response()
    }

    pub async fn healthcheck(api: web::Data<Self>) -> impl Responder {
        debug!("healthcheck() called");

        match api.access.router().print(Menu::Hotspot).await {
            Ok(_) => HttpResponse::Ok().json(HealthcheckInfo {
                version: env!("CARGO_PKG_VERSION"),
                router_reachable: true,
            }),
            Err(e) => {
                error!("healthcheck failed: {e:#}");
                HttpResponse::ServiceUnavailable().json(HealthcheckInfo {
                    version: env!("CARGO_PKG_VERSION"),
                    router_reachable: false,
                })
            }
        }
    }

    pub async fn version() -> impl Responder {
        HttpResponse::Ok().body(env!("CARGO_PKG_VERSION"))
    }

    fn parse_mac(raw: &str) -> Result<MacAddress, HttpResponse> {
        raw.parse::<MacAddress>().map_err(|e| {
            debug!("{e}");
            ApiResponse::bad_request(format!("Endereço MAC inválido: {raw}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http_response::json_config,
        routeros_client::MockRouterClient,
        services::{grant_store::GrantStore, payment::PayloadFormat},
    };
    use actix_web::{App, http::StatusCode, test};
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    type TestApi = Api<MockRouterClient>;

    fn make_api(router: MockRouterClient, dir: &TempDir) -> TestApi {
        let store = GrantStore::open(dir.path().join("grants.json")).unwrap();
        let access = AccessGrantService::new(Arc::new(router), Arc::new(store));
        Api::new(
            access,
            &WebhookConfig {
                payload_format: PayloadFormat::ExternalReference,
                ledger_capacity: 16,
                ledger_ttl: Duration::from_secs(60),
            },
        )
    }

    async fn post_json(
        api: TestApi,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, ApiResponse) {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(api))
                .app_data(json_config())
                .route("/add_mac", web::post().to(TestApi::add_mac))
                .route("/remove_mac", web::post().to(TestApi::remove_mac))
                .route(
                    "/payment-notification",
                    web::post().to(TestApi::payment_notification),
                ),
        )
        .await;
        let req = test::TestRequest::post()
            .uri(uri)
            .set_json(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        let status = resp.status();
        (status, test::read_body_json(resp).await)
    }

    #[tokio::test]
    async fn add_mac_rejects_invalid_duration_without_router_calls() {
        for body in [
            json!({"mac_address": "AA:BB:CC:DD:EE:FF", "duration": 0}),
            json!({"mac_address": "AA:BB:CC:DD:EE:FF", "duration": -3}),
            json!({"mac_address": "AA:BB:CC:DD:EE:FF", "duration": i64::MAX}),
            json!({"mac_address": "AA:BB:CC:DD:EE:FF"}),
        ] {
            let dir = TempDir::new().unwrap();
            let (status, response) = post_json(make_api(MockRouterClient::new(), &dir), "/add_mac", body).await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(response.message, DURATION_INVALID);
        }
    }

    #[tokio::test]
    async fn add_mac_rejects_non_integer_duration() {
        let dir = TempDir::new().unwrap();
        let (status, response) = post_json(
            make_api(MockRouterClient::new(), &dir),
            "/add_mac",
            json!({"mac_address": "AA:BB:CC:DD:EE:FF", "duration": "soon"}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!response.success);
    }

    #[tokio::test]
    async fn add_mac_requires_well_formed_mac() {
        let dir = TempDir::new().unwrap();
        let (status, response) = post_json(
            make_api(MockRouterClient::new(), &dir),
            "/add_mac",
            json!({"duration": 60}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.message, MAC_REQUIRED);

        let (status, response) = post_json(
            make_api(MockRouterClient::new(), &dir),
            "/add_mac",
            json!({"mac_address": "not-a-mac", "duration": 60}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.message, "Endereço MAC inválido: not-a-mac");
    }

    #[tokio::test]
    async fn add_mac_reports_router_failure_as_internal_error() {
        let dir = TempDir::new().unwrap();
        let mut router = MockRouterClient::new();
        router
            .expect_print()
            .returning(|_| Box::pin(async { Err(anyhow!("connection refused")) }));

        let (status, response) = post_json(
            make_api(router, &dir),
            "/add_mac",
            json!({"mac_address": "AA:BB:CC:DD:EE:FF", "duration": 60}),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.success);
        assert!(response.message.starts_with("Erro ao adicionar MAC ao IP Binding:"));
    }

    #[tokio::test]
    async fn remove_mac_of_absent_address_succeeds() {
        let dir = TempDir::new().unwrap();
        let mut router = MockRouterClient::new();
        router
            .expect_print()
            .returning(|_| Box::pin(async { Ok(vec![]) }));
        router.expect_remove().times(0);

        let (status, response) = post_json(
            make_api(router, &dir),
            "/remove_mac",
            json!({"mac_address": "aa:bb:cc:dd:ee:ff"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
        assert_eq!(response.message, "MAC AA:BB:CC:DD:EE:FF não está no IP Binding.");
    }

    #[tokio::test]
    async fn ignored_status_is_acknowledged_without_grant() {
        let dir = TempDir::new().unwrap();
        let (status, response) = post_json(
            make_api(MockRouterClient::new(), &dir),
            "/payment-notification",
            json!({
                "id": "77",
                "status": "pending",
                "external_reference": {"mac": "AA:BB:CC:DD:EE:FF", "duration": 60}
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.message, NOTIFICATION_PROCESSED);
    }

    #[tokio::test]
    async fn failed_grant_is_still_acknowledged() {
        let dir = TempDir::new().unwrap();
        let mut router = MockRouterClient::new();
        router
            .expect_print()
            .returning(|_| Box::pin(async { Err(anyhow!("router offline")) }));

        let api = make_api(router, &dir);
        let (status, response) = post_json(
            api,
            "/payment-notification",
            json!({
                "id": "78",
                "status": "approved",
                "external_reference": {"mac": "AA:BB:CC:DD:EE:FF", "duration": 60}
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
    }

    #[tokio::test]
    async fn unsupported_content_type_is_rejected() {
        let dir = TempDir::new().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(make_api(MockRouterClient::new(), &dir)))
                .route(
                    "/payment-notification",
                    web::post().to(TestApi::payment_notification),
                ),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/payment-notification")
            .insert_header(("content-type", "text/plain"))
            .set_payload("id=1")
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
