mod common;

use common::FakeRouter;
use hotspot_gate::{
    routeros_client::{Menu, Record},
    services::provisioning::{NetworkPlan, ProvisionOutcome, ProvisioningService},
};

fn names(router: &FakeRouter, menu: Menu, key: &str) -> Vec<String> {
    router
        .records(menu)
        .iter()
        .filter_map(|record| record.get(key).map(str::to_string))
        .collect()
}

fn snapshot(router: &FakeRouter) -> Vec<(Menu, Vec<Record>)> {
    [
        Menu::Bridge,
        Menu::Vlan,
        Menu::IpAddress,
        Menu::IpPool,
        Menu::DhcpServer,
        Menu::Hotspot,
        Menu::FirewallFilter,
    ]
    .into_iter()
    .map(|menu| (menu, router.records(menu)))
    .collect()
}

#[tokio::test]
async fn empty_router_gets_full_layout() {
    let router = FakeRouter::new();
    let plan = NetworkPlan::default_plan("203.0.113.10");

    let report = ProvisioningService::run_all(&router, &plan).await;

    assert!(report.is_success());
    assert_eq!(names(&router, Menu::Bridge, "name"), ["bridge1"]);
    assert_eq!(
        names(&router, Menu::Vlan, "name"),
        ["vlan-restrita", "vlan-liberada"]
    );
    assert_eq!(
        names(&router, Menu::IpAddress, "address"),
        ["192.168.10.1/24", "192.168.20.1/24"]
    );
    assert_eq!(
        names(&router, Menu::DhcpServer, "address-pool"),
        ["dhcp_pool_vlan10", "dhcp_pool_vlan20"]
    );
    assert_eq!(names(&router, Menu::Hotspot, "interface"), ["bridge1"]);
    assert_eq!(
        names(&router, Menu::FirewallFilter, "action"),
        ["accept", "drop", "accept"]
    );
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let router = FakeRouter::new();
    let plan = NetworkPlan::default_plan("203.0.113.10");

    ProvisioningService::run_all(&router, &plan).await;
    let after_first = snapshot(&router);

    let report = ProvisioningService::run_all(&router, &plan).await;

    assert_eq!(snapshot(&router), after_first);
    assert!(
        report
            .steps
            .iter()
            .flat_map(|step| &step.objects)
            .all(|object| object.outcome == ProvisionOutcome::AlreadyExists)
    );
}

#[tokio::test]
async fn existing_objects_are_recognized_by_identity() {
    let router = FakeRouter::new();
    router.seed(Menu::IpAddress, [("address", "192.168.10.254/24"), ("interface", "ether2")].into_iter().collect());
    router.seed(Menu::Hotspot, [("name", "server1"), ("interface", "ether3")].into_iter().collect());

    let plan = NetworkPlan::default_plan("203.0.113.10");
    ProvisioningService::run_all(&router, &plan).await;

    assert_eq!(
        names(&router, Menu::IpAddress, "address"),
        ["192.168.10.254/24", "192.168.20.1/24"]
    );
    assert_eq!(names(&router, Menu::Hotspot, "name"), ["server1"]);
}

#[tokio::test]
async fn unreachable_router_fails_every_step() {
    let router = FakeRouter::new();
    router.set_offline(true);

    let report =
        ProvisioningService::run_all(&router, &NetworkPlan::default_plan("203.0.113.10")).await;

    assert_eq!(report.failed_steps().count(), 7);
    assert!(router.calls().is_empty());
}
