//! Router provisioning
//!
//! Idempotent creation of the bridge, VLANs, addressing, DHCP, hotspot and
//! firewall objects the hotspot depends on. Every object carries an identity;
//! objects whose identity is already present on the router are left alone.

use crate::routeros_client::{Attributes, Menu, Record, RouterClient, attributes};
use anyhow::{Context, Result};
use log::{error, info};
use serde::Serialize;

/// How an existing router object is recognized
#[derive(Clone, Debug, PartialEq)]
pub enum Identity {
    /// A record whose `key` equals `value`
    Field { key: &'static str, value: String },
    /// A record whose `address` starts with the given network prefix
    AddressPrefix(String),
    /// Any record in the menu
    AnyRecord,
}

impl Identity {
    fn name(value: &str) -> Self {
        Identity::Field {
            key: "name",
            value: value.to_string(),
        }
    }

    fn comment(value: &str) -> Self {
        Identity::Field {
            key: "comment",
            value: value.to_string(),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Identity::Field { key, value } => record.get(key) == Some(value.as_str()),
            Identity::AddressPrefix(prefix) => record
                .get("address")
                .is_some_and(|address| address.starts_with(prefix.as_str())),
            Identity::AnyRecord => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedObject {
    pub label: String,
    pub identity: Identity,
    pub attributes: Attributes,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProvisionStep {
    pub name: &'static str,
    pub menu: Menu,
    pub objects: Vec<PlannedObject>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Serialize)]
pub struct ObjectReport {
    pub label: String,
    pub outcome: ProvisionOutcome,
}

#[derive(Debug, Serialize)]
pub struct StepReport {
    pub step: &'static str,
    pub objects: Vec<ObjectReport>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ProvisionReport {
    pub steps: Vec<StepReport>,
}

impl ProvisionReport {
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|step| step.error.is_some())
    }

    pub fn is_success(&self) -> bool {
        self.failed_steps().next().is_none()
    }
}

/// Network layout applied to the router.
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkPlan {
    pub steps: Vec<ProvisionStep>,
}

impl NetworkPlan {
    /// Restricted VLAN 10 reaches only the purchase site, VLAN 20 is unrestricted.
    pub fn default_plan(purchase_site_address: &str) -> Self {
        let bridge = "bridge1";

        let vlan = |name: &str, id: u16| PlannedObject {
            label: format!("VLAN '{name}'"),
            identity: Identity::name(name),
            attributes: attributes!["name" => name, "vlan-id" => id, "interface" => bridge],
        };

        let address = |address: &str, prefix: &str, interface: &str| PlannedObject {
            label: format!("endereço IP {address}"),
            identity: Identity::AddressPrefix(prefix.to_string()),
            attributes: attributes!["address" => address, "interface" => interface],
        };

        let pool = |name: &str, ranges: &str| PlannedObject {
            label: format!("pool de IP '{name}'"),
            identity: Identity::name(name),
            attributes: attributes!["name" => name, "ranges" => ranges],
        };

        let dhcp_server = |name: &str, interface: &str, pool: &str| PlannedObject {
            label: format!("servidor DHCP '{name}'"),
            identity: Identity::name(name),
            attributes: attributes![
                "name" => name,
                "interface" => interface,
                "address-pool" => pool,
                "disabled" => "no",
            ],
        };

        let rule = |comment: &str, mut filter: Attributes| {
            filter.push(("comment".to_string(), comment.to_string()));
            PlannedObject {
                label: format!("regra '{comment}'"),
                identity: Identity::comment(comment),
                attributes: filter,
            }
        };

        NetworkPlan {
            steps: vec![
                ProvisionStep {
                    name: "bridge",
                    menu: Menu::Bridge,
                    objects: vec![PlannedObject {
                        label: format!("bridge '{bridge}'"),
                        identity: Identity::name(bridge),
                        attributes: attributes!["name" => bridge],
                    }],
                },
                ProvisionStep {
                    name: "vlans",
                    menu: Menu::Vlan,
                    objects: vec![vlan("vlan-restrita", 10), vlan("vlan-liberada", 20)],
                },
                ProvisionStep {
                    name: "ip addresses",
                    menu: Menu::IpAddress,
                    objects: vec![
                        address("192.168.10.1/24", "192.168.10.", "vlan-restrita"),
                        address("192.168.20.1/24", "192.168.20.", "vlan-liberada"),
                    ],
                },
                ProvisionStep {
                    name: "dhcp pools",
                    menu: Menu::IpPool,
                    objects: vec![
                        pool("dhcp_pool_vlan10", "192.168.10.10-192.168.10.100"),
                        pool("dhcp_pool_vlan20", "192.168.20.10-192.168.20.100"),
                    ],
                },
                ProvisionStep {
                    name: "dhcp servers",
                    menu: Menu::DhcpServer,
                    objects: vec![
                        dhcp_server("dhcp_vlan10", "vlan-restrita", "dhcp_pool_vlan10"),
                        dhcp_server("dhcp_vlan20", "vlan-liberada", "dhcp_pool_vlan20"),
                    ],
                },
                ProvisionStep {
                    name: "hotspot",
                    menu: Menu::Hotspot,
                    objects: vec![PlannedObject {
                        label: format!("hotspot em '{bridge}'"),
                        identity: Identity::AnyRecord,
                        attributes: attributes!["name" => "hotspot1", "interface" => bridge],
                    }],
                },
                ProvisionStep {
                    name: "firewall",
                    menu: Menu::FirewallFilter,
                    objects: vec![
                        rule(
                            "Permitir acesso ao site de compra na VLAN Restrita",
                            attributes![
                                "chain" => "forward",
                                "action" => "accept",
                                "src-address" => "192.168.10.0/24",
                                "dst-address" => purchase_site_address,
                            ],
                        ),
                        rule(
                            "Bloquear acesso irrestrito na VLAN Restrita",
                            attributes![
                                "chain" => "forward",
                                "action" => "drop",
                                "src-address" => "192.168.10.0/24",
                            ],
                        ),
                        rule(
                            "Permitir acesso irrestrito na VLAN Liberada",
                            attributes![
                                "chain" => "forward",
                                "action" => "accept",
                                "src-address" => "192.168.20.0/24",
                            ],
                        ),
                    ],
                },
            ],
        }
    }
}

pub struct ProvisioningService;

impl ProvisioningService {
    /// Apply every step of `plan` in order
    ///
    /// A failing step is logged and recorded in the report; later steps still
    /// run.
    pub async fn run_all<R: RouterClient>(router: &R, plan: &NetworkPlan) -> ProvisionReport {
        let mut report = ProvisionReport::default();

        for step in &plan.steps {
            let mut objects = Vec::new();
            let result = Self::apply_step(router, step, &mut objects).await;

            let error = match result {
                Ok(()) => {
                    info!("provisioning {} done", step.name);
                    None
                }
                Err(e) => {
                    error!("provisioning {} failed: {e:#}", step.name);
                    Some(format!("{e:#}"))
                }
            };

            report.steps.push(StepReport {
                step: step.name,
                objects,
                error,
            });
        }

        report
    }

    /// Create the objects of `step` missing on the router
    ///
    /// The menu is listed once; objects created earlier in the same step are
    /// not listed again.
    pub async fn apply_step<R: RouterClient>(
        router: &R,
        step: &ProvisionStep,
        reports: &mut Vec<ObjectReport>,
    ) -> Result<()> {
        let existing = router
            .print(step.menu)
            .await
            .context(format!("failed to list {}", step.menu.path()))?;

        for object in &step.objects {
            let outcome = if existing.iter().any(|record| object.identity.matches(record)) {
                info!("{} já existe.", object.label);
                ProvisionOutcome::AlreadyExists
            } else {
                router
                    .add(step.menu, object.attributes.clone())
                    .await
                    .context(format!("failed to create {}", object.label))?;
                info!("{} criado com sucesso.", object.label);
                ProvisionOutcome::Created
            };

            reports.push(ObjectReport {
                label: object.label.clone(),
                outcome,
            });
        }

        Ok(())
    }
}
