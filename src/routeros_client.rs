use crate::{
    config::RouterConfig,
    routeros_connection::{ApiError, Connection, Response},
};
use anyhow::{Context, Result};
use log::info;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::future::Future;
use tokio::net::TcpStream;
use trait_variant::make;

pub use crate::routeros_connection::Record;

/// Ordered `key => value` attributes of a router command.
pub type Attributes = Vec<(String, String)>;

macro_rules! attributes {
    ($($key:expr => $value:expr),* $(,)?) => {
        vec![$(($key.to_string(), $value.to_string())),*]
    };
}
pub(crate) use attributes;

/// Router configuration menus touched by this service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Menu {
    Bridge,
    Vlan,
    IpAddress,
    IpPool,
    DhcpServer,
    Hotspot,
    HotspotIpBinding,
    FirewallFilter,
}

impl Menu {
    pub const fn path(self) -> &'static str {
        match self {
            Menu::Bridge => "/interface/bridge",
            Menu::Vlan => "/interface/vlan",
            Menu::IpAddress => "/ip/address",
            Menu::IpPool => "/ip/pool",
            Menu::DhcpServer => "/ip/dhcp-server",
            Menu::Hotspot => "/ip/hotspot",
            Menu::HotspotIpBinding => "/ip/hotspot/ip-binding",
            Menu::FirewallFilter => "/ip/firewall/filter",
        }
    }

    pub fn command(self, verb: &str) -> String {
        format!("{}/{verb}", self.path())
    }
}

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait RouterClient {
    async fn print(&self, menu: Menu) -> Result<Vec<Record>>;
    async fn add(&self, menu: Menu, attributes: Attributes) -> Result<String>;
    async fn remove(&self, menu: Menu, id: String) -> Result<()>;
}

/// Router client that opens a fresh authenticated connection for every call.
#[derive(Clone, Debug)]
pub struct RouterOsClient {
    config: RouterConfig,
}

impl RouterOsClient {
    pub fn new(config: RouterConfig) -> Self {
        RouterOsClient { config }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Connect and authenticate against the management API.
    pub async fn connect(&self) -> Result<Connection<TcpStream>> {
        let address = self.address();

        Self::with_timeout(
            self.config.timeout,
            Connection::connect(&address, &self.config.username, &self.config.password),
        )
        .await
        .context(format!("failed to connect to router at {address}"))
    }

    async fn execute(&self, command: String, attributes: Attributes) -> Result<Response> {
        info!("{command} @ {}", self.address());

        let mut connection = self.connect().await?;

        Self::with_timeout(self.config.timeout, connection.call(&command, &attributes))
            .await
            .context(format!("{command} failed"))
    }

    async fn with_timeout<T>(
        timeout: Option<std::time::Duration>,
        call: impl Future<Output = Result<T, ApiError>>,
    ) -> Result<T, ApiError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ApiError::Timeout(limit))?,
            None => call.await,
        }
    }
}

impl RouterClient for RouterOsClient {
    async fn print(&self, menu: Menu) -> Result<Vec<Record>> {
        Ok(self.execute(menu.command("print"), Vec::new()).await?.records)
    }

    async fn add(&self, menu: Menu, attributes: Attributes) -> Result<String> {
        let response = self.execute(menu.command("add"), attributes).await?;
        Ok(response.done.get("ret").unwrap_or_default().to_string())
    }

    async fn remove(&self, menu: Menu, id: String) -> Result<()> {
        self.execute(menu.command("remove"), attributes![".id" => id])
            .await
            .map(|_| ())
    }
}
