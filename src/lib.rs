pub mod api;
pub mod config;
pub mod http_response;
pub mod mac_address;
pub mod routeros_client;
pub mod routeros_connection;
pub mod services;
