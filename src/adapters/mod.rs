pub mod config_store;
pub mod http_client;

pub use config_store::TomlConfigStore;
pub use http_client::ReqwestHttpClient;
