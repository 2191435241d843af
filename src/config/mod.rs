// # Configuration Module
//
// Property-file loading with environment overlays, process-wide property
// resolution for URL placeholders, server-level settings, and the cached
// per-data-source configuration resolver.

pub mod datasource;
pub mod properties;
pub mod server;

pub use datasource::{ConfigResolver, DataSourceConfiguration};
pub use properties::{load_properties, process_properties, Properties};
pub use server::ServerConfig;
