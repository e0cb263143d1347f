pub mod config;

pub use config::{AntiAffinity, GlobalConfig, MasterConfig, PsConfig, VgridConfig};
