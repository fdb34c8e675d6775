pub mod mnet_application;
pub mod mnet_audit_log;
pub mod mnet_config;
pub mod mnet_host;
pub mod user;
