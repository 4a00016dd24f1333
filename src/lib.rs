pub mod config;
pub mod envfile;
pub mod error;
pub mod gce;
pub mod health;
pub mod logging;
pub mod notify;
pub mod watchdog;
