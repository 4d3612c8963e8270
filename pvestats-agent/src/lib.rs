//! pvestats agent - Proxmox utilization to MQTT
//!
//! Reads host, guest and storage statistics from the Proxmox VE API, turns
//! them into flat metrics and publishes them as retained MQTT messages,
//! optionally with Home Assistant discovery configs.

pub mod agent;
pub mod api;
pub mod collector;
pub mod config;
pub mod discovery;
pub mod error;
pub mod mqtt;
pub mod naming;
pub mod publisher;
pub mod remote;
pub mod resources;
pub mod sensors;
pub mod units;

pub use agent::{Agent, RunSummary};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
