//! Home Assistant MQTT discovery
//!
//! One retained JSON config per metric on `<discovery_prefix>/<key>/config`.
//! Home Assistant groups the sensors into one device per resource through the
//! shared `device.identifiers`.

use crate::collector::{Metric, MetricSet};
use crate::error::Result;
use crate::publisher::MetricBus;
use crate::sensors::{definition, ValueClass};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

pub const MANUFACTURER: &str = "Proxmox";
pub const DISCOVERY_PACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub manufacturer: String,
    pub model: String,
    pub name: String,
}

/// Sensor config consumed by Home Assistant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationPayload {
    pub name: String,
    pub state_topic: String,
    pub unique_id: String,
    pub object_id: String,
    pub device: DeviceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<ValueClass>,
    pub icon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
}

impl RegistrationPayload {
    pub fn for_metric(set: &MetricSet, metric: &Metric) -> Self {
        let sensor = definition(metric.name);
        Self {
            name: sensor.name.to_string(),
            state_topic: set.state_topic(metric),
            unique_id: metric.key.clone(),
            object_id: metric.key.clone(),
            device: DeviceInfo {
                identifiers: vec![set.device_id.clone()],
                manufacturer: MANUFACTURER.to_string(),
                model: set.device_model.clone(),
                name: set.friendly_name.clone(),
            },
            unit_of_measurement: sensor.unit.map(str::to_string),
            device_class: sensor.device_class,
            icon: sensor.icon.to_string(),
            state_class: sensor.is_measurement().then(|| "measurement".to_string()),
        }
    }
}

pub struct DiscoveryEmitter {
    discovery_prefix: String,
    pace: Duration,
}

impl DiscoveryEmitter {
    pub fn new(discovery_prefix: impl Into<String>) -> Self {
        Self {
            discovery_prefix: discovery_prefix.into(),
            pace: DISCOVERY_PACE,
        }
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub fn config_topic(&self, metric: &Metric) -> String {
        format!("{}/{}/config", self.discovery_prefix, metric.key)
    }

    /// Publishes one config per metric, `pace` apart
    pub async fn emit<'a, B, I>(&self, bus: &B, sets: I) -> Result<usize>
    where
        B: MetricBus + ?Sized,
        I: IntoIterator<Item = &'a MetricSet>,
    {
        let mut emitted = 0;
        for set in sets {
            for metric in &set.metrics {
                if emitted > 0 {
                    tokio::time::sleep(self.pace).await;
                }
                let topic = self.config_topic(metric);
                let payload = serde_json::to_vec(&RegistrationPayload::for_metric(set, metric))?;
                debug!("Registering sensor {} on {}", metric.key, topic);
                bus.publish(&topic, payload, true).await?;
                emitted += 1;
            }
        }
        info!("Published {} discovery configs", emitted);
        Ok(emitted)
    }
}
