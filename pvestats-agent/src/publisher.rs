//! Retained metric publishing
//!
//! Every metric goes to `<topic_prefix>/<key>` as its scalar text form with
//! the retain flag set, so Home Assistant reads the last value on restart.

use crate::collector::MetricSet;
use crate::error::Result;
use async_trait::async_trait;
use tracing::debug;

/// Publish side of the MQTT session
#[async_trait]
pub trait MetricBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()>;

    /// Flushes queued publishes and closes the session
    async fn disconnect(&self) -> Result<()>;
}

/// Publishes each set in order; the first failed publish aborts
pub async fn publish_metrics<'a, B, I>(bus: &B, sets: I) -> Result<usize>
where
    B: MetricBus + ?Sized,
    I: IntoIterator<Item = &'a MetricSet>,
{
    let mut published = 0;
    for set in sets {
        for metric in &set.metrics {
            let topic = set.state_topic(metric);
            let payload = metric.value.to_string();
            debug!("Publishing {} = {}", topic, payload);
            bus.publish(&topic, payload.into_bytes(), true).await?;
            published += 1;
        }
    }
    Ok(published)
}
