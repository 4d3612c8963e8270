/*!
# pvestats DevKit - test doubles for the Proxmox to MQTT agent

Lets the agent's pipeline run in tests without a broker or a hypervisor:
- MQTT stub recording every retained publish
- Canned Proxmox API responses served by path
- JSON builders shaped like the real `/api2/json` payloads
*/

pub mod fixtures;
pub mod mqtt_stub;

pub use fixtures::{FixtureApi, ProxmoxFixtures};
pub use mqtt_stub::{MockMessage, MockMqttClient};
