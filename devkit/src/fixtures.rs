/*!
Canned Proxmox API responses

`ProxmoxFixtures` builds JSON bodies shaped like the `data` member of the real
`/api2/json` responses; `FixtureApi` serves them by request path and records
which paths were requested. An unknown path is an error, the same way an
unreachable endpoint fails the real client.
*/

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

/// JSON builders for the endpoints the agent reads
pub struct ProxmoxFixtures;

impl ProxmoxFixtures {
    /// `/nodes/{node}/status`
    pub fn node_status(
        mem_total: u64,
        mem_used: u64,
        disk_total: u64,
        disk_used: u64,
        cpus: u64,
        uptime: u64,
    ) -> Value {
        json!({
            "uptime": uptime,
            "memory": { "total": mem_total, "used": mem_used, "free": mem_total.saturating_sub(mem_used) },
            "rootfs": { "total": disk_total, "used": disk_used, "avail": disk_total.saturating_sub(disk_used) },
            "cpuinfo": { "cpus": cpus, "model": "Intel(R) Core(TM) i5", "sockets": 1 },
            "cpu": 0.05
        })
    }

    /// One entry of `/nodes/{node}/qemu` or `/nodes/{node}/lxc`
    pub fn guest_summary(vmid: u64, name: Option<&str>, cpus: u64) -> Value {
        let mut entry = json!({ "vmid": vmid, "status": "running", "cpus": cpus });
        if let Some(name) = name {
            entry["name"] = json!(name);
        }
        entry
    }

    /// `/nodes/{node}/{type}/{vmid}/status/current`
    pub fn guest_status(
        name: Option<&str>,
        mem: u64,
        maxmem: u64,
        disk: u64,
        maxdisk: u64,
        cpus: u64,
        uptime: u64,
    ) -> Value {
        let mut status = json!({
            "status": "running",
            "mem": mem,
            "maxmem": maxmem,
            "disk": disk,
            "maxdisk": maxdisk,
            "cpus": cpus,
            "uptime": uptime
        });
        if let Some(name) = name {
            status["name"] = json!(name);
        }
        status
    }

    /// One entry of `/nodes/{node}/storage`
    pub fn storage_entry(name: &str, total: u64, used: u64, used_fraction: f64) -> Value {
        json!({
            "storage": name,
            "type": "cifs",
            "active": 1,
            "total": total,
            "used": used,
            "avail": total.saturating_sub(used),
            "used_fraction": used_fraction
        })
    }
}

/// Path-indexed fake of the Proxmox API
pub struct FixtureApi {
    node: String,
    responses: HashMap<String, Value>,
    requests: Mutex<Vec<String>>,
}

impl FixtureApi {
    /// Empty node: no guests, no storage entries, host status must be added
    pub fn for_node<S: Into<String>>(node: S) -> Self {
        let node = node.into();
        let mut responses = HashMap::new();
        responses.insert(format!("/nodes/{node}/qemu"), json!([]));
        responses.insert(format!("/nodes/{node}/lxc"), json!([]));
        responses.insert(format!("/nodes/{node}/storage"), json!([]));
        Self {
            node,
            responses,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Serve an arbitrary body for a path
    pub fn with_response<S: Into<String>>(mut self, path: S, body: Value) -> Self {
        self.responses.insert(path.into(), body);
        self
    }

    /// Drop a path so requesting it fails
    pub fn without<S: AsRef<str>>(mut self, path: S) -> Self {
        self.responses.remove(path.as_ref());
        self
    }

    pub fn with_host_status(self, status: Value) -> Self {
        let path = format!("/nodes/{}/status", self.node);
        self.with_response(path, status)
    }

    /// Adds a guest to the list endpoint of `guest_type` and serves its detail record
    pub fn with_guest(mut self, guest_type: &str, summary: Value, status: Value) -> Self {
        let vmid = summary["vmid"].to_string().trim_matches('"').to_string();
        let list_path = format!("/nodes/{}/{}", self.node, guest_type);
        if let Some(list) = self
            .responses
            .entry(list_path)
            .or_insert_with(|| json!([]))
            .as_array_mut()
        {
            list.push(summary);
        }
        let status_path = format!("/nodes/{}/{}/{}/status/current", self.node, guest_type, vmid);
        self.with_response(status_path, status)
    }

    pub fn with_storage(mut self, entry: Value) -> Self {
        let path = format!("/nodes/{}/storage", self.node);
        if let Some(list) = self
            .responses
            .entry(path)
            .or_insert_with(|| json!([]))
            .as_array_mut()
        {
            list.push(entry);
        }
        self
    }

    /// Canned `data` payload for a path
    pub fn get(&self, path: &str) -> Result<Value> {
        self.requests.lock().unwrap().push(path.to_string());
        self.responses
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no fixture for GET {path}"))
    }

    /// Paths requested so far, in order
    pub fn requested_paths(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}
