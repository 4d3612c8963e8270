//! Resource enumeration
//!
//! Turns the node status, the qemu/lxc guest lists (each guest merged with
//! its `status/current` record) and the storage list into uniform
//! `ResourceDescriptor`s. Any failed request aborts enumeration: aggregate
//! metrics such as unallocated CPUs are wrong without the full guest set.

use crate::api::ProxmoxApi;
use crate::error::{AgentError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Guest type as named by the API (`/nodes/{node}/qemu`, `/nodes/{node}/lxc`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GuestType {
    Qemu,
    Lxc,
}

impl GuestType {
    pub const ALL: [GuestType; 2] = [GuestType::Qemu, GuestType::Lxc];

    pub fn as_str(&self) -> &'static str {
        match self {
            GuestType::Qemu => "qemu",
            GuestType::Lxc => "lxc",
        }
    }
}

impl fmt::Display for GuestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Host,
    VirtualMachine,
    Container,
    NetworkStorage,
}

impl From<GuestType> for ResourceKind {
    fn from(guest_type: GuestType) -> Self {
        match guest_type {
            GuestType::Qemu => ResourceKind::VirtualMachine,
            GuestType::Lxc => ResourceKind::Container,
        }
    }
}

/// Normalized fields the collector reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Field {
    /// Bytes of memory available (host) or allocated (guest)
    MemTotal,
    /// Bytes of memory in use
    MemUsed,
    /// Bytes of disk available (host rootfs, storage) or allocated (guest)
    DiskTotal,
    /// Bytes of disk in use as reported by the API
    DiskUsed,
    /// Logical CPUs (host) or allocated vCPUs (guest)
    Cpus,
    /// Seconds since boot
    Uptime,
    /// Storage usage as a 0..1 fraction
    UsedFraction,
}

/// Where each field lives in the raw JSON of a record, as JSON pointers
const HOST_FIELDS: &[(Field, &str)] = &[
    (Field::MemTotal, "/memory/total"),
    (Field::MemUsed, "/memory/used"),
    (Field::DiskTotal, "/rootfs/total"),
    (Field::DiskUsed, "/rootfs/used"),
    (Field::Cpus, "/cpuinfo/cpus"),
    (Field::Uptime, "/uptime"),
];

const GUEST_FIELDS: &[(Field, &str)] = &[
    (Field::MemTotal, "/maxmem"),
    (Field::MemUsed, "/mem"),
    (Field::DiskTotal, "/maxdisk"),
    (Field::DiskUsed, "/disk"),
    (Field::Cpus, "/cpus"),
    (Field::Uptime, "/uptime"),
];

const STORAGE_FIELDS: &[(Field, &str)] = &[
    (Field::DiskTotal, "/total"),
    (Field::DiskUsed, "/used"),
    (Field::UsedFraction, "/used_fraction"),
];

#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(RawValue::Number),
            Value::String(s) => Some(RawValue::Text(s.clone())),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Number(n) => Some(*n),
            RawValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Loosely typed fields of one API record.
///
/// Absent or unparsable numeric fields read as `0`. This skews derived
/// ratios when the API omits a value (a stopped guest reports no `mem`) and
/// is accepted behavior: it never fails the run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFields(BTreeMap<Field, RawValue>);

impl RawFields {
    pub fn from_json(record: &Value, mapping: &[(Field, &str)]) -> Self {
        let fields = mapping
            .iter()
            .filter_map(|(field, pointer)| {
                record
                    .pointer(pointer)
                    .and_then(RawValue::from_json)
                    .map(|value| (*field, value))
            })
            .collect();
        RawFields(fields)
    }

    /// Fields of `other` replace ours
    pub fn merge(mut self, other: RawFields) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn insert(&mut self, field: Field, value: RawValue) {
        self.0.insert(field, value);
    }

    pub fn get(&self, field: Field) -> Option<&RawValue> {
        self.0.get(&field)
    }

    /// Non-negative integer value; 0 when absent, negative or not a number
    pub fn count_or_zero(&self, field: Field) -> u64 {
        self.number_or_zero(field).max(0.0) as u64
    }

    /// Numeric value; 0 when absent or not a number
    pub fn number_or_zero(&self, field: Field) -> f64 {
        self.get(field)
            .and_then(RawValue::as_f64)
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }
}

/// One monitored resource for the current cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub id: String,
    pub kind: ResourceKind,
    pub raw_name: Option<String>,
    pub fields: RawFields,
}

/// Everything monitored on the node, in publish order
#[derive(Debug, Clone)]
pub struct Inventory {
    pub host: ResourceDescriptor,
    pub guests: Vec<ResourceDescriptor>,
    /// `None` when the configured volume is not in the storage list
    pub storage: Option<ResourceDescriptor>,
    pub storage_name: String,
}

impl Inventory {
    /// vCPUs allocated across every guest
    pub fn allocated_cpus(&self) -> u64 {
        self.guests
            .iter()
            .map(|g| g.fields.count_or_zero(Field::Cpus))
            .sum()
    }
}

/// Queries every monitored resource of `node`
pub async fn enumerate<A>(api: &A, node: &str, storage_name: &str) -> Result<Inventory>
where
    A: ProxmoxApi + ?Sized,
{
    let host = host_descriptor(api, node).await?;

    let mut guests = Vec::new();
    for guest_type in GuestType::ALL {
        guests.extend(guest_descriptors(api, node, guest_type).await?);
    }

    let storage = storage_descriptor(api, node, storage_name).await?;

    debug!(
        "Enumerated node {}: {} guests, storage {} {}",
        node,
        guests.len(),
        storage_name,
        if storage.is_some() { "found" } else { "missing" }
    );

    Ok(Inventory {
        host,
        guests,
        storage,
        storage_name: storage_name.to_string(),
    })
}

async fn host_descriptor<A>(api: &A, node: &str) -> Result<ResourceDescriptor>
where
    A: ProxmoxApi + ?Sized,
{
    let status = api.get_json(&format!("/nodes/{node}/status")).await?;
    Ok(ResourceDescriptor {
        id: node.to_string(),
        kind: ResourceKind::Host,
        raw_name: Some(node.to_string()),
        fields: RawFields::from_json(&status, HOST_FIELDS),
    })
}

async fn guest_descriptors<A>(
    api: &A,
    node: &str,
    guest_type: GuestType,
) -> Result<Vec<ResourceDescriptor>>
where
    A: ProxmoxApi + ?Sized,
{
    let list_path = format!("/nodes/{node}/{guest_type}");
    let list = api.get_json(&list_path).await?;
    let entries = list
        .as_array()
        .ok_or_else(|| AgentError::api(&list_path, "expected a list of guests"))?;

    let mut descriptors = Vec::with_capacity(entries.len());
    for summary in entries {
        let vmid = vmid_of(summary)
            .ok_or_else(|| AgentError::api(&list_path, "guest entry without vmid"))?;

        let detail = api
            .get_json(&format!("/nodes/{node}/{guest_type}/{vmid}/status/current"))
            .await?;

        let fields = RawFields::from_json(summary, GUEST_FIELDS)
            .merge(RawFields::from_json(&detail, GUEST_FIELDS));
        let raw_name = name_of(&detail).or_else(|| name_of(summary));

        descriptors.push(ResourceDescriptor {
            id: vmid,
            kind: guest_type.into(),
            raw_name,
            fields,
        });
    }

    Ok(descriptors)
}

async fn storage_descriptor<A>(
    api: &A,
    node: &str,
    storage_name: &str,
) -> Result<Option<ResourceDescriptor>>
where
    A: ProxmoxApi + ?Sized,
{
    let path = format!("/nodes/{node}/storage");
    let list = api.get_json(&path).await?;
    let entries = list
        .as_array()
        .ok_or_else(|| AgentError::api(&path, "expected a list of storages"))?;

    Ok(entries
        .iter()
        .find(|entry| entry.get("storage").and_then(Value::as_str) == Some(storage_name))
        .map(|entry| ResourceDescriptor {
            id: storage_name.to_string(),
            kind: ResourceKind::NetworkStorage,
            raw_name: Some(storage_name.to_string()),
            fields: RawFields::from_json(entry, STORAGE_FIELDS),
        }))
}

/// vmid is a number for qemu and, depending on the PVE version, a string for lxc
fn vmid_of(record: &Value) -> Option<String> {
    match record.get("vmid")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn name_of(record: &Value) -> Option<String> {
    record
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
