//! Metric collection for Proxmox resources
//!
//! Derives the flat metric set of every resource:
//! - Host: disk size, CPUs (total and unallocated), memory/disk usage, last boot
//! - VM / LXC: usage percentages, share of host memory, allocations, last boot
//! - NAS: capacity in decimal units, matching the vendor's labeling
//!
//! Keys are `proxmox_host_<metric>`, `proxmox_<qemu|lxc>_<vmid>_<metric>` and
//! `proxmox_nas_<metric>`, so they never collide within a cycle.

use crate::config::SshTargets;
use crate::error::Result;
use crate::naming::friendly_name;
use crate::remote::{remote_disk_used_percent, RemoteShell};
use crate::resources::{Field, GuestType, Inventory, ResourceDescriptor, ResourceKind};
use crate::units::{bytes_to_gb, bytes_to_tb, ceil_gib, floor_mib, guarded_percent, round_to};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use tracing::{debug, warn};

pub const KEY_PREFIX: &str = "proxmox";

/// Every metric the collector can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    DiskSizeGb,
    TotalCpus,
    UnallocatedCpus,
    MemoryUsedPercent,
    DiskUsedPercent,
    LastBootTime,
    PercentOfHostMemory,
    Cpus,
    MemoryAllocatedMb,
    DiskAllocatedGb,
    DiskSizeTb,
    DiskUsedGb,
}

impl MetricName {
    pub const ALL: [MetricName; 12] = [
        MetricName::DiskSizeGb,
        MetricName::TotalCpus,
        MetricName::UnallocatedCpus,
        MetricName::MemoryUsedPercent,
        MetricName::DiskUsedPercent,
        MetricName::LastBootTime,
        MetricName::PercentOfHostMemory,
        MetricName::Cpus,
        MetricName::MemoryAllocatedMb,
        MetricName::DiskAllocatedGb,
        MetricName::DiskSizeTb,
        MetricName::DiskUsedGb,
    ];

    /// Key suffix
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::DiskSizeGb => "disk_size_gb",
            MetricName::TotalCpus => "total_cpus",
            MetricName::UnallocatedCpus => "unallocated_cpus",
            MetricName::MemoryUsedPercent => "memory_used_percent",
            MetricName::DiskUsedPercent => "disk_used_percent",
            MetricName::LastBootTime => "last_boot_time",
            MetricName::PercentOfHostMemory => "percent_of_host_memory",
            MetricName::Cpus => "cpus",
            MetricName::MemoryAllocatedMb => "memory_allocated_mb",
            MetricName::DiskAllocatedGb => "disk_allocated_gb",
            MetricName::DiskSizeTb => "disk_size_tb",
            MetricName::DiskUsedGb => "disk_used_gb",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
    /// ISO-8601 UTC timestamp
    Timestamp(String),
}

/// Scalar text form sent as the MQTT payload (`50.0`, `6`, `2024-01-01T00:00:00+00:00`)
impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Integer(v) => write!(f, "{v}"),
            MetricValue::Float(v) => write!(f, "{v:?}"),
            MetricValue::Timestamp(v) => f.write_str(v),
        }
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Integer(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub key: String,
    pub name: MetricName,
    pub value: MetricValue,
}

/// Metrics of one resource plus the device block used for discovery
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSet {
    pub device_id: String,
    pub device_model: String,
    pub friendly_name: String,
    pub topic_prefix: String,
    pub metrics: Vec<Metric>,
}

impl MetricSet {
    fn new(device_id: String, device_model: &str, friendly_name: String, topic_prefix: String) -> Self {
        Self {
            device_id,
            device_model: device_model.to_string(),
            friendly_name,
            topic_prefix,
            metrics: Vec::new(),
        }
    }

    /// Appends `<device_id>_<name>`
    fn push(&mut self, name: MetricName, value: impl Into<MetricValue>) {
        self.metrics.push(Metric {
            key: format!("{}_{}", self.device_id, name),
            name,
            value: value.into(),
        });
    }

    pub fn get(&self, name: MetricName) -> Option<&MetricValue> {
        self.metrics.iter().find(|m| m.name == name).map(|m| &m.value)
    }

    /// State topic of one metric
    pub fn state_topic(&self, metric: &Metric) -> String {
        format!("{}/{}", self.topic_prefix, metric.key)
    }
}

/// Storage result: metrics, or the name of the volume that was not found
#[derive(Debug, Clone, PartialEq)]
pub enum StorageStats {
    Found(MetricSet),
    NotFound(String),
}

/// Result of one collection cycle, in publish order
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedStats {
    pub host: MetricSet,
    pub guests: Vec<MetricSet>,
    pub storage: StorageStats,
}

impl CollectedStats {
    /// Host, then guests in enumeration order, then storage when found
    pub fn metric_sets(&self) -> impl Iterator<Item = &MetricSet> {
        let storage = match &self.storage {
            StorageStats::Found(set) => Some(set),
            StorageStats::NotFound(_) => None,
        };
        std::iter::once(&self.host)
            .chain(self.guests.iter())
            .chain(storage)
    }

    pub fn metric_count(&self) -> usize {
        self.metric_sets().map(|s| s.metrics.len()).sum()
    }
}

/// Host-wide figures guest metrics are measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostTotals {
    /// Memory the host reports as total (what guests can actually get)
    pub total_mem: u64,
    pub allocated_cpus: u64,
}

impl HostTotals {
    pub fn from_inventory(inventory: &Inventory) -> Self {
        Self {
            total_mem: inventory.host.fields.count_or_zero(Field::MemTotal),
            allocated_cpus: inventory.allocated_cpus(),
        }
    }
}

/// Derives metric sets from descriptors
pub struct Collector<'a, R: ?Sized> {
    topic_prefix: &'a str,
    ssh: &'a SshTargets,
    shell: &'a R,
    now: DateTime<Utc>,
}

impl<'a, R> Collector<'a, R>
where
    R: RemoteShell + ?Sized,
{
    pub fn new(topic_prefix: &'a str, ssh: &'a SshTargets, shell: &'a R, now: DateTime<Utc>) -> Self {
        Self {
            topic_prefix,
            ssh,
            shell,
            now,
        }
    }

    /// Collects every resource of the inventory, sequentially
    pub async fn collect_all(&self, inventory: &Inventory) -> Result<CollectedStats> {
        let totals = HostTotals::from_inventory(inventory);

        let host = self.collect_host(&inventory.host, &totals);

        let mut guests = Vec::with_capacity(inventory.guests.len());
        for guest in &inventory.guests {
            guests.push(self.collect(guest, &totals).await?);
        }

        let storage = match &inventory.storage {
            Some(descriptor) => StorageStats::Found(self.collect_storage(descriptor)),
            None => {
                warn!("Storage {} not found, skipping NAS metrics", inventory.storage_name);
                StorageStats::NotFound(inventory.storage_name.clone())
            }
        };

        Ok(CollectedStats {
            host,
            guests,
            storage,
        })
    }

    /// Dispatches on the descriptor kind; a storage descriptor always yields metrics
    pub async fn collect(&self, descriptor: &ResourceDescriptor, totals: &HostTotals) -> Result<MetricSet> {
        match descriptor.kind {
            ResourceKind::Host => Ok(self.collect_host(descriptor, totals)),
            ResourceKind::VirtualMachine => {
                self.collect_guest(GuestType::Qemu, descriptor, totals).await
            }
            ResourceKind::Container => self.collect_guest(GuestType::Lxc, descriptor, totals).await,
            ResourceKind::NetworkStorage => Ok(self.collect_storage(descriptor)),
        }
    }

    pub fn collect_host(&self, host: &ResourceDescriptor, totals: &HostTotals) -> MetricSet {
        let device_id = format!("{KEY_PREFIX}_host");
        let topic_prefix = format!("{}/{}", self.topic_prefix, device_id);
        let mut set = MetricSet::new(device_id, "Proxmox Host", "Proxmox Host".to_string(), topic_prefix);

        let fields = &host.fields;
        let total_mem = fields.count_or_zero(Field::MemTotal);
        let total_disk = fields.count_or_zero(Field::DiskTotal);
        let total_cpus = fields.count_or_zero(Field::Cpus);
        let unallocated_cpus = total_cpus as i64 - totals.allocated_cpus as i64;

        set.push(MetricName::DiskSizeGb, ceil_gib(total_disk));
        set.push(MetricName::TotalCpus, total_cpus);
        set.push(MetricName::UnallocatedCpus, unallocated_cpus);
        set.push(
            MetricName::MemoryUsedPercent,
            guarded_percent(fields.count_or_zero(Field::MemUsed), total_mem),
        );
        set.push(
            MetricName::DiskUsedPercent,
            guarded_percent(fields.count_or_zero(Field::DiskUsed), total_disk),
        );
        set.push(
            MetricName::LastBootTime,
            self.last_boot_time(fields.count_or_zero(Field::Uptime)),
        );

        set
    }

    /// Metrics of a VM or container; `guest_type` decides keys, model and disk source
    pub async fn collect_guest(
        &self,
        guest_type: GuestType,
        guest: &ResourceDescriptor,
        totals: &HostTotals,
    ) -> Result<MetricSet> {
        let tag = guest_type.as_str();
        let device_id = format!("{KEY_PREFIX}_{tag}_{}", guest.id);
        let topic_prefix = format!("{}/{KEY_PREFIX}_{tag}/{}", self.topic_prefix, guest.id);
        let model = match guest_type {
            GuestType::Qemu => "VM",
            GuestType::Lxc => "LXC",
        };
        let name = friendly_name(&guest.id, guest.raw_name.as_deref(), tag);
        let mut set = MetricSet::new(device_id, model, name, topic_prefix);

        let fields = &guest.fields;
        let mem_alloc = fields.count_or_zero(Field::MemTotal);
        let mem_used = fields.count_or_zero(Field::MemUsed);
        let disk_alloc = fields.count_or_zero(Field::DiskTotal);

        set.push(
            MetricName::LastBootTime,
            self.last_boot_time(fields.count_or_zero(Field::Uptime)),
        );
        set.push(MetricName::MemoryUsedPercent, guarded_percent(mem_used, mem_alloc));
        if let Some(percent) = self.guest_disk_used_percent(guest_type, guest).await? {
            set.push(MetricName::DiskUsedPercent, percent);
        }
        set.push(
            MetricName::PercentOfHostMemory,
            guarded_percent(mem_used, totals.total_mem),
        );
        set.push(MetricName::Cpus, fields.count_or_zero(Field::Cpus));
        set.push(MetricName::MemoryAllocatedMb, floor_mib(mem_alloc));
        set.push(MetricName::DiskAllocatedGb, ceil_gib(disk_alloc));

        Ok(set)
    }

    /// Containers report their own disk usage; VMs need a shell inside the guest
    async fn guest_disk_used_percent(
        &self,
        guest_type: GuestType,
        guest: &ResourceDescriptor,
    ) -> Result<Option<f64>> {
        match guest_type {
            GuestType::Qemu => match self.ssh.get(&guest.id) {
                Some(target) => {
                    let percent = remote_disk_used_percent(self.shell, target).await?;
                    debug!("VM {} disk usage from {}: {}%", guest.id, target, percent);
                    Ok(Some(percent))
                }
                None => {
                    debug!("No SSH target for VM {}, disk usage not reported", guest.id);
                    Ok(None)
                }
            },
            GuestType::Lxc => Ok(Some(guarded_percent(
                guest.fields.count_or_zero(Field::DiskUsed),
                guest.fields.count_or_zero(Field::DiskTotal),
            ))),
        }
    }

    /// Decimal units and one-decimal percentage, as the NAS itself reports capacity
    pub fn collect_storage(&self, storage: &ResourceDescriptor) -> MetricSet {
        let device_id = format!("{KEY_PREFIX}_nas");
        let topic_prefix = format!("{}/{}", self.topic_prefix, device_id);
        let mut set = MetricSet::new(device_id, "NAS", "NAS".to_string(), topic_prefix);

        let fields = &storage.fields;
        set.push(
            MetricName::DiskSizeTb,
            round_to(bytes_to_tb(fields.count_or_zero(Field::DiskTotal)), 2),
        );
        set.push(
            MetricName::DiskUsedGb,
            round_to(bytes_to_gb(fields.count_or_zero(Field::DiskUsed)), 2),
        );
        set.push(
            MetricName::DiskUsedPercent,
            round_to(fields.number_or_zero(Field::UsedFraction) * 100.0, 1),
        );

        set
    }

    fn last_boot_time(&self, uptime_secs: u64) -> MetricValue {
        let uptime = i64::try_from(uptime_secs).unwrap_or(i64::MAX);
        let boot = self.now.timestamp().saturating_sub(uptime);
        let boot = DateTime::<Utc>::from_timestamp(boot, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        MetricValue::Timestamp(boot.to_rfc3339_opts(SecondsFormat::Secs, false))
    }
}
