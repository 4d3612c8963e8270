//! Home Assistant sensor catalog
//!
//! Display name, unit, device class and icon for every `MetricName`. The
//! lookup is an exhaustive match, so adding a metric without describing it
//! does not compile.

use crate::collector::MetricName;
use serde::Serialize;

/// Home Assistant `device_class`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueClass {
    DataSize,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorDefinition {
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub device_class: Option<ValueClass>,
    pub icon: &'static str,
}

impl SensorDefinition {
    const fn new(
        name: &'static str,
        unit: Option<&'static str>,
        device_class: Option<ValueClass>,
        icon: &'static str,
    ) -> Self {
        Self {
            name,
            unit,
            device_class,
            icon,
        }
    }

    /// Timestamps are not measurements and get no `state_class`
    pub fn is_measurement(&self) -> bool {
        self.device_class != Some(ValueClass::Timestamp)
    }
}

const PERCENT: Option<&str> = Some("%");

pub fn definition(name: MetricName) -> SensorDefinition {
    use MetricName::*;
    use ValueClass::*;

    match name {
        MemoryUsedPercent => SensorDefinition::new("Memory Used", PERCENT, None, "mdi:memory"),
        DiskUsedPercent => SensorDefinition::new("Disk Used", PERCENT, None, "mdi:harddisk"),
        LastBootTime => {
            SensorDefinition::new("Last Boot Time", None, Some(Timestamp), "mdi:clock-outline")
        }
        DiskSizeGb => SensorDefinition::new("Disk Size", Some("GB"), Some(DataSize), "mdi:harddisk"),
        TotalCpus => SensorDefinition::new("Total CPUs", None, None, "mdi:cpu-64-bit"),
        UnallocatedCpus => SensorDefinition::new("Unallocated CPUs", None, None, "mdi:cpu-64-bit"),
        PercentOfHostMemory => {
            SensorDefinition::new("% of Host Memory", PERCENT, None, "mdi:memory")
        }
        Cpus => SensorDefinition::new("CPUs", None, None, "mdi:cpu-64-bit"),
        MemoryAllocatedMb => {
            SensorDefinition::new("Memory Allocated", Some("MB"), Some(DataSize), "mdi:memory")
        }
        DiskAllocatedGb => {
            SensorDefinition::new("Disk Allocated", Some("GB"), Some(DataSize), "mdi:harddisk")
        }
        DiskSizeTb => {
            SensorDefinition::new("Disk Size", Some("TB"), Some(DataSize), "mdi:harddisk")
        }
        DiskUsedGb => {
            SensorDefinition::new("Disk Used", Some("GB"), Some(DataSize), "mdi:harddisk")
        }
    }
}

/// Catalog entry whose suffix is the longest match for `key`
pub fn lookup_by_key(key: &str) -> Option<(MetricName, SensorDefinition)> {
    MetricName::ALL
        .iter()
        .filter(|name| key.ends_with(&format!("_{}", name.as_str())))
        .max_by_key(|name| name.as_str().len())
        .map(|name| (*name, definition(*name)))
}
