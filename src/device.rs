//! Device identification.
//!
//! A process-wide, read-only table of known vendor/product ids, loaded once
//! and queried at connection setup. Overriding it is a configuration
//! operation: a replacement lookup set is installed wholesale (usually from
//! a JSON document); the builtin table itself is never mutated.

use std::sync::{Arc, OnceLock, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One known device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// USB vendor id.
    pub vendor: u16,
    /// USB product id.
    pub product: u16,
    /// Human-readable model name.
    pub label: String,
}

/// Builtin identification data.
const BUILTIN: &[(u16, u16, &str)] = &[
    // Sony
    (0x054c, 0x0038, "Sony S320 series"),
    (0x054c, 0x0066, "Sony T and SJ series"),
    (0x054c, 0x0095, "Sony S360"),
    (0x054c, 0x000a, "Sony NR series"),
    (0x054c, 0x00da, "Sony NX series"),
    (0x054c, 0x00e9, "Sony NZ series"),
    (0x054c, 0x0144, "Sony UX series"),
    (0x054c, 0x0169, "Sony TJ series"),
    // Handspring
    (0x082d, 0x0100, "Visor, Treo 300"),
    (0x082d, 0x0200, "Treo"),
    (0x082d, 0x0300, "Treo 600"),
    // Palm
    (0x0830, 0x0001, "m500"),
    (0x0830, 0x0002, "m505"),
    (0x0830, 0x0003, "m515"),
    (0x0830, 0x0020, "i705"),
    (0x0830, 0x0031, "Tungsten W"),
    (0x0830, 0x0040, "m125"),
    (0x0830, 0x0050, "m130"),
    (0x0830, 0x0060, "Tungsten series, Zire 71"),
    (0x0830, 0x0061, "Zire 31"),
    (0x0830, 0x0070, "Zire"),
    (0x0830, 0x0080, "Serial adapter"),
];

/// A lookup set of known devices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceTable {
    entries: Vec<DeviceEntry>,
}

impl DeviceTable {
    /// The builtin table, materialized once per process.
    pub fn builtin() -> &'static DeviceTable {
        static TABLE: OnceLock<DeviceTable> = OnceLock::new();
        TABLE.get_or_init(|| DeviceTable {
            entries: BUILTIN
                .iter()
                .map(|&(vendor, product, label)| DeviceEntry {
                    vendor,
                    product,
                    label: label.to_string(),
                })
                .collect(),
        })
    }

    /// Build a table from a JSON array of entries.
    ///
    /// ```
    /// use handlink::device::DeviceTable;
    ///
    /// let table = DeviceTable::from_json(
    ///     r#"[{"vendor": 2096, "product": 2, "label": "m505"}]"#,
    /// )
    /// .unwrap();
    /// assert!(table.lookup(0x0830, 0x0002).is_some());
    /// ```
    pub fn from_json(doc: &str) -> Result<Self> {
        let entries: Vec<DeviceEntry> = serde_json::from_str(doc)?;
        Ok(Self { entries })
    }

    /// Find a device by vendor and product id.
    pub fn lookup(&self, vendor: u16, product: u16) -> Option<&DeviceEntry> {
        self.entries
            .iter()
            .find(|e| e.vendor == vendor && e.product == product)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The override slot. `None` means the builtin table is active.
static ACTIVE: RwLock<Option<Arc<DeviceTable>>> = RwLock::new(None);

/// The active lookup set: the installed override, or the builtin table.
pub fn active_table() -> Arc<DeviceTable> {
    let slot = ACTIVE.read().expect("device table lock poisoned");
    match &*slot {
        Some(table) => Arc::clone(table),
        None => Arc::new(DeviceTable::builtin().clone()),
    }
}

/// Replace the active lookup set.
pub fn install_override(table: DeviceTable) {
    let mut slot = ACTIVE.write().expect("device table lock poisoned");
    *slot = Some(Arc::new(table));
}

/// Drop any override, restoring the builtin table.
pub fn clear_override() {
    let mut slot = ACTIVE.write().expect("device table lock poisoned");
    *slot = None;
}

/// Identify a device against the active lookup set.
pub fn identify(vendor: u16, product: u16) -> Option<DeviceEntry> {
    active_table().lookup(vendor, product).cloned()
}
