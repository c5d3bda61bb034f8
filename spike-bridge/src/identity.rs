//! Interface identities and the ports and names derived from them.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;

use crate::error::ConfigError;

/// Prefix for per-interface node names on the bus.
pub const NODE_PREFIX: &str = "spike_bridge_interface";

/// Hands out interface ids. Ids only grow; a torn-down interface's id is
/// never handed out again by the same registry.
#[derive(Debug)]
pub struct InterfaceRegistry {
    next: AtomicU32,
}

static PROCESS_REGISTRY: InterfaceRegistry = InterfaceRegistry::new();

impl InterfaceRegistry {
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
        }
    }

    /// The registry shared by every interface in this process.
    pub fn process() -> &'static InterfaceRegistry {
        &PROCESS_REGISTRY
    }

    pub fn allocate(&self) -> InterfaceId {
        InterfaceId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// How many ids have been handed out.
    pub fn issued(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for InterfaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct InterfaceId(u32);

impl InterfaceId {
    pub fn get(self) -> u32 {
        self.0
    }

    /// `base + id`, or a config error if that leaves the port range.
    pub fn port(self, base: u16) -> Result<u16, ConfigError> {
        u16::try_from(self.0)
            .ok()
            .and_then(|id| base.checked_add(id))
            .ok_or(ConfigError::PortOverflow { base, id: self.0 })
    }

    pub fn node_name(self) -> String {
        format!("{}_{}", NODE_PREFIX, self.0)
    }

    /// `<prefix>_<id>`, for callers that want per-interface topics.
    pub fn scoped(self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.0)
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
