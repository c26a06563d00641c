//! Router port allocation
//!
//! Bridge listeners need a router-side port. [`FreePorts`] is an ordered
//! free list of disjoint inclusive ranges; [`PortMapping`] hands those ports
//! out by logical key and can be rebuilt from a persisted [`RouterConfig`]
//! so a restart never hands out a port that is still referenced.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use interconnect_common::{Error, Result};

use crate::config::RouterConfig;

/// Lowest port managed by the pool
pub const MIN_PORT: u16 = 1024;
/// Highest port managed by the pool
pub const MAX_PORT: u16 = 65535;

/// Inclusive range of free ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    /// First port
    pub start: u16,
    /// Last port
    pub end: u16,
}

impl PortRange {
    /// Number of ports in the range
    pub fn size(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }

    fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}-{})", self.start, self.end)
    }
}

/// Free list of router ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreePorts {
    available: Vec<PortRange>,
}

impl Default for FreePorts {
    fn default() -> Self {
        Self::new()
    }
}

impl FreePorts {
    /// A pool with every port from [`MIN_PORT`] to [`MAX_PORT`] free
    pub fn new() -> Self {
        Self {
            available: vec![PortRange {
                start: MIN_PORT,
                end: MAX_PORT,
            }],
        }
    }

    /// The free ranges, in ascending order
    pub fn available(&self) -> &[PortRange] {
        &self.available
    }

    /// Mark a port as taken
    ///
    /// Returns false if the port was not free.
    pub fn in_use(&mut self, port: u16) -> bool {
        let Some(index) = self.available.iter().position(|r| r.contains(port)) else {
            return false;
        };
        let range = self.available[index];
        match (range.start == port, range.end == port) {
            (true, true) => {
                self.available.remove(index);
            }
            (true, false) => self.available[index].start = port + 1,
            (false, true) => self.available[index].end = port - 1,
            (false, false) => {
                self.available[index].end = port - 1;
                self.available.insert(
                    index + 1,
                    PortRange {
                        start: port + 1,
                        end: range.end,
                    },
                );
            }
        }
        true
    }

    /// Return a port to the pool, merging it with adjacent ranges
    ///
    /// Returns false if the port was already free or is outside the pool.
    pub fn release(&mut self, port: u16) -> bool {
        if !(MIN_PORT..=MAX_PORT).contains(&port) {
            return false;
        }
        // index of the first range starting after the port
        let index = self.available.partition_point(|r| r.start <= port);
        if index > 0 && self.available[index - 1].contains(port) {
            return false;
        }
        let joins_previous = index > 0 && self.available[index - 1].end == port - 1;
        let joins_next = index < self.available.len() && self.available[index].start == port + 1;
        match (joins_previous, joins_next) {
            (true, true) => {
                self.available[index - 1].end = self.available[index].end;
                self.available.remove(index);
            }
            (true, false) => self.available[index - 1].end = port,
            (false, true) => self.available[index].start = port,
            (false, false) => self.available.insert(
                index,
                PortRange {
                    start: port,
                    end: port,
                },
            ),
        }
        true
    }

    /// Take the lowest free port
    pub fn next_free_port(&mut self) -> Option<u16> {
        let port = self.available.first()?.start;
        self.in_use(port);
        Some(port)
    }
}

impl fmt::Display for FreePorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, range) in self.available.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{range}")?;
        }
        write!(f, "]")
    }
}

/// Router ports allocated by logical key
#[derive(Debug, Clone, Default)]
pub struct PortMapping {
    pool: FreePorts,
    mappings: BTreeMap<String, u16>,
}

impl PortMapping {
    /// A mapping with an empty table and a full pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the mapping from a persisted configuration
    ///
    /// Every listener port is taken out of the pool. Every bridge TCP
    /// listener with a numeric port is mapped under its name. Malformed
    /// ports are logged and skipped.
    pub fn recover(config: Option<&RouterConfig>) -> Self {
        let mut mapping = Self::new();
        let Some(config) = config else {
            return mapping;
        };
        for listener in config.listeners.values() {
            mapping.pool.in_use(listener.port);
        }
        for (name, endpoint) in &config.bridges.tcp_listeners {
            match endpoint.port.parse::<u16>() {
                Ok(port) => {
                    mapping.pool.in_use(port);
                    mapping.mappings.insert(name.clone(), port);
                }
                Err(e) => warn!(
                    listener = %name,
                    port = %endpoint.port,
                    error = %e,
                    "Could not parse port for tcp listener"
                ),
            }
        }
        debug!(recovered = mapping.mappings.len(), free = %mapping.pool, "Recovered port mapping");
        mapping
    }

    /// The port mapped to `key`, allocating one if needed
    pub fn get_port_for_key(&mut self, key: &str) -> Result<u16> {
        if let Some(port) = self.mappings.get(key) {
            return Ok(*port);
        }
        let port = self
            .pool
            .next_free_port()
            .ok_or_else(|| Error::ports_exhausted(key))?;
        self.mappings.insert(key.to_string(), port);
        debug!(key = %key, port, "Allocated router port");
        Ok(port)
    }

    /// Return the port mapped to `key` to the pool
    pub fn release_port_for_key(&mut self, key: &str) {
        if let Some(port) = self.mappings.remove(key) {
            self.pool.release(port);
            debug!(key = %key, port, "Released router port");
        }
    }

    /// The port mapped to `key`, if any
    pub fn port_for_key(&self, key: &str) -> Option<u16> {
        self.mappings.get(key).copied()
    }

    /// The free pool
    pub fn free_ports(&self) -> &FreePorts {
        &self.pool
    }
}
