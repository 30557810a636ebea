//! RTP/RTCP port allocation
//!
//! Streams whose local description does not already carry ports get an
//! adjacent pair (even RTP port, RTCP on the next odd port) from the
//! allocator shared by every call of the media core.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, StreamError};

/// How the next RTP port is picked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AllocationStrategy {
    /// Lowest free even port
    #[default]
    Sequential,
    /// Random free even port
    Random,
}

/// Port range and strategy of an allocator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAllocatorConfig {
    pub min_port: u16,
    pub max_port: u16,
    pub strategy: AllocationStrategy,
}

impl Default for PortAllocatorConfig {
    fn default() -> Self {
        Self {
            min_port: 9078,
            max_port: 10078,
            strategy: AllocationStrategy::Sequential,
        }
    }
}

/// RTP and RTCP ports of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PortConfig {
    pub rtp_port: u16,
    pub rtcp_port: u16,
}

impl PortConfig {
    pub fn is_set(&self) -> bool {
        self.rtp_port > 0 && self.rtcp_port > 0
    }
}

#[derive(Debug, Default)]
struct PortTable {
    in_use: BTreeSet<u16>,
    owners: HashMap<String, PortConfig>,
}

/// Allocator of RTP/RTCP port pairs
#[derive(Debug)]
pub struct PortAllocator {
    config: PortAllocatorConfig,
    table: Mutex<PortTable>,
}

impl PortAllocator {
    /// Create an allocator with the default range
    pub fn new() -> Self {
        Self::with_config(PortAllocatorConfig::default())
    }

    /// Create an allocator with a custom range
    pub fn with_config(config: PortAllocatorConfig) -> Self {
        Self {
            config,
            table: Mutex::new(PortTable::default()),
        }
    }

    fn exhausted(&self) -> StreamError {
        warn!(
            "Port range {}-{} exhausted",
            self.config.min_port, self.config.max_port
        );
        StreamError::PortsExhausted {
            min: self.config.min_port,
            max: self.config.max_port,
        }
    }

    /// Allocate an adjacent pair for `owner`
    ///
    /// Allocating twice for the same owner returns the pair already held.
    pub fn allocate_pair(&self, owner: &str) -> Result<PortConfig> {
        let mut table = self.table.lock();
        if let Some(existing) = table.owners.get(owner) {
            return Ok(*existing);
        }

        let Some(first) = self.config.min_port.checked_add(self.config.min_port % 2) else {
            return Err(self.exhausted());
        };
        let free: Vec<u16> = (first..self.config.max_port)
            .step_by(2)
            .filter(|p| match p.checked_add(1) {
                Some(rtcp) => !table.in_use.contains(p) && !table.in_use.contains(&rtcp),
                None => false,
            })
            .collect();

        let rtp_port = match self.config.strategy {
            _ if free.is_empty() => return Err(self.exhausted()),
            AllocationStrategy::Sequential => free[0],
            AllocationStrategy::Random => free[rand::thread_rng().gen_range(0..free.len())],
        };

        let ports = PortConfig {
            rtp_port,
            rtcp_port: rtp_port + 1,
        };
        table.in_use.insert(ports.rtp_port);
        table.in_use.insert(ports.rtcp_port);
        table.owners.insert(owner.to_string(), ports);
        debug!("Allocated ports {}/{} for {}", ports.rtp_port, ports.rtcp_port, owner);
        Ok(ports)
    }

    /// Give the pair held by `owner` back
    pub fn release(&self, owner: &str) -> Option<PortConfig> {
        let mut table = self.table.lock();
        let ports = table.owners.remove(owner)?;
        table.in_use.remove(&ports.rtp_port);
        table.in_use.remove(&ports.rtcp_port);
        debug!("Released ports {}/{} of {}", ports.rtp_port, ports.rtcp_port, owner);
        Some(ports)
    }

    /// Number of ports currently held
    pub fn allocated_count(&self) -> usize {
        self.table.lock().in_use.len()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_range() -> PortAllocator {
        PortAllocator::with_config(PortAllocatorConfig {
            min_port: 7001,
            max_port: 7006,
            strategy: AllocationStrategy::Sequential,
        })
    }

    #[test]
    fn pairs_are_adjacent_and_even() {
        let allocator = small_range();
        let ports = allocator.allocate_pair("a").unwrap();
        assert_eq!(ports, PortConfig { rtp_port: 7002, rtcp_port: 7003 });
        assert_eq!(allocator.allocate_pair("a").unwrap(), ports);
        assert_eq!(allocator.allocated_count(), 2);
    }

    #[test]
    fn exhaustion_and_release() {
        let allocator = small_range();
        allocator.allocate_pair("a").unwrap();
        allocator.allocate_pair("b").unwrap();
        assert!(matches!(
            allocator.allocate_pair("c"),
            Err(StreamError::PortsExhausted { .. })
        ));
        assert!(allocator.release("a").is_some());
        assert_eq!(allocator.allocate_pair("c").unwrap().rtp_port, 7002);
    }

    #[test]
    fn random_strategy_stays_in_range() {
        let allocator = PortAllocator::with_config(PortAllocatorConfig {
            min_port: 20000,
            max_port: 20100,
            strategy: AllocationStrategy::Random,
        });
        for i in 0..10 {
            let ports = allocator.allocate_pair(&format!("s{}", i)).unwrap();
            assert!(ports.rtp_port >= 20000 && ports.rtcp_port < 20100);
            assert_eq!(ports.rtp_port % 2, 0);
        }
    }

    #[test]
    fn range_at_the_top_of_the_port_space_is_exhausted() {
        let allocator = PortAllocator::with_config(PortAllocatorConfig {
            min_port: u16::MAX,
            max_port: u16::MAX,
            strategy: AllocationStrategy::Sequential,
        });
        assert!(matches!(
            allocator.allocate_pair("a"),
            Err(StreamError::PortsExhausted { .. })
        ));

        let allocator = PortAllocator::with_config(PortAllocatorConfig {
            min_port: 65533,
            max_port: u16::MAX,
            strategy: AllocationStrategy::Sequential,
        });
        assert_eq!(
            allocator.allocate_pair("b").unwrap(),
            PortConfig { rtp_port: 65534, rtcp_port: 65535 }
        );
    }

    #[test]
    fn concurrent_allocations_for_one_owner_share_a_pair() {
        let allocator = std::sync::Arc::new(PortAllocator::with_config(PortAllocatorConfig {
            min_port: 30000,
            max_port: 30200,
            strategy: AllocationStrategy::Random,
        }));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = allocator.clone();
                std::thread::spawn(move || allocator.allocate_pair("shared").unwrap())
            })
            .collect();
        let pairs: Vec<PortConfig> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(pairs.iter().all(|p| *p == pairs[0]));
        assert_eq!(allocator.allocated_count(), 2);
    }
}
