//! Per-object counters.
//!
//! Each object allocates the counters it needs when it is built. A counter
//! is a (packets, octets) pair of atomics, so increments never take a lock.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// The closed set of counter ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CounterId {
    RxPackets,
    RxDrop,
    RxError,
    RxBadPackets,
    RxAdminDrop,
    RxUnicast,
    RxNonUnicast,
    TxPackets,
    TxDrop,
    TxError,
    TxAdminDrop,
    TxUnicast,
    TxNonUnicast,
    TableHit,
    TableMiss,
}

impl fmt::Display for CounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CounterId::RxPackets => "rx-packets",
            CounterId::RxDrop => "rx-drop",
            CounterId::RxError => "rx-error",
            CounterId::RxBadPackets => "rx-bad-packets",
            CounterId::RxAdminDrop => "rx-admin-drop",
            CounterId::RxUnicast => "rx-unicast",
            CounterId::RxNonUnicast => "rx-non-unicast",
            CounterId::TxPackets => "tx-packets",
            CounterId::TxDrop => "tx-drop",
            CounterId::TxError => "tx-error",
            CounterId::TxAdminDrop => "tx-admin-drop",
            CounterId::TxUnicast => "tx-unicast",
            CounterId::TxNonUnicast => "tx-non-unicast",
            CounterId::TableHit => "table-hit",
            CounterId::TableMiss => "table-miss",
        };
        f.write_str(s)
    }
}

/// Counters carried by every port.
pub const PORT_COUNTERS: &[CounterId] = &[
    CounterId::RxPackets,
    CounterId::RxDrop,
    CounterId::RxError,
    CounterId::RxBadPackets,
    CounterId::RxAdminDrop,
    CounterId::RxUnicast,
    CounterId::RxNonUnicast,
    CounterId::TxPackets,
    CounterId::TxDrop,
    CounterId::TxError,
    CounterId::TxAdminDrop,
    CounterId::TxUnicast,
    CounterId::TxNonUnicast,
];

/// Counters carried by every table.
pub const TABLE_COUNTERS: &[CounterId] = &[CounterId::TableHit, CounterId::TableMiss];

/// A point-in-time counter reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterValue {
    pub packets: u64,
    pub octets: u64,
}

#[derive(Debug)]
struct Slot {
    id: CounterId,
    packets: AtomicU64,
    octets: AtomicU64,
}

/// A fixed table of counters.
#[derive(Debug, Default)]
pub struct Counters {
    slots: Box<[Slot]>,
}

impl Counters {
    pub fn new(ids: &[CounterId]) -> Self {
        let slots = ids
            .iter()
            .map(|id| Slot {
                id: *id,
                packets: AtomicU64::new(0),
                octets: AtomicU64::new(0),
            })
            .collect();
        Self { slots }
    }

    fn slot(&self, id: CounterId) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// Counts one packet of `octets` bytes. Ids the object did not allocate
    /// are ignored.
    pub fn increment(&self, id: CounterId, octets: usize) {
        if let Some(slot) = self.slot(id) {
            slot.packets.fetch_add(1, Ordering::Relaxed);
            slot.octets.fetch_add(octets as u64, Ordering::Relaxed);
        }
    }

    pub fn get(&self, id: CounterId) -> Option<CounterValue> {
        self.slot(id).map(|s| CounterValue {
            packets: s.packets.load(Ordering::Relaxed),
            octets: s.octets.load(Ordering::Relaxed),
        })
    }

    /// Packet count of `id`, zero if not allocated.
    pub fn packets(&self, id: CounterId) -> u64 {
        self.get(id).map(|v| v.packets).unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<(CounterId, CounterValue)> {
        self.slots
            .iter()
            .map(|s| {
                (
                    s.id,
                    CounterValue {
                        packets: s.packets.load(Ordering::Relaxed),
                        octets: s.octets.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_increment_and_read() {
        let c = Counters::new(PORT_COUNTERS);
        c.increment(CounterId::RxPackets, 64);
        c.increment(CounterId::RxPackets, 100);
        assert_eq!(
            c.get(CounterId::RxPackets),
            Some(CounterValue {
                packets: 2,
                octets: 164
            })
        );
    }

    #[test]
    fn test_unallocated_counter_ignored() {
        let c = Counters::new(TABLE_COUNTERS);
        c.increment(CounterId::RxPackets, 1);
        assert!(c.get(CounterId::RxPackets).is_none());
        assert_eq!(c.packets(CounterId::RxPackets), 0);
    }

    #[test]
    fn test_concurrent_increment() {
        let c = Arc::new(Counters::new(&[CounterId::TableHit]));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = c.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        c.increment(CounterId::TableHit, 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.packets(CounterId::TableHit), 4000);
    }
}
