//! # Power Partitions
//!
//! Power-gate control for the rails feeding a module, together with the
//! memory-controller client handshake used around resets.

/// A power-gateable partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(pub u32);

/// Power rail and memory-controller client operations
pub trait PowerGateControl: Send + Sync {
    /// Remove power from the partition
    fn powergate(&self, id: PartitionId);

    /// Restore power to the partition
    fn unpowergate(&self, id: PartitionId);

    /// Stop the partition's memory clients from issuing new requests
    fn mc_disable(&self, id: PartitionId);

    /// Let the partition's memory clients issue requests again
    fn mc_enable(&self, id: PartitionId);

    /// Drain outstanding memory traffic
    fn mc_flush(&self, id: PartitionId);

    /// Leave the flushed state
    fn mc_flush_done(&self, id: PartitionId);
}
