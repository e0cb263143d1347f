//! Slot layout over the 32-bit routing key space.

use vgrid_meta::{Partition, SlotId};

const KEY_SPACE: u64 = 1 << 32;

/// Width of one partition's slot range for `count` partitions.
pub fn slot_width(count: usize) -> u64 {
    if count == 0 {
        return 0;
    }
    KEY_SPACE / count as u64
}

/// Start slots for `count` equally sized partitions.
pub fn uniform_slots(count: usize) -> Vec<SlotId> {
    let width = slot_width(count);
    (0..count as u64).map(|i| (i * width) as SlotId).collect()
}

/// Reassign slots across the whole partition list in list order.
pub fn assign_slots(partitions: &mut [Partition]) {
    let slots = uniform_slots(partitions.len());
    for (partition, slot) in partitions.iter_mut().zip(slots) {
        partition.slot = slot;
    }
}
