//! Channel Pool
//!
//! A fixed, ordered pool of logical channel identities. Each identity stands
//! for one service-discovery record the transport can advertise; the server
//! listens on them strictly in pool order, one at a time, and a client probes
//! them in the same order. Keeping at most one channel open bounds the
//! transport resources a session consumes, matching hardware limits on
//! simultaneously registered service records.
//!
//! Both roles must share the exact same table, so the identities are
//! compile-time constants rather than generated per session.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Size of the channel pool: the most peers one server can ever admit.
pub const MAX_CHANNELS: usize = 7;

/// Identity of one logical service channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The service-record identities, in listen/probe order.
const CHANNEL_TABLE: [u128; MAX_CHANNELS] = [
    0xa60f_35f0_b93a_11de_8a39_0800_2009_c666,
    0x503c_7430_bc23_11de_8a39_0800_200c_9a66,
    0x503c_7431_bc23_11de_8a39_0800_200c_9a66,
    0x503c_7432_bc23_11de_8a39_0800_200c_9a66,
    0x503c_7433_bc23_11de_8a39_0800_200c_9a66,
    0x503c_7434_bc23_11de_8a39_0800_200c_9a66,
    0x503c_7435_bc23_11de_8a39_0800_200c_9a66,
];

/// Hands out the fixed pool of channel identities, one per concurrent peer
/// slot.
#[derive(Debug, Clone)]
pub struct ChannelAllocator {
    channels: [ChannelId; MAX_CHANNELS],
}

impl Default for ChannelAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelAllocator {
    /// Create an allocator seeded with the channel table.
    #[must_use]
    pub fn new() -> Self {
        let mut channels = [ChannelId(Uuid::nil()); MAX_CHANNELS];
        for (slot, raw) in channels.iter_mut().zip(CHANNEL_TABLE) {
            *slot = ChannelId(Uuid::from_u128(raw));
        }
        Self { channels }
    }

    /// All channels in pool order.
    #[must_use]
    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    /// The first channel not in `excluding`, in pool order, or `None` when
    /// the pool is exhausted.
    #[must_use]
    pub fn acquire_next(&self, excluding: &HashSet<ChannelId>) -> Option<ChannelId> {
        self.channels
            .iter()
            .find(|channel| !excluding.contains(channel))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_has_seven_distinct_channels() {
        let allocator = ChannelAllocator::new();
        assert_eq!(allocator.channels().len(), MAX_CHANNELS);

        let unique: HashSet<ChannelId> = allocator.channels().iter().copied().collect();
        assert_eq!(unique.len(), MAX_CHANNELS);
    }

    #[test]
    fn pool_is_stable_across_allocators() {
        let a = ChannelAllocator::new();
        let b = ChannelAllocator::new();
        assert_eq!(a.channels(), b.channels());
    }

    #[test]
    fn acquire_next_walks_the_pool_in_order() {
        let allocator = ChannelAllocator::new();
        let mut used = HashSet::new();

        for expected in allocator.channels() {
            let got = allocator.acquire_next(&used).unwrap();
            assert_eq!(got, *expected);
            used.insert(got);
        }

        assert_eq!(allocator.acquire_next(&used), None);
    }

    #[test]
    fn acquire_next_skips_excluded_channels() {
        let allocator = ChannelAllocator::new();
        let mut used = HashSet::new();
        used.insert(allocator.channels()[0]);
        used.insert(allocator.channels()[2]);

        assert_eq!(
            allocator.acquire_next(&used),
            Some(allocator.channels()[1])
        );
    }
}
