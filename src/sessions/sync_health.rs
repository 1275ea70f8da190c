//! Whether this peer's confirmed history agrees with the host.

use crate::Frame;

/// Agreement between this peer's confirmed frames and the host's checksums.
///
/// Hosts are authoritative and always report [`SyncHealth::InSync`]. Clients start in
/// [`SyncHealth::Pending`] and move to `InSync` once a confirmed frame has been
/// compared against a host checksum. [`SyncHealth::DesyncDetected`] is terminal: the
/// engine keeps running but never trims its history by checksum again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncHealth {
    /// The most recent comparison matched.
    InSync,
    /// No frame has been compared yet.
    Pending,
    /// A confirmed frame hashed differently than on the host.
    DesyncDetected {
        /// The frame that diverged.
        frame: Frame,
        /// Checksum of the local state.
        local_checksum: u128,
        /// Checksum sent by the host.
        remote_checksum: u128,
    },
}

impl SyncHealth {
    /// Returns `true` once a desync has been detected.
    #[must_use]
    pub const fn is_desynced(&self) -> bool {
        matches!(self, Self::DesyncDetected { .. })
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn only_desync_is_desynced() {
        assert!(!SyncHealth::InSync.is_desynced());
        assert!(!SyncHealth::Pending.is_desynced());
        assert!(SyncHealth::DesyncDetected {
            frame: Frame::new(10),
            local_checksum: 0x1234,
            remote_checksum: 0x5678,
        }
        .is_desynced());
    }

    #[test]
    fn desyncs_compare_by_checksums() {
        let a = SyncHealth::DesyncDetected {
            frame: Frame::new(10),
            local_checksum: 0x1234,
            remote_checksum: 0x5678,
        };
        let b = SyncHealth::DesyncDetected {
            frame: Frame::new(10),
            local_checksum: 0x1234,
            remote_checksum: 0x9999,
        };
        assert_ne!(a, b);
        assert_eq!(a, a);
    }
}
