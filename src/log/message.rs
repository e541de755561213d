use serde_derive::{Deserialize, Serialize};

/// A commit version, assigned by the commit coordinator. Versions are
/// strictly increasing within an epoch, but not necessarily contiguous.
pub type Version = u64;

/// A log system epoch (generation). Each recovery starts a new one.
pub type Epoch = u64;

/// The locality scope of a tag. Non-negative values are regional
/// localities; the distinguished negative values below are special.
pub type TagLocality = i8;

/// Tags with this locality are broadcast to every log set.
pub const TAG_LOCALITY_SPECIAL: TagLocality = -1;

/// Tags routed into a remote region via log routers.
pub const TAG_LOCALITY_LOG_ROUTER: TagLocality = -2;

/// The legacy transaction-state tag locality.
pub const TAG_LOCALITY_TXS: TagLocality = -3;

/// The legacy transaction-state tag.
pub const TXS_TAG: Tag = Tag { locality: TAG_LOCALITY_TXS, id: 0 };

/// The placement id the txs tag hashed to before tag localities existed.
/// Kept so upgraded clusters find transaction state where the previous
/// release put it.
pub const TXS_TAG_OLD_ID: u32 = 1;

/// A message tag: an opaque per-consumer identifier, scoped by locality.
/// Equality and hashing use both fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub locality: TagLocality,
    pub id: u32,
}

impl Tag {
    pub const fn new(locality: TagLocality, id: u32) -> Self {
        Self { locality, id }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.locality, self.id)
    }
}

/// The version of a single message: the commit version plus the
/// message's ordinal within the commit. Ordering is lexicographic (via
/// the derived impls, which compare fields in order).
///
/// Subsequences are assigned from 1 by the push accumulator. Subsequence
/// 0 never names a real message; it is the boundary "before the first
/// message of `version`", which is what cursors report when they are
/// between versions.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MessageVersion {
    pub version: Version,
    pub subsequence: u32,
}

impl MessageVersion {
    /// The greatest possible message version.
    pub const MAX: Self = Self { version: u64::MAX, subsequence: u32::MAX };

    pub const fn new(version: Version, subsequence: u32) -> Self {
        Self { version, subsequence }
    }

    /// The boundary immediately before any message of `version`.
    pub const fn boundary(version: Version) -> Self {
        Self { version, subsequence: 0 }
    }
}

impl std::fmt::Display for MessageVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.version, self.subsequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Message versions order lexicographically: all subsequences of a
    /// version sort before the next version's boundary.
    #[test]
    fn message_version_ordering() {
        let versions = [
            MessageVersion::boundary(9),
            MessageVersion::new(9, 1),
            MessageVersion::new(9, u32::MAX),
            MessageVersion::boundary(10),
            MessageVersion::new(10, 1),
            MessageVersion::new(10, 2),
            MessageVersion::MAX,
        ];
        for pair in versions.windows(2) {
            assert!(pair[0] < pair[1], "{} < {}", pair[0], pair[1]);
        }
    }

    /// Tags are equal only when both locality and id match.
    #[test]
    fn tag_identity() {
        assert_eq!(Tag::new(0, 7), Tag::new(0, 7));
        assert_ne!(Tag::new(0, 7), Tag::new(1, 7));
        assert_ne!(Tag::new(0, 7), Tag::new(0, 8));
        assert_ne!(TXS_TAG, Tag::new(TAG_LOCALITY_SPECIAL, 0));
    }
}
