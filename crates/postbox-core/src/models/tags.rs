use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Declares a `u32` bitset newtype with set operations and single-bit iteration.
macro_rules! bitset {
    ($(#[$meta:meta])* $name:ident { $($(#[$flag_meta:meta])* $flag:ident = $bit:expr;)* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            $($(#[$flag_meta])* pub const $flag: Self = Self(1 << $bit);)*

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            pub const fn intersection(self, other: Self) -> Self {
                Self(self.0 & other.0)
            }

            /// Number of bits set
            pub const fn len(self) -> u32 {
                self.0.count_ones()
            }

            /// Iterate the set as single-bit values, lowest bit first.
            pub fn iter(self) -> impl Iterator<Item = Self> {
                (0..u32::BITS)
                    .map(|bit| 1u32 << bit)
                    .filter(move |mask| self.0 & mask != 0)
                    .map(Self)
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                self.intersection(rhs)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }
    };
}

bitset! {
    /// Per-message classification used by the tag index.
    MessageTags {
        PHOTO_OR_VIDEO = 0;
        FILE = 1;
        MUSIC = 2;
        WEB_PAGE = 3;
        VOICE_OR_INSTANT_VIDEO = 4;
        /// Unread mention of the local user
        UNSEEN_PERSONAL_MESSAGE = 5;
        LIVE_LOCATION = 6;
        GIF = 7;
        PHOTO = 8;
        VIDEO = 9;
        PINNED = 10;
        UNSEEN_REACTION = 11;
    }
}

bitset! {
    /// Cross-peer classification used by the global tag index.
    GlobalMessageTags {
        CALLS = 0;
        MISSED_CALLS = 1;
    }
}

bitset! {
    /// Classification of a peer for aggregated counters.
    PeerSummaryCounterTags {
        GROUP = 2;
        CONTACT = 3;
        NON_CONTACT = 4;
        CHANNEL = 5;
        BOT = 7;
    }
}

bitset! {
    MessageFlags {
        UNSENT = 0;
        FAILED = 1;
        INCOMING = 2;
        TOP_INDEXABLE = 3;
        SENDING = 4;
        CAN_BE_GROUPED_INTO_FEED = 5;
        WAS_SCHEDULED = 6;
        COUNTED_AS_INCOMING = 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iter_yields_single_bits() {
        let tags = MessageTags::PHOTO | MessageTags::PINNED | MessageTags::FILE;
        let bits: Vec<_> = tags.iter().collect();
        assert_eq!(
            bits,
            vec![MessageTags::FILE, MessageTags::PHOTO, MessageTags::PINNED]
        );
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn test_contains_and_intersects() {
        let tags = MessageTags::PHOTO | MessageTags::VIDEO;
        assert!(tags.contains(MessageTags::PHOTO));
        assert!(!tags.contains(MessageTags::PHOTO | MessageTags::GIF));
        assert!(tags.intersects(MessageTags::PHOTO | MessageTags::GIF));
        assert!(MessageTags::empty().is_empty());
        assert!(tags.contains(MessageTags::empty()));
    }

    #[test]
    fn test_serializes_as_plain_integer() {
        let json = serde_json::to_string(&GlobalMessageTags::MISSED_CALLS).unwrap();
        assert_eq!(json, "2");
    }
}
