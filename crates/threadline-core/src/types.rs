//! Strong type definitions for Threadline.
//!
//! All identifiers are newtypes so a message id can never be passed where a
//! conversation id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a conversation, assigned by the remote service.
    ConversationId
);

string_id!(
    /// Identifier of a message.
    ///
    /// Either server-assigned, or a client-generated temporary id (prefixed
    /// with [`MessageId::TEMP_PREFIX`]) while the send is in flight.
    MessageId
);

string_id!(
    /// Identifier of a participant profile.
    ProfileId
);

string_id!(
    /// Opaque revision marker used for optimistic concurrency (an ETag).
    VersionToken
);

impl MessageId {
    /// Prefix carried by every client-generated temporary id.
    pub const TEMP_PREFIX: &'static str = "tmp-";

    /// Generate a fresh temporary id for a pending send.
    pub fn temporary() -> Self {
        use rand::Rng;
        let bytes: [u8; 8] = rand::thread_rng().gen();
        Self(format!("{}{}", Self::TEMP_PREFIX, hex::encode(bytes)))
    }

    /// Whether this id was generated locally for a pending send.
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(Self::TEMP_PREFIX)
    }
}

/// A per-conversation event sequence number.
///
/// Event ids increase monotonically within one conversation. The sentinel
/// [`EventId::UNKNOWN`] (`-1`) orders below every known id, so `max` over
/// event ids always prefers a known value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub i64);

impl EventId {
    /// Sentinel for "not known yet".
    pub const UNKNOWN: Self = Self(-1);

    /// The lowest id a backfill ever asks for.
    pub const ZERO: Self = Self(0);

    /// Create an event id from its raw value.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Whether this id is a real event id rather than the sentinel.
    pub const fn is_known(self) -> bool {
        self.0 >= 0
    }

    /// The id immediately after this one, or zero if this one is unknown.
    pub const fn next(self) -> Self {
        if self.is_known() {
            Self(self.0 + 1)
        } else {
            Self::ZERO
        }
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "EventId({})", self.0)
        } else {
            f.write_str("EventId(unknown)")
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EventId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_orders_below_known() {
        assert!(EventId::UNKNOWN < EventId::ZERO);
        assert_eq!(EventId::UNKNOWN.max(EventId::new(4)), EventId::new(4));
    }

    #[test]
    fn test_next_from_unknown_starts_at_zero() {
        assert_eq!(EventId::UNKNOWN.next(), EventId::ZERO);
        assert_eq!(EventId::new(7).next(), EventId::new(8));
    }

    #[test]
    fn test_temporary_message_ids() {
        let a = MessageId::temporary();
        let b = MessageId::temporary();
        assert!(a.is_temporary());
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), MessageId::TEMP_PREFIX.len() + 16);
        assert!(!MessageId::new("srv-1").is_temporary());
    }

    #[test]
    fn test_id_debug() {
        let id = ConversationId::new("c1");
        assert_eq!(format!("{:?}", id), "ConversationId(c1)");
        assert_eq!(format!("{}", id), "c1");
    }
}
