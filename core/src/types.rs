//! Domain types for the pass ledger.
//!
//! Identifiers are database-assigned sequence numbers, so ordering by id
//! matches creation order. The allocation engine relies on this to break
//! timestamp ties deterministically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

macro_rules! sequence_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw sequence value.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw sequence value.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

sequence_id!(
    /// Identity of a registered member.
    MemberId
);
sequence_id!(
    /// Identity of a purchased entitlement batch.
    BatchId
);
sequence_id!(
    /// Identity of a logged consumption event.
    EventId
);
sequence_id!(
    /// Identity of a room reservation.
    ReservationId
);
sequence_id!(
    /// Identity of a bookable room.
    RoomId
);

/// Error returned when a scanned payload does not contain a usable token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid scan token: {0:?}")]
pub struct ParseScanTokenError(String);

/// Opaque token printed in a member's QR code.
///
/// # Examples
///
/// ```
/// use passledger_core::types::ScanToken;
///
/// let token = ScanToken::from_scan("https://kiosk.example/my-qr/abc-123").unwrap();
/// assert_eq!(token.as_str(), "abc-123");
///
/// let bare = ScanToken::from_scan("abc-123").unwrap();
/// assert_eq!(token, bare);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanToken(String);

impl ScanToken {
    const URL_MARKER: &'static str = "/my-qr/";

    /// Wraps an already-normalized token without validation.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Generates a fresh random token for a new member.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Normalizes a raw scanner payload.
    ///
    /// Accepts either a bare token or a member QR URL (`.../my-qr/<token>`).
    ///
    /// # Errors
    ///
    /// Returns [`ParseScanTokenError`] if no token remains after normalization.
    pub fn from_scan(raw: &str) -> Result<Self, ParseScanTokenError> {
        let token = raw
            .rsplit_once(Self::URL_MARKER)
            .map_or(raw, |(_, tail)| tail)
            .trim();

        if token.is_empty() {
            return Err(ParseScanTokenError(raw.to_string()));
        }

        Ok(Self(token.to_string()))
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ScanToken {
    type Err = ParseScanTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_scan(s)
    }
}

impl fmt::Display for ScanToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of pass, e.g. `"12회권"`. Events only consume batches of the same kind.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PassType(String);

impl PassType {
    /// Creates a pass type from its display name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the pass type name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PassType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A registered member of the facility.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Member identity
    pub id: MemberId,
    /// Display name
    pub name: String,
    /// Contact phone number, unique per member
    pub phone_number: String,
    /// Token encoded in the member's QR code
    pub scan_token: ScanToken,
}

/// Member fields supplied at sign-up, before an id is assigned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMember {
    /// Display name
    pub name: String,
    /// Contact phone number
    pub phone_number: String,
    /// Token encoded in the member's QR code
    pub scan_token: ScanToken,
}

/// A purchased pass: a fixed number of uses of one pass type.
///
/// `remaining_count` is a live cache maintained by the consumption
/// coordinator. The authoritative history is `purchase_count` plus the
/// member's consumption events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementBatch {
    /// Batch identity (creation ordered)
    pub id: BatchId,
    /// Owning member
    pub member_id: MemberId,
    /// Kind of pass
    pub pass_type: PassType,
    /// Uses bought
    pub purchase_count: u32,
    /// Live remaining uses
    pub remaining_count: u32,
    /// When the batch was bought
    pub purchase_date: DateTime<Utc>,
    /// Inactive batches are never consumed and do not count toward balances
    pub active: bool,
    /// Time of the most recent live consumption
    pub last_used_date: Option<DateTime<Utc>>,
}

impl EntitlementBatch {
    /// Whether the live counter has reached zero.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.remaining_count == 0
    }

    /// Whether the live consumption path may draw from this batch.
    #[must_use]
    pub const fn is_eligible(&self) -> bool {
        self.active && self.remaining_count > 0
    }
}

/// Batch fields supplied at purchase, before an id is assigned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBatch {
    /// Owning member
    pub member_id: MemberId,
    /// Kind of pass
    pub pass_type: PassType,
    /// Uses bought; the live counter starts at the same value
    pub purchase_count: u32,
    /// When the batch was bought
    pub purchase_date: DateTime<Utc>,
}

/// One recorded entry. Which batch it consumed is never stored; it is
/// always derived by the allocation engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionEvent {
    /// Event identity (creation ordered)
    pub id: EventId,
    /// Member who entered
    pub member_id: MemberId,
    /// Kind of pass consumed
    pub pass_type: PassType,
    /// When the entry happened
    pub entry_time: DateTime<Utc>,
}

/// Lifecycle of a room reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Booked, member not yet arrived
    Pending,
    /// Member checked in
    Completed,
}

impl ReservationStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

/// A pre-paid room booking. Fulfilling it admits the member without
/// touching the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identity
    pub id: ReservationId,
    /// Member who booked
    pub member_id: MemberId,
    /// Booked room
    pub room_id: RoomId,
    /// Current status
    pub status: ReservationStatus,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn scan_token_strips_url_prefix() {
        let token = ScanToken::from_scan("https://kiosk.example/my-qr/4f1c").unwrap();
        assert_eq!(token.as_str(), "4f1c");
    }

    #[test]
    fn scan_token_accepts_bare_value() {
        let token: ScanToken = "  4f1c \n".parse().unwrap();
        assert_eq!(token.as_str(), "4f1c");
    }

    #[test]
    fn scan_token_rejects_empty_payload() {
        assert!(ScanToken::from_scan("https://kiosk.example/my-qr/").is_err());
        assert!(ScanToken::from_scan("   ").is_err());
    }

    #[test]
    fn generated_tokens_are_distinct() {
        assert_ne!(ScanToken::generate(), ScanToken::generate());
    }

    #[test]
    fn batch_eligibility_requires_active_and_capacity() {
        let mut batch = EntitlementBatch {
            id: BatchId::new(1),
            member_id: MemberId::new(1),
            pass_type: PassType::new("12회권"),
            purchase_count: 12,
            remaining_count: 1,
            purchase_date: Utc::now(),
            active: true,
            last_used_date: None,
        };
        assert!(batch.is_eligible());

        batch.active = false;
        assert!(!batch.is_eligible());

        batch.active = true;
        batch.remaining_count = 0;
        assert!(!batch.is_eligible());
        assert!(batch.is_exhausted());
    }
}
