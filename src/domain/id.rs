use std::{
    fmt::Display,
    str::FromStr,
    sync::{
        LazyLock,
        atomic::{AtomicU32, Ordering},
    },
};

use chrono::Utc;
use thiserror::Error;

pub const ID_LEN: usize = 12;
pub const HEX_ID_LEN: usize = ID_LEN * 2;

static PROCESS_UNIQUE: LazyLock<[u8; 5]> = LazyLock::new(|| rand::random());
static COUNTER: LazyLock<AtomicU32> =
    LazyLock::new(|| AtomicU32::new(rand::random::<u32>() & 0x00ff_ffff));

#[derive(Debug, Error, PartialEq, Eq)]
#[error(
    "Invalid trackID in URL parameter. Must be a single String of 12 bytes or a string of 24 hex characters"
)]
pub struct InvalidTrackId;

/// Identifier of a stored track.
///
/// Laid out like a BSON ObjectId: 4 bytes of big-endian creation seconds,
/// 5 bytes unique to this process, 3 bytes of an incrementing counter.
/// The canonical text form is 24 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId([u8; ID_LEN]);

impl TrackId {
    pub fn generate() -> Self {
        let secs = u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

        let mut bytes = [0u8; ID_LEN];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_UNIQUE);
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self, InvalidTrackId> {
        if hex.len() != HEX_ID_LEN {
            return Err(InvalidTrackId);
        }

        let mut bytes = [0u8; ID_LEN];
        hex::decode_to_slice(hex, &mut bytes).map_err(|_| InvalidTrackId)?;
        Ok(Self::from_bytes(bytes))
    }

    /// Accepts either the 24 character hex form or a raw 12 character ASCII string.
    pub fn parse(raw: &str) -> Result<Self, InvalidTrackId> {
        if raw.len() == HEX_ID_LEN {
            return Self::from_hex(raw);
        }
        if !raw.is_ascii() {
            return Err(InvalidTrackId);
        }

        let raw_bytes: [u8; ID_LEN] = raw.as_bytes().try_into().map_err(|_| InvalidTrackId)?;
        Ok(Self::from_bytes(raw_bytes))
    }
}

impl Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for TrackId {
    type Err = InvalidTrackId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn hex_form_round_trips() {
        let id = TrackId::generate();
        let hex = id.to_hex();

        assert_eq!(hex.len(), HEX_ID_LEN);
        assert_eq!(TrackId::parse(&hex), Ok(id));
        assert_eq!(TrackId::parse(&hex.to_uppercase()), Ok(id));
    }

    #[test]
    fn hex_form_is_lowercase_and_byte_ordered() {
        let id = TrackId::from_bytes([0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0xab, 0xff]);

        assert_eq!(id.to_hex(), "00010203040506070809abff");
        assert_eq!(TrackId::from_hex("00010203040506070809ABFF"), Ok(id));
    }

    #[test]
    fn raw_twelve_byte_string_is_accepted() {
        let id = TrackId::parse("abcdefghijkl").unwrap();
        assert_eq!(&id.0, b"abcdefghijkl");
    }

    #[test]
    fn malformed_ids_are_rejected() {
        for raw in [
            "",
            "not-a-valid-id",
            "abc",
            "0123456789abcdef0123456",
            "0123456789abcdef012345678",
            "zz23456789abcdef01234567",
            "0123456789abcdef0123456g",
            "ééééééé",
            "éééééé",
            "abcdefghijké",
        ] {
            assert_eq!(TrackId::parse(raw), Err(InvalidTrackId), "accepted {raw:?}");
        }
    }

    #[test]
    fn generated_ids_are_unique() {
        let ids = (0..10_000).map(|_| TrackId::generate()).collect::<HashSet<_>>();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn generated_id_carries_creation_time() {
        let before = Utc::now().timestamp() as u32;
        let id = TrackId::generate();
        let after = Utc::now().timestamp() as u32;

        let secs = u32::from_be_bytes([id.0[0], id.0[1], id.0[2], id.0[3]]);
        assert!(secs >= before && secs <= after);
    }
}
