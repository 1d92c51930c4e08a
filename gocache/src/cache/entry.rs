//! The unit the response store caches.

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// An ordered header multimap: preserves origin order and duplicate names,
/// per the teacher's header-preservation note — a plain map would collapse
/// repeated `Set-Cookie`-style headers.
pub type HeaderList = Vec<(String, String)>;

/// A response stored under a [`super::store::ResponseStore`].
///
/// Created at insert time, replaced wholesale on re-insert, never mutated
/// in place; `body` is an immutable, cheaply-cloned buffer shared by every
/// concurrent reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: HeaderList,
    #[serde(with = "bytes_as_vec")]
    pub body: Bytes,
    pub expiry: SerializableInstant,
    pub body_size: u64,
}

impl CachedResponse {
    pub fn new(status: u16, headers: HeaderList, body: Bytes) -> Self {
        let body_size = body.len() as u64;
        Self {
            status,
            headers,
            body,
            expiry: SerializableInstant::from_system_time(SystemTime::now()),
            body_size,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expiry = SerializableInstant::from_system_time(SystemTime::now() + ttl);
        self
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expiry.to_system_time() <= now
    }
}

/// `Instant` isn't serializable (it has no stable epoch); persistence needs
/// an absolute point in time, so expiry is tracked as a `SystemTime` under
/// the hood but exposed as this newtype to keep `CachedResponse` free of a
/// direct `std::time::SystemTime` import at call sites that only care about
/// "is it expired yet."
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SerializableInstant(std::time::SystemTime);

impl SerializableInstant {
    pub fn from_system_time(t: SystemTime) -> Self {
        Self(t)
    }

    pub fn to_system_time(self) -> SystemTime {
        self.0
    }
}

mod bytes_as_vec {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(b: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        b.as_ref().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let v: Vec<u8> = Vec::deserialize(d)?;
        Ok(Bytes::from(v))
    }
}
