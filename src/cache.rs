//! Expiring cache for upstream responses, kept in the same keyspace as
//! everything else under the `cache_` prefix.
//!
//! Expiry is lazy: an entry past its TTL is only noticed, and deleted, when
//! somebody reads it. [`Store::sweep_expired_cache`] exists for long-running
//! processes that want to reclaim space anyway.

use crate::database::{decode, encode, storage_key, Namespace, Store};
use crate::error;
use crate::model::CacheEntry;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::convert::TryFrom;
use std::time::Duration;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Deserialize)]
struct CacheStamp {
    timestamp: i64,
    ttl: i64,
}

fn millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn expired(now: i64, timestamp: i64, ttl: i64) -> bool {
    now.saturating_sub(timestamp) > ttl
}

impl Store {
    pub fn get_cache<T: DeserializeOwned>(&self, key: &str) -> error::Result<Option<T>> {
        let key = storage_key(Namespace::Cache, Some(key));
        let raw = match self.db().get(key.as_bytes())? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let entry: CacheEntry<T> = decode(&key, &raw)?;
        if expired(self.now().timestamp_millis(), entry.timestamp, entry.ttl) {
            // Only delete what we looked at; a fresh write that raced us stays.
            match self
                .db()
                .compare_and_swap(key.as_bytes(), Some(&raw), None as Option<&[u8]>)?
            {
                Ok(()) => log::debug!("cache entry {} expired", key),
                Err(_) => log::debug!("cache entry {} was rewritten while expiring", key),
            }
            return Ok(None);
        }
        Ok(Some(entry.data))
    }

    #[allow(dead_code)]
    pub fn set_cache<T: Serialize + ?Sized>(&self, key: &str, data: &T) -> error::Result<()> {
        self.set_cache_with_ttl(key, data, DEFAULT_CACHE_TTL)
    }

    pub fn set_cache_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        ttl: Duration,
    ) -> error::Result<()> {
        let entry = CacheEntry {
            data,
            timestamp: self.now().timestamp_millis(),
            ttl: millis(ttl),
        };
        let key = storage_key(Namespace::Cache, Some(key));
        let raw = encode(&key, &entry)?;
        self.db().insert(key.as_bytes(), raw)?;
        Ok(())
    }

    /// Deletes every cache entry whose TTL has run out and returns how many
    /// went. Entries that do not parse are left for the next reader to trip
    /// over.
    pub fn sweep_expired_cache(&self) -> error::Result<usize> {
        let now = self.now().timestamp_millis();
        let mut swept = 0;
        for item in self.db().scan_prefix(Namespace::Cache.prefix()) {
            let (key, raw) = item?;
            let stamp: CacheStamp = match decode(&String::from_utf8_lossy(&key), &raw) {
                Ok(stamp) => stamp,
                Err(err) => {
                    log::warn!("skipping unreadable cache entry: {}", err);
                    continue;
                }
            };
            if expired(now, stamp.timestamp, stamp.ttl) {
                if self
                    .db()
                    .compare_and_swap(&key, Some(&raw), None as Option<&[u8]>)?
                    .is_ok()
                {
                    swept += 1;
                }
            }
        }
        if swept > 0 {
            log::debug!("swept {} expired cache entries", swept);
        }
        Ok(swept)
    }
}
