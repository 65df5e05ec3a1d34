use crate::clock::Clock;
use crate::error::{self, StoreError};
use crate::model::*;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use std::sync::Arc;

/// Record classes and the key prefix each one lives under. Keyed classes get
/// their discriminator (username, movie id, logical cache key) appended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Namespace {
    Users,
    CurrentUser,
    Watchlist,
    History,
    Preferences,
    Reviews,
    Cache,
}

impl Namespace {
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Users => "users",
            Namespace::CurrentUser => "current_user",
            Namespace::Watchlist => "watchlist_",
            Namespace::History => "history_",
            Namespace::Preferences => "preferences_",
            Namespace::Reviews => "reviews_",
            Namespace::Cache => "cache_",
        }
    }
}

pub fn storage_key(namespace: Namespace, subkey: Option<&str>) -> String {
    let mut key = namespace.prefix().to_owned();
    if let Some(subkey) = subkey {
        key.push_str(subkey);
    }
    key
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, raw: &[u8]) -> error::Result<T> {
    serde_json::from_slice(raw).map_err(|source| StoreError::Malformed {
        key: key.to_owned(),
        source,
    })
}

pub(crate) fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> error::Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|source| StoreError::Encode {
        key: key.to_owned(),
        source,
    })
}

/// Handle on the persistence medium. Cheap to clone; every clone talks to the
/// same database and clock.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    clock: Arc<dyn Clock>,
}

impl Store {
    pub fn new(db: sled::Db, clock: Arc<dyn Clock>) -> Self {
        Store { db, clock }
    }

    pub fn open(config: &sled::Config, clock: Arc<dyn Clock>) -> error::Result<Self> {
        Ok(Store::new(config.open()?, clock))
    }

    #[cfg(test)]
    pub fn temporary(clock: Arc<dyn Clock>) -> Self {
        let db = sled::Config::new().temporary(true).open().unwrap();
        Store::new(db, clock)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Monotonic, never reused across the lifetime of the database.
    pub fn generate_id(&self) -> error::Result<u64> {
        Ok(self.db.generate_id()?)
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        namespace: Namespace,
        subkey: Option<&str>,
    ) -> error::Result<Option<T>> {
        let key = storage_key(namespace, subkey);
        self.db
            .get(key.as_bytes())?
            .map(|raw| decode(&key, &raw))
            .transpose()
    }

    /// Missing keys read as `T::default()`; nothing is written.
    pub fn get_or_default<T: DeserializeOwned + Default>(
        &self,
        namespace: Namespace,
        subkey: Option<&str>,
    ) -> error::Result<T> {
        Ok(self.get(namespace, subkey)?.unwrap_or_default())
    }

    pub fn set<T: Serialize + ?Sized>(
        &self,
        namespace: Namespace,
        subkey: Option<&str>,
        value: &T,
    ) -> error::Result<()> {
        let key = storage_key(namespace, subkey);
        let raw = encode(&key, value)?;
        self.db.insert(key.as_bytes(), raw)?;
        Ok(())
    }

    pub fn remove(&self, namespace: Namespace, subkey: Option<&str>) -> error::Result<()> {
        let key = storage_key(namespace, subkey);
        self.db.remove(key.as_bytes())?;
        Ok(())
    }

    /// Read-modify-write of a single key inside one transaction. `f` may run
    /// more than once if the transaction conflicts, so it must not have side
    /// effects outside the value it is given.
    pub fn update<T, R, F>(
        &self,
        namespace: Namespace,
        subkey: Option<&str>,
        f: F,
    ) -> error::Result<R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: Fn(&mut T) -> R,
    {
        let key = storage_key(namespace, subkey);
        let result = self
            .db
            .transaction(|tx| -> ConflictableTransactionResult<R, StoreError> {
                let mut value: T = match tx.get(key.as_bytes())? {
                    Some(raw) => decode(&key, &raw).map_err(ConflictableTransactionError::Abort)?,
                    None => T::default(),
                };
                let result = f(&mut value);
                let raw = encode(&key, &value).map_err(ConflictableTransactionError::Abort)?;
                tx.insert(key.as_bytes(), raw)?;
                Ok(result)
            })?;
        Ok(result)
    }

    /// Drops everything except the user list and the current-user record.
    #[allow(dead_code)]
    pub fn clear_all(&self) -> error::Result<usize> {
        let keep = [
            storage_key(Namespace::Users, None),
            storage_key(Namespace::CurrentUser, None),
        ];
        let mut removed = 0;
        for key in self.db.iter().keys() {
            let key = key?;
            if keep.iter().any(|k| k.as_bytes() == key.as_ref()) {
                continue;
            }
            self.db.remove(&key)?;
            removed += 1;
        }
        log::info!("cleared {} stored records", removed);
        Ok(removed)
    }
}

pub trait UserDb {
    type Error;
    fn users(&self) -> Result<Vec<User>, Self::Error>;
    fn save_users(&self, users: &[User]) -> Result<(), Self::Error>;
    fn find_user(&self, username: &str) -> Result<Option<User>, Self::Error>;
    #[allow(dead_code)]
    fn current_user(&self) -> Result<Option<User>, Self::Error>;
    #[allow(dead_code)]
    fn set_current_user(&self, user: &User) -> Result<(), Self::Error>;
    #[allow(dead_code)]
    fn clear_current_user(&self) -> Result<(), Self::Error>;
}

impl UserDb for Store {
    type Error = StoreError;

    fn users(&self) -> error::Result<Vec<User>> {
        self.get_or_default(Namespace::Users, None)
    }

    fn save_users(&self, users: &[User]) -> error::Result<()> {
        self.set(Namespace::Users, None, users)
    }

    fn find_user(&self, username: &str) -> error::Result<Option<User>> {
        Ok(self
            .users()?
            .into_iter()
            .find(|user| user.username == username))
    }

    fn current_user(&self) -> error::Result<Option<User>> {
        self.get(Namespace::CurrentUser, None)
    }

    fn set_current_user(&self, user: &User) -> error::Result<()> {
        self.set(Namespace::CurrentUser, None, user)
    }

    fn clear_current_user(&self) -> error::Result<()> {
        self.remove(Namespace::CurrentUser, None)
    }
}
