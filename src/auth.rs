use crate::database::{Namespace, Store, UserDb};
use crate::error::StoreError;
use crate::library::{HistoryDb, PreferencesDb, ReviewDb, WatchlistDb};
use crate::model::*;
use log::info;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Invalid(&'static str),
    #[error("username {0:?} is already taken")]
    UsernameTaken(String),
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.username.trim().is_empty()
            || self.email.trim().is_empty()
            || self.password.is_empty()
            || self.confirm_password.is_empty()
        {
            return Err(AuthError::Invalid("Please fill in all fields"));
        }
        if self.password != self.confirm_password {
            return Err(AuthError::Invalid("Passwords do not match"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Invalid(
                "Password must be at least 6 characters long",
            ));
        }
        if !is_valid_email(self.email.trim()) {
            return Err(AuthError::Invalid("Please enter a valid email address"));
        }
        Ok(())
    }
}

/// Something `@` something `.` something, no whitespace and no second `@`.
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid regex"));

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Creates the account and its default preferences. The uniqueness check and
/// the insert happen in one transaction on the user list.
pub fn register(store: &Store, registration: &Registration, cost: u32) -> Result<User, AuthError> {
    registration.validate()?;
    let username = registration.username.trim().to_owned();
    let user = User {
        id: store.generate_id()?,
        username: username.clone(),
        email: registration.email.trim().to_owned(),
        password_hash: bcrypt::hash(&registration.password, cost)?,
        created_at: store.now(),
    };
    let inserted = store.update(Namespace::Users, None, |users: &mut Vec<User>| {
        if users.iter().any(|u| u.username == user.username) {
            false
        } else {
            users.push(user.clone());
            true
        }
    })?;
    if !inserted {
        return Err(AuthError::UsernameTaken(username));
    }
    store.save_preferences(&user.username, &Preferences::default())?;
    info!("registered user {}", user.username);
    Ok(user)
}

pub fn authenticate(
    store: &Store,
    username: &str,
    password: &str,
) -> Result<Option<User>, AuthError> {
    if username.trim().is_empty() || password.trim().is_empty() {
        return Err(AuthError::Invalid("Please fill in all fields"));
    }
    match store.find_user(username.trim())? {
        Some(user) if bcrypt::verify(password, &user.password_hash)? => Ok(Some(user)),
        _ => Ok(None),
    }
}

pub fn account(store: &Store, user: &User) -> Result<Account, StoreError> {
    Ok(Account {
        id: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
        created_at: user.created_at,
        watchlist_count: store.watchlist(&user.username)?.len(),
        history_count: store.history(&user.username)?.len(),
        reviews_count: store.count_reviews_by(&user.username)?,
    })
}
