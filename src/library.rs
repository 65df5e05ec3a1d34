use crate::database::{decode, Namespace, Store};
use crate::error::{self, StoreError};
use crate::model::*;

pub const HISTORY_LIMIT: usize = 100;

pub trait WatchlistDb {
    type Error;
    fn watchlist(&self, username: &str) -> Result<Vec<Movie>, Self::Error>;
    /// `false` if a movie with the same id is already listed.
    fn add_to_watchlist(&self, username: &str, movie: &Movie) -> Result<bool, Self::Error>;
    fn remove_from_watchlist(
        &self,
        username: &str,
        movie_id: u64,
    ) -> Result<Vec<Movie>, Self::Error>;
    fn in_watchlist(&self, username: &str, movie_id: u64) -> Result<bool, Self::Error>;
}

impl WatchlistDb for Store {
    type Error = StoreError;

    fn watchlist(&self, username: &str) -> error::Result<Vec<Movie>> {
        self.get_or_default(Namespace::Watchlist, Some(username))
    }

    fn add_to_watchlist(&self, username: &str, movie: &Movie) -> error::Result<bool> {
        self.update(
            Namespace::Watchlist,
            Some(username),
            |watchlist: &mut Vec<Movie>| {
                if watchlist.iter().any(|m| m.id == movie.id) {
                    false
                } else {
                    watchlist.push(movie.clone());
                    true
                }
            },
        )
    }

    fn remove_from_watchlist(&self, username: &str, movie_id: u64) -> error::Result<Vec<Movie>> {
        self.update(
            Namespace::Watchlist,
            Some(username),
            |watchlist: &mut Vec<Movie>| {
                watchlist.retain(|m| m.id != movie_id);
                watchlist.clone()
            },
        )
    }

    fn in_watchlist(&self, username: &str, movie_id: u64) -> error::Result<bool> {
        Ok(self.watchlist(username)?.iter().any(|m| m.id == movie_id))
    }
}

pub trait HistoryDb {
    type Error;
    fn history(&self, username: &str) -> Result<Vec<HistoryEntry>, Self::Error>;
    fn record_view(
        &self,
        username: &str,
        movie: &Movie,
    ) -> Result<Vec<HistoryEntry>, Self::Error>;
}

impl HistoryDb for Store {
    type Error = StoreError;

    fn history(&self, username: &str) -> error::Result<Vec<HistoryEntry>> {
        self.get_or_default(Namespace::History, Some(username))
    }

    /// Most recent first. A movie that was already in the history moves to
    /// the front with a fresh `viewed_at`; past `HISTORY_LIMIT` entries the
    /// oldest fall off.
    fn record_view(&self, username: &str, movie: &Movie) -> error::Result<Vec<HistoryEntry>> {
        let viewed_at = self.now();
        self.update(
            Namespace::History,
            Some(username),
            |history: &mut Vec<HistoryEntry>| {
                history.retain(|entry| entry.movie.id != movie.id);
                history.insert(
                    0,
                    HistoryEntry {
                        movie: movie.clone(),
                        viewed_at,
                    },
                );
                history.truncate(HISTORY_LIMIT);
                history.clone()
            },
        )
    }
}

pub trait PreferencesDb {
    type Error;
    fn preferences(&self, username: &str) -> Result<Preferences, Self::Error>;
    fn save_preferences(
        &self,
        username: &str,
        preferences: &Preferences,
    ) -> Result<(), Self::Error>;
}

impl PreferencesDb for Store {
    type Error = StoreError;

    fn preferences(&self, username: &str) -> error::Result<Preferences> {
        self.get_or_default(Namespace::Preferences, Some(username))
    }

    fn save_preferences(&self, username: &str, preferences: &Preferences) -> error::Result<()> {
        self.set(Namespace::Preferences, Some(username), preferences)
    }
}

pub trait ReviewDb {
    type Error;
    fn reviews(&self, movie_id: u64) -> Result<Vec<Review>, Self::Error>;
    fn add_review(&self, movie_id: u64, draft: ReviewDraft) -> Result<Review, Self::Error>;
    fn count_reviews_by(&self, username: &str) -> Result<usize, Self::Error>;
}

impl ReviewDb for Store {
    type Error = StoreError;

    fn reviews(&self, movie_id: u64) -> error::Result<Vec<Review>> {
        self.get_or_default(Namespace::Reviews, Some(&movie_id.to_string()))
    }

    fn add_review(&self, movie_id: u64, draft: ReviewDraft) -> error::Result<Review> {
        let ReviewDraft(mut fields) = draft;
        fields.remove("id");
        fields.remove("createdAt");
        let review = Review {
            id: self.generate_id()?,
            created_at: self.now(),
            fields,
        };
        self.update(
            Namespace::Reviews,
            Some(&movie_id.to_string()),
            |reviews: &mut Vec<Review>| reviews.push(review.clone()),
        )?;
        log::debug!("review {} added to movie {}", review.id, movie_id);
        Ok(review)
    }

    fn count_reviews_by(&self, username: &str) -> error::Result<usize> {
        let mut count = 0;
        for item in self.db().scan_prefix(Namespace::Reviews.prefix()) {
            let (key, raw) = item?;
            let key = String::from_utf8_lossy(&key);
            let reviews: Vec<Review> = decode(&key, &raw)?;
            count += reviews
                .iter()
                .filter(|review| review.author() == Some(username))
                .count();
        }
        Ok(count)
    }
}
