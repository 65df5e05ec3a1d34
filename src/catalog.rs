//! The upstream side of the cache: TMDb and YouTube requests, each answered
//! from the response cache when a fresh entry exists.

use crate::database::Store;
use crate::error::StoreError;
use crate::model::Preferences;
use actix_web::client::Client;
use log::{debug, warn};
use rand::Rng;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
pub const DEFAULT_YOUTUBE_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p";

const MINUTE: u64 = 60;
pub const SEARCH_TTL: Duration = Duration::from_secs(5 * MINUTE);
pub const METADATA_TTL: Duration = Duration::from_secs(60 * MINUTE);
pub const MOOD_TTL: Duration = Duration::from_secs(30 * MINUTE);
pub const TRAILER_TTL: Duration = Duration::from_secs(24 * 60 * MINUTE);

pub const SURPRISE_MOOD: &str = "surprise";
const SURPRISE_PAGES: u32 = 10;

const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("upstream request failed: {0}")]
    Request(String),
    #[error("upstream answered with status {0}")]
    Status(u16),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl UpstreamRequest {
    fn new(url: String) -> Self {
        UpstreamRequest {
            url,
            query: Vec::new(),
        }
    }

    fn param<V: ToString>(mut self, name: &str, value: V) -> Self {
        self.query.push((name.to_owned(), value.to_string()));
        self
    }
}

/// Something that can answer a GET with a JSON body.
pub trait Upstream {
    fn get_json(
        &self,
        request: UpstreamRequest,
    ) -> LocalBoxFuture<'_, Result<Value, CatalogError>>;
}

pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    pub fn new() -> Self {
        HttpUpstream {
            client: Client::default(),
        }
    }
}

impl Upstream for HttpUpstream {
    fn get_json(
        &self,
        request: UpstreamRequest,
    ) -> LocalBoxFuture<'_, Result<Value, CatalogError>> {
        Box::pin(async move {
            let mut response = self
                .client
                .get(request.url.as_str())
                .header("Content-Type", "application/json")
                .query(&request.query)
                .map_err(|err| CatalogError::Request(err.to_string()))?
                .send()
                .await
                .map_err(|err| CatalogError::Request(err.to_string()))?;
            if !response.status().is_success() {
                return Err(CatalogError::Status(response.status().as_u16()));
            }
            response
                .json::<Value>()
                .limit(MAX_RESPONSE_BYTES)
                .await
                .map_err(|err| CatalogError::Request(err.to_string()))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoverFilters {
    pub genres: Vec<u64>,
    pub year_from: Option<u32>,
    pub year_to: Option<u32>,
    pub rating_from: Option<f64>,
    pub rating_to: Option<f64>,
}

impl DiscoverFilters {
    /// Stable text form of the filters, used in the cache key.
    fn cache_fragment(&self) -> String {
        let genres = self
            .genres
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let opt = |v: Option<String>| v.unwrap_or_default();
        format!(
            "g{}_y{}-{}_r{}-{}",
            genres,
            opt(self.year_from.map(|y| y.to_string())),
            opt(self.year_to.map(|y| y.to_string())),
            opt(self.rating_from.map(|r| r.to_string())),
            opt(self.rating_to.map(|r| r.to_string())),
        )
    }
}

/// Genre ids and sort order TMDb's discover endpoint gets for each mood.
pub fn mood_config(mood: &str) -> (Option<&'static str>, &'static str) {
    match mood {
        "adventurous" => (Some("12,28,14"), "popularity.desc"),
        "romantic" => (Some("10749"), "popularity.desc"),
        "thrilling" => (Some("53,80,9648"), "vote_average.desc"),
        "thoughtful" => (Some("18,36"), "vote_average.desc"),
        "funny" => (Some("35"), "popularity.desc"),
        _ => (None, "popularity.desc"),
    }
}

pub fn poster_url(path: Option<&str>, size: &str) -> String {
    image_url(path, size, "./images/placeholder-poster.jpg")
}

pub fn backdrop_url(path: Option<&str>, size: &str) -> String {
    image_url(path, size, "./images/placeholder-backdrop.jpg")
}

fn image_url(path: Option<&str>, size: &str, placeholder: &str) -> String {
    match path {
        Some(path) if !path.is_empty() => format!("{}/{}{}", IMAGE_BASE_URL, size, path),
        _ => placeholder.to_owned(),
    }
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub tmdb_base_url: String,
    pub tmdb_api_key: String,
    pub youtube_base_url: String,
    pub youtube_api_key: String,
}

pub struct Catalog<U> {
    store: Store,
    upstream: U,
    config: CatalogConfig,
}

impl<U: Upstream> Catalog<U> {
    pub fn new(store: Store, upstream: U, config: CatalogConfig) -> Self {
        Catalog {
            store,
            upstream,
            config,
        }
    }

    async fn cached(
        &self,
        key: &str,
        ttl: Duration,
        request: UpstreamRequest,
    ) -> Result<Value, CatalogError> {
        if let Some(hit) = self.store.get_cache::<Value>(key)? {
            debug!("cache hit: {}", key);
            return Ok(hit);
        }
        debug!("cache miss: {}", key);
        let data = self.upstream.get_json(request).await?;
        self.store.set_cache_with_ttl(key, &data, ttl)?;
        Ok(data)
    }

    fn tmdb(&self, path: &str) -> UpstreamRequest {
        UpstreamRequest::new(format!("{}{}", self.config.tmdb_base_url, path))
            .param("api_key", &self.config.tmdb_api_key)
    }

    pub async fn popular_movies(&self, page: u32) -> Result<Value, CatalogError> {
        let request = self.tmdb("/movie/popular").param("page", page);
        let key = format!("popular_movies_{}", page);
        self.cached(&key, METADATA_TTL, request).await
    }

    pub async fn search_movies(&self, query: &str, page: u32) -> Result<Value, CatalogError> {
        let request = self
            .tmdb("/search/movie")
            .param("query", query)
            .param("page", page);
        let key = format!("search_{}_{}", query, page);
        self.cached(&key, SEARCH_TTL, request).await
    }

    pub async fn movie_details(&self, movie_id: u64) -> Result<Value, CatalogError> {
        let request = self
            .tmdb(&format!("/movie/{}", movie_id))
            .param("append_to_response", "credits,similar,videos");
        let key = format!("movie_{}", movie_id);
        self.cached(&key, METADATA_TTL, request).await
    }

    pub async fn movies_by_genre(&self, genre_id: u64, page: u32) -> Result<Value, CatalogError> {
        let request = self
            .tmdb("/discover/movie")
            .param("with_genres", genre_id)
            .param("page", page)
            .param("sort_by", "popularity.desc");
        let key = format!("genre_{}_{}", genre_id, page);
        self.cached(&key, METADATA_TTL, request).await
    }

    pub async fn genres(&self) -> Result<Value, CatalogError> {
        let request = self.tmdb("/genre/movie/list");
        self.cached("genres", METADATA_TTL, request).await
    }

    pub async fn discover(
        &self,
        filters: &DiscoverFilters,
        page: u32,
    ) -> Result<Value, CatalogError> {
        let mut request = self
            .tmdb("/discover/movie")
            .param("page", page)
            .param("sort_by", "popularity.desc");
        if !filters.genres.is_empty() {
            let genres = filters
                .genres
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            request = request.param("with_genres", genres);
        }
        if let Some(year) = filters.year_from {
            request = request.param("primary_release_date.gte", format!("{}-01-01", year));
        }
        if let Some(year) = filters.year_to {
            request = request.param("primary_release_date.lte", format!("{}-12-31", year));
        }
        if let Some(rating) = filters.rating_from {
            request = request.param("vote_average.gte", rating);
        }
        if let Some(rating) = filters.rating_to {
            request = request.param("vote_average.lte", rating);
        }
        let key = format!("discover_{}_{}", filters.cache_fragment(), page);
        self.cached(&key, METADATA_TTL, request).await
    }

    /// `surprise` is a random page of popular movies rather than a mood of
    /// its own.
    pub async fn mood_movies(&self, mood: &str) -> Result<Value, CatalogError> {
        if mood == SURPRISE_MOOD {
            let page = rand::thread_rng().gen_range(1, SURPRISE_PAGES + 1);
            return self.popular_movies(page).await;
        }
        let (genres, sort_by) = mood_config(mood);
        let mut request = self.tmdb("/discover/movie").param("page", 1);
        if let Some(genres) = genres {
            request = request.param("with_genres", genres);
        }
        request = request.param("sort_by", sort_by);
        let key = format!("mood_{}", mood);
        self.cached(&key, MOOD_TTL, request).await
    }

    /// `None` when YouTube cannot be reached; a missing trailer never fails
    /// the caller.
    pub async fn search_trailer(&self, title: &str) -> Result<Option<Value>, CatalogError> {
        let request = UpstreamRequest::new(format!("{}/search", self.config.youtube_base_url))
            .param("part", "snippet")
            .param("q", format!("{} official trailer", title))
            .param("type", "video")
            .param("videoEmbeddable", "true")
            .param("maxResults", 1)
            .param("key", &self.config.youtube_api_key);
        let key = format!("trailer_{}", title);
        match self.cached(&key, TRAILER_TTL, request).await {
            Ok(data) => Ok(Some(data)),
            Err(CatalogError::Store(err)) => Err(CatalogError::Store(err)),
            Err(err) => {
                warn!("trailer lookup for {:?} failed: {}", title, err);
                Ok(None)
            }
        }
    }

    /// Discover by the user's favourite genres and minimum rating, or the
    /// second page of popular movies for anonymous visitors.
    pub async fn recommendations(
        &self,
        preferences: Option<&Preferences>,
    ) -> Result<Value, CatalogError> {
        match preferences {
            Some(preferences) => {
                let filters = DiscoverFilters {
                    genres: preferences.favorite_genres.clone(),
                    rating_from: Some(preferences.min_rating),
                    ..DiscoverFilters::default()
                };
                self.discover(&filters, 1).await
            }
            None => self.popular_movies(2).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::cell::RefCell;
    use std::sync::Arc;

    struct Recording {
        requests: RefCell<Vec<UpstreamRequest>>,
        fail: bool,
    }

    impl Recording {
        fn new() -> Self {
            Recording {
                requests: RefCell::new(Vec::new()),
                fail: false,
            }
        }

        fn calls(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl<'r> Upstream for &'r Recording {
        fn get_json(
            &self,
            request: UpstreamRequest,
        ) -> LocalBoxFuture<'_, Result<Value, CatalogError>> {
            let n = {
                let mut requests = self.requests.borrow_mut();
                requests.push(request);
                requests.len()
            };
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    Err(CatalogError::Status(403))
                } else {
                    Ok(json!({ "page": 1, "call": n }))
                }
            })
        }
    }

    fn config() -> CatalogConfig {
        CatalogConfig {
            tmdb_base_url: "http://tmdb.test/3".to_owned(),
            tmdb_api_key: "tmdb-key".to_owned(),
            youtube_base_url: "http://youtube.test/v3".to_owned(),
            youtube_api_key: "yt-key".to_owned(),
        }
    }

    fn param<'a>(request: &'a UpstreamRequest, name: &str) -> Option<&'a str> {
        request
            .query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[actix_rt::test]
    async fn one_upstream_call_per_fresh_resource() {
        let clock = Arc::new(ManualClock::new());
        let upstream = Recording::new();
        let catalog = Catalog::new(Store::temporary(clock.clone()), &upstream, config());

        let first = catalog.popular_movies(1).await.unwrap();
        let second = catalog.popular_movies(1).await.unwrap();
        let third = catalog.popular_movies(1).await.unwrap();
        assert_eq!(upstream.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(second, third);

        catalog.popular_movies(2).await.unwrap();
        assert_eq!(upstream.calls(), 2);

        clock.advance(ChronoDuration::minutes(61));
        catalog.popular_movies(1).await.unwrap();
        assert_eq!(upstream.calls(), 3);
    }

    #[actix_rt::test]
    async fn search_uses_short_ttl() {
        let clock = Arc::new(ManualClock::new());
        let upstream = Recording::new();
        let catalog = Catalog::new(Store::temporary(clock.clone()), &upstream, config());

        catalog.search_movies("alien", 1).await.unwrap();
        clock.advance(ChronoDuration::minutes(4));
        catalog.search_movies("alien", 1).await.unwrap();
        assert_eq!(upstream.calls(), 1);
        clock.advance(ChronoDuration::minutes(2));
        catalog.search_movies("alien", 1).await.unwrap();
        assert_eq!(upstream.calls(), 2);

        let requests = upstream.requests.borrow();
        assert_eq!(requests[0].url, "http://tmdb.test/3/search/movie");
        assert_eq!(param(&requests[0], "query"), Some("alien"));
        assert_eq!(param(&requests[0], "api_key"), Some("tmdb-key"));
    }

    #[actix_rt::test]
    async fn details_request_shape() {
        let upstream = Recording::new();
        let catalog = Catalog::new(
            Store::temporary(Arc::new(ManualClock::new())),
            &upstream,
            config(),
        );
        catalog.movie_details(550).await.unwrap();
        let requests = upstream.requests.borrow();
        assert_eq!(requests[0].url, "http://tmdb.test/3/movie/550");
        assert_eq!(
            param(&requests[0], "append_to_response"),
            Some("credits,similar,videos")
        );
    }

    #[actix_rt::test]
    async fn discover_filters_and_keys() {
        let upstream = Recording::new();
        let catalog = Catalog::new(
            Store::temporary(Arc::new(ManualClock::new())),
            &upstream,
            config(),
        );
        let filters = DiscoverFilters {
            genres: vec![18, 35],
            year_from: Some(1990),
            rating_from: Some(7.5),
            ..DiscoverFilters::default()
        };
        catalog.discover(&filters, 1).await.unwrap();
        catalog.discover(&filters, 1).await.unwrap();
        catalog.discover(&DiscoverFilters::default(), 1).await.unwrap();
        assert_eq!(upstream.calls(), 2);

        let requests = upstream.requests.borrow();
        assert_eq!(param(&requests[0], "with_genres"), Some("18,35"));
        assert_eq!(
            param(&requests[0], "primary_release_date.gte"),
            Some("1990-01-01")
        );
        assert_eq!(param(&requests[0], "vote_average.gte"), Some("7.5"));
        assert_eq!(param(&requests[0], "vote_average.lte"), None);
        assert_eq!(param(&requests[1], "with_genres"), None);
    }

    #[actix_rt::test]
    async fn recommendations_follow_preferences() {
        let upstream = Recording::new();
        let catalog = Catalog::new(
            Store::temporary(Arc::new(ManualClock::new())),
            &upstream,
            config(),
        );
        let prefs = Preferences {
            favorite_genres: vec![27],
            ..Preferences::default()
        };
        catalog.recommendations(Some(&prefs)).await.unwrap();
        catalog.recommendations(None).await.unwrap();

        let requests = upstream.requests.borrow();
        assert_eq!(param(&requests[0], "with_genres"), Some("27"));
        assert_eq!(param(&requests[0], "vote_average.gte"), Some("6"));
        assert_eq!(requests[1].url, "http://tmdb.test/3/movie/popular");
        assert_eq!(param(&requests[1], "page"), Some("2"));
    }

    #[actix_rt::test]
    async fn mood_table() {
        let upstream = Recording::new();
        let catalog = Catalog::new(
            Store::temporary(Arc::new(ManualClock::new())),
            &upstream,
            config(),
        );
        catalog.mood_movies("thrilling").await.unwrap();
        catalog.mood_movies("sleepy").await.unwrap();
        let requests = upstream.requests.borrow();
        assert_eq!(param(&requests[0], "with_genres"), Some("53,80,9648"));
        assert_eq!(param(&requests[0], "sort_by"), Some("vote_average.desc"));
        assert_eq!(param(&requests[1], "with_genres"), None);
        assert_eq!(param(&requests[1], "sort_by"), Some("popularity.desc"));
    }

    #[actix_rt::test]
    async fn surprise_is_a_random_popular_page() {
        let upstream = Recording::new();
        let catalog = Catalog::new(
            Store::temporary(Arc::new(ManualClock::new())),
            &upstream,
            config(),
        );
        for _ in 0..5 {
            catalog.mood_movies("surprise").await.unwrap();
        }
        let requests = upstream.requests.borrow();
        assert!(!requests.is_empty());
        for request in requests.iter() {
            assert_eq!(request.url, "http://tmdb.test/3/movie/popular");
            let page: u32 = param(request, "page").unwrap().parse().unwrap();
            assert!((1..=10).contains(&page));
            assert_eq!(param(request, "with_genres"), None);
        }
    }

    #[actix_rt::test]
    async fn trailer_failure_is_not_an_error() {
        let store = Store::temporary(Arc::new(ManualClock::new()));
        let mut upstream = Recording::new();
        upstream.fail = true;
        let catalog = Catalog::new(store.clone(), &upstream, config());
        assert_eq!(catalog.search_trailer("Heat").await.unwrap(), None);
        assert!(store.get_cache::<Value>("trailer_Heat").unwrap().is_none());

        let requests = upstream.requests.borrow();
        assert_eq!(requests[0].url, "http://youtube.test/v3/search");
        assert_eq!(param(&requests[0], "q"), Some("Heat official trailer"));
        assert_eq!(param(&requests[0], "key"), Some("yt-key"));
    }

    #[actix_rt::test]
    async fn upstream_errors_are_not_cached() {
        let store = Store::temporary(Arc::new(ManualClock::new()));
        let mut upstream = Recording::new();
        upstream.fail = true;
        let catalog = Catalog::new(store.clone(), &upstream, config());
        assert!(matches!(
            catalog.genres().await,
            Err(CatalogError::Status(403))
        ));
        assert!(catalog.genres().await.is_err());
        assert_eq!(upstream.calls(), 2);
    }

    #[test]
    fn image_urls() {
        assert_eq!(
            poster_url(Some("/abc.jpg"), "w500"),
            "https://image.tmdb.org/t/p/w500/abc.jpg"
        );
        assert_eq!(poster_url(None, "w500"), "./images/placeholder-poster.jpg");
        assert_eq!(
            backdrop_url(Some(""), "w1280"),
            "./images/placeholder-backdrop.jpg"
        );
    }
}
