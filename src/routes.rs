use crate::catalog::{
    backdrop_url, poster_url, Catalog, CatalogError, DiscoverFilters, Upstream,
};
use crate::database::{Store, UserDb};
use crate::library::{HistoryDb, PreferencesDb, ReviewDb, WatchlistDb};
use crate::model::*;
use crate::log_error;
use actix_identity::Identity;
use actix_web::{error, web, HttpResponse};
use serde::Deserialize;
use serde_json::Value;

pub type Db = web::Data<Store>;
pub type Api<U> = web::Data<Catalog<U>>;

pub fn require_user(id: &Identity, db: &Store) -> actix_web::Result<User> {
    let username = id
        .identity()
        .ok_or_else(|| error::ErrorUnauthorized("Please login first"))?;
    db.find_user(&username)
        .map_err(|err| log_error(err, "Database error"))?
        .ok_or_else(|| {
            id.forget();
            log_error(
                format!("User does not exist: {}", username),
                "Authentication error",
            )
        })
}

fn catalog_error(err: CatalogError) -> error::Error {
    match err {
        CatalogError::Store(err) => log_error(err, "Database error"),
        err => {
            log::warn!("{}", err);
            error::ErrorBadGateway("Movie catalog unavailable")
        }
    }
}

/// Full image links next to TMDb's bare `poster_path` and `backdrop_path`.
fn with_image_urls(mut details: Value) -> Value {
    if let Some(fields) = details.as_object_mut() {
        let poster = poster_url(fields.get("poster_path").and_then(Value::as_str), "w500");
        let backdrop_path = fields.get("backdrop_path").and_then(Value::as_str);
        let backdrop = backdrop_url(backdrop_path, "w1280");
        fields.insert("posterUrl".to_owned(), Value::String(poster));
        fields.insert("backdropUrl".to_owned(), Value::String(backdrop));
    }
    details
}

fn movie_from(details: Value) -> actix_web::Result<Movie> {
    serde_json::from_value(details).map_err(|err| {
        log::warn!("unexpected movie payload: {}", err);
        error::ErrorBadGateway("Unexpected movie catalog response")
    })
}

#[derive(Deserialize)]
pub struct PageQuery {
    page: Option<u32>,
}

impl PageQuery {
    fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }
}

#[derive(Deserialize)]
pub struct SearchQuery {
    query: String,
    page: Option<u32>,
}

#[derive(Deserialize)]
pub struct DiscoverQuery {
    genres: Option<String>,
    year_from: Option<u32>,
    year_to: Option<u32>,
    rating_from: Option<f64>,
    rating_to: Option<f64>,
    page: Option<u32>,
}

impl DiscoverQuery {
    fn filters(&self) -> actix_web::Result<DiscoverFilters> {
        let genres = match &self.genres {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(|g| g.parse::<u64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| error::ErrorBadRequest("genres must be comma separated ids"))?,
            None => Vec::new(),
        };
        Ok(DiscoverFilters {
            genres,
            year_from: self.year_from,
            year_to: self.year_to,
            rating_from: self.rating_from,
            rating_to: self.rating_to,
        })
    }
}

pub async fn popular<U: Upstream + 'static>(
    api: Api<U>,
    query: web::Query<PageQuery>,
) -> actix_web::Result<HttpResponse> {
    let data = api
        .popular_movies(query.page())
        .await
        .map_err(catalog_error)?;
    Ok(HttpResponse::Ok().json(data))
}

pub async fn search<U: Upstream + 'static>(
    api: Api<U>,
    query: web::Query<SearchQuery>,
) -> actix_web::Result<HttpResponse> {
    let text = query.query.trim();
    if text.is_empty() {
        return Err(error::ErrorBadRequest("Search query is empty"));
    }
    let page = query.page.unwrap_or(1).max(1);
    let data = api
        .search_movies(text, page)
        .await
        .map_err(catalog_error)?;
    Ok(HttpResponse::Ok().json(data))
}

pub async fn genres<U: Upstream + 'static>(api: Api<U>) -> actix_web::Result<HttpResponse> {
    let data = api.genres().await.map_err(catalog_error)?;
    Ok(HttpResponse::Ok().json(data))
}

pub async fn movies_by_genre<U: Upstream + 'static>(
    api: Api<U>,
    genre_id: web::Path<u64>,
    query: web::Query<PageQuery>,
) -> actix_web::Result<HttpResponse> {
    let data = api
        .movies_by_genre(genre_id.into_inner(), query.page())
        .await
        .map_err(catalog_error)?;
    Ok(HttpResponse::Ok().json(data))
}

pub async fn discover<U: Upstream + 'static>(
    api: Api<U>,
    query: web::Query<DiscoverQuery>,
) -> actix_web::Result<HttpResponse> {
    let filters = query.filters()?;
    let page = query.page.unwrap_or(1).max(1);
    let data = api
        .discover(&filters, page)
        .await
        .map_err(catalog_error)?;
    Ok(HttpResponse::Ok().json(data))
}

pub async fn mood<U: Upstream + 'static>(
    api: Api<U>,
    mood: web::Path<String>,
) -> actix_web::Result<HttpResponse> {
    let data = api.mood_movies(&mood).await.map_err(catalog_error)?;
    Ok(HttpResponse::Ok().json(data))
}

pub async fn recommendations<U: Upstream + 'static>(
    id: Identity,
    db: Db,
    api: Api<U>,
) -> actix_web::Result<HttpResponse> {
    let preferences = match id.identity() {
        Some(_) => {
            let user = require_user(&id, &db)?;
            Some(
                db.preferences(&user.username)
                    .map_err(|err| log_error(err, "Database error"))?,
            )
        }
        None => None,
    };
    let data = api
        .recommendations(preferences.as_ref())
        .await
        .map_err(catalog_error)?;
    Ok(HttpResponse::Ok().json(data))
}

/// Movie details with image links and watchlist state; a logged-in viewer
/// also gets the movie recorded in their history.
pub async fn movie_details<U: Upstream + 'static>(
    id: Identity,
    db: Db,
    api: Api<U>,
    movie_id: web::Path<u64>,
) -> actix_web::Result<HttpResponse> {
    let movie_id = movie_id.into_inner();
    let details = api
        .movie_details(movie_id)
        .await
        .map_err(catalog_error)?;
    let mut in_watchlist = false;
    if id.identity().is_some() {
        let user = require_user(&id, &db)?;
        let movie = movie_from(details.clone())?;
        db.record_view(&user.username, &movie)
            .map_err(|err| log_error(err, "Database error"))?;
        in_watchlist = db
            .in_watchlist(&user.username, movie_id)
            .map_err(|err| log_error(err, "Database error"))?;
    }
    let mut details = with_image_urls(details);
    if let Some(fields) = details.as_object_mut() {
        fields.insert("inWatchlist".to_owned(), Value::Bool(in_watchlist));
    }
    Ok(HttpResponse::Ok().json(details))
}

pub async fn trailer<U: Upstream + 'static>(
    api: Api<U>,
    movie_id: web::Path<u64>,
) -> actix_web::Result<HttpResponse> {
    let details = api
        .movie_details(movie_id.into_inner())
        .await
        .map_err(catalog_error)?;
    let movie = movie_from(details)?;
    let trailer = api
        .search_trailer(&movie.title)
        .await
        .map_err(catalog_error)?;
    Ok(HttpResponse::Ok().json(trailer))
}

pub async fn watchlist(id: Identity, db: Db) -> actix_web::Result<HttpResponse> {
    let user = require_user(&id, &db)?;
    let list = db
        .watchlist(&user.username)
        .map_err(|err| log_error(err, "Database error"))?;
    Ok(HttpResponse::Ok().json(list))
}

pub async fn add_to_watchlist<U: Upstream + 'static>(
    id: Identity,
    db: Db,
    api: Api<U>,
    movie_id: web::Path<u64>,
) -> actix_web::Result<HttpResponse> {
    let user = require_user(&id, &db)?;
    let details = api
        .movie_details(movie_id.into_inner())
        .await
        .map_err(catalog_error)?;
    let movie = movie_from(details)?;
    let added = db
        .add_to_watchlist(&user.username, &movie)
        .map_err(|err| log_error(err, "Database error"))?;
    let list = db
        .watchlist(&user.username)
        .map_err(|err| log_error(err, "Database error"))?;
    if added {
        Ok(HttpResponse::Created().json(list))
    } else {
        Ok(HttpResponse::Ok().json(list))
    }
}

pub async fn remove_from_watchlist(
    id: Identity,
    db: Db,
    movie_id: web::Path<u64>,
) -> actix_web::Result<HttpResponse> {
    let user = require_user(&id, &db)?;
    let list = db
        .remove_from_watchlist(&user.username, movie_id.into_inner())
        .map_err(|err| log_error(err, "Database error"))?;
    Ok(HttpResponse::Ok().json(list))
}

pub async fn history(id: Identity, db: Db) -> actix_web::Result<HttpResponse> {
    let user = require_user(&id, &db)?;
    let history = db
        .history(&user.username)
        .map_err(|err| log_error(err, "Database error"))?;
    Ok(HttpResponse::Ok().json(history))
}

pub async fn preferences(id: Identity, db: Db) -> actix_web::Result<HttpResponse> {
    let user = require_user(&id, &db)?;
    let preferences = db
        .preferences(&user.username)
        .map_err(|err| log_error(err, "Database error"))?;
    Ok(HttpResponse::Ok().json(preferences))
}

pub async fn save_preferences(
    id: Identity,
    db: Db,
    preferences: web::Json<Preferences>,
) -> actix_web::Result<HttpResponse> {
    let user = require_user(&id, &db)?;
    if !(0.0..=10.0).contains(&preferences.min_rating) {
        return Err(error::ErrorBadRequest("minRating must be between 0 and 10"));
    }
    db.save_preferences(&user.username, &preferences)
        .map_err(|err| log_error(err, "Database error"))?;
    Ok(HttpResponse::Ok().json(preferences.into_inner()))
}

pub async fn reviews(db: Db, movie_id: web::Path<u64>) -> actix_web::Result<HttpResponse> {
    let reviews = db
        .reviews(movie_id.into_inner())
        .map_err(|err| log_error(err, "Database error"))?;
    Ok(HttpResponse::Ok().json(reviews))
}

pub async fn add_review(
    id: Identity,
    db: Db,
    movie_id: web::Path<u64>,
    draft: web::Json<ReviewDraft>,
) -> actix_web::Result<HttpResponse> {
    let user = require_user(&id, &db)?;
    let mut draft = draft.into_inner();
    draft
        .0
        .insert("author".to_owned(), Value::String(user.username));
    let review = db
        .add_review(movie_id.into_inner(), draft)
        .map_err(|err| log_error(err, "Database error"))?;
    Ok(HttpResponse::Created().json(review))
}

pub fn configure<U: Upstream + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.route("/movies/popular", web::get().to(popular::<U>))
        .route("/movies/search", web::get().to(search::<U>))
        .route("/movies/{id}", web::get().to(movie_details::<U>))
        .route("/movies/{id}/trailer", web::get().to(trailer::<U>))
        .route("/movies/{id}/reviews", web::get().to(reviews))
        .route("/movies/{id}/reviews", web::post().to(add_review))
        .route("/genres", web::get().to(genres::<U>))
        .route("/genres/{id}/movies", web::get().to(movies_by_genre::<U>))
        .route("/discover", web::get().to(discover::<U>))
        .route("/moods/{mood}", web::get().to(mood::<U>))
        .route("/recommendations", web::get().to(recommendations::<U>))
        .route("/watchlist", web::get().to(watchlist))
        .route("/watchlist/{id}", web::post().to(add_to_watchlist::<U>))
        .route("/watchlist/{id}", web::delete().to(remove_from_watchlist))
        .route("/history", web::get().to(history))
        .route("/preferences", web::get().to(preferences))
        .route("/preferences", web::put().to(save_preferences));
}
