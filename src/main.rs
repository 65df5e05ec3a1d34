mod auth;
mod cache;
mod catalog;
mod clock;
mod config;
mod database;
mod error;
mod library;
mod model;
mod routes;

use actix_identity::{CookieIdentityPolicy, Identity, IdentityService};
use actix_web::{error as web_error, middleware::Logger, web, App, HttpResponse, HttpServer};
use auth::{AuthError, Registration};
use catalog::{Catalog, HttpUpstream};
use clock::SystemClock;
use config::Config;
use database::Store;
use log::{debug, info, warn};
use routes::{require_user, Db};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

struct Settings {
    bcrypt_cost: u32,
}

fn log_error<E: std::fmt::Debug>(err: E, message: &'static str) -> web_error::Error {
    debug!("{:?}", err);
    web_error::ErrorInternalServerError(message)
}

fn auth_error(err: AuthError) -> web_error::Error {
    match err {
        AuthError::Invalid(message) => web_error::ErrorBadRequest(message),
        AuthError::UsernameTaken(_) => web_error::ErrorConflict("Username already exists"),
        err => log_error(err, "Authentication error"),
    }
}

/// bcrypt is deliberately slow, so hashing and verifying run on the blocking
/// pool instead of the worker thread.
fn blocking_auth_error(err: web_error::BlockingError<AuthError>) -> web_error::Error {
    match err {
        web_error::BlockingError::Error(err) => auth_error(err),
        web_error::BlockingError::Canceled => {
            log_error("blocking task canceled", "Authentication error")
        }
    }
}

async fn register(
    params: web::Json<Registration>,
    id: Identity,
    db: Db,
    settings: web::Data<Settings>,
) -> actix_web::Result<HttpResponse> {
    let store = db.get_ref().clone();
    let cost = settings.bcrypt_cost;
    let registration = params.into_inner();
    let user = web::block(move || auth::register(&store, &registration, cost))
        .await
        .map_err(blocking_auth_error)?;
    let account = auth::account(&db, &user).map_err(|err| log_error(err, "Database error"))?;
    id.remember(user.username);
    Ok(HttpResponse::Created().json(account))
}

#[derive(Serialize, Deserialize)]
struct LoginParams {
    username: String,
    password: String,
}

async fn login(
    params: web::Json<LoginParams>,
    id: Identity,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let store = db.get_ref().clone();
    let LoginParams { username, password } = params.into_inner();
    let user = web::block(move || auth::authenticate(&store, &username, &password))
        .await
        .map_err(blocking_auth_error)?;
    match user {
        Some(user) => {
            let account =
                auth::account(&db, &user).map_err(|err| log_error(err, "Database error"))?;
            info!("{} logged in", user.username);
            id.remember(user.username);
            Ok(HttpResponse::Ok().json(account))
        }
        None => Err(web_error::ErrorUnauthorized("Invalid username or password")),
    }
}

async fn logout(id: Identity) -> actix_web::Result<HttpResponse> {
    id.forget();
    Ok(HttpResponse::NoContent().finish())
}

async fn me(id: Identity, db: Db) -> actix_web::Result<HttpResponse> {
    let user = require_user(&id, &db)?;
    let account = auth::account(&db, &user).map_err(|err| log_error(err, "Database error"))?;
    Ok(HttpResponse::Ok().json(account))
}

fn invalid_input<E>(err: E) -> std::io::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("moviesphere=debug,actix_web=info"),
    )
    .init();

    let config = Config::from_env().map_err(invalid_input)?;
    let store = Store::open(&config.sled_config(), Arc::new(SystemClock)).map_err(invalid_input)?;
    match &config.db_path {
        Some(path) => info!("using database at {}", path.display()),
        None => warn!("MOVIESPHERE_DB_PATH not set, data will not outlive this process"),
    }

    if let Some(every) = config.cache_sweep {
        let store = store.clone();
        actix_rt::spawn(async move {
            let mut interval = actix_rt::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(err) = store.sweep_expired_cache() {
                    warn!("cache sweep failed: {}", err);
                }
            }
        });
    }

    let session_key = config.session_key.clone();
    let catalog_config = config.catalog.clone();
    let bcrypt_cost = config.bcrypt_cost;
    info!("listening on {}", config.bind);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(IdentityService::new(
                CookieIdentityPolicy::new(&session_key)
                    .name("moviesphere-auth")
                    .secure(false),
            ))
            .data(store.clone())
            .data(Catalog::new(
                store.clone(),
                HttpUpstream::new(),
                catalog_config.clone(),
            ))
            .data(Settings { bcrypt_cost })
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/logout", web::post().to(logout))
            .route("/me", web::get().to(me))
            .configure(routes::configure::<HttpUpstream>)
    })
    .bind(&config.bind)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::json;

    #[actix_rt::test]
    async fn register_then_login() {
        let store = Store::temporary(Arc::new(ManualClock::new()));
        let mut app = test::init_service(
            App::new()
                .wrap(IdentityService::new(
                    CookieIdentityPolicy::new(&[7u8; 32]).secure(false),
                ))
                .data(store.clone())
                .data(Settings { bcrypt_cost: 4 })
                .route("/register", web::post().to(register))
                .route("/login", web::post().to(login)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/register")
            .set_json(&json!({
                "username": "ada",
                "email": "ada@example.com",
                "password": "secret1",
                "confirmPassword": "secret1",
            }))
            .to_request();
        let resp = test::call_service(&mut app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/register")
            .set_json(&json!({
                "username": "ada",
                "email": "ada@example.org",
                "password": "secret2",
                "confirmPassword": "secret2",
            }))
            .to_request();
        let resp = test::call_service(&mut app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let login = |password: &str| {
            test::TestRequest::post()
                .uri("/login")
                .set_json(&json!({ "username": "ada", "password": password }))
                .to_request()
        };
        let resp = test::call_service(&mut app, login("wrong12")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = test::call_service(&mut app, login("secret1")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).expect("read_response_json failed during deserialization");
        assert_eq!(body["username"], "ada");
        assert!(body.get("passwordHash").is_none());
    }
}
