use actix_web::error::InternalError;
use actix_web::{http::StatusCode, web, App, HttpResponse, HttpServer, ResponseError};
use anyhow::Context;
use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::batch;
use crate::config::Settings;
use crate::db;
use crate::error::{PersistenceError, TransportError, ValidationError};
use crate::fetcher::PageSource;
use crate::parser::normalize::{validate_source_url, validate_target_url};

pub struct AppState<P> {
    pub settings: Settings,
    pub source: P,
}

impl<P> AppState<P> {
    /// A fresh connection per request, closed when the handler returns.
    fn store(&self) -> anyhow::Result<Connection> {
        let conn = db::connect(&self.settings.db_path)?;
        db::init_schema(&conn)?;
        Ok(conn)
    }
}

#[derive(Deserialize)]
struct ResolveRequest {
    source_url: String,
}

#[derive(Deserialize)]
struct ProfileRequest {
    target_url: String,
}

// ── Errors ──

#[derive(Debug, Error)]
enum Failure {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Missing(String),
    #[error(transparent)]
    Store(#[from] PersistenceError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
#[error("{failure}")]
struct ApiError {
    request_id: String,
    failure: Failure,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.failure {
            Failure::Validation(_) => StatusCode::BAD_REQUEST,
            Failure::Transport(TransportError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
            Failure::Transport(TransportError::NotFound { .. }) | Failure::Missing(_) => {
                StatusCode::NOT_FOUND
            }
            Failure::Transport(TransportError::Other { .. }) => StatusCode::BAD_GATEWAY,
            Failure::Store(_) | Failure::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(request_id = %self.request_id, "{:#}", self.failure);
            "Internal server error".to_string()
        } else {
            warn!(request_id = %self.request_id, status = status.as_u16(), "{}", self.failure);
            self.failure.to_string()
        };
        HttpResponse::build(status).json(json!({
            "success": false,
            "error": message,
            "request_id": self.request_id,
        }))
    }
}

fn fail(request_id: &str, failure: impl Into<Failure>) -> ApiError {
    ApiError {
        request_id: request_id.to_string(),
        failure: failure.into(),
    }
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

// Undecodable bodies answer in the same JSON shape as every other error.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let body = json!({
            "success": false,
            "error": err.to_string(),
            "request_id": new_request_id(),
        });
        InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
    })
}

// ── Handlers ──

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn resolve<P: PageSource + 'static>(
    state: web::Data<AppState<P>>,
    body: web::Json<ResolveRequest>,
) -> Result<HttpResponse, ApiError> {
    let request_id = new_request_id();
    info!(request_id = %request_id, url = %body.source_url, "resolve");

    let url = validate_source_url(&body.source_url).map_err(|e| fail(&request_id, e))?;
    let resolved = batch::resolve_source(&state.source, &url)
        .await
        .map_err(|e| fail(&request_id, e))?;

    let Some(github_url) = resolved.url else {
        let message = format!("No GitHub profile found for {}", url);
        return Err(fail(&request_id, Failure::Missing(message)));
    };
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "github_url": github_url,
        "source_description": resolved.auxiliary_text,
        "twitter_url": resolved.secondary_link,
        "stats": resolved.stats,
        "request_id": request_id,
    })))
}

async fn profile<P: PageSource + 'static>(
    state: web::Data<AppState<P>>,
    body: web::Json<ProfileRequest>,
) -> Result<HttpResponse, ApiError> {
    let request_id = new_request_id();
    info!(request_id = %request_id, url = %body.target_url, "profile");

    let url = validate_target_url(&body.target_url).map_err(|e| fail(&request_id, e))?;
    let record = batch::fetch_profile(&state.source, &url)
        .await
        .map_err(|e| fail(&request_id, e))?
        .ok_or_else(|| {
            let message = format!("Could not extract profile from {}", url);
            fail(&request_id, Failure::Missing(message))
        })?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "email": record.email,
        "profile": record,
        "request_id": request_id,
    })))
}

async fn trigger_batch<P: PageSource + 'static>(
    state: web::Data<AppState<P>>,
) -> Result<HttpResponse, ApiError> {
    let request_id = new_request_id();
    info!(request_id = %request_id, "batch triggered");

    let conn = state.store().map_err(|e| fail(&request_id, e))?;
    let result = batch::run_batch(&conn, &state.source, state.settings.batch_size)
        .await
        .map_err(|e| fail(&request_id, e))?;
    Ok(HttpResponse::Ok().json(result))
}

pub fn routes<P: PageSource + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/health", web::get().to(health))
        .route("/resolve", web::post().to(resolve::<P>))
        .route("/profile", web::post().to(profile::<P>))
        .route("/batch", web::post().to(trigger_batch::<P>));
}

pub async fn serve<P>(settings: Settings, source: P) -> anyhow::Result<()>
where
    P: PageSource + Send + Sync + 'static,
{
    let bind = settings.bind.clone();
    let state = web::Data::new(AppState { settings, source });
    state.store().context("Database is not usable")?;

    info!("Listening on http://{}", bind);
    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes::<P>))
        .bind(&bind)
        .with_context(|| format!("Failed to bind {}", bind))?
        .run()
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use actix_web::test;
    use serde_json::Value;

    use super::*;
    use crate::fetcher::stub::Stub;

    const SOURCE: &str = "https://stackoverflow.com/users/1/jane";

    fn temp_db() -> String {
        std::env::temp_dir()
            .join(format!("harvest-test-{}.sqlite", Uuid::new_v4()))
            .to_string_lossy()
            .into_owned()
    }

    fn stub() -> Stub {
        Stub::default()
            .source(
                SOURCE,
                r#"<a href="https://github.com/jane"><svg class="iconGitHub"></svg></a>
                   <div class="js-about-me-content">Hi.</div>
                   <a href="https://twitter.com/stackoverflow">so</a>"#,
            )
            .source("https://stackoverflow.com/users/2/nolink", "<p>nothing</p>")
            .profile(
                "https://github.com/jane",
                Ok(r#"<span itemprop="name">Jane</span><li itemprop="email">j@x.io</li>"#.into()),
            )
            .profile(
                "https://github.com/busy",
                Err(TransportError::RateLimited {
                    url: "https://github.com/busy".into(),
                }),
            )
    }

    macro_rules! app {
        ($db:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(AppState {
                        settings: Settings::for_tests($db),
                        source: stub(),
                    }))
                    .configure(routes::<Stub>),
            )
            .await
        };
    }

    macro_rules! post {
        ($app:expr, $path:expr, $body:expr $(,)?) => {{
            let req = test::TestRequest::post().uri($path).set_json($body).to_request();
            let resp = test::call_service(&$app, req).await;
            let status = resp.status();
            let body: Value = test::read_body_json(resp).await;
            (status, body)
        }};
    }

    #[actix_web::test]
    async fn health_is_healthy() {
        let app = app!(":memory:");
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert!(resp.status().is_success());
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].is_string());
    }

    #[actix_web::test]
    async fn resolve_finds_link() {
        let app = app!(":memory:");
        let (status, body) = post!(app, "/resolve", json!({ "source_url": SOURCE }));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["github_url"], "https://github.com/jane");
        assert_eq!(body["source_description"], "Hi.");
        assert!(body["twitter_url"].is_null());
        assert!(body["request_id"].is_string());
    }

    #[actix_web::test]
    async fn resolve_without_link_is_404() {
        let app = app!(":memory:");
        let (status, body) = post!(app,
            "/resolve",
            json!({ "source_url": "https://stackoverflow.com/users/2/nolink" }),
        );
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("No GitHub profile found"));
    }

    #[actix_web::test]
    async fn invalid_urls_are_400() {
        let app = app!(":memory:");
        let (status, body) = post!(app,
            "/resolve",
            json!({ "source_url": "https://stackoverflow.com/questions/1" }),
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("questions/1"));

        let (status, _) = post!(app,
            "/profile",
            json!({ "target_url": "https://github.com/jane/repo" }),
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post!(app, "/profile", json!({ "wrong": 1 }));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[actix_web::test]
    async fn profile_returns_record() {
        let app = app!(":memory:");
        let (status, body) =
            post!(app, "/profile", json!({ "target_url": "github.com/jane/" }));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "j@x.io");
        assert_eq!(body["profile"]["name"], "Jane");
        assert_eq!(body["profile"]["followers"], "0");
    }

    #[actix_web::test]
    async fn transport_errors_map_to_status() {
        let app = app!(":memory:");
        let (status, _) =
            post!(app, "/profile", json!({ "target_url": "https://github.com/busy" }));
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        let (status, _) =
            post!(app, "/profile", json!({ "target_url": "https://github.com/gone" }));
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn batch_on_empty_store_is_terminal() {
        let db = temp_db();
        let app = app!(&db);
        let (status, body) = post!(app, "/batch", json!({}));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "all processed", "total_processed": 0 }));
    }

    #[actix_web::test]
    async fn batch_processes_seeded_sources() {
        let db = temp_db();
        {
            let conn = db::connect(&db).unwrap();
            db::init_schema(&conn).unwrap();
            db::insert_sources(
                &conn,
                &[db::SourceRow {
                    url: SOURCE.to_string(),
                    description: None,
                }],
            )
            .unwrap();
        }
        let app = app!(&db);
        let (status, body) = post!(app, "/batch", json!({}));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["start_index"], 0);
        assert_eq!(body["end_index"], 1);
        assert_eq!(body["results"][0]["status"], "success");
        assert_eq!(body["results"][0]["email"], "j@x.io");
    }
}
