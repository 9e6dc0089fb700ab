//! HTTP surface: routes, handlers and shared state.

use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::auth::{AuthConfig, AuthService, CurrentUser, RegisterRequest, TokenPair};
use crate::config::Config;
use crate::db::Database;
use crate::error::AppResult;
use crate::extract::{Form, Json, Path, Query};
use crate::memory::MemoryStore;
use crate::metrics::MetricsReport;
use crate::models::{NewTask, TaskPatch, User};
use crate::read_model::TaskView;
use crate::scheduler::JobSubmitter;
use crate::security::AdminAccess;
use crate::store::{TaskRepository, TranslationStore, UserRepository};
use crate::tasks::TaskService;

/// The three storage seams, backed by one store.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub translations: Arc<dyn TranslationStore>,
}

impl Stores {
    pub fn memory(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            users: store.clone(),
            tasks: store.clone(),
            translations: store,
        }
    }

    pub fn postgres(db: Database) -> Self {
        let db = Arc::new(db);
        Self {
            users: db.clone(),
            tasks: db.clone(),
            translations: db,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: AuthService,
    pub tasks: TaskService,
    pub jobs: JobSubmitter,
}

impl AppState {
    pub fn new(config: Arc<Config>, stores: &Stores, jobs: JobSubmitter) -> Self {
        let auth = AuthService::new(
            Arc::clone(&stores.users),
            AuthConfig {
                secret_key: config.secret_key.clone(),
                access_ttl: Duration::minutes(config.access_token_expire_minutes),
                refresh_ttl: Duration::days(config.refresh_token_expire_days),
            },
        );
        let tasks = TaskService::new(
            Arc::clone(&stores.tasks),
            Arc::clone(&stores.translations),
            jobs.clone(),
            config.retranslate_on_update,
        );

        Self {
            config,
            auth,
            tasks,
            jobs,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/:id",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/admin/translation-stats", get(translation_stats));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
        ]);

    if allowed_origins.is_empty() {
        return cors;
    }
    if allowed_origins.iter().any(|origin| origin == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

// ==================== Handlers ====================

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
    docs: &'static str,
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        docs: "/api/v1",
    })
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    let user = state.auth.register(request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> AppResult<Json<TokenPair>> {
    let user = state.auth.authenticate(&form.username, &form.password).await?;
    Ok(Json(state.auth.issue_tokens(&user)?))
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> AppResult<Json<TokenPair>> {
    Ok(Json(state.auth.refresh(&request.refresh_token).await?))
}

#[derive(Debug, Default, Deserialize)]
struct LanguageQuery {
    language: Option<String>,
}

async fn list_tasks(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<LanguageQuery>,
) -> AppResult<Json<Vec<TaskView>>> {
    let views = state.tasks.list(user.id, query.language.as_deref()).await?;
    Ok(Json(views))
}

async fn create_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(task): Json<NewTask>,
) -> AppResult<(StatusCode, Json<TaskView>)> {
    let view = state.tasks.create(user.id, task).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<i64>,
    Query(query): Query<LanguageQuery>,
) -> AppResult<Json<TaskView>> {
    let view = state
        .tasks
        .get(user.id, task_id, query.language.as_deref())
        .await?;
    Ok(Json(view))
}

async fn update_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<i64>,
    Json(patch): Json<TaskPatch>,
) -> AppResult<Json<TaskView>> {
    Ok(Json(state.tasks.update(user.id, task_id, patch).await?))
}

async fn delete_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<i64>,
) -> AppResult<StatusCode> {
    state.tasks.delete(user.id, task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct TranslationStats {
    target_language: &'static str,
    jobs: MetricsReport,
}

async fn translation_stats(
    State(state): State<AppState>,
    _admin: AdminAccess,
) -> Json<TranslationStats> {
    Json(TranslationStats {
        target_language: state.jobs.target().code(),
        jobs: state.jobs.metrics(),
    })
}
