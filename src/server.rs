//! Bounty Market Server
//!
//! Thin JSON surface over the marketplace operations. Identity comes from the
//! `x-actor-id` header; authentication happens in front of this service.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::MarketError;
use crate::gateway::Store;
use crate::market::Marketplace;
use crate::models::{
    Application, Bounty, BountyFilter, BountyInteraction, BountyUpdate, Comment, Milestone,
    MilestoneInput, NewBounty, Notification, Rating, RatingSummary,
};
use crate::notify::{run_delivery, NotificationSink, QueuedSink, StoreSink};
use crate::settlement::{NoopHooks, Settlement};
use crate::storage::SqliteStore;

pub const ACTOR_HEADER: &str = "x-actor-id";

pub struct AppState<S> {
    pub market: Arc<Marketplace<S>>,
    pub started_at: std::time::Instant,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl From<MarketError> for ApiError {
    fn from(e: MarketError) -> Self {
        let status = match &e {
            MarketError::NotFound(_) => StatusCode::NOT_FOUND,
            MarketError::Unauthorized(_) => StatusCode::FORBIDDEN,
            MarketError::Validation(_) => StatusCode::BAD_REQUEST,
            e if e.is_conflict() => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", e);
        }
        Self {
            status,
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Authenticated caller, taken from the `x-actor-id` header
pub struct Actor(pub Uuid);

#[async_trait]
impl<St: Send + Sync> FromRequestParts<St> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        let value = parts.headers.get(ACTOR_HEADER).ok_or_else(|| ApiError {
            status: StatusCode::UNAUTHORIZED,
            kind: "missing_actor",
            message: format!("{} header is required", ACTOR_HEADER),
        })?;

        value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(Actor)
            .ok_or_else(|| {
                MarketError::Validation(format!("{} must be a UUID", ACTOR_HEADER)).into()
            })
    }
}

/// Runs a blocking marketplace call off the async workers
async fn blocking<S, T, F>(state: &AppState<S>, f: F) -> ApiResult<T>
where
    S: Store + 'static,
    T: Send + 'static,
    F: FnOnce(&Marketplace<S>) -> crate::error::Result<T> + Send + 'static,
{
    let market = state.market.clone();
    match tokio::task::spawn_blocking(move || f(&market)).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            error!("Blocking task failed: {}", e);
            Err(MarketError::Storage(e.to_string()).into())
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router<S: Store + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/health", get(health_handler::<S>))
        .route("/bounties", get(list_bounties::<S>).post(create_bounty::<S>))
        .route(
            "/bounties/:id",
            get(get_bounty::<S>)
                .patch(update_bounty::<S>)
                .delete(delete_bounty::<S>),
        )
        .route("/bounties/:id/confirm", post(confirm_milestones::<S>))
        .route("/bounties/:id/verify", post(verify_milestones::<S>))
        .route("/bounties/:id/settlement", post(apply_settlement::<S>))
        .route(
            "/bounties/:id/cancel/publisher",
            post(cancel_by_publisher::<S>),
        )
        .route("/bounties/:id/cancel/receiver", post(cancel_by_receiver::<S>))
        .route("/bounties/:id/settle", post(settle_bounty::<S>))
        .route(
            "/bounties/:id/milestones",
            get(get_milestones::<S>).post(create_milestone::<S>),
        )
        .route(
            "/milestones/:id",
            axum::routing::put(update_milestone::<S>).delete(delete_milestone::<S>),
        )
        .route("/milestones/:id/progress", post(update_progress::<S>))
        .route(
            "/bounties/:id/applications",
            get(get_applications::<S>).post(create_application::<S>),
        )
        .route(
            "/bounties/:id/applications/public",
            get(get_public_applications::<S>),
        )
        .route("/applications/:id/approve", post(approve_application::<S>))
        .route("/applications/:id/reject", post(reject_application::<S>))
        .route(
            "/bounties/:id/like",
            post(like_bounty::<S>).delete(unlike_bounty::<S>),
        )
        .route("/bounties/:id/rating", post(rate_bounty::<S>))
        .route(
            "/bounties/:id/rating/recompute",
            post(recompute_rating::<S>),
        )
        .route(
            "/bounties/:id/comments",
            get(get_comments::<S>).post(post_comment::<S>),
        )
        .route("/bounties/:id/interaction", get(get_interaction::<S>))
        .route("/notifications", get(list_notifications::<S>))
        .route("/notifications/:id/read", post(mark_notification_read::<S>))
        .route("/notifications/:id", delete(delete_notification::<S>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub uptime_secs: u64,
    pub version: String,
}

async fn health_handler<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// BOUNTIES
// ============================================================================

async fn list_bounties<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(filter): Query<BountyFilter>,
) -> ApiResult<Json<Vec<Bounty>>> {
    blocking(&state, move |m| m.settlement.list_bounties(filter))
        .await
        .map(Json)
}

async fn create_bounty<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Json(input): Json<NewBounty>,
) -> ApiResult<(StatusCode, Json<Bounty>)> {
    let bounty = blocking(&state, move |m| m.settlement.create_bounty(actor, input)).await?;
    Ok((StatusCode::CREATED, Json(bounty)))
}

/// Counts as a view
async fn get_bounty<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Bounty>> {
    blocking(&state, move |m| {
        m.settlement.increment_view_count(id)?;
        m.settlement.get_bounty(id)
    })
    .await
    .map(Json)
}

async fn update_bounty<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(update): Json<BountyUpdate>,
) -> ApiResult<Json<Bounty>> {
    blocking(&state, move |m| m.settlement.update_bounty(id, actor, update))
        .await
        .map(Json)
}

async fn delete_bounty<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |m| m.settlement.delete_bounty(id, actor)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// LIFECYCLE
// ============================================================================

async fn confirm_milestones<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Bounty>> {
    blocking(&state, move |m| m.settlement.confirm_milestones(id, actor))
        .await
        .map(Json)
}

async fn verify_milestones<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Bounty>> {
    blocking(&state, move |m| m.settlement.verify_milestones(id, actor))
        .await
        .map(Json)
}

async fn apply_settlement<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Bounty>> {
    blocking(&state, move |m| m.settlement.apply_settlement(id, actor))
        .await
        .map(Json)
}

async fn cancel_by_publisher<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Bounty>> {
    blocking(&state, move |m| {
        m.settlement.cancel_settlement_by_publisher(id, actor)
    })
    .await
    .map(Json)
}

async fn cancel_by_receiver<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Bounty>> {
    blocking(&state, move |m| {
        m.settlement.cancel_settlement_by_receiver(id, actor)
    })
    .await
    .map(Json)
}

async fn settle_bounty<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Settlement>> {
    blocking(&state, move |m| m.settlement.settle_bounty_accounts(id, actor))
        .await
        .map(Json)
}

// ============================================================================
// MILESTONES
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressRequest {
    pub is_completed: bool,
}

async fn get_milestones<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Milestone>>> {
    blocking(&state, move |m| m.milestones.get_milestones(id))
        .await
        .map(Json)
}

async fn create_milestone<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(input): Json<MilestoneInput>,
) -> ApiResult<(StatusCode, Json<Milestone>)> {
    let milestone =
        blocking(&state, move |m| m.milestones.create_milestone(id, actor, input)).await?;
    Ok((StatusCode::CREATED, Json(milestone)))
}

async fn update_milestone<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(input): Json<MilestoneInput>,
) -> ApiResult<Json<Milestone>> {
    blocking(&state, move |m| m.milestones.update_milestone(id, actor, input))
        .await
        .map(Json)
}

async fn delete_milestone<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |m| m.milestones.delete_milestone(id, actor)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_progress<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<ProgressRequest>,
) -> ApiResult<Json<Milestone>> {
    blocking(&state, move |m| {
        m.milestones
            .update_milestone_by_receiver(id, actor, request.is_completed)
    })
    .await
    .map(Json)
}

// ============================================================================
// APPLICATIONS
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ApplyRequest {
    #[serde(default)]
    pub note: Option<String>,
}

async fn create_application<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<ApplyRequest>,
) -> ApiResult<(StatusCode, Json<Application>)> {
    let application = blocking(&state, move |m| {
        m.applications.create_application(id, actor, request.note)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(application)))
}

async fn get_applications<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Application>>> {
    blocking(&state, move |m| m.applications.get_applications(id, actor))
        .await
        .map(Json)
}

async fn get_public_applications<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Application>>> {
    blocking(&state, move |m| m.applications.get_public_applications(id))
        .await
        .map(Json)
}

async fn approve_application<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Application>> {
    blocking(&state, move |m| m.applications.approve_application(id, actor))
        .await
        .map(Json)
}

async fn reject_application<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Application>> {
    blocking(&state, move |m| m.applications.reject_application(id, actor))
        .await
        .map(Json)
}

// ============================================================================
// INTERACTIONS
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RateRequest {
    pub score: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentRequest {
    pub content: String,
}

async fn like_bounty<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |m| m.interactions.like_bounty(actor, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unlike_bounty<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |m| m.interactions.unlike_bounty(actor, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rate_bounty<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<RateRequest>,
) -> ApiResult<Json<Rating>> {
    blocking(&state, move |m| {
        m.interactions.rate_bounty(actor, id, request.score)
    })
    .await
    .map(Json)
}

async fn recompute_rating<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RatingSummary>> {
    blocking(&state, move |m| m.interactions.recompute_average_rating(id))
        .await
        .map(Json)
}

async fn get_comments<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Comment>>> {
    blocking(&state, move |m| m.interactions.get_comments(id))
        .await
        .map(Json)
}

async fn post_comment<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<CommentRequest>,
) -> ApiResult<(StatusCode, Json<Comment>)> {
    let comment = blocking(&state, move |m| {
        m.interactions.post_comment(actor, id, &request.content)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn get_interaction<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BountyInteraction>> {
    blocking(&state, move |m| {
        m.interactions.get_user_bounty_interaction(actor, id)
    })
    .await
    .map(Json)
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

async fn list_notifications<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
) -> ApiResult<Json<Vec<Notification>>> {
    blocking(&state, move |m| m.notifications(actor))
        .await
        .map(Json)
}

async fn mark_notification_read<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |m| m.mark_notification_read(id, actor)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_notification<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |m| m.delete_notification(id, actor)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Open the configured database, start notification delivery and serve
pub async fn serve(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::new(&config.database.path)?);
    info!("SQLite storage initialized at {}", config.database.path);

    let (queue, rx) = QueuedSink::new(config.notifications.queue_capacity);
    let delivery_sink: Arc<dyn NotificationSink> = Arc::new(StoreSink::new(store.clone()));
    tokio::spawn(run_delivery(rx, delivery_sink));

    let market = Arc::new(Marketplace::new(
        store,
        Arc::new(queue),
        Arc::new(NoopHooks),
        config.listing,
    ));

    run_server(&config.server.host, config.server.port, market).await
}

/// Run the server
pub async fn run_server<S: Store + 'static>(
    host: &str,
    port: u16,
    market: Arc<Marketplace<S>>,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        market,
        started_at: std::time::Instant::now(),
    });

    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting Bounty Market server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
