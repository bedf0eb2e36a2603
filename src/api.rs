use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::StatusCode,
    http::request::Parts,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::{ErrorKind, LibError};
use crate::models::{GroupId, ModifySubgroupsPayload, ReplaceSubgroupsPayload, UserId};
use crate::operations::GroupOperations;

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::CycleRejected => StatusCode::BAD_REQUEST,
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            // Lock conflicts are transient; callers may retry unchanged.
            ErrorKind::Deadlock => StatusCode::CONFLICT,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::LockBusy => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(kind = ?self.0.kind, error = %self.0.source, "group api request failed");
        (
            status,
            Json(json!({
                "error": {
                    "code": self.0.code,
                    "message": self.0.public,
                    "details": self.0.details,
                }
            })),
        )
            .into_response()
    }
}

pub trait HasPool {
    fn pool(&self) -> Arc<sqlx::PgPool>;
}

pub trait GroupApp: HasPool {}

/// The identity a mutation is attributed to in the audit log.
///
/// Installed as a request extension by the embedding application's
/// authentication middleware; absent means an unattributed change.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActingUser(pub Option<UserId>);

impl<S> FromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<ActingUser>().copied().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct MembershipQuery {
    #[serde(default)]
    recursive: bool,
}

async fn list_subgroups_handler<S>(
    State(app): State<S>,
    Path(group_id): Path<GroupId>,
    Query(query): Query<MembershipQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: GroupApp + Clone + Send + Sync + 'static,
{
    let operations = GroupOperations::new(app.pool());
    let listing = operations.get_subgroups(group_id, query.recursive).await?;
    Ok(Json(listing))
}

async fn replace_subgroups_handler<S>(
    State(app): State<S>,
    Path(group_id): Path<GroupId>,
    acting_user: ActingUser,
    Json(payload): Json<ReplaceSubgroupsPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: GroupApp + Clone + Send + Sync + 'static,
{
    let operations = GroupOperations::new(app.pool());
    let change = operations
        .replace_subgroups(acting_user.0, group_id, payload)
        .await?;
    Ok(Json(change))
}

async fn modify_subgroups_handler<S>(
    State(app): State<S>,
    Path(group_id): Path<GroupId>,
    acting_user: ActingUser,
    Json(payload): Json<ModifySubgroupsPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: GroupApp + Clone + Send + Sync + 'static,
{
    let operations = GroupOperations::new(app.pool());
    let change = operations
        .modify_subgroups(acting_user.0, group_id, payload)
        .await?;
    Ok(Json(change))
}

async fn list_supergroups_handler<S>(
    State(app): State<S>,
    Path(group_id): Path<GroupId>,
    Query(query): Query<MembershipQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: GroupApp + Clone + Send + Sync + 'static,
{
    let operations = GroupOperations::new(app.pool());
    let listing = operations.get_supergroups(group_id, query.recursive).await?;
    Ok(Json(listing))
}

async fn audit_log_handler<S>(
    State(app): State<S>,
    Path(group_id): Path<GroupId>,
) -> Result<impl IntoResponse, AppError>
where
    S: GroupApp + Clone + Send + Sync + 'static,
{
    let entries = crate::db::list_audit_log(&app.pool(), group_id).await?;
    Ok(Json(entries))
}

pub fn routes<S>() -> Router<S>
where
    S: GroupApp + Clone + Send + Sync + 'static,
{
    tracing::info!("Registering route /groups/{{group_id}}/subgroups [GET,PUT,POST]");
    tracing::info!("Registering route /groups/{{group_id}}/supergroups [GET]");
    tracing::info!("Registering route /groups/{{group_id}}/audit [GET]");

    Router::new()
        .route(
            "/groups/{group_id}/subgroups",
            get(list_subgroups_handler::<S>)
                .put(replace_subgroups_handler::<S>)
                .post(modify_subgroups_handler::<S>),
        )
        .route(
            "/groups/{group_id}/supergroups",
            get(list_supergroups_handler::<S>),
        )
        .route("/groups/{group_id}/audit", get(audit_log_handler::<S>))
}
