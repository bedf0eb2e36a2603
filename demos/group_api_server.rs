use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use group_graph::api::{ActingUser, GroupApp, HasPool};
use group_graph::models::UserId;

#[derive(Clone)]
struct DemoApp {
    pool: Arc<PgPool>,
}

impl HasPool for DemoApp {
    fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }
}

impl GroupApp for DemoApp {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let database_url = env::var("DATABASE_URL")
        .context("DATABASE_URL is required to run demos/group_api_server.rs")?;
    let bind = env::var("GROUP_GRAPH_BIND").unwrap_or_else(|_| "127.0.0.1:4020".to_string());
    let bind_addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid GROUP_GRAPH_BIND '{}'", bind))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to postgres")?;

    group_graph::db::create_group_tables(&pool)
        .await
        .context("failed to run group graph migrations")?;

    let app_state = DemoApp {
        pool: Arc::new(pool),
    };

    let api_v1 = Router::new()
        .route("/healthz", get(health_handler))
        .route("/demo/groups", post(create_group_handler))
        .merge(group_graph::api::routes::<DemoApp>());

    let app = Router::new()
        .nest("/api/v1", api_v1)
        .layer(from_fn(acting_identity_middleware))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", bind_addr))?;

    println!("group_graph demo server listening on http://{}", bind_addr);
    println!("api base path: /api/v1");
    println!("identity header: x-acting-user-id (optional UUID)");

    axum::serve(listener, app).await.context("demo server failed")
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true
    }))
}

#[derive(Debug, Deserialize)]
struct CreateGroupPayload {
    name: String,
}

async fn create_group_handler(
    State(app): State<DemoApp>,
    Json(payload): Json<CreateGroupPayload>,
) -> Result<impl IntoResponse, group_graph::api::AppError> {
    let group = group_graph::db::create_group(&app.pool(), &payload.name).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn acting_identity_middleware(mut req: Request, next: Next) -> Response {
    let acting_user = match req
        .headers()
        .get("x-acting-user-id")
        .and_then(|value| value.to_str().ok())
    {
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(user_id) => ActingUser(Some(UserId(user_id))),
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": {
                            "code": "invalid_acting_user_id",
                            "message": "x-acting-user-id must be a UUID"
                        }
                    })),
                )
                    .into_response();
            }
        },
        None => ActingUser(None),
    };

    req.extensions_mut().insert(acting_user);
    next.run(req).await
}
