//! HTTP request handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use deploy_api::{
    ErrorResponse, HealthResponse, ListDeploymentsQuery, ListResponse, RollbackRequest,
    SubmitDeploymentRequest, SubmitDeploymentResponse, VersionResponse,
};
use futures::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};

use crate::deploy::{EventKind, ProgressEvent};
use crate::dispatch::DispatchStats;
use crate::errors::DeployerError;
use crate::models::{Deployment, DeploymentId, DeploymentLogEntry, DeploymentStatus};
use crate::server::state::ServerState;
use crate::storage::{not_found, DeploymentFilter};
use crate::utils::version_info;

const SERVICE_NAME: &str = "crmdeploy";

/// Error returned by every handler, rendered as `{ error, message }`
#[derive(Debug)]
pub struct ApiError(pub DeployerError);

impl From<DeployerError> for ApiError {
    fn from(err: DeployerError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            DeployerError::ConfigurationInvalid(_)
            | DeployerError::CredentialInvalid(_)
            | DeployerError::TemplateError(_) => StatusCode::BAD_REQUEST,
            DeployerError::NotFound(_) => StatusCode::NOT_FOUND,
            DeployerError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match &self.0 {
            DeployerError::NotFound(_) => "not_found",
            DeployerError::InvalidTransition { .. } => "invalid_transition",
            other => other.kind().as_str(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    ApiError(DeployerError::ConfigurationInvalid(rejection.body_text()))
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Accept a deployment and start it in the background
pub async fn submit_deployment_handler(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<SubmitDeploymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(bad_body)?;
    let deployment = state.engine.submit(request.into()).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitDeploymentResponse {
            deployment_id: deployment.id.as_uuid(),
            status: deployment.status.to_string(),
            accepted_at: deployment.created_at,
        }),
    ))
}

/// List deployments, newest first
pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListDeploymentsQuery>,
) -> Result<Json<ListResponse<Deployment>>, ApiError> {
    let mut filter = DeploymentFilter::new();
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        filter = filter.with_status(status.parse::<DeploymentStatus>()?);
    }
    if let Some(client_name) = query.client_name.filter(|c| !c.is_empty()) {
        filter = filter.with_client(client_name);
    }
    if let Some(limit) = query.limit {
        filter = filter.with_limit(limit);
    }
    if let Some(offset) = query.offset {
        filter = filter.with_offset(offset);
    }

    let page = state.store.list(&filter).await?;
    Ok(Json(ListResponse {
        items: page.items,
        total: page.total,
        limit: page.limit,
        offset: page.offset,
    }))
}

/// A deployment with the current rate-limit counters of its credential
#[derive(Debug, Serialize)]
pub struct DeploymentView {
    #[serde(flatten)]
    pub deployment: Deployment,
    pub rate_limit: DispatchStats,
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentView>, ApiError> {
    let deployment = load(&state, &id).await?;
    let rate_limit = state.dispatcher.stats(&deployment.credential_fingerprint);
    Ok(Json(DeploymentView {
        deployment,
        rate_limit,
    }))
}

pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<DeploymentLogEntry>>, ApiError> {
    let deployment = load(&state, &id).await?;
    Ok(Json(state.store.logs(&deployment.id).await?))
}

/// Roll back a failed deployment; the credential has to be supplied again
pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    body: Result<Json<RollbackRequest>, JsonRejection>,
) -> Result<Json<Deployment>, ApiError> {
    let Json(request) = body.map_err(bad_body)?;
    let id: DeploymentId = id.parse()?;
    let deployment = state.engine.rollback(id, request.access_token).await?;
    Ok(Json(deployment))
}

/// Live progress as server-sent events.
///
/// The first event is a snapshot of the stored deployment. An observer that
/// falls behind gets a fresh snapshot in place of the events it missed. The
/// stream ends after the deployment's final event; a client going away has no
/// effect on the deployment itself.
pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // subscribe before reading the snapshot so nothing falls in between
    let receiver = state.hub.subscribe();
    let deployment = load(&state, &id).await?;

    let snapshot = snapshot_event(&deployment, state.engine.is_running(&deployment.id));
    let id = deployment.id;
    let done = snapshot.is_final;

    let stream = stream::unfold(
        (Some(snapshot), receiver, done, state),
        move |(pending, mut receiver, done, state)| async move {
            if let Some(event) = pending {
                return Some((
                    Ok::<_, Infallible>(sse_event(&event)),
                    (None, receiver, done, state),
                ));
            }
            if done {
                return None;
            }
            loop {
                match receiver.recv().await {
                    Ok(event) if event.deployment_id == id => {
                        let done = event.is_final;
                        return Some((Ok(sse_event(&event)), (None, receiver, done, state)));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        // the final event may be among the skipped ones, resync from the store
                        debug!(deployment_id = %id, skipped, "progress observer lagging");
                        match state.store.get(&id).await {
                            Ok(Some(deployment)) => {
                                let snapshot =
                                    snapshot_event(&deployment, state.engine.is_running(&id));
                                let done = snapshot.is_final;
                                return Some((
                                    Ok(sse_event(&snapshot)),
                                    (None, receiver, done, state),
                                ));
                            }
                            Ok(None) => return None,
                            Err(e) => {
                                warn!(deployment_id = %id, "progress resync failed: {e}");
                                continue;
                            }
                        }
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn snapshot_event(deployment: &Deployment, running: bool) -> ProgressEvent {
    let kind = match deployment.status {
        DeploymentStatus::Pending => EventKind::Started,
        DeploymentStatus::InProgress => EventKind::Progress,
        DeploymentStatus::Completed => EventKind::Completed,
        DeploymentStatus::Failed => EventKind::Failed,
        DeploymentStatus::RolledBack => EventKind::RolledBack,
    };
    let detail = deployment.error_detail.as_ref().map(|e| e.message.clone());
    let event = ProgressEvent::new(deployment.id, kind, &deployment.progress, detail);
    // a failed deployment with no active task will not emit anything else
    let last = match deployment.status {
        DeploymentStatus::Completed | DeploymentStatus::RolledBack => true,
        DeploymentStatus::Failed => !running,
        DeploymentStatus::Pending | DeploymentStatus::InProgress => false,
    };
    if last {
        event.finished()
    } else {
        event
    }
}

fn sse_event(event: &ProgressEvent) -> Event {
    Event::default()
        .event(event.kind.as_str())
        .json_data(event)
        .unwrap_or_else(|e| Event::default().comment(format!("unserializable event: {e}")))
}

async fn load(state: &ServerState, id: &str) -> Result<Deployment, DeployerError> {
    let id: DeploymentId = id.parse()?;
    state.store.get(&id).await?.ok_or_else(|| not_found(&id))
}
