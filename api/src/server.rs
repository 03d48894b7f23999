//! The coordinator's HTTP surface.
//!
//! One half is fed by the cluster watcher (pods, images, layers), the
//! other is polled by scan workers (dispatch, completion reports,
//! pre-flight checks). A few operator endpoints expose the model
//! snapshot and the hub's failure state.

use actix_web::http::StatusCode;
use actix_web::{delete, get, post, web, HttpResponse, ResponseError};
use scandium_core::model::{ModelError, DEFAULT_SCAN_PRIORITY};
use scandium_hub::HubError;
use scandium_model::{
    AddImageRequest, FinishedScanClientJob, ImageSha, LayerSha, NextLayer, Pod, PodRef,
    SetLayersRequest,
};

use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(add_pod)
            .service(update_all_pods)
            .service(delete_pod)
            .service(add_image)
            .service(set_layers)
            .service(next_layer)
            .service(finished_scan)
            .service(should_scan_layer)
            .service(get_model)
            .service(hub_errors)
            .service(reset_circuit_breaker)
            .service(delete_scan),
    );
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Hub(#[from] HubError),
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Model(e) => match e {
                ModelError::PodNotFound(_)
                | ModelError::ImageNotFound(_)
                | ModelError::LayerNotFound(_)
                | ModelError::NotInHubCheckQueue(_) => StatusCode::NOT_FOUND,
                ModelError::IllegalTransition { .. }
                | ModelError::AlreadyQueued(_)
                | ModelError::NotComplete { .. } => StatusCode::CONFLICT,
                ModelError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
                ModelError::Gone => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::Hub(e) => match e {
                HubError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                HubError::UnknownScan(_) => StatusCode::NOT_FOUND,
                HubError::Client(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

#[post("/pod")]
async fn add_pod(state: web::Data<AppState>, pod: web::Json<Pod>) -> Result<HttpResponse, Error> {
    state.model.add_pod(pod.into_inner()).await?;
    Ok(HttpResponse::Ok().finish())
}

#[post("/allpods")]
async fn update_all_pods(
    state: web::Data<AppState>,
    pods: web::Json<Vec<Pod>>,
) -> Result<HttpResponse, Error> {
    state.model.update_all_pods(pods.into_inner()).await?;
    Ok(HttpResponse::Ok().finish())
}

#[delete("/pod/{namespace}/{name}")]
async fn delete_pod(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, Error> {
    let (namespace, name) = path.into_inner();
    state.model.delete_pod(PodRef { namespace, name }).await?;
    Ok(HttpResponse::Ok().finish())
}

#[post("/image")]
async fn add_image(
    state: web::Data<AppState>,
    request: web::Json<AddImageRequest>,
) -> Result<HttpResponse, Error> {
    let request = request.into_inner();
    let priority = request
        .priority
        .or(request.image.priority)
        .unwrap_or(DEFAULT_SCAN_PRIORITY);
    let added = state.model.add_image(request.image, priority).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "added": added })))
}

/// Layer decomposition reported by a worker that pulled the image apart.
#[post("/layers/{sha}")]
async fn set_layers(
    state: web::Data<AppState>,
    path: web::Path<String>,
    request: web::Json<SetLayersRequest>,
) -> Result<HttpResponse, Error> {
    state
        .model
        .set_layers_for_image(ImageSha(path.into_inner()), request.into_inner().layers)
        .await?;
    Ok(HttpResponse::Ok().finish())
}

/// Hand out the next unit of scan work, or `{"layer": null}` when there
/// is nothing to do right now.
#[post("/nextlayer")]
async fn next_layer(state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let layer = state.model.dispatch_next_scan().await?;
    Ok(HttpResponse::Ok().json(NextLayer { layer }))
}

#[post("/finishedscan")]
async fn finished_scan(
    state: web::Data<AppState>,
    job: web::Json<FinishedScanClientJob>,
) -> Result<HttpResponse, Error> {
    let job = job.into_inner();
    let scan_name = job.sha.0.clone();
    let succeeded = job.err.is_none();

    state.model.finish_running_scan_client(job).await?;
    if succeeded {
        // the hub is now processing the upload; poll it for completion
        state.hub.track_scan(scan_name);
    }
    Ok(HttpResponse::Ok().finish())
}

#[derive(Debug, serde::Deserialize)]
struct ShouldScanQuery {
    layer: String,
}

#[get("/shouldscanlayer")]
async fn should_scan_layer(
    state: web::Data<AppState>,
    query: web::Query<ShouldScanQuery>,
) -> Result<HttpResponse, Error> {
    let decision = state
        .model
        .should_scan_layer(LayerSha(query.into_inner().layer))
        .await?;
    Ok(HttpResponse::Ok().json(decision))
}

#[get("/model")]
async fn get_model(state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(state.model.snapshot().await?))
}

#[get("/hub/errors")]
async fn hub_errors(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.hub.recent_errors())
}

#[post("/hub/resetcircuitbreaker")]
async fn reset_circuit_breaker(state: web::Data<AppState>) -> HttpResponse {
    state.hub.reset_circuit_breaker();
    HttpResponse::Ok().finish()
}

/// Remove a scan's records from the hub. The model is untouched; this is
/// an operator-driven cleanup.
#[delete("/scan/{name}")]
async fn delete_scan(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    state.hub.delete_scan(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().finish())
}
