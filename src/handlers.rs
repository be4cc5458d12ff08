use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse, Responder};

use crate::generate::{content_disposition, GenerateError};
use crate::models::{GenerateRequest, HealthResponse};
use crate::validation::Validator;
use crate::{metrics, AppState, ErrorResponse};

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[utoipa::path(
    post,
    path = "/api/docs/generate",
    tag = "Documents",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Rendered document; Content-Type follows the output format"),
        (status = 400, description = "Invalid request, template or data", body = ErrorResponse),
        (status = 404, description = "Template not found", body = ErrorResponse),
        (status = 500, description = "PDF conversion failed", body = ErrorResponse),
        (status = 502, description = "Template download failed", body = ErrorResponse)
    )
)]
pub async fn generate_document(
    state: web::Data<AppState>,
    payload: web::Json<GenerateRequest>,
) -> Result<HttpResponse, GenerateError> {
    let request = payload.into_inner();

    if let Err(message) = request.validate() {
        log::warn!("[generate_document] rejected request: {message}");
        metrics::record_error("invalid_request");
        return Ok(HttpResponse::BadRequest().json(ErrorResponse::bad_request(&message)));
    }
    let Some(locator) = request.locator() else {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse::bad_request("no template given")));
    };

    let is_pdf = request.wants_pdf();
    log::debug!("[generate_document] template {locator:?}, pdf={is_pdf}");
    let document = state
        .documents
        .generate(&locator, request.document_data, &request.name, is_pdf)
        .await?;

    Ok(HttpResponse::Ok()
        .content_type(document.media_type)
        .insert_header((header::CONTENT_DISPOSITION, content_disposition(&document.filename)))
        .body(document.bytes))
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Service",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/metrics/documents",
    tag = "Service",
    responses((status = 200, description = "Document counters in Prometheus text format", body = String))
)]
pub async fn document_metrics() -> impl Responder {
    match metrics::gather() {
        Ok(text) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(text),
        Err(e) => {
            log::error!("[document_metrics] failed to encode metrics: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse::internal_error(&e.to_string()))
        }
    }
}

fn json_error(error: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    log::warn!("[generate_document] malformed request body: {error}");
    let response = HttpResponse::BadRequest().json(ErrorResponse::bad_request(&error.to_string()));
    InternalError::from_response(error, response).into()
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(MAX_BODY_BYTES)
            .error_handler(json_error),
    )
    .service(web::resource("/api/docs/generate").route(web::post().to(generate_document)))
    .service(web::resource("/health").route(web::get().to(health)))
    .service(web::resource("/metrics/documents").route(web::get().to(document_metrics)));
}
