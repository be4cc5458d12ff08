use actix_cors::Cors;
use actix_web::middleware::{Compress, Logger};
use actix_web::{http::header, web, App, HttpServer};
use actix_web_prometheus::PrometheusMetricsBuilder;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod config;
pub mod convert;
pub mod fetch;
pub mod generate;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod render;
pub mod state;
pub mod storage;
pub mod validation;

pub use crate::config::AppConfig;
pub use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn not_found(message: &str) -> Self {
        Self::new("NotFound", message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new("BadRequest", message)
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new("InternalServerError", message)
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::generate_document,
        crate::handlers::health,
        crate::handlers::document_metrics
    ),
    components(schemas(models::GenerateRequest, models::HealthResponse, ErrorResponse)),
    tags(
        (name = "Documents", description = "DOCX/XLSX template rendering."),
        (name = "Service", description = "Health and metrics endpoints.")
    )
)]
pub struct ApiDoc;

fn cors(origins: &[String]) -> Cors {
    if origins.is_empty() {
        return Cors::permissive();
    }

    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
        .expose_headers(vec![header::CONTENT_DISPOSITION])
        .max_age(3600)
}

pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load().context("invalid configuration")?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();

    let app_state = web::Data::new(
        AppState::from_config(&config).context("failed to build application clients")?,
    );

    let prometheus = PrometheusMetricsBuilder::new("docgen_server")
        .endpoint("/metrics")
        .build()
        .map_err(|e| anyhow::anyhow!("failed to create Prometheus metrics middleware: {e}"))?;

    log::info!(
        "Starting server at http://{}:{} (templates: {})",
        config.host,
        config.port,
        config.templates_dir.display()
    );

    let origins = config.cors_allowed_origins.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(Compress::default())
            .wrap(prometheus.clone())
            .wrap(cors(&origins))
            .wrap(Logger::default())
            .app_data(app_state.clone())
            .configure(handlers::config)
            .service(SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-doc/openapi.json", ApiDoc::openapi()))
    })
    .keep_alive(actix_web::http::KeepAlive::Os)
    .bind((config.host.as_str(), config.port))
    .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?
    .run()
    .await
    .context("server error")
}
