//! Domain counters, kept in a registry of their own and served at `/metrics/documents`.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref DOCUMENTS_GENERATED: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new("docgen_documents_generated_total", "Documents generated, by output format"),
            &["format"],
        )
    );
    pub static ref GENERATION_ERRORS: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new("docgen_errors_total", "Failed generation requests, by error kind"),
            &["kind"],
        )
    );
}

fn register(counter: prometheus::Result<IntCounterVec>) -> IntCounterVec {
    match counter {
        Ok(counter) => {
            if let Err(e) = REGISTRY.register(Box::new(counter.clone())) {
                log::error!("[metrics] failed to register counter: {e}");
            }
            counter
        }
        // Names and labels above are static and valid.
        Err(e) => unreachable!("invalid counter definition: {e}"),
    }
}

pub fn record_document(format: &str) {
    DOCUMENTS_GENERATED.with_label_values(&[format]).inc();
}

pub fn record_error(kind: &str) {
    GENERATION_ERRORS.with_label_values(&[kind]).inc();
}

/// Prometheus text exposition of the domain registry.
pub fn gather() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
