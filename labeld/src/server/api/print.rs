//! Print job API (submit, stop, queue status).

use axum::Json;
use axum::extract::State;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use labelprinter::raster::{DEFAULT_THRESHOLD, load_png_bytes};
use labelprinter::{JobParams, LabelPrinterError, Page, PrintJob, TagPayload};
use serde::Deserialize;
use serde_json::json;

use super::{ApiResult, err_json, ok_json};
use crate::app::SharedState;
use crate::services::print_queue::{self, QueuedJob};

/// Per-request overrides of the configured job parameters.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ParamsBody {
    pub paper_type: Option<u8>,
    pub gap: Option<u8>,
    pub speed: Option<u16>,
    pub density: Option<u8>,
    pub cut_type: Option<u8>,
    pub keep_on_print: Option<u16>,
    pub target_pages: Option<u16>,
}

impl ParamsBody {
    fn apply(&self, base: JobParams) -> JobParams {
        JobParams {
            paper_type: self.paper_type.unwrap_or(base.paper_type),
            gap: self.gap.unwrap_or(base.gap),
            speed: self.speed.unwrap_or(base.speed),
            density: self.density.unwrap_or(base.density),
            cut_type: self.cut_type.unwrap_or(base.cut_type),
            keep_on_print: self.keep_on_print.unwrap_or(base.keep_on_print),
            target_pages: self.target_pages.unwrap_or(base.target_pages),
        }
    }
}

/// Body of `POST /api/print`. Pages are base64 PNGs; tag segments are raw
/// base64 bytes.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PrintRequest {
    pub pages: Vec<String>,
    pub tag: Option<String>,
    pub tag_secondary: Option<String>,
    pub params: ParamsBody,
    pub threshold: Option<u8>,
    pub description: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error("request has no pages and no tag")]
    Empty,

    #[error("{0}: invalid base64")]
    Base64(String),

    #[error("page {index}: {source}")]
    Image {
        index: usize,
        #[source]
        source: LabelPrinterError,
    },

    #[error("{0} printers do not support tag writes")]
    TagUnsupported(&'static str),
}

fn decode(field: impl Into<String>, data: &str) -> Result<Vec<u8>, RequestError> {
    STANDARD
        .decode(data.trim())
        .map_err(|_| RequestError::Base64(field.into()))
}

fn build_job(req: &PrintRequest, params: JobParams) -> Result<PrintJob, RequestError> {
    let threshold = req.threshold.unwrap_or(DEFAULT_THRESHOLD);
    let mut pages = Vec::with_capacity(req.pages.len());
    for (index, data) in req.pages.iter().enumerate() {
        let png = decode(format!("page {index}"), data)?;
        let packed =
            load_png_bytes(&png, threshold).map_err(|source| RequestError::Image { index, source })?;
        if packed.is_blank() {
            tracing::warn!(index, "Page has no inked pixels");
        }
        pages.push(Page::from(packed));
    }

    let mut job = PrintJob::new(params).with_batch(pages);
    if let Some(tag) = &req.tag {
        let mut payload = TagPayload::new(decode("tag", tag)?);
        if let Some(secondary) = &req.tag_secondary {
            payload = payload.with_secondary(decode("tag_secondary", secondary)?);
        }
        job = job.with_tag(payload);
    }

    if !job.has_pages() && !job.has_tag() {
        return Err(RequestError::Empty);
    }
    Ok(job)
}

/// POST /api/print – Queue a print job
pub async fn submit_print(
    State(state): State<SharedState>,
    Json(body): Json<PrintRequest>,
) -> ApiResult {
    let (params, profile) = {
        let config = state.config().await;
        (
            body.params.apply(config.job_params()),
            config.printer_family.profile(),
        )
    };

    let job = build_job(&body, params)
        .and_then(|job| {
            if job.has_tag() && profile.opcodes.tag_set.is_none() {
                return Err(RequestError::TagUnsupported(profile.name));
            }
            Ok(job)
        })
        .map_err(|e| err_json(400, &e.to_string()))?;

    let id = uuid::Uuid::new_v4().to_string();
    let pages = job.total_pages();
    let queued = QueuedJob {
        id: id.clone(),
        description: body
            .description
            .unwrap_or_else(|| format!("{pages} page(s)")),
        job,
    };
    let pending = print_queue::enqueue(&state, queued)
        .await
        .map_err(|e| err_json(503, &e))?;

    Ok(ok_json(json!({
        "job_id": id,
        "pages": pages,
        "pending": pending,
    })))
}

/// POST /api/print/stop – Stop the running job
pub async fn stop_print(State(state): State<SharedState>) -> ApiResult {
    match state.stop_active().await {
        Some(job_id) => Ok(ok_json(json!({ "job_id": job_id, "stopping": true }))),
        None => Err(err_json(409, "No print job is running")),
    }
}

/// GET /api/print/queue
pub async fn get_queue(State(state): State<SharedState>) -> ApiResult {
    let status = print_queue::queue_status(&state).await;
    let active = state.active_job_id().await;
    Ok(ok_json(json!({
        "pending": status.pending,
        "total_processed": status.total_processed,
        "last_print_at": status.last_print_at,
        "last_job": status.last_job,
        "active_job": active,
    })))
}
