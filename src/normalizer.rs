//! Turns model service responses into the uniform [`TaskResult`] the panels
//! consume.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::capabilities::{HttpResponse, HttpResult};
use crate::codec::EncodedImage;
use crate::gemini::{ApiErrorResponse, Candidate, GenerateContentResponse, GroundingChunk, Part};
use crate::router::TaskKind;
use crate::{ErrorKind, TaskError};

/// Generated images that come back without a MIME type are PNG.
pub const FALLBACK_IMAGE_MIME: &str = "image/png";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Source {
    Web { uri: String, title: String },
    Maps { uri: String, title: String },
}

impl Source {
    pub fn uri(&self) -> &str {
        match self {
            Self::Web { uri, .. } | Self::Maps { uri, .. } => uri,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Web { title, .. } | Self::Maps { title, .. } => title,
        }
    }

    /// A chunk with a web reference yields a web source even if it also
    /// carries a maps reference. References without a URI are dropped and a
    /// missing title falls back to the URI.
    pub fn from_chunk(chunk: &GroundingChunk) -> Option<Self> {
        if let Some(web) = &chunk.web {
            if let Some(uri) = web.uri.clone() {
                let title = web.title.clone().unwrap_or_else(|| uri.clone());
                return Some(Self::Web { uri, title });
            }
        }
        let maps = chunk.maps.as_ref()?;
        let uri = maps.uri.clone()?;
        let title = maps.title.clone().unwrap_or_else(|| uri.clone());
        Some(Self::Maps { uri, title })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskResult {
    Chat { text: String, sources: Vec<Source> },
    Image(EncodedImage),
    Text { text: String },
}

pub fn extract_sources(chunks: &[GroundingChunk]) -> Vec<Source> {
    chunks.iter().filter_map(Source::from_chunk).collect()
}

/// Concatenated text of the non-thought parts, or `None` if there is none.
fn collect_text(parts: &[Part]) -> Option<String> {
    let mut texts = parts
        .iter()
        .filter(|part| !part.thought)
        .filter_map(|part| part.text.as_deref())
        .peekable();
    texts.peek()?;
    Some(texts.collect())
}

fn first_image(candidate: &Candidate) -> Result<EncodedImage, TaskError> {
    let blob = candidate
        .parts()
        .iter()
        .find_map(|part| part.inline_data.as_ref())
        .ok_or_else(|| TaskError::empty_result("No image was generated."))?;

    let mime_type = if blob.mime_type.trim().is_empty() {
        FALLBACK_IMAGE_MIME
    } else {
        blob.mime_type.as_str()
    };

    EncodedImage::from_base64(blob.data.as_str(), mime_type).map_err(|e| {
        TaskError::service("The service returned an unreadable image.")
            .with_internal(e.to_string())
    })
}

#[instrument(skip(response), fields(task = kind.name()))]
pub fn normalize(
    response: &GenerateContentResponse,
    kind: TaskKind,
) -> Result<TaskResult, TaskError> {
    let Some(candidate) = response.first_candidate() else {
        let mut error = TaskError::empty_result("The service returned no candidates.");
        if let Some(reason) = response.block_reason() {
            warn!(block_reason = reason, "prompt was blocked");
            error = error.with_context("block_reason", reason);
        }
        return Err(error);
    };

    let result = match kind {
        TaskKind::Create | TaskKind::Edit => first_image(candidate).map(TaskResult::Image),
        TaskKind::Chat => {
            let sources = extract_sources(candidate.grounding_chunks());
            debug!(sources = sources.len(), "normalized chat reply");
            // A grounded reply may come back with citations only.
            match collect_text(candidate.parts()) {
                Some(text) => Ok(TaskResult::Chat { text, sources }),
                None if !sources.is_empty() => Ok(TaskResult::Chat {
                    text: String::new(),
                    sources,
                }),
                None => Err(TaskError::empty_result("The service returned no text.")),
            }
        }
        TaskKind::Analyze => collect_text(candidate.parts())
            .map(|text| TaskResult::Text { text })
            .ok_or_else(|| TaskError::empty_result("The service returned no analysis.")),
    };

    result.map_err(|error| match candidate.finish_reason.as_deref() {
        Some(reason) if error.kind == ErrorKind::EmptyResult => {
            warn!(finish_reason = reason, "candidate carried no usable output");
            error.with_context("finish_reason", reason)
        }
        _ => error,
    })
}

fn status_error(response: &HttpResponse) -> TaskError {
    let detail = response
        .json::<ApiErrorResponse>()
        .map(|body| body.error.message)
        .ok()
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", response.status()));

    TaskError::service("The model service rejected the request.")
        .with_internal(detail)
        .with_context("http_status", response.status().to_string())
        .with_context("request_id", response.request_id())
}

/// Normalizes a raw HTTP outcome: transport failures, non-2xx statuses and
/// unparseable bodies all become service errors.
pub fn normalize_http(result: HttpResult, kind: TaskKind) -> Result<TaskResult, TaskError> {
    let response = result.map_err(TaskError::from)?;
    if !response.is_success() {
        let error = status_error(&response);
        warn!(task = kind.name(), error = %error, "model service returned an error status");
        return Err(error);
    }

    let parsed: GenerateContentResponse = response.json()?;
    normalize(&parsed, kind)
}
