use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::capabilities::{FileContents, ImageFormat, MAX_IMAGE_SIZE_BYTES};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("file is empty")]
    Empty,

    #[error("file too large: {size} bytes exceeds maximum of {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("malformed data URL: {reason}")]
    MalformedDataUrl { reason: String },

    #[error("invalid base64 payload: {reason}")]
    InvalidBase64 { reason: String },

    #[error("could not determine the image MIME type")]
    MissingMimeType,
}

/// A bare base64 payload plus its MIME type, ready for an inline request part.
///
/// `data` never carries a `data:` URI header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    data: String,
    mime_type: String,
}

impl EncodedImage {
    /// Wraps a base64 payload produced elsewhere (e.g. by the model service),
    /// checking that it decodes.
    pub fn from_base64(data: impl Into<String>, mime_type: &str) -> Result<Self, CodecError> {
        let data = data.into();
        let decoded = decode_payload(&data)?;
        let mime_type = resolve_mime(mime_type, None, &decoded)?;
        Ok(Self { data, mime_type })
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn decode(&self) -> Result<Vec<u8>, CodecError> {
        decode_payload(&self.data)
    }

    /// `data:{mime};base64,{payload}`, suitable for an `<img src>`.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Turns the contents of a picked file into a bare base64 payload.
///
/// `declared_mime` is what the host reported for the file; when it is blank
/// the type comes from the data URL header or, failing that, the magic bytes.
#[instrument(skip(contents), fields(contents_len = contents.len()))]
pub fn encode(contents: FileContents, declared_mime: &str) -> Result<EncodedImage, CodecError> {
    match contents {
        FileContents::Bytes(bytes) => {
            check_size(bytes.len())?;
            let mime_type = resolve_mime(declared_mime, None, &bytes)?;
            debug!(bytes = bytes.len(), %mime_type, "encoded raw file");
            Ok(EncodedImage {
                data: STANDARD.encode(&bytes),
                mime_type,
            })
        }
        FileContents::DataUrl(url) => {
            let (header_mime, payload) = split_data_url(&url)?;
            let decoded = decode_payload(payload)?;
            check_size(decoded.len())?;
            let mime_type = resolve_mime(declared_mime, header_mime, &decoded)?;
            debug!(bytes = decoded.len(), %mime_type, "stripped data URL header");
            Ok(EncodedImage {
                data: payload.to_string(),
                mime_type,
            })
        }
    }
}

fn check_size(size: usize) -> Result<(), CodecError> {
    if size == 0 {
        return Err(CodecError::Empty);
    }
    if size > MAX_IMAGE_SIZE_BYTES {
        return Err(CodecError::TooLarge {
            size,
            max: MAX_IMAGE_SIZE_BYTES,
        });
    }
    Ok(())
}

fn split_data_url(url: &str) -> Result<(Option<&str>, &str), CodecError> {
    let rest = url
        .get(..5)
        .filter(|scheme| scheme.eq_ignore_ascii_case("data:"))
        .map(|_| &url[5..])
        .ok_or_else(|| CodecError::MalformedDataUrl {
            reason: "missing 'data:' scheme".to_string(),
        })?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| CodecError::MalformedDataUrl {
            reason: "missing ',' separator".to_string(),
        })?;

    let mut params = header.split(';');
    let mime = params.next().map(str::trim).filter(|m| !m.is_empty());
    if !params.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
        return Err(CodecError::MalformedDataUrl {
            reason: "payload is not base64-encoded".to_string(),
        });
    }

    Ok((mime, payload))
}

fn decode_payload(payload: &str) -> Result<Vec<u8>, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::Empty);
    }
    STANDARD
        .decode(payload)
        .map_err(|e| CodecError::InvalidBase64 {
            reason: e.to_string(),
        })
}

fn resolve_mime(
    declared: &str,
    from_header: Option<&str>,
    bytes: &[u8],
) -> Result<String, CodecError> {
    let declared = declared.trim();
    if !declared.is_empty() {
        return Ok(declared.to_ascii_lowercase());
    }
    if let Some(mime) = from_header {
        return Ok(mime.to_ascii_lowercase());
    }
    ImageFormat::from_magic_bytes(bytes)
        .map(|format| format.mime_type().to_string())
        .ok_or(CodecError::MissingMimeType)
}
