use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inline request data is capped by the model service at 20 MiB.
pub const MAX_IMAGE_SIZE_BYTES: usize = 20 * 1024 * 1024;

/// Access to files the user picked in the shell.
///
/// The shell owns the picked file and its ephemeral display URL; the core
/// only holds an opaque [`FileHandle`]. Reading is asynchronous; revoking a
/// display URL is fire-and-forget.
#[derive(Clone)]
pub struct Media<E> {
    context: CapabilityContext<MediaOperation, E>,
}

impl<Ev> Capability<Ev> for Media<Ev> {
    type Operation = MediaOperation;
    type MappedSelf<MappedEv> = Media<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Media::new(self.context.map_event(f))
    }
}

impl<E> Media<E>
where
    E: 'static,
{
    pub fn new(context: CapabilityContext<MediaOperation, E>) -> Self {
        Self { context }
    }

    pub fn read<F>(&self, handle: FileHandle, callback: F)
    where
        F: FnOnce(MediaResult) -> E + Send + Sync + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(MediaOperation::Read { handle })
                .await;
            context.update_app(callback(result));
        });
    }

    pub fn revoke(&self, display_url: impl Into<String>) {
        let display_url = display_url.into();
        let context = self.context.clone();
        self.context.spawn(async move {
            context
                .notify_shell(MediaOperation::Revoke { display_url })
                .await;
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileHandle(pub String);

impl FileHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaOperation {
    Read { handle: FileHandle },
    Revoke { display_url: String },
}

impl Operation for MediaOperation {
    type Output = MediaResult;
}

/// What the shell hands back for a read: either raw bytes, or the
/// `data:` URL a browser `FileReader` produces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileContents {
    Bytes(Vec<u8>),
    DataUrl(String),
}

impl FileContents {
    pub fn len(&self) -> usize {
        match self {
            FileContents::Bytes(bytes) => bytes.len(),
            FileContents::DataUrl(url) => url.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    WebP,
    Heic,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Heic => "image/heic",
        }
    }

    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(ImageFormat::Jpeg);
        }

        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(ImageFormat::Png);
        }

        if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            return Some(ImageFormat::Gif);
        }

        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(ImageFormat::WebP);
        }

        if &data[4..8] == b"ftyp" && matches!(&data[8..12], b"heic" | b"heix" | b"mif1") {
            return Some(ImageFormat::Heic);
        }

        None
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaError {
    #[error("file not found: {handle}")]
    NotFound { handle: String },

    #[error("read failed: {reason}")]
    ReadFailed { reason: String },

    #[error("file too large: {size} bytes exceeds maximum of {max} bytes")]
    TooLarge { size: usize, max: usize },
}

pub type MediaOutput = FileContents;
pub type MediaResult = Result<FileContents, MediaError>;
