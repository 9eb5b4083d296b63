mod http;
mod location;
mod media;

pub use self::http::{
    Http, HttpError, HttpHeaders, HttpMethod, HttpOperation, HttpOutput, HttpRequest,
    HttpResponse, HttpResult, ValidatedUrl, DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS,
};
pub use self::location::{
    GeoPosition, Location, LocationError, LocationOperation, LocationOutput, LocationResult,
};
pub use self::media::{
    FileContents, FileHandle, ImageFormat, Media, MediaError, MediaOperation, MediaOutput,
    MediaResult, MAX_IMAGE_SIZE_BYTES,
};

/// Crux's built-in Render capability covers view updates as-is.
pub use crux_core::render::Render;

use crate::event::Event;
use crate::App;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub http: Http<Event>,
    pub location: Location<Event>,
    pub media: Media<Event>,
    pub render: Render<Event>,
}
