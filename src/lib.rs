#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
pub mod codec;
pub mod config;
pub mod event;
pub mod gemini;
pub mod geolocation;
pub mod model;
pub mod normalizer;
pub mod router;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::capabilities::{HttpError, MediaError};
use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::router::TaskKind;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use crux_core::{render::Render, App as CruxApp};
pub use event::{Event, HostInfo};
pub use model::{ChatMessage, ImageAsset, Model, Phase, Role, Tab};
pub use normalizer::{Source, TaskResult};

pub const READ_FAILURE_MESSAGE: &str = "Failed to read the selected image.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The picked file could not be read or encoded.
    Read,
    /// Transport failure, error status or malformed response.
    Service,
    /// A well-formed response with nothing usable in it.
    EmptyResult,
    Validation,
    Configuration,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Read => "READ_ERROR",
            Self::Service => "SERVICE_ERROR",
            Self::EmptyResult => "EMPTY_RESULT",
            Self::Validation => "VALIDATION_ERROR",
            Self::Configuration => "CONFIGURATION_ERROR",
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Service)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl TaskError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    #[must_use]
    pub fn read(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Read, message)
    }

    #[must_use]
    pub fn service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Service, message)
    }

    #[must_use]
    pub fn empty_result(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmptyResult, message)
    }

    #[must_use]
    pub fn not_configured() -> Self {
        Self::new(
            ErrorKind::Configuration,
            "The app is not configured with an API key.",
        )
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// The banner text for a failed task. Service details stay in the log.
    #[must_use]
    pub fn user_facing_message(&self, task: TaskKind) -> String {
        match self.kind {
            ErrorKind::Validation | ErrorKind::Configuration => self.message.clone(),
            ErrorKind::Read => READ_FAILURE_MESSAGE.into(),
            ErrorKind::Service | ErrorKind::EmptyResult => task.failure_message().into(),
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for TaskError {}

impl From<HttpError> for TaskError {
    fn from(e: HttpError) -> Self {
        let error =
            TaskError::service("The model service request failed.").with_internal(e.to_string());
        match e.request_id() {
            Some(request_id) => error.with_context("request_id", request_id),
            None => error,
        }
    }
}

impl From<MediaError> for TaskError {
    fn from(e: MediaError) -> Self {
        TaskError::read("The selected file could not be read.").with_internal(e.to_string())
    }
}

impl From<CodecError> for TaskError {
    fn from(e: CodecError) -> Self {
        TaskError::read("The selected file is not a usable image.").with_internal(e.to_string())
    }
}

impl From<ConfigError> for TaskError {
    fn from(e: ConfigError) -> Self {
        TaskError::new(ErrorKind::Configuration, e.to_string())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserFacingError {
    pub message: String,
    pub is_retryable: bool,
    pub error_code: String,
}

impl UserFacingError {
    #[must_use]
    pub fn new(error: &TaskError, task: TaskKind) -> Self {
        Self {
            message: error.user_facing_message(task),
            is_retryable: error.is_retryable(),
            error_code: error.code().to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatView {
    pub messages: Vec<ChatMessage>,
    pub prompt: String,
    pub is_loading: bool,
    pub can_send: bool,
    pub error: Option<UserFacingError>,
    pub location_status: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CreateView {
    pub prompt: String,
    pub is_loading: bool,
    pub can_submit: bool,
    pub image_url: Option<String>,
    pub error: Option<UserFacingError>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EditView {
    pub prompt: String,
    pub is_loading: bool,
    pub can_submit: bool,
    pub original_image_url: Option<String>,
    pub edited_image_url: Option<String>,
    pub error: Option<UserFacingError>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalyzeView {
    pub prompt: String,
    pub is_loading: bool,
    pub can_submit: bool,
    pub image_url: Option<String>,
    pub analysis: Option<String>,
    pub error: Option<UserFacingError>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewModel {
    pub active_tab: Tab,
    pub fatal_error: Option<String>,
    pub chat: ChatView,
    pub create: CreateView,
    pub edit: EditView,
    pub analyze: AnalyzeView,
}

pub mod app {
    use tracing::{debug, error, info, info_span, warn};

    use super::*;
    use crate::capabilities::{HttpResult, MediaResult};
    use crate::codec;
    use crate::model::{ImagePanel, Phase, ReleasedUrl, TaskTracker};
    use crate::normalizer;
    use crate::router::{self, TaskRequest};

    #[derive(Default)]
    pub struct App;

    impl App {
        fn release(released: ReleasedUrl, caps: &Capabilities) {
            if let Some(url) = released.into_inner() {
                debug!("revoking released display url");
                caps.media.revoke(url);
            }
        }

        fn cancel(superseded: Option<String>, caps: &Capabilities) {
            if let Some(request_id) = superseded {
                info!(%request_id, "cancelling superseded request");
                caps.http.cancel(request_id);
            }
        }

        /// Routes a task and sends it, or records why it could not be sent.
        fn dispatch(
            model: &mut Model,
            panel: Tab,
            ticket: u64,
            task: &TaskRequest,
            caps: &Capabilities,
        ) {
            let routed = match model.config.as_ref() {
                Some(config) => router::route(task, config),
                None => Err(TaskError::not_configured()),
            };

            let tracker = model.tracker_mut(panel);
            match routed {
                Ok(request) => {
                    let request_id = request.request_id().to_string();
                    tracker.attach(ticket, request_id.as_str());
                    info!(
                        task = task.kind().name(),
                        %request_id,
                        "sending request to model service"
                    );
                    caps.http.send(request, move |result| Event::ServiceResponded {
                        panel,
                        ticket,
                        result,
                    });
                }
                Err(error) => {
                    warn!(task = task.kind().name(), %error, "task was not sent");
                    tracker.fail(ticket, error);
                }
            }
        }

        fn submit_chat(model: &mut Model, caps: &Capabilities) {
            if model.chat.prompt.trim().is_empty() {
                debug!("ignoring blank chat message");
                return;
            }

            let prompt = std::mem::take(&mut model.chat.prompt);
            model.chat.messages.push(ChatMessage::user(prompt.as_str()));
            let (ticket, superseded) = model.chat.task.begin();
            Self::cancel(superseded, caps);

            let task = TaskRequest::Chat {
                prompt,
                location: model.location.available(),
            };
            Self::dispatch(model, Tab::Chat, ticket, &task, caps);
        }

        fn submit_create(model: &mut Model, caps: &Capabilities) {
            let prompt = model.create.prompt.clone();
            let (ticket, superseded) = model.create.task.begin();
            Self::cancel(superseded, caps);
            Self::dispatch(model, Tab::Create, ticket, &TaskRequest::Create { prompt }, caps);
        }

        /// Edit and analyze first read the picked file; routing happens in
        /// [`Self::file_read`].
        fn submit_image_task(model: &mut Model, panel: Tab, caps: &Capabilities) {
            let kind = panel.task_kind();
            let Some(ImagePanel {
                prompt,
                image,
                task,
                ..
            }) = model.image_panel_mut(panel)
            else {
                return;
            };

            let handle = match image.get() {
                Some(asset) if !prompt.trim().is_empty() => asset.handle.clone(),
                _ => {
                    debug!(task = kind.name(), "submission is missing an image or prompt");
                    let superseded = task.reject(TaskError::validation(kind.validation_message()));
                    Self::cancel(superseded, caps);
                    return;
                }
            };

            let (ticket, superseded) = task.begin();
            Self::cancel(superseded, caps);

            let prompt = prompt.clone();
            caps.media.read(handle, move |result| Event::FileRead {
                panel,
                ticket,
                prompt,
                result,
            });
        }

        fn file_read(
            model: &mut Model,
            panel: Tab,
            ticket: u64,
            prompt: String,
            result: MediaResult,
            caps: &Capabilities,
        ) {
            let Some(image_panel) = model.image_panel(panel) else {
                return;
            };
            if !image_panel.task.is_current(ticket) {
                warn!(ticket, "dropping file read for a superseded task");
                return;
            }

            let declared_mime = image_panel
                .image
                .get()
                .map(|asset| asset.mime_type.clone())
                .unwrap_or_default();

            let encoded = result
                .map_err(TaskError::from)
                .and_then(|contents| {
                    codec::encode(contents, &declared_mime).map_err(TaskError::from)
                });

            match encoded {
                Ok(image) => {
                    let task = if panel == Tab::Edit {
                        TaskRequest::Edit { prompt, image }
                    } else {
                        TaskRequest::Analyze { prompt, image }
                    };
                    Self::dispatch(model, panel, ticket, &task, caps);
                }
                Err(error) => {
                    warn!(%error, "selected image could not be read");
                    model.tracker_mut(panel).fail(ticket, error);
                }
            }
        }

        fn service_responded(model: &mut Model, panel: Tab, ticket: u64, result: HttpResult) {
            if !model.tracker(panel).is_current(ticket) {
                warn!(ticket, "dropping response for a superseded task");
                return;
            }

            let kind = panel.task_kind();
            match normalizer::normalize_http(result, kind) {
                Ok(TaskResult::Chat { text, sources }) if panel == Tab::Chat => {
                    info!(sources = sources.len(), "chat reply received");
                    model.chat.messages.push(ChatMessage::model(text, sources));
                    model.chat.task.complete(ticket);
                }
                Ok(result) => {
                    info!(task = kind.name(), "task succeeded");
                    model.tracker_mut(panel).succeed(ticket, result);
                }
                Err(error) => {
                    warn!(task = kind.name(), %error, "task failed");
                    model.tracker_mut(panel).fail(ticket, error);
                }
            }
        }

        fn image_selected(model: &mut Model, panel: Tab, asset: ImageAsset, caps: &Capabilities) {
            match model.image_panel_mut(panel) {
                Some(image_panel) => {
                    let released = image_panel.image.replace(asset);
                    let superseded = image_panel.task.reset();
                    Self::release(released, caps);
                    Self::cancel(superseded, caps);
                }
                None => {
                    warn!(panel = panel.label(), "panel does not take images");
                    caps.media.revoke(asset.display_url);
                }
            }
        }

        fn panel_reset(model: &mut Model, panel: Tab, caps: &Capabilities) {
            match panel {
                Tab::Chat => {
                    model.chat.prompt.clear();
                    model.chat.messages.clear();
                    Self::cancel(model.chat.task.reset(), caps);
                }
                Tab::Create => {
                    model.create.prompt.clear();
                    Self::cancel(model.create.task.reset(), caps);
                }
                Tab::Edit | Tab::Analyze => {
                    if let Some(image_panel) = model.image_panel_mut(panel) {
                        let (released, superseded) = image_panel.reset();
                        Self::release(released, caps);
                        Self::cancel(superseded, caps);
                    }
                }
            }
        }

        fn error_view(tracker: &TaskTracker, tab: Tab) -> Option<UserFacingError> {
            tracker
                .phase()
                .error()
                .map(|error| UserFacingError::new(error, tab.task_kind()))
        }

        fn can_submit(model: &Model, tab: Tab) -> bool {
            let prompt_given = match tab {
                Tab::Chat => !model.chat.prompt.trim().is_empty(),
                Tab::Create => !model.create.prompt.trim().is_empty(),
                Tab::Edit | Tab::Analyze => model
                    .image_panel(tab)
                    .is_some_and(|p| !p.image.is_empty() && !p.prompt.trim().is_empty()),
            };
            model.is_configured() && prompt_given && !model.tracker(tab).is_loading()
        }

        fn image_url(phase: &Phase) -> Option<String> {
            match phase.result() {
                Some(TaskResult::Image(image)) => Some(image.to_data_url()),
                _ => None,
            }
        }
    }

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = ViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
            let span = info_span!("update", event = event.name());
            let _entered = span.enter();

            if event.is_user_initiated() {
                debug!("user action");
            }

            match event {
                Event::Start { config, host } => {
                    match config.validate() {
                        Ok(()) => {
                            info!(
                                chat_model = config.chat_model(),
                                image_model = config.image_model(),
                                "model service configured"
                            );
                            model.config = Some(config);
                            model.startup_error = None;
                        }
                        Err(e) => {
                            error!(error = %e, "service configuration rejected");
                            model.config = None;
                            model.startup_error = Some(e.to_string());
                        }
                    }

                    if model.location.start(host.geolocation) {
                        caps.location.current_position(Event::LocationResolved);
                    }
                }

                Event::LocationResolved(result) => model.location.settle(result),

                Event::TabSelected(tab) => model.tab = tab,

                Event::PromptChanged { panel, text } => *model.prompt_mut(panel) = text,

                Event::Submitted(panel) => match panel {
                    Tab::Chat => Self::submit_chat(model, caps),
                    Tab::Create => Self::submit_create(model, caps),
                    Tab::Edit | Tab::Analyze => Self::submit_image_task(model, panel, caps),
                },

                Event::ImageSelected { panel, asset } => {
                    Self::image_selected(model, panel, asset, caps);
                }

                Event::PanelReset(panel) => Self::panel_reset(model, panel, caps),

                Event::FileRead {
                    panel,
                    ticket,
                    prompt,
                    result,
                } => Self::file_read(model, panel, ticket, prompt, result, caps),

                Event::ServiceResponded {
                    panel,
                    ticket,
                    result,
                } => Self::service_responded(model, panel, ticket, result),
            }

            caps.render.render();
        }

        fn view(&self, model: &Model) -> ViewModel {
            let fatal_error = model
                .startup_error
                .as_ref()
                .map(|e| format!("Configuration error: {e}"));

            let chat = ChatView {
                messages: model.chat.messages.clone(),
                prompt: model.chat.prompt.clone(),
                is_loading: model.chat.task.is_loading(),
                can_send: Self::can_submit(model, Tab::Chat),
                error: Self::error_view(&model.chat.task, Tab::Chat),
                location_status: model.location.status_line(),
            };

            let create = CreateView {
                prompt: model.create.prompt.clone(),
                is_loading: model.create.task.is_loading(),
                can_submit: Self::can_submit(model, Tab::Create),
                image_url: Self::image_url(model.create.task.phase()),
                error: Self::error_view(&model.create.task, Tab::Create),
            };

            let edit = EditView {
                prompt: model.edit.prompt.clone(),
                is_loading: model.edit.task.is_loading(),
                can_submit: Self::can_submit(model, Tab::Edit),
                original_image_url: model.edit.image.get().map(|a| a.display_url.clone()),
                edited_image_url: Self::image_url(model.edit.task.phase()),
                error: Self::error_view(&model.edit.task, Tab::Edit),
            };

            let analyze = AnalyzeView {
                prompt: model.analyze.prompt.clone(),
                is_loading: model.analyze.task.is_loading(),
                can_submit: Self::can_submit(model, Tab::Analyze),
                image_url: model.analyze.image.get().map(|a| a.display_url.clone()),
                analysis: match model.analyze.task.phase().result() {
                    Some(TaskResult::Text { text }) => Some(text.clone()),
                    _ => None,
                },
                error: Self::error_view(&model.analyze.task, Tab::Analyze),
            };

            ViewModel {
                active_tab: model.tab,
                fatal_error,
                chat,
                create,
                edit,
                analyze,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod error_tests {
        use super::*;

        #[test]
        fn test_only_service_errors_are_retryable() {
            assert!(ErrorKind::Service.is_retryable());
            assert!(!ErrorKind::Read.is_retryable());
            assert!(!ErrorKind::EmptyResult.is_retryable());
            assert!(!ErrorKind::Validation.is_retryable());
            assert!(!ErrorKind::Configuration.is_retryable());
        }

        #[test]
        fn test_user_facing_messages_per_task() {
            let service = TaskError::service("boom").with_internal("HTTP 500");
            assert_eq!(
                service.user_facing_message(TaskKind::Create),
                "Failed to create image. Please check the console for details."
            );
            assert_eq!(
                service.user_facing_message(TaskKind::Analyze),
                "Failed to analyze image. Please check the console for details."
            );

            let validation = TaskError::validation(TaskKind::Create.validation_message());
            assert_eq!(
                validation.user_facing_message(TaskKind::Create),
                "Please provide a prompt to generate an image."
            );

            let read = TaskError::from(CodecError::Empty);
            assert_eq!(read.kind, ErrorKind::Read);
            assert_eq!(read.user_facing_message(TaskKind::Edit), READ_FAILURE_MESSAGE);
        }

        #[test]
        fn test_http_error_keeps_request_id() {
            let error = TaskError::from(HttpError::Cancelled {
                request_id: "req-7".into(),
            });
            assert_eq!(error.kind, ErrorKind::Service);
            assert_eq!(
                error.context.get("request_id").map(String::as_str),
                Some("req-7")
            );
        }

        #[test]
        fn test_display_includes_internal_detail() {
            let error = TaskError::service("failed").with_internal("timeout after 5ms");
            assert_eq!(
                error.to_string(),
                "[SERVICE_ERROR] failed (internal: timeout after 5ms)"
            );
        }

        #[test]
        fn test_user_facing_error_view() {
            let view = UserFacingError::new(&TaskError::empty_result("none"), TaskKind::Edit);
            assert_eq!(view.error_code, "EMPTY_RESULT");
            assert!(!view.is_retryable);
            assert_eq!(
                view.message,
                "Failed to edit image. Please check the console for details."
            );
        }
    }

    mod view_tests {
        use super::*;
        use crate::codec::EncodedImage;
        use crate::config::ServiceConfig;
        use crux_core::App as _;

        fn configured() -> Model {
            Model {
                config: Some(ServiceConfig::new("k").unwrap()),
                ..Model::default()
            }
        }

        #[test]
        fn test_initial_view() {
            let view = App.view(&Model::default());
            assert_eq!(view.active_tab, Tab::Chat);
            assert_eq!(view.fatal_error, None);
            assert_eq!(view.chat.location_status, "Loading location...");
            assert_eq!(view.analyze.prompt, "Describe this image in detail.");
            assert!(!view.create.can_submit);
        }

        #[test]
        fn test_can_submit_needs_config_and_prompt() {
            let mut model = configured();
            assert!(!App.view(&model).create.can_submit);
            model.create.prompt = "a fox".into();
            assert!(App.view(&model).create.can_submit);

            model.config = None;
            assert!(!App.view(&model).create.can_submit);
        }

        #[test]
        fn test_success_renders_data_url() {
            let mut model = configured();
            let (ticket, _) = model.create.task.begin();
            let image = EncodedImage::from_base64("aGVsbG8=", "image/png").unwrap();
            assert!(model.create.task.succeed(ticket, TaskResult::Image(image)));

            let view = App.view(&model);
            assert_eq!(
                view.create.image_url.as_deref(),
                Some("data:image/png;base64,aGVsbG8=")
            );
            assert!(!view.create.is_loading);
        }

        #[test]
        fn test_startup_error_is_fatal_banner() {
            let model = Model {
                startup_error: Some(ConfigError::MissingApiKey.to_string()),
                ..Model::default()
            };
            let view = App.view(&model);
            assert_eq!(
                view.fatal_error.as_deref(),
                Some("Configuration error: no API key configured (set GEMINI_API_KEY or API_KEY)")
            );
        }
    }
}
