use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capabilities::FileHandle;
use crate::config::ServiceConfig;
use crate::geolocation::LocationProvider;
use crate::normalizer::{Source, TaskResult};
use crate::router::TaskKind;
use crate::TaskError;

pub const DEFAULT_ANALYZE_PROMPT: &str = "Describe this image in detail.";

#[derive(Default, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tab {
    #[default]
    Chat,
    Create,
    Edit,
    Analyze,
}

impl Tab {
    #[must_use]
    pub const fn task_kind(self) -> TaskKind {
        match self {
            Self::Chat => TaskKind::Chat,
            Self::Create => TaskKind::Create,
            Self::Edit => TaskKind::Edit,
            Self::Analyze => TaskKind::Analyze,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Chat => "Chat",
            Self::Create => "Create",
            Self::Edit => "Edit",
            Self::Analyze => "Analyze",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            sources: None,
        }
    }

    /// An empty source list is stored as `None`.
    pub fn model(text: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
            sources: (!sources.is_empty()).then_some(sources),
        }
    }
}

/// A file the user picked, as reported by the shell.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ImageAsset {
    pub handle: FileHandle,
    pub display_url: String,
    #[serde(default)]
    pub mime_type: String,
}

/// A display URL that left its slot and must be revoked by the shell.
#[must_use = "released display URLs must be revoked"]
#[derive(Debug, PartialEq, Eq)]
pub struct ReleasedUrl(Option<String>);

impl ReleasedUrl {
    pub fn into_inner(self) -> Option<String> {
        self.0
    }
}

/// Holds at most one picked image. Every way an image leaves the slot
/// hands its display URL back to the caller.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct ImageSlot {
    asset: Option<ImageAsset>,
}

impl ImageSlot {
    pub fn replace(&mut self, asset: ImageAsset) -> ReleasedUrl {
        let previous = self.asset.replace(asset);
        ReleasedUrl(previous.map(|a| a.display_url))
    }

    pub fn clear(&mut self) -> ReleasedUrl {
        ReleasedUrl(self.asset.take().map(|a| a.display_url))
    }

    pub fn get(&self) -> Option<&ImageAsset> {
        self.asset.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.asset.is_none()
    }
}

#[derive(Default, Clone, Debug, PartialEq)]
pub enum Phase {
    #[default]
    Idle,
    Loading {
        ticket: u64,
        request_id: Option<String>,
    },
    Success(TaskResult),
    Failed(TaskError),
}

impl Phase {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    pub fn result(&self) -> Option<&TaskResult> {
        match self {
            Self::Success(result) => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Tracks the one outstanding task of a panel.
///
/// Every submission takes a fresh ticket. Completions carry their ticket
/// back and are applied only while that ticket is the one loading, so a
/// superseded or abandoned request can never overwrite newer state.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct TaskTracker {
    phase: Phase,
    issued: u64,
}

impl TaskTracker {
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase.is_loading()
    }

    pub fn is_current(&self, ticket: u64) -> bool {
        matches!(self.phase, Phase::Loading { ticket: t, .. } if t == ticket)
    }

    /// Starts a new submission. Returns its ticket and the request id of
    /// the submission it replaces, which the caller should cancel.
    pub fn begin(&mut self) -> (u64, Option<String>) {
        let superseded = self.abandon();
        self.issued += 1;
        let ticket = self.issued;
        self.phase = Phase::Loading {
            ticket,
            request_id: None,
        };
        (ticket, superseded)
    }

    /// Records the outbound request id once the request has been built.
    pub fn attach(&mut self, ticket: u64, id: impl Into<String>) -> bool {
        match &mut self.phase {
            Phase::Loading {
                ticket: t,
                request_id,
            } if *t == ticket => {
                *request_id = Some(id.into());
                true
            }
            _ => false,
        }
    }

    pub fn succeed(&mut self, ticket: u64, result: TaskResult) -> bool {
        self.settle(ticket, Phase::Success(result))
    }

    pub fn fail(&mut self, ticket: u64, error: TaskError) -> bool {
        self.settle(ticket, Phase::Failed(error))
    }

    /// Finishes a submission whose result lives elsewhere (the chat log).
    pub fn complete(&mut self, ticket: u64) -> bool {
        self.settle(ticket, Phase::Idle)
    }

    /// Fails without a submission, e.g. on a validation error. Any
    /// in-flight request is abandoned and its id returned.
    pub fn reject(&mut self, error: TaskError) -> Option<String> {
        let superseded = self.abandon();
        self.phase = Phase::Failed(error);
        superseded
    }

    /// Back to idle, dropping any result or error.
    pub fn reset(&mut self) -> Option<String> {
        let superseded = self.abandon();
        self.phase = Phase::Idle;
        superseded
    }

    fn abandon(&mut self) -> Option<String> {
        match std::mem::take(&mut self.phase) {
            Phase::Loading { ticket, request_id } => {
                debug!(ticket, "abandoning in-flight task");
                request_id
            }
            _ => None,
        }
    }

    fn settle(&mut self, ticket: u64, next: Phase) -> bool {
        if !self.is_current(ticket) {
            warn!(ticket, "dropping completion for a superseded task");
            return false;
        }
        self.phase = next;
        true
    }
}

#[derive(Default, Clone, Debug)]
pub struct ChatPanel {
    pub prompt: String,
    pub messages: Vec<ChatMessage>,
    pub task: TaskTracker,
}

#[derive(Default, Clone, Debug)]
pub struct CreatePanel {
    pub prompt: String,
    pub task: TaskTracker,
}

/// The edit and analyze panels: a picked image, a prompt and one result.
#[derive(Clone, Debug)]
pub struct ImagePanel {
    pub prompt: String,
    pub image: ImageSlot,
    pub task: TaskTracker,
    default_prompt: &'static str,
}

impl ImagePanel {
    pub fn with_default_prompt(default_prompt: &'static str) -> Self {
        Self {
            prompt: default_prompt.to_string(),
            image: ImageSlot::default(),
            task: TaskTracker::default(),
            default_prompt,
        }
    }

    /// Clears the image, the result and the prompt. Returns the released
    /// display URL and the id of any abandoned request.
    pub fn reset(&mut self) -> (ReleasedUrl, Option<String>) {
        self.prompt = self.default_prompt.to_string();
        let superseded = self.task.reset();
        (self.image.clear(), superseded)
    }
}

pub struct Model {
    pub config: Option<ServiceConfig>,
    pub startup_error: Option<String>,
    pub tab: Tab,
    pub location: LocationProvider,
    pub chat: ChatPanel,
    pub create: CreatePanel,
    pub edit: ImagePanel,
    pub analyze: ImagePanel,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            config: None,
            startup_error: None,
            tab: Tab::default(),
            location: LocationProvider::default(),
            chat: ChatPanel::default(),
            create: CreatePanel::default(),
            edit: ImagePanel::with_default_prompt(""),
            analyze: ImagePanel::with_default_prompt(DEFAULT_ANALYZE_PROMPT),
        }
    }
}

impl Model {
    pub fn prompt_mut(&mut self, tab: Tab) -> &mut String {
        match tab {
            Tab::Chat => &mut self.chat.prompt,
            Tab::Create => &mut self.create.prompt,
            Tab::Edit => &mut self.edit.prompt,
            Tab::Analyze => &mut self.analyze.prompt,
        }
    }

    pub fn tracker(&self, tab: Tab) -> &TaskTracker {
        match tab {
            Tab::Chat => &self.chat.task,
            Tab::Create => &self.create.task,
            Tab::Edit => &self.edit.task,
            Tab::Analyze => &self.analyze.task,
        }
    }

    pub fn tracker_mut(&mut self, tab: Tab) -> &mut TaskTracker {
        match tab {
            Tab::Chat => &mut self.chat.task,
            Tab::Create => &mut self.create.task,
            Tab::Edit => &mut self.edit.task,
            Tab::Analyze => &mut self.analyze.task,
        }
    }

    /// The panels that accept a picked image.
    pub fn image_panel_mut(&mut self, tab: Tab) -> Option<&mut ImagePanel> {
        match tab {
            Tab::Edit => Some(&mut self.edit),
            Tab::Analyze => Some(&mut self.analyze),
            Tab::Chat | Tab::Create => None,
        }
    }

    pub fn image_panel(&self, tab: Tab) -> Option<&ImagePanel> {
        match tab {
            Tab::Edit => Some(&self.edit),
            Tab::Analyze => Some(&self.analyze),
            Tab::Chat | Tab::Create => None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }
}
