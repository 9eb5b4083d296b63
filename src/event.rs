use serde::{Deserialize, Serialize};

use crate::capabilities::{HttpResult, LocationResult, MediaResult};
use crate::config::ServiceConfig;
use crate::model::{ImageAsset, Tab};

/// What the shell knows about its own platform at startup.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HostInfo {
    pub geolocation: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub enum Event {
    Start {
        config: ServiceConfig,
        host: HostInfo,
    },

    TabSelected(Tab),
    PromptChanged {
        panel: Tab,
        text: String,
    },
    Submitted(Tab),
    ImageSelected {
        panel: Tab,
        asset: ImageAsset,
    },
    PanelReset(Tab),

    // Capability callbacks, never sent by the shell.
    #[serde(skip)]
    LocationResolved(LocationResult),
    #[serde(skip)]
    FileRead {
        panel: Tab,
        ticket: u64,
        prompt: String,
        result: MediaResult,
    },
    #[serde(skip)]
    ServiceResponded {
        panel: Tab,
        ticket: u64,
        result: HttpResult,
    },
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::TabSelected(_) => "tab_selected",
            Self::PromptChanged { .. } => "prompt_changed",
            Self::Submitted(_) => "submitted",
            Self::ImageSelected { .. } => "image_selected",
            Self::PanelReset(_) => "panel_reset",
            Self::LocationResolved(_) => "location_resolved",
            Self::FileRead { .. } => "file_read",
            Self::ServiceResponded { .. } => "service_responded",
        }
    }

    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::TabSelected(_)
                | Self::PromptChanged { .. }
                | Self::Submitted(_)
                | Self::ImageSelected { .. }
                | Self::PanelReset(_)
        )
    }
}
