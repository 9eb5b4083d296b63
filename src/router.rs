use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::capabilities::HttpRequest;
use crate::codec::EncodedImage;
use crate::config::ServiceConfig;
use crate::gemini::{
    Content, GenerateContentRequest, GenerationConfig, LatLng, Modality, NoParams, Part,
    RetrievalConfig, Tool, ToolConfig,
};
use crate::geolocation::Coordinates;
use crate::TaskError;

pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Case-insensitive substrings that mark a prompt as a place lookup.
pub const LOCATION_KEYWORDS: &[&str] = &[
    "nearby",
    "restaurants",
    "directions",
    "map",
    "located",
    "where is",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Chat,
    Create,
    Edit,
    Analyze,
}

impl TaskKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Analyze => "analyze",
        }
    }

    #[must_use]
    pub const fn produces_image(self) -> bool {
        matches!(self, Self::Create | Self::Edit)
    }

    #[must_use]
    pub const fn failure_message(self) -> &'static str {
        match self {
            Self::Chat => "Failed to get response from chatbot. Please check the console for details.",
            Self::Create => "Failed to create image. Please check the console for details.",
            Self::Edit => "Failed to edit image. Please check the console for details.",
            Self::Analyze => "Failed to analyze image. Please check the console for details.",
        }
    }

    #[must_use]
    pub const fn validation_message(self) -> &'static str {
        match self {
            Self::Chat => "Please enter a message.",
            Self::Create => "Please provide a prompt to generate an image.",
            Self::Edit => "Please upload an image and provide an editing prompt.",
            Self::Analyze => "Please upload an image and provide a prompt.",
        }
    }
}

/// A retrieval capability attached to a chat request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetrievalTool {
    WebSearch,
    Maps(Coordinates),
}

pub fn is_location_query(prompt: &str) -> bool {
    let prompt = prompt.to_lowercase();
    LOCATION_KEYWORDS
        .iter()
        .any(|keyword| prompt.contains(keyword))
}

/// Web search is always on; maps is added only for a place-lookup prompt
/// *and* a resolved location.
pub fn capabilities_for(prompt: &str, location: Option<Coordinates>) -> Vec<RetrievalTool> {
    let mut tools = vec![RetrievalTool::WebSearch];
    if let Some(coordinates) = location.filter(|_| is_location_query(prompt)) {
        tools.push(RetrievalTool::Maps(coordinates));
    }
    tools
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskRequest {
    Chat {
        prompt: String,
        location: Option<Coordinates>,
    },
    Create {
        prompt: String,
    },
    Edit {
        prompt: String,
        image: EncodedImage,
    },
    Analyze {
        prompt: String,
        image: EncodedImage,
    },
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Chat { .. } => TaskKind::Chat,
            Self::Create { .. } => TaskKind::Create,
            Self::Edit { .. } => TaskKind::Edit,
            Self::Analyze { .. } => TaskKind::Analyze,
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            Self::Chat { prompt, .. }
            | Self::Create { prompt }
            | Self::Edit { prompt, .. }
            | Self::Analyze { prompt, .. } => prompt,
        }
    }
}

/// Builds the `generateContent` body for a task.
pub fn build_body(task: &TaskRequest) -> GenerateContentRequest {
    match task {
        TaskRequest::Chat { prompt, location } => {
            let selected = capabilities_for(prompt, *location);
            let mut tools = Vec::with_capacity(selected.len());
            let mut tool_config = None;
            for tool in selected {
                match tool {
                    RetrievalTool::WebSearch => tools.push(Tool::GoogleSearch(NoParams {})),
                    RetrievalTool::Maps(coordinates) => {
                        tools.push(Tool::GoogleMaps(NoParams {}));
                        tool_config = Some(ToolConfig {
                            retrieval_config: RetrievalConfig {
                                lat_lng: LatLng {
                                    latitude: coordinates.latitude(),
                                    longitude: coordinates.longitude(),
                                },
                            },
                        });
                    }
                }
            }
            debug!(
                maps = tool_config.is_some(),
                location_known = location.is_some(),
                "selected chat retrieval tools"
            );
            GenerateContentRequest {
                contents: vec![Content::user(vec![Part::text(prompt.as_str())])],
                tools,
                tool_config,
                generation_config: None,
            }
        }
        TaskRequest::Create { prompt } => GenerateContentRequest {
            contents: vec![Content::user(vec![Part::text(prompt.as_str())])],
            tools: Vec::new(),
            tool_config: None,
            generation_config: Some(image_output()),
        },
        TaskRequest::Edit { prompt, image } => GenerateContentRequest {
            contents: vec![Content::user(image_then_text(image, prompt))],
            tools: Vec::new(),
            tool_config: None,
            generation_config: Some(image_output()),
        },
        TaskRequest::Analyze { prompt, image } => GenerateContentRequest {
            contents: vec![Content::user(image_then_text(image, prompt))],
            tools: Vec::new(),
            tool_config: None,
            generation_config: None,
        },
    }
}

fn image_output() -> GenerationConfig {
    GenerationConfig {
        response_modalities: vec![Modality::Image],
    }
}

fn image_then_text(image: &EncodedImage, prompt: &str) -> Vec<Part> {
    vec![
        Part::inline(image.mime_type(), image.data()),
        Part::text(prompt),
    ]
}

/// Validates a task and turns it into the one outbound HTTP request.
#[instrument(skip(task, config), fields(task = task.kind().name()))]
pub fn route(task: &TaskRequest, config: &ServiceConfig) -> Result<HttpRequest, TaskError> {
    let kind = task.kind();
    if task.prompt().trim().is_empty() {
        return Err(TaskError::validation(kind.validation_message()));
    }

    let model = match kind {
        TaskKind::Chat | TaskKind::Analyze => config.chat_model(),
        TaskKind::Create | TaskKind::Edit => config.image_model(),
    };

    let body = build_body(task);
    let request = HttpRequest::post(config.generate_content_url(model))?
        .with_header(API_KEY_HEADER, config.api_key().expose_secret().as_str())?
        .with_json(&body)?
        .with_timeout_ms(config.timeout_ms())?;

    debug!(request_id = request.request_id(), model, "routed task");
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use proptest::prelude::*;

    fn config() -> ServiceConfig {
        ServiceConfig::new("test-key").unwrap()
    }

    fn here() -> Coordinates {
        Coordinates::new(40.0, -74.0).unwrap()
    }

    fn image() -> EncodedImage {
        EncodedImage::from_base64("aGVsbG8=", "image/jpeg").unwrap()
    }

    mod tool_selection_tests {
        use super::*;

        #[test]
        fn test_web_search_only_without_location() {
            assert_eq!(
                capabilities_for("What's the weather today?", None),
                vec![RetrievalTool::WebSearch]
            );
            assert_eq!(
                capabilities_for("find restaurants nearby", None),
                vec![RetrievalTool::WebSearch]
            );
        }

        #[test]
        fn test_web_search_only_without_keyword() {
            assert_eq!(
                capabilities_for("What's the weather today?", Some(here())),
                vec![RetrievalTool::WebSearch]
            );
        }

        #[test]
        fn test_maps_with_keyword_and_location() {
            assert_eq!(
                capabilities_for("find restaurants nearby", Some(here())),
                vec![RetrievalTool::WebSearch, RetrievalTool::Maps(here())]
            );
        }

        #[test]
        fn test_keywords_match_case_insensitively_as_substrings() {
            assert!(is_location_query("WHERE IS the Louvre?"));
            assert!(is_location_query("Show me a Map of Lisbon"));
            assert!(is_location_query("how is the bakery located"));
            assert!(is_location_query("Directions to the station"));
            assert!(!is_location_query("where's my phone"));
        }
    }

    mod body_tests {
        use super::*;
        use serde_json::json;

        #[test]
        fn test_chat_body_with_maps_carries_exact_coordinates() {
            let body = build_body(&TaskRequest::Chat {
                prompt: "find restaurants nearby".into(),
                location: Some(here()),
            });
            let value = serde_json::to_value(&body).unwrap();
            assert_eq!(
                value["tools"],
                json!([{ "googleSearch": {} }, { "googleMaps": {} }])
            );
            assert_eq!(
                value["toolConfig"]["retrievalConfig"]["latLng"],
                json!({ "latitude": 40.0, "longitude": -74.0 })
            );
            assert!(value.get("generationConfig").is_none());
        }

        #[test]
        fn test_chat_body_without_maps_has_no_tool_config() {
            let body = build_body(&TaskRequest::Chat {
                prompt: "What's the weather today?".into(),
                location: None,
            });
            assert_eq!(body.tools, vec![Tool::GoogleSearch(NoParams {})]);
            assert!(body.tool_config.is_none());
        }

        #[test]
        fn test_create_body_requests_image_modality() {
            let body = build_body(&TaskRequest::Create {
                prompt: "a red fox".into(),
            });
            assert_eq!(body.contents[0].parts, vec![Part::text("a red fox")]);
            assert_eq!(
                body.generation_config,
                Some(GenerationConfig {
                    response_modalities: vec![Modality::Image]
                })
            );
            assert!(body.tools.is_empty());
        }

        #[test]
        fn test_edit_body_orders_image_before_text() {
            let body = build_body(&TaskRequest::Edit {
                prompt: "add a hat".into(),
                image: image(),
            });
            let parts = &body.contents[0].parts;
            assert_eq!(parts.len(), 2);
            assert_eq!(parts[0], Part::inline("image/jpeg", "aGVsbG8="));
            assert_eq!(parts[1], Part::text("add a hat"));
            assert!(body.generation_config.is_some());
        }

        #[test]
        fn test_analyze_body_has_no_modality_constraint() {
            let body = build_body(&TaskRequest::Analyze {
                prompt: "Describe this image in detail.".into(),
                image: image(),
            });
            assert_eq!(body.contents[0].parts[0], Part::inline("image/jpeg", "aGVsbG8="));
            assert!(body.generation_config.is_none());
            assert!(body.tools.is_empty());
        }
    }

    mod route_tests {
        use super::*;

        #[test]
        fn test_routes_to_model_endpoint_with_key_header() {
            let request = route(
                &TaskRequest::Create {
                    prompt: "a lighthouse".into(),
                },
                &config(),
            )
            .unwrap();

            assert_eq!(
                request.url().as_str(),
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-image:generateContent"
            );
            assert_eq!(request.headers().get(API_KEY_HEADER), Some("test-key"));
            assert_eq!(request.timeout_ms(), config().timeout_ms());
        }

        #[test]
        fn test_chat_and_analyze_use_text_model() {
            let chat = route(
                &TaskRequest::Chat {
                    prompt: "hi".into(),
                    location: None,
                },
                &config(),
            )
            .unwrap();
            assert!(chat.url().as_str().contains("/models/gemini-2.5-flash:"));

            let analyze = route(
                &TaskRequest::Analyze {
                    prompt: "what is this".into(),
                    image: image(),
                },
                &config(),
            )
            .unwrap();
            assert!(analyze.url().as_str().contains("/models/gemini-2.5-flash:"));
        }

        #[test]
        fn test_blank_prompt_is_a_validation_error() {
            let error = route(
                &TaskRequest::Edit {
                    prompt: "   ".into(),
                    image: image(),
                },
                &config(),
            )
            .unwrap_err();
            assert_eq!(error.kind, ErrorKind::Validation);
            assert_eq!(
                error.message,
                "Please upload an image and provide an editing prompt."
            );
        }

        #[test]
        fn test_body_is_the_built_request() {
            let task = TaskRequest::Chat {
                prompt: "directions to the museum".into(),
                location: Some(here()),
            };
            let request = route(&task, &config()).unwrap();
            let sent: GenerateContentRequest = request.body_json().unwrap();
            assert_eq!(sent, build_body(&task));
        }
    }

    fn keyword_strategy() -> impl Strategy<Value = String> {
        prop::sample::select(LOCATION_KEYWORDS.to_vec()).prop_map(str::to_string)
    }

    proptest! {
        #[test]
        fn maps_requires_keyword_and_location(
            prefix in "[a-z ]{0,12}",
            keyword in keyword_strategy(),
            upper in any::<bool>(),
            lat in -90.0f64..=90.0,
            lon in -180.0f64..=180.0,
        ) {
            let keyword = if upper { keyword.to_uppercase() } else { keyword };
            let prompt = format!("{prefix}{keyword}");
            let coordinates = Coordinates::new(lat, lon).unwrap();

            let with_location = capabilities_for(&prompt, Some(coordinates));
            prop_assert_eq!(
                with_location,
                vec![RetrievalTool::WebSearch, RetrievalTool::Maps(coordinates)]
            );

            let without_location = capabilities_for(&prompt, None);
            prop_assert_eq!(without_location, vec![RetrievalTool::WebSearch]);
        }

        #[test]
        fn web_search_is_always_first(prompt in ".{0,40}", has_location in any::<bool>()) {
            let location = has_location.then(here);
            let tools = capabilities_for(&prompt, location);
            prop_assert_eq!(tools.first(), Some(&RetrievalTool::WebSearch));
            prop_assert!(tools.len() <= 2);
        }

        #[test]
        fn prompts_without_keywords_never_get_maps(
            prompt in "[a-zA-Z0-9 ,.?!']{0,60}".prop_filter(
                "prompt mentions a location keyword",
                |p| {
                    let lower = p.to_lowercase();
                    !LOCATION_KEYWORDS.iter().any(|k| lower.contains(k))
                },
            ),
            lat in -90.0f64..=90.0,
            lon in -180.0f64..=180.0,
        ) {
            let coordinates = Coordinates::new(lat, lon).unwrap();
            prop_assert_eq!(
                capabilities_for(&prompt, Some(coordinates)),
                vec![RetrievalTool::WebSearch]
            );
        }
    }
}
