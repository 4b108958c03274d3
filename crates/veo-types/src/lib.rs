//! Shared types for VEO
//!
//! This crate contains the value objects shared by the generation engine
//! and the CLI. Requests and configuration are validated once, when they
//! are built, and are plain data afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Validation
// ============================================================================

pub const MIN_PROMPT_CHARS: usize = 10;
pub const MAX_PROMPT_CHARS: usize = 10_000;
pub const MIN_DURATION_SECS: u32 = 5;
pub const MAX_DURATION_SECS: u32 = 8;
pub const MIN_VIDEOS_PER_REQUEST: u32 = 1;
pub const MAX_VIDEOS_PER_REQUEST: u32 = 4;

/// Errors raised while building requests or configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Prompt must be between {min} and {max} characters (got {actual})")]
    PromptLength { min: usize, max: usize, actual: usize },

    #[error("{field} must be between {min} and {max} (got {actual})")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        actual: u64,
    },

    #[error("Image file not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("GCS URI must start with 'gs://': {0}")]
    InvalidGcsUri(String),

    #[error("Invalid aspect ratio: {0} (expected 16:9, 9:16 or 1:1)")]
    InvalidAspectRatio(String),

    #[error("Invalid person generation setting: {0} (expected allow_adult or dont_allow)")]
    InvalidPersonGeneration(String),

    #[error("Invalid log format: {0} (expected text or json)")]
    InvalidLogFormat(String),

    #[error("Unknown provider: {0} (expected veo, svd or ltx)")]
    UnknownProvider(String),

    #[error("Invalid video URI: {0}")]
    InvalidUri(String),

    #[error("{0}")]
    Invalid(String),
}

fn check_range(field: &'static str, actual: u64, min: u64, max: u64) -> Result<(), ValidationError> {
    if actual < min || actual > max {
        return Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            actual,
        });
    }
    Ok(())
}

// ============================================================================
// Request Settings
// ============================================================================

/// Supported aspect ratios for video generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 3] = [Self::Landscape, Self::Portrait, Self::Square];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Square => "1:1",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "16:9" | "landscape" => Ok(Self::Landscape),
            "9:16" | "portrait" => Ok(Self::Portrait),
            "1:1" | "square" => Ok(Self::Square),
            other => Err(ValidationError::InvalidAspectRatio(other.to_string())),
        }
    }
}

/// Whether the service may generate people
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonGeneration {
    #[default]
    AllowAdult,
    DontAllow,
}

impl PersonGeneration {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllowAdult => "allow_adult",
            Self::DontAllow => "dont_allow",
        }
    }
}

impl fmt::Display for PersonGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonGeneration {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "allow_adult" => Ok(Self::AllowAdult),
            "dont_allow" => Ok(Self::DontAllow),
            other => Err(ValidationError::InvalidPersonGeneration(other.to_string())),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ValidationError::InvalidLogFormat(other.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

// ============================================================================
// Providers
// ============================================================================

/// A backend able to turn a request into videos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// The cloud video-generation API
    Veo,
    /// Local Stable Video Diffusion pipeline
    Svd,
    /// Local LTX-Video pipeline
    Ltx,
}

impl ProviderKind {
    /// Cloud first, then the two local pipelines
    pub const DEFAULT_ORDER: [ProviderKind; 3] = [Self::Veo, Self::Svd, Self::Ltx];

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Veo => "VEO",
            Self::Svd => "SVD",
            Self::Ltx => "LTX-Video",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Veo => "veo",
            Self::Svd => "svd",
            Self::Ltx => "ltx",
        })
    }
}

impl FromStr for ProviderKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "veo" => Ok(Self::Veo),
            "svd" => Ok(Self::Svd),
            "ltx" | "ltx-video" => Ok(Self::Ltx),
            other => Err(ValidationError::UnknownProvider(other.to_string())),
        }
    }
}

// ============================================================================
// Video Request
// ============================================================================

/// A single, validated video generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRequest {
    pub id: Uuid,
    pub prompt: String,
    pub image_path: Option<PathBuf>,
    pub aspect_ratio: AspectRatio,
    pub duration_secs: u32,
    pub number_of_videos: u32,
    pub person_generation: PersonGeneration,
    pub enhance_prompt: bool,
    pub output_gcs_uri: Option<String>,
    pub output_filename: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VideoRequest {
    pub fn builder(prompt: impl Into<String>) -> VideoRequestBuilder {
        VideoRequestBuilder::new(prompt)
    }

    /// Check every field constraint
    pub fn validate(&self) -> Result<(), ValidationError> {
        let chars = self.prompt.chars().count();
        if !(MIN_PROMPT_CHARS..=MAX_PROMPT_CHARS).contains(&chars) {
            return Err(ValidationError::PromptLength {
                min: MIN_PROMPT_CHARS,
                max: MAX_PROMPT_CHARS,
                actual: chars,
            });
        }

        check_range(
            "duration",
            self.duration_secs as u64,
            MIN_DURATION_SECS as u64,
            MAX_DURATION_SECS as u64,
        )?;
        check_range(
            "number_of_videos",
            self.number_of_videos as u64,
            MIN_VIDEOS_PER_REQUEST as u64,
            MAX_VIDEOS_PER_REQUEST as u64,
        )?;

        if let Some(ref path) = self.image_path {
            if !path.exists() {
                return Err(ValidationError::ImageNotFound(path.clone()));
            }
        }

        if let Some(ref uri) = self.output_gcs_uri {
            validate_gcs_uri(uri)?;
        }

        Ok(())
    }

    /// Set the GCS output location after construction
    pub fn set_output_gcs_uri(&mut self, uri: impl Into<String>) -> Result<(), ValidationError> {
        let uri = uri.into();
        validate_gcs_uri(&uri)?;
        self.output_gcs_uri = Some(uri);
        Ok(())
    }

    /// First `max_chars` characters of the prompt, for logs and tables
    pub fn prompt_preview(&self, max_chars: usize) -> String {
        truncate_chars(&self.prompt, max_chars)
    }
}

fn validate_gcs_uri(uri: &str) -> Result<(), ValidationError> {
    if uri.starts_with("gs://") {
        Ok(())
    } else {
        Err(ValidationError::InvalidGcsUri(uri.to_string()))
    }
}

/// Shorten a string to `max_chars` characters, appending "..." when cut
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

/// Builder for [`VideoRequest`]. `build` runs validation.
#[derive(Debug, Clone)]
pub struct VideoRequestBuilder {
    request: VideoRequest,
}

impl VideoRequestBuilder {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            request: VideoRequest {
                id: Uuid::new_v4(),
                prompt: prompt.into(),
                image_path: None,
                aspect_ratio: AspectRatio::default(),
                duration_secs: MAX_DURATION_SECS,
                number_of_videos: 1,
                person_generation: PersonGeneration::default(),
                enhance_prompt: true,
                output_gcs_uri: None,
                output_filename: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn image_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.request.image_path = Some(path.into());
        self
    }

    pub fn aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.request.aspect_ratio = aspect_ratio;
        self
    }

    pub fn duration_secs(mut self, seconds: u32) -> Self {
        self.request.duration_secs = seconds;
        self
    }

    pub fn number_of_videos(mut self, count: u32) -> Self {
        self.request.number_of_videos = count;
        self
    }

    pub fn person_generation(mut self, setting: PersonGeneration) -> Self {
        self.request.person_generation = setting;
        self
    }

    pub fn enhance_prompt(mut self, enabled: bool) -> Self {
        self.request.enhance_prompt = enabled;
        self
    }

    pub fn output_gcs_uri(mut self, uri: impl Into<String>) -> Self {
        self.request.output_gcs_uri = Some(uri.into());
        self
    }

    pub fn output_filename(mut self, name: impl Into<String>) -> Self {
        self.request.output_filename = Some(name.into());
        self
    }

    pub fn build(self) -> Result<VideoRequest, ValidationError> {
        self.request.validate()?;
        Ok(self.request)
    }
}

/// Per-call generation settings shared by every prompt of a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub aspect_ratio: AspectRatio,
    pub duration_secs: u32,
    pub number_of_videos: u32,
    pub person_generation: PersonGeneration,
    pub enhance_prompt: bool,
    pub output_filename: Option<String>,
}

impl GenerationParams {
    /// Parameters seeded from the configured defaults
    pub fn from_config(config: &VeoConfig) -> Self {
        Self {
            aspect_ratio: config.default_aspect_ratio,
            duration_secs: config.default_duration,
            number_of_videos: config.default_number_of_videos,
            person_generation: config.default_person_generation,
            enhance_prompt: true,
            output_filename: None,
        }
    }

    /// Start a request for `prompt` carrying these parameters
    pub fn request(&self, prompt: impl Into<String>) -> VideoRequestBuilder {
        let mut builder = VideoRequest::builder(prompt)
            .aspect_ratio(self.aspect_ratio)
            .duration_secs(self.duration_secs)
            .number_of_videos(self.number_of_videos)
            .person_generation(self.person_generation)
            .enhance_prompt(self.enhance_prompt);
        if let Some(ref name) = self.output_filename {
            builder = builder.output_filename(name.clone());
        }
        builder
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::from_config(&VeoConfig::default())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VeoConfig {
    pub api_key: String,
    pub project_id: Option<String>,
    pub region: String,
    pub model: String,
    pub api_base_url: String,

    pub default_aspect_ratio: AspectRatio,
    pub default_duration: u32,
    pub default_number_of_videos: u32,
    pub default_person_generation: PersonGeneration,

    pub max_concurrent_operations: u32,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub poll_interval_secs: u64,
    pub generation_timeout_secs: u64,

    pub output_dir: PathBuf,
    pub gcs_bucket: Option<String>,
    pub gcs_access_token: Option<String>,

    /// Fallback order, first entry tried first
    pub providers: Vec<ProviderKind>,
    pub svd_endpoint: String,
    pub ltx_endpoint: String,
    pub ffmpeg_path: PathBuf,
    pub prompts_dir: PathBuf,

    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for VeoConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            project_id: None,
            region: "us-central1".to_string(),
            model: "veo-3.0-generate-preview".to_string(),
            api_base_url: "https://generativelanguage.googleapis.com".to_string(),
            default_aspect_ratio: AspectRatio::Landscape,
            default_duration: 8,
            default_number_of_videos: 1,
            default_person_generation: PersonGeneration::AllowAdult,
            max_concurrent_operations: 3,
            retry_attempts: 3,
            retry_delay_secs: 30,
            poll_interval_secs: 20,
            generation_timeout_secs: 900,
            output_dir: PathBuf::from("output/videos"),
            gcs_bucket: None,
            gcs_access_token: None,
            providers: ProviderKind::DEFAULT_ORDER.to_vec(),
            svd_endpoint: "http://127.0.0.1:7860/svd".to_string(),
            ltx_endpoint: "http://127.0.0.1:7860/ltx".to_string(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            prompts_dir: PathBuf::from("prompts"),
            log_level: "INFO".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl VeoConfig {
    /// Check the numeric ranges and the provider list
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range(
            "default_duration",
            self.default_duration as u64,
            MIN_DURATION_SECS as u64,
            MAX_DURATION_SECS as u64,
        )?;
        check_range(
            "default_number_of_videos",
            self.default_number_of_videos as u64,
            MIN_VIDEOS_PER_REQUEST as u64,
            MAX_VIDEOS_PER_REQUEST as u64,
        )?;
        check_range("max_concurrent_operations", self.max_concurrent_operations as u64, 1, 10)?;
        check_range("retry_attempts", self.retry_attempts as u64, 1, 10)?;
        check_range("retry_delay", self.retry_delay_secs, 5, 300)?;
        check_range("poll_interval", self.poll_interval_secs, 1, 600)?;
        check_range("generation_timeout", self.generation_timeout_secs, 1, 86_400)?;

        if self.providers.is_empty() {
            return Err(ValidationError::Invalid(
                "At least one provider must be enabled".to_string(),
            ));
        }
        for (i, provider) in self.providers.iter().enumerate() {
            if self.providers[..i].contains(provider) {
                return Err(ValidationError::Invalid(format!(
                    "Provider listed twice: {}",
                    provider
                )));
            }
        }

        Ok(())
    }

    pub fn uses_provider(&self, kind: ProviderKind) -> bool {
        self.providers.contains(&kind)
    }

    /// Copy with secrets masked down to their last four characters
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.api_key = mask_secret(&self.api_key);
        copy.gcs_access_token = self.gcs_access_token.as_deref().map(mask_secret);
        copy
    }
}

/// Mask a secret, keeping its last four characters visible
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{}", tail)
}

// ============================================================================
// Video URIs
// ============================================================================

/// Where a generated video can be fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoUri {
    Gcs { bucket: String, object: String },
    File(PathBuf),
    Http(url::Url),
}

impl VideoUri {
    pub fn parse(uri: &str) -> Result<Self, ValidationError> {
        if let Some(rest) = uri.strip_prefix("gs://") {
            return match rest.split_once('/') {
                Some((bucket, object)) if !bucket.is_empty() && !object.is_empty() => {
                    Ok(Self::Gcs {
                        bucket: bucket.to_string(),
                        object: object.to_string(),
                    })
                }
                _ => Err(ValidationError::InvalidUri(uri.to_string())),
            };
        }

        if let Some(path) = uri.strip_prefix("file://") {
            if path.is_empty() {
                return Err(ValidationError::InvalidUri(uri.to_string()));
            }
            return Ok(Self::File(PathBuf::from(path)));
        }

        if uri.starts_with("http://") || uri.starts_with("https://") {
            return url::Url::parse(uri)
                .map(Self::Http)
                .map_err(|_| ValidationError::InvalidUri(uri.to_string()));
        }

        Err(ValidationError::InvalidUri(uri.to_string()))
    }

    /// `file://` URI for a local path
    pub fn from_path(path: &Path) -> String {
        format!("file://{}", path.display())
    }
}

impl fmt::Display for VideoUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gcs { bucket, object } => write!(f, "gs://{}/{}", bucket, object),
            Self::File(path) => write!(f, "file://{}", path.display()),
            Self::Http(url) => write!(f, "{}", url),
        }
    }
}

// ============================================================================
// Results & Progress
// ============================================================================

/// Where a generation currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStage {
    Submitted,
    Initializing,
    Processing,
    Generating,
    Completed,
}

/// A progress report from a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: GenerationStage,
    /// 0-100
    pub percent: u8,
}

impl ProgressUpdate {
    pub fn new(stage: GenerationStage, percent: u8) -> Self {
        Self {
            stage,
            percent: percent.min(100),
        }
    }
}

/// The provider that served a request and the URIs it returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub provider: ProviderKind,
    pub uris: Vec<String>,
}

/// Status of a long-running cloud operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub operation_id: String,
    pub done: bool,
    pub progress: u8,
    pub video_uris: Vec<String>,
    pub error: Option<String>,
}

/// One request's result within a batch
///
/// A failed request keeps its slot with an empty `videos` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSlot<T> {
    pub index: usize,
    pub request_id: Uuid,
    pub videos: Vec<T>,
    pub error: Option<String>,
}

impl<T> BatchSlot<T> {
    pub fn success(index: usize, request_id: Uuid, videos: Vec<T>) -> Self {
        Self {
            index,
            request_id,
            videos,
            error: None,
        }
    }

    pub fn failure(index: usize, request_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            index,
            request_id,
            videos: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by the core while it works
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum GenerationEvent {
    RequestStarted {
        id: Uuid,
        prompt: String,
    },
    Progress {
        id: Uuid,
        provider: ProviderKind,
        stage: GenerationStage,
        percent: u8,
    },
    ProviderFailed {
        id: Uuid,
        provider: ProviderKind,
        error: String,
    },
    RequestCompleted {
        id: Uuid,
        provider: ProviderKind,
        uris: Vec<String>,
    },
    RequestFailed {
        id: Uuid,
        error: String,
    },
    VideoSaved {
        id: Uuid,
        path: PathBuf,
    },
    BatchCompleted {
        total: usize,
        succeeded: usize,
    },
}
