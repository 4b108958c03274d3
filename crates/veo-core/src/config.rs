//! Configuration loading
//!
//! [`VeoConfig`] itself lives in `veo-types`; this module fills it from the
//! process environment (after reading `.env`) or from a JSON file.

use crate::error::VeoError;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use veo_types::{ProviderKind, ValidationError, VeoConfig};

/// Loading entry points for [`VeoConfig`]
pub trait ConfigLoader: Sized {
    /// Read `.env` if present, then the process environment
    fn from_env() -> Result<Self, VeoError>;

    /// Read a JSON file; missing keys keep their defaults
    fn from_file(path: &Path) -> Result<Self, VeoError>;

    /// Build from an arbitrary variable lookup
    fn from_lookup<F>(lookup: F) -> Result<Self, VeoError>
    where
        F: Fn(&str) -> Option<String>;
}

impl ConfigLoader for VeoConfig {
    fn from_env() -> Result<Self, VeoError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(VeoError::config(".env", e.to_string())),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_file(path: &Path) -> Result<Self, VeoError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VeoError::config(&path.display().to_string(), format!("cannot read: {}", e))
        })?;
        let config: VeoConfig = serde_json::from_str(&content)
            .map_err(|e| VeoError::config(&path.display().to_string(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, VeoError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = VeoConfig::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let providers = match get("VEO_PROVIDERS") {
            Some(list) => list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(ProviderKind::from_str)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| VeoError::config("VEO_PROVIDERS", e.to_string()))?,
            None => defaults.providers.clone(),
        };

        let config = VeoConfig {
            api_key: get("GOOGLE_API_KEY").unwrap_or_default(),
            project_id: get("GOOGLE_CLOUD_PROJECT"),
            region: get("GOOGLE_CLOUD_REGION").unwrap_or(defaults.region),
            model: get("VEO_MODEL").unwrap_or(defaults.model),
            api_base_url: get("VEO_API_BASE_URL").unwrap_or(defaults.api_base_url),
            default_aspect_ratio: parse_var(&get, "DEFAULT_ASPECT_RATIO", defaults.default_aspect_ratio)?,
            default_duration: parse_var(&get, "DEFAULT_DURATION", defaults.default_duration)?,
            default_number_of_videos: parse_var(
                &get,
                "DEFAULT_NUMBER_OF_VIDEOS",
                defaults.default_number_of_videos,
            )?,
            default_person_generation: parse_var(
                &get,
                "DEFAULT_PERSON_GENERATION",
                defaults.default_person_generation,
            )?,
            max_concurrent_operations: parse_var(
                &get,
                "MAX_CONCURRENT_OPERATIONS",
                defaults.max_concurrent_operations,
            )?,
            retry_attempts: parse_var(&get, "RETRY_ATTEMPTS", defaults.retry_attempts)?,
            retry_delay_secs: parse_var(&get, "RETRY_DELAY", defaults.retry_delay_secs)?,
            poll_interval_secs: parse_var(&get, "VEO_POLL_INTERVAL", defaults.poll_interval_secs)?,
            generation_timeout_secs: parse_var(
                &get,
                "VEO_GENERATION_TIMEOUT",
                defaults.generation_timeout_secs,
            )?,
            output_dir: get("OUTPUT_DIR").map(PathBuf::from).unwrap_or(defaults.output_dir),
            gcs_bucket: get("GCS_BUCKET"),
            gcs_access_token: get("GCS_ACCESS_TOKEN"),
            providers,
            svd_endpoint: get("SVD_ENDPOINT").unwrap_or(defaults.svd_endpoint),
            ltx_endpoint: get("LTX_ENDPOINT").unwrap_or(defaults.ltx_endpoint),
            ffmpeg_path: get("FFMPEG_PATH").map(PathBuf::from).unwrap_or(defaults.ffmpeg_path),
            prompts_dir: get("PROMPTS_DIR").map(PathBuf::from).unwrap_or(defaults.prompts_dir),
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: parse_var(&get, "LOG_FORMAT", defaults.log_format)?,
        };

        config.validate().map_err(env_error)?;
        Ok(config)
    }
}

/// Report a failed range check against the variable that set it
fn env_error(err: ValidationError) -> VeoError {
    let key = match &err {
        ValidationError::OutOfRange { field, .. } => match *field {
            "default_duration" => "DEFAULT_DURATION",
            "default_number_of_videos" => "DEFAULT_NUMBER_OF_VIDEOS",
            "max_concurrent_operations" => "MAX_CONCURRENT_OPERATIONS",
            "retry_attempts" => "RETRY_ATTEMPTS",
            "retry_delay" => "RETRY_DELAY",
            "poll_interval" => "VEO_POLL_INTERVAL",
            "generation_timeout" => "VEO_GENERATION_TIMEOUT",
            _ => return VeoError::Validation(err),
        },
        ValidationError::Invalid(_) => "VEO_PROVIDERS",
        _ => return VeoError::Validation(err),
    };
    VeoError::config(key, err.to_string())
}

fn parse_var<T, G>(get: &G, key: &str, default: T) -> Result<T, VeoError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| VeoError::config(key, format!("invalid value '{}': {}", raw, e))),
        None => Ok(default),
    }
}
