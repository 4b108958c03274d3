//! CLI command implementations

use crate::output::{print_batch, print_output, print_videos};
use crate::progress::{GenerationProgress, ProgressHandle};
use crate::{OutputFormat, PromptAction};
use anyhow::{bail, Context, Result};
use console::style;
use std::path::{Path, PathBuf};
use veo_core::VeoCore;
use veo_types::{GenerationParams, ProviderKind, VeoConfig};

/// Show progress bars unless the output is machine-readable
fn start_progress(core: &VeoCore, format: OutputFormat) -> Option<ProgressHandle> {
    match format {
        OutputFormat::Json => None,
        OutputFormat::Human | OutputFormat::Table => {
            Some(GenerationProgress::new().spawn(core.subscribe()))
        }
    }
}

async fn stop_progress(handle: Option<ProgressHandle>) {
    if let Some(handle) = handle {
        handle.finish().await;
    }
}

/// The cloud provider cannot run without a key
fn ensure_api_key(config: &VeoConfig) -> Result<()> {
    if config.uses_provider(ProviderKind::Veo) && config.api_key.trim().is_empty() {
        bail!(
            "GOOGLE_API_KEY is not set. Set it, or set VEO_PROVIDERS to use only the local pipelines (e.g. VEO_PROVIDERS=svd,ltx)"
        );
    }
    Ok(())
}

// ============================================================================
// Generation Commands
// ============================================================================

pub async fn generate(
    core: &VeoCore,
    prompt: &str,
    image: Option<PathBuf>,
    params: &GenerationParams,
    format: OutputFormat,
) -> Result<()> {
    ensure_api_key(core.config())?;

    let progress = start_progress(core, format);
    let result = match image {
        Some(ref image) => core.generator().generate_from_image(prompt, image, params).await,
        None => core.generator().generate_from_prompt(prompt, params).await,
    };
    stop_progress(progress).await;

    print_videos(&result?, format)
}

/// Non-empty lines of a prompts file
pub fn read_prompts_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn batch(
    core: &VeoCore,
    prompts_file: &Path,
    params: &GenerationParams,
    max_concurrent: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let content = tokio::fs::read_to_string(prompts_file)
        .await
        .with_context(|| format!("Failed to read {}", prompts_file.display()))?;
    let prompts = read_prompts_file(&content);
    if prompts.is_empty() {
        bail!("No prompts found in {}", prompts_file.display());
    }
    ensure_api_key(core.config())?;

    let progress = start_progress(core, format);
    let result = core
        .generator()
        .batch_generate_from_prompts(&prompts, params, max_concurrent)
        .await;
    stop_progress(progress).await;

    print_batch(&prompts, &result?, format)
}

// ============================================================================
// Maintenance Commands
// ============================================================================

pub async fn cleanup(
    core: &VeoCore,
    days: u32,
    dry_run: bool,
    yes: bool,
    format: OutputFormat,
) -> Result<()> {
    let generator = core.generator();
    let candidates = generator.cleanup_old_videos(days, true).await?;

    if candidates.is_empty() {
        if let OutputFormat::Json = format {
            println!("[]");
        } else {
            println!("{}", style(format!("No videos older than {} days", days)).dim());
        }
        return Ok(());
    }

    if !dry_run && !yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Delete {} video(s) older than {} days?", candidates.len(), days))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", style("Cancelled").dim());
            return Ok(());
        }
    }

    let affected = if dry_run {
        candidates
    } else {
        generator.cleanup_old_videos(days, false).await?
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&affected)?);
        }
        OutputFormat::Human | OutputFormat::Table => {
            let verb = if dry_run { "Would delete" } else { "Deleted" };
            for path in &affected {
                println!("  {}", style(path.display()).dim());
            }
            println!(
                "{} {} {} video(s)",
                style("✓").green().bold(),
                verb,
                style(affected.len()).bold()
            );
        }
    }

    Ok(())
}

pub fn show_config(config: &VeoConfig, format: OutputFormat) -> Result<()> {
    let config = config.redacted();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        OutputFormat::Human | OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct ConfigRow {
                key: &'static str,
                value: String,
            }

            let providers = config
                .providers
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let api_key = if config.api_key.is_empty() {
                "(not set)".to_string()
            } else {
                config.api_key.clone()
            };

            let rows = vec![
                ConfigRow { key: "api_key", value: api_key },
                ConfigRow { key: "project_id", value: config.project_id.clone().unwrap_or_default() },
                ConfigRow { key: "region", value: config.region.clone() },
                ConfigRow { key: "model", value: config.model.clone() },
                ConfigRow { key: "api_base_url", value: config.api_base_url.clone() },
                ConfigRow { key: "providers", value: providers },
                ConfigRow { key: "default_aspect_ratio", value: config.default_aspect_ratio.to_string() },
                ConfigRow { key: "default_duration", value: config.default_duration.to_string() },
                ConfigRow { key: "default_number_of_videos", value: config.default_number_of_videos.to_string() },
                ConfigRow { key: "default_person_generation", value: config.default_person_generation.to_string() },
                ConfigRow { key: "max_concurrent_operations", value: config.max_concurrent_operations.to_string() },
                ConfigRow { key: "retry_attempts", value: config.retry_attempts.to_string() },
                ConfigRow { key: "retry_delay_secs", value: config.retry_delay_secs.to_string() },
                ConfigRow { key: "poll_interval_secs", value: config.poll_interval_secs.to_string() },
                ConfigRow { key: "generation_timeout_secs", value: config.generation_timeout_secs.to_string() },
                ConfigRow { key: "output_dir", value: config.output_dir.display().to_string() },
                ConfigRow { key: "gcs_bucket", value: config.gcs_bucket.clone().unwrap_or_default() },
                ConfigRow { key: "svd_endpoint", value: config.svd_endpoint.clone() },
                ConfigRow { key: "ltx_endpoint", value: config.ltx_endpoint.clone() },
                ConfigRow { key: "ffmpeg_path", value: config.ffmpeg_path.display().to_string() },
                ConfigRow { key: "prompts_dir", value: config.prompts_dir.display().to_string() },
                ConfigRow { key: "log_level", value: config.log_level.clone() },
                ConfigRow { key: "log_format", value: config.log_format.to_string() },
            ];

            if let OutputFormat::Table = format {
                println!("{}", Table::new(rows));
            } else {
                println!("{}", style("Configuration").bold());
                for row in rows {
                    println!("  {:<26} {}", style(row.key).cyan(), row.value);
                }
            }
        }
    }

    Ok(())
}

pub async fn status(core: &VeoCore, operation_id: &str, format: OutputFormat) -> Result<()> {
    ensure_api_key(core.config())?;
    let status = core.client().check_operation_status(operation_id).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Human | OutputFormat::Table => {
            let state = match (&status.error, status.done) {
                (Some(_), _) => style("failed").red(),
                (None, true) => style("done").green(),
                (None, false) => style("running").yellow(),
            };
            println!("{} [{}] {}%", style(&status.operation_id).bold(), state, status.progress);
            if let Some(ref error) = status.error {
                println!("  Error: {}", style(error).red());
            }
            for uri in &status.video_uris {
                println!("  {}", style(uri).cyan());
            }
        }
    }

    Ok(())
}

// ============================================================================
// Prompt Library Commands
// ============================================================================

pub async fn prompts_action(core: &VeoCore, action: PromptAction, format: OutputFormat) -> Result<()> {
    let library = core.prompts();

    match action {
        PromptAction::List { category } => {
            let entries = library.list(category).await?;

            match format {
                OutputFormat::Json => {
                    let paths: Vec<_> = entries.iter().map(|e| &e.path).collect();
                    println!("{}", serde_json::to_string_pretty(&paths)?);
                }
                OutputFormat::Table => {
                    use tabled::{Table, Tabled};

                    #[derive(Tabled)]
                    struct PromptRow {
                        category: String,
                        name: String,
                        path: String,
                    }

                    let rows: Vec<PromptRow> = entries
                        .iter()
                        .map(|e| PromptRow {
                            category: e.category.to_string(),
                            name: e.name.clone(),
                            path: e.path.display().to_string(),
                        })
                        .collect();
                    println!("{}", Table::new(rows));
                }
                OutputFormat::Human => {
                    if entries.is_empty() {
                        println!(
                            "{}",
                            style(format!("No prompts found in {}", library.root().display())).dim()
                        );
                        return Ok(());
                    }
                    let mut current = None;
                    for entry in &entries {
                        if current != Some(entry.category) {
                            println!("{}", style(entry.category).bold());
                            current = Some(entry.category);
                        }
                        println!("  {}", entry.name);
                    }
                }
            }
        }

        PromptAction::Show { name } => {
            let content = library.show(&name).await?;
            print_output(&content, format)?;
        }

        PromptAction::Create {
            name,
            category,
            content,
        } => {
            let content = match content {
                Some(content) => content,
                None => dialoguer::Input::<String>::new()
                    .with_prompt("Prompt text")
                    .interact_text()?,
            };
            let path = library.create(&name, &content, category).await?;
            println!(
                "{} Created prompt: {}",
                style("✓").green().bold(),
                style(path.display()).cyan()
            );
        }

        PromptAction::Generate {
            name,
            category,
            max_concurrent,
            generation,
        } => {
            let params = generation.params(core.config());
            ensure_api_key(core.config())?;

            match (name, category) {
                (_, Some(category)) => {
                    let progress = start_progress(core, format);
                    let result = core
                        .generate_from_category(category, &params, max_concurrent)
                        .await;
                    stop_progress(progress).await;

                    let (entries, slots): (Vec<_>, Vec<_>) = result?.into_iter().unzip();
                    let names: Vec<String> = entries.into_iter().map(|e| e.name).collect();
                    print_batch(&names, &slots, format)?;
                }
                (Some(name), None) => {
                    let progress = start_progress(core, format);
                    let result = core.generate_from_prompt_file(&name, &params).await;
                    stop_progress(progress).await;

                    print_videos(&result?, format)?;
                }
                (None, None) => bail!("Give a prompt name or --category"),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_prompts_file_skips_blank_lines() {
        let prompts = read_prompts_file("first prompt\n\n   \n  second prompt  \n");
        assert_eq!(prompts, vec!["first prompt", "second prompt"]);
    }

    #[test]
    fn test_api_key_required_only_for_cloud_provider() {
        let config = VeoConfig::default();
        assert!(ensure_api_key(&config).is_err());

        let config = VeoConfig {
            providers: vec![ProviderKind::Svd, ProviderKind::Ltx],
            ..Default::default()
        };
        assert!(ensure_api_key(&config).is_ok());

        let config = VeoConfig {
            api_key: "key".to_string(),
            ..Default::default()
        };
        assert!(ensure_api_key(&config).is_ok());
    }
}
