//! Output formatting utilities

use crate::OutputFormat;
use console::style;
use serde::Serialize;
use std::path::{Path, PathBuf};
use veo_types::{truncate_chars, BatchSlot};

/// Print output in the specified format
pub fn print_output<T: Serialize + std::fmt::Display>(
    value: &T,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Human | OutputFormat::Table => {
            println!("{}", value);
        }
    }
    Ok(())
}

/// Size of a file on disk as human-readable text
pub fn format_file_size(path: &Path) -> String {
    std::fs::metadata(path)
        .map(|m| human_bytes::human_bytes(m.len() as f64))
        .unwrap_or_else(|_| "?".to_string())
}

/// Print the files produced by one generation
pub fn print_videos(paths: &[PathBuf], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(paths)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct VideoRow {
                index: usize,
                path: String,
                size: String,
            }

            let rows: Vec<VideoRow> = paths
                .iter()
                .enumerate()
                .map(|(index, path)| VideoRow {
                    index,
                    path: path.display().to_string(),
                    size: format_file_size(path),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            println!(
                "{} Generated {} video(s)",
                style("✓").green().bold(),
                style(paths.len()).bold()
            );
            for path in paths {
                println!(
                    "  {} {}",
                    style(path.display()).cyan(),
                    style(format!("({})", format_file_size(path))).dim()
                );
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct BatchEntry<'a> {
    prompt: &'a str,
    #[serde(flatten)]
    slot: &'a BatchSlot<PathBuf>,
}

/// Print per-prompt batch results, in input order
pub fn print_batch(
    prompts: &[String],
    slots: &[BatchSlot<PathBuf>],
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let entries: Vec<BatchEntry> = prompts
                .iter()
                .zip(slots)
                .map(|(prompt, slot)| BatchEntry { prompt, slot })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct BatchRow {
                index: usize,
                prompt: String,
                videos: usize,
                result: String,
            }

            let rows: Vec<BatchRow> = prompts
                .iter()
                .zip(slots)
                .map(|(prompt, slot)| BatchRow {
                    index: slot.index,
                    prompt: truncate_chars(prompt, 40),
                    videos: slot.videos.len(),
                    result: slot.error.clone().unwrap_or_else(|| "ok".to_string()),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            for (prompt, slot) in prompts.iter().zip(slots) {
                match &slot.error {
                    None => {
                        println!(
                            "{} [{}] {}",
                            style("✓").green(),
                            slot.index + 1,
                            style(truncate_chars(prompt, 60)).bold()
                        );
                        for path in &slot.videos {
                            println!("    {}", style(path.display()).cyan());
                        }
                    }
                    Some(error) => {
                        println!(
                            "{} [{}] {}",
                            style("✗").red(),
                            slot.index + 1,
                            style(truncate_chars(prompt, 60)).bold()
                        );
                        println!("    {}", style(error).red());
                    }
                }
            }

            let succeeded = slots.iter().filter(|s| s.is_success()).count();
            println!();
            println!(
                "{}/{} prompt(s) succeeded",
                style(succeeded).bold(),
                slots.len()
            );
        }
    }
    Ok(())
}
