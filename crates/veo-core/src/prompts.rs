//! Prompt library: `.txt` prompt files grouped by category

use crate::error::VeoError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Sub-directory of the prompt library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptCategory {
    Templates,
    Projects,
    Examples,
}

impl PromptCategory {
    pub const ALL: [PromptCategory; 3] = [Self::Templates, Self::Projects, Self::Examples];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Templates => "templates",
            Self::Projects => "projects",
            Self::Examples => "examples",
        }
    }
}

impl fmt::Display for PromptCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for PromptCategory {
    type Err = VeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "templates" | "template" => Ok(Self::Templates),
            "projects" | "project" => Ok(Self::Projects),
            "examples" | "example" => Ok(Self::Examples),
            other => Err(VeoError::NotFound(format!("prompt category '{}'", other))),
        }
    }
}

/// A prompt file found in the library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptEntry {
    pub category: PromptCategory,
    pub name: String,
    pub path: PathBuf,
}

/// Prompt files under a root directory
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    root: PathBuf,
}

impl PromptLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the category directories
    pub async fn init(&self) -> Result<(), VeoError> {
        for category in PromptCategory::ALL {
            fs::create_dir_all(self.root.join(category.dir_name())).await?;
        }
        Ok(())
    }

    /// Prompt files of one category, or of every category, sorted by name
    pub async fn list(&self, category: Option<PromptCategory>) -> Result<Vec<PromptEntry>, VeoError> {
        let categories = match category {
            Some(c) => vec![c],
            None => PromptCategory::ALL.to_vec(),
        };

        let mut prompts = Vec::new();
        for category in categories {
            let dir = self.root.join(category.dir_name());
            if !fs::try_exists(&dir).await? {
                continue;
            }

            let mut found = Vec::new();
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().map(|e| e == "txt").unwrap_or(false) {
                    let name = path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    found.push(PromptEntry {
                        category,
                        name,
                        path,
                    });
                }
            }
            found.sort_by(|a, b| a.name.cmp(&b.name));
            prompts.extend(found);
        }

        Ok(prompts)
    }

    /// Read a prompt file
    pub async fn show(&self, name: &str) -> Result<String, VeoError> {
        let path = self.resolve(name).await?;
        Ok(fs::read_to_string(&path).await?)
    }

    /// Write a new prompt file into a category
    pub async fn create(
        &self,
        name: &str,
        content: &str,
        category: PromptCategory,
    ) -> Result<PathBuf, VeoError> {
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(VeoError::config("prompt name", format!("invalid name '{}'", name)));
        }

        let dir = self.root.join(category.dir_name());
        fs::create_dir_all(&dir).await?;
        let path = dir.join(with_txt_extension(Path::new(name)));
        fs::write(&path, content).await?;

        info!("Prompt saved: {}", path.display());
        Ok(path)
    }

    /// Locate a prompt by path or name
    ///
    /// `.txt` is appended when the name has no extension. The name is tried
    /// as given, then under the library root, then inside each category.
    pub async fn resolve(&self, name: &str) -> Result<PathBuf, VeoError> {
        let wanted = with_txt_extension(Path::new(name.trim()));

        let mut candidates = vec![wanted.clone()];
        if wanted.is_relative() {
            candidates.push(self.root.join(&wanted));
            for category in PromptCategory::ALL {
                candidates.push(self.root.join(category.dir_name()).join(&wanted));
            }
        }

        for candidate in candidates {
            if fs::metadata(&candidate).await.map(|m| m.is_file()).unwrap_or(false) {
                return Ok(candidate);
            }
        }

        Err(VeoError::NotFound(format!("prompt file '{}'", name)))
    }

    /// Resolve a prompt file and extract the prompt text from it
    pub async fn load_prompt(&self, name: &str) -> Result<String, VeoError> {
        let content = self.show(name).await?;
        extract_prompt(&content)
            .ok_or_else(|| VeoError::NotFound(format!("prompt text in '{}'", name)))
    }
}

fn with_txt_extension(path: &Path) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension("txt")
    }
}

/// Extract the prompt text from a prompt file
///
/// When a markdown header mentions "prompt" (or "cena"), the non-empty lines
/// under it up to the next unrelated header are used. Otherwise every
/// non-empty line that is not a header is used. Lines are joined with
/// spaces.
pub fn extract_prompt(content: &str) -> Option<String> {
    let mut section = Vec::new();
    let mut in_prompt = false;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            let header = trimmed.to_lowercase();
            if header.contains("prompt") || header.contains("cena") {
                in_prompt = true;
                continue;
            }
            if in_prompt {
                break;
            }
            continue;
        }
        if in_prompt && !trimmed.is_empty() {
            section.push(trimmed);
        }
    }

    if section.is_empty() {
        section = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();
    }

    let prompt = section.join(" ");
    (!prompt.is_empty()).then_some(prompt)
}
