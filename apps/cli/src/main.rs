//! VEO CLI - Command-line video generation
//!
//! Generates videos from prompts through the cloud API or the local
//! pipelines, one at a time or in batches.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use veo_core::{ConfigLoader, PromptCategory, VeoCore};
use veo_types::{AspectRatio, GenerationParams, LogFormat, PersonGeneration, VeoConfig};

/// VEO - AI video generation
#[derive(Parser)]
#[command(name = "veo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// JSON configuration file, used instead of the environment
    #[arg(long, env = "VEO_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

/// Settings shared by every generation command
#[derive(Args, Debug, Clone)]
struct GenerationArgs {
    /// Aspect ratio (16:9, 9:16 or 1:1)
    #[arg(short, long, visible_alias = "aspect")]
    aspect_ratio: Option<AspectRatio>,

    /// Duration in seconds (5-8)
    #[arg(short, long)]
    duration: Option<u32>,

    /// Number of videos per prompt (1-4)
    #[arg(short = 'c', long)]
    count: Option<u32>,

    /// Person generation (allow_adult or dont_allow)
    #[arg(short, long, visible_alias = "person")]
    person_generation: Option<PersonGeneration>,

    /// Send the prompt as written, without enhancement
    #[arg(long)]
    no_enhance: bool,

    /// Base name for the output files
    #[arg(short = 'o', long = "filename")]
    filename: Option<String>,
}

impl GenerationArgs {
    fn params(&self, config: &VeoConfig) -> GenerationParams {
        let mut params = GenerationParams::from_config(config);
        if let Some(aspect_ratio) = self.aspect_ratio {
            params.aspect_ratio = aspect_ratio;
        }
        if let Some(duration) = self.duration {
            params.duration_secs = duration;
        }
        if let Some(count) = self.count {
            params.number_of_videos = count;
        }
        if let Some(person_generation) = self.person_generation {
            params.person_generation = person_generation;
        }
        params.enhance_prompt = !self.no_enhance;
        params.output_filename = self.filename.clone();
        params
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate videos from a prompt
    Generate {
        /// Text prompt
        prompt: String,

        /// Image to animate
        #[arg(short, long)]
        image: Option<PathBuf>,

        #[command(flatten)]
        generation: GenerationArgs,
    },

    /// Generate one request per line of a prompts file
    Batch {
        /// File with one prompt per line
        prompts_file: PathBuf,

        /// Requests in flight at once
        #[arg(long)]
        max_concurrent: Option<usize>,

        #[command(flatten)]
        generation: GenerationArgs,
    },

    /// Delete old videos from the output directory
    Cleanup {
        /// Age in days
        #[arg(long, default_value_t = 7)]
        days: u32,

        /// Only list what would be deleted
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the active configuration
    Config,

    /// Check a cloud generation operation
    Status {
        /// Operation id or full operation name
        operation_id: String,
    },

    /// Prompt library
    Prompts {
        #[command(subcommand)]
        action: PromptAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum PromptAction {
    /// List prompt files
    List {
        /// Only this category (templates, projects, examples)
        category: Option<PromptCategory>,
    },

    /// Print a prompt file
    Show {
        /// Prompt name or path
        name: String,
    },

    /// Create a prompt file
    Create {
        /// Prompt name
        name: String,

        /// Category to create it in
        #[arg(long, default_value = "templates")]
        category: PromptCategory,

        /// Prompt text (asked for when omitted)
        #[arg(long)]
        content: Option<String>,
    },

    /// Generate from a prompt file, or from every file of a category
    Generate {
        /// Prompt name or path
        #[arg(required_unless_present = "category")]
        name: Option<String>,

        /// Generate a batch from every prompt of this category
        #[arg(long, conflicts_with = "name")]
        category: Option<PromptCategory>,

        /// Requests in flight at once (category batches)
        #[arg(long)]
        max_concurrent: Option<usize>,

        #[command(flatten)]
        generation: GenerationArgs,
    },
}

fn init_tracing(config: &VeoConfig, verbose: bool) {
    let default_directive = if verbose {
        "debug".to_string()
    } else {
        config.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        use clap::CommandFactory;
        clap_complete::generate(shell, &mut Cli::command(), "veo", &mut std::io::stdout());
        return Ok(());
    }

    // Load configuration
    let config = match &cli.config {
        Some(path) => VeoConfig::from_file(path)?,
        None => VeoConfig::from_env()?,
    };
    init_tracing(&config, cli.verbose);
    tracing::debug!("Providers: {:?}", config.providers);

    if let Commands::Config = cli.command {
        return commands::show_config(&config, cli.output);
    }

    // Initialize core
    let core = VeoCore::new(config).await?;

    // Execute command
    match cli.command {
        Commands::Generate {
            prompt,
            image,
            generation,
        } => {
            let params = generation.params(core.config());
            commands::generate(&core, &prompt, image, &params, cli.output).await?
        }

        Commands::Batch {
            prompts_file,
            max_concurrent,
            generation,
        } => {
            let params = generation.params(core.config());
            commands::batch(&core, &prompts_file, &params, max_concurrent, cli.output).await?
        }

        Commands::Cleanup { days, dry_run, yes } => {
            commands::cleanup(&core, days, dry_run, yes, cli.output).await?
        }

        Commands::Status { operation_id } => {
            commands::status(&core, &operation_id, cli.output).await?
        }

        Commands::Prompts { action } => commands::prompts_action(&core, action, cli.output).await?,

        Commands::Config | Commands::Completions { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_short_generation_flag_aliases() {
        let cli = Cli::try_parse_from([
            "veo",
            "generate",
            "A paper boat drifting down a rainy street",
            "--aspect",
            "9:16",
            "--person",
            "dont_allow",
        ])
        .unwrap();

        match cli.command {
            Commands::Generate { generation, .. } => {
                assert_eq!(generation.aspect_ratio, Some(AspectRatio::Portrait));
                assert_eq!(generation.person_generation, Some(PersonGeneration::DontAllow));
            }
            _ => panic!("expected the generate command"),
        }

        let cli = Cli::try_parse_from([
            "veo",
            "batch",
            "prompts.txt",
            "--aspect-ratio",
            "1:1",
        ])
        .unwrap();
        match cli.command {
            Commands::Batch { generation, .. } => {
                assert_eq!(generation.aspect_ratio, Some(AspectRatio::Square));
            }
            _ => panic!("expected the batch command"),
        }
    }
}
