// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, info, warn};
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use parabatch::app_config::{self, Config, TranslationProvider};
use parabatch::app_controller::Controller;

/// CLI Wrapper for TranslationProvider to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliTranslationProvider {
    Ollama,
    OpenAI,
    Anthropic,
    LMStudio,
}

impl From<CliTranslationProvider> for TranslationProvider {
    fn from(cli_provider: CliTranslationProvider) -> Self {
        match cli_provider {
            CliTranslationProvider::Ollama => TranslationProvider::Ollama,
            CliTranslationProvider::OpenAI => TranslationProvider::OpenAI,
            CliTranslationProvider::Anthropic => TranslationProvider::Anthropic,
            CliTranslationProvider::LMStudio => TranslationProvider::LMStudio,
        }
    }
}

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate a JSON document
    Translate(TranslateArgs),

    /// Resume a failed or cancelled translation
    Retry {
        /// Translation id printed by `translate`
        id: String,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the persisted progress of a translation
    Status {
        /// Translation id
        id: String,
    },

    /// Delete everything stored for a translation
    Discard {
        /// Translation id
        id: String,
    },

    /// Generate shell completions for parabatch
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
struct TranslateArgs {
    /// Input document: {"sections":[{"paragraphs":[...]}]}
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Translation id; a new UUID when omitted
    #[arg(long)]
    id: Option<String>,

    /// Output file (default: <input stem>.<target language>.json)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Translation provider to use
    #[arg(short, long, value_enum)]
    provider: Option<CliTranslationProvider>,

    /// Model name to use for translation
    #[arg(short, long)]
    model: Option<String>,

    /// Source language code (e.g., 'en', 'es', 'fr')
    #[arg(short, long)]
    source_language: Option<String>,

    /// Target language code (e.g., 'en', 'es', 'fr')
    #[arg(short, long)]
    target_language: Option<String>,

    /// Use the echo translator instead of a real provider
    #[arg(long)]
    dry_run: bool,
}

/// parabatch - resumable batch translation of long documents
#[derive(Parser, Debug)]
#[command(name = "parabatch")]
#[command(version)]
#[command(about = "Resumable, structure-preserving document translation")]
#[command(long_about = "parabatch translates long paginated documents one token-bounded batch at a time.
Progress is saved after every batch, so a failed or cancelled run can be resumed
without paying for finished batches again.

EXAMPLES:
    parabatch translate book.json                  # Translate using default config
    parabatch translate -p openai -t de book.json  # Specific provider and target language
    parabatch translate --dry-run book.json        # Exercise the pipeline without a provider
    parabatch status 1b4e28ba-2fa1-11d2-883f       # Show saved progress
    parabatch retry 1b4e28ba-2fa1-11d2-883f -o book.de.json
    parabatch completions bash > parabatch.bash

CONFIGURATION:
    Configuration is stored in parabatch.json by default. If the file does not
    exist, a default one is created.

SUPPORTED PROVIDERS:
    ollama    - Local Ollama server
    openai    - OpenAI API (requires API key)
    anthropic - Anthropic API (requires API key)
    lmstudio  - LM Studio local server (OpenAI-compatible)")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "parabatch.json")]
    config: PathBuf,

    /// Set logging level
    #[arg(short, long, global = true, value_enum)]
    log_level: Option<CliLogLevel>,

    /// API key for the active provider
    #[arg(long, global = true, env = "PARABATCH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI colour for log level
    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }

    // @returns: Emoji for log level
    fn get_emoji_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "❌ ",
            Level::Warn => "🚧 ",
            Level::Info => " ",
            Level::Debug => "🔍 ",
            Level::Trace => "📋 ",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let _ = writeln!(
                std::io::stderr(),
                "{}{} {} {}\x1B[0m",
                Self::color_for_level(record.level()),
                now,
                Self::get_emoji_for_level(record.level()),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Accept every level here; the effective level is set through max_level
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();
    if let Some(level) = &cli.log_level {
        let level: app_config::LogLevel = level.clone().into();
        log::set_max_level(level.to_level_filter());
    }

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "parabatch", &mut std::io::stdout());
            Ok(())
        }
        Commands::Translate(ref args) => {
            let config = load_config(&cli, Some(args))?;
            if !args.dry_run {
                config.validate().context("Configuration validation failed")?;
            }

            let controller = Controller::with_config(config, args.dry_run)?;
            let cancel = cancel_on_ctrl_c();
            let (id, outcome) = controller
                .translate_file(&args.input, args.output.clone(), args.id.clone(), &cancel)
                .await?;
            info!(
                "Translation {}: {} batches, {} tokens",
                id, outcome.total_batches, outcome.tokens_consumed
            );
            Ok(())
        }
        Commands::Retry { ref id, ref output } => {
            let config = load_config(&cli, None)?;
            config.validate().context("Configuration validation failed")?;

            let controller = Controller::with_config(config, false)?;
            let cancel = cancel_on_ctrl_c();
            controller.retry(id, output.clone(), &cancel).await?;
            Ok(())
        }
        Commands::Status { ref id } => {
            let controller = Controller::with_config(load_config(&cli, None)?, true)?;
            match controller.status(id).await? {
                Some(info) => {
                    println!("Translation: {}", info.translation_id);
                    println!("Status:      {}", info.status);
                    println!(
                        "Batches:     {}/{} ({:.1}%)",
                        info.completed_batches, info.total_batches, info.percentage
                    );
                    println!("Paragraphs:  {}", info.translated_paragraphs);
                    println!("Tokens:      {}", info.total_tokens_consumed);
                    println!("Degraded:    {}", info.degraded_batches);
                    println!("Target:      {} ({})", info.target_language, info.model);
                    println!("Updated:     {}", info.updated_at);
                    if let Some(error) = info.last_error {
                        println!("Last error:  {}", error);
                    }
                }
                None => warn!("No translation found for id {}", id),
            }
            Ok(())
        }
        Commands::Discard { ref id } => {
            let controller = Controller::with_config(load_config(&cli, None)?, true)?;
            controller.discard(id).await?;
            Ok(())
        }
    }
}

/// Load the config file and apply command line overrides
fn load_config(cli: &CommandLineOptions, translate: Option<&TranslateArgs>) -> Result<Config> {
    let mut config = Config::load_or_create(&cli.config)?;
    if let Some(args) = translate {
        apply_translate_overrides(&mut config, args);
    }

    if let Some(level) = &cli.log_level {
        config.log_level = level.clone().into();
    } else {
        log::set_max_level(config.log_level.to_level_filter());
    }

    if let Some(api_key) = &cli.api_key {
        config.translation.active_provider_config_mut().api_key = api_key.clone();
    }

    Ok(config)
}

fn apply_translate_overrides(config: &mut Config, args: &TranslateArgs) {
    if let Some(provider) = &args.provider {
        config.translation.provider = provider.clone().into();
    }
    if let Some(model) = &args.model {
        config.translation.active_provider_config_mut().model = model.clone();
    }
    if let Some(source_language) = &args.source_language {
        config.source_language = source_language.clone();
    }
    if let Some(target_language) = &args.target_language {
        config.target_language = target_language.clone();
    }
}

/// A token cancelled by the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping before the next batch; progress so far is saved");
            token.cancel();
        }
    });
    cancel
}
