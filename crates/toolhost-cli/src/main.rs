// crates/toolhost-cli/src/main.rs
// ============================================================================
// Module: Toolhost CLI Entry Point
// Description: Command dispatcher for the stdio tool host.
// Purpose: Start the host, inspect plugins, and validate configuration.
// Dependencies: clap, serde, thiserror, tokio, toolhost-config, toolhost-mcp, tracing.
// ============================================================================

//! ## Overview
//! The `toolhost` binary serves JSON-RPC on stdin/stdout, so every human-facing
//! line and every diagnostic goes to stderr while `serve` runs. The other
//! subcommands are short-lived operator utilities that write to stdout.
//! Security posture: config files and plugin directories are operator input
//! and are validated before use.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use serde::Serialize;
use thiserror::Error;
use toolhost_config::ToolhostConfig;
use toolhost_mcp::McpServer;
use toolhost_mcp::PluginHost;
use toolhost_mcp::plugins::LoadedPlugin;
use toolhost_mcp::plugins::PLUGIN_EXIT_GRACE;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable overriding the configured log filter.
const LOG_FILTER_ENV: &str = "RUST_LOG";

/// Filter used when neither the environment nor the config yields a valid one.
const FALLBACK_LOG_FILTER: &str = "info";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "toolhost", disable_help_subcommand = true, disable_version_flag = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve tools over stdin/stdout.
    Serve(ServeCommand),
    /// Plugin inspection utilities.
    Plugins {
        /// Selected plugin subcommand.
        #[command(subcommand)]
        command: PluginsCommand,
    },
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Arguments for `serve`.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Config file path (defaults to `TOOLHOST_CONFIG` or `toolhost.toml`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Plugin subcommands.
#[derive(Subcommand, Debug)]
enum PluginsCommand {
    /// Start every plugin in the configured directory and list its tools.
    List(PluginsListCommand),
}

/// Arguments for `plugins list`.
#[derive(Args, Debug)]
struct PluginsListCommand {
    /// Config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a toolhost configuration file.
    Validate(ConfigValidateCommand),
}

/// Arguments for `config validate`.
#[derive(Args, Debug)]
struct ConfigValidateCommand {
    /// Config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Listing output formats.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    /// One plugin per line followed by indented tool names.
    Text,
    /// Pretty-printed JSON array.
    Json,
}

/// Serializable summary of one loaded plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct PluginSummary {
    /// Plugin name (executable file stem).
    name: String,
    /// Executable path.
    path: String,
    /// Tool names in listing order.
    tools: Vec<String>,
}

impl PluginSummary {
    /// Summarizes a loaded plugin.
    fn from_loaded(plugin: &LoadedPlugin) -> Self {
        Self {
            name: plugin.name().to_string(),
            path: plugin.path().display().to_string(),
            tools: plugin.tools().iter().map(|tool| tool.descriptor().name.clone()).collect(),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    if cli.show_version {
        let version = env!("CARGO_PKG_VERSION");
        write_stdout_line(&format!("toolhost {version}"))
            .map_err(|err| CliError::new(output_error("stdout", &err)))?;
        return Ok(ExitCode::SUCCESS);
    }
    let Some(command) = cli.command else {
        return Err(CliError::new(
            "no command given; try `toolhost serve` or `toolhost --help`".to_string(),
        ));
    };
    match command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::Plugins {
            command: PluginsCommand::List(command),
        } => command_plugins_list(command).await,
        Commands::Config {
            command: ConfigCommand::Validate(command),
        } => command_config_validate(&command),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Runs the tool host until stdin closes.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = load_config(command.config)?;
    init_tracing(&config);
    let credential = std::env::var(&config.auth.credential_env).ok();
    let server = McpServer::from_config(&config, credential.as_deref())
        .await
        .map_err(|err| CliError::new(format!("failed to start toolhost: {err}")))?;
    tracing::info!(
        name = %config.server.name,
        tools = server.tools().len(),
        "toolhost serving on stdio"
    );
    server.serve().await.map_err(|err| CliError::new(format!("toolhost stopped: {err}")))?;
    tracing::info!("toolhost stopped");
    Ok(ExitCode::SUCCESS)
}

/// Starts every plugin, prints what it exposes, and stops it again.
async fn command_plugins_list(command: PluginsListCommand) -> CliResult<ExitCode> {
    let config = load_config(command.config)?;
    init_tracing(&config);
    let host = PluginHost::load_all(&config.plugins).await;
    let summaries: Vec<PluginSummary> =
        host.plugins().iter().map(PluginSummary::from_loaded).collect();
    host.shutdown(PLUGIN_EXIT_GRACE).await;
    let rendered = render_plugin_listing(&summaries, command.format)?;
    write_stdout_line(&rendered).map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Loads and validates a config file.
fn command_config_validate(command: &ConfigValidateCommand) -> CliResult<ExitCode> {
    load_config(command.config.clone())?;
    write_stdout_line("config ok").map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads configuration using the standard resolution rules.
fn load_config(path: Option<PathBuf>) -> CliResult<ToolhostConfig> {
    ToolhostConfig::load(path.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))
}

/// Chooses the log filter: a non-empty environment value wins over the config.
fn resolve_log_filter(env_value: Option<&str>, configured: &str) -> String {
    match env_value.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => configured.to_string(),
    }
}

/// Installs the stderr log subscriber.
fn init_tracing(config: &ToolhostConfig) {
    let env_value = std::env::var(LOG_FILTER_ENV).ok();
    let directive = resolve_log_filter(env_value.as_deref(), &config.logging.filter);
    let filter =
        EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(FALLBACK_LOG_FILTER));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
    if installed.is_err() {
        tracing::debug!("log subscriber already installed");
    }
}

/// Renders plugin summaries in the requested format.
fn render_plugin_listing(summaries: &[PluginSummary], format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(summaries)
            .map_err(|err| CliError::new(format!("failed to render plugin listing: {err}"))),
        OutputFormat::Text => {
            if summaries.is_empty() {
                return Ok("no plugins loaded".to_string());
            }
            let mut lines = Vec::new();
            for summary in summaries {
                lines.push(format!("{} ({})", summary.name, summary.path));
                for tool in &summary.tools {
                    lines.push(format!("  {tool}"));
                }
            }
            Ok(lines.join("\n"))
        }
    }
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output failure.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
