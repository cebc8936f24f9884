//! Config file loading and merging with command-line values.
//!
//! The file is a flat `key = value` subset of TOML. Precedence, highest
//! first: command line, config file, built-in defaults.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgMatches, CommandFactory, FromArgMatches, parser::ValueSource};
use mcdl_core::TransportErrorKind;

use crate::cli::Args;

/// Defaults read from `config.toml`.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Default output directory.
    pub output_dir: Option<PathBuf>,
    /// Default connection count (1..=50).
    pub connections: Option<u8>,
    /// Default range size in bytes.
    pub granularity: Option<u64>,
    /// Proxy URL.
    pub proxy: Option<String>,
    /// User-Agent override.
    pub user_agent: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    /// Retries per range, 0 for unlimited.
    pub max_retries: Option<u32>,
    /// Comma-separated transport kinds, same syntax as `--retry-on`.
    pub retry_on: Option<String>,
}

impl FileConfig {
    /// Validates config values against the command-line constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(connections) = self.connections
            && !(1..=50).contains(&connections)
        {
            bail!("Invalid config value for `connections`: {connections}. Expected range: 1..=50");
        }
        if let Some(granularity) = self.granularity
            && granularity == 0
        {
            bail!("Invalid config value for `granularity`: 0. Expected a positive byte count");
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        if let Some(retry_on) = &self.retry_on {
            parse_retry_on(retry_on)
                .with_context(|| format!("Invalid config value for `retry_on`: {retry_on:?}"))?;
        }
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Parses a comma-separated list of transport failure labels.
///
/// An empty list is allowed and disables retries.
pub fn parse_retry_on(raw: &str) -> Result<Vec<TransportErrorKind>> {
    let mut kinds = Vec::new();
    for label in raw.split(',').map(str::trim).filter(|l| !l.is_empty()) {
        let Some(kind) = TransportErrorKind::from_label(label) else {
            let known: Vec<&str> = TransportErrorKind::ALL.iter().map(|k| k.as_str()).collect();
            bail!(
                "Unknown transport failure '{label}'. Expected one of: {}",
                known.join(", ")
            );
        };
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when the file exists.
    pub config: Option<FileConfig>,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/mcdl/config.toml`
/// 2. `$HOME/.config/mcdl/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    config_path_from(
        env_var_non_empty_os("XDG_CONFIG_HOME"),
        env_var_non_empty_os("HOME"),
    )
}

fn config_path_from(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    if let Some(xdg_config_home) = xdg_config_home {
        return Some(PathBuf::from(xdg_config_home).join("mcdl").join("config.toml"));
    }
    let home = home?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("mcdl")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "connections" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                let n = u8::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("connections out of range for u8"))
                    .with_context(context)?;
                cfg.connections = Some(n);
            }
            "granularity" => {
                cfg.granularity = Some(parse_integer_u64(value).with_context(context)?);
            }
            "proxy" => cfg.proxy = Some(parse_string_literal(value).with_context(context)?),
            "user_agent" => {
                cfg.user_agent = Some(parse_string_literal(value).with_context(context)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "max_retries" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("max_retries out of range for u32"))
                    .with_context(context)?;
                cfg.max_retries = Some(n);
            }
            "retry_on" => cfg.retry_on = Some(parse_string_literal(value).with_context(context)?),
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

/// Which arguments were given explicitly on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CliValueSources {
    pub(crate) output_dir: bool,
    pub(crate) connections: bool,
    pub(crate) granularity: bool,
    pub(crate) proxy: bool,
    pub(crate) user_agent: bool,
    pub(crate) connect_timeout: bool,
    pub(crate) read_timeout: bool,
    pub(crate) max_retries: bool,
    pub(crate) retry_on: bool,
}

pub(crate) fn parse_cli_with_sources() -> (Args, CliValueSources) {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    let sources = sources_from_matches(&matches);
    (args, sources)
}

fn sources_from_matches(matches: &ArgMatches) -> CliValueSources {
    CliValueSources {
        output_dir: is_commandline_value(matches, "output_dir"),
        connections: is_commandline_value(matches, "connections"),
        granularity: is_commandline_value(matches, "granularity"),
        proxy: is_commandline_value(matches, "proxy"),
        user_agent: is_commandline_value(matches, "user_agent"),
        connect_timeout: is_commandline_value(matches, "connect_timeout"),
        read_timeout: is_commandline_value(matches, "read_timeout"),
        max_retries: is_commandline_value(matches, "max_retries"),
        retry_on: is_commandline_value(matches, "retry_on"),
    }
}

fn is_commandline_value(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

/// Fills every argument not given on the command line from the config file.
pub(crate) fn apply_config_defaults(
    mut args: Args,
    cli_sources: &CliValueSources,
    file_config: Option<&FileConfig>,
) -> Args {
    let Some(file_config) = file_config else {
        return args;
    };

    if !cli_sources.output_dir
        && let Some(output_dir) = &file_config.output_dir
    {
        args.output_dir = Some(output_dir.clone());
    }
    if !cli_sources.connections
        && let Some(connections) = file_config.connections
    {
        args.connections = connections;
    }
    if !cli_sources.granularity
        && let Some(granularity) = file_config.granularity
    {
        args.granularity = Some(granularity);
    }
    if !cli_sources.proxy
        && let Some(proxy) = &file_config.proxy
    {
        args.proxy = Some(proxy.clone());
    }
    if !cli_sources.user_agent
        && let Some(user_agent) = &file_config.user_agent
    {
        args.user_agent = Some(user_agent.clone());
    }
    if !cli_sources.connect_timeout
        && let Some(secs) = file_config.connect_timeout_secs
    {
        args.connect_timeout = secs;
    }
    if !cli_sources.read_timeout
        && let Some(secs) = file_config.read_timeout_secs
    {
        args.read_timeout = secs;
    }
    if !cli_sources.max_retries
        && let Some(max_retries) = file_config.max_retries
    {
        args.max_retries = max_retries;
    }
    if !cli_sources.retry_on
        && let Some(retry_on) = &file_config.retry_on
    {
        args.retry_on = retry_on.clone();
    }
    args
}
