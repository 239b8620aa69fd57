/*
 *  config.rs
 *
 *  PlugHeap - same heap, same hands
 *  (c) 2020-26 Stuart Hunter
 *
 *  Configuration - YAML file layered under CLI overrides
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use serde::{Deserialize, Serialize};
use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

use crate::module::LoaderOptions;

const LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level host configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub log_level: Option<String>,             // e.g., "info" | "debug"
    /// extra directories searched for modules by short name
    pub search_paths: Option<Vec<PathBuf>>,
    /// refuse modules whose reported version differs from the host ABI
    pub strict_version: Option<bool>,
    /// modules to open, in order, and what to send them
    pub sessions: Option<Vec<SessionConfig>>,
}

/// One module session: open, create one object, send requests, destroy.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionConfig {
    /// short name ("counter") or path to the library file
    pub module: String,
    /// construction arguments handed to the module's factory
    pub args: Option<String>,
    pub requests: Option<Vec<String>>,
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone)]
#[command(name = "plugheap", about = "PlugHeap module host", version)]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// Extra module directory, searched before the configured ones
    #[arg(long = "search-path", value_hint = ValueHint::DirPath, action = ArgAction::Append)]
    pub search_paths: Vec<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub strict_version: bool,
    /// Module to open; replaces the configured sessions
    #[arg(long)]
    pub module: Option<String>,
    /// Construction arguments for --module
    #[arg(long)]
    pub args: Option<String>,
    /// Request sent to the --module object (repeatable)
    #[arg(long = "input", action = ArgAction::Append)]
    pub inputs: Vec<String>,
    /// list open modules after the sessions have run
    #[arg(long, action = ArgAction::SetTrue)]
    pub list: bool,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Public entry point: parse CLI, read YAML, merge, validate.
pub fn load() -> Result<(Config, Cli), ConfigError> {
    let cli = Cli::parse();
    let cfg = resolve(&cli)?;

    if cli.dump_config {
        // Pretty YAML of effective config
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    Ok((cfg, cli))
}

/// Build the effective config for already-parsed CLI arguments.
pub fn resolve(cli: &Cli) -> Result<Config, ConfigError> {
    // 1) defaults (from `Default` impl)
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    // 3) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli)?;

    // 4) Validate
    validate(&cfg)?;

    Ok(cfg)
}

impl Config {
    /// Effective log filter, "info" when nothing is configured
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            search_paths: self.search_paths.clone().unwrap_or_default(),
            strict_version: self.strict_version.unwrap_or(false),
        }
    }

    pub fn sessions(&self) -> &[SessionConfig] {
        self.sessions.as_deref().unwrap_or_default()
    }
}

impl SessionConfig {
    pub fn args(&self) -> &str {
        self.args.as_deref().unwrap_or_default()
    }

    pub fn requests(&self) -> &[String] {
        self.requests.as_deref().unwrap_or_default()
    }
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/plugheap/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/plugheap/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/plugheap.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["plugheap.yaml", "config/plugheap.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

pub fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    if src.log_level.is_some()      { dst.log_level = src.log_level; }
    if src.search_paths.is_some()   { dst.search_paths = src.search_paths; }
    if src.strict_version.is_some() { dst.strict_version = src.strict_version; }
    if src.sessions.is_some()       { dst.sessions = src.sessions; }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) -> Result<(), ConfigError> {
    if cli.log_level.is_some() { cfg.log_level = cli.log_level.clone(); }
    if cli.strict_version      { cfg.strict_version = Some(true); }

    // CLI directories are searched first
    if !cli.search_paths.is_empty() {
        let mut paths = cli.search_paths.clone();
        paths.extend(cfg.search_paths.take().unwrap_or_default());
        cfg.search_paths = Some(paths);
    }

    match cli.module.as_ref() {
        Some(module) => {
            cfg.sessions = Some(vec![SessionConfig {
                module: module.clone(),
                args: cli.args.clone(),
                requests: (!cli.inputs.is_empty()).then(|| cli.inputs.clone()),
            }]);
        }
        None if cli.args.is_some() || !cli.inputs.is_empty() => {
            return Err(ConfigError::Validation("--args and --input need --module".into()));
        }
        None => {}
    }
    Ok(())
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if let Some(level) = cfg.log_level.as_deref() {
        if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "log_level must be one of {}",
                LOG_LEVELS.join("|")
            )));
        }
    }
    for session in cfg.sessions() {
        if session.module.trim().is_empty() {
            return Err(ConfigError::Validation("session module must not be empty".into()));
        }
    }
    Ok(())
}
