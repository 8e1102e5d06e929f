//! Configuration loading: a TOML file (`forge.toml` by convention),
//! overridden by CLI flags, falling back to defaults. Bridges the on-disk
//! [`PipelineToml`] with the runtime [`Config`] the driver actually uses.
//!
//! Generalized from the prior `Config`/`ForgeConfig`/`ForgeToml` three-layer
//! bridge: same precedence order (CLI > file > defaults), same
//! directory-layout conventions, now pointed at the pipeline's own
//! artifact/output directories instead of `.forge/`.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use glob::glob;
use serde::Deserialize;

use crate::error::ConfigError;

/// On-disk configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineToml {
    #[serde(default)]
    pub budget_limit: Option<f64>,
    #[serde(default)]
    pub depth: Option<String>,
    #[serde(default)]
    pub max_concurrent_builders: Option<usize>,
    #[serde(default)]
    pub max_fix_passes: Option<u32>,
    #[serde(default)]
    pub architect_command: Option<String>,
    #[serde(default)]
    pub contract_engine_command: Option<String>,
    #[serde(default)]
    pub codebase_intel_command: Option<String>,
    #[serde(default)]
    pub graph_rag_command: Option<String>,
    #[serde(default)]
    pub builder_command: Option<String>,
    #[serde(default)]
    pub auto_approve: Option<bool>,
    #[serde(default)]
    pub architect_max_retries: Option<u32>,
    #[serde(default)]
    pub blocking_severity: Option<String>,
    #[serde(default)]
    pub layer4_enabled: Option<bool>,
    #[serde(default)]
    pub max_violations_per_category: Option<usize>,
    #[serde(default)]
    pub graph_rag_enabled: Option<bool>,
}

impl PipelineToml {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|source| ConfigError::MalformedConfig {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Runtime configuration, resolved from CLI flags with TOML and defaults as
/// fallbacks.
#[derive(Debug, Clone)]
pub struct Config {
    pub output_dir: PathBuf,
    pub budget_limit: f64,
    pub depth: String,
    pub max_concurrent_builders: usize,
    pub max_fix_passes: u32,
    pub architect_command: String,
    pub contract_engine_command: String,
    pub codebase_intel_command: String,
    pub graph_rag_command: String,
    pub builder_command: String,
    pub verbose: bool,
    /// Whether `architect_review` auto-advances without a human approval
    /// gate. The CLI is non-interactive, so this defaults to `true`.
    pub auto_approve: bool,
    pub architect_max_retries: u32,
    pub blocking_severity: String,
    pub layer4_enabled: bool,
    pub max_violations_per_category: usize,
    pub graph_rag_enabled: bool,
}

const DEFAULT_BUDGET_LIMIT: f64 = 50.0;
const DEFAULT_DEPTH: &str = "standard";
const DEFAULT_MAX_CONCURRENT_BUILDERS: usize = 3;
const DEFAULT_MAX_FIX_PASSES: u32 = 5;
const DEFAULT_ARCHITECT_MAX_RETRIES: u32 = 2;
const DEFAULT_BLOCKING_SEVERITY: &str = "blocking";
const DEFAULT_MAX_VIOLATIONS_PER_CATEGORY: usize = 200;

impl Config {
    pub fn resolve(
        output_dir: PathBuf,
        config_path: Option<PathBuf>,
        depth_override: Option<String>,
        verbose: bool,
    ) -> Result<Self> {
        let toml_config = match config_path {
            Some(path) => PipelineToml::load(&path).context("failed to load config file")?,
            None => PipelineToml::default(),
        };

        Ok(Self {
            output_dir,
            budget_limit: toml_config.budget_limit.unwrap_or(DEFAULT_BUDGET_LIMIT),
            depth: depth_override
                .or(toml_config.depth)
                .unwrap_or_else(|| DEFAULT_DEPTH.to_string()),
            max_concurrent_builders: toml_config
                .max_concurrent_builders
                .unwrap_or(DEFAULT_MAX_CONCURRENT_BUILDERS),
            max_fix_passes: toml_config.max_fix_passes.unwrap_or(DEFAULT_MAX_FIX_PASSES),
            architect_command: toml_config
                .architect_command
                .unwrap_or_else(|| "architect".to_string()),
            contract_engine_command: toml_config
                .contract_engine_command
                .unwrap_or_else(|| "contract-engine".to_string()),
            codebase_intel_command: toml_config
                .codebase_intel_command
                .unwrap_or_else(|| "codebase-intel".to_string()),
            graph_rag_command: toml_config
                .graph_rag_command
                .unwrap_or_else(|| "graph-rag".to_string()),
            builder_command: toml_config.builder_command.unwrap_or_else(|| "builder".to_string()),
            verbose,
            auto_approve: toml_config.auto_approve.unwrap_or(true),
            architect_max_retries: toml_config
                .architect_max_retries
                .unwrap_or(DEFAULT_ARCHITECT_MAX_RETRIES),
            blocking_severity: toml_config
                .blocking_severity
                .unwrap_or_else(|| DEFAULT_BLOCKING_SEVERITY.to_string()),
            layer4_enabled: toml_config.layer4_enabled.unwrap_or(true),
            max_violations_per_category: toml_config
                .max_violations_per_category
                .unwrap_or(DEFAULT_MAX_VIOLATIONS_PER_CATEGORY),
            graph_rag_enabled: toml_config.graph_rag_enabled.unwrap_or(true),
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir).context("failed to create output directory")?;
        std::fs::create_dir_all(self.output_dir.join("logs"))
            .context("failed to create log directory")?;
        std::fs::create_dir_all(self.output_dir.join("builders"))
            .context("failed to create builders directory")?;
        std::fs::create_dir_all(self.output_dir.join("registry"))
            .context("failed to create contract registry directory")?;
        Ok(())
    }

    pub fn state_path(&self) -> PathBuf {
        self.output_dir.join("PIPELINE_STATE.json")
    }

    pub fn service_map_path(&self) -> PathBuf {
        self.output_dir.join("service_map.json")
    }
}

/// Locate a PRD file: an explicit path if given, otherwise the most
/// recently modified `*prd*.md` under the current directory.
pub fn find_prd_file(explicit: Option<PathBuf>, search_root: &std::path::Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return path.canonicalize().context("failed to resolve PRD path");
    }

    let pattern = search_root.join("**/*prd*.md").to_string_lossy().to_string();
    let mut candidates: Vec<PathBuf> = glob(&pattern)
        .context("failed to read glob pattern")?
        .filter_map(|entry| entry.ok())
        .collect();

    if candidates.is_empty() {
        return Err(anyhow!(
            "no PRD file found; pass one explicitly or place a *prd*.md file in this directory"
        ));
    }

    candidates.sort_by(|a, b| {
        let a_time = a.metadata().and_then(|m| m.modified()).ok();
        let b_time = b.metadata().and_then(|m| m.modified()).ok();
        b_time.cmp(&a_time)
    });

    Ok(candidates.remove(0))
}

</content>
