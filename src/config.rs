use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::docx::filter::FilterRules;
use crate::docx::package::DOCUMENT_PART;

pub const CONFIG_FILE_NAME: &str = "docx-stamp.toml";
pub const CONFIG_ENV: &str = "DOCX_STAMP_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub render: RenderSection,
    #[serde(default)]
    pub filter: FilterRules,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RenderSection {
    /// Package entry holding the main document body.
    #[serde(default = "default_document_part")]
    pub document_part: String,

    /// Appended to the template stem when no output path is given.
    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            document_part: default_document_part(),
            output_suffix: default_output_suffix(),
        }
    }
}

fn default_document_part() -> String {
    DOCUMENT_PART.to_string()
}

fn default_output_suffix() -> String {
    "-update".to_string()
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

/// Searches upwards from the current directory, then from `workdir`, then from the executable.
pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 8) {
                return Some(p);
            }
        }
    }
    None
}

/// `--config`, then `DOCX_STAMP_CONFIG`, then the upward search.
pub fn resolve_config_path(explicit: Option<PathBuf>, workdir: &Path) -> Option<PathBuf> {
    explicit
        .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
        .or_else(|| find_default_config(workdir, CONFIG_FILE_NAME))
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text)
        .with_context(|| format!("parse config toml: {}", path.display()))?;
    Ok(cfg)
}

/// Loads the config at `path`, or defaults when there is none.
pub fn load_config_or_default(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(p) if p.exists() => load_config(p),
        Some(p) => Err(anyhow::anyhow!("config not found: {}", p.display())),
        None => Ok(AppConfig::default()),
    }
}

const DEFAULT_CONFIG_TOML: &str = r#"# docx-stamp configuration

[render]
# Package entry holding the document body.
document_part = "word/document.xml"
# Default output is <template stem><output_suffix>.docx next to the template.
output_suffix = "-update"

[filter]
# Elements removed (with their content) before placeholders are scanned. `*` is a wildcard.
drop_elements = ["w:proofErr"]
# Attributes removed from every element, e.g. revision ids that split runs.
strip_attributes = []
# strip_attributes = ["w:rsid*"]
"#;

/// Writes a commented default config into `dir`. An existing file is kept unless `force`.
pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILE_NAME);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}
