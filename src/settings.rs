//! Configuration profiles and the typed execution options they resolve to.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::store::SettingsStore;

/// A configuration profile as stored, decoded from YAML.
///
/// `rate-limit` and `rate-limit-minute` have no default: a profile that omits
/// either one fails to decode instead of silently running unthrottled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScanSettings {
    pub rate_limit: u32,
    pub rate_limit_minute: u32,
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
    #[serde(default = "default_template_threads")]
    pub template_threads: usize,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub severities: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default)]
    pub follow_redirects: bool,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub headless: bool,
    #[serde(default)]
    pub no_interactsh: bool,
}

fn default_bulk_size() -> usize {
    25
}

fn default_template_threads() -> usize {
    25
}

fn default_timeout() -> u64 {
    5
}

fn default_retries() -> u32 {
    1
}

fn default_max_redirects() -> u32 {
    10
}

impl ScanSettings {
    /// Decode a serialized profile.
    pub fn from_yaml(name: &str, data: &str) -> Result<Self, ScanError> {
        serde_yaml::from_str(data).map_err(|e| ScanError::Decode {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Convert into execution options. Template and workflow lists start empty;
    /// the worker fills them in once the request's templates are materialized.
    pub fn to_options(&self) -> TypedOptions {
        TypedOptions {
            rate_limit: self.rate_limit,
            rate_limit_minute: self.rate_limit_minute,
            templates_directory: PathBuf::new(),
            templates: Vec::new(),
            workflows: Vec::new(),
            bulk_size: self.bulk_size.max(1),
            template_threads: self.template_threads.max(1),
            timeout: self.timeout,
            retries: self.retries,
            severities: self.severities.clone(),
            tags: self.tags.clone(),
            exclude_tags: self.exclude_tags.clone(),
            follow_redirects: self.follow_redirects,
            max_redirects: self.max_redirects,
            custom_headers: self.custom_headers.clone(),
            headless: self.headless,
            no_interactsh: self.no_interactsh,
        }
    }
}

/// Execution options handed to the engine for one scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedOptions {
    pub rate_limit: u32,
    pub rate_limit_minute: u32,
    pub templates_directory: PathBuf,
    pub templates: Vec<String>,
    pub workflows: Vec<String>,
    pub bulk_size: usize,
    pub template_threads: usize,
    pub timeout: u64,
    pub retries: u32,
    pub severities: Vec<String>,
    pub tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub custom_headers: BTreeMap<String, String>,
    pub headless: bool,
    pub no_interactsh: bool,
}

/// Fetch the named profile and resolve it into execution options.
pub async fn resolve_options(
    store: &dyn SettingsStore,
    name: &str,
) -> Result<TypedOptions, ScanError> {
    let setting = store
        .get_setting_by_name(name)
        .await?
        .ok_or_else(|| ScanError::ConfigNotFound {
            name: name.to_string(),
        })?;

    let settings = ScanSettings::from_yaml(name, &setting.settingdata)?;
    Ok(settings.to_options())
}
