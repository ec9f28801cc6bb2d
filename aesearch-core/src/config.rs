//! Configuration system for aesearch.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/aesearch/config.toml` and/or `.aesearch/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

/// One phase of the four-phase architecture search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStage {
    /// Single handcrafted architecture at a fixed latent size; smoke validation.
    Test,
    /// Sampled + handcrafted architectures at a short epoch budget.
    Initial,
    /// Best K `initial` architectures relaunched for a full budget.
    TopN,
    /// Best `top_n` architecture swept over latent sizes.
    LatentSearch,
}

impl SearchStage {
    pub const ALL: [SearchStage; 4] = [
        SearchStage::Test,
        SearchStage::Initial,
        SearchStage::TopN,
        SearchStage::LatentSearch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStage::Test => "test",
            SearchStage::Initial => "initial",
            SearchStage::TopN => "top_n",
            SearchStage::LatentSearch => "latent_search",
        }
    }

    /// Defaults applied when the corresponding option is left unset.
    pub fn defaults(&self) -> StageDefaults {
        match self {
            SearchStage::Test => StageDefaults {
                experiment_name: "test",
                max_n_epochs: 1000,
                min_n_epochs: 500,
                enable_early_stop: true,
                early_stop_history: Some(10),
                export_latents: false,
                which_handcrafted_archs: "0",
            },
            SearchStage::Initial => StageDefaults {
                experiment_name: "initial_grid_search",
                max_n_epochs: 20,
                min_n_epochs: 0,
                enable_early_stop: false,
                early_stop_history: None,
                export_latents: false,
                which_handcrafted_archs: "0;1",
            },
            SearchStage::TopN => StageDefaults {
                experiment_name: "top_n_grid_search",
                max_n_epochs: 1000,
                min_n_epochs: 500,
                enable_early_stop: true,
                early_stop_history: Some(10),
                export_latents: false,
                which_handcrafted_archs: "",
            },
            SearchStage::LatentSearch => StageDefaults {
                experiment_name: "best",
                max_n_epochs: 1000,
                min_n_epochs: 500,
                enable_early_stop: true,
                early_stop_history: Some(10),
                export_latents: true,
                which_handcrafted_archs: "",
            },
        }
    }
}

impl fmt::Display for SearchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchStage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SearchStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ConfigError::unsupported("search_type", s))
    }
}

/// Per-stage fallbacks for the epoch budget, naming, and handcrafted selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDefaults {
    pub experiment_name: &'static str,
    pub max_n_epochs: usize,
    pub min_n_epochs: usize,
    pub enable_early_stop: bool,
    pub early_stop_history: Option<usize>,
    pub export_latents: bool,
    pub which_handcrafted_archs: &'static str,
}

/// Encoder/decoder family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Conv,
    /// Recognized so configs naming it fail with a clear message; not buildable.
    Linear,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Conv => "conv",
            ModelType::Linear => "linear",
        }
    }
}

/// Model class; the first component of the experiment directory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelClass {
    Ae,
}

impl ModelClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelClass::Ae => "ae",
        }
    }
}

/// Device a run is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Cpu,
    Cuda,
}

/// Input frame geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    pub n_input_channels: usize,
    pub y_pixels: usize,
    pub x_pixels: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            n_input_channels: 1,
            y_pixels: 128,
            x_pixels: 128,
        }
    }
}

/// Identifies the recording session; the session root is
/// `<save_dir>/<lab>/<expt>/<animal>/<session>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub lab: String,
    pub expt: String,
    pub animal: String,
    pub session: String,
}

/// Top-level configuration for an architecture search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub search_type: SearchStage,
    pub model_type: ModelType,
    pub model_class: ModelClass,
    pub device: Device,
    pub save_dir: PathBuf,

    /// Bottleneck width for `test`, `initial`, and `top_n`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_ae_latents: Option<usize>,
    /// Latent size of the `top_n` experiments `latent_search` reads from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_n_ae_latents: Option<usize>,
    pub latent_sweep: Vec<usize>,
    pub learning_rate: f64,
    pub top_n_learning_rates: Vec<f64>,

    pub mem_limit_gb: f64,
    pub approx_batch_size: usize,
    /// `;`-delimited indices into the handcrafted pool. Empty selects none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub which_handcrafted_archs: Option<String>,
    pub n_archs: usize,
    pub n_top_archs: usize,
    /// Architecture list file for `initial`; loaded if present, generated otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch_file_name: Option<PathBuf>,
    pub saved_initial_archs: String,
    pub saved_top_n_archs: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_n_epochs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_n_epochs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_early_stop: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_stop_history: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_latents: Option<bool>,

    pub rng_seed_data: u64,
    pub rng_seed_model: u64,
    pub val_check_interval: usize,
    pub l2_reg: f64,
    pub train_frac: f64,

    // Tables last so the TOML export stays valid.
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_type: SearchStage::Test,
            model_type: ModelType::Conv,
            model_class: ModelClass::Ae,
            device: Device::Cpu,
            save_dir: default_save_dir(),
            data: DataConfig::default(),
            session: SessionConfig::default(),
            n_ae_latents: None,
            source_n_ae_latents: None,
            latent_sweep: vec![4, 8, 12, 16, 24, 32, 64],
            learning_rate: 1e-4,
            top_n_learning_rates: vec![1e-4, 1e-3],
            mem_limit_gb: 8.0,
            approx_batch_size: 200,
            which_handcrafted_archs: None,
            n_archs: 50,
            n_top_archs: 5,
            arch_file_name: None,
            saved_initial_archs: "initial_grid_search".to_string(),
            saved_top_n_archs: "top_n_grid_search".to_string(),
            experiment_name: None,
            max_n_epochs: None,
            min_n_epochs: None,
            enable_early_stop: None,
            early_stop_history: None,
            export_latents: None,
            rng_seed_data: 0,
            rng_seed_model: 0,
            val_check_interval: 1,
            l2_reg: 0.0,
            train_frac: 1.0,
        }
    }
}

fn default_save_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "aesearch", "aesearch")
        .map(|d| d.data_dir().join("results"))
        .unwrap_or_else(|| PathBuf::from("results"))
}

impl SearchConfig {
    pub fn stage_defaults(&self) -> StageDefaults {
        self.search_type.defaults()
    }

    pub fn experiment_name(&self) -> String {
        self.experiment_name
            .clone()
            .unwrap_or_else(|| self.stage_defaults().experiment_name.to_string())
    }

    pub fn max_n_epochs(&self) -> usize {
        self.max_n_epochs
            .unwrap_or(self.stage_defaults().max_n_epochs)
    }

    pub fn min_n_epochs(&self) -> usize {
        self.min_n_epochs
            .unwrap_or(self.stage_defaults().min_n_epochs)
    }

    pub fn enable_early_stop(&self) -> bool {
        self.enable_early_stop
            .unwrap_or(self.stage_defaults().enable_early_stop)
    }

    pub fn early_stop_history(&self) -> Option<usize> {
        self.early_stop_history
            .or(self.stage_defaults().early_stop_history)
    }

    pub fn export_latents(&self) -> bool {
        self.export_latents
            .unwrap_or(self.stage_defaults().export_latents)
    }

    /// Input geometry as `[channels, height, width]`.
    pub fn input_dim(&self) -> [usize; 3] {
        [
            self.data.n_input_channels,
            self.data.y_pixels,
            self.data.x_pixels,
        ]
    }

    /// `<save_dir>/<lab>/<expt>/<animal>/<session>`
    pub fn session_dir(&self) -> PathBuf {
        self.save_dir
            .join(&self.session.lab)
            .join(&self.session.expt)
            .join(&self.session.animal)
            .join(&self.session.session)
    }

    /// Parse `which_handcrafted_archs` (falling back to the stage default).
    pub fn handcrafted_indices(&self) -> Result<Vec<usize>, ConfigError> {
        let raw = self
            .which_handcrafted_archs
            .as_deref()
            .unwrap_or(self.stage_defaults().which_handcrafted_archs);
        raw.split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<usize>().map_err(|_| {
                    ConfigError::invalid(
                        "which_handcrafted_archs",
                        format!("'{s}' is not a non-negative integer index"),
                    )
                })
            })
            .collect()
    }

    /// Bottleneck width for stages that need one.
    pub fn require_n_ae_latents(&self) -> Result<usize, ConfigError> {
        self.n_ae_latents
            .ok_or_else(|| ConfigError::missing("n_ae_latents"))
    }

    /// Startup validation; nothing here is deferred to mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_type != ModelType::Conv {
            return Err(ConfigError::unsupported(
                "model_type",
                self.model_type.as_str(),
            ));
        }

        for (field, value) in [
            ("session.lab", &self.session.lab),
            ("session.expt", &self.session.expt),
            ("session.animal", &self.session.animal),
            ("session.session", &self.session.session),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::missing(field));
            }
        }

        let [channels, height, width] = self.input_dim();
        if channels == 0 || height == 0 || width == 0 {
            return Err(ConfigError::invalid(
                "data",
                format!("input dimensions must be positive, got [{channels}, {height}, {width}]"),
            ));
        }

        match self.search_type {
            SearchStage::Test | SearchStage::TopN => {
                self.require_n_ae_latents()?;
            }
            SearchStage::Initial => {
                self.require_n_ae_latents()?;
                if self.arch_file_name.is_none() {
                    return Err(ConfigError::missing("arch_file_name"));
                }
                if self.n_archs == 0 && self.handcrafted_indices()?.is_empty() {
                    return Err(ConfigError::invalid(
                        "n_archs",
                        "no sampled and no handcrafted architectures requested",
                    ));
                }
            }
            SearchStage::LatentSearch => {
                if self.source_n_ae_latents.is_none() {
                    return Err(ConfigError::missing("source_n_ae_latents"));
                }
                if self.latent_sweep.is_empty() || self.latent_sweep.contains(&0) {
                    return Err(ConfigError::invalid(
                        "latent_sweep",
                        "must be a non-empty list of positive latent sizes",
                    ));
                }
            }
        }

        if self.search_type == SearchStage::TopN {
            if self.n_top_archs == 0 {
                return Err(ConfigError::invalid("n_top_archs", "must be at least 1"));
            }
            if self.top_n_learning_rates.is_empty() {
                return Err(ConfigError::invalid(
                    "top_n_learning_rates",
                    "must contain at least one learning rate",
                ));
            }
        }

        if let Some(n) = self.n_ae_latents {
            if n == 0 {
                return Err(ConfigError::invalid("n_ae_latents", "must be positive"));
            }
        }
        if !(self.learning_rate > 0.0) {
            return Err(ConfigError::invalid("learning_rate", "must be positive"));
        }
        if !(self.mem_limit_gb > 0.0) {
            return Err(ConfigError::invalid("mem_limit_gb", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.train_frac) || self.train_frac == 0.0 {
            return Err(ConfigError::invalid("train_frac", "must lie in (0, 1]"));
        }
        self.handcrafted_indices()?;
        Ok(())
    }
}

/// Explicit overrides from the command line. Unset fields leave lower layers untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_type: Option<SearchStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_ae_latents: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_dir: Option<PathBuf>,
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `AESEARCH_`)
/// 3. An explicit config file (`--config`)
/// 4. Workspace-local config (`.aesearch/config.toml`)
/// 5. User config (`~/.config/aesearch/config.toml`)
/// 6. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<SearchConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(SearchConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "aesearch", "aesearch") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            tracing::debug!(path = %ws_config.display(), "Merging workspace config");
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Toml::file treats a missing file as empty; an explicit path must exist
    if let Some(file) = config_file {
        if !file.is_file() {
            return Err(Box::new(figment::Error::from(format!(
                "configuration file not found: {}",
                file.display()
            ))));
        }
        figment = figment.merge(Toml::file(file));
    }

    // AESEARCH_N_AE_LATENTS, AESEARCH_SESSION__LAB, etc.
    figment = figment.merge(Env::prefixed("AESEARCH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".aesearch").join("config.toml")
}

/// Write `config` to the workspace config file, returning its path.
pub fn save_workspace_config(workspace: &Path, config: &SearchConfig) -> std::io::Result<PathBuf> {
    let path = workspace_config_path(workspace);
    let content = toml::to_string_pretty(config).map_err(std::io::Error::other)?;
    crate::persistence::atomic_write(&path, content.as_bytes())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn session_config() -> SearchConfig {
        SearchConfig {
            session: SessionConfig {
                lab: "musall".into(),
                expt: "vistrained".into(),
                animal: "mSM30".into(),
                session: "10-Oct-2017".into(),
            },
            n_ae_latents: Some(12),
            ..SearchConfig::default()
        }
    }

    #[test]
    fn test_stage_round_trips_through_str() {
        for stage in SearchStage::ALL {
            assert_eq!(stage.as_str().parse::<SearchStage>().unwrap(), stage);
        }
    }

    #[test]
    fn test_unknown_stage_names_field() {
        let err = "grid".parse::<SearchStage>().unwrap_err();
        assert!(err.to_string().contains("search_type"));
        assert!(err.to_string().contains("grid"));
    }

    #[test]
    fn test_stage_defaults_fill_unset_options() {
        let mut config = session_config();
        config.search_type = SearchStage::Initial;
        assert_eq!(config.experiment_name(), "initial_grid_search");
        assert_eq!(config.max_n_epochs(), 20);
        assert!(!config.enable_early_stop());
        assert_eq!(config.early_stop_history(), None);

        config.max_n_epochs = Some(5);
        assert_eq!(config.max_n_epochs(), 5);
    }

    #[test]
    fn test_handcrafted_indices_parse() {
        let mut config = session_config();
        config.which_handcrafted_archs = Some("0; 2;".into());
        assert_eq!(config.handcrafted_indices().unwrap(), vec![0, 2]);

        config.which_handcrafted_archs = Some(String::new());
        assert!(config.handcrafted_indices().unwrap().is_empty());

        config.which_handcrafted_archs = Some("0;x".into());
        let err = config.handcrafted_indices().unwrap_err();
        assert!(err.to_string().contains("which_handcrafted_archs"));
    }

    #[test]
    fn test_linear_model_type_rejected_at_startup() {
        let mut config = session_config();
        config.model_type = ModelType::Linear;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Unsupported { ref field, .. } if field == "model_type"));
    }

    #[test]
    fn test_initial_requires_arch_file() {
        let mut config = session_config();
        config.search_type = SearchStage::Initial;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field } if field == "arch_file_name"));

        config.arch_file_name = Some(PathBuf::from("archs.json"));
        config.validate().unwrap();
    }

    #[test]
    fn test_latent_search_requires_source_latents() {
        let mut config = session_config();
        config.search_type = SearchStage::LatentSearch;
        config.n_ae_latents = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("source_n_ae_latents"));
    }

    #[test]
    fn test_missing_session_field() {
        let mut config = session_config();
        config.session.animal.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("session.animal"));
    }

    #[test]
    fn test_session_dir_layout() {
        let mut config = session_config();
        config.save_dir = PathBuf::from("/results");
        assert_eq!(
            config.session_dir(),
            PathBuf::from("/results/musall/vistrained/mSM30/10-Oct-2017")
        );
    }

    #[test]
    fn test_workspace_config_layering() {
        let ws = TempDir::new().unwrap();
        let mut config = session_config();
        config.search_type = SearchStage::TopN;
        config.n_top_archs = 3;
        save_workspace_config(ws.path(), &config).unwrap();

        let overrides = ConfigOverrides {
            n_ae_latents: Some(16),
            ..Default::default()
        };
        let loaded = load_config(Some(ws.path()), None, Some(&overrides)).unwrap();
        assert_eq!(loaded.search_type, SearchStage::TopN);
        assert_eq!(loaded.n_top_archs, 3);
        assert_eq!(loaded.n_ae_latents, Some(16));
        assert_eq!(loaded.session, config.session);
    }

    #[test]
    fn test_missing_explicit_config_file_fails() {
        let ws = TempDir::new().unwrap();
        let path = ws.path().join("absent.toml");
        let err = load_config(None, Some(&path), None).unwrap_err();
        assert!(err.to_string().contains("configuration file not found"));
    }

    #[test]
    fn test_unknown_enum_value_fails_extraction() {
        let ws = TempDir::new().unwrap();
        let path = ws.path().join("bad.toml");
        std::fs::write(&path, "search_type = \"grid\"\n").unwrap();
        let err = load_config(None, Some(&path), None).unwrap_err();
        assert!(err.to_string().contains("search_type") || err.to_string().contains("grid"));
    }
}
