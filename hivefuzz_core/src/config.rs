use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Wall-clock budget in seconds. 0 means unlimited.
    #[serde(default)]
    pub run_time_secs: u64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
}

pub fn default_threads() -> usize {
    1
}

pub fn default_max_iterations() -> u64 {
    0 // 0 = run until terminated
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            run_time_secs: 0,
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct IoSettings {
    pub corpus_dir: PathBuf,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub crash_dir: Option<PathBuf>,
}

pub fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for IoSettings {
    fn default() -> Self {
        Self {
            corpus_dir: PathBuf::from("./corpus"),
            work_dir: default_work_dir(),
            crash_dir: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct MutateSettings {
    #[serde(default)]
    pub dictionary_file: Option<PathBuf>,
    #[serde(default = "default_max_input_size")]
    pub max_input_size: usize,
}

pub fn default_max_input_size() -> usize {
    1024 * 1024
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FeedbackSettings {
    /// When enabled the shared coverage map is created under the work dir
    /// and mapped before any worker starts.
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default)]
    pub blacklist_file: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct DisplaySettings {
    #[serde(default = "default_use_screen")]
    pub use_screen: bool,
}

pub fn default_use_screen() -> bool {
    true
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            use_screen: default_use_screen(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SocketSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

pub fn default_listen_addr() -> String {
    "127.0.0.1:0".to_string()
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SymbolSettings {
    #[serde(default)]
    pub allow_file: Option<PathBuf>,
    #[serde(default)]
    pub deny_file: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HivefuzzConfig {
    #[serde(default)]
    pub fuzzer: Option<FuzzerSettings>,
    pub io: IoSettings,
    #[serde(default)]
    pub mutate: Option<MutateSettings>,
    #[serde(default)]
    pub feedback: Option<FeedbackSettings>,
    #[serde(default)]
    pub display: Option<DisplaySettings>,
    #[serde(default)]
    pub socket: Option<SocketSettings>,
    #[serde(default)]
    pub symbols: Option<SymbolSettings>,
}

impl HivefuzzConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: HivefuzzConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}

impl Default for HivefuzzConfig {
    fn default() -> Self {
        Self {
            fuzzer: Some(FuzzerSettings::default()),
            io: IoSettings::default(),
            mutate: Some(MutateSettings::default()),
            feedback: Some(FeedbackSettings::default()),
            display: Some(DisplaySettings::default()),
            socket: Some(SocketSettings::default()),
            symbols: Some(SymbolSettings::default()),
        }
    }
}
