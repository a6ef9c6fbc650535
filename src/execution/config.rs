//! Run Configuration
//!
//! Settings are read from a JSON file (all keys optional, camelCase) and can
//! be overridden one at a time with [`RunConfig::set`], which is what the
//! command line uses.
//!
//! ```json
//! {
//!   "maxInstances": 3,
//!   "groups": ["smoke"],
//!   "minFrequency": "high",
//!   "stepDataMode": "fail",
//!   "maxScreenshots": 200,
//!   "globalInit": { "baseUrl": "http://localhost:8080" }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::browser::screenshots::SCREENSHOT_DIR;
use crate::error::ConfigError;
use crate::tree::{Frequency, GenerateOptions, StepDataMode};

/// Config file picked up from the working directory when present.
pub const CONFIG_FILE: &str = "treerunner.json";

/// Default report location.
pub const REPORT_FILE: &str = "report/report.json";

pub const DEFAULT_MAX_INSTANCES: usize = 5;

/// Screenshot budget meaning "no limit".
pub const UNLIMITED_SCREENSHOTS: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunConfig {
    /// Upper bound on parallel execution units
    pub max_instances: usize,
    pub groups: Option<Vec<String>>,
    pub min_frequency: Option<Frequency>,
    pub no_debug: bool,
    pub no_report: bool,
    pub pause_on_fail: bool,
    /// `None` lets the presence of debug branches decide
    pub headless: Option<bool>,
    pub server_url: Option<String>,
    pub step_data_mode: StepDataMode,
    pub max_screenshots: i64,
    pub rerun_not_passed: bool,
    pub express_debug: bool,
    pub screenshot_dir: PathBuf,
    pub report_path: PathBuf,
    pub working_dir: Option<PathBuf>,
    /// Global variables every branch starts with
    pub global_init: BTreeMap<String, String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_instances: DEFAULT_MAX_INSTANCES,
            groups: None,
            min_frequency: None,
            no_debug: false,
            no_report: false,
            pause_on_fail: false,
            headless: None,
            server_url: None,
            step_data_mode: StepDataMode::All,
            max_screenshots: UNLIMITED_SCREENSHOTS,
            rerun_not_passed: false,
            express_debug: false,
            screenshot_dir: PathBuf::from(SCREENSHOT_DIR),
            report_path: PathBuf::from(REPORT_FILE),
            working_dir: None,
            global_init: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    /// Reads and validates a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: RunConfig = serde_json::from_str(&content).map_err(|source| {
            ConfigError::Json {
                path: path.display().to_string(),
                source,
            }
        })?;
        config.validate()?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads [`CONFIG_FILE`] from `dir` if it exists, defaults otherwise.
    pub fn load_or_default(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            debug!("No {} found, using defaults", CONFIG_FILE);
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_instances == 0 {
            return Err(ConfigError::invalid("maxInstances", "0", "must be at least 1"));
        }
        if self.max_screenshots < UNLIMITED_SCREENSHOTS {
            return Err(ConfigError::invalid(
                "maxScreenshots",
                &self.max_screenshots.to_string(),
                "must be -1 (unlimited) or a count",
            ));
        }
        Ok(())
    }

    /// Overrides one setting from its textual form.
    ///
    /// Keys are matched ignoring case, dashes and underscores, so
    /// `max-instances`, `max_instances` and `maxInstances` are the same key.
    /// Boolean keys accept an empty value as `true`. `global` takes
    /// `name=value` and adds one entry to the global init variables.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let normalized: String = key
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "maxinstances" => {
                self.max_instances = value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::invalid(key, value, "expected a positive number"))?;
            }
            "groups" => {
                let groups: Vec<String> = value
                    .split(',')
                    .map(|g| g.trim().to_string())
                    .filter(|g| !g.is_empty())
                    .collect();
                self.groups = if groups.is_empty() { None } else { Some(groups) };
            }
            "minfrequency" => self.min_frequency = Some(value.parse()?),
            "nodebug" => self.no_debug = parse_bool(key, value)?,
            "noreport" => self.no_report = parse_bool(key, value)?,
            "pauseonfail" => self.pause_on_fail = parse_bool(key, value)?,
            "headless" => self.headless = Some(parse_bool(key, value)?),
            "serverurl" => self.server_url = Some(value.trim().to_string()),
            "stepdata" | "stepdatamode" => self.step_data_mode = value.parse()?,
            "maxscreenshots" => {
                self.max_screenshots = value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::invalid(key, value, "expected a number or -1"))?;
            }
            "rerunnotpassed" => self.rerun_not_passed = parse_bool(key, value)?,
            "expressdebug" => self.express_debug = parse_bool(key, value)?,
            "screenshotdir" => self.screenshot_dir = PathBuf::from(value),
            "reportpath" => self.report_path = PathBuf::from(value),
            "workingdir" => self.working_dir = Some(PathBuf::from(value)),
            "global" | "globalinit" => {
                let Some((name, init)) = value.split_once('=') else {
                    return Err(ConfigError::invalid(key, value, "expected name=value"));
                };
                let name = name.trim();
                if name.is_empty() {
                    return Err(ConfigError::invalid(key, value, "variable name is empty"));
                }
                self.global_init.insert(name.to_string(), init.trim().to_string());
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }

        self.validate()
    }

    pub fn generate_options(&self) -> GenerateOptions {
        GenerateOptions {
            groups: self.groups.clone(),
            min_frequency: self.min_frequency,
            no_debug: self.no_debug,
            skip_hashes: Default::default(),
        }
    }

    pub fn is_screenshot_budget_unlimited(&self) -> bool {
        self.max_screenshots == UNLIMITED_SCREENSHOTS
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "" | "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected true or false")),
    }
}
