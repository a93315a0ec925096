//! Engine configuration at ~/.config/modeswitch/config.toml

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveTime, TimeZone};
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::Timestamp;
use crate::error::{ModesError, ModesResult};
use crate::mode::{MODES, all_mode_keys, find_mode};

static DEFAULT_DATA_DIR: &str = "~/.local/share/modeswitch";
static DEFAULT_TICK_INTERVAL: &str = "30s";

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_tick_interval() -> String {
    DEFAULT_TICK_INTERVAL.to_string()
}

/// Raw configuration as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModesConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Mode keys to run. Absent means every mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_modes: Option<Vec<String>>,

    /// "HH:MM" in the configured zone. Empty disables the daily reset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_reset_time: Option<String>,

    #[serde(default)]
    pub link_no_tachnun_for_bris: bool,

    /// IANA zone name. Absent means the system zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,

    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,

    /// Minutes a manual ON lasts when no duration is given. 0 is indefinite.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_durations: BTreeMap<String, u32>,
}

impl Default for ModesConfig {
    fn default() -> Self {
        ModesConfig {
            data_dir: default_data_dir(),
            enabled_modes: None,
            auto_reset_time: None,
            link_no_tachnun_for_bris: false,
            time_zone: None,
            tick_interval: default_tick_interval(),
            default_durations: BTreeMap::new(),
        }
    }
}

impl ModesConfig {
    pub fn config_path() -> ModesResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ModesError::Config("Could not determine config directory".into()))?
            .join("modeswitch");

        Ok(config_dir.join("config.toml"))
    }

    /// Load from the default path, creating a commented default file first.
    pub fn load() -> ModesResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    /// Load from `path` with `MODESWITCH_*` environment overrides.
    /// `MODESWITCH_ENABLED_MODES` takes a comma-separated list.
    pub fn load_from(path: &Path) -> ModesResult<Self> {
        Self::load_with_env(path, env_source())
    }

    fn load_with_env(path: &Path, env: Environment) -> ModesResult<Self> {
        Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(env)
            .build()
            .map_err(|e| ModesError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ModesError::Config(e.to_string()))
    }

    pub fn save_to(&self, path: &Path) -> ModesResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ModesError::Config(e.to_string()))?;

        std::fs::write(path, content)
            .map_err(|e| ModesError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> ModesResult<()> {
        let contents = format!(
            "\
# modeswitch configuration

# Where switch, override and event records are stored:
# data_dir = \"{}\"

# Modes to run (default: all):
# enabled_modes = [\"bris\", \"no_tachnun\", \"guest_room\"]

# Turn every mode off once a day:
# auto_reset_time = \"03:00\"

# Mirror Bris events into No Tachnun:
# link_no_tachnun_for_bris = true

# Zone for wall-clock times (default: system zone):
# time_zone = \"America/New_York\"

# How often each mode re-checks its calendar:
# tick_interval = \"{}\"

# Minutes a manual ON lasts when no duration is given (0 = until turned off):
# [default_durations]
# guest_room = 120
",
            DEFAULT_DATA_DIR, DEFAULT_TICK_INTERVAL
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ModesError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| ModesError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    /// Validate and normalise into runtime settings.
    pub fn resolve(&self) -> ModesResult<Settings> {
        let enabled_modes = match &self.enabled_modes {
            None => all_mode_keys(),
            Some(keys) => {
                for key in keys.iter().filter(|k| find_mode(k).is_none()) {
                    warn!(mode = %key, "Ignoring unknown mode in enabled_modes");
                }
                MODES
                    .iter()
                    .filter(|m| keys.iter().any(|k| k == m.key))
                    .map(|m| m.key.to_string())
                    .collect()
            }
        };

        let mut default_durations = HashMap::new();
        for (key, minutes) in &self.default_durations {
            if find_mode(key).is_none() {
                warn!(mode = %key, "Ignoring default duration for unknown mode");
                continue;
            }
            default_durations.insert(key.clone(), *minutes);
        }

        let auto_reset = match self.auto_reset_time.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => match AutoResetTime::parse(raw) {
                Ok(at) => Some(at),
                Err(e) => {
                    warn!(value = %raw, error = %e, "Ignoring invalid auto_reset_time");
                    None
                }
            },
        };

        let time_zone = match &self.time_zone {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| ModesError::Config(format!("Unknown time zone '{}'", name)))?,
            None => system_time_zone(),
        };

        let tick_interval = humantime::parse_duration(&self.tick_interval).map_err(|e| {
            ModesError::Config(format!("Invalid tick_interval '{}': {}", self.tick_interval, e))
        })?;
        if tick_interval.is_zero() {
            return Err(ModesError::Config("tick_interval must be positive".into()));
        }

        let data_dir =
            PathBuf::from(shellexpand::tilde(&self.data_dir.to_string_lossy()).into_owned());

        Ok(Settings {
            data_dir,
            enabled_modes,
            default_durations,
            auto_reset,
            link_enabled: self.link_no_tachnun_for_bris,
            time_zone,
            tick_interval,
        })
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("MODESWITCH")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("enabled_modes")
}

/// The system zone, or UTC when it cannot be determined.
pub fn system_time_zone() -> Tz {
    iana_time_zone::get_timezone()
        .ok()
        .and_then(|name| name.parse::<Tz>().ok())
        .unwrap_or(chrono_tz::UTC)
}

/// Normalised configuration used by the engine and runtime.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    /// Enabled mode keys in catalogue order.
    pub enabled_modes: Vec<String>,
    pub default_durations: HashMap<String, u32>,
    pub auto_reset: Option<AutoResetTime>,
    pub link_enabled: bool,
    pub time_zone: Tz,
    pub tick_interval: StdDuration,
}

impl Settings {
    /// Settings for the given modes with no reset and no link.
    pub fn for_modes(keys: &[&str], time_zone: Tz) -> Self {
        Settings {
            data_dir: default_data_dir(),
            enabled_modes: keys.iter().map(|k| k.to_string()).collect(),
            default_durations: HashMap::new(),
            auto_reset: None,
            link_enabled: false,
            time_zone,
            tick_interval: StdDuration::from_secs(30),
        }
    }

    pub fn default_minutes(&self, key: &str) -> u32 {
        self.default_durations.get(key).copied().unwrap_or(0)
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.enabled_modes.iter().any(|k| k == key)
    }
}

/// Wall-clock time of the daily reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoResetTime(NaiveTime);

impl AutoResetTime {
    pub fn parse(raw: &str) -> ModesResult<Self> {
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map(AutoResetTime)
            .map_err(|_| ModesError::Config(format!("Expected HH:MM, got '{}'", raw)))
    }

    pub fn time(&self) -> NaiveTime {
        self.0
    }

    /// The first occurrence strictly after `now`, in `tz`.
    pub fn next_after(&self, now: Timestamp, tz: Tz) -> Timestamp {
        let local_date = now.with_timezone(&tz).date_naive();

        (0..=2)
            .filter_map(|offset| {
                let naive = (local_date + Duration::days(offset)).and_time(self.0);
                tz.from_local_datetime(&naive).earliest()
            })
            .map(|dt| dt.fixed_offset())
            .find(|candidate| *candidate > now)
            .unwrap_or_else(|| now + Duration::days(1))
    }
}
