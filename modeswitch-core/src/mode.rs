//! Static mode catalogue.
//!
//! Every mode the engine knows about is listed here once. Configuration picks
//! a subset to enable; nothing at runtime adds or renames modes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Source mode of the built-in cross-mode link.
pub const LINK_SOURCE_MODE: &str = "bris";

/// Target mode of the built-in cross-mode link.
pub const LINK_TARGET_MODE: &str = "no_tachnun";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeGroup {
    Base,
    Event,
    Presence,
    System,
}

impl fmt::Display for ModeGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            ModeGroup::Base => "base",
            ModeGroup::Event => "event",
            ModeGroup::Presence => "presence",
            ModeGroup::System => "system",
        };
        write!(f, "{}", label)
    }
}

/// A mode definition: key, friendly name and group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub key: &'static str,
    pub name: &'static str,
    pub group: ModeGroup,
}

const fn mode(key: &'static str, name: &'static str, group: ModeGroup) -> Mode {
    Mode { key, name, group }
}

pub static MODES: &[Mode] = &[
    mode("bin_hazmanim", "Bin Hazmanim", ModeGroup::Base),
    mode("guest_room", "Guest Room", ModeGroup::Event),
    mode("bris", "Bris", ModeGroup::Event),
    mode("home", "Home", ModeGroup::Event),
    mode("no_tachnun", "No Tachnun", ModeGroup::Base),
    mode("kiddush_mode", "Kiddush Mode", ModeGroup::Event),
    mode("bavarfen_mode", "Bavarfen Mode", ModeGroup::Base),
    mode("rabbi_here", "Rabbi Here", ModeGroup::Presence),
    mode("zucher_mode", "Zucher Mode", ModeGroup::Event),
    mode("chasunah_mode", "Chasunah Mode", ModeGroup::Event),
    mode("yahrtzeit_mode", "Yahrtzeit Mode", ModeGroup::Event),
    mode("rabbi_away", "Rabbi Away", ModeGroup::Presence),
    mode("away_mode", "Away Mode", ModeGroup::System),
    mode("small_simcha_mode", "Small Simcha Mode", ModeGroup::Event),
    mode("guest_rabbi_mode", "Guest Rabbi Mode", ModeGroup::Event),
    mode("cleaning_mode", "Cleaning Mode", ModeGroup::System),
    mode("shabbos_sheva_brachos", "Shabbos Sheva Brachos Mode", ModeGroup::Event),
    mode("sheva_brachos", "Sheva Brachos Mode", ModeGroup::Event),
    mode("event_mode", "Event Mode", ModeGroup::Event),
    mode("no_school", "No School", ModeGroup::Base),
    mode("day_camp", "Day Camp", ModeGroup::Base),
    mode("late_school", "Late School", ModeGroup::Base),
    mode("half_day_school", "Half-Day School", ModeGroup::Base),
];

/// Look up a mode by key.
pub fn find_mode(key: &str) -> Option<&'static Mode> {
    MODES.iter().find(|m| m.key == key)
}

pub fn all_mode_keys() -> Vec<String> {
    MODES.iter().map(|m| m.key.to_string()).collect()
}

/// Friendly name for a key, falling back to the key itself.
pub fn mode_friendly(key: &str) -> &str {
    find_mode(key).map(|m| m.name).unwrap_or(key)
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
