use crate::atomic::write_atomic;
use crate::error::{LauncherError, LauncherResult};
pub use crate::models::config::OPTIONS_FILENAME;
use camino::Utf8Path;
use indexmap::IndexMap;
use ini::Ini;
use std::fs;
use std::io::ErrorKind;

/// Boolean options the launcher understands, grouped by INI section, with
/// their defaults.
pub const KNOWN_OPTIONS: &[(&str, &[(&str, bool)])] = &[
    (
        "general_settings",
        &[
            ("enable_loose_file_warning", true),
            ("disable_asset_caching", false),
            ("block_save_game", false),
            ("allow_save_game_mods", true),
            ("use_playlunky_save", false),
            ("disable_steam_achievements", false),
            ("speedrun_mode", false),
        ],
    ),
    (
        "script_settings",
        &[
            ("enable_developer_mode", false),
            ("enable_developer_console", false),
        ],
    ),
    (
        "audio_settings",
        &[
            ("enable_loose_audio_files", true),
            ("cache_decoded_audio_files", false),
        ],
    ),
    ("sprite_settings", &[("enable_sprite_hot_loading", false)]),
];

/// Contents of `playlunky.ini`.
///
/// Known options always have a value. Entries the launcher wrote that we do
/// not know about are kept as text and written back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylunkyOptions {
    sections: IndexMap<String, IndexMap<String, String>>,
}

impl Default for PlaylunkyOptions {
    fn default() -> Self {
        let sections = KNOWN_OPTIONS
            .iter()
            .map(|(section, options)| {
                let values = options
                    .iter()
                    .map(|(name, default)| (name.to_string(), default.to_string()))
                    .collect();
                (section.to_string(), values)
            })
            .collect();
        Self { sections }
    }
}

fn section_of(option: &str) -> Option<&'static str> {
    KNOWN_OPTIONS
        .iter()
        .find(|(_, options)| options.iter().any(|(name, _)| *name == option))
        .map(|(section, _)| *section)
}

fn default_of(option: &str) -> Option<bool> {
    KNOWN_OPTIONS
        .iter()
        .flat_map(|(_, options)| options.iter())
        .find(|(name, _)| *name == option)
        .map(|(_, default)| *default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl PlaylunkyOptions {
    /// Parse INI text over the defaults.
    pub fn from_ini_str(contents: &str) -> LauncherResult<Self> {
        let ini = Ini::load_from_str(contents)
            .map_err(|e| LauncherError::Format(format!("{}: {}", OPTIONS_FILENAME, e)))?;

        let mut options = Self::default();
        for (section, properties) in ini.iter() {
            let Some(section) = section else {
                continue;
            };
            let values = options.sections.entry(section.to_string()).or_default();
            for (key, value) in properties.iter() {
                values.insert(key.to_string(), value.to_string());
            }
        }
        Ok(options)
    }

    /// Read `path`, falling back to defaults when it is missing or invalid.
    pub fn load(path: &Utf8Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No options file at {}, using defaults", path);
                return Self::default();
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {}, using defaults", path, e);
                return Self::default();
            }
        };

        match Self::from_ini_str(&contents) {
            Ok(options) => options,
            Err(e) => {
                tracing::warn!("Ignoring invalid options file: {}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Utf8Path) -> LauncherResult<()> {
        write_atomic(path, self.to_ini_string().as_bytes())?;
        tracing::debug!("Wrote launcher options to {}", path);
        Ok(())
    }

    pub fn to_ini_string(&self) -> String {
        let mut ini = Ini::new();
        for (section, values) in &self.sections {
            for (key, value) in values {
                ini.with_section(Some(section.as_str()))
                    .set(key.as_str(), value.as_str());
            }
        }
        let mut buffer = Vec::new();
        // Writing into a Vec cannot fail
        let _ = ini.write_to(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Value of a known option. An unreadable value counts as its default.
    pub fn get(&self, option: &str) -> Option<bool> {
        let section = section_of(option)?;
        let raw = self.sections.get(section).and_then(|v| v.get(option));
        raw.and_then(|value| parse_flag(value))
            .or_else(|| default_of(option))
    }

    /// Set a known option. Returns `false` if it already had that value.
    pub fn set(&mut self, option: &str, value: bool) -> LauncherResult<bool> {
        let Some(section) = section_of(option) else {
            return Err(LauncherError::UnknownOption(option.to_string()));
        };
        if self.get(option) == Some(value) {
            return Ok(false);
        }
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(option.to_string(), value.to_string());
        Ok(true)
    }

    /// Known options with their current values, in section order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &'static str, bool)> + '_ {
        KNOWN_OPTIONS.iter().flat_map(move |(section, options)| {
            options.iter().map(move |(name, default)| {
                (*section, *name, self.get(name).unwrap_or(*default))
            })
        })
    }
}
