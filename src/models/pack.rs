use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Optional per-pack metadata read from `manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackManifest {
    #[serde(default)]
    pub name: Option<String>,

    /// Image path relative to the pack's metadata directory.
    #[serde(default)]
    pub logo: Option<String>,
}

/// A content pack as presented to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pack {
    /// Directory name under `Mods/Packs`; the only durable key.
    pub identifier: String,
    pub display_name: String,
    pub enabled: bool,
    /// Index in the load order; `None` while disabled.
    pub position: Option<usize>,
    pub logo_path: Option<Utf8PathBuf>,
}

/// Which packs a listing should show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectionFilter {
    #[default]
    All,
    Selected,
    Unselected,
}

/// Listing filter: a case-insensitive query on the identifier plus a
/// selection state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackFilter {
    pub query: Option<String>,
    pub selection: SelectionFilter,
}

impl PackFilter {
    pub fn matches(&self, pack: &Pack) -> bool {
        if let Some(query) = self.query.as_deref().filter(|q| !q.is_empty()) {
            if !pack
                .identifier
                .to_lowercase()
                .contains(&query.to_lowercase())
            {
                return false;
            }
        }

        match self.selection {
            SelectionFilter::All => true,
            SelectionFilter::Selected => pack.enabled,
            SelectionFilter::Unselected => !pack.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(id: &str, enabled: bool) -> Pack {
        Pack {
            identifier: id.to_string(),
            display_name: id.to_string(),
            enabled,
            position: enabled.then_some(0),
            logo_path: None,
        }
    }

    #[test]
    fn test_filter_query_is_case_insensitive() {
        let filter = PackFilter {
            query: Some("JUNGLE".to_string()),
            selection: SelectionFilter::All,
        };
        assert!(filter.matches(&pack("MyJungleTweaks", false)));
        assert!(!filter.matches(&pack("IceCaves", false)));
    }

    #[test]
    fn test_filter_selection() {
        let selected = PackFilter {
            query: None,
            selection: SelectionFilter::Selected,
        };
        assert!(selected.matches(&pack("a", true)));
        assert!(!selected.matches(&pack("b", false)));

        let unselected = PackFilter {
            query: Some(String::new()),
            selection: SelectionFilter::Unselected,
        };
        assert!(unselected.matches(&pack("b", false)));
    }

    #[test]
    fn test_manifest_tolerates_unknown_keys() {
        let manifest: PackManifest =
            serde_json::from_str(r#"{"name": "Fancy Pack", "author": "someone"}"#).unwrap();
        assert_eq!(manifest.name.as_deref(), Some("Fancy Pack"));
        assert!(manifest.logo.is_none());
    }
}
