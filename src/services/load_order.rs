use crate::atomic::write_atomic;
use crate::error::{LauncherError, LauncherResult};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeSet;
use std::fs;

/// Line prefix marking a disabled pack in `load_order.txt`.
pub const DISABLED_PREFIX: &str = "--";

/// Ordered enabled/disabled state of content packs, persisted to
/// `Mods/Packs/load_order.txt`.
///
/// Enabled identifiers form a total order (first line loads first). Every
/// other known identifier is disabled. Each mutation that changes the
/// state writes the file before returning.
#[derive(Debug, Clone)]
pub struct LoadOrderStore {
    path: Utf8PathBuf,
    enabled: Vec<String>,
    known: BTreeSet<String>,
}

impl LoadOrderStore {
    /// Empty store bound to `path`; nothing is read or written.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            enabled: Vec::new(),
            known: BTreeSet::new(),
        }
    }

    /// Read the persisted order, keeping only identifiers in `known`.
    ///
    /// A missing file leaves every known pack disabled. Unprefixed lines are
    /// enabled in file order; `--` lines are disabled.
    pub fn load(path: impl Into<Utf8PathBuf>, known: BTreeSet<String>) -> LauncherResult<Self> {
        let path = path.into();
        let mut store = Self {
            path,
            enabled: Vec::new(),
            known,
        };

        if !store.path.exists() {
            tracing::info!(
                "No load order at {}, all {} packs disabled",
                store.path,
                store.known.len()
            );
            return Ok(store);
        }

        let contents =
            fs::read_to_string(&store.path).map_err(|e| LauncherError::io(&store.path, e))?;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(DISABLED_PREFIX) {
                continue;
            }
            if !store.known.contains(line) {
                tracing::debug!("Dropping unknown pack from load order: {}", line);
                continue;
            }
            if !store.enabled.iter().any(|id| id == line) {
                store.enabled.push(line.to_string());
            }
        }

        tracing::info!(
            "Loaded load order from {}: {} enabled of {} known",
            store.path,
            store.enabled.len(),
            store.known.len()
        );
        Ok(store)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Enabled identifiers in load order.
    pub fn enabled(&self) -> &[String] {
        &self.enabled
    }

    pub fn known(&self) -> &BTreeSet<String> {
        &self.known
    }

    pub fn is_enabled(&self, identifier: &str) -> bool {
        self.position(identifier).is_some()
    }

    /// Index of an enabled identifier in the load order.
    pub fn position(&self, identifier: &str) -> Option<usize> {
        self.enabled.iter().position(|id| id == identifier)
    }

    /// Disabled identifiers in lexicographic order.
    pub fn disabled(&self) -> impl Iterator<Item = &str> {
        self.known
            .iter()
            .filter(|id| !self.enabled.contains(*id))
            .map(String::as_str)
    }

    /// Append `identifier` to the end of the load order.
    ///
    /// Returns `false` if it was already enabled.
    pub fn insert(&mut self, identifier: &str) -> LauncherResult<bool> {
        if self.is_enabled(identifier) {
            return Ok(false);
        }
        let mut enabled = self.enabled.clone();
        enabled.push(identifier.to_string());
        let mut known = self.known.clone();
        known.insert(identifier.to_string());
        self.commit(enabled, known)?;
        Ok(true)
    }

    /// Disable `identifier`; it stays known.
    ///
    /// Returns `false` if it was not enabled.
    pub fn delete(&mut self, identifier: &str) -> LauncherResult<bool> {
        let Some(index) = self.position(identifier) else {
            return Ok(false);
        };
        let mut enabled = self.enabled.clone();
        enabled.remove(index);
        self.commit(enabled, self.known.clone())?;
        Ok(true)
    }

    /// Swap `identifier` with its predecessor. No-op at the top.
    pub fn move_up(&mut self, identifier: &str) -> LauncherResult<bool> {
        match self.position(identifier) {
            Some(index) if index > 0 => {
                self.swap(index - 1, index)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Swap `identifier` with its successor. No-op at the bottom.
    pub fn move_down(&mut self, identifier: &str) -> LauncherResult<bool> {
        match self.position(identifier) {
            Some(index) if index + 1 < self.enabled.len() => {
                self.swap(index, index + 1)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn swap(&mut self, a: usize, b: usize) -> LauncherResult<()> {
        let mut enabled = self.enabled.clone();
        enabled.swap(a, b);
        self.commit(enabled, self.known.clone())
    }

    /// Replace the known set after discovery.
    ///
    /// Identifiers that disappeared leave the load order; new ones start
    /// disabled. Always persists so the file lists exactly the known packs.
    pub fn set_known(&mut self, known: BTreeSet<String>) -> LauncherResult<()> {
        let enabled = self
            .enabled
            .iter()
            .filter(|id| known.contains(*id))
            .cloned()
            .collect();
        self.commit(enabled, known)
    }

    /// Drop `identifier` entirely (its directory is gone).
    pub fn forget(&mut self, identifier: &str) -> LauncherResult<bool> {
        let was_enabled = self.is_enabled(identifier);
        let was_known = self.known.contains(identifier);
        if was_enabled || was_known {
            let enabled = self
                .enabled
                .iter()
                .filter(|id| *id != identifier)
                .cloned()
                .collect();
            let mut known = self.known.clone();
            known.remove(identifier);
            self.commit(enabled, known)?;
        }
        Ok(was_known)
    }

    /// File contents for the current state.
    pub fn render(&self) -> String {
        render_order(&self.enabled, &self.known)
    }

    /// Write enabled identifiers in order, then the disabled remainder
    /// prefixed with `--`, through a temporary sibling and rename.
    pub fn persist(&self) -> LauncherResult<()> {
        write_atomic(&self.path, self.render().as_bytes())?;
        tracing::debug!(
            "Persisted load order to {} ({} enabled)",
            self.path,
            self.enabled.len()
        );
        Ok(())
    }

    /// Write the candidate state, adopting it only once the file holds it.
    fn commit(&mut self, enabled: Vec<String>, known: BTreeSet<String>) -> LauncherResult<()> {
        if let Err(e) = write_atomic(&self.path, render_order(&enabled, &known).as_bytes()) {
            tracing::error!("Failed to save load order to {}: {}", self.path, e);
            return Err(e);
        }
        self.enabled = enabled;
        self.known = known;
        tracing::debug!(
            "Persisted load order to {} ({} enabled)",
            self.path,
            self.enabled.len()
        );
        Ok(())
    }
}

fn render_order(enabled: &[String], known: &BTreeSet<String>) -> String {
    let mut contents = String::new();
    for id in enabled {
        contents.push_str(id);
        contents.push('\n');
    }
    for id in known.iter().filter(|id| !enabled.contains(*id)) {
        contents.push_str(DISABLED_PREFIX);
        contents.push_str(id);
        contents.push('\n');
    }
    contents
}
