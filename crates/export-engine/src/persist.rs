//! Persisted export settings.

use std::path::PathBuf;

use cap_common::config::SettingsStore;
use cap_export_model::resolve::{resolve, ResolveContext};
use cap_export_model::settings::{ExportSettings, RawExportSettings};

const STORE_NAME: &str = "export_settings";

/// Last-used export settings, stored as `export_settings.json`.
///
/// Whatever is on disk is resolved before use, so settings written by an
/// older build or edited by hand always come back legal.
#[derive(Debug, Clone)]
pub struct ExportSettingsStore {
    inner: SettingsStore<RawExportSettings>,
}

impl ExportSettingsStore {
    pub fn new() -> Self {
        Self {
            inner: SettingsStore::named(STORE_NAME),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: SettingsStore::at(path),
        }
    }

    pub fn load(&self, ctx: &ResolveContext<'_>) -> ExportSettings {
        resolve(&self.inner.load(), ctx)
    }

    pub fn save(&self, settings: &ExportSettings) -> Result<(), std::io::Error> {
        self.inner.save(&RawExportSettings::from(settings))?;
        tracing::debug!(path = %self.inner.path().display(), "Saved export settings");
        Ok(())
    }
}

impl Default for ExportSettingsStore {
    fn default() -> Self {
        Self::new()
    }
}
