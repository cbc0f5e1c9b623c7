// Archivo: entry.rs
// Propósito: la entrada de configuración persistida (`ConfigEntry`) y su
// estado de carga.
use chrono::{DateTime, Utc};
use flow::{source, JsonMap, PersistedTarget, UniqueId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Estado de carga de una entrada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    NotLoaded,
    Loaded,
    SetupError,
    SetupRetry,
    MigrationError,
    FailedUnload,
}

impl EntryState {
    /// Si la entrada puede descargarse y volver a levantarse sin reiniciar.
    pub fn recoverable(self) -> bool {
        !matches!(self, EntryState::MigrationError | EntryState::FailedUnload)
    }
}

/// Una integración configurada: el resultado duradero de un flujo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub domain: String,
    pub title: String,
    pub data: JsonMap,
    #[serde(default)]
    pub options: JsonMap,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    pub version: u32,
    pub state: EntryState,
    pub created_at: DateTime<Utc>,
}

impl ConfigEntry {
    pub fn new(domain: impl Into<String>, title: impl Into<String>, data: JsonMap, source: impl Into<String>) -> Self {
        Self { entry_id: Uuid::new_v4().simple().to_string(),
               domain: domain.into(),
               title: title.into(),
               data,
               options: JsonMap::new(),
               source: source.into(),
               unique_id: None,
               version: 1,
               state: EntryState::NotLoaded,
               created_at: Utc::now() }
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn with_options(mut self, options: JsonMap) -> Self {
        self.options = options;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn is_ignored(&self) -> bool {
        self.source == source::IGNORE
    }

    /// Vista de la entrada para la deduplicación del motor. Solo se recargan
    /// entradas levantadas o en reintento.
    pub fn to_target(&self) -> PersistedTarget {
        PersistedTarget { target_id: self.entry_id.clone(),
                          handler: self.domain.clone(),
                          unique_id: self.unique_id.clone().map(UniqueId::Id),
                          source: self.source.clone(),
                          data: self.data.clone(),
                          options: self.options.clone(),
                          reloadable: matches!(self.state, EntryState::Loaded | EntryState::SetupRetry) }
    }
}

/// Cambios parciales para `ConfigEntries::update_entry`. Los campos `None`
/// no se tocan.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub title: Option<String>,
    pub data: Option<JsonMap>,
    pub options: Option<JsonMap>,
    pub unique_id: Option<Option<String>>,
}

impl EntryUpdate {
    /// Aplica los cambios y devuelve si algo cambió.
    pub(crate) fn apply(self, entry: &mut ConfigEntry) -> bool {
        let mut changed = false;
        if let Some(title) = self.title.filter(|t| *t != entry.title) {
            entry.title = title;
            changed = true;
        }
        if let Some(data) = self.data.filter(|d| *d != entry.data) {
            entry.data = data;
            changed = true;
        }
        if let Some(options) = self.options.filter(|o| *o != entry.options) {
            entry.options = options;
            changed = true;
        }
        if let Some(unique_id) = self.unique_id.filter(|u| *u != entry.unique_id) {
            entry.unique_id = unique_id;
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_migration_and_unload_failures_are_unrecoverable() {
        assert!(EntryState::SetupRetry.recoverable());
        assert!(EntryState::Loaded.recoverable());
        assert!(!EntryState::MigrationError.recoverable());
        assert!(!EntryState::FailedUnload.recoverable());
    }

    #[test]
    fn update_reports_only_real_changes() {
        let mut entry = ConfigEntry::new("hue", "Bridge", JsonMap::new(), "user");
        let same = EntryUpdate { title: Some("Bridge".into()),
                                 ..EntryUpdate::default() };
        assert!(!same.apply(&mut entry));
        let data = json!({"host": "1.2.3.4"}).as_object().cloned().unwrap();
        let update = EntryUpdate { data: Some(data.clone()),
                                   ..EntryUpdate::default() };
        assert!(update.apply(&mut entry));
        assert_eq!(entry.data, data);
    }

    #[test]
    fn target_view_keeps_source_and_reloadability() {
        let mut entry = ConfigEntry::new("hue", "Bridge", JsonMap::new(), "ignore").with_unique_id("aa");
        let target = entry.to_target();
        assert!(target.is_ignored());
        assert!(!target.reloadable);
        assert_eq!(target.unique_id, Some(UniqueId::from("aa")));
        entry.state = EntryState::Loaded;
        assert!(entry.to_target().reloadable);
    }
}
