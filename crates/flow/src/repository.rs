// Archivo: repository.rs
// Propósito: contrato `TargetRepository` hacia el colaborador que guarda los
// destinos ya configurados (dispositivos, servicios, credenciales). El motor
// solo lo consulta para deduplicar descubrimientos.
use crate::context::{source, UniqueId};
use crate::errors::Result;
use crate::schema::JsonMap;
use serde::{Deserialize, Serialize};

/// Destino persistido, visto desde el motor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedTarget {
    pub target_id: String,
    pub handler: String,
    pub unique_id: Option<UniqueId>,
    pub source: String,
    pub data: JsonMap,
    #[serde(default)]
    pub options: JsonMap,
    /// True si un cambio de datos debe disparar una recarga.
    #[serde(default)]
    pub reloadable: bool,
}

impl PersistedTarget {
    /// Destino marcado como ignorado a propósito.
    pub fn is_ignored(&self) -> bool {
        self.source == source::IGNORE
    }
}

/// Acceso a los destinos persistidos por handler.
///
/// Las operaciones son síncronas: se llaman desde dentro de un paso y no
/// deben suspender. La recarga se agenda, no se espera.
pub trait TargetRepository: Send + Sync {
    /// Destinos del handler, en orden de creación.
    fn targets(&self, handler: &str) -> Result<Vec<PersistedTarget>>;

    /// Mezcla `updates` en los datos del destino. Devuelve si cambió algo.
    fn update_target_data(&self, target_id: &str, updates: &JsonMap) -> Result<bool>;

    /// Agenda una recarga del destino en segundo plano.
    fn schedule_reload(&self, target_id: &str) -> Result<()>;
}

/// Repositorio sin destinos, para managers que no deduplican.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTargets;

impl TargetRepository for NoTargets {
    fn targets(&self, _handler: &str) -> Result<Vec<PersistedTarget>> {
        Ok(Vec::new())
    }

    fn update_target_data(&self, _target_id: &str, _updates: &JsonMap) -> Result<bool> {
        Ok(false)
    }

    fn schedule_reload(&self, _target_id: &str) -> Result<()> {
        Ok(())
    }
}
