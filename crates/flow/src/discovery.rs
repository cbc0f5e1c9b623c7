// Archivo: discovery.rs
// Propósito: deduplicación de descubrimientos. Helpers de `StepContext` para
// reclamar una clave única y abortar duplicados, y helpers del manager para
// retirar flujos que quedaron sobrantes.
use crate::context::{source, UniqueId};
use crate::errors::{AbortFlow, StepError};
use crate::handler::StepContext;
use crate::manager::FlowManager;
use crate::repository::PersistedTarget;
use crate::result::FlowSummary;
use crate::schema::JsonMap;
use uuid::Uuid;

impl StepContext {
    pub fn unique_id(&self) -> Option<&UniqueId> {
        self.context.unique_id.as_ref()
    }

    /// Reclama `unique_id` para este flujo.
    ///
    /// - Con `raise_on_progress`, aborta con `already_in_progress` si otro
    ///   flujo del handler ya tiene la misma clave.
    /// - Una clave real retira los flujos del handler que usan el centinela
    ///   de descubrimiento por defecto.
    ///
    /// Devuelve el destino persistido con la misma clave, si existe
    /// (ignorados incluidos). `None` borra la clave.
    pub fn set_unique_id(&mut self,
                         unique_id: Option<UniqueId>,
                         raise_on_progress: bool)
                         -> Result<Option<PersistedTarget>, StepError> {
        let Some(unique_id) = unique_id else {
            self.update_context(|c| c.unique_id = None);
            return Ok(None);
        };

        if raise_on_progress
           && self.in_progress(true)
                  .iter()
                  .any(|f| f.context.unique_id.as_ref() == Some(&unique_id))
        {
            return Err(AbortFlow::new("already_in_progress").into());
        }

        let claimed = unique_id.clone();
        self.update_context(move |c| c.unique_id = Some(claimed));

        if !unique_id.is_default_discovery() {
            self.manager.abort_default_discovery_flows(&self.handler, Some(self.flow_id));
        }

        Ok(self.current_targets(true)?
               .into_iter()
               .find(|t| t.unique_id.as_ref() == Some(&unique_id)))
    }

    /// Aborta con `already_configured` si ya hay un destino persistido con la
    /// clave de este flujo.
    ///
    /// Antes de abortar mezcla `updates` en los datos del destino y, si algo
    /// cambió y `reload_on_update`, agenda su recarga. Un destino ignorado no
    /// cuenta como configurado cuando el flujo lo inició el usuario.
    pub fn abort_if_unique_id_configured(&self, updates: Option<&JsonMap>, reload_on_update: bool) -> Result<(), StepError> {
        let Some(unique_id) = self.unique_id() else {
            return Ok(());
        };
        let targets = &self.manager.shared.targets;
        for target in self.current_targets(true)? {
            if target.unique_id.as_ref() != Some(unique_id) {
                continue;
            }
            if let Some(updates) = updates {
                let changed = targets.update_target_data(&target.target_id, updates)
                                     .map_err(StepError::failed)?;
                if changed && reload_on_update && target.reloadable {
                    targets.schedule_reload(&target.target_id).map_err(StepError::failed)?;
                }
            }
            if target.is_ignored() && self.source() == Some(source::USER) {
                continue;
            }
            return Err(AbortFlow::new("already_configured").into());
        }
        Ok(())
    }

    /// Para descubrimientos sin identificador propio: solo un flujo a la vez
    /// por handler, y ninguno si ya hay destinos configurados. No hace nada
    /// si el flujo ya reclamó una clave.
    pub fn handle_discovery_without_unique_id(&mut self) -> Result<(), StepError> {
        if self.unique_id().is_some() {
            return Ok(());
        }
        let include_ignore = self.source() != Some(source::USER);
        if !self.current_targets(include_ignore)?.is_empty() {
            return Err(AbortFlow::new("already_configured").into());
        }
        self.set_unique_id(Some(UniqueId::DEFAULT_DISCOVERY), true)?;
        self.abort_if_unique_id_configured(None, true)?;
        if !self.in_progress(true).is_empty() {
            return Err(AbortFlow::new("already_in_progress").into());
        }
        Ok(())
    }

    /// Aborta con `already_configured` si algún destino no ignorado tiene en
    /// sus datos todos los pares de `matcher`.
    pub fn abort_targets_match(&self, matcher: &JsonMap) -> Result<(), StepError> {
        let hit = self.current_targets(false)?
                      .iter()
                      .any(|t| matcher.iter().all(|(k, v)| t.data.get(k) == Some(v)));
        if hit {
            return Err(AbortFlow::new("already_configured").into());
        }
        Ok(())
    }

    /// Otros flujos en curso del mismo handler.
    pub fn in_progress(&self, include_uninitialized: bool) -> Vec<FlowSummary> {
        self.manager
            .progress_by_handler(&self.handler, include_uninitialized)
            .into_iter()
            .filter(|f| f.flow_id != self.flow_id)
            .collect()
    }

    /// Destinos persistidos del handler.
    pub fn current_targets(&self, include_ignore: bool) -> Result<Vec<PersistedTarget>, StepError> {
        let targets = self.manager
                          .shared
                          .targets
                          .targets(&self.handler)
                          .map_err(StepError::failed)?;
        Ok(targets.into_iter().filter(|t| include_ignore || !t.is_ignored()).collect())
    }
}

impl FlowManager {
    /// Aborta los flujos de `handler` que usan el centinela, salvo `except`.
    pub fn abort_default_discovery_flows(&self, handler: &str, except: Option<Uuid>) -> usize {
        self.abort_matching(handler, except, |uid| uid.is_default_discovery())
    }

    /// Aborta los flujos de `handler` con la clave `unique_id` o con el
    /// centinela, salvo `except`. Se usa al crear un destino.
    pub fn abort_flows_for_unique_id(&self, handler: &str, unique_id: Option<&UniqueId>, except: Option<Uuid>) -> usize {
        self.abort_matching(handler, except, |uid| {
                uid.is_default_discovery() || Some(uid) == unique_id
            })
    }

    fn abort_matching<F>(&self, handler: &str, except: Option<Uuid>, pred: F) -> usize
        where F: Fn(&UniqueId) -> bool
    {
        let doomed: Vec<Uuid> = self.shared
                                    .registry
                                    .records_by_handler(handler)
                                    .into_iter()
                                    .filter(|r| Some(r.flow_id) != except)
                                    .filter(|r| r.unique_id().is_some_and(&pred))
                                    .map(|r| r.flow_id)
                                    .collect();
        // otro hilo pudo retirarlo entre la lectura y el aborto
        doomed.into_iter().filter(|id| self.abort(*id).is_ok()).count()
    }
}
