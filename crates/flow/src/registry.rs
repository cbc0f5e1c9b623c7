// Archivo: registry.rs
// Propósito: el índice de flujos en curso (`FlowRegistry`, por flow id y por
// handler) y el mapa de fábricas por clave de handler (`HandlerRegistry`).
//
// Las mutaciones del índice son síncronas y nunca cruzan un punto de
// suspensión: el guard del mutex no sale de cada método.
use crate::context::{FlowContext, UniqueId};
use crate::errors::{FlowError, Result};
use crate::handler::{ErasedFlow, FlowHandler, RoutedFlow};
use crate::hooks::{CreatedFlow, FlowFactory};
use crate::result::{FlowResult, FlowSummary};
use crate::router::StepRouter;
use crate::schema::JsonMap;
use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// Celda con la instancia del flujo; se bloquea mientras corre un paso.
pub(crate) type FlowCell = Arc<AsyncMutex<Box<dyn ErasedFlow>>>;

/// Campos visibles de un flujo en curso.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRecord {
    pub flow_id: Uuid,
    pub handler: String,
    pub context: FlowContext,
    /// Último resultado no terminal; `None` antes del primer paso.
    pub cur_step: Option<FlowResult>,
    pub init_step: String,
    pub init_data: Option<JsonMap>,
    pub version: u32,
}

impl FlowRecord {
    pub fn unique_id(&self) -> Option<&UniqueId> {
        self.context.unique_id.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.cur_step.is_some()
    }

    pub fn summary(&self) -> FlowSummary {
        FlowSummary { flow_id: self.flow_id,
                      handler: self.handler.clone(),
                      context: self.context.clone(),
                      step_id: self.cur_step.as_ref().and_then(|s| s.step_id()).map(str::to_string) }
    }
}

struct Slot {
    record: FlowRecord,
    cell: FlowCell,
}

#[derive(Default)]
struct Inner {
    progress: IndexMap<Uuid, Slot>,
    by_handler: HashMap<String, IndexSet<Uuid>>,
}

/// Índice de flujos en curso.
#[derive(Default)]
pub(crate) struct FlowRegistry {
    inner: Mutex<Inner>,
}

impl FlowRegistry {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn insert(&self, record: FlowRecord, cell: FlowCell) {
        let mut inner = self.lock();
        inner.by_handler
             .entry(record.handler.clone())
             .or_default()
             .insert(record.flow_id);
        inner.progress.insert(record.flow_id, Slot { record, cell });
    }

    /// Retira el flujo de ambos índices. `None` si ya no estaba.
    pub(crate) fn remove(&self, flow_id: &Uuid) -> Option<(FlowRecord, FlowCell)> {
        let mut inner = self.lock();
        let slot = inner.progress.shift_remove(flow_id)?;
        if let Some(ids) = inner.by_handler.get_mut(&slot.record.handler) {
            ids.shift_remove(flow_id);
            if ids.is_empty() {
                inner.by_handler.remove(&slot.record.handler);
            }
        }
        Some((slot.record, slot.cell))
    }

    pub(crate) fn record(&self, flow_id: &Uuid) -> Option<FlowRecord> {
        self.lock().progress.get(flow_id).map(|s| s.record.clone())
    }

    pub(crate) fn cell(&self, flow_id: &Uuid) -> Option<FlowCell> {
        self.lock().progress.get(flow_id).map(|s| s.cell.clone())
    }

    pub(crate) fn set_cur_step(&self, flow_id: &Uuid, step: FlowResult) -> bool {
        match self.lock().progress.get_mut(flow_id) {
            Some(slot) => {
                slot.record.cur_step = Some(step);
                true
            }
            None => false,
        }
    }

    pub(crate) fn update_context(&self, flow_id: &Uuid, context: FlowContext) -> bool {
        match self.lock().progress.get_mut(flow_id) {
            Some(slot) => {
                slot.record.context = context;
                true
            }
            None => false,
        }
    }

    pub(crate) fn records(&self) -> Vec<FlowRecord> {
        self.lock().progress.values().map(|s| s.record.clone()).collect()
    }

    pub(crate) fn records_by_handler(&self, handler: &str) -> Vec<FlowRecord> {
        let inner = self.lock();
        inner.by_handler
             .get(handler)
             .map(|ids| {
                 ids.iter()
                    .filter_map(|id| inner.progress.get(id))
                    .map(|s| s.record.clone())
                    .collect()
             })
             .unwrap_or_default()
    }
}

type Constructor = Arc<dyn Fn() -> Box<dyn ErasedFlow> + Send + Sync>;

/// Mapa explícito clave de handler → constructor de flujos.
///
/// El router de cada tipo se construye al registrar y se comparte entre
/// todas sus instancias.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    constructors: Arc<DashMap<String, Constructor>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H, F>(&self, key: impl Into<String>, ctor: F) -> &Self
        where H: FlowHandler,
              F: Fn() -> H + Send + Sync + 'static
    {
        let router = Arc::new(StepRouter::<H>::build());
        let ctor: Constructor = Arc::new(move || RoutedFlow::new(ctor(), router.clone()).boxed());
        self.constructors.insert(key.into(), ctor);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.constructors.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.constructors.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Nueva instancia del handler `key`, si está registrado.
    pub fn build(&self, key: &str) -> Option<Box<dyn ErasedFlow>> {
        let ctor = self.constructors.get(key).map(|e| e.value().clone())?;
        Some(ctor())
    }
}

#[async_trait]
impl FlowFactory for HandlerRegistry {
    async fn create_flow(&self, handler: &str, _context: &FlowContext, _data: Option<&JsonMap>) -> Result<CreatedFlow> {
        self.build(handler)
            .map(CreatedFlow::new)
            .ok_or_else(|| FlowError::UnknownHandler(handler.to_string()))
    }
}
