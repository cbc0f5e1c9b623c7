// Archivo: handler.rs
// Propósito: el trait `FlowHandler` que implementa cada asistente, su forma
// borrada (`ErasedFlow`) que guarda el registro, y `StepContext`, la vista
// que recibe cada paso sobre su flujo.
use crate::context::{source, FlowContext};
use crate::errors::BoxError;
use crate::manager::FlowManager;
use crate::registry::FlowRecord;
use crate::router::{self, StepFuture, StepRouter};
use crate::schema::JsonMap;
use std::sync::Arc;
use uuid::Uuid;

/// Lógica de un asistente multi-paso.
///
/// Cada tipo declara sus pasos en `register_steps`; el router resultante se
/// construye una vez por tipo y se comparte entre instancias.
pub trait FlowHandler: Sized + Send + 'static {
    /// Versión que se estampa en las entradas creadas.
    const VERSION: u32 = 1;
    /// Paso de entrada por defecto; la fábrica puede sobrescribirlo.
    const INIT_STEP: &'static str = "init";

    fn register_steps(router: &mut StepRouter<Self>);

    /// Hook de eliminación. Sus errores se registran y se descartan.
    fn on_remove(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Flujo con el tipo concreto borrado, tal como vive en el registro.
pub trait ErasedFlow: Send {
    fn version(&self) -> u32;
    fn init_step(&self) -> &'static str;
    fn has_step(&self, step_id: &str) -> bool;
    /// `None` si el paso no existe.
    fn run_step<'a>(&'a mut self,
                    step_id: &str,
                    ctx: &'a mut StepContext,
                    input: Option<JsonMap>)
                    -> Option<StepFuture<'a>>;
    fn on_remove(&mut self) -> Result<(), BoxError>;
}

/// Un handler junto a su router.
pub struct RoutedFlow<H> {
    handler: H,
    router: Arc<StepRouter<H>>,
}

impl<H> RoutedFlow<H> where H: FlowHandler
{
    pub fn new(handler: H, router: Arc<StepRouter<H>>) -> Self {
        Self { handler, router }
    }

    pub fn boxed(self) -> Box<dyn ErasedFlow> {
        Box::new(self)
    }
}

impl<H> ErasedFlow for RoutedFlow<H> where H: FlowHandler
{
    fn version(&self) -> u32 {
        H::VERSION
    }

    fn init_step(&self) -> &'static str {
        H::INIT_STEP
    }

    fn has_step(&self, step_id: &str) -> bool {
        self.router.contains(step_id)
    }

    fn run_step<'a>(&'a mut self,
                    step_id: &str,
                    ctx: &'a mut StepContext,
                    input: Option<JsonMap>)
                    -> Option<StepFuture<'a>> {
        let step = self.router.get(step_id)?;
        Some(step(&mut self.handler, ctx, input))
    }

    fn on_remove(&mut self) -> Result<(), BoxError> {
        self.handler.on_remove()
    }
}

/// Flujo que añade los pseudo-pasos `ignore` y `unignore` cuando el handler
/// no los declara. Los pasos propios del handler tienen prioridad.
pub struct DiscoveryDefaults {
    inner: Box<dyn ErasedFlow>,
}

impl DiscoveryDefaults {
    pub fn new(inner: Box<dyn ErasedFlow>) -> Self {
        Self { inner }
    }
}

impl ErasedFlow for DiscoveryDefaults {
    fn version(&self) -> u32 {
        self.inner.version()
    }

    fn init_step(&self) -> &'static str {
        self.inner.init_step()
    }

    fn has_step(&self, step_id: &str) -> bool {
        self.inner.has_step(step_id) || step_id == source::IGNORE || step_id == source::UNIGNORE
    }

    fn run_step<'a>(&'a mut self,
                    step_id: &str,
                    ctx: &'a mut StepContext,
                    input: Option<JsonMap>)
                    -> Option<StepFuture<'a>> {
        if self.inner.has_step(step_id) {
            return self.inner.run_step(step_id, ctx, input);
        }
        match step_id {
            source::IGNORE => Some(router::ignore(ctx, input)),
            source::UNIGNORE => Some(router::unignore()),
            _ => None,
        }
    }

    fn on_remove(&mut self) -> Result<(), BoxError> {
        self.inner.on_remove()
    }
}

/// Vista de un paso sobre su flujo.
///
/// Los cambios de contexto se escriben en el registro en el momento, para
/// que las comprobaciones de duplicados de otros flujos los vean.
pub struct StepContext {
    pub(crate) flow_id: Uuid,
    pub(crate) handler: String,
    pub(crate) context: FlowContext,
    pub(crate) init_data: Option<JsonMap>,
    pub(crate) manager: FlowManager,
}

impl StepContext {
    pub(crate) fn new(record: &FlowRecord, manager: FlowManager) -> Self {
        Self { flow_id: record.flow_id,
               handler: record.handler.clone(),
               context: record.context.clone(),
               init_data: record.init_data.clone(),
               manager }
    }

    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn context(&self) -> &FlowContext {
        &self.context
    }

    pub fn source(&self) -> Option<&str> {
        self.context.source()
    }

    pub fn init_data(&self) -> Option<&JsonMap> {
        self.init_data.as_ref()
    }

    pub fn show_advanced_options(&self) -> bool {
        self.context.show_advanced_options
    }

    /// Modifica el contexto del flujo y lo publica en el registro.
    pub fn update_context<F>(&mut self, f: F)
        where F: FnOnce(&mut FlowContext)
    {
        f(&mut self.context);
        if !self.manager.shared.registry.update_context(&self.flow_id, self.context.clone()) {
            log::debug!("El flujo {} ya no está en curso; contexto no publicado", self.flow_id);
        }
    }

    /// Marca el flujo como de solo confirmación.
    pub fn set_confirm_only(&mut self) {
        self.update_context(|c| c.confirm_only = true);
    }

    pub fn set_title_placeholder(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        self.update_context(|c| {
                c.title_placeholders.insert(key, value);
            });
    }
}
