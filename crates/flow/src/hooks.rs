// Archivo: hooks.rs
// Propósito: contratos con los colaboradores del manager: la fábrica de
// flujos (`FlowFactory`) y los hooks de finalización (`FlowHooks`).
use crate::context::FlowContext;
use crate::errors::Result;
use crate::handler::{DiscoveryDefaults, ErasedFlow};
use crate::manager::FlowManager;
use crate::registry::FlowRecord;
use crate::result::FlowResult;
use crate::schema::JsonMap;
use async_trait::async_trait;

/// Flujo recién creado por una fábrica.
pub struct CreatedFlow {
    pub flow: Box<dyn ErasedFlow>,
    pub init_step: String,
    pub version: u32,
}

impl CreatedFlow {
    /// Toma paso inicial y versión de los declarados por el handler.
    pub fn new(flow: Box<dyn ErasedFlow>) -> Self {
        let init_step = flow.init_step().to_string();
        let version = flow.version();
        Self { flow,
               init_step,
               version }
    }

    pub fn with_init_step(mut self, init_step: impl Into<String>) -> Self {
        self.init_step = init_step.into();
        self
    }

    /// Envuelve el flujo para que responda a `ignore` y `unignore` aunque el
    /// handler no los haya registrado.
    pub fn with_discovery_defaults(mut self) -> Self {
        self.flow = Box::new(DiscoveryDefaults::new(self.flow));
        self
    }
}

/// Crea instancias de flujo para una clave de handler.
///
/// Debe devolver `FlowError::UnknownHandler` si la clave no existe.
#[async_trait]
pub trait FlowFactory: Send + Sync {
    async fn create_flow(&self, handler: &str, context: &FlowContext, data: Option<&JsonMap>) -> Result<CreatedFlow>;
}

/// Hooks que el colaborador ejecuta al terminar o arrancar un flujo.
#[async_trait]
pub trait FlowHooks: Send + Sync {
    /// Recibe un `CreateEntry` ya estampado con versión y contexto. Puede
    /// persistirlo o devolver otro resultado (por ejemplo un formulario para
    /// reintentar); el manager vuelve a mirar el tipo devuelto.
    async fn finish_flow(&self, _manager: &FlowManager, _flow: &FlowRecord, result: FlowResult) -> Result<FlowResult> {
        Ok(result)
    }

    /// Tras un `init` cuyo resultado no es `Abort`.
    async fn post_init(&self, _manager: &FlowManager, _flow: &FlowRecord, _result: &FlowResult) {}
}

/// Hooks que no hacen nada.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl FlowHooks for NoopHooks {}
