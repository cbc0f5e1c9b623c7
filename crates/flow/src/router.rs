// Archivo: router.rs
// Propósito: `StepRouter`, la tabla explícita id de paso → callback de un
// tipo de handler. Sustituye la búsqueda por convención de nombres: un id
// ausente se detecta al despachar y el manager descarta el flujo.
use crate::context::{source, UniqueId};
use crate::errors::{AbortFlow, StepError};
use crate::handler::{FlowHandler, StepContext};
use crate::result::{CreateEntry, FlowResult};
use crate::schema::JsonMap;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Futuro de un paso: toma prestado el handler y su contexto.
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<FlowResult, StepError>> + Send + 'a>>;

/// Callback de un paso. Se registra normalmente como closure sin capturas:
///
/// ```ignore
/// router.step("user", |flow, ctx, input| Box::pin(flow.step_user(ctx, input)));
/// ```
pub type StepFn<H> = for<'a> fn(&'a mut H, &'a mut StepContext, Option<JsonMap>) -> StepFuture<'a>;

pub struct StepRouter<H> {
    steps: HashMap<String, StepFn<H>>,
}

impl<H> Default for StepRouter<H> {
    fn default() -> Self {
        Self { steps: HashMap::new() }
    }
}

impl<H> StepRouter<H> where H: FlowHandler
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Router completo de `H`, tal como lo declara `register_steps`.
    pub fn build() -> Self {
        let mut router = Self::new();
        H::register_steps(&mut router);
        router
    }

    /// Registra (o reemplaza) el callback de `step_id`.
    pub fn step(&mut self, step_id: impl Into<String>, f: StepFn<H>) -> &mut Self {
        self.steps.insert(step_id.into(), f);
        self
    }

    pub fn get(&self, step_id: &str) -> Option<StepFn<H>> {
        self.steps.get(step_id).copied()
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.steps.contains_key(step_id)
    }

    /// Añade los pseudo-pasos `ignore` y `unignore` si el handler no los
    /// declaró.
    pub fn with_discovery_defaults(&mut self) -> &mut Self {
        if !self.contains(source::IGNORE) {
            self.step(source::IGNORE, ignore_step::<H>);
        }
        if !self.contains(source::UNIGNORE) {
            self.step(source::UNIGNORE, unignore_step::<H>);
        }
        self
    }
}

fn ignore_step<'a, H>(_flow: &'a mut H, ctx: &'a mut StepContext, input: Option<JsonMap>) -> StepFuture<'a> {
    ignore(ctx, input)
}

fn unignore_step<'a, H>(_flow: &'a mut H, _ctx: &'a mut StepContext, _input: Option<JsonMap>) -> StepFuture<'a> {
    unignore()
}

/// Completa el flujo como ignorado para `input.unique_id`, sin pasos.
pub(crate) fn ignore(ctx: &mut StepContext, input: Option<JsonMap>) -> StepFuture<'_> {
    Box::pin(async move {
        let input = input.unwrap_or_default();
        let unique_id = match input.get("unique_id") {
            Some(raw) => Some(serde_json::from_value::<UniqueId>(raw.clone()).map_err(StepError::failed)?),
            None => None,
        };
        ctx.set_unique_id(unique_id, false)?;
        let title = input.get("title")
                         .and_then(|t| t.as_str())
                         .unwrap_or(ctx.handler())
                         .to_string();
        Ok(CreateEntry::new(title, JsonMap::new()).into())
    })
}

/// Sin redescubrimiento propio, designorar aborta.
pub(crate) fn unignore<'a>() -> StepFuture<'a> {
    Box::pin(async move { Err(AbortFlow::new("not_implemented").into()) })
}
