// Archivo: manager.rs
// Propósito: `FlowManager`, el orquestador de flujos. Crea instancias vía la
// fábrica, despacha pasos a través del router, valida entradas y
// transiciones, entrega los resultados terminales al hook de finalización y
// mantiene el índice de flujos en curso.
//
// Concurrencia: cada `init` corre en su propia tarea de tokio para que
// `shutdown` pueda cancelar los primeros pasos. Un flujo ya registrado no
// tiene tarea propia: solo vive en el registro hasta el próximo `configure`.
use crate::config::FlowManagerConfig;
use crate::context::{source, FlowContext};
use crate::errors::{FlowError, Result, StepError};
use crate::events::{EventBus, FlowEvent};
use crate::handler::{ErasedFlow, StepContext};
use crate::hooks::{FlowFactory, FlowHooks};
use crate::registry::{FlowCell, FlowRecord, FlowRegistry};
use crate::repository::TargetRepository;
use crate::result::{Abort, FlowResponse, FlowResult, FlowSummary};
use crate::schema::{JsonMap, SchemaError};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::AbortHandle;
use uuid::Uuid;

/// Primer paso en ejecución, cancelable por `shutdown`.
struct InitTask {
    flow_id: Uuid,
    abort: AbortHandle,
    done: watch::Receiver<bool>,
}

/// Limpieza de un `init`, dueña de la tarea que lo ejecuta. Al soltarse
/// (fin normal o cancelación) retira la tarea de `initializing` y marca el
/// primer paso como terminado; si el paso no llegó a completarse, descarta
/// también el flujo oculto.
struct InitGuard {
    manager: FlowManager,
    handler: String,
    flow_id: Uuid,
    done: watch::Sender<bool>,
    completed: bool,
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        if !self.completed && self.manager.shared.registry.remove(&self.flow_id).is_some() {
            log::debug!("Primer paso del flujo {} ({}) cancelado", self.flow_id, self.handler);
        }
        self.manager.untrack_init(&self.handler, &self.flow_id);
        self.done.send_replace(true);
    }
}

/// Cuerpo de la tarea de `init`. El guard viaja dentro del futuro: si la
/// tarea se cancela antes de arrancar, soltarlo limpia igual.
async fn run_init_task(mut guard: InitGuard, context: FlowContext, data: Option<JsonMap>) -> Result<FlowResponse> {
    let manager = guard.manager.clone();
    let outcome = manager.run_init(guard.flow_id, guard.handler.clone(), context, data, &guard.done)
                         .await;
    guard.completed = true;
    let (record, result) = outcome?;

    if !matches!(result, FlowResult::Abort(_)) {
        manager.shared.hooks.post_init(&manager, &record, &result).await;
    }
    Ok(FlowResponse::new(record.flow_id, record.handler, result, record.context.show_advanced_options))
}

pub(crate) struct Shared {
    factory: Arc<dyn FlowFactory>,
    hooks: Arc<dyn FlowHooks>,
    pub(crate) targets: Arc<dyn TargetRepository>,
    pub(crate) registry: FlowRegistry,
    initializing: Mutex<HashMap<String, Vec<InitTask>>>,
    events: EventBus,
}

/// Orquestador de flujos. Clonarlo es barato: todas las copias comparten el
/// mismo registro.
#[derive(Clone)]
pub struct FlowManager {
    pub(crate) shared: Arc<Shared>,
}

impl FlowManager {
    pub fn new(factory: Arc<dyn FlowFactory>,
               hooks: Arc<dyn FlowHooks>,
               targets: Arc<dyn TargetRepository>,
               config: FlowManagerConfig)
               -> Self {
        let shared = Shared { factory,
                              hooks,
                              targets,
                              registry: FlowRegistry::default(),
                              initializing: Mutex::new(HashMap::new()),
                              events: EventBus::new(config.event_capacity) };
        Self { shared: Arc::new(shared) }
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.shared.events.subscribe()
    }

    /// Arranca un flujo de `handler` y ejecuta su paso inicial con `data`.
    ///
    /// El flujo se registra oculto antes del primer paso (visible solo con
    /// `include_uninitialized`). Si `shutdown` cancela ese paso, el flujo se
    /// descarta y se devuelve `FlowError::Cancelled`.
    ///
    /// El trabajo corre en su propia tarea: si quien llama abandona el
    /// futuro, el primer paso y `post_init` terminan igual.
    pub async fn init(&self, handler: &str, context: FlowContext, data: Option<JsonMap>) -> Result<FlowResponse> {
        let flow_id = Uuid::new_v4();
        let (done_tx, done_rx) = watch::channel(false);
        let guard = InitGuard { manager: self.clone(),
                                handler: handler.to_string(),
                                flow_id,
                                done: done_tx,
                                completed: false };

        // spawn y alta bajo el mismo candado: `shutdown` ve la tarea o llega
        // antes de que exista, y la limpieza de la tarea espera al alta
        let task = {
            let mut initializing = self.shared.initializing.lock().unwrap_or_else(|e| e.into_inner());
            let task = tokio::spawn(run_init_task(guard, context, data));
            initializing.entry(handler.to_string())
                        .or_default()
                        .push(InitTask { flow_id,
                                         abort: task.abort_handle(),
                                         done: done_rx });
            task
        };

        match task.await {
            Ok(res) => res,
            Err(err) if err.is_cancelled() => Err(FlowError::Cancelled(handler.to_string())),
            Err(err) => std::panic::resume_unwind(err.into_panic()),
        }
    }

    async fn run_init(&self,
                      flow_id: Uuid,
                      handler: String,
                      context: FlowContext,
                      data: Option<JsonMap>,
                      done: &watch::Sender<bool>)
                      -> Result<(FlowRecord, FlowResult)> {
        let created = self.shared.factory.create_flow(&handler, &context, data.as_ref()).await?;

        if context.source() == Some(source::USER) {
            self.abort_default_discovery_flows(&handler, None);
        }

        let record = FlowRecord { flow_id,
                                  handler,
                                  context,
                                  cur_step: None,
                                  init_step: created.init_step,
                                  init_data: data.clone(),
                                  version: created.version };
        let cell: FlowCell = Arc::new(AsyncMutex::new(created.flow));
        self.shared.registry.insert(record.clone(), cell.clone());
        log::debug!("Flujo {} de {} iniciado en el paso {}", flow_id, record.handler, record.init_step);

        let mut flow = cell.lock().await;
        let result = self.handle_step(&record, &mut **flow, &record.init_step, data, None, Some(done))
                         .await?;
        // el contexto pudo cambiar durante el paso
        let record = self.shared.registry.record(&flow_id).unwrap_or(record);
        Ok((record, result))
    }

    /// Continúa el flujo `flow_id` con la entrada del usuario.
    ///
    /// La entrada se valida contra el esquema del paso actual; si es
    /// inválida el flujo sigue en el mismo paso y se devuelve
    /// `FlowError::InvalidInput`. En un menú la entrada elige el próximo
    /// paso. Tras un `*Done` el paso indicado se ejecuta sin entrada.
    pub async fn configure(&self, flow_id: Uuid, input: Option<JsonValue>) -> Result<FlowResponse> {
        let cell = self.shared.registry.cell(&flow_id).ok_or(FlowError::UnknownFlow(flow_id))?;
        let mut flow = cell.lock().await;

        let record = self.shared.registry.record(&flow_id).ok_or(FlowError::UnknownFlow(flow_id))?;
        let cur_step = record.cur_step.clone().ok_or(FlowError::UnknownFlow(flow_id))?;

        let input = match (&cur_step, cur_step.data_schema(), input) {
            (_, _, None) => None,
            // un menú sin elección vuelve a mostrarse
            (FlowResult::Menu(_), _, Some(JsonValue::Object(map))) if map.is_empty() => None,
            (_, Some(schema), Some(value)) => Some(schema.validate(&value)?),
            (_, None, Some(JsonValue::Object(map))) => Some(map),
            (_, None, Some(_)) => return Err(SchemaError::NotAnObject.into()),
        };

        let (step_id, input) = match (&cur_step, input) {
            (FlowResult::Menu(_), Some(choice)) => {
                let next = choice.get("next_step_id")
                                 .and_then(JsonValue::as_str)
                                 .ok_or_else(|| SchemaError::MissingKey("next_step_id".into()))?;
                (next.to_string(), None)
            }
            (FlowResult::ExternalStepDone(_) | FlowResult::ShowProgressDone(_), _) => {
                (cur_step.step_id().unwrap_or(&record.init_step).to_string(), None)
            }
            (_, input) => (cur_step.step_id().unwrap_or(&record.init_step).to_string(), input),
        };

        let result = self.handle_step(&record, &mut **flow, &step_id, input, Some(&cur_step), None)
                         .await?;

        if matches!(cur_step, FlowResult::ExternalStep(_) | FlowResult::ShowProgress(_))
           && (cur_step.step_id() != result.step_id() || matches!(result, FlowResult::ShowProgress(_)))
        {
            self.shared.events.publish(FlowEvent::Progressed { handler: record.handler.clone(),
                                                               flow_id,
                                                               refresh: true });
        }

        Ok(FlowResponse::new(flow_id, record.handler, result, record.context.show_advanced_options))
    }

    /// Retira el flujo del registro y ejecuta su hook de eliminación. Los
    /// errores del hook se registran y no se propagan.
    pub fn abort(&self, flow_id: Uuid) -> Result<()> {
        let (record, cell) = self.shared.registry.remove(&flow_id).ok_or(FlowError::UnknownFlow(flow_id))?;
        log::debug!("Flujo {} de {} abortado", flow_id, record.handler);
        match cell.clone().try_lock_owned() {
            Ok(mut flow) => run_remove_hook(&record.handler, &mut **flow),
            // un paso está corriendo: el hook espera a que termine
            Err(_) => match tokio::runtime::Handle::try_current() {
                Ok(rt) => {
                    rt.spawn(async move {
                          let mut flow = cell.lock_owned().await;
                          run_remove_hook(&record.handler, &mut **flow);
                      });
                }
                Err(_) => log::warn!("Sin runtime para el hook de eliminación de {}", record.handler),
            },
        }
        Ok(())
    }

    /// Proyección de un flujo observable.
    pub fn get(&self, flow_id: Uuid) -> Result<FlowSummary> {
        self.shared
            .registry
            .record(&flow_id)
            .filter(FlowRecord::is_initialized)
            .map(|r| r.summary())
            .ok_or(FlowError::UnknownFlow(flow_id))
    }

    /// Flujos en curso. Sin `include_uninitialized` se omiten los que no
    /// terminaron su primer paso.
    pub fn progress(&self, include_uninitialized: bool) -> Vec<FlowSummary> {
        summaries(self.shared.registry.records(), include_uninitialized)
    }

    pub fn progress_by_handler(&self, handler: &str, include_uninitialized: bool) -> Vec<FlowSummary> {
        summaries(self.shared.registry.records_by_handler(handler), include_uninitialized)
    }

    /// True si hay un flujo de `handler` cuyo contexto contiene a `context`
    /// (ver `FlowContext::matches`) y con los mismos datos de arranque.
    pub fn has_matching_flow(&self, handler: &str, context: &FlowContext, data: Option<&JsonMap>) -> bool {
        self.shared
            .registry
            .records_by_handler(handler)
            .iter()
            .any(|r| r.context.matches(context) && r.init_data.as_ref() == data)
    }

    /// Cancela los primeros pasos en ejecución y espera a que se detengan.
    /// Los flujos ya registrados y en espera no se tocan.
    pub async fn shutdown(&self) {
        let pending: Vec<watch::Receiver<bool>> = {
            let initializing = self.shared.initializing.lock().unwrap_or_else(|e| e.into_inner());
            // `abort` solo agenda la cancelación: el guard de cada tarea se
            // suelta después, ya sin este candado
            initializing.values()
                        .flatten()
                        .map(|t| {
                            t.abort.abort();
                            t.done.clone()
                        })
                        .collect()
        };
        log::debug!("Cancelando {} inicializaciones de flujo", pending.len());
        wait_all(pending).await;
    }

    /// Espera a que terminen los primeros pasos en curso de `handler`.
    pub async fn wait_init_flow_finish(&self, handler: &str) {
        let pending: Vec<watch::Receiver<bool>> = {
            let initializing = self.shared.initializing.lock().unwrap_or_else(|e| e.into_inner());
            initializing.get(handler)
                        .map(|tasks| tasks.iter().map(|t| t.done.clone()).collect())
                        .unwrap_or_default()
        };
        wait_all(pending).await;
    }

    /// Flujos de `handler` cuyo primer paso sigue en ejecución.
    pub fn initializing(&self, handler: &str) -> Vec<Uuid> {
        let initializing = self.shared.initializing.lock().unwrap_or_else(|e| e.into_inner());
        initializing.get(handler)
                    .map(|tasks| tasks.iter().map(|t| t.flow_id).collect())
                    .unwrap_or_default()
    }

    fn untrack_init(&self, handler: &str, flow_id: &Uuid) {
        let mut initializing = self.shared.initializing.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tasks) = initializing.get_mut(handler) {
            tasks.retain(|t| &t.flow_id != flow_id);
            if tasks.is_empty() {
                initializing.remove(handler);
            }
        }
    }

    /// Ejecuta `step_id` sobre el flujo y aplica la máquina de estados.
    ///
    /// `prev` es el paso actual cuando se viene de `configure`: las
    /// transiciones desde un paso externo o de progreso se validan antes de
    /// confirmar nada. `done` se marca en cuanto el paso devuelve, antes del
    /// hook de finalización.
    async fn handle_step(&self,
                         record: &FlowRecord,
                         flow: &mut dyn ErasedFlow,
                         step_id: &str,
                         input: Option<JsonMap>,
                         prev: Option<&FlowResult>,
                         done: Option<&watch::Sender<bool>>)
                         -> Result<FlowResult> {
        let flow_id = record.flow_id;
        let unknown_step = || FlowError::UnknownStep { handler: record.handler.clone(),
                                                       step_id: step_id.to_string() };
        if !flow.has_step(step_id) {
            log::warn!("El handler {} no soporta el paso {}; se descarta el flujo {}",
                       record.handler,
                       step_id,
                       flow_id);
            mark_done(done);
            self.finish_removal(record, flow);
            return Err(unknown_step());
        }

        let mut ctx = StepContext::new(record, self.clone());
        let outcome = match flow.run_step(step_id, &mut ctx, input) {
            Some(step) => step.await,
            None => {
                mark_done(done);
                self.shared.registry.remove(&flow_id);
                return Err(unknown_step());
            }
        };
        mark_done(done);

        let result = match outcome {
            Ok(result) => result,
            Err(StepError::Abort(abort)) => Abort::from(abort).into(),
            Err(StepError::Failed(source)) => {
                self.finish_removal(record, flow);
                return Err(FlowError::StepFailed { handler: record.handler.clone(),
                                                   step_id: step_id.to_string(),
                                                   source });
            }
        };

        if let Some(prev) = prev {
            check_transition(prev, &result)?;
        }

        if !result.is_terminal() {
            self.shared.registry.set_cur_step(&flow_id, result.clone());
            return Ok(result);
        }

        let result = match result {
            FlowResult::CreateEntry(mut entry) => {
                let mut finished = record.clone();
                finished.context = ctx.context.clone();
                entry.version = record.version;
                entry.context = Some(finished.context.clone());
                match self.shared.hooks.finish_flow(self, &finished, entry.into()).await {
                    Ok(result) => result,
                    Err(err) => {
                        self.finish_removal(record, flow);
                        return Err(err);
                    }
                }
            }
            other => other,
        };

        if !result.is_terminal() {
            self.shared.registry.set_cur_step(&flow_id, result.clone());
            return Ok(result);
        }

        self.finish_removal(record, flow);
        log::debug!("Flujo {} de {} terminado con {}", flow_id, record.handler, result.kind());
        Ok(result)
    }

    /// Retira un flujo cuyo paso controlamos. Si otro lo abortó antes, ese
    /// aborto ya se ocupa del hook.
    fn finish_removal(&self, record: &FlowRecord, flow: &mut dyn ErasedFlow) {
        if self.shared.registry.remove(&record.flow_id).is_some() {
            run_remove_hook(&record.handler, flow);
        }
    }
}

fn run_remove_hook(handler: &str, flow: &mut dyn ErasedFlow) {
    if let Err(err) = flow.on_remove() {
        log::error!("Error al eliminar el flujo de {}: {}", handler, err);
    }
}

fn mark_done(done: Option<&watch::Sender<bool>>) {
    if let Some(done) = done {
        done.send_replace(true);
    }
}

async fn wait_all(pending: Vec<watch::Receiver<bool>>) {
    for mut rx in pending {
        // un emisor cerrado también cuenta como terminado
        let _ = rx.wait_for(|done| *done).await;
    }
}

fn summaries(records: Vec<FlowRecord>, include_uninitialized: bool) -> Vec<FlowSummary> {
    records.into_iter()
           .filter(|r| include_uninitialized || r.is_initialized())
           .map(|r| r.summary())
           .collect()
}

/// Un paso externo solo puede seguir a otro externo o a su `*Done`; igual
/// para un paso de progreso.
fn check_transition(prev: &FlowResult, next: &FlowResult) -> Result<()> {
    let (ok, allowed) = match prev {
        FlowResult::ExternalStep(_) => {
            (matches!(next, FlowResult::ExternalStep(_) | FlowResult::ExternalStepDone(_)), "external, external_done")
        }
        FlowResult::ShowProgress(_) => {
            (matches!(next, FlowResult::ShowProgress(_) | FlowResult::ShowProgressDone(_)), "progress, progress_done")
        }
        _ => return Ok(()),
    };
    if ok {
        return Ok(());
    }
    Err(FlowError::InvalidTransition { from: prev.kind(),
                                       allowed,
                                       to: next.kind() })
}
