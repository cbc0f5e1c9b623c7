use flow::{CreateEntry, FlowContext, FlowError, FlowHandler, FlowManager, FlowManagerConfig, FlowResult, Form,
           HandlerRegistry, InMemoryTargetRepository, JsonMap, RecordingHooks, StepContext, StepError, StepRouter};
use serde_json::json;
use std::sync::Arc;

/// Asistente de dos pasos: pide el host y luego un nombre.
#[derive(Default)]
struct Printer {
    host: Option<String>,
}

impl Printer {
    async fn step_init(&mut self, ctx: &mut StepContext, input: Option<JsonMap>) -> Result<FlowResult, StepError> {
        let Some(host) = input.as_ref().and_then(|i| i.get("host")).and_then(|h| h.as_str()) else {
            return Ok(Form::new("init").into());
        };
        ctx.set_unique_id(Some(host.into()), true)?;
        self.host = Some(host.to_string());
        Ok(Form::new("name").into())
    }

    async fn step_name(&mut self, _ctx: &mut StepContext, input: Option<JsonMap>) -> Result<FlowResult, StepError> {
        let name = input.as_ref()
                        .and_then(|i| i.get("name"))
                        .and_then(|n| n.as_str())
                        .unwrap_or("Impresora")
                        .to_string();
        let mut data = JsonMap::new();
        data.insert("host".into(), json!(self.host));
        Ok(CreateEntry::new(name, data).into())
    }
}

impl FlowHandler for Printer {
    fn register_steps(router: &mut StepRouter<Self>) {
        router.step("init", |f, ctx, input| Box::pin(f.step_init(ctx, input)))
              .step("name", |f, ctx, input| Box::pin(f.step_name(ctx, input)));
    }
}

#[tokio::main]
async fn main() -> Result<(), FlowError> {
    let handlers = HandlerRegistry::new();
    handlers.register("printer", Printer::default);
    let hooks = Arc::new(RecordingHooks::new());
    let manager = FlowManager::new(Arc::new(handlers),
                                   hooks.clone(),
                                   Arc::new(InMemoryTargetRepository::new()),
                                   FlowManagerConfig::from_env());

    // Arrancar y avanzar un flujo
    let start = manager.init("printer", FlowContext::with_source("user"), None).await?;
    println!("flujo {} en {:?}", start.flow_id, start.result.step_id());
    let next = manager.configure(start.flow_id, Some(json!({"host": "10.0.0.20"}))).await?;
    println!("paso siguiente: {:?}", next.result.step_id());

    // Un segundo flujo para el mismo host aborta
    let dup = manager.init("printer",
                           FlowContext::with_source("user"),
                           Some(json!({"host": "10.0.0.20"}).as_object().cloned().unwrap_or_default()))
                     .await?;
    println!("duplicado: {}", dup.result.kind());

    let done = manager.configure(start.flow_id, Some(json!({"name": "Oficina"}))).await?;
    println!("resultado: {}", serde_json::to_string_pretty(&done).unwrap_or_default());
    println!("entradas recibidas por el hook: {}", hooks.finished().len());
    Ok(())
}
