// Archivo: demo.rs
// Propósito: integraciones de demostración para la consola `hubflow`.
//
// - `lamp`: alta manual con formulario validado, descubrimiento por
//   zeroconf con deduplicación, ignorar/designorar y flujo de opciones.
// - `cloud`: menú que elige entre cuenta en la nube (paso externo OAuth) y
//   token manual.
use async_trait::async_trait;
use flow::{source, AbortFlow, BoxError, CreateEntry, DataSchema, ExternalStep, ExternalStepDone, Field, FieldKind,
           FlowHandler, FlowResult, Form, HandlerRegistry, JsonMap, Menu, StepContext, StepError, StepRouter};
use hub_entries::{ConfigEntry, EntryLifecycle, OptionsHandlers, SetupFailure};
use serde_json::{json, Value as JsonValue};

fn text<'a>(input: &'a JsonMap, key: &str) -> Option<&'a str> {
    input.get(key).and_then(JsonValue::as_str)
}

/// Lámpara de red.
#[derive(Default)]
pub struct Lamp {
    discovered_host: Option<String>,
}

impl Lamp {
    fn user_schema() -> DataSchema {
        DataSchema::new().field(Field::required("host", FieldKind::String))
                         .field(Field::optional("name", FieldKind::String).default_value(json!("Lámpara")))
                         .field(Field::optional("port", FieldKind::Integer).default_value(json!(80)).advanced())
    }

    async fn step_user(&mut self, ctx: &mut StepContext, input: Option<JsonMap>) -> Result<FlowResult, StepError> {
        let Some(input) = input else {
            return Ok(Form::new("user").schema(Self::user_schema()).into());
        };
        let host = text(&input, "host").unwrap_or_default();
        if host.is_empty() {
            let schema = Self::user_schema().with_suggested_values(&input);
            return Ok(Form::new("user").schema(schema).error("host", "invalid_host").into());
        }
        ctx.set_unique_id(Some(host.into()), true)?;
        ctx.abort_if_unique_id_configured(None, false)?;
        let title = text(&input, "name").unwrap_or("Lámpara").to_string();
        Ok(CreateEntry::new(title, input).into())
    }

    async fn step_zeroconf(&mut self, ctx: &mut StepContext, input: Option<JsonMap>) -> Result<FlowResult, StepError> {
        let input = input.unwrap_or_default();
        let Some(host) = text(&input, "host").map(str::to_string) else {
            return Err(AbortFlow::new("invalid_discovery_info").into());
        };
        let serial = text(&input, "serial").unwrap_or(&host).to_string();
        ctx.set_unique_id(Some(serial.into()), true)?;
        let mut updates = JsonMap::new();
        updates.insert("host".into(), JsonValue::String(host.clone()));
        ctx.abort_if_unique_id_configured(Some(&updates), true)?;
        ctx.set_title_placeholder("host", host.clone());
        self.discovered_host = Some(host);
        Ok(Form::new("confirm").into())
    }

    async fn step_confirm(&mut self, _ctx: &mut StepContext, _input: Option<JsonMap>) -> Result<FlowResult, StepError> {
        let host = self.discovered_host.clone().unwrap_or_default();
        let mut data = JsonMap::new();
        data.insert("host".into(), JsonValue::String(host.clone()));
        Ok(CreateEntry::new(format!("Lámpara {}", host), data).into())
    }

    async fn step_unignore(&mut self, ctx: &mut StepContext, input: Option<JsonMap>) -> Result<FlowResult, StepError> {
        let input = input.unwrap_or_default();
        let Some(uid) = text(&input, "unique_id").map(str::to_string) else {
            return Err(AbortFlow::new("no_unique_id").into());
        };
        ctx.set_unique_id(Some(uid.clone().into()), true)?;
        ctx.abort_if_unique_id_configured(None, false)?;
        self.discovered_host = Some(uid);
        Ok(Form::new("confirm").into())
    }
}

impl FlowHandler for Lamp {
    fn register_steps(router: &mut StepRouter<Self>) {
        router.step(source::USER, |f, ctx, input| Box::pin(f.step_user(ctx, input)))
              .step(source::ZEROCONF, |f, ctx, input| Box::pin(f.step_zeroconf(ctx, input)))
              .step("confirm", |f, ctx, input| Box::pin(f.step_confirm(ctx, input)))
              .step(source::UNIGNORE, |f, ctx, input| Box::pin(f.step_unignore(ctx, input)));
    }
}

/// Opciones de la lámpara: intervalo de sondeo.
pub struct LampOptions {
    poll_interval: i64,
}

impl LampOptions {
    pub fn for_entry(entry: &ConfigEntry) -> Self {
        let poll_interval = entry.options.get("poll_interval").and_then(JsonValue::as_i64).unwrap_or(30);
        Self { poll_interval }
    }

    async fn step_init(&mut self, _ctx: &mut StepContext, input: Option<JsonMap>) -> Result<FlowResult, StepError> {
        match input {
            Some(options) => Ok(CreateEntry::new("", options).into()),
            None => {
                let schema = DataSchema::new().field(Field::optional("poll_interval", FieldKind::Integer)
                                                                .default_value(json!(self.poll_interval)));
                Ok(Form::new("init").schema(schema).into())
            }
        }
    }
}

impl FlowHandler for LampOptions {
    fn register_steps(router: &mut StepRouter<Self>) {
        router.step("init", |f, ctx, input| Box::pin(f.step_init(ctx, input)));
    }
}

/// Servicio en la nube con autorización externa.
#[derive(Default)]
pub struct Cloud {
    token: Option<String>,
}

impl Cloud {
    async fn step_user(&mut self, _ctx: &mut StepContext, _input: Option<JsonMap>) -> Result<FlowResult, StepError> {
        Ok(Menu::new("user", ["oauth", "token"]).into())
    }

    async fn step_oauth(&mut self, ctx: &mut StepContext, input: Option<JsonMap>) -> Result<FlowResult, StepError> {
        let code = input.as_ref().and_then(|i| text(i, "code")).map(str::to_string);
        match code {
            None => {
                let url = format!("https://auth.example/authorize?state={}", ctx.flow_id());
                Ok(ExternalStep::new("oauth", url).into())
            }
            Some(code) => {
                self.token = Some(code);
                Ok(ExternalStepDone::new("finish").into())
            }
        }
    }

    async fn step_token(&mut self, ctx: &mut StepContext, input: Option<JsonMap>) -> Result<FlowResult, StepError> {
        let Some(input) = input else {
            let schema = DataSchema::new().field(Field::required("token", FieldKind::String));
            return Ok(Form::new("token").schema(schema).last_step(true).into());
        };
        self.token = text(&input, "token").map(str::to_string);
        self.step_finish(ctx, None).await
    }

    async fn step_finish(&mut self, ctx: &mut StepContext, _input: Option<JsonMap>) -> Result<FlowResult, StepError> {
        let Some(token) = self.token.take() else {
            return Err(AbortFlow::new("missing_token").into());
        };
        ctx.set_unique_id(Some("cloud-account".into()), true)?;
        ctx.abort_if_unique_id_configured(None, false)?;
        let mut data = JsonMap::new();
        data.insert("token".into(), JsonValue::String(token));
        Ok(CreateEntry::new("Cuenta en la nube", data).into())
    }
}

impl FlowHandler for Cloud {
    fn register_steps(router: &mut StepRouter<Self>) {
        router.step(source::USER, |f, ctx, input| Box::pin(f.step_user(ctx, input)))
              .step("oauth", |f, ctx, input| Box::pin(f.step_oauth(ctx, input)))
              .step("token", |f, ctx, input| Box::pin(f.step_token(ctx, input)))
              .step("finish", |f, ctx, input| Box::pin(f.step_finish(ctx, input)));
    }
}

/// Ciclo de vida que solo deja rastro en el log.
pub struct LoggingLifecycle;

#[async_trait]
impl EntryLifecycle for LoggingLifecycle {
    async fn setup(&self, entry: &ConfigEntry) -> Result<(), SetupFailure> {
        tracing::info!(domain = %entry.domain, entry_id = %entry.entry_id, "Entrada levantada");
        Ok(())
    }

    async fn unload(&self, entry: &ConfigEntry) -> Result<(), BoxError> {
        tracing::info!(domain = %entry.domain, entry_id = %entry.entry_id, "Entrada descargada");
        Ok(())
    }
}

pub fn handlers() -> HandlerRegistry {
    let handlers = HandlerRegistry::new();
    handlers.register("lamp", Lamp::default).register("cloud", Cloud::default);
    handlers
}

pub fn options() -> OptionsHandlers {
    let options = OptionsHandlers::new();
    options.register("lamp", LampOptions::for_entry);
    options
}
