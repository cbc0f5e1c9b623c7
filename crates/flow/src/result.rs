// Archivo: result.rs
// Propósito: `FlowResult`, la unión cerrada de resultados de un paso, sus
// constructores y las proyecciones hacia la capa de presentación
// (`FlowResponse`, `FlowSummary`).
use crate::context::FlowContext;
use crate::schema::{DataSchema, Field, FieldKind, JsonMap};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use uuid::Uuid;

pub type Placeholders = BTreeMap<String, String>;

/// Resultado de un paso. `CreateEntry` y `Abort` son terminales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    Form(Form),
    Menu(Menu),
    #[serde(rename = "external")]
    ExternalStep(ExternalStep),
    #[serde(rename = "external_done")]
    ExternalStepDone(ExternalStepDone),
    #[serde(rename = "progress")]
    ShowProgress(ShowProgress),
    #[serde(rename = "progress_done")]
    ShowProgressDone(ShowProgressDone),
    CreateEntry(CreateEntry),
    Abort(Abort),
}

impl FlowResult {
    /// Etiqueta del tipo, igual a la serializada en `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowResult::Form(_) => "form",
            FlowResult::Menu(_) => "menu",
            FlowResult::ExternalStep(_) => "external",
            FlowResult::ExternalStepDone(_) => "external_done",
            FlowResult::ShowProgress(_) => "progress",
            FlowResult::ShowProgressDone(_) => "progress_done",
            FlowResult::CreateEntry(_) => "create_entry",
            FlowResult::Abort(_) => "abort",
        }
    }

    /// Id del paso que este resultado deja como actual. Para los `*Done` es
    /// el `next_step_id`.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            FlowResult::Form(r) => Some(&r.step_id),
            FlowResult::Menu(r) => Some(&r.step_id),
            FlowResult::ExternalStep(r) => Some(&r.step_id),
            FlowResult::ExternalStepDone(r) => Some(&r.next_step_id),
            FlowResult::ShowProgress(r) => Some(&r.step_id),
            FlowResult::ShowProgressDone(r) => Some(&r.next_step_id),
            FlowResult::CreateEntry(_) | FlowResult::Abort(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowResult::CreateEntry(_) | FlowResult::Abort(_))
    }

    /// Esquema contra el que se valida la próxima entrada. Un menú se valida
    /// como una selección de `next_step_id`.
    pub fn data_schema(&self) -> Option<DataSchema> {
        match self {
            FlowResult::Form(r) => r.data_schema.clone(),
            FlowResult::Menu(r) => {
                Some(DataSchema::new().field(Field::required("next_step_id",
                                                             FieldKind::Select { options: r.menu_options.ids() })))
            }
            _ => None,
        }
    }
}

/// Formulario a completar por el usuario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_schema: Option<DataSchema>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_placeholders: Option<Placeholders>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_step: Option<bool>,
}

impl Form {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self { step_id: step_id.into(),
               data_schema: None,
               errors: BTreeMap::new(),
               description_placeholders: None,
               last_step: None }
    }

    pub fn schema(mut self, schema: DataSchema) -> Self {
        self.data_schema = Some(schema);
        self
    }

    pub fn error(mut self, field: impl Into<String>, code: impl Into<String>) -> Self {
        self.errors.insert(field.into(), code.into());
        self
    }

    pub fn placeholders(mut self, placeholders: Placeholders) -> Self {
        self.description_placeholders = Some(placeholders);
        self
    }

    pub fn last_step(mut self, last: bool) -> Self {
        self.last_step = Some(last);
        self
    }
}

/// Opciones de un menú: lista simple o pares id → etiqueta, en orden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MenuOptions {
    List(Vec<String>),
    Labelled(IndexMap<String, String>),
}

impl MenuOptions {
    pub fn ids(&self) -> Vec<String> {
        match self {
            MenuOptions::List(ids) => ids.clone(),
            MenuOptions::Labelled(map) => map.keys().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Menu {
    pub step_id: String,
    pub menu_options: MenuOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_placeholders: Option<Placeholders>,
}

impl Menu {
    pub fn new<I, S>(step_id: impl Into<String>, options: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        Self { step_id: step_id.into(),
               menu_options: MenuOptions::List(options.into_iter().map(Into::into).collect()),
               description_placeholders: None }
    }

    pub fn labelled(step_id: impl Into<String>, options: IndexMap<String, String>) -> Self {
        Self { step_id: step_id.into(),
               menu_options: MenuOptions::Labelled(options),
               description_placeholders: None }
    }
}

/// Redirección a un tramo externo (por ejemplo OAuth).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalStep {
    pub step_id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_placeholders: Option<Placeholders>,
}

impl ExternalStep {
    pub fn new(step_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self { step_id: step_id.into(),
               url: url.into(),
               description_placeholders: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalStepDone {
    #[serde(rename = "step_id")]
    pub next_step_id: String,
}

impl ExternalStepDone {
    pub fn new(next_step_id: impl Into<String>) -> Self {
        Self { next_step_id: next_step_id.into() }
    }
}

/// Trabajo en segundo plano sin entrada del usuario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowProgress {
    pub step_id: String,
    pub progress_action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_placeholders: Option<Placeholders>,
}

impl ShowProgress {
    pub fn new(step_id: impl Into<String>, progress_action: impl Into<String>) -> Self {
        Self { step_id: step_id.into(),
               progress_action: progress_action.into(),
               description_placeholders: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowProgressDone {
    #[serde(rename = "step_id")]
    pub next_step_id: String,
}

impl ShowProgressDone {
    pub fn new(next_step_id: impl Into<String>) -> Self {
        Self { next_step_id: next_step_id.into() }
    }
}

/// Resultado terminal con datos a persistir. `version` y `context` los
/// completa el manager antes del hook de finalización; `result` lo rellena
/// el hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEntry {
    #[serde(default)]
    pub version: u32,
    pub title: String,
    pub data: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_placeholders: Option<Placeholders>,
    #[serde(default)]
    pub options: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<FlowContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
}

impl CreateEntry {
    pub fn new(title: impl Into<String>, data: JsonMap) -> Self {
        Self { version: 1,
               title: title.into(),
               data,
               description: None,
               description_placeholders: None,
               options: JsonMap::new(),
               context: None,
               result: None }
    }

    pub fn options(mut self, options: JsonMap) -> Self {
        self.options = options;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Abort {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_placeholders: Option<Placeholders>,
}

impl Abort {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into(),
               description_placeholders: None }
    }
}

impl From<crate::errors::AbortFlow> for Abort {
    fn from(err: crate::errors::AbortFlow) -> Self {
        Self { reason: err.reason,
               description_placeholders: err.description_placeholders }
    }
}

macro_rules! into_flow_result {
    ($($variant:ident),*) => {
        $(impl From<$variant> for FlowResult {
            fn from(r: $variant) -> Self {
                FlowResult::$variant(r)
            }
        })*
    };
}

into_flow_result!(Form, Menu, ExternalStep, ExternalStepDone, ShowProgress, ShowProgressDone, CreateEntry, Abort);

/// Carga útil hacia la presentación: resultado más identidad del flujo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowResponse {
    pub flow_id: Uuid,
    pub handler: String,
    #[serde(flatten)]
    pub result: FlowResult,
}

impl FlowResponse {
    /// Construye la respuesta ocultando campos avanzados de un formulario
    /// cuando el contexto no los pide.
    pub fn new(flow_id: Uuid, handler: impl Into<String>, result: FlowResult, show_advanced: bool) -> Self {
        let result = match result {
            FlowResult::Form(mut form) => {
                form.data_schema = form.data_schema.map(|s| s.for_display(show_advanced));
                FlowResult::Form(form)
            }
            other => other,
        };
        Self { flow_id,
               handler: handler.into(),
               result }
    }
}

/// Proyección reducida de un flujo en curso.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub flow_id: Uuid,
    pub handler: String,
    pub context: FlowContext,
    pub step_id: Option<String>,
}
