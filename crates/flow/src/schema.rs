// Archivo: schema.rs
// Propósito: esquema mínimo de entrada de un paso (`DataSchema`) y su
// validación. La renderización del formulario queda fuera del crate: aquí
// solo se comprueba forma y tipos y se completan valores por defecto.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Objeto JSON validado que recibe un paso.
pub type JsonMap = Map<String, JsonValue>;

/// Errores de validación de entrada.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("se esperaba un objeto JSON")]
    NotAnObject,
    #[error("clave no permitida: {0}")]
    UnknownKey(String),
    #[error("falta la clave requerida: {0}")]
    MissingKey(String),
    #[error("tipo inválido para {key}: se esperaba {expected}")]
    InvalidType { key: String, expected: &'static str },
    #[error("valor no permitido para {key}: {value}")]
    InvalidOption { key: String, value: String },
}

/// Tipo de un campo del esquema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Select { options: Vec<String> },
    Any,
}

impl FieldKind {
    fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Select { .. } => "select",
            FieldKind::Any => "any",
        }
    }

    fn accepts(&self, value: &JsonValue) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Select { options } => value.as_str().is_some_and(|v| options.iter().any(|o| o == v)),
            FieldKind::Any => true,
        }
    }
}

/// Campo de un `DataSchema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub key: String,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_value: Option<JsonValue>,
    /// Solo visible con `show_advanced_options`.
    #[serde(default)]
    pub advanced: bool,
}

impl Field {
    pub fn required(key: impl Into<String>, kind: FieldKind) -> Self {
        Self { key: key.into(),
               kind,
               required: true,
               default: None,
               suggested_value: None,
               advanced: false }
    }

    pub fn optional(key: impl Into<String>, kind: FieldKind) -> Self {
        Self { required: false,
               ..Self::required(key, kind) }
    }

    pub fn default_value(mut self, value: JsonValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn advanced(mut self) -> Self {
        self.advanced = true;
        self
    }
}

/// Esquema ordenado de entrada de un paso.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSchema {
    pub fields: Vec<Field>,
}

impl DataSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Valida `input` contra el esquema.
    ///
    /// Rechaza claves desconocidas, exige las requeridas (salvo que tengan
    /// `default`), comprueba tipos y devuelve el objeto con los valores por
    /// defecto aplicados.
    pub fn validate(&self, input: &JsonValue) -> Result<JsonMap, SchemaError> {
        let obj = input.as_object().ok_or(SchemaError::NotAnObject)?;
        if let Some(extra) = obj.keys().find(|k| self.get(k).is_none()) {
            return Err(SchemaError::UnknownKey(extra.clone()));
        }

        let mut out = JsonMap::new();
        for field in &self.fields {
            match obj.get(&field.key) {
                Some(value) => {
                    if !field.kind.accepts(value) {
                        if let (FieldKind::Select { .. }, Some(v)) = (&field.kind, value.as_str()) {
                            return Err(SchemaError::InvalidOption { key: field.key.clone(),
                                                                    value: v.to_string() });
                        }
                        return Err(SchemaError::InvalidType { key: field.key.clone(),
                                                              expected: field.kind.name() });
                    }
                    out.insert(field.key.clone(), value.clone());
                }
                None => match &field.default {
                    Some(default) => {
                        out.insert(field.key.clone(), default.clone());
                    }
                    None if field.required => return Err(SchemaError::MissingKey(field.key.clone())),
                    None => {}
                },
            }
        }
        Ok(out)
    }

    /// Copia del esquema con los valores previos como sugerencia, para volver
    /// a mostrar un formulario sin perder lo que el usuario ya escribió.
    pub fn with_suggested_values(&self, values: &JsonMap) -> Self {
        let fields = self.fields
                         .iter()
                         .cloned()
                         .map(|mut f| {
                             if let Some(v) = values.get(&f.key) {
                                 f.suggested_value = Some(v.clone());
                             }
                             f
                         })
                         .collect();
        Self { fields }
    }

    /// Esquema tal como se muestra: sin campos avanzados si no se piden.
    pub fn for_display(&self, show_advanced: bool) -> Self {
        if show_advanced {
            return self.clone();
        }
        Self { fields: self.fields.iter().filter(|f| !f.advanced).cloned().collect() }
    }
}
