// Archivo: errors.rs
// Propósito: definir los errores del motor de flujos, la señal de aborto
// temprano (`AbortFlow`) usada por los pasos y el alias Result<T>.
use crate::schema::SchemaError;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Error boxed que un paso o un hook de eliminación puede devolver.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errores del `FlowManager`.
///
/// `UnknownFlow` y `UnknownStep` siempre se levantan después de retirar el
/// flujo del registro: nunca queda un flujo registrado tras uno de ellos.
/// `InvalidInput` deja el flujo intacto en el mismo paso.
#[derive(Error, Debug)]
pub enum FlowError {
    /// No hay fábrica registrada para la clave de handler.
    #[error("Handler desconocido: {0}")]
    UnknownHandler(String),
    /// El flow id no está en el registro.
    #[error("Flujo desconocido: {0}")]
    UnknownFlow(Uuid),
    /// El handler no implementa el paso pedido.
    #[error("El handler {handler} no soporta el paso {step_id}")]
    UnknownStep { handler: String, step_id: String },
    /// La entrada no cumple el esquema del paso actual.
    #[error("Entrada inválida: {0}")]
    InvalidInput(#[from] SchemaError),
    /// Transición prohibida desde un paso externo o de progreso.
    #[error("Transición inválida: {from} solo puede pasar a {allowed}, se obtuvo {to}")]
    InvalidTransition {
        from: &'static str,
        allowed: &'static str,
        to: &'static str,
    },
    /// El primer paso fue cancelado por `shutdown`.
    #[error("Inicialización cancelada para el handler {0}")]
    Cancelled(String),
    /// Un paso falló con un error que no es `AbortFlow`.
    #[error("El paso {step_id} de {handler} falló: {source}")]
    StepFailed {
        handler: String,
        step_id: String,
        #[source]
        source: BoxError,
    },
    /// El contexto de arranque no es válido para el colaborador.
    #[error("Contexto inválido: {0}")]
    InvalidContext(String),
    /// Fallo de un hook de colaborador (finish/post_init/fábrica).
    #[error("Error en hook: {0}")]
    Hook(String),
    /// Error del repositorio de destinos persistidos.
    #[error("Error de almacenamiento: {0}")]
    Storage(String),
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Salida temprana de un paso: el manager la convierte en `FlowResult::Abort`.
///
/// Se propaga con `?` desde lógica anidada del paso.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Flujo abortado: {reason}")]
pub struct AbortFlow {
    pub reason: String,
    pub description_placeholders: Option<BTreeMap<String, String>>,
}

impl AbortFlow {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into(),
               description_placeholders: None }
    }

    pub fn with_placeholders(mut self, placeholders: BTreeMap<String, String>) -> Self {
        self.description_placeholders = Some(placeholders);
        self
    }
}

/// Error que devuelve un paso.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Abort(#[from] AbortFlow),
    #[error(transparent)]
    Failed(BoxError),
}

impl StepError {
    /// Envuelve cualquier error como fallo del paso.
    pub fn failed<E>(err: E) -> Self
        where E: Into<BoxError>
    {
        StepError::Failed(err.into())
    }
}
