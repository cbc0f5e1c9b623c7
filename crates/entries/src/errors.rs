// Archivo: errors.rs
// Propósito: errores del colaborador de entradas de configuración.
use flow::{BoxError, FlowError};
use thiserror::Error;

/// Errores de `ConfigEntries` y del almacén de entradas.
#[derive(Error, Debug)]
pub enum EntryError {
    #[error("Entrada desconocida: {0}")]
    UnknownEntry(String),
    /// La operación no es válida en el estado actual de la entrada.
    #[error("Operación no permitida sobre {0}")]
    OperationNotAllowed(String),
    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl From<EntryError> for FlowError {
    fn from(err: EntryError) -> Self {
        match err {
            EntryError::Flow(inner) => inner,
            other => FlowError::Hook(other.to_string()),
        }
    }
}

/// Fallo al levantar una entrada.
#[derive(Error, Debug)]
pub enum SetupFailure {
    /// El dispositivo aún no responde; la entrada queda en `SetupRetry`.
    #[error("No está listo: {0}")]
    NotReady(String),
    #[error(transparent)]
    Failed(BoxError),
}

pub type Result<T> = std::result::Result<T, EntryError>;
