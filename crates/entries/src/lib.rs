//! Crate `hub_entries`: entradas de configuración del hub
//!
//! Colaborador del motor `flow`: guarda las integraciones configuradas
//! (`ConfigEntry`), las levanta y descarga mediante un `EntryLifecycle` y
//! conecta dos `FlowManager`:
//! - flujos de configuración por dominio, cuyo `CreateEntry` se convierte en
//!   una entrada guardada;
//! - flujos de opciones por entry id, que reemplazan las opciones de la
//!   entrada.
//!
//! El almacén implementa `flow::TargetRepository`, así que los pasos de
//! descubrimiento deduplican contra las entradas existentes.
//!
//! ```rust
//! use flow::{FlowManagerConfig, HandlerRegistry};
//! use hub_entries::{ConfigEntries, NoopLifecycle, OptionsHandlers};
//! use std::sync::Arc;
//! let entries = ConfigEntries::new(HandlerRegistry::new(),
//!                                  OptionsHandlers::new(),
//!                                  Arc::new(NoopLifecycle),
//!                                  FlowManagerConfig::default());
//! assert!(entries.domains(true).is_empty());
//! ```
pub mod entries;
pub mod entry;
pub mod errors;
pub mod flows;
pub mod options;
pub mod store;

pub use entries::*;
pub use entry::*;
pub use errors::*;
pub use flows::*;
pub use options::*;
pub use store::*;
