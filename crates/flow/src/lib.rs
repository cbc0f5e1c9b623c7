//! Crate `flow`: motor de flujos multi-paso reanudables
//!
//! Este crate implementa el `FlowManager`: arranca asistentes (flujos) por
//! clave de handler, despacha cada paso a través de un `StepRouter`
//! explícito, valida la entrada del usuario, aplica la máquina de estados de
//! `FlowResult` y entrega los resultados terminales a un hook de
//! finalización provisto por el colaborador.
//!
//! Diseño resumido:
//! - Registro en memoria de flujos en curso, indexado por flow id y por
//!   handler; sus mutaciones son síncronas y no cruzan puntos de suspensión.
//! - Pasos asíncronos: cada `init` corre en una tarea de tokio cancelable
//!   por `shutdown` mientras no termina su primer paso.
//! - Deduplicación de descubrimientos: claves únicas reclamadas por los
//!   pasos (`StepContext::set_unique_id`) contra flujos en curso y contra los
//!   destinos persistidos de un `TargetRepository`.
//! - Pasos externos y de progreso que notifican a los oyentes por un
//!   `EventBus`.
//!
//! Ejemplo rápido:
//! ```rust
//! use flow::{FlowManager, FlowManagerConfig, HandlerRegistry, NoTargets, NoopHooks};
//! use std::sync::Arc;
//! let handlers = HandlerRegistry::new();
//! let manager = FlowManager::new(Arc::new(handlers),
//!                                Arc::new(NoopHooks),
//!                                Arc::new(NoTargets),
//!                                FlowManagerConfig::default());
//! assert!(manager.progress(false).is_empty());
//! ```
pub mod config;
pub mod context;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod handler;
pub mod hooks;
pub mod manager;
pub mod registry;
pub mod repository;
pub mod result;
pub mod router;
pub mod schema;
pub mod stubs;

pub use config::*;
pub use context::*;
pub use errors::*;
pub use events::*;
pub use handler::*;
pub use hooks::*;
pub use manager::*;
pub use registry::*;
pub use repository::*;
pub use result::*;
pub use router::*;
pub use schema::*;
pub use stubs::*;
