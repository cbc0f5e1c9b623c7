// Archivo: config.rs
// Propósito: opciones del `FlowManager`, leídas del entorno (`.env`
// incluido) con valores por defecto.
use std::env;

/// Capacidad por defecto del canal de eventos.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowManagerConfig {
    /// Eventos que puede acumular un suscriptor lento antes de perderlos.
    pub event_capacity: usize,
}

impl Default for FlowManagerConfig {
    fn default() -> Self {
        Self { event_capacity: DEFAULT_EVENT_CAPACITY }
    }
}

impl FlowManagerConfig {
    /// Lee `HUBFLOW_EVENT_CAPACITY`. Un valor ilegible se ignora con aviso.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut cfg = Self::default();
        if let Ok(raw) = env::var("HUBFLOW_EVENT_CAPACITY") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => cfg.event_capacity = n,
                _ => log::warn!("HUBFLOW_EVENT_CAPACITY inválido ({}); se usa {}", raw, DEFAULT_EVENT_CAPACITY),
            }
        }
        cfg
    }
}
