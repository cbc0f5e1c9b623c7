// Archivo: events.rs
// Propósito: notificaciones hacia oyentes externos (UI, suscriptores) sobre
// un canal broadcast de tokio.
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// El estado de un paso externo o de progreso cambió; la UI debe
    /// refrescar el flujo.
    Progressed { handler: String, flow_id: Uuid, refresh: bool },
    /// Un flujo de descubrimiento quedó en curso esperando al usuario.
    Discovered { handler: String, flow_id: Uuid, source: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }

    /// Publica el evento. Sin suscriptores no es un error.
    pub fn publish(&self, event: FlowEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("Evento de flujo sin suscriptores");
        }
    }
}
