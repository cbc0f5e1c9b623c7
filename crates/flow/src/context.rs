// Archivo: context.rs
// Propósito: metadatos de arranque de un flujo (`FlowContext`), la clave
// única reclamable (`UniqueId`) y las fuentes conocidas.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;

/// Fuentes de arranque conocidas.
pub mod source {
    pub const USER: &str = "user";
    pub const DISCOVERY: &str = "discovery";
    pub const BLUETOOTH: &str = "bluetooth";
    pub const DHCP: &str = "dhcp";
    pub const HOMEKIT: &str = "homekit";
    pub const MQTT: &str = "mqtt";
    pub const SSDP: &str = "ssdp";
    pub const USB: &str = "usb";
    pub const ZEROCONF: &str = "zeroconf";
    pub const HASSIO: &str = "hassio";
    pub const INTEGRATION_DISCOVERY: &str = "integration_discovery";
    pub const IMPORT: &str = "import";
    pub const IGNORE: &str = "ignore";
    pub const UNIGNORE: &str = "unignore";
    pub const REAUTH: &str = "reauth";
    pub const SYSTEM: &str = "system";

    /// Fuentes automáticas (descubrimiento).
    pub const DISCOVERY_SOURCES: &[&str] = &[BLUETOOTH,
                                             DHCP,
                                             DISCOVERY,
                                             HASSIO,
                                             HOMEKIT,
                                             INTEGRATION_DISCOVERY,
                                             MQTT,
                                             SSDP,
                                             UNIGNORE,
                                             USB,
                                             ZEROCONF];

    pub fn is_discovery(source: &str) -> bool {
        DISCOVERY_SOURCES.contains(&source)
    }
}

/// Marca reservada para descubrimientos sin identificador propio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reserved {
    DefaultDiscovery,
}

/// Clave única que un flujo puede reclamar.
///
/// La variante reservada vive en otro espacio de nombres que los ids de
/// dispositivo: serializa como `{"reserved": "default_discovery"}` y nunca
/// es igual a un `UniqueId::Id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UniqueId {
    Id(String),
    Reserved { reserved: Reserved },
}

impl UniqueId {
    /// Centinela "default discovery".
    pub const DEFAULT_DISCOVERY: UniqueId = UniqueId::Reserved { reserved: Reserved::DefaultDiscovery };

    pub fn is_default_discovery(&self) -> bool {
        matches!(self, UniqueId::Reserved { reserved: Reserved::DefaultDiscovery })
    }
}

impl From<&str> for UniqueId {
    fn from(s: &str) -> Self {
        UniqueId::Id(s.to_string())
    }
}

impl From<String> for UniqueId {
    fn from(s: String) -> Self {
        UniqueId::Id(s)
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniqueId::Id(id) => f.write_str(id),
            UniqueId::Reserved { .. } => f.write_str("<default_discovery>"),
        }
    }
}

/// Metadatos de un flujo. Los campos que el motor no conoce se conservan en
/// `extra` y viajan intactos.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<UniqueId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub title_placeholders: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub show_advanced_options: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub confirm_only: bool,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl FlowContext {
    pub fn with_source(source: impl Into<String>) -> Self {
        Self { source: Some(source.into()),
               ..Self::default() }
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn entry_id(mut self, entry_id: impl Into<String>) -> Self {
        self.entry_id = Some(entry_id.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// True si todas las claves de `subset` presentes tienen el mismo valor
    /// aquí. Se comparan `source`, `entry_id` y `extra`.
    pub fn matches(&self, subset: &FlowContext) -> bool {
        if subset.source.is_some() && subset.source != self.source {
            return false;
        }
        if subset.entry_id.is_some() && subset.entry_id != self.entry_id {
            return false;
        }
        subset.extra.iter().all(|(k, v)| self.extra.get(k) == Some(v))
    }
}
