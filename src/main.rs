use anyhow::Context;
use flow::{FlowContext, FlowManager, FlowManagerConfig, FlowResponse, FlowResult};
use hub_entries::ConfigEntries;
use once_cell::sync::Lazy;
use std::io::{self, Write};
use std::sync::Arc;
use uuid::Uuid;

mod demo;

/// Configuración de la consola, leída una vez del entorno (`.env` incluido).
struct AppConfig {
    /// Filtro de `tracing` (`HUBFLOW_LOG`, por defecto `info`).
    log_filter: String,
    flow: FlowManagerConfig,
}

impl AppConfig {
    fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self { log_filter: std::env::var("HUBFLOW_LOG").unwrap_or_else(|_| "info".into()),
               flow: FlowManagerConfig::from_env() }
    }
}

static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(&CONFIG.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    // `try_init` también conecta los registros del facade `log`
    if let Err(e) = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init() {
        eprintln!("No se pudo iniciar el log: {}", e);
    }
}

/// Consola interactiva sobre las entradas de configuración del hub.
///
/// Opciones soportadas:
/// 1) Ver flujos en curso
/// 2) Iniciar flujo (dominio + fuente + datos)
/// 3) Continuar flujo
/// 4) Abortar flujo
/// 5) Ver entradas
/// 6) Eliminar entrada
/// 7) Opciones de una entrada
/// 8) Salir
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let handlers = demo::handlers();
    let domains = handlers.keys().join(", ");
    let entries = ConfigEntries::new(handlers,
                                     demo::options(),
                                     Arc::new(demo::LoggingLifecycle),
                                     CONFIG.flow.clone());
    let mut events = entries.flow().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!(?event, "Evento de flujo");
        }
    });

    loop {
        println!("\n== Hub flow menu ==");
        println!("1) Ver flujos en curso");
        println!("2) Iniciar flujo");
        println!("3) Continuar flujo");
        println!("4) Abortar flujo");
        println!("5) Ver entradas");
        println!("6) Eliminar entrada");
        println!("7) Opciones de una entrada");
        println!("8) Salir");
        let choice = prompt("Elige una opción: ")?;
        match choice.trim() {
            "1" => {
                println!("\nFLOW ID                              | HANDLER | PASO | FUENTE");
                println!("-----------------------------------------------------------------------");
                for f in entries.flow().progress(false) {
                    println!("{} | {} | {} | {}",
                             f.flow_id,
                             f.handler,
                             f.step_id.as_deref().unwrap_or("-"),
                             f.context.source().unwrap_or("-"));
                }
            }
            "2" => {
                let domain = prompt(&format!("Dominio ({}): ", domains))?;
                let src = prompt("Fuente (enter para user): ")?;
                let src = if src.trim().is_empty() { "user" } else { src.trim() };
                let data = match read_json("Datos JSON (enter para ninguno): ")? {
                    Ok(data) => data,
                    Err(e) => {
                        eprintln!("{}", e);
                        continue;
                    }
                };
                let data = data.and_then(|v| v.as_object().cloned());
                let res = entries.flow().init(domain.trim(), FlowContext::with_source(src), data).await;
                show(res);
            }
            "3" => {
                let Some(flow_id) = read_uuid("Flow id (UUID): ")? else { continue };
                let input = match read_json("Entrada JSON (enter para ninguna): ")? {
                    Ok(input) => input,
                    Err(e) => {
                        eprintln!("{}", e);
                        continue;
                    }
                };
                let res = configure_any(&entries, flow_id, input).await;
                show(res);
            }
            "4" => {
                let Some(flow_id) = read_uuid("Flow id a abortar (UUID): ")? else { continue };
                match entries.flow().abort(flow_id).or_else(|_| entries.options().abort(flow_id)) {
                    Ok(()) => println!("Flujo abortado: {}", flow_id),
                    Err(e) => eprintln!("Error abortando flujo: {}", e),
                }
            }
            "5" => {
                println!("\nENTRY ID                         | DOMINIO | TÍTULO | FUENTE | ESTADO");
                println!("-----------------------------------------------------------------------");
                for e in entries.entries(None) {
                    println!("{} | {} | {} | {} | {:?}", e.entry_id, e.domain, e.title, e.source, e.state);
                }
            }
            "6" => {
                let entry_id = prompt("Entry id a eliminar: ")?;
                let confirm = prompt(&format!("Confirma borrado de {}? escribir 'yes' para confirmar: ", entry_id.trim()))?;
                if confirm.trim().to_lowercase() != "yes" {
                    println!("Borrado cancelado");
                    continue;
                }
                match entries.remove(entry_id.trim()).await {
                    Ok(removed) if removed.require_restart => println!("Entrada eliminada; hace falta reiniciar"),
                    Ok(_) => println!("Entrada eliminada: {}", entry_id.trim()),
                    Err(e) => eprintln!("Error eliminando entrada: {}", e),
                }
            }
            "7" => {
                let entry_id = prompt("Entry id: ")?;
                if !entries.supports_options(entry_id.trim()) {
                    println!("La entrada no existe o su dominio no tiene opciones");
                    continue;
                }
                let res = entries.options().init(entry_id.trim(), FlowContext::default(), None).await;
                show(res);
            }
            "8" => {
                println!("Saliendo...");
                break;
            }
            other => println!("Opción inválida: {}", other),
        }
    }

    entries.shutdown().await;
    Ok(())
}

/// El flow id puede ser de configuración o de opciones.
async fn configure_any(entries: &ConfigEntries,
                       flow_id: Uuid,
                       input: Option<serde_json::Value>)
                       -> flow::Result<FlowResponse> {
    let manager: &FlowManager = if entries.options().get(flow_id).is_ok() {
        entries.options()
    } else {
        entries.flow()
    };
    manager.configure(flow_id, input).await
}

fn show(res: flow::Result<FlowResponse>) {
    let response = match res {
        Ok(response) => response,
        Err(e) => {
            eprintln!("Error: {}", e);
            return;
        }
    };
    println!("Flujo {} ({})", response.flow_id, response.handler);
    match &response.result {
        FlowResult::Form(form) => {
            println!("Formulario '{}'", form.step_id);
            if let Some(schema) = &form.data_schema {
                for field in &schema.fields {
                    println!("  - {} ({:?}){}", field.key, field.kind, if field.required { " *" } else { "" });
                }
            }
            for (field, code) in &form.errors {
                println!("  ! {}: {}", field, code);
            }
        }
        FlowResult::Menu(menu) => println!("Menú '{}': {}", menu.step_id, menu.menu_options.ids().join(", ")),
        FlowResult::ExternalStep(ext) => println!("Abrir {} y volver con {{\"code\": ...}}", ext.url),
        FlowResult::ShowProgress(p) => println!("En progreso: {}", p.progress_action),
        FlowResult::ExternalStepDone(_) | FlowResult::ShowProgressDone(_) => println!("Listo; continúa el flujo"),
        FlowResult::CreateEntry(entry) => println!("Entrada creada: {}", entry.title),
        FlowResult::Abort(abort) => println!("Abortado: {}", abort.reason),
    }
}

fn read_uuid(msg: &str) -> anyhow::Result<Option<Uuid>> {
    let raw = prompt(msg)?;
    match Uuid::parse_str(raw.trim()) {
        Ok(u) => Ok(Some(u)),
        Err(_) => {
            eprintln!("UUID inválido");
            Ok(None)
        }
    }
}

/// `Ok(Err(..))` si el texto no es JSON válido.
fn read_json(msg: &str) -> anyhow::Result<Result<Option<serde_json::Value>, String>> {
    let raw = prompt(msg)?;
    if raw.trim().is_empty() {
        return Ok(Ok(None));
    }
    Ok(serde_json::from_str(raw.trim()).map(Some).map_err(|e| format!("JSON inválido: {}", e)))
}

fn prompt(msg: &str) -> anyhow::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s).context("leyendo stdin")?;
    Ok(s)
}
