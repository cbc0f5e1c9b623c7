use flow::{AbortFlow, BoxError, CreateEntry, DataSchema, Field, FieldKind, FlowContext, FlowError, FlowHandler,
           FlowManager, FlowManagerConfig, FlowResult, Form, HandlerRegistry, JsonMap, Menu, NoTargets, RecordingHooks,
           StepContext, StepError, StepRouter};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_test::assert_pending;

fn obj(v: serde_json::Value) -> JsonMap {
  v.as_object().cloned().expect("json object")
}

/// user -> confirm -> create_entry
struct TwoStep;

impl TwoStep {
  async fn step_user(&mut self, _ctx: &mut StepContext, input: Option<JsonMap>) -> Result<FlowResult, StepError> {
    match input {
      None => {
        let schema = DataSchema::new().field(Field::required("host", FieldKind::String))
                                      .field(Field::optional("port", FieldKind::Integer).default_value(json!(80)));
        Ok(Form::new("user").schema(schema).into())
      }
      Some(_) => Ok(Form::new("confirm").last_step(true).into()),
    }
  }

  async fn step_confirm(&mut self, _ctx: &mut StepContext, _input: Option<JsonMap>) -> Result<FlowResult, StepError> {
    Ok(CreateEntry::new("X", obj(json!({"host": "10.0.0.5"}))).into())
  }
}

impl FlowHandler for TwoStep {
  const VERSION: u32 = 3;
  const INIT_STEP: &'static str = "user";

  fn register_steps(router: &mut StepRouter<Self>) {
    router.step("user", |f, ctx, input| Box::pin(f.step_user(ctx, input)))
          .step("confirm", |f, ctx, input| Box::pin(f.step_confirm(ctx, input)));
  }
}

/// Pasos que ejercitan los caminos de error.
struct Tricky {
  removed: Arc<AtomicUsize>,
}

impl Tricky {
  async fn step_init(&mut self, _ctx: &mut StepContext, input: Option<JsonMap>) -> Result<FlowResult, StepError> {
    let mode = input.as_ref().and_then(|i| i.get("mode")).and_then(|m| m.as_str()).unwrap_or("");
    match mode {
      "abort" => {
        nested_check()?;
        Ok(Form::new("init").into())
      }
      "boom" => Err(StepError::failed("sensor exploded")),
      "menu" => self.step_pick(_ctx, None).await,
      "missing" => Ok(Form::new("nowhere").into()),
      _ => Ok(Form::new("init").into()),
    }
  }

  async fn step_pick(&mut self, _ctx: &mut StepContext, _input: Option<JsonMap>) -> Result<FlowResult, StepError> {
    Ok(Menu::new("pick", ["left", "right"]).into())
  }

  async fn step_left(&mut self, _ctx: &mut StepContext, input: Option<JsonMap>) -> Result<FlowResult, StepError> {
    assert!(input.is_none());
    Ok(Form::new("left").into())
  }

  async fn step_right(&mut self, _ctx: &mut StepContext, _input: Option<JsonMap>) -> Result<FlowResult, StepError> {
    Ok(Form::new("right").into())
  }
}

fn nested_check() -> Result<(), AbortFlow> {
  Err(AbortFlow::new("no_devices_found"))
}

impl FlowHandler for Tricky {
  fn register_steps(router: &mut StepRouter<Self>) {
    router.step("init", |f, ctx, input| Box::pin(f.step_init(ctx, input)))
          .step("pick", |f, ctx, input| Box::pin(f.step_pick(ctx, input)))
          .step("left", |f, ctx, input| Box::pin(f.step_left(ctx, input)))
          .step("right", |f, ctx, input| Box::pin(f.step_right(ctx, input)));
  }

  fn on_remove(&mut self) -> Result<(), BoxError> {
    self.removed.fetch_add(1, Ordering::SeqCst);
    Err("remove hook failed".into())
  }
}

/// Primer paso que espera una señal externa.
struct Gated {
  gate: Arc<Notify>,
  removed: Arc<AtomicUsize>,
}

impl Gated {
  async fn step_init(&mut self, _ctx: &mut StepContext, _input: Option<JsonMap>) -> Result<FlowResult, StepError> {
    self.gate.notified().await;
    Ok(Form::new("init").into())
  }
}

impl FlowHandler for Gated {
  fn register_steps(router: &mut StepRouter<Self>) {
    router.step("init", |f, ctx, input| Box::pin(f.step_init(ctx, input)));
  }

  fn on_remove(&mut self) -> Result<(), BoxError> {
    self.removed.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

/// Primer paso que nunca termina.
struct Stuck;

impl Stuck {
  async fn step_init(&mut self, _ctx: &mut StepContext, _input: Option<JsonMap>) -> Result<FlowResult, StepError> {
    std::future::pending::<()>().await;
    Ok(Form::new("init").into())
  }
}

impl FlowHandler for Stuck {
  fn register_steps(router: &mut StepRouter<Self>) {
    router.step("init", |f, ctx, input| Box::pin(f.step_init(ctx, input)));
  }
}

/// Primer paso lento, para quien llama con plazo.
struct Slow;

impl Slow {
  async fn step_init(&mut self, _ctx: &mut StepContext, _input: Option<JsonMap>) -> Result<FlowResult, StepError> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(Form::new("init").into())
  }
}

impl FlowHandler for Slow {
  fn register_steps(router: &mut StepRouter<Self>) {
    router.step("init", |f, ctx, input| Box::pin(f.step_init(ctx, input)));
  }
}

struct Fixture {
  manager: FlowManager,
  hooks: Arc<RecordingHooks>,
  removed: Arc<AtomicUsize>,
  gate: Arc<Notify>,
}

fn fixture_with(hooks: RecordingHooks) -> Fixture {
  let removed = Arc::new(AtomicUsize::new(0));
  let gate = Arc::new(Notify::new());
  let handlers = HandlerRegistry::new();
  handlers.register("two_step", || TwoStep);
  let r = removed.clone();
  handlers.register("tricky", move || Tricky { removed: r.clone() });
  let (g, r) = (gate.clone(), removed.clone());
  handlers.register("gated", move || Gated { gate: g.clone(),
                                             removed: r.clone() });
  handlers.register("stuck", || Stuck);
  handlers.register("slow", || Slow);

  let hooks = Arc::new(hooks);
  let manager = FlowManager::new(Arc::new(handlers), hooks.clone(), Arc::new(NoTargets), FlowManagerConfig::default());
  Fixture { manager,
            hooks,
            removed,
            gate }
}

fn fixture() -> Fixture {
  fixture_with(RecordingHooks::new())
}

#[tokio::test]
async fn two_step_flow_creates_entry_once() {
  let fx = fixture();
  let m = &fx.manager;

  let first = m.init("two_step", FlowContext::with_source("user"), None).await.expect("init");
  assert_eq!(first.result.step_id(), Some("user"));
  assert_eq!(m.progress(false).len(), 1);

  let second = m.configure(first.flow_id, Some(json!({"host": "10.0.0.5"}))).await.expect("configure user");
  match &second.result {
    FlowResult::Form(form) => {
      assert_eq!(form.step_id, "confirm");
      assert_eq!(form.last_step, Some(true));
    }
    other => panic!("unexpected result {:?}", other),
  }

  let last = m.configure(first.flow_id, None).await.expect("configure confirm");
  assert!(matches!(last.result, FlowResult::CreateEntry(_)));
  assert!(m.progress(true).is_empty());
  assert!(m.progress_by_handler("two_step", true).is_empty());

  let finished = fx.hooks.finished();
  assert_eq!(finished.len(), 1);
  match &finished[0] {
    FlowResult::CreateEntry(entry) => {
      assert_eq!(entry.title, "X");
      assert_eq!(entry.version, 3);
      assert_eq!(entry.context.as_ref().and_then(|c| c.source()), Some("user"));
    }
    other => panic!("unexpected finish {:?}", other),
  }
  assert!(matches!(m.configure(first.flow_id, None).await, Err(FlowError::UnknownFlow(_))));
}

#[tokio::test]
async fn invalid_input_keeps_the_step() {
  let fx = fixture();
  let m = &fx.manager;
  let first = m.init("two_step", FlowContext::with_source("user"), None).await.expect("init");

  let err = m.configure(first.flow_id, Some(json!({"host": 42}))).await.expect_err("must reject");
  assert!(matches!(err, FlowError::InvalidInput(_)));
  let err = m.configure(first.flow_id, Some(json!({"host": "h", "extra": true}))).await.expect_err("must reject");
  assert!(matches!(err, FlowError::InvalidInput(_)));

  let summary = m.get(first.flow_id).expect("still registered");
  assert_eq!(summary.step_id.as_deref(), Some("user"));
  assert!(fx.hooks.finished().is_empty());

  // corrected input goes through against the same step
  let next = m.configure(first.flow_id, Some(json!({"host": "h"}))).await.expect("retry");
  assert_eq!(next.result.step_id(), Some("confirm"));
}

#[tokio::test]
async fn unknown_handler_is_not_found() {
  let fx = fixture();
  let err = fx.manager.init("nope", FlowContext::default(), None).await.expect_err("unknown");
  assert!(matches!(err, FlowError::UnknownHandler(h) if h == "nope"));
  assert!(fx.manager.progress(true).is_empty());
}

#[tokio::test]
async fn unknown_step_discards_the_flow() {
  let fx = fixture();
  let m = &fx.manager;
  let first = m.init("tricky", FlowContext::default(), Some(obj(json!({"mode": "missing"})))).await.expect("init");
  assert_eq!(first.result.step_id(), Some("nowhere"));

  let err = m.configure(first.flow_id, None).await.expect_err("unknown step");
  assert!(matches!(err, FlowError::UnknownStep { ref step_id, .. } if step_id == "nowhere"));
  assert!(m.progress(true).is_empty());
  assert_eq!(fx.removed.load(Ordering::SeqCst), 1);
  assert!(matches!(m.configure(first.flow_id, None).await, Err(FlowError::UnknownFlow(_))));
}

#[tokio::test]
async fn abort_flow_from_nested_logic_becomes_abort_result() {
  let fx = fixture();
  let res = fx.manager
              .init("tricky", FlowContext::default(), Some(obj(json!({"mode": "abort"}))))
              .await
              .expect("init");
  match res.result {
    FlowResult::Abort(abort) => assert_eq!(abort.reason, "no_devices_found"),
    other => panic!("unexpected {:?}", other),
  }
  assert!(fx.manager.progress(true).is_empty());
  assert!(fx.hooks.finished().is_empty());
  assert!(fx.hooks.post_inits().is_empty());
}

#[tokio::test]
async fn failing_step_removes_the_flow() {
  let fx = fixture();
  let err = fx.manager
              .init("tricky", FlowContext::default(), Some(obj(json!({"mode": "boom"}))))
              .await
              .expect_err("step failure");
  assert!(matches!(err, FlowError::StepFailed { .. }));
  assert!(fx.manager.progress(true).is_empty());
}

#[tokio::test]
async fn abort_swallows_remove_hook_errors() {
  let fx = fixture();
  let m = &fx.manager;
  let first = m.init("tricky", FlowContext::default(), None).await.expect("init");
  m.abort(first.flow_id).expect("abort succeeds despite hook error");
  assert_eq!(fx.removed.load(Ordering::SeqCst), 1);
  assert!(m.progress(true).is_empty());
  assert!(matches!(m.abort(first.flow_id), Err(FlowError::UnknownFlow(_))));
}

#[tokio::test]
async fn menu_input_selects_next_step() {
  let fx = fixture();
  let m = &fx.manager;
  let first = m.init("tricky", FlowContext::default(), Some(obj(json!({"mode": "menu"})))).await.expect("init");
  assert!(matches!(first.result, FlowResult::Menu(_)));

  let err = m.configure(first.flow_id, Some(json!({"next_step_id": "up"}))).await.expect_err("bad option");
  assert!(matches!(err, FlowError::InvalidInput(_)));

  let next = m.configure(first.flow_id, Some(json!({"next_step_id": "left"}))).await.expect("menu choice");
  assert_eq!(next.result.step_id(), Some("left"));
}

#[tokio::test]
async fn empty_menu_input_shows_the_menu_again() {
  let fx = fixture();
  let m = &fx.manager;
  let first = m.init("tricky", FlowContext::default(), Some(obj(json!({"mode": "menu"})))).await.expect("init");

  let again = m.configure(first.flow_id, Some(json!({}))).await.expect("empty choice");
  match &again.result {
    FlowResult::Menu(menu) => assert_eq!(menu.step_id, "pick"),
    other => panic!("unexpected result {:?}", other),
  }
  assert_eq!(m.get(first.flow_id).expect("kept").step_id.as_deref(), Some("pick"));
  assert_eq!(fx.removed.load(Ordering::SeqCst), 0);

  let next = m.configure(first.flow_id, Some(json!({"next_step_id": "right"}))).await.expect("menu choice");
  assert_eq!(next.result.step_id(), Some("right"));
}

#[tokio::test]
async fn finish_hook_may_turn_result_into_form() {
  let fx = fixture_with(RecordingHooks::new().retry_with(Form::new("retry").into()));
  let m = &fx.manager;
  let first = m.init("two_step", FlowContext::with_source("user"), None).await.expect("init");
  m.configure(first.flow_id, Some(json!({"host": "h"}))).await.expect("user");
  let res = m.configure(first.flow_id, None).await.expect("confirm");
  assert_eq!(res.result.step_id(), Some("retry"));
  assert_eq!(m.get(first.flow_id).expect("kept").step_id.as_deref(), Some("retry"));
  assert_eq!(fx.hooks.finished().len(), 1);
}

#[tokio::test]
async fn has_matching_flow_compares_source_and_data() {
  let fx = fixture();
  let m = &fx.manager;
  let data = obj(json!({"mode": "plain"}));
  m.init("tricky", FlowContext::with_source("zeroconf"), Some(data.clone())).await.expect("init");

  assert!(m.has_matching_flow("tricky", &FlowContext::with_source("zeroconf"), Some(&data)));
  assert!(!m.has_matching_flow("tricky", &FlowContext::with_source("ssdp"), Some(&data)));
  assert!(!m.has_matching_flow("tricky", &FlowContext::with_source("zeroconf"), None));
  assert!(!m.has_matching_flow("two_step", &FlowContext::with_source("zeroconf"), Some(&data)));
}

#[tokio::test]
async fn has_matching_flow_accepts_a_context_subset() {
  let fx = fixture();
  let m = &fx.manager;
  let context = FlowContext::with_source("reauth").entry_id("e1").extra("model", json!("LCT001"));
  m.init("tricky", context, None).await.expect("init");

  assert!(m.has_matching_flow("tricky", &FlowContext::with_source("reauth"), None));
  assert!(m.has_matching_flow("tricky", &FlowContext::default().entry_id("e1"), None));
  assert!(m.has_matching_flow("tricky", &FlowContext::with_source("reauth").entry_id("e1"), None));
  assert!(!m.has_matching_flow("tricky", &FlowContext::with_source("reauth").entry_id("e2"), None));
  assert!(m.has_matching_flow("tricky", &FlowContext::default().extra("model", json!("LCT001")), None));
  assert!(!m.has_matching_flow("tricky", &FlowContext::default().extra("model", json!("LCT002")), None));
}

#[tokio::test]
async fn flows_are_hidden_until_first_step_returns() {
  let fx = fixture();
  let m = &fx.manager;
  let mut init = tokio_test::task::spawn(m.init("gated", FlowContext::default(), None));
  assert_pending!(init.poll());

  while m.progress(true).is_empty() {
    tokio::task::yield_now().await;
  }
  assert!(m.progress(false).is_empty());
  assert_eq!(m.progress_by_handler("gated", true).len(), 1);
  let hidden = m.progress(true)[0].flow_id;
  assert!(matches!(m.get(hidden), Err(FlowError::UnknownFlow(_))));

  fx.gate.notify_one();
  let res = loop {
    if let Poll::Ready(res) = init.poll() {
      break res;
    }
    tokio::task::yield_now().await;
  };
  let res = res.expect("init");
  assert_eq!(res.flow_id, hidden);
  assert_eq!(m.progress(false).len(), 1);
  assert_eq!(m.get(hidden).expect("visible").step_id.as_deref(), Some("init"));
}

#[tokio::test]
async fn abort_during_a_step_runs_remove_hook_once() {
  let fx = fixture();
  let m = &fx.manager;
  fx.gate.notify_one();
  let first = m.init("gated", FlowContext::default(), None).await.expect("init");

  // el paso queda esperando la señal con el flujo tomado
  let mut step = tokio_test::task::spawn(m.configure(first.flow_id, None));
  assert_pending!(step.poll());

  m.abort(first.flow_id).expect("abort");
  assert!(matches!(m.get(first.flow_id), Err(FlowError::UnknownFlow(_))));
  assert_eq!(fx.removed.load(Ordering::SeqCst), 0);

  fx.gate.notify_one();
  loop {
    if let Poll::Ready(res) = step.poll() {
      res.expect("step finishes");
      break;
    }
    tokio::task::yield_now().await;
  }
  while fx.removed.load(Ordering::SeqCst) == 0 {
    tokio::task::yield_now().await;
  }
  for _ in 0..10 {
    tokio::task::yield_now().await;
  }
  assert_eq!(fx.removed.load(Ordering::SeqCst), 1);
  assert!(m.progress(true).is_empty());
  assert!(matches!(m.abort(first.flow_id), Err(FlowError::UnknownFlow(_))));
}

#[tokio::test]
async fn wait_init_flow_finish_waits_for_first_step() {
  let fx = fixture();
  let m = fx.manager.clone();
  let handle = tokio::spawn({
    let m = m.clone();
    async move { m.init("gated", FlowContext::default(), None).await }
  });
  while m.initializing("gated").is_empty() {
    tokio::task::yield_now().await;
  }
  fx.gate.notify_one();
  m.wait_init_flow_finish("gated").await;
  assert_eq!(m.progress(false).len(), 1);
  handle.await.expect("join").expect("init");
  assert!(m.initializing("gated").is_empty());
}

#[tokio::test]
async fn shutdown_cancels_first_step() {
  let fx = fixture();
  let m = fx.manager.clone();
  // un flujo en espera no se toca
  let idle = m.init("two_step", FlowContext::with_source("user"), None).await.expect("idle flow");

  let handle = tokio::spawn({
    let m = m.clone();
    async move { m.init("stuck", FlowContext::default(), None).await }
  });
  while m.progress_by_handler("stuck", true).is_empty() {
    tokio::task::yield_now().await;
  }

  m.shutdown().await;
  let res = handle.await.expect("join");
  assert!(matches!(res, Err(FlowError::Cancelled(h)) if h == "stuck"));
  assert!(m.progress_by_handler("stuck", true).is_empty());
  assert!(m.initializing("stuck").is_empty());
  assert_eq!(m.get(idle.flow_id).expect("idle kept").step_id.as_deref(), Some("user"));
}

#[tokio::test]
async fn abandoned_init_still_finishes_its_first_step() {
  let fx = fixture();
  let m = fx.manager.clone();
  for _ in 0..3 {
    let res = tokio::time::timeout(Duration::from_millis(5), m.init("slow", FlowContext::default(), None)).await;
    assert!(res.is_err(), "caller gives up before the first step returns");
  }
  assert_eq!(m.initializing("slow").len(), 3);

  m.wait_init_flow_finish("slow").await;
  while !m.initializing("slow").is_empty() {
    tokio::task::yield_now().await;
  }
  assert_eq!(m.progress(false).len(), 3);
  while fx.hooks.post_inits().len() < 3 {
    tokio::task::yield_now().await;
  }
}

#[tokio::test]
async fn shutdown_discards_first_step_of_abandoned_init() {
  let fx = fixture();
  let m = fx.manager.clone();
  let res = tokio::time::timeout(Duration::from_millis(5), m.init("stuck", FlowContext::default(), None)).await;
  assert!(res.is_err());
  assert_eq!(m.progress_by_handler("stuck", true).len(), 1);

  m.shutdown().await;
  assert!(m.progress_by_handler("stuck", true).is_empty());
  assert!(m.initializing("stuck").is_empty());
  assert!(fx.hooks.post_inits().is_empty());
}
