use flow::{CreateEntry, ExternalStep, ExternalStepDone, FlowContext, FlowError, FlowEvent, FlowHandler, FlowManager,
           FlowManagerConfig, FlowResult, Form, HandlerRegistry, JsonMap, NoTargets, NoopHooks, ShowProgress,
           ShowProgressDone, StepContext, StepError, StepRouter};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

/// OAuth-like handler: init -> external "auth" -> external_done -> "finish".
/// With `{"bad": true}` on the callback it breaks the protocol.
struct OAuth;

impl OAuth {
  async fn step_init(&mut self, _ctx: &mut StepContext, _input: Option<JsonMap>) -> Result<FlowResult, StepError> {
    Ok(ExternalStep::new("auth", "https://auth.example/authorize").into())
  }

  async fn step_auth(&mut self, _ctx: &mut StepContext, input: Option<JsonMap>) -> Result<FlowResult, StepError> {
    let input = input.unwrap_or_default();
    if input.get("bad").is_some() {
      return Ok(Form::new("oops").into());
    }
    if input.get("code").is_none() {
      return Ok(ExternalStep::new("auth", "https://auth.example/authorize").into());
    }
    Ok(ExternalStepDone::new("finish").into())
  }

  async fn step_finish(&mut self, _ctx: &mut StepContext, input: Option<JsonMap>) -> Result<FlowResult, StepError> {
    assert!(input.is_none());
    Ok(CreateEntry::new("Cloud", JsonMap::new()).into())
  }
}

impl FlowHandler for OAuth {
  fn register_steps(router: &mut StepRouter<Self>) {
    router.step("init", |f, ctx, input| Box::pin(f.step_init(ctx, input)))
          .step("auth", |f, ctx, input| Box::pin(f.step_auth(ctx, input)))
          .step("finish", |f, ctx, input| Box::pin(f.step_finish(ctx, input)));
  }
}

/// Background probe that reports progress twice before finishing.
struct Probe {
  polls: u32,
}

impl Probe {
  async fn step_init(&mut self, _ctx: &mut StepContext, _input: Option<JsonMap>) -> Result<FlowResult, StepError> {
    self.polls += 1;
    if self.polls < 3 {
      return Ok(ShowProgress::new("init", "probing").into());
    }
    Ok(ShowProgressDone::new("done").into())
  }

  async fn step_done(&mut self, _ctx: &mut StepContext, _input: Option<JsonMap>) -> Result<FlowResult, StepError> {
    Ok(Form::new("done").into())
  }
}

impl FlowHandler for Probe {
  fn register_steps(router: &mut StepRouter<Self>) {
    router.step("init", |f, ctx, input| Box::pin(f.step_init(ctx, input)))
          .step("done", |f, ctx, input| Box::pin(f.step_done(ctx, input)));
  }
}

fn manager() -> FlowManager {
  let handlers = HandlerRegistry::new();
  handlers.register("oauth", || OAuth);
  handlers.register("probe", || Probe { polls: 0 });
  FlowManager::new(Arc::new(handlers), Arc::new(NoopHooks), Arc::new(NoTargets), FlowManagerConfig::default())
}

#[tokio::test]
async fn external_step_round_trip_notifies_listeners() {
  let m = manager();
  let mut events = m.subscribe();

  let start = m.init("oauth", FlowContext::with_source("user"), None).await.expect("init");
  assert!(matches!(start.result, FlowResult::ExternalStep(_)));

  // still waiting on the external leg: same step, no event
  let again = m.configure(start.flow_id, None).await.expect("poll");
  assert_eq!(again.result.step_id(), Some("auth"));
  assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

  let done = m.configure(start.flow_id, Some(json!({"code": "abc"}))).await.expect("callback");
  assert!(matches!(done.result, FlowResult::ExternalStepDone(_)));
  let event = events.try_recv().expect("progress event");
  assert_eq!(event,
             FlowEvent::Progressed { handler: "oauth".into(),
                                     flow_id: start.flow_id,
                                     refresh: true });

  let created = m.configure(start.flow_id, Some(json!({"ignored": 1}))).await.expect("finish");
  assert!(matches!(created.result, FlowResult::CreateEntry(_)));
  assert!(m.progress(true).is_empty());
}

#[tokio::test]
async fn external_step_cannot_jump_to_form() {
  let m = manager();
  let start = m.init("oauth", FlowContext::with_source("user"), None).await.expect("init");

  let err = m.configure(start.flow_id, Some(json!({"bad": true}))).await.expect_err("protocol violation");
  assert!(matches!(err, FlowError::InvalidTransition { from: "external", to: "form", .. }));
  // nothing was committed
  assert_eq!(m.get(start.flow_id).expect("kept").step_id.as_deref(), Some("auth"));
}

#[tokio::test]
async fn show_progress_fires_on_every_reentry() {
  let m = manager();
  let mut events = m.subscribe();

  let start = m.init("probe", FlowContext::default(), None).await.expect("init");
  assert!(matches!(start.result, FlowResult::ShowProgress(_)));

  let second = m.configure(start.flow_id, None).await.expect("still probing");
  assert!(matches!(second.result, FlowResult::ShowProgress(_)));
  assert!(matches!(events.try_recv(), Ok(FlowEvent::Progressed { .. })));

  let finished = m.configure(start.flow_id, None).await.expect("probe done");
  assert!(matches!(finished.result, FlowResult::ShowProgressDone(_)));
  assert!(matches!(events.try_recv(), Ok(FlowEvent::Progressed { .. })));

  // the declared next step is entered on the following call, with no event
  let next = m.configure(start.flow_id, None).await.expect("next step");
  assert_eq!(next.result.step_id(), Some("done"));
  assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

  // form to form is silent too
  m.configure(start.flow_id, None).await.expect("form again");
  assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}
