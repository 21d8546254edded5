//! Per-definition audit context and the subcommand it serves.
use crate::error::Result;
use crate::execute::{ExecutionOutcome, Executor};
use crate::interactive::{is_ambiguous_response, InteractiveMutator, LoopOutcome, RequestState};
use crate::prompt::Prompt;
use crate::request::builder::{BuildOptions, BuiltOperation, RequestBuilder};
use crate::request::{RequestDescriptor, ServerTarget};
use crate::safety::{SafetyDecision, SafetyGate};
use crate::spec::resolver::{RefContext, RefResolver};
use crate::spec::SpecDocument;
use console::Emoji;
use log::{debug, info};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Workflow {
  Automate,
  Prepare,
  Endpoints,
}

impl Workflow {
  pub fn checks_dangerous(&self) -> bool {
    matches!(self, Workflow::Automate)
  }

  pub fn executes_requests(&self) -> bool {
    matches!(self, Workflow::Automate)
  }

  pub fn prints_spec_info(&self) -> bool {
    !matches!(self, Workflow::Endpoints)
  }
}

/// One executed (or skipped) operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
  pub method: String,
  pub target: String,
  pub status: u16,
  pub preview: String,
  pub curl: String,
  pub attempts: usize,
}

#[derive(Debug, Clone)]
pub struct AuditSettings {
  pub build: BuildOptions,
  pub preview_length: usize,
  /// Enter the interactive mutator on ambiguous statuses.
  pub enhanced: bool,
  pub max_retries: usize,
}

impl Default for AuditSettings {
  fn default() -> Self {
    Self {
      build: BuildOptions::default(),
      preview_length: 50,
      enhanced: false,
      max_retries: 5,
    }
  }
}

/// Everything one definition's run owns. Built fresh per definition so
/// nothing leaks between targets of a bulk run.
pub struct AuditRun<'e> {
  workflow: Workflow,
  executor: &'e Executor,
  resolver: RefResolver,
  gate: SafetyGate,
  settings: AuditSettings,
  records: Vec<AuditRecord>,
  quit: bool,
}

impl<'e> AuditRun<'e> {
  pub fn new(
    workflow: Workflow,
    executor: &'e Executor,
    gate: SafetyGate,
    settings: AuditSettings,
    doc: &SpecDocument,
  ) -> Self {
    Self {
      workflow,
      executor,
      resolver: RefResolver::new(doc.base_dir()),
      gate,
      settings,
      records: Vec::new(),
      quit: false,
    }
  }

  pub fn workflow(&self) -> Workflow {
    self.workflow
  }

  pub fn records(&self) -> &[AuditRecord] {
    &self.records
  }

  pub fn into_records(self) -> Vec<AuditRecord> {
    self.records
  }

  /// The operator asked to stop the whole run.
  pub fn quit_requested(&self) -> bool {
    self.quit
  }

  /// Every operation of every target, without sending anything.
  pub fn prepare(&mut self, doc: &SpecDocument, targets: &[ServerTarget]) -> Result<Vec<BuiltOperation>> {
    let mut out = Vec::new();
    for target in targets {
      let mut builder = RequestBuilder::new(doc, &mut self.resolver, &self.settings.build);
      out.extend(builder.build_all(target)?);
    }
    Ok(out)
  }

  pub fn automate(
    &mut self,
    doc: &SpecDocument,
    targets: &[ServerTarget],
    prompt: &mut dyn Prompt,
  ) -> Result<&[AuditRecord]> {
    self.automate_each(doc, targets, prompt, |_| {})
  }

  /// Like [`AuditRun::automate`], handing every record to `on_record` as
  /// soon as it is settled.
  pub fn automate_each<F>(
    &mut self,
    doc: &SpecDocument,
    targets: &[ServerTarget],
    prompt: &mut dyn Prompt,
    mut on_record: F,
  ) -> Result<&[AuditRecord]>
  where
    F: FnMut(&AuditRecord),
  {
    let ctx = doc.context();
    for target in targets {
      let operations = {
        let mut builder = RequestBuilder::new(doc, &mut self.resolver, &self.settings.build);
        builder.build_all(target)?
      };
      info!(
        "{}{} operations against {}",
        Emoji("🎯", ""),
        operations.len(),
        target.prefix()
      );
      for operation in &operations {
        let record = self.audit_operation(operation, target, &ctx, prompt);
        on_record(&record);
        self.records.push(record);
        if self.quit {
          return Ok(&self.records);
        }
      }
    }
    Ok(&self.records)
  }

  fn gated_execute(&mut self, descriptor: &RequestDescriptor, prompt: &mut dyn Prompt) -> ExecutionOutcome {
    if self.workflow.checks_dangerous() && self.gate.check(&descriptor.url, prompt) == SafetyDecision::Skip {
      return ExecutionOutcome::skipped();
    }
    if !self.workflow.executes_requests() {
      return ExecutionOutcome::skipped();
    }
    self.executor.execute(descriptor)
  }

  fn record(&self, descriptor: &RequestDescriptor, outcome: &ExecutionOutcome, attempts: usize) -> AuditRecord {
    AuditRecord {
      method: descriptor.method.clone(),
      target: descriptor.url.clone(),
      status: outcome.status,
      preview: outcome.preview(self.settings.preview_length),
      curl: descriptor.to_curl(),
      attempts,
    }
  }

  pub fn audit_operation(
    &mut self,
    operation: &BuiltOperation,
    target: &ServerTarget,
    ctx: &RefContext,
    prompt: &mut dyn Prompt,
  ) -> AuditRecord {
    let mut descriptor = operation.descriptor.clone();
    let mut outcome = self.gated_execute(&descriptor, prompt);
    if !(self.settings.enhanced && is_ambiguous_response(outcome.status)) {
      return self.record(&descriptor, &outcome, 1);
    }
    let mutator = InteractiveMutator::new(self.settings.max_retries, &target.prefix());
    let mut state = RequestState::from_descriptor(&descriptor);
    loop {
      match mutator.run(&mut state, outcome.status, &outcome.text, &operation.operation, ctx, prompt) {
        LoopOutcome::Resend => {
          descriptor = state.to_descriptor(mutator.prefix());
          outcome = self.gated_execute(&descriptor, prompt);
          debug!("{}attempt {} -> {}", Emoji("🔁", ""), state.attempt_number, outcome.status);
          if !is_ambiguous_response(outcome.status) {
            break;
          }
        }
        LoopOutcome::Next => break,
        LoopOutcome::Quit => {
          self.quit = true;
          break;
        }
      }
    }
    self.record(&descriptor, &outcome, state.attempt_number)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::execute::tests::{executor, ScriptedTransport};
  use crate::execute::{ExecutorConfig, STATUS_SKIPPED};
  use crate::prompt::ScriptedPrompt;

  const SPEC: &str = r#"{"openapi":"3.0.0","paths":{
    "/users":{"get":{"parameters":[{"name":"limit","in":"query","schema":{"type":"integer"}}]}},
    "/users/reset":{"post":{}},
    "/users/{id}":{"delete":{}}
  }}"#;

  fn doc() -> SpecDocument {
    SpecDocument::from_bytes(SPEC.as_bytes(), None).unwrap()
  }

  #[test]
  fn workflow_capabilities() {
    assert!(Workflow::Automate.checks_dangerous());
    assert!(!Workflow::Prepare.checks_dangerous());
    assert!(!Workflow::Prepare.executes_requests());
    assert!(Workflow::Prepare.prints_spec_info());
    assert!(!Workflow::Endpoints.prints_spec_info());
  }

  #[test]
  fn quiet_automate_skips_dangerous_operations() {
    let transport = ScriptedTransport::default();
    transport.push(200, &[], "[]");
    let exec = executor(&transport, ExecutorConfig::default());
    let doc = doc();
    let mut run = AuditRun::new(
      Workflow::Automate,
      &exec,
      SafetyGate::new(vec![], true),
      AuditSettings::default(),
      &doc,
    );
    let targets = [ServerTarget::new("https://api.example.com", "")];
    let mut prompt = ScriptedPrompt::new(Vec::<String>::new());
    let mut streamed = Vec::new();
    let records = run
      .automate_each(&doc, &targets, &mut prompt, |r| streamed.push(r.status))
      .unwrap()
      .to_vec();
    assert_eq!(streamed, vec![200, STATUS_SKIPPED]);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, 200);
    assert_eq!(records[0].target, "https://api.example.com/users?limit=1");
    assert_eq!(records[1].status, STATUS_SKIPPED);
    assert_eq!(transport.sent.borrow().len(), 1);
  }

  #[test]
  fn enhanced_mode_resends_until_settled() {
    let transport = ScriptedTransport::default();
    transport.push(400, &[], r#"{"error":"limit too small"}"#);
    transport.push(200, &[], "[]");
    let exec = executor(&transport, ExecutorConfig::default());
    let doc = doc();
    let mut run = AuditRun::new(
      Workflow::Automate,
      &exec,
      SafetyGate::new(vec![], true),
      AuditSettings {
        enhanced: true,
        ..Default::default()
      },
      &doc,
    );
    let target = ServerTarget::new("https://api.example.com", "");
    let ops = run.prepare(&doc, std::slice::from_ref(&target)).unwrap();
    let mut prompt = ScriptedPrompt::new(["limit=50"]);
    let record = run.audit_operation(&ops[0], &target, &doc.context(), &mut prompt);
    assert_eq!(record.status, 200);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.target, "https://api.example.com/users?limit=50");
    assert!(!run.quit_requested());
  }

  #[test]
  fn quit_stops_the_run() {
    let transport = ScriptedTransport::default();
    transport.push(500, &[], "boom");
    let exec = executor(&transport, ExecutorConfig::default());
    let doc = doc();
    let mut run = AuditRun::new(
      Workflow::Automate,
      &exec,
      SafetyGate::new(vec![], false),
      AuditSettings {
        enhanced: true,
        ..Default::default()
      },
      &doc,
    );
    let targets = [ServerTarget::new("https://api.example.com", "")];
    let mut prompt = ScriptedPrompt::new(["q"]);
    let records = run.automate(&doc, &targets, &mut prompt).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, 500);
    assert!(run.quit_requested());
  }
}
