pub mod auth;
pub mod cli;
pub mod error;
pub mod input;
pub mod output;

use crate::auth::{Credentials, apply_security_schemes};
use crate::cli::{
  AutomateArgs, BruteArgs, ExternalTool, OutputFormat, PrepareArgs, SubCommand, SwaggerWardConfig,
};
use crate::error::{Result, new_config_error};
use crate::input::{LoadedSpec, fetch_spec, load_local_spec, read_url_file};
use crate::output::{AutomateRunReport, BulkAutomateReport, Output, ResultSet, SpecResults};
use console::Emoji;
use engine::discovery::{
  DiscoveredSpec, DiscoveryOptions, OnDiscovered, SpecLocator, normalize_target_input,
};
use engine::error::Error as EngineError;
use engine::execute::Executor;
use engine::prompt::{ConsolePrompt, Prompt};
use engine::request::builder::{BuildOptions, endpoint_paths};
use engine::request::parse_header_line;
use engine::request::target::{ServerTarget, TargetOptions, normalize_base_path, resolve_targets};
use engine::safety::SafetyGate;
use engine::spec::SpecDocument;
use engine::spec::schema::ExampleOptions;
use engine::workflow::{AuditRun, AuditSettings, Workflow};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::Value;

/// What automate applies to every definition it audits.
#[derive(Debug, Clone)]
pub struct AutomateSettings {
  pub format: OutputFormat,
  pub accessible_only: bool,
  pub test_string: String,
  pub verbose: bool,
  pub preview_length: usize,
  pub enhanced: bool,
  pub max_retries: usize,
}

impl Default for AutomateSettings {
  fn default() -> Self {
    Self {
      format: OutputFormat::Console,
      accessible_only: false,
      test_string: String::from("bishopfox"),
      verbose: false,
      preview_length: 50,
      enhanced: false,
      max_retries: 5,
    }
  }
}

impl From<&AutomateArgs> for AutomateSettings {
  fn from(args: &AutomateArgs) -> Self {
    Self {
      format: args.output_format,
      accessible_only: args.get_accessible_endpoints,
      test_string: args.test_string.clone(),
      verbose: args.verbose,
      preview_length: args.response_preview_length,
      enhanced: args.enhanced,
      max_retries: args.max_retries,
    }
  }
}

impl AutomateSettings {
  fn json(&self) -> bool {
    self.format == OutputFormat::Json
  }
}

/// A discovered definition as `brute` prints it.
#[derive(Serialize)]
struct Finding<'a> {
  #[serde(flatten)]
  found: &'a DiscoveredSpec,
  spec: &'a Value,
}

/// Operator-facing state of a run: configuration, output sink and prompt.
pub struct Session {
  config: SwaggerWardConfig,
  output: Output,
  prompt: Box<dyn Prompt>,
  quit: bool,
}

impl Session {
  pub fn new(config: SwaggerWardConfig, output: Output, prompt: Box<dyn Prompt>) -> Self {
    Self {
      config,
      output,
      prompt,
      quit: false,
    }
  }

  fn target_options(&self, spec_url: &str) -> TargetOptions {
    TargetOptions {
      target_override: self.config.target.clone(),
      base_path_override: self.config.base_path.clone(),
      spec_url: Some(spec_url.to_string()),
    }
  }

  fn build_options(&self, credentials: Credentials, test_string: &str, with_cli_headers: bool) -> BuildOptions {
    let mut headers = credentials.headers;
    if with_cli_headers {
      headers.extend(self.config.headers.iter().filter_map(|l| parse_header_line(l)));
    }
    BuildOptions {
      examples: ExampleOptions {
        test_string: test_string.to_string(),
        date: self.config.date.clone(),
        ..Default::default()
      },
      content_type: self.config.content_type.clone(),
      api_key_query: credentials.api_key_query,
      headers,
    }
  }

  fn targets(&self, loaded: &LoadedSpec, announce: bool) -> Result<Vec<ServerTarget>> {
    let targets = resolve_targets(&loaded.spec, &self.target_options(&loaded.source));
    if targets.is_empty() {
      return Err(
        EngineError::InvalidTarget(format!(
          "no server could be determined for {}, supply a target with -T",
          loaded.source
        ))
        .into(),
      );
    }
    if announce && targets.len() > 1 && self.config.target.is_none() && !self.config.quiet {
      warn!(
        "{}multiple servers detected, set one with -T to test a single server",
        Emoji("⚠️", "")
      );
      for (i, t) in targets.iter().enumerate() {
        info!("{}server {}: {}", Emoji("🌐", ""), i + 1, t.prefix());
      }
    }
    Ok(targets)
  }

  fn spec_info(&mut self, spec: &SpecDocument) {
    if spec.title().is_empty() && spec.description().is_empty() {
      warn!(
        "{}possible error parsing the definition file, title and description are empty",
        Emoji("⚠️", "")
      );
    }
    self.output.spec_info(spec.title(), spec.description());
  }

  /// Send every operation of one definition and collect the report.
  pub fn audit_spec(
    &mut self,
    executor: &Executor,
    loaded: &LoadedSpec,
    settings: &AutomateSettings,
  ) -> Result<AutomateRunReport> {
    let spec = &loaded.spec;
    let json = settings.json();
    let credentials = apply_security_schemes(spec, self.config.quiet, json, self.prompt.as_mut());
    if !json {
      self.spec_info(spec);
    }
    let targets = self.targets(loaded, !json)?;
    let audit = AuditSettings {
      build: self.build_options(credentials, &settings.test_string, false),
      preview_length: settings.preview_length,
      enhanced: settings.enhanced,
      max_retries: settings.max_retries,
    };
    let gate = SafetyGate::new(self.config.safe_word.clone(), self.config.quiet);
    let mut run = AuditRun::new(Workflow::Automate, executor, gate, audit, spec);
    let print_lines = !json && !settings.accessible_only;
    let output = &mut self.output;
    let records = run.automate_each(spec, &targets, self.prompt.as_mut(), |record| {
      if print_lines {
        output.record(record, settings.verbose);
      }
    })?;
    if !json && settings.accessible_only {
      output.accessible(records);
    }
    let results = ResultSet::from_records(records, settings.verbose, settings.accessible_only);
    if run.quit_requested() {
      info!("{}quit requested, stopping the run", Emoji("🛑", ""));
      self.quit = true;
    }
    Ok(AutomateRunReport {
      input: loaded.source.clone(),
      spec_url: loaded.source.clone(),
      api_title: spec.title().to_string(),
      description: spec.description().to_string(),
      results: Some(results),
      ..Default::default()
    })
  }
}

pub struct SwaggerWard {
  executor: Executor,
  session: Session,
}

impl SwaggerWard {
  pub fn new(config: SwaggerWardConfig) -> Result<Self> {
    config.validate()?;
    let output = Output::new(config.outfile.as_deref())?;
    let executor = config.executor();
    Ok(Self::with_parts(
      executor,
      Session::new(config, output, Box::new(ConsolePrompt::default())),
    ))
  }

  pub fn with_parts(executor: Executor, session: Session) -> Self {
    Self { executor, session }
  }

  pub fn run(&mut self) -> Result<()> {
    match self.session.config.command.clone() {
      SubCommand::Automate(args) => self.automate(&args),
      SubCommand::Brute(args) => self.brute(&args),
      SubCommand::Endpoints(_) => self.endpoints(),
      SubCommand::Prepare(args) => self.prepare(&args),
    }
  }

  fn log_rate(&self) {
    if self.session.config.rate > 0 {
      info!(
        "{}sending requests at a rate of {} requests per second",
        Emoji("⏱️", ""),
        self.session.config.rate
      );
    } else {
      info!("{}sending requests with no rate limit", Emoji("⏱️", ""));
    }
  }

  /// `--url` or `--local-file`, whichever was given.
  fn load_definition(&self) -> Result<LoadedSpec> {
    let config = &self.session.config;
    match (&config.local_file, &config.url) {
      (Some(path), _) => load_local_spec(path, config.format),
      (None, Some(url)) => fetch_spec(&self.executor, url.trim(), config.format),
      (None, None) => Err(new_config_error("a definition is required: provide --url or --local-file")),
    }
  }

  fn automate_targets(&self, args: &AutomateArgs) -> Result<Vec<String>> {
    if let Some(path) = &args.url_file {
      let parsed = read_url_file(path).map_err(|err| {
        new_config_error(&format!("error loading URL file {}: {}", path.to_string_lossy(), err))
      })?;
      for line in &parsed.invalid {
        warn!("{}skipping invalid URL file entry: {}", Emoji("⚠️", ""), line);
      }
      if parsed.targets.is_empty() {
        return Err(new_config_error("no valid entries found in --url-file"));
      }
      return Ok(parsed.targets);
    }
    let url = self.session.config.url.as_deref().unwrap_or_default();
    Ok(vec![normalize_target_input(url)?.to_string()])
  }

  pub fn automate(&mut self, args: &AutomateArgs) -> Result<()> {
    let settings = AutomateSettings::from(args);
    let json = settings.json();
    if !json {
      info!("{}gathering API details", Emoji("🔍", ""));
      self.log_rate();
    }
    if self.session.config.local_file.is_some() {
      let loaded = self.load_definition()?;
      let report = self.session.audit_spec(&self.executor, &loaded, &settings)?;
      if json {
        self.session.output.json(&single_results(report))?;
      }
      return Ok(());
    }

    let targets = self.automate_targets(args)?;
    let single = targets.len() == 1;
    let mut aggregate = json && !single;
    let mut reports = Vec::new();
    for target in targets {
      if self.session.quit {
        break;
      }
      match fetch_spec(&self.executor, &target, self.session.config.format) {
        Ok(loaded) => {
          let mut report = match self.session.audit_spec(&self.executor, &loaded, &settings) {
            Ok(report) => report,
            Err(err) if single => return Err(err),
            Err(err) => failed_run(&target, &loaded.source, false, "direct", err.to_string()),
          };
          report.input = target;
          report.discovery_phase = String::from("direct");
          reports.push(report);
        }
        Err(err) if !args.fallback_brute => {
          if single {
            return Err(err);
          }
          let msg = format!("failed to load API specification from URL '{}': {}", target, err);
          error!("{}{}", Emoji("💢", ""), msg);
          reports.push(failed_run(&target, &target, false, "direct", msg));
        }
        Err(_) => {
          aggregate |= json;
          let found = SpecLocator::new(&self.executor).discover(
            &target,
            None,
            DiscoveryOptions {
              continue_search: true,
              show_progress: !json,
              ..Default::default()
            },
          );
          let found = match found {
            Ok(found) if !found.is_empty() => found,
            Ok(_) => {
              let msg = format!("fallback discovery failed for '{}': no definition found", target);
              error!("{}{}", Emoji("💢", ""), msg);
              reports.push(failed_run(&target, &target, true, "brute", msg));
              continue;
            }
            Err(err) => {
              let msg = format!("fallback discovery failed for '{}': {}", target, err);
              error!("{}{}", Emoji("💢", ""), msg);
              reports.push(failed_run(&target, &target, true, "brute", msg));
              continue;
            }
          };
          for discovered in found {
            if self.session.quit {
              break;
            }
            let phase = discovered.phase.to_string();
            let loaded = LoadedSpec {
              source: discovered.url,
              spec: discovered.spec,
            };
            let mut report = match self.session.audit_spec(&self.executor, &loaded, &settings) {
              Ok(report) => report,
              Err(err) => failed_run(&target, &loaded.source, true, &phase, err.to_string()),
            };
            report.input = target.clone();
            report.discovery_used = true;
            report.discovery_phase = phase;
            reports.push(report);
          }
        }
      }
    }

    if json {
      if aggregate {
        self.session.output.json(&BulkAutomateReport::new(reports))?;
      } else if let Some(report) = reports.into_iter().next() {
        self.session.output.json(&single_results(report))?;
      }
    }
    Ok(())
  }

  pub fn brute(&mut self, args: &BruteArgs) -> Result<()> {
    let seed = self.session.config.url.clone().unwrap_or_default();
    self.log_rate();
    let settings = AutomateSettings::default();
    let SwaggerWard { executor, session } = self;
    let executor: &Executor = executor;
    let on_discovered: Option<OnDiscovered<'_>> = if args.run_automate {
      let settings = &settings;
      let session = &mut *session;
      Some(Box::new(move |found: &DiscoveredSpec| {
        if session.quit {
          return;
        }
        info!("{}running automate against {}", Emoji("🚀", ""), found.url);
        let loaded = LoadedSpec {
          source: found.url.clone(),
          spec: found.spec.clone(),
        };
        if let Err(err) = session.audit_spec(executor, &loaded, settings) {
          error!("{}{}: {}", Emoji("💢", ""), found.url, err);
        }
      }))
    } else {
      None
    };
    let found = SpecLocator::new(executor).discover(
      seed.trim(),
      args.wordlist.as_deref(),
      DiscoveryOptions {
        continue_search: args.continue_search,
        max_found: args.max_found,
        show_progress: true,
        on_discovered,
        ..Default::default()
      },
    )?;
    if args.run_automate {
      return Ok(());
    }
    if args.endpoint_only {
      for discovered in &found {
        session.output.line(&discovered.url);
      }
      return Ok(());
    }
    let findings: Vec<Finding> = found
      .iter()
      .map(|found| Finding {
        found,
        spec: found.spec.root(),
      })
      .collect();
    session.output.json(&findings)?;
    if let Some(path) = &session.config.outfile {
      info!("{}wrote file to {}", Emoji("📝", ""), path.to_string_lossy());
    }
    Ok(())
  }

  pub fn endpoints(&mut self) -> Result<()> {
    info!("{}gathering endpoints", Emoji("🔍", ""));
    let loaded = self.load_definition()?;
    let base_path = resolve_targets(&loaded.spec, &self.session.target_options(&loaded.source))
      .first()
      .map(|t| t.base_path.clone())
      .or_else(|| self.session.config.base_path.as_deref().map(normalize_base_path))
      .unwrap_or_default();
    for path in endpoint_paths(&loaded.spec, &base_path) {
      self.session.output.line(&path);
    }
    Ok(())
  }

  pub fn prepare(&mut self, args: &PrepareArgs) -> Result<()> {
    info!("{}gathering API details", Emoji("🔍", ""));
    let loaded = self.load_definition()?;
    let session = &mut self.session;
    let credentials = apply_security_schemes(&loaded.spec, session.config.quiet, false, session.prompt.as_mut());
    session.spec_info(&loaded.spec);
    let targets = session.targets(&loaded, true)?;
    let settings = AuditSettings {
      build: session.build_options(credentials, "bishopfox", true),
      ..Default::default()
    };
    let gate = SafetyGate::new(session.config.safe_word.clone(), true);
    let mut run = AuditRun::new(Workflow::Prepare, &self.executor, gate, settings, &loaded.spec);
    for operation in run.prepare(&loaded.spec, &targets)? {
      let line = match args.external_tool {
        ExternalTool::Curl => operation.descriptor.to_curl(),
        ExternalTool::Sqlmap => operation.descriptor.to_sqlmap(),
      };
      session.output.line(&line);
    }
    Ok(())
  }
}

fn failed_run(input: &str, spec_url: &str, discovery_used: bool, phase: &str, error: String) -> AutomateRunReport {
  AutomateRunReport {
    input: input.to_string(),
    spec_url: spec_url.to_string(),
    discovery_used,
    discovery_phase: phase.to_string(),
    error,
    ..Default::default()
  }
}

fn single_results(report: AutomateRunReport) -> SpecResults {
  SpecResults {
    api_title: report.api_title,
    description: report.description,
    results: report.results.unwrap_or(ResultSet::Plain(Vec::new())),
  }
}
