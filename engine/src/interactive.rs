//! Read-modify-resend loop for endpoints that answer with an ambiguous status.
use crate::prompt::Prompt;
use crate::request::body::serialize_body;
use crate::request::builder::assemble_url;
use crate::request::{HeaderSet, RequestDescriptor};
use crate::spec::resolver::{resolve_pointer, RefContext};
use crate::spec::value::{get_array, get_str};
use console::Emoji;
use log::error;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

const STANDARD_HEADERS: [&str; 11] = [
  "Accept",
  "Content-Type",
  "User-Agent",
  "Authorization",
  "Accept-Encoding",
  "Accept-Language",
  "Cache-Control",
  "Connection",
  "Cookie",
  "Host",
  "Referer",
];

const BODY_PREVIEW: usize = 500;

#[derive(ThisError, Debug)]
pub enum MutationError {
  #[error("body is not a JSON object, cannot set field {0}")]
  BodyNotObject(String),
  #[error("error parsing JSON body: {0}")]
  Json(#[from] serde_json::Error),
}

/// Worth another try: any 4xx/5xx except 401, 403 and 404.
pub fn is_ambiguous_response(status: u16) -> bool {
  (400..600).contains(&status) && !matches!(status, 401 | 403 | 404)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTarget {
  Path,
  Query,
  Header,
  Body,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedInput {
  Modified,
  Unchanged,
  Invalid(String),
  Next,
  Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
  Resend,
  Next,
  Quit,
}

/// One endpoint's editable request. Every resend starts from the previous
/// state so edits accumulate.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestState {
  pub attempt_number: usize,
  pub method: String,
  pub path_template: String,
  pub path_params: BTreeMap<String, String>,
  pub query_params: BTreeMap<String, String>,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Value>,
  pub content_type: Option<String>,
}

impl RequestState {
  pub fn from_descriptor(descriptor: &RequestDescriptor) -> Self {
    let mut headers = BTreeMap::new();
    for (k, v) in descriptor.headers.iter() {
      headers.insert(k.to_string(), v.to_string());
    }
    Self {
      attempt_number: 1,
      method: descriptor.method.clone(),
      path_template: descriptor.path_template.clone(),
      path_params: descriptor.path_params.clone(),
      query_params: descriptor.query_params.clone(),
      headers,
      body: descriptor.body_value.clone(),
      content_type: descriptor.content_type.clone(),
    }
  }

  pub fn build_url(&self, prefix: &str) -> String {
    assemble_url(prefix, &self.path_template, &self.path_params, &self.query_params)
  }

  /// Re-serialize the current body for the current content type.
  pub fn to_descriptor(&self, prefix: &str) -> RequestDescriptor {
    let mut headers = HeaderSet::from(&self.headers);
    let mut descriptor = RequestDescriptor {
      method: self.method.clone(),
      url: self.build_url(prefix),
      path_template: self.path_template.clone(),
      path_params: self.path_params.clone(),
      query_params: self.query_params.clone(),
      body_value: self.body.clone(),
      ..Default::default()
    };
    if let Some(body) = &self.body {
      let content_type = self
        .content_type
        .clone()
        .unwrap_or_else(|| String::from("application/json"));
      let (bytes, header) = serialize_body(body, &content_type);
      headers.set_content_type(&header);
      descriptor.body = Some(bytes);
      descriptor.content_type = Some(header);
    }
    descriptor.headers = headers;
    descriptor
  }

  pub fn format_request(&self, prefix: &str, max_retries: usize) -> String {
    let mut out = format!(
      "\n=== REQUEST (Attempt {}/{}) ===\nMethod: {}\nURL: {}\n",
      self.attempt_number,
      max_retries,
      self.method,
      self.build_url(prefix)
    );
    let join = |map: &BTreeMap<String, String>| {
      map
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
    };
    if !self.path_params.is_empty() {
      out.push_str(&format!("Path: {}\n", join(&self.path_params)));
    }
    if !self.query_params.is_empty() {
      out.push_str(&format!("Query: {}\n", join(&self.query_params)));
    }
    if !self.headers.is_empty() {
      let redacted: BTreeMap<String, String> = self
        .headers
        .iter()
        .map(|(k, v)| {
          let shown = if k.eq_ignore_ascii_case("authorization") && v.chars().count() > 20 {
            format!("{}...", v.chars().take(15).collect::<String>())
          } else {
            v.clone()
          };
          (k.clone(), shown)
        })
        .collect();
      out.push_str(&format!("Headers: {}\n", join(&redacted)));
    }
    if let Some(body) = &self.body {
      let text = serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string());
      out.push_str(&format!("Body: {}\n", text));
    }
    out
  }
}

fn status_text(status: u16) -> &'static str {
  match status {
    200..=299 => "OK",
    300..=399 => "Redirect",
    400 => "Bad Request",
    401 => "Unauthorized",
    403 => "Forbidden",
    404 => "Not Found",
    422 => "Unprocessable Entity",
    500..=599 => "Server Error",
    _ => "Unknown",
  }
}

pub fn format_response(status: u16, body: &str) -> String {
  let mut out = format!("\n=== RESPONSE ===\nStatus: {} {}\n", status, status_text(status));
  if let Ok(json) = serde_json::from_str::<Value>(body) {
    if let Ok(pretty) = serde_json::to_string_pretty(&json) {
      out.push_str(&format!("Body: {}\n", pretty));
      return out;
    }
  }
  let total = body.chars().count();
  if total > BODY_PREVIEW {
    let head: String = body.chars().take(BODY_PREVIEW).collect();
    out.push_str(&format!("Body: {}...\n[truncated, {} chars total]\n", head, total));
  } else {
    out.push_str(&format!("Body: {}\n", body));
  }
  out
}

/// JSON first, then integer, float, bool, and finally the raw string.
pub fn parse_value(value: &str) -> Value {
  if let Ok(json) = serde_json::from_str::<Value>(value) {
    return json;
  }
  if let Ok(i) = value.parse::<i64>() {
    return Value::from(i);
  }
  if let Ok(f) = value.parse::<f64>() {
    if let Some(n) = serde_json::Number::from_f64(f) {
      return Value::Number(n);
    }
  }
  match value.to_ascii_lowercase().as_str() {
    "true" | "t" => Value::Bool(true),
    "false" | "f" => Value::Bool(false),
    _ => Value::String(value.to_string()),
  }
}

/// Set `a.b.c` inside `map`, creating intermediate objects. An empty value
/// removes the leaf.
pub fn set_nested_field(map: &mut Map<String, Value>, path: &str, value: &str) {
  let mut parts: Vec<&str> = path.split('.').collect();
  let Some(leaf) = parts.pop() else {
    return;
  };
  let mut current = map;
  for part in parts {
    let slot = current
      .entry(part.to_string())
      .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
      *slot = Value::Object(Map::new());
    }
    let Value::Object(next) = slot else {
      return;
    };
    current = next;
  }
  if value.is_empty() {
    current.remove(leaf);
  } else {
    current.insert(leaf.to_string(), parse_value(value));
  }
}

/// Existing path params win, then query params, then top-level body keys.
/// Unknown keys become query params.
pub fn determine_field_target(key: &str, state: &RequestState) -> FieldTarget {
  if state.path_params.contains_key(key) {
    FieldTarget::Path
  } else if state.query_params.contains_key(key) {
    FieldTarget::Query
  } else if matches!(&state.body, Some(Value::Object(map)) if map.contains_key(key)) {
    FieldTarget::Body
  } else {
    FieldTarget::Query
  }
}

fn upsert(map: &mut BTreeMap<String, String>, key: &str, value: &str) {
  if value.is_empty() {
    map.remove(key);
  } else {
    map.insert(key.to_string(), value.to_string());
  }
}

pub fn apply_modification(
  target: FieldTarget,
  key: &str,
  value: &str,
  state: &mut RequestState,
) -> Result<(), MutationError> {
  match target {
    FieldTarget::Path => upsert(&mut state.path_params, key, value),
    FieldTarget::Query => upsert(&mut state.query_params, key, value),
    FieldTarget::Header => {
      state.headers.retain(|k, _| !k.eq_ignore_ascii_case(key));
      let is_content_type = key.eq_ignore_ascii_case("Content-Type");
      if value.is_empty() {
        if is_content_type {
          state.content_type = None;
        }
      } else {
        state.headers.insert(key.to_string(), value.to_string());
        if is_content_type {
          state.content_type = Some(value.to_string());
        }
      }
    }
    FieldTarget::Body => match &mut state.body {
      Some(Value::Object(map)) => set_nested_field(map, key, value),
      _ => return Err(MutationError::BodyNotObject(key.to_string())),
    },
  }
  Ok(())
}

fn apply_key_value(
  input: &str,
  target: Option<FieldTarget>,
  state: &mut RequestState,
) -> Result<(), MutationError> {
  let (key, value) = input.split_once('=').unwrap_or((input, ""));
  let key = key.trim();
  let value = value.trim();
  let target = target.unwrap_or_else(|| determine_field_target(key, state));
  apply_modification(target, key, value, state)
}

fn strip_prefix_ci<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
  let head = input.get(..prefix.len())?;
  head
    .eq_ignore_ascii_case(prefix)
    .then(|| input[prefix.len()..].trim())
}

fn outcome(result: Result<(), MutationError>) -> ParsedInput {
  match result {
    Ok(()) => ParsedInput::Modified,
    Err(err) => ParsedInput::Invalid(err.to_string()),
  }
}

/// Apply one line of operator input to `state`.
pub fn parse_user_input(input: &str, state: &mut RequestState) -> ParsedInput {
  let input = input.trim();
  match input.to_ascii_lowercase().as_str() {
    "n" | "next" => return ParsedInput::Next,
    "q" | "quit" => return ParsedInput::Quit,
    _ => {}
  }
  if let Some(verb) = strip_prefix_ci(input, "method:") {
    if verb.is_empty() {
      return ParsedInput::Unchanged;
    }
    state.method = verb.to_uppercase();
    return ParsedInput::Modified;
  }
  if let Some(raw) = strip_prefix_ci(input, "body:") {
    return outcome(
      serde_json::from_str::<Value>(raw)
        .map(|v| state.body = Some(v))
        .map_err(MutationError::from),
    );
  }
  for (prefix, target) in [
    ("path:", FieldTarget::Path),
    ("query:", FieldTarget::Query),
    ("headers:", FieldTarget::Header),
    ("header:", FieldTarget::Header),
  ] {
    if let Some(kv) = strip_prefix_ci(input, prefix) {
      if !kv.contains('=') {
        return ParsedInput::Unchanged;
      }
      return outcome(apply_key_value(kv, Some(target), state));
    }
  }
  if input.starts_with('{') || input.starts_with('[') {
    return outcome(
      serde_json::from_str::<Value>(input)
        .map(|v| state.body = Some(v))
        .map_err(MutationError::from),
    );
  }
  if input.contains('=') {
    return outcome(apply_key_value(input, None, state));
  }
  ParsedInput::Unchanged
}

fn is_standard_header(name: &str) -> bool {
  STANDARD_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

fn is_parameter_defined(name: &str, location: &str, parameters: &[Value], ctx: &RefContext) -> bool {
  parameters.iter().any(|param| {
    let param = match get_str(param, "$ref") {
      Some(reference) => match reference.strip_prefix('#') {
        Some(pointer) => resolve_pointer(ctx.document(), pointer),
        None => None,
      },
      None => Some(param),
    };
    param.is_some_and(|p| {
      let in_matches = get_str(p, "in") == Some(location);
      let name_matches = match location {
        "header" => get_str(p, "name").is_some_and(|n| n.eq_ignore_ascii_case(name)),
        _ => get_str(p, "name") == Some(name),
      };
      in_matches && name_matches
    })
  })
}

/// Names in `state` that the operation never declares.
pub fn validate_mutation(state: &RequestState, operation: &Value, ctx: &RefContext) -> Vec<String> {
  let parameters = get_array(operation, "parameters");
  let mut warnings = Vec::new();
  for key in state.path_params.keys() {
    if !is_parameter_defined(key, "path", parameters, ctx) {
      warnings.push(format!("WARNING: Path parameter '{}' not defined in spec", key));
    }
  }
  for key in state.query_params.keys() {
    if !is_parameter_defined(key, "query", parameters, ctx) {
      warnings.push(format!("WARNING: Query parameter '{}' not defined in spec", key));
    }
  }
  for key in state.headers.keys() {
    if !is_standard_header(key) && !is_parameter_defined(key, "header", parameters, ctx) {
      warnings.push(format!("WARNING: Header '{}' not defined in spec", key));
    }
  }
  warnings
}

fn confirm_warnings(warnings: &[String], prompt: &mut dyn Prompt) -> bool {
  if warnings.is_empty() {
    return true;
  }
  let rule = "=".repeat(50);
  prompt.write(&format!("\n{}\n{}\n{}\n", rule, warnings.join("\n"), rule));
  prompt.write("Continue outside spec? [Y/n]: ");
  let answer = prompt.read_line().unwrap_or_default().trim().to_lowercase();
  matches!(answer.as_str(), "" | "y" | "yes")
}

pub struct InteractiveMutator {
  max_retries: usize,
  prefix: String,
}

impl InteractiveMutator {
  /// `prefix` is the origin plus base path the request URLs are built on.
  pub fn new(max_retries: usize, prefix: &str) -> Self {
    Self {
      max_retries,
      prefix: prefix.to_string(),
    }
  }

  pub fn max_retries(&self) -> usize {
    self.max_retries
  }

  pub fn prefix(&self) -> &str {
    &self.prefix
  }

  pub fn run(
    &self,
    state: &mut RequestState,
    status: u16,
    body: &str,
    operation: &Value,
    ctx: &RefContext,
    prompt: &mut dyn Prompt,
  ) -> LoopOutcome {
    loop {
      if state.attempt_number > self.max_retries {
        prompt.write(&format!(
          "\n=== MAX RETRIES REACHED ({}/{}) ===\nAuto-advancing to next endpoint.\n",
          self.max_retries, self.max_retries
        ));
        return LoopOutcome::Next;
      }
      prompt.write(&state.format_request(&self.prefix, self.max_retries));
      prompt.write(&format_response(status, body));
      prompt.write("\n[Modify request or N for next]: ");
      let Some(line) = prompt.read_line() else {
        error!("{}error reading input", Emoji("💢", ""));
        return LoopOutcome::Next;
      };
      match parse_user_input(&line, state) {
        ParsedInput::Quit => return LoopOutcome::Quit,
        ParsedInput::Next => return LoopOutcome::Next,
        ParsedInput::Modified => {
          let warnings = validate_mutation(state, operation, ctx);
          if !confirm_warnings(&warnings, prompt) {
            continue;
          }
          state.attempt_number += 1;
          return LoopOutcome::Resend;
        }
        ParsedInput::Invalid(message) => prompt.write(&format!("{}\n", message)),
        ParsedInput::Unchanged => {
          prompt.write("No modification detected. Enter a modification or 'N' to continue.\n")
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::prompt::ScriptedPrompt;
  use serde_json::json;
  use std::rc::Rc;

  fn state() -> RequestState {
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    RequestState {
      attempt_number: 1,
      method: "POST".into(),
      path_template: "/users/{id}".into(),
      path_params: BTreeMap::from([("id".to_string(), "1".to_string())]),
      query_params: BTreeMap::new(),
      headers,
      body: Some(json!({"name":"bishopfox"})),
      content_type: Some("application/json".into()),
    }
  }

  fn operation() -> Value {
    json!({"parameters":[
      {"name":"id","in":"path"},
      {"$ref":"#/components/parameters/Limit"},
      {"name":"X-Trace","in":"header"}
    ]})
  }

  fn ctx() -> RefContext {
    RefContext::new(
      Rc::new(json!({"components":{"parameters":{"Limit":{"name":"limit","in":"query"}}}})),
      None,
    )
  }

  #[test]
  fn ambiguous_statuses() {
    for s in [400, 405, 422, 429, 500, 501, 502, 503] {
      assert!(is_ambiguous_response(s), "{}", s);
    }
    for s in [200, 301, 401, 403, 404] {
      assert!(!is_ambiguous_response(s), "{}", s);
    }
  }

  #[test]
  fn query_modification_resends_once() {
    let mut s = state();
    let mut prompt = ScriptedPrompt::new(["query:limit=50"]);
    let mutator = InteractiveMutator::new(5, "https://api.example.com");
    let outcome = mutator.run(&mut s, 400, "{}", &operation(), &ctx(), &mut prompt);
    assert_eq!(outcome, LoopOutcome::Resend);
    assert_eq!(s.query_params.get("limit").map(String::as_str), Some("50"));
    assert_eq!(s.attempt_number, 2);
    assert!(prompt.output.contains("=== REQUEST (Attempt 1/5) ==="));
  }

  #[test]
  fn next_and_quit() {
    let mutator = InteractiveMutator::new(5, "");
    let mut s = state();
    let mut prompt = ScriptedPrompt::new(["n"]);
    assert_eq!(mutator.run(&mut s, 400, "", &operation(), &ctx(), &mut prompt), LoopOutcome::Next);
    let mut prompt = ScriptedPrompt::new(["QUIT"]);
    assert_eq!(mutator.run(&mut s, 400, "", &operation(), &ctx(), &mut prompt), LoopOutcome::Quit);
    assert_eq!(s.attempt_number, 1);
  }

  #[test]
  fn max_retries_exits_without_prompting() {
    let mutator = InteractiveMutator::new(2, "");
    let mut s = state();
    s.attempt_number = 3;
    let mut prompt = ScriptedPrompt::new(["query:limit=1"]);
    assert_eq!(mutator.run(&mut s, 500, "", &operation(), &ctx(), &mut prompt), LoopOutcome::Next);
    assert_eq!(prompt.remaining(), 1);
    assert!(prompt.output.contains("MAX RETRIES REACHED (2/2)"));
  }

  #[test]
  fn unchanged_input_prompts_again() {
    let mutator = InteractiveMutator::new(5, "");
    let mut s = state();
    let mut prompt = ScriptedPrompt::new(["hello", "next"]);
    assert_eq!(mutator.run(&mut s, 422, "", &operation(), &ctx(), &mut prompt), LoopOutcome::Next);
    assert!(prompt.output.contains("No modification detected"));
  }

  #[test]
  fn undeclared_names_need_confirmation() {
    let mutator = InteractiveMutator::new(5, "");
    let mut s = state();
    let mut prompt = ScriptedPrompt::new(["query:debug=1", "n", "n"]);
    assert_eq!(mutator.run(&mut s, 400, "", &operation(), &ctx(), &mut prompt), LoopOutcome::Next);
    assert!(prompt.output.contains("WARNING: Query parameter 'debug' not defined in spec"));
    assert_eq!(s.attempt_number, 1);

    let mut prompt = ScriptedPrompt::new(["header:x-trace=abc", ""]);
    assert_eq!(mutator.run(&mut s, 400, "", &operation(), &ctx(), &mut prompt), LoopOutcome::Resend);
  }

  #[test]
  fn key_value_targets() {
    let mut s = state();
    assert_eq!(determine_field_target("id", &s), FieldTarget::Path);
    assert_eq!(determine_field_target("name", &s), FieldTarget::Body);
    assert_eq!(determine_field_target("other", &s), FieldTarget::Query);
    assert_eq!(parse_user_input("name=alice", &mut s), ParsedInput::Modified);
    assert_eq!(s.body, Some(json!({"name":"alice"})));
    assert_eq!(parse_user_input("id=", &mut s), ParsedInput::Modified);
    assert!(s.path_params.is_empty());
  }

  #[test]
  fn header_edits_track_content_type() {
    let mut s = state();
    parse_user_input("header:content-type=application/xml", &mut s);
    assert_eq!(s.headers.len(), 1);
    assert_eq!(s.content_type.as_deref(), Some("application/xml"));
    let descriptor = s.to_descriptor("https://x.example");
    assert_eq!(descriptor.body_text().as_deref(), Some("<root><name>bishopfox</name></root>"));
    assert_eq!(descriptor.headers.count("content-type"), 1);
    parse_user_input("headers:Content-Type=", &mut s);
    assert!(s.headers.is_empty());
    assert_eq!(s.content_type, None);
  }

  #[test]
  fn body_edits() {
    let mut s = state();
    assert_eq!(parse_user_input("body:{\"a\":[1]}", &mut s), ParsedInput::Modified);
    assert_eq!(s.body, Some(json!({"a":[1]})));
    assert!(matches!(parse_user_input("{broken", &mut s), ParsedInput::Invalid(_)));
    assert_eq!(parse_user_input("[1,2]", &mut s), ParsedInput::Modified);
    let err = apply_modification(FieldTarget::Body, "x", "1", &mut s).unwrap_err();
    assert!(err.to_string().contains("cannot set field x"));
    assert_eq!(parse_user_input("method: put", &mut s), ParsedInput::Modified);
    assert_eq!(s.method, "PUT");
  }

  #[test]
  fn nested_fields_and_values() {
    let mut map = Map::new();
    set_nested_field(&mut map, "user.address.zip", "02139");
    set_nested_field(&mut map, "user.active", "true");
    set_nested_field(&mut map, "ratio", "0.5");
    set_nested_field(&mut map, "name", "plain text");
    assert_eq!(
      Value::Object(map.clone()),
      json!({"user":{"address":{"zip":2139},"active":true},"ratio":0.5,"name":"plain text"})
    );
    set_nested_field(&mut map, "user.active", "");
    assert_eq!(map["user"], json!({"address":{"zip":2139}}));
  }

  #[test]
  fn rendering() {
    let mut s = state();
    s.headers.insert("Authorization".into(), "Bearer abcdefghijklmnopqrstuvwxyz".into());
    let text = s.format_request("https://x.example", 3);
    assert!(text.contains("Authorization=Bearer abcdefgh..."));
    assert!(text.contains("URL: https://x.example/users/1"));
    let long = "x".repeat(600);
    let response = format_response(502, &long);
    assert!(response.contains("Status: 502 Server Error"));
    assert!(response.contains("[truncated, 600 chars total]"));
    assert!(format_response(400, "{\"e\":1}").contains("\"e\": 1"));
  }
}
