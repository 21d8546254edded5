//! Turns every documented operation into a concrete request.
use crate::error::{new_spec_error, Result};
use crate::request::body::serialize_body;
use crate::request::target::ServerTarget;
use crate::request::{HeaderSet, RequestDescriptor};
use crate::spec::resolver::{RefContext, RefResolver};
use crate::spec::schema::{generate_example, ExampleOptions, SchemaKind, Synthesizer};
use crate::spec::value::{get, get_array, get_map, get_str, scalar_to_string};
use crate::spec::SpecDocument;
use console::Emoji;
use log::debug;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Methods requested, in order. DELETE and PATCH are never generated.
pub const METHODS: [&str; 6] = ["get", "post", "put", "head", "options", "trace"];

const PATH_SEGMENT: &AsciiSet = &CONTROLS
  .add(b' ')
  .add(b'"')
  .add(b'#')
  .add(b'%')
  .add(b'/')
  .add(b'<')
  .add(b'>')
  .add(b'?')
  .add(b'`')
  .add(b'{')
  .add(b'}');

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
  pub examples: ExampleOptions,
  /// Operator-forced request content type.
  pub content_type: Option<String>,
  /// API key appended to every query string.
  pub api_key_query: Option<(String, String)>,
  /// Headers added to every request unless the operation sets them.
  pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct BuiltOperation {
  pub path: String,
  pub method: String,
  /// The operation with path-level parameters merged in.
  pub operation: Value,
  pub descriptor: RequestDescriptor,
}

impl BuiltOperation {
  /// `responses.<status>.description`, when documented.
  pub fn response_description(&self, status: u16) -> Option<String> {
    get(&self.operation, "responses")
      .and_then(|r| get(r, &status.to_string()))
      .and_then(|r| get_str(r, "description"))
      .map(String::from)
  }
}

/// Join a prefix, a path template with substituted parameters and an
/// encoded query string.
pub fn assemble_url(
  prefix: &str,
  template: &str,
  path_params: &BTreeMap<String, String>,
  query_params: &BTreeMap<String, String>,
) -> String {
  let mut path = template.to_string();
  for (k, v) in path_params {
    let encoded = utf8_percent_encode(v, PATH_SEGMENT).to_string();
    path = path.replace(&format!("{{{}}}", k), &encoded);
  }
  let mut url = format!("{}{}", prefix, path);
  if !query_params.is_empty() {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in query_params {
      query.append_pair(k, v);
    }
    url.push('?');
    url.push_str(&query.finish());
  }
  url
}

fn placeholders(template: &str) -> Vec<String> {
  let mut out = Vec::new();
  let mut rest = template;
  while let Some(start) = rest.find('{') {
    let Some(len) = rest[start..].find('}') else {
      break;
    };
    out.push(rest[start + 1..start + len].to_string());
    rest = &rest[start + len + 1..];
  }
  out
}

fn param_string(value: &Value) -> String {
  match value {
    Value::Array(items) => items
      .iter()
      .map(scalar_to_string)
      .collect::<Vec<_>>()
      .join(","),
    other => scalar_to_string(other),
  }
}

/// Documented paths prefixed with the base path, deduplicated.
pub fn endpoint_paths(doc: &SpecDocument, base_path: &str) -> Vec<String> {
  let mut out: Vec<String> = Vec::new();
  for path in doc.paths().into_iter().flat_map(|p| p.keys()) {
    let full = format!("{}{}", base_path, path);
    if !out.contains(&full) {
      out.push(full);
    }
  }
  out
}

pub struct RequestBuilder<'a> {
  doc: &'a SpecDocument,
  synthesizer: Synthesizer<'a>,
  options: &'a BuildOptions,
}

#[derive(Default)]
struct Assembly {
  path_params: BTreeMap<String, String>,
  query_params: BTreeMap<String, String>,
  headers: HeaderSet,
  cookies: Vec<String>,
  body: Option<Value>,
  form: Map<String, Value>,
  has_file: bool,
}

impl<'a> RequestBuilder<'a> {
  pub fn new(doc: &'a SpecDocument, resolver: &'a mut RefResolver, options: &'a BuildOptions) -> Self {
    Self {
      doc,
      synthesizer: Synthesizer::new(resolver),
      options,
    }
  }

  pub fn build_all(&mut self, target: &ServerTarget) -> Result<Vec<BuiltOperation>> {
    let paths = self
      .doc
      .paths()
      .ok_or_else(|| new_spec_error("could not find any defined operations"))?
      .clone();
    let ctx = self.doc.context();
    let mut built = Vec::new();
    for (path, item) in &paths {
      let (item, item_ctx) = self.synthesizer.dereference(&ctx, item);
      for method in METHODS {
        if let Some(operation) = get(&item, method).filter(|o| o.is_object()) {
          built.push(self.build_operation(target, &item_ctx, path, method, &item, operation));
        }
      }
    }
    Ok(built)
  }

  pub fn build_operation(
    &mut self,
    target: &ServerTarget,
    ctx: &RefContext,
    path: &str,
    method: &str,
    path_item: &Value,
    operation: &Value,
  ) -> BuiltOperation {
    let method = method.to_uppercase();
    let parameters = self.merged_parameters(ctx, path_item, operation);
    let mut assembly = Assembly::default();
    for (param, param_ctx) in &parameters {
      self.apply_parameter(&mut assembly, param_ctx, param);
    }
    for name in placeholders(path) {
      assembly
        .path_params
        .entry(name)
        .or_insert_with(|| self.options.examples.test_string.clone());
    }
    if let Some((name, value)) = &self.options.api_key_query {
      assembly.query_params.insert(name.clone(), value.clone());
    }

    let content_type = self.request_body(ctx, operation, &mut assembly);
    let mut descriptor = RequestDescriptor {
      method: method.clone(),
      path_template: path.to_string(),
      ..Default::default()
    };
    if let Some(value) = assembly.body.take() {
      let content_type = content_type.unwrap_or_else(|| String::from("application/json"));
      let (bytes, header) = serialize_body(&value, &content_type);
      assembly.headers.set_content_type(&header);
      descriptor.body = Some(bytes);
      descriptor.content_type = Some(header);
      descriptor.body_value = Some(value);
    }
    if !assembly.cookies.is_empty() {
      assembly.headers.set("Cookie", &assembly.cookies.join("; "));
    }
    for (k, v) in &self.options.headers {
      assembly.headers.insert_if_absent(k, v);
    }
    descriptor.url = assemble_url(
      &target.prefix(),
      path,
      &assembly.path_params,
      &assembly.query_params,
    );
    descriptor.headers = assembly.headers;
    descriptor.path_params = assembly.path_params;
    descriptor.query_params = assembly.query_params;

    let mut merged = operation.clone();
    if let Value::Object(map) = &mut merged {
      map.insert(
        String::from("parameters"),
        Value::Array(parameters.into_iter().map(|(p, _)| p).collect()),
      );
    }
    debug!("{}{} {}", Emoji("🧩", ""), method, descriptor.url);
    BuiltOperation {
      path: path.to_string(),
      method,
      operation: merged,
      descriptor,
    }
  }

  // Operation-level entries override path-level ones with the same name+in.
  fn merged_parameters(
    &mut self,
    ctx: &RefContext,
    path_item: &Value,
    operation: &Value,
  ) -> Vec<(Value, RefContext)> {
    let mut merged: Vec<(Value, RefContext)> = Vec::new();
    let declared = get_array(path_item, "parameters")
      .iter()
      .chain(get_array(operation, "parameters"));
    for raw in declared {
      let (param, param_ctx) = self.synthesizer.dereference(ctx, raw);
      let key = (
        get_str(&param, "name").map(String::from),
        get_str(&param, "in").map(String::from),
      );
      if key.0.is_none() {
        continue;
      }
      merged.retain(|(p, _)| {
        (get_str(p, "name").map(String::from), get_str(p, "in").map(String::from)) != key
      });
      merged.push((param, param_ctx));
    }
    merged
  }

  fn parameter_schema(param: &Value) -> Value {
    if let Some(schema) = get(param, "schema") {
      return schema.clone();
    }
    if let Some(schema) = get_map(param, "content")
      .and_then(|c| c.values().next())
      .and_then(|media| get(media, "schema"))
    {
      return schema.clone();
    }
    // v2 non-body parameters carry their schema inline.
    let mut schema = Map::new();
    for key in ["type", "format", "items", "enum", "default", "example"] {
      if let Some(v) = get(param, key) {
        schema.insert(key.to_string(), v.clone());
      }
    }
    Value::Object(schema)
  }

  fn parameter_value(&mut self, ctx: &RefContext, param: &Value) -> (Value, SchemaKind) {
    let schema = Self::parameter_schema(param);
    let node = self.synthesizer.expand(ctx, &schema);
    if let Some(v) = get(param, "default").or(node.default.as_ref()) {
      return (v.clone(), node.kind);
    }
    if let Some(v) = get(param, "example").or_else(|| get(param, "x-example")) {
      return (v.clone(), node.kind);
    }
    let mut value = generate_example(&node, &self.options.examples);
    let name = get_str(param, "name").unwrap_or_default().to_lowercase();
    if name.contains("version") && value == Value::String(self.options.examples.test_string.clone()) {
      value = Value::String(String::from("v1"));
    }
    (value, node.kind)
  }

  fn apply_parameter(&mut self, assembly: &mut Assembly, ctx: &RefContext, param: &Value) {
    let name = get_str(param, "name").unwrap_or_default().to_string();
    let location = get_str(param, "in").unwrap_or_default();
    if location == "body" {
      let schema = get(param, "schema").cloned().unwrap_or(Value::Null);
      let node = self.synthesizer.expand(ctx, &schema);
      assembly.body = Some(generate_example(&node, &self.options.examples));
      return;
    }
    let (value, kind) = self.parameter_value(ctx, param);
    match location {
      "path" => {
        assembly.path_params.insert(name, param_string(&value));
      }
      "query" => match (&value, kind) {
        (Value::Object(fields), SchemaKind::Object) => {
          for (k, v) in fields {
            assembly.query_params.insert(k.clone(), param_string(v));
          }
        }
        _ => {
          assembly.query_params.insert(name, param_string(&value));
        }
      },
      "header" => assembly.headers.set(&name, &param_string(&value)),
      "cookie" => assembly
        .cookies
        .push(format!("{}={}", name, param_string(&value))),
      "formData" => {
        if get_str(param, "type") == Some("file") {
          assembly.has_file = true;
        }
        assembly.form.insert(name, value);
      }
      other => debug!("{}unsupported parameter location {}", Emoji("🧩", ""), other),
    }
  }

  /// Pick the body content type and fill `assembly.body`.
  fn request_body(
    &mut self,
    ctx: &RefContext,
    operation: &Value,
    assembly: &mut Assembly,
  ) -> Option<String> {
    let forced = self.options.content_type.clone();
    if let Some(raw) = get(operation, "requestBody") {
      let (body, body_ctx) = self.synthesizer.dereference(ctx, raw);
      let content = get_map(&body, "content").cloned().unwrap_or_default();
      let declared = content.keys().next().cloned();
      let media = forced
        .as_ref()
        .and_then(|f| content.get(f))
        .or_else(|| content.values().next());
      if let Some(schema) = media.and_then(|m| get(m, "schema")) {
        let node = self.synthesizer.expand(&body_ctx, schema);
        assembly.body = Some(generate_example(&node, &self.options.examples));
      } else if let Some(example) = media.and_then(|m| get(m, "example")) {
        assembly.body = Some(example.clone());
      }
      return forced.or(declared);
    }
    let consumes = get_array(operation, "consumes")
      .iter()
      .chain(get_array(self.doc.root(), "consumes"))
      .filter_map(Value::as_str)
      .map(String::from)
      .collect::<Vec<_>>();
    if !assembly.form.is_empty() {
      let form = std::mem::take(&mut assembly.form);
      assembly.body = Some(Value::Object(form));
      let multipart = assembly.has_file || consumes.iter().any(|c| c.contains("multipart/form-data"));
      let fallback = if multipart {
        "multipart/form-data"
      } else {
        "application/x-www-form-urlencoded"
      };
      return forced.or_else(|| Some(String::from(fallback)));
    }
    if assembly.body.is_some() {
      return forced.or_else(|| consumes.first().cloned());
    }
    None
  }
}
