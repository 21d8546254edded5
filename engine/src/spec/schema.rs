//! Typed schema trees and example synthesis.
use crate::spec::resolver::{RefContext, RefResolver};
use crate::spec::value::{get, get_array, get_map, get_str};
use console::Emoji;
use log::debug;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Nesting bound applied even when no `$ref` repeats.
pub const MAX_SCHEMA_DEPTH: usize = 32;

/// Nodes one [`Synthesizer::expand`] call may produce before the rest of the
/// tree collapses to empty objects.
pub const MAX_SCHEMA_NODES: usize = 4096;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchemaKind {
  Object,
  Array,
  String,
  Integer,
  Number,
  Boolean,
  #[default]
  Unknown,
}

impl SchemaKind {
  fn parse(s: &str) -> Self {
    match s {
      "object" => SchemaKind::Object,
      "array" => SchemaKind::Array,
      "string" => SchemaKind::String,
      "integer" => SchemaKind::Integer,
      "number" => SchemaKind::Number,
      "boolean" => SchemaKind::Boolean,
      _ => SchemaKind::Unknown,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaNode {
  pub kind: SchemaKind,
  pub format: Option<String>,
  pub properties: BTreeMap<String, SchemaNode>,
  pub items: Option<Box<SchemaNode>>,
  pub required: BTreeSet<String>,
  pub enum_values: Vec<Value>,
  pub example: Option<Value>,
  pub default: Option<Value>,
  pub one_of: Vec<SchemaNode>,
  pub any_of: Vec<SchemaNode>,
  pub additional_properties: Option<Box<SchemaNode>>,
}

impl SchemaNode {
  pub fn empty_object() -> Self {
    Self {
      kind: SchemaKind::Object,
      ..Default::default()
    }
  }

  pub fn of_kind(kind: SchemaKind) -> Self {
    Self {
      kind,
      ..Default::default()
    }
  }

  fn merge(&mut self, other: SchemaNode) {
    if self.kind == SchemaKind::Unknown {
      self.kind = other.kind;
    }
    for (name, prop) in other.properties {
      self.properties.entry(name).or_insert(prop);
    }
    self.required.extend(other.required);
    if self.example.is_none() {
      self.example = other.example;
    }
    if self.enum_values.is_empty() {
      self.enum_values = other.enum_values;
    }
    if self.items.is_none() {
      self.items = other.items;
    }
    if self.format.is_none() {
      self.format = other.format;
    }
    if self.additional_properties.is_none() {
      self.additional_properties = other.additional_properties;
    }
  }
}

/// Literals substituted into synthesized values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleOptions {
  pub test_string: String,
  pub date: String,
  pub email: String,
  pub url: String,
}

impl Default for ExampleOptions {
  fn default() -> Self {
    Self {
      test_string: String::from("bishopfox"),
      date: String::from("2024-01-01"),
      email: String::from("test@example.com"),
      url: String::from("https://example.com"),
    }
  }
}

/// Expands raw schema values into [`SchemaNode`] trees.
/// Finished `$ref` targets are kept per ref key with the node count they
/// cost, so models that point at each other are expanded once.
pub struct Synthesizer<'r> {
  resolver: &'r mut RefResolver,
  expanded: HashMap<String, (SchemaNode, usize)>,
  budget: usize,
  truncated: bool,
}

impl<'r> Synthesizer<'r> {
  pub fn new(resolver: &'r mut RefResolver) -> Self {
    Self {
      resolver,
      expanded: HashMap::new(),
      budget: MAX_SCHEMA_NODES,
      truncated: false,
    }
  }

  pub fn expand(&mut self, ctx: &RefContext, schema: &Value) -> SchemaNode {
    self.budget = MAX_SCHEMA_NODES;
    self.truncated = false;
    let mut visited = Vec::new();
    let node = self.expand_inner(ctx, schema, &mut visited, 0);
    if self.truncated {
      debug!("{}schema node budget exhausted, tree truncated", Emoji("🌀", ""));
    }
    node
  }

  /// Resolve a top-level `$ref` chain without expanding the result.
  pub fn dereference(&mut self, ctx: &RefContext, value: &Value) -> (Value, RefContext) {
    let mut current = (value.clone(), ctx.clone());
    for _ in 0..MAX_SCHEMA_DEPTH {
      let Some(reference) = get_str(&current.0, "$ref").map(String::from) else {
        break;
      };
      match self.resolver.resolve(&current.1, &reference) {
        Some(next) => current = next,
        None => return (Value::Object(Map::new()), current.1),
      }
    }
    current
  }

  fn expand_inner(
    &mut self,
    ctx: &RefContext,
    schema: &Value,
    visited: &mut Vec<String>,
    depth: usize,
  ) -> SchemaNode {
    if self.budget == 0 {
      self.truncated = true;
      return SchemaNode::empty_object();
    }
    self.budget -= 1;
    if depth > MAX_SCHEMA_DEPTH {
      debug!("{}schema depth cap reached", Emoji("🌀", ""));
      return SchemaNode::empty_object();
    }
    if !schema.is_object() {
      return SchemaNode::default();
    }
    if let Some(reference) = get_str(schema, "$ref") {
      let key = ctx.ref_key(reference);
      if visited.contains(&key) {
        debug!("{}cycle at {}", Emoji("🌀", ""), reference);
        return SchemaNode::empty_object();
      }
      let mut node = match self.expanded.get(&key) {
        Some((cached, cost)) if *cost <= self.budget => {
          self.budget -= cost;
          cached.clone()
        }
        Some(_) => {
          self.truncated = true;
          return SchemaNode::empty_object();
        }
        None => {
          let Some((target, next_ctx)) = self.resolver.resolve(ctx, reference) else {
            return SchemaNode::empty_object();
          };
          let before = self.budget;
          let outer_truncated = std::mem::replace(&mut self.truncated, false);
          visited.push(key.clone());
          let node = self.expand_inner(&next_ctx, &target, visited, depth + 1);
          visited.pop();
          // a budget-truncated tree is only good for this call
          if !self.truncated {
            self.expanded.insert(key, (node.clone(), before - self.budget));
          }
          self.truncated |= outer_truncated;
          node
        }
      };
      if let Some(example) = get(schema, "example") {
        node.example = Some(example.clone());
      }
      return node;
    }

    let mut node = SchemaNode {
      kind: schema_kind(schema),
      format: get_str(schema, "format").map(String::from),
      enum_values: get_array(schema, "enum").to_vec(),
      example: get(schema, "example").cloned(),
      default: get(schema, "default").cloned(),
      required: get_array(schema, "required")
        .iter()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect(),
      ..Default::default()
    };
    if node.example.is_none() {
      node.example = get_array(schema, "examples").first().cloned();
    }
    for (name, prop) in get_map(schema, "properties").into_iter().flatten() {
      let child = self.expand_inner(ctx, prop, visited, depth + 1);
      node.properties.insert(name.clone(), child);
    }
    if let Some(items) = get(schema, "items") {
      node.items = Some(Box::new(self.expand_inner(ctx, items, visited, depth + 1)));
    }
    if let Some(additional) = get(schema, "additionalProperties").filter(|v| v.is_object()) {
      let child = self.expand_inner(ctx, additional, visited, depth + 1);
      node.additional_properties = Some(Box::new(child));
    }
    for variant in get_array(schema, "oneOf") {
      let child = self.expand_inner(ctx, variant, visited, depth + 1);
      node.one_of.push(child);
    }
    for variant in get_array(schema, "anyOf") {
      let child = self.expand_inner(ctx, variant, visited, depth + 1);
      node.any_of.push(child);
    }
    for member in get_array(schema, "allOf") {
      let child = self.expand_inner(ctx, member, visited, depth + 1);
      node.merge(child);
    }
    if node.kind == SchemaKind::Unknown {
      if !node.properties.is_empty() || node.additional_properties.is_some() {
        node.kind = SchemaKind::Object;
      } else if node.items.is_some() {
        node.kind = SchemaKind::Array;
      }
    }
    node
  }
}

// `type` may be a list in 3.1 documents; the first non-null entry wins.
fn schema_kind(schema: &Value) -> SchemaKind {
  match get(schema, "type") {
    Some(Value::String(s)) => SchemaKind::parse(s),
    Some(Value::Array(list)) => list
      .iter()
      .filter_map(Value::as_str)
      .find(|s| *s != "null")
      .map(SchemaKind::parse)
      .unwrap_or_default(),
    _ => SchemaKind::Unknown,
  }
}

fn string_example(format: Option<&str>, options: &ExampleOptions) -> Value {
  let s = match format {
    Some("date") => options.date.clone(),
    Some("date-time") => format!("{}T00:00:00Z", options.date),
    Some("email") => options.email.clone(),
    Some("uri") | Some("url") => options.url.clone(),
    Some("uuid") => String::from("3fa85f64-5717-4562-b3fc-2c963f66afa6"),
    _ => options.test_string.clone(),
  };
  Value::String(s)
}

fn name_hint(name: &str, options: &ExampleOptions) -> Option<Value> {
  let lower = name.to_lowercase();
  if lower.contains("email") {
    Some(Value::String(options.email.clone()))
  } else if lower.contains("url") {
    Some(Value::String(options.url.clone()))
  } else if lower.contains("date") {
    Some(Value::String(options.date.clone()))
  } else {
    None
  }
}

/// Produce a concrete value for `node`. Total over every node, including the
/// empty objects substituted for cycles.
pub fn generate_example(node: &SchemaNode, options: &ExampleOptions) -> Value {
  if let Some(example) = &node.example {
    return example.clone();
  }
  if let Some(first) = node.enum_values.first() {
    return first.clone();
  }
  if let Some(variant) = node.one_of.first() {
    return generate_example(variant, options);
  }
  if let Some(variant) = node.any_of.first() {
    return generate_example(variant, options);
  }
  match node.kind {
    SchemaKind::Object => {
      let mut map = Map::new();
      for (name, prop) in &node.properties {
        let plain_string = prop.kind == SchemaKind::String
          && prop.format.is_none()
          && prop.example.is_none()
          && prop.enum_values.is_empty();
        let value = if plain_string {
          name_hint(name, options).unwrap_or_else(|| generate_example(prop, options))
        } else {
          generate_example(prop, options)
        };
        map.insert(name.clone(), value);
      }
      if map.is_empty() {
        if let Some(additional) = &node.additional_properties {
          map.insert(
            String::from("additionalProp1"),
            generate_example(additional, options),
          );
        }
      }
      Value::Object(map)
    }
    SchemaKind::Array => match &node.items {
      Some(items) => Value::Array(vec![generate_example(items, options)]),
      None => Value::Array(Vec::new()),
    },
    SchemaKind::String => string_example(node.format.as_deref(), options),
    SchemaKind::Integer | SchemaKind::Number => Value::from(1),
    SchemaKind::Boolean => Value::Bool(true),
    SchemaKind::Unknown => Value::Null,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::rc::Rc;

  fn expand(doc: Value, schema: Value) -> SchemaNode {
    let mut resolver = RefResolver::new(None);
    let ctx = RefContext::new(Rc::new(doc), None);
    Synthesizer::new(&mut resolver).expand(&ctx, &schema)
  }

  #[test]
  fn integer_property_example() {
    let node = expand(
      json!({}),
      json!({"type":"object","properties":{"age":{"type":"integer"}}}),
    );
    assert_eq!(generate_example(&node, &ExampleOptions::default()), json!({"age":1}));
  }

  #[test]
  fn enum_takes_first_entry() {
    let node = expand(json!({}), json!({"type":"string","enum":["a","b"]}));
    assert_eq!(generate_example(&node, &ExampleOptions::default()), json!("a"));
  }

  #[test]
  fn cycles_terminate() {
    let doc = json!({"components":{"schemas":{
      "Node":{"type":"object","properties":{
        "name":{"type":"string"},
        "child":{"$ref":"#/components/schemas/Node"},
        "peers":{"type":"array","items":{"$ref":"#/components/schemas/Node"}}
      }},
      "A":{"allOf":[{"$ref":"#/components/schemas/B"}]},
      "B":{"properties":{"a":{"$ref":"#/components/schemas/A"}}}
    }}});
    let node = expand(doc.clone(), json!({"$ref":"#/components/schemas/Node"}));
    let example = generate_example(&node, &ExampleOptions::default());
    assert_eq!(example["name"], json!("bishopfox"));
    assert_eq!(example["child"], json!({}));
    assert_eq!(example["peers"], json!([{}]));
    let mutual = expand(doc, json!({"$ref":"#/components/schemas/A"}));
    assert_eq!(mutual.kind, SchemaKind::Object);
    assert!(generate_example(&mutual, &ExampleOptions::default()).is_object());
  }

  fn node_count(node: &SchemaNode) -> usize {
    1 + node.properties.values().map(node_count).sum::<usize>()
      + node.items.as_deref().map_or(0, node_count)
      + node.additional_properties.as_deref().map_or(0, node_count)
      + node.one_of.iter().chain(&node.any_of).map(node_count).sum::<usize>()
  }

  #[test]
  fn interlinked_models_expand_in_bounded_time() {
    let names: Vec<String> = (0..12).map(|i| format!("M{}", i)).collect();
    let mut definitions = Map::new();
    for name in &names {
      let mut properties = Map::new();
      properties.insert(String::from("id"), json!({"type":"integer"}));
      for other in names.iter().filter(|o| *o != name) {
        properties.insert(other.to_lowercase(), json!({"$ref": format!("#/definitions/{}", other)}));
      }
      definitions.insert(name.clone(), json!({"type":"object","properties":properties}));
    }
    let doc = json!({"definitions": definitions});

    let started = std::time::Instant::now();
    let mut resolver = RefResolver::new(None);
    let ctx = RefContext::new(Rc::new(doc), None);
    let mut synthesizer = Synthesizer::new(&mut resolver);
    for name in &names {
      let node = synthesizer.expand(&ctx, &json!({"$ref": format!("#/definitions/{}", name)}));
      assert_eq!(node.kind, SchemaKind::Object);
      assert!(node_count(&node) <= MAX_SCHEMA_NODES);
      let example = generate_example(&node, &ExampleOptions::default());
      assert_eq!(example["id"], json!(1));
    }
    assert!(started.elapsed() < std::time::Duration::from_secs(2));
  }

  #[test]
  fn shared_model_expands_under_every_property() {
    let doc = json!({"definitions":{
      "Pet":{"type":"object","properties":{"name":{"type":"string"}}},
      "Pair":{"type":"object","properties":{
        "left":{"$ref":"#/definitions/Pet"},
        "right":{"$ref":"#/definitions/Pet"}
      }}
    }});
    let node = expand(doc, json!({"$ref":"#/definitions/Pair"}));
    assert_eq!(
      generate_example(&node, &ExampleOptions::default()),
      json!({"left":{"name":"bishopfox"},"right":{"name":"bishopfox"}})
    );
  }

  #[test]
  fn depth_is_capped_without_refs() {
    let mut schema = json!({"type":"string"});
    for _ in 0..100 {
      schema = json!({"type":"object","properties":{"n":schema}});
    }
    let node = expand(json!({}), schema);
    let mut depth = 0;
    let mut cur = &node;
    while let Some(next) = cur.properties.get("n") {
      cur = next;
      depth += 1;
    }
    assert!(depth <= MAX_SCHEMA_DEPTH + 1);
  }

  #[test]
  fn all_of_merges_properties_and_required() {
    let doc = json!({"definitions":{"Base":{"type":"object","required":["id"],"properties":{"id":{"type":"integer"}}}}});
    let node = expand(
      doc,
      json!({"allOf":[{"$ref":"#/definitions/Base"},{"properties":{"flag":{"type":"boolean"}},"required":["flag"]}]}),
    );
    assert_eq!(node.kind, SchemaKind::Object);
    assert!(node.required.contains("id") && node.required.contains("flag"));
    assert_eq!(
      generate_example(&node, &ExampleOptions::default()),
      json!({"id":1,"flag":true})
    );
  }

  #[test]
  fn precedence_and_name_hints() {
    let node = expand(
      json!({}),
      json!({"type":"object","properties":{
        "contact_email":{"type":"string"},
        "homepageUrl":{"type":"string"},
        "birthDate":{"type":"string"},
        "nick":{"type":"string","example":"neo"},
        "choice":{"oneOf":[{"type":"integer"},{"type":"string"}]},
        "tags":{"type":"array","items":{"type":"string"}},
        "anything":{}
      }}),
    );
    let options = ExampleOptions {
      test_string: "zz".into(),
      ..Default::default()
    };
    let example = generate_example(&node, &options);
    assert_eq!(example["contact_email"], json!("test@example.com"));
    assert_eq!(example["homepageUrl"], json!("https://example.com"));
    assert_eq!(example["birthDate"], json!("2024-01-01"));
    assert_eq!(example["nick"], json!("neo"));
    assert_eq!(example["choice"], json!(1));
    assert_eq!(example["tags"], json!(["zz"]));
    assert_eq!(example["anything"], Value::Null);
  }

  #[test]
  fn additional_properties_fallback_and_type_lists() {
    let node = expand(
      json!({}),
      json!({"type":"object","additionalProperties":{"type":"integer"}}),
    );
    assert_eq!(
      generate_example(&node, &ExampleOptions::default()),
      json!({"additionalProp1":1})
    );
    let nullable = expand(json!({}), json!({"type":["null","boolean"]}));
    assert_eq!(nullable.kind, SchemaKind::Boolean);
  }

  #[test]
  fn missing_ref_degrades_to_empty_object() {
    let node = expand(json!({}), json!({"$ref":"#/nope"}));
    assert_eq!(generate_example(&node, &ExampleOptions::default()), json!({}));
  }
}
