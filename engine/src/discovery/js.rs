//! Spec references and embedded definitions inside JavaScript.
use crate::spec::value::get_map;
use crate::spec::SpecDocument;
use fancy_regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

struct JsPatterns {
  spec_urls: Vec<Regex>,
  swashbuckle: Regex,
  discovery_paths: Regex,
  unquoted_keys: Regex,
  trailing_comma: Regex,
  assignments: Vec<Regex>,
}

static PATTERNS: OnceLock<JsPatterns> = OnceLock::new();

fn patterns() -> &'static JsPatterns {
  PATTERNS.get_or_init(|| {
    let compile = |reg: &str| Regex::new(reg).expect("RE_COMPILE_BY_JS");
    JsPatterns {
      spec_urls: [
        r#"url:\s*["']([^"']+)["']"#,
        r#"urls:\s*\[\s*\{\s*url:\s*["']([^"']+)["']"#,
        r#"const\s+\w+\s*=\s*["']([^"']+\.(?:json|yaml|yml))["']"#,
        r#"defaultDefinitionUrl\s*=\s*["']([^"']+)["']"#,
        r#"definitionURL\s*=\s*["']([^"']+)["']"#,
      ]
      .iter()
      .map(|r| compile(r))
      .collect(),
      swashbuckle: compile(r"window\.swashbuckleConfig\s*=\s*\{([\s\S]*?)\};"),
      discovery_paths: compile(r#"discoveryPaths\s*:\s*\[\s*["']([^"']+)["']"#),
      unquoted_keys: compile(r"([{,]\s*)(\w+)\s*:"),
      trailing_comma: compile(r",\s*([}\]])"),
      assignments: [
        r"(?:var|let|const)\s+(\w+)\s*=\s*(\{[\s\S]*?\});",
        r"(\w+)\s*=\s*(\{[\s\S]*?\});",
      ]
      .iter()
      .map(|r| compile(r))
      .collect(),
    }
  })
}

pub(crate) fn first_capture(re: &Regex, text: &str) -> Option<String> {
  re.captures(text)
    .ok()
    .flatten()
    .and_then(|c| c.get(1))
    .map(|m| m.as_str().to_string())
}

/// First spec URL referenced by a Swagger UI initializer.
pub fn extract_spec_url_from_js(js: &str) -> Option<String> {
  patterns()
    .spec_urls
    .iter()
    .find_map(|re| first_capture(re, js))
}

/// First `discoveryPaths` entry of a Swashbuckle `window.swashbuckleConfig`.
pub fn extract_swashbuckle_config(content: &str) -> Option<String> {
  let p = patterns();
  let config = first_capture(&p.swashbuckle, content)?;
  first_capture(&p.discovery_paths, &config)
}

/// Loose JS object literal to JSON: single quotes, bare keys, trailing commas.
pub fn js_object_to_json(object: &str) -> String {
  let p = patterns();
  let cleaned = object.trim().replace('\'', "\"");
  let cleaned = p.unquoted_keys.replace_all(&cleaned, "${1}\"${2}\":");
  p.trailing_comma.replace_all(&cleaned, "${1}").to_string()
}

/// Drop `//` and `/* */` comments, leaving string literals untouched.
pub fn strip_js_comments(js: &str) -> String {
  #[derive(PartialEq)]
  enum State {
    Code,
    Line,
    Block,
    Quoted(char),
  }
  let mut out = String::with_capacity(js.len());
  let mut state = State::Code;
  let mut escaped = false;
  let mut chars = js.chars().peekable();
  while let Some(c) = chars.next() {
    match state {
      State::Line => {
        if c == '\n' || c == '\r' {
          state = State::Code;
          out.push(c);
        }
      }
      State::Block => {
        if c == '*' && chars.peek() == Some(&'/') {
          chars.next();
          state = State::Code;
        }
      }
      State::Quoted(quote) => {
        out.push(c);
        if escaped {
          escaped = false;
        } else if c == '\\' {
          escaped = true;
        } else if c == quote {
          state = State::Code;
        }
      }
      State::Code => {
        if c == '/' {
          match chars.peek() {
            Some('/') => {
              chars.next();
              state = State::Line;
              continue;
            }
            Some('*') => {
              chars.next();
              state = State::Block;
              continue;
            }
            _ => {}
          }
        }
        if matches!(c, '\'' | '"' | '`') {
          state = State::Quoted(c);
        }
        out.push(c);
      }
    }
  }
  out
}

/// First assigned object literal that parses as a definition with paths.
/// Returns the document and the JSON it was parsed from.
pub fn extract_embedded_spec(js: &str) -> Option<(SpecDocument, Vec<u8>)> {
  let cleaned = strip_js_comments(js);
  for re in &patterns().assignments {
    for captures in re.captures_iter(&cleaned).flatten() {
      let Some(object) = captures.get(2) else {
        continue;
      };
      let json = js_object_to_json(object.as_str());
      let Ok(value) = serde_json::from_str::<Value>(&json) else {
        continue;
      };
      let looks_like_spec = value.get("openapi").is_some() || value.get("swagger").is_some();
      if !looks_like_spec || get_map(&value, "paths").is_none() {
        continue;
      }
      if let Ok(doc) = SpecDocument::from_value(value, None) {
        return Some((doc, json.into_bytes()));
      }
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn spec_url_patterns_in_order() {
    assert_eq!(
      extract_spec_url_from_js(r#"SwaggerUIBundle({ url: "/v2/api-docs", dom_id: '#swagger-ui' })"#).as_deref(),
      Some("/v2/api-docs")
    );
    assert_eq!(
      extract_spec_url_from_js(r#"const specFile = 'specs/petstore.yaml';"#).as_deref(),
      Some("specs/petstore.yaml")
    );
    assert_eq!(
      extract_spec_url_from_js(r#"window.defaultDefinitionUrl = "/openapi.json""#).as_deref(),
      Some("/openapi.json")
    );
    assert_eq!(extract_spec_url_from_js("console.log('hi')"), None);
  }

  #[test]
  fn swashbuckle_discovery_paths() {
    let html = r#"<script>window.swashbuckleConfig = {
      rootUrl: 'http://x', discoveryPaths: ["swagger/v1/swagger.json"], oAuth2ClientId: ''
    };</script>"#;
    assert_eq!(extract_swashbuckle_config(html).as_deref(), Some("swagger/v1/swagger.json"));
  }

  #[test]
  fn comments_are_stripped_but_strings_kept() {
    let js = "var a = 1; // drop me\nvar b = \"note // keep\"; /* block */ var c = 'x';";
    let out = strip_js_comments(js);
    assert!(!out.contains("drop me"));
    assert!(!out.contains("block"));
    assert!(out.contains("\"note // keep\""));
    assert!(out.contains("var c = 'x';"));
  }

  #[test]
  fn js_objects_become_json() {
    assert_eq!(
      js_object_to_json("{openapi: '3.0.0', paths: {'/a': {},},}"),
      r#"{"openapi": "3.0.0", "paths": {"/a": {}}}"#
    );
  }

  #[test]
  fn embedded_spec_in_script() {
    let js = r#"
      // generated
      const spec = {openapi: "3.0.1", info: {title: "Inline"}, paths: {"/pets": {get: {}}}};
      window.ui = SwaggerUIBundle({spec: spec});
    "#;
    let (doc, bytes) = extract_embedded_spec(js).unwrap();
    assert_eq!(doc.title(), "Inline");
    assert!(String::from_utf8(bytes).unwrap().contains("\"/pets\""));
    assert!(extract_embedded_spec("var config = {url: 'x'};").is_none());
  }
}
