//! Candidate locations for wordlist and built-in brute forcing.
use crate::error::Result;
use std::path::Path;

/// Well-known locations, tried as-is before any combination.
pub const PRIORITY_PATHS: [&str; 16] = [
  "/swagger.json",
  "/openapi.json",
  "/v2/api-docs",
  "/v3/api-docs",
  "/swagger/v1/swagger.json",
  "/swagger.yaml",
  "/openapi.yaml",
  "/api/swagger.json",
  "/api/openapi.json",
  "/api-docs/swagger.json",
  "/swagger/swagger.json",
  "/api/v1/swagger.json",
  "/docs/swagger.json",
  "/swagger-resources",
  "/api-docs",
  "/.well-known/openapi.json",
];

pub const PREFIX_DIRS: [&str; 34] = [
  "",
  "/swagger",
  "/swagger/docs",
  "/swagger/latest",
  "/swagger/v1",
  "/swagger/v2",
  "/swagger/v3",
  "/swagger/static",
  "/swagger/ui",
  "/swagger-ui",
  "/api-docs",
  "/api-docs/v1",
  "/api-docs/v2",
  "/apidocs",
  "/api",
  "/api/v1",
  "/api/v2",
  "/api/v3",
  "/v1",
  "/v2",
  "/v3",
  "/doc",
  "/docs",
  "/docs/swagger",
  "/docs/swagger/v1",
  "/docs/swagger/v2",
  "/docs/swagger-ui",
  "/docs/swagger-ui/v1",
  "/docs/swagger-ui/v2",
  "/docs/v1",
  "/docs/v2",
  "/docs/v3",
  "/public",
  "/redoc",
];

pub const JSON_ENDPOINTS: [&str; 18] = [
  "",
  "/index",
  "/swagger",
  "/swagger-ui",
  "/swagger-resources",
  "/swagger-config",
  "/openapi",
  "/api",
  "/api-docs",
  "/apidocs",
  "/v1",
  "/v2",
  "/v3",
  "/doc",
  "/docs",
  "/apispec",
  "/apispec_1",
  "/api-merged",
];

pub const JS_ENDPOINTS: [&str; 9] = [
  "/swagger-ui-init",
  "/swagger-ui-bundle",
  "/swagger-ui-standalone-preset",
  "/swagger-ui",
  "/swagger-ui.min",
  "/swagger-ui-es-bundle-core",
  "/swagger-ui-es-bundle",
  "/swagger-ui-layout",
  "/swagger-ui-plugins",
];

/// `target + dir + endpoint + extension` for every prefix directory,
/// skipping the empty/empty pair.
pub fn make_urls(target: &str, endpoints: &[&str], extension: &str) -> Vec<String> {
  let mut urls = Vec::new();
  for dir in PREFIX_DIRS {
    for endpoint in endpoints {
      if dir.is_empty() && endpoint.is_empty() {
        continue;
      }
      urls.push(format!("{}{}{}{}", target, dir, endpoint, extension));
    }
  }
  urls
}

pub fn builtin_candidates(target: &str) -> Vec<String> {
  let mut urls: Vec<String> = PRIORITY_PATHS
    .iter()
    .map(|p| format!("{}{}", target, p))
    .collect();
  urls.extend(make_urls(target, &JSON_ENDPOINTS, ""));
  urls.extend(make_urls(target, &JS_ENDPOINTS, ".js"));
  urls.extend(make_urls(target, &JSON_ENDPOINTS, ".json"));
  urls.extend(make_urls(target, &JSON_ENDPOINTS, "/"));
  urls
}

/// Wordlist lines appended to `target`; blank and `#` lines are skipped.
pub fn wordlist_candidates(target: &str, wordlist: &Path) -> Result<Vec<String>> {
  let text = std::fs::read_to_string(wordlist)?;
  Ok(
    text
      .lines()
      .map(str::trim)
      .filter(|l| !l.is_empty() && !l.starts_with('#'))
      .map(|l| format!("{}{}", target, l))
      .collect(),
  )
}

pub fn build_candidates(target: &str, wordlist: Option<&Path>) -> Result<Vec<String>> {
  match wordlist {
    Some(path) => wordlist_candidates(target, path),
    None => Ok(builtin_candidates(target)),
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
  Definition,
  Script,
  Other,
}

/// Classify a probed Content-Type.
pub fn classify_content_type(content_type: Option<&str>) -> ProbeKind {
  let Some(raw) = content_type else {
    return ProbeKind::Other;
  };
  let Ok(parsed) = raw.trim().parse::<mime::Mime>() else {
    return ProbeKind::Other;
  };
  match (parsed.type_().as_str(), parsed.subtype().as_str()) {
    ("application", "json")
    | ("text", "json")
    | ("application", "yaml")
    | ("application", "x-yaml")
    | ("text", "yaml")
    | ("text", "yml") => ProbeKind::Definition,
    ("application", "javascript") | ("text", "javascript") => ProbeKind::Script,
    _ => ProbeKind::Other,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn combinations_skip_empty_pair() {
    let urls = make_urls("https://x.example", &JSON_ENDPOINTS, "");
    assert_eq!(urls.len(), PREFIX_DIRS.len() * JSON_ENDPOINTS.len() - 1);
    assert_eq!(urls[0], "https://x.example/index");
    assert!(!urls.contains(&String::from("https://x.example")));
  }

  #[test]
  fn builtin_order() {
    let urls = builtin_candidates("https://x.example");
    assert_eq!(urls[0], "https://x.example/swagger.json");
    let first_js = urls.iter().position(|u| u.ends_with(".js")).unwrap();
    let first_json_combo = urls.iter().position(|u| u == "https://x.example/index.json").unwrap();
    assert!(first_js > PRIORITY_PATHS.len());
    assert!(first_json_combo > first_js);
    assert_eq!(urls.last().map(String::as_str), Some("https://x.example/redoc/api-merged/"));
  }

  #[test]
  fn script_probes_are_unique() {
    let scripts = make_urls("https://x.example", &JS_ENDPOINTS, ".js");
    let unique: std::collections::HashSet<&String> = scripts.iter().collect();
    assert_eq!(unique.len(), scripts.len());
  }

  #[test]
  fn wordlist_skips_comments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("words.txt");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "# header\n/swagger.json\n\n  /v2/api-docs  ").unwrap();
    let urls = build_candidates("https://x.example", Some(&path)).unwrap();
    assert_eq!(urls, vec!["https://x.example/swagger.json", "https://x.example/v2/api-docs"]);
    assert!(build_candidates("https://x.example", Some(&dir.path().join("missing"))).is_err());
  }

  #[test]
  fn content_type_classes() {
    assert_eq!(classify_content_type(Some("application/json; charset=utf-8")), ProbeKind::Definition);
    assert_eq!(classify_content_type(Some("text/yaml")), ProbeKind::Definition);
    assert_eq!(classify_content_type(Some("application/javascript")), ProbeKind::Script);
    assert_eq!(classify_content_type(Some("text/html")), ProbeKind::Other);
    assert_eq!(classify_content_type(None), ProbeKind::Other);
  }
}
