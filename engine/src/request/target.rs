//! Origin and base-path resolution for the requests built from a definition.
use crate::spec::SpecDocument;
use crate::spec::value::{get, get_array, get_map, get_str, scalar_to_string};
use console::Emoji;
use log::warn;
use serde_json::Value;
use url::Url;

/// Where requests are sent: `origin` is `scheme://host[:port]` with no
/// trailing slash, `base_path` is empty or starts with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
  pub origin: String,
  pub base_path: String,
}

impl ServerTarget {
  pub fn new(origin: &str, base_path: &str) -> Self {
    Self {
      origin: origin.trim_end_matches('/').to_string(),
      base_path: normalize_base_path(base_path),
    }
  }

  pub fn prefix(&self) -> String {
    format!("{}{}", self.origin, self.base_path)
  }
}

#[derive(Debug, Clone, Default)]
pub struct TargetOptions {
  /// `-T`: replaces the documented host but keeps the documented base path.
  pub target_override: Option<String>,
  /// `--base-path`: replaces the documented base path.
  pub base_path_override: Option<String>,
  /// Where the definition was fetched from, used for relative servers.
  pub spec_url: Option<String>,
}

pub fn normalize_base_path(base: &str) -> String {
  let trimmed = base.trim().trim_end_matches('/');
  if trimmed.is_empty() {
    String::new()
  } else if trimmed.starts_with('/') {
    trimmed.to_string()
  } else {
    format!("/{}", trimmed)
  }
}

fn origin_of(url: &Url) -> Option<String> {
  let host = url.host_str()?;
  Some(match url.port() {
    Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
    None => format!("{}://{}", url.scheme(), host),
  })
}

fn parse_with_scheme(raw: &str) -> Option<Url> {
  let raw = raw.trim();
  if raw.contains("://") {
    Url::parse(raw).ok()
  } else {
    Url::parse(&format!("https://{}", raw)).ok()
  }
}

/// Split a target override into origin and an optional path prefix.
fn override_parts(raw: &str) -> Option<(String, String)> {
  let url = parse_with_scheme(raw)?;
  Some((origin_of(&url)?, normalize_base_path(url.path())))
}

fn is_local(url: &str) -> bool {
  ["localhost", "127.0.0.1", "::1"]
    .iter()
    .any(|needle| url.contains(needle))
}

fn substitute_variables(server: &Value) -> String {
  let mut url = get_str(server, "url").unwrap_or_default().to_string();
  for (name, var) in get_map(server, "variables").into_iter().flatten() {
    let value = get(var, "default")
      .map(scalar_to_string)
      .or_else(|| get_array(var, "enum").first().map(scalar_to_string))
      .unwrap_or_default();
    url = url.replace(&format!("{{{}}}", name), &value);
  }
  url
}

/// Every server a run should iterate. An override yields exactly one target.
pub fn resolve_targets(doc: &SpecDocument, options: &TargetOptions) -> Vec<ServerTarget> {
  let spec_origin = options
    .spec_url
    .as_deref()
    .and_then(|u| Url::parse(u).ok());
  let target = options.target_override.as_deref().and_then(override_parts);
  let mut targets: Vec<(Option<String>, String)> = Vec::new();

  if doc.version().is_v2() {
    let root = doc.root();
    let base = get_str(root, "basePath").unwrap_or_default().to_string();
    let origin = get_str(root, "host").map(|host| {
      let scheme = get_array(root, "schemes")
        .iter()
        .filter_map(Value::as_str)
        .next()
        .map(String::from)
        .or_else(|| spec_origin.as_ref().map(|u| u.scheme().to_string()))
        .unwrap_or_else(|| String::from("https"));
      format!("{}://{}", scheme, host.trim_end_matches('/'))
    });
    targets.push((origin, base));
  } else {
    for server in get_array(doc.root(), "servers") {
      let url = substitute_variables(server);
      if target.is_none() && is_local(&url) {
        warn!(
          "{}server {} points at a local host, supply a target with -T",
          Emoji("⚠️", ""),
          url
        );
      }
      if url.contains("://") {
        match Url::parse(&url) {
          Ok(parsed) => targets.push((origin_of(&parsed), parsed.path().to_string())),
          Err(_) => continue,
        }
      } else {
        targets.push((None, url));
      }
    }
    if targets.is_empty() {
      targets.push((None, String::new()));
    }
  }

  let fallback = spec_origin.as_ref().and_then(origin_of);
  let mut out: Vec<ServerTarget> = Vec::new();
  for (origin, base) in targets {
    let base = match &options.base_path_override {
      Some(bp) => bp.clone(),
      None => base,
    };
    let resolved = match &target {
      Some((target_origin, target_path)) => {
        let base = normalize_base_path(&base);
        Some(ServerTarget::new(target_origin, &format!("{}{}", target_path, base)))
      }
      None => origin
        .or_else(|| fallback.clone())
        .map(|o| ServerTarget::new(&o, &base)),
    };
    if let Some(t) = resolved {
      if !out.contains(&t) {
        out.push(t);
      }
    }
    if target.is_some() {
      break;
    }
  }
  out
}
