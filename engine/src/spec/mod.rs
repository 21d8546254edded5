//! Parsed OpenAPI/Swagger definitions.
use crate::error::{new_spec_error, Result};
use crate::spec::resolver::RefContext;
use crate::spec::value::{get, get_map, get_str, parse_document, scalar_to_string};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub mod resolver;
pub mod schema;
pub mod value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecVersion {
  Swagger(String),
  OpenApi(String),
}

impl SpecVersion {
  pub fn is_v2(&self) -> bool {
    match self {
      SpecVersion::Swagger(_) => true,
      SpecVersion::OpenApi(v) => v.starts_with('2'),
    }
  }
}

impl Display for SpecVersion {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      SpecVersion::Swagger(v) => write!(f, "swagger {}", v),
      SpecVersion::OpenApi(v) => write!(f, "openapi {}", v),
    }
  }
}

// Unquoted YAML versions (`swagger: 2.0`) arrive as numbers.
fn detect_version(root: &Value) -> Option<SpecVersion> {
  let field = |key: &str| {
    get(root, key)
      .filter(|v| v.is_string() || v.is_number())
      .map(scalar_to_string)
  };
  if let Some(v) = field("openapi") {
    if v.starts_with('2') || v.starts_with('3') {
      return Some(SpecVersion::OpenApi(v));
    }
  }
  field("swagger")
    .filter(|v| v.starts_with('2'))
    .map(SpecVersion::Swagger)
}

/// Security scheme declared by a definition, v2 `securityDefinitions` and
/// v3 `components.securitySchemes` folded into one shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityScheme {
  pub name: String,
  pub kind: String,
  pub scheme: Option<String>,
  pub location: Option<String>,
  pub parameter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SpecDocument {
  root: Rc<Value>,
  version: SpecVersion,
  base_dir: Option<PathBuf>,
}

impl SpecDocument {
  pub fn from_bytes(bytes: &[u8], base_dir: Option<PathBuf>) -> Result<Self> {
    let root = parse_document(bytes).map_err(new_spec_error)?;
    Self::from_value(root, base_dir)
  }

  pub fn from_value(root: Value, base_dir: Option<PathBuf>) -> Result<Self> {
    let version = detect_version(&root)
      .ok_or_else(|| new_spec_error("missing a recognizable openapi/swagger version"))?;
    Ok(Self {
      root: Rc::new(root),
      version,
      base_dir,
    })
  }

  pub fn from_file(path: &Path) -> Result<Self> {
    let bytes = std::fs::read(path)?;
    let base_dir = path
      .canonicalize()
      .ok()
      .and_then(|p| p.parent().map(Path::to_path_buf));
    Self::from_bytes(&bytes, base_dir)
  }

  pub fn root(&self) -> &Value {
    &self.root
  }

  pub fn version(&self) -> &SpecVersion {
    &self.version
  }

  pub fn base_dir(&self) -> Option<&Path> {
    self.base_dir.as_deref()
  }

  pub fn context(&self) -> RefContext {
    RefContext::new(self.root.clone(), self.base_dir.clone())
  }

  pub fn paths(&self) -> Option<&Map<String, Value>> {
    get_map(&self.root, "paths")
  }

  pub fn title(&self) -> &str {
    get(&self.root, "info")
      .and_then(|i| get_str(i, "title"))
      .unwrap_or_default()
  }

  pub fn description(&self) -> &str {
    get(&self.root, "info")
      .and_then(|i| get_str(i, "description"))
      .unwrap_or_default()
  }

  /// Compact serialization with sorted keys, stable across JSON/YAML sources
  /// and key order.
  pub fn canonical_bytes(&self) -> Vec<u8> {
    serde_json::to_vec(&sorted(self.root.as_ref())).unwrap_or_default()
  }

  pub fn content_hash(&self) -> String {
    sha256_hex(&self.canonical_bytes())
  }

  pub fn security_schemes(&self) -> Vec<SecurityScheme> {
    let schemes = if self.version.is_v2() {
      get_map(&self.root, "securityDefinitions")
    } else {
      get(&self.root, "components").and_then(|c| get_map(c, "securitySchemes"))
    };
    let ctx = self.context();
    let mut resolver = resolver::RefResolver::new(self.base_dir());
    let mut out = Vec::new();
    for (name, raw) in schemes.into_iter().flatten() {
      let raw = match get_str(raw, "$ref") {
        Some(r) => match resolver.resolve(&ctx, r) {
          Some((v, _)) => v,
          None => continue,
        },
        None => raw.clone(),
      };
      let kind = get_str(&raw, "type").unwrap_or_default().to_string();
      out.push(SecurityScheme {
        name: name.clone(),
        kind,
        scheme: get_str(&raw, "scheme").map(|s| s.to_lowercase()),
        location: get_str(&raw, "in").map(String::from),
        parameter: get_str(&raw, "name").map(String::from),
      });
    }
    out
  }
}

fn sorted(value: &Value) -> Value {
  match value {
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      let mut out = Map::new();
      for k in keys {
        if let Some(v) = map.get(k) {
          out.insert(k.clone(), sorted(v));
        }
      }
      Value::Object(out)
    }
    Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
    other => other.clone(),
  }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hasher
    .finalize()
    .iter()
    .map(|b| format!("{:02x}", b))
    .collect()
}

/// Quick acceptance check for a fetched candidate: a recognizable version
/// and a `paths` map.
pub fn is_swagger_spec(bytes: &[u8]) -> bool {
  validate_spec_response(bytes).is_some()
}

pub fn validate_spec_response(bytes: &[u8]) -> Option<SpecDocument> {
  if bytes.iter().all(u8::is_ascii_whitespace) {
    return None;
  }
  let doc = SpecDocument::from_bytes(bytes, None).ok()?;
  doc.paths()?;
  Some(doc)
}
