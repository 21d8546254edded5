//! `$ref` resolution, internal JSON pointers and external files.
use crate::spec::value::parse_document;
use console::Emoji;
use log::{debug, warn};
use percent_encoding::percent_decode_str;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// The document a `$ref` is evaluated against, plus the directory relative
/// file references inside it resolve from.
#[derive(Debug, Clone)]
pub struct RefContext {
  document: Rc<Value>,
  base_dir: Option<PathBuf>,
}

impl RefContext {
  pub fn new(document: Rc<Value>, base_dir: Option<PathBuf>) -> Self {
    Self { document, base_dir }
  }
  pub fn document(&self) -> &Value {
    &self.document
  }
  pub fn base_dir(&self) -> Option<&Path> {
    self.base_dir.as_deref()
  }
  /// Identity of a reference within this document, used by cycle guards.
  pub fn ref_key(&self, reference: &str) -> String {
    format!("{:p}{}", Rc::as_ptr(&self.document), reference)
  }
}

/// Walk a JSON pointer (`/a/b~1c/0`). An empty pointer is the whole document.
pub fn resolve_pointer<'a>(document: &'a Value, pointer: &str) -> Option<&'a Value> {
  let pointer = pointer.trim_start_matches('/');
  if pointer.is_empty() {
    return Some(document);
  }
  let mut current = document;
  for raw in pointer.split('/') {
    let segment = percent_decode_str(raw)
      .decode_utf8_lossy()
      .replace("~1", "/")
      .replace("~0", "~");
    current = match current {
      Value::Object(map) => map.get(&segment)?,
      Value::Array(list) => list.get(segment.parse::<usize>().ok()?)?,
      _ => return None,
    };
  }
  Some(current)
}

/// Per-run resolver. External documents are cached by canonical path and
/// must stay inside `root_dir`.
#[derive(Debug, Default)]
pub struct RefResolver {
  root_dir: Option<PathBuf>,
  cache: HashMap<PathBuf, Rc<Value>>,
}

impl RefResolver {
  pub fn new(root_dir: Option<&Path>) -> Self {
    Self {
      root_dir: root_dir.map(|d| d.canonicalize().unwrap_or_else(|_| d.to_path_buf())),
      cache: HashMap::new(),
    }
  }

  pub fn cached_documents(&self) -> usize {
    self.cache.len()
  }

  pub fn resolve(&mut self, ctx: &RefContext, reference: &str) -> Option<(Value, RefContext)> {
    if let Some(pointer) = reference.strip_prefix('#') {
      return resolve_pointer(ctx.document(), pointer).map(|v| (v.clone(), ctx.clone()));
    }
    let (file, pointer) = reference.split_once('#').unwrap_or((reference, ""));
    if file.starts_with("http://") || file.starts_with("https://") {
      debug!("{}remote $ref not followed: {}", Emoji("🔗", ""), reference);
      return None;
    }
    let Some(base_dir) = ctx.base_dir() else {
      debug!("{}external $ref without a base directory: {}", Emoji("🔗", ""), reference);
      return None;
    };
    let canonical = match base_dir.join(file).canonicalize() {
      Ok(p) => p,
      Err(err) => {
        warn!("{}external $ref {}: {}", Emoji("⚠️", ""), reference, err);
        return None;
      }
    };
    let root = self.root_dir.as_deref().unwrap_or(base_dir);
    if !canonical.starts_with(root) {
      warn!(
        "{}external $ref {} escapes {}, rejected",
        Emoji("⚠️", ""),
        reference,
        root.display()
      );
      return None;
    }
    let document = self.load(&canonical)?;
    let next = RefContext::new(document, canonical.parent().map(Path::to_path_buf));
    let value = resolve_pointer(next.document(), pointer)?.clone();
    Some((value, next))
  }

  fn load(&mut self, canonical: &Path) -> Option<Rc<Value>> {
    if let Some(doc) = self.cache.get(canonical) {
      return Some(doc.clone());
    }
    let parsed = std::fs::read(canonical)
      .map_err(crate::error::Error::from)
      .and_then(|bytes| parse_document(&bytes));
    match parsed {
      Ok(v) => {
        let doc = Rc::new(v);
        self.cache.insert(canonical.to_path_buf(), doc.clone());
        Some(doc)
      }
      Err(err) => {
        warn!("{}load {}: {}", Emoji("💢", ""), canonical.display(), err);
        None
      }
    }
  }
}
