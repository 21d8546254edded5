//! Multi-phase search for exposed definitions.
pub mod brute;
pub mod html;
pub mod js;

use crate::error::{Error, Result};
use crate::execute::Executor;
use crate::spec::{validate_spec_response, SpecDocument};
use brute::{build_candidates, classify_content_type, ProbeKind};
use console::{Emoji, Term};
use log::{debug, info};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::path::Path;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryPhase {
  Direct,
  SwaggerUi,
  Brute,
}

impl Display for DiscoveryPhase {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      DiscoveryPhase::Direct => f.write_str("direct"),
      DiscoveryPhase::SwaggerUi => f.write_str("swagger_ui"),
      DiscoveryPhase::Brute => f.write_str("brute"),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DedupeMode {
  #[default]
  UrlAndHash,
  Url,
}

pub type OnDiscovered<'a> = Box<dyn FnMut(&DiscoveredSpec) + 'a>;

#[derive(Default)]
pub struct DiscoveryOptions<'a> {
  /// Keep searching after the first hit.
  pub continue_search: bool,
  /// Stop once this many specs were found, 0 for no limit.
  pub max_found: usize,
  pub show_progress: bool,
  pub dedupe: DedupeMode,
  pub on_discovered: Option<OnDiscovered<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredSpec {
  pub url: String,
  pub phase: DiscoveryPhase,
  #[serde(skip)]
  pub spec_bytes: Vec<u8>,
  pub content_hash: String,
  #[serde(skip)]
  pub spec: SpecDocument,
}

/// Deduplicates hits by URL, and by content hash in url+hash mode.
pub struct DiscoveryCollector<'a> {
  options: DiscoveryOptions<'a>,
  seen_urls: HashSet<String>,
  seen_hashes: HashSet<String>,
  results: Vec<DiscoveredSpec>,
}

impl<'a> DiscoveryCollector<'a> {
  pub fn new(options: DiscoveryOptions<'a>) -> Self {
    Self {
      options,
      seen_urls: HashSet::new(),
      seen_hashes: HashSet::new(),
      results: Vec::new(),
    }
  }

  pub fn add(&mut self, url: &str, phase: DiscoveryPhase, spec: SpecDocument, spec_bytes: Vec<u8>) -> bool {
    let url = url.trim();
    if url.is_empty() || self.seen_urls.contains(url) {
      return false;
    }
    let content_hash = spec.content_hash();
    if self.options.dedupe == DedupeMode::UrlAndHash && !self.seen_hashes.insert(content_hash.clone()) {
      return false;
    }
    self.seen_urls.insert(url.to_string());
    let found = DiscoveredSpec {
      url: url.to_string(),
      phase,
      spec_bytes,
      content_hash,
      spec,
    };
    info!("{}definition found ({}): {}", Emoji("📄", ""), phase, found.url);
    if let Some(callback) = self.options.on_discovered.as_mut() {
      callback(&found);
    }
    self.results.push(found);
    true
  }

  pub fn should_stop(&self) -> bool {
    if self.results.is_empty() {
      return false;
    }
    if !self.options.continue_search {
      return true;
    }
    self.options.max_found > 0 && self.results.len() >= self.options.max_found
  }

  pub fn len(&self) -> usize {
    self.results.len()
  }

  pub fn is_empty(&self) -> bool {
    self.results.is_empty()
  }

  pub fn into_results(self) -> Vec<DiscoveredSpec> {
    self.results
  }
}

/// Trim, default to https and require a scheme and a host.
pub fn normalize_target_input(raw: &str) -> Result<Url> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Err(Error::InvalidTarget(String::from("target is empty")));
  }
  if trimmed.starts_with('#') {
    return Err(Error::InvalidTarget(String::from("target is a comment")));
  }
  let with_scheme = if trimmed.contains("://") {
    trimmed.to_string()
  } else {
    format!("https://{}", trimmed)
  };
  let url = Url::parse(&with_scheme).map_err(|e| Error::InvalidTarget(format!("'{}': {}", raw, e)))?;
  if url.host_str().is_none_or(str::is_empty) {
    return Err(Error::InvalidTarget(format!("'{}': missing scheme or host", raw)));
  }
  Ok(url)
}

pub fn scheme_host_only(url: &Url) -> String {
  let host = url.host_str().unwrap_or_default();
  match url.port() {
    Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
    None => format!("{}://{}", url.scheme(), host),
  }
}

/// A validated definition and where it was read from.
pub struct Hit {
  pub url: String,
  pub spec: SpecDocument,
  pub bytes: Vec<u8>,
}

pub struct SpecLocator<'e> {
  executor: &'e Executor,
}

impl<'e> SpecLocator<'e> {
  pub fn new(executor: &'e Executor) -> Self {
    Self { executor }
  }

  /// GET `url` and accept a 200 whose body parses as a definition with paths.
  pub fn fetch_and_validate(&self, url: &str) -> Option<Hit> {
    let outcome = self.executor.get(url);
    if outcome.status != 200 {
      debug!("{}{} answered {}", Emoji("🔍", ""), url, outcome.status);
      return None;
    }
    let spec = validate_spec_response(&outcome.body)?;
    Some(Hit {
      url: url.to_string(),
      spec,
      bytes: outcome.body,
    })
  }

  fn fetch_relative(&self, base: &Url, reference: &str) -> Option<Hit> {
    let resolved = base.join(reference).ok()?;
    self.fetch_and_validate(resolved.as_str())
  }

  /// A script's referenced spec first, then an object literal inside it.
  fn try_script_body(&self, script_url: &Url, body: &str) -> Option<Hit> {
    if let Some(found) = js::extract_spec_url_from_js(body).and_then(|r| self.fetch_relative(script_url, &r)) {
      info!("{}spec URL referenced in JavaScript: {}", Emoji("📜", ""), found.url);
      return Some(found);
    }
    js::extract_embedded_spec(body).map(|(spec, bytes)| Hit {
      url: script_url.to_string(),
      spec,
      bytes,
    })
  }

  fn try_javascript(&self, script_url: &Url) -> Option<Hit> {
    let outcome = self.executor.get(script_url.as_str());
    if outcome.status != 200 || outcome.body.is_empty() {
      return None;
    }
    self.try_script_body(script_url, &outcome.text)
  }

  fn try_ui_page(&self, page_url: &Url) -> Option<Hit> {
    let outcome = self.executor.get(page_url.as_str());
    if outcome.status != 200 || outcome.body.is_empty() || !html::looks_like_ui_page(&outcome.text) {
      return None;
    }
    let page = outcome.text;
    if let Some(found) = js::extract_swashbuckle_config(&page).and_then(|p| self.fetch_relative(page_url, &p)) {
      return Some(found);
    }
    if let Some(found) = html::extract_spec_url_from_html(&page).and_then(|p| self.fetch_relative(page_url, &p)) {
      return Some(found);
    }
    let inline = html::scripts(&page)
      .into_iter()
      .filter(|s| s.src.is_none() && !s.text.trim().is_empty())
      .find_map(|s| js::extract_embedded_spec(&s.text));
    if let Some((spec, bytes)) = inline {
      return Some(Hit {
        url: page_url.to_string(),
        spec,
        bytes,
      });
    }
    html::candidate_script_sources(&page, page_url)
      .iter()
      .find_map(|script| self.try_javascript(script))
      .map(|hit| Hit {
        url: page_url.to_string(),
        ..hit
      })
  }

  pub fn swagger_ui(&self, base: &str) -> Option<Hit> {
    let base = Url::parse(base).ok()?;
    html::SWAGGER_UI_PATHS
      .iter()
      .filter_map(|p| base.join(p).ok())
      .find_map(|page| self.try_ui_page(&page))
  }

  /// Probe the content type, then pick how to read the candidate.
  pub fn probe_candidate(&self, candidate: &str) -> Option<Hit> {
    let content_type = self.executor.content_type(candidate);
    match classify_content_type(content_type.as_deref()) {
      ProbeKind::Definition => return self.fetch_and_validate(candidate),
      ProbeKind::Script => {
        let url = Url::parse(candidate).ok()?;
        let outcome = self.executor.get(candidate);
        if outcome.status != 200 {
          return None;
        }
        if let Some(found) = js::extract_swashbuckle_config(&outcome.text).and_then(|p| self.fetch_relative(&url, &p)) {
          return Some(found);
        }
        if let Some(found) = self.try_script_body(&url, &outcome.text) {
          return Some(found);
        }
      }
      ProbeKind::Other => {}
    }
    self.fetch_and_validate(candidate)
  }

  /// Direct fetch, Swagger UI pages, then brute force. Each phase ends the
  /// search unless `continue_search` is set.
  pub fn discover(
    &self,
    seed: &str,
    wordlist: Option<&Path>,
    options: DiscoveryOptions<'_>,
  ) -> Result<Vec<DiscoveredSpec>> {
    let normalized = normalize_target_input(seed)?;
    let base = scheme_host_only(&normalized);
    let show_progress = options.show_progress;
    let mut collector = DiscoveryCollector::new(options);

    if let Some(hit) = self.fetch_and_validate(normalized.as_str()) {
      collector.add(&hit.url, DiscoveryPhase::Direct, hit.spec, hit.bytes);
      if collector.should_stop() {
        return Ok(collector.into_results());
      }
    }
    if let Some(hit) = self.swagger_ui(&base) {
      collector.add(&hit.url, DiscoveryPhase::SwaggerUi, hit.spec, hit.bytes);
      if collector.should_stop() {
        return Ok(collector.into_results());
      }
    }

    let candidates = build_candidates(&base, wordlist)?;
    info!(
      "{}sending {} requests to {}, this could take a while",
      Emoji("🚀", ""),
      candidates.len(),
      base
    );
    let term = Term::stderr();
    for (index, candidate) in candidates.iter().enumerate() {
      if let Some(hit) = self.probe_candidate(candidate) {
        collector.add(&hit.url, DiscoveryPhase::Brute, hit.spec, hit.bytes);
        if collector.should_stop() {
          break;
        }
      }
      if show_progress {
        term.clear_line().unwrap_or_default();
        term
          .write_str(&format!("Request: {}", index + 1))
          .unwrap_or_default();
      }
    }
    if show_progress {
      term.write_line("").unwrap_or_default();
    }

    if collector.is_empty() {
      return Err(Error::NoSpecFound(seed.trim().to_string()));
    }
    Ok(collector.into_results())
  }
}
