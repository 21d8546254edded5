//! Swagger UI pages: spec links, inline scripts and same-host script files.
use super::js::{extract_spec_url_from_js, first_capture};
use fancy_regex::Regex;
use std::sync::OnceLock;

pub const SWAGGER_UI_PATHS: [&str; 21] = [
  "/swagger-ui.html",
  "/swagger-ui/",
  "/swagger/",
  "/swagger/ui/",
  "/swagger/index.html",
  "/api/docs",
  "/api/docs/",
  "/api/swagger-ui.html",
  "/api/swagger/",
  "/api/swagger/ui/",
  "/api-docs",
  "/api-docs/",
  "/docs",
  "/docs/",
  "/apidocs",
  "/apidocs/",
  "/swagger-ui/index.html",
  "/api/swagger-ui/",
  "/api/swagger/index.html",
  "/documentation",
  "/documentation/",
];

static FALLBACKS: OnceLock<Vec<Regex>> = OnceLock::new();
static BUNDLE: OnceLock<Regex> = OnceLock::new();

fn bundle() -> &'static Regex {
  BUNDLE.get_or_init(|| {
    Regex::new(r#"SwaggerUIBundle\s*\(\s*\{\s*url:\s*["']([^"']+)["']"#).expect("RE_COMPILE_BY_BUNDLE")
  })
}

fn fallbacks() -> &'static Vec<Regex> {
  FALLBACKS.get_or_init(|| {
    [
      r#"url:\s*["']([^"']+\.(?:json|yaml|yml))["']"#,
      r#"SwaggerUIBundle\s*\(\s*\{\s*url:\s*["']([^"']+)["']"#,
      r#"spec(?:Url)?:\s*["']([^"']+\.(?:json|yaml|yml))["']"#,
      r#"configUrl:\s*["']([^"']+\.(?:json|yaml|yml))["']"#,
    ]
    .iter()
    .map(|reg| Regex::new(reg).expect("RE_COMPILE_BY_HTML"))
    .collect()
  })
}

/// A page worth parsing: some HTML, or at least a mention of swagger.
pub fn looks_like_ui_page(body: &str) -> bool {
  let lower = body.to_lowercase();
  lower.contains("<html") || lower.contains("swagger")
}

/// One `<script>` element: its `src`, or its inline text when it has none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
  pub src: Option<String>,
  pub text: String,
}

pub fn scripts(html: &str) -> Vec<Script> {
  let mut out = Vec::new();
  let Ok(dom) = tl::parse(html, tl::ParserOptions::default()) else {
    return out;
  };
  let parser = dom.parser();
  if let Some(selector) = dom.query_selector("script") {
    for node in selector {
      let Some(node) = node.get(parser) else {
        continue;
      };
      let src = node.as_tag().and_then(|tag| {
        tag
          .attributes()
          .get("src")
          .and_then(|x| x.and_then(|x| x.try_as_utf8_str()))
          .map(|x| x.trim().to_string())
      });
      out.push(Script {
        src,
        text: node.inner_text(parser).to_string(),
      });
    }
  }
  out
}

fn link_spec_href(html: &str) -> Option<String> {
  let dom = tl::parse(html, tl::ParserOptions::default()).ok()?;
  let parser = dom.parser();
  for rel in ["link[rel=spec]", "link[rel=openapi]", "link[rel=swagger]"] {
    let Some(selector) = dom.query_selector(rel) else {
      continue;
    };
    for node in selector {
      let href = node.get(parser).and_then(|n| n.as_tag()).and_then(|tag| {
        tag
          .attributes()
          .get("href")
          .and_then(|x| x.and_then(|x| x.try_as_utf8_str()))
          .map(|x| x.trim().to_string())
      });
      if let Some(href) = href.filter(|h| !h.is_empty()) {
        return Some(href);
      }
    }
  }
  None
}

fn is_spec_file(src: &str) -> bool {
  [".json", ".yaml", ".yml"].iter().any(|ext| src.ends_with(ext))
}

/// Spec URL referenced by a Swagger UI page, in the order inline scripts,
/// spec-looking script sources, `link` relations, then whole-page patterns.
pub fn extract_spec_url_from_html(html: &str) -> Option<String> {
  let all = scripts(html);
  let inline = all.iter().find_map(|script| {
    extract_spec_url_from_js(&script.text).or_else(|| first_capture(bundle(), &script.text))
  });
  if inline.is_some() {
    return inline;
  }
  let sourced = all.iter().filter_map(|s| s.src.as_deref()).find(|src| {
    (src.contains("swagger") || src.contains("openapi")) && is_spec_file(src)
  });
  if let Some(src) = sourced {
    return Some(src.to_string());
  }
  link_spec_href(html).or_else(|| fallbacks().iter().find_map(|re| first_capture(re, html)))
}

/// Script sources worth fetching for JS extraction: same host as the page
/// and named like an initializer.
pub fn candidate_script_sources(html: &str, page_url: &url::Url) -> Vec<url::Url> {
  scripts(html)
    .into_iter()
    .filter_map(|s| s.src)
    .filter(|src| src.contains("swagger") || src.contains("init") || src.contains("config"))
    .filter_map(|src| page_url.join(&src).ok())
    .filter(|url| url.host_str() == page_url.host_str())
    .collect()
}
