//! Rate-limited HTTP execution.
use crate::error::{new_io_error, Result};
use crate::request::{parse_header_line, HeaderSet, RequestDescriptor};
use console::Emoji;
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use log::{debug, error, warn};
use rand::Rng;
use slinger::redirect::Policy;
use slinger::{ClientBuilder, Proxy};
use std::num::NonZeroU32;
use std::time::Duration;
use url::Url;

/// Synthetic status for network failures and timeouts.
pub const STATUS_FAILED: u16 = 0;
/// Synthetic status for requests that were never sent.
pub const STATUS_SKIPPED: u16 = 1;

pub const DEFAULT_USER_AGENT: &str = "Swagger Jacker (github.com/BishopFox/sj)";
pub const DEFAULT_ACCEPT: &str = "application/json, text/html, */*";

pub const USER_AGENTS: [&str; 24] = [
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/88.0.4324.150 Safari/537.36",
  "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0.2 Safari/605.1.15",
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:84.0) Gecko/20100101 Firefox/84.0",
  "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/87.0.4280.141 Safari/537.36",
  "Mozilla/5.0 (Windows NT 10.0; WOW64; Trident/7.0; rv:11.0) like Gecko",
  "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_14_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.132 Safari/537.36",
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:73.0) Gecko/20100101 Firefox/73.0",
  "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_3) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.122 Safari/537.36",
  "Mozilla/5.0 (Windows NT 6.1; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.36",
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:74.0) Gecko/20100101 Firefox/74.0",
  "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:75.0) Gecko/20100101 Firefox/75.0",
  "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_13_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/13.0.4 Safari/605.1.15",
  "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/70.0.3538.77 Safari/537.36",
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.36 Edge/16.16299",
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:76.0) Gecko/20100101 Firefox/76.0",
  "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/81.0.4044.92 Safari/537.36",
  "Mozilla/5.0 (Windows NT 10.0; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/54.0.2840.99 Safari/537.36",
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/60.0.3112.113 Safari/537.36",
  "Mozilla/5.0 (Windows NT 6.3; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/63.0.3239.132 Safari/537.36",
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:77.0) Gecko/20100101 Firefox/77.0",
  "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_14_4) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/73.0.3683.103 Safari/537.36",
  "Mozilla/5.0 (Windows NT 6.1; WOW64; rv:54.0) Gecko/20100101 Firefox/54.0",
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/64.0.3282.140 Safari/537.36 Edge/17.17134",
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:78.0) Gecko/20100101 Firefox/78.0",
];

type DirectLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token bucket shared by every outbound request, burst of one.
pub struct RateLimiter {
  inner: Option<DirectLimiter>,
}

impl RateLimiter {
  /// `rps <= 0` disables limiting entirely.
  pub fn new(rps: i64) -> Self {
    let inner = u32::try_from(rps)
      .ok()
      .and_then(NonZeroU32::new)
      .map(|n| governor::RateLimiter::direct(Quota::per_second(n).allow_burst(NonZeroU32::MIN)));
    Self { inner }
  }

  pub fn unlimited() -> Self {
    Self { inner: None }
  }

  pub fn is_enabled(&self) -> bool {
    self.inner.is_some()
  }

  pub fn wait(&self) {
    let Some(limiter) = &self.inner else {
      return;
    };
    let clock = DefaultClock::default();
    while let Err(not_until) = limiter.check() {
      let pause = not_until
        .wait_time_from(clock.now())
        .clamp(Duration::from_millis(1), Duration::from_secs(1));
      std::thread::sleep(pause);
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportRequest {
  pub method: String,
  pub url: String,
  pub headers: HeaderSet,
  pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
  pub status: u16,
  pub headers: HeaderSet,
  pub body: Vec<u8>,
}

/// Sends one request without following redirects.
pub trait Transport {
  fn send(&self, request: &TransportRequest) -> Result<RawResponse>;
}

pub fn client_builder(timeout: u64, insecure: bool, proxy: Option<Proxy>) -> ClientBuilder {
  let mut builder = ClientBuilder::new()
    .danger_accept_invalid_certs(insecure)
    .redirect(Policy::None)
    .timeout(Some(Duration::from_secs(timeout)));
  if let Some(proxy) = proxy {
    builder = builder.proxy(proxy);
  }
  builder
}

pub struct SlingerTransport {
  client: slinger::Client,
}

impl SlingerTransport {
  pub fn new(builder: ClientBuilder) -> Self {
    Self {
      client: builder.build().unwrap_or_default(),
    }
  }
}

impl Transport for SlingerTransport {
  fn send(&self, request: &TransportRequest) -> Result<RawResponse> {
    let mut builder = slinger::Request::builder()
      .method(request.method.as_str())
      .uri(request.url.as_str());
    for (k, v) in request.headers.iter() {
      builder = builder.header(k, v);
    }
    let body = slinger::Body::from(request.body.clone().unwrap_or_default());
    let http_request = builder
      .body(body)
      .map_err(|err| new_io_error(&err.to_string()))?;
    let response = self.client.execute(slinger::Request::from(http_request))?;
    let mut headers = HeaderSet::new();
    for (name, value) in response.headers() {
      if let Ok(v) = value.to_str() {
        headers.insert_if_absent(name.as_str(), v);
      }
    }
    Ok(RawResponse {
      status: response.status_code().as_u16(),
      headers,
      body: response.body().as_ref().map(|b| b.to_vec()).unwrap_or_default(),
    })
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
  pub status: u16,
  pub body: Vec<u8>,
  pub text: String,
  pub content_type: Option<String>,
}

impl ExecutionOutcome {
  pub fn failed() -> Self {
    Self {
      status: STATUS_FAILED,
      ..Default::default()
    }
  }

  pub fn skipped() -> Self {
    Self {
      status: STATUS_SKIPPED,
      text: String::from("skipped"),
      ..Default::default()
    }
  }

  pub fn preview(&self, len: usize) -> String {
    self.text.chars().take(len).collect()
  }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
  pub agent: String,
  pub randomize_agent: bool,
  /// Raw `Key: Value` lines applied to every request.
  pub headers: Vec<String>,
  /// Content-Type used for POST requests that carry none.
  pub content_type: Option<String>,
  pub max_redirect_hops: usize,
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      agent: DEFAULT_USER_AGENT.to_string(),
      randomize_agent: false,
      headers: Vec::new(),
      content_type: None,
      max_redirect_hops: 1,
    }
  }
}

pub struct Executor {
  transport: Box<dyn Transport>,
  limiter: RateLimiter,
  config: ExecutorConfig,
  global_headers: Vec<(String, String)>,
}

impl Executor {
  pub fn new(transport: Box<dyn Transport>, limiter: RateLimiter, config: ExecutorConfig) -> Self {
    let mut global_headers = Vec::new();
    for line in &config.headers {
      match parse_header_line(line) {
        Some(pair) => global_headers.push(pair),
        None => warn!(
          "{}header {} cannot be used, headers must be in 'Key: Value' format",
          Emoji("⚠️", ""),
          line
        ),
      }
    }
    Self {
      transport,
      limiter,
      config,
      global_headers,
    }
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.config
  }

  fn user_agent(&self) -> String {
    if self.config.randomize_agent {
      let index = rand::rng().random_range(0..USER_AGENTS.len());
      USER_AGENTS[index].to_string()
    } else {
      self.config.agent.clone()
    }
  }

  /// Request headers first, then global headers not already set, then the
  /// User-Agent/Accept/Content-Type defaults.
  pub fn prepare_headers(&self, method: &str, custom: &HeaderSet) -> HeaderSet {
    let mut headers = custom.clone();
    for (k, v) in &self.global_headers {
      headers.insert_if_absent(k, v);
    }
    if self.config.randomize_agent || !headers.contains("User-Agent") {
      headers.set("User-Agent", &self.user_agent());
    }
    headers.insert_if_absent("Accept", DEFAULT_ACCEPT);
    if method.eq_ignore_ascii_case("POST") && !headers.contains("Content-Type") {
      let ct = self.config.content_type.as_deref().unwrap_or("application/json");
      headers.set_content_type(ct);
    }
    headers
  }

  pub fn execute(&self, descriptor: &RequestDescriptor) -> ExecutionOutcome {
    let headers = self.prepare_headers(&descriptor.method, &descriptor.headers);
    let mut request = TransportRequest {
      method: descriptor.method.clone(),
      url: descriptor.url.clone(),
      headers,
      body: descriptor.body.clone(),
    };
    let mut hops = 0;
    loop {
      self.limiter.wait();
      let response = match self.transport.send(&request) {
        Ok(r) => r,
        Err(err) => {
          let msg = err.to_string();
          if msg.contains("certificate") || msg.contains("tls") || msg.contains("ssl") {
            error!("{}{}: {} (try --insecure)", Emoji("💢", ""), request.url, msg);
          } else {
            error!("{}{}: response not received: {}", Emoji("💢", ""), request.url, msg);
          }
          return ExecutionOutcome::failed();
        }
      };
      let text = String::from_utf8_lossy(&response.body).to_string();
      if matches!(response.status, 301 | 302) && text.contains("<html>") {
        let next = response
          .headers
          .get("Location")
          .and_then(|loc| Url::parse(&request.url).and_then(|base| base.join(loc)).ok());
        match next {
          Some(next) if hops < self.config.max_redirect_hops => {
            debug!("{}{} -> {}", Emoji("↪️", ""), request.url, next);
            hops += 1;
            request.url = next.to_string();
            continue;
          }
          Some(_) => debug!("{}redirect limit reached at {}", Emoji("↪️", ""), request.url),
          None => {}
        }
      }
      return ExecutionOutcome {
        status: response.status,
        content_type: response.headers.get("Content-Type").map(String::from),
        body: response.body,
        text,
      };
    }
  }

  pub fn get(&self, url: &str) -> ExecutionOutcome {
    self.execute(&RequestDescriptor {
      method: String::from("GET"),
      url: url.to_string(),
      ..Default::default()
    })
  }

  /// Rate-limited GET returning only the response Content-Type.
  pub fn content_type(&self, url: &str) -> Option<String> {
    let mut headers = HeaderSet::new();
    if self.config.randomize_agent || self.config.agent != DEFAULT_USER_AGENT {
      headers.set("User-Agent", &self.user_agent());
    }
    let request = TransportRequest {
      method: String::from("GET"),
      url: url.to_string(),
      headers,
      body: None,
    };
    self.limiter.wait();
    match self.transport.send(&request) {
      Ok(response) => response.headers.get("Content-Type").map(String::from),
      Err(err) => {
        debug!("{}{}: {}", Emoji("💢", ""), url, err);
        None
      }
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::error::Error;
  use std::cell::RefCell;
  use std::collections::VecDeque;
  use std::rc::Rc;
  use std::time::Instant;

  /// Replays canned responses and records every request.
  #[derive(Clone, Default)]
  pub(crate) struct ScriptedTransport {
    pub responses: Rc<RefCell<VecDeque<Result<RawResponse>>>>,
    pub sent: Rc<RefCell<Vec<TransportRequest>>>,
  }

  impl ScriptedTransport {
    pub fn push(&self, status: u16, headers: &[(&str, &str)], body: &str) {
      let mut set = HeaderSet::new();
      for (k, v) in headers {
        set.set(k, v);
      }
      self.responses.borrow_mut().push_back(Ok(RawResponse {
        status,
        headers: set,
        body: body.as_bytes().to_vec(),
      }));
    }
    pub fn push_error(&self) {
      self
        .responses
        .borrow_mut()
        .push_back(Err(Error::InvalidTarget(String::from("connection refused"))));
    }
  }

  impl Transport for ScriptedTransport {
    fn send(&self, request: &TransportRequest) -> Result<RawResponse> {
      self.sent.borrow_mut().push(request.clone());
      self
        .responses
        .borrow_mut()
        .pop_front()
        .unwrap_or_else(|| Ok(RawResponse { status: 404, ..Default::default() }))
    }
  }

  pub(crate) fn executor(transport: &ScriptedTransport, config: ExecutorConfig) -> Executor {
    Executor::new(Box::new(transport.clone()), RateLimiter::unlimited(), config)
  }

  #[test]
  fn limiter_disabled_for_non_positive_rates() {
    assert!(!RateLimiter::new(0).is_enabled());
    assert!(!RateLimiter::new(-5).is_enabled());
    assert!(RateLimiter::new(15).is_enabled());
  }

  #[test]
  fn limiter_spaces_requests() {
    let limiter = RateLimiter::new(5);
    let start = Instant::now();
    for _ in 0..3 {
      limiter.wait();
    }
    assert!(start.elapsed() >= Duration::from_millis(350));
  }

  #[test]
  fn header_precedence() {
    let transport = ScriptedTransport::default();
    let exec = executor(
      &transport,
      ExecutorConfig {
        headers: vec!["X-Api: global".into(), "broken".into(), "Accept: text/plain".into()],
        ..Default::default()
      },
    );
    let mut custom = HeaderSet::new();
    custom.set("x-api", "custom");
    let headers = exec.prepare_headers("POST", &custom);
    assert_eq!(headers.get("X-Api"), Some("custom"));
    assert_eq!(headers.get("Accept"), Some("text/plain"));
    assert_eq!(headers.get("User-Agent"), Some(DEFAULT_USER_AGENT));
    assert_eq!(headers.get("Content-Type"), Some("application/json"));
    let get = exec.prepare_headers("GET", &HeaderSet::new());
    assert!(!get.contains("Content-Type"));
  }

  #[test]
  fn follows_html_redirect_once() {
    let transport = ScriptedTransport::default();
    transport.push(302, &[("Location", "/next")], "<html>moved</html>");
    transport.push(301, &[("Location", "/again")], "<html>moved</html>");
    let exec = executor(&transport, ExecutorConfig::default());
    let outcome = exec.execute(&RequestDescriptor {
      method: "PUT".into(),
      url: "https://x.example/start".into(),
      body: Some(b"{}".to_vec()),
      ..Default::default()
    });
    assert_eq!(outcome.status, 301);
    let sent = transport.sent.borrow();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].url, "https://x.example/next");
    assert_eq!(sent[1].method, "PUT");
    assert_eq!(sent[1].body.as_deref(), Some(&b"{}"[..]));
  }

  #[test]
  fn plain_redirects_are_returned() {
    let transport = ScriptedTransport::default();
    transport.push(302, &[("Location", "/next")], "");
    let exec = executor(&transport, ExecutorConfig::default());
    assert_eq!(exec.get("https://x.example/").status, 302);
    assert_eq!(transport.sent.borrow().len(), 1);
  }

  #[test]
  fn transport_failure_is_status_zero() {
    let transport = ScriptedTransport::default();
    transport.push_error();
    let exec = executor(&transport, ExecutorConfig::default());
    let outcome = exec.get("https://x.example/");
    assert_eq!(outcome.status, STATUS_FAILED);
    assert!(outcome.body.is_empty());
  }

  #[test]
  fn content_type_probe() {
    let transport = ScriptedTransport::default();
    transport.push(200, &[("content-type", "application/json")], "{}");
    let exec = executor(&transport, ExecutorConfig::default());
    assert_eq!(exec.content_type("https://x.example/a").as_deref(), Some("application/json"));
    assert!(!transport.sent.borrow()[0].headers.contains("User-Agent"));
    assert_eq!(exec.content_type("https://x.example/b"), None);
  }
}
