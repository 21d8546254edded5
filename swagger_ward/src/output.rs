use crate::error::Result;
use console::{Emoji, style};
use engine::workflow::AuditRecord;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointResult {
  pub method: String,
  pub status: u16,
  pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerboseResult {
  pub method: String,
  pub preview: String,
  pub status: u16,
  pub target: String,
  pub curl: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResultSet {
  Plain(Vec<EndpointResult>),
  Verbose(Vec<VerboseResult>),
}

impl ResultSet {
  pub fn from_records(records: &[AuditRecord], verbose: bool, accessible_only: bool) -> Self {
    let kept = records
      .iter()
      .filter(move |r| !accessible_only || r.status == 200);
    if verbose {
      ResultSet::Verbose(
        kept
          .map(|r| VerboseResult {
            method: r.method.clone(),
            preview: r.preview.clone(),
            status: r.status,
            target: r.target.clone(),
            curl: r.curl.clone(),
          })
          .collect(),
      )
    } else {
      ResultSet::Plain(
        kept
          .map(|r| EndpointResult {
            method: r.method.clone(),
            status: r.status,
            target: r.target.clone(),
          })
          .collect(),
      )
    }
  }
}

/// Results of a single definition, the shape printed by a plain JSON run.
#[derive(Debug, Clone, Serialize)]
pub struct SpecResults {
  #[serde(rename = "apiTitle")]
  pub api_title: String,
  pub description: String,
  pub results: ResultSet,
}

/// One automate execution inside a bulk or discovery-driven run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AutomateRunReport {
  pub input: String,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub spec_url: String,
  pub discovery_used: bool,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub discovery_phase: String,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub api_title: String,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub description: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub results: Option<ResultSet>,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkAutomateReport {
  pub mode: String,
  pub run_count: usize,
  pub runs: Vec<AutomateRunReport>,
}

impl BulkAutomateReport {
  pub fn new(runs: Vec<AutomateRunReport>) -> Self {
    Self {
      mode: String::from("bulk_automate"),
      run_count: runs.len(),
      runs,
    }
  }
}

/// `(symbol, status text)` shown for a status on the console.
pub fn status_mark(status: u16) -> (&'static str, String) {
  let symbol = match status {
    200 => "✓",
    401 | 403 | 404 => "✗",
    _ => "⚠",
  };
  let text = match status {
    0 => String::from("N/A"),
    1 => String::from("---"),
    s => s.to_string(),
  };
  (symbol, text)
}

pub struct Output {
  pub writer: BufWriter<Box<dyn Write + 'static>>,
}

impl Output {
  /// Writes to `outfile` with colors disabled, or to stdout.
  pub fn new(outfile: Option<&Path>) -> Result<Self> {
    let writer: BufWriter<Box<dyn Write + 'static>> = match outfile {
      Some(path) => {
        console::set_colors_enabled(false);
        let f = File::create(path)?;
        BufWriter::new(Box::new(f))
      }
      None => BufWriter::new(Box::new(std::io::stdout())),
    };
    Ok(Self { writer })
  }

  pub fn from_writer(writer: Box<dyn Write + 'static>) -> Self {
    Self {
      writer: BufWriter::new(writer),
    }
  }

  pub fn line(&mut self, text: &str) {
    writeln!(self.writer, "{}", text).unwrap_or_default();
    self.writer.flush().unwrap_or_default();
  }

  pub fn spec_info(&mut self, title: &str, description: &str) {
    if !title.is_empty() {
      writeln!(self.writer, "Title: {}", style(title).bold()).unwrap_or_default();
    }
    if !description.is_empty() {
      writeln!(self.writer, "Description: {}\n", description).unwrap_or_default();
    }
    self.writer.flush().unwrap_or_default();
  }

  /// One console line per executed operation, plus the preview in verbose
  /// mode.
  pub fn record(&mut self, record: &AuditRecord, verbose: bool) {
    let (symbol, text) = status_mark(record.status);
    let paint = |s: String| match record.status {
      200 => style(s).green().bold(),
      401 | 403 | 404 => style(s).red().bold(),
      _ => style(s).yellow().bold(),
    };
    writeln!(
      self.writer,
      "{}  {}  {}  {}",
      paint(symbol.to_string()),
      paint(format!("{:<7}", record.method)),
      paint(format!("{:<3}", text)),
      record.target
    )
    .unwrap_or_default();
    if verbose && !record.preview.is_empty() {
      writeln!(self.writer, "   {}", style(&record.preview).dim()).unwrap_or_default();
    }
    self.writer.flush().unwrap_or_default();
  }

  /// Deduplicated targets that answered 200.
  pub fn accessible(&mut self, records: &[AuditRecord]) {
    let mut printed: Vec<&str> = Vec::new();
    for r in records.iter().filter(|r| r.status == 200) {
      if !printed.contains(&r.target.as_str()) {
        printed.push(&r.target);
      }
    }
    if printed.is_empty() {
      return;
    }
    writeln!(self.writer, "{}Accessible endpoints:", Emoji("🔓", "")).unwrap_or_default();
    for target in printed {
      writeln!(self.writer, "    {}", style(target).green()).unwrap_or_default();
    }
    self.writer.flush().unwrap_or_default();
  }

  pub fn json<T: Serialize>(&mut self, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    writeln!(self.writer, "{}", text)?;
    self.writer.flush()?;
    Ok(())
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use std::cell::RefCell;
  use std::rc::Rc;

  /// Shared in-memory sink, readable after the writer is boxed away.
  #[derive(Clone, Default)]
  pub(crate) struct Captured(pub Rc<RefCell<Vec<u8>>>);

  impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.0.borrow_mut().extend_from_slice(buf);
      Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  impl Captured {
    pub(crate) fn text(&self) -> String {
      String::from_utf8_lossy(&self.0.borrow()).to_string()
    }
  }

  fn record(status: u16, target: &str) -> AuditRecord {
    AuditRecord {
      method: String::from("GET"),
      target: target.to_string(),
      status,
      preview: String::from("{\"id\":1}"),
      curl: format!("curl -sk -X GET '{}'", target),
      attempts: 1,
    }
  }

  #[test]
  fn console_status_symbols() {
    assert_eq!(status_mark(200), ("✓", String::from("200")));
    assert_eq!(status_mark(401), ("✗", String::from("401")));
    assert_eq!(status_mark(404).0, "✗");
    assert_eq!(status_mark(302).0, "⚠");
    assert_eq!(status_mark(500).0, "⚠");
    assert_eq!(status_mark(0), ("⚠", String::from("N/A")));
    assert_eq!(status_mark(1), ("⚠", String::from("---")));
  }

  #[test]
  fn console_lines_and_accessible_list() {
    console::set_colors_enabled(false);
    let sink = Captured::default();
    let mut out = Output::from_writer(Box::new(sink.clone()));
    let records = vec![
      record(200, "https://x.example/a"),
      record(1, "https://x.example/reset"),
      record(200, "https://x.example/a"),
    ];
    out.record(&records[0], true);
    out.record(&records[1], false);
    out.accessible(&records);
    let text = sink.text();
    assert!(text.contains("✓  GET      200  https://x.example/a"));
    assert!(text.contains("   {\"id\":1}"));
    assert!(text.contains("⚠  GET      ---  https://x.example/reset"));
    assert_eq!(text.matches("    https://x.example/a").count(), 1);
  }

  #[test]
  fn json_reports() {
    let records = vec![record(200, "https://x.example/a"), record(403, "https://x.example/b")];
    let plain = serde_json::to_value(ResultSet::from_records(&records, false, false)).unwrap();
    assert_eq!(plain[1], serde_json::json!({"method":"GET","status":403,"target":"https://x.example/b"}));
    let verbose = serde_json::to_value(ResultSet::from_records(&records, true, true)).unwrap();
    assert_eq!(verbose.as_array().unwrap().len(), 1);
    assert_eq!(verbose[0]["curl"], "curl -sk -X GET 'https://x.example/a'");

    let bulk = BulkAutomateReport::new(vec![
      AutomateRunReport {
        input: String::from("https://x.example/"),
        error: String::from("no definition file found for https://x.example/"),
        ..Default::default()
      },
      AutomateRunReport {
        input: String::from("https://y.example/"),
        spec_url: String::from("https://y.example/openapi.json"),
        discovery_used: true,
        discovery_phase: String::from("brute"),
        results: Some(ResultSet::from_records(&records, false, false)),
        ..Default::default()
      },
    ]);
    let value = serde_json::to_value(&bulk).unwrap();
    assert_eq!(value["mode"], "bulk_automate");
    assert_eq!(value["run_count"], 2);
    assert!(value["runs"][0].get("results").is_none());
    assert!(value["runs"][0].get("spec_url").is_none());
    assert_eq!(value["runs"][1]["discovery_phase"], "brute");
    assert_eq!(value["runs"][1]["results"][0]["status"], 200);
  }
}
