//! Dangerous-keyword gate in front of the executor.
use crate::prompt::Prompt;
use console::Emoji;
use log::debug;
use url::Url;

pub const DANGEROUS_KEYWORDS: [&str; 18] = [
  "block", "change", "clear", "delete", "destroy", "drop", "erase", "overwrite", "pause", "rebuild",
  "remove", "replace", "reset", "restart", "revoke", "set", "stop", "write",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyDecision {
  Proceed,
  Skip,
}

/// The part of a URL the keywords are matched against: path plus query,
/// `/` when the path is empty.
pub fn endpoint_for_check(url: &str) -> String {
  let Ok(parsed) = Url::parse(url) else {
    return url.to_string();
  };
  let path = match parsed.path() {
    "" => "/",
    p => p,
  };
  match parsed.query() {
    Some(q) if !q.is_empty() => format!("{}?{}", path, q),
    _ => path.to_string(),
  }
}

#[derive(Debug, Clone)]
pub struct SafetyGate {
  safe_words: Vec<String>,
  quiet: bool,
  avoid_all: bool,
  surveyed: bool,
}

impl SafetyGate {
  /// Safe words match keywords exactly. Quiet mode never prompts and skips
  /// every dangerous request.
  pub fn new(safe_words: Vec<String>, quiet: bool) -> Self {
    Self {
      safe_words,
      quiet,
      avoid_all: quiet,
      surveyed: false,
    }
  }

  pub fn dangerous_keyword(&self, url: &str) -> Option<&'static str> {
    let endpoint = endpoint_for_check(url);
    DANGEROUS_KEYWORDS
      .iter()
      .copied()
      .filter(|k| !self.safe_words.iter().any(|s| s == k))
      .find(|k| endpoint.contains(k))
  }

  pub fn check(&mut self, url: &str, prompt: &mut dyn Prompt) -> SafetyDecision {
    let Some(keyword) = self.dangerous_keyword(url) else {
      return SafetyDecision::Proceed;
    };
    if self.quiet || self.avoid_all {
      debug!("{}skipping {} ({})", Emoji("🛑", ""), url, keyword);
      return SafetyDecision::Skip;
    }
    prompt.write(&format!(
      "{}Dangerous keyword '{}' detected in URL ({}). Do you still want to test this endpoint? (y/N) ",
      Emoji("⚠️ ", ""),
      keyword,
      url
    ));
    let answer = prompt.read_line().unwrap_or_default();
    if answer.trim().eq_ignore_ascii_case("y") {
      return SafetyDecision::Proceed;
    }
    if !self.surveyed {
      self.surveyed = true;
      prompt.write("Do you want to avoid all dangerous requests? (Y/n) ");
      let answer = prompt.read_line().unwrap_or_default().trim().to_lowercase();
      self.avoid_all = matches!(answer.as_str(), "" | "y" | "yes");
    }
    SafetyDecision::Skip
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::prompt::ScriptedPrompt;

  #[test]
  fn endpoint_is_path_and_query() {
    assert_eq!(
      endpoint_for_check("https://example.com/v1/delete-user?id=1"),
      "/v1/delete-user?id=1"
    );
    assert_eq!(endpoint_for_check("https://example.com"), "/");
  }

  #[test]
  fn host_names_are_not_matched() {
    let gate = SafetyGate::new(vec![], true);
    assert_eq!(gate.dangerous_keyword("https://delete.example.com/users"), None);
    assert_eq!(gate.dangerous_keyword("https://example.com/users?action=drop"), Some("drop"));
  }

  #[test]
  fn safe_words_match_exactly() {
    let gate = SafetyGate::new(vec!["set".into()], true);
    assert_eq!(gate.dangerous_keyword("https://x/settings"), None);
    let gate = SafetyGate::new(vec!["settings".into()], true);
    assert_eq!(gate.dangerous_keyword("https://x/settings"), Some("set"));
  }

  #[test]
  fn quiet_skips_without_prompting() {
    let mut gate = SafetyGate::new(vec![], true);
    let mut prompt = ScriptedPrompt::new(["y"]);
    assert_eq!(gate.check("https://x/v1/remove", &mut prompt), SafetyDecision::Skip);
    assert_eq!(prompt.remaining(), 1);
    assert_eq!(gate.check("https://x/v1/users", &mut prompt), SafetyDecision::Proceed);
  }

  #[test]
  fn decline_then_avoid_all() {
    let mut gate = SafetyGate::new(vec![], false);
    let mut prompt = ScriptedPrompt::new(["", ""]);
    assert_eq!(gate.check("https://x/reset", &mut prompt), SafetyDecision::Skip);
    assert!(prompt.output.contains("avoid all"));
    assert_eq!(gate.check("https://x/drop", &mut prompt), SafetyDecision::Skip);
    assert_eq!(prompt.remaining(), 0);
  }

  #[test]
  fn decline_once_keeps_asking() {
    let mut gate = SafetyGate::new(vec![], false);
    let mut prompt = ScriptedPrompt::new(["n", "n", "y"]);
    assert_eq!(gate.check("https://x/reset", &mut prompt), SafetyDecision::Skip);
    assert_eq!(gate.check("https://x/drop", &mut prompt), SafetyDecision::Proceed);
    assert_eq!(prompt.output.matches("avoid all").count(), 1);
  }
}
