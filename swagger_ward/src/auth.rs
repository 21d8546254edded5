//! Offers to apply the credentials a definition's security schemes accept.
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use console::Emoji;
use engine::prompt::Prompt;
use engine::spec::{SecurityScheme, SpecDocument};
use log::{info, warn};

/// Credentials the operator chose to apply to every request of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
  pub headers: Vec<(String, String)>,
  pub api_key_query: Option<(String, String)>,
}

fn ask(prompt: &mut dyn Prompt, question: &str) -> String {
  prompt.write(question);
  prompt.read_line().unwrap_or_default().trim().to_string()
}

fn confirm(prompt: &mut dyn Prompt, question: &str) -> bool {
  ask(prompt, question).eq_ignore_ascii_case("y")
}

fn describe(scheme: &SecurityScheme) -> String {
  match &scheme.scheme {
    Some(s) => format!("{} ({})", scheme.name, s),
    None => scheme.name.clone(),
  }
}

/// Walk the declared schemes. Quiet runs and JSON output only list them.
pub fn apply_security_schemes(
  doc: &SpecDocument,
  quiet: bool,
  json: bool,
  prompt: &mut dyn Prompt,
) -> Credentials {
  let schemes = doc.security_schemes();
  let mut out = Credentials::default();
  if schemes.is_empty() {
    return out;
  }
  if quiet || json {
    warn!(
      "{}the following authentication mechanisms are supported, supply them manually with -H if necessary",
      Emoji("🔐", "")
    );
    for scheme in &schemes {
      info!(
        "{}type: {}, scheme: {}",
        Emoji("🔐", ""),
        scheme.kind,
        scheme.scheme.as_deref().unwrap_or_default()
      );
    }
    return out;
  }
  info!("{}available authentication mechanisms:", Emoji("🔐", ""));
  for scheme in &schemes {
    prompt.write(&format!("    - {}\n", describe(scheme)));
    match (
      scheme.kind.as_str(),
      scheme.scheme.as_deref(),
      scheme.location.as_deref(),
    ) {
      ("http", Some("basic"), _) => {
        if confirm(prompt, "Basic Authentication is accepted. Supply a username and password? (y/N) ") {
          let user = ask(prompt, "Enter a username: ");
          let pass = ask(prompt, "Enter a password: ");
          let encoded = STANDARD.encode(format!("{}:{}", user, pass));
          info!("{}using {} as the Basic Auth value", Emoji("🔐", ""), encoded);
          out
            .headers
            .push((String::from("Authorization"), format!("Basic {}", encoded)));
        } else {
          warn!(
            "{}a basic authentication header is accepted, craft one manually with -H",
            Emoji("⚠️", "")
          );
        }
      }
      ("http", Some("bearer"), _) => {
        warn!(
          "{}a bearer token is accepted, craft a token manually with -H",
          Emoji("⚠️", "")
        );
      }
      ("apiKey", _, Some("query")) => {
        if confirm(prompt, "An API key can be provided via a parameter string. Apply one? (y/N) ") {
          let name = scheme.parameter.clone().unwrap_or_else(|| scheme.name.clone());
          let value = ask(prompt, &format!("What value would you like to use for the API key ({})? ", name));
          info!("{}using {}={} as the API key in all requests", Emoji("🔐", ""), name, value);
          out.api_key_query = Some((name, value));
        }
      }
      ("apiKey", _, Some("header")) if scheme.name == "bearer" => {
        if confirm(prompt, "A bearer token is accepted. Would you like to provide one? (y/N) ") {
          let token = ask(prompt, "What value would you like to use for the Bearer Token? ");
          out
            .headers
            .push((String::from("Authorization"), format!("Bearer {}", token)));
        } else {
          warn!(
            "{}a bearer token is accepted, craft a header manually with -H",
            Emoji("⚠️", "")
          );
        }
      }
      ("apiKey", _, Some("header")) => {
        let name = scheme.parameter.clone().unwrap_or_else(|| scheme.name.clone());
        let question = format!("An API key can be provided via the header {}. Apply one? (y/N) ", name);
        if confirm(prompt, &question) {
          let value = ask(prompt, &format!("What value would you like to use for the API key ({})? ", name));
          out.headers.push((name, value));
        }
      }
      _ => {}
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use engine::prompt::ScriptedPrompt;

  const SPEC: &str = r#"{"openapi":"3.0.0","paths":{},"components":{"securitySchemes":{
    "basicAuth":{"type":"http","scheme":"basic"},
    "jwt":{"type":"http","scheme":"bearer"},
    "queryKey":{"type":"apiKey","in":"query","name":"api_key"},
    "headerKey":{"type":"apiKey","in":"header","name":"X-API-Key"}
  }}}"#;

  fn doc() -> SpecDocument {
    SpecDocument::from_bytes(SPEC.as_bytes(), None).unwrap()
  }

  #[test]
  fn interactive_answers_become_credentials() {
    let mut prompt = ScriptedPrompt::new(["y", "admin", "secret", "y", "k1", "y", "k2"]);
    let creds = apply_security_schemes(&doc(), false, false, &mut prompt);
    assert_eq!(
      creds.headers,
      vec![
        (String::from("Authorization"), String::from("Basic YWRtaW46c2VjcmV0")),
        (String::from("X-API-Key"), String::from("k2")),
      ]
    );
    assert_eq!(creds.api_key_query, Some((String::from("api_key"), String::from("k1"))));
    assert_eq!(prompt.remaining(), 0);
    assert!(prompt.output.contains("- basicAuth (basic)"));
  }

  #[test]
  fn declining_applies_nothing() {
    let mut prompt = ScriptedPrompt::new(["n", "n", "n"]);
    assert_eq!(apply_security_schemes(&doc(), false, false, &mut prompt), Credentials::default());
  }

  #[test]
  fn quiet_and_json_only_list() {
    let mut prompt = ScriptedPrompt::new(["y"]);
    assert_eq!(apply_security_schemes(&doc(), true, false, &mut prompt), Credentials::default());
    assert_eq!(apply_security_schemes(&doc(), false, true, &mut prompt), Credentials::default());
    assert_eq!(prompt.remaining(), 1);
    assert!(prompt.output.is_empty());
  }

  #[test]
  fn v2_bearer_named_header_key() {
    let spec = r#"{"swagger":"2.0","paths":{},"securityDefinitions":{
      "bearer":{"type":"apiKey","in":"header","name":"Authorization"}}}"#;
    let doc = SpecDocument::from_bytes(spec.as_bytes(), None).unwrap();
    let mut prompt = ScriptedPrompt::new(["y", "tok"]);
    let creds = apply_security_schemes(&doc, false, false, &mut prompt);
    assert_eq!(
      creds.headers,
      vec![(String::from("Authorization"), String::from("Bearer tok"))]
    );
  }
}
