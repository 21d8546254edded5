use crate::error::{Error, Result, new_config_error};
use argh::FromArgs;
use console::Emoji;
use engine::execute::{
  DEFAULT_USER_AGENT, Executor, ExecutorConfig, RateLimiter, SlingerTransport, client_builder,
};
use engine::slinger::Proxy;
use log::{debug, warn};
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
  #[default]
  Console,
  Json,
}

impl FromStr for OutputFormat {
  type Err = std::io::Error;
  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    let f = match s.to_lowercase().as_str() {
      "console" => OutputFormat::Console,
      "json" => OutputFormat::Json,
      _ => {
        return Err(std::io::Error::new(
          std::io::ErrorKind::InvalidInput,
          "invalid output format, only console and json are supported",
        ));
      }
    };
    Ok(f)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExternalTool {
  #[default]
  Curl,
  Sqlmap,
}

impl FromStr for ExternalTool {
  type Err = std::io::Error;
  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    let f = match s.to_lowercase().as_str() {
      "curl" => ExternalTool::Curl,
      "sqlmap" => ExternalTool::Sqlmap,
      _ => {
        return Err(std::io::Error::new(
          std::io::ErrorKind::InvalidInput,
          "external tool not supported, only curl and sqlmap are",
        ));
      }
    };
    Ok(f)
  }
}

/// How a loaded definition is decoded. YAML and JSON share one parser, `js`
/// pulls an object literal out of a script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpecFormat {
  #[default]
  Json,
  Yaml,
  Js,
}

impl FromStr for SpecFormat {
  type Err = std::io::Error;
  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    let f = match s.to_lowercase().as_str() {
      "json" => SpecFormat::Json,
      "yaml" | "yml" => SpecFormat::Yaml,
      "js" => SpecFormat::Js,
      _ => {
        return Err(std::io::Error::new(
          std::io::ErrorKind::InvalidInput,
          "invalid format, expected json, yaml, yml or js",
        ));
      }
    };
    Ok(f)
  }
}

impl Display for SpecFormat {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      SpecFormat::Json => f.write_str("json"),
      SpecFormat::Yaml => f.write_str("yaml"),
      SpecFormat::Js => f.write_str("js"),
    }
  }
}

#[derive(Debug, Clone, FromArgs)]
#[argh(description = "audit the endpoints documented by exposed swagger/openapi definitions")]
pub struct SwaggerWardConfig {
  /// set the user agent string
  #[argh(option, short = 'a', default = "default_ua()")]
  pub agent: String,
  /// base path when the definition declares none (ex:/v2/)
  #[argh(option, short = 'b')]
  pub base_path: Option<String>,
  /// definition format option[json,yaml,yml,js] default: json
  #[argh(option, short = 'f', default = "SpecFormat::default()")]
  pub format: SpecFormat,
  /// custom header "Name: Value", can be repeated
  #[argh(option, short = 'H')]
  pub headers: Vec<String>,
  /// ignore server certificate validation
  #[argh(switch, short = 'i')]
  pub insecure: bool,
  /// load the definition from a local file
  #[argh(option, short = 'l')]
  pub local_file: Option<PathBuf>,
  /// export to the file
  #[argh(option, short = 'o')]
  pub outfile: Option<PathBuf>,
  /// proxy to use for requests (ex:[http(s)|socks5(h)]://host:port)
  #[argh(option, short = 'p', from_str_fn(proxy))]
  pub proxy: Option<Proxy>,
  /// never prompt, use the default answer everywhere
  #[argh(switch, short = 'q')]
  pub quiet: bool,
  /// pick a random user agent for every request
  #[argh(switch, short = 'r')]
  pub randomize_user_agent: bool,
  /// word exempt from the dangerous keyword check, can be repeated
  #[argh(option, short = 's')]
  pub safe_word: Vec<String>,
  /// send requests here instead of the documented host
  #[argh(option, short = 'T')]
  pub target: Option<String>,
  /// set request timeout.
  #[argh(option, short = 't', default = "default_timeout()")]
  pub timeout: u64,
  /// load the definition from a URL
  #[argh(option, short = 'u')]
  pub url: Option<String>,
  /// requests per second, 0 disables the limit
  #[argh(option, default = "default_rate()")]
  pub rate: i64,
  /// force this content type on request bodies
  #[argh(option)]
  pub content_type: Option<String>,
  /// date literal used for synthesized dates (YYYY-MM-DD)
  #[argh(option, default = "default_date()")]
  pub date: String,
  /// debug mode
  #[argh(switch)]
  pub debug: bool,
  /// directory holding profile.yaml
  #[argh(option, default = "default_config()")]
  pub config_dir: PathBuf,
  #[argh(subcommand)]
  pub command: SubCommand,
}

#[derive(Debug, Clone, PartialEq, FromArgs)]
#[argh(subcommand)]
pub enum SubCommand {
  Automate(AutomateArgs),
  Brute(BruteArgs),
  Endpoints(EndpointsArgs),
  Prepare(PrepareArgs),
}

#[derive(Debug, Clone, PartialEq, FromArgs)]
/// send a request to every documented operation and report the status codes
#[argh(subcommand, name = "automate")]
pub struct AutomateArgs {
  /// output format option[console,json] default: console
  #[argh(option, short = 'F', default = "OutputFormat::default()")]
  pub output_format: OutputFormat,
  /// only report the endpoints answering 200
  #[argh(switch)]
  pub get_accessible_endpoints: bool,
  /// value used for synthesized strings
  #[argh(option, default = "default_test_string()")]
  pub test_string: String,
  /// show a preview of every response
  #[argh(switch, short = 'v')]
  pub verbose: bool,
  /// response preview length in verbose mode
  #[argh(option, default = "50")]
  pub response_preview_length: usize,
  /// edit and resend requests answered with an ambiguous status
  #[argh(switch)]
  pub enhanced: bool,
  /// retry attempts per endpoint in enhanced mode
  #[argh(option, default = "5")]
  pub max_retries: usize,
  /// newline-delimited list of targets for a bulk run
  #[argh(option)]
  pub url_file: Option<PathBuf>,
  /// brute force for a definition when the direct fetch fails
  #[argh(switch)]
  pub fallback_brute: bool,
}

#[derive(Debug, Clone, PartialEq, FromArgs)]
/// search the target for hidden definition files
#[argh(subcommand, name = "brute")]
pub struct BruteArgs {
  /// file of paths to try instead of the built-in list
  #[argh(option, short = 'w')]
  pub wordlist: Option<PathBuf>,
  /// keep searching after the first definition
  #[argh(switch, long = "continue")]
  pub continue_search: bool,
  /// stop after this many definitions (requires --continue)
  #[argh(option, default = "0")]
  pub max_found: usize,
  /// run automate against every definition as it is found
  #[argh(switch)]
  pub run_automate: bool,
  /// only print the discovered definition URLs
  #[argh(switch)]
  pub endpoint_only: bool,
}

#[derive(Debug, Clone, PartialEq, FromArgs)]
/// print the raw documented endpoints
#[argh(subcommand, name = "endpoints")]
pub struct EndpointsArgs {}

#[derive(Debug, Clone, PartialEq, FromArgs)]
/// print a command for manual testing of every operation
#[argh(subcommand, name = "prepare")]
pub struct PrepareArgs {
  /// external tool option[curl,sqlmap] default: curl
  #[argh(option, short = 'e', default = "ExternalTool::default()")]
  pub external_tool: ExternalTool,
}

/// `profile.yaml` in the config dir, appended to the command line values.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Profile {
  pub headers: Vec<String>,
  pub safe_words: Vec<String>,
}

impl Profile {
  pub fn load(config_dir: &Path) -> Result<Self> {
    let path = config_dir.join("profile.yaml");
    if !path.is_file() {
      return Ok(Self::default());
    }
    let text = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&text).map_err(|err| {
      Error::Config(format!("load profile {} err {}", path.to_string_lossy(), err))
    })
  }
}

pub fn default_config() -> PathBuf {
  if let Some(cp) = dirs::config_dir() {
    let swagger_ward = cp.join("swagger_ward");
    if !swagger_ward.is_dir() || !swagger_ward.exists() {
      std::fs::create_dir_all(&swagger_ward).unwrap_or_default();
    }
    swagger_ward
  } else {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
  }
}

fn proxy(value: &str) -> std::result::Result<Proxy, String> {
  Proxy::parse(value).map_err(|x| x.to_string())
}

fn default_ua() -> String {
  String::from(DEFAULT_USER_AGENT)
}

fn default_timeout() -> u64 {
  30
}

fn default_rate() -> i64 {
  15
}

fn default_date() -> String {
  String::from("2024-01-01")
}

fn default_test_string() -> String {
  String::from("bishopfox")
}

/// Accept only real calendar dates written as `YYYY-MM-DD`.
pub fn validate_date(date: &str) -> Result<()> {
  let invalid = || {
    new_config_error(&format!(
      "an invalid date was supplied ({}), use the YYYY-MM-DD format",
      date
    ))
  };
  let parts: Vec<&str> = date.split('-').collect();
  let [y, m, d] = parts.as_slice() else {
    return Err(invalid());
  };
  if y.len() != 4 || m.len() != 2 || d.len() != 2 {
    return Err(invalid());
  }
  let (Ok(year), Ok(month), Ok(day)) = (y.parse::<u32>(), m.parse::<u32>(), d.parse::<u32>()) else {
    return Err(invalid());
  };
  let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
  let days = match month {
    1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
    4 | 6 | 9 | 11 => 30,
    2 if leap => 29,
    2 => 28,
    _ => return Err(invalid()),
  };
  if day == 0 || day > days {
    return Err(invalid());
  }
  Ok(())
}

fn is_set(value: &Option<String>) -> bool {
  value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl SwaggerWardConfig {
  pub fn new() -> Self {
    let mut config: SwaggerWardConfig = argh::from_env();
    config.apply_outfile_format();
    config
  }

  /// An automate outfile named `*.json` switches the output to JSON.
  pub fn apply_outfile_format(&mut self) {
    let json_file = self
      .outfile
      .as_ref()
      .is_some_and(|p| p.to_string_lossy().to_lowercase().ends_with("json"));
    if let SubCommand::Automate(args) = &mut self.command {
      if json_file && args.output_format == OutputFormat::Console {
        debug!("{}outfile ends with json, switching to JSON output", Emoji("📝", ""));
        args.output_format = OutputFormat::Json;
      }
    }
  }

  pub fn merge_profile(&mut self, profile: Profile) {
    for header in profile.headers {
      if !self.headers.contains(&header) {
        self.headers.push(header);
      }
    }
    for word in profile.safe_words {
      if !self.safe_word.contains(&word) {
        self.safe_word.push(word);
      }
    }
  }

  pub fn json_output(&self) -> bool {
    matches!(&self.command, SubCommand::Automate(a) if a.output_format == OutputFormat::Json)
  }

  /// Flag combinations that cannot work together are rejected before any
  /// request is sent.
  pub fn validate(&self) -> Result<()> {
    validate_date(&self.date)?;
    if self.randomize_user_agent && self.agent != DEFAULT_USER_AGENT {
      warn!(
        "{}a supplied User-Agent was detected ({}) while randomizing the User-Agent",
        Emoji("⚠️", ""),
        self.agent
      );
    }
    if let Some(path) = &self.local_file {
      if !path.is_file() {
        return Err(new_config_error(&format!(
          "error opening file: {}",
          path.to_string_lossy()
        )));
      }
    }
    match &self.command {
      SubCommand::Automate(args) => self.validate_automate(args),
      SubCommand::Brute(args) => self.validate_brute(args),
      SubCommand::Endpoints(_) | SubCommand::Prepare(_) => {
        if !is_set(&self.url) && self.local_file.is_none() {
          return Err(new_config_error(
            "a definition is required: provide --url or --local-file",
          ));
        }
        Ok(())
      }
    }
  }

  fn validate_automate(&self, args: &AutomateArgs) -> Result<()> {
    if args.enhanced && self.quiet {
      return Err(new_config_error(
        "cannot use --enhanced with --quiet, enhanced mode requires interactive input",
      ));
    }
    if args.enhanced && args.max_retries < 1 {
      return Err(new_config_error(&format!(
        "--max-retries must be at least 1 in enhanced mode (got {})",
        args.max_retries
      )));
    }
    if is_set(&self.url) && args.url_file.is_some() {
      return Err(new_config_error("cannot use -u/--url with --url-file"));
    }
    if self.local_file.is_some() && args.url_file.is_some() {
      return Err(new_config_error("cannot use --local-file with --url-file"));
    }
    if args.fallback_brute && self.local_file.is_some() {
      return Err(new_config_error("cannot use --fallback-brute with --local-file"));
    }
    if !is_set(&self.url) && self.local_file.is_none() && args.url_file.is_none() {
      return Err(new_config_error(
        "a target is required: provide --url, --local-file, or --url-file",
      ));
    }
    Ok(())
  }

  fn validate_brute(&self, args: &BruteArgs) -> Result<()> {
    if !is_set(&self.url) {
      return Err(new_config_error("brute requires a target supplied with -u/--url"));
    }
    if args.max_found > 0 && !args.continue_search {
      return Err(new_config_error("--max-found requires --continue"));
    }
    if args.endpoint_only && args.run_automate {
      return Err(new_config_error("cannot use --endpoint-only with --run-automate"));
    }
    Ok(())
  }

  pub fn executor_config(&self) -> ExecutorConfig {
    ExecutorConfig {
      agent: self.agent.clone(),
      randomize_agent: self.randomize_user_agent,
      headers: self.headers.clone(),
      content_type: self.content_type.clone(),
      ..Default::default()
    }
  }

  pub fn executor(&self) -> Executor {
    let builder = client_builder(self.timeout, self.insecure, self.proxy.clone());
    Executor::new(
      Box::new(SlingerTransport::new(builder)),
      RateLimiter::new(self.rate),
      self.executor_config(),
    )
  }
}
