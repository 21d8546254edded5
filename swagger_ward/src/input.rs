use crate::cli::SpecFormat;
use crate::error::{Result, new_config_error};
use console::Emoji;
use engine::discovery::js::extract_embedded_spec;
use engine::discovery::normalize_target_input;
use engine::error::Error as EngineError;
use engine::execute::Executor;
use engine::spec::{SpecDocument, validate_spec_response};
use log::debug;
use std::fs::File;
use std::io::BufRead;
use std::path::{Path, PathBuf};

fn read_lines<P>(filename: P) -> std::io::Result<std::io::Lines<std::io::BufReader<File>>>
where
  P: AsRef<Path>,
{
  let file = File::open(filename)?;
  Ok(std::io::BufReader::new(file).lines())
}

/// Targets of a bulk run, normalized, plus the lines that could not be.
/// Blank and `#` lines are skipped silently.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UrlFile {
  pub targets: Vec<String>,
  pub invalid: Vec<String>,
}

pub fn read_url_file(file_path: &Path) -> Result<UrlFile> {
  let mut out = UrlFile::default();
  for line in read_lines(file_path)? {
    let line = line?;
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }
    match normalize_target_input(line) {
      Ok(url) => out.targets.push(url.to_string()),
      Err(_) => out.invalid.push(line.to_string()),
    }
  }
  Ok(out)
}

/// A definition ready for a run and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedSpec {
  pub source: String,
  pub spec: SpecDocument,
}

fn base_dir_of(path: &Path) -> Option<PathBuf> {
  path
    .canonicalize()
    .ok()
    .and_then(|p| p.parent().map(Path::to_path_buf))
}

/// Decode bytes in the requested format.
pub fn decode_spec(bytes: &[u8], format: SpecFormat, base_dir: Option<PathBuf>) -> Result<SpecDocument> {
  match format {
    SpecFormat::Js => {
      let text = String::from_utf8_lossy(bytes);
      let (spec, _) = extract_embedded_spec(&text).ok_or_else(|| {
        EngineError::Spec(String::from("no definition object found in the JavaScript file"))
      })?;
      Ok(SpecDocument::from_value(spec.root().clone(), base_dir)?)
    }
    SpecFormat::Json | SpecFormat::Yaml => Ok(SpecDocument::from_bytes(bytes, base_dir)?),
  }
}

pub fn load_local_spec(path: &Path, format: SpecFormat) -> Result<LoadedSpec> {
  let bytes = std::fs::read(path).map_err(|err| {
    new_config_error(&format!("error opening file {}: {}", path.to_string_lossy(), err))
  })?;
  let spec = decode_spec(&bytes, format, base_dir_of(path))?;
  Ok(LoadedSpec {
    source: path.to_string_lossy().to_string(),
    spec,
  })
}

/// Fetch a definition straight from `url`. Anything but a 200 carrying a
/// definition with paths is [`EngineError::NoSpecFound`].
pub fn fetch_spec(executor: &Executor, url: &str, format: SpecFormat) -> Result<LoadedSpec> {
  let outcome = executor.get(url);
  let spec = if outcome.status != 200 {
    debug!("{}{} answered {}", Emoji("🔍", ""), url, outcome.status);
    None
  } else {
    match format {
      SpecFormat::Js => decode_spec(&outcome.body, format, None).ok(),
      SpecFormat::Json | SpecFormat::Yaml => validate_spec_response(&outcome.body),
    }
  };
  match spec {
    Some(spec) => Ok(LoadedSpec {
      source: url.to_string(),
      spec,
    }),
    None => Err(EngineError::NoSpecFound(url.to_string()).into()),
  }
}
