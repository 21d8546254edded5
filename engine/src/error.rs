//! engine error
use std::io::ErrorKind;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
  #[error(transparent)]
  IO(#[from] std::io::Error),
  #[error(transparent)]
  Http(slinger::Error),
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error(transparent)]
  Yaml(#[from] serde_yaml::Error),
  #[error(transparent)]
  Url(#[from] url::ParseError),
  #[error("parse definition: {0}")]
  Spec(String),
  #[error("no definition file found for {0}")]
  NoSpecFound(String),
  #[error("invalid target: {0}")]
  InvalidTarget(String),
}

impl From<slinger::Error> for Error {
  fn from(value: slinger::Error) -> Self {
    Error::Http(value)
  }
}

impl From<slinger::http::header::InvalidHeaderValue> for Error {
  fn from(value: slinger::http::header::InvalidHeaderValue) -> Self {
    Error::Http(slinger::Error::from(value))
  }
}

pub(crate) fn new_spec_error<T: std::fmt::Display>(msg: T) -> Error {
  Error::Spec(msg.to_string())
}

pub(crate) fn new_io_error(msg: &str) -> Error {
  Error::IO(std::io::Error::new(ErrorKind::InvalidInput, msg))
}
