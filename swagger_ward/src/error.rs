use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
  #[error(transparent)]
  Engine(#[from] engine::error::Error),
  #[error(transparent)]
  IO(#[from] std::io::Error),
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  /// Fatal problem found before any request is sent.
  #[error("{0}")]
  Config(String),
}

pub(crate) fn new_config_error(msg: &str) -> Error {
  Error::Config(msg.to_string())
}
