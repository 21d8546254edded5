use console::Emoji;
use swagger_ward::SwaggerWard;
use swagger_ward::cli::{Profile, SwaggerWardConfig};
use swagger_ward::error::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &SwaggerWardConfig) {
  let fallback = if config.debug {
    Level::DEBUG
  } else if config.quiet {
    Level::WARN
  } else {
    Level::INFO
  };
  let filter = if config.debug {
    EnvFilter::new(fallback.as_str())
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback.as_str()))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_writer(std::io::stderr)
    .init();
}

fn start() -> Result<(), Error> {
  let mut config = SwaggerWardConfig::new();
  init_logging(&config);
  config.merge_profile(Profile::load(&config.config_dir)?);
  SwaggerWard::new(config)?.run()
}

fn main() {
  if let Err(err) = start() {
    eprintln!("{}{}", Emoji("💢", ""), err);
    std::process::exit(1);
  }
}
