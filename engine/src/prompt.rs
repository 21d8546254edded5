//! Operator prompt port.
use console::Term;
use std::collections::VecDeque;

/// Line-oriented operator I/O used by the safety gate and the interactive
/// mutator.
pub trait Prompt {
  /// `None` on end of input or a read failure.
  fn read_line(&mut self) -> Option<String>;
  fn write(&mut self, text: &str);
}

pub struct ConsolePrompt {
  term: Term,
}

impl Default for ConsolePrompt {
  fn default() -> Self {
    Self {
      term: Term::stdout(),
    }
  }
}

impl Prompt for ConsolePrompt {
  fn read_line(&mut self) -> Option<String> {
    self.term.read_line().ok()
  }
  fn write(&mut self, text: &str) {
    self.term.write_str(text).unwrap_or_default();
  }
}

/// Replays canned answers and records everything written.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
  inputs: VecDeque<String>,
  pub output: String,
}

impl ScriptedPrompt {
  pub fn new<I, S>(inputs: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      inputs: inputs.into_iter().map(Into::into).collect(),
      output: String::new(),
    }
  }

  pub fn remaining(&self) -> usize {
    self.inputs.len()
  }
}

impl Prompt for ScriptedPrompt {
  fn read_line(&mut self) -> Option<String> {
    self.inputs.pop_front()
  }
  fn write(&mut self, text: &str) {
    self.output.push_str(text);
  }
}
