pub mod discovery;
pub mod error;
pub mod execute;
pub mod interactive;
pub mod prompt;
pub mod request;
pub mod safety;
pub mod spec;
pub mod workflow;

pub use slinger;
pub use workflow::{AuditRun, Workflow};
