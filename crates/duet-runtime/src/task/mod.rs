//! Built-in control-plane tasks.

mod passthrough;
mod script;

pub use passthrough::PassthroughTask;
pub use script::{ScriptOutput, ScriptTask};
