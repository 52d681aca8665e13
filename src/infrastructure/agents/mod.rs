//! Agent process backends: the Claude Code CLI adapter and a
//! scriptable mock for tests.

pub mod claude_code;
pub mod mock;

pub use claude_code::{ClaudeCodeAgent, ClaudeCodeConfig};
pub use mock::{MockAgent, MockBehavior};
