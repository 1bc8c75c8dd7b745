pub mod engine;
pub mod intent;
pub mod types;

pub use engine::{AgentCounters, AgentHealth, AgentStats, PersonalAgent};
pub use intent::{detect_intent, Intent};
pub use types::{AgentCapability, AgentContext, AgentEvent, AgentMessage, AgentResponse, AgentState};
