mod agent;
mod cli;
mod output;
mod process;

pub use agent::{Agent, AgentError, AgentType, Invocation};
pub use cli::CliAgent;
pub use output::AgentOutput;

/// Create an agent by type
pub fn create_agent(agent_type: AgentType) -> Box<dyn Agent> {
    Box::new(CliAgent::new(agent_type))
}
