pub mod provider;
pub mod openrouter;
pub mod bedrock;
pub mod template;
pub mod fallback;
pub mod generator;

pub use provider::{LlmProvider, ProviderError, ProviderHandle};
pub use openrouter::OpenRouterProvider;
pub use bedrock::BedrockProvider;
pub use template::{PromptTemplate, DEFAULT_TEMPLATE};
pub use fallback::{fallback_narrative, no_history_narrative};
pub use generator::{ReportGenerator, ReportState};
