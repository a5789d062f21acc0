mod chat;
mod qa;
mod template;

pub use chat::{ChatPromptTemplate, MessagePromptTemplate};
pub use qa::{qa_prompt, QA_PROMPT_TEMPLATE};
pub use template::PromptTemplate;
