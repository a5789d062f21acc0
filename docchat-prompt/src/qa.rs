use crate::{ChatPromptTemplate, MessagePromptTemplate};

/// Question-answering prompt; `{{context}}` receives the retrieved passages.
pub const QA_PROMPT_TEMPLATE: &str = "Use the following pieces of information to answer the user's question.
If you don't know the answer, just say that you don't know, don't try to make up an answer.

Context: {{context}}
Question: {{question}}

Only return the helpful answer below and nothing else.
Helpful answer:
";

pub fn qa_prompt() -> ChatPromptTemplate {
    ChatPromptTemplate::new(vec![MessagePromptTemplate::human(QA_PROMPT_TEMPLATE)])
}
