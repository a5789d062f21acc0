use std::collections::{BTreeSet, HashMap};

use crate::PromptTemplate;
use docchat_core::{DocchatError, Message, Role, Value};

#[derive(Debug, Clone)]
pub enum MessagePromptTemplate {
    Human(PromptTemplate),
    System(PromptTemplate),
}

impl MessagePromptTemplate {
    pub fn human(template: &str) -> Self {
        Self::Human(PromptTemplate::new(template.to_string()))
    }

    pub fn system(template: &str) -> Self {
        Self::System(PromptTemplate::new(template.to_string()))
    }

    fn template(&self) -> &PromptTemplate {
        match self {
            MessagePromptTemplate::Human(t) | MessagePromptTemplate::System(t) => t,
        }
    }

    pub fn format(&self, vars: &HashMap<String, Value>) -> Result<Message, DocchatError> {
        let role = match self {
            MessagePromptTemplate::Human(_) => Role::User,
            MessagePromptTemplate::System(_) => Role::System,
        };
        Ok(Message {
            role,
            content: self.template().render(vars)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChatPromptTemplate {
    messages: Vec<MessagePromptTemplate>,
}

impl ChatPromptTemplate {
    pub fn new(messages: Vec<MessagePromptTemplate>) -> Self {
        Self { messages }
    }

    pub fn variables(&self) -> Result<BTreeSet<String>, DocchatError> {
        let mut vars = BTreeSet::new();
        for tmpl in &self.messages {
            vars.extend(tmpl.template().variables()?);
        }
        Ok(vars)
    }

    pub fn format_messages(
        &self,
        vars: &HashMap<String, Value>,
    ) -> Result<Vec<Message>, DocchatError> {
        self.messages.iter().map(|tmpl| tmpl.format(vars)).collect()
    }
}
