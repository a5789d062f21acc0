use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use docchat_core::{DocchatError, Value};

fn placeholder_pattern() -> Result<&'static Regex, DocchatError> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}"))
        .as_ref()
        .map_err(|e| DocchatError::InvalidConfig(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: String) -> Self {
        Self { template }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Names of the `{{var}}` placeholders, sorted and deduplicated.
    pub fn variables(&self) -> Result<BTreeSet<String>, DocchatError> {
        let pattern = placeholder_pattern()?;
        Ok(pattern
            .captures_iter(&self.template)
            .map(|caps| caps[1].to_string())
            .collect())
    }

    pub fn render(&self, vars: &HashMap<String, Value>) -> Result<String, DocchatError> {
        let pattern = placeholder_pattern()?;
        let rendered = pattern.replace_all(&self.template, |caps: &regex::Captures| {
            let key = &caps[1];
            match vars.get(key) {
                Some(value) => value
                    .as_str()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| value.to_string()),
                None => "".to_string(),
            }
        });
        Ok(rendered.to_string())
    }
}
