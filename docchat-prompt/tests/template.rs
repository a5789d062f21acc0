use std::collections::HashMap;

use docchat_core::Value;
use docchat_prompt::PromptTemplate;

#[test]
fn renders_template_with_vars() {
    let tmpl = PromptTemplate::new("Hello {{name}}".to_string());
    let mut vars = HashMap::new();
    vars.insert("name".to_string(), Value::from("Docchat"));
    let rendered = tmpl.render(&vars).expect("render");
    assert_eq!(rendered, "Hello Docchat");
}

#[test]
fn does_not_confuse_overlapping_keys() {
    let tmpl = PromptTemplate::new("{{name}} {{fullname}}".to_string());
    let mut vars = HashMap::new();
    vars.insert("name".to_string(), Value::from("X"));
    vars.insert("fullname".to_string(), Value::from("Y"));
    let rendered = tmpl.render(&vars).expect("render");
    assert_eq!(rendered, "X Y");
}

#[test]
fn missing_vars_render_empty() {
    let tmpl = PromptTemplate::new("Context: {{ context }}.".to_string());
    let rendered = tmpl.render(&HashMap::new()).expect("render");
    assert_eq!(rendered, "Context: .");
}

#[test]
fn lists_placeholder_variables() {
    let tmpl = PromptTemplate::new("{{question}} {{context}} {{ question }}".to_string());
    let vars: Vec<String> = tmpl.variables().expect("variables").into_iter().collect();
    assert_eq!(vars, vec!["context".to_string(), "question".to_string()]);
}
