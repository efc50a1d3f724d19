//! Content rendering using `{{variable}}` syntax.
//!
//! Step content arrives pre-drafted (the generative producer is an external
//! collaborator); the engine only substitutes variable bindings at dispatch
//! time. Journey data-bag values override the step's static bindings.

use std::collections::HashMap;

use crate::types::{SequenceStep, StepContent};

/// Subject and body with all placeholders substituted.
#[derive(Debug, Clone)]
pub struct RenderedContent {
    pub subject: String,
    pub body: String,
}

/// Merge step bindings with string values from the journey data bag
/// (data bag wins) and substitute into the step's content.
pub fn render_step(
    step: &SequenceStep,
    data: &serde_json::Map<String, serde_json::Value>,
) -> RenderedContent {
    let mut variables = step.variables.clone();
    for (key, value) in data {
        if let Some(text) = value.as_str() {
            variables.insert(key.clone(), text.to_string());
        }
    }
    render_content(&step.content, &variables)
}

pub fn render_content(
    content: &StepContent,
    variables: &HashMap<String, String>,
) -> RenderedContent {
    RenderedContent {
        subject: substitute(&content.subject, variables),
        body: substitute(&content.body, variables),
    }
}

fn substitute(template_str: &str, variables: &HashMap<String, String>) -> String {
    let mut result = template_str.to_string();
    for (name, value) in variables {
        let placeholder = format!("{{{{{name}}}}}");
        result = result.replace(&placeholder, value);
    }
    result
}
