//! Prompt context rendering

use serde::{Deserialize, Serialize};

use crate::types::RetrievedPassage;

pub const DEFAULT_HEADER: &str = "Answer the question based on the following information:";
pub const DEFAULT_QUESTION_LABEL: &str = "Question:";
pub const DEFAULT_ANSWER_LABEL: &str = "Answer:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTemplate {
    pub header: String,
    pub question_label: String,
    pub answer_label: String,
}

impl Default for ContextTemplate {
    fn default() -> Self {
        Self {
            header: DEFAULT_HEADER.to_string(),
            question_label: DEFAULT_QUESTION_LABEL.to_string(),
            answer_label: DEFAULT_ANSWER_LABEL.to_string(),
        }
    }
}

/// Renders passages into a context block and the final prompt
///
/// Output is a pure function of the input: header line, then one passage per
/// line in the order given. Line breaks inside a passage become spaces so each
/// passage stays on its own line.
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    template: ContextTemplate,
}

impl ContextAssembler {
    pub fn new(template: ContextTemplate) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &ContextTemplate {
        &self.template
    }

    pub fn assemble(&self, passages: &[RetrievedPassage]) -> String {
        let mut context = String::from(&self.template.header);
        context.push('\n');
        for passage in passages {
            context.push_str(&single_line(&passage.text));
            context.push('\n');
        }
        context
    }

    pub fn prompt(&self, context: &str, query: &str) -> String {
        format!(
            "{}\n{} {}\n{}",
            context, self.template.question_label, query, self.template.answer_label
        )
    }
}

fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
