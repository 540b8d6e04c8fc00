//! Operator confirmation
//!
//! Operations that fire events show what they are about to do and go on
//! only when the operator types exactly `yes`.

/// The only answer accepted as a confirmation
pub const AFFIRMATIVE: &str = "yes";

/// Asks the operator a question
pub trait Prompt: Send + Sync {
    /// The operator's answer, `None` when no answer could be read
    fn ask(&self, question: &str) -> Option<String>;

    /// Whether the answer to `question` is exactly `yes`
    fn confirm(&self, question: &str) -> bool {
        self.ask(question)
            .is_some_and(|answer| answer.trim() == AFFIRMATIVE)
    }
}

/// Reads the answer from the terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn ask(&self, question: &str) -> Option<String> {
        eprintln!("{question}");
        dialoguer::Input::<String>::new()
            .with_prompt(format!("Type '{AFFIRMATIVE}' to continue"))
            .allow_empty(true)
            .interact_text()
            .ok()
    }
}

/// Always answers the same thing
#[derive(Debug, Clone)]
pub struct FixedAnswer(pub String);

impl FixedAnswer {
    pub fn yes() -> Self {
        Self(AFFIRMATIVE.to_string())
    }

    pub fn no() -> Self {
        Self("no".to_string())
    }
}

impl Prompt for FixedAnswer {
    fn ask(&self, question: &str) -> Option<String> {
        tracing::debug!(question = %question, answer = %self.0, "Answered without asking");
        Some(self.0.clone())
    }
}
