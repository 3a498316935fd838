#[cfg(test)]
use std::collections::VecDeque;
use std::io::{self, Write};

use crate::error::ForwarderError;

/// Operator input channel used by login, credential and setup flows.
pub trait Prompt {
    /// Print `question` and return the trimmed answer.
    fn ask(&mut self, question: &str) -> Result<String, ForwarderError>;

    /// Ask a yes/no question; only `y`/`yes` count as yes.
    fn confirm(&mut self, question: &str) -> Result<bool, ForwarderError> {
        let answer = self.ask(question)?.to_ascii_lowercase();
        Ok(answer == "y" || answer == "yes")
    }

    /// Ask, falling back to `default` on an empty answer.
    fn ask_or(&mut self, question: &str, default: &str) -> Result<String, ForwarderError> {
        let answer = self.ask(question)?;
        if answer.is_empty() {
            Ok(default.to_owned())
        } else {
            Ok(answer)
        }
    }
}

/// Reads answers from stdin.
pub struct Terminal;

impl Prompt for Terminal {
    fn ask(&mut self, question: &str) -> Result<String, ForwarderError> {
        print!("{question}");
        io::stdout().flush()?;
        let mut buf = String::new();
        if io::stdin().read_line(&mut buf)? == 0 {
            return Err(ForwarderError::NonInteractive(question.trim().to_owned()));
        }
        Ok(buf.trim().to_owned())
    }
}

/// Refuses every question; used by the 24/7 runner.
pub struct Headless;

impl Prompt for Headless {
    fn ask(&mut self, question: &str) -> Result<String, ForwarderError> {
        Err(ForwarderError::NonInteractive(
            question.trim().trim_end_matches(':').to_owned(),
        ))
    }
}

/// Replays canned answers in order.
#[cfg(test)]
pub struct Scripted {
    answers: VecDeque<String>,
    pub asked: Vec<String>,
}

#[cfg(test)]
impl Scripted {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| a.to_string()).collect(),
            asked: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Prompt for Scripted {
    fn ask(&mut self, question: &str) -> Result<String, ForwarderError> {
        self.asked.push(question.to_owned());
        self.answers
            .pop_front()
            .ok_or_else(|| ForwarderError::NonInteractive(question.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_accepts_only_yes() {
        let mut prompt = Scripted::new(&["Y", "yes", "n", "", "sure"]);
        assert!(prompt.confirm("?").unwrap());
        assert!(prompt.confirm("?").unwrap());
        assert!(!prompt.confirm("?").unwrap());
        assert!(!prompt.confirm("?").unwrap());
        assert!(!prompt.confirm("?").unwrap());
    }

    #[test]
    fn test_ask_or_uses_default_on_blank() {
        let mut prompt = Scripted::new(&["", "@other"]);
        assert_eq!(prompt.ask_or("dest: ", "@INRDealsBot").unwrap(), "@INRDealsBot");
        assert_eq!(prompt.ask_or("dest: ", "@INRDealsBot").unwrap(), "@other");
    }

    #[test]
    fn test_headless_never_answers() {
        let err = Headless.ask("API ID: ").unwrap_err();
        assert!(matches!(err, ForwarderError::NonInteractive(q) if q == "API ID"));
    }
}
