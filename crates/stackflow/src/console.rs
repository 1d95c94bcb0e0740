//! Terminal implementations of the engines' prompter and reporter

use colored::Colorize;
use stackflow_lifecycle::{LifecycleError, Prompter, Reporter};
use std::io::{BufRead, Write};

/// Asks on stdout, reads answers from stdin
pub struct ConsolePrompter;

impl ConsolePrompter {
    /// Print `prompt` and read one line; `None` on end of input
    fn ask(&self, prompt: &str) -> stackflow_lifecycle::Result<Option<String>> {
        print!("{}", prompt);
        std::io::stdout().flush()?;

        let mut line = String::new();
        let read = std::io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

impl Prompter for ConsolePrompter {
    fn confirm(&self, question: &str, default: bool) -> stackflow_lifecycle::Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        let answer = self.ask(&format!("{} {} ", question.bold(), hint))?;
        Ok(parse_yes_no(answer.as_deref(), default))
    }

    fn select(&self, question: &str, choices: &[String]) -> stackflow_lifecycle::Result<String> {
        if choices.is_empty() {
            return Err(LifecycleError::InvalidInput(format!(
                "nothing to choose for \"{}\"",
                question
            )));
        }

        println!("{}", question.bold());
        for (i, choice) in choices.iter().enumerate() {
            println!("  {} {}", format!("{})", i + 1).cyan(), choice);
        }

        let answer = self.ask(&format!("Enter a number (1-{}): ", choices.len()))?;
        let answer = answer.ok_or(LifecycleError::UserAborted)?;
        parse_choice(&answer, choices).ok_or_else(|| {
            LifecycleError::InvalidInput(format!(
                "{:?} is not a number between 1 and {}",
                answer,
                choices.len()
            ))
        })
    }
}

/// Anything but an explicit yes/no falls back to `default` only when empty
fn parse_yes_no(answer: Option<&str>, default: bool) -> bool {
    match answer.map(|a| a.to_ascii_lowercase()) {
        None => default,
        Some(a) if a.is_empty() => default,
        Some(a) => a == "y" || a == "yes",
    }
}

/// Accept a 1-based index or the exact text of a choice
fn parse_choice(answer: &str, choices: &[String]) -> Option<String> {
    if let Ok(index) = answer.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| choices.get(i))
            .cloned();
    }
    choices.iter().find(|c| c.as_str() == answer).cloned()
}

/// Progress on stdout, warnings on stderr
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn info(&self, message: &str) {
        println!("{}", message);
    }

    fn warn(&self, message: &str) {
        eprintln!("{} {}", "⚠".yellow(), message.yellow());
    }

    fn success(&self, message: &str) {
        println!("{} {}", "✓".green(), message.green());
    }
}
