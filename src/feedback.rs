//! User-facing status messages.

use console::style;

/// Where commands report outcomes.
pub trait Feedback: Send + Sync {
    fn show_error(&self, message: &str);
    fn show_success(&self, message: &str);
    fn show_info(&self, message: &str);
}

/// Styled terminal output. Errors go to stderr.
#[derive(Debug, Default)]
pub struct ConsoleFeedback;

impl Feedback for ConsoleFeedback {
    fn show_error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red().bold(), message);
    }

    fn show_success(&self, message: &str) {
        println!("{} {}", style("✓").green().bold(), message);
    }

    fn show_info(&self, message: &str) {
        println!("{} {}", style("→").cyan(), message);
    }
}
