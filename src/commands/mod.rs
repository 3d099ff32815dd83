//! Commands: the trait every command implements, its descriptor, and the
//! registry that dispatches input lines.

pub mod builtin;
pub mod context;
mod registry;

use async_trait::async_trait;

use crate::error::PaletteResult;
pub use context::ExecutionContext;
pub use registry::{split_line, Registry};

/// Static description of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Unique, case-insensitive.
    pub name: String,
    /// Alternate case-insensitive names.
    pub aliases: Vec<String>,
    /// One-line description shown in help.
    pub description: String,
    /// Usage pattern, e.g. `impersonate <username>`.
    pub usage: String,
    pub examples: Vec<String>,
}

impl CommandDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            usage: name.to_string(),
            ..Self::default()
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn usage(mut self, usage: &str) -> Self {
        self.usage = usage.to_string();
        self
    }

    pub fn example(mut self, example: &str) -> Self {
        self.examples.push(example.to_string());
        self
    }

    /// Every name this command answers to, lowercased.
    pub fn names(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(&self.name)
            .chain(self.aliases.iter())
            .map(|n| n.to_lowercase())
    }
}

/// A palette command.
#[async_trait]
pub trait Command: Send + Sync {
    fn descriptor(&self) -> &CommandDescriptor;

    /// Check arguments before running; the error text is shown verbatim.
    fn validate(&self, _args: &[String]) -> Result<(), String> {
        Ok(())
    }

    async fn execute(&self, args: &[String], ctx: &ExecutionContext) -> PaletteResult<()>;
}

/// Validation helper: exactly `count` arguments.
pub fn expect_args(args: &[String], count: usize, usage: &str) -> Result<(), String> {
    if args.len() == count {
        Ok(())
    } else {
        Err(format!("Usage: {}", usage))
    }
}

/// Validation helper: at least `count` arguments.
pub fn expect_min_args(args: &[String], count: usize, usage: &str) -> Result<(), String> {
    if args.len() >= count {
        Ok(())
    } else {
        Err(format!("Usage: {}", usage))
    }
}
