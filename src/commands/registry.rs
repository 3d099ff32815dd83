use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use super::{Command, ExecutionContext};
use crate::error::{PaletteError, PaletteResult};

/// Split an input line on runs of whitespace. No quoting: `"a b"` is two
/// tokens, quotes included.
pub fn split_line(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

/// Name- and alias-indexed table of commands.
#[derive(Default)]
pub struct Registry {
    commands: HashMap<String, Arc<dyn Command>>,
    aliases: HashMap<String, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command.
    ///
    /// Fails with [`PaletteError::InvalidDescriptor`] for a blank name, a
    /// name or alias containing whitespace, or a name or alias another
    /// command already answers to. A failed registration changes nothing.
    pub fn register(&mut self, command: Arc<dyn Command>) -> PaletteResult<()> {
        let descriptor = command.descriptor();
        let name = descriptor.name.trim().to_lowercase();

        if name.is_empty() {
            return Err(PaletteError::InvalidDescriptor(
                "command name is required".to_string(),
            ));
        }

        let mut seen: Vec<String> = Vec::new();
        for candidate in descriptor.names() {
            if candidate.is_empty() || candidate.chars().any(char::is_whitespace) {
                return Err(PaletteError::InvalidDescriptor(format!(
                    "'{}' is not a valid command name",
                    candidate
                )));
            }
            if seen.contains(&candidate) {
                return Err(PaletteError::InvalidDescriptor(format!(
                    "'{}' is listed twice for '{}'",
                    candidate, name
                )));
            }
            if let Some(owner) = self.owner_of(&candidate) {
                return Err(PaletteError::InvalidDescriptor(format!(
                    "'{}' is already used by '{}'",
                    candidate, owner
                )));
            }
            seen.push(candidate);
        }

        for alias in seen.iter().skip(1) {
            self.aliases.insert(alias.clone(), name.clone());
        }
        tracing::debug!(command = name.as_str(), "registered command");
        self.commands.insert(name, command);
        Ok(())
    }

    fn owner_of<'a>(&'a self, token: &'a str) -> Option<&'a str> {
        if self.commands.contains_key(token) {
            return Some(token);
        }
        self.aliases.get(token).map(String::as_str)
    }

    /// Case-insensitive lookup by name, then alias.
    pub fn resolve(&self, token: &str) -> Option<Arc<dyn Command>> {
        let token = token.to_lowercase();
        self.commands
            .get(&token)
            .or_else(|| {
                self.aliases
                    .get(&token)
                    .and_then(|name| self.commands.get(name))
            })
            .cloned()
    }

    /// Snapshot of every command, sorted by name.
    pub fn all(&self) -> Vec<Arc<dyn Command>> {
        let mut names: Vec<&String> = self.commands.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.commands.get(name).cloned())
            .collect()
    }

    /// Commands with a name or alias starting with `prefix`, each once,
    /// sorted by name.
    pub fn find_by_prefix(&self, prefix: &str) -> Vec<Arc<dyn Command>> {
        let prefix = prefix.to_lowercase();
        self.all()
            .into_iter()
            .filter(|command| command.descriptor().names().any(|n| n.starts_with(&prefix)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Run one input line.
    ///
    /// Every failure is reported through the context's feedback and also
    /// returned. A panicking command is reported as a failure too.
    pub async fn dispatch(&self, line: &str, ctx: &ExecutionContext) -> PaletteResult<()> {
        let result = self.dispatch_inner(line, ctx).await;
        if let Err(e) = &result {
            ctx.feedback.show_error(&e.to_string());
        }
        result
    }

    async fn dispatch_inner(&self, line: &str, ctx: &ExecutionContext) -> PaletteResult<()> {
        let mut tokens = split_line(line);
        if tokens.is_empty() {
            return Ok(());
        }
        let token = tokens.remove(0);
        let args = tokens;

        let command = self
            .resolve(&token)
            .ok_or_else(|| PaletteError::UnknownCommand(token.clone()))?;
        let name = command.descriptor().name.clone();

        command
            .validate(&args)
            .map_err(PaletteError::InvalidArguments)?;

        tracing::debug!(command = name.as_str(), args = args.len(), "dispatching");
        match AssertUnwindSafe(command.execute(&args, ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(command = name.as_str(), "command panicked");
                Err(PaletteError::CommandFailed(format!(
                    "Command '{}' failed unexpectedly",
                    name
                )))
            }
        }
    }
}
