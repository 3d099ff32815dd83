//! Command-line front-end.
//!
//! `palette <command...>` runs one command and exits; plain `palette`
//! starts an interactive prompt.

mod repl;

use std::path::PathBuf;

use clap::Parser;

use crate::app::{App, AppServices};
use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "palette")]
#[command(about = "Command palette for an instance you are logged in to", long_about = None)]
pub struct Cli {
    /// Instance URL (overrides the config file)
    #[arg(long, value_name = "URL")]
    pub instance: Option<String>,

    /// Session token (overrides the config file)
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Config file to use instead of the default
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Command to run once; starts an interactive prompt when omitted
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Cli {
    /// Config file plus command-line overrides.
    pub fn load_config(&self) -> Config {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path),
            None => Config::load(),
        };

        if let Some(instance) = &self.instance {
            config.instance.url = instance.trim().trim_end_matches('/').to_string();
        }
        if let Some(token) = &self.token {
            config.instance.session_token = Some(token.clone());
        }
        config
    }
}

/// Run the front-end. Returns whether everything succeeded.
pub async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = cli.load_config();
    let services = AppServices::from_config(&config)?;
    let app = App::new(config, services)?;

    if cli.command.is_empty() {
        repl::run(&app).await?;
        return Ok(true);
    }

    // Failures have already been reported through the app's feedback.
    Ok(app.dispatch(&cli.command.join(" ")).await.is_ok())
}
