use std::io::Write;

use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::app::App;

/// What a prompt line asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Nothing,
    Quit,
    Help,
    Complete(&'a str),
    Command(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    let line = line.trim();
    match line {
        "" => Input::Nothing,
        "quit" | "exit" | ":q" => Input::Quit,
        "help" => Input::Help,
        _ => match line.strip_prefix('?') {
            Some(prefix) => Input::Complete(prefix.trim()),
            None => Input::Command(line),
        },
    }
}

fn prompt() {
    print!("{} ", style("palette>").cyan().bold());
    let _ = std::io::stdout().flush();
}

/// Read commands from stdin until EOF or `quit`.
pub async fn run(app: &App) -> anyhow::Result<()> {
    println!(
        "{}",
        style(format!(
            "Connected to {}. Type 'help' for commands, '?prefix' to complete.",
            app.page().hostname()
        ))
        .dim()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    while let Some(line) = lines.next_line().await? {
        match classify(&line) {
            Input::Nothing => {}
            Input::Quit => break,
            Input::Help => print!("{}", app.help_text()),
            Input::Complete(prefix) => println!("{}", app.completions(prefix).join("  ")),
            Input::Command(command) => {
                // Errors are shown by the dispatcher.
                let _ = app.dispatch(command).await;
            }
        }
        prompt();
    }
    Ok(())
}
