//! Built-in commands.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{expect_args, expect_min_args, Command, CommandDescriptor, ExecutionContext, Registry};
use crate::bridge::HttpMethod;
use crate::client::ScriptOptions;
use crate::error::{PaletteError, PaletteResult};

static TABLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("table name pattern is valid"));

/// Register every built-in command.
pub fn register_builtins(registry: &mut Registry) -> PaletteResult<()> {
    let commands: Vec<Arc<dyn Command>> = vec![
        Arc::new(Impersonate::default()),
        Arc::new(Unimpersonate::default()),
        Arc::new(WhoAmI::default()),
        Arc::new(OpenUser::default()),
        Arc::new(OpenTable::default()),
        Arc::new(ListTables::default()),
        Arc::new(RetrieveUpdateSets::default()),
        Arc::new(Rest::default()),
        Arc::new(CountRecords::default()),
    ];
    for command in commands {
        registry.register(command)?;
    }
    Ok(())
}

pub struct Impersonate {
    descriptor: CommandDescriptor,
}

impl Default for Impersonate {
    fn default() -> Self {
        Self {
            descriptor: CommandDescriptor::new("impersonate", "Impersonate another user")
                .alias("imp")
                .usage("impersonate <username>")
                .example("impersonate abel.tuter"),
        }
    }
}

#[async_trait]
impl Command for Impersonate {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn validate(&self, args: &[String]) -> Result<(), String> {
        expect_args(args, 1, &self.descriptor.usage)
    }

    async fn execute(&self, args: &[String], ctx: &ExecutionContext) -> PaletteResult<()> {
        let username = &args[0];
        ctx.client.impersonate(username).await?;
        ctx.feedback
            .show_success(&format!("Now impersonating {}", username));
        ctx.navigator.reload()
    }
}

pub struct Unimpersonate {
    descriptor: CommandDescriptor,
}

impl Default for Unimpersonate {
    fn default() -> Self {
        Self {
            descriptor: CommandDescriptor::new("unimpersonate", "Return to your own user")
                .alias("unimp")
                .alias("endimp"),
        }
    }
}

#[async_trait]
impl Command for Unimpersonate {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn validate(&self, args: &[String]) -> Result<(), String> {
        expect_args(args, 0, &self.descriptor.usage)
    }

    async fn execute(&self, _args: &[String], ctx: &ExecutionContext) -> PaletteResult<()> {
        ctx.client.end_impersonation().await?;
        ctx.feedback.show_success("Impersonation ended");
        ctx.navigator.reload()
    }
}

pub struct WhoAmI {
    descriptor: CommandDescriptor,
}

impl Default for WhoAmI {
    fn default() -> Self {
        Self {
            descriptor: CommandDescriptor::new("whoami", "Show the current user"),
        }
    }
}

#[async_trait]
impl Command for WhoAmI {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _args: &[String], ctx: &ExecutionContext) -> PaletteResult<()> {
        let user = ctx.client.current_user().await?;
        let name = if user.username.is_empty() {
            "(unknown username)"
        } else {
            user.username.as_str()
        };
        ctx.feedback
            .show_info(&format!("Logged in as {} ({})", name, user.id));
        Ok(())
    }
}

pub struct OpenUser {
    descriptor: CommandDescriptor,
}

impl Default for OpenUser {
    fn default() -> Self {
        Self {
            descriptor: CommandDescriptor::new("user", "Open a user record")
                .usage("user <username>")
                .example("user admin"),
        }
    }
}

#[async_trait]
impl Command for OpenUser {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn validate(&self, args: &[String]) -> Result<(), String> {
        expect_args(args, 1, &self.descriptor.usage)
    }

    async fn execute(&self, args: &[String], ctx: &ExecutionContext) -> PaletteResult<()> {
        let username = &args[0];
        let record = ctx
            .client
            .lookup_user(username)
            .await?
            .ok_or_else(|| PaletteError::CommandFailed(format!("No user named {}", username)))?;

        let sys_id = record
            .get("sys_id")
            .and_then(Value::as_str)
            .ok_or_else(|| PaletteError::MalformedResponse("User record has no sys_id".to_string()))?;

        ctx.navigator
            .navigate(&ctx.navigator.record_url("sys_user", sys_id))
    }
}

pub struct OpenTable {
    descriptor: CommandDescriptor,
}

impl Default for OpenTable {
    fn default() -> Self {
        Self {
            descriptor: CommandDescriptor::new("table", "Open a table's list view")
                .alias("list")
                .alias("t")
                .usage("table <name>")
                .example("table incident")
                .example("t Incident Task"),
        }
    }
}

#[async_trait]
impl Command for OpenTable {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn validate(&self, args: &[String]) -> Result<(), String> {
        expect_min_args(args, 1, &self.descriptor.usage)
    }

    async fn execute(&self, args: &[String], ctx: &ExecutionContext) -> PaletteResult<()> {
        let table = ctx.tables.resolve_exact(&args.join(" ")).await;
        ctx.navigator.navigate(&ctx.navigator.table_list_url(&table))
    }
}

pub struct ListTables {
    descriptor: CommandDescriptor,
}

impl Default for ListTables {
    fn default() -> Self {
        Self {
            descriptor: CommandDescriptor::new("tables", "Search table names")
                .usage("tables <query>")
                .example("tables inc"),
        }
    }
}

#[async_trait]
impl Command for ListTables {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn validate(&self, args: &[String]) -> Result<(), String> {
        expect_min_args(args, 1, &self.descriptor.usage)
    }

    async fn execute(&self, args: &[String], ctx: &ExecutionContext) -> PaletteResult<()> {
        let query = args.join(" ");
        let matches = ctx.tables.lookup(&query).await;
        if matches.is_empty() {
            ctx.feedback
                .show_info(&format!("No tables match '{}'", query));
            return Ok(());
        }
        for item in matches {
            ctx.feedback
                .show_info(&format!("{} ({})", item.technical_id, item.display_name));
        }
        Ok(())
    }
}

pub struct RetrieveUpdateSets {
    descriptor: CommandDescriptor,
}

impl Default for RetrieveUpdateSets {
    fn default() -> Self {
        Self {
            descriptor: CommandDescriptor::new(
                "retrieve",
                "Retrieve update sets from a remote source",
            )
            .alias("pull")
            .usage("retrieve <source>")
            .example("retrieve Dev Instance"),
        }
    }
}

#[async_trait]
impl Command for RetrieveUpdateSets {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn validate(&self, args: &[String]) -> Result<(), String> {
        expect_min_args(args, 1, &self.descriptor.usage)
    }

    async fn execute(&self, args: &[String], ctx: &ExecutionContext) -> PaletteResult<()> {
        let source_id = ctx.sources.resolve_exact(&args.join(" ")).await;
        let retrieval = ctx.client.retrieve_remote_sources(&source_id).await?;
        ctx.feedback.show_success("Retrieval started");
        ctx.navigator
            .navigate(&ctx.navigator.tracker_url(&retrieval.tracker_id))
    }
}

pub struct Rest {
    descriptor: CommandDescriptor,
}

impl Default for Rest {
    fn default() -> Self {
        Self {
            descriptor: CommandDescriptor::new("rest", "Call a REST endpoint with your session")
                .usage("rest <METHOD> <path> [json body]")
                .example("rest GET /api/now/table/incident?sysparm_limit=1"),
        }
    }
}

#[async_trait]
impl Command for Rest {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn validate(&self, args: &[String]) -> Result<(), String> {
        expect_min_args(args, 2, &self.descriptor.usage)?;
        args[0].parse::<HttpMethod>().map(|_| ())
    }

    async fn execute(&self, args: &[String], ctx: &ExecutionContext) -> PaletteResult<()> {
        let method = args[0]
            .parse::<HttpMethod>()
            .map_err(PaletteError::InvalidArguments)?;
        let body = if args.len() > 2 {
            let raw = args[2..].join(" ");
            Some(serde_json::from_str::<Value>(&raw).map_err(|e| {
                PaletteError::InvalidArguments(format!("Body is not valid JSON: {}", e))
            })?)
        } else {
            None
        };

        let result = ctx
            .client
            .request(method, &args[1], body, HashMap::new())
            .await?;
        ctx.feedback.show_info(&serde_json::to_string_pretty(&result)?);
        Ok(())
    }
}

pub struct CountRecords {
    descriptor: CommandDescriptor,
}

impl Default for CountRecords {
    fn default() -> Self {
        Self {
            descriptor: CommandDescriptor::new("count", "Count the records in a table")
                .usage("count <table>")
                .example("count incident"),
        }
    }
}

/// Background script that prints the row count between the result markers.
fn count_script(table: &str) -> String {
    format!(
        "var ga = new GlideAggregate('{table}');\n\
         ga.addAggregate('COUNT');\n\
         ga.query();\n\
         var n = ga.next() ? parseInt(ga.getAggregate('COUNT'), 10) : 0;\n\
         gs.print('{start}');\n\
         gs.print(JSON.stringify({{table: '{table}', count: n}}));\n\
         gs.print('{end}');",
        table = table,
        start = crate::client::RESULTS_START,
        end = crate::client::RESULTS_END,
    )
}

#[async_trait]
impl Command for CountRecords {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn validate(&self, args: &[String]) -> Result<(), String> {
        expect_min_args(args, 1, &self.descriptor.usage)
    }

    async fn execute(&self, args: &[String], ctx: &ExecutionContext) -> PaletteResult<()> {
        let table = ctx.tables.resolve_exact(&args.join(" ")).await;
        // The name is spliced into script source.
        if !TABLE_NAME.is_match(&table) {
            return Err(PaletteError::InvalidArguments(format!(
                "'{}' is not a table name",
                table
            )));
        }

        let records = ctx
            .client
            .run_script_and_parse(&count_script(&table), &ScriptOptions::default())
            .await?;
        let count = records
            .iter()
            .filter_map(|record| record.as_json())
            .find_map(|value| value.get("count").and_then(Value::as_u64))
            .ok_or_else(|| PaletteError::MalformedResponse("Script printed no count".to_string()))?;

        ctx.feedback
            .show_info(&format!("{}: {} records", table, count));
        Ok(())
    }
}
