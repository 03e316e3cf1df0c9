//! Out-of-process handler: runs a program per stage attempt.
//!
//! The program receives the stage document (configuration, dependency
//! inputs, trigger data) as JSON in its last argument and must print a JSON
//! value on stdout. A non-zero exit fails the attempt.

use super::{StageContext, StageHandler};
use crate::core::StageKind;
use crate::pipeline::Configuration;
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Runs an external program for each attempt.
///
/// The stage configuration may set `program` (overriding the handler's
/// default) and `args`, an array of strings placed before the JSON document.
#[derive(Debug, Clone, Default)]
pub struct ScriptHandler {
    program: Option<String>,
    base_args: Vec<String>,
}

impl ScriptHandler {
    /// Creates a handler that takes the program from stage configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default program, e.g. an interpreter.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Adds an argument passed before any stage arguments.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.base_args.push(arg.into());
        self
    }

    fn command(&self, configuration: &Configuration) -> anyhow::Result<(String, Vec<String>)> {
        let program = match configuration.get("program") {
            Some(value) => value
                .as_str()
                .ok_or_else(|| anyhow!("'program' must be a string"))?
                .to_string(),
            None => self
                .program
                .clone()
                .ok_or_else(|| anyhow!("no 'program' configured for script stage"))?,
        };

        let mut args = self.base_args.clone();
        if let Some(value) = configuration.get("args") {
            let list = value
                .as_array()
                .ok_or_else(|| anyhow!("'args' must be an array of strings"))?;
            for arg in list {
                let arg = arg
                    .as_str()
                    .ok_or_else(|| anyhow!("'args' must be an array of strings"))?;
                args.push(arg.to_string());
            }
        }
        Ok((program, args))
    }
}

#[async_trait]
impl StageHandler for ScriptHandler {
    async fn handle(
        &self,
        kind: StageKind,
        configuration: &Configuration,
        ctx: &StageContext,
    ) -> anyhow::Result<serde_json::Value> {
        let (program, args) = self.command(configuration)?;
        let document = serde_json::to_string(&ctx.to_document(configuration))?;

        debug!(stage_id = %ctx.stage_id, %kind, program = %program, "Running script stage");

        let output = Command::new(&program)
            .args(&args)
            .arg(document)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to start '{program}'"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("'{program}' exited with {}: {}", output.status, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(stdout)
            .with_context(|| format!("'{program}' did not print valid JSON"))
    }
}
