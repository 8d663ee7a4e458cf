//! Agent command construction.
//!
//! Agents are launched directly, never through a shell. The ticket summary
//! travels as one trailing argument after sanitizing.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::{AgentProfile, ScalerError};
use crate::ticket::Ticket;

pub const WORKER_ID_ENV: &str = "SPAWNPOOL_WORKER_ID";
pub const TICKET_HINT_ENV: &str = "SPAWNPOOL_TICKET_HINT";
pub const SERVER_URL_ENV: &str = "SPAWNPOOL_SERVER_URL";

static LINE_BREAKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\n|[\r\n]").expect("valid regex"));
static QUOTES: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["'`]"#).expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Reduce free text to a single line safe to pass as one argument.
///
/// Line breaks (including the two-character `\n` escape) become spaces,
/// quote characters are removed, whitespace runs collapse, and the result
/// is cut to `max_chars` characters.
pub fn sanitize_summary(text: &str, max_chars: usize) -> String {
    let text = LINE_BREAKS.replace_all(text, " ");
    let text = QUOTES.replace_all(&text, "");
    let text = WHITESPACE.replace_all(&text, " ");
    text.trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(max_chars)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// A program and its arguments, validated before launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
}

impl AgentCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Command for a worker that will take over `ticket`.
    pub fn for_ticket(
        profile: &AgentProfile,
        worker_id: &str,
        ticket: &Ticket,
        server_url: Option<&str>,
        summary_max_chars: usize,
    ) -> Result<Self, ScalerError> {
        let summary = sanitize_summary(
            &format!("{} {}: {}", ticket.display_id(), ticket.title, ticket.summary),
            summary_max_chars,
        );

        let mut command = AgentCommand::new(profile.program.clone())
            .args(profile.args.iter().cloned())
            .arg(summary);

        for (key, value) in &profile.env {
            command = command.env(key.clone(), value.clone());
        }
        command = command
            .env(WORKER_ID_ENV, worker_id)
            .env(TICKET_HINT_ENV, ticket.display_id());
        if let Some(url) = server_url {
            command = command.env(SERVER_URL_ENV, url);
        }
        if let Some(dir) = &profile.working_dir {
            command = command.current_dir(dir.clone());
        }

        command.validate()?;
        Ok(command)
    }

    /// Reject commands that cannot be passed to exec verbatim.
    pub fn validate(&self) -> Result<(), ScalerError> {
        if self.program.trim().is_empty() {
            return Err(ScalerError::InvalidCommand("empty program".to_string()));
        }
        if self.program.contains('\0') {
            return Err(ScalerError::InvalidCommand(
                "program contains NUL".to_string(),
            ));
        }
        if let Some((idx, _)) = self
            .args
            .iter()
            .enumerate()
            .find(|(_, arg)| arg.chars().any(|c| c.is_control()))
        {
            return Err(ScalerError::InvalidCommand(format!(
                "argument {} contains control characters",
                idx
            )));
        }
        if let Some((key, _)) = self
            .env
            .iter()
            .find(|(k, v)| k.is_empty() || k.contains(['=', '\0']) || v.contains('\0'))
        {
            return Err(ScalerError::InvalidCommand(format!(
                "invalid environment variable {:?}",
                key
            )));
        }
        Ok(())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Build the OS command. Stdin is closed; output is inherited.
    pub fn to_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}
