use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::gdb::Debugger;
use crate::reply::PROMPT;

/// Debugger fake answering exact commands with canned replies.
///
/// Unknown commands get gdb's "no symbol" reply, which has no value.
#[derive(Default)]
pub struct ScriptedGdb {
    replies: HashMap<String, Vec<String>>,
    served: HashMap<String, usize>,
    failing: Option<String>,
    pub commands: Vec<String>,
    pub shutdowns: usize,
    counter: usize,
}

impl ScriptedGdb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `command` with a `$N = value` reply.
    pub fn value(mut self, command: &str, value: &str) -> Self {
        self.counter += 1;
        let reply = format!("${} = {value}\n{PROMPT}", self.counter);
        self.replies.insert(command.to_string(), vec![reply]);
        self
    }

    /// Answers `command` with `text` followed by the prompt.
    pub fn raw(mut self, command: &str, text: &str) -> Self {
        self.replies.insert(command.to_string(), vec![format!("{text}{PROMPT}")]);
        self
    }

    /// Answers successive `command`s with `texts` in order, repeating the last.
    pub fn raw_sequence(mut self, command: &str, texts: &[&str]) -> Self {
        let replies = texts.iter().map(|t| format!("{t}{PROMPT}")).collect();
        self.replies.insert(command.to_string(), replies);
        self
    }

    /// Makes sending `command` fail as a closed pipe would.
    pub fn fail_on(mut self, command: &str) -> Self {
        self.failing = Some(command.to_string());
        self
    }

    pub fn sent(&self, command: &str) -> usize {
        self.commands.iter().filter(|c| *c == command).count()
    }
}

impl Debugger for ScriptedGdb {
    fn execute(&mut self, command: &str) -> Result<String> {
        self.commands.push(command.to_string());
        if self.failing.as_deref() == Some(command) {
            return Err(Error::SendCommand(command.to_string()));
        }
        let Some(replies) = self.replies.get(command) else {
            return Ok(format!("No symbol in current context.\n{PROMPT}"));
        };
        let served = self.served.entry(command.to_string()).or_default();
        let reply = replies[(*served).min(replies.len() - 1)].clone();
        *served += 1;
        Ok(reply)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.shutdowns += 1;
        Ok(())
    }
}
