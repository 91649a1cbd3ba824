use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::shell::{ShellOutput, ShellRunner};


/// A [ShellRunner] that answers commands from canned responses and records every command it
///  was asked to run. Commands are matched by prefix, the first matching rule wins; commands
///  without a matching rule print nothing.
#[derive(Debug, Default)]
pub struct ScriptedShellRunner {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    rules: Vec<Rule>,
    commands: Vec<String>,
}

#[derive(Debug)]
struct Rule {
    prefix: String,
    /// consumed front to back, the last response is repeated
    responses: VecDeque<ShellOutput>,
}

impl ScriptedShellRunner {
    pub fn new() -> ScriptedShellRunner {
        ScriptedShellRunner::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn respond(&self, prefix: &str, stdout: &str) {
        self.respond_sequence(prefix, &[stdout]);
    }

    pub fn respond_sequence(&self, prefix: &str, stdouts: &[&str]) {
        let responses = stdouts.iter()
            .map(|s| ShellOutput {
                stdout: s.to_string(),
                ..Default::default()
            })
            .collect();
        self.respond_with(prefix, responses);
    }

    pub fn respond_with(&self, prefix: &str, responses: Vec<ShellOutput>) {
        self.inner().rules.push(Rule {
            prefix: prefix.to_string(),
            responses: responses.into(),
        });
    }

    /// all commands run so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.inner().commands.clone()
    }

    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.inner().commands.iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ShellRunner for ScriptedShellRunner {
    async fn run(&self, command: &str, _timeout: Duration) -> ShellOutput {
        let mut inner = self.inner();
        inner.commands.push(command.to_string());

        let Some(rule) = inner.rules.iter_mut().find(|r| command.starts_with(&r.prefix)) else {
            return ShellOutput::default();
        };
        if rule.responses.len() > 1 {
            rule.responses.pop_front().unwrap_or_default()
        }
        else {
            rule.responses.front().cloned().unwrap_or_default()
        }
    }
}
