//! A scripted stand-in for the external CLIs.

use crate::errors::ToolError;
use crate::tools::{CommandOutput, CommandRunner, Invocation};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

type Response = Result<CommandOutput, ToolError>;

#[derive(Debug)]
struct Rule {
    prefix: String,
    responses: VecDeque<Response>,
}

/// Answers invocations by matching their command line against scripted
/// prefixes, and records every invocation.
///
/// The most recently added matching rule wins. A rule with several responses
/// plays them in order and then keeps repeating the last one. Unmatched
/// invocations get the default response (exit 0, empty output).
#[derive(Debug)]
pub struct FakeRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
    default: Response,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            default: Ok(CommandOutput::ok("")),
        }
    }
}

impl FakeRunner {
    /// Creates a runner where every command succeeds with empty output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the response for unmatched invocations.
    #[must_use]
    pub fn with_default(mut self, output: CommandOutput) -> Self {
        self.default = Ok(output);
        self
    }

    /// Answers commands starting with `prefix` with `output`.
    pub fn on(&self, prefix: &str, output: CommandOutput) -> &Self {
        self.on_sequence(prefix, vec![output])
    }

    /// Answers commands starting with `prefix` with successful `stdout`.
    pub fn on_stdout(&self, prefix: &str, stdout: &str) -> &Self {
        self.on(prefix, CommandOutput::ok(stdout))
    }

    /// Answers commands starting with `prefix` with a non-zero exit.
    pub fn on_fail(&self, prefix: &str, stderr: &str) -> &Self {
        self.on(prefix, CommandOutput::failed(1, stderr))
    }

    /// Answers commands starting with `prefix` with `outputs` in order.
    pub fn on_sequence(&self, prefix: &str, outputs: Vec<CommandOutput>) -> &Self {
        self.rules.lock().push(Rule {
            prefix: prefix.to_string(),
            responses: outputs.into_iter().map(Ok).collect(),
        });
        self
    }

    /// Answers commands starting with `prefix` with a spawn-level error.
    pub fn on_error(&self, prefix: &str, error: ToolError) -> &Self {
        self.rules.lock().push(Rule {
            prefix: prefix.to_string(),
            responses: VecDeque::from([Err(error)]),
        });
        self
    }

    /// Returns every recorded command line, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().iter().map(Invocation::display).collect()
    }

    /// Returns every recorded invocation, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    /// Returns the number of recorded commands starting with `prefix`.
    #[must_use]
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|inv| inv.display().starts_with(prefix))
            .count()
    }

    /// Returns the stdin of the last command starting with `prefix`.
    #[must_use]
    pub fn stdin_of(&self, prefix: &str) -> Option<String> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|inv| inv.display().starts_with(prefix))
            .and_then(|inv| inv.stdin.clone())
    }

    fn respond(&self, command: &str) -> Response {
        let mut rules = self.rules.lock();
        let Some(rule) = rules
            .iter_mut()
            .rev()
            .find(|rule| command.starts_with(&rule.prefix))
        else {
            return self.default.clone();
        };
        if rule.responses.len() > 1 {
            rule.responses.pop_front().unwrap_or_else(|| self.default.clone())
        } else {
            rule.responses
                .front()
                .cloned()
                .unwrap_or_else(|| self.default.clone())
        }
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ToolError> {
        self.calls.lock().push(invocation.clone());
        self.respond(&invocation.display())
    }
}
