//! Scripted command runner for tests
//!
//! Commands are matched by prefix against `program arg1 arg2 ...`; the
//! longest matching prefix wins. A prefix scripted several times replays
//! its responses in order and then keeps returning the last one.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::runner::{CommandOutput, CommandRunner, Result, ShellError};

#[derive(Debug, Clone)]
pub enum Scripted {
    Output(CommandOutput),
    NotFound,
    Timeout,
}

#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, VecDeque<Scripted>)>>,
    missing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, prefix: &str, response: Scripted) -> Self {
        {
            let mut rules = self.rules.lock().unwrap();
            match rules.iter_mut().find(|(p, _)| p == prefix) {
                Some((_, queue)) => queue.push_back(response),
                None => rules.push((prefix.to_string(), VecDeque::from([response]))),
            }
        }
        self
    }

    pub fn on_stdout(self, prefix: &str, stdout: &str) -> Self {
        self.on(prefix, Scripted::Output(CommandOutput::ok(stdout)))
    }

    pub fn on_output(self, prefix: &str, output: CommandOutput) -> Self {
        self.on(prefix, Scripted::Output(output))
    }

    /// Mark a program as not installed; `is_available` reports false for it
    pub fn missing(self, program: &str) -> Self {
        self.missing.lock().unwrap().insert(program.to_string());
        self
    }

    /// Every command line run so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn next_response(&self, line: &str) -> Option<Scripted> {
        let mut rules = self.rules.lock().unwrap();
        let (_, queue) = rules
            .iter_mut()
            .filter(|(p, _)| line.starts_with(p.as_str()))
            .max_by_key(|(p, _)| p.len())?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(line.clone());

        if self.missing.lock().unwrap().contains(program) {
            return Err(ShellError::NotFound {
                program: program.to_string(),
            });
        }

        match self.next_response(&line) {
            Some(Scripted::Output(out)) => Ok(out),
            Some(Scripted::Timeout) => Err(ShellError::Timeout {
                program: program.to_string(),
                timeout,
            }),
            Some(Scripted::NotFound) | None => Err(ShellError::NotFound {
                program: program.to_string(),
            }),
        }
    }

    fn is_available(&self, program: &str) -> bool {
        !self.missing.lock().unwrap().contains(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_longest_prefix_and_sequence() {
        let runner = ScriptedRunner::new()
            .on_stdout("adb", "generic")
            .on_stdout("adb connect", "first")
            .on_stdout("adb connect", "second");

        let t = Duration::from_secs(1);
        assert_eq!(runner.run("adb", &["connect", "x"], t).await.unwrap().stdout, "first");
        assert_eq!(runner.run("adb", &["connect", "x"], t).await.unwrap().stdout, "second");
        assert_eq!(runner.run("adb", &["connect", "x"], t).await.unwrap().stdout, "second");
        assert_eq!(runner.run("adb", &["devices"], t).await.unwrap().stdout, "generic");
        assert_eq!(runner.call_count("adb connect"), 3);
    }

    #[tokio::test]
    async fn test_missing_and_unscripted() {
        let runner = ScriptedRunner::new().missing("nmap");
        let t = Duration::from_secs(1);
        assert!(!runner.is_available("nmap"));
        assert!(runner.run("nmap", &[], t).await.unwrap_err().is_not_found());
        assert!(runner.run("other", &[], t).await.unwrap_err().is_not_found());
        assert_eq!(runner.calls().len(), 2);
    }
}
