use std::io;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CommandRunner, Exit, Invocation};

type Matcher = Box<dyn Fn(&Invocation) -> bool + Send + Sync>;
type Effect = Box<dyn Fn(&Invocation) + Send + Sync>;

enum Action {
    Exit(i32),
    Stdout(String),
    Hang,
    Effect(Effect),
}

struct Rule {
    matcher: Matcher,
    action: Action,
}

/// Runner double that records every invocation and answers from rules.
/// Unmatched invocations succeed with empty output.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Invocation>>,
    rules: Vec<Rule>,
}

fn prefix(prefix: &str) -> Matcher {
    let prefix = prefix.to_string();
    Box::new(move |invocation| invocation.to_string().starts_with(&prefix))
}

impl RecordingRunner {
    fn rule(mut self, matcher: Matcher, action: Action) -> Self {
        self.rules.push(Rule { matcher, action });
        self
    }

    pub fn with_stdout(self, command: &str, stdout: &str) -> Self {
        self.rule(prefix(command), Action::Stdout(stdout.to_string()))
    }

    pub fn fail_on(self, command: &str, code: i32) -> Self {
        self.rule(prefix(command), Action::Exit(code))
    }

    /// Fails invocations of `command` whose working directory ends in `dir`.
    pub fn fail_in(self, dir: &str, command: &str, code: i32) -> Self {
        let dir = dir.to_string();
        let command = prefix(command);

        self.rule(
            Box::new(move |invocation| {
                command(invocation)
                    && invocation
                        .cwd
                        .as_ref()
                        .is_some_and(|cwd| cwd.ends_with(&dir))
            }),
            Action::Exit(code),
        )
    }

    pub fn hang_on(self, command: &str) -> Self {
        self.rule(prefix(command), Action::Hang)
    }

    pub fn with_effect<F>(self, command: &str, effect: F) -> Self
    where
        F: Fn(&Invocation) + Send + Sync + 'static,
    {
        self.rule(prefix(command), Action::Effect(Box::new(effect)))
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    fn record(&self, invocation: &Invocation) {
        self.calls.lock().unwrap().push(invocation.clone());
    }

    async fn answer(&self, invocation: &Invocation) -> (Exit, String) {
        self.record(invocation);

        let Some(rule) = self.rules.iter().find(|rule| (rule.matcher)(invocation)) else {
            return (Exit::SUCCESS, String::new());
        };

        match &rule.action {
            Action::Exit(code) => (Exit { code: Some(*code) }, String::new()),
            Action::Stdout(stdout) => (Exit::SUCCESS, stdout.clone()),
            Action::Hang => std::future::pending().await,
            Action::Effect(effect) => {
                effect(invocation);
                (Exit::SUCCESS, String::new())
            }
        }
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> io::Result<Exit> {
        Ok(self.answer(invocation).await.0)
    }

    async fn output(&self, invocation: &Invocation) -> io::Result<(Exit, String)> {
        Ok(self.answer(invocation).await)
    }
}
