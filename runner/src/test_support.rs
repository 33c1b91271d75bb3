//! Test-only helpers: ticket builders, scripted executors and scratch
//! workspaces with fake agent scripts.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::core::cancel::CancelToken;
use crate::io::config::{RunnerConfig, write_config};
use crate::io::executor::TicketExecutor;
use crate::io::init::{InitOptions, RunnerPaths, init_runner};
use crate::io::process::{Launcher, SystemLauncher};
use crate::io::ticket_store::{load_tickets, write_tickets};
use crate::ticket::{Ticket, TicketType};

/// Timestamp shared by every helper-built ticket.
pub fn fixed_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_767_225_600, 0).expect("valid timestamp")
}

/// Create a deterministic pending ticket with no dependencies.
pub fn ticket(id: &str, priority: u8) -> Ticket {
    let mut ticket = Ticket::new(id, format!("Ticket {id}"), TicketType::Feature);
    ticket.description = format!("{id} description");
    ticket.priority = priority;
    ticket.created_at = fixed_time();
    ticket
}

/// Create a pending ticket depending on `deps`.
pub fn ticket_with_deps(id: &str, priority: u8, deps: &[&str]) -> Ticket {
    Ticket {
        dependencies: deps.iter().map(|dep| dep.to_string()).collect(),
        ..ticket(id, priority)
    }
}

/// What a [`ScriptedExecutor`] does for a given ticket.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Succeed,
    Fail(String),
    Panic(String),
    /// Trip the shared cancellation token, then fail.
    CancelRun,
}

/// Executor returning predetermined outcomes while recording start order
/// and peak concurrency.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    outcomes: HashMap<String, ScriptedOutcome>,
    delay: Duration,
    started: Mutex<Vec<String>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, id: &str, outcome: ScriptedOutcome) -> Self {
        self.outcomes.insert(id.to_string(), outcome);
        self
    }

    /// Time each execution takes; cancellation interrupts the wait.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().expect("started lock").clone()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl TicketExecutor for ScriptedExecutor {
    fn execute(&self, ticket: &Ticket, cancel: &CancelToken) -> Result<()> {
        self.started
            .lock()
            .expect("started lock")
            .push(ticket.id.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let deadline = Instant::now() + self.delay;
        while Instant::now() < deadline && !cancel.is_cancelled() {
            thread::sleep(Duration::from_millis(5));
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        match self
            .outcomes
            .get(&ticket.id)
            .cloned()
            .unwrap_or(ScriptedOutcome::Succeed)
        {
            ScriptedOutcome::Succeed => Ok(()),
            ScriptedOutcome::Fail(reason) => bail!(reason),
            ScriptedOutcome::Panic(message) => panic!("{message}"),
            ScriptedOutcome::CancelRun => {
                cancel.cancel();
                bail!("cancelled")
            }
        }
    }
}

/// Launcher that counts spawns before delegating to the real one.
#[derive(Debug, Default)]
pub struct CountingLauncher {
    launches: AtomicUsize,
}

impl CountingLauncher {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl Launcher for CountingLauncher {
    fn launch(&self, cmd: &mut Command) -> io::Result<Child> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        SystemLauncher.launch(cmd)
    }
}

/// Write a shell script meant to be run as `/bin/sh <script> ...`.
///
/// Scripts are never executed directly, which avoids `ETXTBSY` races with
/// files that were just written.
pub fn write_agent_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write agent script");
    path
}

/// Scratch project with an initialized `.runner/` directory.
pub struct TestWorkspace {
    temp: TempDir,
    pub paths: RunnerPaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let paths = init_runner(temp.path(), &InitOptions { force: false })?;
        Ok(Self { temp, paths })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn write_tickets(&self, tickets: &[Ticket]) -> Result<()> {
        write_tickets(&self.paths.tickets_path, tickets)
    }

    pub fn tickets(&self) -> Result<Vec<Ticket>> {
        load_tickets(&self.paths.tickets_path)
    }

    pub fn write_config(&self, config: &RunnerConfig) -> Result<()> {
        write_config(&self.paths.config_path, config)
    }

    /// Install a fake agent script and point the config at it.
    pub fn install_agent(&self, body: &str, mut config: RunnerConfig) -> Result<RunnerConfig> {
        let script = write_agent_script(self.root(), "agent.sh", body);
        config.agent.command = "/bin/sh".to_string();
        config.agent.args = vec![script.display().to_string()];
        config.agent.timeout_secs = 30;
        self.write_config(&config)?;
        Ok(config)
    }
}
