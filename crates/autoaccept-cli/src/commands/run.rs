//! `autoaccept run`: the long-running agent.
//!
//! Starts the agent runtime, feeds it filesystem activity, and reads control
//! commands from stdin until `quit`, end of input or Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use autoaccept_core::{AgentHandle, AgentRuntime, ForceAcceptOutcome, SharedSettings};
use autoaccept_types::{AcceptError, Trigger};

use crate::host::ProcessInvoker;
use crate::options::ConfigArgs;
use crate::remote;
use crate::watcher::TriggerWatcher;

/// Lines returned by `log` when no count is given.
const DEFAULT_LOG_LINES: usize = 20;

/// Options for `autoaccept run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Directories whose file activity escalates polling. Defaults to the
    /// current directory.
    pub watch: Vec<PathBuf>,
    pub no_watch: bool,
    /// Ignore stdin and run until Ctrl-C.
    pub no_stdin: bool,
}

/// One line typed on the control console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Toggle,
    Accept,
    Log(usize),
    Status,
    Trigger(Trigger),
    Help,
    Quit,
}

/// Parse a console line. Blank lines parse to `None`.
pub fn parse_control(line: &str) -> Result<Option<ControlCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let command = match verb {
        "toggle" => ControlCommand::Toggle,
        "accept" => ControlCommand::Accept,
        "log" => match arg {
            Some(n) => ControlCommand::Log(
                n.parse()
                    .map_err(|_| format!("log expects a line count, got {n:?}"))?,
            ),
            None => ControlCommand::Log(DEFAULT_LOG_LINES),
        },
        "status" => ControlCommand::Status,
        "trigger" => {
            let name = arg.ok_or("trigger expects a trigger name")?;
            ControlCommand::Trigger(
                Trigger::from_name(name).ok_or_else(|| format!("unknown trigger {name:?}"))?,
            )
        }
        "help" | "?" => ControlCommand::Help,
        "quit" | "exit" => ControlCommand::Quit,
        other => return Err(format!("unknown command {other:?} (try `help`)")),
    };
    Ok(Some(command))
}

/// Run the `autoaccept run` command.
pub async fn run(args: &ConfigArgs, options: RunOptions) -> Result<()> {
    let effective = args.load()?;
    for path in &effective.source_files {
        info!(path = %path.display(), "loaded config file");
    }
    let config = effective.config.clone();

    let reload_args = args.clone();
    let settings = Arc::new(SharedSettings::new(config.clone()).with_reloader(move || {
        let loader = reload_args
            .loader()
            .map_err(|e| AcceptError::ConfigError(e.to_string()))?;
        loader.load().map(|effective| effective.config)
    }));

    let invoker = Arc::new(ProcessInvoker::new(settings.clone()));
    let mut builder = AgentRuntime::builder(settings, invoker);
    if config.cdp.enabled {
        let port = remote::prepare_endpoint(&config.cdp);
        builder = builder.with_remote(remote::remote_link(&config.cdp, port)?);
    } else {
        info!("remote debugging disabled");
    }
    let (runtime, handle) = builder.build();
    let agent = tokio::spawn(runtime.run());

    let _watcher = if options.no_watch {
        None
    } else {
        let roots = if options.watch.is_empty() {
            vec![std::env::current_dir().context("failed to get current directory")?]
        } else {
            options.watch.clone()
        };
        Some(TriggerWatcher::start(
            &roots,
            &effective.source_files,
            handle.clone(),
        )?)
    };

    let printer = tokio::spawn(print_indicator_changes(handle.clone()));

    if options.no_stdin {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
    } else {
        control_loop(&handle).await?;
    }

    // The runtime may already be gone; either way it is stopping.
    let _ = handle.shutdown().await;
    agent.await.context("agent task failed")?;
    printer.abort();
    Ok(())
}

async fn print_indicator_changes(handle: AgentHandle) {
    let mut status = handle.status();
    let mut last = status.borrow().indicator;
    println!("{}", status.borrow().summary());
    while status.changed().await.is_ok() {
        let snapshot = status.borrow_and_update().clone();
        if snapshot.indicator != last {
            last = snapshot.indicator;
            println!("{}", snapshot.summary());
        }
    }
}

async fn control_loop(handle: &AgentHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_help();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };
        let Some(line) = line else {
            return Ok(());
        };

        let command = match parse_control(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };

        match command {
            ControlCommand::Toggle => {
                let enabled = handle.toggle().await?;
                println!("agent {}", if enabled { "enabled" } else { "disabled" });
            }
            ControlCommand::Accept => match handle.force_accept().await? {
                ForceAcceptOutcome::Completed(report) => println!("{}", report.summary()),
                ForceAcceptOutcome::Skipped => println!("a pass is already running"),
                ForceAcceptOutcome::Failed(reason) => println!("pass failed: {reason}"),
            },
            ControlCommand::Log(limit) => {
                for line in handle.show_log(limit).await? {
                    println!("{line}");
                }
            }
            ControlCommand::Status => println!("{}", handle.status_snapshot().summary()),
            ControlCommand::Trigger(trigger) => handle.trigger(trigger).await?,
            ControlCommand::Help => print_help(),
            ControlCommand::Quit => return Ok(()),
        }
    }
}

fn print_help() {
    println!("commands: toggle, accept, log [N], status, trigger NAME, help, quit");
}
