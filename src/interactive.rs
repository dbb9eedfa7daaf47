//! Interactive shell over the scheduler and services.

use crate::app::Automation;
use crate::background_jobs::JobInfo;
use crate::cli_style::{
    get_prompt, get_styles, pad, print_empty_list, print_error, print_help, print_key_value,
    print_section_header, print_success, print_warning, CommandHelp,
};
use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use rustyline::{
    completion::Completer, highlight::Highlighter, history::FileHistory, validate::Validator,
    CompletionType, Config, Editor, Helper,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;

#[derive(Parser)]
#[command(styles=get_styles(), name = "")]
struct InnerCli {
    #[command(subcommand)]
    command: InnerCommand,
}

#[derive(Subcommand)]
enum InnerCommand {
    /// Lists the job catalogue with schedules and last runs.
    Jobs,

    /// Runs a job now and waits for it to finish.
    Run {
        name: String,
        /// Job options as a JSON object.
        options: Option<String>,
    },

    /// Shows scheduler and module status.
    Status,

    /// Enables the cron trigger of a job.
    Enable { name: String },

    /// Disables the cron trigger of a job. It can still be run manually.
    Disable { name: String },

    /// Shows the most recent runs of a job.
    History {
        name: String,
        #[clap(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Prints the Prometheus metrics.
    Metrics,

    /// Lists the available commands.
    Commands,

    /// Close the shell.
    Exit,
}

const COMMANDS: &[CommandHelp] = &[
    CommandHelp {
        name: "jobs",
        args: "",
        description: "List jobs",
    },
    CommandHelp {
        name: "run",
        args: "<name> [json]",
        description: "Run a job now",
    },
    CommandHelp {
        name: "status",
        args: "",
        description: "Scheduler and module status",
    },
    CommandHelp {
        name: "enable",
        args: "<name>",
        description: "Enable a job trigger",
    },
    CommandHelp {
        name: "disable",
        args: "<name>",
        description: "Disable a job trigger",
    },
    CommandHelp {
        name: "history",
        args: "<name> [-l n]",
        description: "Recent runs of a job",
    },
    CommandHelp {
        name: "metrics",
        args: "",
        description: "Prometheus metrics",
    },
    CommandHelp {
        name: "exit",
        args: "",
        description: "Leave the shell",
    },
];

enum CommandExecutionResult {
    Ok,
    Exit,
    Error(String),
}

fn print_jobs(jobs: &[JobInfo]) {
    print_section_header("Jobs");
    if jobs.is_empty() {
        print_empty_list("no jobs registered");
        return;
    }
    for job in jobs {
        let state = if job.is_running {
            "running"
        } else if job.enabled {
            "enabled"
        } else {
            "disabled"
        };
        let last = job
            .last_run
            .as_ref()
            .map(|r| format!("{} at {}", r.status, r.started_at))
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {} {} {}  last: {}  next: {}",
            pad(&job.name, 18),
            pad(&job.cron, 14),
            pad(state, 9),
            last,
            job.next_run_at.as_deref().unwrap_or("-")
        );
    }
}

fn execute_command(line: &str, automation: &Automation, rt: &Handle) -> CommandExecutionResult {
    if line.trim().is_empty() {
        return CommandExecutionResult::Ok;
    }
    let args =
        shlex::split(line).unwrap_or_else(|| line.split_whitespace().map(String::from).collect());
    let cli = InnerCli::try_parse_from(std::iter::once(" ").chain(args.iter().map(String::as_str)));

    let cli = match cli {
        Ok(cli) => cli,
        Err(e) => {
            println!("{}", e);
            return CommandExecutionResult::Ok;
        }
    };

    match cli.command {
        InnerCommand::Jobs => {
            let jobs = rt.block_on(automation.handle.list_jobs());
            print_jobs(&jobs);
        }
        InnerCommand::Run { name, options } => {
            let options = match options.map(|o| serde_json::from_str::<Value>(&o)).transpose() {
                Ok(options) => options,
                Err(e) => return CommandExecutionResult::Error(format!("Invalid options: {}", e)),
            };
            match rt.block_on(automation.run_task(&name, options)) {
                Ok(record) => {
                    print_success(&format!(
                        "{} finished in {} ms",
                        name,
                        record.duration_ms.unwrap_or_default()
                    ));
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&record.result).unwrap_or_default()
                    );
                }
                Err(e) => return CommandExecutionResult::Error(format!("{} failed: {}", name, e)),
            }
        }
        InnerCommand::Status => {
            let status = rt.block_on(automation.status());
            match serde_json::to_string_pretty(&status) {
                Ok(s) => println!("{}", s),
                Err(e) => return CommandExecutionResult::Error(e.to_string()),
            }
        }
        InnerCommand::Enable { name } | InnerCommand::Disable { name }
            if rt.block_on(automation.handle.get_job(&name)).is_none() =>
        {
            return CommandExecutionResult::Error(format!("Unknown job: {}", name));
        }
        InnerCommand::Enable { name } => {
            if let Err(e) = rt.block_on(automation.handle.set_enabled(&name, true)) {
                return CommandExecutionResult::Error(e.to_string());
            }
            print_success(&format!("{} enabled", name));
        }
        InnerCommand::Disable { name } => {
            if let Err(e) = rt.block_on(automation.handle.set_enabled(&name, false)) {
                return CommandExecutionResult::Error(e.to_string());
            }
            print_warning(&format!("{} disabled", name));
        }
        InnerCommand::History { name, limit } => match automation.handle.history(&name, limit) {
            Ok(records) => {
                print_section_header(&format!("History: {}", name));
                if records.is_empty() {
                    print_empty_list("no runs recorded");
                }
                for r in records {
                    let mut detail = format!(
                        "{} ({} ms)",
                        r.status.as_str(),
                        r.duration_ms.unwrap_or_default()
                    );
                    if let Some(e) = &r.error_message {
                        detail.push(' ');
                        detail.push_str(e);
                    }
                    print_key_value(&r.started_at.to_rfc3339(), &detail);
                }
            }
            Err(e) => return CommandExecutionResult::Error(format!("{:#}", e)),
        },
        InnerCommand::Metrics => {
            println!("{}", crate::metrics::render());
        }
        InnerCommand::Commands => print_help(COMMANDS),
        InnerCommand::Exit => return CommandExecutionResult::Exit,
    }
    CommandExecutionResult::Ok
}

#[derive(rustyline_derive::Hinter)]
struct ShellHelper {
    commands_names: Vec<String>,
}

impl ShellHelper {
    fn new() -> Self {
        let commands_names = InnerCli::command()
            .get_subcommands()
            .map(|sc| sc.get_name().to_string())
            .collect();
        ShellHelper { commands_names }
    }
}

impl Completer for ShellHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        _pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        if line.contains(' ') {
            return Ok((0, Vec::with_capacity(0)));
        }
        let matches = self
            .commands_names
            .iter()
            .filter(|c| c.starts_with(line))
            .cloned()
            .collect();
        Ok((0, matches))
    }
}

impl Highlighter for ShellHelper {}
impl Validator for ShellHelper {}
impl Helper for ShellHelper {}

fn repl(automation: Arc<Automation>, rt: Handle) -> Result<()> {
    let config = Config::builder()
        .completion_type(CompletionType::List)
        .build();
    let mut rl = Editor::<ShellHelper, FileHistory>::with_config(config)?;
    rl.set_helper(Some(ShellHelper::new()));
    print_help(COMMANDS);

    let prompt = get_prompt();
    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                match execute_command(&line, &automation, &rt) {
                    CommandExecutionResult::Ok => {}
                    CommandExecutionResult::Exit => break,
                    CommandExecutionResult::Error(err) => print_error(&err),
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                print_error(&format!("{}", e));
                break;
            }
        }
    }
    Ok(())
}

/// Run the shell on a blocking thread until `exit`, Ctrl-C or EOF.
pub async fn run_interactive(automation: Arc<Automation>) -> Result<()> {
    let rt = Handle::current();
    tokio::task::spawn_blocking(move || repl(automation, rt)).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = InnerCli::try_parse_from([" ", "run", "cleanup", "{\"dry_run\":true}"]).unwrap();
        assert!(matches!(
            cli.command,
            InnerCommand::Run { ref name, options: Some(_) } if name == "cleanup"
        ));
        let cli = InnerCli::try_parse_from([" ", "history", "cleanup", "-l", "3"]).unwrap();
        assert!(matches!(cli.command, InnerCommand::History { limit: 3, .. }));
        assert!(InnerCli::try_parse_from([" ", "bogus"]).is_err());
    }

    #[test]
    fn test_help_lists_every_subcommand() {
        let helper = ShellHelper::new();
        for cmd in COMMANDS {
            assert!(helper.commands_names.iter().any(|n| n == cmd.name));
        }
    }
}
