//! Shell command composition for terminal sessions.

use super::protocol::{InitRequest, Provider};
use crate::config::TerminalConfig;

/// Quoting rules differ between the two supported shells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFamily {
    Posix,
    PowerShell,
}

impl ShellFamily {
    pub fn native() -> Self {
        if cfg!(windows) {
            ShellFamily::PowerShell
        } else {
            ShellFamily::Posix
        }
    }

    /// Single-quote `s` so the shell passes it through verbatim.
    pub fn quote(self, s: &str) -> String {
        match self {
            ShellFamily::Posix => format!("'{}'", s.replace('\'', r"'\''")),
            ShellFamily::PowerShell => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

/// What the terminal should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    PlainShell {
        initial_command: Option<String>,
    },
    Agent {
        provider: Provider,
        /// Resume this session, falling back to a fresh run if that fails
        resume_session_id: Option<String>,
    },
}

impl LaunchMode {
    pub fn from_request(req: &InitRequest) -> Self {
        if req.is_plain_shell {
            return LaunchMode::PlainShell {
                initial_command: req
                    .initial_command
                    .clone()
                    .filter(|c| !c.trim().is_empty()),
            };
        }
        let resume_session_id = if req.has_session {
            req.session_id.clone().filter(|s| !s.is_empty())
        } else {
            None
        };
        LaunchMode::Agent {
            provider: req.provider,
            resume_session_id,
        }
    }
}

/// Compose the command line for `mode`. `None` means an interactive shell.
pub fn compose_command(
    mode: &LaunchMode,
    family: ShellFamily,
    config: &TerminalConfig,
) -> Option<String> {
    match mode {
        LaunchMode::PlainShell { initial_command } => initial_command.clone(),
        LaunchMode::Agent {
            provider,
            resume_session_id,
        } => {
            let bin = match provider {
                Provider::Claude => config.claude_bin.as_str(),
                Provider::Cursor => config.cursor_bin.as_str(),
            };
            let Some(id) = resume_session_id else {
                return Some(bin.to_string());
            };
            let resume = match provider {
                Provider::Claude => format!("{} --resume {}", bin, family.quote(id)),
                Provider::Cursor => format!("{} --resume={}", bin, family.quote(id)),
            };
            Some(match family {
                ShellFamily::Posix => format!("{} || {}", resume, bin),
                ShellFamily::PowerShell => {
                    format!("{}; if ($LASTEXITCODE -ne 0) {{ {} }}", resume, bin)
                }
            })
        }
    }
}

/// Program and arguments that run `command` (or an interactive shell).
pub fn shell_invocation(
    family: ShellFamily,
    shell_override: Option<&str>,
    command: Option<&str>,
) -> (String, Vec<String>) {
    match family {
        ShellFamily::Posix => {
            let shell = shell_override
                .map(str::to_string)
                .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
                .unwrap_or_else(|| "/bin/bash".to_string());
            let args = match command {
                Some(cmd) => vec!["-c".to_string(), cmd.to_string()],
                None => Vec::new(),
            };
            (shell, args)
        }
        ShellFamily::PowerShell => {
            let shell = shell_override.unwrap_or("powershell.exe").to_string();
            let mut args = vec!["-NoLogo".to_string()];
            if let Some(cmd) = command {
                args.push("-Command".to_string());
                args.push(cmd.to_string());
            }
            (shell, args)
        }
    }
}
