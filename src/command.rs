//! Command-line commands and argument parsing

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::reply::Tone;

const DEFAULT_SUBJECT: &str = "Re: Your email";

/// Line that ends an email in an interactive session
pub const END_OF_EMAIL: &str = ".";

/// Options shared by every command that generates a reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateArgs {
    pub tone: Tone,
    pub sender_name: Option<String>,
    /// Skip the completion endpoint and use the offline templates
    pub offline: bool,
    /// Read the email from this file instead of stdin
    pub file: Option<PathBuf>,
}

/// Parsed command from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Generate(GenerateArgs),
    Send {
        generate: GenerateArgs,
        to: String,
        subject: String,
    },
    /// Many emails through one pipeline, sharing its throttle state
    Interactive(GenerateArgs),
    Models,
    Setup,
    Help,
}

/// One unit of input in an interactive session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    Email(String),
    Status,
    Reset,
    Quit,
}

/// Help information for a command
#[derive(Debug, Clone)]
pub struct CommandHelp {
    pub name: &'static str,
    pub description: &'static str,
}

/// Parse arguments (without the program name) into a command
pub fn parse_command(args: &[String]) -> Result<ParsedCommand> {
    let Some((cmd, rest)) = args.split_first() else {
        return Ok(ParsedCommand::Help);
    };

    match cmd.as_str() {
        "help" | "--help" | "-h" => Ok(ParsedCommand::Help),
        "models" => Ok(ParsedCommand::Models),
        "setup" => Ok(ParsedCommand::Setup),
        "generate" | "gen" => {
            let flags = parse_flags(rest)?;
            if flags.to.is_some() || flags.subject.is_some() {
                bail!("--to and --subject are only valid with 'send'");
            }
            Ok(ParsedCommand::Generate(flags.generate))
        }
        "interactive" | "i" => {
            let flags = parse_flags(rest)?;
            if flags.to.is_some() || flags.subject.is_some() || flags.generate.file.is_some() {
                bail!("'interactive' reads stdin; --to, --subject and --file do not apply");
            }
            Ok(ParsedCommand::Interactive(flags.generate))
        }
        "send" => {
            let flags = parse_flags(rest)?;
            let Some(to) = flags.to else {
                bail!("'send' requires --to <address>");
            };
            Ok(ParsedCommand::Send {
                generate: flags.generate,
                to,
                subject: flags
                    .subject
                    .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            })
        }
        other => bail!("Unknown command: {}", other),
    }
}

#[derive(Default)]
struct Flags {
    generate: GenerateArgs,
    to: Option<String>,
    subject: Option<String>,
}

fn parse_flags(args: &[String]) -> Result<Flags> {
    let mut flags = Flags::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        // Accept both `--flag value` and `--flag=value`
        let (name, inline) = match arg.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };

        let mut value = || -> Result<String> {
            match inline.clone().or_else(|| iter.next().cloned()) {
                Some(v) => Ok(v),
                None => bail!("{} requires a value", name),
            }
        };

        match name {
            "--tone" | "-t" => flags.generate.tone = Tone::parse(&value()?),
            "--name" | "-n" => {
                let name = value()?;
                flags.generate.sender_name = Some(name).filter(|n| !n.trim().is_empty());
            }
            "--file" | "-f" => flags.generate.file = Some(PathBuf::from(value()?)),
            "--to" => flags.to = Some(value()?),
            "--subject" | "-s" => flags.subject = Some(value()?),
            "--offline" => flags.generate.offline = true,
            other => bail!("Unknown option: {}", other),
        }
    }

    Ok(flags)
}

/// Read the next email or `:command` from an interactive session.
///
/// An email runs until a line holding only `END_OF_EMAIL`; end of input
/// flushes a partial email. Returns `None` once input is exhausted.
pub fn read_session_input<R: BufRead>(reader: &mut R) -> std::io::Result<Option<SessionInput>> {
    let mut email = String::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok((!email.trim().is_empty()).then_some(SessionInput::Email(email)));
        }
        let line = line.trim_end_matches(['\r', '\n']);

        if email.is_empty() {
            match line.trim() {
                ":status" => return Ok(Some(SessionInput::Status)),
                ":reset" => return Ok(Some(SessionInput::Reset)),
                ":quit" | ":q" => return Ok(Some(SessionInput::Quit)),
                "" | END_OF_EMAIL => continue,
                _ => {}
            }
        }

        if line == END_OF_EMAIL {
            return Ok(Some(SessionInput::Email(email)));
        }
        email.push_str(line);
        email.push('\n');
    }
}

/// Get all available commands for help display
pub fn available_commands() -> Vec<CommandHelp> {
    vec![
        CommandHelp {
            name: "generate",
            description: "Draft a reply to the email on stdin (or --file)",
        },
        CommandHelp {
            name: "send",
            description: "Draft a reply and send it with SMTP (--to, --subject)",
        },
        CommandHelp {
            name: "interactive",
            description: "Draft replies to several emails in one session",
        },
        CommandHelp {
            name: "models",
            description: "List models available to the configured API key",
        },
        CommandHelp {
            name: "setup",
            description: "Store provider and SMTP credentials",
        },
        CommandHelp {
            name: "help",
            description: "Show this help message",
        },
    ]
}
