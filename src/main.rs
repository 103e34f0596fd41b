mod ai;
mod command;
mod config;
mod constants;
mod credentials;
mod mail;
mod reply;
mod retry;

use anyhow::{Context, Result};
use std::env;
use std::io::{self, Read, Write};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::ai::{ChatCompletionClient, CompletionClient};
use crate::command::{
    END_OF_EMAIL, GenerateArgs, ParsedCommand, SessionInput, available_commands, parse_command,
    read_session_input,
};
use crate::config::{Config, Provider};
use crate::constants::THROTTLE_THRESHOLD;
use crate::credentials::{CredentialStore, SMTP_HOST, SMTP_PASSWORD, SMTP_PORT, SMTP_SENDER};
use crate::mail::SmtpMailer;
use crate::reply::{PromptBuilder, ReplyPipeline, ReplyRequest, ReplyResult};
use crate::retry::RetryScheduler;

fn setup_logging() {
    use std::fs::OpenOptions;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,replywright=debug"));

    // Try to create a log file in the config directory
    let log_file = Config::config_dir()
        .ok()
        .and_then(|dir| std::fs::create_dir_all(&dir).ok().map(|_| dir))
        .map(|dir| dir.join("replywright.log"))
        .and_then(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .ok()
        });

    if let Some(file) = log_file {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    } else {
        // Fallback to stderr if file logging fails
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_usage() {
    eprintln!("replywright - Draft email replies with an LLM\n");
    eprintln!("Usage: replywright <command> [options]\n");
    eprintln!("Commands:");
    for cmd in available_commands() {
        eprintln!("    {:<10}  {}", cmd.name, cmd.description);
    }
    eprintln!(
        r#"
Options:
    --tone, -t <tone>       professional (default), friendly, casual, formal, apologetic
    --name, -n <name>       Sign the reply with this name
    --file, -f <path>       Read the email from a file instead of stdin
    --offline               Use the offline templates only
    --to <address>          Recipient (send only)
    --subject, -s <text>    Subject line (send only)

Configuration file: ~/.config/replywright/config.toml
Secrets: ~/.config/replywright/secrets.toml, the OS keyring, or environment variables
"#
    );
}

fn read_email(args: &GenerateArgs) -> Result<String> {
    match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read email from stdin")?;
            Ok(text)
        }
    }
}

fn build_pipeline(config: &Config, creds: &CredentialStore) -> ReplyPipeline {
    let key_name = config.ai.provider.api_key_name();
    let client: Option<Arc<dyn CompletionClient>> = match creds.get(key_name) {
        Some(key) => Some(Arc::new(ChatCompletionClient::new(&config.ai, key))),
        None => {
            tracing::info!("{} not set; remote generation unavailable", key_name);
            None
        }
    };

    ReplyPipeline::new(
        client,
        PromptBuilder::new(config.prompt.max_email_chars()),
        RetryScheduler::new(config.retry.policy()),
        config.ai.request_timeout(),
    )
}

/// Generate a reply and print it. Returns None when the input was rejected.
async fn generate(
    config: &Config,
    creds: &CredentialStore,
    args: &GenerateArgs,
) -> Result<Option<(ReplyRequest, ReplyResult)>> {
    let email = read_email(args)?;
    let request = match ReplyRequest::new(email, args.tone, args.sender_name.as_deref()) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(None);
        }
    };

    let pipeline = build_pipeline(config, creds);
    let result = pipeline.generate_reply(&request, !args.offline).await;
    print_result(&result);

    Ok(Some((request, result)))
}

fn print_result(result: &ReplyResult) {
    if let Some(ref notice) = result.notice {
        eprintln!("Note: {}", notice);
    }
    eprintln!("[{}]", result.provenance);
    println!("{}", result.text);
}

async fn run_generate(args: GenerateArgs) -> Result<()> {
    let config = Config::load()?;
    let creds = CredentialStore::new();

    if generate(&config, &creds, &args).await?.is_none() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_send(args: GenerateArgs, to: String, subject: String) -> Result<()> {
    let config = Config::load()?;
    let creds = CredentialStore::new();

    let Some((request, result)) = generate(&config, &creds, &args).await? else {
        std::process::exit(1);
    };

    let sent = match SmtpMailer::from_credentials(&config.smtp, &creds, request.sender_name()) {
        Ok(mailer) => mailer.send(&to, &subject, &result.text).await,
        Err(e) => Err(e),
    };

    match sent {
        Ok(()) => {
            eprintln!("Email sent to {}", to);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Send failed: {}", e);
            eprintln!("Reply generated, but sending failed: {}", e);
            std::process::exit(2);
        }
    }
}

/// Several emails through one pipeline, so request spacing and the
/// rate-limit counter carry over between replies.
async fn run_interactive(args: GenerateArgs) -> Result<()> {
    let config = Config::load()?;
    let creds = CredentialStore::new();
    let pipeline = build_pipeline(&config, &creds);

    eprintln!(
        "Paste an email and end it with a line containing only '{}'.",
        END_OF_EMAIL
    );
    eprintln!("Commands: :status, :reset, :quit\n");

    let stdin = io::stdin();
    let mut input = stdin.lock();

    while let Some(item) = read_session_input(&mut input)? {
        match item {
            SessionInput::Email(email) => {
                let request =
                    match ReplyRequest::new(email, args.tone, args.sender_name.as_deref()) {
                        Ok(request) => request,
                        Err(e) => {
                            eprintln!("{}", e);
                            continue;
                        }
                    };
                let result = pipeline.generate_reply(&request, !args.offline).await;
                print_result(&result);
                println!();
            }
            SessionInput::Status => {
                let state = pipeline.throttle_snapshot().await;
                eprintln!(
                    "Consecutive rate limits: {}/{}{}",
                    state.consecutive_failures,
                    THROTTLE_THRESHOLD,
                    if state.is_throttled() {
                        " (remote generation paused; :reset to resume)"
                    } else {
                        ""
                    }
                );
                if let Some(last) = state.last_request_at {
                    eprintln!("Last request: {:?} ago", last.elapsed());
                }
            }
            SessionInput::Reset => {
                pipeline.reset_throttle().await;
                eprintln!("Rate-limit counter cleared");
            }
            SessionInput::Quit => break,
        }
    }
    Ok(())
}

async fn run_models() -> Result<()> {
    let config = Config::load()?;
    let creds = CredentialStore::new();
    let key = creds.require(config.ai.provider.api_key_name())?;

    let client = ChatCompletionClient::new(&config.ai, key);
    let models = client.list_models().await?;

    println!("Models available to your {} key:", config.ai.provider);
    for model in models {
        let marker = if model == client.model() { " (configured)" } else { "" };
        println!("  - {}{}", model, marker);
    }
    Ok(())
}

fn prompt_line(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

async fn run_setup() -> Result<()> {
    println!("Replywright Setup");
    println!("=================\n");

    let mut config = Config::load()?;
    let creds = CredentialStore::new();

    let provider = loop {
        let input = prompt_line("Provider [openai/groq] (default openai): ")?;
        match input.to_ascii_lowercase().as_str() {
            "" | "openai" => break Provider::OpenAi,
            "groq" => break Provider::Groq,
            _ => println!("Please enter 'openai' or 'groq'."),
        }
    };
    config.ai.provider = provider;

    print!("{} (leave blank to keep current): ", provider.api_key_name());
    io::stdout().flush()?;
    let api_key = read_password()?;
    println!();
    if !api_key.is_empty() {
        creds.set(provider.api_key_name(), &api_key)?;
    }

    let sender = prompt_line("SMTP sender address (blank to skip email sending): ")?;
    if !sender.is_empty() {
        creds.set(SMTP_SENDER, &sender)?;

        print!("SMTP password: ");
        io::stdout().flush()?;
        let password = read_password()?;
        println!();
        creds.set(SMTP_PASSWORD, &password)?;

        let host = prompt_line(&format!("SMTP host (default {}): ", config.smtp.server))?;
        if !host.is_empty() {
            creds.set(SMTP_HOST, &host)?;
        }

        let port = prompt_line(&format!("SMTP port (default {}): ", config.smtp.port))?;
        if !port.is_empty() {
            port.parse::<u16>()
                .with_context(|| format!("Invalid port: {}", port))?;
            creds.set(SMTP_PORT, &port)?;
        }
    }

    config.ensure_dirs()?;
    config.save()?;
    println!("Configuration saved to {}", Config::config_path()?.display());
    println!("\n{}", creds.debug_info());
    println!("Setup complete! Try: echo \"Can we meet Tuesday?\" | replywright generate");
    Ok(())
}

fn read_password() -> Result<String> {
    // Disable echo
    let _guard = DisableEcho::new()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;
    Ok(password.trim().to_string())
}

struct DisableEcho {
    #[cfg(unix)]
    original: libc::termios,
}

impl DisableEcho {
    #[cfg(unix)]
    fn new() -> Result<Self> {
        use std::mem::MaybeUninit;
        use std::os::unix::io::AsRawFd;

        let fd = std::io::stdin().as_raw_fd();
        let mut termios = MaybeUninit::<libc::termios>::uninit();

        unsafe {
            if libc::tcgetattr(fd, termios.as_mut_ptr()) != 0 {
                anyhow::bail!("Failed to get terminal attributes");
            }
            let original = termios.assume_init();
            let mut new = original;
            new.c_lflag &= !libc::ECHO;
            if libc::tcsetattr(fd, libc::TCSANOW, &new) != 0 {
                anyhow::bail!("Failed to set terminal attributes");
            }
            Ok(Self { original })
        }
    }

    #[cfg(not(unix))]
    fn new() -> Result<Self> {
        Ok(Self {})
    }
}

#[cfg(unix)]
impl Drop for DisableEcho {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        let fd = std::io::stdin().as_raw_fd();
        unsafe {
            libc::tcsetattr(fd, libc::TCSANOW, &self.original);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", e);
            print_usage();
            std::process::exit(1);
        }
    };

    match command {
        ParsedCommand::Help => {
            print_usage();
            Ok(())
        }
        ParsedCommand::Setup => run_setup().await,
        ParsedCommand::Models => {
            setup_logging();
            run_models().await
        }
        ParsedCommand::Generate(args) => {
            setup_logging();
            run_generate(args).await
        }
        ParsedCommand::Interactive(args) => {
            setup_logging();
            run_interactive(args).await
        }
        ParsedCommand::Send {
            generate,
            to,
            subject,
        } => {
            setup_logging();
            run_send(generate, to, subject).await
        }
    }
}
