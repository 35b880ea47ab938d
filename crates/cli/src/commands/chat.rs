//! `turnledger chat` — Interactive or single-message chat mode.

use std::io::Write;
use std::path::PathBuf;

use tokio::io::{self, AsyncBufReadExt, BufReader};
use turnledger_agent::{ChatAgent, Reply, TranscriptStore};
use turnledger_config::AppConfig;
use turnledger_core::{Ledger, Role, SessionId};

/// Words that end the interactive loop.
const EXIT_WORDS: &[&str] = &["exit", "quit", "salir", "/exit", "/quit", ":q"];

/// Command-line overrides for a chat run.
#[derive(Debug, Default)]
pub struct ChatArgs {
    pub message: Option<String>,
    pub max_turns: Option<usize>,
    pub system: Option<String>,
    pub stream: bool,
    pub transcript: Option<PathBuf>,
    pub session: Option<String>,
}

impl ChatArgs {
    /// Fold the overrides into the loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(max_turns) = self.max_turns {
            config.ledger.max_turns = max_turns;
        }
        if let Some(system) = &self.system {
            config.ledger.system_prompt = system.clone();
        }
        if self.stream {
            config.chat.stream = true;
        }
        if let Some(path) = &self.transcript {
            config.chat.transcript = Some(path.clone());
        } else if let Some(id) = &self.session {
            let store = TranscriptStore::for_session(&AppConfig::transcripts_dir(), &SessionId::from(id));
            config.chat.transcript = Some(store.path().to_path_buf());
        }
    }
}

/// What a line typed at the prompt asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Exit,
    Reset,
    History,
    Message(&'a str),
    Blank,
}

pub fn classify(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Blank;
    }
    if EXIT_WORDS.iter().any(|w| line.eq_ignore_ascii_case(w)) {
        return Input::Exit;
    }
    match line {
        "/reset" | "/clear" => Input::Reset,
        "/history" => Input::History,
        _ => Input::Message(line),
    }
}

pub async fn run(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    args.apply(&mut config);
    config.validate()?;

    // Check for API key early — give a clear error
    if !config.has_api_key() && config.default_provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    GROQ_API_KEY        = 'gsk_...'   (default provider)");
        eprintln!("    OPENAI_API_KEY      = 'sk-...'    (with TURNLEDGER_PROVIDER=openai)");
        eprintln!("    TURNLEDGER_API_KEY  = '...'       (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_path().display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = turnledger_providers::build_from_config(&config);
    let model = turnledger_providers::resolve_model(&config);
    let agent = ChatAgent::from_config(provider, model, &config);

    let store = config.chat.transcript.clone().map(TranscriptStore::new);
    let mut ledger = match &store {
        Some(store) => store.load_or_new(&config.ledger)?,
        None => config.ledger.build()?,
    };

    if let Some(msg) = args.message {
        // Single message mode
        let reply = exchange(&agent, &mut ledger, &msg, config.chat.stream).await?;
        if !config.chat.stream {
            println!("{}", reply.content);
        }
        save(store.as_ref(), &ledger);
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        turnledger — Interactive Chat         ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Provider:  {}", agent.provider_name());
    println!("  Model:     {}", agent.model());
    println!("  Window:    last {} turns", ledger.max_turns());
    if let Some(store) = &store {
        println!(
            "  Transcript: {} ({} turns restored)",
            store.path().display(),
            ledger.turn_count()
        );
    }
    println!();
    println!("  Type your message and press Enter.");
    println!("  /history shows the retained conversation, /reset clears it.");
    println!("  Type 'exit' or 'salir' to quit.");
    println!();

    let mut lines = BufReader::new(io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        match classify(&line) {
            Input::Blank => continue,
            Input::Exit => break,
            Input::Reset => {
                ledger.reset();
                save(store.as_ref(), &ledger);
                println!("  [Conversation cleared]");
                println!();
            }
            Input::History => print_history(&ledger),
            Input::Message(text) => {
                let outcome = tokio::select! {
                    result = exchange(&agent, &mut ledger, text, config.chat.stream) => Some(result),
                    _ = tokio::signal::ctrl_c() => None,
                };

                match outcome {
                    Some(Ok(reply)) => {
                        if !config.chat.stream {
                            println!();
                            for line in reply.content.lines() {
                                println!("  Assistant > {line}");
                            }
                        }
                        if reply.evicted_turns > 0 {
                            println!("  [{} old turn(s) dropped from memory]", reply.evicted_turns);
                        }
                        println!();
                        save(store.as_ref(), &ledger);
                    }
                    Some(Err(e)) => {
                        eprintln!("  [Error] {e}");
                        println!();
                    }
                    None => {
                        eprintln!();
                        eprintln!("  [Cancelled]");
                        println!();
                    }
                }
            }
        }
    }

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}

/// Run one exchange, printing streamed deltas as they arrive.
async fn exchange(
    agent: &ChatAgent,
    ledger: &mut Ledger,
    text: &str,
    stream: bool,
) -> turnledger_core::Result<Reply> {
    if !stream {
        return agent.ask(ledger, text).await;
    }

    print!("\n  Assistant > ");
    let _ = std::io::stdout().flush();
    let reply = agent
        .ask_streaming(ledger, text, |delta| {
            print!("{}", delta.replace('\n', "\n              "));
            let _ = std::io::stdout().flush();
        })
        .await;
    println!();
    reply
}

fn print_history(ledger: &Ledger) {
    println!();
    for msg in ledger.snapshot() {
        let label = match msg.role() {
            Role::System => "System",
            Role::User => "You",
            Role::Assistant => "Assistant",
        };
        println!("  #{:<3} {label:>9} > {}", msg.ordinal(), msg.content());
    }
    println!(
        "  ({} of {} turns, ~{} tokens)",
        ledger.turn_count(),
        ledger.max_turns(),
        ledger.estimated_tokens()
    );
    println!();
}

fn save(store: Option<&TranscriptStore>, ledger: &Ledger) {
    if let Some(store) = store {
        if let Err(e) = store.save(ledger) {
            tracing::warn!(error = %e, path = %store.path().display(), "Failed to save transcript");
        }
    }
}
