//! gf - command-line client for GradientFlow conversations

mod config;
mod ui;

use clap::Parser;
use gf_client::{ChatBackend, HttpBackend, SummaryBackend, SummaryRequest};
use gf_sync::{
    SummaryOutcome, Summarizer, SyncEngine, SyncEvent, describe_summary_error, summary_lines,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Messages sent to the summary endpoint at most
const SUMMARY_LINES: usize = 100;

/// Messages shown when neither --watch nor --summarize is given
const RECENT_MESSAGES: usize = 20;

/// gf - GradientFlow conversation client
#[derive(Parser, Debug)]
#[command(name = "gf")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend base URL (default: http://localhost:4000)
    #[arg(long)]
    api_base: Option<String>,

    /// Conversation to sync (default: global)
    #[arg(long)]
    conversation: Option<String>,

    /// Sign in with this email (password from GF_PASSWORD) and print the token
    #[arg(long)]
    login: Option<String>,

    /// Follow the conversation until Ctrl-C
    #[arg(short, long)]
    watch: bool,

    /// Post a message
    #[arg(short, long)]
    send: Option<String>,

    /// Message id the posted message replies to
    #[arg(long, requires = "send")]
    reply_to: Option<String>,

    /// Stream a summary of the recent conversation
    #[arg(long)]
    summarize: bool,

    /// Summary language (default: en)
    #[arg(short, long)]
    language: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "gf=debug,gf_sync=debug,gf_client=debug".into());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let mut config = config::Config::load();
    if let Some(api_base) = args.api_base.clone() {
        config.api_base = Some(api_base);
    }
    if let Some(conversation) = args.conversation.clone() {
        config.conversation_id = Some(conversation);
    }
    if let Some(language) = args.language.clone() {
        config.language = Some(language);
    }

    let mut backend = HttpBackend::new(config.api_base())?;
    if let Some(url) = config.summary_url.clone() {
        backend = backend.with_summary_url(url);
    }

    if let Some(email) = args.login.as_deref() {
        let password = std::env::var("GF_PASSWORD")
            .map_err(|_| anyhow::anyhow!("Set GF_PASSWORD to sign in"))?;
        let token = backend.login(email, &password).await?;
        println!("{}", token);
        return Ok(());
    }

    let Some(token) = config.token() else {
        anyhow::bail!("Not signed in. Run `gf --login <email>` or set GF_TOKEN.");
    };
    let backend = Arc::new(backend.with_token(token));

    let engine = Arc::new(SyncEngine::new(
        config.sync_config(),
        Arc::clone(&backend) as Arc<dyn ChatBackend>,
    ));
    if let Err(e) = engine.bootstrap().await {
        anyhow::bail!("Could not load the conversation: {}", e);
    }

    if let Some(text) = args.send.as_deref() {
        let message = engine.send_message(text, args.reply_to.clone()).await?;
        println!("{}", ui::format_message(&engine.snapshot(), &message));
    }

    if args.summarize {
        run_summary(&engine, backend, config.language()).await?;
    } else if args.watch {
        run_watch(&engine).await?;
    } else if args.send.is_none() {
        print_recent(&engine);
    }

    Ok(())
}

fn print_recent(engine: &SyncEngine) {
    let store = engine.snapshot();
    let skip = store.messages.len().saturating_sub(RECENT_MESSAGES);
    for message in &store.messages[skip..] {
        println!("{}", ui::format_message(&store, message));
    }
}

async fn run_watch(engine: &Arc<SyncEngine>) -> anyhow::Result<()> {
    let mut events = engine.subscribe();
    let tasks = engine.start_polling()?;

    let mut printer = ui::MessagePrinter::default();
    let store = engine.snapshot();
    if let Some(user) = store.current_user.as_ref() {
        eprintln!("Signed in as {}. Ctrl-C to stop.", user.display_name());
    }
    printer.print_new(&store, &store.messages);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SyncEvent::MessagesSynced { messages, new_users, .. }) => {
                    let store = engine.snapshot();
                    for user in &new_users {
                        eprintln!("* {} joined", user.display_name());
                    }
                    printer.print_new(&store, &messages);
                }
                Ok(SyncEvent::MessagePosted { message }) => {
                    printer.print_new(&engine.snapshot(), std::slice::from_ref(&message));
                }
                Ok(SyncEvent::TypingChanged { user_ids }) => {
                    if let Some(line) = ui::format_typing(&engine.snapshot(), &user_ids) {
                        eprintln!("{}", line);
                    }
                }
                Ok(event) if event.is_terminal() => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} sync events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.logout().await;
    tasks.join().await;
    Ok(())
}

async fn run_summary(
    engine: &SyncEngine,
    backend: Arc<HttpBackend>,
    language: &str,
) -> anyhow::Result<()> {
    let lines = summary_lines(&engine.snapshot(), SUMMARY_LINES);
    if lines.is_empty() {
        println!("Nothing to summarize.");
        return Ok(());
    }

    let summarizer = Arc::new(Summarizer::new(backend as Arc<dyn SummaryBackend>));
    let mut state_rx = summarizer.subscribe();
    let request = SummaryRequest::new(lines, language);
    let mut generation = tokio::spawn({
        let summarizer = Arc::clone(&summarizer);
        async move { summarizer.generate(request).await }
    });

    let mut printer = ui::SummaryPrinter::default();
    let result = loop {
        tokio::select! {
            result = &mut generation => break result?,
            changed = state_rx.changed() => {
                if changed.is_ok() {
                    let state = state_rx.borrow_and_update().clone();
                    printer.update(&state);
                }
            }
            _ = tokio::signal::ctrl_c() => summarizer.cancel(),
        }
    };

    printer.finish(&summarizer.state());
    match result {
        Ok(SummaryOutcome::Completed) => Ok(()),
        Ok(SummaryOutcome::Cancelled) => {
            eprintln!("Summary cancelled.");
            Ok(())
        }
        Err(e) => anyhow::bail!(describe_summary_error(&e)),
    }
}
