mod cli;
mod render;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use client_core::chat::{ChatSession, SendOutcome};
use client_core::config::{ClientConfig, load_dotenv};
use client_core::credentials::{CredentialStore, FileCredentialStore};
use client_core::models::{ScanJobResult, ScanJobStatus};
use client_core::scan::{PollOptions, ScanClient, ScanJobPoller, ScanUpload};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use cli::{ChatInput, CliError, CliOptions, Command};
use render::ReplyPrinter;

#[tokio::main]
async fn main() {
    let options = match CliOptions::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(CliError::HelpRequested) => {
            print_usage();
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!();
            print_usage();
            std::process::exit(2);
        }
    };

    if let Err(err) = load_dotenv() {
        eprintln!("{err}");
        std::process::exit(1);
    }
    init_tracing();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load client config");
            std::process::exit(1);
        }
    };
    let credentials: Arc<dyn CredentialStore> =
        Arc::new(FileCredentialStore::new(config.credentials_path.clone()));
    info!(
        api_base_url = %config.api_base_url,
        credentials_path = %config.credentials_path.display(),
        "skin consultant starting"
    );

    let exit_code = match options.command {
        Command::Chat => run_chat(&config, credentials).await,
        Command::Scan { image_path } => run_scan(&config, credentials, &image_path).await,
        Command::SetApiKey { key } => update_api_key(&config, credentials, Some(&key)).await,
        Command::ClearApiKey => update_api_key(&config, credentials, None).await,
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "skin_consultant=info,client_core=info".to_string());
    let json = std::env::var("SKIN_LOG_FORMAT")
        .map(|format| format.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .init();
    } else {
        builder.init();
    }
}

async fn run_chat(config: &ClientConfig, credentials: Arc<dyn CredentialStore>) -> i32 {
    let session = match ChatSession::new(config, credentials) {
        Ok(session) => session,
        Err(err) => {
            error!(error = %err, "failed to build chat session");
            return 1;
        }
    };
    session.initialize().await;

    for message in session.messages() {
        println!("consultant> {}", message.content);
    }
    println!("(type /reset to start over, /quit to exit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        flush_stdout();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!(error = %err, "failed to read from stdin");
                return 1;
            }
        };

        match ChatInput::parse(&line) {
            ChatInput::Blank => continue,
            ChatInput::Quit => break,
            ChatInput::Reset => {
                if !session.reset() {
                    warn!("conversation reset refused while a reply is streaming");
                    continue;
                }
                if let Some(welcome) = session.messages().first() {
                    println!("consultant> {}", welcome.content);
                }
            }
            ChatInput::Message(text) => {
                let outcome = send_and_render(&session, text).await;
                if outcome == SendOutcome::Failed {
                    info!("chat reply failed; the server may be unreachable");
                }
            }
        }
    }

    0
}

async fn send_and_render(session: &ChatSession, text: &str) -> SendOutcome {
    let mut updates = session.subscribe();
    let mut printer = ReplyPrinter::resume(&updates.borrow_and_update());

    print!("consultant> ");
    let send = session.send_message(text, None);
    tokio::pin!(send);

    let outcome = loop {
        tokio::select! {
            outcome = &mut send => break outcome,
            Ok(()) = updates.changed() => {
                let snapshot = updates.borrow_and_update().clone();
                print!("{}", printer.render(&snapshot));
                flush_stdout();
            }
        }
    };

    match outcome {
        SendOutcome::Ignored => println!(),
        SendOutcome::Busy => println!("(still answering the previous message)"),
        SendOutcome::Completed | SendOutcome::Failed => {
            println!("{}", printer.render(&session.messages()));
        }
    }
    outcome
}

fn flush_stdout() {
    if let Err(err) = std::io::stdout().flush() {
        debug!(error = %err, "failed to flush stdout");
    }
}

async fn run_scan(
    config: &ClientConfig,
    credentials: Arc<dyn CredentialStore>,
    image_path: &Path,
) -> i32 {
    let client = match ScanClient::new(config, credentials) {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "failed to build scan client");
            return 1;
        }
    };
    let poller = ScanJobPoller::new(client);

    let upload = match ScanUpload::from_path(image_path).await {
        Ok(upload) => upload,
        Err(err) => {
            eprintln!("error: {err}");
            return 1;
        }
    };

    let mut last_status = None;
    let mut report = |status: ScanJobStatus| {
        if last_status != Some(status) {
            println!("scan status: {}", status.as_str());
            last_status = Some(status);
        }
    };

    match poller
        .scan_and_wait(upload, PollOptions::from_config(config), Some(&mut report))
        .await
    {
        Ok(result) => {
            print_scan_result(&result);
            if result.status == ScanJobStatus::Failed { 1 } else { 0 }
        }
        Err(err) => {
            eprintln!("scan failed: {err}");
            1
        }
    }
}

fn print_scan_result(result: &ScanJobResult) {
    println!("job {}: {}", result.job_id, result.status.as_str());

    if let Some(extraction) = &result.extraction {
        println!(
            "  product:     {}",
            extraction.product_name.as_deref().unwrap_or("-")
        );
        println!("  brand:       {}", extraction.brand.as_deref().unwrap_or("-"));
        println!(
            "  category:    {}",
            extraction.category.as_deref().unwrap_or("-")
        );
        println!("  confidence:  {:.2}", extraction.confidence_score);
        if !extraction.ingredients_parsed.is_empty() {
            println!("  ingredients: {}", extraction.ingredients_parsed.join(", "));
        }
        if let Some(notes) = &extraction.extraction_notes {
            println!("  notes:       {notes}");
        }
    }
    if let Some(reason) = &result.error_message {
        println!("  error:       {reason}");
    }
    if result.needs_manual_review {
        println!("  this product needs manual review");
    }
}

async fn update_api_key(
    config: &ClientConfig,
    credentials: Arc<dyn CredentialStore>,
    key: Option<&str>,
) -> i32 {
    let session = match ChatSession::new(config, credentials) {
        Ok(session) => session,
        Err(err) => {
            error!(error = %err, "failed to build chat session");
            return 1;
        }
    };

    let result = match key {
        Some(key) => session.set_api_key(key).await,
        None => session.clear_api_key().await,
    };
    match result {
        Ok(()) => {
            println!("api key {}", if key.is_some() { "saved" } else { "cleared" });
            0
        }
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    }
}

fn print_usage() {
    eprintln!(
        "Usage: skin-consultant <command>\n\
         \n\
         Commands:\n\
         - chat                 Talk to the AI skin consultant\n\
         - scan <image-path>    Upload a product label photo and wait for extraction\n\
         - set-api-key <key>    Store a personal API key sent with chat requests\n\
         - clear-api-key        Remove the stored API key\n\
         \n\
         Environment:\n\
         - SKIN_API_BASE_URL    Backend base url (default http://127.0.0.1:8000)\n\
         - SKIN_LOG_FORMAT=json Emit logs as JSON"
    );
}
