#![allow(clippy::manual_unwrap_or_default)]
#![allow(clippy::manual_unwrap_or)]
use sidestream::background;
use sidestream::blocking::{send_blocking, validate_api_key};
use sidestream::config::{Command, PromptKind};
use sidestream::logging::{init_tracing, setup_panic_hook};
use sidestream::prompts::PendingAction;
use sidestream::server::router;
use sidestream::terminal::{stream_turn, Turn};
use sidestream::*;

use clap::Parser;
use colored::Colorize;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let _guard = init_tracing(&args);
    setup_panic_hook();

    let code = match run(&args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("{} {}", "error:".red().bold(), e.inner);
            1
        }
    };
    std::process::exit(code);
}

async fn run(args: &Args) -> Result<i32> {
    match &args.command {
        Command::Serve { host, port } => serve(args, host, *port).await,
        Command::Chat { message } => chat(args, message, message).await,
        Command::Prompt {
            kind,
            text,
            target_language,
        } => {
            let action = match kind {
                PromptKind::Summary => PendingAction::Summary { text: text.clone() },
                PromptKind::Chat => PendingAction::Chat { text: text.clone() },
                PromptKind::Translate => PendingAction::Translate {
                    text: text.clone(),
                    target_language: target_language.clone(),
                },
            };
            chat(args, &action.display_text(), &action.prompt()).await
        }
        Command::Ask { message } => {
            let client = args.blocking_client()?;
            let answer = send_blocking(
                &client,
                args.endpoint()?,
                args.api_key()?,
                message,
                &args.principal,
            )
            .await?;
            println!("{}", answer);
            Ok(0)
        }
        Command::Validate => {
            let client = args.blocking_client()?;
            let validation =
                validate_api_key(&client, args.endpoint()?, args.api_key()?, &args.principal)
                    .await;
            if validation.valid {
                println!("{} {}", "ok:".green().bold(), validation.message);
                Ok(0)
            } else {
                println!("{} {}", "invalid:".red().bold(), validation.message);
                Ok(2)
            }
        }
    }
}

async fn chat(args: &Args, display: &str, prompt: &str) -> Result<i32> {
    let endpoint = args.endpoint()?;
    let api_key = args.api_key()?;
    let handle = background::spawn(args.streaming_client()?, args.background_settings());

    eprintln!("{} {}", "you:".cyan().bold(), display);
    let mut stdout = std::io::stdout();
    let turn = Turn {
        endpoint,
        api_key,
        display,
        prompt,
    };
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let result = stream_turn(&handle, turn, &mut stdout, interrupt).await?;
    match result.error {
        Some(reason) => {
            eprintln!("{} {}", "stream ended:".yellow().bold(), reason);
            Ok(1)
        }
        None => Ok(0),
    }
}

async fn serve(args: &Args, host: &str, port: u16) -> Result<i32> {
    let handle = background::spawn(args.streaming_client()?, args.background_settings());
    let app = router(handle);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Sidestream listening on {}", addr);

    use futures_util::FutureExt;
    let server_future = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutdown requested");
            })
            .await
    };

    match std::panic::AssertUnwindSafe(server_future)
        .catch_unwind()
        .await
    {
        Ok(result) => {
            result?;
            Ok(0)
        }
        Err(panic_payload) => {
            let message = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                *s
            } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                s.as_str()
            } else {
                "Unknown panic"
            };
            tracing::error!(target: "panic", "CRITICAL: Server task panicked: {}", message);
            Ok(1)
        }
    }
}
