use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use parley_stream::{DispatchOutcome, DispatchReport, StreamConsumer, decode_messages};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tracing_subscriber::EnvFilter;

use parley_client::{ChatService, ClientError, ClientResult, ClientSettings, ReplyBuffer};

#[derive(Debug, Parser)]
#[command(name = "parley", about = "Chat service client and reply stream decoder")]
struct Cli {
    /// Settings file; defaults to the user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// GraphQL endpoint, overriding the settings file.
    #[arg(long, global = true, env = "PARLEY_GRAPHQL_ENDPOINT")]
    endpoint: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the service answers.
    Ping,
    /// Send a message and print the reply.
    Send { message: String },
    /// Send a message to the streaming endpoint; Ctrl-C stops the reply.
    Stream { message: String },
    /// Run a newline-delimited reply from a file or stdin through the decoder.
    Decode {
        path: Option<PathBuf>,
        /// Print the valid messages back out instead of the reply text.
        #[arg(long)]
        echo: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(error) => {
            eprintln!("{}", error.user_message(true));
            return ExitCode::FAILURE;
        }
    };

    let details = settings.error_details;
    match run(cli.command, settings).await {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(error = %error, "command failed");
            eprintln!("{}", error.user_message(details));
            ExitCode::FAILURE
        }
    }
}

fn load_settings(cli: &Cli) -> ClientResult<ClientSettings> {
    let settings = ClientSettings::load(cli.config.as_deref())?;
    Ok(match &cli.endpoint {
        Some(endpoint) => settings.with_graphql_endpoint(endpoint.clone()),
        None => settings,
    })
}

async fn run(command: Command, settings: ClientSettings) -> ClientResult<ExitCode> {
    match command {
        Command::Ping => {
            let service = ChatService::new(settings)?;
            let greeting = service.test_connection().await?;
            println!("{greeting}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Send { message } => {
            let mut service = ChatService::new(settings)?;
            send(&mut service, &message).await
        }
        Command::Stream { message } => {
            let mut service = ChatService::new(settings)?;
            stream(&mut service, &message).await
        }
        Command::Decode { path, echo } => decode(path, echo).await,
    }
}

async fn send(service: &mut ChatService, message: &str) -> ClientResult<ExitCode> {
    let response = service.send_message(message).await?;
    if !response.success {
        eprintln!(
            "{}",
            response
                .error
                .as_deref()
                .unwrap_or("the service could not answer this message")
        );
        return Ok(ExitCode::FAILURE);
    }

    let mut reply = ReplyBuffer::echoing(std::io::stdout());
    if let Some(report) = response.replay_stream(&mut reply) {
        println!();
        return Ok(exit_code(&report));
    }
    if let Some(text) = response.reply_text() {
        println!("{text}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn stream(service: &mut ChatService, message: &str) -> ClientResult<ExitCode> {
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling reply stream");
            let _ = cancel_tx.send(());
        } else {
            // Keep the sender alive; dropping it would cancel the stream.
            std::future::pending::<()>().await;
        }
    });

    let mut reply = ReplyBuffer::echoing(std::io::stdout());
    let report = service.stream_message(message, &mut reply, cancel_rx).await;
    interrupt.abort();

    let report = report?;
    println!();
    if let Some(id) = service.current_session_id() {
        tracing::debug!(session_id = %id, "reply stream finished");
    }
    Ok(exit_code(&report))
}

async fn decode(path: Option<PathBuf>, echo: bool) -> ClientResult<ExitCode> {
    let (label, reader) = open_input(path).await?;
    let chunks = ReaderStream::new(reader);
    tracing::debug!(input = %label, echo, "decoding reply stream");

    if echo {
        let mut stdout = tokio::io::stdout();
        let mut messages = std::pin::pin!(decode_messages(chunks));
        while let Some(message) = messages.next().await {
            let message = message.map_err(|source| ClientError::Stream {
                stage: "decode-input",
                source,
            })?;
            if let Err(error) = stdout.write_all(message.to_line().as_bytes()).await {
                tracing::warn!(error = %error, "stdout closed, stopping decode");
                break;
            }
        }
        let _ = stdout.flush().await;
        return Ok(ExitCode::SUCCESS);
    }

    let mut reply = ReplyBuffer::echoing(std::io::stdout());
    let report = StreamConsumer::new(&mut reply).run(chunks).await;
    println!();
    eprintln!(
        "{} messages ({} content), {} malformed, {} trailing bytes discarded",
        report.dispatched.total(),
        report.dispatched.content,
        report.malformed,
        report.discarded_bytes,
    );
    for error in reply.errors() {
        eprintln!("error: {error}");
    }
    Ok(exit_code(&report))
}

async fn open_input(
    path: Option<PathBuf>,
) -> ClientResult<(String, Box<dyn AsyncRead + Unpin + Send>)> {
    let Some(path) = path else {
        return Ok(("<stdin>".to_string(), Box::new(tokio::io::stdin())));
    };

    let label = path.display().to_string();
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|source| ClientError::ReadInput {
            stage: "open-input",
            path: label.clone(),
            source,
        })?;
    Ok((label, Box::new(file)))
}

fn exit_code(report: &DispatchReport) -> ExitCode {
    match &report.outcome {
        DispatchOutcome::Completed => ExitCode::SUCCESS,
        DispatchOutcome::Cancelled => ExitCode::from(130),
        DispatchOutcome::Failed(error) => {
            eprintln!("reply stream failed: {error}");
            ExitCode::FAILURE
        }
    }
}
