//! Atende - customer-support assistant chat client
//!
//! A line-oriented shell over the streaming session core: logs in, keeps
//! the backend availability probe running, streams each answer to the
//! terminal as it arrives, and submits ratings on finished answers.

mod auth;
mod config;
mod conversation;
mod feedback;
mod health;
mod protocol;
mod runtime;
mod session;
mod transport;

use auth::{AuthClient, AuthError};
use config::ChatConfig;
use conversation::{ConversationError, ExchangeId, FeedbackRating};
use feedback::FeedbackClient;
use health::{ConnectionStatus, HealthMonitor};
use protocol::SourceRef;
use runtime::{SessionError, SessionHandle, SessionRuntime, SessionUpdate};
use std::io::{BufRead, Write};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::HttpTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging. The conversation owns stdout, so logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atende=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = ChatConfig::from_env();
    tracing::info!(base_url = %config.base_url, "Starting assistant shell");

    let mut lines = stdin_lines();

    // Login. Credentials come from the environment when set, otherwise from
    // the terminal; prompted logins may retry, configured ones fail fast.
    let auth = AuthClient::new(
        &config.base_url,
        config.request_timeout,
        config.dev_login_fallback,
    );
    let token = match login(&auth, &mut lines).await? {
        Login::Done(token) => token,
        Login::Aborted => return Ok(()),
    };

    // Availability probe, process-wide and independent of any exchange.
    let probe_cancel = CancellationToken::new();
    let monitor = HealthMonitor::new(
        &config.base_url,
        config.probe_interval,
        config.request_timeout,
    );
    let status_rx = monitor.spawn(probe_cancel.clone());

    // Session runtime over the real transport and feedback sink.
    let transport = HttpTransport::new(&config.base_url, config.connect_timeout);
    let feedback = FeedbackClient::new(&config.base_url, config.request_timeout, token.clone());
    let (session_runtime, handle) =
        SessionRuntime::new(config.session_context(), transport, feedback, token);
    let runtime_task = tokio::spawn(session_runtime.run());

    println!("\n--- Assistente Virtual ---");
    println!("Digite 'sair' para terminar. Comandos: /up, /down, /cancelar, /historico");

    repl(&handle, &mut lines, status_rx).await;

    let _ = handle.shutdown().await;
    probe_cancel.cancel();
    runtime_task.await?;

    Ok(())
}

/// Outcome of the login dialogue.
enum Login {
    /// Authenticated; the token is absent on deployments without one.
    Done(Option<String>),
    /// The terminal closed before a successful login.
    Aborted,
}

async fn login(
    auth: &AuthClient,
    lines: &mut mpsc::Receiver<String>,
) -> Result<Login, AuthError> {
    let env_username = env_credential("ATENDE_USERNAME");
    let env_password = env_credential("ATENDE_PASSWORD");
    let configured = env_username.is_some() && env_password.is_some();

    loop {
        let (username, password) = match (&env_username, &env_password) {
            (Some(username), Some(password)) => (username.clone(), password.clone()),
            _ => {
                let Some(username) = ask(lines, "Usuário: ").await else {
                    return Ok(Login::Aborted);
                };
                let Some(password) = ask(lines, "Senha: ").await else {
                    return Ok(Login::Aborted);
                };
                (username, password)
            }
        };

        match auth.login(&username, &password).await {
            Ok(token) => {
                println!("Login realizado com sucesso.");
                return Ok(Login::Done(token));
            }
            Err(e) if configured => return Err(e),
            Err(e) => println!("Falha no login: {e}"),
        }
    }
}

/// Event loop of the shell: user lines, session updates, and probe flips,
/// all multiplexed so streamed tokens appear as they arrive.
async fn repl(
    handle: &SessionHandle,
    lines: &mut mpsc::Receiver<String>,
    mut status_rx: watch::Receiver<ConnectionStatus>,
) {
    let mut updates = handle.subscribe();
    let mut last_finished: Option<ExchangeId> = None;
    // Text printed incrementally for the in-flight answer; lets the shell
    // tell appended deltas apart from a wholesale replacement at the end.
    let mut live_text = String::new();

    prompt();
    loop {
        tokio::select! {
            maybe_line = lines.recv() => {
                let Some(line) = maybe_line else { break };
                if !handle_line(handle, line.trim(), last_finished, &mut live_text).await {
                    break;
                }
            }
            update = updates.recv() => {
                match update {
                    Ok(update) => render_update(update, &mut last_finished, &mut live_text),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Shell dropped session updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            changed = status_rx.changed() => {
                match changed {
                    Ok(()) => render_status(*status_rx.borrow_and_update()),
                    // The probe only stops at teardown
                    Err(_) => break,
                }
            }
        }
    }
}

/// React to one line of input. Returns `false` to leave the shell.
async fn handle_line(
    handle: &SessionHandle,
    line: &str,
    last_finished: Option<ExchangeId>,
    live_text: &mut String,
) -> bool {
    match line {
        "" => prompt(),
        "sair" => return false,
        "/up" => rate(handle, last_finished, FeedbackRating::Positive).await,
        "/down" => rate(handle, last_finished, FeedbackRating::Negative).await,
        "/cancelar" => {
            if handle.cancel_active().await.is_err() {
                return false;
            }
        }
        "/historico" => show_history(handle).await,
        question => match handle.submit(question).await {
            Ok(_) => live_text.clear(),
            Err(SessionError::Conversation(ConversationError::ExchangeInFlight(_))) => {
                println!("Aguarde a resposta atual terminar.");
            }
            Err(e) => {
                println!("Sessão encerrada: {e}");
                return false;
            }
        },
    }
    true
}

async fn rate(handle: &SessionHandle, target: Option<ExchangeId>, rating: FeedbackRating) {
    let Some(id) = target else {
        println!("Nenhuma resposta para avaliar.");
        prompt();
        return;
    };
    match handle.submit_feedback(id, rating).await {
        // Confirmation arrives as a session update once the server accepts
        Ok(()) => println!("Avaliação enviada."),
        Err(SessionError::Conversation(ConversationError::FeedbackAlreadySet(_))) => {
            println!("Esta resposta já foi avaliada.");
            prompt();
        }
        Err(e) => {
            println!("Não foi possível avaliar: {e}");
            prompt();
        }
    }
}

async fn show_history(handle: &SessionHandle) {
    match handle.snapshot().await {
        Ok(exchanges) if exchanges.is_empty() => println!("Nenhuma conversa ainda."),
        Ok(exchanges) => {
            for exchange in exchanges {
                println!("\nVocê: {}", exchange.user_text);
                if exchange.is_terminal() {
                    println!("Assistente: {}", exchange.assistant_text);
                } else {
                    println!("Assistente: {} …", exchange.assistant_text);
                }
            }
        }
        Err(e) => println!("Não foi possível carregar o histórico: {e}"),
    }
    prompt();
}

fn render_update(
    update: SessionUpdate,
    last_finished: &mut Option<ExchangeId>,
    live_text: &mut String,
) {
    match update {
        SessionUpdate::ExchangeStarted { .. } => {
            print!("Assistente: ");
            flush_stdout();
        }
        SessionUpdate::AssistantDelta { delta, .. } => {
            live_text.push_str(&delta);
            print!("{delta}");
            flush_stdout();
        }
        // Sources are printed with the finished answer
        SessionUpdate::SourcesUpdated { .. } => {}
        SessionUpdate::ExchangeFinished { exchange } => {
            // Replaced text (full answer, error message) never went out as
            // deltas; print it whole.
            if exchange.assistant_text != *live_text {
                if !live_text.is_empty() {
                    println!();
                }
                print!("{}", exchange.assistant_text);
            }
            println!();
            print_sources(&exchange.sources);
            *last_finished = Some(exchange.id);
            println!("(avalie com /up ou /down)");
            prompt();
        }
        SessionUpdate::FeedbackRecorded { rating, .. } => {
            let label = match rating {
                FeedbackRating::Positive => "positiva",
                FeedbackRating::Negative => "negativa",
            };
            println!("Avaliação {label} registrada. Obrigado!");
            prompt();
        }
    }
}

fn render_status(status: ConnectionStatus) {
    match status {
        ConnectionStatus::Online => println!("[Conectado]"),
        ConnectionStatus::Offline => println!("[Desconectado]"),
        ConnectionStatus::Unknown => {}
    }
}

fn print_sources(sources: &[SourceRef]) {
    if sources.is_empty() {
        return;
    }
    println!("--- Fontes ---");
    for source in sources {
        println!("- Título: {}, Arquivo: {}", source.title, source.source_file);
    }
}

fn prompt() {
    print!("\nSua pergunta: ");
    flush_stdout();
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}

fn env_credential(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Terminal input on a dedicated thread, delivered as whole lines so the
/// async side never blocks on the terminal.
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn ask(lines: &mut mpsc::Receiver<String>, question: &str) -> Option<String> {
    print!("{question}");
    flush_stdout();
    lines.recv().await.map(|line| line.trim().to_string())
}
