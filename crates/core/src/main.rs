use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use rustyline::error::ReadlineError;
use snipgate_core::config::SnipgateCfg;
use snipgate_core::io::input::InputSender;
use snipgate_core::io::output::OutputReceiver;
use snipgate_core::runtime::{Dependencies, Service};
use snipgate_core::types::Destination;
use snipgate_llm::provider::{LlmProvider, OfflineProvider};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DB_CONNECT_TIMEOUT_SECS: u64 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing: write to file when RUST_LOG is set so the REPL stays readable
    if std::env::var("RUST_LOG").is_ok() {
        let path = std::env::var("SNIPGATE_LOG_FILE").unwrap_or_else(|_| "/tmp/snipgate.log".into());
        let file = std::fs::File::create(path)?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(fmt::layer().json().with_target(true).with_writer(file))
            .init();
    }

    // DATABASE_URL (optional: no DB = built-in defaults)
    let mut startup_notice: Option<String> = None;
    let pool = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let connect_result = tokio::time::timeout(
                Duration::from_secs(DB_CONNECT_TIMEOUT_SECS),
                sqlx::postgres::PgPoolOptions::new()
                    .max_connections(2)
                    .connect(&url),
            )
            .await;

            match connect_result {
                Ok(Ok(pool)) => match sqlx::migrate!("../../migrations").run(&pool).await {
                    Ok(()) => {
                        tracing::info!("database connected and migrations applied");
                        Some(pool)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "database migration failed, using default config");
                        startup_notice = Some("note: config migration failed, using defaults".into());
                        None
                    }
                },
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "database connection failed, using default config");
                    startup_notice = Some("note: could not connect to DATABASE_URL, using defaults".into());
                    None
                }
                Err(_) => {
                    tracing::warn!(timeout_secs = DB_CONNECT_TIMEOUT_SECS, "database connection timed out");
                    startup_notice = Some(format!(
                        "note: database connection timed out ({DB_CONNECT_TIMEOUT_SECS}s), using defaults"
                    ));
                    None
                }
            }
        }
        Err(_) => None,
    };

    let cfg = match pool {
        Some(ref pool) => SnipgateCfg::load(pool).await?,
        None => SnipgateCfg::default(),
    };
    let cfg = Arc::new(cfg.apply_env().sanitize());

    let llm: Arc<dyn LlmProvider> = match snipgate_llm::http::from_env() {
        Some(p) => Arc::new(p),
        None => {
            tracing::warn!("SNIPGATE_LLM_MODEL / SNIPGATE_LLM_API_KEY not set, running offline");
            Arc::new(OfflineProvider)
        }
    };
    if cfg.force_terminate_on_hard_timeout {
        tracing::warn!(
            hard_timeout_secs = cfg.watchdog_hard_timeout_secs,
            "force terminate enabled: an unattended snippet will stop this process"
        );
    }

    let deps = Dependencies::production(&cfg, llm);
    let (service, inbound_tx, output_rx) = Service::new(cfg, deps);
    let token = service.token();

    let service_fut = service.run();
    let repl_fut = run_repl(inbound_tx, output_rx, token.clone(), startup_notice);
    tokio::pin!(service_fut);
    tokio::pin!(repl_fut);

    tokio::select! {
        _ = &mut service_fut => {
            token.cancel();
            (&mut repl_fut).await
        }
        result = &mut repl_fut => {
            token.cancel();
            (&mut service_fut).await;
            result
        }
    }
}

async fn run_repl(
    inbound_tx: InputSender,
    mut output_rx: OutputReceiver,
    token: CancellationToken,
    startup_notice: Option<String>,
) -> anyhow::Result<()> {
    if let Some(notice) = startup_notice {
        println!("{notice}");
    }
    println!("commands: /channel <name>, /thread <name>, /q");

    let mut destination = Destination::new("local", "main");
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<InputEvent>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
    spawn_input_thread(line_tx, ready_rx);
    request_next_prompt(&ready_tx);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            line = line_rx.recv() => {
                let Some(line) = line else {
                    break;
                };
                match line {
                    InputEvent::Line(line) => {
                        let text = line.trim();
                        if matches!(text, "/q" | "/exit" | "/quit") {
                            break;
                        }
                        if let Some(name) = text.strip_prefix("/thread ") {
                            destination.thread = name.trim().to_owned();
                            println!("now in {destination}");
                        } else if let Some(name) = text.strip_prefix("/channel ") {
                            destination.channel = name.trim().to_owned();
                            println!("now in {destination}");
                        } else if !text.is_empty()
                            && snipgate_core::io::input::submit_text(&inbound_tx, destination.clone(), text)
                                .await
                                .is_err()
                        {
                            break;
                        }
                        request_next_prompt(&ready_tx);
                    }
                    InputEvent::Interrupted => {
                        token.cancel();
                        break;
                    }
                    InputEvent::Eof => break,
                    InputEvent::Error(err) => {
                        eprintln!("input error: {err}");
                        break;
                    }
                }
            }
            msg = output_rx.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                clear_current_line()?;
                println!("[{}] {}", msg.destination, msg.content);
            }
        }
    }
    drop(ready_tx);
    println!();
    Ok(())
}

fn clear_current_line() -> anyhow::Result<()> {
    print!("\r\x1b[2K");
    io::stdout().flush()?;
    Ok(())
}

fn request_next_prompt(ready_tx: &std::sync::mpsc::Sender<()>) {
    let _ = ready_tx.send(());
}

fn spawn_input_thread(line_tx: mpsc::UnboundedSender<InputEvent>, ready_rx: std::sync::mpsc::Receiver<()>) {
    std::thread::spawn(move || {
        let mut editor = match rustyline::DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                let _ = line_tx.send(InputEvent::Error(e.to_string()));
                return;
            }
        };

        while ready_rx.recv().is_ok() {
            match editor.readline("you> ") {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    if line_tx.send(InputEvent::Line(line)).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    let _ = line_tx.send(InputEvent::Interrupted);
                    break;
                }
                Err(ReadlineError::Eof) => {
                    let _ = line_tx.send(InputEvent::Eof);
                    break;
                }
                Err(e) => {
                    let _ = line_tx.send(InputEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    });
}

enum InputEvent {
    Line(String),
    Interrupted,
    Eof,
    Error(String),
}
