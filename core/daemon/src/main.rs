//! termlens daemon entrypoint.
//!
//! A small, single-writer service that owns the tracking engine: a socket
//! listener with strict request validation, per-connection worker threads,
//! and a periodic persist timer. The terminal renderer connects as a
//! client and forwards demultiplexed control-channel payloads; reporting
//! UIs connect to query records and statistics.

use clap::Parser;
use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use serde_json::Value;
use termlens_core::{
    LensEngine, LogNotifier, NotifyConfig, OutputStream, QueryFilter, TerminalDescriptor,
};
use termlens_protocol::{
    parse_close, parse_event, parse_output, parse_terminal, ErrorInfo, Method, Request, Response,
    StreamKind, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Parser)]
#[command(name = "termlens-daemon", about = "termlens command-tracking daemon")]
struct Args {
    /// Data directory (default: ~/.termlens)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Socket path (default: <data-dir>/daemon.sock)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Seconds between periodic snapshot writes
    #[arg(long, default_value_t = 30)]
    persist_interval_secs: u64,
}

fn main() {
    init_logging();
    let args = Args::parse();

    let data_dir = match args.data_dir.or_else(default_data_dir) {
        Some(dir) => dir,
        None => {
            error!("Failed to resolve data directory (no home directory?)");
            std::process::exit(1);
        }
    };
    if let Err(err) = fs::create_dir_all(&data_dir) {
        error!(error = %err, "Failed to create data directory");
        std::process::exit(1);
    }

    let socket_path = args.socket.unwrap_or_else(|| data_dir.join(SOCKET_NAME));
    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }
    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    let engine = Arc::new(LensEngine::new(
        &data_dir,
        NotifyConfig::default(),
        Arc::new(LogNotifier),
    ));
    let _persister = engine
        .hub()
        .spawn_persister(Duration::from_secs(args.persist_interval_secs.max(1)));

    info!(
        path = %socket_path.display(),
        data_dir = %data_dir.display(),
        "termlens daemon started"
    );

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let engine = Arc::clone(&engine);
                thread::spawn(|| handle_connection(stream, engine));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("TERMLENS_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn default_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".termlens"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, engine: Arc<LensEngine>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, engine);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, engine: Arc<LensEngine>) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => Response::ok(
            request.id,
            serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "terminals": engine.terminal_count(),
                "records": engine.hub().len(),
            }),
        ),
        Method::RegisterTerminal => {
            let params = match require_params(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            let spec = match parse_terminal(params) {
                Ok(spec) => spec,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            engine.register_terminal(TerminalDescriptor {
                terminal_id: spec.terminal_id,
                label: spec.label,
                window_id: spec.window_id,
                window_index: spec.window_index,
                window_title: spec.window_title,
                session_id: spec.session_id,
                shell: spec.shell,
            });
            Response::ok(request.id, serde_json::json!({"registered": true}))
        }
        Method::CloseTerminal => {
            let params = match require_params(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            let close = match parse_close(params) {
                Ok(close) => close,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            let removed = engine.close_terminal(&close.terminal_id);
            Response::ok(request.id, serde_json::json!({"closed": removed}))
        }
        Method::Event => {
            let params = match require_params(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            let event = match parse_event(params) {
                Ok(event) => event,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match engine.handle_event(
                &event.terminal_id,
                event.channel,
                &event.payload,
                event.cursor_row,
                event.screen.as_deref(),
            ) {
                Ok(handled) => Response::ok(
                    request.id,
                    serde_json::json!({"accepted": true, "handled": handled}),
                ),
                Err(err) => Response::error(request.id, "unknown_terminal", err.to_string()),
            }
        }
        Method::Output => {
            let params = match require_params(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            let chunk = match parse_output(params) {
                Ok(chunk) => chunk,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            let stream = match chunk.stream {
                StreamKind::Stdout => OutputStream::Stdout,
                StreamKind::Stderr => OutputStream::Stderr,
            };
            match engine.record_output(&chunk.terminal_id, stream, &chunk.data) {
                Ok(()) => Response::ok(request.id, serde_json::json!({"accepted": true})),
                Err(err) => Response::error(request.id, "unknown_terminal", err.to_string()),
            }
        }
        Method::GetExecutions => {
            let filter = match request.params {
                Some(params) => match serde_json::from_value::<QueryFilter>(params) {
                    Ok(filter) => filter,
                    Err(err) => {
                        return Response::error(
                            request.id,
                            "invalid_params",
                            format!("query filter is invalid: {}", err),
                        )
                    }
                },
                None => QueryFilter::default(),
            };
            let records = engine.query(&filter);
            match serde_json::to_value(&records) {
                Ok(value) => Response::ok(request.id, value),
                Err(err) => Response::error(
                    request.id,
                    "serialization_error",
                    format!("Failed to serialize executions: {}", err),
                ),
            }
        }
        Method::GetStatistics => {
            let stats = engine.statistics();
            let value = serde_json::json!({
                "global": stats.global,
                "by_terminal": stats.by_terminal.iter().collect::<Vec<_>>(),
                "by_executor": stats.by_executor.iter().collect::<Vec<_>>(),
                "by_category": stats.by_category.iter().collect::<Vec<_>>(),
            });
            Response::ok(request.id, value)
        }
        Method::Clear => {
            engine.clear();
            Response::ok(request.id, serde_json::json!({"cleared": true}))
        }
    }
}

fn require_params(params: Option<Value>) -> Result<Value, ErrorInfo> {
    params.ok_or_else(|| ErrorInfo::new("invalid_params", "params are required"))
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
