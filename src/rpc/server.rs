//! Stdio server loop.
//!
//! Threads:
//! - reader: turns input lines into [`Incoming`] messages
//! - dispatcher (the caller of [`Server::run`]): queues each request, then
//!   waits for it on a short-lived thread
//! - forwarder: relays [`crate::session::PhaseEvent`]s as `phase` messages
//! - writer: the only thread touching the output stream

use super::protocol::{RpcRequest, ServerMessage};
use crate::backend::{self, Backend, Pending};
use crate::envelope::ResultEnvelope;
use serde_json::Value;
use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

enum Incoming {
    Line(String),
    Eof,
    Shutdown,
}

/// Stops a running server as if its input had closed. Safe to call from a
/// signal handler thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Sender<Incoming>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(Incoming::Shutdown);
    }
}

pub struct Server {
    backend: Backend,
    tx: Sender<Incoming>,
    rx: Receiver<Incoming>,
}

impl Server {
    pub fn new(backend: Backend) -> Self {
        let (tx, rx) = mpsc::channel();
        Self { backend, tx, rx }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.tx.clone(),
        }
    }

    /// Serve until the input closes or a shutdown is requested, then let
    /// in-flight requests finish and tear the backend down.
    pub fn run<R, W>(self, input: R, output: W) -> crate::Result<()>
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        let Server { backend, tx, rx } = self;

        let (out_tx, out_rx) = mpsc::channel::<ServerMessage>();
        let writer = spawn("deckwarden-writer", move || write_messages(output, out_rx))?;

        let session = backend.session();
        let _ = out_tx.send(ServerMessage::Ready {
            version: crate::VERSION.to_string(),
            phase: session.phase(),
            user_email: session.user_email().map(str::to_string),
        });

        let events = backend.subscribe();
        let forwarder = {
            let out_tx = out_tx.clone();
            spawn("deckwarden-events", move || {
                for event in events {
                    if out_tx.send(ServerMessage::Phase(event)).is_err() {
                        break;
                    }
                }
            })?
        };

        // Not joined: it may stay blocked on a read after a signal.
        spawn("deckwarden-reader", move || read_lines(input, tx))?;

        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
        for incoming in rx.iter() {
            match incoming {
                Incoming::Line(line) => {
                    in_flight.retain(|handle| !handle.is_finished());
                    // Queue here so session requests keep their arrival order.
                    let (id, pending) = dispatch(&backend, &line);
                    let out_tx = out_tx.clone();
                    in_flight.push(spawn("deckwarden-request", move || {
                        let envelope = pending.envelope();
                        let _ = out_tx.send(ServerMessage::Result { id, envelope });
                    })?);
                }
                Incoming::Eof => {
                    tracing::info!("input closed, shutting down");
                    break;
                }
                Incoming::Shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
            }
        }

        for handle in in_flight {
            if handle.join().is_err() {
                tracing::error!("request thread panicked");
            }
        }
        backend.teardown();

        // The forwarder ends once the backend's event senders are gone.
        let _ = forwarder.join();
        drop(out_tx);
        match writer.join() {
            Ok(result) => result.map_err(crate::Error::from),
            Err(_) => Err(crate::Error::Other("output writer panicked".to_string())),
        }
    }
}

fn spawn<F, T>(name: &str, f: F) -> std::io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(f)
}

fn read_lines<R: BufRead>(input: R, tx: Sender<Incoming>) {
    for line in input.lines() {
        match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => {
                if tx.send(Incoming::Line(line)).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read request");
                break;
            }
        }
    }
    let _ = tx.send(Incoming::Eof);
}

fn write_messages<W: Write>(mut output: W, rx: Receiver<ServerMessage>) -> std::io::Result<()> {
    for message in rx {
        let line = serde_json::to_string(&message)?;
        writeln!(output, "{}", line)?;
        output.flush()?;
    }
    Ok(())
}

fn dispatch(backend: &Backend, line: &str) -> (Value, Pending<ResultEnvelope<Value>>) {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable request line");
            return (Value::Null, rejected(format!("invalid request: {}", e)));
        }
    };
    let id = request.id.clone();
    match request.into_request() {
        Ok(request) => {
            tracing::debug!(operation = %request.operation(), "dispatching request");
            (id, backend.submit(request))
        }
        Err(message) => {
            tracing::warn!(%message, "rejected request");
            (id, rejected(message))
        }
    }
}

fn rejected(message: String) -> Pending<ResultEnvelope<Value>> {
    Pending::deferred(move || Ok(backend::rejected(message)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendConfig;
    use crate::session::Phase;
    use crate::test_utils::{
        FakeVault, SESSION_KEY, VALID_EMAIL, VALID_MASTER_PASSWORD, VALID_PASSWORD,
    };
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// Output sink the test can inspect after the server returns.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn messages(&self) -> Vec<Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    fn serve(vault: &Arc<FakeVault>, input: &str) -> Vec<Value> {
        let backend = Backend::init(BackendConfig::default(), vault.clone()).unwrap();
        let output = SharedBuffer::default();
        Server::new(backend)
            .run(Cursor::new(input.to_string()), output.clone())
            .unwrap();
        output.messages()
    }

    fn results(messages: &[Value]) -> Vec<&Value> {
        messages.iter().filter(|m| m["type"] == "result").collect()
    }

    #[test]
    fn test_ready_comes_first() {
        let vault = Arc::new(FakeVault::in_phase(Phase::Locked));
        let messages = serve(&vault, "");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["type"], "ready");
        assert_eq!(messages[0]["phase"], "locked");
        assert_eq!(messages[0]["userEmail"], "user@example.com");
    }

    #[test]
    fn test_unlock_request_produces_result_and_phase_event() {
        let vault = Arc::new(FakeVault::in_phase(Phase::Locked));
        let input = format!(
            "{{\"id\":1,\"method\":\"unlock\",\"params\":{{\"masterPassword\":\"{}\"}}}}\n",
            VALID_MASTER_PASSWORD
        );
        let messages = serve(&vault, &input);

        let results = results(&messages);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["id"], 1);
        assert_eq!(results[0]["ok"], true);
        assert_eq!(results[0]["data"], SESSION_KEY);

        let phases: Vec<&Value> = messages.iter().filter(|m| m["type"] == "phase").collect();
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0]["phase"], "unlocked");
        assert_eq!(phases[0]["operation"], "unlock");
    }

    #[test]
    fn test_bad_lines_get_unknown_error_results() {
        let vault = Arc::new(FakeVault::new());
        let input = "not json\n{\"id\":\"x\",\"method\":\"frobnicate\"}\n\n";
        let messages = serve(&vault, input);
        let mut results = results(&messages);
        results.sort_by_key(|r| r["id"].is_null());

        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["id"], "x");
        assert_eq!(results[0]["error"], "UNKNOWN_ERROR");
        assert_eq!(results[0]["data"]["message"], "unknown method: frobnicate");
        assert!(results[1]["id"].is_null());
        assert_eq!(results[1]["error"], "UNKNOWN_ERROR");
    }

    #[test]
    fn test_session_requests_run_in_arrival_order() {
        let vault = Arc::new(FakeVault::new());
        vault.set_delay(std::time::Duration::from_millis(10));
        let input = format!(
            concat!(
                "{{\"id\":1,\"method\":\"login\",\"params\":{{\"email\":\"{}\",\"password\":\"{}\"}}}}\n",
                "{{\"id\":2,\"method\":\"unlock\",\"params\":{{\"master_password\":\"{}\"}}}}\n",
                "{{\"id\":3,\"method\":\"list_items\",\"params\":{{\"loginsOnly\":true}}}}\n",
                "{{\"id\":4,\"method\":\"lock\"}}\n",
            ),
            VALID_EMAIL, VALID_PASSWORD, VALID_MASTER_PASSWORD
        );
        let messages = serve(&vault, &input);
        let mut results = results(&messages);
        results.sort_by_key(|r| r["id"].as_i64());
        assert_eq!(results.len(), 4);
        for result in &results {
            assert_eq!(result["ok"], true, "request failed: {}", result);
        }
        assert_eq!(results[2]["data"].as_array().unwrap().len(), 3);
        assert_eq!(vault.phase(), Phase::Locked);
    }

    #[test]
    fn test_every_request_is_answered_before_exit() {
        let vault = Arc::new(FakeVault::in_phase(Phase::Unlocked));
        vault.set_delay(std::time::Duration::from_millis(20));
        let input: String = (0..5)
            .map(|i| format!("{{\"id\":{},\"method\":\"status\"}}\n", i))
            .collect();
        let messages = serve(&vault, &input);
        let mut ids: Vec<i64> = results(&messages)
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect();
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(vault.max_in_flight(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_shutdown_handle_stops_server() {
        let vault = Arc::new(FakeVault::new());
        let backend = Backend::init(BackendConfig::default(), vault.clone()).unwrap();
        let server = Server::new(backend);
        let handle = server.shutdown_handle();
        let (_keep_open, reader) = std::os::unix::net::UnixStream::pair().unwrap();
        handle.shutdown();
        let output = SharedBuffer::default();
        server
            .run(std::io::BufReader::new(reader), output.clone())
            .unwrap();
        assert_eq!(output.messages()[0]["type"], "ready");
    }
}
