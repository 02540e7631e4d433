//! JSON-line RPC transport between peer nodes.
//!
//! One frame per line: requests carry `{id, method, params}`, responses
//! `{id, result}` or `{id, error}`. Calls on one connection serialize
//! behind a mutex; response ids let a caller skip a reply left behind by
//! a timed-out predecessor instead of mis-pairing it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("{0}")]
    Remote(String),
}

/// Dispatch seam between the RPC server and the node logic. Handlers are
/// synchronous — every operation behind them is a fast in-memory store
/// access.
pub trait RpcService: Send + Sync + 'static {
    fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

#[derive(Serialize, Deserialize)]
struct Request {
    id: u64,
    method: String,
    params: Value,
}

#[derive(Serialize, Deserialize)]
struct Response {
    id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

struct Conn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Client half of a peer link. Clones share one connection; concurrent
/// calls take turns on it.
#[derive(Clone)]
pub struct RpcClient {
    conn: Arc<Mutex<Conn>>,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    /// Connect to a peer, bounded by `timeout`.
    pub async fn dial(addr: &str, timeout: Duration) -> Result<Self, RpcError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RpcError::Timeout)??;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            conn: Arc::new(Mutex::new(Conn {
                reader: BufReader::new(reader),
                writer,
            })),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Invoke `method` on the remote node. The timeout bounds the whole
    /// exchange, including the wait for the connection.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tokio::time::timeout(timeout, self.exchange(id, method, params))
            .await
            .map_err(|_| RpcError::Timeout)?
    }

    async fn exchange(&self, id: u64, method: &str, params: Value) -> Result<Value, RpcError> {
        let mut conn = self.conn.lock().await;

        let mut frame = serde_json::to_vec(&Request {
            id,
            method: method.to_string(),
            params,
        })?;
        frame.push(b'\n');
        conn.writer.write_all(&frame).await?;

        let mut line = String::new();
        loop {
            line.clear();
            let n = conn.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(RpcError::Closed);
            }
            let resp: Response = serde_json::from_str(line.trim_end())?;
            if resp.id < id {
                // reply to an earlier call that timed out before reading it
                continue;
            }
            if resp.id != id {
                return Err(RpcError::Remote(format!(
                    "response id mismatch: got {}, want {}",
                    resp.id, id
                )));
            }
            return match resp.error {
                Some(e) => Err(RpcError::Remote(e)),
                None => Ok(resp.result.unwrap_or(Value::Null)),
            };
        }
    }
}

/// Accept loop for the node's RPC surface. Each connection gets its own
/// task; requests on one connection are answered in order.
pub async fn serve(
    listener: TcpListener,
    service: Arc<dyn RpcService>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("rpc server stopping");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "rpc connection accepted");
                        let service = service.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_conn(stream, service).await {
                                tracing::debug!(peer = %peer, error = %e, "rpc connection closed");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }
        }
    }
}

async fn handle_conn(stream: TcpStream, service: Arc<dyn RpcService>) -> Result<(), RpcError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<Request>(trimmed) {
            Ok(req) => {
                let id = req.id;
                match service.handle(&req.method, req.params) {
                    Ok(result) => Response {
                        id,
                        result: Some(result),
                        error: None,
                    },
                    Err(e) => Response {
                        id,
                        result: None,
                        error: Some(e.to_string()),
                    },
                }
            }
            Err(e) => Response {
                id: 0,
                result: None,
                error: Some(format!("bad request: {e}")),
            },
        };

        let mut frame = serde_json::to_vec(&resp)?;
        frame.push(b'\n');
        writer.write_all(&frame).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoService;

    impl RpcService for EchoService {
        fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError> {
            match method {
                "echo" => Ok(params),
                other => Err(RpcError::UnknownMethod(other.to_string())),
            }
        }
    }

    // The sender is returned as a guard: dropping it would stop the server.
    async fn spawn_echo() -> (String, tokio::sync::broadcast::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, rx) = tokio::sync::broadcast::channel(1);
        tokio::spawn(serve(listener, Arc::new(EchoService), rx));
        (addr, tx)
    }

    #[tokio::test]
    async fn call_round_trip() {
        let (addr, _shutdown) = spawn_echo().await;
        let client = RpcClient::dial(&addr, Duration::from_secs(2)).await.unwrap();

        let params = json!({"hello": "world"});
        let result = client
            .call("echo", params.clone(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result, params);
    }

    #[tokio::test]
    async fn unknown_method_is_a_remote_error() {
        let (addr, _shutdown) = spawn_echo().await;
        let client = RpcClient::dial(&addr, Duration::from_secs(2)).await.unwrap();

        let err = client
            .call("nope", Value::Null, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Remote(ref msg) if msg.contains("unknown method")));
    }

    #[tokio::test]
    async fn sequential_calls_share_the_connection() {
        let (addr, _shutdown) = spawn_echo().await;
        let client = RpcClient::dial(&addr, Duration::from_secs(2)).await.unwrap();

        for i in 0..5 {
            let result = client
                .call("echo", json!(i), Duration::from_secs(2))
                .await
                .unwrap();
            assert_eq!(result, json!(i));
        }
    }

    #[tokio::test]
    async fn dial_to_closed_port_fails() {
        // Bind and immediately drop to get a port nothing listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let result = RpcClient::dial(&addr, Duration::from_secs(2)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn call_times_out_against_a_silent_server() {
        // Accepts connections but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let client = RpcClient::dial(&addr, Duration::from_secs(2)).await.unwrap();
        let err = client
            .call("echo", Value::Null, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout));
    }
}
