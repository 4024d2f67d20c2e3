//! WebSocket gateway.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /ws` - WebSocket upgrade; one [`Session`] per connection
//!
//! ## Example
//!
//! ```no_run
//! use shell_bridge::gateway::{serve, GatewayState, ServerConfig};
//! use shell_bridge::SessionConfig;
//!
//! #[tokio::main]
//! async fn main() -> shell_bridge::Result<()> {
//!     let config = ServerConfig::new("127.0.0.1".parse().unwrap(), 8000);
//!     serve(config, GatewayState::new(SessionConfig::default())).await
//! }
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::{any, get},
    Router,
};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::{Session, SessionConfig};
use crate::Result;

/// Envelopes queued for a client before the session waits on the socket.
const OUTBOUND_CAPACITY: usize = 64;

/// Shared state handed to every connection.
#[derive(Debug, Clone, Default)]
pub struct GatewayState {
    session: Arc<SessionConfig>,
}

impl GatewayState {
    pub fn new(session: SessionConfig) -> Self {
        Self {
            session: Arc::new(session),
        }
    }

    /// Configuration each new session starts from.
    pub fn session_config(&self) -> &SessionConfig {
        &self.session
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: IpAddr,
    /// Port to listen on.
    pub port: u16,
}

impl ServerConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8000,
        }
    }
}

/// Create the router with all routes configured.
pub fn create_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", any(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server and run until Ctrl-C.
pub async fn serve(config: ServerConfig, state: GatewayState) -> Result<()> {
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("shell-bridge listening on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            error!("failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Run one connection: a writer task drains the session's outbound channel
/// into the socket while this task feeds inbound envelopes to the session.
async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let (mut sink, stream) = socket.split();
    let (outbound, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);

    let session = match Session::new(state.session_config().clone(), outbound) {
        Ok(session) => session,
        Err(e) => {
            error!("failed to create session: {}", e);
            let _ = sink.close().await;
            return;
        }
    };
    let span = info_span!("session", id = %session.id());

    let writer = tokio::spawn(
        async move {
            while let Some(message) = rx.recv().await {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("failed to encode message: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    debug!("client went away");
                    break;
                }
            }
            let _ = sink.close().await;
        }
        .instrument(span.clone()),
    );

    run_session(session, stream).instrument(span).await;

    // The writer stops once the session's senders are gone.
    let _ = writer.await;
}

/// Feed inbound frames to `session` until the client goes away, then
/// release the session and its outbound sender.
async fn run_session<S, E>(mut session: Session, mut stream: S)
where
    S: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    info!("client connected");
    if let Err(e) = drive(&mut session, &mut stream).await {
        debug!("connection ended: {}", e);
    }
    session.close().await;
    info!("client disconnected");
}

async fn drive<S, E>(session: &mut Session, stream: &mut S) -> Result<()>
where
    S: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    session.start().await?;

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("websocket error: {}", e);
                        return Ok(());
                    }
                };

                let message: ClientMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("ignoring malformed message: {}", e);
                        continue;
                    }
                };
                session.handle(message).await?;
            }
            exit = session.shell_exited() => {
                debug!(?exit, "shell output ended");
                session.on_shell_exit().await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.bind_address().to_string(), "127.0.0.1:8000");
    }

    #[test]
    fn test_server_config_custom() {
        let config = ServerConfig::new("0.0.0.0".parse().unwrap(), 8080);
        assert_eq!(config.bind_address().to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn test_state_shares_session_config() {
        let mut session = SessionConfig::default();
        session.dispatcher.interpreter = "/bin/dash".to_string();
        let state = GatewayState::new(session);
        let clone = state.clone();
        assert_eq!(clone.session_config().dispatcher.interpreter, "/bin/dash");
    }

    #[tokio::test]
    async fn test_health() {
        assert_eq!(health().await, "OK");
    }

    // ========================================================================
    // Connection loop
    // ========================================================================

    use std::path::Path;
    use std::time::Duration;

    use crate::protocol::CommandOutput;
    use crate::pty::ShellConfig;
    use crate::session::SessionContext;

    type Frame = std::result::Result<Message, axum::Error>;

    const WAIT: Duration = Duration::from_secs(10);

    fn have_sh() -> bool {
        Path::new("/bin/sh").exists()
    }

    fn session(cwd: &Path) -> (Session, mpsc::Receiver<ServerMessage>) {
        let config = SessionConfig {
            shell: ShellConfig {
                program: "/bin/sh".to_string(),
                args: Vec::new(),
                settle_delay: Duration::from_millis(20),
                line_delay: Duration::from_millis(10),
                terminate_timeout: Duration::from_millis(500),
                ..ShellConfig::default()
            },
            ..SessionConfig::default()
        };
        let mut ctx = SessionContext::new(cwd);
        ctx.set_env("PATH", "/usr/local/bin:/usr/bin:/bin");
        let (tx, rx) = mpsc::channel(256);
        (Session::with_context(config, ctx, tx), rx)
    }

    /// Inbound frames the test pushes by hand; the stream ends when the
    /// sender is dropped, like a client disconnecting.
    fn frames() -> (
        mpsc::UnboundedSender<Frame>,
        impl Stream<Item = Frame> + Unpin + Send + 'static,
    ) {
        let (tx, rx) = mpsc::unbounded_channel::<Frame>();
        let stream = Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        }));
        (tx, stream)
    }

    fn text(json: &str) -> Frame {
        Ok(Message::Text(json.into()))
    }

    async fn next_message(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("channel closed")
    }

    /// Next `output` envelope, skipping streamed shell output.
    async fn next_output(rx: &mut mpsc::Receiver<ServerMessage>) -> CommandOutput {
        loop {
            if let ServerMessage::Output(output) = next_message(rx).await {
                return output;
            }
        }
    }

    /// Drain until the session drops its sender.
    async fn until_closed(rx: &mut mpsc::Receiver<ServerMessage>) {
        while tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("channel never closed")
            .is_some()
        {}
    }

    /// First `pid_<digits>` in `text`.
    fn echoed_pid(text: &str) -> Option<u32> {
        text.match_indices("pid_").find_map(|(at, marker)| {
            let digits: String = text[at + marker.len()..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            digits.parse().ok()
        })
    }

    #[tokio::test]
    async fn test_malformed_frames_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (session, mut rx) = session(dir.path());
        let (tx, stream) = frames();
        let task = tokio::spawn(run_session(session, stream));

        assert!(matches!(
            next_message(&mut rx).await,
            ServerMessage::Prompt { .. }
        ));

        tx.send(text("{not json")).unwrap();
        tx.send(text(r#"{"type":"launch"}"#)).unwrap();
        tx.send(Ok(Message::Binary(vec![1u8, 2, 3].into()))).unwrap();
        tx.send(text(r#"{"type":"command","command":"clear"}"#)).unwrap();

        let output = next_output(&mut rx).await;
        assert_eq!(output.command, "clear");
        assert!(output.clear_screen);

        drop(tx);
        task.await.unwrap();
        until_closed(&mut rx).await;
    }

    #[tokio::test]
    async fn test_shell_exit_returns_to_passive() {
        if !have_sh() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let (session, mut rx) = session(dir.path());
        let (tx, stream) = frames();
        let task = tokio::spawn(run_session(session, stream));

        tx.send(text(r#"{"type":"command","command":"interactive"}"#))
            .unwrap();
        let entered = next_output(&mut rx).await;
        assert_eq!(entered.interactive, Some(true));

        // The shell ends by itself, so the loop notices through the pump.
        tx.send(text(r#"{"type":"input","data":"exit\n"}"#)).unwrap();
        let left = next_output(&mut rx).await;
        assert_eq!(left.command, "exit");
        assert_eq!(left.interactive, Some(false));

        // Back in passive mode, commands are dispatched again.
        tx.send(text(r#"{"type":"command","command":"clear"}"#)).unwrap();
        let output = next_output(&mut rx).await;
        assert_eq!(output.command, "clear");
        assert_eq!(output.interactive, None);

        drop(tx);
        task.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_disconnect_while_interactive_kills_shell() {
        if !have_sh() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let (session, mut rx) = session(dir.path());
        let (tx, stream) = frames();
        let task = tokio::spawn(run_session(session, stream));

        tx.send(text(r#"{"type":"command","command":"interactive"}"#))
            .unwrap();
        assert_eq!(next_output(&mut rx).await.interactive, Some(true));

        tx.send(text(r#"{"type":"input","data":"echo pid_$$\n"}"#))
            .unwrap();
        let mut seen = String::new();
        let pid = loop {
            if let ServerMessage::ShellOutput { output, .. } = next_message(&mut rx).await {
                seen.push_str(&output);
            }
            if let Some(pid) = echoed_pid(&seen) {
                break pid;
            }
        };

        drop(tx);
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        until_closed(&mut rx).await;

        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        assert_eq!(rc, -1);
    }

    #[test]
    fn test_echoed_pid() {
        assert_eq!(echoed_pid("$ echo pid_$$\r\npid_4242\r\n"), Some(4242));
        assert_eq!(echoed_pid("echo pid_$$"), None);
    }
}
