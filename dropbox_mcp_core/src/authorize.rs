//! Browser-based OAuth authorization code flow.
//!
//! A one-shot HTTP listener on an OS-assigned localhost port receives the
//! provider redirect. The caller waits for the first of three outcomes:
//! tokens delivered, failure delivered, or the timeout elapsing. The
//! listener is shut down before `begin_authorization` returns, whichever
//! outcome won.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use rand::RngCore;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_AUTH_TIMEOUT;
use crate::credential::TokenSet;
use crate::error::ConnectorError;
use crate::oauth::TokenEndpoint;

pub const CALLBACK_PATH: &str = "/callback";

/// Upper bound on waiting for in-flight callback connections at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Dropbox authorization complete</title>
    <style>
        body { font-family: system-ui, sans-serif; text-align: center; padding: 50px; }
        h1 { color: #2e7d32; }
    </style>
</head>
<body>
    <h1>Dropbox authorization complete</h1>
    <p>You can close this window and return to your assistant.</p>
    <script>setTimeout(function(){ window.close(); }, 3000);</script>
</body>
</html>"#;

/// Opens a URL in the user's browser.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<(), ConnectorError>;
}

/// Launches the platform default browser.
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), ConnectorError> {
        open::that(url).map_err(|e| ConnectorError::BrowserLaunch(e.to_string()))
    }
}

/// 16 random bytes from the OS generator, hex encoded.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn redirect_uri_for(port: u16) -> String {
    format!("http://localhost:{}{}", port, CALLBACK_PATH)
}

pub fn build_authorize_url(
    authorize_url: &str,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
) -> Result<url::Url, ConnectorError> {
    let mut url = url::Url::parse(authorize_url)
        .map_err(|e| ConnectorError::Other(format!("invalid authorization URL: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("state", state)
        .append_pair("token_access_type", "offline");
    Ok(url)
}

pub struct AuthorizationFlow {
    authorize_url: String,
    endpoint: Arc<dyn TokenEndpoint>,
    browser: Arc<dyn BrowserLauncher>,
    timeout: Duration,
}

impl AuthorizationFlow {
    pub fn new(
        authorize_url: impl Into<String>,
        endpoint: Arc<dyn TokenEndpoint>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            authorize_url: authorize_url.into(),
            endpoint,
            browser,
            timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the full browser flow and returns the issued tokens.
    pub async fn begin_authorization(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenSet, ConnectorError> {
        let state = generate_state();

        let (success_tx, success_rx) = oneshot::channel();
        let (failure_tx, failure_rx) = oneshot::channel();

        let std_listener = std::net::TcpListener::bind(("127.0.0.1", 0)).map_err(|e| {
            ConnectorError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to start local server: {}", e),
            ))
        })?;
        let port = std_listener.local_addr()?.port();
        let redirect_uri = redirect_uri_for(port);

        let ctx = Arc::new(CallbackContext {
            expected_state: state.clone(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.clone(),
            endpoint: self.endpoint.clone(),
            claimed: AtomicBool::new(false),
            success: Mutex::new(Some(success_tx)),
            failure: Mutex::new(Some(failure_tx)),
        });

        let listener = CallbackListener::serve(std_listener, ctx)?;
        info!(port, "authorization callback listener bound");

        let outcome = self
            .launch_and_wait(client_id, &redirect_uri, &state, success_rx, failure_rx)
            .await;

        listener.close().await;
        debug!(port, "authorization callback listener closed");

        match &outcome {
            Ok(_) => info!("authorization completed"),
            Err(e) => warn!(kind = e.code_str(), "authorization did not complete: {}", e),
        }
        outcome
    }

    async fn launch_and_wait(
        &self,
        client_id: &str,
        redirect_uri: &str,
        state: &str,
        mut success_rx: oneshot::Receiver<TokenSet>,
        mut failure_rx: oneshot::Receiver<ConnectorError>,
    ) -> Result<TokenSet, ConnectorError> {
        let auth_url = build_authorize_url(&self.authorize_url, client_id, redirect_uri, state)?;

        info!("opening browser for Dropbox authorization");
        self.browser.open(auth_url.as_str())?;

        tokio::select! {
            Ok(tokens) = &mut success_rx => Ok(tokens),
            Ok(err) = &mut failure_rx => Err(err),
            _ = tokio::time::sleep(self.timeout) => {
                Err(ConnectorError::Timeout("authentication timeout".to_string()))
            }
        }
    }
}

struct CallbackContext {
    expected_state: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    endpoint: Arc<dyn TokenEndpoint>,
    claimed: AtomicBool,
    success: Mutex<Option<oneshot::Sender<TokenSet>>>,
    failure: Mutex<Option<oneshot::Sender<ConnectorError>>>,
}

impl CallbackContext {
    fn deliver_success(&self, tokens: TokenSet) {
        if let Some(tx) = self.success.lock().ok().and_then(|mut slot| slot.take()) {
            let _ = tx.send(tokens);
        }
    }

    fn deliver_failure(&self, err: ConnectorError) {
        if let Some(tx) = self.failure.lock().ok().and_then(|mut slot| slot.take()) {
            let _ = tx.send(err);
        }
    }
}

/// Local HTTP server owning the bound port until `close` (or drop).
struct CallbackListener {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackListener {
    fn serve(
        std_listener: std::net::TcpListener,
        ctx: Arc<CallbackContext>,
    ) -> Result<Self, ConnectorError> {
        std_listener.set_nonblocking(true)?;

        let svc_ctx = ctx.clone();
        let make_svc = make_service_fn(move |_conn| {
            let ctx = svc_ctx.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle_callback(ctx.clone(), req)))
            }
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = Server::from_tcp(std_listener)
            .map_err(|e| ConnectorError::Other(format!("failed to start local server: {}", e)))?
            .serve(make_svc)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });

        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                error!("authorization callback server error: {}", e);
                ctx.deliver_failure(ConnectorError::Other(format!(
                    "callback server error: {}",
                    e
                )));
            }
        });

        Ok(Self {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
                let _ = task.await;
            }
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn handle_callback(
    ctx: Arc<CallbackContext>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.uri().path() != CALLBACK_PATH {
        return Ok(text_response(StatusCode::NOT_FOUND, "404 page not found"));
    }

    if ctx.claimed.swap(true, Ordering::SeqCst) {
        return Ok(text_response(
            StatusCode::BAD_REQUEST,
            "Authorization already handled",
        ));
    }

    let params: HashMap<String, String> =
        url::form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
            .into_owned()
            .collect();

    let state = params.get("state").map(String::as_str).unwrap_or("");
    if state != ctx.expected_state {
        warn!("authorization callback carried an unexpected state");
        ctx.deliver_failure(ConnectorError::StateMismatch);
        return Ok(text_response(StatusCode::BAD_REQUEST, "State mismatch"));
    }

    let code = match params.get("code").filter(|c| !c.is_empty()) {
        Some(code) => code,
        None => {
            let reason = params
                .get("error_description")
                .filter(|s| !s.is_empty())
                .or_else(|| params.get("error"))
                .cloned()
                .unwrap_or_default();
            ctx.deliver_failure(ConnectorError::AuthorizationDenied(reason));
            return Ok(text_response(StatusCode::BAD_REQUEST, "Authorization failed"));
        }
    };

    match ctx
        .endpoint
        .exchange_code(&ctx.client_id, &ctx.client_secret, code, &ctx.redirect_uri)
        .await
    {
        Ok(tokens) => {
            ctx.deliver_success(tokens);
            let mut resp = Response::new(Body::from(SUCCESS_PAGE));
            resp.headers_mut().insert(
                CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/html; charset=utf-8"),
            );
            Ok(resp)
        }
        Err(e) => {
            ctx.deliver_failure(e);
            Ok(text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Token exchange failed",
            ))
        }
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
