//! Command implementations behind the `phx-client` subcommands.
//!
//! Each function takes the pieces it needs (API client, session manager, UI
//! sink) so it can be driven against a mock backend and an in-memory store.

use anyhow::{Context, Result};
use serde_json::json;

use crate::api::{ApiClient, ApiError};
use crate::client::{Client, ClientOptions};
use crate::config::{Config, Flow};
use crate::session::{SessionManager, SessionStore};
use crate::transport::websocket::WsConnector;
use crate::ui::{Level, UiEvent, UiSink};

fn require_credential<S: SessionStore>(manager: &SessionManager<S>) -> Result<String> {
    manager
        .session()
        .credential
        .clone()
        .filter(|c| !c.is_empty())
        .context("Not logged in (run login-code or login-wallet first)")
}

/// Log out locally when the backend rejected the credential.
fn handle_api_error<S: SessionStore>(
    manager: &mut SessionManager<S>,
    ui: &mut dyn UiSink,
    what: &str,
    err: ApiError,
) -> Result<()> {
    ui.emit(UiEvent::message(Level::Error, format!("{what} failed: {err}")));
    if matches!(err, ApiError::Unauthorized) {
        manager.logout(ui)?;
    }
    Err(anyhow::Error::new(err).context(format!("{what} failed")))
}

/// Connect, join the session channel, and print events until Ctrl-C.
pub async fn listen<S, U>(config: &Config, manager: SessionManager<S>, ui: U, flow: Option<Flow>) -> Result<()>
where
    S: SessionStore,
    U: UiSink,
{
    let mut options = ClientOptions::from(config);
    if let Some(flow) = flow {
        options.flow = flow;
    }

    let url = config.websocket_url();
    log::info!("[Client] Listening on {url} ({:?} flow)", options.flow);
    let (connector, events) = WsConnector::new(url);
    let mut client = Client::new(connector, events, manager, ui, options);

    let handle = client.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.shutdown();
        }
    });

    client.run().await
}

/// Exchange an OAuth code and store the session.
pub async fn login_code<S: SessionStore>(
    api: &ApiClient,
    manager: &mut SessionManager<S>,
    ui: &mut dyn UiSink,
    code: &str,
    verifier: &str,
) -> Result<()> {
    let ticket = manager.begin_login();
    match api.exchange_code(code, verifier).await {
        Ok(exchange) => {
            if manager.complete_login(ticket, exchange, ui)? {
                ui.emit(UiEvent::message(Level::Success, "Authentication successful"));
            }
            Ok(())
        }
        Err(e) => {
            ui.emit(UiEvent::message(Level::Error, format!("Authentication error: {e}")));
            Err(anyhow::Error::new(e).context("Code exchange failed"))
        }
    }
}

/// Exchange a signed wallet message and store the session.
pub async fn login_wallet<S: SessionStore>(
    api: &ApiClient,
    manager: &mut SessionManager<S>,
    ui: &mut dyn UiSink,
    address: &str,
    message: &str,
    signature: &str,
) -> Result<()> {
    let ticket = manager.begin_login();
    match api.exchange_signature(address, message, signature).await {
        Ok(exchange) => {
            if manager.complete_login(ticket, exchange, ui)? {
                ui.emit(UiEvent::message(Level::Success, "Authentication successful"));
            }
            Ok(())
        }
        Err(e) => {
            ui.emit(UiEvent::message(Level::Error, format!("Authentication error: {e}")));
            Err(anyhow::Error::new(e).context("Signature exchange failed"))
        }
    }
}

/// Fetch the profile and store it as the identity. Logs out on `401`.
pub async fn profile<S: SessionStore>(
    api: &ApiClient,
    manager: &mut SessionManager<S>,
    ui: &mut dyn UiSink,
) -> Result<()> {
    let token = require_credential(manager)?;
    match api.fetch_profile(&token).await {
        Ok(profile) => Ok(manager.refresh_identity(profile, ui)?),
        Err(e) => handle_api_error(manager, ui, "Profile load", e),
    }
}

/// Add points on the backend and mirror them locally.
pub async fn add_points<S: SessionStore>(
    api: &ApiClient,
    manager: &mut SessionManager<S>,
    ui: &mut dyn UiSink,
    points: i64,
) -> Result<()> {
    let token = require_credential(manager)?;
    match api.add_points(&token, points).await {
        Ok(()) => {
            manager.add_points(points, ui)?;
            ui.emit(UiEvent::message(
                Level::Success,
                format!("Successfully added {points} point(s)!"),
            ));
            Ok(())
        }
        Err(e) => handle_api_error(manager, ui, "Add points", e),
    }
}

/// Add one fitcoin.
pub async fn add_fitcoin<S: SessionStore>(
    api: &ApiClient,
    manager: &mut SessionManager<S>,
    ui: &mut dyn UiSink,
) -> Result<()> {
    let token = require_credential(manager)?;
    match api.add_fitcoin(&token).await {
        Ok(()) => {
            ui.emit(UiEvent::message(Level::Success, "Added 1 fitcoin"));
            Ok(())
        }
        Err(e) => handle_api_error(manager, ui, "Add fitcoin", e),
    }
}

/// Register a wallet address with the user.
pub async fn register_wallet<S: SessionStore>(
    api: &ApiClient,
    manager: &mut SessionManager<S>,
    ui: &mut dyn UiSink,
    address: &str,
) -> Result<()> {
    let token = require_credential(manager)?;
    match api.register_wallet(&token, address).await {
        Ok(()) => {
            ui.emit(UiEvent::message(
                Level::Success,
                format!("Ethereum address sent to backend: {address}"),
            ));
            Ok(())
        }
        Err(e) => handle_api_error(manager, ui, "Wallet registration", e),
    }
}

/// Stored session and effective configuration, credential redacted.
pub fn status<S: SessionStore>(config: &Config, manager: &SessionManager<S>) -> serde_json::Value {
    let session = manager.session();
    json!({
        "jwt": session.credential.as_deref().map(redact),
        "user_id": session.user_id,
        "authenticated": session.is_authenticated(),
        "backend_url": config.backend_url,
        "websocket_url": config.websocket_url(),
        "flow": config.flow,
    })
}

fn redact(credential: &str) -> String {
    let visible: String = credential.chars().take(6).collect();
    if visible.len() < credential.len() {
        format!("{visible}…")
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Exchange, MemoryStore};

    #[test]
    fn test_redact_hides_tail() {
        assert_eq!(redact("eyJhbGciOi"), "eyJhbG…");
        assert_eq!(redact("short"), "***");
    }

    #[test]
    fn test_status_without_session() {
        let manager = SessionManager::new(MemoryStore::new());
        let status = status(&Config::default(), &manager);
        assert_eq!(status["authenticated"], false);
        assert_eq!(status["jwt"], serde_json::Value::Null);
        assert_eq!(status["flow"], "user");
    }

    #[test]
    fn test_require_credential() {
        let mut manager = SessionManager::new(MemoryStore::new());
        assert!(require_credential(&manager).is_err());

        let mut ui: Vec<UiEvent> = Vec::new();
        manager
            .establish(
                Exchange {
                    credential: "jwt".into(),
                    identity: json!({"id": 1}),
                },
                &mut ui,
            )
            .unwrap();
        assert_eq!(require_credential(&manager).unwrap(), "jwt");
    }
}
