//! Authentication session and the join handshake.
//!
//! [`SessionManager`] is the only owner of the [`Session`]. It establishes
//! sessions from login exchanges, interprets typed server events from the
//! user channel, and keeps the durable [`SessionStore`] in step.
//!
//! # Lifecycle
//!
//! ```text
//!   resume() ──► stored jwt + user_id? ──► join user:{id} with jwt
//!                                              │
//!   begin_login() ─► exchange ─► complete_login()
//!                                              │
//!              phx_reply {reason: "user not found" | "join crashed"}
//!                                              ▼
//!                          session + store cleared, LoggedOut
//! ```
//!
//! Concurrent logins are resolved by [`LoginTicket`]: only the most
//! recently started login may establish the session.

pub mod store;

use serde_json::{json, Value};

use crate::protocol::events::EchoMessage;
use crate::protocol::{topics, ServerEvent};
use crate::ui::{Level, UiEvent, UiSink};

pub use store::{FileStore, MemoryStore, SessionStore, StoreError, KEY_CREDENTIAL, KEY_IDENTITY, KEY_USER_ID};

/// Current authentication state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    /// Bearer credential (JWT).
    pub credential: Option<String>,
    /// Backend user id.
    pub user_id: Option<String>,
    /// Last known user profile.
    pub identity: Option<Value>,
}

impl Session {
    /// A non-empty credential together with a user id.
    pub fn is_authenticated(&self) -> bool {
        self.credential.as_deref().is_some_and(|c| !c.is_empty()) && self.user_id.is_some()
    }

    /// `user:{id}` when authenticated.
    pub fn user_topic(&self) -> Option<String> {
        self.authenticated_id().map(topics::user)
    }

    /// `echo:{id}` when authenticated.
    pub fn echo_topic(&self) -> Option<String> {
        self.authenticated_id().map(topics::echo)
    }

    fn authenticated_id(&self) -> Option<&str> {
        if self.is_authenticated() {
            self.user_id.as_deref()
        } else {
            None
        }
    }
}

/// Result of a successful login exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    /// Credential to join with.
    pub credential: String,
    /// User profile returned by the backend.
    pub identity: Value,
}

/// Read the user id out of a profile. Accepts string or numeric ids.
pub fn user_id_of(identity: &Value) -> Option<String> {
    match identity.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Permission to complete one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct LoginTicket(u64);

/// What an applied server event did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing changed.
    Ignored,
    /// The identity was replaced or edited.
    IdentityChanged,
    /// A new credential was stored.
    Authenticated,
    /// The server rejected the credential; the session was cleared.
    Invalidated,
    /// A login over the socket failed.
    Failed,
}

/// Sole owner and mutator of the [`Session`].
#[derive(Debug)]
pub struct SessionManager<S: SessionStore> {
    store: S,
    session: Session,
    latest_login: u64,
}

impl<S: SessionStore> SessionManager<S> {
    /// Manager with an empty session. Call [`Self::resume`] to load the store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            session: Session::default(),
            latest_login: 0,
        }
    }

    /// Current session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load credential, user id and identity from the store.
    pub fn resume(&mut self) -> Result<&Session, StoreError> {
        self.session.credential = self.store.get(KEY_CREDENTIAL)?;
        self.session.user_id = self.store.get(KEY_USER_ID)?;
        self.session.identity = match self.store.get(KEY_IDENTITY)? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    log::warn!("[Session] Ignoring unreadable stored identity: {e}");
                    None
                }
            },
            None => None,
        };

        if self.session.is_authenticated() {
            log::info!("[Session] Found existing session");
        } else {
            log::info!("[Session] No existing session found");
        }
        Ok(&self.session)
    }

    /// Start a login attempt. Any earlier ticket becomes stale.
    pub fn begin_login(&mut self) -> LoginTicket {
        self.latest_login += 1;
        LoginTicket(self.latest_login)
    }

    /// Finish a login attempt started with [`Self::begin_login`].
    ///
    /// Returns `Ok(false)` without touching the session when a newer login
    /// has been started since `ticket` was issued.
    pub fn complete_login(
        &mut self,
        ticket: LoginTicket,
        exchange: Exchange,
        ui: &mut dyn UiSink,
    ) -> Result<bool, StoreError> {
        if ticket.0 != self.latest_login {
            log::warn!(
                "[Session] Discarding login #{} (superseded by #{})",
                ticket.0,
                self.latest_login
            );
            return Ok(false);
        }
        self.establish(exchange, ui)?;
        Ok(true)
    }

    /// Store an exchanged credential and identity.
    pub fn establish(&mut self, exchange: Exchange, ui: &mut dyn UiSink) -> Result<(), StoreError> {
        let user_id = user_id_of(&exchange.identity);
        if user_id.is_none() {
            log::warn!("[Session] Exchange identity carries no user id");
        }

        self.store.set(KEY_CREDENTIAL, &exchange.credential)?;
        match &user_id {
            Some(id) => self.store.set(KEY_USER_ID, id)?,
            None => self.store.remove(KEY_USER_ID)?,
        }
        self.session.credential = Some(exchange.credential);
        self.session.user_id = user_id;
        self.set_identity(exchange.identity)?;

        log::info!("[Session] Logged in as {:?}", self.session.user_id);
        ui.emit(UiEvent::LoggedIn);
        self.emit_identity(ui);
        Ok(())
    }

    /// Apply an event received on the user (or echo) channel.
    pub fn apply(&mut self, event: &ServerEvent, ui: &mut dyn UiSink) -> Result<Outcome, StoreError> {
        match event {
            ServerEvent::JoinReply(reply) => {
                if let Some(reason) = reply.rejection_reason() {
                    log::warn!("[Session] Join rejected ({reason}), clearing session");
                    self.clear()?;
                    ui.emit(UiEvent::message(Level::Error, format!("Session rejected: {reason}")));
                    ui.emit(UiEvent::LoggedOut);
                    return Ok(Outcome::Invalidated);
                }
                self.set_identity(reply.body().clone())?;
                self.emit_identity(ui);
                Ok(Outcome::IdentityChanged)
            }
            ServerEvent::ProfileUpdate { user } => {
                self.set_identity(user.clone())?;
                self.emit_identity(ui);
                Ok(Outcome::IdentityChanged)
            }
            ServerEvent::Update { user_data } => {
                self.set_identity(user_data.clone())?;
                self.emit_identity(ui);
                Ok(Outcome::IdentityChanged)
            }
            ServerEvent::Echo(EchoMessage::PointsUpdate { points }) => {
                let Some(mut identity) = self.session.identity.take() else {
                    log::debug!("[Session] points_update without identity, ignoring");
                    return Ok(Outcome::Ignored);
                };
                if let Some(fields) = identity.as_object_mut() {
                    fields.insert("points".to_string(), points.clone());
                }
                self.set_identity(identity)?;
                self.emit_identity(ui);
                Ok(Outcome::IdentityChanged)
            }
            ServerEvent::AuthSuccess { token, user } => {
                if let Some(token) = token {
                    self.store.set(KEY_CREDENTIAL, token)?;
                    self.session.credential = Some(token.clone());
                }
                if let Some(user) = user {
                    if let Some(id) = user_id_of(user) {
                        self.store.set(KEY_USER_ID, &id)?;
                        self.session.user_id = Some(id);
                    }
                    self.set_identity(user.clone())?;
                    self.emit_identity(ui);
                }
                ui.emit(UiEvent::message(Level::Success, "Authentication successful"));
                Ok(Outcome::Authenticated)
            }
            ServerEvent::AuthError { message } => {
                log::warn!("[Session] Authentication failed: {message}");
                ui.emit(UiEvent::message(
                    Level::Error,
                    format!("Authentication error: {message}"),
                ));
                ui.emit(UiEvent::LoggedOut);
                Ok(Outcome::Failed)
            }
            ServerEvent::Echo(EchoMessage::Raw(_)) | ServerEvent::Other { .. } => {
                log::debug!("[Session] Ignoring '{}'", event.name());
                Ok(Outcome::Ignored)
            }
        }
    }

    /// Replace the identity with a freshly fetched profile.
    pub fn refresh_identity(&mut self, profile: Value, ui: &mut dyn UiSink) -> Result<(), StoreError> {
        self.set_identity(profile)?;
        self.emit_identity(ui);
        Ok(())
    }

    /// Add `delta` to the local identity's `points`.
    ///
    /// Mirrors a successful point increment on the backend without waiting
    /// for the next profile push.
    pub fn add_points(&mut self, delta: i64, ui: &mut dyn UiSink) -> Result<(), StoreError> {
        let Some(mut identity) = self.session.identity.take() else {
            return Ok(());
        };
        let current = identity.get("points").and_then(Value::as_i64).unwrap_or(0);
        if let Some(fields) = identity.as_object_mut() {
            fields.insert("points".to_string(), json!(current + delta));
        }
        self.set_identity(identity)?;
        self.emit_identity(ui);
        Ok(())
    }

    /// Forget the session and wipe the store.
    pub fn logout(&mut self, ui: &mut dyn UiSink) -> Result<(), StoreError> {
        self.clear()?;
        log::info!("[Session] Logged out");
        ui.emit(UiEvent::LoggedOut);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.session = Session::default();
        self.store.remove(KEY_CREDENTIAL)?;
        self.store.remove(KEY_USER_ID)?;
        self.store.remove(KEY_IDENTITY)?;
        Ok(())
    }

    fn set_identity(&mut self, identity: Value) -> Result<(), StoreError> {
        self.store.set(KEY_IDENTITY, &identity.to_string())?;
        self.session.identity = Some(identity);
        Ok(())
    }

    fn emit_identity(&self, ui: &mut dyn UiSink) {
        if let Some(identity) = &self.session.identity {
            ui.emit(UiEvent::Identity(identity.clone()));
        }
    }
}
