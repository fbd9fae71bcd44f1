//! User authentication (RFC 4252) on top of an established session.

use super::{Session, SessionState};
use crate::ssh::auth::{
    construct_signature_data, info_response, AuthFailure, AuthMethod, AuthRequest, Credentials,
    InfoRequest, CONNECTION_SERVICE,
};
use crate::ssh::identity::Identity;
use crate::ssh::message::MessageType;
use tether_platform::{Direction, TetherError, TetherResult};
use tracing::{debug, info};

/// The authentication exchange in flight.
///
/// Keyed by method and user so a retry is recognised as the same call.
#[derive(Debug)]
pub(crate) struct AuthAttempt {
    key: String,
    sent: bool,
}

enum AuthOutcome {
    Success,
    Failure(AuthFailure),
}

impl Session {
    /// Authenticates `user` with `credentials`.
    ///
    /// On `WouldBlock` repeat the identical call; starting a different
    /// attempt meanwhile fails with [`TetherError::ChannelState`].
    ///
    /// # Errors
    ///
    /// - [`TetherError::Authentication`] if the server rejects the
    ///   credentials or a key file cannot be used; the session stays in
    ///   `Authenticating` and another attempt may follow
    /// - [`TetherError::ChannelState`] before [`Session::startup`] finished
    pub fn authenticate(&mut self, user: &str, credentials: &Credentials) -> TetherResult<()> {
        if !self.ready_for_auth()? {
            return Ok(());
        }
        let method = credentials.method_name();
        self.begin_auth(format!("{}@{}", method, user))?;
        let result = self.drive(|s| s.auth_step(user, Some(credentials)));
        self.finish_auth(&result);

        match result? {
            AuthOutcome::Success => Ok(()),
            AuthOutcome::Failure(failure) => {
                info!("Authentication as {} using {} failed", user, method);
                let err = TetherError::Authentication(format!(
                    "{} authentication rejected (server accepts: {})",
                    method,
                    failure.methods_can_continue().join(",")
                ));
                Err(self.record(err))
            }
        }
    }

    /// Asks the server which methods it accepts for `user`.
    ///
    /// Sends a "none" request. If the server accepts it the session becomes
    /// `Ready` and the returned list is empty.
    pub fn list_auth_methods(&mut self, user: &str) -> TetherResult<Vec<String>> {
        if !self.ready_for_auth()? {
            return Ok(Vec::new());
        }
        self.begin_auth(format!("none@{}", user))?;
        let result = self.drive(|s| s.auth_step(user, None));
        self.finish_auth(&result);

        match result? {
            AuthOutcome::Success => Ok(Vec::new()),
            AuthOutcome::Failure(failure) => {
                debug!(
                    "Server accepts for {}: {:?}",
                    user,
                    failure.methods_can_continue()
                );
                Ok(failure.methods_can_continue().to_vec())
            }
        }
    }

    /// Returns false when already authenticated.
    fn ready_for_auth(&self) -> TetherResult<bool> {
        self.ensure_alive()?;
        match self.state {
            SessionState::Authenticating => Ok(true),
            SessionState::Ready => Ok(false),
            SessionState::Closing | SessionState::Closed => Err(self.closed_error()),
            other => Err(TetherError::ChannelState(format!(
                "Cannot authenticate in state {:?}; call startup() first",
                other
            ))),
        }
    }

    fn begin_auth(&mut self, key: String) -> TetherResult<()> {
        match &self.auth {
            Some(attempt) if attempt.key != key => Err(TetherError::ChannelState(format!(
                "Authentication {} still in progress",
                attempt.key
            ))),
            Some(_) => Ok(()),
            None => {
                self.auth_inbox.clear();
                self.auth = Some(AuthAttempt { key, sent: false });
                Ok(())
            }
        }
    }

    fn finish_auth<T>(&mut self, result: &TetherResult<T>) {
        if !matches!(result, Err(TetherError::WouldBlock(_))) {
            self.auth = None;
        }
    }

    fn auth_step(
        &mut self,
        user: &str,
        credentials: Option<&Credentials>,
    ) -> TetherResult<AuthOutcome> {
        let sent = self.auth.as_ref().map(|a| a.sent).unwrap_or(false);
        if !sent {
            let method = match credentials {
                Some(credentials) => self.auth_method(user, credentials)?,
                None => AuthMethod::None,
            };
            debug!("Sending {} authentication request for {}", method.name(), user);
            self.outbox
                .push(&AuthRequest::new(user, CONNECTION_SERVICE, method).to_bytes())?;
            if let Some(attempt) = self.auth.as_mut() {
                attempt.sent = true;
            }
        }

        while let Some(message) = self.auth_inbox.pop_front() {
            match message.first().copied().and_then(MessageType::from_u8) {
                Some(MessageType::UserauthSuccess) => {
                    self.authenticated = true;
                    self.state = SessionState::Ready;
                    info!(
                        "Authenticated as {} using {}",
                        user,
                        credentials.map(|c| c.method_name()).unwrap_or("none")
                    );
                    info!("Session state: Ready");
                    return Ok(AuthOutcome::Success);
                }
                Some(MessageType::UserauthFailure) => {
                    return Ok(AuthOutcome::Failure(AuthFailure::from_bytes(&message)?));
                }
                Some(MessageType::UserauthInfoRequest) => {
                    let Some(Credentials::KeyboardInteractive(responder)) = credentials else {
                        return Err(TetherError::Protocol(
                            "Unexpected keyboard-interactive challenge".to_string(),
                        ));
                    };
                    let request = InfoRequest::from_bytes(&message)?;
                    debug!(
                        "Keyboard-interactive challenge '{}' with {} prompts",
                        request.name,
                        request.prompts.len()
                    );
                    let responses = responder.respond(&request);
                    self.outbox.push(&info_response(&responses))?;
                }
                _ => {
                    return Err(TetherError::Protocol(
                        "Unexpected authentication message".to_string(),
                    ))
                }
            }
        }
        Err(TetherError::WouldBlock(Direction::Readable))
    }

    fn auth_method(&self, user: &str, credentials: &Credentials) -> TetherResult<AuthMethod> {
        Ok(match credentials {
            Credentials::Password(password) => {
                AuthMethod::Password(password.as_str().to_string())
            }
            Credentials::PublicKeyFile {
                public_key,
                private_key,
                passphrase,
            } => {
                let identity = Identity::from_files(
                    private_key,
                    public_key.as_deref(),
                    passphrase.as_deref().map(String::as_str),
                )
                .map_err(|e| match e {
                    TetherError::Io(e) => {
                        TetherError::Authentication(format!("Cannot read key file: {}", e))
                    }
                    other => other,
                })?;
                let data = construct_signature_data(
                    &self.session_id,
                    user,
                    CONNECTION_SERVICE,
                    identity.algorithm(),
                    identity.public_blob(),
                );
                AuthMethod::PublicKey {
                    algorithm: identity.algorithm().to_string(),
                    public_key: identity.public_blob().to_vec(),
                    signature: Some(identity.sign(&data)),
                }
            }
            Credentials::KeyboardInteractive(_) => AuthMethod::KeyboardInteractive {
                submethods: String::new(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticating() -> Session {
        let mut session = Session::new();
        session.set_blocking(false);
        session.state = SessionState::Authenticating;
        session
    }

    #[test]
    fn test_authenticate_requires_startup() {
        let mut session = Session::new();
        assert!(matches!(
            session.authenticate("alice", &Credentials::password("pw")),
            Err(TetherError::ChannelState(_))
        ));
    }

    #[test]
    fn test_retry_must_repeat_the_same_attempt() {
        let mut session = authenticating();
        let credentials = Credentials::password("pw");

        assert!(matches!(
            session.authenticate("alice", &credentials),
            Err(TetherError::WouldBlock(Direction::Readable))
        ));
        assert!(matches!(
            session.list_auth_methods("alice"),
            Err(TetherError::ChannelState(_))
        ));
        assert!(matches!(
            session.authenticate("bob", &credentials),
            Err(TetherError::ChannelState(_))
        ));
        // The request is queued once.
        let queued = session.outbox.len();
        assert!(session.authenticate("alice", &credentials).is_err());
        assert_eq!(session.outbox.len(), queued);
    }

    #[test]
    fn test_missing_key_file_is_not_fatal() {
        let mut session = authenticating();
        let credentials = Credentials::public_key_file("/nonexistent/id_ed25519", None, None);
        assert!(matches!(
            session.authenticate("alice", &credentials),
            Err(TetherError::Authentication(_))
        ));
        assert_eq!(session.state(), SessionState::Authenticating);
        assert!(matches!(
            session.authenticate("alice", &Credentials::password("pw")),
            Err(TetherError::WouldBlock(_))
        ));
    }
}
