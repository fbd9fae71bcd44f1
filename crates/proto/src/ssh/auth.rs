//! SSH authentication protocol (RFC 4252, RFC 4256).
//!
//! This module implements the client side of user authentication:
//! - "none" - Query the methods the server accepts
//! - "password" - Password authentication
//! - "publickey" - Signed public key authentication
//! - "keyboard-interactive" - Challenge/response prompts (RFC 4256)
//!
//! # Security
//!
//! - Passwords are zeroized when the request is dropped
//! - Signatures cover the session identifier, binding them to this connection
//!
//! # Example
//!
//! ```rust
//! use tether_proto::ssh::auth::{AuthMethod, AuthRequest};
//!
//! let auth = AuthRequest::new(
//!     "user",
//!     "ssh-connection",
//!     AuthMethod::Password("secret".to_string()),
//! );
//! assert_eq!(auth.method().name(), "password");
//! ```

use crate::ssh::message::{expect_type, MessageType};
use crate::ssh::wire::{
    read_bool, read_bytes, read_name_list, read_string, read_u32, write_bool, write_bytes,
    write_name_list, write_string,
};
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tether_platform::{TetherError, TetherResult};
use zeroize::{Zeroize, Zeroizing};

/// Service name requested after the transport is established.
pub const USERAUTH_SERVICE: &str = "ssh-userauth";

/// Service started once authentication succeeds.
pub const CONNECTION_SERVICE: &str = "ssh-connection";

/// SSH authentication method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication; used to list the available methods.
    None,
    /// Password authentication.
    Password(String),
    /// Public key authentication.
    PublicKey {
        /// Algorithm name (e.g., "ssh-ed25519")
        algorithm: String,
        /// Public key blob
        public_key: Vec<u8>,
        /// Signature blob (if present)
        signature: Option<Vec<u8>>,
    },
    /// Keyboard-interactive authentication.
    KeyboardInteractive {
        /// Preferred submethods (usually empty)
        submethods: String,
    },
}

impl AuthMethod {
    /// Returns the method name.
    pub fn name(&self) -> &str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::Password(_) => "password",
            AuthMethod::PublicKey { .. } => "publickey",
            AuthMethod::KeyboardInteractive { .. } => "keyboard-interactive",
        }
    }
}

impl Drop for AuthMethod {
    fn drop(&mut self) {
        if let AuthMethod::Password(ref mut password) = self {
            password.zeroize();
        }
    }
}

/// SSH_MSG_USERAUTH_REQUEST message (RFC 4252 Section 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    user_name: String,
    service_name: String,
    method: AuthMethod,
}

impl AuthRequest {
    /// Creates a new authentication request.
    pub fn new(user_name: &str, service_name: &str, method: AuthMethod) -> Self {
        Self {
            user_name: user_name.to_string(),
            service_name: service_name.to_string(),
            method,
        }
    }

    /// Returns the user name.
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Returns the service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Returns the authentication method.
    pub fn method(&self) -> &AuthMethod {
        &self.method
    }

    /// Serializes the request.
    ///
    /// Format (RFC 4252 Section 5):
    /// ```text
    /// byte      SSH_MSG_USERAUTH_REQUEST (50)
    /// string    user name
    /// string    service name
    /// string    method name
    /// ....      method specific fields
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthRequest as u8);
        write_string(&mut buf, &self.user_name);
        write_string(&mut buf, &self.service_name);
        write_string(&mut buf, self.method.name());

        match &self.method {
            AuthMethod::None => {}
            AuthMethod::Password(password) => {
                // not changing the password
                write_bool(&mut buf, false);
                write_string(&mut buf, password);
            }
            AuthMethod::PublicKey {
                algorithm,
                public_key,
                signature,
            } => {
                write_bool(&mut buf, signature.is_some());
                write_string(&mut buf, algorithm);
                write_bytes(&mut buf, public_key);
                if let Some(sig) = signature {
                    write_bytes(&mut buf, sig);
                }
            }
            AuthMethod::KeyboardInteractive { submethods } => {
                // language tag (deprecated)
                write_string(&mut buf, "");
                write_string(&mut buf, submethods);
            }
        }

        buf.to_vec()
    }

    /// Parses an authentication request.
    pub fn from_bytes(data: &[u8]) -> TetherResult<Self> {
        let mut offset = 0;
        expect_type(data, &mut offset, MessageType::UserauthRequest)?;

        let user_name = read_string(data, &mut offset)?;
        let service_name = read_string(data, &mut offset)?;
        let method_name = read_string(data, &mut offset)?;

        let method = match method_name.as_str() {
            "none" => AuthMethod::None,
            "password" => {
                let _changing = read_bool(data, &mut offset)?;
                AuthMethod::Password(read_string(data, &mut offset)?)
            }
            "publickey" => {
                let has_signature = read_bool(data, &mut offset)?;
                let algorithm = read_string(data, &mut offset)?;
                let public_key = read_bytes(data, &mut offset)?;
                let signature = if has_signature {
                    Some(read_bytes(data, &mut offset)?)
                } else {
                    None
                };
                AuthMethod::PublicKey {
                    algorithm,
                    public_key,
                    signature,
                }
            }
            "keyboard-interactive" => {
                let _language = read_string(data, &mut offset)?;
                AuthMethod::KeyboardInteractive {
                    submethods: read_string(data, &mut offset)?,
                }
            }
            other => {
                return Err(TetherError::Protocol(format!(
                    "Unsupported authentication method: {}",
                    other
                )))
            }
        };

        Ok(Self {
            user_name,
            service_name,
            method,
        })
    }
}

/// SSH_MSG_USERAUTH_FAILURE message (RFC 4252 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    methods: Vec<String>,
    partial_success: bool,
}

impl AuthFailure {
    /// Creates a new failure message.
    pub fn new(methods: Vec<String>, partial_success: bool) -> Self {
        Self {
            methods,
            partial_success,
        }
    }

    /// Returns the methods that can continue.
    pub fn methods_can_continue(&self) -> &[String] {
        &self.methods
    }

    /// Returns whether the previous attempt was a partial success.
    pub fn partial_success(&self) -> bool {
        self.partial_success
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthFailure as u8);
        write_name_list(&mut buf, &self.methods);
        write_bool(&mut buf, self.partial_success);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> TetherResult<Self> {
        let mut offset = 0;
        expect_type(data, &mut offset, MessageType::UserauthFailure)?;
        let methods = read_name_list(data, &mut offset)?;
        let partial_success = read_bool(data, &mut offset)?;
        Ok(Self {
            methods,
            partial_success,
        })
    }
}

/// Parses SSH_MSG_USERAUTH_BANNER and returns the message text.
pub fn parse_banner(data: &[u8]) -> TetherResult<String> {
    let mut offset = 0;
    expect_type(data, &mut offset, MessageType::UserauthBanner)?;
    read_string(data, &mut offset)
}

/// One prompt of a keyboard-interactive challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Prompt text
    pub text: String,
    /// Whether the response may be echoed
    pub echo: bool,
}

/// SSH_MSG_USERAUTH_INFO_REQUEST (RFC 4256 Section 3.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoRequest {
    /// Challenge name
    pub name: String,
    /// Instructions for the user
    pub instruction: String,
    /// Prompts to answer, in order
    pub prompts: Vec<Prompt>,
}

impl InfoRequest {
    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthInfoRequest as u8);
        write_string(&mut buf, &self.name);
        write_string(&mut buf, &self.instruction);
        write_string(&mut buf, "");
        buf.put_u32(self.prompts.len() as u32);
        for prompt in &self.prompts {
            write_string(&mut buf, &prompt.text);
            write_bool(&mut buf, prompt.echo);
        }
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> TetherResult<Self> {
        let mut offset = 0;
        expect_type(data, &mut offset, MessageType::UserauthInfoRequest)?;
        let name = read_string(data, &mut offset)?;
        let instruction = read_string(data, &mut offset)?;
        let _language = read_string(data, &mut offset)?;
        let count = read_u32(data, &mut offset)?;
        if count > 64 {
            return Err(TetherError::Protocol(format!(
                "Too many keyboard-interactive prompts: {}",
                count
            )));
        }
        let mut prompts = Vec::with_capacity(count as usize);
        for _ in 0..count {
            prompts.push(Prompt {
                text: read_string(data, &mut offset)?,
                echo: read_bool(data, &mut offset)?,
            });
        }
        Ok(Self {
            name,
            instruction,
            prompts,
        })
    }
}

/// Builds SSH_MSG_USERAUTH_INFO_RESPONSE.
pub fn info_response(responses: &[String]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(MessageType::UserauthInfoResponse as u8);
    buf.put_u32(responses.len() as u32);
    for response in responses {
        write_string(&mut buf, response);
    }
    buf.to_vec()
}

/// Parses SSH_MSG_USERAUTH_INFO_RESPONSE.
pub fn parse_info_response(data: &[u8]) -> TetherResult<Vec<String>> {
    let mut offset = 0;
    expect_type(data, &mut offset, MessageType::UserauthInfoResponse)?;
    let count = read_u32(data, &mut offset)?;
    (0..count).map(|_| read_string(data, &mut offset)).collect()
}

/// Constructs the data signed for "publickey" authentication
/// (RFC 4252 Section 7).
///
/// ```text
/// string    session identifier
/// byte      SSH_MSG_USERAUTH_REQUEST (50)
/// string    user name
/// string    service name
/// string    "publickey"
/// boolean   TRUE
/// string    public key algorithm name
/// string    public key blob
/// ```
pub fn construct_signature_data(
    session_id: &[u8],
    user_name: &str,
    service_name: &str,
    algorithm: &str,
    public_key_blob: &[u8],
) -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_bytes(&mut buf, session_id);
    buf.put_u8(MessageType::UserauthRequest as u8);
    write_string(&mut buf, user_name);
    write_string(&mut buf, service_name);
    write_string(&mut buf, "publickey");
    write_bool(&mut buf, true);
    write_string(&mut buf, algorithm);
    write_bytes(&mut buf, public_key_blob);
    buf.to_vec()
}

/// Answers keyboard-interactive challenges.
pub trait KeyboardInteractive: Send + Sync {
    /// Returns one response per prompt, in order.
    fn respond(&self, request: &InfoRequest) -> Vec<String>;
}

impl<F> KeyboardInteractive for F
where
    F: Fn(&InfoRequest) -> Vec<String> + Send + Sync,
{
    fn respond(&self, request: &InfoRequest) -> Vec<String> {
        self(request)
    }
}

/// Credentials handed to [`crate::ssh::Session::authenticate`].
///
/// They are passed through to the server and never stored by the session.
#[derive(Clone)]
pub enum Credentials {
    /// Password authentication
    Password(Zeroizing<String>),
    /// Public key authentication with an OpenSSH key file
    PublicKeyFile {
        /// Public key file; derived from the private key when absent
        public_key: Option<PathBuf>,
        /// Private key file
        private_key: PathBuf,
        /// Passphrase for an encrypted private key
        passphrase: Option<Zeroizing<String>>,
    },
    /// Keyboard-interactive authentication
    KeyboardInteractive(Arc<dyn KeyboardInteractive>),
}

impl Credentials {
    /// Password credentials.
    pub fn password(password: impl Into<String>) -> Self {
        Credentials::Password(Zeroizing::new(password.into()))
    }

    /// Key file credentials.
    pub fn public_key_file(
        private_key: impl Into<PathBuf>,
        public_key: Option<PathBuf>,
        passphrase: Option<&str>,
    ) -> Self {
        Credentials::PublicKeyFile {
            public_key,
            private_key: private_key.into(),
            passphrase: passphrase.map(|p| Zeroizing::new(p.to_string())),
        }
    }

    /// Keyboard-interactive credentials answered by `responder`.
    pub fn keyboard_interactive<R: KeyboardInteractive + 'static>(responder: R) -> Self {
        Credentials::KeyboardInteractive(Arc::new(responder))
    }

    /// Returns the SSH method name these credentials authenticate with.
    pub fn method_name(&self) -> &'static str {
        match self {
            Credentials::Password(_) => "password",
            Credentials::PublicKeyFile { .. } => "publickey",
            Credentials::KeyboardInteractive(_) => "keyboard-interactive",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(<redacted>)"),
            Credentials::PublicKeyFile {
                public_key,
                private_key,
                passphrase,
            } => f
                .debug_struct("PublicKeyFile")
                .field("public_key", public_key)
                .field("private_key", private_key)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Credentials::KeyboardInteractive(_) => f.write_str("KeyboardInteractive"),
        }
    }
}
