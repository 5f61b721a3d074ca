use thiserror::Error;

/// MySQL wire-level failures. Each one terminates only the offending session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unsupported greeting, protocol version {0}")]
    UnsupportedGreeting(u8),
    #[error("server answered the handshake with an error: {0}")]
    GreetingError(String),
    #[error("malformed greeting packet")]
    MalformedGreeting,
    #[error("truncated mysql packet")]
    Truncated,
    #[error("malformed client auth packet")]
    MalformedAuth,
    #[error("client auth scheme cannot carry a rewritten token")]
    UnsupportedAuthScheme,
    #[error("no credentials configured for user {0:?}")]
    UnknownUser(String),
    #[error("rewritten auth packet does not fit")]
    RewriteOverflow,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModuleError {
    /// Fails module load; the host must not start replaying.
    #[error("bad user configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("malformed frame: {0}")]
    Frame(&'static str),
    /// Invariant breach: a renew was requested without a cached first auth.
    #[error("no cached first auth packet, src port {src_port}")]
    MissingFirstAuth { src_port: u16 },
}
