use std::fmt;

use crate::codec::BuildError;
use crate::message::{ParsingError, StoringError};


/// Why a handshake failed.
///
/// Each variant carries the error of the failing step as it was produced, so callers can tell a
/// dead proxy from a bad challenge from bad credentials.
#[derive(Debug)]
pub enum HandshakeError<E> {
    /// The Negotiate or Authenticate message could not be built.
    MessageBuild(BuildError),

    /// A round trip failed.
    Transport(E),

    /// The proxy's `Proxy-Authenticate` header did not carry an NTLM challenge.
    ChallengeFraming(FramingError),

    /// The challenge is not a valid Challenge message.
    ChallengeParse(ParsingError),
}
impl<E> HandshakeError<E> {
    /// Whether the error came from the transport rather than from the handshake itself.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns the transport error, if that is what this is.
    pub fn into_transport(self) -> Option<E> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}
impl<E: fmt::Display> fmt::Display for HandshakeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageBuild(e) => write!(f, "failed to build NTLM message: {}", e),
            Self::Transport(e) => write!(f, "{}", e),
            Self::ChallengeFraming(e) => write!(f, "{}", e),
            Self::ChallengeParse(e) => write!(f, "failed to parse NTLM challenge: {}", e),
        }
    }
}
impl<E> std::error::Error for HandshakeError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MessageBuild(e) => Some(e),
            Self::Transport(e) => e.source(),
            Self::ChallengeFraming(e) => Some(e),
            Self::ChallengeParse(e) => Some(e),
        }
    }
}
impl<E> From<StoringError> for HandshakeError<E> {
    fn from(e: StoringError) -> Self {
        Self::MessageBuild(BuildError::Storing(e))
    }
}


/// A `Proxy-Authenticate` header that does not frame an NTLM challenge.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FramingError {
    /// The 407 response has no `Proxy-Authenticate` header at all.
    MissingHeader,

    /// None of the `Proxy-Authenticate` headers starts with `NTLM `.
    MissingPrefix { offered: Vec<String> },

    /// The NTLM `Proxy-Authenticate` header is not visible ASCII.
    NotText,

    /// The challenge is not valid base64.
    Base64(base64::DecodeError),
}
impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHeader
                => write!(f, "proxy demanded authentication without a Proxy-Authenticate header"),
            Self::MissingPrefix { offered }
                => write!(f, "proxy offered no NTLM challenge (offered: {:?})", offered),
            Self::NotText
                => write!(f, "NTLM Proxy-Authenticate header is not visible ASCII"),
            Self::Base64(e)
                => write!(f, "failed to decode NTLM challenge: {}", e),
        }
    }
}
impl std::error::Error for FramingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Base64(e) => Some(e),
            _ => None,
        }
    }
}
