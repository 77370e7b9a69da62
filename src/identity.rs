//! The credentials on whose behalf requests are authenticated.


use std::env;
use std::fmt;
use std::str::FromStr;

use http::{Request, Response};

use crate::error::HandshakeError;
use crate::handshake::{local_hostname, Handshake};
use crate::hash::{InvalidHash, NtHash};
use crate::transport::RoundTrip;


/// The environment variable from which [`Identity::from_env`] reads credentials.
pub const CREDENTIALS_VAR: &str = "NTLM_CREDENTIALS";


/// An NTLM principal: domain, username and the NT hash of the password.
///
/// The plaintext password is never needed. Identities are immutable and may be shared freely
/// between threads running independent handshakes.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Identity {
    domain: String,
    username: String,
    password_hash: String,
}
impl Identity {
    /// Creates an identity from an already derived password hash (see [`crate::derive_hash`]).
    pub fn new(domain: impl Into<String>, username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            username: username.into(),
            password_hash: password_hash.into(),
        }
    }

    /// Reads an identity in the form `username@domain:hash` from `NTLM_CREDENTIALS`.
    ///
    /// Returns `Ok(None)` if the variable is not set.
    pub fn from_env() -> Result<Option<Self>, IdentityParseError> {
        match env::var(CREDENTIALS_VAR) {
            Ok(value) => value.parse().map(Some),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(env::VarError::NotUnicode(_)) => Err(IdentityParseError::NotUnicode),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }

    /// Renders the identity as `username@domain:hash`, for diagnostics.
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Sends `request` through `transport`, authenticating against the proxy as this identity.
    ///
    /// The local hostname is announced as the workstation; see [`Handshake`] for the exchange.
    pub fn authenticate<B, T>(&self, request: &mut Request<B>, transport: &mut T) -> Result<Response<T::Body>, HandshakeError<T::Error>>
    where
        T: RoundTrip<B>,
        T::Error: fmt::Display,
    {
        Handshake::new(self, local_hostname())
            .run(request, transport)
    }
}
impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.domain, self.password_hash)
    }
}
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("domain", &self.domain)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
impl FromStr for Identity {
    type Err = IdentityParseError;

    /// Parses the `username@domain:hash` form produced by [`Identity::render`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (principal, hash) = s.rsplit_once(':')
            .ok_or(IdentityParseError::MissingHash)?;
        let (username, domain) = principal.split_once('@')
            .ok_or(IdentityParseError::MissingDomain)?;
        if username.is_empty() {
            return Err(IdentityParseError::EmptyUsername);
        }
        let hash: NtHash = hash.parse()
            .map_err(IdentityParseError::InvalidHash)?;

        Ok(Self::new(domain, username, hash.to_string()))
    }
}


/// An error parsing an identity from its textual form.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum IdentityParseError {
    /// No `:` separates the hash.
    MissingHash,

    /// No `@` separates username and domain.
    MissingDomain,

    EmptyUsername,

    InvalidHash(InvalidHash),

    /// The environment variable is set but not valid Unicode.
    NotUnicode,
}
impl fmt::Display for IdentityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHash
                => write!(f, "credentials lack the \":hash\" part"),
            Self::MissingDomain
                => write!(f, "credentials lack the \"@domain\" part"),
            Self::EmptyUsername
                => write!(f, "credentials have an empty username"),
            Self::InvalidHash(e)
                => write!(f, "invalid credentials: {}", e),
            Self::NotUnicode
                => write!(f, "{} is not valid Unicode", CREDENTIALS_VAR),
        }
    }
}
impl std::error::Error for IdentityParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidHash(e) => Some(e),
            _ => None,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "a1b2c3d4e5f60718293a4b5c6d7e8f90";

    #[test]
    fn render_format() {
        let identity = Identity::new("CORP", "alice", HASH);
        assert_eq!(identity.render(), format!("alice@CORP:{}", HASH));
    }

    #[test]
    fn render_with_empty_domain() {
        let identity = Identity::new("", "bob", HASH);
        assert_eq!(identity.render(), format!("bob@:{}", HASH));
    }

    #[test]
    fn render_does_not_touch_the_hash() {
        // construction does not validate; rendering shows exactly what was given
        let identity = Identity::new("CORP", "alice", "ABC");
        assert_eq!(identity.render(), "alice@CORP:ABC");
    }

    #[test]
    fn parse_round_trip() {
        let identity = Identity::new("CORP", "alice", HASH);
        assert_eq!(identity.render().parse::<Identity>().unwrap(), identity);
    }

    #[test]
    fn parse_normalizes_hash_case() {
        let identity: Identity = "alice@CORP:A1B2C3D4E5F60718293A4B5C6D7E8F90".parse().unwrap();
        assert_eq!(identity.password_hash(), HASH);
        assert_eq!(identity.domain(), "CORP");
        assert_eq!(identity.username(), "alice");
    }

    #[test]
    fn parse_domain_containing_at() {
        let identity: Identity = format!("alice@corp@example:{}", HASH).parse().unwrap();
        assert_eq!(identity.username(), "alice");
        assert_eq!(identity.domain(), "corp@example");
    }

    #[test]
    fn parse_errors() {
        assert_eq!("alice@CORP".parse::<Identity>(), Err(IdentityParseError::MissingHash));
        assert_eq!(format!("alice:{}", HASH).parse::<Identity>(), Err(IdentityParseError::MissingDomain));
        assert_eq!(format!("@CORP:{}", HASH).parse::<Identity>(), Err(IdentityParseError::EmptyUsername));
        assert_eq!(
            "alice@CORP:1234".parse::<Identity>(),
            Err(IdentityParseError::InvalidHash(InvalidHash { length: 4 })),
        );
    }

    #[test]
    fn from_env() {
        // the only test touching the variable
        env::remove_var(CREDENTIALS_VAR);
        assert_eq!(Identity::from_env(), Ok(None));

        env::set_var(CREDENTIALS_VAR, format!("alice@CORP:{}", HASH));
        assert_eq!(Identity::from_env(), Ok(Some(Identity::new("CORP", "alice", HASH))));

        env::set_var(CREDENTIALS_VAR, "garbage");
        assert_eq!(Identity::from_env(), Err(IdentityParseError::MissingHash));

        env::remove_var(CREDENTIALS_VAR);
    }

    #[test]
    fn debug_hides_hash() {
        let identity = Identity::new("CORP", "alice", HASH);
        assert!(!format!("{:?}", identity).contains(HASH));
    }

    #[test]
    fn shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Identity>();
    }
}
