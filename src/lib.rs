//! NTLM authentication against HTTP proxies, using a precomputed password hash.
//!
//! The proxy is taken through the three NTLM messages (Negotiate, Challenge, Authenticate) in two
//! round trips of the same request, so that to the caller a request through an NTLM proxy looks
//! like any other request.
//!
//! Sample usage:
//! ```
//! use http::{Request, Response, StatusCode};
//! use ntlmproxy::{Identity, RoundTrip};
//!
//! /// A transport to a proxy that lets everyone through.
//! struct OpenProxy;
//! impl RoundTrip<()> for OpenProxy {
//!     type Body = ();
//!     type Error = std::io::Error;
//!
//!     fn round_trip(&mut self, _request: &Request<()>) -> Result<Response<()>, Self::Error> {
//!         Ok(Response::new(()))
//!     }
//! }
//!
//! // store the hash, not the password
//! let hash = ntlmproxy::derive_hash(b"Password");
//! let identity = Identity::new("CORP", "alice", hash);
//!
//! let mut request = Request::get("http://example.com/").body(()).unwrap();
//! let response = identity.authenticate(&mut request, &mut OpenProxy)
//!     .expect("handshake failed");
//! assert_eq!(response.status(), StatusCode::OK);
//! assert!(request.headers()["proxy-authorization"].to_str().unwrap().starts_with("NTLM "));
//! ```


mod error;
mod oem;

pub mod codec;
pub mod handshake;
pub mod hash;
pub mod identity;
pub mod message;
pub mod transport;


pub use crate::codec::{build_authenticate, build_negotiate, AuthenticateError, BuildError};
pub use crate::error::{FramingError, HandshakeError};
pub use crate::handshake::{local_hostname, Handshake};
pub use crate::hash::{derive_hash, InvalidHash, NtHash};
pub use crate::identity::{Identity, IdentityParseError, CREDENTIALS_VAR};
pub use crate::message::{Flags, Message, ParsingError, StoringError};
pub use crate::transport::RoundTrip;
