//! The client side of the NTLM handshake with an HTTP proxy.
//!
//! ```plain
//!  client                                   proxy
//!    │ request + Proxy-Authorization: NTLM <negotiate>
//!    ├─────────────────────────────────────────►│
//!    │         407 + Proxy-Authenticate: NTLM <challenge>
//!    │◄─────────────────────────────────────────┤
//!    │ request + Proxy-Authorization: NTLM <authenticate>
//!    ├─────────────────────────────────────────►│
//!    │                    response, whatever it is
//!    │◄─────────────────────────────────────────┤
//! ```
//!
//! A proxy that answers the first request with anything but 407 did not want authentication, and
//! its response is final. A proxy that answers the second request with 407 rejected the
//! credentials; that response is final too. There is never a third round trip.


use std::fmt;

use base64::prelude::{BASE64_STANDARD, Engine};
use http::header::{HeaderMap, HeaderValue, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION};
use http::{Request, Response, StatusCode};
use log::error;

use crate::codec::{self, AuthenticateError};
use crate::error::{FramingError, HandshakeError};
use crate::identity::Identity;
use crate::transport::RoundTrip;


/// The authentication scheme prefix of both NTLM headers.
const SCHEME_PREFIX: &str = "NTLM ";


/// Returns the name of this machine, or an empty string if it cannot be determined.
///
/// The hostname only serves as the workstation name announced in the Negotiate message, which
/// proxies accept empty.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_default()
}


/// The message a handshake step deals with.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
enum Step {
    Negotiate,
    Challenge,
    Authenticate,
}
impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Negotiate => write!(f, "NTLM Type 1 (Negotiate)"),
            Self::Challenge => write!(f, "NTLM Type 2 (Challenge)"),
            Self::Authenticate => write!(f, "NTLM Type 3 (Authenticate)"),
        }
    }
}

/// Outcome of the first round trip.
enum Negotiated<R> {
    /// The proxy did not ask for authentication; this is its response.
    Passthrough(Response<R>),

    /// The proxy sent this (decoded) challenge.
    Challenged(Vec<u8>),
}


/// A single NTLM handshake on behalf of an [`Identity`].
#[derive(Clone, Debug)]
pub struct Handshake<'a> {
    identity: &'a Identity,
    workstation: String,
}
impl<'a> Handshake<'a> {
    /// Prepares a handshake announcing `workstation` (possibly empty) as the client's name.
    pub fn new(identity: &'a Identity, workstation: impl Into<String>) -> Self {
        Self {
            identity,
            workstation: workstation.into(),
        }
    }

    /// Sends `request` through `transport`, completing NTLM authentication with the proxy.
    ///
    /// The `Proxy-Authorization` header of `request` is overwritten, first with the Negotiate and
    /// then with the Authenticate message. The final response is returned as is, whatever its
    /// status; failures are logged and returned as they occurred.
    pub fn run<B, T>(&self, request: &mut Request<B>, transport: &mut T) -> Result<Response<T::Body>, HandshakeError<T::Error>>
    where
        T: RoundTrip<B>,
        T::Error: fmt::Display,
    {
        let challenge = match self.negotiate(request, transport)? {
            Negotiated::Passthrough(response) => return Ok(response),
            Negotiated::Challenged(challenge) => challenge,
        };
        self.authenticate(&challenge, request, transport)
    }

    fn negotiate<B, T>(&self, request: &mut Request<B>, transport: &mut T) -> Result<Negotiated<T::Body>, HandshakeError<T::Error>>
    where
        T: RoundTrip<B>,
        T::Error: fmt::Display,
    {
        let negotiate = codec::build_negotiate(self.identity.domain(), &self.workstation)
            .map_err(|e| {
                error!("Error creating {} message: {}", Step::Negotiate, e);
                HandshakeError::from(e)
            })?;
        set_authorization(request, &negotiate);

        let response = transport.round_trip(request)
            .map_err(|e| {
                error!("Error sending {} request: {}", Step::Negotiate, e);
                HandshakeError::Transport(e)
            })?;
        if response.status() != StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Ok(Negotiated::Passthrough(response));
        }

        // only the headers matter; release the body before anything can fail
        let (parts, body) = response.into_parts();
        drop(body);

        let challenge = extract_challenge(&parts.headers)
            .map_err(|e| {
                error!("Error decoding {} message: {}", Step::Challenge, e);
                HandshakeError::ChallengeFraming(e)
            })?;
        Ok(Negotiated::Challenged(challenge))
    }

    fn authenticate<B, T>(&self, challenge: &[u8], request: &mut Request<B>, transport: &mut T) -> Result<Response<T::Body>, HandshakeError<T::Error>>
    where
        T: RoundTrip<B>,
        T::Error: fmt::Display,
    {
        let authenticate = codec::build_authenticate(challenge, self.identity.username(), self.identity.password_hash())
            .map_err(|e| {
                error!("Error processing {} message: {}", Step::Challenge, e);
                match e {
                    AuthenticateError::Challenge(e) => HandshakeError::ChallengeParse(e),
                    AuthenticateError::Build(e) => HandshakeError::MessageBuild(e),
                }
            })?;
        set_authorization(request, &authenticate);

        transport.round_trip(request)
            .map_err(|e| {
                error!("Error sending {} request: {}", Step::Authenticate, e);
                HandshakeError::Transport(e)
            })
    }
}


/// Replaces the request's `Proxy-Authorization` header with the given NTLM message.
fn set_authorization<B>(request: &mut Request<B>, message: &[u8]) {
    let value = format!("{}{}", SCHEME_PREFIX, BASE64_STANDARD.encode(message));
    let value = HeaderValue::try_from(value)
        .expect("base64 is always a valid header value");
    request.headers_mut().insert(PROXY_AUTHORIZATION, value);
}

/// Finds and decodes the NTLM challenge among the `Proxy-Authenticate` headers.
fn extract_challenge(headers: &HeaderMap) -> Result<Vec<u8>, FramingError> {
    let mut offered = Vec::new();
    for value in headers.get_all(PROXY_AUTHENTICATE) {
        // other schemes may carry obs-text, e.g. a Latin-1 realm; only the NTLM value must be text
        let bytes = value.as_bytes();
        if bytes.starts_with(SCHEME_PREFIX.as_bytes()) {
            let text = value.to_str()
                .or(Err(FramingError::NotText))?;
            return BASE64_STANDARD.decode(text[SCHEME_PREFIX.len()..].trim())
                .map_err(FramingError::Base64);
        }
        let scheme = bytes.split(|b| *b == b' ').next().unwrap_or_default();
        offered.push(String::from_utf8_lossy(scheme).into_owned());
    }

    if offered.is_empty() {
        Err(FramingError::MissingHeader)
    } else {
        Err(FramingError::MissingPrefix { offered })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn headers(values: &[&str]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for v in values {
            map.append(PROXY_AUTHENTICATE, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn challenge_from_single_header() {
        assert_eq!(extract_challenge(&headers(&["NTLM AQID"])), Ok(vec![1, 2, 3]));
    }

    #[test]
    fn challenge_among_other_schemes() {
        let map = headers(&["Negotiate", "Basic realm=\"proxy\"", "NTLM AQID"]);
        assert_eq!(extract_challenge(&map), Ok(vec![1, 2, 3]));
    }

    #[test]
    fn challenge_after_obs_text_scheme() {
        let mut map = HeaderMap::new();
        map.append(PROXY_AUTHENTICATE, HeaderValue::from_bytes(b"Basic realm=\"B\xfcro\"").unwrap());
        map.append(PROXY_AUTHENTICATE, HeaderValue::from_static("NTLM AQID"));
        assert_eq!(extract_challenge(&map), Ok(vec![1, 2, 3]));
    }

    #[test]
    fn obs_text_challenge_is_not_text() {
        let mut map = HeaderMap::new();
        map.append(PROXY_AUTHENTICATE, HeaderValue::from_bytes(b"NTLM AQ\xfcID").unwrap());
        assert_eq!(extract_challenge(&map), Err(FramingError::NotText));
    }

    #[test]
    fn obs_text_scheme_is_offered_lossily() {
        let mut map = HeaderMap::new();
        map.append(PROXY_AUTHENTICATE, HeaderValue::from_bytes(b"B\xfcro realm=\"x\"").unwrap());
        assert_eq!(
            extract_challenge(&map),
            Err(FramingError::MissingPrefix { offered: vec!["B\u{fffd}ro".to_owned()] }),
        );
    }

    #[test]
    fn missing_header() {
        assert_eq!(extract_challenge(&HeaderMap::new()), Err(FramingError::MissingHeader));
    }

    #[test]
    fn missing_prefix() {
        assert_eq!(
            extract_challenge(&headers(&["Basic realm=\"proxy\"", "NTLM"])),
            Err(FramingError::MissingPrefix { offered: vec!["Basic".to_owned(), "NTLM".to_owned()] }),
        );
    }

    #[test]
    fn prefix_is_case_sensitive() {
        assert!(matches!(
            extract_challenge(&headers(&["ntlm AQID"])),
            Err(FramingError::MissingPrefix { .. }),
        ));
    }

    #[test]
    fn invalid_base64() {
        assert!(matches!(
            extract_challenge(&headers(&["NTLM not*base64"])),
            Err(FramingError::Base64(_)),
        ));
    }

    #[test]
    fn unpadded_base64_is_rejected() {
        // "AQI" lacks its padding; the standard engine insists on it
        assert!(matches!(
            extract_challenge(&headers(&["NTLM AQI"])),
            Err(FramingError::Base64(_)),
        ));
    }

    #[test]
    fn authorization_is_overwritten() {
        let mut request = Request::new(());
        set_authorization(&mut request, &[1, 2, 3]);
        set_authorization(&mut request, &[4, 5, 6]);

        let values: Vec<_> = request.headers().get_all(PROXY_AUTHORIZATION).iter().collect();
        assert_eq!(values, vec![&HeaderValue::from_static("NTLM BAUG")]);
    }

    #[test]
    fn step_names() {
        assert_eq!(Step::Negotiate.to_string(), "NTLM Type 1 (Negotiate)");
        assert_eq!(Step::Authenticate.to_string(), "NTLM Type 3 (Authenticate)");
    }
}
