//! The two message-building operations of the client side of the handshake.


use std::fmt;

use chrono::{NaiveDate, Utc};
use rand::Rng;
use rand::rngs::OsRng;

use crate::hash::{self, InvalidHash, NtHash};
use crate::message::{
    AuthenticateMessage, ChallengeMessage, Flags, Message, NegotiateMessage, OsVersion,
    ParsingError, StoringError, TargetInfoType,
};


/// Flags requested in every Negotiate message.
const NEGOTIATE_FLAGS: Flags = Flags::NEGOTIATE_UNICODE
    .union(Flags::NEGOTIATE_OEM)
    .union(Flags::REQUEST_TARGET)
    .union(Flags::NEGOTIATE_NTLM)
    .union(Flags::NEGOTIATE_ALWAYS_SIGN)
    .union(Flags::NEGOTIATE_NTLM2_KEY)
    .union(Flags::NEGOTIATE_TARGET_INFO)
    .union(Flags::NEGOTIATE_128BIT)
    .union(Flags::NEGOTIATE_56BIT);

/// Challenge flags asking for something other than NTLMv2 without key exchange.
const UNSUPPORTED_FLAGS: Flags = Flags::NEGOTIATE_LANMAN_KEY
    .union(Flags::NEGOTIATE_KEY_EXCHANGE);


/// An error building an Authenticate message that is not the challenge's fault.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BuildError {
    /// The message could not be serialized.
    Storing(StoringError),

    /// The configured password hash is malformed.
    InvalidHash(InvalidHash),

    /// The challenge asks for features that are not supported (NTLMv1 or key exchange).
    Unsupported { flags: Flags },

    /// Anonymous authentication is not offered.
    EmptyUsername,
}
impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storing(e)
                => write!(f, "failed to serialize message: {}", e),
            Self::InvalidHash(e)
                => write!(f, "{}", e),
            Self::Unsupported { flags }
                => write!(f, "challenge requests unsupported features: {:?}", flags),
            Self::EmptyUsername
                => write!(f, "cannot authenticate with an empty username"),
        }
    }
}
impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storing(e) => Some(e),
            Self::InvalidHash(e) => Some(e),
            Self::Unsupported { .. } | Self::EmptyUsername => None,
        }
    }
}
impl From<StoringError> for BuildError {
    fn from(e: StoringError) -> Self {
        Self::Storing(e)
    }
}

/// An error responding to a Challenge message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthenticateError {
    /// The challenge is not a well-formed Challenge message.
    Challenge(ParsingError),

    /// The challenge was understood, but no response could be built.
    Build(BuildError),
}
impl fmt::Display for AuthenticateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Challenge(e) => write!(f, "invalid challenge: {}", e),
            Self::Build(e) => write!(f, "{}", e),
        }
    }
}
impl std::error::Error for AuthenticateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Challenge(e) => Some(e),
            Self::Build(e) => Some(e),
        }
    }
}


/// Builds a serialized Negotiate message.
///
/// `domain` and `workstation` may be empty, in which case they are not announced as supplied.
pub fn build_negotiate(domain: &str, workstation: &str) -> Result<Vec<u8>, StoringError> {
    let mut flags = NEGOTIATE_FLAGS;
    flags.set(Flags::NEGOTIATE_DOMAIN_SUPPLIED, !domain.is_empty());
    flags.set(Flags::NEGOTIATE_WORKSTATION_SUPPLIED, !workstation.is_empty());

    Message::Negotiate(NegotiateMessage {
        flags,
        supplied_domain: domain.to_owned(),
        supplied_workstation: workstation.to_owned(),
        os_version: OsVersion::default(),
    }).to_bytes()
}

/// Parses a serialized Challenge message and builds the serialized Authenticate message
/// answering it on behalf of `username`, proving knowledge of `password_hash`.
///
/// The domain is taken from the challenge's target name.
pub fn build_authenticate(challenge: &[u8], username: &str, password_hash: &str) -> Result<Vec<u8>, AuthenticateError> {
    let challenge = match Message::try_from(challenge).map_err(AuthenticateError::Challenge)? {
        Message::Challenge(c) => c,
        other => return Err(AuthenticateError::Challenge(ParsingError::UnexpectedMessageType {
            expected: Message::CHALLENGE,
            obtained: other.message_number(),
        })),
    };

    let hash: NtHash = password_hash.parse()
        .map_err(|e| AuthenticateError::Build(BuildError::InvalidHash(e)))?;

    let mut client_challenge = [0u8; 8];
    OsRng.fill(&mut client_challenge);

    respond(&challenge, username, &hash, client_challenge, get_ntlm_time())
        .map_err(AuthenticateError::Build)
}

/// Builds the Authenticate message with a caller-chosen client challenge and fallback time.
fn respond(challenge: &ChallengeMessage, username: &str, hash: &NtHash, client_challenge: [u8; 8], now: i64) -> Result<Vec<u8>, BuildError> {
    if username.is_empty() {
        return Err(BuildError::EmptyUsername);
    }
    let unsupported = challenge.flags & UNSUPPORTED_FLAGS;
    if !unsupported.is_empty() {
        return Err(BuildError::Unsupported { flags: unsupported });
    }

    // prefer the server's clock so that the response is not rejected for skew
    let time = challenge.target_info(TargetInfoType::Timestamp)
        .and_then(|ti| <[u8; 8]>::try_from(ti.data.as_slice()).ok())
        .map(i64::from_le_bytes)
        .unwrap_or(now);

    let target_info = challenge.target_information_bytes();
    let key = hash::ntlm_v2_key(hash, username, &challenge.target_name);
    let response = hash::respond_challenge_ntlm_v2(&key, challenge.challenge, client_challenge, &target_info, time);

    // LMv2 is only meaningful to servers that sent no target information
    let lm_response = if target_info.is_empty() {
        response.lm_response
    } else {
        Vec::new()
    };

    let message = Message::Authenticate(AuthenticateMessage {
        lm_response,
        ntlm_response: response.ntlm_response,
        domain_name: challenge.target_name.clone(),
        user_name: username.to_owned(),
        workstation_name: String::new(),
        session_key: Vec::new(),
        flags: challenge.flags,
        os_version: OsVersion::default(),
    });
    Ok(message.to_bytes()?)
}

/// Obtains the current time in tenths of a microsecond since 1601-01-01.
pub fn get_ntlm_time() -> i64 {
    let windows_epoch = NaiveDate::from_ymd_opt(1601, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());
    match windows_epoch {
        Some(epoch) => {
            let elapsed = Utc::now() - epoch;
            elapsed.num_microseconds()
                .map(|us| us * 10)
                .unwrap_or(i64::MAX)
        },
        None => 0,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TargetInfoEntry;

    const PASSWORD_HASH: &str = "a4f49c406510bdcab6824ee7c30fd852";

    fn challenge(flags: Flags, target_information: Vec<TargetInfoEntry>) -> ChallengeMessage {
        ChallengeMessage {
            target_name: "Domain".to_owned(),
            flags,
            challenge: [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef],
            context: (0, 0),
            target_information,
            os_version: OsVersion::default(),
        }
    }

    fn parse_authenticate(bytes: &[u8]) -> AuthenticateMessage {
        match Message::try_from(bytes).unwrap() {
            Message::Authenticate(a) => a,
            other => panic!("expected Authenticate, got {:?}", other),
        }
    }

    #[test]
    fn negotiate_announces_supplied_fields() {
        let bytes = build_negotiate("CORP", "WS01").unwrap();
        let negotiate = match Message::try_from(bytes.as_slice()).unwrap() {
            Message::Negotiate(n) => n,
            other => panic!("expected Negotiate, got {:?}", other),
        };
        assert_eq!(negotiate.supplied_domain, "CORP");
        assert_eq!(negotiate.supplied_workstation, "WS01");
        assert!(negotiate.flags.contains(NEGOTIATE_FLAGS));
        assert!(negotiate.flags.contains(Flags::NEGOTIATE_DOMAIN_SUPPLIED | Flags::NEGOTIATE_WORKSTATION_SUPPLIED));
    }

    #[test]
    fn negotiate_with_empty_workstation() {
        let bytes = build_negotiate("CORP", "").unwrap();
        let negotiate = match Message::try_from(bytes.as_slice()).unwrap() {
            Message::Negotiate(n) => n,
            other => panic!("expected Negotiate, got {:?}", other),
        };
        assert_eq!(negotiate.supplied_workstation, "");
        assert!(!negotiate.flags.contains(Flags::NEGOTIATE_WORKSTATION_SUPPLIED));
    }

    #[test]
    fn negotiate_rejects_oversized_domain() {
        let domain = "D".repeat(70_000);
        assert_eq!(build_negotiate(&domain, "WS01"), Err(StoringError::TooLong { length: 70_000 }));
    }

    #[test]
    fn authenticate_uses_challenge_target_and_flags() {
        let flags = Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM | Flags::NEGOTIATE_TARGET_INFO;
        let timestamp = 0x01d9_0000_0000_0000i64;
        let c = challenge(flags, vec![
            TargetInfoEntry::from_string(TargetInfoType::NtDomain, "Domain"),
            TargetInfoEntry { entry_type: TargetInfoType::Timestamp, data: timestamp.to_le_bytes().to_vec() },
            TargetInfoEntry { entry_type: TargetInfoType::Terminator, data: Vec::new() },
        ]);
        let hash: NtHash = PASSWORD_HASH.parse().unwrap();

        let bytes = respond(&c, "alice", &hash, [0xaa; 8], 42).unwrap();
        let auth = parse_authenticate(&bytes);

        assert_eq!(auth.user_name, "alice");
        assert_eq!(auth.domain_name, "Domain");
        assert_eq!(auth.workstation_name, "");
        assert_eq!(auth.flags, flags);
        assert!(auth.lm_response.is_empty());

        let key = hash::ntlm_v2_key(&hash, "alice", "Domain");
        let expected = hash::respond_challenge_ntlm_v2(&key, c.challenge, [0xaa; 8], &c.target_information_bytes(), timestamp);
        assert_eq!(auth.ntlm_response, expected.ntlm_response);
    }

    #[test]
    fn authenticate_without_target_info_carries_lm_v2() {
        let c = challenge(Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM, Vec::new());
        let hash: NtHash = PASSWORD_HASH.parse().unwrap();

        let auth = parse_authenticate(&respond(&c, "User", &hash, [0xaa; 8], 0).unwrap());
        assert_eq!(auth.lm_response, hex::decode("86c35097ac9cec102554764a57cccc19aaaaaaaaaaaaaaaa").unwrap());
    }

    #[test]
    fn authenticate_from_bytes() {
        let c = challenge(Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM, Vec::new());
        let bytes = Message::Challenge(c).to_bytes().unwrap();

        let auth = parse_authenticate(&build_authenticate(&bytes, "alice", PASSWORD_HASH).unwrap());
        assert_eq!(auth.user_name, "alice");
        assert_eq!(auth.ntlm_response.len(), 16 + 28 + 4);
    }

    #[test]
    fn authenticate_rejects_garbage() {
        assert!(matches!(
            build_authenticate(b"definitely not NTLM", "alice", PASSWORD_HASH),
            Err(AuthenticateError::Challenge(ParsingError::MagicMismatch { .. })),
        ));
    }

    #[test]
    fn authenticate_rejects_wrong_message_type() {
        let negotiate = build_negotiate("CORP", "WS01").unwrap();
        assert_eq!(
            build_authenticate(&negotiate, "alice", PASSWORD_HASH),
            Err(AuthenticateError::Challenge(ParsingError::UnexpectedMessageType { expected: 2, obtained: 1 })),
        );
    }

    #[test]
    fn authenticate_rejects_bad_hash() {
        let c = challenge(Flags::NEGOTIATE_UNICODE, Vec::new());
        let bytes = Message::Challenge(c).to_bytes().unwrap();
        assert_eq!(
            build_authenticate(&bytes, "alice", "not-a-hash"),
            Err(AuthenticateError::Build(BuildError::InvalidHash(InvalidHash { length: 10 }))),
        );
    }

    #[test]
    fn authenticate_rejects_key_exchange() {
        let c = challenge(Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_KEY_EXCHANGE, Vec::new());
        let hash: NtHash = PASSWORD_HASH.parse().unwrap();
        assert_eq!(
            respond(&c, "alice", &hash, [0; 8], 0),
            Err(BuildError::Unsupported { flags: Flags::NEGOTIATE_KEY_EXCHANGE }),
        );
    }

    #[test]
    fn authenticate_rejects_empty_username() {
        let c = challenge(Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM, Vec::new());
        let bytes = Message::Challenge(c).to_bytes().unwrap();
        assert_eq!(
            build_authenticate(&bytes, "", PASSWORD_HASH),
            Err(AuthenticateError::Build(BuildError::EmptyUsername)),
        );
    }

    #[test]
    fn ntlm_time_is_after_2020() {
        // 2020-01-01 in tenths of a microsecond since 1601
        assert!(get_ntlm_time() > 132_223_104_000_000_000);
    }
}
