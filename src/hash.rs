//! Password hash derivation and the NTLMv2 response computation keyed by it.
//!
//! Everything downstream of [`NtHash`] works without the plaintext password, which is what makes
//! "pass-the-hash" credentials possible: the hash is derived once, stored, and used from then on.


use std::fmt;
use std::str::FromStr;

use digest::Digest;
use hmac::{Hmac, Mac};
use md4::Md4;
use md5::Md5;


type HmacMd5 = Hmac<Md5>;


/// Derives the NT hash of a password and renders it as 32 lowercase hexadecimal digits.
///
/// The password bytes are interpreted as UTF-8; invalid sequences are replaced by U+FFFD before
/// hashing.
pub fn derive_hash(password: &[u8]) -> String {
    NtHash::from_password(&String::from_utf8_lossy(password)).to_string()
}


/// The NT hash ("NTOWFv1") of a password: MD4 over the password encoded as UTF-16LE.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct NtHash(pub [u8; 16]);
impl NtHash {
    pub fn from_password(password: &str) -> Self {
        let password_bytes: Vec<u8> = password.encode_utf16()
            .flat_map(|p| p.to_le_bytes())
            .collect();
        let mut md4 = <Md4 as Digest>::new();
        md4.update(&password_bytes);
        Self(to_array(&md4.finalize()))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}
impl fmt::Display for NtHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
impl fmt::Debug for NtHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NtHash({})", self)
    }
}
impl FromStr for NtHash {
    type Err = InvalidHash;

    /// Parses 32 hexadecimal digits of either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| InvalidHash { length: s.len() })?;
        Ok(Self(bytes))
    }
}

/// A password hash that is not 32 hexadecimal digits.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct InvalidHash {
    /// Length of the rejected input; the input itself is kept out of error messages.
    pub length: usize,
}
impl fmt::Display for InvalidHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "password hash of {} characters is not 32 hexadecimal digits", self.length)
    }
}
impl std::error::Error for InvalidHash {
}


/// Derives the NTLMv2 key ("NTOWFv2").
///
/// This is HMAC-MD5 keyed with the NT hash over the uppercased username followed by the
/// unchanged-case domain, both encoded as UTF-16LE.
pub fn ntlm_v2_key(hash: &NtHash, username: &str, domain: &str) -> [u8; 16] {
    let mut hmac_md5 = new_hmac(hash.as_bytes());
    let identity: Vec<u8> = username.to_uppercase()
        .encode_utf16()
        .chain(domain.encode_utf16())
        .flat_map(|p| p.to_le_bytes())
        .collect();
    hmac_md5.update(&identity);
    to_array(&hmac_md5.finalize().into_bytes())
}

/// Responses to a server challenge according to NTLMv2.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NtlmV2Response {
    /// The LMv2 response: HMAC over both challenges followed by the client challenge.
    pub lm_response: Vec<u8>,

    /// The NTLMv2 response: the NTProofStr followed by the client blob.
    pub ntlm_response: Vec<u8>,
}
impl NtlmV2Response {
    /// The first 16 bytes of the NTLMv2 response, proving knowledge of the key.
    pub fn nt_proof(&self) -> &[u8] {
        &self.ntlm_response[..16]
    }
}

/// Calculates the NTLMv2 responses to `server_challenge`.
///
/// `time` is in tenths of a microsecond since 1601-01-01 and, together with the target info and
/// the client challenge, protects against replay.
pub fn respond_challenge_ntlm_v2(
    key: &[u8; 16],
    server_challenge: [u8; 8],
    client_challenge: [u8; 8],
    target_info: &[u8],
    time: i64,
) -> NtlmV2Response {
    let mut blob = Vec::with_capacity(28 + target_info.len() + 4);
    blob.push(0x01); // RespType
    blob.push(0x01); // HiRespType
    blob.extend_from_slice(&[0u8; 6]);
    blob.extend_from_slice(&time.to_le_bytes());
    blob.extend_from_slice(&client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0u8; 4]);

    let nt_proof: [u8; 16] = {
        let mut hmac_md5 = new_hmac(key);
        hmac_md5.update(&server_challenge);
        hmac_md5.update(&blob);
        to_array(&hmac_md5.finalize().into_bytes())
    };

    let mut ntlm_response = Vec::with_capacity(16 + blob.len());
    ntlm_response.extend_from_slice(&nt_proof);
    ntlm_response.extend_from_slice(&blob);

    let mut lm_response = Vec::with_capacity(16 + 8);
    {
        let mut hmac_md5 = new_hmac(key);
        hmac_md5.update(&server_challenge);
        hmac_md5.update(&client_challenge);
        lm_response.extend_from_slice(&hmac_md5.finalize().into_bytes());
    }
    lm_response.extend_from_slice(&client_challenge);

    NtlmV2Response {
        lm_response,
        ntlm_response,
    }
}

fn new_hmac(key: &[u8]) -> HmacMd5 {
    <HmacMd5 as Mac>::new_from_slice(key)
        .expect("HMAC accepts keys of any length")
}

fn to_array(digest: &[u8]) -> [u8; 16] {
    let mut ret = [0u8; 16];
    ret.copy_from_slice(digest);
    ret
}


#[cfg(test)]
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn nt_hash_of_password() {
        assert_eq!(derive_hash(b"Password"), "a4f49c406510bdcab6824ee7c30fd852");
    }

    #[test]
    fn nt_hash_of_empty_password() {
        assert_eq!(derive_hash(b""), "31d6cfe0d16ae931b73c59d7e0c089c0");
    }

    #[test]
    fn derive_hash_is_stable_and_lowercase() {
        let first = derive_hash("S3cret-Pässwörd".as_bytes());
        let second = derive_hash("S3cret-Pässwörd".as_bytes());
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn derive_hash_uses_utf16_not_utf8() {
        // "ä" is C3 A4 in UTF-8 but E4 00 in UTF-16LE
        let mut md4 = <Md4 as Digest>::new();
        md4.update([0xE4, 0x00]);
        assert_eq!(derive_hash("ä".as_bytes()), hex::encode(md4.finalize()));
    }

    #[test]
    fn derive_hash_replaces_invalid_utf8() {
        assert_eq!(derive_hash(&[0xFF]), derive_hash("\u{FFFD}".as_bytes()));
    }

    #[test]
    fn parse_hash_any_case() {
        let lower: NtHash = "a4f49c406510bdcab6824ee7c30fd852".parse().unwrap();
        let upper: NtHash = "A4F49C406510BDCAB6824EE7C30FD852".parse().unwrap();
        assert_eq!(lower, upper);
        assert_eq!(upper.to_string(), "a4f49c406510bdcab6824ee7c30fd852");
    }

    #[test]
    fn reject_malformed_hash() {
        assert_eq!("a4f49c".parse::<NtHash>(), Err(InvalidHash { length: 6 }));
        assert_eq!(
            "zz f49c406510bdcab6824ee7c30fd852".parse::<NtHash>(),
            Err(InvalidHash { length: 33 }),
        );
    }

    #[test]
    fn ntlm_v2_key_vector() {
        let hash = NtHash::from_password("Password");
        assert_eq!(
            Vec::from(ntlm_v2_key(&hash, "User", "Domain")),
            unhex("0c868a403bfd7a93a3001ef22ef02e3f"),
        );
    }

    #[test]
    fn lm_v2_response_vector() {
        let key = ntlm_v2_key(&NtHash::from_password("Password"), "User", "Domain");
        let response = respond_challenge_ntlm_v2(
            &key,
            [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef],
            [0xaa; 8],
            &[],
            0,
        );
        assert_eq!(response.lm_response, unhex("86c35097ac9cec102554764a57cccc19aaaaaaaaaaaaaaaa"));
    }

    #[test]
    fn ntlm_v2_blob_layout() {
        let key = [0x11; 16];
        let target_info = [0x02, 0x00, 0x02, 0x00, 0x41, 0x00, 0x00, 0x00, 0x00, 0x00];
        let response = respond_challenge_ntlm_v2(&key, [0x22; 8], [0x33; 8], &target_info, 0x0102_0304_0506_0708);

        let blob = &response.ntlm_response[16..];
        assert_eq!(&blob[0..8], &[1, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&blob[8..16], &0x0102_0304_0506_0708i64.to_le_bytes());
        assert_eq!(&blob[16..24], &[0x33; 8]);
        assert_eq!(&blob[24..28], &[0; 4]);
        assert_eq!(&blob[28..28 + target_info.len()], &target_info);
        assert_eq!(&blob[28 + target_info.len()..], &[0; 4]);

        let mut hmac_md5 = new_hmac(&key);
        hmac_md5.update(&[0x22; 8]);
        hmac_md5.update(blob);
        assert_eq!(response.nt_proof(), hmac_md5.finalize().into_bytes().as_slice());
    }
}
