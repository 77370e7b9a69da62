//! NTLM message structures and their binary representation.
//!
//! All three message types share a 12-byte header (the `NTLMSSP\0` magic followed by the 32-bit
//! message type). Variable-length fields are described by [`SecurityBuffer`]s in the fixed part of
//! each message and stored in a payload block appended after it.


use std::fmt;

use bitflags::bitflags;

use crate::oem;


/// The magic value at the start of every NTLMSSP message.
pub const NTLMSSP_MAGIC: [u8; 8] = *b"NTLMSSP\0";

/// Length of the magic and the message type, which precede every message body.
const HEADER_LEN: usize = 8 + 4;


bitflags! {
    /// NTLM negotiation flags.
    #[derive(Clone, Copy, Debug, Default, Hash, Eq, Ord, PartialEq, PartialOrd)]
    pub struct Flags: u32 {
        const NEGOTIATE_UNICODE = 0x0000_0001;
        const NEGOTIATE_OEM = 0x0000_0002;
        const REQUEST_TARGET = 0x0000_0004;
        const UNKNOWN_8 = 0x0000_0008;
        const NEGOTIATE_SIGN = 0x0000_0010;
        const NEGOTIATE_SEAL = 0x0000_0020;
        const NEGOTIATE_DATAGRAM = 0x0000_0040;
        const NEGOTIATE_LANMAN_KEY = 0x0000_0080;
        const NEGOTIATE_NETWARE = 0x0000_0100;
        const NEGOTIATE_NTLM = 0x0000_0200;
        const UNKNOWN_400 = 0x0000_0400;
        const NEGOTIATE_ANONYMOUS = 0x0000_0800;
        const NEGOTIATE_DOMAIN_SUPPLIED = 0x0000_1000;
        const NEGOTIATE_WORKSTATION_SUPPLIED = 0x0000_2000;
        const NEGOTIATE_LOCAL_CALL = 0x0000_4000;
        const NEGOTIATE_ALWAYS_SIGN = 0x0000_8000;
        const TARGET_TYPE_DOMAIN = 0x0001_0000;
        const TARGET_TYPE_SERVER = 0x0002_0000;
        const TARGET_TYPE_SHARE = 0x0004_0000;
        const NEGOTIATE_NTLM2_KEY = 0x0008_0000;
        const REQUEST_INIT_RESPONSE = 0x0010_0000;
        const REQUEST_ACCEPT_RESPONSE = 0x0020_0000;
        const REQUEST_NON_NT_SESSION_KEY = 0x0040_0000;
        const NEGOTIATE_TARGET_INFO = 0x0080_0000;
        const UNKNOWN_1000000 = 0x0100_0000;
        const NEGOTIATE_VERSION = 0x0200_0000;
        const UNKNOWN_4000000 = 0x0400_0000;
        const UNKNOWN_8000000 = 0x0800_0000;
        const UNKNOWN_10000000 = 0x1000_0000;
        const NEGOTIATE_128BIT = 0x2000_0000;
        const NEGOTIATE_KEY_EXCHANGE = 0x4000_0000;
        const NEGOTIATE_56BIT = 0x8000_0000;
    }
}


/// An error that may occur while parsing an NTLM message.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ParsingError {
    /// The message is shorter than its header.
    ShortHeader { expected_min_len: usize, obtained_len: usize },

    /// The magic value does not match `NTLMSSP\0`.
    MagicMismatch { expected: [u8; 8], obtained: Vec<u8> },

    /// The message is valid but of a different type than required.
    UnexpectedMessageType { expected: u32, obtained: u32 },

    /// A fixed-size internal item has a different length than expected.
    ItemLengthMismatch { expected: usize, obtained: usize },

    /// An internal item is shorter than expected.
    ItemMinLengthMismatch { expected_at_least: usize, obtained: usize },

    /// An internal item's length is not divisible by an expected divisor.
    ItemLengthNotDivisible { expected_divisor: usize, obtained_length: usize },

    /// A byte string cannot be decoded using the OEM character set.
    InvalidOemEncoding { value: Vec<u8> },

    /// A string of 16-bit code units is not valid UTF-16.
    InvalidUtf16 { value: Vec<u16> },

    /// A security buffer offset does not fit into the platform's address space.
    OffsetTooLarge { offset: u32 },

    /// A security buffer starts outside of the message.
    StartOutOfRange { start: usize, length: usize },

    /// A security buffer ends outside of the message.
    EndOutOfRange { end: usize, length: usize },

    /// Neither Unicode nor OEM encoding was selected.
    NeitherUnicodeNorOem,
}
impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortHeader { expected_min_len, obtained_len }
                => write!(f, "header too short (expected at least {} bytes, obtained {})", expected_min_len, obtained_len),
            Self::MagicMismatch { expected, obtained }
                => write!(f, "mismatched magic (expected {:?}, obtained {:?})", expected, obtained),
            Self::UnexpectedMessageType { expected, obtained }
                => write!(f, "unexpected message type (expected {}, obtained {})", expected, obtained),
            Self::ItemLengthMismatch { expected, obtained }
                => write!(f, "wrong length for an internal item (expected {}, obtained {})", expected, obtained),
            Self::ItemMinLengthMismatch { expected_at_least, obtained }
                => write!(f, "insufficient length for an internal item (expected at least {}, obtained {})", expected_at_least, obtained),
            Self::ItemLengthNotDivisible { expected_divisor, obtained_length }
                => write!(f, "item length {} not divisible by {}", obtained_length, expected_divisor),
            Self::InvalidOemEncoding { value }
                => write!(f, "failed to decode value with the OEM character set: {:?}", value),
            Self::InvalidUtf16 { value }
                => write!(f, "failed to decode value as UTF-16: {:?}", value),
            Self::OffsetTooLarge { offset }
                => write!(f, "offset {} is too large", offset),
            Self::StartOutOfRange { start, length }
                => write!(f, "start ({}) out of range (message has {} bytes)", start, length),
            Self::EndOutOfRange { end, length }
                => write!(f, "end ({}) out of range (message has {} bytes)", end, length),
            Self::NeitherUnicodeNorOem
                => write!(f, "neither Unicode nor OEM encoding was selected"),
        }
    }
}
impl std::error::Error for ParsingError {
}

/// An error that may occur while serializing an NTLM message.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StoringError {
    /// The string cannot be encoded using the OEM character set.
    NonOemEncodable { string: String },

    /// A field is too long to be described by a security buffer.
    TooLong { length: usize },

    /// Neither Unicode nor OEM encoding was selected.
    NeitherUnicodeNorOem,
}
impl fmt::Display for StoringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonOemEncodable { string }
                => write!(f, "failed to encode {:?} using the OEM character set", string),
            Self::TooLong { length }
                => write!(f, "field of {} bytes exceeds the maximum of {}", length, u16::MAX),
            Self::NeitherUnicodeNorOem
                => write!(f, "neither Unicode nor OEM encoding was selected"),
        }
    }
}
impl std::error::Error for StoringError {
}


/// An NTLM message.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Message {
    Negotiate(NegotiateMessage),
    Challenge(ChallengeMessage),
    Authenticate(AuthenticateMessage),
    Other(u32, Vec<u8>),
}
impl Message {
    pub const NEGOTIATE: u32 = 0x0000_0001;
    pub const CHALLENGE: u32 = 0x0000_0002;
    pub const AUTHENTICATE: u32 = 0x0000_0003;

    /// Returns the 32-bit number identifying the type of this message.
    pub fn message_number(&self) -> u32 {
        match self {
            Self::Negotiate(_) => Self::NEGOTIATE,
            Self::Challenge(_) => Self::CHALLENGE,
            Self::Authenticate(_) => Self::AUTHENTICATE,
            Self::Other(t, _data) => *t,
        }
    }

    /// Serializes the message, including magic and message type.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&NTLMSSP_MAGIC);
        buf.extend_from_slice(&self.message_number().to_le_bytes());
        match self {
            Self::Negotiate(t1m) => buf.extend_from_slice(&t1m.to_bytes()?),
            Self::Challenge(t2m) => buf.extend_from_slice(&t2m.to_bytes()?),
            Self::Authenticate(t3m) => buf.extend_from_slice(&t3m.to_bytes()?),
            Self::Other(_msg_num, data) => buf.extend_from_slice(data),
        }
        Ok(buf)
    }
}
impl TryFrom<&[u8]> for Message {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() < HEADER_LEN {
            return Err(ParsingError::ShortHeader { expected_min_len: HEADER_LEN, obtained_len: value.len() });
        }
        if value[0..8] != NTLMSSP_MAGIC {
            return Err(ParsingError::MagicMismatch { expected: NTLMSSP_MAGIC, obtained: Vec::from(&value[0..8]) });
        }
        let body = &value[HEADER_LEN..];
        match read_u32(value, 8) {
            Self::NEGOTIATE => NegotiateMessage::try_from(body).map(Message::Negotiate),
            Self::CHALLENGE => ChallengeMessage::try_from(body).map(Message::Challenge),
            Self::AUTHENTICATE => AuthenticateMessage::try_from(body).map(Message::Authenticate),
            other => Ok(Message::Other(other, Vec::from(body))),
        }
    }
}

/// Operating system version and NTLM revision.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OsVersion {
    pub major_version: u8,
    pub minor_version: u8,
    pub build_number: u16,
    pub reserved: [u8; 3],
    pub ntlm_revision: u8,
}

/// The Negotiate message (type 1), sent by the client to open the exchange.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NegotiateMessage {
    pub flags: Flags,

    /// The domain against which the client wishes to authenticate. Always OEM-encoded.
    pub supplied_domain: String,

    /// The hostname of the client. Always OEM-encoded.
    pub supplied_workstation: String,

    pub os_version: OsVersion,
}

/// The Challenge message (type 2), sent by the server in response to a Negotiate message.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ChallengeMessage {
    /// The name of the authentication realm, usually the server's domain.
    pub target_name: String,

    /// The flags the server has accepted.
    pub flags: Flags,

    /// The server challenge.
    pub challenge: [u8; 8],

    /// Reserved; usually zero.
    pub context: (u32, u32),

    pub target_information: Vec<TargetInfoEntry>,

    pub os_version: OsVersion,
}

/// The Authenticate message (type 3), the client's proof of knowledge of the credentials.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AuthenticateMessage {
    pub lm_response: Vec<u8>,
    pub ntlm_response: Vec<u8>,
    pub domain_name: String,
    pub user_name: String,
    pub workstation_name: String,
    pub session_key: Vec<u8>,
    pub flags: Flags,
    pub os_version: OsVersion,
}

/// Length, capacity and offset of a variable-length field within a message.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SecurityBuffer {
    pub length: u16,
    pub capacity: u16,
    pub offset: u32,
}

/// The type of an AV pair in a Challenge message's target information.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TargetInfoType {
    Terminator,
    NtServer,
    NtDomain,
    DnsDomain,
    DnsServer,
    DnsForest,
    Flags,
    Timestamp,
    SingleHost,
    TargetName,
    ChannelBindings,
    Unknown(u16),
}
impl From<TargetInfoType> for u16 {
    fn from(t: TargetInfoType) -> Self {
        match t {
            TargetInfoType::Terminator => 0x0000,
            TargetInfoType::NtServer => 0x0001,
            TargetInfoType::NtDomain => 0x0002,
            TargetInfoType::DnsServer => 0x0003,
            TargetInfoType::DnsDomain => 0x0004,
            TargetInfoType::DnsForest => 0x0005,
            TargetInfoType::Flags => 0x0006,
            TargetInfoType::Timestamp => 0x0007,
            TargetInfoType::SingleHost => 0x0008,
            TargetInfoType::TargetName => 0x0009,
            TargetInfoType::ChannelBindings => 0x000A,
            TargetInfoType::Unknown(w) => w,
        }
    }
}
impl From<u16> for TargetInfoType {
    fn from(w: u16) -> Self {
        match w {
            0x0000 => TargetInfoType::Terminator,
            0x0001 => TargetInfoType::NtServer,
            0x0002 => TargetInfoType::NtDomain,
            0x0003 => TargetInfoType::DnsServer,
            0x0004 => TargetInfoType::DnsDomain,
            0x0005 => TargetInfoType::DnsForest,
            0x0006 => TargetInfoType::Flags,
            0x0007 => TargetInfoType::Timestamp,
            0x0008 => TargetInfoType::SingleHost,
            0x0009 => TargetInfoType::TargetName,
            0x000A => TargetInfoType::ChannelBindings,
            other => TargetInfoType::Unknown(other),
        }
    }
}

/// An AV pair in a Challenge message's target information.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TargetInfoEntry {
    pub entry_type: TargetInfoType,
    pub data: Vec<u8>,
}


// wire helpers


fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn utf16_le(text: &str) -> Vec<u8> {
    text.encode_utf16()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

/// Incrementally assembles a message body: the fixed part grows in `fixed`, while the contents of
/// security buffers collect in `payload` and are appended once the fixed part is complete.
struct BodyWriter {
    fixed: Vec<u8>,
    payload: Vec<u8>,
    next_offset: u32,
}
impl BodyWriter {
    /// `fixed_len` is the length of the fixed part of the body, excluding magic and message type.
    fn new(fixed_len: usize) -> Self {
        Self {
            fixed: Vec::with_capacity(fixed_len),
            payload: Vec::new(),
            // fixed_len is a small constant
            next_offset: (HEADER_LEN + fixed_len) as u32,
        }
    }

    fn raw(&mut self, bytes: &[u8]) {
        self.fixed.extend_from_slice(bytes);
    }

    fn buffer(&mut self, data: &[u8]) -> Result<(), StoringError> {
        let mut sb = SecurityBuffer::for_slice(data)?;
        sb.offset = self.next_offset;
        self.fixed.extend_from_slice(&sb.to_bytes());
        self.payload.extend_from_slice(data);
        self.next_offset += u32::from(sb.length);
        Ok(())
    }

    /// Stores a string as UTF-16 or OEM depending on the negotiated `flags`.
    fn string(&mut self, flags: Flags, text: &str) -> Result<(), StoringError> {
        if flags.contains(Flags::NEGOTIATE_UNICODE) {
            self.buffer(&utf16_le(text))
        } else if flags.contains(Flags::NEGOTIATE_OEM) {
            self.oem_string(text)
        } else {
            Err(StoringError::NeitherUnicodeNorOem)
        }
    }

    fn oem_string(&mut self, text: &str) -> Result<(), StoringError> {
        let bytes = oem::encode(text)
            .ok_or_else(|| StoringError::NonOemEncodable { string: text.to_owned() })?;
        self.buffer(&bytes)
    }

    fn finish(mut self) -> Vec<u8> {
        self.fixed.append(&mut self.payload);
        self.fixed
    }
}

fn utf16_le_bytes_to_string(bytes: &[u8]) -> Result<String, ParsingError> {
    if bytes.len() % 2 != 0 {
        return Err(ParsingError::ItemLengthNotDivisible { expected_divisor: 2, obtained_length: bytes.len() });
    }
    let units: Vec<u16> = bytes.chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .or(Err(ParsingError::InvalidUtf16 { value: units }))
}

fn oem_bytes_to_string(bytes: &[u8]) -> Result<String, ParsingError> {
    oem::decode(bytes)
        .ok_or_else(|| ParsingError::InvalidOemEncoding { value: Vec::from(bytes) })
}

fn ntlm_bytes_to_string(flags: Flags, bytes: &[u8]) -> Result<String, ParsingError> {
    if flags.contains(Flags::NEGOTIATE_UNICODE) {
        utf16_le_bytes_to_string(bytes)
    } else if flags.contains(Flags::NEGOTIATE_OEM) {
        oem_bytes_to_string(bytes)
    } else {
        Err(ParsingError::NeitherUnicodeNorOem)
    }
}

fn require_len(body: &[u8], min: usize) -> Result<(), ParsingError> {
    if body.len() < min {
        Err(ParsingError::ItemMinLengthMismatch { expected_at_least: min, obtained: body.len() })
    } else {
        Ok(())
    }
}

fn os_version_if(flags: Flags, bytes: &[u8]) -> Result<OsVersion, ParsingError> {
    if flags.contains(Flags::NEGOTIATE_VERSION) {
        OsVersion::try_from(bytes)
    } else {
        Ok(OsVersion::default())
    }
}


impl OsVersion {
    pub fn to_bytes(&self) -> [u8; 8] {
        let build = self.build_number.to_le_bytes();
        [
            self.major_version, self.minor_version,
            build[0], build[1],
            self.reserved[0], self.reserved[1], self.reserved[2],
            self.ntlm_revision,
        ]
    }
}
impl TryFrom<&[u8]> for OsVersion {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != 8 {
            return Err(ParsingError::ItemLengthMismatch { expected: 8, obtained: value.len() });
        }
        Ok(OsVersion {
            major_version: value[0],
            minor_version: value[1],
            build_number: read_u16(value, 2),
            reserved: [value[4], value[5], value[6]],
            ntlm_revision: value[7],
        })
    }
}

impl NegotiateMessage {
    /// Serializes the message body (everything after the message type).
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let mut w = BodyWriter::new(
            4 // flags
            + 8 // supplied domain secbuffer
            + 8 // supplied workstation secbuffer
            + 8 // version
        );
        w.raw(&self.flags.bits().to_le_bytes());
        w.oem_string(&self.supplied_domain)?;
        w.oem_string(&self.supplied_workstation)?;
        w.raw(&self.os_version.to_bytes());
        Ok(w.finish())
    }
}
impl TryFrom<&[u8]> for NegotiateMessage {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        // the version field may be absent in messages from older clients
        require_len(value, 20)?;
        let flags = Flags::from_bits_retain(read_u32(value, 0));
        let supplied_domain_secbuf = SecurityBuffer::try_from(&value[4..12])?;
        let supplied_workstation_secbuf = SecurityBuffer::try_from(&value[12..20])?;
        let os_version = if value.len() >= 28 {
            os_version_if(flags, &value[20..28])?
        } else {
            OsVersion::default()
        };

        let supplied_domain = oem_bytes_to_string(supplied_domain_secbuf.extract(value)?)?;
        let supplied_workstation = oem_bytes_to_string(supplied_workstation_secbuf.extract(value)?)?;

        Ok(Self {
            flags,
            supplied_domain,
            supplied_workstation,
            os_version,
        })
    }
}

impl ChallengeMessage {
    /// Serializes the message body (everything after the message type).
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let mut w = BodyWriter::new(
            8 // target name secbuffer
            + 4 // flags
            + 8 // challenge
            + 8 // context
            + 8 // target information secbuffer
            + 8 // version
        );
        w.string(self.flags, &self.target_name)?;
        w.raw(&self.flags.bits().to_le_bytes());
        w.raw(&self.challenge);
        w.raw(&self.context.0.to_le_bytes());
        w.raw(&self.context.1.to_le_bytes());
        w.buffer(&self.target_information_bytes())?;
        w.raw(&self.os_version.to_bytes());
        Ok(w.finish())
    }

    /// The target information in its wire format, as it enters the NTLMv2 response.
    pub fn target_information_bytes(&self) -> Vec<u8> {
        self.target_information.iter()
            .flat_map(|ti| ti.to_bytes())
            .collect()
    }

    /// Looks up the first target information entry of the given type.
    pub fn target_info(&self, entry_type: TargetInfoType) -> Option<&TargetInfoEntry> {
        self.target_information.iter()
            .find(|ti| ti.entry_type == entry_type)
    }
}
impl TryFrom<&[u8]> for ChallengeMessage {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        // target info and version are optional, but servers send at least the context field
        require_len(value, 28)?;
        let target_name_secbuf = SecurityBuffer::try_from(&value[0..8])?;
        let flags = Flags::from_bits_retain(read_u32(value, 8));
        let mut challenge = [0u8; 8];
        challenge.copy_from_slice(&value[12..20]);
        let context = (read_u32(value, 20), read_u32(value, 24));
        let target_info_secbuf = if value.len() >= 36 {
            SecurityBuffer::try_from(&value[28..36])?
        } else {
            SecurityBuffer::default()
        };
        let os_version = if value.len() >= 44 {
            os_version_if(flags, &value[36..44])?
        } else {
            OsVersion::default()
        };

        let target_name = ntlm_bytes_to_string(flags, target_name_secbuf.extract(value)?)?;

        let mut rest = target_info_secbuf.extract(value)?;
        let mut target_information = Vec::new();
        while !rest.is_empty() {
            let (entry, next) = TargetInfoEntry::try_from_bytes(rest)?;
            let done = entry.entry_type == TargetInfoType::Terminator;
            target_information.push(entry);
            if done {
                break;
            }
            rest = next;
        }

        Ok(Self {
            target_name,
            flags,
            challenge,
            context,
            target_information,
            os_version,
        })
    }
}

impl AuthenticateMessage {
    /// Serializes the message body (everything after the message type).
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let mut w = BodyWriter::new(
            8 // LM response secbuffer
            + 8 // NTLM response secbuffer
            + 8 // domain name secbuffer
            + 8 // user name secbuffer
            + 8 // workstation name secbuffer
            + 8 // session key secbuffer
            + 4 // flags
            + 8 // version
        );
        w.buffer(&self.lm_response)?;
        w.buffer(&self.ntlm_response)?;
        w.string(self.flags, &self.domain_name)?;
        w.string(self.flags, &self.user_name)?;
        w.string(self.flags, &self.workstation_name)?;
        w.buffer(&self.session_key)?;
        w.raw(&self.flags.bits().to_le_bytes());
        w.raw(&self.os_version.to_bytes());
        Ok(w.finish())
    }
}
impl TryFrom<&[u8]> for AuthenticateMessage {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        require_len(value, 60)?;
        let lm_response_secbuf = SecurityBuffer::try_from(&value[0..8])?;
        let ntlm_response_secbuf = SecurityBuffer::try_from(&value[8..16])?;
        let domain_name_secbuf = SecurityBuffer::try_from(&value[16..24])?;
        let user_name_secbuf = SecurityBuffer::try_from(&value[24..32])?;
        let workstation_name_secbuf = SecurityBuffer::try_from(&value[32..40])?;
        let session_key_secbuf = SecurityBuffer::try_from(&value[40..48])?;
        let flags = Flags::from_bits_retain(read_u32(value, 48));
        let os_version = os_version_if(flags, &value[52..60])?;

        Ok(Self {
            lm_response: Vec::from(lm_response_secbuf.extract(value)?),
            ntlm_response: Vec::from(ntlm_response_secbuf.extract(value)?),
            domain_name: ntlm_bytes_to_string(flags, domain_name_secbuf.extract(value)?)?,
            user_name: ntlm_bytes_to_string(flags, user_name_secbuf.extract(value)?)?,
            workstation_name: ntlm_bytes_to_string(flags, workstation_name_secbuf.extract(value)?)?,
            session_key: Vec::from(session_key_secbuf.extract(value)?),
            flags,
            os_version,
        })
    }
}

impl SecurityBuffer {
    /// Describes the given slice, with the offset set to 0.
    pub fn for_slice(slice: &[u8]) -> Result<Self, StoringError> {
        let length: u16 = slice.len().try_into()
            .or(Err(StoringError::TooLong { length: slice.len() }))?;
        Ok(Self {
            length,
            capacity: length,
            offset: 0,
        })
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut ret = [0u8; 8];
        ret[0..2].copy_from_slice(&self.length.to_le_bytes());
        ret[2..4].copy_from_slice(&self.capacity.to_le_bytes());
        ret[4..8].copy_from_slice(&self.offset.to_le_bytes());
        ret
    }

    /// Extracts the described data from a message body.
    ///
    /// Offsets are relative to the start of the message, while `body` starts after the magic and
    /// message type; the difference is accounted for here.
    pub fn extract<'a>(&self, body: &'a [u8]) -> Result<&'a [u8], ParsingError> {
        if self.length == 0 {
            return Ok(&body[0..0]);
        }

        let message_len = body.len() + HEADER_LEN;
        let offset: usize = self.offset.try_into()
            .or(Err(ParsingError::OffsetTooLarge { offset: self.offset }))?;
        let start = match offset.checked_sub(HEADER_LEN) {
            Some(s) if s < body.len() => s,
            _ => return Err(ParsingError::StartOutOfRange { start: offset, length: message_len }),
        };
        let end = start + usize::from(self.length);
        if end > body.len() {
            return Err(ParsingError::EndOutOfRange { end: end + HEADER_LEN, length: message_len });
        }

        Ok(&body[start..end])
    }
}
impl TryFrom<&[u8]> for SecurityBuffer {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != 8 {
            return Err(ParsingError::ItemLengthMismatch { expected: 8, obtained: value.len() });
        }
        Ok(Self {
            length: read_u16(value, 0),
            capacity: read_u16(value, 2),
            offset: read_u32(value, 4),
        })
    }
}

impl TargetInfoEntry {
    /// Serializes the entry. Entries do not depend on the negotiated encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let entry_type: u16 = self.entry_type.into();
        // lengths beyond u16 cannot come out of parsing; saturate for hand-built entries
        let length = u16::try_from(self.data.len()).unwrap_or(u16::MAX);

        let mut ret = Vec::with_capacity(4 + self.data.len());
        ret.extend_from_slice(&entry_type.to_le_bytes());
        ret.extend_from_slice(&length.to_le_bytes());
        ret.extend_from_slice(&self.data[..usize::from(length)]);
        ret
    }

    /// Parses one entry from the start of `bytes`, returning it along with the remaining bytes.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<(Self, &[u8]), ParsingError> {
        require_len(bytes, 4)?;

        let entry_type = TargetInfoType::from(read_u16(bytes, 0));
        let length = usize::from(read_u16(bytes, 2));
        require_len(bytes, 4 + length)?;

        let entry = Self {
            entry_type,
            data: Vec::from(&bytes[4..4 + length]),
        };
        Ok((entry, &bytes[4 + length..]))
    }

    /// Creates an entry holding a UTF-16 string.
    pub fn from_string(entry_type: TargetInfoType, string: &str) -> Self {
        Self {
            entry_type,
            data: utf16_le(string),
        }
    }
}
