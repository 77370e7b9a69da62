//! Conversion between Rust strings and the "OEM" character set.
//!
//! The Negotiate message carries the supplied domain and workstation in the OEM character set
//! regardless of any Unicode negotiation. On Windows, this is the configured ANSI code page and the
//! conversion is delegated to the operating system. Other systems have no such concept; the vast
//! majority of them use UTF-8, so that is what is used there.


#[cfg(windows)]
mod imp {
    use windows::Win32::Globalization::{
        CP_ACP, MB_ERR_INVALID_CHARS, MB_PRECOMPOSED, MultiByteToWideChar, WC_COMPOSITECHECK,
        WideCharToMultiByte,
    };

    pub fn decode(oem: &[u8]) -> Option<String> {
        if oem.is_empty() {
            return Some(String::new());
        }

        // the first call only measures
        let needed: usize = unsafe {
            MultiByteToWideChar(CP_ACP, MB_ERR_INVALID_CHARS | MB_PRECOMPOSED, oem, None)
        }.try_into().ok()?;
        if needed == 0 {
            return None;
        }

        let mut wide = vec![0u16; needed];
        let written: usize = unsafe {
            MultiByteToWideChar(CP_ACP, MB_ERR_INVALID_CHARS | MB_PRECOMPOSED, oem, Some(wide.as_mut_slice()))
        }.try_into().ok()?;
        if written == 0 {
            return None;
        }
        wide.truncate(written);

        String::from_utf16(&wide).ok()
    }

    pub fn encode(text: &str) -> Option<Vec<u8>> {
        if text.is_empty() {
            return Some(Vec::new());
        }

        let wide: Vec<u16> = text.encode_utf16().collect();

        let needed: usize = unsafe {
            WideCharToMultiByte(CP_ACP, WC_COMPOSITECHECK, &wide, None, None, None)
        }.try_into().ok()?;
        if needed == 0 {
            return None;
        }

        let mut oem = vec![0u8; needed];
        let written: usize = unsafe {
            WideCharToMultiByte(CP_ACP, WC_COMPOSITECHECK, &wide, Some(oem.as_mut_slice()), None, None)
        }.try_into().ok()?;
        if written == 0 {
            return None;
        }
        oem.truncate(written);

        Some(oem)
    }
}

#[cfg(not(windows))]
mod imp {
    pub fn decode(oem: &[u8]) -> Option<String> {
        std::str::from_utf8(oem)
            .ok()
            .map(|s| s.to_owned())
    }

    pub fn encode(text: &str) -> Option<Vec<u8>> {
        Some(text.as_bytes().to_vec())
    }
}


/// Decodes a string stored in the OEM character set. Returns `None` if the bytes are not valid in
/// that character set.
pub(crate) fn decode(oem: &[u8]) -> Option<String> {
    imp::decode(oem)
}

/// Encodes a string into the OEM character set. Returns `None` if the string contains characters
/// that the character set cannot represent.
pub(crate) fn encode(text: &str) -> Option<Vec<u8>> {
    imp::encode(text)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        assert_eq!(encode("WORKSTATION").as_deref(), Some(&b"WORKSTATION"[..]));
        assert_eq!(decode(b"CORP").as_deref(), Some("CORP"));
    }

    #[test]
    fn empty_is_empty() {
        assert_eq!(encode(""), Some(Vec::new()));
        assert_eq!(decode(b""), Some(String::new()));
    }

    #[cfg(not(windows))]
    #[test]
    fn invalid_utf8_is_rejected() {
        assert_eq!(decode(&[0xFF, 0xFE, 0x41]), None);
    }
}
