//! Prints the NT hash of a password read from standard input.
//!
//! The output can be stored in place of the password, e.g. in `NTLM_CREDENTIALS` as
//! `username@domain:hash`.


use std::io::{self, BufRead};
use std::process::ExitCode;


fn main() -> ExitCode {
    let mut line = Vec::new();
    if let Err(e) = io::stdin().lock().read_until(b'\n', &mut line) {
        eprintln!("failed to read password: {}", e);
        return ExitCode::FAILURE;
    }

    println!("{}", ntlmproxy::derive_hash(strip_line_ending(&line)));
    ExitCode::SUCCESS
}

/// Removes a trailing `\n` or `\r\n`, leaving any other bytes alone.
fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_endings() {
        assert_eq!(strip_line_ending(b"Password\n"), b"Password");
        assert_eq!(strip_line_ending(b"Password\r\n"), b"Password");
        assert_eq!(strip_line_ending(b"Password"), b"Password");
        assert_eq!(strip_line_ending(b" Password \n"), b" Password ");
    }

    #[test]
    fn invalid_utf8_is_hashed_lossily() {
        // Latin-1 "\xe4" read straight from a terminal
        let hashed = ntlmproxy::derive_hash(strip_line_ending(b"\xe4\n"));
        assert_eq!(hashed, ntlmproxy::derive_hash("\u{fffd}".as_bytes()));
    }
}
