//! The FUS "logic check" scrambling function.

use log::warn;

/// Minimum input length accepted by [`logic_check`]
pub const LOGIC_CHECK_MIN_INPUT: usize = 16;

/// Scramble `input` using `pattern`. For every byte in the pattern, the output
/// gets `input[b & 0xf]`, so the output has as many characters as the pattern
/// has bytes. Nonces are not guaranteed to be UTF-8, so the pattern is raw.
///
/// If the input has fewer than 16 bytes, an empty string is returned. The
/// server accepts this for short filenames during binary init, so it is not
/// treated as an error.
pub fn logic_check(input: &str, pattern: &[u8]) -> String {
    let input = input.as_bytes();

    if input.len() < LOGIC_CHECK_MIN_INPUT {
        warn!("Logic check input is shorter than {} bytes", LOGIC_CHECK_MIN_INPUT);
        return String::new();
    }

    pattern.iter()
        .map(|&b| input[(b & 0xf) as usize] as char)
        .collect()
}

/// Compute the logic check input for a binary filename. The last extension is
/// removed and the final 16 characters of what remains are used. Shorter names
/// are returned whole.
pub fn filename_check_input(filename: &str) -> &str {
    let base = match filename.rfind('.') {
        Some(n) => &filename[..n],
        None => filename,
    };

    if base.len() < LOGIC_CHECK_MIN_INPUT {
        base
    } else {
        // Filenames from the server are ASCII. Fall back to the whole base if
        // the cut would land inside a multi-byte character.
        base.get(base.len() - LOGIC_CHECK_MIN_INPUT..).unwrap_or(base)
    }
}
