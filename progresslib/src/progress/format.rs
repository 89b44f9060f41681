use std::{
    fmt,
    time::Duration,
};

use number_prefix::NumberPrefix;

/// Byte count shown with the largest fitting base 2 prefix.
#[derive(Clone, Copy, Debug)]
pub struct ByteSize(pub u64);

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match NumberPrefix::binary(self.0 as f64) {
            NumberPrefix::Standalone(n) => write!(f, "{n:.0}B"),
            NumberPrefix::Prefixed(prefix, n) => write!(f, "{n:.2}{prefix}B"),
        }
    }
}

/// Byte count always shown in GiB, for listing firmware sizes.
#[derive(Clone, Copy, Debug)]
pub struct GibSize(pub u64);

impl fmt::Display for GibSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} GiB", self.0 as f64 / (1u64 << 30) as f64)
    }
}

/// Whole seconds of a duration as `HH:MM:SS`. Hours are not wrapped.
#[derive(Clone, Copy, Debug)]
pub struct Clock(pub Duration);

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();

        write!(f, "{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_size() {
        assert_eq!(ByteSize(0).to_string(), "0B");
        assert_eq!(ByteSize(1023).to_string(), "1023B");
        assert_eq!(ByteSize(1024).to_string(), "1.00KiB");
        assert_eq!(ByteSize(1536).to_string(), "1.50KiB");
        assert_eq!(ByteSize(5 << 30).to_string(), "5.00GiB");
    }

    #[test]
    fn test_gib_size() {
        assert_eq!(GibSize(0).to_string(), "0.00 GiB");
        assert_eq!(GibSize(123456789).to_string(), "0.11 GiB");
        assert_eq!(GibSize(9 << 29).to_string(), "4.50 GiB");
    }

    #[test]
    fn test_clock() {
        assert_eq!(Clock(Duration::ZERO).to_string(), "00:00:00");
        assert_eq!(Clock(Duration::from_millis(59_999)).to_string(), "00:00:59");
        assert_eq!(Clock(Duration::from_secs(3661)).to_string(), "01:01:01");
        assert_eq!(Clock(Duration::from_secs(100 * 3600)).to_string(), "100:00:00");
    }
}
