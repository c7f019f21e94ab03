//! Client token generation for request/response correlation.

use std::fmt;

/// Tokens cycle within six decimal digits.
pub const TOKEN_MODULUS: u64 = 1_000_000;

/// A six-digit correlation token carried in the `clientToken` field.
///
/// The service echoes the token back in accepted/rejected responses, which
/// lets a device match a response to the update that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationToken(u32);

impl CorrelationToken {
    /// Derives a token from a millisecond clock reading.
    #[must_use]
    pub fn from_millis(epoch_ms: u64) -> Self {
        // The modulus keeps the value inside six digits, so u32 always fits.
        #[allow(clippy::cast_possible_truncation)]
        Self((epoch_ms % TOKEN_MODULUS) as u32)
    }

    /// The numeric token value.
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_reading_is_reduced_modulo_a_million() {
        assert_eq!(CorrelationToken::from_millis(1_001_234_567).value(), 234_567);
        assert_eq!(CorrelationToken::from_millis(999_999).value(), 999_999);
        assert_eq!(CorrelationToken::from_millis(1_000_000).value(), 0);
    }

    #[test]
    fn display_pads_to_six_digits() {
        assert_eq!(CorrelationToken::from_millis(42).to_string(), "000042");
        assert_eq!(CorrelationToken::from_millis(123_456).to_string(), "123456");
    }

    #[test]
    fn padded_form_parses_back_to_the_same_value() {
        let token = CorrelationToken::from_millis(42);
        assert_eq!(token.to_string().parse::<u32>().unwrap(), token.value());
    }
}
