use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};

/// Binary device token as issued by the gateway.
///
/// Tokens are usually handled as hex (`"5f2c1a0b 9e..."`) by apps and
/// registration endpoints; frames carry the decoded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceToken(Vec<u8>);

impl DeviceToken {
    /// Parse the hex form, ignoring whitespace and `<`/`>` wrappers.
    pub fn parse(hex_token: &str) -> CodecResult<Self> {
        let cleaned: String = hex_token
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '<' && *c != '>')
            .collect();

        if cleaned.is_empty() {
            return Err(CodecError::InvalidToken("empty token".to_string()));
        }

        let bytes = hex::decode(&cleaned)
            .map_err(|e| CodecError::InvalidToken(format!("{hex_token:?}: {e}")))?;

        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Continuous lowercase hex, as stored by the device registry.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// Lowercase hex in blocks of 8 separated by spaces.
impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        let mut first = true;
        for block in hex.as_bytes().chunks(8) {
            if !first {
                f.write_str(" ")?;
            }
            // hex::encode only yields ASCII
            f.write_str(std::str::from_utf8(block).map_err(|_| fmt::Error)?)?;
            first = false;
        }
        Ok(())
    }
}

impl TryFrom<String> for DeviceToken {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceToken> for String {
    fn from(token: DeviceToken) -> Self {
        token.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "5f2c1a0b 9e8d7c6b 5a4f3e2d 1c0b0a09 08070605 04030201 00ffeedd ccbbaa99";

    #[test]
    fn test_parse_spaced_hex() {
        let token = DeviceToken::parse(TOKEN).unwrap();
        assert_eq!(token.len(), 32);
        assert_eq!(token.as_bytes()[0], 0x5f);
        assert_eq!(token.as_bytes()[31], 0x99);
    }

    #[test]
    fn test_display_groups_blocks_of_eight() {
        let token = DeviceToken::parse(&format!("<{}>", TOKEN.replace(' ', ""))).unwrap();
        assert_eq!(token.to_string(), TOKEN);
    }

    #[test]
    fn test_rejects_non_hex() {
        assert!(matches!(
            DeviceToken::parse("zz00"),
            Err(CodecError::InvalidToken(_))
        ));
        assert!(matches!(
            DeviceToken::parse("  "),
            Err(CodecError::InvalidToken(_))
        ));
        assert!(DeviceToken::parse("abc").is_err());
    }

    #[test]
    fn test_serde_uses_display_form() {
        let token = DeviceToken::parse(TOKEN).unwrap();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, format!("\"{TOKEN}\""));
        let back: DeviceToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }
}
