//! Parsing of the comma separated identifier list of an assignment request.

use crate::config::IdentifierParsing;
use crate::types::RasterId;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum IdentifierError {
    #[error("identifier {token:?} at position {position} is not an unsigned integer")]
    Malformed { position: usize, token: String },
    #[error("identifier {token:?} at position {position} does not fit in 64 bits")]
    OutOfRange { position: usize, token: String },
}

/// Splits `raw` on commas and parses every token, keeping caller order and
/// duplicates. Tokens are taken as-is, so surrounding whitespace or a sign
/// makes a token malformed.
///
/// In lenient mode malformed tokens become 0 and out-of-range tokens become
/// `u64::MAX`. That means a bad token can select a feature whose raster id
/// is 0.
pub fn parse_identifiers(
    raw: &str,
    mode: IdentifierParsing,
) -> Result<Vec<RasterId>, IdentifierError> {
    raw.split(',')
        .enumerate()
        .map(|(position, token)| match (parse_token(token), mode) {
            (Ok(id), _) => Ok(id),
            (Err(TokenError::Malformed), IdentifierParsing::Lenient) => Ok(0),
            (Err(TokenError::OutOfRange), IdentifierParsing::Lenient) => Ok(RasterId::MAX),
            (Err(TokenError::Malformed), IdentifierParsing::Strict) => {
                Err(IdentifierError::Malformed {
                    position,
                    token: token.to_string(),
                })
            }
            (Err(TokenError::OutOfRange), IdentifierParsing::Strict) => {
                Err(IdentifierError::OutOfRange {
                    position,
                    token: token.to_string(),
                })
            }
        })
        .collect()
}

enum TokenError {
    Malformed,
    OutOfRange,
}

fn parse_token(token: &str) -> Result<RasterId, TokenError> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TokenError::Malformed);
    }
    token.parse().map_err(|_| TokenError::OutOfRange)
}
