//! Lookup protocol parser and response generator.
//!
//! A request is one read from the client holding a single query envelope:
//!
//! ```text
//! {"query": {"region": "Sindh"}}
//! {"query": {"date": "4/4/2020"}}
//! ```
//!
//! The envelope is matched as three space-separated tokens against fixed
//! markers. It is not parsed as JSON, so any other spacing, key order or
//! nesting is rejected.

use crate::dataset::Record;
use bytes::BytesMut;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::fmt;
use std::str;

/// Banner written when a client connects
pub const GREETING: &[u8] = b"Covid TCP Server Connected\n\n***\n";

/// Written for any request that fails to parse
pub const INVALID_COMMAND: &[u8] = b"Invalid command\n";

/// Written when a query matches no records
pub const NOTHING_FOUND: &[u8] = b"Nothing found\n";

const QUERY_MARKER: &str = "{\"query\":";
const DATE_MARKER: &str = "{\"date\":";
const REGION_MARKER: &str = "{\"region\":";
const OPEN_QUOTE: &str = "\"";
const CLOSE_QUOTE: &str = "\"}}";

/// Number of space-separated tokens in a valid envelope
const ENVELOPE_TOKENS: usize = 3;

/// Record field named in the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Date,
    Region,
}

impl Field {
    fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            DATE_MARKER => Some(Field::Date),
            REGION_MARKER => Some(Field::Region),
            _ => None,
        }
    }
}

/// Parsed lookup command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Look up records by filter term.
    ///
    /// The field is informational: the search always considers both region
    /// and date.
    Get { field: Field, term: String },
}

/// Reasons a request is rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Request bytes are not UTF-8
    InvalidUtf8,
    /// Wrong number of space-separated tokens
    TokenCount(usize),
    /// First token is not the query marker
    QueryMarker(String),
    /// Second token is not a known field marker
    FieldMarker(String),
    /// Value token is not `"..."}}`
    Quoting(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidUtf8 => write!(f, "Invalid UTF-8 in request"),
            ParseError::TokenCount(n) => {
                write!(f, "Expected {ENVELOPE_TOKENS} tokens, found {n}")
            }
            ParseError::QueryMarker(token) => write!(f, "Unknown query marker: {token}"),
            ParseError::FieldMarker(token) => write!(f, "Unknown field marker: {token}"),
            ParseError::Quoting(token) => write!(f, "Malformed quoted value: {token}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parser for the query envelope
pub struct Parser;

impl Parser {
    /// Parse one request chunk.
    pub fn parse(chunk: &[u8]) -> Result<Command, ParseError> {
        let line = str::from_utf8(chunk).map_err(|_| ParseError::InvalidUtf8)?;

        let tokens: Vec<&str> = line.split(' ').map(str::trim).collect();
        let &[query, field, value] = tokens.as_slice() else {
            return Err(ParseError::TokenCount(tokens.len()));
        };

        if query != QUERY_MARKER {
            return Err(ParseError::QueryMarker(query.to_string()));
        }

        let field =
            Field::from_marker(field).ok_or_else(|| ParseError::FieldMarker(field.to_string()))?;

        let term = Self::parse_value(value)?;

        Ok(Command::Get {
            field,
            term: term.to_string(),
        })
    }

    /// Strip the opening quote and the closing `"}}` from the value token.
    fn parse_value(token: &str) -> Result<&str, ParseError> {
        if token.len() < OPEN_QUOTE.len() + CLOSE_QUOTE.len() {
            return Err(ParseError::Quoting(token.to_string()));
        }

        token
            .strip_prefix(OPEN_QUOTE)
            .and_then(|rest| rest.strip_suffix(CLOSE_QUOTE))
            .ok_or_else(|| ParseError::Quoting(token.to_string()))
    }
}

/// Response generator
pub struct Response;

impl Response {
    /// Encode matched records as an indented JSON array inside the response
    /// envelope.
    pub fn matches(records: &[Record]) -> Result<BytesMut, serde_json::Error> {
        let mut json = Vec::with_capacity(records.len() * 192);
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut json, formatter);
        records.serialize(&mut serializer)?;

        let mut response = BytesMut::with_capacity(json.len() + 20);
        response.extend_from_slice(b"{\"response:\" ");
        response.extend_from_slice(&json);
        response.extend_from_slice(b"}\n***\n");
        Ok(response)
    }
}
