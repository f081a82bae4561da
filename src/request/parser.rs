//! Payload Parsers
//!
//! Turns response bodies into typed values, either through serde_json or a
//! custom parser chosen when the request is built.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::{CacheError, Result};

/// A parser for payloads that are not structured JSON.
pub trait SimpleParser<T>: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<T>;
}

/// Rewrites the body text before structured decoding.
pub type Preprocessor = Arc<dyn Fn(&str) -> String + Send + Sync>;

// == Parser ==
/// How a response body becomes a `T`.
pub enum Parser<T> {
    /// JSON decoded into `T`
    Structured {
        decode: fn(&str) -> Result<T>,
        preprocess: Option<Preprocessor>,
    },
    /// Anything else
    Custom(Arc<dyn SimpleParser<T>>),
}

impl<T: DeserializeOwned> Parser<T> {
    pub fn json() -> Self {
        Parser::Structured {
            decode: decode_json::<T>,
            preprocess: None,
        }
    }

    /// JSON decoding after `preprocess` rewrote the body.
    pub fn json_with(preprocess: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Parser::Structured {
            decode: decode_json::<T>,
            preprocess: Some(Arc::new(preprocess)),
        }
    }
}

impl<T> Parser<T> {
    pub fn custom(parser: impl SimpleParser<T> + 'static) -> Self {
        Parser::Custom(Arc::new(parser))
    }

    pub fn parse(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Parser::Structured { decode, preprocess } => {
                let text = utf8(bytes)?;
                match preprocess {
                    Some(preprocess) => decode(&preprocess(text)),
                    None => decode(text),
                }
            }
            Parser::Custom(parser) => parser.parse(bytes),
        }
    }
}

impl<T> Clone for Parser<T> {
    fn clone(&self) -> Self {
        match self {
            Parser::Structured { decode, preprocess } => Parser::Structured {
                decode: *decode,
                preprocess: preprocess.clone(),
            },
            Parser::Custom(parser) => Parser::Custom(Arc::clone(parser)),
        }
    }
}

fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_json::from_str(text)?)
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| CacheError::Decode(e.to_string()))
}

// == Built-in Parsers ==
/// `true` when the trimmed body reads "true", ignoring case.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolParser;

impl SimpleParser<bool> for BoolParser {
    fn parse(&self, bytes: &[u8]) -> Result<bool> {
        Ok(utf8(bytes)?.trim().eq_ignore_ascii_case("true"))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerParser;

impl SimpleParser<i64> for IntegerParser {
    fn parse(&self, bytes: &[u8]) -> Result<i64> {
        let text = utf8(bytes)?.trim();
        text.parse()
            .map_err(|_| CacheError::Decode(format!("not an integer: {text:?}")))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

impl SimpleParser<String> for TextParser {
    fn parse(&self, bytes: &[u8]) -> Result<String> {
        utf8(bytes).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
        name: String,
    }

    #[test]
    fn test_json_parser() {
        let parser = Parser::<Item>::json();
        let item = parser.parse(br#"{"id":7,"name":"lamp"}"#).unwrap();
        assert_eq!(item, Item { id: 7, name: "lamp".into() });

        assert!(matches!(parser.parse(b"{"), Err(CacheError::Decode(_))));
        assert!(matches!(parser.parse(b"\xff"), Err(CacheError::Decode(_))));
    }

    #[test]
    fn test_preprocessor_runs_before_decoding() {
        let parser = Parser::<Item>::json_with(|text| text.trim_start_matches(")]}'").to_string());
        let item = parser.parse(br#")]}'{"id":1,"name":"x"}"#).unwrap();
        assert_eq!(item.id, 1);
    }

    #[test]
    fn test_builtin_parsers() {
        assert!(Parser::custom(BoolParser).parse(b" TRUE\n").unwrap());
        assert!(!Parser::custom(BoolParser).parse(b"yes").unwrap());

        assert_eq!(Parser::custom(IntegerParser).parse(b" -42 ").unwrap(), -42);
        assert!(Parser::custom(IntegerParser).parse(b"4x").is_err());

        assert_eq!(Parser::custom(TextParser).parse(b"hello").unwrap(), "hello");
    }

    #[test]
    fn test_clone_shares_custom_parser() {
        let parser = Parser::custom(TextParser);
        let copy = parser.clone();
        assert_eq!(copy.parse(b"a").unwrap(), "a");
    }
}
