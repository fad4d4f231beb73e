//! Command definitions and parsing
//!
//! The client-facing command language: one line per request.
//!
//! ```text
//! SET <key> <value>
//! GET <key>
//! DEL <key>
//! ```

use crate::error::{LatticeError, Result};

/// A parsed client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Store a key-value pair
    Set { key: String, value: String },

    /// Get a value by key
    Get { key: String },

    /// Delete a key
    Del { key: String },
}

impl Command {
    /// Parse a command line
    ///
    /// Command words are case-sensitive; keys and values are whitespace-
    /// separated tokens, so they can never be empty or contain spaces.
    pub fn parse(input: &str) -> Result<Command> {
        let mut tokens = input.split_whitespace();

        let Some(name) = tokens.next() else {
            return Err(LatticeError::InvalidCommand("empty input".to_string()));
        };
        let args: Vec<&str> = tokens.collect();

        match name {
            "SET" => match args.as_slice() {
                [key, value] => Ok(Command::Set {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
                _ => Err(LatticeError::InvalidCommand(format!(
                    "SET expects 2 arguments, got {}",
                    args.len()
                ))),
            },
            "GET" => match args.as_slice() {
                [key] => Ok(Command::Get {
                    key: key.to_string(),
                }),
                _ => Err(LatticeError::InvalidCommand(format!(
                    "GET expects 1 argument, got {}",
                    args.len()
                ))),
            },
            "DEL" => match args.as_slice() {
                [key] => Ok(Command::Del {
                    key: key.to_string(),
                }),
                _ => Err(LatticeError::InvalidCommand(format!(
                    "DEL expects 1 argument, got {}",
                    args.len()
                ))),
            },
            other => Err(LatticeError::InvalidCommand(format!(
                "unknown command: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set() {
        assert_eq!(
            Command::parse("SET name alice").unwrap(),
            Command::Set {
                key: "name".to_string(),
                value: "alice".to_string()
            }
        );
    }

    #[test]
    fn test_parse_get_and_del() {
        assert_eq!(
            Command::parse("GET name").unwrap(),
            Command::Get {
                key: "name".to_string()
            }
        );
        assert_eq!(
            Command::parse("DEL name").unwrap(),
            Command::Del {
                key: "name".to_string()
            }
        );
    }

    #[test]
    fn test_parse_tolerates_extra_whitespace() {
        assert_eq!(
            Command::parse("  SET   a   b  ").unwrap(),
            Command::Set {
                key: "a".to_string(),
                value: "b".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_wrong_arity() {
        assert!(Command::parse("SET onlykey").is_err());
        assert!(Command::parse("SET key value extra").is_err());
        assert!(Command::parse("GET").is_err());
        assert!(Command::parse("GET a b").is_err());
        assert!(Command::parse("DEL").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_and_lowercase_commands() {
        assert!(Command::parse("PING").is_err());
        assert!(Command::parse("set a b").is_err());
        assert!(Command::parse("").is_err());
        assert!(Command::parse("   ").is_err());
    }
}
