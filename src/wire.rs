//! Protocol messages and their wire encoding.
//!
//! Every message is a comma-separated record terminated by a newline,
//! exchanged over one dedicated connection per logical message:
//!
//! ```text
//! Connect,<level>
//! Initiate,<level>,<fragmentId>,<state>     state is `Find` or `Found`
//! Test,<level>,<fragmentId>
//! Accept
//! Reject
//! Report,<weight>
//! ChangeRoot
//! Stop
//! ```
//!
//! The codec is strict: an unknown message type or a malformed payload is
//! a protocol anomaly the receiving engine treats as fatal.

use std::fmt;

use snafu::Snafu;

use crate::types::Weight;

/// Errors from decoding a wire record.
#[derive(Debug, Snafu)]
pub enum WireError {
    /// The record was empty.
    #[snafu(display("empty wire record"))]
    EmptyRecord,

    /// The leading token named no known message type.
    #[snafu(display("unknown message type {token:?}"))]
    UnknownType {
        /// The unrecognized leading token.
        token: String,
    },

    /// The payload did not match the message type's shape.
    #[snafu(display("malformed {kind} payload in record {record:?}"))]
    MalformedPayload {
        /// Message type whose payload failed to parse.
        kind: &'static str,
        /// The offending record, newline stripped.
        record: String,
    },
}

/// Search state carried by `Initiate`: whether the receiving subtree
/// should run a minimum-outgoing-edge round or merely adopt the new
/// fragment identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    /// Run a FIND round after adopting the fragment identity.
    Find,
    /// Adopt the fragment identity only; no round in progress.
    Found,
}

impl SearchState {
    fn token(self) -> &'static str {
        match self {
            SearchState::Find => "Find",
            SearchState::Found => "Found",
        }
    }
}

impl fmt::Display for SearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A protocol message exchanged between adjacent engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Request to join the receiver's fragment from a sender at `level`.
    Connect {
        /// Fragment level of the sender.
        level: u64,
    },
    /// Fragment-wide broadcast (re)initializing every member, optionally
    /// starting a FIND round.
    Initiate {
        /// New fragment level.
        level: u64,
        /// New fragment identity: the weight of the fragment's core edge.
        fragment: Weight,
        /// Whether the receiver should start searching for an outgoing edge.
        search: SearchState,
    },
    /// Query along a `Basic` edge: is the receiver in a different fragment?
    Test {
        /// Fragment level of the asking vertex.
        level: u64,
        /// Fragment identity of the asking vertex.
        fragment: Weight,
    },
    /// Reply to `Test`: different fragment, the edge is outgoing.
    Accept,
    /// Reply to `Test`: same fragment, the edge cannot be in the tree.
    Reject,
    /// Convergecast of a subtree's minimum outgoing weight
    /// ([`INFINITE_WEIGHT`](crate::types::INFINITE_WEIGHT) when none).
    Report {
        /// Minimum outgoing edge weight found in the reporting subtree.
        weight: Weight,
    },
    /// Forward responsibility for joining over the best outgoing edge.
    ChangeRoot,
    /// Termination broadcast along `Branch` edges.
    Stop,
}

impl Message {
    /// Short message-type name, for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Connect { .. } => "Connect",
            Message::Initiate { .. } => "Initiate",
            Message::Test { .. } => "Test",
            Message::Accept => "Accept",
            Message::Reject => "Reject",
            Message::Report { .. } => "Report",
            Message::ChangeRoot => "ChangeRoot",
            Message::Stop => "Stop",
        }
    }

    /// Encode into a newline-terminated wire record.
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }

    /// Decode a wire record; the trailing newline is optional.
    pub fn decode(record: &str) -> Result<Message, WireError> {
        let record = record.trim_end_matches(['\r', '\n']);
        if record.is_empty() {
            return Err(WireError::EmptyRecord);
        }

        let mut fields = record.split(',');
        let kind = fields.next().unwrap_or_default();
        let rest: Vec<&str> = fields.collect();

        let malformed = |kind: &'static str| WireError::MalformedPayload {
            kind,
            record: record.to_string(),
        };

        match kind {
            "Connect" => match rest.as_slice() {
                [level] => {
                    let level = level.parse().map_err(|_| malformed("Connect"))?;
                    Ok(Message::Connect { level })
                }
                _ => Err(malformed("Connect")),
            },
            "Initiate" => match rest.as_slice() {
                [level, fragment, state] => {
                    let level = level.parse().map_err(|_| malformed("Initiate"))?;
                    let fragment = fragment.parse().map_err(|_| malformed("Initiate"))?;
                    let search = match *state {
                        "Find" => SearchState::Find,
                        "Found" => SearchState::Found,
                        _ => return Err(malformed("Initiate")),
                    };
                    Ok(Message::Initiate {
                        level,
                        fragment,
                        search,
                    })
                }
                _ => Err(malformed("Initiate")),
            },
            "Test" => match rest.as_slice() {
                [level, fragment] => {
                    let level = level.parse().map_err(|_| malformed("Test"))?;
                    let fragment = fragment.parse().map_err(|_| malformed("Test"))?;
                    Ok(Message::Test { level, fragment })
                }
                _ => Err(malformed("Test")),
            },
            "Accept" => match rest.as_slice() {
                [] => Ok(Message::Accept),
                _ => Err(malformed("Accept")),
            },
            "Reject" => match rest.as_slice() {
                [] => Ok(Message::Reject),
                _ => Err(malformed("Reject")),
            },
            "Report" => match rest.as_slice() {
                [weight] => {
                    let weight = weight.parse().map_err(|_| malformed("Report"))?;
                    Ok(Message::Report { weight })
                }
                _ => Err(malformed("Report")),
            },
            "ChangeRoot" => match rest.as_slice() {
                [] => Ok(Message::ChangeRoot),
                _ => Err(malformed("ChangeRoot")),
            },
            "Stop" => match rest.as_slice() {
                [] => Ok(Message::Stop),
                _ => Err(malformed("Stop")),
            },
            other => Err(WireError::UnknownType {
                token: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Connect { level } => write!(f, "Connect,{level}"),
            Message::Initiate {
                level,
                fragment,
                search,
            } => write!(f, "Initiate,{level},{fragment},{search}"),
            Message::Test { level, fragment } => write!(f, "Test,{level},{fragment}"),
            Message::Accept => f.write_str("Accept"),
            Message::Reject => f.write_str("Reject"),
            Message::Report { weight } => write!(f, "Report,{weight}"),
            Message::ChangeRoot => f.write_str("ChangeRoot"),
            Message::Stop => f.write_str("Stop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::INFINITE_WEIGHT;

    #[test]
    fn encodes_payload_messages() {
        assert_eq!(Message::Connect { level: 0 }.encode(), "Connect,0\n");
        assert_eq!(
            Message::Initiate {
                level: 3,
                fragment: 17,
                search: SearchState::Find
            }
            .encode(),
            "Initiate,3,17,Find\n"
        );
        assert_eq!(
            Message::Test {
                level: 1,
                fragment: 5
            }
            .encode(),
            "Test,1,5\n"
        );
        assert_eq!(
            Message::Report {
                weight: INFINITE_WEIGHT
            }
            .encode(),
            format!("Report,{}\n", u64::MAX)
        );
    }

    #[test]
    fn decodes_with_and_without_newline() {
        assert_eq!(
            Message::decode("Connect,4\n").unwrap(),
            Message::Connect { level: 4 }
        );
        assert_eq!(Message::decode("Stop").unwrap(), Message::Stop);
        assert_eq!(
            Message::decode("Initiate,2,9,Found\n").unwrap(),
            Message::Initiate {
                level: 2,
                fragment: 9,
                search: SearchState::Found
            }
        );
    }

    #[test]
    fn rejects_unknown_type() {
        let err = Message::decode("Gossip,1\n").unwrap_err();
        assert!(matches!(err, WireError::UnknownType { token } if token == "Gossip"));
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(
            Message::decode("Connect\n"),
            Err(WireError::MalformedPayload { kind: "Connect", .. })
        ));
        assert!(matches!(
            Message::decode("Initiate,1,2,Sleeping\n"),
            Err(WireError::MalformedPayload { kind: "Initiate", .. })
        ));
        assert!(matches!(
            Message::decode("Report,not-a-number\n"),
            Err(WireError::MalformedPayload { kind: "Report", .. })
        ));
        assert!(matches!(
            Message::decode("Accept,extra\n"),
            Err(WireError::MalformedPayload { kind: "Accept", .. })
        ));
        assert!(matches!(Message::decode("\n"), Err(WireError::EmptyRecord)));
    }
}
