//! NIP-01 wire frames.
//!
//! Both directions of the relay protocol are JSON arrays whose first
//! element names the frame type. Client frames are serialized minified;
//! relay frames are parsed leniently: unknown types are preserved as
//! [`RelayMessage::Unknown`], while malformed frames of a known type are
//! an error.

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::nostr::{Event, Filter};

/// A frame sent from the client to a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["EVENT", <event>]` publishes an event.
    Event(Event),

    /// `["REQ", <sub_id>, <filter>...]` opens a subscription.
    Req {
        /// Client-chosen subscription id.
        subscription_id: String,
        /// One or more filters; a relay matches events against any of
        /// them.
        filters: Vec<Filter>,
    },

    /// `["CLOSE", <sub_id>]` closes a subscription.
    Close {
        /// Subscription id to close.
        subscription_id: String,
    },

    /// `["AUTH", <event>]` answers a NIP-42 challenge.
    Auth(Event),
}

impl ClientMessage {
    /// Serializes this frame as a minified JSON array.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationFailed`] if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            Self::Event(event) => json!(["EVENT", event]),
            Self::Req {
                subscription_id,
                filters,
            } => {
                let mut array = vec![json!("REQ"), json!(subscription_id)];
                for filter in filters {
                    array.push(serde_json::to_value(filter)?);
                }
                Value::Array(array)
            }
            Self::Close { subscription_id } => json!(["CLOSE", subscription_id]),
            Self::Auth(event) => json!(["AUTH", event]),
        };
        Ok(value.to_string())
    }

    /// Parses a client frame from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessageFormat`] for anything that is not a
    /// well-formed client frame.
    pub fn from_json(text: &str) -> Result<Self> {
        let array = parse_array(text)?;
        let message_type = frame_type(&array)?;

        match message_type {
            "EVENT" | "AUTH" => {
                if array.len() != 2 {
                    return Err(Error::InvalidMessageFormat(format!(
                        "{message_type} takes exactly one payload"
                    )));
                }
                let event: Event = serde_json::from_value(array[1].clone())
                    .map_err(|e| Error::InvalidMessageFormat(e.to_string()))?;
                if message_type == "EVENT" {
                    Ok(Self::Event(event))
                } else {
                    Ok(Self::Auth(event))
                }
            }
            "REQ" => {
                if array.len() < 3 {
                    return Err(Error::InvalidMessageFormat(
                        "REQ needs a subscription id and at least one filter".to_string(),
                    ));
                }
                let subscription_id = string_at(&array, 1, "subscription id")?;
                let filters = array[2..]
                    .iter()
                    .map(|value| {
                        serde_json::from_value(value.clone())
                            .map_err(|e| Error::InvalidMessageFormat(e.to_string()))
                    })
                    .collect::<Result<Vec<Filter>>>()?;
                Ok(Self::Req {
                    subscription_id,
                    filters,
                })
            }
            "CLOSE" => {
                if array.len() != 2 {
                    return Err(Error::InvalidMessageFormat(
                        "CLOSE takes exactly a subscription id".to_string(),
                    ));
                }
                Ok(Self::Close {
                    subscription_id: string_at(&array, 1, "subscription id")?,
                })
            }
            other => Err(Error::InvalidMessageFormat(format!(
                "unknown client frame type: {other}"
            ))),
        }
    }
}

/// A frame received from a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["EVENT", <sub_id>, <event>]` delivers a matching event.
    Event {
        /// Subscription the event matches.
        subscription_id: String,
        /// The event itself.
        event: Event,
    },

    /// `["EOSE", <sub_id>]` ends the stored-event backlog.
    EndOfStoredEvents {
        /// Subscription that is now live-only.
        subscription_id: String,
    },

    /// `["NOTICE", <msg>]` carries a human-readable notice.
    Notice {
        /// The notice text.
        message: String,
    },

    /// `["OK", <event_id>, <accepted>, <msg>]` acknowledges a publish.
    Ok {
        /// Id of the published event.
        event_id: String,
        /// Whether the relay accepted the event.
        accepted: bool,
        /// Reason, empty on plain acceptance.
        message: String,
    },

    /// `["AUTH", <challenge>]` requests NIP-42 authentication.
    Auth {
        /// Challenge string to sign.
        challenge: String,
    },

    /// `["CLOSED", <sub_id>, <msg>]` closes a subscription server-side.
    Closed {
        /// Subscription that was closed.
        subscription_id: String,
        /// Reason for closing.
        message: String,
    },

    /// A frame of a type this library does not know.
    Unknown {
        /// The first array element.
        message_type: String,
        /// The raw frame text.
        raw: String,
    },
}

impl RelayMessage {
    /// Parses a relay frame from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessageFormat`] when the text is not a JSON
    /// array or a known frame type is malformed. Unknown frame types parse
    /// into [`RelayMessage::Unknown`] instead of failing.
    pub fn from_json(text: &str) -> Result<Self> {
        let array = parse_array(text)?;
        let message_type = frame_type(&array)?;

        match message_type {
            "EVENT" => {
                if array.len() != 3 {
                    return Err(Error::InvalidMessageFormat(
                        "EVENT takes a subscription id and an event".to_string(),
                    ));
                }
                let subscription_id = string_at(&array, 1, "subscription id")?;
                let event: Event = serde_json::from_value(array[2].clone())
                    .map_err(|e| Error::InvalidMessageFormat(e.to_string()))?;
                Ok(Self::Event {
                    subscription_id,
                    event,
                })
            }
            "EOSE" => {
                if array.len() != 2 {
                    return Err(Error::InvalidMessageFormat(
                        "EOSE takes exactly a subscription id".to_string(),
                    ));
                }
                Ok(Self::EndOfStoredEvents {
                    subscription_id: string_at(&array, 1, "subscription id")?,
                })
            }
            "NOTICE" => {
                if array.len() != 2 {
                    return Err(Error::InvalidMessageFormat(
                        "NOTICE takes exactly a message".to_string(),
                    ));
                }
                Ok(Self::Notice {
                    message: string_at(&array, 1, "message")?,
                })
            }
            "OK" => {
                if array.len() != 4 {
                    return Err(Error::InvalidMessageFormat(
                        "OK takes exactly an event id, a flag, and a message".to_string(),
                    ));
                }
                let accepted = array[2].as_bool().ok_or_else(|| {
                    Error::InvalidMessageFormat("OK flag must be a boolean".to_string())
                })?;
                Ok(Self::Ok {
                    event_id: string_at(&array, 1, "event id")?,
                    accepted,
                    message: string_at(&array, 3, "message")?,
                })
            }
            "AUTH" => {
                if array.len() != 2 {
                    return Err(Error::InvalidMessageFormat(
                        "AUTH takes exactly a challenge".to_string(),
                    ));
                }
                Ok(Self::Auth {
                    challenge: string_at(&array, 1, "challenge")?,
                })
            }
            "CLOSED" => {
                if array.len() != 3 {
                    return Err(Error::InvalidMessageFormat(
                        "CLOSED takes a subscription id and a message".to_string(),
                    ));
                }
                Ok(Self::Closed {
                    subscription_id: string_at(&array, 1, "subscription id")?,
                    message: string_at(&array, 2, "message")?,
                })
            }
            other => Ok(Self::Unknown {
                message_type: other.to_string(),
                raw: text.to_string(),
            }),
        }
    }
}

fn parse_array(text: &str) -> Result<Vec<Value>> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::InvalidMessageFormat(e.to_string()))?;
    match value {
        Value::Array(array) if !array.is_empty() => Ok(array),
        Value::Array(_) => Err(Error::InvalidMessageFormat("empty frame".to_string())),
        _ => Err(Error::InvalidMessageFormat(
            "frame is not a JSON array".to_string(),
        )),
    }
}

fn frame_type(array: &[Value]) -> Result<&str> {
    array[0]
        .as_str()
        .ok_or_else(|| Error::InvalidMessageFormat("frame type must be a string".to_string()))
}

fn string_at(array: &[Value], index: usize, what: &str) -> Result<String> {
    array
        .get(index)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| Error::InvalidMessageFormat(format!("{what} must be a string")))
}
