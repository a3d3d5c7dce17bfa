//! Engine.IO v4 / Socket.IO v5 text packet codec for the default namespace.
//!
//! Only the packet types the console exchanges are modelled. Binary
//! attachments are not supported; the backend sends media as URLs.

use serde_json::Value;

use crate::error::FrameError;

/// A decoded packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO handshake (`0{...}`).
    Open(Value),
    /// Engine.IO close (`1`).
    Close,
    /// Engine.IO ping (`2`), must be answered with [`Packet::Pong`].
    Ping,
    /// Engine.IO pong (`3`).
    Pong,
    /// Engine.IO noop (`6`).
    Noop,
    /// Socket.IO connect (`40`), optionally with the server's auth payload.
    Connect(Option<Value>),
    /// Socket.IO disconnect (`41`).
    Disconnect,
    /// Socket.IO event (`42[name, data]`, or `42<id>[...]` to request an ack).
    Event {
        ack_id: Option<u64>,
        name: String,
        data: Value,
    },
    /// Socket.IO acknowledgement (`43<id>[args...]`).
    Ack { ack_id: u64, args: Vec<Value> },
    /// Socket.IO connect error (`44{...}`).
    ConnectError(Value),
}

impl Packet {
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Packet::Event {
            ack_id: None,
            name: name.into(),
            data,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Packet::Open(handshake) => format!("0{handshake}"),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Connect(None) => "40".to_string(),
            Packet::Connect(Some(auth)) => format!("40{auth}"),
            Packet::Disconnect => "41".to_string(),
            Packet::Event { ack_id, name, data } => {
                let body = Value::Array(vec![Value::String(name.clone()), data.clone()]);
                match ack_id {
                    Some(id) => format!("42{id}{body}"),
                    None => format!("42{body}"),
                }
            }
            Packet::Ack { ack_id, args } => {
                format!("43{ack_id}{}", Value::Array(args.clone()))
            }
            Packet::ConnectError(err) => format!("44{err}"),
        }
    }

    pub fn decode(frame: &str) -> Result<Self, FrameError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(FrameError::Empty)?;
        let rest = chars.as_str();

        match kind {
            '0' => Ok(Packet::Open(parse_json(rest)?)),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '4' => decode_socket_packet(rest),
            '6' => Ok(Packet::Noop),
            other => Err(FrameError::UnknownPacket(other)),
        }
    }
}

fn parse_json(raw: &str) -> Result<Value, FrameError> {
    serde_json::from_str(raw).map_err(|e| FrameError::InvalidPayload(e.to_string()))
}

/// Skip a `/namespace,` prefix. Only the default namespace is used, so the
/// name itself is discarded.
fn strip_namespace(raw: &str) -> &str {
    if raw.starts_with('/') {
        raw.split_once(',').map(|(_, rest)| rest).unwrap_or("")
    } else {
        raw
    }
}

fn split_ack_id(raw: &str) -> (Option<u64>, &str) {
    let digits = raw.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        (None, raw)
    } else {
        (raw[..digits].parse().ok(), &raw[digits..])
    }
}

fn decode_socket_packet(raw: &str) -> Result<Packet, FrameError> {
    let mut chars = raw.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let rest = strip_namespace(chars.as_str());

    match kind {
        '0' if rest.is_empty() => Ok(Packet::Connect(None)),
        '0' => Ok(Packet::Connect(Some(parse_json(rest)?))),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let (ack_id, body) = split_ack_id(rest);
            let mut items = match parse_json(body)? {
                Value::Array(items) => items.into_iter(),
                _ => {
                    return Err(FrameError::InvalidPayload(
                        "event body is not an array".to_string(),
                    ));
                }
            };
            let name = match items.next() {
                Some(Value::String(name)) => name,
                _ => {
                    return Err(FrameError::InvalidPayload(
                        "event name is missing".to_string(),
                    ));
                }
            };
            let data = items.next().unwrap_or(Value::Null);
            Ok(Packet::Event { ack_id, name, data })
        }
        '3' => {
            let (ack_id, body) = split_ack_id(rest);
            let ack_id = ack_id
                .ok_or_else(|| FrameError::InvalidPayload("ack without id".to_string()))?;
            match parse_json(body)? {
                Value::Array(args) => Ok(Packet::Ack { ack_id, args }),
                _ => Err(FrameError::InvalidPayload(
                    "ack body is not an array".to_string(),
                )),
            }
        }
        '4' => Ok(Packet::ConnectError(parse_json(rest)?)),
        other => Err(FrameError::UnknownSocketPacket(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_event_without_ack() {
        let packet = Packet::event("disableAllAssistants", json!("user-1"));
        assert_eq!(packet.encode(), r#"42["disableAllAssistants","user-1"]"#);
    }

    #[test]
    fn encodes_event_with_ack() {
        let packet = Packet::Event {
            ack_id: Some(7),
            name: "newBusinessMessage".into(),
            data: json!({"conversationId": "42"}),
        };
        assert_eq!(
            packet.encode(),
            r#"427["newBusinessMessage",{"conversationId":"42"}]"#
        );
    }

    #[test]
    fn decodes_engine_packets() {
        assert_eq!(Packet::decode("2"), Ok(Packet::Ping));
        assert_eq!(Packet::decode("3"), Ok(Packet::Pong));
        assert_eq!(
            Packet::decode(r#"0{"sid":"abc","pingInterval":25000}"#),
            Ok(Packet::Open(json!({"sid": "abc", "pingInterval": 25000})))
        );
        assert_eq!(Packet::decode(""), Err(FrameError::Empty));
        assert_eq!(Packet::decode("9"), Err(FrameError::UnknownPacket('9')));
    }

    #[test]
    fn decodes_connect_with_and_without_payload() {
        assert_eq!(Packet::decode("40"), Ok(Packet::Connect(None)));
        assert_eq!(
            Packet::decode(r#"40{"sid":"xyz"}"#),
            Ok(Packet::Connect(Some(json!({"sid": "xyz"}))))
        );
    }

    #[test]
    fn decodes_inbound_event() {
        let packet = Packet::decode(r#"42["newClientMessage",{"conversationId":"42"}]"#).unwrap();
        assert_eq!(
            packet,
            Packet::Event {
                ack_id: None,
                name: "newClientMessage".into(),
                data: json!({"conversationId": "42"}),
            }
        );
    }

    #[test]
    fn decodes_event_in_namespace() {
        let packet = Packet::decode(r#"42/admin,["ping"]"#).unwrap();
        assert_eq!(packet, Packet::event("ping", Value::Null));
    }

    #[test]
    fn decodes_ack() {
        assert_eq!(
            Packet::decode(r#"4312[{"ok":true}]"#),
            Ok(Packet::Ack {
                ack_id: 12,
                args: vec![json!({"ok": true})],
            })
        );
        assert!(matches!(
            Packet::decode("43[1]"),
            Err(FrameError::InvalidPayload(_))
        ));
    }

    #[test]
    fn rejects_malformed_events() {
        assert!(matches!(
            Packet::decode(r#"42{"not":"array"}"#),
            Err(FrameError::InvalidPayload(_))
        ));
        assert!(matches!(
            Packet::decode("42[1,2]"),
            Err(FrameError::InvalidPayload(_))
        ));
        assert_eq!(Packet::decode("47"), Err(FrameError::UnknownSocketPacket('7')));
    }
}
