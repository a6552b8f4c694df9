// Byte-exact wire vectors captured from the protocol layout. Each vector
// is the full frame including the 4-byte length prefix.
use bytes::Bytes;
use std::collections::HashMap;
use warren_wire::{Command, OffsetSpecification, ResponseCode, ServerFrame};

fn command_vectors() -> Vec<(&'static str, Command, &'static str)> {
    vec![
        (
            "sasl_handshake",
            Command::SaslHandshake { correlation_id: 1 },
            "000000080012000100000001",
        ),
        (
            "create_stream",
            Command::CreateStream {
                correlation_id: 1,
                stream: "s1".to_string(),
                arguments: HashMap::new(),
            },
            "00000010000d0001000000010002733100000000",
        ),
        (
            "open",
            Command::Open {
                correlation_id: 4,
                vhost: "/".to_string(),
            },
            "0000000b001500010000000400012f",
        ),
        (
            "tune_echo",
            Command::Tune {
                frame_max: 1_048_576,
                heartbeat: 60,
            },
            "0000000c00140001001000000000003c",
        ),
        (
            "subscribe",
            Command::Subscribe {
                correlation_id: 14,
                subscription_id: 1,
                stream: "s1".to_string(),
                offset: OffsetSpecification::First,
                credit: 1,
                properties: HashMap::new(),
            },
            "00000015000700010000000e01000273310001000100000000",
        ),
        ("heartbeat", Command::Heartbeat, "0000000400170001"),
    ]
}

fn server_frame_vectors() -> Vec<(&'static str, ServerFrame, &'static str)> {
    vec![
        (
            "create_stream_response_ok",
            ServerFrame::CreateStreamResponse {
                correlation_id: 1,
                code: ResponseCode::Ok,
            },
            "0000000a800d0001000000010001",
        ),
        (
            "query_offset_response_no_offset",
            ServerFrame::QueryOffsetResponse {
                correlation_id: 6,
                code: ResponseCode::NoOffset,
                offset: 0,
            },
            "00000012800b00010000000600130000000000000000",
        ),
        (
            "tune_request",
            ServerFrame::Tune {
                frame_max: 1_048_576,
                heartbeat: 60,
            },
            "0000000c00140001001000000000003c",
        ),
        ("heartbeat", ServerFrame::Heartbeat, "0000000400170001"),
    ]
}

#[test]
fn command_vectors_match_encoding() {
    for (name, command, hex) in command_vectors() {
        let expected = Bytes::from(hex_to_bytes(hex));
        let encoded = command.encode();
        assert_eq!(encoded.as_ref(), expected.as_ref(), "encode mismatch for {name}");

        let decoded = Command::decode(expected.slice(4..)).expect("decode");
        assert_eq!(decoded, command, "decode mismatch for {name}");
    }
}

#[test]
fn server_frame_vectors_match_encoding() {
    for (name, frame, hex) in server_frame_vectors() {
        let expected = Bytes::from(hex_to_bytes(hex));
        let encoded = frame.encode();
        assert_eq!(encoded.as_ref(), expected.as_ref(), "encode mismatch for {name}");

        let decoded = ServerFrame::decode(expected.slice(4..)).expect("decode");
        assert_eq!(decoded, frame, "decode mismatch for {name}");
    }
}

fn hex_to_bytes(hex: &str) -> Vec<u8> {
    assert!(hex.len() % 2 == 0, "hex length must be even");
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = from_hex_char(pair[0]) << 4;
            let lo = from_hex_char(pair[1]);
            hi | lo
        })
        .collect()
}

fn from_hex_char(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => panic!("invalid hex char"),
    }
}
