// Golden wire vectors: pinned frame bytes for representative messages, so
// an accidental change to the header layout or payload encoding fails
// loudly instead of silently breaking peers.
use bytes::Bytes;
use keel_wire::{Direction, Frame, Request, Response};
use std::fs;

#[test]
fn vectors_match_frame_encoding() {
    let dir = "tests/vectors";
    let mut checked = 0;
    for entry in fs::read_dir(dir).expect("read vectors dir") {
        let entry = entry.expect("entry");
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let contents = fs::read_to_string(&path).expect("read vector");
        let value: serde_json::Value = serde_json::from_str(&contents).expect("json");
        let direction = match value["direction"].as_str().expect("direction") {
            "request" => Direction::Request,
            "response" => Direction::Response,
            other => panic!("unknown direction {other:?} in {path:?}"),
        };
        let payload = hex::decode(value["payload_hex"].as_str().expect("payload_hex"))
            .expect("payload hex");
        let frame_expected = Bytes::from(
            hex::decode(value["frame_hex"].as_str().expect("frame_hex")).expect("frame hex"),
        );

        // Framing the pinned payload must reproduce the pinned bytes.
        let frame = Frame::new(direction, payload.into()).expect("frame");
        assert_eq!(
            frame.encode().as_ref(),
            frame_expected.as_ref(),
            "frame mismatch for {:?}",
            path
        );

        // And the pinned bytes must decode to a message that re-encodes to
        // the same bytes.
        let decoded = Frame::decode(frame_expected.clone()).expect("decode");
        assert_eq!(decoded.header.direction, direction);
        let encoded = match direction {
            Direction::Request => Request::decode(decoded)
                .expect("request decode")
                .encode()
                .expect("request encode"),
            Direction::Response => Response::decode(decoded)
                .expect("response decode")
                .encode()
                .expect("response encode"),
        };
        assert_eq!(
            encoded.encode().as_ref(),
            frame_expected.as_ref(),
            "round trip mismatch for {:?}",
            path
        );
        checked += 1;
    }
    assert!(checked > 0, "no vectors found in {dir}");
}
