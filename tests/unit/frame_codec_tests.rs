//! Unit tests for the NDJSON frame codec.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use grok_sidecar::protocol::codec::{FrameCodec, InboundLine, MAX_LINE_BYTES};

fn text(line: Option<InboundLine>) -> Option<String> {
    line.and_then(|l| l.as_text().map(str::to_owned))
}

#[test]
fn single_line_decodes_without_newline() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"request\"}\n");

    let line = codec.decode(&mut buf).expect("decode");

    assert_eq!(text(line).as_deref(), Some("{\"type\":\"request\"}"));
}

#[test]
fn batched_lines_decode_one_at_a_time() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{\"a\":1}\n{\"b\":2}\n");

    assert_eq!(text(codec.decode(&mut buf).expect("first")).as_deref(), Some("{\"a\":1}"));
    assert_eq!(text(codec.decode(&mut buf).expect("second")).as_deref(), Some("{\"b\":2}"));
    assert!(codec.decode(&mut buf).expect("drained").is_none());
}

#[test]
fn partial_line_is_buffered_until_newline() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{\"type\":");

    assert!(codec.decode(&mut buf).expect("partial").is_none());

    buf.extend_from_slice(b"\"request\"}\n");
    assert_eq!(
        text(codec.decode(&mut buf).expect("complete")).as_deref(),
        Some("{\"type\":\"request\"}")
    );
}

#[test]
fn crlf_terminated_line_is_trimmed() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{}\r\n");

    assert_eq!(text(codec.decode(&mut buf).expect("decode")).as_deref(), Some("{}"));
}

#[test]
fn oversized_line_is_rejected_and_decoding_resumes() {
    let mut codec = FrameCodec::with_max_length(8);
    let mut buf = BytesMut::from("0123456789abcdef\n{}\n");

    let rejected = codec.decode(&mut buf).expect("no decoder error");
    assert_eq!(
        rejected,
        Some(InboundLine::Rejected(
            "line too long: exceeded 8 bytes".to_owned()
        ))
    );

    let next = codec.decode(&mut buf).expect("next line decodes");
    assert_eq!(text(next).as_deref(), Some("{}"));
}

#[test]
fn non_utf8_line_is_rejected_and_decoding_resumes() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(&b"\xff\xfe not utf8\n{}\n"[..]);

    let rejected = codec.decode(&mut buf).expect("no decoder error");
    assert_eq!(
        rejected,
        Some(InboundLine::Rejected(
            "Invalid JSON: input is not valid UTF-8".to_owned()
        ))
    );

    let next = codec.decode(&mut buf).expect("next line decodes");
    assert_eq!(text(next).as_deref(), Some("{}"));
}

#[test]
fn default_limit_is_sixteen_mebibytes() {
    assert_eq!(MAX_LINE_BYTES, 16 * 1024 * 1024);
}

#[test]
fn encoder_appends_newline() {
    let mut codec = FrameCodec::new();
    let mut dst = BytesMut::new();

    codec
        .encode("{\"type\":\"result\"}".to_owned(), &mut dst)
        .expect("encode");

    assert_eq!(&dst[..], b"{\"type\":\"result\"}\n");
}

#[test]
fn final_line_without_newline_is_decoded_at_eof() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{\"tail\":true}");

    let line = codec.decode_eof(&mut buf).expect("decode_eof");

    assert_eq!(text(line).as_deref(), Some("{\"tail\":true}"));
}
