//! Unit tests for the shared output sink.

use serde_json::{json, Value};
use tokio::io::AsyncReadExt;

use grok_sidecar::errors::SERVICE_ERROR;
use grok_sidecar::protocol::{ChatEvent, OutputSink};
use grok_sidecar::AppError;

async fn read_lines(mut reader: tokio::io::DuplexStream) -> Vec<Value> {
    let mut raw = String::new();
    reader.read_to_string(&mut raw).await.expect("read");
    raw.lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

#[tokio::test]
async fn report_maps_outcomes_to_frames() {
    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let sink = OutputSink::new(writer);

    sink.report("ok", Ok(json!({"done": true}))).await;
    sink.report("svc", Err(AppError::Service("Unknown tool call id: x".into())))
        .await;
    sink.report("proto", Err(AppError::Protocol("Missing callId in toolResult payload".into())))
        .await;
    sink.report("other", Err(AppError::Backend("socket reset".into())))
        .await;
    drop(sink);

    let frames = read_lines(reader).await;
    assert_eq!(
        frames,
        vec![
            json!({"type":"result","requestId":"ok","payload":{"done":true}}),
            json!({"type":"error","requestId":"svc",
                   "error":{"message":"Unknown tool call id: x","code":SERVICE_ERROR}}),
            json!({"type":"error","requestId":"proto",
                   "error":{"message":"Missing callId in toolResult payload","code":null}}),
            json!({"type":"error","requestId":"other",
                   "error":{"message":"Unhandled error: socket reset","code":null}}),
        ]
    );
}

#[tokio::test]
async fn concurrent_writers_never_interleave_within_a_line() {
    let (writer, reader) = tokio::io::duplex(1024 * 1024);
    let sink = OutputSink::new(writer);
    let reader_task = tokio::spawn(read_lines(reader));

    let mut handles = Vec::new();
    for task in 0..8 {
        let sink = sink.clone();
        handles.push(tokio::spawn(async move {
            for n in 0..50 {
                sink.send_event(
                    &format!("r{task}"),
                    ChatEvent::Delta {
                        text: format!("{task}-{n}-{}", "x".repeat(200)),
                    },
                )
                .await
                .expect("send");
            }
        }));
    }
    for handle in handles {
        handle.await.expect("join");
    }
    drop(sink);

    let frames = reader_task.await.expect("reader");
    assert_eq!(frames.len(), 400);
    for task in 0..8 {
        let texts: Vec<String> = frames
            .iter()
            .filter(|f| f["requestId"] == format!("r{task}"))
            .map(|f| f["payload"]["text"].as_str().expect("text").to_owned())
            .collect();
        assert_eq!(texts.len(), 50);
        for (n, text) in texts.iter().enumerate() {
            assert!(text.starts_with(&format!("{task}-{n}-")), "out of order: {text}");
        }
    }
}
