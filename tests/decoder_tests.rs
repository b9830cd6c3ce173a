use rtags_lite::diagnostics::{IssueSpan, Severity};
use rtags_lite::error::BridgeError;
use rtags_lite::stream::{MonitorEvents, StreamDecoder, StreamEvent, CONNECTION_FAILURE_MARKER};

/// Feed every line and collect all events, failing on protocol errors.
fn decode_all(decoder: &mut StreamDecoder, feed: &str) -> Vec<StreamEvent> {
    feed.lines()
        .flat_map(|line| decoder.push_line(line).unwrap())
        .collect()
}

#[test]
fn test_progress_only_emitted_when_complete() {
    let mut decoder = StreamDecoder::new();

    let events = decode_all(
        &mut decoder,
        "<progress index=\"3\" total=\"5\"></progress>\n<progress index=\"5\" total=\"5\"></progress>\n",
    );

    assert_eq!(events, vec![StreamEvent::ProgressUpdate { index: 5, total: 5 }]);
    assert!(events[0].is_indexing_complete());
}

#[test]
fn test_self_closed_progress() {
    let mut decoder = StreamDecoder::new();
    let events = decoder.push_line("<progress index='2' total='2'/>").unwrap();
    assert_eq!(events, vec![StreamEvent::ProgressUpdate { index: 2, total: 2 }]);
}

#[test]
fn test_empty_then_populated_batches_for_same_file() {
    let mut decoder = StreamDecoder::new();
    let feed = r#"<checkstyle>
<file name="/src/f.cpp">
</file>
</checkstyle>
<checkstyle>
<file name="/src/f.cpp">
<error line="2" column="4" severity="error" message="use of undeclared identifier"/>
<error line="9" column="1" length="-1" severity="warning" message="unused parameter"/>
</file>
</checkstyle>
"#;

    let events = decode_all(&mut decoder, feed);

    assert_eq!(events.len(), 2);
    match &events[0] {
        StreamEvent::DiagnosticBatch(d) => {
            assert_eq!(d.filename, "/src/f.cpp");
            assert!(d.is_empty());
        }
        other => panic!("unexpected {:?}", other),
    }
    match &events[1] {
        StreamEvent::DiagnosticBatch(d) => {
            assert_eq!(d.errors.len(), 1);
            assert_eq!(d.warnings.len(), 1);
            assert_eq!(d.errors[0].line, 2);
            assert_eq!(d.errors[0].column, 4);
            assert_eq!(d.warnings[0].length, None);
            assert_eq!(d.warnings[0].span(), IssueSpan::ToEndOfLine { start: 1 });
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_one_batch_per_file() {
    let mut decoder = StreamDecoder::new();
    let feed = concat!(
        "<checkstyle>",
        "<file name=\"a.cpp\"><error line=\"1\" column=\"1\" severity=\"fixit\" message=\"x\"/></file>",
        "<file name=\"b.cpp\"/>",
        "<file name=\"c.cpp\"><error line=\"1\" column=\"1\" severity=\"note\" message=\"n\"/></file>",
        "</checkstyle>"
    );

    let events = decoder.push_line(feed).unwrap();

    let files: Vec<(String, usize)> = events
        .iter()
        .map(|e| match e {
            StreamEvent::DiagnosticBatch(d) => (d.filename.clone(), d.errors.len() + d.warnings.len()),
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(
        files,
        vec![
            ("a.cpp".to_string(), 1),
            ("b.cpp".to_string(), 0),
            ("c.cpp".to_string(), 0)
        ]
    );
    match &events[0] {
        StreamEvent::DiagnosticBatch(d) => assert_eq!(d.errors[0].severity, Severity::Error),
        _ => unreachable!(),
    }
}

#[test]
fn test_positions_clamped_to_one() {
    let mut decoder = StreamDecoder::new();
    let events = decoder
        .push_line(r#"<checkstyle><file name="a.cpp"><error line="0" column="-3" severity="error" message="m"/></file></checkstyle>"#)
        .unwrap();

    match &events[0] {
        StreamEvent::DiagnosticBatch(d) => {
            assert_eq!(d.errors[0].line, 1);
            assert_eq!(d.errors[0].column, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_connection_error_terminates_stream() {
    let mut decoder = StreamDecoder::new();

    let events = decoder
        .push_line(&format!("{}. Is rdm running?", CONNECTION_FAILURE_MARKER))
        .unwrap();

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], StreamEvent::ConnectionError { .. }));
    assert!(decoder.is_finished());

    // Nothing after the failure is decoded
    let later = decoder
        .push_line("<progress index=\"1\" total=\"1\"></progress>")
        .unwrap();
    assert!(later.is_empty());
}

#[test]
fn test_malformed_element_recovers() {
    let mut decoder = StreamDecoder::new();

    let err = decoder
        .push_line("<checkstyle><file name=\"a.cpp\"></fil></checkstyle>")
        .unwrap_err();
    assert!(matches!(err, BridgeError::Protocol(_)));

    // The decoder has reset and decodes the next element normally
    let events = decoder
        .push_line("<progress index=\"4\" total=\"4\"></progress>")
        .unwrap();
    assert_eq!(events, vec![StreamEvent::ProgressUpdate { index: 4, total: 4 }]);
}

#[test]
fn test_unterminated_element_does_not_swallow_following_ones() {
    let mut decoder = StreamDecoder::new();
    let feed = r#"<checkstyle>
<file name="a.cpp"/>
</checkstyl>
<progress index="5" total="5"></progress>
<checkstyle>
<file name="b.cpp">
<error line="1" column="2" severity="error" message="b"/>
</file>
</checkstyle>
<progress index="7" total="7"></progress>
"#;

    let events = decode_all(&mut decoder, feed);

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], StreamEvent::ProgressUpdate { index: 5, total: 5 });
    match &events[1] {
        StreamEvent::DiagnosticBatch(d) => {
            assert_eq!(d.filename, "b.cpp");
            assert_eq!(d.errors.len(), 1);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(events[2], StreamEvent::ProgressUpdate { index: 7, total: 7 });
}

#[test]
fn test_missing_attribute_is_protocol_error() {
    let mut decoder = StreamDecoder::new();
    let err = decoder
        .push_line("<progress index=\"4\"></progress>")
        .unwrap_err();
    assert!(matches!(err, BridgeError::Protocol(_)));
}

#[test]
fn test_oversized_element_is_dropped() {
    let mut decoder = StreamDecoder::with_max_element_bytes(64);

    assert!(decoder.push_line("<checkstyle>").unwrap().is_empty());
    let err = decoder
        .push_line(&format!("<file name=\"{}\">", "x".repeat(100)))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Protocol(_)));

    let events = decoder
        .push_line("<progress index=\"1\" total=\"1\"></progress>")
        .unwrap();
    assert_eq!(events.len(), 1);
}

#[test]
fn test_text_outside_elements_is_ignored() {
    let mut decoder = StreamDecoder::new();
    assert!(decoder.push_line("rc: some chatter").unwrap().is_empty());
    assert!(decoder.push_line("").unwrap().is_empty());
    let events = decoder
        .push_line("<progress index=\"1\" total=\"1\"></progress>")
        .unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_monitor_events_over_async_reader() {
    let feed: &[u8] = b"<?xml version=\"1.0\"?>\n\
<checkstyle><file name=\"a.cpp\"><fil></checkstyle>\n\
<checkstyle><file name=\"a.cpp\"/></checkstyle>\n\
<progress index=\"7\" total=\"7\"></progress>\n\
Can't seem to connect to server\n\
<progress index=\"8\" total=\"8\"></progress>\n";

    let mut events = MonitorEvents::new(feed, StreamDecoder::new());

    match events.next_event().await {
        Some(StreamEvent::DiagnosticBatch(d)) => assert!(d.is_empty()),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        events.next_event().await,
        Some(StreamEvent::ProgressUpdate { index: 7, total: 7 })
    );
    assert!(matches!(
        events.next_event().await,
        Some(StreamEvent::ConnectionError { .. })
    ));
    assert_eq!(events.next_event().await, None);
}
