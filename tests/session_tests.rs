//! Session file parsing against recorder output shapes seen in the wild.

use webreplay::session::{Event, Session, SessionError};

#[test]
fn parses_bare_event_array() {
    let json = r#"[
        {"type":"navigate","href":"https://shop.example/cart","timestamp":1700000000000},
        {"type":"click","detail":{"tag":"BUTTON","text":"Checkout","id":"checkout-btn"},"timestamp":1700000001200},
        {"type":"input","detail":{"tag":"INPUT","name":"email","value":"a@b.example","type":"email"},"timestamp":1700000003000}
    ]"#;
    let session = Session::from_json(json).unwrap();
    assert!(session.device.is_none());
    assert_eq!(session.events.len(), 3);
    let Event::Navigate { href, .. } = &session.events[0] else {
        panic!("first event should be a navigation");
    };
    assert_eq!(href, "https://shop.example/cart");
}

#[test]
fn parses_object_form_with_device() {
    let json = r#"{
        "device": "iPhone 13",
        "events": [
            {"type":"navigate","href":"https://shop.example/","timestamp":0},
            {"type":"waitFor","selector":".hydrated","timestamp":100}
        ]
    }"#;
    let session = Session::from_json(json).unwrap();
    assert_eq!(session.device.as_deref(), Some("iPhone 13"));
    let Event::WaitFor { timeout, .. } = &session.events[1] else {
        panic!("second event should be a waitFor");
    };
    // Recorder omits the timeout; the default applies.
    assert_eq!(*timeout, 5000);
}

#[test]
fn tolerates_unknown_detail_fields() {
    let json = r#"[
        {"type":"navigate","href":"https://shop.example/","timestamp":0},
        {"type":"click","detail":{"tag":"BUTTON","text":"Go","boundingClientRect":{"x":10,"y":20,"width":80,"height":24},"ariaLabel":"go"},"timestamp":50}
    ]"#;
    let session = Session::from_json(json).unwrap();
    let Event::Click {
        detail: Some(detail),
        ..
    } = &session.events[1]
    else {
        panic!("second event should be a click with detail");
    };
    assert_eq!(detail.text.as_deref(), Some("Go"));
    assert!(detail.bounding_client_rect.is_some());
}

#[test]
fn blank_hint_strings_become_none() {
    let json = r#"[
        {"type":"navigate","href":"https://shop.example/","timestamp":0},
        {"type":"click","detail":{"tag":"BUTTON","id":"","selector":"  ","text":"Go"},"timestamp":50}
    ]"#;
    let session = Session::from_json(json).unwrap();
    let Event::Click {
        detail: Some(detail),
        ..
    } = &session.events[1]
    else {
        panic!("second event should be a click with detail");
    };
    assert!(detail.id.is_none());
    assert!(detail.selector.is_none());
    assert_eq!(detail.text.as_deref(), Some("Go"));
}

#[test]
fn rejects_empty_session() {
    let err = Session::from_json("[]").unwrap_err();
    assert!(matches!(err, SessionError::Empty));
}

#[test]
fn rejects_session_not_starting_with_navigate() {
    let json = r#"[
        {"type":"click","detail":{"text":"Go"},"timestamp":0}
    ]"#;
    let err = Session::from_json(json).unwrap_err();
    assert!(matches!(err, SessionError::FirstEventNotNavigate { .. }));
}

#[test]
fn rejects_malformed_json() {
    let err = Session::from_json("{not json").unwrap_err();
    assert!(matches!(err, SessionError::Parse(_)));
}

#[test]
fn checkbox_detection_covers_both_input_kinds() {
    let json = r#"[
        {"type":"navigate","href":"https://shop.example/","timestamp":0},
        {"type":"click","detail":{"tag":"INPUT","type":"radio","name":"shipping"},"timestamp":10},
        {"type":"click","detail":{"tag":"INPUT","type":"text","name":"street"},"timestamp":20}
    ]"#;
    let session = Session::from_json(json).unwrap();
    let details: Vec<_> = session
        .events
        .iter()
        .filter_map(|e| match e {
            Event::Click { detail, .. } => detail.as_ref(),
            _ => None,
        })
        .collect();
    assert!(details[0].is_checkbox_or_radio());
    assert!(!details[1].is_checkbox_or_radio());
}
