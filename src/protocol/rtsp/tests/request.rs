use crate::protocol::rtsp::{Method, RtspRequest};

#[test]
fn test_request_encode_simple() {
    let request = RtspRequest::builder(Method::Options, "*")
        .cseq(1)
        .header("User-Agent", "test/1.0")
        .build();

    let encoded = String::from_utf8(request.encode()).unwrap();

    assert!(encoded.starts_with("OPTIONS * RTSP/1.0\r\n"));
    assert!(encoded.contains("CSeq: 1\r\n"));
    assert!(encoded.contains("User-Agent: test/1.0\r\n"));
    assert!(!encoded.contains("Content-Length"));
    assert!(encoded.ends_with("\r\n\r\n"));
}

#[test]
fn test_request_encode_with_body() {
    let request = RtspRequest::builder(Method::SetParameter, "rtsp://example.com/1")
        .cseq(5)
        .content_type("text/parameters")
        .body("volume: -15.0\r\n")
        .build();

    let encoded = String::from_utf8(request.encode()).unwrap();

    assert!(encoded.contains("Content-Type: text/parameters\r\n"));
    assert!(encoded.contains("Content-Length: 15\r\n"));
    assert!(encoded.ends_with("volume: -15.0\r\n"));
}

#[test]
fn test_forwarded_request_has_single_content_length() {
    let mut request = RtspRequest::builder(Method::Announce, "rtsp://10.0.0.1/1")
        .cseq(2)
        .header("Content-Length", "999")
        .body("v=0\r\n")
        .build();
    request.headers.insert("CSeq", "3");

    let encoded = String::from_utf8(request.encode()).unwrap();
    assert_eq!(encoded.matches("Content-Length").count(), 1);
    assert!(encoded.contains("Content-Length: 5\r\n"));
}

#[test]
fn test_extension_method_round_trips() {
    let request = RtspRequest::new(Method::Other("POST".into()), "/fp-setup");
    let encoded = String::from_utf8(request.encode()).unwrap();
    assert!(encoded.starts_with("POST /fp-setup RTSP/1.0\r\n"));
}

#[test]
fn test_method_parse() {
    assert_eq!("OPTIONS".parse::<Method>(), Ok(Method::Options));
    assert_eq!("set_parameter".parse::<Method>(), Ok(Method::SetParameter));
    assert_eq!("DESCRIBE".parse::<Method>(), Ok(Method::Other("DESCRIBE".into())));
    assert_eq!("".parse::<Method>(), Err(()));
    assert_eq!("GET /x".parse::<Method>(), Err(()));
}

#[test]
fn test_body_text_strips_carriage_returns() {
    let request = RtspRequest::builder(Method::SetParameter, "*")
        .body("volume: -3\r\n")
        .build();
    assert_eq!(request.body_text(), "volume: -3\n");
}
