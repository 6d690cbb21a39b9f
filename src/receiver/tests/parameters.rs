use crate::receiver::parameters::{format_volume, parse_parameters, parse_volume, volume_body};

#[test]
fn test_parse_volume_line() {
    let params = parse_parameters("volume: -15.000000\r\n").unwrap();
    assert_eq!(params, vec![("volume", "-15.000000")]);
}

#[test]
fn test_parse_skips_empty_lines() {
    let params = parse_parameters("\r\nvolume: -3\r\n\r\nprogress: 1/2/3\r\n").unwrap();
    assert_eq!(params, vec![("volume", "-3"), ("progress", "1/2/3")]);
}

#[test]
fn test_parse_rejects_line_without_colon() {
    assert!(parse_parameters("volume -3\r\n").is_err());
}

#[test]
fn test_parse_rejects_bad_name() {
    assert!(parse_parameters("vol ume: -3\r\n").is_err());
    assert!(parse_parameters(": -3\r\n").is_err());
}

#[test]
fn test_parse_volume_values() {
    assert!((parse_volume("-30.5").unwrap() + 30.5).abs() < f32::EPSILON);
    assert!((parse_volume("-144").unwrap() + 144.0).abs() < f32::EPSILON);
    assert!(parse_volume("loud").is_err());
    assert!(parse_volume("NaN").is_err());
}

#[test]
fn test_volume_body_formatting() {
    assert_eq!(format_volume(-15.0), "-15.000000");
    assert_eq!(volume_body(&format_volume(0.0)), "volume: 0.000000\r\n");
}
