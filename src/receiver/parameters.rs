//! `text/parameters` bodies of SET_PARAMETER and GET_PARAMETER

use crate::error::RaopError;

/// Content type of parameter bodies
pub const CONTENT_TYPE_PARAMETERS: &str = "text/parameters";

/// The only parameter RAOP senders set and query
pub const VOLUME: &str = "volume";

/// Parse a parameter body into `(name, value)` pairs
///
/// Each line reads `name: value`; names are ASCII letters, digits, `_` or
/// `-`. Carriage returns and empty lines are ignored.
///
/// # Errors
///
/// Returns `RaopError::Protocol` for a line that does not follow the grammar.
pub fn parse_parameters(body: &str) -> Result<Vec<(&str, &str)>, RaopError> {
    body.split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Result<(&str, &str), RaopError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| RaopError::protocol(format!("cannot parse parameter line {line:?}")))?;

    let valid_name = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if !valid_name {
        return Err(RaopError::protocol(format!(
            "cannot parse parameter line {line:?}"
        )));
    }

    Ok((name, value.trim_start_matches(' ')))
}

/// Parse a `volume` value in AirTunes dB
///
/// # Errors
///
/// Returns `RaopError::Protocol` if the value is not a number.
pub fn parse_volume(value: &str) -> Result<f32, RaopError> {
    value
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|db| !db.is_nan())
        .ok_or_else(|| RaopError::protocol(format!("invalid volume {value:?}")))
}

/// Body answering a `volume` query
#[must_use]
pub fn volume_body(value: &str) -> String {
    format!("{VOLUME}: {value}\r\n")
}

/// AirTunes dB formatted the way senders write it
#[must_use]
pub fn format_volume(db: f32) -> String {
    format!("{db:.6}")
}
