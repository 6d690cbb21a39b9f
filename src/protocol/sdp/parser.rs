use super::SdpError;

/// One `<letter>=<value>` line of an SDP body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdpLine<'a> {
    /// Line type letter before `=`
    pub kind: char,
    /// Everything after `=`
    pub value: &'a str,
}

/// Split an SDP body into lines
///
/// Carriage returns are removed, trailing blank lines are dropped, and
/// every remaining line must have the form `<a-z>=<value>`.
///
/// # Errors
///
/// Returns `SdpError::InvalidLine` for the first line that does not match.
pub fn parse_lines(body: &str) -> Result<Vec<SdpLine<'_>>, SdpError> {
    let mut lines: Vec<&str> = body.split('\n').collect();
    while lines.last().is_some_and(|l| l.trim_end_matches('\r').is_empty()) {
        lines.pop();
    }

    lines
        .into_iter()
        .map(|raw| {
            let line = raw.trim_end_matches('\r');
            let mut chars = line.chars();
            match (chars.next(), chars.next()) {
                (Some(kind), Some('=')) if kind.is_ascii_lowercase() => Ok(SdpLine {
                    kind,
                    value: &line[2..],
                }),
                _ => Err(SdpError::InvalidLine(line.to_string())),
            }
        })
        .collect()
}

/// Parse `audio <port> RTP/AVP <format>`, returning the format index
pub(crate) fn parse_media(value: &str) -> Result<u32, SdpError> {
    let invalid = || SdpError::InvalidMedia(value.to_string());

    let rest = value.strip_prefix("audio ").ok_or_else(invalid)?;
    let (port, rest) = rest.split_once(' ').ok_or_else(invalid)?;
    if port.is_empty() {
        return Err(invalid());
    }
    let format = rest.strip_prefix("RTP/AVP ").ok_or_else(invalid)?;

    parse_index(format).ok_or_else(invalid)
}

/// Parse `<name>[:]<value>`, where the name is a run of word characters or dashes
pub(crate) fn parse_attribute(value: &str) -> Result<(&str, &str), SdpError> {
    let name_len = value
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(value.len());
    if name_len == 0 {
        return Err(SdpError::InvalidAttribute(value.to_string()));
    }

    let (name, rest) = value.split_at(name_len);
    Ok((name, rest.strip_prefix(':').unwrap_or(rest)))
}

/// Parse `<format> <encoding>`
pub(crate) fn parse_rtpmap(value: &str) -> Result<(u32, &str), SdpError> {
    let invalid = || SdpError::InvalidRtpmap(value.to_string());

    let (format, encoding) = value.split_once(' ').ok_or_else(invalid)?;
    let format = parse_index(format).ok_or_else(invalid)?;
    Ok((format, encoding))
}

/// Parse `<format> <option>*`
pub(crate) fn parse_fmtp(value: &str) -> Result<(u32, Vec<String>), SdpError> {
    let mut tokens = value.split_whitespace();
    let format = tokens
        .next()
        .and_then(parse_index)
        .ok_or_else(|| SdpError::InvalidFmtp(value.to_string()))?;

    Ok((format, tokens.map(str::to_string).collect()))
}

fn parse_index(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
