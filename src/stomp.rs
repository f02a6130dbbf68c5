//! STOMP 1.2 text frames, as carried over the backend's WebSocket endpoint.
//!
//! A frame is a command line, header lines, a blank line and a body
//! terminated by NUL. Bare EOLs between frames are heart-beats.

use crate::error::StompError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Header lookup. With repeated headers the first one wins.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn connect(host: &str, authorization: Option<&str>) -> Self {
        let frame = Frame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", "0,0");
        match authorization {
            Some(value) => frame.header("Authorization", value),
            None => frame,
        }
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new("SUBSCRIBE")
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn disconnect() -> Self {
        Frame::new("DISCONNECT")
    }

    pub fn encode(&self) -> String {
        // CONNECT and CONNECTED headers are never escaped.
        let escape = !matches!(self.command.as_str(), "CONNECT" | "CONNECTED");
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse the first frame in `raw`, skipping leading heart-beats.
    pub fn parse(raw: &str) -> Result<Frame, StompError> {
        parse_one(raw).map(|(frame, _)| frame)
    }
}

/// Parse every frame in one transport message. A message made only of
/// heart-beats yields no frames.
pub fn parse_frames(raw: &str) -> Result<Vec<Frame>, StompError> {
    let mut frames = Vec::new();
    let mut rest = raw;
    while !is_heartbeat(rest) {
        let (frame, tail) = parse_one(rest)?;
        frames.push(frame);
        rest = tail;
    }
    Ok(frames)
}

pub fn is_heartbeat(raw: &str) -> bool {
    raw.chars().all(|c| c == '\n' || c == '\r')
}

fn parse_one(raw: &str) -> Result<(Frame, &str), StompError> {
    let raw = raw.trim_start_matches(['\n', '\r']);
    if raw.is_empty() {
        return Err(StompError::Empty);
    }

    let (command_line, mut rest) = split_line(raw);
    if command_line.is_empty() {
        return Err(StompError::MissingCommand);
    }
    let command = command_line.to_string();
    let escaped = !matches!(command.as_str(), "CONNECT" | "CONNECTED");

    let mut headers = Vec::new();
    loop {
        if rest.is_empty() {
            return Err(StompError::UnterminatedBody);
        }
        let (line, tail) = split_line(rest);
        rest = tail;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
        if escaped {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.trim().parse::<usize>().ok());

    let (body, tail) = match content_length {
        Some(len) => {
            let body = rest.get(..len).ok_or(StompError::UnterminatedBody)?;
            let tail = rest.get(len..).ok_or(StompError::UnterminatedBody)?;
            let tail = tail.strip_prefix('\0').ok_or(StompError::UnterminatedBody)?;
            (body, tail)
        }
        None => {
            let end = rest.find('\0').ok_or(StompError::UnterminatedBody)?;
            (&rest[..end], &rest[end + 1..])
        }
    };

    Ok((
        Frame {
            command,
            headers,
            body: body.to_string(),
        },
        tail,
    ))
}

/// Split off one line, accepting both LF and CRLF endings.
fn split_line(raw: &str) -> (&str, &str) {
    match raw.find('\n') {
        Some(idx) => (raw[..idx].trim_end_matches('\r'), &raw[idx + 1..]),
        None => (raw, ""),
    }
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(StompError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spring_message_frame() {
        let raw = "MESSAGE\ndestination:/topic/vitals/p1\ncontent-type:application/json\nsubscription:sub-vitals\nmessage-id:abc-1\ncontent-length:16\n\n{\"heartRate\":72}\0";
        let frame = Frame::parse(raw).unwrap();

        assert_eq!(frame.command, "MESSAGE");
        assert_eq!(frame.get("subscription"), Some("sub-vitals"));
        assert_eq!(frame.get("destination"), Some("/topic/vitals/p1"));
        assert_eq!(frame.body, "{\"heartRate\":72}");
    }

    #[test]
    fn test_connect_frame_layout() {
        let encoded = Frame::connect("ward.local", Some("Bearer t:k")).encode();
        assert_eq!(
            encoded,
            "CONNECT\naccept-version:1.2\nhost:ward.local\nheart-beat:0,0\nAuthorization:Bearer t:k\n\n\0"
        );
    }

    #[test]
    fn test_header_escaping_applies_outside_connect() {
        let frame = Frame::new("SEND").header("note", "a:b\nc\\d").with_body("x");
        let encoded = frame.encode();
        assert!(encoded.contains("note:a\\cb\\nc\\\\d\n"));
        assert!(encoded.contains("content-length:1\n"));

        let parsed = Frame::parse(&encoded).unwrap();
        assert_eq!(parsed.get("note"), Some("a:b\nc\\d"));
        assert_eq!(parsed.body, "x");
    }

    #[test]
    fn test_heartbeats_and_multiple_frames() {
        assert!(is_heartbeat("\n"));
        assert!(is_heartbeat("\r\n\n"));
        assert!(parse_frames("\n").unwrap().is_empty());

        let raw = "\nCONNECTED\nversion:1.2\n\n\0\nRECEIPT\nreceipt-id:1\n\n\0\n";
        let frames = parse_frames(raw).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, "CONNECTED");
        assert_eq!(frames[1].get("receipt-id"), Some("1"));
    }

    #[test]
    fn test_crlf_lines_are_accepted() {
        let frame = Frame::parse("ERROR\r\nmessage:bad\r\n\r\noops\0").unwrap();
        assert_eq!(frame.command, "ERROR");
        assert_eq!(frame.get("message"), Some("bad"));
        assert_eq!(frame.body, "oops");
    }

    #[test]
    fn test_first_repeated_header_wins() {
        let frame = Frame::parse("MESSAGE\nfoo:1\nfoo:2\n\n\0").unwrap();
        assert_eq!(frame.get("foo"), Some("1"));
    }

    #[test]
    fn test_malformed_frames() {
        assert_eq!(Frame::parse(""), Err(StompError::Empty));
        assert_eq!(Frame::parse("MESSAGE\nfoo:1\n\nbody"), Err(StompError::UnterminatedBody));
        assert!(matches!(
            Frame::parse("MESSAGE\nnocolon\n\n\0"),
            Err(StompError::MalformedHeader(_))
        ));
        assert!(matches!(
            Frame::parse("MESSAGE\nfoo:a\\tb\n\n\0"),
            Err(StompError::InvalidEscape(_))
        ));
        assert_eq!(
            Frame::parse("MESSAGE\ncontent-length:10\n\nshort\0"),
            Err(StompError::UnterminatedBody)
        );
    }
}
