//! Wire Formatter
//!
//! Server-Sent-Events framing. A data frame is
//!
//! ```text
//! event: <name>
//! retry: 15000
//! data: {"data":<payload>}
//!
//! ```
//!
//! and a keep-alive is the comment line `:keepalive`.

use bytes::Bytes;
use serde::Serialize;

/// Event name used for position updates.
pub const CURRENT_VALUE_EVENT: &str = "current-value";

/// Client reconnect delay advertised in every data frame (ms).
pub const RETRY_MS: u32 = 15_000;

/// Keep-alive comment frame.
pub const KEEPALIVE_FRAME: &[u8] = b":keepalive\n";

/// Frame formatting errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Payload could not be encoded as JSON.
    #[error("Failed to encode frame payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    data: &'a T,
}

/// Format one data frame for `event_name` carrying `payload`.
pub fn format_event<T: Serialize>(event_name: &str, payload: &T) -> Result<Bytes, FrameError> {
    let json = serde_json::to_string(&Envelope { data: payload })?;

    let mut frame = String::with_capacity(event_name.len() + json.len() + 40);
    frame.push_str("event: ");
    frame.push_str(event_name);
    frame.push('\n');
    frame.push_str("retry: ");
    frame.push_str(&RETRY_MS.to_string());
    frame.push('\n');
    frame.push_str("data: ");
    frame.push_str(&json);
    frame.push_str("\n\n");

    Ok(Bytes::from(frame))
}

/// The keep-alive frame.
pub fn keepalive_frame() -> Bytes {
    Bytes::from_static(KEEPALIVE_FRAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use crate::core::coord::Coordinate;

    #[test]
    fn test_current_value_frame() {
        let coord = Coordinate::new(10.0, 20.0, 5.0, 1000);
        let frame = format_event(CURRENT_VALUE_EVENT, &coord).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();

        let lines: Vec<&str> = text.split('\n').collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "event: current-value");
        assert_eq!(lines[1], "retry: 15000");
        assert!(lines[2].starts_with("data: {\"data\":{"));
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], "");

        // Whole floats encode as `10.0`; JSON readers treat it the same as
        // `10`, so compare parsed values rather than bytes.
        let value: serde_json::Value = serde_json::from_str(&lines[2]["data: ".len()..]).unwrap();
        let data = value["data"].as_object().unwrap();
        assert_eq!(data.len(), 4);
        assert_eq!(data["lat"].as_f64(), Some(10.0));
        assert_eq!(data["lon"].as_f64(), Some(20.0));
        assert_eq!(data["alt"].as_f64(), Some(5.0));
        assert_eq!(data["timestamp"].as_i64(), Some(1000));
    }

    #[test]
    fn test_data_line_is_valid_json() {
        let coord = Coordinate::new(-12.25, 170.5, 0.0, 1_700_000_000);
        let frame = format_event(CURRENT_VALUE_EVENT, &coord).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();

        let data_line = text.lines().find(|l| l.starts_with("data: ")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&data_line["data: ".len()..]).unwrap();

        assert_eq!(value["data"]["lat"], -12.25);
        assert_eq!(value["data"]["lon"], 170.5);
        assert_eq!(value["data"]["alt"], 0.0);
        assert_eq!(value["data"]["timestamp"], 1_700_000_000i64);
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_keepalive_is_comment() {
        let frame = keepalive_frame();
        assert_eq!(&frame[..], b":keepalive\n");
        assert!(frame.starts_with(b":"));
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("not encodable"))
        }
    }

    #[test]
    fn test_encode_failure_is_reported() {
        let result = format_event(CURRENT_VALUE_EVENT, &Unencodable);
        assert!(matches!(result, Err(FrameError::Encode(_))));
    }
}
