//! Wire frames for the client transport (Twilio Media Streams framing).

use serde::{Deserialize, Serialize};

use voxline_voice::TurnSummary;

/// Client → server frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundFrame {
    Connected,
    Start { start: StartData },
    Media { media: MediaPayload },
    Mark { mark: MarkName },
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartData {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    #[serde(rename = "accountSid")]
    pub account_sid: String,
    #[serde(rename = "callSid")]
    pub call_sid: String,
}

/// Base64-encoded audio payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkName {
    pub name: String,
}

/// Server → client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboundFrame {
    Media { media: MediaPayload },
    Mark { mark: MarkName },
    /// Drop any buffered-but-unplayed media.
    Clear,
    StartResponding,
    StartRestream,
    Result { result: TurnSummary },
}

/// Split a mark name (`"<sid>_<speech>_<chunk>"`) into its indices.
///
/// The stream sid may itself contain underscores, so indices are taken from
/// the right.
pub fn parse_mark_name(name: &str) -> Option<(usize, usize)> {
    let mut parts = name.rsplitn(3, '_');
    let chunk_idx = parts.next()?.parse().ok()?;
    let speech_idx = parts.next()?.parse().ok()?;
    parts.next()?;
    Some((speech_idx, chunk_idx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frames_round_trip() {
        let start: InboundFrame = serde_json::from_str(
            r#"{"event":"start","start":{"streamSid":"MZ1","accountSid":"AC1","callSid":"CA1"}}"#,
        )
        .unwrap();
        assert!(matches!(
            start,
            InboundFrame::Start { ref start } if start.stream_sid == "MZ1"
        ));

        let media: InboundFrame =
            serde_json::from_str(r#"{"event":"media","media":{"payload":"AAAA"}}"#).unwrap();
        assert!(matches!(media, InboundFrame::Media { .. }));

        let mark: InboundFrame =
            serde_json::from_str(r#"{"event":"mark","mark":{"name":"MZ1_0_2"}}"#).unwrap();
        assert!(matches!(mark, InboundFrame::Mark { .. }));

        assert!(matches!(
            serde_json::from_str::<InboundFrame>(r#"{"event":"closed"}"#).unwrap(),
            InboundFrame::Closed
        ));
    }

    #[test]
    fn outbound_frames_tag_with_event() {
        let clear = serde_json::to_string(&OutboundFrame::Clear).unwrap();
        assert_eq!(clear, r#"{"event":"clear"}"#);

        let mark = serde_json::to_string(&OutboundFrame::Mark {
            mark: MarkName { name: "sid_0_0".into() },
        })
        .unwrap();
        assert!(mark.contains(r#""event":"mark""#));
        assert!(mark.contains(r#""name":"sid_0_0""#));
    }

    #[test]
    fn mark_names_parse_from_the_right() {
        assert_eq!(parse_mark_name("MZ1_3_12"), Some((3, 12)));
        assert_eq!(parse_mark_name("sid_with_underscores_0_1"), Some((0, 1)));
        assert_eq!(parse_mark_name("garbage"), None);
        assert_eq!(parse_mark_name("sid_x_1"), None);
    }
}
