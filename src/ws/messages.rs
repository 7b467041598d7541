use serde::{Deserialize, Serialize};

use crate::models::{Participant, SummaryDocument};

/// Metadata attached to every audio chunk. Sample parameters default to
/// 16 kHz mono 16-bit PCM when the extension omits them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMetadata {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub meeting_url: Option<String>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_sample_width")]
    pub sample_width: u16,
    #[serde(default)]
    pub chunk_size: Option<u64>,
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_channels() -> u16 {
    1
}

fn default_sample_width() -> u16 {
    2
}

impl Default for AudioMetadata {
    fn default() -> Self {
        Self {
            platform: None,
            meeting_url: None,
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            sample_width: default_sample_width(),
            chunk_size: None,
        }
    }
}

/// Participant entry as delivered by the browser extension.
#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantUpdate {
    #[serde(alias = "participantId", default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(alias = "platformId", default)]
    pub platform_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(alias = "isHost", default)]
    pub is_host: bool,
    #[serde(alias = "joinTime", default)]
    pub join_time: Option<String>,
}

/// Payload of a MEETING_EVENT message. The end-of-meeting flush flag is
/// accepted in either camelCase or snake_case.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeetingEventData {
    #[serde(
        rename = "bufferFlushComplete",
        alias = "buffer_flush_complete",
        default
    )]
    pub buffer_flush_complete: Option<bool>,
    #[serde(default)]
    pub participant: Option<ParticipantUpdate>,
    #[serde(default)]
    pub participants: Option<Vec<ParticipantUpdate>>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(alias = "meetingUrl", default)]
    pub meeting_url: Option<String>,
}

/// Messages the browser extension sends to the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "HANDSHAKE", rename_all = "camelCase")]
    Handshake {
        client_type: String,
        version: String,
        #[serde(default)]
        capabilities: Vec<String>,
    },
    #[serde(rename = "AUDIO_CHUNK")]
    AudioChunk {
        data: String,
        #[serde(default)]
        timestamp: Option<i64>,
        #[serde(default)]
        metadata: AudioMetadata,
    },
    #[serde(rename = "AUDIO_CHUNK_ENHANCED")]
    AudioChunkEnhanced {
        data: String,
        #[serde(default)]
        timestamp: Option<i64>,
        #[serde(default)]
        metadata: AudioMetadata,
        #[serde(default)]
        participants: Vec<ParticipantUpdate>,
        #[serde(default)]
        participant_count: Option<u32>,
    },
    #[serde(rename = "MEETING_EVENT", rename_all = "camelCase")]
    MeetingEvent {
        event_type: String,
        #[serde(default)]
        data: MeetingEventData,
    },
    #[serde(rename = "GET_SESSION_INFO")]
    GetSessionInfo,
}

/// Messages the gateway sends back to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "HANDSHAKE_ACK", rename_all = "camelCase")]
    HandshakeAck {
        server_version: String,
        status: String,
        supported_features: Vec<String>,
        timestamp: String,
    },
    #[serde(rename = "TRANSCRIPTION_RESULT")]
    TranscriptionResult {
        meeting_id: String,
        text: String,
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        speaker: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        sequence: i64,
    },
    #[serde(rename = "MEETING_UPDATE")]
    MeetingUpdate {
        meeting_id: String,
        participants: Vec<Participant>,
    },
    #[serde(rename = "PROCESSING_STATUS")]
    ProcessingStatus {
        meeting_id: String,
        stage: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    #[serde(rename = "PROCESSING_COMPLETE")]
    ProcessingComplete {
        meeting_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<SummaryDocument>,
        #[serde(skip_serializing_if = "Option::is_none")]
        task_count: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "ERROR")]
    Error { message: String },
    #[serde(rename = "SESSION_INFO")]
    SessionInfo {
        meeting_id: String,
        participant_count: usize,
        chunk_count: usize,
        transcript_length: usize,
    },
}

impl OutboundMessage {
    pub fn error(message: impl Into<String>) -> Self {
        OutboundMessage::Error {
            message: message.into(),
        }
    }
}

/// Processing stages surfaced to clients during finalization.
pub mod stages {
    pub const TRANSCRIPTION_DONE: &str = "transcription_done";
    pub const EXTRACTION_DONE: &str = "extraction_done";
    pub const INTEGRATION_DONE: &str = "integration_done";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trip() {
        let raw = r#"{"type":"HANDSHAKE","clientType":"extension","version":"1.2.0","capabilities":["audio"]}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        match msg {
            InboundMessage::Handshake {
                client_type,
                version,
                capabilities,
            } => {
                assert_eq!(client_type, "extension");
                assert_eq!(version, "1.2.0");
                assert_eq!(capabilities, vec!["audio"]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn audio_chunk_metadata_defaults() {
        let raw = r#"{"type":"AUDIO_CHUNK","data":"AAAA","timestamp":123,"metadata":{"platform":"zoom","meetingUrl":"https://zoom.us/j/1"}}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        match msg {
            InboundMessage::AudioChunk { metadata, .. } => {
                assert_eq!(metadata.sample_rate, 16_000);
                assert_eq!(metadata.channels, 1);
                assert_eq!(metadata.sample_width, 2);
                assert_eq!(metadata.platform.as_deref(), Some("zoom"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn meeting_event_flush_flag_camel_case() {
        let raw = r#"{"type":"MEETING_EVENT","eventType":"meeting_ended","data":{"bufferFlushComplete":true}}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        match msg {
            InboundMessage::MeetingEvent { event_type, data } => {
                assert_eq!(event_type, "meeting_ended");
                assert_eq!(data.buffer_flush_complete, Some(true));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn meeting_event_flush_flag_snake_case() {
        let raw = r#"{"type":"MEETING_EVENT","eventType":"meeting_ended","data":{"buffer_flush_complete":true}}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        match msg {
            InboundMessage::MeetingEvent { data, .. } => {
                assert_eq!(data.buffer_flush_complete, Some(true));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let raw = r#"{"type":"NOT_A_THING","data":"x"}"#;
        assert!(serde_json::from_str::<InboundMessage>(raw).is_err());
    }

    #[test]
    fn outbound_tagging() {
        let msg = OutboundMessage::HandshakeAck {
            server_version: "0.1.0".into(),
            status: "ready".into(),
            supported_features: vec!["transcription".into()],
            timestamp: "2025-01-01T00:00:00Z".into(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "HANDSHAKE_ACK");
        assert_eq!(v["serverVersion"], "0.1.0");
        assert_eq!(v["supportedFeatures"][0], "transcription");

        let info = OutboundMessage::SessionInfo {
            meeting_id: "mtg-abc".into(),
            participant_count: 2,
            chunk_count: 5,
            transcript_length: 120,
        };
        let v = serde_json::to_value(&info).unwrap();
        assert_eq!(v["type"], "SESSION_INFO");
        assert_eq!(v["meeting_id"], "mtg-abc");
        assert_eq!(v["chunk_count"], 5);
    }
}
