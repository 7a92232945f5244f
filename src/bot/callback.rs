use crate::{
    media::{FormatSelector, QUALITY_PREFIX},
    pipeline::RequestId,
};

pub const GET_AUDIO_PREFIX: &str = "get_audio:";

/// Decoded button-press payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Quality(FormatSelector),
    GetAudio(RequestId),
    /// Anything else, including malformed ids. Ignored.
    Unknown,
}

impl Callback {
    pub fn parse(data: &str) -> Self {
        if let Some(format_id) = data.strip_prefix(QUALITY_PREFIX) {
            return match format_id.trim() {
                "" => Callback::Unknown,
                value => Callback::Quality(FormatSelector::from_callback_value(value)),
            };
        }

        if let Some(raw_id) = data.strip_prefix(GET_AUDIO_PREFIX) {
            return RequestId::parse(raw_id)
                .map(Callback::GetAudio)
                .unwrap_or(Callback::Unknown);
        }

        Callback::Unknown
    }

    pub fn audio_data(id: &RequestId) -> String {
        format!("{GET_AUDIO_PREFIX}{id}")
    }
}
