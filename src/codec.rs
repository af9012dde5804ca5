use base64::{
    Engine,
    alphabet,
    engine::{
        DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig, general_purpose::STANDARD,
    },
};
use serde_json::Value;
use snafu::{ResultExt, Snafu, ensure};

/// Accepts both the standard and the url-safe alphabet (after normalization), padded or not.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Snafu)]
pub enum CodecError {
    #[snafu(display("CodecError: Input is not valid base64"))]
    Decode { source: base64::DecodeError },

    #[snafu(display("CodecError: Decoded input is not valid JSON"))]
    Json { source: serde_json::Error },

    #[snafu(display("CodecError: Expected a JWT made of three segments, got {segments}"))]
    Format { segments: usize },
}

/// Standard, padded base64 of the UTF-8 bytes of `input`.
///
/// Used to build the `Basic` credentials sent to the token endpoint.
pub fn encode_to_base64(input: impl AsRef<str>) -> String {
    STANDARD.encode(input.as_ref().as_bytes())
}

/// Decodes `input` (standard or url-safe alphabet, padding optional) and parses the bytes as JSON.
pub fn decode_base64_to_json(input: impl AsRef<str>) -> Result<Value, CodecError> {
    let normalized: String = input
        .as_ref()
        .trim()
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    let bytes = LENIENT.decode(normalized).context(DecodeSnafu {})?;
    serde_json::from_slice(&bytes).context(JsonSnafu {})
}

/// Header and payload of a JWT, decoded but NOT verified.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedJwt {
    pub header: Value,
    pub payload: Value,
}

impl ParsedJwt {
    pub fn subject(&self) -> Option<&str> {
        self.payload.get("sub").and_then(Value::as_str)
    }
}

/// Splits `token` into its three segments and decodes header and payload.
/// The signature segment is not inspected.
pub fn parse_jwt(token: impl AsRef<str>) -> Result<ParsedJwt, CodecError> {
    let segments = token.as_ref().split('.').collect::<Vec<_>>();
    ensure!(
        segments.len() == 3,
        FormatSnafu {
            segments: segments.len()
        }
    );
    Ok(ParsedJwt {
        header: decode_base64_to_json(segments[0])?,
        payload: decode_base64_to_json(segments[1])?,
    })
}
