//! Base64url JSON encoding for frame URL parameters.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::capabilities::Profile;
use crate::error::{ProtocolError, ProtocolResult};

/// Parameters the host hands the frame through the URL fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameParams {
    /// Options forwarded to the frame.
    #[serde(default)]
    pub options: Value,
    /// Origin of the embedding page.
    pub referrer: String,
    #[serde(default)]
    pub profile: Profile,
}

/// Encode any serializable value as base64url (no padding) JSON.
///
/// # Errors
/// Returns [`ProtocolError::Encoding`] if the value cannot be serialized.
pub fn encode_base64<T: Serialize + ?Sized>(value: &T) -> ProtocolResult<String> {
    let json = serde_json::to_vec(value).map_err(|e| ProtocolError::encoding(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decode base64url JSON produced by [`encode_base64`]. Trailing padding is tolerated.
///
/// # Errors
/// Returns [`ProtocolError::Encoding`] for invalid base64 or JSON.
pub fn decode_base64<T: DeserializeOwned>(encoded: &str) -> ProtocolResult<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| ProtocolError::encoding(format!("invalid base64: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ProtocolError::encoding(format!("invalid json: {e}")))
}

/// Frame URL with `params` in the fragment.
///
/// # Errors
/// Returns [`ProtocolError::Encoding`] if the options cannot be serialized.
pub fn frame_url(base: &Url, params: &FrameParams) -> ProtocolResult<Url> {
    let mut url = base.clone();
    url.set_fragment(Some(&encode_base64(params)?));
    Ok(url)
}

/// Read frame parameters back out of a frame URL.
///
/// # Errors
/// Returns [`ProtocolError::InvalidUrl`] when the URL has no fragment, and
/// [`ProtocolError::Encoding`] when the fragment does not decode.
pub fn decode_frame_params(url: &Url) -> ProtocolResult<FrameParams> {
    let fragment = url
        .fragment()
        .filter(|fragment| !fragment.is_empty())
        .ok_or_else(|| ProtocolError::invalid_url(format!("{url} has no frame parameters")))?;
    decode_base64(fragment)
}

/// Serde helpers for byte buffers carried as standard base64 strings.
pub mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de};

    /// Serialize bytes as standard base64.
    ///
    /// # Errors
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Deserialize standard base64 into bytes.
    ///
    /// # Errors
    /// Fails on invalid base64.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(de::Error::custom)
    }
}
