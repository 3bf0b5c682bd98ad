use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use super::PushError;

/// Length of an uncompressed SEC1 P-256 point.
const UNCOMPRESSED_POINT_LEN: usize = 65;

/// Decode a base64url application server (VAPID) public key.
///
/// Padding is optional. The result must be an uncompressed P-256 point.
pub fn decode_application_server_key(key: &str) -> Result<Vec<u8>, PushError> {
  let trimmed = key.trim().trim_end_matches('=');
  let bytes = URL_SAFE_NO_PAD
    .decode(trimmed)
    .map_err(|e| PushError::InvalidKey(e.to_string()))?;

  if bytes.len() != UNCOMPRESSED_POINT_LEN || bytes[0] != 0x04 {
    return Err(PushError::InvalidKey(format!(
      "expected a {}-byte uncompressed P-256 point, got {} bytes",
      UNCOMPRESSED_POINT_LEN,
      bytes.len()
    )));
  }
  Ok(bytes)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::PushConfig;

  #[test]
  fn default_key_decodes() {
    let key = decode_application_server_key(&PushConfig::default().vapid_public_key).unwrap();
    assert_eq!(key.len(), 65);
    assert_eq!(key[0], 0x04);
  }

  #[test]
  fn padding_is_accepted() {
    let padded = format!("{}=", PushConfig::default().vapid_public_key);
    assert!(decode_application_server_key(&padded).is_ok());
  }

  #[test]
  fn rejects_garbage_and_wrong_length() {
    assert!(matches!(
      decode_application_server_key("not base64!"),
      Err(PushError::InvalidKey(_))
    ));
    assert!(matches!(
      decode_application_server_key("BAAA"),
      Err(PushError::InvalidKey(_))
    ));
  }
}
