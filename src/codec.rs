//! Record blob codec.
//!
//! Records travel through the key space as opaque byte blobs; this module is
//! the only place that knows the blob format: a format-version byte followed
//! by the bincode body. Everything that cannot be parsed surfaces as
//! [`StoreError::DecodeFailure`].

use lodestone_core::{Record, StoreError};

const FORMAT_VERSION: u8 = 1;

pub fn encode_record<R: Record>(record: &R) -> Result<Vec<u8>, StoreError> {
    let body = bincode::serialize(record)
        .map_err(|error| StoreError::decode(format!("record encode: {error}")))?;
    let mut blob = Vec::with_capacity(1 + body.len());
    blob.push(FORMAT_VERSION);
    blob.extend_from_slice(&body);
    Ok(blob)
}

pub fn decode_record<R: Record>(blob: &[u8]) -> Result<R, StoreError> {
    match blob.split_first() {
        Some((&FORMAT_VERSION, body)) => bincode::deserialize(body)
            .map_err(|error| StoreError::decode(format!("record decode: {error}"))),
        Some((version, _)) => Err(StoreError::decode(format!(
            "unknown record format version {version}"
        ))),
        None => Err(StoreError::decode("empty record blob")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_testing::User;

    #[test]
    fn test_record_roundtrip() {
        let user = User::new("u1", "a@example.com", "US", 100, "active");
        let blob = encode_record(&user).unwrap();
        let decoded: User = decode_record(&blob).unwrap();
        assert_eq!(user, decoded);
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        let user = User::new("u1", "a@example.com", "US", 100, "active");
        let mut blob = encode_record(&user).unwrap();
        blob[0] = 99;
        assert!(matches!(
            decode_record::<User>(&blob),
            Err(StoreError::DecodeFailure(_))
        ));
    }

    #[test]
    fn test_decode_rejects_empty() {
        assert!(matches!(
            decode_record::<User>(&[]),
            Err(StoreError::DecodeFailure(_))
        ));
    }
}
