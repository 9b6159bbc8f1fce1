//! Payload encoding for object frames. The framing layer never looks inside
//! a body, so swapping this codec only has to keep both ends in agreement.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CorralError, Result};

pub fn encode<T>(value: &T) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    serde_json::to_vec(value).map_err(|source| CorralError::Encode {
        type_name: std::any::type_name::<T>(),
        source,
    })
}

pub fn decode<T>(bytes: &[u8]) -> Result<T>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(bytes).map_err(|source| CorralError::Decode {
        type_name: std::any::type_name::<T>(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        port: u16,
    }

    #[test]
    fn decode_reports_the_expected_type() {
        let bytes = encode(&vec![1, 2, 3]).unwrap();
        let err = decode::<Sample>(&bytes).unwrap_err();
        match err {
            CorralError::Decode { type_name, .. } => assert!(type_name.ends_with("Sample")),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn encodes_plain_data() {
        let sample = Sample {
            name: "worker-1".to_string(),
            port: 4001,
        };
        let bytes = encode(&sample).unwrap();
        assert_eq!(bytes, br#"{"name":"worker-1","port":4001}"#);
        assert_eq!(decode::<Sample>(&bytes).unwrap(), sample);
    }
}
