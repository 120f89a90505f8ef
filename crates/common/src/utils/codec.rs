use serde::{de::DeserializeOwned, Serialize};

/// Serialize a record into its on-disk bincode form.
pub fn encode<T: Serialize>(value: &T) -> bincode::Result<Vec<u8>> {
    bincode::serialize(value)
}

/// Deserialize an on-disk record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> bincode::Result<T> {
    bincode::deserialize(bytes)
}
