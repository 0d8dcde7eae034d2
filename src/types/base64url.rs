/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Base64URL strings: the 2^6 code points of the Base64URL alphabet, never padded.
//!
//! Addresses, signatures and transaction payloads travel as Base64URL. The `serialize` and
//! `deserialize` functions let byte fields use `#[serde(with = "base64url")]`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{de, Deserialize, Deserializer, Serializer};

/// Encode `bytes` as an unpadded Base64URL string.
pub fn encode<T: AsRef<[u8]>>(bytes: T) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode an unpadded Base64URL string. Fails with a `base64::DecodeError` if `base64_url` is
/// not valid Base64URL.
pub fn decode<T: ?Sized + AsRef<[u8]>>(base64_url: &T) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(base64_url)
}

pub(crate) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&encode(bytes))
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let string = String::deserialize(deserializer)?;
    decode(&string).map_err(de::Error::custom)
}
