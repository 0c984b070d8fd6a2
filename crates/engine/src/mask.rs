// SPDX-License-Identifier: MIT

//! Mask data-URL decoding, shared by `submitInput` and job creation's
//! `masks` map (spec.md §6).

use rst_core::SchedulerError;

/// Decode a `data:image/png;base64,...` URL into raw bytes.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>, SchedulerError> {
    use base64::Engine as _;
    let body = data_url
        .split_once("base64,")
        .map(|(_, b)| b)
        .unwrap_or(data_url);
    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| SchedulerError::Validation(format!("invalid mask data URL: {e}")))
}
