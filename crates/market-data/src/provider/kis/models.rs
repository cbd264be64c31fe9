//! Wire structures for the KIS open API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub(super) struct TokenRequest<'a> {
    pub grant_type: &'a str,
    pub appkey: &'a str,
    pub appsecret: &'a str,
}

/// Chart endpoints share this envelope. `rt_cd == "0"` means success and
/// rows live in `output2`, newest first.
#[derive(Debug, Deserialize)]
pub(super) struct ChartResponse {
    #[serde(default)]
    pub rt_cd: String,
    #[serde(default)]
    pub msg_cd: String,
    #[serde(default)]
    pub msg1: String,
    #[serde(default)]
    pub output2: Vec<Value>,
}

/// Error body returned by the token endpoint.
#[derive(Debug, Deserialize)]
pub(super) struct TokenErrorBody {
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub error_description: String,
}
