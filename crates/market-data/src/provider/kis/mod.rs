//! Korea Investment & Securities (KIS) open API provider.
//!
//! This module provides:
//! - Client-credentials token issuance via `/oauth2/tokenP`
//! - Daily and monthly charts via `inquire-daily-itemchartprice`
//! - 1/5/15-minute charts via `inquire-time-itemchartprice`
//!
//! Both chart endpoints answer with one bounded page, newest rows first.
//! Older rows are reached by moving the end of the request window back.
//!
//! KIS reports most failures inside a `200 OK` body through `rt_cd`/`msg_cd`,
//! and answers throttled calls with `EGW00201`. Both are mapped onto
//! [`MarketDataError`] so the caller's retry policy can act on them.

mod models;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use log::debug;
use reqwest::{Client, StatusCode};

use crate::errors::MarketDataError;
use crate::models::{AccessGrant, FieldMap, ProviderRecord, Resolution, TimestampFields};
use crate::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};

use models::{ChartResponse, TokenErrorBody, TokenRequest};

const PROVIDER_ID: &str = "KIS";

/// Production endpoint. The paper-trading host is
/// `https://openapivts.koreainvestment.com:29443`.
pub const DEFAULT_BASE_URL: &str = "https://openapi.koreainvestment.com:9443";

const TOKEN_PATH: &str = "/oauth2/tokenP";
const DAILY_CHART_PATH: &str = "/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice";
const MINUTE_CHART_PATH: &str = "/uapi/domestic-stock/v1/quotations/inquire-time-itemchartprice";

const DAILY_CHART_TR_ID: &str = "FHKST03010100";
const MINUTE_CHART_TR_ID: &str = "FHKST03010200";

/// "Transactions per second exceeded".
const RATE_LIMIT_CODE: &str = "EGW00201";
/// "Token expired".
const TOKEN_EXPIRED_CODE: &str = "EGW00123";

/// Rows per page of the daily/monthly chart.
const DAILY_PAGE_ROWS: usize = 100;
/// Rows per page of the minute chart.
const MINUTE_PAGE_ROWS: usize = 30;

const DATE_FIELD: &str = "stck_bsop_date";
const KST_OFFSET_SECS: i32 = 9 * 3600;

const SERVED_RESOLUTIONS: &[Resolution] = &[
    Resolution::OneMinute,
    Resolution::FiveMinutes,
    Resolution::FifteenMinutes,
    Resolution::Daily,
    Resolution::Monthly,
];

/// Connection settings for [`KisProvider`].
#[derive(Clone)]
pub struct KisConfig {
    pub base_url: String,
    pub app_key: String,
    pub app_secret: String,
    pub timeout: Duration,
}

impl KisConfig {
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl std::fmt::Debug for KisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KisConfig")
            .field("base_url", &self.base_url)
            .field("app_key", &"***")
            .field("app_secret", &"***")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// KIS open API market data provider.
pub struct KisProvider {
    client: Client,
    config: KisConfig,
}

impl KisProvider {
    /// Create a new KIS provider.
    pub fn new(config: KisConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Issue a GET against a chart endpoint and decode its rows.
    async fn get_chart(
        &self,
        access_token: &str,
        path: &str,
        tr_id: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<ProviderRecord>, MarketDataError> {
        let url = reqwest::Url::parse_with_params(&self.url(path), params).map_err(|e| {
            MarketDataError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to build URL: {}", e),
            }
        })?;

        debug!("KIS request: {} ({})", url.path(), tr_id);

        let response = self
            .client
            .get(url)
            .header("content-type", "application/json; charset=utf-8")
            .header("authorization", format!("Bearer {}", access_token))
            .header("appkey", &self.config.app_key)
            .header("appsecret", &self.config.app_secret)
            .header("tr_id", tr_id)
            .header("custtype", "P")
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_send_error)?;
        classify_status(status, &body)?;
        parse_chart_response(&body)
    }

    fn minute_chart_params(
        symbol: &str,
        resolution: Resolution,
        until: DateTime<Utc>,
    ) -> Vec<(&'static str, String)> {
        let local = until.with_timezone(&kst());
        vec![
            ("FID_ETC_CLS_CODE", interval_code(resolution).to_string()),
            ("FID_COND_MRKT_DIV_CODE", "J".to_string()),
            ("FID_INPUT_ISCD", symbol.to_string()),
            ("FID_INPUT_HOUR_1", local.format("%H%M%S").to_string()),
            ("FID_PW_DATA_INCU_YN", "Y".to_string()),
        ]
    }

    fn unsupported(resolution: Resolution) -> MarketDataError {
        MarketDataError::UnsupportedResolution {
            provider: PROVIDER_ID.to_string(),
            resolution,
        }
    }
}

#[async_trait]
impl MarketDataProvider for KisProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            resolutions: SERVED_RESOLUTIONS,
            max_intraday_days: 30,
        }
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            daily_call_limit: 1_000,
            min_delay: Duration::from_millis(100),
        }
    }

    fn history_page_rows(&self, resolution: Resolution) -> Option<usize> {
        if resolution.is_intraday() {
            Some(MINUTE_PAGE_ROWS)
        } else {
            Some(DAILY_PAGE_ROWS)
        }
    }

    fn field_map(&self, resolution: Resolution) -> FieldMap {
        if resolution.is_intraday() {
            FieldMap {
                timestamp: TimestampFields::DateTime {
                    date_field: DATE_FIELD,
                    date_format: "%Y%m%d",
                    time_field: "stck_cntg_hour",
                    time_format: "%H%M%S",
                },
                open: "stck_oprc",
                high: "stck_hgpr",
                low: "stck_lwpr",
                close: "stck_prpr",
                volume: "cntg_vol",
                utc_offset: kst(),
            }
        } else {
            FieldMap {
                timestamp: TimestampFields::Date {
                    field: DATE_FIELD,
                    format: "%Y%m%d",
                },
                open: "stck_oprc",
                high: "stck_hgpr",
                low: "stck_lwpr",
                close: "stck_clpr",
                volume: "acml_vol",
                utc_offset: kst(),
            }
        }
    }

    async fn authenticate(&self) -> Result<AccessGrant, MarketDataError> {
        let request = TokenRequest {
            grant_type: "client_credentials",
            appkey: &self.config.app_key,
            appsecret: &self.config.app_secret,
        };

        let response = self
            .client
            .post(self.url(TOKEN_PATH))
            .json(&request)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_send_error)?;

        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            let message = serde_json::from_str::<TokenErrorBody>(&body)
                .map(|e| format!("{} {}", e.error_code, e.error_description))
                .unwrap_or_else(|_| format!("HTTP {}", status));
            return Err(MarketDataError::Unauthorized {
                provider: PROVIDER_ID.to_string(),
                message,
            });
        }
        classify_status(status, &body)?;

        serde_json::from_str::<AccessGrant>(&body).map_err(|e| MarketDataError::MalformedResponse {
            provider: PROVIDER_ID.to_string(),
            message: e.to_string(),
        })
    }

    async fn fetch_history(
        &self,
        access_token: &str,
        symbol: &str,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ProviderRecord>, MarketDataError> {
        // The minute chart only takes an end time within the current day;
        // `start` bounds how far back the caller keeps paging.
        if resolution.is_intraday() {
            let params = Self::minute_chart_params(symbol, resolution, end);
            return self
                .get_chart(access_token, MINUTE_CHART_PATH, MINUTE_CHART_TR_ID, &params)
                .await;
        }

        let period = period_code(resolution).ok_or_else(|| Self::unsupported(resolution))?;
        let params = vec![
            ("FID_COND_MRKT_DIV_CODE", "J".to_string()),
            ("FID_INPUT_ISCD", symbol.to_string()),
            ("FID_INPUT_DATE_1", local_date(start)),
            ("FID_INPUT_DATE_2", local_date(end)),
            ("FID_PERIOD_DIV_CODE", period.to_string()),
            ("FID_ORG_ADJ_PRC", "0".to_string()),
        ];
        self.get_chart(access_token, DAILY_CHART_PATH, DAILY_CHART_TR_ID, &params)
            .await
    }

    async fn fetch_recent(
        &self,
        access_token: &str,
        symbol: &str,
        resolution: Resolution,
    ) -> Result<Vec<ProviderRecord>, MarketDataError> {
        if !resolution.is_intraday() {
            return Err(Self::unsupported(resolution));
        }
        let params = Self::minute_chart_params(symbol, resolution, Utc::now());
        self.get_chart(access_token, MINUTE_CHART_PATH, MINUTE_CHART_TR_ID, &params)
            .await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn kst() -> FixedOffset {
    FixedOffset::east_opt(KST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

fn local_date(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&kst()).format("%Y%m%d").to_string()
}

fn period_code(resolution: Resolution) -> Option<&'static str> {
    match resolution {
        Resolution::Daily => Some("D"),
        Resolution::Monthly => Some("M"),
        _ => None,
    }
}

fn interval_code(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::FiveMinutes => "05",
        Resolution::FifteenMinutes => "15",
        _ => "01",
    }
}

fn map_send_error(e: reqwest::Error) -> MarketDataError {
    if e.is_timeout() {
        MarketDataError::Timeout {
            provider: PROVIDER_ID.to_string(),
        }
    } else {
        MarketDataError::Network(e)
    }
}

/// Maps a non-success HTTP status onto an error.
fn classify_status(status: StatusCode, body: &str) -> Result<(), MarketDataError> {
    if status.is_success() {
        return Ok(());
    }

    // KIS answers throttled calls with a 500 carrying EGW00201.
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains(RATE_LIMIT_CODE) {
        return Err(MarketDataError::RateLimited {
            provider: PROVIDER_ID.to_string(),
        });
    }

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || body.contains(TOKEN_EXPIRED_CODE)
    {
        return Err(MarketDataError::Unauthorized {
            provider: PROVIDER_ID.to_string(),
            message: format!("HTTP {}", status),
        });
    }

    if status.is_server_error() {
        return Err(MarketDataError::ServerError {
            provider: PROVIDER_ID.to_string(),
            status: status.as_u16(),
        });
    }

    Err(MarketDataError::ProviderError {
        provider: PROVIDER_ID.to_string(),
        message: format!("HTTP {}", status),
    })
}

fn parse_chart_response(body: &str) -> Result<Vec<ProviderRecord>, MarketDataError> {
    let response: ChartResponse =
        serde_json::from_str(body).map_err(|e| MarketDataError::MalformedResponse {
            provider: PROVIDER_ID.to_string(),
            message: e.to_string(),
        })?;

    if response.rt_cd != "0" {
        return Err(match response.msg_cd.as_str() {
            RATE_LIMIT_CODE => MarketDataError::RateLimited {
                provider: PROVIDER_ID.to_string(),
            },
            TOKEN_EXPIRED_CODE => MarketDataError::Unauthorized {
                provider: PROVIDER_ID.to_string(),
                message: response.msg1,
            },
            _ => MarketDataError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: format!("{} {}", response.msg_cd, response.msg1.trim()),
            },
        });
    }

    // KIS pads short pages with blank rows.
    Ok(response
        .output2
        .iter()
        .filter_map(|row| row.as_object())
        .map(ProviderRecord::from_json_object)
        .filter(|record| record.get(DATE_FIELD).is_some())
        .collect())
}
