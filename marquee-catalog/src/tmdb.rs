//! HTTP client for the movie catalog API.
//!
//! Serves two calls: the discover listing the engine pages through, and the
//! per-title release calendar the processor consults for digital dates.

use crate::config::CatalogConfig;
use crate::error::{CatalogError, CatalogResult};
use crate::processor::ReleaseDateLookup;
use async_trait::async_trait;
use chrono::NaiveDate;
use marquee_core::{
    GenreId, ItemId, RawItem, UpstreamClient, UpstreamError, UpstreamPage, UpstreamRequest,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};

/// The discover endpoint refuses pages past this one whatever `total_pages` says.
pub const MAX_DISCOVER_PAGES: u32 = 500;

/// Release type code of a digital release in the release calendar.
const DIGITAL_RELEASE_TYPE: u8 = 4;

/// Backoff reported for a 429 without a usable `Retry-After`.
const DEFAULT_RETRY_AFTER_MS: u64 = 1_000;

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct DiscoverResponse {
    #[serde(default)]
    results: Vec<DiscoverMovie>,
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct DiscoverMovie {
    id: ItemId,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    original_title: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
    /// Sent as `""` when unknown.
    #[serde(default, deserialize_with = "lenient_date")]
    release_date: Option<NaiveDate>,
    #[serde(default)]
    popularity: Option<f64>,
    #[serde(default)]
    vote_average: Option<f64>,
    #[serde(default)]
    vote_count: Option<u32>,
    #[serde(default)]
    genre_ids: Vec<GenreId>,
}

impl From<DiscoverMovie> for RawItem {
    fn from(movie: DiscoverMovie) -> Self {
        let title = movie
            .title
            .filter(|t| !t.trim().is_empty())
            .or(movie.original_title)
            .unwrap_or_default();
        RawItem {
            id: movie.id,
            title,
            poster_path: movie.poster_path,
            release_date: movie.release_date,
            popularity: movie.popularity,
            vote_average: movie.vote_average,
            vote_count: movie.vote_count,
            genre_ids: movie.genre_ids,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseCalendar {
    #[serde(default)]
    results: Vec<CountryReleases>,
}

#[derive(Debug, Deserialize)]
struct CountryReleases {
    iso_3166_1: String,
    #[serde(default)]
    release_dates: Vec<ReleaseEntry>,
}

#[derive(Debug, Deserialize)]
struct ReleaseEntry {
    #[serde(rename = "type")]
    release_type: u8,
    #[serde(default, deserialize_with = "lenient_date")]
    release_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    status_message: String,
}

/// Accepts `""`, `"2026-03-01"` and `"2026-03-01T00:00:00.000Z"`. Anything
/// unparsable becomes `None` rather than failing the whole page.
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        s.get(..10)
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
    }))
}

// ============================================================================
// DECODING
// ============================================================================

/// Decode a discover response body into an upstream page.
pub fn parse_discover(body: &str) -> Result<UpstreamPage, UpstreamError> {
    let response: DiscoverResponse =
        serde_json::from_str(body).map_err(|e| UpstreamError::InvalidResponse {
            reason: format!("Failed to parse discover response: {}", e),
        })?;

    Ok(UpstreamPage {
        items: response.results.into_iter().map(RawItem::from).collect(),
        total_pages: response.total_pages.min(MAX_DISCOVER_PAGES),
    })
}

/// Earliest digital release in a release calendar body.
///
/// With a region, only that country's entries count; a title with no entry
/// for the region has no digital date.
pub fn parse_digital_release(
    body: &str,
    region: Option<&str>,
) -> Result<Option<NaiveDate>, UpstreamError> {
    let calendar: ReleaseCalendar =
        serde_json::from_str(body).map_err(|e| UpstreamError::InvalidResponse {
            reason: format!("Failed to parse release calendar: {}", e),
        })?;

    Ok(calendar
        .results
        .iter()
        .filter(|country| region.map_or(true, |r| country.iso_3166_1.eq_ignore_ascii_case(r)))
        .flat_map(|country| country.release_dates.iter())
        .filter(|entry| entry.release_type == DIGITAL_RELEASE_TYPE)
        .filter_map(|entry| entry.release_date)
        .min())
}

/// Query parameters of a discover call, minus credentials.
pub fn discover_query(request: &UpstreamRequest) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("sort_by", request.sort_hint.to_string()),
        ("page", request.page.to_string()),
        ("include_adult", "false".to_string()),
        ("include_video", "false".to_string()),
    ];
    if let Some(region) = &request.window.region {
        query.push(("region", region.clone()));
    }
    if let Some(from) = request.window.from {
        query.push(("primary_release_date.gte", from.format("%Y-%m-%d").to_string()));
    }
    if let Some(to) = request.window.to {
        query.push(("primary_release_date.lte", to.format("%Y-%m-%d").to_string()));
    }
    query
}

/// Map a non-success status to an upstream error.
pub fn status_error(status: StatusCode, page: u32, retry_after_ms: u64, body: &str) -> UpstreamError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return UpstreamError::RateLimited { retry_after_ms };
    }

    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|e| e.status_message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    UpstreamError::RequestFailed {
        page,
        status: status.as_u16(),
        message,
    }
}

fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(|seconds| (seconds * 1000.0) as u64)
}

fn transport(e: reqwest::Error) -> UpstreamError {
    UpstreamError::Transport {
        reason: e.to_string(),
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Catalog API client.
#[derive(Clone)]
pub struct TmdbClient {
    client: Client,
    base_url: String,
    api_key: String,
    language: String,
    lookup_region: Option<String>,
}

impl TmdbClient {
    pub fn new(config: &CatalogConfig) -> CatalogResult<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CatalogError::ClientBuild {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            language: config.language.clone(),
            lookup_region: config.lookup_region.clone(),
        })
    }

    /// GET `path` and return the body of a successful response.
    ///
    /// `page` only labels errors.
    async fn get_body(
        &self,
        path: &str,
        query: &[(&'static str, String)],
        page: u32,
    ) -> Result<String, UpstreamError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("language", self.language.as_str()),
            ])
            .query(query)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_success() {
            return response.text().await.map_err(transport);
        }

        let retry_after_ms =
            parse_retry_after_ms(response.headers()).unwrap_or(DEFAULT_RETRY_AFTER_MS);
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let err = status_error(status, page, retry_after_ms, &body);
        tracing::debug!(path, status = status.as_u16(), error = %err, "Catalog request rejected");
        Err(err)
    }
}

#[async_trait]
impl UpstreamClient for TmdbClient {
    async fn fetch_page(&self, request: &UpstreamRequest) -> Result<UpstreamPage, UpstreamError> {
        let body = self
            .get_body("discover/movie", &discover_query(request), request.page)
            .await?;
        parse_discover(&body)
    }
}

#[async_trait]
impl ReleaseDateLookup for TmdbClient {
    async fn digital_release_date(&self, id: ItemId) -> Result<Option<NaiveDate>, UpstreamError> {
        let body = self
            .get_body(&format!("movie/{}/release_dates", id), &[], 0)
            .await?;
        parse_digital_release(&body, self.lookup_region.as_deref())
    }
}

impl std::fmt::Debug for TmdbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmdbClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("language", &self.language)
            .field("lookup_region", &self.lookup_region)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::ReleaseWindow;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_discover_maps_fields() {
        let body = r#"{
            "page": 1,
            "total_pages": 3,
            "total_results": 41,
            "results": [
                {"id": 11, "title": "Known", "poster_path": "/k.jpg",
                 "release_date": "2026-03-01", "popularity": 12.5,
                 "vote_average": 7.1, "vote_count": 90, "genre_ids": [28, 12]},
                {"id": 12, "title": "", "original_title": "Original",
                 "release_date": ""}
            ]
        }"#;

        let page = parse_discover(body).unwrap();
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 2);

        let known = &page.items[0];
        assert_eq!(known.id, 11);
        assert_eq!(known.release_date, Some(date(2026, 3, 1)));
        assert_eq!(known.genre_ids, vec![28, 12]);

        let undated = &page.items[1];
        assert_eq!(undated.title, "Original");
        assert_eq!(undated.release_date, None);
        assert_eq!(undated.popularity, None);
    }

    #[test]
    fn test_parse_discover_caps_total_pages() {
        let page = parse_discover(r#"{"results": [], "total_pages": 41234}"#).unwrap();
        assert_eq!(page.total_pages, MAX_DISCOVER_PAGES);
    }

    #[test]
    fn test_parse_discover_rejects_garbage() {
        let err = parse_discover("<html>gateway timeout</html>").unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidResponse { .. }));
    }

    #[test]
    fn test_parse_digital_release_by_region() {
        let body = r#"{"id": 5, "results": [
            {"iso_3166_1": "US", "release_dates": [
                {"type": 3, "release_date": "2026-01-10T00:00:00.000Z"},
                {"type": 4, "release_date": "2026-02-20T00:00:00.000Z"}
            ]},
            {"iso_3166_1": "GB", "release_dates": [
                {"type": 4, "release_date": "2026-02-05T00:00:00.000Z"}
            ]}
        ]}"#;

        assert_eq!(parse_digital_release(body, None).unwrap(), Some(date(2026, 2, 5)));
        assert_eq!(
            parse_digital_release(body, Some("us")).unwrap(),
            Some(date(2026, 2, 20))
        );
        assert_eq!(parse_digital_release(body, Some("FR")).unwrap(), None);
    }

    #[test]
    fn test_discover_query_includes_window() {
        let request = UpstreamRequest {
            sort_hint: "primary_release_date.asc",
            page: 4,
            window: ReleaseWindow {
                region: Some("GB".to_string()),
                from: Some(date(2026, 1, 1)),
                to: Some(date(2026, 6, 30)),
            },
        };
        let query = discover_query(&request);
        assert!(query.contains(&("sort_by", "primary_release_date.asc".to_string())));
        assert!(query.contains(&("page", "4".to_string())));
        assert!(query.contains(&("region", "GB".to_string())));
        assert!(query.contains(&("primary_release_date.gte", "2026-01-01".to_string())));
        assert!(query.contains(&("primary_release_date.lte", "2026-06-30".to_string())));

        let open = discover_query(&UpstreamRequest {
            sort_hint: "popularity.desc",
            page: 1,
            window: ReleaseWindow::default(),
        });
        assert!(open.iter().all(|(name, _)| !name.starts_with("primary_release_date")));
    }

    #[test]
    fn test_status_error_mapping() {
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS, 3, 2_000, ""),
            UpstreamError::RateLimited {
                retry_after_ms: 2_000
            }
        );

        let err = status_error(
            StatusCode::UNAUTHORIZED,
            1,
            0,
            r#"{"status_code": 7, "status_message": "Invalid API key"}"#,
        );
        assert_eq!(
            err,
            UpstreamError::RequestFailed {
                page: 1,
                status: 401,
                message: "Invalid API key".to_string(),
            }
        );
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let client = TmdbClient::new(&CatalogConfig::new("super-secret")).unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
