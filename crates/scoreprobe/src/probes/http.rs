use std::collections::BTreeMap;

use regex::Regex;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::check::{Outcome, Probe, RunContext, TIMEOUT_MESSAGE};
use crate::fields::{FieldSpec, Literal};
use crate::models::SAVED_VALUE_KEY;
use crate::template;

const REQUEST_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("Host"),
    FieldSpec::required("Path"),
    FieldSpec::optional("HTTPS"),
    FieldSpec::defaulted("Port", Literal::UInt(80)),
    FieldSpec::defaulted("Method", Literal::Str("GET")),
    FieldSpec::optional("Headers"),
    FieldSpec::optional("Body"),
    FieldSpec::optional("MatchCode"),
    FieldSpec::defaulted("Code", Literal::UInt(200)),
    FieldSpec::optional("MatchContent"),
    FieldSpec::defaulted("ContentRegex", Literal::Str(".*")),
    FieldSpec::optional("StoreValue"),
];

/// Sequence of HTTP requests that must all succeed.
///
/// Requests share a cookie store, so a login request can precede the page
/// being checked. A request with `StoreValue` saves its last regex capture,
/// and every later request is re-rendered with `{{.SavedValue}}` bound to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Http {
    /// Whether HTTPS certificates are validated
    #[serde(rename = "Verify", deserialize_with = "super::lenient")]
    pub verify: bool,

    /// Whether the last matched content is returned in the result details
    #[serde(rename = "ReportMatchedContent", deserialize_with = "super::lenient")]
    pub report_matched_content: bool,

    #[serde(rename = "Requests")]
    pub requests: Vec<HttpRequest>,
}

/// A single request of an [`Http`] check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRequest {
    /// IP or FQDN of the server
    #[serde(rename = "Host")]
    pub host: String,

    #[serde(rename = "Path")]
    pub path: String,

    #[serde(rename = "HTTPS", alias = "Https", deserialize_with = "super::lenient")]
    pub https: bool,

    #[serde(rename = "Port", deserialize_with = "super::lenient")]
    pub port: u16,

    #[serde(rename = "Method")]
    pub method: String,

    /// Header fields to add or override
    #[serde(rename = "Headers")]
    pub headers: BTreeMap<String, String>,

    #[serde(rename = "Body")]
    pub body: String,

    /// Whether the status code must equal `code`
    #[serde(rename = "MatchCode", deserialize_with = "super::lenient")]
    pub match_code: bool,

    #[serde(rename = "Code", deserialize_with = "super::lenient")]
    pub code: u16,

    /// Whether the body must match `content_regex`
    #[serde(rename = "MatchContent", deserialize_with = "super::lenient")]
    pub match_content: bool,

    #[serde(rename = "ContentRegex")]
    pub content_regex: String,

    /// Whether the matched content is saved for later requests
    #[serde(rename = "StoreValue", deserialize_with = "super::lenient")]
    pub store_value: bool,
}

#[derive(Debug, Error)]
enum RequestError {
    #[error("error constructing request: {0}")]
    Construct(String),

    #[error("error making request: {0}")]
    Send(#[source] reqwest::Error),

    #[error("received bad status code: {0}")]
    StatusCode(u16),

    #[error("error reading response body: {0}")]
    ReadBody(#[source] reqwest::Error),

    #[error("error compiling regex `{pattern}`: {source}")]
    Regex { pattern: String, source: regex::Error },

    #[error("received bad response body")]
    BadBody,
}

#[async_trait::async_trait]
impl Probe for Http {
    const KIND: &'static str = "http";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::optional("Verify"),
        FieldSpec::optional("ReportMatchedContent"),
        FieldSpec::list("Requests", REQUEST_FIELDS),
    ];

    async fn probe(&self, ctx: &RunContext) -> Outcome {
        if self.requests.is_empty() {
            return Outcome::fail("no requests defined");
        }

        let client = match Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(!self.verify)
            .timeout(ctx.remaining())
            .build()
        {
            Ok(client) => client,
            Err(e) => return Outcome::fail(format!("could not create HTTP client: {e}")),
        };

        let mut outcome = Outcome::fail("");
        let mut last_match: Option<String> = None;
        let mut saved: Option<String> = None;

        for (index, request) in self.requests.iter().enumerate() {
            if ctx.is_cancelled() {
                return Outcome::fail(TIMEOUT_MESSAGE);
            }

            let request = match &saved {
                Some(value) => with_saved_value(request, value),
                None => request.clone(),
            };

            let Some(sent) = ctx.guard(send(&client, &request)).await else {
                return Outcome::fail(TIMEOUT_MESSAGE);
            };

            match sent {
                Ok(matched) => {
                    outcome = Outcome::pass("");
                    if request.store_value {
                        saved = Some(matched.clone());
                    }
                    last_match = Some(matched);
                }
                Err(e) => {
                    debug!(request = index, host = %request.host, "http request failed: {e}");
                    outcome = Outcome::fail(e.to_string());
                    break;
                }
            }
        }

        match last_match {
            Some(matched) if self.report_matched_content => {
                outcome.with_detail("matched_content", matched)
            }
            _ => outcome,
        }
    }
}

/// Send one request; on success return the last capture of the content regex
async fn send(client: &Client, request: &HttpRequest) -> Result<String, RequestError> {
    let scheme = if request.https { "https" } else { "http" };
    let url = Url::parse(&format!("{scheme}://{}:{}{}", request.host, request.port, request.path))
        .map_err(|e| RequestError::Construct(e.to_string()))?;
    let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
        .map_err(|e| RequestError::Construct(e.to_string()))?;

    let mut builder = client.request(method, url).body(request.body.clone());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder.send().await.map_err(RequestError::Send)?;

    let status = response.status().as_u16();
    if request.match_code && status != request.code {
        return Err(RequestError::StatusCode(status));
    }

    if !request.match_content {
        return Ok(String::new());
    }

    let body = response.text().await.map_err(RequestError::ReadBody)?;
    let regex = Regex::new(&request.content_regex).map_err(|source| RequestError::Regex {
        pattern: request.content_regex.clone(),
        source,
    })?;
    let captures = regex.captures(&body).ok_or(RequestError::BadBody)?;
    let last = captures.get(captures.len() - 1).map_or("", |m| m.as_str());

    Ok(last.to_string())
}

/// Re-render a request with `SavedValue` bound, keeping the original on error
fn with_saved_value(request: &HttpRequest, saved: &str) -> HttpRequest {
    let vars = BTreeMap::from([(SAVED_VALUE_KEY.to_string(), saved.to_string())]);

    let encoded = match serde_json::to_string(request) {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!("failed to encode http request for SavedValue templating: {e}");
            return request.clone();
        }
    };
    let rendered = match template::render(&encoded, &vars) {
        Ok(rendered) => rendered,
        Err(e) => {
            warn!("failed to template http request with SavedValue: {e}");
            return request.clone();
        }
    };

    serde_json::from_str(&rendered).unwrap_or_else(|e| {
        warn!("failed to decode SavedValue-templated http request: {e}");
        request.clone()
    })
}
