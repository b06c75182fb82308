//! HTTP flow executor: runs a task's authentication strategy once.
//!
//! COOKIE: one request to `signin_url` carrying the stored cookie.
//! PASSWORD: login → token extraction → sign-in, stopping at the first failure.
//!
//! No retries: a flaky endpoint just fails this run. Remote failures come back
//! as a failed [`FlowOutcome`]; only an unusable task configuration is an `Err`.

use std::time::Duration;

use checkin_core::config::HttpConfig;
use checkin_core::error::{CheckinError, Result};
use checkin_core::types::{CookieFlow, HttpMethod, PasswordFlow, Task, TaskMode};
use regex::{Regex, RegexBuilder};
use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};

/// Pass/fail verdict plus diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOutcome {
    pub success: bool,
    pub output: String,
}

impl FlowOutcome {
    pub fn new(success: bool, output: impl Into<String>) -> Self {
        Self {
            success,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self::new(false, output)
    }
}

/// Runs check-in flows. Cheap to clone; builds a fresh client per run.
#[derive(Debug, Clone)]
pub struct FlowExecutor {
    timeout: Duration,
    body_excerpt_chars: usize,
    user_agent: String,
}

impl FlowExecutor {
    pub fn new(config: &HttpConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            body_excerpt_chars: config.body_excerpt_chars,
            user_agent: config.user_agent.clone(),
        }
    }

    /// Run the strategy selected by the task's mode.
    pub async fn run(&self, task: &Task) -> Result<FlowOutcome> {
        match task.mode {
            TaskMode::Cookie => {
                let flow = CookieFlow::from_config(&task.config)?;
                self.run_cookie(&flow).await
            }
            TaskMode::Password => {
                let flow = PasswordFlow::from_config(&task.config)?;
                self.run_password(&flow).await
            }
        }
    }

    pub async fn run_cookie(&self, flow: &CookieFlow) -> Result<FlowOutcome> {
        let client = self.client(false)?;

        let mut headers = header_map(&flow.headers);
        if let Some(cookie) = &flow.cookie {
            match HeaderValue::from_str(cookie) {
                Ok(value) => {
                    headers.insert(COOKIE, value);
                }
                Err(e) => tracing::warn!("⚠️ Cookie value is not a valid header: {e}"),
            }
        }

        let request = match flow.method {
            HttpMethod::Post => client.post(&flow.signin_url),
            HttpMethod::Get => client.get(&flow.signin_url),
        };

        let (status, body) = match fetch(request.headers(headers)).await {
            Ok(resp) => resp,
            Err(e) => return Ok(FlowOutcome::failed(error_chain(&e))),
        };

        Ok(FlowOutcome::new(
            status < 400,
            format!("Status: {status}\nBody: {}", self.excerpt(&body)),
        ))
    }

    pub async fn run_password(&self, flow: &PasswordFlow) -> Result<FlowOutcome> {
        // Shared cookie jar: session cookies set at login ride along to sign-in.
        let client = self.client(true)?;

        // 1. Login
        let login = client
            .post(&flow.login_url)
            .headers(header_map(&flow.login_headers))
            .json(&flow.login_payload);
        let (status, login_body) = match fetch(login).await {
            Ok(resp) => resp,
            Err(e) => {
                return Ok(FlowOutcome::failed(format!(
                    "Login Request Error: {}",
                    error_chain(&e)
                )));
            }
        };
        if status >= 400 {
            return Ok(FlowOutcome::failed(format!(
                "Login Failed: {status}\n{}",
                self.excerpt(&login_body)
            )));
        }

        // 2. Token
        let token = match &flow.token_extract_rule {
            Some(rule) => match extract_token(rule, &login_body) {
                Ok(token) => token,
                Err(TokenError::NotFound) => {
                    return Ok(FlowOutcome::failed(format!(
                        "Token extract failed using rule: {rule}"
                    )));
                }
                Err(TokenError::Invalid(e)) => {
                    return Ok(FlowOutcome::failed(format!("Token Extraction Error: {e}")));
                }
            },
            None => String::new(),
        };

        // 3. Sign in
        let signin_headers = substitute_token(&flow.signin_headers, &token);
        let signin = client.get(&flow.signin_url).headers(header_map(&signin_headers));
        match fetch(signin).await {
            Ok((status, body)) => Ok(FlowOutcome::new(
                status < 400,
                format!("Signin Status: {status}\n{}", self.excerpt(&body)),
            )),
            Err(e) => Ok(FlowOutcome::failed(format!(
                "Signin Request Error: {}",
                error_chain(&e)
            ))),
        }
    }

    fn client(&self, cookie_store: bool) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .timeout(self.timeout)
            .cookie_store(cookie_store)
            .build()
            .map_err(|e| CheckinError::Http(format!("Client error: {e}")))
    }

    fn excerpt<'a>(&self, body: &'a str) -> &'a str {
        match body.char_indices().nth(self.body_excerpt_chars) {
            Some((idx, _)) => &body[..idx],
            None => body,
        }
    }
}

impl Default for FlowExecutor {
    fn default() -> Self {
        Self::new(&HttpConfig::default())
    }
}

/// Send and read the whole body. Body read failures count as transport errors.
async fn fetch(
    request: reqwest::RequestBuilder,
) -> std::result::Result<(u16, String), reqwest::Error> {
    let resp = request.send().await?;
    let status = resp.status().as_u16();
    let body = resp.text().await?;
    Ok((status, body))
}

/// Build request headers from a JSON object.
///
/// Numbers and booleans are sent as their JSON text; other non-strings are skipped.
fn header_map(headers: &Map<String, Value>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(_) | Value::Bool(_) => value.to_string(),
            _ => {
                tracing::warn!("⚠️ Skipping header '{key}': unsupported value {value}");
                continue;
            }
        };
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&text),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::warn!("⚠️ Skipping invalid header '{key}'"),
        }
    }
    map
}

/// Replace `{token}` in every string-valued header.
fn substitute_token(headers: &Map<String, Value>, token: &str) -> Map<String, Value> {
    headers
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => Value::String(s.replace("{token}", token)),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
enum TokenError {
    NotFound,
    Invalid(String),
}

/// Pull the session token out of a login response.
///
/// A rule made only of plain characters is a JSON key, looked up first (as a
/// regex it would just match its own name). Other rules are regexes: first
/// capture group, or the whole match, with the JSON key lookup as fallback.
fn extract_token(rule: &str, body: &str) -> std::result::Result<String, TokenError> {
    let json_lookup = || {
        let data: Value = serde_json::from_str(body).ok()?;
        let token = match data.get(rule)? {
            Value::Null => return None,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(token).filter(|t| !t.is_empty())
    };
    let regex_lookup = |re: &Regex| {
        let caps = re.captures(body)?;
        let m = if caps.len() > 1 { caps.get(1) } else { caps.get(0) };
        m.map(|m| m.as_str().to_string()).filter(|t| !t.is_empty())
    };

    match RegexBuilder::new(rule).build() {
        Err(e) => json_lookup().ok_or_else(|| TokenError::Invalid(e.to_string())),
        Ok(re) if regex::escape(rule) == rule => json_lookup()
            .or_else(|| regex_lookup(&re))
            .ok_or(TokenError::NotFound),
        Ok(re) => regex_lookup(&re)
            .or_else(json_lookup)
            .ok_or(TokenError::NotFound),
    }
}

/// `err: cause: cause` on one line.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}
