//! Turning a labeled unit of work into an HTTP request.

use anyhow::{anyhow, Result};
use reqwest::Method;
use serde_json::Value;

use crate::cli::config::RunSettings;
use crate::schedule::{request_id, StageLabel, WorkUnit};

pub const HEADER_APP_NAME: &str = "X-App-Name";
pub const HEADER_ENV: &str = "X-Env";
pub const HEADER_LT_NAME: &str = "X-LT-Name";
pub const HEADER_STAGE: &str = "X-LT-Stage";
pub const HEADER_TARGET_RPS: &str = "X-LT-Target-RPS";

/// The parts of every request that do not depend on the unit of work.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub method: Method,
    pub url: String,
    name: String,
    app_name: String,
    env: String,
    auth_token: Option<String>,
    extra_headers: Vec<(String, String)>,
    payload: Option<Value>,
}

/// A fully built request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPlan {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestTemplate {
    pub fn from_settings(settings: &RunSettings) -> Result<Self> {
        let method = Method::from_bytes(settings.method.as_bytes())
            .map_err(|_| anyhow!("Invalid HTTP method: {}", settings.method))?;
        reqwest::Url::parse(&settings.url)
            .map_err(|e| anyhow!("Invalid target URL '{}': {}", settings.url, e))?;

        let mut extra_headers: Vec<(String, String)> = settings
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        extra_headers.sort();

        Ok(Self {
            method,
            url: settings.url.clone(),
            name: settings.name.clone(),
            app_name: settings.app_name.clone(),
            env: settings.env.clone(),
            auth_token: settings.auth_token.clone(),
            extra_headers,
            payload: settings.payload.clone(),
        })
    }

    pub fn plan(&self, label: &StageLabel, work: WorkUnit, nonce: u32) -> RequestPlan {
        let id = request_id(work, nonce);
        let body = self.payload.as_ref().map(|payload| {
            let mut payload = payload.clone();
            if let Value::Object(map) = &mut payload {
                map.insert("requestId".to_string(), Value::String(id.clone()));
            }
            payload.to_string()
        });

        let mut headers = Vec::with_capacity(8 + self.extra_headers.len());
        if body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        headers.push((HEADER_APP_NAME.to_string(), self.app_name.clone()));
        headers.push((HEADER_ENV.to_string(), self.env.clone()));
        headers.push((HEADER_LT_NAME.to_string(), self.name.clone()));
        headers.push((HEADER_STAGE.to_string(), label.tag.clone()));
        headers.push((HEADER_TARGET_RPS.to_string(), label.target.clone()));
        if let Some(token) = &self.auth_token {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        headers.extend(self.extra_headers.iter().cloned());

        RequestPlan {
            method: self.method.clone(),
            url: self.url.clone(),
            headers,
            body,
        }
    }
}

impl RequestPlan {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn into_builder(self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut builder = client.request(self.method, &self.url);
        for (key, value) in self.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = self.body {
            builder = builder.body(body);
        }
        builder
    }
}
