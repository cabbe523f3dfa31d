use std::time;

use reqwest::{header, redirect, Client, Response};
use subscription_common::cloudformation::{CallbackEnvelope, ResponseStatus};
use tracing::{error, info};

use crate::error::CallbackError;
use crate::request::CallbackTarget;

/// Build the client used to deliver callbacks.
///
/// Redirects are never followed: the callback URL is pre-signed and single use, and its query
/// must not be replayed against whatever host a redirect points at.
pub fn build_http_client(
    connect_timeout: time::Duration,
    request_timeout: time::Duration,
    user_agent: &str,
) -> reqwest::Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(user_agent)
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .redirect(redirect::Policy::none())
        .build()
}

/// Reports the result of an invocation to the orchestrator with a single PUT.
#[derive(Clone)]
pub struct CallbackNotifier {
    http_client: Client,
    /// How much of a rejected response body is kept in the error.
    max_response_body: usize,
}

impl CallbackNotifier {
    pub fn new(http_client: Client, max_response_body: usize) -> Self {
        Self {
            http_client,
            max_response_body,
        }
    }

    /// Serialize the envelope for `target` and PUT it to the callback URL.
    /// Anything other than a 2xx answer is an error.
    pub async fn notify(
        &self,
        target: &CallbackTarget,
        status: ResponseStatus,
        reason: &str,
    ) -> Result<(), CallbackError> {
        let envelope = CallbackEnvelope::new(
            status,
            reason,
            &target.stack_id,
            &target.request_id,
            &target.logical_resource_id,
        );
        let body = serde_json::to_vec(&envelope)?;
        let url: reqwest::Url = target.response_url.parse()?;

        info!(
            "sending {} callback ({} bytes) to {}",
            status,
            body.len(),
            url.host_str().unwrap_or("<no host>")
        );

        let response = self
            .http_client
            .put(url)
            .header(header::CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                metrics::counter!("custom_resource_callbacks_total", "status" => "error")
                    .increment(1);
                CallbackError::from(e)
            })?;

        let response_status = response.status();
        metrics::counter!("custom_resource_callbacks_total", "status" => response_status.as_str().to_owned())
            .increment(1);

        if response_status.is_success() {
            info!("callback accepted with status {}", response_status);
            return Ok(());
        }

        let body = match first_n_bytes_of_response(response, self.max_response_body).await {
            Ok(body) => body,
            Err(e) => format!("could not read response body: {}", e),
        };
        error!("callback rejected with status {}: {}", response_status, body);

        Err(CallbackError::BadStatus {
            status: response_status,
            body,
        })
    }
}

/// Read at most `n` bytes of a response body, decoded lossily as UTF-8.
async fn first_n_bytes_of_response(mut response: Response, n: usize) -> reqwest::Result<String> {
    let mut buffer: Vec<u8> = Vec::with_capacity(n.min(8 * 1024));

    while buffer.len() < n {
        match response.chunk().await? {
            Some(chunk) => {
                let upper_bound = std::cmp::min(n - buffer.len(), chunk.len());
                buffer.extend_from_slice(&chunk[..upper_bound]);
            }
            None => break,
        }
    }

    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
