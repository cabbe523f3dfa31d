use serde::{Deserialize, Serialize};
use serde_json::Value;
use subscription_common::cloudformation::ResponseStatus;
use tracing::{error, info, Instrument};

use crate::callback::CallbackNotifier;
use crate::error::CallbackError;
use crate::reconciler::SubscriptionReconciler;
use crate::request::{CallbackTarget, ReconciliationRequest};

/// The value an invocation returns. Only used for direct-invocation diagnostics: the
/// orchestrator learns the result through the callback.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl InvocationResponse {
    pub fn success(body: &str) -> Self {
        Self {
            status_code: 200,
            body: body.to_owned(),
        }
    }

    pub fn failure(body: &str) -> Self {
        Self {
            status_code: 500,
            body: body.to_owned(),
        }
    }
}

/// What one invocation produced. A failed callback is carried next to the response, as it
/// never changes the response itself.
#[derive(Debug)]
pub struct HandlerOutcome {
    pub response: InvocationResponse,
    pub callback_error: Option<CallbackError>,
}

/// Parse, reconcile, then report back exactly once.
#[derive(Clone)]
pub struct SubscriptionHandler {
    reconciler: SubscriptionReconciler,
    notifier: CallbackNotifier,
}

impl SubscriptionHandler {
    pub fn new(reconciler: SubscriptionReconciler, notifier: CallbackNotifier) -> Self {
        Self {
            reconciler,
            notifier,
        }
    }

    pub async fn handle(&self, event: &Value) -> HandlerOutcome {
        // Without a callback URL there is nobody to report to.
        let target = match CallbackTarget::from_event(event) {
            Ok(target) => target,
            Err(e) => {
                error!("cannot process custom resource event: {}", e);
                return HandlerOutcome {
                    response: InvocationResponse::failure(&e.to_string()),
                    callback_error: None,
                };
            }
        };

        let request_type = event
            .get("RequestType")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let span = tracing::info_span!(
            "custom_resource",
            request_type = request_type,
            logical_resource_id = %target.logical_resource_id,
            request_id = %target.request_id,
        );

        self.reconcile_and_notify(target, event)
            .instrument(span)
            .await
    }

    async fn reconcile_and_notify(&self, target: CallbackTarget, event: &Value) -> HandlerOutcome {
        let result = match ReconciliationRequest::from_event(target.clone(), event) {
            Ok(request) => {
                info!(
                    "reconciling {} email subscriptions on {}: {:?}",
                    request.request_type, request.topic_arn, request.desired_emails
                );
                self.reconciler.reconcile(&request).await
            }
            Err(e) => Err(e),
        };

        let (status, response) = match &result {
            Ok(outcome) => (
                ResponseStatus::Success,
                InvocationResponse::success(&outcome.summary),
            ),
            Err(e) => {
                error!("custom resource request failed: {}", e);
                (
                    ResponseStatus::Failed,
                    InvocationResponse::failure(&e.to_string()),
                )
            }
        };

        let callback_error = match self.notifier.notify(&target, status, &response.body).await {
            Ok(()) => None,
            Err(e) => {
                error!("failed to deliver {} callback: {}", status, e);
                Some(e)
            }
        };

        HandlerOutcome {
            response,
            callback_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time;

    use httpmock::prelude::*;
    use serde_json::json;
    use subscription_common::sns::{MockSubscriptionService, SubscriptionService};

    use super::*;
    use crate::callback::build_http_client;
    use crate::lookup::SubscriptionLookup;

    fn handler(service: MockSubscriptionService) -> SubscriptionHandler {
        let service: Arc<dyn SubscriptionService> = Arc::new(service);
        let reconciler =
            SubscriptionReconciler::new(service.clone(), SubscriptionLookup::new(service, 10));
        let client = build_http_client(
            time::Duration::from_secs(5),
            time::Duration::from_secs(5),
            "subscription-handler-test",
        )
        .unwrap();
        SubscriptionHandler::new(reconciler, CallbackNotifier::new(client, 1024))
    }

    #[test]
    fn test_invocation_response_serializes_status_code_in_camel_case() {
        let value = serde_json::to_value(InvocationResponse::failure("nope")).unwrap();

        assert_eq!(value, json!({"statusCode": 500, "body": "nope"}));
    }

    #[tokio::test]
    async fn test_missing_response_url_fails_without_callback() {
        let service = MockSubscriptionService::new();

        let outcome = handler(service.clone())
            .handle(&json!({
                "RequestType": "Create",
                "ResourceProperties": {"TopicArn": "arn:topic", "EmailList": ["a@x.com"]}
            }))
            .await;

        assert_eq!(outcome.response.status_code, 500);
        assert_eq!(
            outcome.response.body,
            "malformed request: ResponseURL is missing"
        );
        assert!(outcome.callback_error.is_none());
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_request_with_response_url_still_reports_failure() {
        let server = MockServer::start_async().await;
        let callback = server
            .mock_async(|when, then| {
                when.method(PUT).path("/cb").json_body(json!({
                    "Status": "FAILED",
                    "Reason": "malformed request: TopicArn is missing",
                    "PhysicalResourceId": "Subs",
                    "StackId": "arn:stack",
                    "RequestId": "req-1",
                    "LogicalResourceId": "Subs",
                    "Data": {}
                }));
                then.status(200);
            })
            .await;

        let outcome = handler(MockSubscriptionService::new())
            .handle(&json!({
                "RequestType": "Create",
                "ResponseURL": server.url("/cb"),
                "StackId": "arn:stack",
                "RequestId": "req-1",
                "LogicalResourceId": "Subs",
                "ResourceProperties": {"EmailList": ["a@x.com"]}
            }))
            .await;

        callback.assert_async().await;
        assert_eq!(outcome.response.status_code, 500);
        assert!(outcome.callback_error.is_none());
    }

    #[tokio::test]
    async fn test_non_string_request_type_reports_failure() {
        let server = MockServer::start_async().await;
        let callback = server
            .mock_async(|when, then| {
                when.method(PUT).path("/cb").json_body(json!({
                    "Status": "FAILED",
                    "Reason": "malformed request: RequestType must be a string",
                    "PhysicalResourceId": "Subs",
                    "StackId": "arn:stack",
                    "RequestId": "req-1",
                    "LogicalResourceId": "Subs",
                    "Data": {}
                }));
                then.status(200);
            })
            .await;
        let service = MockSubscriptionService::new();

        let outcome = handler(service.clone())
            .handle(&json!({
                "RequestType": ["Create"],
                "ResponseURL": server.url("/cb"),
                "StackId": "arn:stack",
                "RequestId": "req-1",
                "LogicalResourceId": "Subs",
                "ResourceProperties": {"TopicArn": "arn:topic", "EmailList": ["a@x.com"]}
            }))
            .await;

        callback.assert_async().await;
        assert_eq!(
            outcome.response,
            InvocationResponse::failure("malformed request: RequestType must be a string")
        );
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_callback_failure_keeps_original_response() {
        let server = MockServer::start_async().await;
        let callback = server
            .mock_async(|when, then| {
                when.method(PUT).path("/cb");
                then.status(500);
            })
            .await;

        let outcome = handler(MockSubscriptionService::new())
            .handle(&json!({
                "RequestType": "Create",
                "ResponseURL": server.url("/cb"),
                "StackId": "arn:stack",
                "RequestId": "req-1",
                "LogicalResourceId": "Subs",
                "ResourceProperties": {"TopicArn": "arn:topic", "EmailList": "a@x.com"}
            }))
            .await;

        callback.assert_hits_async(1).await;
        assert_eq!(
            outcome.response,
            InvocationResponse::success("Email subscriptions created: 1 succeeded, 0 failed")
        );
        assert!(matches!(
            outcome.callback_error,
            Some(CallbackError::BadStatus { .. })
        ));
    }
}
