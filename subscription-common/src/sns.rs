//! Subscription service abstraction for topic email subscriptions.
//!
//! Trait-based design: the production implementation wraps the AWS SNS SDK client, and a
//! mock implementation is always available for tests of anything that depends on the trait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aws_sdk_sns::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_sns::operation::list_subscriptions_by_topic::ListSubscriptionsByTopicError;
use aws_sdk_sns::operation::subscribe::SubscribeError;
use aws_sdk_sns::operation::unsubscribe::UnsubscribeError;
use aws_sdk_sns::Client as AwsSnsSdkClient;
use thiserror::Error;
use tracing::warn;

/// The only protocol this crate manages subscriptions for.
pub const EMAIL_PROTOCOL: &str = "email";

/// Identifier returned by the service in place of an ARN while the recipient has not
/// confirmed the subscription yet.
pub const PENDING_CONFIRMATION: &str = "PendingConfirmation";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("subscription operation failed: {0}")]
    OperationFailed(String),
}

/// One subscription as listed on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub protocol: String,
    pub endpoint: String,
    pub subscription_arn: String,
}

impl Subscription {
    pub fn new(protocol: &str, endpoint: &str, subscription_arn: &str) -> Self {
        Self {
            protocol: protocol.to_owned(),
            endpoint: endpoint.to_owned(),
            subscription_arn: subscription_arn.to_owned(),
        }
    }

    pub fn is_pending_confirmation(&self) -> bool {
        is_pending_confirmation(&self.subscription_arn)
    }
}

/// Subscriptions awaiting confirmation are listed as `PendingConfirmation`, while subscribe
/// calls answer `pending confirmation`. Neither can be passed to unsubscribe.
pub fn is_pending_confirmation(subscription_arn: &str) -> bool {
    subscription_arn.eq_ignore_ascii_case(PENDING_CONFIRMATION)
        || subscription_arn.eq_ignore_ascii_case("pending confirmation")
}

/// A single page of subscriptions, with the token to fetch the next one if any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionPage {
    pub subscriptions: Vec<Subscription>,
    pub next_token: Option<String>,
}

/// Subscription service trait that both real and mock implementations use
#[async_trait]
pub trait SubscriptionService: Send + Sync {
    /// Subscribe `endpoint` to `topic_arn`, returning the subscription identifier.
    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
    ) -> Result<String, SubscriptionError>;

    /// Remove a confirmed subscription by its identifier.
    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), SubscriptionError>;

    /// Fetch one page of the subscriptions on `topic_arn`.
    async fn list_subscriptions_by_topic(
        &self,
        topic_arn: &str,
        next_token: Option<&str>,
    ) -> Result<SubscriptionPage, SubscriptionError>;
}

/// Real subscription service backed by SNS.
pub struct SnsImpl {
    client: AwsSnsSdkClient,
}

impl SnsImpl {
    pub fn new(client: AwsSnsSdkClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SubscriptionService for SnsImpl {
    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
    ) -> Result<String, SubscriptionError> {
        let output = self
            .client
            .subscribe()
            .topic_arn(topic_arn)
            .protocol(protocol)
            .endpoint(endpoint)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                match service_error {
                    SubscribeError::InvalidParameterException(_) => {
                        SubscriptionError::InvalidParameter(service_message(&service_error))
                    }
                    SubscribeError::NotFoundException(_) => SubscriptionError::NotFound(
                        format!("{} ({})", topic_arn, service_message(&service_error)),
                    ),
                    _ => operation_failed("subscribe", &service_error),
                }
            })?;

        Ok(output
            .subscription_arn()
            .unwrap_or(PENDING_CONFIRMATION)
            .to_owned())
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), SubscriptionError> {
        self.client
            .unsubscribe()
            .subscription_arn(subscription_arn)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                match service_error {
                    UnsubscribeError::NotFoundException(_) => SubscriptionError::NotFound(
                        format!("{} ({})", subscription_arn, service_message(&service_error)),
                    ),
                    UnsubscribeError::InvalidParameterException(_) => {
                        SubscriptionError::InvalidParameter(service_message(&service_error))
                    }
                    _ => operation_failed("unsubscribe", &service_error),
                }
            })?;

        Ok(())
    }

    async fn list_subscriptions_by_topic(
        &self,
        topic_arn: &str,
        next_token: Option<&str>,
    ) -> Result<SubscriptionPage, SubscriptionError> {
        let output = self
            .client
            .list_subscriptions_by_topic()
            .topic_arn(topic_arn)
            .set_next_token(next_token.map(str::to_owned))
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                match service_error {
                    ListSubscriptionsByTopicError::NotFoundException(_) => {
                        SubscriptionError::NotFound(format!(
                            "{} ({})",
                            topic_arn,
                            service_message(&service_error)
                        ))
                    }
                    _ => operation_failed("list subscriptions", &service_error),
                }
            })?;

        let subscriptions = output
            .subscriptions()
            .iter()
            .map(|s| Subscription {
                protocol: s.protocol().unwrap_or_default().to_owned(),
                endpoint: s.endpoint().unwrap_or_default().to_owned(),
                subscription_arn: s.subscription_arn().unwrap_or_default().to_owned(),
            })
            .collect();

        Ok(SubscriptionPage {
            subscriptions,
            next_token: output.next_token().map(str::to_owned),
        })
    }
}

fn service_message(error: &impl ProvideErrorMetadata) -> String {
    error
        .message()
        .unwrap_or("rejected by the subscription service")
        .to_owned()
}

fn operation_failed<E>(operation: &str, error: &E) -> SubscriptionError
where
    E: std::error::Error + ProvideErrorMetadata,
{
    warn!(
        "{} failed with {}: {}",
        operation,
        error.code().unwrap_or("an unclassified error"),
        DisplayErrorContext(error)
    );
    SubscriptionError::OperationFailed(DisplayErrorContext(error).to_string())
}

/// A call received by `MockSubscriptionService`, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Subscribe {
        topic_arn: String,
        protocol: String,
        endpoint: String,
    },
    Unsubscribe {
        subscription_arn: String,
    },
    ListSubscriptionsByTopic {
        topic_arn: String,
        next_token: Option<String>,
    },
}

/// Mock subscription service for testing - always available, no conditional compilation needed.
///
/// Unconfigured subscribes answer `pending confirmation` and unconfigured unsubscribes succeed,
/// which is what the real service does for fresh email endpoints. Listing pages are chained with
/// their index as the continuation token.
#[derive(Clone, Default)]
pub struct MockSubscriptionService {
    subscribe_responses: HashMap<String, Result<String, SubscriptionError>>,
    unsubscribe_responses: HashMap<String, Result<(), SubscriptionError>>,
    pages: Vec<Vec<Subscription>>,
    list_error: Option<SubscriptionError>,
    calls: Arc<Mutex<Vec<ServiceCall>>>,
}

impl MockSubscriptionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set up a response for subscribe() of `endpoint`, whatever the topic.
    pub fn subscribe_ret(
        mut self,
        endpoint: &str,
        response: Result<String, SubscriptionError>,
    ) -> Self {
        self.subscribe_responses
            .insert(endpoint.to_owned(), response);
        self
    }

    /// Set up a response for unsubscribe() of `subscription_arn`.
    pub fn unsubscribe_ret(
        mut self,
        subscription_arn: &str,
        response: Result<(), SubscriptionError>,
    ) -> Self {
        self.unsubscribe_responses
            .insert(subscription_arn.to_owned(), response);
        self
    }

    /// Append a page to what list_subscriptions_by_topic() returns.
    pub fn subscription_page(mut self, subscriptions: Vec<Subscription>) -> Self {
        self.pages.push(subscriptions);
        self
    }

    /// Make every list_subscriptions_by_topic() call fail.
    pub fn list_error(mut self, error: SubscriptionError) -> Self {
        self.list_error = Some(error);
        self
    }

    /// Every call received so far. Clones share the same record.
    pub fn calls(&self) -> Vec<ServiceCall> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, call: ServiceCall) {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
    }
}

#[async_trait]
impl SubscriptionService for MockSubscriptionService {
    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
    ) -> Result<String, SubscriptionError> {
        self.record(ServiceCall::Subscribe {
            topic_arn: topic_arn.to_owned(),
            protocol: protocol.to_owned(),
            endpoint: endpoint.to_owned(),
        });

        match self.subscribe_responses.get(endpoint) {
            Some(response) => response.clone(),
            None => Ok("pending confirmation".to_owned()),
        }
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), SubscriptionError> {
        self.record(ServiceCall::Unsubscribe {
            subscription_arn: subscription_arn.to_owned(),
        });

        match self.unsubscribe_responses.get(subscription_arn) {
            Some(response) => response.clone(),
            None => Ok(()),
        }
    }

    async fn list_subscriptions_by_topic(
        &self,
        topic_arn: &str,
        next_token: Option<&str>,
    ) -> Result<SubscriptionPage, SubscriptionError> {
        self.record(ServiceCall::ListSubscriptionsByTopic {
            topic_arn: topic_arn.to_owned(),
            next_token: next_token.map(str::to_owned),
        });

        if let Some(error) = &self.list_error {
            return Err(error.clone());
        }

        let index = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| SubscriptionError::InvalidParameter(token.to_owned()))?,
            None => 0,
        };

        let subscriptions = self.pages.get(index).cloned().unwrap_or_default();
        let next_token = if index + 1 < self.pages.len() {
            Some((index + 1).to_string())
        } else {
            None
        };

        Ok(SubscriptionPage {
            subscriptions,
            next_token,
        })
    }
}
