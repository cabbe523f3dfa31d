use std::sync::Arc;

use subscription_common::cloudformation::RequestType;
use subscription_common::sns::{SubscriptionError, SubscriptionService, EMAIL_PROTOCOL};
use tracing::{error, info, warn};

use crate::error::HandlerError;
use crate::lookup::SubscriptionLookup;
use crate::request::ReconciliationRequest;

/// An address the subscription service did not accept, with the reason why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressFailure {
    pub address: String,
    pub reason: String,
}

impl AddressFailure {
    fn new(address: &str, error: &SubscriptionError) -> Self {
        let reason = match error {
            SubscriptionError::InvalidParameter(message) => {
                format!("invalid email address: {}", message)
            }
            SubscriptionError::NotFound(_) => error.to_string(),
            SubscriptionError::OperationFailed(message) => message.to_owned(),
        };

        Self {
            address: address.to_owned(),
            reason,
        }
    }
}

/// Per-address results of one reconciliation. Orders follow the input order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconciliationOutcome {
    pub succeeded_addresses: Vec<String>,
    pub failed_addresses: Vec<AddressFailure>,
    /// Delete only: addresses with no confirmed subscription left to remove.
    pub absent_addresses: Vec<String>,
    pub summary: String,
}

/// Applies the desired set of email addresses of a request to the subscription service.
#[derive(Clone)]
pub struct SubscriptionReconciler {
    service: Arc<dyn SubscriptionService>,
    lookup: SubscriptionLookup,
}

impl SubscriptionReconciler {
    pub fn new(service: Arc<dyn SubscriptionService>, lookup: SubscriptionLookup) -> Self {
        Self { service, lookup }
    }

    pub async fn reconcile(
        &self,
        request: &ReconciliationRequest,
    ) -> Result<ReconciliationOutcome, HandlerError> {
        match &request.request_type {
            RequestType::Create | RequestType::Update => self.subscribe_all(request).await,
            RequestType::Delete => Ok(self.unsubscribe_all(request).await),
            RequestType::Unknown(other) => {
                Err(HandlerError::UnsupportedLifecycleAction(other.to_owned()))
            }
        }
    }

    /// Subscribe every desired address, each attempt independent of the others.
    /// Fails as a whole only when not a single address could be subscribed.
    async fn subscribe_all(
        &self,
        request: &ReconciliationRequest,
    ) -> Result<ReconciliationOutcome, HandlerError> {
        if request.desired_emails.is_empty() {
            return Ok(ReconciliationOutcome {
                summary: "No email addresses provided; nothing to subscribe".to_owned(),
                ..Default::default()
            });
        }

        let mut outcome = ReconciliationOutcome::default();

        for address in &request.desired_emails {
            match self
                .service
                .subscribe(&request.topic_arn, EMAIL_PROTOCOL, address)
                .await
            {
                Ok(subscription_arn) => {
                    info!("subscribed {} ({})", address, subscription_arn);
                    metrics::counter!("custom_resource_subscriptions_total", "outcome" => "subscribed")
                        .increment(1);
                    outcome.succeeded_addresses.push(address.to_owned());
                }
                Err(e) => {
                    let failure = AddressFailure::new(address, &e);
                    warn!("failed to subscribe {}: {}", address, failure.reason);
                    metrics::counter!("custom_resource_subscriptions_total", "outcome" => "subscribe_failed")
                        .increment(1);
                    outcome.failed_addresses.push(failure);
                }
            }
        }

        if outcome.succeeded_addresses.is_empty() {
            error!(
                "none of the {} email addresses could be subscribed",
                outcome.failed_addresses.len()
            );
            return Err(HandlerError::AllSubscriptionsFailed {
                attempted: outcome.failed_addresses.len(),
                details: describe_failures(&outcome.failed_addresses),
            });
        }

        outcome.summary = format!(
            "Email subscriptions created: {} succeeded, {} failed{}",
            outcome.succeeded_addresses.len(),
            outcome.failed_addresses.len(),
            list_failed(&outcome.failed_addresses),
        );

        Ok(outcome)
    }

    /// Remove the subscription of every desired address. Never fails: stack teardown must be
    /// able to finish even when cleanup is partial.
    async fn unsubscribe_all(&self, request: &ReconciliationRequest) -> ReconciliationOutcome {
        let mut outcome = ReconciliationOutcome::default();

        for address in &request.desired_emails {
            let subscription_arn = match self.lookup.find(&request.topic_arn, address).await {
                Ok(Some(subscription_arn)) => subscription_arn,
                Ok(None) => {
                    info!("no confirmed subscription for {}, nothing to remove", address);
                    outcome.absent_addresses.push(address.to_owned());
                    continue;
                }
                Err(e) => {
                    let failure = AddressFailure::new(address, &e);
                    warn!("failed to look up subscription of {}: {}", address, failure.reason);
                    metrics::counter!("custom_resource_subscriptions_total", "outcome" => "unsubscribe_failed")
                        .increment(1);
                    outcome.failed_addresses.push(failure);
                    continue;
                }
            };

            match self.service.unsubscribe(&subscription_arn).await {
                Ok(()) => {
                    info!("unsubscribed {} ({})", address, subscription_arn);
                    metrics::counter!("custom_resource_subscriptions_total", "outcome" => "unsubscribed")
                        .increment(1);
                    outcome.succeeded_addresses.push(address.to_owned());
                }
                Err(e) => {
                    let failure = AddressFailure::new(address, &e);
                    warn!("failed to unsubscribe {}: {}", address, failure.reason);
                    metrics::counter!("custom_resource_subscriptions_total", "outcome" => "unsubscribe_failed")
                        .increment(1);
                    outcome.failed_addresses.push(failure);
                }
            }
        }

        outcome.summary = format!(
            "Email subscriptions cleanup completed: {} removed, {} already absent, {} failed{}",
            outcome.succeeded_addresses.len(),
            outcome.absent_addresses.len(),
            outcome.failed_addresses.len(),
            list_failed(&outcome.failed_addresses),
        );

        outcome
    }
}

fn list_failed(failures: &[AddressFailure]) -> String {
    if failures.is_empty() {
        return String::new();
    }

    let addresses: Vec<&str> = failures.iter().map(|f| f.address.as_str()).collect();
    format!(" (failed: {})", addresses.join(", "))
}

fn describe_failures(failures: &[AddressFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.address, f.reason))
        .collect::<Vec<String>>()
        .join("; ")
}
