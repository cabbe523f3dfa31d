use std::sync::Arc;

use subscription_common::sns::{SubscriptionError, SubscriptionService, EMAIL_PROTOCOL};
use tracing::debug;

/// Resolves the identifier of a confirmed email subscription on a topic.
#[derive(Clone)]
pub struct SubscriptionLookup {
    service: Arc<dyn SubscriptionService>,
    /// Upper bound on the number of list pages scanned for one address.
    max_pages: usize,
}

impl SubscriptionLookup {
    pub fn new(service: Arc<dyn SubscriptionService>, max_pages: usize) -> Self {
        Self { service, max_pages }
    }

    /// Scan the subscriptions of `topic_arn` for a confirmed email subscription whose endpoint
    /// is exactly `address`, following continuation tokens until found or exhausted.
    ///
    /// Pending subscriptions are skipped: they have no identifier that unsubscribe accepts and
    /// expire on their own.
    pub async fn find(
        &self,
        topic_arn: &str,
        address: &str,
    ) -> Result<Option<String>, SubscriptionError> {
        let mut next_token: Option<String> = None;

        for _ in 0..self.max_pages {
            let page = self
                .service
                .list_subscriptions_by_topic(topic_arn, next_token.as_deref())
                .await?;

            for subscription in page.subscriptions {
                if subscription.protocol != EMAIL_PROTOCOL || subscription.endpoint != address {
                    continue;
                }
                if subscription.is_pending_confirmation() {
                    debug!("skipping unconfirmed subscription for {}", address);
                    continue;
                }
                return Ok(Some(subscription.subscription_arn));
            }

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(None),
            }
        }

        Err(SubscriptionError::OperationFailed(format!(
            "gave up listing subscriptions of {} after {} pages",
            topic_arn, self.max_pages
        )))
    }
}
