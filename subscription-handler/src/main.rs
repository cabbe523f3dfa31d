//! Serve custom resource events that keep email subscriptions of a topic in line with a stack.
use std::sync::Arc;

use envconfig::Envconfig;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use subscription_common::sns::{SnsImpl, SubscriptionService};
use subscription_handler::callback::{build_http_client, CallbackNotifier};
use subscription_handler::config::Config;
use subscription_handler::handler::{InvocationResponse, SubscriptionHandler};
use subscription_handler::lookup::SubscriptionLookup;
use subscription_handler::reconciler::SubscriptionReconciler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .without_time()
        .init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let aws_config = aws_config::load_from_env().await;
    let service: Arc<dyn SubscriptionService> =
        Arc::new(SnsImpl::new(aws_sdk_sns::Client::new(&aws_config)));

    let http_client = build_http_client(
        config.callback_connect_timeout.0,
        config.callback_request_timeout.0,
        config.callback_user_agent.as_str(),
    )
    .expect("failed to construct reqwest client for callbacks");

    let handler = SubscriptionHandler::new(
        SubscriptionReconciler::new(
            service.clone(),
            SubscriptionLookup::new(service, config.list_subscriptions_max_pages.get()),
        ),
        CallbackNotifier::new(http_client, config.callback_max_response_body),
    );
    let handler = &handler;

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        let outcome = handler.handle(&event.payload).await;
        if let Some(error) = outcome.callback_error {
            tracing::error!(
                "result of request {} was not delivered: {}",
                event.context.request_id,
                error
            );
        }
        Ok::<InvocationResponse, Error>(outcome.response)
    }))
    .await
}
