use serde_json::Value;
use subscription_common::cloudformation::RequestType;

use crate::error::HandlerError;

/// Where, and under which correlation ids, the result of an invocation is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTarget {
    pub response_url: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
}

impl CallbackTarget {
    /// Extract the callback target from a raw lifecycle event. Only `ResponseURL` is
    /// required; missing correlation ids are passed through as empty strings.
    pub fn from_event(event: &Value) -> Result<Self, HandlerError> {
        Ok(Self {
            response_url: required_str(event, "ResponseURL")?.to_owned(),
            stack_id: optional_str(event, "StackId"),
            request_id: optional_str(event, "RequestId"),
            logical_resource_id: optional_str(event, "LogicalResourceId"),
        })
    }
}

/// A lifecycle event normalized into what the reconciler acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationRequest {
    pub request_type: RequestType,
    pub callback: CallbackTarget,
    pub topic_arn: String,
    /// Trimmed, non-empty addresses in input order. Duplicates are kept.
    pub desired_emails: Vec<String>,
}

impl ReconciliationRequest {
    pub fn from_event(callback: CallbackTarget, event: &Value) -> Result<Self, HandlerError> {
        let request_type = RequestType::from(required_str(event, "RequestType")?);

        let properties = event.get("ResourceProperties").ok_or_else(|| {
            HandlerError::MalformedRequest("ResourceProperties is missing".to_owned())
        })?;
        let topic_arn = required_str(properties, "TopicArn")?.to_owned();
        let desired_emails = parse_email_list(properties.get("EmailList"))?;

        Ok(Self {
            request_type,
            callback,
            topic_arn,
            desired_emails,
        })
    }
}

/// Normalize `EmailList`, given either as a list or as a comma separated string.
/// Both forms are trimmed per entry and drop empty entries, keeping order.
pub fn parse_email_list(value: Option<&Value>) -> Result<Vec<String>, HandlerError> {
    let raw: Vec<String> = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(list)) => list.split(',').map(str::to_owned).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Null => None,
                Value::String(s) => Some(s.to_owned()),
                other => Some(other.to_string()),
            })
            .collect(),
        Some(other) => {
            return Err(HandlerError::MalformedRequest(format!(
                "EmailList must be a list or a comma separated string, got {}",
                other
            )))
        }
    };

    Ok(raw
        .iter()
        .map(|email| email.trim())
        .filter(|email| !email.is_empty())
        .map(str::to_owned)
        .collect())
}

fn required_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, HandlerError> {
    match value.get(field) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(HandlerError::MalformedRequest(format!(
            "{} must be a string",
            field
        ))),
        None => Err(HandlerError::MalformedRequest(format!(
            "{} is missing",
            field
        ))),
    }
}

fn optional_str(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(properties: Value) -> Value {
        json!({
            "RequestType": "Create",
            "ResponseURL": "https://callback.example.com/signed?sig=abc",
            "StackId": "arn:aws:cloudformation:us-east-1:123456789012:stack/demo/1",
            "RequestId": "req-1",
            "LogicalResourceId": "EmailSubscriptions",
            "ResourceProperties": properties,
        })
    }

    #[test]
    fn test_parses_list_form() {
        let event = event(json!({
            "TopicArn": "arn:topic",
            "EmailList": ["a@x.com", " ", "b@x.com"],
        }));
        let callback = CallbackTarget::from_event(&event).unwrap();

        let request = ReconciliationRequest::from_event(callback, &event).unwrap();

        assert_eq!(request.request_type, RequestType::Create);
        assert_eq!(request.topic_arn, "arn:topic");
        assert_eq!(request.desired_emails, vec!["a@x.com", "b@x.com"]);
        assert_eq!(request.callback.logical_resource_id, "EmailSubscriptions");
        assert_eq!(request.callback.request_id, "req-1");
    }

    #[test]
    fn test_parses_comma_separated_form() {
        let emails = parse_email_list(Some(&json!("a@x.com, b@x.com ,"))).unwrap();

        assert_eq!(emails, vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn test_list_and_string_forms_agree() {
        let from_string = parse_email_list(Some(&json!(" c@x.com,a@x.com,,c@x.com "))).unwrap();
        let from_list =
            parse_email_list(Some(&json!([" c@x.com", "a@x.com", "", "c@x.com "]))).unwrap();

        assert_eq!(from_string, from_list);
        assert_eq!(from_list, vec!["c@x.com", "a@x.com", "c@x.com"]);
    }

    #[test]
    fn test_missing_email_list_is_empty() {
        assert_eq!(parse_email_list(None).unwrap(), Vec::<String>::new());
        assert_eq!(
            parse_email_list(Some(&Value::Null)).unwrap(),
            Vec::<String>::new()
        );
    }

    #[test]
    fn test_list_elements_are_coerced_to_strings() {
        let emails = parse_email_list(Some(&json!(["a@x.com", null, 42, true]))).unwrap();

        assert_eq!(emails, vec!["a@x.com", "42", "true"]);
    }

    #[test]
    fn test_email_list_of_wrong_type_is_malformed() {
        let result = parse_email_list(Some(&json!({"a": "b"})));

        assert!(matches!(result, Err(HandlerError::MalformedRequest(_))));
    }

    #[test]
    fn test_unknown_request_type_is_kept() {
        let mut event = event(json!({"TopicArn": "arn:topic"}));
        event["RequestType"] = json!("Rollback");
        let callback = CallbackTarget::from_event(&event).unwrap();

        let request = ReconciliationRequest::from_event(callback, &event).unwrap();

        assert_eq!(
            request.request_type,
            RequestType::Unknown("Rollback".to_owned())
        );
        assert!(request.desired_emails.is_empty());
    }

    #[test]
    fn test_missing_required_fields_are_malformed() {
        let mut no_url = event(json!({"TopicArn": "arn:topic"}));
        no_url.as_object_mut().unwrap().remove("ResponseURL");
        assert!(matches!(
            CallbackTarget::from_event(&no_url),
            Err(HandlerError::MalformedRequest(_))
        ));

        let mut numeric_type = event(json!({"TopicArn": "arn:topic"}));
        numeric_type["RequestType"] = json!(1);
        let callback = CallbackTarget::from_event(&numeric_type).unwrap();
        assert!(matches!(
            ReconciliationRequest::from_event(callback, &numeric_type),
            Err(HandlerError::MalformedRequest(_))
        ));

        let no_topic = event(json!({"EmailList": ["a@x.com"]}));
        let callback = CallbackTarget::from_event(&no_topic).unwrap();
        assert!(matches!(
            ReconciliationRequest::from_event(callback, &no_topic),
            Err(HandlerError::MalformedRequest(_))
        ));

        let mut no_properties = event(json!({}));
        no_properties
            .as_object_mut()
            .unwrap()
            .remove("ResourceProperties");
        let callback = CallbackTarget::from_event(&no_properties).unwrap();
        assert!(matches!(
            ReconciliationRequest::from_event(callback, &no_properties),
            Err(HandlerError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_missing_correlation_ids_pass_through_empty() {
        let event = json!({"ResponseURL": "https://callback.example.com"});

        let callback = CallbackTarget::from_event(&event).unwrap();

        assert_eq!(callback.stack_id, "");
        assert_eq!(callback.request_id, "");
        assert_eq!(callback.logical_resource_id, "");
    }
}
