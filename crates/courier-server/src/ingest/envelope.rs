//! Wire types for provider push notifications.
//!
//! The outer envelope uses PascalCase keys; the inner mail-event document
//! carried in `Message` uses camelCase.  Every field the pipeline does not
//! strictly need is defaulted so partial documents still parse.

use serde::Deserialize;

use crate::error::IngestError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub topic_arn: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub signature_version: String,
    #[serde(default)]
    pub signature: String,
    #[serde(rename = "SigningCertURL", default)]
    pub signing_cert_url: String,
    #[serde(rename = "SubscribeURL", default)]
    pub subscribe_url: Option<String>,
    #[serde(rename = "UnsubscribeURL", default)]
    pub unsubscribe_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeType {
    SubscriptionConfirmation,
    Notification,
    UnsubscribeConfirmation,
}

impl Envelope {
    pub fn parse(body: &[u8]) -> Result<Self, IngestError> {
        serde_json::from_slice(body).map_err(|e| IngestError::MalformedJson(e.to_string()))
    }

    pub fn envelope_type(&self) -> Result<EnvelopeType, IngestError> {
        match self.kind.as_str() {
            "SubscriptionConfirmation" => Ok(EnvelopeType::SubscriptionConfirmation),
            "Notification" => Ok(EnvelopeType::Notification),
            "UnsubscribeConfirmation" => Ok(EnvelopeType::UnsubscribeConfirmation),
            other => Err(IngestError::UnknownType(other.to_string())),
        }
    }
}

/// `notificationType` values the gateway acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Bounce,
    Complaint,
    Delivery,
    Send,
    Reject,
    Open,
    Click,
    DeliveryDelay,
    RenderingFailure,
}

impl NotificationKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Bounce" => Some(Self::Bounce),
            "Complaint" => Some(Self::Complaint),
            "Delivery" => Some(Self::Delivery),
            "Send" => Some(Self::Send),
            "Reject" => Some(Self::Reject),
            "Open" => Some(Self::Open),
            "Click" => Some(Self::Click),
            "DeliveryDelay" => Some(Self::DeliveryDelay),
            "Rendering Failure" | "RenderingFailure" => Some(Self::RenderingFailure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailNotification {
    pub notification_type: String,
    #[serde(default)]
    pub mail: Mail,
    pub bounce: Option<Bounce>,
    pub complaint: Option<Complaint>,
    pub delivery: Option<Delivery>,
    pub send: Option<serde_json::Value>,
    pub reject: Option<Reject>,
    pub open: Option<Open>,
    pub click: Option<Click>,
    pub delivery_delay: Option<DeliveryDelay>,
    #[serde(alias = "failure")]
    pub rendering_failure: Option<RenderingFailure>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Mail {
    pub timestamp: String,
    pub message_id: String,
    pub source: String,
    pub destination: Vec<String>,
    pub headers: Vec<MailHeader>,
    pub common_headers: CommonHeaders,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MailHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommonHeaders {
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub message_id: String,
    pub subject: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Bounce {
    pub bounce_type: String,
    pub bounce_sub_type: String,
    pub bounced_recipients: Vec<Recipient>,
    pub timestamp: String,
    pub feedback_id: String,
    #[serde(rename = "reportingMTA")]
    pub reporting_mta: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Recipient {
    pub email_address: String,
    pub action: String,
    pub status: String,
    pub diagnostic_code: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Complaint {
    pub complaint_sub_type: Option<String>,
    pub complained_recipients: Vec<Recipient>,
    pub timestamp: String,
    pub feedback_id: String,
    pub user_agent: String,
    pub complaint_feedback_type: String,
    pub arrival_date: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Delivery {
    pub timestamp: String,
    pub processing_time_millis: i64,
    pub recipients: Vec<String>,
    pub smtp_response: String,
    #[serde(rename = "reportingMTA")]
    pub reporting_mta: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Reject {
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Open {
    pub timestamp: String,
    pub user_agent: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Click {
    pub timestamp: String,
    pub user_agent: String,
    pub ip_address: String,
    pub link: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliveryDelay {
    pub delay_type: String,
    pub expiration_time: String,
    pub delayed_recipients: Vec<Recipient>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderingFailure {
    pub template_name: String,
    pub error_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_parses_provider_keys() {
        let body = br#"{
            "Type": "SubscriptionConfirmation",
            "MessageId": "m-1",
            "Token": "tok",
            "TopicArn": "arn:aws:sns:us-east-1:123:ses",
            "Message": "You have chosen to subscribe",
            "SubscribeURL": "https://sns.us-east-1.amazonaws.com/?Action=ConfirmSubscription",
            "Timestamp": "2024-03-01T00:00:00.000Z",
            "SignatureVersion": "1",
            "Signature": "c2ln",
            "SigningCertURL": "https://sns.us-east-1.amazonaws.com/cert.pem"
        }"#;
        let env = Envelope::parse(body).unwrap();
        assert_eq!(env.envelope_type().unwrap(), EnvelopeType::SubscriptionConfirmation);
        assert_eq!(env.token.as_deref(), Some("tok"));
        assert_eq!(env.signing_cert_url, "https://sns.us-east-1.amazonaws.com/cert.pem");
        assert!(env.subject.is_none());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let env = Envelope::parse(br#"{"Type":"Telegram"}"#).unwrap();
        assert!(matches!(env.envelope_type(), Err(IngestError::UnknownType(t)) if t == "Telegram"));
        assert!(matches!(Envelope::parse(b"{not json"), Err(IngestError::MalformedJson(_))));
    }

    #[test]
    fn test_bounce_document_parses() {
        let raw = r#"{
            "notificationType": "Bounce",
            "mail": {"messageId": "p-1", "source": "a@example.com", "destination": ["b@example.org"]},
            "bounce": {
                "bounceType": "Permanent",
                "bounceSubType": "General",
                "reportingMTA": "dsn; a.example",
                "bouncedRecipients": [{"emailAddress": "B@example.org", "diagnosticCode": "550 5.1.1"}]
            }
        }"#;
        let n: MailNotification = serde_json::from_str(raw).unwrap();
        assert_eq!(NotificationKind::parse(&n.notification_type), Some(NotificationKind::Bounce));
        let bounce = n.bounce.unwrap();
        assert_eq!(bounce.reporting_mta, "dsn; a.example");
        assert_eq!(bounce.bounced_recipients[0].diagnostic_code, "550 5.1.1");
    }

    #[test]
    fn test_rendering_failure_aliases() {
        assert_eq!(
            NotificationKind::parse("Rendering Failure"),
            Some(NotificationKind::RenderingFailure)
        );
        let raw = r#"{"notificationType":"Rendering Failure","mail":{"messageId":"p"},
                      "failure":{"templateName":"welcome","errorMessage":"missing var"}}"#;
        let n: MailNotification = serde_json::from_str(raw).unwrap();
        assert_eq!(n.rendering_failure.unwrap().template_name, "welcome");
    }
}
