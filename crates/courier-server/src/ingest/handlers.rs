//! Per-notification-type effects on the store.
//!
//! Each handler runs synchronously against the database under one lock.
//! A status update failure is an error; a failure to append the delivery
//! event or a suppression row is logged and does not undo the update.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use courier_shared::types::{BounceKind, DeliveryEventKind, SuppressionReason, WebhookEvent};
use courier_store::{Database, MessageRef, NewDeliveryEvent, Result};

use super::envelope::{
    Bounce, Click, Complaint, Delivery, DeliveryDelay, MailNotification, NotificationKind, Open,
    Reject, RenderingFailure,
};

/// What subscribers hear about an applied notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub event: WebhookEvent,
    pub data: Value,
}

/// Apply a notification to the resolved message.  `Ok(None)` means the
/// type-specific section was missing and nothing changed.
pub fn apply(
    db: &Database,
    msg: &MessageRef,
    notification: &MailNotification,
    kind: NotificationKind,
    now: DateTime<Utc>,
) -> Result<Option<Effect>> {
    let effect = match kind {
        NotificationKind::Bounce => notification
            .bounce
            .as_ref()
            .map(|b| handle_bounce(db, msg, b, now))
            .transpose()?,
        NotificationKind::Complaint => notification
            .complaint
            .as_ref()
            .map(|c| handle_complaint(db, msg, c, now))
            .transpose()?,
        NotificationKind::Delivery => notification
            .delivery
            .as_ref()
            .map(|d| handle_delivery(db, msg, d, now))
            .transpose()?,
        NotificationKind::Send => Some(handle_send(db, msg, now)?),
        NotificationKind::Reject => notification
            .reject
            .as_ref()
            .map(|r| handle_reject(db, msg, r, now))
            .transpose()?,
        NotificationKind::Open => notification
            .open
            .as_ref()
            .map(|o| handle_open(db, msg, o, now))
            .transpose()?,
        NotificationKind::Click => notification
            .click
            .as_ref()
            .map(|c| handle_click(db, msg, c, now))
            .transpose()?,
        NotificationKind::DeliveryDelay => notification
            .delivery_delay
            .as_ref()
            .map(|d| handle_delay(db, msg, d, now)),
        NotificationKind::RenderingFailure => notification
            .rendering_failure
            .as_ref()
            .map(|f| handle_rendering_failure(db, msg, f, now))
            .transpose()?,
    };

    Ok(effect.map(|mut effect| {
        merge_mail_fields(&mut effect.data, notification);
        effect
    }))
}

fn record_event(db: &Database, msg: &MessageRef, event: NewDeliveryEvent) {
    if let Err(e) = db.insert_delivery_event(msg, &event) {
        warn!(message_id = %msg.id, kind = %event.kind, error = %e, "Failed to record delivery event");
    }
}

fn handle_bounce(db: &Database, msg: &MessageRef, bounce: &Bounce, now: DateTime<Utc>) -> Result<Effect> {
    let kind = BounceKind::from_provider(&bounce.bounce_type);
    db.mark_bounced(msg, kind, &bounce.bounce_sub_type, now)?;

    record_event(
        db,
        msg,
        NewDeliveryEvent::new(
            DeliveryEventKind::Bounced,
            format!("Bounce: {}/{}", bounce.bounce_type, bounce.bounce_sub_type),
            now,
        ),
    );

    if kind == BounceKind::Hard {
        for rcpt in &bounce.bounced_recipients {
            match db.suppress_address(
                msg.org_id,
                &rcpt.email_address,
                SuppressionReason::HardBounce,
                "bounce",
                Some(&rcpt.diagnostic_code),
                now,
            ) {
                Ok(true) => info!(org_id = %msg.org_id, email = %rcpt.email_address, "Address suppressed after hard bounce"),
                Ok(false) => {}
                Err(e) => warn!(email = %rcpt.email_address, error = %e, "Failed to suppress address"),
            }
            if let Err(e) = db.mark_contact_bounced(msg.org_id, &rcpt.email_address, now) {
                warn!(email = %rcpt.email_address, error = %e, "Failed to mark contact bounced");
            }
        }
    }

    Ok(Effect {
        event: WebhookEvent::EmailBounced,
        data: json!({
            "bounceType": kind.as_str(),
            "bounceSubType": bounce.bounce_sub_type,
            "recipients": bounce
                .bounced_recipients
                .iter()
                .map(|r| r.email_address.as_str())
                .collect::<Vec<_>>(),
        }),
    })
}

fn handle_complaint(
    db: &Database,
    msg: &MessageRef,
    complaint: &Complaint,
    now: DateTime<Utc>,
) -> Result<Effect> {
    db.mark_complained(msg, now)?;

    record_event(
        db,
        msg,
        NewDeliveryEvent::new(
            DeliveryEventKind::Complained,
            format!("Complaint: {}", complaint.complaint_feedback_type),
            now,
        ),
    );

    for rcpt in &complaint.complained_recipients {
        if let Err(e) = db.suppress_address(
            msg.org_id,
            &rcpt.email_address,
            SuppressionReason::Complaint,
            "complaint",
            Some(&complaint.complaint_feedback_type),
            now,
        ) {
            warn!(email = %rcpt.email_address, error = %e, "Failed to suppress address");
        }
    }

    Ok(Effect {
        event: WebhookEvent::EmailComplained,
        data: json!({
            "feedbackType": complaint.complaint_feedback_type,
            "recipients": complaint
                .complained_recipients
                .iter()
                .map(|r| r.email_address.as_str())
                .collect::<Vec<_>>(),
        }),
    })
}

fn handle_delivery(
    db: &Database,
    msg: &MessageRef,
    delivery: &Delivery,
    now: DateTime<Utc>,
) -> Result<Effect> {
    db.mark_delivered(msg, now)?;

    record_event(
        db,
        msg,
        NewDeliveryEvent::new(
            DeliveryEventKind::Delivered,
            format!(
                "Delivered to {} in {}ms",
                delivery.recipients.join(", "),
                delivery.processing_time_millis
            ),
            now,
        ),
    );

    Ok(Effect {
        event: WebhookEvent::EmailDelivered,
        data: json!({
            "recipients": delivery.recipients,
            "processingTimeMillis": delivery.processing_time_millis,
            "smtpResponse": delivery.smtp_response,
        }),
    })
}

fn handle_send(db: &Database, msg: &MessageRef, now: DateTime<Utc>) -> Result<Effect> {
    db.mark_sent(msg, now)?;
    Ok(Effect {
        event: WebhookEvent::EmailSent,
        data: json!({}),
    })
}

fn handle_reject(db: &Database, msg: &MessageRef, reject: &Reject, now: DateTime<Utc>) -> Result<Effect> {
    db.mark_failed(msg, now)?;
    record_event(
        db,
        msg,
        NewDeliveryEvent::new(DeliveryEventKind::Rejected, reject.reason.clone(), now),
    );
    Ok(Effect {
        event: WebhookEvent::EmailRejected,
        data: json!({ "reason": reject.reason }),
    })
}

fn handle_open(db: &Database, msg: &MessageRef, open: &Open, now: DateTime<Utc>) -> Result<Effect> {
    db.record_first_open(msg, now)?;
    record_event(
        db,
        msg,
        NewDeliveryEvent::new(DeliveryEventKind::Opened, "Email opened", now)
            .with_client(Some(open.ip_address.clone()), Some(open.user_agent.clone())),
    );
    Ok(Effect {
        event: WebhookEvent::EmailOpened,
        data: json!({
            "ipAddress": open.ip_address,
            "userAgent": open.user_agent,
        }),
    })
}

fn handle_click(db: &Database, msg: &MessageRef, click: &Click, now: DateTime<Utc>) -> Result<Effect> {
    db.record_first_click(msg, now)?;
    record_event(
        db,
        msg,
        NewDeliveryEvent::new(
            DeliveryEventKind::Clicked,
            format!("Link clicked: {}", click.link),
            now,
        )
        .with_client(Some(click.ip_address.clone()), Some(click.user_agent.clone())),
    );
    Ok(Effect {
        event: WebhookEvent::EmailClicked,
        data: json!({
            "link": click.link,
            "ipAddress": click.ip_address,
            "userAgent": click.user_agent,
        }),
    })
}

fn handle_delay(db: &Database, msg: &MessageRef, delay: &DeliveryDelay, now: DateTime<Utc>) -> Effect {
    record_event(
        db,
        msg,
        NewDeliveryEvent::new(
            DeliveryEventKind::Deferred,
            format!(
                "Delivery delayed: {} (expires: {})",
                delay.delay_type, delay.expiration_time
            ),
            now,
        ),
    );
    Effect {
        event: WebhookEvent::EmailDelayed,
        data: json!({
            "delayType": delay.delay_type,
            "expirationTime": delay.expiration_time,
        }),
    }
}

fn handle_rendering_failure(
    db: &Database,
    msg: &MessageRef,
    failure: &RenderingFailure,
    now: DateTime<Utc>,
) -> Result<Effect> {
    db.mark_failed(msg, now)?;
    record_event(
        db,
        msg,
        NewDeliveryEvent::new(
            DeliveryEventKind::RenderingFailed,
            format!("{}: {}", failure.template_name, failure.error_message),
            now,
        ),
    );
    Ok(Effect {
        event: WebhookEvent::EmailFailed,
        data: json!({
            "templateName": failure.template_name,
            "errorMessage": failure.error_message,
        }),
    })
}

fn merge_mail_fields(data: &mut Value, notification: &MailNotification) {
    if let Value::Object(map) = data {
        let mail = &notification.mail;
        map.insert("from".into(), json!(mail.source));
        map.insert("to".into(), json!(mail.destination));
        map.insert("subject".into(), json!(mail.common_headers.subject));
        map.insert("providerMessageId".into(), json!(mail.message_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_shared::types::MessageStatus;
    use courier_store::{MessageTable, NewMessage};
    use uuid::Uuid;

    fn seed(db: &Database, status: MessageStatus) -> MessageRef {
        let org_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        db.insert_message(
            MessageTable::Transactional,
            &NewMessage {
                id,
                org_id,
                provider_message_id: Some(format!("p-{id}")),
                from_address: "a@example.com".into(),
                to_addresses: vec!["b@example.org".into()],
                subject: "hi".into(),
                status,
                created_at: Utc::now(),
            },
        )
        .unwrap();
        MessageRef {
            table: MessageTable::Transactional,
            id,
            org_id,
        }
    }

    fn notification(raw: &str) -> MailNotification {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_soft_bounce_does_not_suppress() {
        let db = Database::open_in_memory().unwrap();
        let msg = seed(&db, MessageStatus::Sent);
        let n = notification(
            r#"{"notificationType":"Bounce","mail":{"messageId":"p-1"},
                "bounce":{"bounceType":"Transient","bounceSubType":"MailboxFull",
                          "bouncedRecipients":[{"emailAddress":"b@example.org"}]}}"#,
        );

        let effect = apply(&db, &msg, &n, NotificationKind::Bounce, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(effect.event, WebhookEvent::EmailBounced);
        assert_eq!(effect.data["bounceType"], "soft");
        assert_eq!(effect.data["providerMessageId"], "p-1");

        let message = db.get_message(msg.table, msg.id).unwrap();
        assert_eq!(message.status, MessageStatus::Bounced);
        assert_eq!(message.bounce_type, Some(BounceKind::Soft));
        assert_eq!(message.bounce_reason.as_deref(), Some("MailboxFull"));
        assert!(!db.is_suppressed(msg.org_id, "b@example.org").unwrap());

        let events = db.list_delivery_events(&msg).unwrap();
        assert_eq!(events[0].details, "Bounce: Transient/MailboxFull");
    }

    #[test]
    fn test_complaint_suppresses_with_feedback_type() {
        let db = Database::open_in_memory().unwrap();
        let msg = seed(&db, MessageStatus::Delivered);
        let n = notification(
            r#"{"notificationType":"Complaint","mail":{"messageId":"p-1"},
                "complaint":{"complaintFeedbackType":"abuse",
                             "complainedRecipients":[{"emailAddress":"B@Example.org"}]}}"#,
        );
        apply(&db, &msg, &n, NotificationKind::Complaint, Utc::now()).unwrap();

        let entries = db.list_suppressions(msg.org_id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].email, "b@example.org");
        assert_eq!(entries[0].reason, SuppressionReason::Complaint);
        assert_eq!(entries[0].source, "complaint");
        assert_eq!(entries[0].detail.as_deref(), Some("abuse"));
        assert_eq!(
            db.get_message(msg.table, msg.id).unwrap().status,
            MessageStatus::Complained
        );
    }

    #[test]
    fn test_send_does_not_regress_delivered() {
        let db = Database::open_in_memory().unwrap();
        let msg = seed(&db, MessageStatus::Delivered);
        let n = notification(r#"{"notificationType":"Send","mail":{"messageId":"p-1"},"send":{}}"#);
        apply(&db, &msg, &n, NotificationKind::Send, Utc::now()).unwrap();
        assert_eq!(
            db.get_message(msg.table, msg.id).unwrap().status,
            MessageStatus::Delivered
        );

        let queued = seed(&db, MessageStatus::Queued);
        apply(&db, &queued, &n, NotificationKind::Send, Utc::now()).unwrap();
        let message = db.get_message(queued.table, queued.id).unwrap();
        assert_eq!(message.status, MessageStatus::Sent);
        assert!(message.sent_at.is_some());
    }

    #[test]
    fn test_click_records_link_and_client() {
        let db = Database::open_in_memory().unwrap();
        let msg = seed(&db, MessageStatus::Delivered);
        let n = notification(
            r#"{"notificationType":"Click","mail":{"messageId":"p-1"},
                "click":{"link":"https://example.com/x","ipAddress":"203.0.113.5","userAgent":"UA"}}"#,
        );
        for _ in 0..2 {
            apply(&db, &msg, &n, NotificationKind::Click, Utc::now()).unwrap();
        }
        let first_click = db.get_message(msg.table, msg.id).unwrap().clicked_at;

        let events = db.list_delivery_events(&msg).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].details, "Link clicked: https://example.com/x");
        assert_eq!(events[0].ip_address.as_deref(), Some("203.0.113.5"));
        assert_eq!(events[0].user_agent.as_deref(), Some("UA"));
        assert!(first_click.is_some());
    }

    #[test]
    fn test_delay_and_rendering_failure() {
        let db = Database::open_in_memory().unwrap();
        let msg = seed(&db, MessageStatus::Sent);

        let delay = notification(
            r#"{"notificationType":"DeliveryDelay","mail":{"messageId":"p-1"},
                "deliveryDelay":{"delayType":"MailboxFull","expirationTime":"2024-03-02T00:00:00Z"}}"#,
        );
        let effect = apply(&db, &msg, &delay, NotificationKind::DeliveryDelay, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(effect.event, WebhookEvent::EmailDelayed);
        assert_eq!(db.get_message(msg.table, msg.id).unwrap().status, MessageStatus::Sent);

        let failure = notification(
            r#"{"notificationType":"Rendering Failure","mail":{"messageId":"p-1"},
                "renderingFailure":{"templateName":"welcome","errorMessage":"missing var"}}"#,
        );
        apply(&db, &msg, &failure, NotificationKind::RenderingFailure, Utc::now()).unwrap();
        assert_eq!(db.get_message(msg.table, msg.id).unwrap().status, MessageStatus::Failed);

        let details: Vec<String> = db
            .list_delivery_events(&msg)
            .unwrap()
            .into_iter()
            .map(|e| e.details)
            .collect();
        assert_eq!(
            details,
            vec![
                "Delivery delayed: MailboxFull (expires: 2024-03-02T00:00:00Z)".to_string(),
                "welcome: missing var".to_string(),
            ]
        );
    }

    #[test]
    fn test_delivery_marks_delivered_with_detail() {
        let db = Database::open_in_memory().unwrap();
        let msg = seed(&db, MessageStatus::Sent);
        let n = notification(
            r#"{"notificationType":"Delivery","mail":{"messageId":"p-1"},
                "delivery":{"recipients":["b@example.org","c@example.org"],
                            "processingTimeMillis":1234,"smtpResponse":"250 ok"}}"#,
        );

        let effect = apply(&db, &msg, &n, NotificationKind::Delivery, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(effect.event, WebhookEvent::EmailDelivered);
        assert_eq!(effect.data["processingTimeMillis"], 1234);
        assert_eq!(effect.data["smtpResponse"], "250 ok");

        let message = db.get_message(msg.table, msg.id).unwrap();
        assert_eq!(message.status, MessageStatus::Delivered);
        assert!(message.delivered_at.is_some());

        let events = db.list_delivery_events(&msg).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DeliveryEventKind::Delivered);
        assert_eq!(events[0].details, "Delivered to b@example.org, c@example.org in 1234ms");
    }

    #[test]
    fn test_reject_fails_message_with_reason() {
        let db = Database::open_in_memory().unwrap();
        let msg = seed(&db, MessageStatus::Sending);
        let n = notification(
            r#"{"notificationType":"Reject","mail":{"messageId":"p-1"},
                "reject":{"reason":"Bad content"}}"#,
        );

        let effect = apply(&db, &msg, &n, NotificationKind::Reject, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(effect.event, WebhookEvent::EmailRejected);
        assert_eq!(effect.data["reason"], "Bad content");

        assert_eq!(db.get_message(msg.table, msg.id).unwrap().status, MessageStatus::Failed);
        let events = db.list_delivery_events(&msg).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DeliveryEventKind::Rejected);
        assert_eq!(events[0].details, "Bad content");
        assert!(!db.is_suppressed(msg.org_id, "b@example.org").unwrap());
    }

    #[test]
    fn test_missing_section_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        let msg = seed(&db, MessageStatus::Sent);
        let n = notification(r#"{"notificationType":"Bounce","mail":{"messageId":"p-1"}}"#);
        assert!(apply(&db, &msg, &n, NotificationKind::Bounce, Utc::now())
            .unwrap()
            .is_none());
        assert_eq!(db.get_message(msg.table, msg.id).unwrap().status, MessageStatus::Sent);
    }
}
