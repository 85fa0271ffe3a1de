use serde::{Deserialize, Serialize};

use crate::error::CourierError;

/// Declares a fieldless enum stored as a lowercase string in the database
/// and on the wire.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = CourierError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(CourierError::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Lifecycle status of an outbound message.
    pub enum MessageStatus {
        Queued => "queued",
        Sending => "sending",
        Sent => "sent",
        Delivered => "delivered",
        Opened => "opened",
        Clicked => "clicked",
        Bounced => "bounced",
        Complained => "complained",
        Failed => "failed",
    }
}

impl MessageStatus {
    /// Bounced, complained and failed messages expect no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Bounced | MessageStatus::Complained | MessageStatus::Failed
        )
    }
}

string_enum! {
    pub enum BounceKind {
        Hard => "hard",
        Soft => "soft",
    }
}

impl BounceKind {
    /// The provider reports `Permanent` for hard bounces; `Transient` and
    /// `Undetermined` are both treated as soft.
    pub fn from_provider(bounce_type: &str) -> Self {
        if bounce_type == "Permanent" {
            BounceKind::Hard
        } else {
            BounceKind::Soft
        }
    }
}

string_enum! {
    pub enum SuppressionReason {
        HardBounce => "hard_bounce",
        Complaint => "complaint",
        Unsubscribe => "unsubscribe",
    }
}

string_enum! {
    /// Kind of an append-only delivery event row.
    pub enum DeliveryEventKind {
        Bounced => "bounced",
        Complained => "complained",
        Delivered => "delivered",
        Rejected => "rejected",
        Opened => "opened",
        Clicked => "clicked",
        Deferred => "deferred",
        RenderingFailed => "rendering_failed",
    }
}

string_enum! {
    /// Event names subscribers register for on a webhook.
    pub enum WebhookEvent {
        EmailBounced => "email.bounced",
        EmailComplained => "email.complained",
        EmailDelivered => "email.delivered",
        EmailSent => "email.sent",
        EmailRejected => "email.rejected",
        EmailOpened => "email.opened",
        EmailClicked => "email.clicked",
        EmailDelayed => "email.delayed",
        EmailFailed => "email.failed",
    }
}

string_enum! {
    /// Outcome of a single webhook delivery attempt.
    pub enum CallOutcome {
        Success => "success",
        Failed => "failed",
        Error => "error",
    }
}

string_enum! {
    pub enum WarmupStatus {
        Active => "active",
        Paused => "paused",
        Completed => "completed",
    }
}

string_enum! {
    pub enum AlertSeverity {
        Warning => "warning",
        Critical => "critical",
    }
}

string_enum! {
    pub enum AlertKind {
        Blacklist => "blacklist",
        BounceRate => "bounce_rate",
    }
}

string_enum! {
    pub enum CampaignStatus {
        Draft => "draft",
        Scheduled => "scheduled",
        Sending => "sending",
        Paused => "paused",
        Sent => "sent",
    }
}

/// A DNS-based blacklist zone together with its human delist page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsblZone {
    pub name: &'static str,
    pub zone: &'static str,
    /// The IP address is appended to this URL to build the delist link.
    pub delist_url: &'static str,
}

impl DnsblZone {
    pub fn delist_url_for(&self, ip: &str) -> String {
        format!("{}{}", self.delist_url, ip)
    }
}
