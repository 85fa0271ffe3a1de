//! Deliverability safeguards run from scheduled jobs.
//!
//! Each sweep works org by org; a failure for one org is logged and the sweep
//! moves on.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use courier_net::{DnsblChecker, NetError};
use courier_shared::constants::{
    BOUNCE_ALERT_THRESHOLD, BOUNCE_MIN_VOLUME, BOUNCE_PAUSE_THRESHOLD, DIGEST_MAX_RETRIES,
    MONITOR_WINDOW_HOURS, WARMUP_DURATION_DAYS,
};
use courier_shared::jobs::{EmailSendPayload, JobKind};
use courier_shared::types::{AlertKind, AlertSeverity};
use courier_store::{BlacklistCheck, BounceStats, DigestTarget, NewAlert, RblResult, WarmingIp};

use crate::error::TaskError;
use crate::queue::{enqueue_typed, EnqueueOptions, JobQueue};
use crate::store::Store;

pub struct Monitor {
    store: Store,
    queue: Arc<dyn JobQueue>,
    dnsbl: DnsblChecker,
    app_domain: String,
    web_url: String,
}

impl Monitor {
    pub fn new(
        store: Store,
        queue: Arc<dyn JobQueue>,
        dnsbl: DnsblChecker,
        app_domain: impl Into<String>,
        web_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            queue,
            dnsbl,
            app_domain: app_domain.into(),
            web_url: web_url.into(),
        }
    }

    /// Check every actively warming IP against the DNSBL zones.
    /// Returns the number of IPs found listed.
    pub async fn run_blacklist_check(&self) -> Result<usize, TaskError> {
        let ips = self.store.with(|db| db.list_warming_ips()).await?;
        info!(count = ips.len(), "Running blacklist check");

        let mut listed_ips = 0;
        for target in ips {
            match self.check_ip(&target).await {
                Ok(true) => listed_ips += 1,
                Ok(false) => {}
                Err(TaskError::Net(NetError::UnsupportedAddress(ip))) => {
                    warn!(org_id = %target.org_id, ip = %ip, "Skipping non-IPv4 address");
                }
                Err(e) => {
                    warn!(org_id = %target.org_id, ip = %target.ip_address, error = %e, "Blacklist check failed");
                }
            }
        }
        Ok(listed_ips)
    }

    async fn check_ip(&self, target: &WarmingIp) -> Result<bool, TaskError> {
        let verdicts = self.dnsbl.check(&target.ip_address).await?;

        let results: Vec<RblResult> = verdicts
            .iter()
            .map(|v| RblResult {
                rbl: v.zone.name.to_string(),
                zone: v.zone.zone.to_string(),
                listed: v.listed(),
                reason: v.answer.map(|answer| format!("Listed (response: {answer})")),
                delist_url: v.zone.delist_url_for(&target.ip_address),
            })
            .collect();
        let check = BlacklistCheck {
            ip_address: target.ip_address.clone(),
            listed_count: results.iter().filter(|r| r.listed).count(),
            results,
            checked_at: Utc::now(),
        };

        self.store.with(|db| db.insert_blacklist_check(&check)).await?;

        if check.listed_count == 0 {
            debug!(ip = %check.ip_address, "IP not listed");
            return Ok(false);
        }

        let listed_on: Vec<&str> = check.listed().map(|r| r.rbl.as_str()).collect();
        let alert = NewAlert {
            org_id: target.org_id,
            kind: AlertKind::Blacklist,
            severity: AlertSeverity::Critical,
            title: format!("IP {} listed on {} blacklists", check.ip_address, check.listed_count),
            message: format!(
                "Your sending IP {} is listed on: {}. This will significantly impact deliverability.",
                check.ip_address,
                listed_on.join(", ")
            ),
            data: json!({
                "ipAddress": check.ip_address,
                "listedOn": listed_on,
                "totalRBLs": check.results.len(),
                "listedCount": check.listed_count,
            }),
        };
        self.store.with(|db| db.insert_alert(&alert, Utc::now())).await?;

        warn!(
            org_id = %target.org_id,
            ip = %check.ip_address,
            listed_count = check.listed_count,
            "Sending IP is blacklisted"
        );
        Ok(true)
    }

    /// Evaluate trailing-window bounce rates; alert and auto-pause.
    /// Returns the number of orgs that received an alert.
    pub async fn run_bounce_check(&self) -> Result<usize, TaskError> {
        let since = Utc::now() - Duration::hours(MONITOR_WINDOW_HOURS);
        let stats = self
            .store
            .with(|db| db.bounce_stats_since(since, BOUNCE_MIN_VOLUME))
            .await?;

        let mut alerted = 0;
        for org in stats {
            match self.evaluate_bounce_rate(&org).await {
                Ok(true) => alerted += 1,
                Ok(false) => {}
                Err(e) => warn!(org_id = %org.org_id, error = %e, "Bounce check failed for org"),
            }
        }
        Ok(alerted)
    }

    async fn evaluate_bounce_rate(&self, org: &BounceStats) -> Result<bool, TaskError> {
        let rate = org.rate();
        let now = Utc::now();

        if rate > BOUNCE_PAUSE_THRESHOLD {
            let reason = format!("Auto-paused due to high bounce rate ({rate:.2}%)");
            let (warmups, campaigns) = self
                .store
                .with(|db| -> courier_store::Result<(usize, usize)> {
                    let warmups = db.pause_org_warmups(org.org_id, &reason, now)?;
                    let campaigns = db.pause_sending_campaigns(org.org_id, now)?;
                    Ok((warmups, campaigns))
                })
                .await?;
            warn!(
                org_id = %org.org_id,
                bounce_rate = rate,
                warmups,
                campaigns,
                "Auto-paused sending due to high bounce rate"
            );
        }

        if rate <= BOUNCE_ALERT_THRESHOLD {
            return Ok(false);
        }

        let severity = if rate > BOUNCE_PAUSE_THRESHOLD {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };
        let alert = NewAlert {
            org_id: org.org_id,
            kind: AlertKind::BounceRate,
            severity,
            title: "High Bounce Rate Detected".to_string(),
            message: format!(
                "Your bounce rate is {:.2}% ({} bounces out of {} sent). This may affect deliverability.",
                rate, org.bounced, org.total
            ),
            data: json!({
                "bounceRate": rate,
                "totalSent": org.total,
                "bounced": org.bounced,
            }),
        };
        self.store.with(|db| db.insert_alert(&alert, now)).await?;
        info!(org_id = %org.org_id, bounce_rate = rate, severity = %severity, "Bounce rate alert created");
        Ok(true)
    }

    /// Enqueue one digest email per org owner with recent unread alerts.
    pub async fn run_alert_digest(&self) -> Result<usize, TaskError> {
        let since = Utc::now() - Duration::hours(MONITOR_WINDOW_HOURS);
        let targets = self.store.with(|db| db.list_digest_targets(since)).await?;

        let mut sent = 0;
        for target in targets {
            let payload = self.digest_email(&target);
            let opts = EnqueueOptions::default().max_attempts(DIGEST_MAX_RETRIES + 1);
            match enqueue_typed(self.queue.as_ref(), JobKind::EmailSend, &payload, opts).await {
                Ok(job_id) => {
                    debug!(org_id = %target.org_id, job_id = %job_id, "Queued alert digest");
                    sent += 1;
                }
                Err(e) => warn!(org_id = %target.org_id, error = %e, "Failed to queue alert digest"),
            }
        }
        info!(digests = sent, "Alert digest run complete");
        Ok(sent)
    }

    fn digest_email(&self, target: &DigestTarget) -> EmailSendPayload {
        let subject = if target.critical_count > 0 {
            format!("[URGENT] {} critical alerts require attention", target.critical_count)
        } else {
            format!("[Courier] You have {} unread alerts", target.alert_count)
        };

        let html_body = format!(
            "<h2>Alert Summary for {}</h2>\n\
             <p>You have <strong>{}</strong> unacknowledged alerts in the last 24 hours.</p>\n\
             <p>Critical alerts: <strong>{}</strong></p>\n\
             <p><a href=\"{}/dashboard/alerts\">View all alerts</a></p>\n",
            escape_html(&target.org_name),
            target.alert_count,
            target.critical_count,
            self.web_url
        );

        EmailSendPayload {
            org_id: target.org_id,
            from: format!("alerts@{}", self.app_domain),
            to: vec![target.owner_email.clone()],
            subject,
            html_body,
            text_body: None,
        }
    }

    /// Move every active warmup forward one day.
    pub async fn run_warmup_advance(&self) -> Result<(usize, usize), TaskError> {
        let (advanced, completed) = self
            .store
            .with(|db| db.advance_warmups(WARMUP_DURATION_DAYS, Utc::now()))
            .await?;
        info!(advanced, completed, "Warmup progress advanced");
        Ok((advanced, completed))
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
