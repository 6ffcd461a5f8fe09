//! Operator notifications.
use anyhow::{bail, Context, Result};
use itertools::Itertools;
use reqwest::blocking::Client;
use serde_derive::*;
use tracing::{info, warn};

use crate::{config::EmailConfig, external::Notifier};

const POSTMARK_URL: &str = "https://api.postmarkapp.com/email";

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct Email {
    from: String,
    to: String,
    subject: String,
    html_body: String,
}

/// Mails through the Postmark HTTP API.
pub struct PostmarkNotifier {
    http: Client,
    config: EmailConfig,
}

impl PostmarkNotifier {
    pub fn new(config: EmailConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building Postmark client")?;
        Ok(Self { http, config })
    }

    fn send(&self, email: &Email) -> Result<()> {
        if email.to.is_empty() {
            warn!(subject = %email.subject, "no recipients configured, mail not sent");
            return Ok(());
        }
        let response = self
            .http
            .post(POSTMARK_URL)
            .header("Accept", "application/json")
            .header("X-Postmark-Server-Token", &self.config.server_token)
            .json(email)
            .send()
            .context("sending notification")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            bail!("Postmark returned {}: {}", status, body);
        }
        info!(to = %email.to, subject = %email.subject, "notification sent");
        Ok(())
    }
}

/// Recipients of a notification: the always list, plus the
/// district lists on success.
fn recipients(config: &EmailConfig, success: bool, districts: &[String]) -> String {
    let mut to: Vec<String> = config
        .always
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if success {
        for district in districts {
            match config.districts.get(&district.to_uppercase()) {
                Some(list) => to.extend(
                    list.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from),
                ),
                None => warn!(district = %district, "no recipients for district"),
            }
        }
    }
    to.into_iter().unique().join(", ")
}

fn completion_email(config: &EmailConfig, flight: &str, success: bool, report: &str, districts: &[String]) -> Email {
    let body = report.replace('\n', "<br>");
    let (subject, html_body) = if success {
        (
            "New Thermal Image data available",
            format!(
                "Automated email advising that a new dataset, {}, has arrived and has been \
                 successfully processed.<br>{}",
                flight, body
            ),
        )
    } else {
        (
            "New Thermal Image data FAILED to complete processing",
            format!(
                "Automated email advising that a new dataset, {}, has arrived but has not been \
                 successfully processed.<br>{}",
                flight, body
            ),
        )
    };
    Email {
        from: config.from.clone(),
        to: recipients(config, success, districts),
        subject: subject.to_string(),
        html_body,
    }
}

impl Notifier for PostmarkNotifier {
    fn started(&self, flight: &str) -> Result<()> {
        self.send(&Email {
            from: self.config.from.clone(),
            to: recipients(&self.config, false, &[]),
            subject: "New Thermal Image data received".to_string(),
            html_body: format!(
                "Automated email advising that a new dataset, {}, has arrived and processing has started.",
                flight
            ),
        })
    }

    fn notify(&self, flight: &str, success: bool, report: &str, districts: &[String]) -> Result<()> {
        self.send(&completion_email(&self.config, flight, success, report, districts))
    }
}

/// Logs notifications instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn started(&self, flight: &str) -> Result<()> {
        info!(flight, "processing started");
        Ok(())
    }

    fn notify(&self, flight: &str, success: bool, report: &str, districts: &[String]) -> Result<()> {
        if success {
            info!(flight, ?districts, report, "processing completed");
        } else {
            warn!(flight, ?districts, report, "processing failed");
        }
        Ok(())
    }
}
