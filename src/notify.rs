//! Alert email delivery.
//!
//! One email per cycle summarizes every [`AlertEvent`] that fired. Sends are
//! rate limited by `alert_cooldown_secs`, counted from the last successful
//! send, and a failed send is only logged; the next cycle tries again if the
//! condition persists.

use crate::config::SmtpConfig;
use crate::state::{format_unix, AlertEvent, Snapshot};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

const SMTP_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_LOG_LINES_IN_BODY: usize = 50;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("email build error: {0}")]
    Build(#[from] lettre::error::Error),
    #[cfg(test)]
    #[error("email rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NoAlerts,
    Disabled,
    Cooldown { remaining_secs: i64 },
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Sent { recipients: usize },
    Skipped(SkipReason),
    Failed(DispatchError),
}

enum MailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    #[cfg(test)]
    Stub(lettre::transport::stub::AsyncStubTransport),
}

impl MailTransport {
    async fn send(&self, message: Message) -> Result<(), DispatchError> {
        match self {
            MailTransport::Smtp(t) => {
                t.send(message).await?;
                Ok(())
            }
            #[cfg(test)]
            MailTransport::Stub(t) => t
                .send(message)
                .await
                .map_err(|e| DispatchError::Rejected(e.to_string())),
        }
    }
}

struct Mailer {
    settings: SmtpConfig,
    transport: MailTransport,
}

pub struct Dispatcher {
    mailer: Option<Mailer>,
    cooldown_secs: i64,
}

impl Dispatcher {
    pub fn new(settings: Option<SmtpConfig>, cooldown_secs: u64) -> Result<Self, DispatchError> {
        let mailer = match settings {
            Some(settings) => {
                let transport = MailTransport::Smtp(build_smtp_transport(&settings)?);
                Some(Mailer {
                    settings,
                    transport,
                })
            }
            None => None,
        };
        Ok(Self {
            mailer,
            cooldown_secs: i64::try_from(cooldown_secs).unwrap_or(i64::MAX),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_stub(
        settings: SmtpConfig,
        stub: lettre::transport::stub::AsyncStubTransport,
        cooldown_secs: i64,
    ) -> Self {
        Self {
            mailer: Some(Mailer {
                settings,
                transport: MailTransport::Stub(stub),
            }),
            cooldown_secs,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mailer.is_some()
    }

    pub async fn dispatch(
        &self,
        events: &[AlertEvent],
        snapshot: &Snapshot,
        last_sent_at: Option<i64>,
        now_unix: i64,
    ) -> DispatchOutcome {
        if events.is_empty() {
            return DispatchOutcome::Skipped(SkipReason::NoAlerts);
        }
        let Some(mailer) = &self.mailer else {
            return DispatchOutcome::Skipped(SkipReason::Disabled);
        };
        // A send time in the future means the clock stepped back; treat it as expired.
        if let Some(last) = last_sent_at.filter(|last| *last <= now_unix) {
            let elapsed = now_unix - last;
            if self.cooldown_secs > 0 && elapsed < self.cooldown_secs {
                let remaining_secs = self.cooldown_secs - elapsed;
                info!(remaining_secs, "alert email suppressed by cooldown");
                return DispatchOutcome::Skipped(SkipReason::Cooldown { remaining_secs });
            }
        }

        let message = match compose(events, snapshot, &mailer.settings) {
            Ok(m) => m,
            Err(err) => {
                error!(error = %err, "failed to build alert email");
                return DispatchOutcome::Failed(err);
            }
        };
        let recipients = mailer.settings.to.to_vec().len();
        match mailer.transport.send(message).await {
            Ok(()) => {
                info!(recipients, alerts = events.len(), "alert email sent");
                DispatchOutcome::Sent { recipients }
            }
            Err(err) => {
                error!(error = %err, "failed to send alert email");
                DispatchOutcome::Failed(err)
            }
        }
    }
}

fn build_smtp_transport(
    settings: &SmtpConfig,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, DispatchError> {
    let builder = if settings.use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.server)
    };
    let mut builder = builder
        .port(settings.effective_port())
        .timeout(Some(SMTP_TIMEOUT));

    if let Some(user) = settings.resolve_username() {
        let pass = settings.resolve_password().unwrap_or_default();
        builder = builder.credentials(Credentials::new(user, pass));
    }
    Ok(builder.build())
}

pub fn compose(
    events: &[AlertEvent],
    snapshot: &Snapshot,
    settings: &SmtpConfig,
) -> Result<Message, DispatchError> {
    let mut builder = Message::builder()
        .from(settings.from.parse::<Mailbox>()?)
        .subject(settings.subject.clone())
        .header(ContentType::TEXT_PLAIN);
    for addr in settings.to.to_vec() {
        builder = builder.to(addr.parse::<Mailbox>()?);
    }
    Ok(builder.body(render_body(events, snapshot))?)
}

pub fn render_body(events: &[AlertEvent], snapshot: &Snapshot) -> String {
    let matched: Vec<&str> = events
        .iter()
        .filter_map(|e| e.log_match.as_ref())
        .map(|l| l.text.as_str())
        .take(MAX_LOG_LINES_IN_BODY)
        .collect();

    let mut body = vec![
        format!("Timestamp: {}", format_unix(snapshot.timestamp)),
        snapshot.humanize(),
        "Alerts:".to_string(),
    ];
    body.extend(events.iter().map(|e| format!("[{}] {}", e.kind, e.message)));
    body.push(String::new());
    body.push("Recent matching log lines:".to_string());
    body.extend(matched.into_iter().map(str::to_string));
    body.join("\n")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Recipients;
    use crate::state::{AlertKind, LogLine};
    use lettre::transport::stub::AsyncStubTransport;

    pub(crate) fn smtp_settings() -> SmtpConfig {
        SmtpConfig {
            server: "smtp.example.com".to_string(),
            port: None,
            use_tls: true,
            username: None,
            password: None,
            username_env: "HOSTWATCH_TEST_NO_USER".to_string(),
            password_env: "HOSTWATCH_TEST_NO_PASS".to_string(),
            from: "monitor@example.com".to_string(),
            to: Recipients::Many(vec![
                "ops@example.com".to_string(),
                "oncall@example.com".to_string(),
            ]),
            subject: "ALERT: Linux Monitor".to_string(),
        }
    }

    fn stub_dispatcher(stub: AsyncStubTransport, cooldown_secs: i64) -> Dispatcher {
        Dispatcher::with_stub(smtp_settings(), stub, cooldown_secs)
    }

    fn events() -> Vec<AlertEvent> {
        vec![
            AlertEvent {
                kind: AlertKind::Cpu,
                message: "CPU usage high: 95.0% (threshold 90.0%)".to_string(),
                timestamp: 1_000,
                log_match: None,
            },
            AlertEvent {
                kind: AlertKind::LogPattern,
                message: "/var/log/syslog matched 'error': disk error".to_string(),
                timestamp: 1_000,
                log_match: Some(LogLine {
                    file: "/var/log/syslog".to_string(),
                    text: "disk error".to_string(),
                }),
            },
        ]
    }

    #[test]
    fn body_lists_alerts_and_matching_lines() {
        let body = render_body(&events(), &Snapshot::empty(1_000));
        assert!(body.starts_with("Timestamp: 1970-01-01T00:16:40Z"));
        assert!(body.contains("[cpu] CPU usage high"));
        assert!(body.ends_with("Recent matching log lines:\ndisk error"));
    }

    #[test]
    fn body_caps_matching_lines() {
        let events: Vec<AlertEvent> = (0..60)
            .map(|i| AlertEvent {
                kind: AlertKind::LogPattern,
                message: format!("app.log matched 'error': error {i}"),
                timestamp: 1_000,
                log_match: Some(LogLine {
                    file: "app.log".to_string(),
                    text: format!("error {i}"),
                }),
            })
            .collect();
        let body = render_body(&events, &Snapshot::empty(1_000));
        let (_, lines) = body.split_once("Recent matching log lines:\n").unwrap();
        let lines: Vec<&str> = lines.lines().collect();
        assert_eq!(lines.len(), MAX_LOG_LINES_IN_BODY);
        assert_eq!(lines[0], "error 0");
        assert_eq!(lines[49], "error 49");
    }

    #[test]
    fn compose_addresses_every_recipient() {
        let message = compose(&events(), &Snapshot::empty(1_000), &smtp_settings()).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();
        assert!(formatted.contains("ops@example.com"));
        assert!(formatted.contains("oncall@example.com"));
        assert!(formatted.contains("Subject: ALERT: Linux Monitor"));
    }

    #[tokio::test]
    async fn sends_one_email_for_all_events() {
        let stub = AsyncStubTransport::new_ok();
        let dispatcher = stub_dispatcher(stub.clone(), 300);
        let outcome = dispatcher
            .dispatch(&events(), &Snapshot::empty(1_000), None, 1_000)
            .await;
        assert!(matches!(outcome, DispatchOutcome::Sent { recipients: 2 }));
        assert_eq!(stub.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_sends() {
        let stub = AsyncStubTransport::new_ok();
        let dispatcher = stub_dispatcher(stub.clone(), 300);
        let outcome = dispatcher
            .dispatch(&events(), &Snapshot::empty(1_100), Some(1_000), 1_100)
            .await;
        match outcome {
            DispatchOutcome::Skipped(SkipReason::Cooldown { remaining_secs }) => {
                assert_eq!(remaining_secs, 200)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(stub.messages().await.is_empty());

        let outcome = dispatcher
            .dispatch(&events(), &Snapshot::empty(1_300), Some(1_000), 1_300)
            .await;
        assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
    }

    #[tokio::test]
    async fn send_time_in_the_future_does_not_block() {
        let stub = AsyncStubTransport::new_ok();
        let dispatcher = stub_dispatcher(stub.clone(), 300);
        let outcome = dispatcher
            .dispatch(&events(), &Snapshot::empty(1_000), Some(87_400), 1_000)
            .await;
        assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
        assert_eq!(stub.messages().await.len(), 1);
    }

    #[test]
    fn huge_cooldown_does_not_wrap() {
        let dispatcher = Dispatcher::new(None, u64::MAX).unwrap();
        assert_eq!(dispatcher.cooldown_secs, i64::MAX);
    }

    #[tokio::test]
    async fn transport_failure_is_reported_not_retried() {
        let stub = AsyncStubTransport::new_error();
        let dispatcher = stub_dispatcher(stub.clone(), 0);
        let outcome = dispatcher
            .dispatch(&events(), &Snapshot::empty(1_000), None, 1_000)
            .await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed(DispatchError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn disabled_and_empty_cases_skip() {
        let dispatcher = Dispatcher::new(None, 300).unwrap();
        assert!(!dispatcher.is_enabled());
        let outcome = dispatcher
            .dispatch(&events(), &Snapshot::empty(1), None, 1)
            .await;
        assert!(matches!(outcome, DispatchOutcome::Skipped(SkipReason::Disabled)));

        let outcome = dispatcher.dispatch(&[], &Snapshot::empty(1), None, 1).await;
        assert!(matches!(outcome, DispatchOutcome::Skipped(SkipReason::NoAlerts)));
    }
}
