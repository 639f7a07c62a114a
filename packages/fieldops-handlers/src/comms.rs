//! `comms.*` handlers: outbound messaging. Unlike the other domains, this
//! one wraps a real external integration, so it's the one handler in this
//! crate that needs a constructed dependency rather than reaching straight
//! for `ctx.db` — mirroring how `SeesawJobQueueAdapter` wraps a `PgPool`
//! instead of being a bare function.

use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use fieldops_core::Outcome;
use fieldops_worker::{Handler, HandlerContext, HandlerRegistry};
use serde_json::{json, Value};
use tracing::{info, warn};
use twilio::{TwilioOptions, TwilioService};

pub fn register(registry: &mut HandlerRegistry, handler: SmsHandler) {
    registry.register("comms", "send_sms", Arc::new(handler));
}

/// Sends an SMS via Twilio, or reports `not_configured` when Twilio
/// credentials are absent from the environment. This is the one handler in
/// the catalog exercised by the not-configured scenario.
pub struct SmsHandler {
    twilio: Option<TwilioService>,
}

impl SmsHandler {
    pub fn new(twilio: Option<TwilioService>) -> Self {
        Self { twilio }
    }

    /// Whether this handler can actually send, for `GET /health`'s
    /// configured-vs-missing report (§6).
    pub fn is_configured(&self) -> bool {
        self.twilio.is_some()
    }

    /// Construct from `TWILIO_ACCOUNT_SID` / `TWILIO_AUTH_TOKEN` /
    /// `TWILIO_SERVICE_SID` / `TWILIO_FROM_NUMBER`. Any of them missing
    /// leaves this handler in the not-configured state rather than failing
    /// to start — the daemon still boots, the handler just reports it at
    /// call time (§7, `integration_not_configured`).
    pub fn from_env() -> Self {
        let creds = (
            env::var("TWILIO_ACCOUNT_SID"),
            env::var("TWILIO_AUTH_TOKEN"),
            env::var("TWILIO_SERVICE_SID"),
            env::var("TWILIO_FROM_NUMBER"),
        );
        let twilio = match creds {
            (Ok(account_sid), Ok(auth_token), Ok(service_id), Ok(from_number)) => {
                Some(TwilioService::new(TwilioOptions {
                    account_sid,
                    auth_token,
                    service_id,
                    from_number: Some(from_number),
                }))
            }
            _ => {
                warn!("Twilio credentials not fully configured, comms.send_sms will report not_configured");
                None
            }
        };
        Self::new(twilio)
    }
}

#[async_trait]
impl Handler for SmsHandler {
    async fn invoke(&self, input: Value, ctx: HandlerContext) -> Outcome {
        let Some(twilio) = &self.twilio else {
            return Outcome::NotConfigured {
                reason: "Twilio credentials are not configured for this worker".into(),
                required_env: vec![
                    "TWILIO_ACCOUNT_SID".into(),
                    "TWILIO_AUTH_TOKEN".into(),
                    "TWILIO_SERVICE_SID".into(),
                    "TWILIO_FROM_NUMBER".into(),
                ],
                next_steps: vec![
                    "Set the Twilio environment variables on the worker and restart it".into(),
                ],
            };
        };

        let Some(to) = input.get("to").and_then(Value::as_str) else {
            return Outcome::failed("validation_error", "missing required field 'to'");
        };
        let Some(message) = input.get("message").and_then(Value::as_str) else {
            return Outcome::failed("validation_error", "missing required field 'message'");
        };

        match twilio.send_sms(to, message).await {
            Ok(resp) => {
                info!(call_id = %ctx.call_id, message_sid = %resp.sid, "sent sms");
                Outcome::succeeded(json!({ "message_sid": resp.sid, "status": resp.status }))
            }
            Err(err) => Outcome::failed("integration_api_error", err),
        }
    }
}
