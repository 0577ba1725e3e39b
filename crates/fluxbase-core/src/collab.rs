//! Contracts for out-of-core collaborators.
//!
//! The core calls these through narrow traits and never depends on a
//! concrete implementation; the shipped defaults are enough for local
//! development.

use crate::error::Error;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;

/// An outbound email. Delivery must be idempotent per
/// `(to, template, token)` so retried flows never send duplicates.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_template: String,
    pub template_vars: Value,
    /// The one-time token embedded in the message, used as the
    /// idempotency key together with recipient and template.
    pub token: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), Error>;
}

/// Development sender: logs the message instead of delivering it.
/// Honors the idempotency contract so repeated requests for the same
/// token log once.
#[derive(Default)]
pub struct LogEmailSender {
    sent: Mutex<HashSet<(String, String, String)>>,
}

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<(), Error> {
        let key = (
            message.to.clone(),
            message.body_template.clone(),
            message.token.clone(),
        );
        let mut sent = self.sent.lock().expect("email sender lock poisoned");
        if !sent.insert(key) {
            tracing::debug!(to = %message.to, template = %message.body_template,
                "duplicate email suppressed");
            return Ok(());
        }
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            template = %message.body_template,
            vars = %message.template_vars,
            "email (log sender)"
        );
        Ok(())
    }
}

/// Embedded user-code runtime. The core invokes functions through this
/// interface and never executes user code itself.
#[async_trait]
pub trait FunctionRuntime: Send + Sync {
    async fn invoke(&self, fn_name: &str, request: Value) -> Result<Value, Error>;
}

/// Default runtime with no functions deployed.
pub struct NoFunctionRuntime;

#[async_trait]
impl FunctionRuntime for NoFunctionRuntime {
    async fn invoke(&self, fn_name: &str, _request: Value) -> Result<Value, Error> {
        Err(Error::NotFound(format!("no such function: {fn_name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn default_runtime_has_no_functions() {
        let err = NoFunctionRuntime
            .invoke("hello", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn log_sender_is_idempotent_per_token() {
        let sender = LogEmailSender::default();
        let message = EmailMessage {
            to: "u@e.com".into(),
            subject: "Confirm".into(),
            body_template: "magiclink".into(),
            template_vars: json!({}),
            token: "tok-1".into(),
        };
        sender.send(message.clone()).await.unwrap();
        sender.send(message.clone()).await.unwrap();
        let mut other = message;
        other.token = "tok-2".into();
        sender.send(other).await.unwrap();
        assert_eq!(sender.sent.lock().unwrap().len(), 2);
    }
}
