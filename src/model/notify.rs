use aws_sdk_sesv2::{
    model::{Body, Content, Destination, EmailContent, Message},
    Client as SesClient,
};
use log::info;
use thiserror::Error;

use crate::model::otp::Code;

#[derive(Debug, Error)]
#[error("Failed to deliver notification: {0}")]
pub struct NotifyError(pub String);

/// Outbound message delivery.
///
/// Delivery failures never abort the flow that issued a code: the stored
/// code stays usable, and the failure is surfaced to the caller instead.
#[rocket::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Production notifier backed by Amazon SES.
pub struct SesNotifier {
    client: SesClient,
    sender_address: String,
}

impl SesNotifier {
    pub fn new(client: SesClient, sender_address: String) -> Self {
        Self {
            client,
            sender_address,
        }
    }
}

#[rocket::async_trait]
impl Notifier for SesNotifier {
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let message = Message::builder()
            .subject(Content::builder().data(subject).build())
            .body(Body::builder().text(Content::builder().data(body).build()).build())
            .build();
        self.client
            .send_email()
            .from_email_address(&self.sender_address)
            .destination(Destination::builder().to_addresses(address).build())
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .map_err(|err| NotifyError(err.to_string()))?;
        info!("Notification email dispatched");
        Ok(())
    }
}

/// Subject and body of the registration email-verification message.
pub fn verification_message(code: Code, ttl_minutes: i64) -> (String, String) {
    (
        "WeVote - Email Verification Code".to_string(),
        format!(
            "Your verification code for the WeVote system is: {code}\n\
             \n\
             This code expires in {ttl_minutes} minutes.\n\
             If you didn't request this verification, please ignore this email.",
        ),
    )
}

/// Subject and body of the voting-day notification carrying the access code.
pub fn voting_day_message(code: Code) -> (String, String) {
    (
        "WeVote - Voting is Now Open!".to_string(),
        format!(
            "The polls are now open.\n\
             \n\
             Your voter verification code is: {code}\n\
             \n\
             To cast your vote you will need this code, your national\n\
             identity number, and your authenticator app.\n\
             Keep this code secure and do not share it with anyone.",
        ),
    )
}

#[cfg(test)]
pub mod mock {
    use std::sync::{Arc, Mutex};

    use crate::model::otp::CODE_LENGTH;

    use super::*;

    /// Records every message instead of delivering it. With `fail` set it
    /// records the attempt and then reports a delivery failure, so tests can
    /// still see what would have been sent. Clones share the record.
    #[derive(Default, Clone)]
    pub struct MockNotifier {
        sent: Arc<Mutex<Vec<(String, String, String)>>>,
        pub fail: bool,
    }

    impl MockNotifier {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<(String, String, String)> {
            self.sent.lock().unwrap().clone()
        }

        /// The 6-digit code carried by the most recent message.
        pub fn last_code(&self) -> Option<String> {
            let sent = self.sent.lock().unwrap();
            let (_, _, body) = sent.last()?;
            body.split(|c: char| !c.is_ascii_digit())
                .find(|run| run.len() == CODE_LENGTH)
                .map(str::to_string)
        }
    }

    #[rocket::async_trait]
    impl Notifier for MockNotifier {
        async fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push((
                address.to_string(),
                subject.to_string(),
                body.to_string(),
            ));
            if self.fail {
                return Err(NotifyError("mock delivery failure".to_string()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_the_code() {
        let code: Code = "482913".parse().unwrap();
        let (_, body) = verification_message(code, 5);
        assert!(body.contains("482913"));
        let (_, body) = voting_day_message(code);
        assert!(body.contains("482913"));
    }
}
