//! NATS-backed event source.
//!
//! [`NatsEventSource`] subscribes to a single subject and turns every
//! message payload into one [`Event`]. Payloads are decoded as UTF-8 with
//! invalid sequences replaced, so a malformed message still yields an event
//! (which usually matches nothing).
//!
//! When the subscription closes, `next_event` reports a transient error and
//! drops the subscriber. The following call subscribes again, which lets
//! the intake task's retry budget cover broker restarts.

use async_nats::Subscriber;
use futures::StreamExt as _;
use tally_core::source::{EventSource, SourceError};
use tally_types::Event;
use tracing::{debug, info};

/// An event source reading one subject from a NATS server.
pub struct NatsEventSource {
    /// The NATS client connection.
    client: async_nats::Client,
    /// Subject carrying one event per message.
    subject: String,
    /// Active subscription, `None` after it closed.
    subscriber: Option<Subscriber>,
}

impl NatsEventSource {
    /// Connect to `url` and subscribe to `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Fatal`] if the connection cannot be
    /// established, or [`SourceError::Transient`] if subscribing fails.
    pub async fn connect(url: &str, subject: &str) -> Result<Self, SourceError> {
        info!(url = url, subject = subject, "Connecting to NATS");
        let client = async_nats::connect(url)
            .await
            .map_err(|e| SourceError::fatal(format!("failed to connect to NATS at {url}: {e}")))?;
        let mut source = Self {
            client,
            subject: subject.to_owned(),
            subscriber: None,
        };
        source.subscriber = Some(source.subscribe().await?);
        info!(subject = subject, "NATS subscription established");
        Ok(source)
    }

    async fn subscribe(&self) -> Result<Subscriber, SourceError> {
        debug!(subject = %self.subject, "Subscribing");
        self.client
            .subscribe(self.subject.clone())
            .await
            .map_err(|e| {
                SourceError::transient(format!("failed to subscribe to {}: {e}", self.subject))
            })
    }
}

impl EventSource for NatsEventSource {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        if self.subscriber.is_none() {
            let subscriber = self.subscribe().await?;
            self.subscriber = Some(subscriber);
            info!(subject = %self.subject, "NATS subscription re-established");
        }
        let Some(subscriber) = self.subscriber.as_mut() else {
            return Err(SourceError::transient("no active subscription"));
        };
        match subscriber.next().await {
            Some(message) => Ok(Some(Event::from_payload(&message.payload))),
            None => {
                self.subscriber = None;
                Err(SourceError::transient(format!(
                    "subscription to {} closed",
                    self.subject
                )))
            }
        }
    }
}
