//! SUBSCRIBE and UNSUBSCRIBE handling
//!
//! Queue subscriptions join the listener group and replay persisted
//! messages; topic subscriptions join the fan-out set. Both replace any
//! existing subscription this connection held on the same destination.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::{Connection, ConnectionError};
use crate::broker::Subscription;
use crate::protocol::{header, Destination, Frame};

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) async fn handle_subscribe(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        let Some(destination) = self.parse_destination(frame).await? else {
            return Ok(());
        };
        let Some(writer) = self.writer.clone() else {
            return Ok(());
        };

        let prefetch = frame
            .header(header::PREFETCH)
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|&prefetch| prefetch > 0)
            .unwrap_or(self.default_prefetch);

        match &destination {
            Destination::Topic(name) => {
                // Topics have no flow control; the record carries the default.
                let subscription =
                    Arc::new(Subscription::new(name.clone(), crate::protocol::DEFAULT_PREFETCH));
                self.topics.insert(name.clone(), subscription);
                self.router.attach_topic(name, writer);
                debug!("connection {} subscribed to topic {}", self.conn_id, name);
            }
            Destination::Queue(name) => {
                let subscription = Arc::new(Subscription::new(name.clone(), prefetch));
                self.queues.insert(name.clone(), subscription.clone());
                self.router.attach_queue(name, writer, subscription.clone());
                debug!(
                    "connection {} subscribed to queue {} (prefetch {})",
                    self.conn_id, name, prefetch
                );
                self.replay_saved(&destination, subscription).await?;
            }
        }
        Ok(())
    }

    /// Replay persisted messages to a fresh queue subscription, most urgent
    /// and oldest first, serially on this connection.
    async fn replay_saved(
        &mut self,
        destination: &Destination,
        subscription: Arc<Subscription>,
    ) -> Result<(), ConnectionError> {
        let limit = subscription.prefetch.saturating_sub(subscription.pending());
        if limit == 0 {
            return Ok(());
        }

        let saved = self
            .storage
            .fetch_messages_for_destination(&destination.to_string(), limit)
            .await?;
        if saved.is_empty() {
            return Ok(());
        }

        // Track every replayed id before the first write suspends, so a
        // concurrent dispatch observes the updated flow-control state.
        for message in &saved {
            subscription.track(&message.id);
        }
        if let Some(writer) = &self.writer {
            writer.add_unacked(saved.len());
        }
        if subscription.is_saturated() {
            self.router.update_flow(destination.name(), self.conn_id);
        }

        debug!(
            "replaying {} saved messages to connection {}",
            saved.len(),
            self.conn_id
        );
        for message in saved {
            let frame = Frame::message(&message.id, destination, message.body.into());
            self.send_frame(&frame).await?;
        }
        Ok(())
    }

    /// Unknown destinations are a no-op, not an error.
    pub(crate) async fn handle_unsubscribe(
        &mut self,
        frame: &Frame,
    ) -> Result<(), ConnectionError> {
        let Some(destination) = self.parse_destination(frame).await? else {
            return Ok(());
        };
        match &destination {
            Destination::Topic(name) => {
                self.topics.remove(name);
                self.router.detach_topic(name, self.conn_id);
            }
            Destination::Queue(name) => {
                self.queues.remove(name);
                self.router.detach_queue(name, self.conn_id);
            }
        }
        debug!(
            "connection {} unsubscribed from {}",
            self.conn_id, destination
        );
        Ok(())
    }
}
