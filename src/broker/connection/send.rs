//! SEND publish paths
//!
//! Topics fan out to the current subscriber set, fire-and-forget. Queues go
//! through the round-robin dispatcher and spill to durable storage when the
//! queue has no listener group at all.

use std::time::SystemTime;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::{Connection, ConnectionError};
use crate::broker::{DispatchOutcome, Message};
use crate::protocol::{header, Destination, Frame};

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) async fn handle_send(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        let Some(destination) = self.parse_destination(frame).await? else {
            return Ok(());
        };

        let priority = frame
            .header(header::PRIORITY)
            .and_then(|value| value.parse::<i32>().ok())
            .unwrap_or(0);

        let message = Message {
            id: format!("conn-{}:{}", self.conn_id, self.message_ids.next()),
            destination,
            priority,
            timestamp: SystemTime::now(),
            body: frame.body.clone(),
        };

        let wire = self.encoder.encode_to_bytes(&Frame::message(
            &message.id,
            &message.destination,
            message.body.clone(),
        ));

        match &message.destination {
            Destination::Topic(name) => {
                let delivered = self.router.publish_topic(name, &wire);
                debug!(
                    "published {} to topic {} ({} subscribers)",
                    message.id, name, delivered
                );
            }
            Destination::Queue(name) => match self.router.dispatch_queue(name, &message.id, &wire)
            {
                DispatchOutcome::Delivered => {}
                DispatchOutcome::NoListeners => {
                    debug!("no consumers for queue {}, persisting {}", name, message.id);
                    self.storage.insert_message(&message.to_stored()).await?;
                }
            },
        }
        Ok(())
    }
}
