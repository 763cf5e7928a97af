//! Typed, topic-based publish/subscribe bus for sensor samples and estimates.
//!
//! Built on [`tokio::sync::broadcast`] so every subscriber sees every sample
//! and a slow subscriber never blocks the sensor tasks.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Position`] | GPS fixes (position and ground speed, NEU) |
//! | [`Topic::Altitude`] | Barometric altitude |
//! | [`Topic::Ranging`] | Sonar ranging vectors |
//! | [`Topic::Acceleration`] | NEU acceleration from the attitude estimator |
//! | [`Topic::Estimate`] | One [`EstimateFrame`][posest_types::EstimateFrame] per tick |
//! | [`Topic::Faults`] | Channels that skipped their correction |

use posest_types::{Event, PosestError};
use tokio::sync::broadcast;

/// Events buffered per topic before the oldest are dropped for slow
/// subscribers.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Position,
    Altitude,
    Ranging,
    Acceleration,
    Estimate,
    Faults,
}

impl Topic {
    /// Topics carrying estimator inputs.
    pub const INPUTS: [Topic; 4] = [
        Topic::Position,
        Topic::Altitude,
        Topic::Ranging,
        Topic::Acceleration,
    ];
}

/// Shared sample bus.  Clones share the same channels.
#[derive(Clone, Debug)]
pub struct SampleBus {
    position: broadcast::Sender<Event>,
    altitude: broadcast::Sender<Event>,
    ranging: broadcast::Sender<Event>,
    acceleration: broadcast::Sender<Event>,
    estimate: broadcast::Sender<Event>,
    faults: broadcast::Sender<Event>,
}

impl SampleBus {
    /// Create a bus; `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        Self {
            position: broadcast::channel(capacity).0,
            altitude: broadcast::channel(capacity).0,
            ranging: broadcast::channel(capacity).0,
            acceleration: broadcast::channel(capacity).0,
            estimate: broadcast::channel(capacity).0,
            faults: broadcast::channel(capacity).0,
        }
    }

    /// Publish `event` on `topic`.
    ///
    /// Returns the number of receivers handed the event, or
    /// [`PosestError::Channel`] when nobody is subscribed.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, PosestError> {
        self.sender(topic)
            .send(event)
            .map_err(|_| PosestError::Channel(format!("no subscribers for topic {topic:?}")))
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.sender(topic).subscribe(),
        }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Position => &self.position,
            Topic::Altitude => &self.altitude,
            Topic::Ranging => &self.ranging,
            Topic::Acceleration => &self.acceleration,
            Topic::Estimate => &self.estimate,
            Topic::Faults => &self.faults,
        }
    }
}

impl Default for SampleBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiver bound to a single [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event.  `Lagged(n)` means `n` events were dropped.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, used by the estimator to drain pending samples
    /// at the start of a tick.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posest_types::{EventPayload, GpsFix};
    use std::time::Duration;

    fn fix_event(pos_n: f32) -> Event {
        Event::new(
            "posest-middleware::test",
            EventPayload::GpsFix(GpsFix {
                pos_n,
                ..Default::default()
            }),
        )
    }

    #[tokio::test]
    async fn every_subscriber_receives_the_sample() -> Result<(), Box<dyn std::error::Error>> {
        let bus = SampleBus::default();
        let mut a = bus.subscribe_to(Topic::Position);
        let mut b = bus.subscribe_to(Topic::Position);

        let event = fix_event(3.0);
        assert_eq!(bus.publish_to(Topic::Position, event.clone())?, 2);

        assert_eq!(a.recv().await?.id, event.id);
        assert_eq!(b.recv().await?.id, event.id);
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_an_error() {
        let bus = SampleBus::default();
        assert!(matches!(
            bus.publish_to(Topic::Altitude, fix_event(0.0)),
            Err(PosestError::Channel(_))
        ));
    }

    #[tokio::test]
    async fn topics_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = SampleBus::default();
        let mut ranging = bus.subscribe_to(Topic::Ranging);
        let _position = bus.subscribe_to(Topic::Position);

        bus.publish_to(Topic::Position, fix_event(1.0))?;

        let result = tokio::time::timeout(Duration::from_millis(50), ranging.recv()).await;
        assert!(result.is_err(), "ranging subscriber saw a position sample");
        assert_eq!(ranging.topic(), Topic::Ranging);
        Ok(())
    }

    #[test]
    fn try_recv_drains_pending_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = SampleBus::default();
        let mut rx = bus.subscribe_to(Topic::Position);
        for i in 0..3 {
            bus.publish_to(Topic::Position, fix_event(i as f32))?;
        }
        let mut drained = 0;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, 3);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = SampleBus::new(16);
        let mut slow = bus.subscribe_to(Topic::Acceleration);
        for i in 0..1_000 {
            let _ = bus.publish_to(Topic::Acceleration, fix_event(i as f32));
        }
        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged, got {result:?}"
        );
    }
}
