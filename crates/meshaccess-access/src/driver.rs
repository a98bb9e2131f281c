//! Tokio task that runs publication deadlines in real time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use meshaccess_node::ModelRef;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::access::Access;
use crate::error::Result;

/// Shared handle to an [`Access`] driven by a [`PublicationDriver`].
#[derive(Clone)]
pub struct DriverHandle {
    access: Arc<Mutex<Access>>,
    wake: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

impl DriverHandle {
    /// Publish and wake the driver so the new deadline is picked up.
    pub async fn publish(&self, model: ModelRef) -> Result<()> {
        self.access.lock().await.publish(model)?;
        self.wake.notify_one();
        Ok(())
    }

    /// Re-read deadlines after changing publication state directly.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn access(&self) -> Arc<Mutex<Access>> {
        self.access.clone()
    }
}

/// Sleeps until the earliest publication deadline and runs
/// [`Access::tick`].
///
/// `epoch` is the instant the access layer's clock reads as 0 ms, e.g.
/// [`crate::MonotonicClock::start`].
pub struct PublicationDriver {
    handle: DriverHandle,
    epoch: Instant,
}

impl PublicationDriver {
    pub fn new(access: Access, epoch: Instant) -> Self {
        Self {
            handle: DriverHandle {
                access: Arc::new(Mutex::new(access)),
                wake: Arc::new(Notify::new()),
                stopped: Arc::new(AtomicBool::new(false)),
            },
            epoch,
        }
    }

    pub fn handle(&self) -> DriverHandle {
        self.handle.clone()
    }

    pub async fn run(self) {
        debug!("publication driver started");
        loop {
            if self.handle.stopped.load(Ordering::SeqCst) {
                break;
            }

            let deadline = {
                let mut access = self.handle.access.lock().await;
                let now = access.now_ms();
                let fired = access.tick(now);
                if fired > 0 {
                    trace!(now, fired, "publication tick");
                }
                access.next_deadline()
            };

            match deadline {
                Some(at) => {
                    let when = tokio::time::Instant::from_std(self.epoch + Duration::from_millis(at));
                    tokio::select! {
                        biased;
                        _ = self.handle.wake.notified() => {},
                        _ = tokio::time::sleep_until(when) => {},
                    }
                }
                None => self.handle.wake.notified().await,
            }
        }
        debug!("publication driver stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use meshaccess_node::publication::transmit;
    use meshaccess_node::{Composition, Element, Model, PubParams, Publication};

    use super::*;
    use crate::access::Collaborators;
    use crate::clock::MonotonicClock;
    use crate::config::AccessConfig;
    use crate::testing::{FixedRandom, LabelTable, ManualClock, RecordingTransport, SharedStore};

    #[tokio::test]
    async fn driver_runs_retransmissions() {
        let publication = Publication::new()
            .with_params(PubParams {
                addr: 0xC001,
                retransmit: transmit(1, 50),
                ..PubParams::default()
            })
            .with_message(&[0x82, 0x04, 0]);
        let comp = Composition::new(0x0059, 1, 1).with_element(
            Element::new(0).with_model(Model::sig(0x1000).with_publication(publication)),
        );

        let clock = MonotonicClock::new();
        let transport = RecordingTransport::new(ManualClock::new(0));
        let mut access = Access::register(
            comp,
            AccessConfig::default(),
            Collaborators {
                transport: Box::new(transport.clone()),
                rng: Box::new(FixedRandom(0)),
                clock: Box::new(clock),
                labels: Box::new(LabelTable::default()),
                store: Box::new(SharedStore::new()),
            },
        )
        .unwrap();
        access.provision(0x0100);

        let driver = PublicationDriver::new(access, clock.start());
        let handle = driver.handle();
        let task = driver.spawn();

        handle.publish(ModelRef::sig(0, 0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(transport.sent().len(), 2);
        assert_eq!(handle.access().lock().await.next_deadline(), None);

        handle.stop();
        task.await.unwrap();
    }
}
