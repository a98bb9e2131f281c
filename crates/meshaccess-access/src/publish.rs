//! Periodic publication with retransmissions.
//!
//! Each publication carries its own deadline. [`Access::tick`] fires the
//! ones that are due; every transmission is followed by the sent path,
//! which re-arms the deadline from [`next_period`].

use meshaccess_comp::MIC_SHORT;
use meshaccess_node::publication::{RANDOM_DELAY_BASE, RANDOM_DELAY_LONG, RANDOM_DELAY_SHORT};
use meshaccess_node::{MessageContext, ModelRef, NetTx, Publication, RandomSource};
use tracing::{debug, trace, warn};

use crate::access::Access;
use crate::error::{AccessError, Result};

/// What [`next_period`] needs to know about a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodState {
    /// Transmissions left in the burst.
    pub count: u8,
    /// Messages sent so far in the burst.
    pub msg_num: u8,
    /// Retransmission interval.
    pub interval_ms: u32,
    /// Publish period, fast period divisor applied.
    pub period_ms: u32,
    pub delayable: bool,
}

impl PeriodState {
    pub fn of(publication: &Publication) -> Self {
        Self {
            count: publication.count,
            msg_num: publication.msg_num(),
            interval_ms: publication.transmit_interval_ms(),
            period_ms: publication.period_ms(),
            delayable: publication.delayable,
        }
    }
}

/// Delay until the next transmission, measured from now, given the time
/// elapsed since the period started. `None` means periodic publication is
/// off and nothing should be armed.
///
/// During a retransmission burst the burst is laid out on the retransmit
/// interval from the period start; a burst that has fallen behind keeps
/// the interval at the expense of the next period. A period that has
/// already elapsed fires again after 1 ms.
pub fn next_period(state: &PeriodState, elapsed: u64) -> Option<u64> {
    let mut period = 0u64;

    if state.count > 0 {
        period = state.interval_ms as u64 * state.msg_num as u64;
        if period != 0 && elapsed >= period {
            warn!(elapsed, period, "retransmission interval is too short");
            if state.delayable {
                warn!("publication period is too short for retransmissions");
            }
            return Some(state.interval_ms as u64);
        }
    }

    if period == 0 {
        period = state.period_ms as u64;
        if period == 0 {
            return None;
        }
    }

    if elapsed >= period {
        warn!(elapsed, period, "publication sending took longer than the period");
        if state.delayable {
            warn!("publication period is too short to be delayable");
        }
        return Some(1);
    }

    Some(period - elapsed)
}

pub(crate) fn pub_delay(rng: &mut dyn RandomSource, window: u16) -> u64 {
    RANDOM_DELAY_BASE + (rng.next_u16() % window) as u64
}

/// Outcome of one publication step.
enum Step {
    /// Nothing more to do until the next deadline, if any.
    Idle,
    /// A transmission attempt finished; run the sent path.
    Sent,
}

impl Access {
    /// Start publishing the model's current message now.
    ///
    /// The first message of the burst goes out at the next [`Access::tick`],
    /// after a random delay of 20 to 500 ms for delayable publications.
    pub fn publish(&mut self, model: ModelRef) -> Result<()> {
        let now = self.clock.now_ms();
        let max = self.config.tx_sdu_max();
        let jitter = self.config.delayable_publication;

        self.comp.resolve(model)?;
        let Access { comp, rng, .. } = self;
        let publication = comp
            .model_mut(model)
            .and_then(|m| m.publication.as_mut())
            .ok_or(AccessError::NotSupported("model has no publication context"))?;

        if !publication.is_active() {
            return Err(AccessError::AddressNotAvailable);
        }
        if publication.msg.is_empty() {
            return Err(AccessError::InvalidArgument(
                "no publication message".into(),
            ));
        }
        if publication.msg.len() + MIC_SHORT > max {
            return Err(AccessError::MessageTooLarge {
                size: publication.msg.len(),
                max: max.saturating_sub(MIC_SHORT),
            });
        }

        publication.count = publication.transmit_count() + 1;
        publication.period_start = now;

        let at = if publication.delayable && jitter {
            now + pub_delay(rng.as_mut(), RANDOM_DELAY_LONG)
        } else {
            now
        };
        publication.reschedule(at);

        debug!(
            %model,
            addr = publication.addr,
            count = publication.count,
            at,
            "publish"
        );
        Ok(())
    }

    /// Run every publication whose deadline is at or before `now`.
    /// Returns how many fired.
    pub fn tick(&mut self, now: u64) -> usize {
        let due: Vec<ModelRef> = self
            .comp
            .model_refs()
            .into_iter()
            .filter(|r| {
                self.publication(*r)
                    .and_then(|p| p.deadline)
                    .is_some_and(|at| at <= now)
            })
            .collect();

        for &model in &due {
            if let Some(publication) = self.publication_mut(model) {
                publication.cancel();
            }
            if let Step::Sent = self.mod_publish(model, now) {
                self.pub_sent(model, now);
            }
        }
        due.len()
    }

    /// Earliest armed publication deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.comp
            .elements
            .iter()
            .flat_map(|elem| elem.all_models())
            .filter_map(|m| m.publication.as_ref()?.deadline)
            .min()
    }

    /// Stop or resume periodic publication.
    ///
    /// Suspending drops every armed deadline. Resuming re-arms each
    /// periodic publication with an update callback one period from now.
    pub fn set_suspended(&mut self, suspended: bool) {
        if self.suspended == suspended {
            return;
        }
        self.suspended = suspended;
        let now = self.clock.now_ms();

        for elem in &mut self.comp.elements {
            for model in elem.models.iter_mut().chain(elem.vnd_models.iter_mut()) {
                let Some(publication) = model.publication.as_mut() else {
                    continue;
                };
                if suspended {
                    publication.cancel();
                    continue;
                }
                let period = publication.period_ms();
                if publication.update.is_some() && period > 0 {
                    publication.schedule(now + period as u64);
                }
            }
        }
        debug!(suspended, "publication state changed");
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Current publish period of a model, fast period divisor applied.
    pub fn pub_period_ms(&self, model: ModelRef) -> Result<u32> {
        self.comp.resolve(model)?;
        self.publication(model)
            .map(Publication::period_ms)
            .ok_or(AccessError::NotSupported("model has no publication context"))
    }

    /// True while the model is sending anything but the first message of a
    /// period.
    pub fn is_retransmission(&self, model: ModelRef) -> Result<bool> {
        self.comp.resolve(model)?;
        self.publication(model)
            .map(Publication::is_retransmission)
            .ok_or(AccessError::NotSupported("model has no publication context"))
    }

    pub(crate) fn publication(&self, model: ModelRef) -> Option<&Publication> {
        self.comp.model(model)?.publication.as_ref()
    }

    pub(crate) fn publication_mut(&mut self, model: ModelRef) -> Option<&mut Publication> {
        self.comp.model_mut(model)?.publication.as_mut()
    }

    fn mod_publish(&mut self, model: ModelRef, now: u64) -> Step {
        let jitter = self.config.delayable_publication;
        let suspended = self.suspended;
        let Access {
            comp,
            rng,
            transport,
            ..
        } = self;

        let Some(elem) = comp.elements.get_mut(model.elem as usize) else {
            return Step::Idle;
        };
        let src = elem.addr;
        let Some(publication) = elem
            .get_mut(model.vnd, model.index)
            .and_then(|m| m.publication.as_mut())
        else {
            return Step::Idle;
        };

        if !publication.is_active() || suspended {
            trace!(%model, suspended, "publication abandoned");
            return Step::Idle;
        }

        if publication.count > 0 {
            publication.count -= 1;
            if publication.retr_update && publication.is_retransmission() {
                if let Some(update) = publication.update.clone() {
                    if let Err(err) = update(model, &mut publication.msg) {
                        warn!(%model, %err, "publication update failed");
                        return Step::Sent;
                    }
                }
            }
        } else {
            publication.count = publication.transmit_count();
            publication.period_start = now;

            if let Some(update) = publication.update.clone() {
                if let Err(err) = update(model, &mut publication.msg) {
                    // skip this period; nothing is re-armed
                    debug!(%model, %err, "publication update failed");
                    publication.count = 0;
                    return Step::Idle;
                }
            }

            if publication.delayable && jitter {
                let at = now + pub_delay(rng.as_mut(), RANDOM_DELAY_SHORT);
                publication.reschedule(at);
                publication.count += 1;
                trace!(%model, at, "publication delayed");
                return Step::Idle;
            }
        }

        let ctx = MessageContext {
            app_idx: publication.key,
            addr: publication.addr,
            uuid: publication.uuid,
            send_ttl: publication.ttl,
            ..MessageContext::default()
        };
        let tx = NetTx {
            ctx: &ctx,
            src,
            friend_cred: publication.cred,
        };

        debug!(
            %model,
            src,
            dst = publication.addr,
            count = publication.count,
            len = publication.msg.len(),
            "publication transmit"
        );
        if let Err(err) = transport.send(&tx, &publication.msg) {
            warn!(%model, %err, "publication transmit failed");
        }
        Step::Sent
    }

    fn pub_sent(&mut self, model: ModelRef, now: u64) {
        let Some(publication) = self.publication_mut(model) else {
            return;
        };

        let elapsed = now.saturating_sub(publication.period_start);
        match next_period(&PeriodState::of(publication), elapsed) {
            Some(delay) => {
                publication.schedule(now + delay);
                trace!(%model, elapsed, delay, "publication re-armed");
            }
            None => trace!(%model, "publication period off"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use bytes::BytesMut;
    use meshaccess_node::publication::transmit;
    use meshaccess_node::{Composition, Element, Model, ModelError, PubParams};

    use super::*;
    use crate::config::AccessConfig;
    use crate::testing::TestNode;

    const MODEL: ModelRef = ModelRef::sig(0, 0);

    fn params(period: u8, retransmit: u8) -> PubParams {
        PubParams {
            addr: 0xC001,
            key: 1,
            ttl: 7,
            retransmit,
            period,
            ..PubParams::default()
        }
    }

    fn node_with(publication: Publication) -> TestNode {
        let comp = Composition::new(0x0059, 1, 1).with_element(
            Element::new(0).with_model(Model::sig(0x1000).with_publication(publication)),
        );
        let mut node = TestNode::new(comp, AccessConfig::default()).unwrap();
        node.access.provision(0x0100);
        node
    }

    fn counting_update(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(ModelRef, &mut BytesMut) -> std::result::Result<(), ModelError> + Send + Sync + 'static
    {
        move |_, msg| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            msg.clear();
            msg.extend_from_slice(&[0x82, 0x04, n as u8]);
            Ok(())
        }
    }

    #[test]
    fn next_period_cases() {
        let burst = PeriodState {
            count: 2,
            msg_num: 1,
            interval_ms: 50,
            period_ms: 100,
            delayable: false,
        };
        assert_eq!(next_period(&burst, 0), Some(50));
        assert_eq!(next_period(&burst, 10), Some(40));
        assert_eq!(next_period(&burst, 60), Some(50));

        let idle = PeriodState {
            count: 0,
            msg_num: 3,
            ..burst
        };
        assert_eq!(next_period(&idle, 30), Some(70));
        assert_eq!(next_period(&idle, 100), Some(1));
        assert_eq!(next_period(&idle, 250), Some(1));

        let off = PeriodState {
            period_ms: 0,
            ..idle
        };
        assert_eq!(next_period(&off, 0), None);
    }

    #[test]
    fn burst_then_period_timeline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let publication = Publication::new()
            .with_params(params(0x01, transmit(2, 50)))
            .with_message(&[0x82, 0x04, 0xFF])
            .with_update(counting_update(calls.clone()));
        let mut node = node_with(publication);

        node.access.publish(MODEL).unwrap();
        assert_eq!(node.access.next_deadline(), Some(0));
        node.run_until(201);

        assert_eq!(node.transport.times(), vec![0, 50, 100, 101, 151, 201]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let sent = node.transport.sent();
        assert_eq!(sent[0].sdu, vec![0x82, 0x04, 0xFF]);
        assert_eq!(sent[3].sdu, vec![0x82, 0x04, 0]);
        assert_eq!(sent[0].src, 0x0100);
        assert_eq!(sent[0].dst, 0xC001);
        assert_eq!(sent[0].app_idx, 1);
        assert_eq!(sent[0].ttl, 7);
    }

    #[test]
    fn retransmissions_refresh_when_asked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let publication = Publication::new()
            .with_params(params(0x00, transmit(2, 50)))
            .with_message(&[0x82, 0x04, 0xFF])
            .with_update(counting_update(calls.clone()))
            .retr_update(true);
        let mut node = node_with(publication);

        node.access.publish(MODEL).unwrap();
        node.run_until(1000);
        assert_eq!(node.transport.times(), vec![0, 50, 100]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(node.access.next_deadline(), None);
    }

    #[test]
    fn delayable_publication_is_jittered() {
        let publication = Publication::new()
            .with_params(params(0x01, 0))
            .with_message(&[0x82, 0x04, 0])
            .delayable(true);
        let mut node = node_with(publication);
        node.set_random(487);

        node.access.publish(MODEL).unwrap();
        // 20 + 487 % 480
        assert_eq!(node.access.next_deadline(), Some(27));
        node.run_until(199);
        // new period at 100, delayed by 20 + 487 % 30
        assert_eq!(node.transport.times(), vec![27, 127]);
    }

    #[test]
    fn jitter_can_be_disabled() {
        let publication = Publication::new()
            .with_params(params(0x00, 0))
            .with_message(&[0x82, 0x04, 0])
            .delayable(true);
        let comp = Composition::new(0x0059, 1, 1).with_element(
            Element::new(0).with_model(Model::sig(0x1000).with_publication(publication)),
        );
        let config = AccessConfig {
            delayable_publication: false,
            ..AccessConfig::default()
        };
        let mut node = TestNode::new(comp, config).unwrap();
        node.access.provision(0x0100);
        node.clock.set(40);

        node.access.publish(MODEL).unwrap();
        assert_eq!(node.access.next_deadline(), Some(40));
    }

    #[test]
    fn update_failure_skips_period_without_rearm() {
        let publication = Publication::new()
            .with_params(params(0x01, 0))
            .with_message(&[0x82, 0x04, 0])
            .with_update(|_, _| Err(ModelError::Unavailable));
        let mut node = node_with(publication);

        node.access.settings_commit();
        assert_eq!(node.access.next_deadline(), Some(100));
        assert_eq!(node.access.tick(100), 1);
        assert!(node.transport.sent().is_empty());
        assert_eq!(node.access.next_deadline(), None);
    }

    #[test]
    fn transport_failure_still_rearms() {
        let publication = Publication::new()
            .with_params(params(0x01, 0))
            .with_message(&[0x82, 0x04, 0])
            .with_update(|_, _| Ok(()));
        let mut node = node_with(publication);
        node.transport.set_failing(true);

        node.access.settings_commit();
        node.run_until(100);
        assert!(node.transport.sent().is_empty());
        assert_eq!(node.access.next_deadline(), Some(200));
    }

    #[test]
    fn publish_rejects_bad_state() {
        let mut node = node_with(Publication::new().with_params(params(0, 0)));
        assert!(matches!(
            node.access.publish(MODEL),
            Err(AccessError::InvalidArgument(_))
        ));

        node.access.publication_mut(MODEL).unwrap().msg.extend_from_slice(&[0u8; 33]);
        assert!(matches!(
            node.access.publish(MODEL),
            Err(AccessError::MessageTooLarge { size: 33, max: 32 })
        ));

        node.access.publication_mut(MODEL).unwrap().addr = 0;
        assert!(matches!(
            node.access.publish(MODEL),
            Err(AccessError::AddressNotAvailable)
        ));

        let comp = Composition::new(0x0059, 1, 1)
            .with_element(Element::new(0).with_model(Model::sig(0x1000)));
        let mut bare = TestNode::new(comp, AccessConfig::default()).unwrap();
        assert!(matches!(
            bare.access.publish(MODEL),
            Err(AccessError::NotSupported(_))
        ));
        assert!(bare.access.publish(ModelRef::sig(0, 4)).is_err());
    }

    #[test]
    fn unassigned_or_suspended_publication_is_abandoned() {
        let publication = Publication::new()
            .with_params(params(0x01, 0))
            .with_message(&[0x82, 0x04, 0])
            .with_update(|_, _| Ok(()));
        let mut node = node_with(publication);

        node.access.publish(MODEL).unwrap();
        node.access.publication_mut(MODEL).unwrap().addr = 0;
        assert_eq!(node.access.tick(0), 1);
        assert!(node.transport.sent().is_empty());
        assert_eq!(node.access.next_deadline(), None);

        node.access.publication_mut(MODEL).unwrap().addr = 0xC001;
        node.access.publish(MODEL).unwrap();
        node.access.set_suspended(true);
        assert_eq!(node.access.next_deadline(), None);
        assert_eq!(node.access.tick(0), 0);

        node.clock.set(500);
        node.access.set_suspended(false);
        assert_eq!(node.access.next_deadline(), Some(600));
    }

    #[test]
    fn fast_period_divides_period() {
        let mut publication = Publication::new()
            .with_params(params(0x41, 0))
            .with_message(&[0x82, 0x04, 0]);
        publication.fast_period = true;
        publication.period_div = 2;
        let node = node_with(publication);
        assert_eq!(node.access.pub_period_ms(MODEL).unwrap(), 250);
        assert!(!node.access.is_retransmission(MODEL).unwrap());
    }
}
