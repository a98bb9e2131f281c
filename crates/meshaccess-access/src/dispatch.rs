//! Inbound message dispatch and the model send path.

use bytes::Bytes;
use meshaccess_comp::MIC_SHORT;
use meshaccess_node::{
    addr, Element, HandlerCtx, MessageContext, Model, ModelOp, ModelRef, NetTx, Opcode, Reply,
};
use tracing::{debug, trace, warn};

use crate::access::Access;
use crate::error::{AccessError, Result};
use crate::status::AccessStatus;

impl Access {
    /// Dispatch one access payload (opcode followed by parameters).
    ///
    /// Unicast messages go to the addressed element only. Any other
    /// destination is offered to every element, and succeeds if at least
    /// one of them handled it. The message callback, if set, sees every
    /// message whose opcode decoded.
    pub fn recv(&mut self, ctx: &mut MessageContext, payload: &[u8]) -> AccessStatus {
        let mut buf = Bytes::copy_from_slice(payload);
        let opcode = match Opcode::decode(&mut buf) {
            Ok(opcode) => opcode,
            Err(err) => {
                warn!(%err, len = payload.len(), "unable to decode opcode");
                return AccessStatus::WrongOpcode;
            }
        };

        debug!(
            app_idx = ctx.app_idx,
            src = ctx.addr,
            dst = ctx.recv_dst,
            %opcode,
            len = buf.len(),
            "recv"
        );

        let status = if addr::is_unicast(ctx.recv_dst) {
            match self.unicast_elem(ctx.recv_dst) {
                Some(elem_idx) => self.element_recv(elem_idx, opcode, ctx, &buf),
                None => AccessStatus::InvalidAddress,
            }
        } else {
            let mut handled = false;
            let mut status = AccessStatus::InvalidAddress;
            for elem_idx in 0..self.comp.elem_count() {
                status = self.element_recv(elem_idx, opcode, ctx, &buf);
                handled |= status.is_success();
            }
            if handled {
                AccessStatus::Success
            } else {
                status
            }
        };

        if let Some(cb) = self.msg_cb.as_mut() {
            cb(opcode, ctx, &buf);
        }

        status
    }

    /// Like [`Access::recv`], but a message counts as accepted whenever a
    /// message callback is installed.
    pub fn access_recv(&mut self, ctx: &mut MessageContext, payload: &[u8]) -> AccessStatus {
        let status = self.recv(ctx, payload);
        if self.msg_cb.is_some() {
            return AccessStatus::Success;
        }
        status
    }

    fn unicast_elem(&self, dst: u16) -> Option<u8> {
        let base = self.comp.elements.first()?.addr;
        let index = dst.wrapping_sub(base);
        (index < self.comp.elem_count() as u16).then_some(index as u8)
    }

    fn element_recv(
        &mut self,
        elem_idx: u8,
        opcode: Opcode,
        ctx: &mut MessageContext,
        buf: &Bytes,
    ) -> AccessStatus {
        let Some(elem) = self.comp.elements.get(elem_idx as usize) else {
            return AccessStatus::InvalidAddress;
        };

        let Some((model, op)) = find_op(elem, opcode, self.config.cid_force) else {
            trace!(elem_idx, %opcode, "no model accepts opcode");
            return AccessStatus::WrongOpcode;
        };
        let model_ref = model.model_ref();

        if !model.has_key(ctx.app_idx) {
            debug!(model = %model_ref, app_idx = ctx.app_idx, "model not bound to key");
            return AccessStatus::WrongKey;
        }

        if !self.dst_matches(elem_idx, elem, model_ref, ctx) {
            debug!(model = %model_ref, dst = ctx.recv_dst, "model not subscribed to destination");
            return AccessStatus::InvalidAddress;
        }

        if !op.len.accepts(buf.len()) {
            warn!(
                model = %model_ref,
                %opcode,
                len = buf.len(),
                expected = ?op.len,
                "invalid message size"
            );
            return AccessStatus::MessageNotUnderstood;
        }

        if self.config.delayable_msg_ctx {
            ctx.rnd_delay = true;
        }

        let handler = op.handler.clone();
        let mut cursor = buf.clone();
        let mut replies: Vec<Reply> = Vec::new();
        let result = {
            let mut hctx = HandlerCtx::new(model, ctx, &mut replies);
            handler(&mut hctx, &mut cursor)
        };

        for reply in replies {
            if let Err(err) = self.model_send(reply.model, &reply.ctx, &reply.to_sdu()) {
                warn!(model = %reply.model, opcode = %reply.opcode, %err, "failed to send reply");
            }
        }

        match result {
            Ok(()) => AccessStatus::Success,
            Err(err) => {
                debug!(model = %model_ref, %opcode, %err, "handler rejected message");
                AccessStatus::MessageNotUnderstood
            }
        }
    }

    fn dst_matches(&self, elem_idx: u8, elem: &Element, model: ModelRef, ctx: &MessageContext) -> bool {
        let dst = ctx.recv_dst;
        if addr::is_unicast(dst) {
            return elem.addr == dst;
        }
        if addr::is_virtual(dst) {
            return ctx
                .uuid
                .as_ref()
                .is_some_and(|uuid| self.graph.find_label(&self.comp, model, uuid).is_some());
        }
        if addr::is_group(dst) || (addr::is_fixed_group(dst) && elem_idx != 0) {
            return self.graph.find_group(&self.comp, model, dst).is_some();
        }
        // fixed group addresses reach the primary element
        elem_idx == 0
    }

    /// Send an access SDU from `model`'s element.
    ///
    /// The model must be bound to `ctx.app_idx` and the node provisioned.
    pub fn model_send(&mut self, model: ModelRef, ctx: &MessageContext, sdu: &[u8]) -> Result<()> {
        if !self.model(model)?.has_key(ctx.app_idx) {
            return Err(AccessError::NotBound {
                app_idx: ctx.app_idx,
            });
        }
        if !self.is_provisioned() {
            return Err(AccessError::NotProvisioned);
        }

        let max = self.config.tx_sdu_max();
        if sdu.len() + MIC_SHORT > max {
            return Err(AccessError::MessageTooLarge {
                size: sdu.len(),
                max: max.saturating_sub(MIC_SHORT),
            });
        }

        let src = self.comp.element(model.elem)?.addr;
        debug!(
            %model,
            src,
            dst = ctx.addr,
            app_idx = ctx.app_idx,
            len = sdu.len(),
            "model send"
        );
        let tx = NetTx {
            ctx,
            src,
            friend_cred: false,
        };
        self.transport.send(&tx, sdu)?;
        Ok(())
    }
}

/// First model on the element whose operation table holds `opcode`.
///
/// Vendor opcodes are only looked up among vendor models; with
/// `cid_force`, models of another company are skipped.
fn find_op(elem: &Element, opcode: Opcode, cid_force: bool) -> Option<(&Model, &ModelOp)> {
    let vnd = opcode.len() >= 3;
    elem.list(vnd)
        .iter()
        .filter(|model| !vnd || !cid_force || model.company() == opcode.company())
        .find_map(|model| model.find_op(opcode).map(|op| (model, op)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use meshaccess_node::key::{DEV_ANY, DEV_LOCAL};
    use meshaccess_node::{Composition, ModelError, ModelSetup, MsgLen};

    use super::*;
    use crate::config::AccessConfig;
    use crate::testing::TestNode;

    const ONOFF_GET: Opcode = Opcode::op2(0x82, 0x01);
    const ONOFF_SET: Opcode = Opcode::op2(0x82, 0x02);
    const ONOFF_STATUS: Opcode = Opcode::op2(0x82, 0x04);
    const VND_OP: Opcode = Opcode::op3(0x01, 0x0059);

    fn onoff(hits: Arc<AtomicUsize>) -> Model {
        let set_hits = hits.clone();
        Model::sig(0x1000)
            .with_op(ONOFF_GET, MsgLen::Exact(0), move |ctx, _| {
                hits.fetch_add(1, Ordering::SeqCst);
                ctx.reply(ONOFF_STATUS, vec![1]);
                Ok(())
            })
            .with_op(ONOFF_SET, MsgLen::Min(2), move |_, buf| {
                set_hits.fetch_add(1, Ordering::SeqCst);
                if buf[0] > 1 {
                    return Err(ModelError::Rejected("bad state".into()));
                }
                Ok(())
            })
    }

    fn node(elems: usize) -> (TestNode, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut comp = Composition::new(0x0059, 1, 1);
        for e in 0..elems {
            comp = comp.with_element(
                Element::new(e as u16)
                    .with_model(onoff(hits.clone()))
                    .with_vnd_model(Model::vendor(0x0059, 0x0001).with_op(
                        VND_OP,
                        MsgLen::Min(0),
                        |_, _| Ok(()),
                    )),
            );
        }
        let mut node = TestNode::new(comp, AccessConfig::default()).unwrap();
        node.access.provision(0x0100);
        for e in 0..elems as u8 {
            node.access.model_mut(ModelRef::sig(e, 0)).unwrap().bind_key(1);
            node.access.model_mut(ModelRef::vnd(e, 0)).unwrap().bind_key(1);
        }
        (node, hits)
    }

    #[test]
    fn unicast_get_is_answered_from_element_address() {
        let (mut node, hits) = node(2);
        let mut ctx = MessageContext::inbound(1, 0x0005, 0x0101);

        assert_eq!(node.access.recv(&mut ctx, &[0x82, 0x01]), AccessStatus::Success);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(ctx.rnd_delay);

        let sent = node.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].src, 0x0101);
        assert_eq!(sent[0].dst, 0x0005);
        assert_eq!(sent[0].app_idx, 1);
        assert_eq!(sent[0].sdu, vec![0x82, 0x04, 1]);
    }

    #[test]
    fn checks_run_in_order() {
        let (mut node, _) = node(1);

        let mut ctx = MessageContext::inbound(1, 0x0005, 0x0100);
        assert_eq!(node.access.recv(&mut ctx, &[0x7F]), AccessStatus::WrongOpcode);
        assert_eq!(node.access.recv(&mut ctx, &[0x82]), AccessStatus::WrongOpcode);
        assert_eq!(node.access.recv(&mut ctx, &[0x82, 0x09]), AccessStatus::WrongOpcode);

        // unknown opcode wins over wrong key
        let mut ctx = MessageContext::inbound(2, 0x0005, 0x0100);
        assert_eq!(node.access.recv(&mut ctx, &[0x82, 0x09]), AccessStatus::WrongOpcode);
        // wrong key wins over bad length
        assert_eq!(node.access.recv(&mut ctx, &[0x82, 0x01, 0xFF]), AccessStatus::WrongKey);

        // wrong address wins over bad length
        let mut ctx = MessageContext::inbound(1, 0x0005, 0xC005);
        assert_eq!(
            node.access.recv(&mut ctx, &[0x82, 0x01, 0xFF]),
            AccessStatus::InvalidAddress
        );

        let mut ctx = MessageContext::inbound(1, 0x0005, 0x0100);
        assert_eq!(
            node.access.recv(&mut ctx, &[0x82, 0x01, 0xFF]),
            AccessStatus::MessageNotUnderstood
        );
        assert_eq!(
            node.access.recv(&mut ctx, &[0x82, 0x02, 0x01]),
            AccessStatus::MessageNotUnderstood
        );
    }

    #[test]
    fn handler_error_is_not_understood_and_cursor_is_private() {
        let (mut node, hits) = node(1);
        let mut ctx = MessageContext::inbound(1, 0x0005, 0x0100);
        assert_eq!(
            node.access.recv(&mut ctx, &[0x82, 0x02, 0x05, 0x00]),
            AccessStatus::MessageNotUnderstood
        );
        assert_eq!(
            node.access.recv(&mut ctx, &[0x82, 0x02, 0x01, 0x00]),
            AccessStatus::Success
        );
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unicast_outside_node_is_invalid_address() {
        let (mut node, hits) = node(2);
        let mut ctx = MessageContext::inbound(1, 0x0005, 0x0102);
        assert_eq!(node.access.recv(&mut ctx, &[0x82, 0x01]), AccessStatus::InvalidAddress);
        let mut ctx = MessageContext::inbound(1, 0x0005, 0x00FF);
        assert_eq!(node.access.recv(&mut ctx, &[0x82, 0x01]), AccessStatus::InvalidAddress);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn group_reaches_every_subscribed_element() {
        let (mut node, hits) = node(3);
        node.access.model_mut(ModelRef::sig(0, 0)).unwrap().add_group(0xC001);
        node.access.model_mut(ModelRef::sig(2, 0)).unwrap().add_group(0xC001);

        let mut ctx = MessageContext::inbound(1, 0x0005, 0xC001);
        assert_eq!(node.access.recv(&mut ctx, &[0x82, 0x01]), AccessStatus::Success);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let srcs: Vec<u16> = node.transport.sent().iter().map(|p| p.src).collect();
        assert_eq!(srcs, vec![0x0100, 0x0102]);
    }

    #[test]
    fn group_without_subscriber_reports_last_status() {
        let (mut node, _) = node(2);
        let mut ctx = MessageContext::inbound(1, 0x0005, 0xC001);
        assert_eq!(node.access.recv(&mut ctx, &[0x82, 0x01]), AccessStatus::InvalidAddress);
    }

    #[test]
    fn fixed_group_goes_to_primary_element_only() {
        let (mut node, hits) = node(2);
        let mut ctx = MessageContext::inbound(1, 0x0005, addr::ALL_NODES);
        assert_eq!(node.access.recv(&mut ctx, &[0x82, 0x01]), AccessStatus::Success);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(node.transport.sent()[0].src, 0x0100);
    }

    #[test]
    fn virtual_destination_matches_label() {
        let (mut node, hits) = node(1);
        let uuid = [7u8; 16];
        node.access.model_mut(ModelRef::sig(0, 0)).unwrap().add_label(uuid);

        let mut ctx = MessageContext::inbound(1, 0x0005, 0x8123);
        ctx.uuid = Some([8u8; 16]);
        assert_eq!(node.access.recv(&mut ctx, &[0x82, 0x01]), AccessStatus::InvalidAddress);

        ctx.uuid = Some(uuid);
        assert_eq!(node.access.recv(&mut ctx, &[0x82, 0x01]), AccessStatus::Success);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    struct ExtendOnoff;

    impl meshaccess_node::ModelCallbacks for ExtendOnoff {
        fn init(&self, model: ModelRef, setup: &mut dyn ModelSetup) -> std::result::Result<(), ModelError> {
            setup.extend(model, ModelRef::sig(model.elem, 0))
        }
    }

    #[test]
    fn group_subscription_is_shared_across_extension_group() {
        let hits = Arc::new(AtomicUsize::new(0));
        let level_hits = Arc::new(AtomicUsize::new(0));
        let seen = level_hits.clone();
        let comp = Composition::new(0x0059, 1, 1).with_element(
            Element::new(0).with_model(onoff(hits.clone())).with_model(
                Model::sig(0x1002)
                    .with_callbacks(Arc::new(ExtendOnoff))
                    .with_op(Opcode::op2(0x82, 0x05), MsgLen::Exact(0), move |_, _| {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
            ),
        );
        let mut node = TestNode::new(comp, AccessConfig::default()).unwrap();
        node.access.provision(0x0100);
        node.access.model_mut(ModelRef::sig(0, 1)).unwrap().bind_key(1);
        node.access.model_mut(ModelRef::sig(0, 0)).unwrap().add_group(0xC010);

        let mut ctx = MessageContext::inbound(1, 0x0005, 0xC010);
        assert_eq!(node.access.recv(&mut ctx, &[0x82, 0x05]), AccessStatus::Success);
        assert_eq!(level_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn vendor_opcode_skips_other_companies() {
        let comp = Composition::new(0x0059, 1, 1).with_element(
            Element::new(0)
                .with_vnd_model(
                    Model::vendor(0x1234, 0x0001).with_op(VND_OP, MsgLen::Min(0), |_, _| Ok(())),
                )
                .with_vnd_model(
                    Model::vendor(0x0059, 0x0002).with_op(VND_OP, MsgLen::Min(0), |_, _| {
                        Err(ModelError::Unavailable)
                    }),
                ),
        );
        let config = AccessConfig {
            cid_force: false,
            ..AccessConfig::default()
        };
        let mut node = TestNode::new(comp, config).unwrap();
        node.access.provision(0x0100);
        node.access.model_mut(ModelRef::vnd(0, 0)).unwrap().bind_key(1);
        node.access.model_mut(ModelRef::vnd(0, 1)).unwrap().bind_key(1);

        let mut ctx = MessageContext::inbound(1, 0x0005, 0x0100);
        // first match wins when the company check is off
        assert_eq!(node.access.recv(&mut ctx, &[0xC1, 0x59, 0x00]), AccessStatus::Success);

        node.access.config.cid_force = true;
        assert_eq!(
            node.access.recv(&mut ctx, &[0xC1, 0x59, 0x00]),
            AccessStatus::MessageNotUnderstood
        );
    }

    #[test]
    fn device_key_wildcard_accepts_local_device_key() {
        let (mut node, hits) = node(1);
        node.access.model_mut(ModelRef::sig(0, 0)).unwrap().keys = vec![DEV_ANY];
        let mut ctx = MessageContext::inbound(DEV_LOCAL, 0x0005, 0x0100);
        assert_eq!(node.access.recv(&mut ctx, &[0x82, 0x01]), AccessStatus::Success);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn message_callback_sees_decoded_messages() {
        let (mut node, _) = node(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        node.access.set_msg_cb(Box::new(move |opcode, ctx, payload| {
            sink.lock().unwrap().push((opcode, ctx.recv_dst, payload.to_vec()));
        }));

        let mut ctx = MessageContext::inbound(1, 0x0005, 0xC777);
        assert_eq!(
            node.access.recv(&mut ctx, &[0x82, 0x08, 0xAA]),
            AccessStatus::WrongOpcode
        );
        assert_eq!(
            node.access.access_recv(&mut ctx, &[0x82, 0x08, 0xAA]),
            AccessStatus::Success
        );
        node.access.recv(&mut ctx, &[0x7F]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (Opcode::op2(0x82, 0x08), 0xC777, vec![0xAA]));
    }

    #[test]
    fn model_send_requires_binding_and_address() {
        let (mut node, _) = node(1);
        let ctx = MessageContext {
            app_idx: 3,
            addr: 0x0009,
            ..MessageContext::default()
        };
        assert!(matches!(
            node.access.model_send(ModelRef::sig(0, 0), &ctx, &[0x82, 0x04, 0]),
            Err(AccessError::NotBound { app_idx: 3 })
        ));

        let ctx = MessageContext {
            app_idx: 1,
            ..ctx
        };
        assert!(matches!(
            node.access.model_send(ModelRef::sig(0, 0), &ctx, &[0u8; 33]),
            Err(AccessError::MessageTooLarge { size: 33, max: 32 })
        ));

        node.access.unprovision();
        assert!(matches!(
            node.access.model_send(ModelRef::sig(0, 0), &ctx, &[0x82, 0x04, 0]),
            Err(AccessError::NotProvisioned)
        ));
    }
}
