//! JSON node descriptions.
//!
//! A node file lists the elements and models of a node plus the access
//! layer configuration. Opcodes, payloads and labels are hex strings.
//!
//! ```json
//! {
//!   "cid": 89, "pid": 1, "vid": 1, "addr": 256,
//!   "elements": [
//!     { "loc": 256, "models": [
//!         { "id": 4096, "keys": [0],
//!           "ops": [{ "opcode": "8201", "len": 0, "reply": "8204 01" }] }
//!     ] }
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use meshaccess_access::testing::{SharedStore, TestNode};
use meshaccess_access::AccessConfig;
use meshaccess_node::{
    Comp2, Comp2Record, Composition, Element, LabelUuid, MetadataEntry, Model, ModelCallbacks,
    ModelError, ModelRef, ModelSetup, MsgLen, Opcode, PubParams, Publication,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::exit::{
    access_error, hex_error, io_error, json_error, CliError, CliResult, DATA_INVALID,
};

const DEFAULT_CID: u16 = 0x05F1;
const DEFAULT_ADDR: u16 = 0x0001;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    #[serde(default = "default_cid")]
    pub cid: u16,
    #[serde(default)]
    pub pid: u16,
    #[serde(default)]
    pub vid: u16,
    /// Primary unicast address assigned at provisioning.
    #[serde(default = "default_addr")]
    pub addr: u16,
    pub elements: Vec<ElementSpec>,
    #[serde(default)]
    pub comp2: Vec<Comp2Spec>,
    /// Virtual label table, in label index order.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub config: AccessConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElementSpec {
    #[serde(default)]
    pub loc: u16,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub vnd_models: Vec<ModelSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    pub id: u16,
    /// Company identifier, vendor models only.
    #[serde(default)]
    pub company: Option<u16>,
    #[serde(default)]
    pub ops: Vec<OpSpec>,
    #[serde(default)]
    pub keys: Vec<u16>,
    #[serde(default)]
    pub groups: Vec<u16>,
    /// Virtual label subscriptions as 16-byte hex strings.
    #[serde(default)]
    pub virtual_labels: Vec<String>,
    #[serde(default)]
    pub metadata: Option<Vec<MetadataSpec>>,
    #[serde(default)]
    pub publication: Option<PublicationSpec>,
    #[serde(default)]
    pub extends: Vec<RefSpec>,
    #[serde(default)]
    pub corresponds: Vec<RefSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpSpec {
    pub opcode: String,
    /// Payload length, opcode excluded.
    #[serde(default)]
    pub len: usize,
    /// Treat `len` as a minimum.
    #[serde(default)]
    pub min: bool,
    /// Access SDU sent back to the source when the operation runs.
    #[serde(default)]
    pub reply: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataSpec {
    pub id: u16,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct PublicationSpec {
    #[serde(flatten)]
    pub params: PubParams,
    /// Access SDU to publish.
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub fast_period: bool,
    #[serde(default)]
    pub delayable: bool,
    #[serde(default)]
    pub retr_update: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefSpec {
    pub elem: u8,
    pub index: u8,
    #[serde(default)]
    pub vnd: bool,
}

impl From<RefSpec> for ModelRef {
    fn from(r: RefSpec) -> Self {
        ModelRef {
            elem: r.elem,
            index: r.index,
            vnd: r.vnd,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Comp2Spec {
    pub id: u16,
    pub version: [u8; 3],
    #[serde(default)]
    pub elem_offsets: Vec<u8>,
    #[serde(default)]
    pub data: String,
}

fn default_cid() -> u16 {
    DEFAULT_CID
}

fn default_addr() -> u16 {
    DEFAULT_ADDR
}

/// Declares a model's extension and correspondence relations at init time.
struct RelationCallbacks {
    extends: Vec<ModelRef>,
    corresponds: Vec<ModelRef>,
}

impl ModelCallbacks for RelationCallbacks {
    fn init(&self, model: ModelRef, setup: &mut dyn ModelSetup) -> Result<(), ModelError> {
        for base in &self.extends {
            setup.extend(model, *base)?;
        }
        for base in &self.corresponds {
            setup.correspond(model, *base)?;
        }
        Ok(())
    }
}

/// Bindings and subscriptions applied once the node is registered.
struct Attachments {
    model: ModelRef,
    keys: Vec<u16>,
    groups: Vec<u16>,
    labels: Vec<LabelUuid>,
}

impl NodeSpec {
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("read {}", path.display()), err))?;
        let spec: NodeSpec = serde_json::from_str(&text)
            .map_err(|err| json_error(&format!("parse {}", path.display()), err))?;
        debug!(path = %path.display(), elements = spec.elements.len(), "loaded node description");
        Ok(spec)
    }

    /// Register and provision the described node on recording collaborators.
    pub fn build(self) -> CliResult<TestNode> {
        let labels = self
            .labels
            .iter()
            .map(|s| parse_label(s))
            .collect::<CliResult<Vec<_>>>()?;

        let mut comp = Composition::new(self.cid, self.pid, self.vid);
        let mut attachments = Vec::new();
        for (elem_idx, elem_spec) in self.elements.into_iter().enumerate() {
            let elem_idx = elem_idx as u8;
            let mut elem = Element::new(elem_spec.loc);
            for (index, spec) in elem_spec.models.into_iter().enumerate() {
                let model = ModelRef::sig(elem_idx, index as u8);
                let (built, attach) = build_model(model, spec)?;
                elem = elem.with_model(built);
                attachments.push(attach);
            }
            for (index, spec) in elem_spec.vnd_models.into_iter().enumerate() {
                let model = ModelRef::vnd(elem_idx, index as u8);
                let (built, attach) = build_model(model, spec)?;
                elem = elem.with_vnd_model(built);
                attachments.push(attach);
            }
            comp = comp.with_element(elem);
        }

        let comp2 = self
            .comp2
            .into_iter()
            .map(|rec| {
                Ok(Comp2Record {
                    id: rec.id,
                    version: rec.version,
                    elem_offsets: rec.elem_offsets,
                    data: Bytes::from(decode_hex("profile data", &rec.data)?),
                })
            })
            .collect::<CliResult<Vec<_>>>()?;

        let mut node = TestNode::with_parts(comp, self.config, labels, SharedStore::new())
            .map_err(|err| access_error("register node", err))?;
        if !comp2.is_empty() {
            node.access
                .register_comp2(Comp2 { records: comp2 })
                .map_err(|err| access_error("register page 2", err))?;
        }
        node.access.provision(self.addr);

        for attach in attachments {
            let model = node
                .access
                .model_mut(attach.model)
                .map_err(|err| access_error("attach model state", err))?;
            for key in attach.keys {
                if !model.bind_key(key) {
                    warn!(model = %attach.model, key, "no free key slot");
                }
            }
            for group in attach.groups {
                if !model.add_group(group) {
                    warn!(model = %attach.model, group, "no free group slot");
                }
            }
            for label in attach.labels {
                if !model.add_label(label) {
                    warn!(model = %attach.model, "no free label slot");
                }
            }
        }

        Ok(node)
    }
}

fn build_model(model: ModelRef, spec: ModelSpec) -> CliResult<(Model, Attachments)> {
    let mut built = match (model.vnd, spec.company) {
        (true, Some(company)) => Model::vendor(company, spec.id),
        (false, None) => Model::sig(spec.id),
        (true, None) => {
            return Err(CliError::new(
                DATA_INVALID,
                format!("vendor model {model} needs a company id"),
            ))
        }
        (false, Some(_)) => {
            return Err(CliError::new(
                DATA_INVALID,
                format!("SIG model {model} must not carry a company id"),
            ))
        }
    };

    for op in spec.ops {
        let opcode = parse_opcode(&op.opcode)?;
        let len = if op.min {
            MsgLen::Min(op.len)
        } else {
            MsgLen::Exact(op.len)
        };
        let reply = op.reply.as_deref().map(parse_sdu).transpose()?;
        built = built.with_op(opcode, len, move |ctx, _payload| {
            if let Some((opcode, payload)) = &reply {
                ctx.reply(*opcode, payload.clone());
            }
            Ok(())
        });
    }

    if let Some(entries) = spec.metadata {
        let entries = entries
            .into_iter()
            .map(|e| Ok(MetadataEntry::new(e.id, decode_hex("metadata", &e.data)?)))
            .collect::<CliResult<Vec<_>>>()?;
        built = built.with_metadata(entries);
    }

    if let Some(p) = spec.publication {
        let mut publication = Publication::new()
            .with_params(p.params)
            .with_message(&decode_hex("publication message", &p.message)?)
            .delayable(p.delayable)
            .retr_update(p.retr_update);
        publication.fast_period = p.fast_period;
        built = built.with_publication(publication);
    }

    if !spec.extends.is_empty() || !spec.corresponds.is_empty() {
        built = built.with_callbacks(Arc::new(RelationCallbacks {
            extends: spec.extends.into_iter().map(ModelRef::from).collect(),
            corresponds: spec.corresponds.into_iter().map(ModelRef::from).collect(),
        }));
    }

    let labels = spec
        .virtual_labels
        .iter()
        .map(|s| parse_label(s))
        .collect::<CliResult<Vec<_>>>()?;

    Ok((
        built,
        Attachments {
            model,
            keys: spec.keys,
            groups: spec.groups,
            labels,
        },
    ))
}

/// Decode hex, ignoring embedded whitespace.
pub fn decode_hex(what: &str, input: &str) -> CliResult<Vec<u8>> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(compact).map_err(|err| hex_error(&format!("invalid {what}"), err))
}

/// Parse a hex opcode. The whole string must be one opcode.
pub fn parse_opcode(input: &str) -> CliResult<Opcode> {
    let (opcode, rest) = parse_sdu(input)?;
    if !rest.is_empty() {
        return Err(CliError::new(
            DATA_INVALID,
            format!("opcode {input} has {} trailing bytes", rest.len()),
        ));
    }
    Ok(opcode)
}

/// Split a hex access SDU into opcode and payload.
pub fn parse_sdu(input: &str) -> CliResult<(Opcode, Bytes)> {
    let mut buf = Bytes::from(decode_hex("access message", input)?);
    let opcode = Opcode::decode(&mut buf)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid opcode in {input}: {err}")))?;
    Ok((opcode, buf))
}

pub fn parse_label(input: &str) -> CliResult<LabelUuid> {
    let bytes = decode_hex("label uuid", input)?;
    LabelUuid::try_from(bytes.as_slice()).map_err(|_| {
        CliError::new(
            DATA_INVALID,
            format!("label uuid must be 16 bytes, got {}", bytes.len()),
        )
    })
}
