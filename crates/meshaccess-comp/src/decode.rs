//! Parsers for generated or stored composition data pages.

use bytes::{Buf, Bytes};
use meshaccess_node::Comp2Record;
use serde::Serialize;

use crate::encode::Page1Model;
use crate::error::{CompError, Result};
use crate::page::PAGE_0_HEADER_LEN;

/// Decoded Composition Data Page 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page0 {
    pub cid: u16,
    pub pid: u16,
    pub vid: u16,
    pub crpl: u16,
    pub features: u16,
    pub elements: Vec<Page0Element>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page0Element {
    pub loc: u16,
    pub sig: Vec<u16>,
    pub vnd: Vec<VendorId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VendorId {
    pub company: u16,
    pub id: u16,
}

/// Decoded Composition Data Page 1 element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page1Element {
    pub sig_count: u8,
    pub vnd_count: u8,
    /// SIG models first, then vendor models.
    pub models: Vec<Page1Model>,
}

fn need(data: &[u8], n: usize, what: &str) -> Result<()> {
    if data.remaining() < n {
        return Err(CompError::Malformed(format!(
            "{what}: need {n} bytes, {} left",
            data.remaining()
        )));
    }
    Ok(())
}

/// Parse a complete Page 0.
pub fn decode_page_0(mut data: &[u8]) -> Result<Page0> {
    need(data, PAGE_0_HEADER_LEN, "page 0 header")?;
    let mut page = Page0 {
        cid: data.get_u16_le(),
        pid: data.get_u16_le(),
        vid: data.get_u16_le(),
        crpl: data.get_u16_le(),
        features: data.get_u16_le(),
        elements: Vec::new(),
    };

    while data.has_remaining() {
        need(data, 4, "page 0 element header")?;
        let loc = data.get_u16_le();
        let nsig = data.get_u8() as usize;
        let nvnd = data.get_u8() as usize;
        need(data, nsig * 2 + nvnd * 4, "page 0 model list")?;

        let sig = (0..nsig).map(|_| data.get_u16_le()).collect();
        let vnd = (0..nvnd)
            .map(|_| VendorId {
                company: data.get_u16_le(),
                id: data.get_u16_le(),
            })
            .collect();
        page.elements.push(Page0Element { loc, sig, vnd });
    }

    Ok(page)
}

/// Parse a complete Page 1.
pub fn decode_page_1(mut data: &[u8]) -> Result<Vec<Page1Element>> {
    let mut elements = Vec::new();

    while data.has_remaining() {
        need(data, 2, "page 1 element header")?;
        let sig_count = data.get_u8();
        let vnd_count = data.get_u8();
        let mut models = Vec::new();

        for _ in 0..(sig_count as usize + vnd_count as usize) {
            need(data, 1, "page 1 model header")?;
            let header = data.get_u8();
            let count = (header >> 2) as usize;
            let long = header & 0x02 != 0;

            let cor_id = if header & 0x01 != 0 {
                need(data, 1, "correspondence id")?;
                Some(data.get_u8())
            } else {
                None
            };

            need(data, count * if long { 2 } else { 1 }, "extension items")?;
            let items = (0..count)
                .map(|_| {
                    if long {
                        (data.get_i8(), data.get_u8())
                    } else {
                        let b = data.get_u8();
                        let off = (b & 0x07) as i8;
                        (if off >= 4 { off - 8 } else { off }, b >> 3)
                    }
                })
                .collect();

            models.push(Page1Model {
                cor_id,
                long,
                items,
            });
        }

        elements.push(Page1Element {
            sig_count,
            vnd_count,
            models,
        });
    }

    Ok(elements)
}

/// Parse a complete Page 2.
pub fn decode_page_2(mut data: &[u8]) -> Result<Vec<Comp2Record>> {
    let mut records = Vec::new();

    while data.has_remaining() {
        need(data, 6, "page 2 record header")?;
        let id = data.get_u16_le();
        let version = [data.get_u8(), data.get_u8(), data.get_u8()];
        let n = data.get_u8() as usize;
        need(data, n + 2, "element offsets")?;
        let elem_offsets = data[..n].to_vec();
        data.advance(n);
        let len = data.get_u16_le() as usize;
        need(data, len, "additional data")?;
        let payload = Bytes::copy_from_slice(&data[..len]);
        data.advance(len);

        records.push(Comp2Record {
            id,
            version,
            elem_offsets,
            data: payload,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use meshaccess_node::{Comp2, Composition, Element, Model, ModelId, ModelRef};

    use super::*;
    use crate::buf::PageBuf;
    use crate::encode::CompEncoder;
    use crate::extension::{ExtensionGraph, GraphConfig};
    use crate::page::CompConfig;

    fn comp() -> Composition {
        Composition::new(0x0059, 0xAAAA, 0x0001)
            .with_element(
                Element::new(0x0001)
                    .with_model(Model::sig(0x0000))
                    .with_model(Model::sig(0x1000))
                    .with_vnd_model(Model::vendor(0x0059, 0x0001))
                    .with_vnd_model(Model::vendor(0x0059, 0x0002)),
            )
            .with_element(Element::new(0x0002).with_model(Model::sig(0x1002)))
            .with_element(Element::new(0x0003).with_vnd_model(Model::vendor(0x1234, 0x5678)))
    }

    #[test]
    fn page_0_round_trip_preserves_model_ids() {
        let comp = comp();
        let graph = ExtensionGraph::new(GraphConfig::default());
        let config = CompConfig::default();
        let enc = CompEncoder::new(&comp, graph.relations(), &config);
        let mut buf = PageBuf::unbounded();
        enc.get_page(&mut buf, 0, 0, false).unwrap();

        let page = decode_page_0(&buf).unwrap();
        assert_eq!((page.cid, page.pid, page.vid), (0x0059, 0xAAAA, 0x0001));
        assert_eq!(page.crpl, config.crpl);
        assert_eq!(page.elements.len(), comp.elements.len());

        for (decoded, elem) in page.elements.iter().zip(&comp.elements) {
            assert_eq!(decoded.loc, elem.loc);
            let sig: Vec<_> = decoded.sig.iter().map(|id| ModelId::Sig(*id)).collect();
            assert_eq!(sig, elem.models.iter().map(|m| m.id).collect::<Vec<_>>());
            let vnd: Vec<_> = decoded
                .vnd
                .iter()
                .map(|v| ModelId::Vendor {
                    company: v.company,
                    id: v.id,
                })
                .collect();
            assert_eq!(vnd, elem.vnd_models.iter().map(|m| m.id).collect::<Vec<_>>());
        }
    }

    #[test]
    fn page_1_round_trip() {
        let mut comp = comp();
        let mut graph = ExtensionGraph::new(GraphConfig::default());
        graph
            .extend(&mut comp, ModelRef::vnd(0, 1), ModelRef::sig(0, 1))
            .unwrap();
        graph
            .extend(&mut comp, ModelRef::vnd(2, 0), ModelRef::sig(1, 0))
            .unwrap();
        graph
            .correspond(&comp, ModelRef::vnd(0, 0), ModelRef::sig(0, 0))
            .unwrap();
        let config = CompConfig::default();
        let enc = CompEncoder::new(&comp, graph.relations(), &config);
        let mut buf = PageBuf::unbounded();
        enc.get_page(&mut buf, 1, 0, true).unwrap();

        let elements = decode_page_1(&buf).unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].models[3].items, vec![(0, 1)]);
        assert_eq!(elements[0].models[2].cor_id, Some(0));
        assert_eq!(elements[0].models[0].cor_id, Some(0));
        assert_eq!(elements[2].models[0].items, vec![(-1, 0)]);
        for (e, elem) in elements.iter().enumerate() {
            for (ci, model) in elem.models.iter().enumerate() {
                assert_eq!(*model, enc.page_1_model(e as u8, ci as u8));
            }
        }
    }

    #[test]
    fn page_2_round_trip() {
        let comp2 = Comp2 {
            records: vec![Comp2Record {
                id: 0x1601,
                version: [1, 2, 3],
                elem_offsets: vec![0, 2],
                data: Bytes::from_static(b"xyz"),
            }],
        };
        let comp = comp();
        let graph = ExtensionGraph::new(GraphConfig::default());
        let config = CompConfig {
            page_2: true,
            ..CompConfig::default()
        };
        let enc = CompEncoder::new(&comp, graph.relations(), &config).with_comp2(Some(&comp2));
        let mut buf = PageBuf::unbounded();
        enc.get_page(&mut buf, 2, 0, true).unwrap();
        assert_eq!(decode_page_2(&buf).unwrap(), comp2.records);
    }

    #[test]
    fn truncated_pages_are_rejected() {
        assert!(decode_page_0(&[0; 9]).is_err());
        assert!(decode_page_0(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 1, 0, 0x00]).is_err());
        assert!(decode_page_1(&[1, 0, 0x04]).is_err());
        assert!(decode_page_2(&[0, 0, 1, 0, 0, 1]).is_err());
    }
}
