//! The packet model.
//!
//! A [`Packet`] is a parsed frame: an ordered stack of headers (outermost
//! first), the opaque payload after the last header, and a metadata map
//! that carries pipeline state between tables. All field access goes
//! through [`FieldId`] and yields canonical, left-padded bytes.

mod frame;
mod header;

pub use header::*;

use crate::error::{FwdError, Result};
use crate::field::{FieldId, FieldNum, HeaderGroup};
use std::collections::{BTreeMap, HashMap};
use vdp_types::bytes::{from_u128, pad_left, to_u128};

/// Packet attribute that turns on the per-packet trace log.
pub const ATTR_TRACE: &str = "trace";

/// Field mutation operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum UpdateOp {
    /// Overwrite with the value, padded or truncated to the field size.
    Set,
    /// Add the value as an unsigned big-endian integer.
    Inc,
    /// Subtract the value as an unsigned big-endian integer.
    Dec,
}

/// A parsed frame plus its pipeline metadata.
#[derive(Debug, Clone)]
pub struct Packet {
    headers: Vec<Header>,
    payload: Vec<u8>,
    start: HeaderId,
    metadata: BTreeMap<(FieldNum, u8), Vec<u8>>,
    attributes: HashMap<String, String>,
    log: Vec<String>,
    trace: bool,
}

impl Packet {
    /// Parses `frame` starting with header `start`.
    ///
    /// Parsing stops at the first header with no known successor; whatever
    /// remains is payload.
    pub fn parse(start: HeaderId, frame: &[u8]) -> Result<Self> {
        let mut headers = Vec::new();
        let mut offset = 0;
        let mut next = Some(start);
        while let Some(id) = next {
            if id == HeaderId::Opaque {
                break;
            }
            let len = id.wire_len(&frame[offset..])?;
            let data = frame[offset..offset + len].to_vec();
            next = id.next(&data, &frame[offset + len..]);
            headers.push(Header::new(id, data));
            offset += len;
        }
        Ok(Self {
            headers,
            payload: frame[offset..].to_vec(),
            start,
            metadata: BTreeMap::new(),
            attributes: HashMap::new(),
            log: Vec::new(),
            trace: false,
        })
    }

    /// The header the packet was parsed from.
    pub fn start_header(&self) -> HeaderId {
        self.start
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn header_ids(&self) -> Vec<HeaderId> {
        self.headers.iter().map(|h| h.id).collect()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Length of the wire image in bytes.
    pub fn length(&self) -> usize {
        self.headers.iter().map(|h| h.data.len()).sum::<usize>() + self.payload.len()
    }

    /// Attaches packet attributes, enabling the trace log if requested.
    pub fn set_attributes(&mut self, attributes: HashMap<String, String>) {
        self.trace |= attributes
            .get(ATTR_TRACE)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        self.attributes = attributes;
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace
    }

    pub fn enable_trace(&mut self) {
        self.trace = true;
    }

    /// Appends a line to the trace log; `msg` is only evaluated when
    /// tracing is on.
    pub fn log(&mut self, msg: impl FnOnce() -> String) {
        if self.trace {
            self.log.push(msg());
        }
    }

    pub fn log_lines(&self) -> &[String] {
        &self.log
    }

    pub fn take_log(&mut self) -> Vec<String> {
        std::mem::take(&mut self.log)
    }

    /// Reads a field in canonical form.
    ///
    /// Unset metadata reads as zeroes. A header field that is not present
    /// at the requested instance is an error.
    pub fn field(&self, id: &FieldId) -> Result<Vec<u8>> {
        match *id {
            FieldId::Known { num, instance } if num.is_metadata() => Ok(self.metadata(num, instance)),
            FieldId::Known { num, instance } => {
                let (idx, off, len) = self.locate(num, instance)?;
                let value = read_bits(&self.headers[idx].data, off, len);
                Ok(from_u128(value, num.size()))
            }
            FieldId::Udf { .. } => {
                let (bytes, range) = self.udf_slice(id)?;
                Ok(bytes[range].to_vec())
            }
        }
    }

    /// Reads a field as an integer (the low 16 bytes of its canonical form).
    pub fn field_u128(&self, id: &FieldId) -> Result<u128> {
        self.field(id).map(|v| to_u128(&v))
    }

    /// Mutates a field.
    ///
    /// Decrementing `IP_HOP` below zero fails; the caller drops the packet.
    pub fn update(&mut self, id: &FieldId, op: UpdateOp, value: &[u8]) -> Result<()> {
        let size = id.size();
        let new = match op {
            UpdateOp::Set => pad_left(value, size),
            UpdateOp::Inc | UpdateOp::Dec => {
                let current = to_u128(&self.field(id)?);
                let delta = to_u128(value);
                let bits = self.width_bits(id)?;
                let result = if op == UpdateOp::Inc {
                    current.wrapping_add(delta)
                } else {
                    if id.num() == Some(FieldNum::IpHop) && delta > current {
                        return Err(FwdError::invalid_argument(format!(
                            "{} underflow ({} - {})",
                            id, current, delta
                        )));
                    }
                    current.wrapping_sub(delta)
                };
                from_u128(mask_bits(result, bits), size)
            }
        };
        self.store(id, new)
    }

    /// Pushes a new outermost header. An empty `data` uses the kind's
    /// default template.
    pub fn encap(&mut self, id: HeaderId, data: &[u8]) -> Result<()> {
        if id == HeaderId::Opaque {
            return Err(FwdError::invalid_argument("cannot encap an opaque header"));
        }
        if let Some(outer) = self.headers.first() {
            if !id.is_parent_of(outer.id) {
                return Err(FwdError::invalid_argument(format!(
                    "{} cannot carry {}",
                    id, outer.id
                )));
            }
        }
        let data = if data.is_empty() {
            id.template()
        } else {
            let len = id.wire_len(data)?;
            if len != data.len() {
                return Err(FwdError::invalid_argument(format!(
                    "{} header is {} bytes, got {}",
                    id,
                    len,
                    data.len()
                )));
            }
            data.to_vec()
        };
        let mut header = Header::new(id, data);
        header.fixup = true;
        self.headers.insert(0, header);
        self.start = id;
        Ok(())
    }

    /// Pops the outermost header, which must be `id`.
    pub fn decap(&mut self, id: HeaderId) -> Result<()> {
        match self.headers.first() {
            Some(outer) if outer.id == id => {
                self.headers.remove(0);
                self.start = self.headers.first().map(|h| h.id).unwrap_or(HeaderId::Opaque);
                Ok(())
            }
            Some(outer) => Err(FwdError::invalid_argument(format!(
                "outermost header is {}, not {}",
                outer.id, id
            ))),
            None => Err(FwdError::invalid_argument("packet has no headers")),
        }
    }

    /// Rebuilds the wire image, prepends `prepend` and re-parses from
    /// `start`. Only the `preserve` fields carry over from the old
    /// metadata; headers created by the prepend get length fixups.
    pub fn reparse(&mut self, start: HeaderId, preserve: &[FieldId], prepend: &[u8]) -> Result<()> {
        let saved = self.save(preserve);
        let mut bytes = Vec::with_capacity(prepend.len() + self.length());
        bytes.extend_from_slice(prepend);
        bytes.extend_from_slice(&self.frame());

        let mut fresh = Packet::parse(start, &bytes)?;
        let mut offset = 0;
        for header in fresh.headers.iter_mut() {
            if offset < prepend.len() {
                header.fixup = true;
            }
            offset += header.data.len();
        }
        fresh.attributes = std::mem::take(&mut self.attributes);
        fresh.trace = self.trace;
        fresh.log = std::mem::take(&mut self.log);
        fresh.restore(saved);
        *self = fresh;
        Ok(())
    }

    /// Produces an independent copy of the rebuilt packet carrying the
    /// `preserve` fields and the input port.
    pub fn mirror(&self, preserve: &[FieldId]) -> Result<Packet> {
        let mut fields = preserve.to_vec();
        fields.push(FieldId::new(FieldNum::PacketPortInput));
        let saved = self.save(&fields);
        let mut copy = Packet::parse(self.start, &self.frame())?;
        copy.attributes = self.attributes.clone();
        copy.trace = self.trace;
        copy.restore(saved);
        Ok(copy)
    }

    /// Metadata value as stored, or zeroes if unset.
    fn metadata(&self, num: FieldNum, instance: u8) -> Vec<u8> {
        if num == FieldNum::PacketLength {
            return from_u128(self.length() as u128, num.size());
        }
        self.metadata
            .get(&(num, instance))
            .cloned()
            .unwrap_or_else(|| vec![0; num.size()])
    }

    /// Returns true if the metadata field has been written.
    pub fn has_metadata(&self, num: FieldNum) -> bool {
        self.metadata.contains_key(&(num, 0))
    }

    /// Reads a metadata field as a u64 (NIDs and other ids).
    pub fn metadata_u64(&self, num: FieldNum) -> u64 {
        to_u128(&self.metadata(num, 0)) as u64
    }

    /// Writes a u64 metadata field.
    pub fn set_metadata_u64(&mut self, num: FieldNum, value: u64) {
        self.metadata
            .insert((num, 0), from_u128(u128::from(value), num.size()));
    }

    /// Clears a metadata field back to unset.
    pub fn clear_metadata(&mut self, num: FieldNum) {
        self.metadata.remove(&(num, 0));
    }

    fn save(&self, fields: &[FieldId]) -> Vec<(FieldId, Vec<u8>)> {
        fields
            .iter()
            .filter(|f| !f.is_metadata() || self.metadata_set(f))
            .filter_map(|f| self.field(f).ok().map(|v| (*f, v)))
            .collect()
    }

    fn restore(&mut self, saved: Vec<(FieldId, Vec<u8>)>) {
        for (field, value) in saved {
            // A header field may not exist after re-parsing.
            let _ = self.update(&field, UpdateOp::Set, &value);
        }
    }

    fn metadata_set(&self, id: &FieldId) -> bool {
        match id {
            FieldId::Known { num, instance } => self.metadata.contains_key(&(*num, *instance)),
            FieldId::Udf { .. } => false,
        }
    }

    fn store(&mut self, id: &FieldId, value: Vec<u8>) -> Result<()> {
        match *id {
            FieldId::Known {
                num: FieldNum::PacketLength,
                ..
            } => Err(FwdError::invalid_argument("PACKET_LENGTH is read-only")),
            FieldId::Known { num, instance } if num.is_metadata() => {
                self.metadata.insert((num, instance), value);
                Ok(())
            }
            FieldId::Known { num, instance } => {
                let (idx, off, len) = self.locate(num, instance)?;
                let header = &mut self.headers[idx];
                write_bits(&mut header.data, off, len, to_u128(&value));
                header.dirty = true;
                Ok(())
            }
            FieldId::Udf { group, .. } => {
                let (idx, start, size) = self.udf_location(id)?;
                let target = match (group, idx) {
                    (HeaderGroup::Payload, _) | (_, None) => &mut self.payload[start..start + size],
                    (_, Some(i)) => {
                        self.headers[i].dirty = true;
                        &mut self.headers[i].data[start..start + size]
                    }
                };
                target.copy_from_slice(&value);
                Ok(())
            }
        }
    }

    fn width_bits(&self, id: &FieldId) -> Result<usize> {
        match *id {
            FieldId::Known { num, instance } if !num.is_metadata() => {
                self.locate(num, instance).map(|(_, _, len)| len)
            }
            _ => Ok(id.size() * 8),
        }
    }

    /// Finds (header index, bit offset, bit width) of a header field.
    fn locate(&self, num: FieldNum, instance: u8) -> Result<(usize, usize, usize)> {
        let missing = || FwdError::not_found(format!("{} not present", FieldId::with_instance(num, instance)));
        let instance = usize::from(instance);
        if num == FieldNum::EtherType {
            // The type that counts is the one at the end of the L2 run.
            let mut idx = self
                .headers
                .iter()
                .enumerate()
                .filter(|(_, h)| h.id == HeaderId::Ethernet)
                .nth(instance)
                .map(|(i, _)| i)
                .ok_or_else(missing)?;
            while self.headers.get(idx + 1).map(|h| h.id) == Some(HeaderId::Vlan) {
                idx += 1;
            }
            let (off, len) = self.headers[idx].id.layout(num).ok_or_else(missing)?;
            return Ok((idx, off, len));
        }
        self.headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| h.id.layout(num).map(|(off, len)| (i, off, len)))
            .nth(instance)
            .ok_or_else(missing)
    }

    /// (header index or None for payload, byte offset, size) of a UDF.
    fn udf_location(&self, id: &FieldId) -> Result<(Option<usize>, usize, usize)> {
        let FieldId::Udf {
            group,
            offset,
            size,
            instance,
        } = *id
        else {
            return Err(FwdError::internal("not a user-defined field"));
        };
        let (offset, size) = (usize::from(offset), usize::from(size));
        let missing = || FwdError::not_found(format!("{} not present", id));
        let (idx, len) = if group == HeaderGroup::Payload {
            if instance != 0 {
                return Err(missing());
            }
            (None, self.payload.len())
        } else {
            let i = self
                .headers
                .iter()
                .enumerate()
                .filter(|(_, h)| h.id.group() == group)
                .nth(usize::from(instance))
                .map(|(i, _)| i)
                .ok_or_else(missing)?;
            (Some(i), self.headers[i].data.len())
        };
        if offset + size > len {
            return Err(missing());
        }
        Ok((idx, offset, size))
    }

    fn udf_slice(&self, id: &FieldId) -> Result<(&[u8], std::ops::Range<usize>)> {
        let (idx, start, size) = self.udf_location(id)?;
        let bytes = match idx {
            Some(i) => &self.headers[i].data[..],
            None => &self.payload[..],
        };
        Ok((bytes, start..start + size))
    }
}

fn mask_bits(value: u128, bits: usize) -> u128 {
    if bits >= 128 {
        value
    } else {
        value & ((1u128 << bits) - 1)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Ethernet + IPv4 + UDP with a short payload.
    pub(crate) fn udp4_frame() -> Vec<u8> {
        let mut f = vec![
            0x02, 0, 0, 0, 0, 0x02, // dst
            0x02, 0, 0, 0, 0, 0x01, // src
            0x08, 0x00,
        ];
        let mut ip = HeaderId::Ipv4.template();
        ip[9] = IPPROTO_UDP;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
        f.extend_from_slice(&ip);
        f.extend_from_slice(&[0x30, 0x39, 0x00, 0x35, 0, 12, 0, 0]);
        f.extend_from_slice(b"ping");
        f
    }

    /// Ethernet + IPv6 carrying raw payload (next header 59).
    pub(crate) fn ip6_frame(hop: u8) -> Vec<u8> {
        let mut f = vec![0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0, 0, 0, 0, 0, 1, 0x86, 0xdd];
        let mut ip = HeaderId::Ipv6.template();
        ip[5] = 11;
        ip[6] = 59;
        ip[7] = hop;
        ip[8..24].copy_from_slice(&"2003::9".parse::<std::net::Ipv6Addr>().unwrap().octets());
        ip[24..40].copy_from_slice(&"2003::10".parse::<std::net::Ipv6Addr>().unwrap().octets());
        f.extend_from_slice(&ip);
        f.extend_from_slice(b"hello world");
        f
    }

    #[test]
    fn test_parse_udp4() {
        let pkt = Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap();
        assert_eq!(
            pkt.header_ids(),
            vec![HeaderId::Ethernet, HeaderId::Ipv4, HeaderId::Udp]
        );
        assert_eq!(pkt.payload(), b"ping");
        assert_eq!(pkt.length(), udp4_frame().len());
        assert_eq!(pkt.frame(), udp4_frame());
    }

    #[test]
    fn test_field_canonical_padding() {
        let pkt = Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap();
        let dst = pkt.field(&FieldNum::IpAddrDst.into()).unwrap();
        assert_eq!(dst.len(), 16);
        assert_eq!(&dst[12..], &[10, 0, 0, 2]);
        assert_eq!(pkt.field(&FieldNum::L4PortDst.into()).unwrap(), vec![0, 53]);
        assert_eq!(pkt.field(&FieldNum::IpVersion.into()).unwrap(), vec![4]);
        assert_eq!(pkt.field(&FieldNum::EtherType.into()).unwrap(), vec![0x08, 0x00]);
    }

    #[test]
    fn test_missing_header_field_is_error() {
        let pkt = Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap();
        assert!(pkt.field(&FieldNum::TcpFlags.into()).unwrap_err().is_not_found());
        assert!(pkt
            .field(&FieldId::with_instance(FieldNum::IpAddrDst, 1))
            .is_err());
    }

    #[test]
    fn test_unset_metadata_reads_zero() {
        let pkt = Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap();
        assert_eq!(pkt.field(&FieldNum::PacketVrf.into()).unwrap(), vec![0; 8]);
        assert_eq!(
            pkt.field_u128(&FieldNum::PacketLength.into()).unwrap(),
            udp4_frame().len() as u128
        );
    }

    #[test]
    fn test_hop_decrement_and_underflow() {
        let mut pkt = Packet::parse(HeaderId::Ethernet, &ip6_frame(1)).unwrap();
        let hop = FieldId::new(FieldNum::IpHop);
        pkt.update(&hop, UpdateOp::Dec, &[1]).unwrap();
        assert_eq!(pkt.field(&hop).unwrap(), vec![0]);
        assert!(pkt.update(&hop, UpdateOp::Dec, &[1]).is_err());
    }

    #[test]
    fn test_ipv4_checksum_refreshed_after_mutation() {
        let mut pkt = Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap();
        pkt.update(&FieldNum::IpHop.into(), UpdateOp::Dec, &[1]).unwrap();
        let frame = pkt.frame();
        let ip = &frame[14..34];
        assert_eq!(ip[8], 63);
        assert_eq!(internet_checksum(ip), 0);
    }

    #[test]
    fn test_inc_wraps_within_field_width() {
        let mut pkt = Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap();
        let port = FieldId::new(FieldNum::L4PortSrc);
        pkt.update(&port, UpdateOp::Set, &[0xff, 0xff]).unwrap();
        pkt.update(&port, UpdateOp::Inc, &[2]).unwrap();
        assert_eq!(pkt.field(&port).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_vlan_ether_type() {
        let mut frame = udp4_frame();
        frame.splice(12..12, [0x81, 0x00, 0x00, 0x64]);
        let pkt = Packet::parse(HeaderId::Ethernet, &frame).unwrap();
        assert_eq!(pkt.header_ids()[1], HeaderId::Vlan);
        assert_eq!(pkt.field(&FieldNum::VlanTag.into()).unwrap(), vec![0, 100]);
        assert_eq!(pkt.field(&FieldNum::EtherType.into()).unwrap(), vec![0x08, 0x00]);
    }

    #[test]
    fn test_udf_access() {
        let mut pkt = Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap();
        let udf = FieldId::udf(HeaderGroup::L4, 2, 2, 0);
        assert_eq!(pkt.field(&udf).unwrap(), vec![0, 53]);
        pkt.update(&udf, UpdateOp::Set, &[0x12, 0x34]).unwrap();
        assert_eq!(pkt.field(&FieldNum::L4PortDst.into()).unwrap(), vec![0x12, 0x34]);
        let payload = FieldId::udf(HeaderGroup::Payload, 0, 4, 0);
        assert_eq!(pkt.field(&payload).unwrap(), b"ping".to_vec());
        assert!(pkt.field(&FieldId::udf(HeaderGroup::Payload, 2, 4, 0)).is_err());
    }

    #[test]
    fn test_decap_requires_outermost() {
        let mut pkt = Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap();
        assert!(pkt.decap(HeaderId::Ipv4).is_err());
        pkt.decap(HeaderId::Ethernet).unwrap();
        assert_eq!(pkt.start_header(), HeaderId::Ipv4);
    }

    #[test]
    fn test_encap_checks_parent() {
        let mut pkt = Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap();
        assert!(pkt.encap(HeaderId::Udp, &[]).is_err());
        pkt.decap(HeaderId::Ethernet).unwrap();
        pkt.encap(HeaderId::Ipv6, &[]).unwrap();
        let frame = pkt.frame();
        // Payload length and next header are fixed up.
        assert_eq!(u16::from_be_bytes([frame[4], frame[5]]) as usize, frame.len() - 40);
        assert_eq!(frame[6], IPPROTO_IPIP);
    }

    #[test]
    fn test_trace_log_only_when_enabled() {
        let mut pkt = Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap();
        pkt.log(|| "ignored".to_string());
        assert!(pkt.log_lines().is_empty());
        let mut attrs = HashMap::new();
        attrs.insert(ATTR_TRACE.to_string(), "true".to_string());
        pkt.set_attributes(attrs);
        pkt.log(|| "kept".to_string());
        assert_eq!(pkt.log_lines(), &["kept".to_string()]);
    }
}
