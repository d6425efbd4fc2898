//! LAGs as aggregate ports.
//!
//! Each LAG is an aggregate port hashing CRC32 over the IP addresses and
//! L4 ports. A member port stamps the LAG's NID as its input port, so
//! router interfaces and ACLs bound to the LAG see traffic from every
//! member. The LAG runs the egress pipeline; members only transmit.

use crate::attr::{AttrValue, AttributeRequest, SaiAttribute};
use crate::error::{SaiError, SaiResult};
use crate::pipeline;
use crate::sai_attributes;
use crate::switch::Switch;
use crate::types::{LagMemberOid, LagOid, PortOid};
use std::collections::BTreeSet;
use tracing::info;
use vdp_fwd::{
    Action, AggregateConfig, AggregateMember, FieldId, FieldNum, HashAlgorithm, PortConfig, PortDesc, PortUpdate,
};

/// Fields a LAG hashes to pick a member.
pub const LAG_HASH_FIELDS: [FieldNum; 4] = [
    FieldNum::IpAddrSrc,
    FieldNum::IpAddrDst,
    FieldNum::L4PortSrc,
    FieldNum::L4PortDst,
];

#[derive(Debug, Clone, Default)]
pub struct LagRequest {}

sai_attributes! {
    pub enum LagAttr: Lag for LagRequest {
        PortList = 0, "SAI_LAG_ATTR_PORT_LIST";
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LagRecord {
    pub fwd: String,
    pub members: BTreeSet<LagMemberOid>,
}

#[derive(Debug, Clone, Default)]
pub struct LagMemberRequest {
    pub lag_id: Option<LagOid>,
    pub port_id: Option<PortOid>,
    pub egress_disable: Option<bool>,
    pub ingress_disable: Option<bool>,
}

sai_attributes! {
    pub enum LagMemberAttr: LagMember for LagMemberRequest {
        LagId = 0, "SAI_LAG_MEMBER_ATTR_LAG_ID" => lag_id;
        PortId = 1, "SAI_LAG_MEMBER_ATTR_PORT_ID" => port_id;
        EgressDisable = 2, "SAI_LAG_MEMBER_ATTR_EGRESS_DISABLE" => egress_disable, default false;
        IngressDisable = 3, "SAI_LAG_MEMBER_ATTR_INGRESS_DISABLE" => ingress_disable, default false;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LagMemberRecord {
    pub lag: LagOid,
    pub port: PortOid,
    pub egress: bool,
}

/// LAG API.
pub struct LagApi<'a> {
    switch: &'a Switch,
}

impl<'a> LagApi<'a> {
    pub(crate) fn new(switch: &'a Switch) -> Self {
        Self { switch }
    }

    pub fn create_lag(&self, request: &LagRequest) -> SaiResult<LagOid> {
        let sw = self.switch;
        let mut state = sw.lock();
        let oid: LagOid = sw.alloc();
        let fwd = format!("lag{}", oid.seq());
        let config = AggregateConfig {
            algorithm: HashAlgorithm::Crc32,
            hash_fields: LAG_HASH_FIELDS.iter().copied().map(FieldId::from).collect(),
            queue_len: sw.config().lag_queue_len,
            members: Vec::new(),
        };
        sw.engine().port_create(
            sw.context(),
            PortDesc::new(fwd.clone(), PortConfig::Aggregate(config))
                .with_input(pipeline::input_actions())
                .with_output(pipeline::output_actions()),
        )?;
        state.lags.insert(
            oid,
            LagRecord {
                fwd: fwd.clone(),
                members: BTreeSet::new(),
            },
        );
        sw.attributes().store(oid.as_raw(), request.attributes());
        info!(lag = %oid, port = %fwd, "LAG created");
        Ok(oid)
    }

    /// Removes a LAG. Members and users (router interfaces, hostifs) must
    /// be removed first.
    pub fn remove_lag(&self, lag: LagOid) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .lags
            .get(&lag)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("LAG {}", lag)))?;
        if !record.members.is_empty() {
            return Err(SaiError::object_in_use(format!(
                "LAG {} has {} members",
                lag,
                record.members.len()
            )));
        }
        state.ensure_unused(lag.as_raw())?;
        sw.engine().object_delete(sw.context(), &record.fwd)?;
        state.lags.remove(&lag);
        sw.attributes().remove(lag.as_raw());
        info!(lag = %lag, "LAG removed");
        Ok(())
    }

    /// Reads LAG attributes; the port list is live.
    pub fn get_lag_attributes(&self, lag: LagOid, attrs: &[LagAttr]) -> SaiResult<Vec<(LagAttr, AttrValue)>> {
        let sw = self.switch;
        let state = sw.lock();
        let record = state
            .lags
            .get(&lag)
            .ok_or_else(|| SaiError::not_found(format!("LAG {}", lag)))?;
        let ports: Vec<PortOid> = record
            .members
            .iter()
            .filter_map(|m| state.lag_members.get(m).map(|r| r.port))
            .collect();
        Ok(attrs
            .iter()
            .map(|attr| match attr {
                LagAttr::PortList => (*attr, ports.clone().into()),
            })
            .collect())
    }

    /// Adds a port to a LAG.
    ///
    /// # Errors
    ///
    /// The port must not already be in a LAG or carry a router interface.
    pub fn create_lag_member(&self, request: &LagMemberRequest) -> SaiResult<LagMemberOid> {
        let sw = self.switch;
        let lag = request
            .lag_id
            .ok_or_else(|| SaiError::missing(LagMemberAttr::LagId.name()))?;
        let port = request
            .port_id
            .ok_or_else(|| SaiError::missing(LagMemberAttr::PortId.name()))?;
        if port == sw.defaults().cpu_port {
            return Err(SaiError::invalid_parameter("the CPU port cannot join a LAG"));
        }
        let egress = !request.egress_disable.unwrap_or(false);

        let mut state = sw.lock();
        let lag_fwd = state
            .lags
            .get(&lag)
            .map(|l| l.fwd.clone())
            .ok_or_else(|| SaiError::not_found(format!("LAG {}", lag)))?;
        let record = state
            .ports
            .get(&port)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("port {}", port)))?;
        if let Some(other) = record.lag {
            return Err(SaiError::already_exists(format!("port {} is a member of LAG {}", port, other)));
        }
        if state
            .rifs
            .values()
            .any(|r| r.port.as_ref().is_some_and(|(raw, _)| *raw == port.as_raw()))
        {
            return Err(SaiError::invalid_parameter(format!("port {} has a router interface", port)));
        }

        let lag_nid = sw.nid(&lag_fwd)?;
        let mut input = vec![Action::set_u64(FieldNum::PacketPortInput, lag_nid)];
        input.extend(pipeline::input_actions());
        let engine = sw.engine();
        engine.port_update(sw.context(), &record.fwd, PortUpdate::InputActions(input))?;
        engine.port_update(sw.context(), &record.fwd, PortUpdate::OutputActions(Vec::new()))?;
        if egress {
            engine.port_update(
                sw.context(),
                &lag_fwd,
                PortUpdate::AggregateAdd(AggregateMember::new(record.fwd.clone())),
            )?;
        }

        let oid: LagMemberOid = sw.alloc();
        if let Some(p) = state.ports.get_mut(&port) {
            p.lag = Some(lag);
        }
        if let Some(l) = state.lags.get_mut(&lag) {
            l.members.insert(oid);
        }
        state.lag_members.insert(oid, LagMemberRecord { lag, port, egress });
        sw.attributes().store(oid.as_raw(), request.attributes());
        info!(lag = %lag, port = %port, member = %oid, egress, "LAG member added");
        Ok(oid)
    }

    /// Takes a port out of its LAG and restores its own pipeline.
    pub fn remove_lag_member(&self, member: LagMemberOid) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .lag_members
            .get(&member)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("LAG member {}", member)))?;
        let lag_fwd = state
            .lags
            .get(&record.lag)
            .map(|l| l.fwd.clone())
            .ok_or_else(|| SaiError::not_found(format!("LAG {}", record.lag)))?;
        let port_fwd = state
            .ports
            .get(&record.port)
            .map(|p| p.fwd.clone())
            .ok_or_else(|| SaiError::not_found(format!("port {}", record.port)))?;

        let engine = sw.engine();
        if record.egress {
            engine.port_update(sw.context(), &lag_fwd, PortUpdate::AggregateRemove(port_fwd.clone()))?;
        }
        engine.port_update(
            sw.context(),
            &port_fwd,
            PortUpdate::InputActions(pipeline::input_actions()),
        )?;
        engine.port_update(
            sw.context(),
            &port_fwd,
            PortUpdate::OutputActions(pipeline::output_actions()),
        )?;

        state.lag_members.remove(&member);
        if let Some(p) = state.ports.get_mut(&record.port) {
            p.lag = None;
        }
        if let Some(l) = state.lags.get_mut(&record.lag) {
            l.members.remove(&member);
        }
        sw.attributes().remove(member.as_raw());
        info!(lag = %record.lag, port = %record.port, "LAG member removed");
        Ok(())
    }

    /// Enables or disables transmission on a member.
    pub fn set_egress_disable(&self, member: LagMemberOid, disable: bool) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .lag_members
            .get(&member)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("LAG member {}", member)))?;
        let egress = !disable;
        if egress != record.egress {
            let lag_fwd = state.port_like(record.lag.as_raw())?;
            let port_fwd = state.port_like(record.port.as_raw())?;
            let update = if egress {
                PortUpdate::AggregateAdd(AggregateMember::new(port_fwd))
            } else {
                PortUpdate::AggregateRemove(port_fwd)
            };
            sw.engine().port_update(sw.context(), &lag_fwd, update)?;
            if let Some(m) = state.lag_members.get_mut(&member) {
                m.egress = egress;
            }
        }
        sw.attributes()
            .set(member.as_raw(), LagMemberAttr::EgressDisable.id(), disable.into());
        Ok(())
    }

    pub fn get_lag_member_attributes(
        &self,
        member: LagMemberOid,
        attrs: &[LagMemberAttr],
    ) -> SaiResult<Vec<(LagMemberAttr, AttrValue)>> {
        self.switch.attributes().read(member.as_raw(), attrs)
    }

    pub fn lags(&self) -> Vec<LagOid> {
        self.switch.lock().lags.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::port::{PortRequest, PortSpeed};
    use crate::switch::SwitchConfig;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use vdp_fwd::{Engine, InfoRequest, LoopbackLinks};

    fn switch() -> Switch {
        let engine = Arc::new(Engine::new(Arc::new(LoopbackLinks::new())));
        Switch::create(engine, SwitchConfig::default()).unwrap()
    }

    fn port(sw: &Switch, lane: u32) -> PortOid {
        sw.port_api()
            .create_port(&PortRequest {
                hw_lanes: Some(vec![lane]),
                speed: Some(PortSpeed::GE_10),
                admin_state: Some(true),
                ..Default::default()
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_lag_membership() {
        let sw = switch();
        let p1 = port(&sw, 1);
        let p2 = port(&sw, 2);
        let api = sw.lag_api();
        let lag = api.create_lag(&LagRequest::default()).unwrap();

        let m1 = api
            .create_lag_member(&LagMemberRequest {
                lag_id: Some(lag),
                port_id: Some(p1),
                ..Default::default()
            })
            .unwrap();
        let m2 = api
            .create_lag_member(&LagMemberRequest {
                lag_id: Some(lag),
                port_id: Some(p2),
                egress_disable: Some(true),
                ..Default::default()
            })
            .unwrap();
        let again = LagMemberRequest {
            lag_id: Some(lag),
            port_id: Some(p1),
            ..Default::default()
        };
        assert!(api.create_lag_member(&again).is_err());
        assert_eq!(
            api.get_lag_attributes(lag, &[LagAttr::PortList]).unwrap(),
            vec![(LagAttr::PortList, AttrValue::OidList(vec![p1.as_raw(), p2.as_raw()]))]
        );

        assert!(api.remove_lag(lag).is_err());
        assert!(sw.port_api().remove_port(p1).is_err());

        let fwd = format!("lag{}", lag.seq());
        let info = sw
            .engine()
            .info(sw.context(), InfoRequest::Get { id: fwd })
            .unwrap();
        assert!(info.lines.iter().any(|l| l.contains("eth1")));
        assert!(!info.lines.iter().any(|l| l.contains("eth2")));

        api.set_egress_disable(m2, false).unwrap();
        api.remove_lag_member(m1).unwrap();
        api.remove_lag_member(m2).unwrap();
        api.remove_lag(lag).unwrap();
        sw.port_api().remove_port(p1).unwrap();
        sw.shutdown().unwrap();
    }
}
