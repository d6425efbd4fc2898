//! Front-panel ports.
//!
//! A SAI port is a kernel port in the switch context, bound to the host
//! device of its first hardware lane and running the switch pipeline.

use crate::attr::{AttrValue, AttributeRequest, SaiAttribute};
use crate::error::{SaiError, SaiResult};
use crate::pipeline;
use crate::sai_attributes;
use crate::switch::Switch;
use crate::types::{LagOid, PortOid};
use tracing::info;
use vdp_fwd::{CounterId, CounterValue, PortConfig, PortDesc};
use vdp_types::{AdminState, OperState};

/// Port speed in Mbps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortSpeed(u32);

impl PortSpeed {
    /// 1 Gigabit Ethernet
    pub const GE_1: Self = PortSpeed(1_000);
    /// 10 Gigabit Ethernet
    pub const GE_10: Self = PortSpeed(10_000);
    /// 25 Gigabit Ethernet
    pub const GE_25: Self = PortSpeed(25_000);
    /// 40 Gigabit Ethernet
    pub const GE_40: Self = PortSpeed(40_000);
    /// 50 Gigabit Ethernet
    pub const GE_50: Self = PortSpeed(50_000);
    /// 100 Gigabit Ethernet
    pub const GE_100: Self = PortSpeed(100_000);
    /// 400 Gigabit Ethernet
    pub const GE_400: Self = PortSpeed(400_000);

    pub const fn from_mbps(mbps: u32) -> Self {
        PortSpeed(mbps)
    }

    pub const fn as_mbps(&self) -> u32 {
        self.0
    }

    pub const fn as_gbps(&self) -> u32 {
        self.0 / 1_000
    }
}

impl From<PortSpeed> for AttrValue {
    fn from(v: PortSpeed) -> Self {
        AttrValue::U32(v.as_mbps())
    }
}

/// Forward Error Correction (FEC) mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FecMode {
    #[default]
    None,
    /// Reed-Solomon
    Rs,
    /// Fire Code
    Fc,
    Auto,
}

impl From<FecMode> for AttrValue {
    fn from(v: FecMode) -> Self {
        AttrValue::I32(match v {
            FecMode::None => 0,
            FecMode::Rs => 1,
            FecMode::Fc => 2,
            FecMode::Auto => 3,
        })
    }
}

/// Port operational status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PortOperStatus {
    Unknown,
    Up,
    #[default]
    Down,
    Testing,
    NotPresent,
}

impl From<OperState> for PortOperStatus {
    fn from(v: OperState) -> Self {
        match v {
            OperState::Up => PortOperStatus::Up,
            OperState::Down => PortOperStatus::Down,
        }
    }
}

impl From<PortOperStatus> for AttrValue {
    fn from(v: PortOperStatus) -> Self {
        AttrValue::I32(match v {
            PortOperStatus::Unknown => 0,
            PortOperStatus::Up => 1,
            PortOperStatus::Down => 2,
            PortOperStatus::Testing => 3,
            PortOperStatus::NotPresent => 4,
        })
    }
}

/// Port creation request. Lanes and speed are mandatory.
#[derive(Debug, Clone, Default)]
pub struct PortRequest {
    pub hw_lanes: Option<Vec<u32>>,
    pub speed: Option<PortSpeed>,
    pub admin_state: Option<bool>,
    pub mtu: Option<u32>,
    pub fec_mode: Option<FecMode>,
}

sai_attributes! {
    /// Port attributes.
    pub enum PortAttr: Port for PortRequest {
        OperStatus = 1, "SAI_PORT_ATTR_OPER_STATUS";
        HwLaneList = 29, "SAI_PORT_ATTR_HW_LANE_LIST" => hw_lanes;
        Speed = 30, "SAI_PORT_ATTR_SPEED" => speed;
        FecMode = 36, "SAI_PORT_ATTR_FEC_MODE" => fec_mode, default FecMode::None;
        AdminState = 42, "SAI_PORT_ATTR_ADMIN_STATE" => admin_state, default false;
        Mtu = 43, "SAI_PORT_ATTR_MTU" => mtu, default 1514u32;
    }
}

/// Port statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortStat {
    IfInOctets,
    IfInUcastPkts,
    IfInNonUcastPkts,
    IfInDiscards,
    IfInErrors,
    IfOutOctets,
    IfOutUcastPkts,
    IfOutNonUcastPkts,
    IfOutDiscards,
    IfOutErrors,
    InPkts,
    OutPkts,
}

impl PortStat {
    pub const ALL: [PortStat; 12] = [
        PortStat::IfInOctets,
        PortStat::IfInUcastPkts,
        PortStat::IfInNonUcastPkts,
        PortStat::IfInDiscards,
        PortStat::IfInErrors,
        PortStat::IfOutOctets,
        PortStat::IfOutUcastPkts,
        PortStat::IfOutNonUcastPkts,
        PortStat::IfOutDiscards,
        PortStat::IfOutErrors,
        PortStat::InPkts,
        PortStat::OutPkts,
    ];

    /// Value of this statistic given a port's counter set.
    fn compute(&self, counters: &[(CounterId, CounterValue)]) -> u64 {
        let get = |id: CounterId| {
            counters
                .iter()
                .find(|(c, _)| *c == id)
                .map(|(_, v)| *v)
                .unwrap_or_default()
        };
        match self {
            PortStat::IfInOctets => get(CounterId::RxPackets).octets,
            PortStat::IfInUcastPkts => get(CounterId::RxUnicast).packets,
            PortStat::IfInNonUcastPkts => get(CounterId::RxNonUnicast).packets,
            PortStat::IfInDiscards => get(CounterId::RxDrop).packets + get(CounterId::RxAdminDrop).packets,
            PortStat::IfInErrors => get(CounterId::RxError).packets + get(CounterId::RxBadPackets).packets,
            PortStat::IfOutOctets => get(CounterId::TxPackets).octets,
            PortStat::IfOutUcastPkts => get(CounterId::TxUnicast).packets,
            PortStat::IfOutNonUcastPkts => get(CounterId::TxNonUnicast).packets,
            PortStat::IfOutDiscards => get(CounterId::TxDrop).packets + get(CounterId::TxAdminDrop).packets,
            PortStat::IfOutErrors => get(CounterId::TxError).packets,
            PortStat::InPkts => get(CounterId::RxUnicast).packets + get(CounterId::RxNonUnicast).packets,
            PortStat::OutPkts => get(CounterId::TxUnicast).packets + get(CounterId::TxNonUnicast).packets,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PortRecord {
    /// Forwarding port id.
    pub fwd: String,
    pub lanes: Vec<u32>,
    pub lag: Option<LagOid>,
}

/// Port API.
pub struct PortApi<'a> {
    switch: &'a Switch,
}

impl<'a> PortApi<'a> {
    pub(crate) fn new(switch: &'a Switch) -> Self {
        Self { switch }
    }

    fn validate_mtu(mtu: u32) -> SaiResult<()> {
        if !(64..=16383).contains(&mtu) {
            return Err(SaiError::invalid_parameter(format!(
                "invalid MTU: {} (must be 64-16383)",
                mtu
            )));
        }
        Ok(())
    }

    /// Creates a port on the host device of its first lane.
    ///
    /// # Errors
    ///
    /// Lanes and speed are mandatory; a lane already used by another port
    /// is rejected.
    pub fn create_port(&self, request: &PortRequest) -> SaiResult<PortOid> {
        let lanes = request
            .hw_lanes
            .clone()
            .ok_or_else(|| SaiError::missing(PortAttr::HwLaneList.name()))?;
        if lanes.is_empty() {
            return Err(SaiError::invalid_parameter("lanes cannot be empty"));
        }
        let speed = request.speed.ok_or_else(|| SaiError::missing(PortAttr::Speed.name()))?;
        if speed.as_mbps() == 0 {
            return Err(SaiError::invalid_parameter("speed cannot be zero"));
        }
        if let Some(mtu) = request.mtu {
            Self::validate_mtu(mtu)?;
        }

        let sw = self.switch;
        let mut state = sw.lock();
        if let Some((other, _)) = state
            .ports
            .iter()
            .find(|(_, p)| p.lanes.iter().any(|l| lanes.contains(l)))
        {
            return Err(SaiError::already_exists(format!("lanes {:?} in use by port {}", lanes, other)));
        }

        let device = sw.config().device_for(lanes[0]);
        let admin = AdminState::from(request.admin_state.unwrap_or(false));
        sw.engine().port_create(
            sw.context(),
            PortDesc::new(device.clone(), PortConfig::Kernel { device: device.clone() })
                .with_input(pipeline::input_actions())
                .with_output(pipeline::output_actions())
                .with_admin(admin),
        )?;

        let oid = sw.alloc();
        state.ports.insert(
            oid,
            PortRecord {
                fwd: device.clone(),
                lanes,
                lag: None,
            },
        );
        sw.port_index().insert(device.clone(), oid);
        sw.attributes().store(oid.as_raw(), request.attributes());
        info!(port = %oid, device = %device, speed = speed.as_mbps(), "port created");
        Ok(oid)
    }

    /// Removes a port.
    ///
    /// # Errors
    ///
    /// Fails while the port is referenced (router interface, LAG member,
    /// hostif) and for the CPU port.
    pub fn remove_port(&self, port: PortOid) -> SaiResult<()> {
        let sw = self.switch;
        if port == sw.defaults().cpu_port {
            return Err(SaiError::invalid_parameter("the CPU port cannot be removed"));
        }
        let mut state = sw.lock();
        let record = state
            .ports
            .get(&port)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("port {}", port)))?;
        state.ensure_unused(port.as_raw())?;
        if let Some(lag) = record.lag {
            return Err(SaiError::object_in_use(format!("port {} is a member of LAG {}", port, lag)));
        }
        sw.engine().object_delete(sw.context(), &record.fwd)?;
        state.ports.remove(&port);
        sw.port_index().remove(&record.fwd);
        sw.attributes().remove(port.as_raw());
        info!(port = %port, "port removed");
        Ok(())
    }

    fn fwd(&self, port: PortOid) -> SaiResult<String> {
        self.switch
            .lock()
            .ports
            .get(&port)
            .map(|p| p.fwd.clone())
            .ok_or_else(|| SaiError::not_found(format!("port {}", port)))
    }

    /// Sets the administrative state of a port.
    pub fn set_admin_state(&self, port: PortOid, up: bool) -> SaiResult<()> {
        let sw = self.switch;
        let fwd = self.fwd(port)?;
        sw.engine().port_state(sw.context(), &fwd, Some(AdminState::from(up)))?;
        sw.attributes().set(port.as_raw(), PortAttr::AdminState.id(), up.into());
        Ok(())
    }

    pub fn get_admin_state(&self, port: PortOid) -> SaiResult<bool> {
        let sw = self.switch;
        let fwd = self.fwd(port)?;
        Ok(sw.engine().port_state(sw.context(), &fwd, None)?.admin.is_up())
    }

    pub fn get_oper_status(&self, port: PortOid) -> SaiResult<PortOperStatus> {
        let sw = self.switch;
        let fwd = self.fwd(port)?;
        Ok(sw.engine().port_state(sw.context(), &fwd, None)?.oper.into())
    }

    pub fn set_speed(&self, port: PortOid, speed: PortSpeed) -> SaiResult<()> {
        self.fwd(port)?;
        if speed.as_mbps() == 0 || speed.as_mbps() > 800_000 {
            return Err(SaiError::invalid_parameter(format!(
                "invalid speed: {} Mbps",
                speed.as_mbps()
            )));
        }
        self.switch
            .attributes()
            .set(port.as_raw(), PortAttr::Speed.id(), speed.into());
        Ok(())
    }

    pub fn set_fec_mode(&self, port: PortOid, fec: FecMode) -> SaiResult<()> {
        self.fwd(port)?;
        self.switch
            .attributes()
            .set(port.as_raw(), PortAttr::FecMode.id(), fec.into());
        Ok(())
    }

    pub fn set_mtu(&self, port: PortOid, mtu: u32) -> SaiResult<()> {
        self.fwd(port)?;
        Self::validate_mtu(mtu)?;
        self.switch
            .attributes()
            .set(port.as_raw(), PortAttr::Mtu.id(), mtu.into());
        Ok(())
    }

    /// Reads port attributes. Oper status and admin state come from the
    /// forwarding port.
    pub fn get_attributes(&self, port: PortOid, attrs: &[PortAttr]) -> SaiResult<Vec<(PortAttr, AttrValue)>> {
        let sw = self.switch;
        let fwd = self.fwd(port)?;
        let status = sw.engine().port_state(sw.context(), &fwd, None)?;
        let mut out = sw.attributes().read(port.as_raw(), attrs)?;
        out.retain(|(a, _)| !matches!(a, PortAttr::OperStatus | PortAttr::AdminState));
        for attr in attrs {
            match attr {
                PortAttr::OperStatus => out.push((*attr, PortOperStatus::from(status.oper).into())),
                PortAttr::AdminState => out.push((*attr, status.admin.is_up().into())),
                _ => {}
            }
        }
        Ok(out)
    }

    /// Reads port statistics from the forwarding port's counters.
    pub fn get_stats(&self, port: PortOid, stats: &[PortStat]) -> SaiResult<Vec<(PortStat, u64)>> {
        let sw = self.switch;
        let fwd = self.fwd(port)?;
        let counters = sw.engine().object_counters(sw.context(), &fwd)?;
        Ok(stats.iter().map(|s| (*s, s.compute(&counters))).collect())
    }

    /// Every port except the CPU port, in creation order.
    pub fn ports(&self) -> Vec<PortOid> {
        let cpu = self.switch.defaults().cpu_port;
        let mut ports: Vec<PortOid> = self.switch.lock().ports.keys().copied().filter(|p| *p != cpu).collect();
        ports.sort();
        ports
    }
}
