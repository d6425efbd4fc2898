//! Host interface ports: a logical attachment to another port. Packets
//! written to a hostif leave through the attached port's output path.

use super::{output, Port, PortBuilder, PortConfig, PortDriver};
use crate::context::Context;
use crate::error::{FwdError, Result};
use crate::packet::Packet;
use std::sync::Arc;

struct HostifDriver {
    attached: String,
}

impl PortDriver for HostifDriver {
    fn write(&self, port: &Port, pkt: Packet) -> Result<()> {
        let ctx = port
            .context()
            .ok_or_else(|| FwdError::failed_precondition("context is gone"))?;
        let target = ctx.port(&self.attached)?;
        output(&ctx, &target, pkt);
        Ok(())
    }

    fn link_up(&self, ctx: &Context) -> bool {
        ctx.port(&self.attached)
            .map(|p| p.oper_state().is_up())
            .unwrap_or(false)
    }

    fn describe(&self) -> String {
        format!("attached to {}", self.attached)
    }
}

pub(super) struct HostifBuilder;

impl PortBuilder for HostifBuilder {
    fn build(&self, ctx: &Arc<Context>, id: &str, config: &PortConfig) -> Result<Box<dyn PortDriver>> {
        let PortConfig::Hostif { port } = config else {
            return Err(FwdError::invalid_argument("hostif builder given a non-hostif config"));
        };
        if port == id {
            return Err(FwdError::invalid_argument(format!("hostif {} attached to itself", id)));
        }
        ctx.port(port)?;
        Ok(Box::new(HostifDriver {
            attached: port.clone(),
        }))
    }
}
