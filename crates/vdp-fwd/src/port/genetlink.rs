//! Generic-netlink ports: packets are punted to the packet sink tagged
//! with a netlink family and multicast group.

use super::cpu::{PuntAction, Punter};
use super::{Port, PortBuilder, PortConfig, PortDriver};
use crate::context::Context;
use crate::error::{FwdError, Result};
use crate::packet::Packet;
use std::sync::Arc;
use std::time::Duration;

const QUEUE_LEN: usize = 1024;
const WATCHDOG: Duration = Duration::from_secs(5);

struct GenetlinkDriver {
    family: String,
    group: String,
    punter: Punter,
}

impl PortDriver for GenetlinkDriver {
    fn write(&self, port: &Port, pkt: Packet) -> Result<()> {
        let action = PuntAction::Genetlink {
            family: self.family.clone(),
            group: self.group.clone(),
        };
        self.punter.punt(port, pkt, action)
    }

    fn start(&self, port: &Arc<Port>, ctx: &Arc<Context>) -> Result<()> {
        self.punter.start(port, ctx)
    }

    fn describe(&self) -> String {
        format!("family {} group {}", self.family, self.group)
    }
}

pub(super) struct GenetlinkBuilder;

impl PortBuilder for GenetlinkBuilder {
    fn build(&self, _ctx: &Arc<Context>, _id: &str, config: &PortConfig) -> Result<Box<dyn PortDriver>> {
        let PortConfig::Genetlink { family, group } = config else {
            return Err(FwdError::invalid_argument("genetlink builder given a non-genetlink config"));
        };
        if family.is_empty() {
            return Err(FwdError::invalid_argument("genetlink port needs a family"));
        }
        Ok(Box::new(GenetlinkDriver {
            family: family.clone(),
            group: group.clone(),
            punter: Punter::new(QUEUE_LEN, WATCHDOG, Vec::new()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::packet::tests::udp4_frame;
    use crate::packet::HeaderId;
    use crate::port::{input, ChannelSink, LoopbackLinks, PortBuilders, PortDesc};

    #[tokio::test]
    async fn test_sample_tagged_with_family_and_group() {
        let ctx = Context::new("gnl", Arc::new(LoopbackLinks::new()));
        let builders = PortBuilders::with_defaults();
        builders
            .create(
                &ctx,
                PortDesc::new(
                    "psample",
                    PortConfig::Genetlink {
                        family: "psample".into(),
                        group: "packets".into(),
                    },
                ),
            )
            .unwrap();
        let eth = builders
            .create(
                &ctx,
                PortDesc::new("eth1", PortConfig::Kernel { device: "eth1".into() })
                    .with_input(vec![Action::transmit("psample")]),
            )
            .unwrap();
        let (sink, mut rx) = ChannelSink::new();
        ctx.set_sink(Arc::new(sink));

        input(&ctx, &eth, Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap());
        let punt = rx.recv().await.unwrap();
        assert_eq!(
            punt.action,
            PuntAction::Genetlink {
                family: "psample".into(),
                group: "packets".into()
            }
        );
        assert_eq!(punt.output_port, "psample");
        ctx.stop();
    }
}
