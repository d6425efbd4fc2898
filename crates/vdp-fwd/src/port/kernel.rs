//! Kernel ports: frames exchanged with a host network device.
//!
//! Devices are reached through a [`LinkProvider`]. [`AfPacketLinks`] binds
//! raw `AF_PACKET` sockets; [`LoopbackLinks`] keeps everything in memory and
//! hands tests a [`LinkPeer`] for the far end of each device.

use super::{receive, spawn_worker, Port, PortBuilder, PortConfig, PortDriver};
use crate::context::Context;
use crate::error::{FwdError, Result};
use crate::packet::Packet;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, warn};

/// A host network device.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    fn device(&self) -> &str;

    /// Sends one frame without blocking.
    fn send(&self, frame: &[u8]) -> Result<()>;

    /// Receives the next frame. An error ends the reader.
    async fn recv(&self) -> Result<Vec<u8>>;

    /// Carrier state; `true` is up.
    fn state(&self) -> watch::Receiver<bool>;
}

/// Opens host network devices by name.
pub trait LinkProvider: Send + Sync {
    fn open(&self, device: &str) -> Result<Arc<dyn Link>>;
}

struct LoopbackLink {
    device: String,
    to_port: mpsc::UnboundedSender<Vec<u8>>,
    port_rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    from_port: mpsc::UnboundedSender<Vec<u8>>,
    peer_rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    state: watch::Sender<bool>,
}

impl LoopbackLink {
    fn new(device: &str) -> Self {
        let (to_port, port_rx) = mpsc::unbounded_channel();
        let (from_port, peer_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(true);
        Self {
            device: device.to_string(),
            to_port,
            port_rx: AsyncMutex::new(port_rx),
            from_port,
            peer_rx: AsyncMutex::new(peer_rx),
            state,
        }
    }
}

#[async_trait]
impl Link for LoopbackLink {
    fn device(&self) -> &str {
        &self.device
    }

    fn send(&self, frame: &[u8]) -> Result<()> {
        self.from_port
            .send(frame.to_vec())
            .map_err(|_| FwdError::internal(format!("{}: peer gone", self.device)))
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        self.port_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| FwdError::internal(format!("{}: link closed", self.device)))
    }

    fn state(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// In-memory devices. Opening a device twice yields the same link.
#[derive(Clone, Default)]
pub struct LoopbackLinks {
    links: Arc<DashMap<String, Arc<LoopbackLink>>>,
}

impl LoopbackLinks {
    pub fn new() -> Self {
        Self::default()
    }

    fn link(&self, device: &str) -> Arc<LoopbackLink> {
        self.links
            .entry(device.to_string())
            .or_insert_with(|| Arc::new(LoopbackLink::new(device)))
            .clone()
    }

    /// The far end of `device`, created on first use.
    pub fn peer(&self, device: &str) -> LinkPeer {
        LinkPeer {
            link: self.link(device),
        }
    }
}

impl LinkProvider for LoopbackLinks {
    fn open(&self, device: &str) -> Result<Arc<dyn Link>> {
        Ok(self.link(device))
    }
}

impl std::fmt::Debug for LoopbackLinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackLinks").field("devices", &self.links.len()).finish()
    }
}

/// Test-side handle of a loopback device.
#[derive(Clone)]
pub struct LinkPeer {
    link: Arc<LoopbackLink>,
}

impl LinkPeer {
    /// Delivers `frame` to the port reading the device.
    pub fn inject(&self, frame: impl Into<Vec<u8>>) {
        let _ = self.link.to_port.send(frame.into());
    }

    /// Waits for the next frame the port transmitted.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.link.peer_rx.lock().await.recv().await
    }

    /// A transmitted frame, if one is queued.
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.link.peer_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Every frame queued so far.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Raises or drops carrier.
    pub fn set_up(&self, up: bool) {
        self.link.state.send_replace(up);
    }
}

#[cfg(target_os = "linux")]
mod af_packet {
    use super::{Link, LinkProvider};
    use crate::error::{FwdError, Result};
    use async_trait::async_trait;
    use std::ffi::CString;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::sync::Arc;
    use tokio::io::unix::AsyncFd;
    use tokio::sync::watch;

    const MAX_FRAME: usize = 65536;

    /// Raw `AF_PACKET` sockets bound to host devices.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AfPacketLinks;

    impl AfPacketLinks {
        pub fn new() -> Self {
            Self
        }
    }

    impl LinkProvider for AfPacketLinks {
        fn open(&self, device: &str) -> Result<Arc<dyn Link>> {
            Ok(Arc::new(AfPacketLink::bind(device)?))
        }
    }

    struct AfPacketLink {
        device: String,
        fd: AsyncFd<OwnedFd>,
        state: watch::Sender<bool>,
    }

    fn carrier(device: &str) -> bool {
        std::fs::read_to_string(format!("/sys/class/net/{}/operstate", device))
            .map(|s| s.trim() != "down")
            .unwrap_or(true)
    }

    impl AfPacketLink {
        fn bind(device: &str) -> Result<Self> {
            let name = CString::new(device)
                .map_err(|_| FwdError::invalid_argument(format!("bad device name {:?}", device)))?;
            // SAFETY: plain libc calls; every return value is checked and the
            // descriptor is owned immediately after creation.
            let fd = unsafe {
                let raw = libc::socket(
                    libc::AF_PACKET,
                    libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                    i32::from((libc::ETH_P_ALL as u16).to_be()),
                );
                if raw < 0 {
                    return Err(std::io::Error::last_os_error().into());
                }
                OwnedFd::from_raw_fd(raw)
            };
            // SAFETY: `name` is NUL terminated.
            let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
            if ifindex == 0 {
                return Err(FwdError::not_found(format!("host device {}", device)));
            }
            let addr = libc::sockaddr_ll {
                sll_family: libc::AF_PACKET as u16,
                sll_protocol: (libc::ETH_P_ALL as u16).to_be(),
                sll_ifindex: ifindex as i32,
                sll_hatype: 0,
                sll_pkttype: 0,
                sll_halen: 0,
                sll_addr: [0; 8],
            };
            // SAFETY: `addr` outlives the call and the length matches its type.
            let ret = unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if ret < 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            let (state, _) = watch::channel(carrier(device));
            Ok(Self {
                device: device.to_string(),
                fd: AsyncFd::new(fd)?,
                state,
            })
        }
    }

    #[async_trait]
    impl Link for AfPacketLink {
        fn device(&self) -> &str {
            &self.device
        }

        fn send(&self, frame: &[u8]) -> Result<()> {
            // SAFETY: `frame` is valid for `frame.len()` bytes.
            let n = unsafe {
                libc::send(
                    self.fd.get_ref().as_raw_fd(),
                    frame.as_ptr() as *const libc::c_void,
                    frame.len(),
                    0,
                )
            };
            if n < 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            Ok(())
        }

        async fn recv(&self) -> Result<Vec<u8>> {
            let mut buf = vec![0u8; MAX_FRAME];
            loop {
                let mut guard = self.fd.readable().await?;
                let res = guard.try_io(|inner| {
                    // SAFETY: `buf` is valid for `buf.len()` bytes.
                    let n = unsafe {
                        libc::recv(
                            inner.get_ref().as_raw_fd(),
                            buf.as_mut_ptr() as *mut libc::c_void,
                            buf.len(),
                            0,
                        )
                    };
                    if n < 0 {
                        Err(std::io::Error::last_os_error())
                    } else {
                        Ok(n as usize)
                    }
                });
                match res {
                    Ok(Ok(n)) => {
                        buf.truncate(n);
                        return Ok(buf);
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_would_block) => continue,
                }
            }
        }

        fn state(&self) -> watch::Receiver<bool> {
            self.state.subscribe()
        }
    }
}

#[cfg(target_os = "linux")]
pub use af_packet::AfPacketLinks;

struct KernelDriver {
    link: Arc<dyn Link>,
}

impl PortDriver for KernelDriver {
    fn write(&self, _port: &Port, pkt: Packet) -> Result<()> {
        self.link.send(&pkt.frame())
    }

    fn link_up(&self, _ctx: &Context) -> bool {
        *self.link.state().borrow()
    }

    fn start(&self, port: &Arc<Port>, ctx: &Arc<Context>) -> Result<()> {
        let link = self.link.clone();
        let mut state = link.state();
        let weak_port = Arc::downgrade(port);
        let weak_ctx = Arc::downgrade(ctx);
        let cancel = port.cancel_token().clone();
        spawn_worker(ctx, async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    Ok(()) = state.changed() => {
                        match weak_port.upgrade() {
                            Some(port) => port.refresh_oper(),
                            None => break,
                        }
                    }
                    frame = link.recv() => {
                        let frame = match frame {
                            Ok(f) => f,
                            Err(e) => {
                                warn!(device = %link.device(), error = %e, "kernel port reader stopped");
                                break;
                            }
                        };
                        let (Some(ctx), Some(port)) = (weak_ctx.upgrade(), weak_port.upgrade()) else {
                            break;
                        };
                        receive(&ctx, &port, &frame);
                    }
                }
            }
            debug!(device = %link.device(), "kernel port reader exited");
        })
    }

    fn describe(&self) -> String {
        format!("device {}", self.link.device())
    }
}

pub(super) struct KernelBuilder;

impl PortBuilder for KernelBuilder {
    fn build(&self, ctx: &Arc<Context>, _id: &str, config: &PortConfig) -> Result<Box<dyn PortDriver>> {
        let PortConfig::Kernel { device } = config else {
            return Err(FwdError::invalid_argument("kernel builder given a non-kernel config"));
        };
        Ok(Box::new(KernelDriver {
            link: ctx.links().open(device)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::counter::CounterId;
    use crate::object::Object;
    use crate::packet::tests::udp4_frame;
    use crate::port::{PortBuilders, PortDesc};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use vdp_types::OperState;

    #[tokio::test]
    async fn test_reader_feeds_input_path() {
        let links = LoopbackLinks::new();
        let ctx = Context::new("k", Arc::new(links.clone()));
        let builders = PortBuilders::with_defaults();
        let eth1 = builders
            .create(
                &ctx,
                PortDesc::new("eth1", PortConfig::Kernel { device: "eth1".into() })
                    .with_input(vec![Action::transmit("eth2")]),
            )
            .unwrap_err();
        assert!(eth1.is_not_found());

        builders
            .create(&ctx, PortDesc::new("eth2", PortConfig::Kernel { device: "eth2".into() }))
            .unwrap();
        let eth1 = builders
            .create(
                &ctx,
                PortDesc::new("eth1", PortConfig::Kernel { device: "eth1".into() })
                    .with_input(vec![Action::transmit("eth2")]),
            )
            .unwrap();

        links.peer("eth1").inject(udp4_frame());
        let out = tokio::time::timeout(Duration::from_secs(5), links.peer("eth2").recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out, udp4_frame());
        assert_eq!(eth1.base().counters().packets(CounterId::RxPackets), 1);
        ctx.stop();
        ctx.wait().await;
    }

    #[tokio::test]
    async fn test_carrier_loss_changes_oper_state() {
        let links = LoopbackLinks::new();
        let ctx = Context::new("k", Arc::new(links.clone()));
        let port = PortBuilders::with_defaults()
            .create(&ctx, PortDesc::new("eth1", PortConfig::Kernel { device: "eth1".into() }))
            .unwrap();
        let mut sub = ctx.notify().subscribe(CancellationToken::new());

        links.peer("eth1").set_up(false);
        let event = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.oper, OperState::Down);
        assert_eq!(port.oper_state(), OperState::Down);
        ctx.stop();
    }
}
