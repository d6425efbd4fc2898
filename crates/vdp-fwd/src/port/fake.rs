//! Fake ports backed by capture files.
//!
//! On start the input capture (pcap or pcapng) is replayed through the input
//! path; transmitted frames are appended to the output capture in pcap
//! format.

use super::{receive, spawn_worker, Port, PortBuilder, PortConfig, PortDriver};
use crate::context::Context;
use crate::error::{FwdError, Result};
use crate::packet::Packet;
use parking_lot::Mutex;
use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::pcapng::Block;
use pcap_parser::traits::PcapNGPacketBlock;
use pcap_parser::{create_reader, Linktype, PcapBlockOwned, PcapError, PcapHeader, ToVec};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const SNAPLEN: u32 = 65535;

/// Appends frames to a pcap file.
struct PcapWriter {
    out: BufWriter<File>,
}

impl PcapWriter {
    fn create(path: &Path) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        let mut hdr = PcapHeader {
            magic_number: 0xa1b2c3d4,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: SNAPLEN,
            network: Linktype::ETHERNET,
        };
        let bytes = hdr
            .to_vec()
            .map_err(|e| FwdError::internal(format!("pcap header: {:?}", e)))?;
        out.write_all(&bytes)?;
        out.flush()?;
        Ok(Self { out })
    }

    fn append(&mut self, frame: &[u8]) -> Result<()> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let len = u32::try_from(frame.len())
            .map_err(|_| FwdError::invalid_argument("frame too large for pcap"))?;
        let mut block = LegacyPcapBlock {
            ts_sec: now.as_secs() as u32,
            ts_usec: now.subsec_micros(),
            caplen: len,
            origlen: len,
            data: frame,
        };
        let bytes = block
            .to_vec()
            .map_err(|e| FwdError::internal(format!("pcap block: {:?}", e)))?;
        self.out.write_all(&bytes)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Reads every packet of a pcap or pcapng file.
fn read_capture(path: &Path) -> Result<Vec<Vec<u8>>> {
    let file = File::open(path)?;
    let mut reader = create_reader(65536, file)
        .map_err(|e| FwdError::parse(format!("{}: {:?}", path.display(), e)))?;
    let mut frames = Vec::new();
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::Legacy(b) => frames.push(b.data.to_vec()),
                    PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => frames.push(epb.packet_data().to_vec()),
                    PcapBlockOwned::NG(Block::SimplePacket(spb)) => frames.push(spb.packet_data().to_vec()),
                    _ => {}
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| FwdError::parse(format!("{}: {:?}", path.display(), e)))?;
            }
            Err(e) => return Err(FwdError::parse(format!("{}: {:?}", path.display(), e))),
        }
    }
    Ok(frames)
}

struct FakeDriver {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    writer: Mutex<Option<PcapWriter>>,
}

impl PortDriver for FakeDriver {
    fn write(&self, _port: &Port, pkt: Packet) -> Result<()> {
        match self.writer.lock().as_mut() {
            Some(w) => w.append(&pkt.frame()),
            None => Ok(()),
        }
    }

    fn start(&self, port: &Arc<Port>, ctx: &Arc<Context>) -> Result<()> {
        let Some(path) = self.input.clone() else {
            return Ok(());
        };
        let weak_port = Arc::downgrade(port);
        let weak_ctx = Arc::downgrade(ctx);
        let cancel = port.cancel_token().clone();
        spawn_worker(ctx, async move {
            let read = {
                let path = path.clone();
                tokio::task::spawn_blocking(move || read_capture(&path)).await
            };
            let frames = match read {
                Ok(Ok(frames)) => frames,
                Ok(Err(e)) => {
                    warn!(path = %path.display(), error = %e, "capture replay failed");
                    return;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "capture reader panicked");
                    return;
                }
            };
            info!(path = %path.display(), frames = frames.len(), "replaying capture");
            for frame in frames {
                if cancel.is_cancelled() {
                    break;
                }
                let (Some(ctx), Some(port)) = (weak_ctx.upgrade(), weak_port.upgrade()) else {
                    break;
                };
                receive(&ctx, &port, &frame);
                tokio::task::yield_now().await;
            }
            debug!(path = %path.display(), "capture replay done");
        })
    }

    fn stop(&self) {
        if let Some(mut w) = self.writer.lock().take() {
            let _ = w.out.flush();
        }
    }

    fn describe(&self) -> String {
        let show = |p: &Option<PathBuf>| p.as_ref().map_or("-".to_string(), |p| p.display().to_string());
        format!("input {} output {}", show(&self.input), show(&self.output))
    }
}

pub(super) struct FakeBuilder;

impl PortBuilder for FakeBuilder {
    fn build(&self, _ctx: &Arc<Context>, _id: &str, config: &PortConfig) -> Result<Box<dyn PortDriver>> {
        let PortConfig::Fake { input, output } = config else {
            return Err(FwdError::invalid_argument("fake builder given a non-fake config"));
        };
        let writer = output.as_deref().map(PcapWriter::create).transpose()?;
        Ok(Box::new(FakeDriver {
            input: input.clone(),
            output: output.clone(),
            writer: Mutex::new(writer),
        }))
    }
}
