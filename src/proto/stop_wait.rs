use std::net::SocketAddr;
use std::time::Instant;

use log::{debug, info, warn};

use super::endpoint::Endpoint;
use super::header::{self, Header, ACK, FIN, HEADER_LEN};
use super::{chunked, TestCase, TransferStats};
use crate::Error;

/// Pushes `data` one packet at a time: transmit, wait for the matching
/// ACK, only then move to the next chunk.
pub fn send(
    ep: &Endpoint,
    peer: SocketAddr,
    data: &[u8],
    test: Option<TestCase>,
) -> Result<TransferStats, Error> {
    let started = Instant::now();

    let chunks = chunked(data);
    let mut seq: u16 = 1;
    let mut last_received_ack: Option<u16> = None;
    let mut packet_counter: u32 = 0;

    for (i, chunk) in chunks.iter().enumerate() {
        let fin_flag = if i + 1 == chunks.len() { FIN } else { 0 };

        loop {
            packet_counter += 1;
            let packet = header::create_packet(seq, 0, fin_flag, 0, chunk);

            if test == Some(TestCase::Lose) && packet_counter == 2 {
                info!("test case lose: dropping packet #{seq} on the floor");
            } else {
                ep.send(&packet, peer)?;
                debug!("sent packet #{seq} ({} bytes, flags {:#06b})", chunk.len(), fin_flag);
            }

            let Some((buf, _)) = ep.recv()? else {
                debug!("timeout waiting for ACK of #{seq}, resending");
                continue;
            };

            let hdr = match Header::parse(&buf) {
                Ok(hdr) => hdr,
                Err(err) => {
                    warn!("{err}, discarding");
                    continue;
                }
            };

            if last_received_ack == Some(hdr.ack) {
                debug!("duplicate ACK #{}, resending packet #{seq}", hdr.ack);
                continue;
            }

            // The receiver echoes the delivered seq and names the next one
            // it expects.
            if hdr.flags == ACK && hdr.seq == seq && hdr.ack == seq + 1 {
                debug!("packet #{seq} acknowledged");
                last_received_ack = Some(hdr.ack);
                seq += 1;
                break;
            }

            debug!(
                "unexpected ACK (seq {} ack {} flags {:#06b}), resending",
                hdr.seq, hdr.ack, hdr.flags
            );
        }
    }

    info!("stop-and-wait transfer of {} bytes finished", data.len());

    Ok(TransferStats {
        bytes: data.len(),
        elapsed: started.elapsed(),
    })
}

/// Receives one file worth of packets, acknowledging each and delivering
/// every chunk exactly once.
pub fn recv(ep: &Endpoint, test: Option<TestCase>) -> Result<Vec<u8>, Error> {
    let mut received = Vec::new();
    let mut expected_seq: u16 = 1;
    let mut data_packets: u32 = 0;

    loop {
        let Some((buf, from)) = ep.recv()? else { continue };

        let hdr = match Header::parse(&buf) {
            Ok(hdr) => hdr,
            Err(err) => {
                warn!("{err}, discarding");
                continue;
            }
        };

        if hdr.syn() {
            debug!("stray SYN during transfer, ignoring");
            continue;
        }

        let payload = &buf[HEADER_LEN..];
        data_packets += 1;
        debug!("packet #{} received with flags {:#06b}", hdr.seq, hdr.flags);

        let skip_ack = test == Some(TestCase::SkipAck) && data_packets == 2;

        if hdr.seq == expected_seq {
            received.extend_from_slice(payload);
            expected_seq += 1;

            if skip_ack {
                info!("test case skip_ack: not acknowledging packet #{}", hdr.seq);
            } else {
                ep.send(&header::ack_packet(hdr.seq, hdr.seq + 1), from)?;
                debug!("delivered packet #{}, ACK #{} sent", hdr.seq, hdr.seq + 1);
            }

            if hdr.fin() {
                info!("FIN received, {} bytes delivered", received.len());
                break;
            }
        } else if hdr.seq < expected_seq {
            // Retransmission of something already delivered: repeat the
            // ACK so the sender stops waiting for it, but keep the bytes
            // out of the output.
            if skip_ack {
                info!("test case skip_ack: not acknowledging packet #{}", hdr.seq);
            } else {
                ep.send(&header::ack_packet(hdr.seq, hdr.seq + 1), from)?;
                debug!("duplicate packet #{}, ACK repeated", hdr.seq);
            }
        } else {
            warn!("packet #{} ahead of expected #{expected_seq}, ignoring", hdr.seq);
        }
    }

    Ok(received)
}
