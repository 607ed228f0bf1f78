use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};

use super::endpoint::Endpoint;
use super::header::{self, Header, FIN, HEADER_LEN};
use super::{chunked, TestCase, TransferStats, WINDOW_SIZE};
use crate::Error;

#[derive(Debug)]
struct Flight {
    seq: u16,
    packet: Vec<u8>,
}

/*
The transmit thread is the only writer of next_seq, the ACK thread the
only writer of base; both go through the mutex for the in-flight queue.

        1          2          3          4
    ----------|----------|----------|----------
            base      next_seq   base + N

1 - acknowledged            3 - usable window
2 - sent, awaiting ACK      4 - not yet allowed
*/
#[derive(Debug)]
struct Window {
    base: u16,
    next_seq: u16,
    inflight: VecDeque<Flight>,
    done: bool,
}

type Shared = (Mutex<Window>, Condvar);

/// Sends `data` with a cumulative-ACK sliding window: one thread keeps the
/// window full, the other consumes ACKs and resends the whole window on
/// timeout.
pub fn send(
    ep: &Endpoint,
    peer: SocketAddr,
    data: &[u8],
    test: Option<TestCase>,
) -> Result<TransferStats, Error> {
    let started = Instant::now();
    let chunks = chunked(data);

    let shared: Shared = (
        Mutex::new(Window {
            base: 1,
            next_seq: 1,
            inflight: VecDeque::new(),
            done: false,
        }),
        Condvar::new(),
    );

    thread::scope(|s| {
        let transmitter = s.spawn(|| transmit(ep, peer, &chunks, test, &shared));

        let collected = collect_acks(ep, peer, started, data.len(), &shared);

        // A dead transmit half is the root cause of an aborted collector,
        // so surface its error first.
        transmitter.join().expect("transmit thread panicked")?;
        collected
    })
}

fn transmit(
    ep: &Endpoint,
    peer: SocketAddr,
    chunks: &[&[u8]],
    test: Option<TestCase>,
    shared: &Shared,
) -> Result<(), Error> {
    let res = fill_window(ep, peer, chunks, test, shared);

    if res.is_err() {
        let (window, cvar) = shared;
        window.lock().unwrap().done = true;
        cvar.notify_all();
    }

    res
}

fn fill_window(
    ep: &Endpoint,
    peer: SocketAddr,
    chunks: &[&[u8]],
    test: Option<TestCase>,
    shared: &Shared,
) -> Result<(), Error> {
    let (window, cvar) = shared;
    let mut packet_counter: u32 = 0;

    for (i, chunk) in chunks.iter().enumerate() {
        let seq = (i + 1) as u16;
        let fin_flag = if i + 1 == chunks.len() { FIN } else { 0 };

        let mut w = window.lock().unwrap();
        while w.next_seq >= w.base.saturating_add(WINDOW_SIZE) && !w.done {
            w = cvar.wait(w).unwrap();
        }
        if w.done {
            return Ok(());
        }

        debug_assert_eq!(w.next_seq, seq);

        packet_counter += 1;
        let packet = header::create_packet(seq, 0, fin_flag, 0, chunk);
        w.inflight.push_back(Flight {
            seq,
            packet: packet.clone(),
        });
        w.next_seq += 1;
        debug_assert!(w.base <= w.next_seq && w.next_seq <= w.base.saturating_add(WINDOW_SIZE));
        drop(w);

        match test {
            Some(TestCase::Double) if packet_counter == 2 => {
                info!("test case double: sending packet #{seq} twice");
                ep.send(&packet, peer)?;
                ep.send(&packet, peer)?;
            }
            Some(TestCase::Lose) if seq == 2 => {
                info!("test case lose: dropping packet #{seq} on the floor");
            }
            _ => {
                ep.send(&packet, peer)?;
                debug!("sent packet #{seq} ({} bytes, flags {:#06b})", chunk.len(), fin_flag);
            }
        }
    }

    debug!("all {} chunks enqueued", chunks.len());

    Ok(())
}

fn collect_acks(
    ep: &Endpoint,
    peer: SocketAddr,
    started: Instant,
    bytes: usize,
    shared: &Shared,
) -> Result<TransferStats, Error> {
    let (window, cvar) = shared;

    let res = loop {
        match ep.recv() {
            Err(err) => break Err(err),
            Ok(Some((buf, _))) => {
                let hdr = match Header::parse(&buf) {
                    Ok(hdr) => hdr,
                    Err(err) => {
                        warn!("{err}, discarding");
                        continue;
                    }
                };

                let mut w = window.lock().unwrap();

                // A cumulative ACK can only name something actually sent.
                if hdr.ack >= w.base && hdr.ack < w.next_seq {
                    while w.inflight.front().map_or(false, |f| f.seq <= hdr.ack) {
                        let flight = w.inflight.pop_front().unwrap();
                        debug!("packet #{} acknowledged", flight.seq);
                    }
                    w.base = hdr.ack + 1;
                    debug_assert!(
                        w.base <= w.next_seq && w.next_seq <= w.base.saturating_add(WINDOW_SIZE)
                    );
                    cvar.notify_all();
                }

                if hdr.fin() {
                    info!("final ACK carries FIN, transfer complete");
                    break Ok(TransferStats {
                        bytes,
                        elapsed: started.elapsed(),
                    });
                }
            }
            Ok(None) => {
                // The defining Go-Back-N recovery: on timeout, resend
                // everything still in flight, oldest first.
                let w = window.lock().unwrap();

                if w.done {
                    break Err(Error::Aborted);
                }

                if !w.inflight.is_empty() {
                    debug!("timeout, resending window of {} packets", w.inflight.len());
                }
                if let Some(err) = w
                    .inflight
                    .iter()
                    .find_map(|flight| ep.send(&flight.packet, peer).err())
                {
                    break Err(err);
                }
            }
        }
    };

    let mut w = window.lock().unwrap();
    w.done = true;
    cvar.notify_all();
    drop(w);

    res
}

/// Receives a file in strict order: in-sequence packets are delivered and
/// cumulatively acknowledged, anything ahead of `base` is discarded and
/// left for the sender's window retransmit.
pub fn recv(ep: &Endpoint, test: Option<TestCase>) -> Result<Vec<u8>, Error> {
    let mut received = Vec::new();
    let mut base: u16 = 1;

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

        if hdr.seq == base {
            received.extend_from_slice(payload);
            base += 1;

            if test == Some(TestCase::SkipAck) && hdr.seq == 2 {
                info!("test case skip_ack: not acknowledging packet #{}", hdr.seq);
            } else {
                ep.send(&header::create_packet(0, hdr.seq, hdr.flags, 0, &[]), from)?;
                debug!("delivered packet #{}, cumulative ACK sent", hdr.seq);
            }

            if hdr.fin() {
                info!("FIN received, {} bytes delivered", received.len());
                break;
            }
        } else if hdr.seq < base {
            // Already delivered; repeat the cumulative ACK so a sender
            // that missed it does not stay stuck on timeouts.
            ep.send(&header::create_packet(0, base - 1, hdr.flags, 0, &[]), from)?;
            debug!("duplicate packet #{}, re-ACK #{}", hdr.seq, base - 1);
        } else {
            debug!("packet #{} ahead of base {base}, discarding", hdr.seq);
        }
    }

    Ok(received)
}
