use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::endpoint::Endpoint;
use super::header::{self, Header, FIN, HEADER_LEN};
use super::{chunked, TestCase, TransferStats, TIMEOUT, WINDOW_SIZE};
use crate::Error;

/// How often the transmit thread wakes up to look at per-packet timers
/// when no ACK arrives to wake it earlier.
const SCAN_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Flight {
    seq: u16,
    packet: Vec<u8>,
    sent_at: Instant,
}

#[derive(Debug)]
struct Window {
    base: u16,
    next_seq: u16,
    inflight: Vec<Flight>,
    done: bool,
}

type Shared = (Mutex<Window>, Condvar);

/// Sends `data` with per-packet acknowledgments: only the packets whose
/// own timer expires are retransmitted.
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
            inflight: Vec::new(),
            done: false,
        }),
        Condvar::new(),
    );

    thread::scope(|s| {
        let transmitter = s.spawn(|| transmit(ep, peer, &chunks, test, &shared));

        let collected = collect_acks(ep, started, data.len(), &shared);

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
    let res = fill_and_retransmit(ep, peer, chunks, test, shared);

    if res.is_err() {
        let (window, cvar) = shared;
        window.lock().unwrap().done = true;
        cvar.notify_all();
    }

    res
}

fn fill_and_retransmit(
    ep: &Endpoint,
    peer: SocketAddr,
    chunks: &[&[u8]],
    test: Option<TestCase>,
    shared: &Shared,
) -> Result<(), Error> {
    let (window, cvar) = shared;
    let mut packet_counter: u32 = 0;
    let mut next_chunk = 0;

    let mut w = window.lock().unwrap();
    loop {
        if w.done {
            return Ok(());
        }

        // Fill the window with fresh packets.
        while next_chunk < chunks.len() && w.next_seq < w.base.saturating_add(WINDOW_SIZE) {
            let seq = w.next_seq;
            let chunk = chunks[next_chunk];
            let fin_flag = if next_chunk + 1 == chunks.len() { FIN } else { 0 };

            packet_counter += 1;
            let packet = header::create_packet(seq, 0, fin_flag, 0, chunk);
            w.inflight.push(Flight {
                seq,
                packet: packet.clone(),
                sent_at: Instant::now(),
            });
            w.next_seq += 1;
            debug_assert!(w.base <= w.next_seq && w.next_seq <= w.base.saturating_add(WINDOW_SIZE));

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

            next_chunk += 1;
        }

        // Per-packet timers: resend whatever went unacknowledged for a
        // full timeout and re-arm it.
        let now = Instant::now();
        for flight in w.inflight.iter_mut() {
            if now.duration_since(flight.sent_at) > TIMEOUT {
                ep.send(&flight.packet, peer)?;
                flight.sent_at = now;
                debug!("timer expired, resent packet #{}", flight.seq);
            }
        }

        if next_chunk == chunks.len() && w.inflight.is_empty() {
            debug!("all {} chunks sent and acknowledged", chunks.len());
            return Ok(());
        }

        // An incoming ACK wakes us early; otherwise pace the timer scan
        // instead of spinning.
        w = cvar.wait_timeout(w, SCAN_INTERVAL).unwrap().0;
    }
}

fn collect_acks(
    ep: &Endpoint,
    started: Instant,
    bytes: usize,
    shared: &Shared,
) -> Result<TransferStats, Error> {
    let (window, cvar) = shared;

    let res = loop {
        match ep.recv() {
            Err(err) => break Err(err),
            Ok(None) => {
                if window.lock().unwrap().done {
                    break Err(Error::Aborted);
                }
            }
            Ok(Some((buf, _))) => {
                let hdr = match Header::parse(&buf) {
                    Ok(hdr) => hdr,
                    Err(err) => {
                        warn!("{err}, discarding");
                        continue;
                    }
                };

                let mut w = window.lock().unwrap();

                if let Some(pos) = w.inflight.iter().position(|f| f.seq == hdr.ack) {
                    w.inflight.remove(pos);
                    debug!("packet #{} acknowledged", hdr.ack);

                    // base is the oldest packet still in flight, or catches
                    // up with next_seq once everything is acknowledged.
                    w.base = w
                        .inflight
                        .iter()
                        .map(|f| f.seq)
                        .min()
                        .unwrap_or(w.next_seq);
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
        }
    };

    let mut w = window.lock().unwrap();
    w.done = true;
    cvar.notify_all();
    drop(w);

    res
}

#[derive(Debug)]
struct Parked {
    payload: Vec<u8>,
    fin: bool,
}

/// Receives a file with out-of-order buffering: every packet is ACKed
/// individually, packets ahead of `expected_seq` wait in a sorted buffer
/// until the gap before them closes.
pub fn recv(ep: &Endpoint, test: Option<TestCase>) -> Result<Vec<u8>, Error> {
    let mut received = Vec::new();
    let mut expected_seq: u16 = 1;
    let mut buffered: BTreeMap<u16, Parked> = BTreeMap::new();
    let mut ack_skipped = false;

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

        if test == Some(TestCase::SkipAck) && hdr.seq == 2 && !ack_skipped {
            ack_skipped = true;
            info!("test case skip_ack: not acknowledging packet #{}", hdr.seq);
        } else {
            // Unlike the cumulative engines, every arrival is ACKed on its
            // own, duplicates included.
            ep.send(&header::create_packet(0, hdr.seq, hdr.flags, 0, &[]), from)?;
            debug!("ACK #{} sent", hdr.seq);
        }

        if hdr.seq == expected_seq {
            received.extend_from_slice(payload);
            expected_seq += 1;
            let mut fin = hdr.fin();

            // Close the gap: deliver everything that is now in order.
            while let Some(parked) = buffered.remove(&expected_seq) {
                received.extend_from_slice(&parked.payload);
                fin = parked.fin;
                expected_seq += 1;
                debug!("drained buffered packet, expected_seq now {expected_seq}");
            }

            if fin {
                info!("FIN delivered, {} bytes total", received.len());
                break;
            }
        } else if hdr.seq > expected_seq {
            debug!("packet #{} buffered ahead of expected #{expected_seq}", hdr.seq);
            buffered.insert(
                hdr.seq,
                Parked {
                    payload: payload.to_vec(),
                    fin: hdr.fin(),
                },
            );
        } else {
            debug!("duplicate packet #{}, already delivered", hdr.seq);
        }
    }

    Ok(received)
}
