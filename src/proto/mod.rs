use std::fmt;
use std::time::Duration;

use clap::ValueEnum;

mod conn;
mod endpoint;
mod header;

pub mod gbn;
pub mod sr;
pub mod stop_wait;

pub use conn::{Connection, State};
pub use endpoint::Endpoint;
pub use header::{
    ack_packet, create_packet, fin_packet, flag_bits, syn_ack_packet, syn_packet, Header, ACK,
    FIN, HEADER_LEN, MAX_PACKET, MAX_PAYLOAD, SYN,
};

/// Retransmission and receive timeout shared by every engine.
pub const TIMEOUT: Duration = Duration::from_millis(500);

/// Fixed sender window for the sliding-window engines.
pub const WINDOW_SIZE: u16 = 5;

/// The reliability engine carrying the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum Method {
    StopAndWait,
    Gbn,
    Sr,
}

/// Faults the engines can inject on purpose, keyed to the 2nd packet of a
/// transfer so the recovery paths become observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum TestCase {
    /// Client side: the 2nd packet created is never transmitted.
    Lose,
    /// Server side: the 2nd data packet is processed but not acknowledged.
    SkipAck,
    /// Client side: the 2nd packet created goes out twice back to back.
    Double,
}

/// What the sending side measured once the final acknowledgment came back.
#[derive(Debug, Clone, Copy)]
pub struct TransferStats {
    pub bytes: usize,
    pub elapsed: Duration,
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs_f64();
        let megabits = self.bytes as f64 * 8.0 / 1e6;

        if megabits >= 1.0 {
            write!(
                f,
                "DURATION: {:.3} s\t DATA SIZE: {:.2} MB\t BANDWIDTH: {:.2} Mbps",
                secs,
                self.bytes as f64 / 1e6,
                megabits / secs
            )
        } else {
            let kilobits = self.bytes as f64 * 8.0 / 1e3;
            write!(
                f,
                "DURATION: {:.3} s\t DATA SIZE: {:.2} KB\t BANDWIDTH: {:.2} Kbps",
                secs,
                self.bytes as f64 / 1e3,
                kilobits / secs
            )
        }
    }
}

/// Carves the file into data packet payloads. An empty file still needs
/// its one FIN-bearing data packet.
pub(crate) fn chunked(data: &[u8]) -> Vec<&[u8]> {
    if data.is_empty() {
        vec![data]
    } else {
        data.chunks(MAX_PAYLOAD).collect()
    }
}
