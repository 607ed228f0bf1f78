use std::net::SocketAddr;

use log::{debug, info, warn};

use super::endpoint::Endpoint;
use super::header::{self, Header, ACK, FIN, SYN};
use crate::Error;

/// How many times the client re-sends its SYN before giving up.
const MAX_SYN_RETRIES: usize = 10;

/*
                client                          server

               CLOSED                          CLOSED
                  |  snd SYN                      |
              SYN-SENT  --------- SYN -------->  |
                  |                            SYN-RCVD
                  |  <------- SYN-ACK ----------  |
                  |  snd ACK                      |
             ESTABLISHED -------- ACK ------> ESTABLISHED
                  |                               |
                  |  . . . . . transfer . . . . . |
                  |  snd FIN                      |
              FIN-WAIT  --------- FIN -------->  |
                  |                           CLOSE-WAIT
                  |  <--------- ACK -----------   |
               CLOSED                          CLOSED
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    SynSent,
    SynRcvd,
    Established,
    FinWait,
    CloseWait,
}

/// One connection end. Carries exactly one transfer, then closes for good.
#[derive(Debug)]
pub struct Connection {
    state: State,
    peer: Option<SocketAddr>,
}

impl Connection {
    pub fn new() -> Self {
        Connection {
            state: State::Closed,
            peer: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn set_state(&mut self, state: State) {
        debug!("state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Server half of the three way handshake. Blocks until a peer runs
    /// SYN / SYN-ACK / ACK to completion; timeouts re-enter the receive
    /// loop and never abort setup.
    pub fn accept(&mut self, ep: &Endpoint) -> Result<SocketAddr, Error> {
        assert_eq!(self.state, State::Closed);

        let peer = loop {
            let Some((buf, from)) = ep.recv()? else { continue };

            let hdr = match Header::parse(&buf) {
                Ok(hdr) => hdr,
                Err(err) => {
                    warn!("{err}, discarding");
                    continue;
                }
            };

            if hdr.flags == SYN {
                debug!("SYN from {from}");
                ep.send(&header::syn_ack_packet(), from)?;
                self.set_state(State::SynRcvd);
                break from;
            }

            debug!("waiting for SYN, got flags {:#06b}", hdr.flags);
        };

        loop {
            let Some((buf, from)) = ep.recv()? else { continue };

            let hdr = match Header::parse(&buf) {
                Ok(hdr) => hdr,
                Err(err) => {
                    warn!("{err}, discarding");
                    continue;
                }
            };

            if hdr.flags == ACK {
                break;
            }

            // Our SYN-ACK may have been lost and the peer is retrying;
            // answer the duplicate SYN again instead of leaving it stranded.
            if hdr.flags == SYN {
                debug!("duplicate SYN from {from}, repeating SYN-ACK");
                ep.send(&header::syn_ack_packet(), from)?;
                continue;
            }

            debug!("waiting for ACK, got flags {:#06b}", hdr.flags);
        }

        self.set_state(State::Established);
        self.peer = Some(peer);
        info!("connection established with {peer}");

        Ok(peer)
    }

    /// Client half: SYN out, SYN-ACK back, pure ACK out. Timeouts and
    /// unexpected flags restart with a fresh SYN.
    pub fn connect(&mut self, ep: &Endpoint, server: SocketAddr) -> Result<(), Error> {
        assert_eq!(self.state, State::Closed);
        self.set_state(State::SynSent);

        for _ in 0..MAX_SYN_RETRIES {
            ep.send(&header::syn_packet(), server)?;
            debug!("SYN sent to {server}");

            let Some((buf, _)) = ep.recv()? else {
                debug!("no SYN-ACK within the timeout, retrying");
                continue;
            };

            let hdr = match Header::parse(&buf) {
                Ok(hdr) => hdr,
                Err(err) => {
                    warn!("{err}, discarding");
                    continue;
                }
            };

            if hdr.flags == SYN | ACK {
                ep.send(&header::ack_packet(0, 0), server)?;
                self.set_state(State::Established);
                self.peer = Some(server);
                info!("connection established with {server}");
                return Ok(());
            }

            debug!("waiting for SYN-ACK, got flags {:#06b}", hdr.flags);
        }

        self.set_state(State::Closed);

        Err(Error::Handshake(server))
    }

    /// Client initiated teardown: one standalone FIN, then wait for its
    /// ACK until the first timeout. The transfer itself is already
    /// complete, so a lost ACK is not worth more round trips.
    pub fn close(&mut self, ep: &Endpoint) -> Result<(), Error> {
        assert_eq!(self.state, State::Established);
        let peer = self.peer.expect("established connection has a peer");

        ep.send(&header::fin_packet(), peer)?;
        self.set_state(State::FinWait);
        debug!("FIN sent to {peer}");

        loop {
            match ep.recv()? {
                Some((buf, _)) => {
                    let hdr = match Header::parse(&buf) {
                        Ok(hdr) => hdr,
                        Err(err) => {
                            warn!("{err}, discarding");
                            continue;
                        }
                    };

                    if hdr.flags == ACK {
                        debug!("FIN acknowledged by {peer}");
                        break;
                    }
                }
                None => {
                    debug!("no ACK for our FIN, giving up the wait");
                    break;
                }
            }
        }

        self.set_state(State::Closed);
        self.peer = None;
        info!("connection with {peer} closed");

        Ok(())
    }

    /// Server side of teardown: wait for the standalone FIN and answer
    /// with a pure ACK.
    pub fn wait_close(&mut self, ep: &Endpoint) -> Result<(), Error> {
        assert_eq!(self.state, State::Established);
        self.set_state(State::CloseWait);

        loop {
            let Some((buf, from)) = ep.recv()? else { continue };

            let hdr = match Header::parse(&buf) {
                Ok(hdr) => hdr,
                Err(err) => {
                    warn!("{err}, discarding");
                    continue;
                }
            };

            if hdr.flags == FIN {
                ep.send(&header::ack_packet(0, 0), from)?;
                info!("connection with {from} closed");
                break;
            }

            debug!("waiting for FIN, got flags {:#06b}", hdr.flags);
        }

        self.set_state(State::Closed);
        self.peer = None;

        Ok(())
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}
