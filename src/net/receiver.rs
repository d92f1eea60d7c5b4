/*
 *  net/receiver.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  UDP tile receivers: socket workers, the per-worker tile ring and
 *  the shared frame slot table
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::io;
use std::net::UdpSocket;
use std::os::unix::io::FromRawFd;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::{debug, info, warn};

use crate::matrix::canvas::{TileData, TILE_SIZE};
use crate::net::protocol::{Packet, HEADER_LEN, MAX_IN_FLIGHT_FRAMES, TILE_BYTES};
use crate::rt;

/// Frame-index-keyed table of tile references, shared between the
/// receiver workers and the producer. The mutex is only ever held for
/// a pointer store or a clone sweep.
pub struct FrameTable {
    tiles_x: usize,
    tiles_y: usize,
    slots: Mutex<Vec<Option<Arc<TileData>>>>,
}

impl FrameTable {
    pub fn new(tiles_x: usize, tiles_y: usize) -> Arc<FrameTable> {
        Arc::new(FrameTable {
            tiles_x,
            tiles_y,
            slots: Mutex::new(vec![None; MAX_IN_FLIGHT_FRAMES * tiles_x * tiles_y]),
        })
    }

    pub fn tiles_x(&self) -> usize {
        self.tiles_x
    }

    pub fn tiles_y(&self) -> usize {
        self.tiles_y
    }

    /// Publish one tile. Overwriting is allowed; retransmits and late
    /// stragglers land in whatever ring instance is current.
    pub fn store(&self, frame: usize, tile_x: usize, tile_y: usize, tile: Arc<TileData>) {
        let per_frame = self.tiles_x * self.tiles_y;
        let idx = (frame % MAX_IN_FLIGHT_FRAMES) * per_frame + tile_y * self.tiles_x + tile_x;
        self.slots.lock().expect("frame table poisoned")[idx] = Some(tile);
    }

    /// Clone out the tile references of one frame for compositing.
    pub fn snapshot(&self, frame: usize) -> Vec<Option<Arc<TileData>>> {
        let per_frame = self.tiles_x * self.tiles_y;
        let base = (frame % MAX_IN_FLIGHT_FRAMES) * per_frame;
        let slots = self.slots.lock().expect("frame table poisoned");
        slots[base..base + per_frame].to_vec()
    }

    /// Tiles currently present for a frame, for the flip telemetry.
    pub fn present(&self, frame: usize) -> usize {
        let per_frame = self.tiles_x * self.tiles_y;
        let base = (frame % MAX_IN_FLIGHT_FRAMES) * per_frame;
        let slots = self.slots.lock().expect("frame table poisoned");
        slots[base..base + per_frame].iter().filter(|t| t.is_some()).count()
    }
}

/// Flip handoff: receivers publish the latest completed frame index,
/// the producer blocks on it with a timeout. Latest flip wins.
#[derive(Default)]
pub struct FlipSignal {
    pending: Mutex<Option<usize>>,
    cond: Condvar,
}

impl FlipSignal {
    pub fn new() -> Arc<FlipSignal> {
        Arc::new(FlipSignal::default())
    }

    pub fn signal(&self, frame: usize) {
        *self.pending.lock().expect("flip signal poisoned") = Some(frame);
        self.cond.notify_one();
    }

    /// Wait for a flip, or `None` after `timeout` (the producer then
    /// shows the status screen).
    pub fn wait(&self, timeout: Duration) -> Option<usize> {
        let deadline = std::time::Instant::now() + timeout;
        let mut pending = self.pending.lock().expect("flip signal poisoned");
        loop {
            if let Some(frame) = pending.take() {
                return Some(frame);
            }
            let now = std::time::Instant::now();
            let Some(remaining) = deadline.checked_duration_since(now) else {
                return None;
            };
            let (next, _) =
                self.cond.wait_timeout(pending, remaining).expect("flip signal poisoned");
            pending = next;
        }
    }
}

/// Open the shared receiver socket: SO_REUSEPORT so every worker binds
/// the same port, a fat receive buffer, and a read timeout so the
/// interrupt flag stays responsive.
pub fn open_socket(port: u16) -> io::Result<UdpSocket> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, libc::IPPROTO_UDP) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Wrap immediately so error paths below close the fd.
    let socket = unsafe { UdpSocket::from_raw_fd(fd) };

    let one: libc::c_int = 1;
    let rcvbuf: libc::c_int = 1024 * 1024;
    unsafe {
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &one as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) != 0
        {
            return Err(io::Error::last_os_error());
        }
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &rcvbuf as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );

        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: port.to_be(),
            sin_addr: libc::in_addr { s_addr: libc::INADDR_ANY.to_be() },
            sin_zero: [0; 8],
        };
        if libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) != 0
        {
            return Err(io::Error::last_os_error());
        }

        let mut granted: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &mut granted as *mut _ as *mut libc::c_void,
            &mut len,
        );
        debug!("receiver socket bound to port {}, rcvbuf {}", port, granted);
    }

    socket.set_read_timeout(Some(Duration::from_secs(1)))?;
    Ok(socket)
}

/// One receiver worker. Owns its slice of tile memory: a bump-and-wrap
/// ring sized for the full in-flight window, so the producer can hold
/// references without ever handing anything back.
pub struct Receiver {
    index: usize,
    socket: UdpSocket,
    table: Arc<FrameTable>,
    flip: Arc<FlipSignal>,
    ring: Vec<Arc<TileData>>,
    ring_next: usize,
}

impl Receiver {
    pub fn new(
        index: usize,
        socket: UdpSocket,
        table: Arc<FrameTable>,
        flip: Arc<FlipSignal>,
    ) -> Receiver {
        let ring_len = table.tiles_x() * table.tiles_y() * MAX_IN_FLIGHT_FRAMES;
        Receiver {
            index,
            socket,
            table,
            flip,
            ring: (0..ring_len).map(|_| Arc::new([0u16; TILE_SIZE * TILE_SIZE * 3])).collect(),
            ring_next: 0,
        }
    }

    /// Worker loop; runs until the process interrupt flag is set.
    /// Pinned and realtime-elevated where permitted, exactly like the
    /// refresh thread, so bursts don't overflow the socket buffer.
    pub fn run(mut self) {
        if !rt::set_realtime_priority(99) {
            warn!("FYI: can't set realtime priority for receiver {}", self.index);
        }
        if !rt::pin_to_cpu(self.index % rt::online_cpus()) {
            warn!("FYI: couldn't pin receiver {}", self.index);
        }
        info!("receiver {} listening", self.index);

        let mut buf = [0u8; HEADER_LEN + TILE_BYTES];
        while !rt::interrupt_requested() {
            let len = match self.socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    continue;
                }
                Err(e) => {
                    // Lossy by design: log and keep the loop alive.
                    warn!("receiver {}: recv error: {}", self.index, e);
                    continue;
                }
            };
            self.handle_datagram(&buf[..len]);
        }
        debug!("receiver {} exiting", self.index);
    }

    /// Dispatch one datagram. Separated from the socket loop so the
    /// protocol behavior is testable without networking.
    pub fn handle_datagram(&mut self, data: &[u8]) {
        match Packet::parse(data) {
            Some(Packet::Tile { frame, xpos, ypos }) => {
                if data.len() < HEADER_LEN + TILE_BYTES {
                    debug!("receiver {}: short tile packet ({} bytes)", self.index, data.len());
                    return;
                }
                let tx = xpos as usize / TILE_SIZE;
                let ty = ypos as usize / TILE_SIZE;
                if tx >= self.table.tiles_x() || ty >= self.table.tiles_y() {
                    debug!("receiver {}: tile ({},{}) out of range", self.index, tx, ty);
                    return;
                }
                let tile = self.ring_write(&data[HEADER_LEN..HEADER_LEN + TILE_BYTES]);
                self.table.store(frame, tx, ty, tile);
            }
            Some(Packet::Flip { frame }) => {
                let present = self.table.present(frame);
                let total = self.table.tiles_x() * self.table.tiles_y();
                debug!(
                    "receiver {}: flip frame {}, tiles {:.0}%",
                    self.index,
                    frame,
                    present as f32 * 100.0 / total as f32
                );
                self.flip.signal(frame);
            }
            None => {
                debug!("receiver {}: dropped invalid packet ({} bytes)", self.index, data.len());
            }
        }
    }

    /// Decode a payload into the next ring slot. Steady state writes
    /// in place; if the consumer still holds the slot (we got lapped)
    /// the slot is replaced with a fresh allocation, bounded by the
    /// ring size.
    fn ring_write(&mut self, payload: &[u8]) -> Arc<TileData> {
        let idx = self.ring_next;
        self.ring_next = (idx + 1) % self.ring.len();
        let slot = &mut self.ring[idx];

        if Arc::get_mut(slot).is_none() {
            *slot = Arc::new([0u16; TILE_SIZE * TILE_SIZE * 3]);
        }
        let tile = Arc::get_mut(slot).expect("fresh tile slot has no other owner");
        for (dst, src) in tile.iter_mut().zip(payload.chunks_exact(2)) {
            *dst = u16::from_le_bytes([src[0], src[1]]);
        }
        Arc::clone(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::DEFAULT_PORT;

    fn test_receiver(tiles_x: usize, tiles_y: usize) -> (Receiver, Arc<FrameTable>, Arc<FlipSignal>) {
        let table = FrameTable::new(tiles_x, tiles_y);
        let flip = FlipSignal::new();
        // Bind an ephemeral port; the socket is unused by these tests.
        let socket = open_socket(0).expect("ephemeral bind");
        (Receiver::new(0, socket, Arc::clone(&table), Arc::clone(&flip)), table, flip)
    }

    fn tile_packet(frame: u8, xpos: u16, ypos: u16, red: u16) -> Vec<u8> {
        let mut pkt = vec![0u8; HEADER_LEN + TILE_BYTES];
        pkt[0] = 1;
        pkt[1] = frame;
        pkt[2..4].copy_from_slice(&xpos.to_le_bytes());
        pkt[4..6].copy_from_slice(&ypos.to_le_bytes());
        for triple in pkt[HEADER_LEN..].chunks_exact_mut(6) {
            triple[0..2].copy_from_slice(&red.to_le_bytes());
        }
        pkt
    }

    #[test]
    fn tile_packet_lands_in_the_right_slot() {
        let (mut recv, table, _) = test_receiver(4, 3);
        recv.handle_datagram(&tile_packet(2, 16, 32, 0x0fff));

        let tiles = table.snapshot(2);
        let tile = tiles[2 * 4 + 1].as_ref().expect("tile (1,2) stored");
        assert_eq!(tile[0], 0x0fff);
        assert_eq!(tile[1], 0);
        assert!(tiles.iter().enumerate().all(|(i, t)| i == 9 || t.is_none()));
    }

    #[test]
    fn out_of_range_tiles_are_dropped() {
        let (mut recv, table, _) = test_receiver(4, 3);
        recv.handle_datagram(&tile_packet(0, 4 * 16, 0, 1));
        assert_eq!(table.present(0), 0);
    }

    #[test]
    fn short_tile_payload_is_dropped() {
        let (mut recv, table, _) = test_receiver(4, 3);
        let mut pkt = tile_packet(0, 0, 0, 1);
        pkt.truncate(HEADER_LEN + 10);
        recv.handle_datagram(&pkt);
        assert_eq!(table.present(0), 0);
    }

    #[test]
    fn flip_signals_the_producer() {
        let (mut recv, _, flip) = test_receiver(4, 3);
        recv.handle_datagram(&[2, 0x17, 0, 0, 0, 0, 0, 0]);
        assert_eq!(flip.wait(Duration::from_millis(10)), Some(7));
        // Signal is consumed.
        assert_eq!(flip.wait(Duration::from_millis(10)), None);
    }

    #[test]
    fn ring_replaces_slots_the_consumer_still_holds() {
        let (mut recv, table, _) = test_receiver(1, 1);
        // Hold every ring slot via the table to force the lapped path.
        for frame in 0..MAX_IN_FLIGHT_FRAMES {
            recv.handle_datagram(&tile_packet(frame as u8, 0, 0, frame as u16));
        }
        let held: Vec<_> = (0..MAX_IN_FLIGHT_FRAMES).map(|f| table.snapshot(f)).collect();
        recv.handle_datagram(&tile_packet(0, 0, 0, 0xbeef));

        // The old reference is unchanged, the new one is live.
        assert_eq!(held[0][0].as_ref().unwrap()[0], 0);
        assert_eq!(table.snapshot(0)[0].as_ref().unwrap()[0], 0xbeef);
    }

    #[test]
    fn default_port_matches_the_wire_protocol() {
        assert_eq!(DEFAULT_PORT, 9998);
    }
}
