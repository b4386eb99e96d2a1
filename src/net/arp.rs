//! ARP (RFC 826) frame codec for Ethernet/IPv4, 28 bytes fixed. Only the
//! codec and RX bookkeeping are in scope; ARP resolution/replies are an
//! IPv4-stack concern this service doesn't implement.

use crate::net::handler::ProtocolIdentifier;
use crate::net::packet::{append_handled_by_current_offset, Packet, PacketPool};

pub const ARP_FRAME_LEN: usize = 28;

pub const HTYPE_ETHERNET: u16 = 1;
pub const PTYPE_IPV4: u16 = 0x0800;

pub const OPCODE_REQUEST: u16 = 1;
pub const OPCODE_REPLY: u16 = 2;

pub struct Arp<'a> {
    buf: &'a mut [u8],
}

impl<'a> Arp<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    pub fn hardware_type(&self) -> u16 {
        u16::from_be_bytes(self.buf[0..2].try_into().unwrap())
    }

    pub fn protocol_type(&self) -> u16 {
        u16::from_be_bytes(self.buf[2..4].try_into().unwrap())
    }

    pub fn hw_addr_len(&self) -> u8 {
        self.buf[4]
    }

    pub fn proto_addr_len(&self) -> u8 {
        self.buf[5]
    }

    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes(self.buf[6..8].try_into().unwrap())
    }

    pub fn set_opcode(&mut self, opcode: u16) {
        self.buf[6..8].copy_from_slice(&opcode.to_be_bytes());
    }

    pub fn sender_hw_addr(&self) -> [u8; 6] {
        self.buf[8..14].try_into().unwrap()
    }

    pub fn sender_proto_addr(&self) -> [u8; 4] {
        self.buf[14..18].try_into().unwrap()
    }

    pub fn target_hw_addr(&self) -> [u8; 6] {
        self.buf[18..24].try_into().unwrap()
    }

    pub fn target_proto_addr(&self) -> [u8; 4] {
        self.buf[24..28].try_into().unwrap()
    }

    pub fn fill(
        &mut self,
        opcode: u16,
        sender_hw: [u8; 6],
        sender_ip: [u8; 4],
        target_hw: [u8; 6],
        target_ip: [u8; 4],
    ) {
        self.buf[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        self.buf[2..4].copy_from_slice(&PTYPE_IPV4.to_be_bytes());
        self.buf[4] = 6;
        self.buf[5] = 4;
        self.set_opcode(opcode);
        self.buf[8..14].copy_from_slice(&sender_hw);
        self.buf[14..18].copy_from_slice(&sender_ip);
        self.buf[18..24].copy_from_slice(&target_hw);
        self.buf[24..28].copy_from_slice(&target_ip);
    }
}

/// ARP resolution/replies are out of scope; every frame that reaches
/// here is recorded and returned to its pool.
pub fn handle_arp_packet(mut packet: Packet, pool: &PacketPool) {
    append_handled_by_current_offset(&mut packet, ProtocolIdentifier::Arp);
    if let Some(dev) = packet.src_device.as_ref() {
        dev.statistics.inc_dropped();
    }
    pool.drop_packet(packet);
}
