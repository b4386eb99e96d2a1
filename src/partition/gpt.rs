//! GPT detection (GUID Partition Table, signature in LBA 1).
//!
//! Full partition entry array parsing is out of scope (see
//! `partition::identify_partition_table`); this only distinguishes a
//! GPT-labeled disk from an unpartitioned or MBR one.

const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";

pub fn is_gpt_table(sector: &[u8]) -> bool {
    sector.len() >= 8 && &sector[0..8] == GPT_SIGNATURE
}
