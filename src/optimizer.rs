//! Request planning: merging item reads into blocks and splitting blocks into
//! wire-sized requests.
//!
//! All offsets here are bytes within a data file. An element starts at
//! `element * stride` (see [`FileType::stride`]).
//!
//! Reads are sorted by `(area, file, offset, bit, -length)` and walked once.
//! An item joins the current block unless it is in another file, optimization
//! is off, the block would grow past one request, or the gap to the block end
//! exceeds `max_gap` bytes. Blocks larger than one request are split on
//! element boundaries.
//!
//! Writes are never merged. Each write item becomes its own block; bit writes
//! become one masked write per touched word so that neighbouring bits are
//! never overwritten.
//!
//! # Example
//!
//! ```
//! use pccc_eip::{Address, OptimizerConfig, plan_reads};
//!
//! let items = [Address::parse("N7:0").unwrap(), Address::parse("N7:1").unwrap()];
//! let plan = plan_reads(&items, &OptimizerConfig::default());
//! assert_eq!(plan.blocks.len(), 1);
//! assert_eq!(plan.blocks[0].byte_length, 4);
//! assert_eq!(plan.requests.len(), 1);
//! ```

use std::cmp::Reverse;

use bytes::Bytes;
use tracing::debug;

use crate::address::{Address, DataKind};
use crate::command::{MaskedWriteCommand, ReadCommand, WriteCommand};
use crate::error::{PcccError, Result};
use crate::file_type::FileType;
use crate::utils::packed_bit;

/// Smallest accepted PDU size; a split part still holds one `ST` element.
pub const MIN_PDU: usize = 120;
/// Largest accepted PDU size; every part fits the one-byte size field.
pub const MAX_PDU: usize = 244;
/// Default PDU size.
pub const DEFAULT_MAX_PDU: usize = 220;
/// Default merge gap in bytes.
pub const DEFAULT_MAX_GAP: usize = 5;

/// Sizing rules for planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizerConfig {
    max_pdu: usize,
    max_gap: usize,
    optimize: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_pdu: DEFAULT_MAX_PDU,
            max_gap: DEFAULT_MAX_GAP,
            optimize: true,
        }
    }
}

impl OptimizerConfig {
    /// Creates a planning configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_pdu` is outside [`MIN_PDU`]..=[`MAX_PDU`].
    pub fn new(max_pdu: usize, max_gap: usize, optimize: bool) -> Result<Self> {
        if !(MIN_PDU..=MAX_PDU).contains(&max_pdu) {
            return Err(PcccError::invalid_parameter(
                "max_pdu",
                format!("must be between {} and {}", MIN_PDU, MAX_PDU),
            ));
        }
        Ok(Self {
            max_pdu,
            max_gap,
            optimize,
        })
    }

    /// PDU size.
    pub fn max_pdu(&self) -> usize {
        self.max_pdu
    }

    /// Largest gap in bytes bridged when merging reads.
    pub fn max_gap(&self) -> usize {
        self.max_gap
    }

    /// Whether reads are merged at all.
    pub fn optimize(&self) -> bool {
        self.optimize
    }

    /// Largest data size of one read request.
    pub fn read_chunk(&self) -> usize {
        4 * (self.max_pdu.saturating_sub(18) / 4)
    }

    /// Largest data size of one write request.
    pub fn write_chunk(&self) -> usize {
        4 * (self.max_pdu.saturating_sub(30) / 4)
    }
}

/// Largest multiple of `stride` not above `chunk`, and at least one stride.
fn part_size(chunk: usize, stride: usize) -> usize {
    ((chunk / stride) * stride).max(stride)
}

/// Position of one item inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMember {
    /// Index of the item in the slice passed to the planner.
    pub item: usize,
    /// Offset of the item's first byte from the block start.
    pub byte_offset: usize,
}

/// A contiguous byte range of one data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// File type.
    pub file_type: FileType,
    /// File number.
    pub file: u16,
    /// First byte within the file.
    pub start: usize,
    /// Bytes covered.
    pub byte_length: usize,
    /// Where the block's bytes live in the plan's buffer.
    pub arena_offset: usize,
    /// Items served by this block.
    pub members: Vec<BlockMember>,
}

/// What a wire request does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireOp {
    /// Typed logical read.
    Read,
    /// Typed logical write of these bytes.
    Write(Bytes),
    /// Masked write of one word.
    MaskedWrite {
        /// Bits to change.
        mask: u16,
        /// New state of the masked bits.
        value: u16,
    },
}

/// One request sent in one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    /// Index of the owning block.
    pub block: usize,
    /// File type.
    pub file_type: FileType,
    /// File number.
    pub file: u16,
    /// First element.
    pub element: u16,
    /// Word within the element.
    pub subelement: u16,
    /// Offset from the block start.
    pub byte_offset: usize,
    /// Bytes transferred.
    pub byte_length: usize,
    /// Operation.
    pub op: WireOp,
}

impl WireRequest {
    /// Serializes the PCCC command for this request.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer size does not fit one command.
    pub fn command_bytes(&self) -> Result<Vec<u8>> {
        let (ft, file, el, sub) = (self.file_type, self.file, self.element, self.subelement);
        let bytes = match &self.op {
            WireOp::Read => ReadCommand::new(ft, file, el, sub, self.byte_length)?.to_bytes(),
            WireOp::Write(data) => WriteCommand::new(ft, file, el, sub, data.to_vec())?.to_bytes(),
            WireOp::MaskedWrite { mask, value } => {
                MaskedWriteCommand::new(ft, file, el, sub, *mask, *value)?.to_bytes()
            }
        };
        Ok(bytes)
    }
}

/// Blocks and requests for one read cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadPlan {
    /// Merged blocks, laid out back to back in a buffer of `arena_len` bytes.
    pub blocks: Vec<Block>,
    /// Requests in dispatch order.
    pub requests: Vec<WireRequest>,
    /// Total buffer size.
    pub arena_len: usize,
    /// Items that cannot be addressed by any request.
    pub rejected: Vec<usize>,
}

impl ReadPlan {
    /// Returns the buffer range holding `item`, if it was planned.
    pub fn locate(&self, item: usize, addresses: &[Address]) -> Option<std::ops::Range<usize>> {
        let len = addresses.get(item)?.byte_length();
        self.blocks.iter().find_map(|block| {
            block
                .members
                .iter()
                .find(|m| m.item == item)
                .map(|m| {
                    let start = block.arena_offset + m.byte_offset;
                    start..start + len
                })
        })
    }
}

/// Bytes read for an item, rounded up to whole elements.
fn read_extent(address: &Address) -> usize {
    let stride = address.file_type().stride();
    address.byte_length().div_ceil(stride) * stride
}

fn file_start(address: &Address) -> usize {
    usize::from(address.element()) * address.file_type().stride()
}

/// Plans a read cycle.
///
/// Every planned item appears in exactly one block. Items whose last element
/// lies beyond the addressable range are listed in [`ReadPlan::rejected`].
pub fn plan_reads(items: &[Address], config: &OptimizerConfig) -> ReadPlan {
    let mut plan = ReadPlan::default();

    let mut order: Vec<usize> = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let stride = item.file_type().stride();
        let last_element = (file_start(item) + read_extent(item)) / stride - 1;
        if last_element > usize::from(u16::MAX) {
            plan.rejected.push(i);
        } else {
            order.push(i);
        }
    }
    order.sort_by_key(|&i| {
        let a = &items[i];
        (
            a.area_code(),
            a.file_type(),
            a.file(),
            file_start(a),
            a.bit(),
            Reverse(a.byte_length()),
        )
    });

    for i in order {
        let item = &items[i];
        let start = file_start(item);
        let end = start + read_extent(item);
        let chunk = part_size(config.read_chunk(), item.file_type().stride());

        if let Some(block) = plan.blocks.last_mut() {
            let block_end = block.start + block.byte_length;
            let mergeable = config.optimize
                && block.file_type == item.file_type()
                && block.file == item.file()
                && end - block.start <= chunk.max(block.byte_length)
                && start.saturating_sub(block_end) <= config.max_gap;
            if mergeable {
                block.byte_length = block.byte_length.max(end - block.start);
                block.members.push(BlockMember {
                    item: i,
                    byte_offset: start - block.start,
                });
                continue;
            }
        }
        plan.blocks.push(Block {
            file_type: item.file_type(),
            file: item.file(),
            start,
            byte_length: end - start,
            arena_offset: 0,
            members: vec![BlockMember {
                item: i,
                byte_offset: 0,
            }],
        });
    }

    let mut arena = 0;
    for (index, block) in plan.blocks.iter_mut().enumerate() {
        block.arena_offset = arena;
        arena += block.byte_length;

        let stride = block.file_type.stride();
        let chunk = part_size(config.read_chunk(), stride);
        let mut offset = 0;
        while offset < block.byte_length {
            let len = chunk.min(block.byte_length - offset);
            plan.requests.push(WireRequest {
                block: index,
                file_type: block.file_type,
                file: block.file,
                element: ((block.start + offset) / stride) as u16,
                subelement: 0,
                byte_offset: offset,
                byte_length: len,
                op: WireOp::Read,
            });
            offset += len;
        }
    }
    plan.arena_len = arena;

    debug!(
        items = items.len(),
        blocks = plan.blocks.len(),
        requests = plan.requests.len(),
        "planned read cycle"
    );
    plan
}

/// A resolved write with its encoded data.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteItem {
    /// Target address.
    pub address: Address,
    /// Bytes from [`encode`](crate::encode), [`Address::write_byte_length`] long.
    pub data: Vec<u8>,
}

/// Blocks and requests for one write cycle.
#[derive(Debug, Default)]
pub struct WritePlan {
    /// One block per accepted item.
    pub blocks: Vec<Block>,
    /// Requests in dispatch order.
    pub requests: Vec<WireRequest>,
    /// Items refused before sending, with the reason.
    pub rejected: Vec<(usize, PcccError)>,
}

/// Plans a write cycle.
///
/// Each item is planned on its own; a rejected item does not affect others.
pub fn plan_writes(items: &[WriteItem], config: &OptimizerConfig) -> WritePlan {
    let mut plan = WritePlan::default();
    for (i, item) in items.iter().enumerate() {
        let index = plan.blocks.len();
        match write_requests(index, item, config) {
            Ok(requests) => {
                plan.blocks.push(Block {
                    file_type: item.address.file_type(),
                    file: item.address.file(),
                    start: file_start(&item.address),
                    byte_length: item.data.len(),
                    arena_offset: 0,
                    members: vec![BlockMember {
                        item: i,
                        byte_offset: 0,
                    }],
                });
                plan.requests.extend(requests);
            }
            Err(e) => plan.rejected.push((i, e)),
        }
    }
    debug!(
        items = items.len(),
        requests = plan.requests.len(),
        rejected = plan.rejected.len(),
        "planned write cycle"
    );
    plan
}

fn write_requests(
    block: usize,
    item: &WriteItem,
    config: &OptimizerConfig,
) -> Result<Vec<WireRequest>> {
    let address = &item.address;
    let name = address.to_string();
    if item.data.len() != address.write_byte_length() {
        return Err(PcccError::invalid_value(
            name,
            format!(
                "expected {} bytes, got {}",
                address.write_byte_length(),
                item.data.len()
            ),
        ));
    }
    let base = WireRequest {
        block,
        file_type: address.file_type(),
        file: address.file(),
        element: address.element(),
        subelement: 0,
        byte_offset: 0,
        byte_length: 0,
        op: WireOp::Read,
    };

    match address.kind() {
        DataKind::Bit => masked_bit_writes(base, item),
        DataKind::Structure { field: None, .. } => Err(PcccError::invalid_value(
            name,
            "whole timer, counter and control elements cannot be written; write .PRE/.ACC or a bit",
        )),
        DataKind::Structure {
            field: Some(field), ..
        } => Ok(vec![WireRequest {
            subelement: field.subelement(),
            byte_length: 2,
            op: WireOp::Write(Bytes::copy_from_slice(&item.data)),
            ..base
        }]),
        _ => {
            let stride = address.file_type().stride();
            let chunk = part_size(config.write_chunk(), stride);
            let mut requests = Vec::new();
            let mut offset = 0;
            while offset < item.data.len() {
                let len = chunk.min(item.data.len() - offset);
                let element = usize::from(address.element()) + offset / stride;
                let element = u16::try_from(element).map_err(|_| {
                    PcccError::invalid_value(name.as_str(), "element offset out of range")
                })?;
                requests.push(WireRequest {
                    element,
                    byte_offset: offset,
                    byte_length: len,
                    op: WireOp::Write(Bytes::copy_from_slice(&item.data[offset..offset + len])),
                    ..base.clone()
                });
                offset += len;
            }
            Ok(requests)
        }
    }
}

/// One masked write per touched 16-bit word, in address order.
fn masked_bit_writes(base: WireRequest, item: &WriteItem) -> Result<Vec<WireRequest>> {
    let address = &item.address;
    let stride = address.file_type().stride();
    let bits_per_element = stride * 8;
    let first = usize::from(address.bit());

    let mut requests: Vec<WireRequest> = Vec::new();
    for index in first..first + usize::from(address.count()) {
        let element = usize::from(address.element()) + index / bits_per_element;
        let within = index % bits_per_element;
        let subelement = within / 16;
        if stride == 4 && subelement > 0 {
            return Err(PcccError::invalid_value(
                address.to_string(),
                "bits 16-31 of a 4-byte element cannot be written",
            ));
        }
        let element = u16::try_from(element).map_err(|_| {
            PcccError::invalid_value(address.to_string(), "element offset out of range")
        })?;
        let bit = 1u16 << (within % 16);
        let state = packed_bit(&item.data, index).unwrap_or(false);

        let position = requests
            .iter()
            .position(|r| r.element == element && usize::from(r.subelement) == subelement);
        let position = match position {
            Some(p) => p,
            None => {
                requests.push(WireRequest {
                    element,
                    subelement: subelement as u16,
                    byte_offset: usize::from(element - address.element()) * stride
                        + subelement * 2,
                    byte_length: 2,
                    op: WireOp::MaskedWrite { mask: 0, value: 0 },
                    ..base.clone()
                });
                requests.len() - 1
            }
        };
        if let WireOp::MaskedWrite { mask, value } = &mut requests[position].op {
            *mask |= bit;
            if state {
                *value |= bit;
            }
        }
    }
    Ok(requests)
}
