//! Packing of `(scope, frame, slot)` into a DAP `variablesReference`.
//!
//! Layout of the 31 usable bits (the wire type is a positive `i32`):
//!
//! ```text
//!  30  29 28          21 20                    0
//! +------+--------------+-----------------------+
//! | scope|  frame + 1   |         slot          |
//! +------+--------------+-----------------------+
//! ```
//!
//! The frame is stored shifted by one, so every valid handle has a non-zero
//! frame field and is therefore never `0`, which the protocol reserves for
//! "no children".

use crate::debuggee::ScopeKind;
use crate::error::Error;

const SLOT_BITS: u32 = 21;
const FRAME_BITS: u32 = 8;
const SCOPE_BITS: u32 = 2;

const FRAME_OFFSET: u32 = SLOT_BITS;
const SCOPE_OFFSET: u32 = SLOT_BITS + FRAME_BITS;

const SLOT_MASK: i64 = (1 << SLOT_BITS) - 1;
const FRAME_MASK: i64 = ((1 << FRAME_BITS) - 1) << FRAME_OFFSET;
const SCOPE_MASK: i64 = ((1 << SCOPE_BITS) - 1) << SCOPE_OFFSET;

/// Largest addressable slot, slot `0` addresses the scope itself.
pub const MAX_SLOT: u32 = (1 << SLOT_BITS) - 1;
/// Largest addressable frame id.
pub const MAX_FRAME: usize = (1 << FRAME_BITS) - 2;
/// Largest handle value the codec produces.
pub const MAX_HANDLE: i64 = SCOPE_MASK | FRAME_MASK | SLOT_MASK;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarRef {
    pub scope: ScopeKind,
    pub frame: usize,
    pub slot: u32,
}

impl VarRef {
    /// Return [`None`] if `frame` or `slot` exceed their bit fields.
    pub fn new(scope: ScopeKind, frame: usize, slot: u32) -> Option<Self> {
        (frame <= MAX_FRAME && slot <= MAX_SLOT).then_some(Self { scope, frame, slot })
    }

    /// Handle addressing the whole scope of a frame.
    pub fn scope(scope: ScopeKind, frame: usize) -> Option<Self> {
        Self::new(scope, frame, 0)
    }

    pub fn is_scope_root(&self) -> bool {
        self.slot == 0
    }

    pub fn encode(&self) -> i64 {
        let scope = (self.scope as i64) << SCOPE_OFFSET;
        let frame = (self.frame as i64 + 1) << FRAME_OFFSET;
        scope | frame | self.slot as i64
    }

    pub fn decode(handle: i64) -> Result<Self, Error> {
        if handle <= 0 || handle > MAX_HANDLE {
            return Err(Error::InvalidHandle(handle));
        }

        let stored_frame = (handle & FRAME_MASK) >> FRAME_OFFSET;
        if stored_frame == 0 {
            return Err(Error::InvalidHandle(handle));
        }

        let scope = ScopeKind::try_from(((handle & SCOPE_MASK) >> SCOPE_OFFSET) as u8)
            .map_err(|_| Error::InvalidHandle(handle))?;

        Ok(Self {
            scope,
            frame: stored_frame as usize - 1,
            slot: (handle & SLOT_MASK) as u32,
        })
    }
}
