//! Stackframe field layout (spec.md §4.6 Call Sequencer).
//!
//! A "regular" stackframe is built for any call whose callee is not a
//! subfunction of a stackframe holder; a "tiny" one is built when the
//! callee's own fields 3-5 and locals/shared region are already supplied
//! by its stackframe-holder ancestor.

use crate::config::{Config, GprSize};

/// Fixed, `sizeofgpr`-sized fields at the base of a regular stackframe, in
/// layout order (spec.md §4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegularField {
    /// Field 1: offset from frame base to the return-address field
    /// (stored so an id-scan callee can find it uniformly).
    ReturnAddressFieldOffset,
    /// Field 2: pointer to the caller's stackframe.
    PreviousStackframe,
    /// Field 3: pointer to the lexical parent function's stackframe.
    ParentStackframe,
    /// Field 4: stackframe-id, equal to the callee's code address.
    StackframeId,
    /// Field 5: `this` pointer.
    This,
    /// Field 6: return-variable address.
    RetvarAddress,
    /// Field 7: return address.
    ReturnAddress,
}

/// Fields present in a "tiny" stackframe: only 1, 2, optionally 6.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TinyField {
    ReturnAddressFieldOffset,
    PreviousStackframe,
    RetvarAddress,
}

impl RegularField {
    /// All fields, in ascending offset order.
    pub const ALL: [RegularField; 7] = [
        RegularField::ReturnAddressFieldOffset,
        RegularField::PreviousStackframe,
        RegularField::ParentStackframe,
        RegularField::StackframeId,
        RegularField::This,
        RegularField::RetvarAddress,
        RegularField::ReturnAddress,
    ];

    /// Byte offset of this field from the frame base, given a GPR size.
    pub fn offset(self, sizeofgpr: GprSize) -> u32 {
        let idx = Self::ALL.iter().position(|&f| f == self).unwrap();
        idx as u32 * sizeofgpr as u32
    }
}

impl TinyField {
    pub const ALL_WITH_RETVAR: [TinyField; 3] = [
        TinyField::ReturnAddressFieldOffset,
        TinyField::PreviousStackframe,
        TinyField::RetvarAddress,
    ];
    pub const ALL_WITHOUT_RETVAR: [TinyField; 2] =
        [TinyField::ReturnAddressFieldOffset, TinyField::PreviousStackframe];

    /// Byte offset of this field from the frame base, given whether this
    /// particular tiny frame carries a return-variable address field.
    pub fn offset(self, sizeofgpr: GprSize, has_retvar: bool) -> u32 {
        let fields: &[TinyField] = if has_retvar {
            &Self::ALL_WITH_RETVAR
        } else {
            &Self::ALL_WITHOUT_RETVAR
        };
        let idx = fields.iter().position(|&f| f == self).unwrap();
        idx as u32 * sizeofgpr as u32
    }
}

/// The fixed-field size of a regular stackframe (before its variable-size
/// blocks), in bytes.
pub fn regular_fixed_size(cfg: &Config) -> u32 {
    RegularField::ALL.len() as u32 * cfg.sizeofgpr as u32
}

/// The fixed-field size of a tiny stackframe.
pub fn tiny_fixed_size(cfg: &Config, has_retvar: bool) -> u32 {
    let count = if has_retvar { 3 } else { 2 };
    count * cfg.sizeofgpr as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_field_offsets_are_monotonic() {
        let cfg = Config::default();
        let mut prev = None;
        for field in RegularField::ALL {
            let off = field.offset(cfg.sizeofgpr);
            if let Some(p) = prev {
                assert!(off > p);
            }
            prev = Some(off);
        }
        assert_eq!(regular_fixed_size(&cfg), 7 * cfg.sizeofgpr as u32);
    }

    #[test]
    fn tiny_frame_without_retvar_is_smaller() {
        let cfg = Config::default();
        assert_eq!(tiny_fixed_size(&cfg, false), 2 * cfg.sizeofgpr as u32);
        assert_eq!(tiny_fixed_size(&cfg, true), 3 * cfg.sizeofgpr as u32);
    }
}
