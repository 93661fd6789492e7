//! A model of the native code size of a callee, driven by its opcodes in IL order.
//!
//! Each opcode has a weight, in bytes * [super::SIZE_SCALE], and some adjacent pairs of opcodes
//! are discounted because code generation folds them together (e.g. a compare feeding a branch).

use crate::method::Opcode;

/// The weight of a `ldarga`/`ldloca` whose address is only used to access a field, which code
/// generation turns into a direct access.
const NORMED_ADDRESS_WEIGHT: i32 = 21;

fn weight(op: Opcode) -> i32 {
    use Opcode::*;
    match op {
        Nop => 0,
        Ldarg | Ldloc => 12,
        Ldarga | Ldloca => 42,
        Starg => 30,
        Stloc => 20,
        Ldnull => 8,
        LdcI4 => 14,
        LdcI8 => 38,
        LdcR4 => 50,
        LdcR8 => 60,
        Dup => 10,
        Pop => 5,
        Jmp => 60,
        Call => 78,
        Calli => 90,
        Callvirt => 88,
        Ret => 10,
        Br => 18,
        BrCond => 30,
        Switch => 70,
        LdindI | LdindR | LdindRef => 20,
        StindI | StindR | StindRef => 25,
        Add | Sub | And | Or | Xor => 15,
        Mul => 25,
        Div | DivUn | Rem | RemUn => 60,
        Shl | Shr | ShrUn => 20,
        Neg | Not => 10,
        ConvI => 8,
        ConvR => 30,
        ConvOvf | AddOvf | MulOvf | SubOvf => 40,
        Ckfinite => 50,
        Ceq | Cgt | Clt => 25,
        Cpobj => 60,
        Ldobj => 30,
        Stobj => 35,
        Ldstr => 55,
        Newobj => 120,
        Castclass => 70,
        Isinst => 60,
        Unbox => 50,
        UnboxAny => 55,
        Box => 110,
        Throw | Rethrow => 80,
        Ldfld => 25,
        Ldflda => 20,
        Stfld => 30,
        Ldsfld => 45,
        Ldsflda => 40,
        Stsfld => 50,
        Newarr => 95,
        Ldlen => 18,
        Ldelema => 50,
        LdelemI | LdelemR | Ldelem => 45,
        LdelemRef => 50,
        StelemI | StelemR | Stelem => 55,
        StelemRef => 80,
        Refanyval | Mkrefany | Refanytype => 50,
        Ldtoken => 45,
        Ldftn => 50,
        Ldvirtftn => 70,
        Localloc => 70,
        Endfinally | Endfilter => 20,
        Leave => 25,
        Cpblk | Initblk => 70,
        Initobj => 40,
        Sizeof => 14,
    }
}

/// How much cheaper is `cur` when it immediately follows `prev`?
fn pair_discount(prev: Opcode, cur: Opcode) -> i32 {
    use Opcode::*;
    match (prev, cur) {
        // The field load addresses off the argument register.
        (Ldarg, Ldfld) => 12,
        (Ldarga | Ldloca, Ldfld | Stfld) => 20,
        // The constant becomes an immediate operand.
        (LdcI4, Add | Sub | And | Or | Xor | Shl | Shr | ShrUn | Mul) => 10,
        (LdcI4, Ceq | Cgt | Clt) => 10,
        // Compare and branch fuse.
        (Ceq | Cgt | Clt, BrCond) => 20,
        _ => 0,
    }
}

/// The code-sequence size model for one callee.
#[derive(Clone, Debug, Default)]
pub(crate) struct CodeSeqModel {
    native_size: i32,
    prev: Option<Opcode>,
}

impl CodeSeqModel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Account for the next opcode. `normed` means the importer has established that an address
    /// taken by `op` is only used for a field access.
    pub(crate) fn run(&mut self, op: Opcode, normed: bool) {
        let w = match op {
            Opcode::Ldarga | Opcode::Ldloca if normed => NORMED_ADDRESS_WEIGHT,
            _ => weight(op),
        };
        let discount = self.prev.map_or(0, |prev| pair_discount(prev, op)).min(w);
        self.native_size += w - discount;
        self.prev = Some(op);
    }

    /// The opcode stream has ended.
    pub(crate) fn end(&mut self) {
        self.prev = None;
    }

    /// The estimated native size so far, in bytes * [super::SIZE_SCALE].
    pub(crate) fn native_size(&self) -> i32 {
        self.native_size
    }
}
