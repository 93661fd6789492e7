//! Values describing methods and call sites, as handed to us by the importer. This crate never
//! parses IL itself: everything here is read, never derived.

use strum::{EnumCount, FromRepr};

/// The size of a pointer on the target, used to round struct sizes up to stack slots.
pub const TARGET_POINTER_SIZE: u32 = 8;

/// An opaque handle identifying a method to the host.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MethodHandle(pub u64);

/// The root method of one compilation.
#[derive(Clone, Debug)]
pub struct RootMethod {
    pub handle: MethodHandle,
    /// The metadata token of the method.
    pub token: u32,
    /// A hash of the method, stable across runs.
    pub hash: u32,
    pub il_size: u32,
    /// Is this an ahead-of-time compilation?
    pub is_prejit: bool,
    /// Has the host asked to favour speed over size?
    pub is_speed_opt: bool,
    /// Is block profile data available for the root?
    pub has_profile_data: bool,
    /// Is that profile data trustworthy (i.e. not a static estimate)?
    pub has_trusted_profile: bool,
}

impl RootMethod {
    pub fn new(handle: MethodHandle, token: u32, hash: u32, il_size: u32) -> Self {
        Self {
            handle,
            token,
            hash,
            il_size,
            is_prejit: false,
            is_speed_opt: false,
            has_profile_data: false,
            has_trusted_profile: false,
        }
    }
}

/// One call instruction in a caller's body.
#[derive(Clone, Debug)]
pub struct CallSite {
    /// The IR node id of the call, used to cross-reference dumps with the IR.
    pub tree_id: u32,
    pub callee: MethodHandle,
    /// The IL offset of the call in its immediate caller, if known.
    pub il_offset: Option<u32>,
    pub devirtualized: bool,
    pub guarded: bool,
    pub unboxed: bool,
}

impl CallSite {
    pub fn new(tree_id: u32, callee: MethodHandle, il_offset: Option<u32>) -> Self {
        Self {
            tree_id,
            callee,
            il_offset,
            devirtualized: false,
            guarded: false,
            unboxed: false,
        }
    }
}

/// The subset of signature types the heuristics distinguish. The discriminants are those of the
/// host's type enumeration, so that data dumps are comparable with the host's own tooling.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, EnumCount, FromRepr, Eq, PartialEq)]
pub enum CorType {
    #[default]
    Undef,
    Void,
    Bool,
    Char,
    Byte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    NativeInt,
    NativeUInt,
    Float,
    Double,
    String,
    Ptr,
    ByRef,
    ValueClass,
    Class,
    RefAny,
    Var,
}

/// A single argument in a method signature.
#[derive(Clone, Copy, Debug)]
pub struct ArgInfo {
    pub ty: CorType,
    /// The size in bytes of a [CorType::ValueClass] argument. Ignored for other types.
    pub size: u32,
}

impl ArgInfo {
    pub fn new(ty: CorType) -> Self {
        Self { ty, size: 0 }
    }

    pub fn value_class(size: u32) -> Self {
        Self {
            ty: CorType::ValueClass,
            size,
        }
    }

    /// How many pointer-sized stack slots does this argument occupy?
    pub fn slots(&self) -> u32 {
        match self.ty {
            CorType::ValueClass => self.size.div_ceil(TARGET_POINTER_SIZE),
            _ => 1,
        }
    }
}

/// What the host knows about a callee's signature and body.
#[derive(Clone, Debug)]
pub struct MethodInfo {
    pub handle: MethodHandle,
    pub il_size: u32,
    pub max_stack: u32,
    pub has_this: bool,
    /// Does the method take a hidden generic context argument?
    pub has_type_arg: bool,
    /// The explicit arguments, not including `this` or the generic context.
    pub args: Vec<ArgInfo>,
    pub locals: u32,
    pub return_type: CorType,
    /// The size in bytes of a [CorType::ValueClass] return value.
    pub return_size: u32,
}

impl MethodInfo {
    pub fn new(handle: MethodHandle, il_size: u32) -> Self {
        Self {
            handle,
            il_size,
            max_stack: 8,
            has_this: false,
            has_type_arg: false,
            args: Vec::new(),
            locals: 0,
            return_type: CorType::Void,
            return_size: 0,
        }
    }
}

/// IL opcodes, folded where the heuristics do not tell the forms apart (e.g. `ldarg.0` and
/// `ldarg.s` are both [Opcode::Ldarg]). Noted via `CalleeOpcode` as their `u8` value.
#[repr(u8)]
#[derive(Clone, Copy, Debug, EnumCount, FromRepr, Eq, Hash, PartialEq)]
pub enum Opcode {
    Nop,
    Ldarg,
    Ldarga,
    Starg,
    Ldloc,
    Ldloca,
    Stloc,
    Ldnull,
    LdcI4,
    LdcI8,
    LdcR4,
    LdcR8,
    Dup,
    Pop,
    Jmp,
    Call,
    Calli,
    Callvirt,
    Ret,
    Br,
    BrCond,
    Switch,
    LdindI,
    LdindR,
    LdindRef,
    StindI,
    StindR,
    StindRef,
    Add,
    Sub,
    Mul,
    Div,
    DivUn,
    Rem,
    RemUn,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,
    Neg,
    Not,
    ConvI,
    ConvR,
    ConvOvf,
    AddOvf,
    MulOvf,
    SubOvf,
    Ckfinite,
    Ceq,
    Cgt,
    Clt,
    Cpobj,
    Ldobj,
    Stobj,
    Ldstr,
    Newobj,
    Castclass,
    Isinst,
    Unbox,
    UnboxAny,
    Box,
    Throw,
    Rethrow,
    Ldfld,
    Ldflda,
    Stfld,
    Ldsfld,
    Ldsflda,
    Stsfld,
    Newarr,
    Ldlen,
    Ldelema,
    LdelemI,
    LdelemR,
    LdelemRef,
    Ldelem,
    StelemI,
    StelemR,
    StelemRef,
    Stelem,
    Refanyval,
    Mkrefany,
    Refanytype,
    Ldtoken,
    Ldftn,
    Ldvirtftn,
    Localloc,
    Endfinally,
    Endfilter,
    Leave,
    Cpblk,
    Initblk,
    Initobj,
    Sizeof,
}

impl Opcode {
    /// Does this opcode only move data between the stack and arguments, locals, constants,
    /// fields, array elements or memory?
    pub fn is_load_store(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Ldarg
                | Ldarga
                | Starg
                | Ldloc
                | Ldloca
                | Stloc
                | Ldnull
                | LdcI4
                | LdcI8
                | LdcR4
                | LdcR8
                | LdindI
                | LdindR
                | LdindRef
                | StindI
                | StindR
                | StindRef
                | Ldfld
                | Ldflda
                | Stfld
                | Ldsfld
                | Ldsflda
                | Stsfld
                | Stobj
                | Ldelema
                | LdelemI
                | LdelemR
                | LdelemRef
                | Ldelem
                | StelemI
                | StelemR
                | StelemRef
                | Stelem
                | Pop
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arg_slots() {
        assert_eq!(ArgInfo::new(CorType::Int).slots(), 1);
        assert_eq!(ArgInfo::value_class(1).slots(), 1);
        assert_eq!(ArgInfo::value_class(8).slots(), 1);
        assert_eq!(ArgInfo::value_class(9).slots(), 2);
        assert_eq!(ArgInfo::value_class(24).slots(), 3);
    }

    #[test]
    fn opcode_repr() {
        assert_eq!(Opcode::from_repr(0), Some(Opcode::Nop));
        assert_eq!(
            Opcode::from_repr(Opcode::Sizeof as u8),
            Some(Opcode::Sizeof)
        );
        assert_eq!(Opcode::from_repr(Opcode::COUNT as u8), None);
    }

    #[test]
    fn load_store() {
        assert!(Opcode::Ldarg.is_load_store());
        assert!(Opcode::Pop.is_load_store());
        assert!(Opcode::Stelem.is_load_store());
        assert!(!Opcode::Call.is_load_store());
        assert!(!Opcode::Add.is_load_store());
        assert!(!Opcode::Ret.is_load_store());
    }
}
