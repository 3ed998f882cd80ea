//! RISC-V integer register numbering (RV32I ABI names).

/// An integer register index in `0..32`.
///
/// `Reg(0)` is `x0`, hardwired to zero; the register file (`sbt-emit`)
/// treats writes to it as no-ops and reads as the constant zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reg(pub u8);

impl Reg {
    pub const ZERO: Reg = Reg(0);
    pub const RA: Reg = Reg(1);
    pub const SP: Reg = Reg(2);
    pub const GP: Reg = Reg(3);
    pub const TP: Reg = Reg(4);
    pub const T0: Reg = Reg(5);
    pub const T1: Reg = Reg(6);
    pub const T2: Reg = Reg(7);
    pub const S0: Reg = Reg(8);
    pub const S1: Reg = Reg(9);
    pub const A0: Reg = Reg(10);
    pub const A1: Reg = Reg(11);
    pub const A2: Reg = Reg(12);
    pub const A3: Reg = Reg(13);
    pub const A4: Reg = Reg(14);
    pub const A5: Reg = Reg(15);
    pub const A6: Reg = Reg(16);
    pub const A7: Reg = Reg(17);
    pub const T3: Reg = Reg(28);
    pub const T4: Reg = Reg(29);
    pub const T5: Reg = Reg(30);
    pub const T6: Reg = Reg(31);

    /// Decode a 5-bit register field.
    pub const fn from_bits(bits: u32) -> Self {
        Self((bits & 0x1f) as u8)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Offset this register by `n` (used to walk `A0..A0+n` argument lists).
    pub const fn offset(self, n: u8) -> Self {
        Self(self.0 + n)
    }

    /// ABI name, used for IR value names and disassembly.
    pub const fn abi_name(self) -> &'static str {
        match self.0 {
            0 => "zero",
            1 => "ra",
            2 => "sp",
            3 => "gp",
            4 => "tp",
            5 => "t0",
            6 => "t1",
            7 => "t2",
            8 => "s0",
            9 => "s1",
            10 => "a0",
            11 => "a1",
            12 => "a2",
            13 => "a3",
            14 => "a4",
            15 => "a5",
            16 => "a6",
            17 => "a7",
            18 => "s2",
            19 => "s3",
            20 => "s4",
            21 => "s5",
            22 => "s6",
            23 => "s7",
            24 => "s8",
            25 => "s9",
            26 => "s10",
            27 => "s11",
            28 => "t3",
            29 => "t4",
            30 => "t5",
            31 => "t6",
            _ => "x?",
        }
    }
}

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.abi_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_register_is_x0() {
        assert_eq!(Reg::ZERO, Reg(0));
        assert!(Reg::ZERO.is_zero());
        assert!(!Reg::A0.is_zero());
    }

    #[test]
    fn abi_names_match_convention() {
        assert_eq!(Reg::RA.abi_name(), "ra");
        assert_eq!(Reg::A0.abi_name(), "a0");
        assert_eq!(Reg::T6.abi_name(), "t6");
    }

    #[test]
    fn offset_walks_argument_registers() {
        assert_eq!(Reg::A0.offset(1), Reg::A1);
        assert_eq!(Reg::A0.offset(7), Reg::A7);
    }
}
