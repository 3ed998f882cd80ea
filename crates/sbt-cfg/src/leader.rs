//! Basic-block leader discovery.
//!
//! Walks a function's decoded instruction stream once to find every
//! address that must begin a block: the function entry, every
//! branch/jump target, and every fall-through after a terminator.

use std::collections::{BTreeSet, HashMap, HashSet};

use sbt_isa::{Instruction, Opcode, Operands};

/// Resolved control-flow edges out of a linear instruction stream.
#[derive(Clone, Debug, Default)]
pub struct LeaderAnalysis {
    pub leaders: BTreeSet<u32>,
    pub predecessors: HashMap<u32, HashSet<u32>>,
    /// Addresses of `JALR`/indirect-jump instructions whose target could
    /// not be determined statically; resolved later via the icaller
    /// dispatch table rather than as a direct CFG edge.
    pub unresolved: HashSet<u32>,
}

impl LeaderAnalysis {
    fn add_edge(&mut self, from: u32, to: u32) {
        self.leaders.insert(to);
        self.predecessors.entry(to).or_default().insert(from);
    }
}

/// Find every basic-block leader in `instructions`, a function body given
/// as `(address, instruction)` pairs in ascending address order.
///
/// `entry` is always a leader even if nothing branches to it.
pub fn find_leaders(entry: u32, instructions: &[(u32, Instruction)]) -> LeaderAnalysis {
    let mut analysis = LeaderAnalysis::default();
    analysis.leaders.insert(entry);

    for (i, (pc, instr)) in instructions.iter().enumerate() {
        let next_pc = instructions.get(i + 1).map(|(p, _)| *p);

        match instr.opcode {
            Opcode::Jal => {
                if let Operands::J { imm, .. } = instr.operands {
                    let target = pc.wrapping_add(imm as u32);
                    analysis.add_edge(*pc, target);
                }
            }
            Opcode::Jalr => {
                // Target depends on a register value; not known until
                // runtime, so the CFG edge is left unresolved and the
                // emitter routes through icaller instead.
                analysis.unresolved.insert(*pc);
            }
            _ if instr.opcode.class() == sbt_isa::OpClass::Branch => {
                if let Operands::B { imm, .. } = instr.operands {
                    let target = pc.wrapping_add(imm as u32);
                    analysis.add_edge(*pc, target);
                }
                // Fall-through is always a leader for a conditional branch.
                if let Some(next) = next_pc {
                    analysis.add_edge(*pc, next);
                }
            }
            _ => {}
        }
    }

    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbt_isa::decode;

    fn decode_all(entry: u32, words: &[u32]) -> Vec<(u32, Instruction)> {
        words
            .iter()
            .enumerate()
            .map(|(i, &w)| {
                let pc = entry + (i as u32) * 4;
                (pc, decode(pc, w).unwrap())
            })
            .collect()
    }

    #[test]
    fn unconditional_jump_adds_target_leader() {
        // jal x0, +8  (skip one instruction)
        let words = [0x0080_006f, 0x0000_0013, 0x0000_0013];
        let instrs = decode_all(0x1000, &words);
        let analysis = find_leaders(0x1000, &instrs);
        assert!(analysis.leaders.contains(&0x1008));
    }

    #[test]
    fn branch_adds_target_and_fallthrough() {
        // beq x0, x0, +8
        let words = [0x0000_0463, 0x0000_0013, 0x0000_0013];
        let instrs = decode_all(0x2000, &words);
        let analysis = find_leaders(0x2000, &instrs);
        assert!(analysis.leaders.contains(&0x2008)); // branch target
        assert!(analysis.leaders.contains(&0x2004)); // fall-through
    }

    #[test]
    fn jalr_is_unresolved_not_a_leader_edge() {
        // jalr x1, x5, 0
        let words = [0x0002_80e7];
        let instrs = decode_all(0x3000, &words);
        let analysis = find_leaders(0x3000, &instrs);
        assert!(analysis.unresolved.contains(&0x3000));
    }
}
