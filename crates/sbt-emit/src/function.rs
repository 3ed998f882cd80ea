//! Ties [`sbt_cfg::BBMap`]'s pure address-space analysis to real LLVM
//! basic blocks: creates them lazily as the translator walks a
//! function in address order, and keeps `InstrMap` so later splits can
//! find where an address's first instruction landed.

use std::collections::HashMap;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::values::{FunctionValue, InstructionValue};

use sbt_cfg::BBMap;

use crate::{EmitError, Result};

pub type InstrMap<'ctx> = HashMap<u32, InstructionValue<'ctx>>;

/// Owns one function's `BBMap` plus the LLVM blocks it maps to.
pub struct FunctionBuilder<'ctx> {
    function: FunctionValue<'ctx>,
    bbmap: BBMap,
    llvm_blocks: HashMap<u32, BasicBlock<'ctx>>,
    instr_map: InstrMap<'ctx>,
    next_bb: Option<u32>,
}

impl<'ctx> FunctionBuilder<'ctx> {
    pub fn new(
        context: &'ctx Context,
        builder: &Builder<'ctx>,
        function: FunctionValue<'ctx>,
        entry: u32,
    ) -> Self {
        let entry_bb = context.append_basic_block(function, &format!("bb{entry:x}"));
        builder.position_at_end(entry_bb);

        let mut llvm_blocks = HashMap::new();
        llvm_blocks.insert(entry, entry_bb);

        FunctionBuilder {
            function,
            bbmap: BBMap::new(entry),
            llvm_blocks,
            instr_map: InstrMap::new(),
            next_bb: None,
        }
    }

    pub fn function(&self) -> FunctionValue<'ctx> {
        self.function
    }

    /// Seeds this function's `BBMap` with every leader and predecessor
    /// edge `sbt_cfg::find_leaders` already computed, and closes each
    /// block against the next known leader (or `end`, the function's
    /// exclusive upper bound), so `block_containing`/`split` work off
    /// real boundaries instead of the "still open" fallback from the
    /// first instruction on (spec.md §4.6). Call once, before
    /// translating any instruction.
    pub fn seed(&mut self, leaders: &sbt_cfg::LeaderAnalysis, end: u32) {
        let addrs: Vec<u32> = leaders.leaders.iter().copied().collect();
        for &addr in &addrs {
            self.bbmap.insert_forward_leader(addr);
        }
        for (i, &start) in addrs.iter().enumerate() {
            let block_end = addrs.get(i + 1).copied().unwrap_or(end);
            self.bbmap.close(start, block_end);
        }
        for (&to, froms) in &leaders.predecessors {
            for &from in froms {
                self.bbmap.add_predecessor(to, from);
            }
        }
    }

    pub fn record_first_instruction(&mut self, pc: u32, instr: InstructionValue<'ctx>) {
        self.instr_map.entry(pc).or_insert(instr);
    }

    /// Called before emitting the IR for `pc`: closes the current block
    /// and opens the next one if `pc` has reached it (spec.md §4.6).
    pub fn before_emit(&mut self, builder: &Builder<'ctx>, pc: u32) {
        let Some(next) = self.next_bb else { return };
        if pc != next {
            return;
        }
        let current = builder.get_insert_block().expect("builder must have an insertion point");
        if current.get_terminator().is_none() {
            let target = self.llvm_blocks[&next];
            builder.build_unconditional_branch(target).unwrap();
        }
        builder.position_at_end(self.llvm_blocks[&next]);
        self.next_bb = self.bbmap.next_bb_after(pc);
    }

    pub fn recompute_next_bb(&mut self, pc: u32) {
        self.next_bb = self.bbmap.next_bb_after(pc);
    }

    pub fn llvm_block(&self, addr: u32) -> Option<BasicBlock<'ctx>> {
        self.llvm_blocks.get(&addr).copied()
    }

    /// Forward-jump policy: `target > pc`. Creates a fresh block
    /// positioned before the next-known-greater block.
    pub fn forward_leader(&mut self, context: &'ctx Context, pc: u32, target: u32) -> BasicBlock<'ctx> {
        if let Some(existing) = self.llvm_blocks.get(&target) {
            return *existing;
        }
        self.bbmap.insert_forward_leader(target);
        let name = format!("bb{target:x}");
        let new_bb = match self.bbmap.next_bb_after(target).and_then(|a| self.llvm_blocks.get(&a)) {
            Some(next_block) => next_block.prepend_basic_block(&name),
            None => context.append_basic_block(self.function, &name),
        };
        self.llvm_blocks.insert(target, new_bb);
        if self.next_bb.map(|n| target < n).unwrap_or(true) && target > pc {
            self.next_bb = Some(target);
        }
        new_bb
    }

    /// Backward-jump split policy: splits the block containing `target`
    /// into `[start, target)` / `[target, end)`, inserting a dummy
    /// `retVoid` first if the block has no terminator yet, per
    /// `splitBB`'s precondition, and removing it again afterward.
    pub fn split_at(&mut self, builder: &Builder<'ctx>, target: u32) -> Result<BasicBlock<'ctx>> {
        let (orig_start, _) = {
            let span = self
                .bbmap
                .block_containing(target)
                .ok_or(EmitError::Internal(format!("split target 0x{target:08x} is in no known block")))?;
            (span.start, span.end)
        };
        if orig_start == target {
            return Ok(self.llvm_blocks[&target]);
        }

        let split_instr = *self
            .instr_map
            .get(&target)
            .ok_or_else(|| EmitError::Internal(format!("no instruction recorded for split target 0x{target:08x}")))?;

        let orig_bb = self.llvm_blocks[&orig_start];
        let had_terminator = orig_bb.get_terminator().is_some();
        let dummy = if !had_terminator {
            let saved = builder.get_insert_block();
            builder.position_at_end(orig_bb);
            let dummy = builder.build_return(None).unwrap();
            if let Some(saved) = saved {
                builder.position_at_end(saved);
            }
            Some(dummy)
        } else {
            None
        };

        let new_bb = orig_bb.get_next_basic_block().map_or_else(
            || orig_bb.get_context().append_basic_block(self.function, &format!("bb{target:x}")),
            |after| after.prepend_basic_block(&format!("bb{target:x}")),
        );

        let mut cursor = Some(split_instr);
        while let Some(instr) = cursor {
            let next = instr.get_next_instruction();
            instr.remove_from_basic_block();
            builder.position_at_end(new_bb);
            builder.insert_instruction(&instr, None);
            cursor = next;
        }

        if let Some(dummy) = dummy {
            dummy.remove_from_basic_block();
            builder.position_at_end(orig_bb);
            builder.build_unconditional_branch(new_bb).unwrap();
        }

        self.bbmap.split(target)?;
        self.llvm_blocks.insert(target, new_bb);
        Ok(new_bb)
    }
}
