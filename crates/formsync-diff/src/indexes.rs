//! Repeat index changes

use crate::instruction::Instruction;
use crate::sink::InstructionSink;
use formsync_control::EffectiveId;
use std::collections::BTreeMap;

/// Emit a [`Instruction::RepeatIndex`] for every repeat whose index moved
///
/// Repeats absent from `before` are reported when their index is not the
/// client's initial 1; repeats absent from `after` are not reported.
/// Returns the number of instructions emitted.
pub fn diff_repeat_indexes(
    before: &BTreeMap<EffectiveId, usize>,
    after: &BTreeMap<EffectiveId, usize>,
    sink: &mut dyn InstructionSink,
) -> usize {
    let mut emitted = 0;
    for (repeat_id, &index) in after {
        let previous = before.get(repeat_id).copied().unwrap_or(1);
        if previous != index {
            sink.emit(Instruction::RepeatIndex {
                repeat_id: repeat_id.clone(),
                index,
            });
            emitted += 1;
        }
    }
    emitted
}
