//! Stack-neutrality checks for inserted instruction spans.

use crate::instruction::Instruction;
use crate::opcode::InstructionSet;
use armor_core::MutatorError;

/// Live stack values the canonical payload expects at its insertion point
pub const PAYLOAD_MIN_DEPTH: usize = 3;

/// Stack value in a simulation: a slot of the starting stack, or a value the
/// span pushed itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Initial(usize),
    Pushed(usize),
}

enum Action {
    /// Reorder or copy the top `n` values
    Shuffle(usize),
    Pop,
    Push,
}

fn action(isa: &InstructionSet, instruction: &Instruction) -> Option<Action> {
    let name = isa.name(instruction.opcode())?;
    let action = match name {
        "NOP" => Action::Shuffle(0),
        "ROT_TWO" => Action::Shuffle(2),
        "ROT_THREE" => Action::Shuffle(3),
        "ROT_FOUR" => Action::Shuffle(4),
        "DUP_TOP" => Action::Shuffle(1),
        "DUP_TOP_TWO" => Action::Shuffle(2),
        "POP_TOP" => Action::Pop,
        "LOAD_CONST" | "LOAD_FAST" | "LOAD_NAME" | "LOAD_GLOBAL" | "LOAD_DEREF"
        | "LOAD_CLOSURE" => Action::Push,
        _ => return None,
    };
    Some(action)
}

/// Number of live values below the span's start that it reads
pub fn required_depth(isa: &InstructionSet, span: &[Instruction]) -> Result<usize, MutatorError> {
    let mut height: i64 = 0;
    let mut needed: i64 = 0;
    for instruction in span {
        let reads = match action(isa, instruction).ok_or_else(|| unsupported(isa, instruction))? {
            Action::Shuffle(n) => n as i64,
            Action::Pop => 1,
            Action::Push => 0,
        };
        needed = needed.max(reads - height);
        height += i64::from(isa.stack_effect(instruction).unwrap_or(0));
    }
    Ok(needed.max(0) as usize)
}

/// Run `span` against a symbolic stack of `depth` values and return the
/// resulting stack, bottom first
pub fn simulate(
    isa: &InstructionSet,
    span: &[Instruction],
    depth: usize,
) -> Result<Vec<Symbol>, MutatorError> {
    let mut stack: Vec<Symbol> = (0..depth).map(Symbol::Initial).collect();
    let mut pushed = 0;

    for instruction in span {
        let name = isa.name(instruction.opcode()).unwrap_or("?");
        let underflow = || {
            MutatorError::NotStackNeutral(format!(
                "{} underflows a stack of {} values",
                name, depth
            ))
        };
        match action(isa, instruction).ok_or_else(|| unsupported(isa, instruction))? {
            Action::Shuffle(n) if stack.len() < n => return Err(underflow()),
            Action::Shuffle(_) => {}
            Action::Pop => {
                stack.pop().ok_or_else(underflow)?;
            }
            Action::Push => {
                stack.push(Symbol::Pushed(pushed));
                pushed += 1;
            }
        }

        let top = stack.len();
        match name {
            "ROT_TWO" => stack.swap(top - 1, top - 2),
            // TOS moves down to third, second and third move up one
            "ROT_THREE" => stack[top - 3..].rotate_right(1),
            "ROT_FOUR" => stack[top - 4..].rotate_right(1),
            "DUP_TOP" => {
                let value = stack[top - 1];
                stack.push(value);
            }
            "DUP_TOP_TWO" => {
                let (second, first) = (stack[top - 2], stack[top - 1]);
                stack.push(second);
                stack.push(first);
            }
            _ => {}
        }
    }

    Ok(stack)
}

/// Reject `span` unless it restores a stack of `depth` live values exactly
pub fn check_stack_neutral(
    isa: &InstructionSet,
    span: &[Instruction],
    depth: usize,
) -> Result<(), MutatorError> {
    let needed = required_depth(isa, span)?;
    if needed > depth {
        return Err(MutatorError::NotStackNeutral(format!(
            "needs {} live stack values, only {} guaranteed",
            needed, depth
        )));
    }

    let net: i32 = span.iter().filter_map(|inst| isa.stack_effect(inst)).sum();
    if net != 0 {
        return Err(MutatorError::NotStackNeutral(format!(
            "net stack effect is {}",
            net
        )));
    }

    let before: Vec<Symbol> = (0..depth).map(Symbol::Initial).collect();
    let after = simulate(isa, span, depth)?;
    if after != before {
        return Err(MutatorError::NotStackNeutral(format!(
            "stack order changes: {:?}",
            after
        )));
    }
    Ok(())
}

fn unsupported(isa: &InstructionSet, instruction: &Instruction) -> MutatorError {
    MutatorError::NotStackNeutral(format!(
        "cannot simulate {}",
        isa.name(instruction.opcode()).unwrap_or("unknown opcode")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutator::canonical_payload;

    fn span(isa: &InstructionSet, names: &[&str]) -> Vec<Instruction> {
        names.iter().map(|name| isa.instruction(name, 0).unwrap()).collect()
    }

    #[test]
    fn test_canonical_payload_is_neutral() {
        let isa = InstructionSet::python27();
        let payload = canonical_payload(&isa).unwrap();
        assert_eq!(required_depth(&isa, &payload).unwrap(), 3);
        assert!(check_stack_neutral(&isa, &payload, 3).is_ok());
        assert!(check_stack_neutral(&isa, &payload, 8).is_ok());
    }

    #[test]
    fn test_rotations() {
        let isa = InstructionSet::python27();
        let after = simulate(&isa, &span(&isa, &["ROT_THREE"]), 3).unwrap();
        assert_eq!(
            after,
            vec![Symbol::Initial(2), Symbol::Initial(0), Symbol::Initial(1)]
        );

        let after = simulate(&isa, &span(&isa, &["ROT_TWO"]), 3).unwrap();
        assert_eq!(
            after,
            vec![Symbol::Initial(0), Symbol::Initial(2), Symbol::Initial(1)]
        );
    }

    #[test]
    fn test_shallow_stack_is_rejected() {
        let isa = InstructionSet::python27();
        let payload = canonical_payload(&isa).unwrap();
        assert!(matches!(
            check_stack_neutral(&isa, &payload, 2),
            Err(MutatorError::NotStackNeutral(_))
        ));
    }

    #[test]
    fn test_unbalanced_spans() {
        let isa = InstructionSet::python27();

        let lone_swap = span(&isa, &["ROT_TWO"]);
        assert!(check_stack_neutral(&isa, &lone_swap, 3).is_err());

        let dup = span(&isa, &["DUP_TOP"]);
        assert!(check_stack_neutral(&isa, &dup, 3).is_err());

        let push_pop = span(&isa, &["LOAD_CONST", "POP_TOP"]);
        assert!(check_stack_neutral(&isa, &push_pop, 0).is_ok());

        let opaque = span(&isa, &["BINARY_ADD"]);
        assert!(check_stack_neutral(&isa, &opaque, 3).is_err());
    }
}
