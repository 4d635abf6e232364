//! Renders an encoded word stream back into readable text.

use crate::encode::decode_push;
use crate::Opcode;

use replay_types::ProtocolType;

use std::fmt::Write;

/// Disassemble packed instruction words, one rendered line per logical
/// instruction (a `PushI` and its `Extend`s collapse into one line).
///
/// Malformed words render as `.word`; the disassembler never fails, so it
/// can be pointed at arbitrary payload bytes while debugging.
pub fn disassemble(words: &[u32]) -> String {
    let mut out = String::new();
    let mut at = 0;
    while at < words.len() {
        let word = words[at];
        let payload = word & 0x03ff_ffff;
        let _ = write!(out, "{at:06}: ");
        match Opcode::from_word(word) {
            Some(Opcode::PushI) => {
                if let Some((ty, bits, used)) = decode_push(words, at) {
                    let _ = writeln!(out, "push.{} {bits:#x}", type_suffix(ty));
                    at += used;
                    continue;
                }
                let _ = writeln!(out, ".word {word:#010x}");
            }
            Some(Opcode::Call) => {
                let api = (word >> 17) & 0xf;
                let push_return = word >> 16 & 1 == 1;
                let function = word & 0xffff;
                let _ = writeln!(
                    out,
                    "call api={api} fn={function:#x}{}",
                    if push_return { " push" } else { "" }
                );
            }
            Some(op @ (Opcode::LoadC | Opcode::LoadV | Opcode::Load)) => {
                let ty = ProtocolType::from_wire(((word >> 20) & 0x3f) as u8);
                let suffix = ty.map(type_suffix).unwrap_or("?");
                let name = match op {
                    Opcode::LoadC => "loadc",
                    Opcode::LoadV => "loadv",
                    _ => "load",
                };
                let _ = writeln!(out, "{name}.{suffix} {:#x}", word & 0x000f_ffff);
            }
            Some(Opcode::InlineResource) => {
                let _ = writeln!(out, "inlres {payload} words");
                at += payload as usize;
            }
            Some(op) => {
                let _ = writeln!(out, "{} {payload:#x}", name(op));
            }
            None => {
                let _ = writeln!(out, ".word {word:#010x}");
            }
        }
        at += 1;
    }
    out
}

fn name(op: Opcode) -> &'static str {
    match op {
        Opcode::Call => "call",
        Opcode::PushI => "pushi",
        Opcode::LoadC => "loadc",
        Opcode::LoadV => "loadv",
        Opcode::Load => "load",
        Opcode::Pop => "pop",
        Opcode::StoreV => "storev",
        Opcode::Store => "store",
        Opcode::Resource => "resource",
        Opcode::Post => "post",
        Opcode::Copy => "copy",
        Opcode::Clone => "clone",
        Opcode::Strcpy => "strcpy",
        Opcode::Extend => "extend",
        Opcode::Add => "add",
        Opcode::Label => "label",
        Opcode::SwitchThread => "switchthread",
        Opcode::JumpLabel => "jump",
        Opcode::JumpNZ => "jumpnz",
        Opcode::JumpZ => "jumpz",
        Opcode::Notification => "notification",
        Opcode::Wait => "wait",
        Opcode::InlineResource => "inlres",
        Opcode::Nop => "nop",
    }
}

fn type_suffix(ty: ProtocolType) -> &'static str {
    match ty {
        ProtocolType::Bool => "bool",
        ProtocolType::I8 => "i8",
        ProtocolType::I16 => "i16",
        ProtocolType::I32 => "i32",
        ProtocolType::I64 => "i64",
        ProtocolType::U8 => "u8",
        ProtocolType::U16 => "u16",
        ProtocolType::U32 => "u32",
        ProtocolType::U64 => "u64",
        ProtocolType::Float => "f32",
        ProtocolType::Double => "f64",
        ProtocolType::AbsolutePointer => "aptr",
        ProtocolType::ConstantPointer => "cptr",
        ProtocolType::VolatilePointer => "vptr",
        ProtocolType::Void => "void",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Instruction, WordWriter};

    use replay_types::{Resolver, Value};

    struct NoResolve;

    impl Resolver for NoResolve {
        fn pointer_size(&self) -> u32 {
            8
        }

        fn resolve_observed(&self, _: u64) -> (ProtocolType, u64) {
            unreachable!()
        }

        fn resolve_pointer_index(&self, _: u32) -> (ProtocolType, u64) {
            unreachable!()
        }

        fn resolve_temporary(&self, _: u32) -> u64 {
            unreachable!()
        }
    }

    #[test]
    fn renders_a_short_program() {
        let mut w = WordWriter::new();
        for i in [
            Instruction::Label { value: 7 },
            Instruction::Push(Value::U32(0xAAAA_AAAA)),
            Instruction::Store {
                addr: Value::VolatilePointer(0x10),
            },
        ] {
            i.encode(&NoResolve, &mut w).unwrap();
        }
        let text = disassemble(w.words());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("label 0x7"));
        assert!(lines[1].ends_with("push.u32 0xaaaaaaaa"));
        assert!(lines[2].ends_with("storev 0x10"));
    }

    #[test]
    fn malformed_words_do_not_stop_the_stream() {
        let text = disassemble(&[u32::MAX, (Opcode::Nop as u32) << 26]);
        assert!(text.lines().next().unwrap().contains(".word"));
        assert!(text.lines().nth(1).unwrap().contains("nop"));
    }
}
