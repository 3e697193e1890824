//! Trace marker injection.
//!
//! [`instrument`] is a pure function from a parsed class to a rewritten
//! class. For every selected method it
//!
//! 1. calls `begin(tag)` once on entry (after the superclass constructor
//!    call in `<init>`),
//! 2. calls `end()` right before every return instruction, and
//! 3. appends a catch-all handler `end(); athrow` covering the body, with
//!    each injected `end(); return` pair left out of the covered ranges.
//!
//! Offsets, frames and `max_stack` are then rebuilt from the new
//! instruction stream.

use tracex_config::TraceHooks;
use tracex_filter::TagFilter;
use tracing::debug;

use crate::bytes::{ByteReader, PutBytes};
use crate::class::{Attribute, ClassFile};
use crate::code::{
    decode, encode, layout, CodeAttribute, Decoded, ExceptionHandler, Handler, Instruction, Label,
};
use crate::constant_pool::{Constant, ConstantPool};
use crate::error::ClassFileError;
use crate::frames::{decode_frames, encode_frames, initial_locals, Frame, VerificationType};
use crate::opcodes::{self, ATHROW, INVOKESPECIAL, INVOKESTATIC, LDC, LDC_W, NEW};
use crate::stack::max_stack;

/// First class file version whose verifier requires stack map frames.
const STACK_MAP_VERSION: u16 = 50;

/// Result of [`instrument`] when at least one method was rewritten.
#[derive(Debug, Clone)]
pub struct Instrumented {
    /// The rewritten class.
    pub class: ClassFile,
    /// Tags of the rewritten methods, in declaration order.
    pub methods: Vec<String>,
}

/// The trace tag of a method: dotted class name, `#`, method name.
pub fn trace_tag(class_name: &str, method_name: &str) -> String {
    format!("{}#{method_name}", class_name.replace('/', "."))
}

/// Injects trace markers into every method whose tag `filter` selects.
///
/// Returns `None` when no method needed rewriting: nothing matched, the
/// matching methods have no code, or they already start with this tool's
/// own `begin(tag)` prologue. Hook calls written by hand elsewhere in a body
/// do not count.
pub fn instrument(
    class: &ClassFile,
    filter: &TagFilter,
    hooks: &TraceHooks,
) -> Result<Option<Instrumented>, ClassFileError> {
    let pool = &class.constant_pool;
    let class_name = class.name()?.into_owned();

    let mut selected = Vec::new();
    for (index, method) in class.methods.iter().enumerate() {
        let name = method.name(pool)?;
        let tag = trace_tag(&class_name, &name);
        if !filter.matches(&tag) {
            continue;
        }
        let Some(code_index) = method.attribute_index(pool, "Code") else {
            continue;
        };
        let code = CodeAttribute::parse(&method.attributes[code_index].info)
            .map_err(|e| e.in_method(&name))?;
        let decoded = decode(&code.code).map_err(|e| e.in_method(&name))?;
        if has_prologue(&decoded.instructions, pool, hooks, &name, &tag)
            .map_err(|e| e.in_method(&name))?
        {
            debug!(%tag, "already instrumented, skipping");
            continue;
        }
        selected.push((index, code_index, tag, code, decoded));
    }
    if selected.is_empty() {
        return Ok(None);
    }

    let mut out = class.clone();
    let refs = HookRefs {
        begin: out.constant_pool.methodref_index(
            &hooks.owner,
            &hooks.begin,
            TraceHooks::BEGIN_DESCRIPTOR,
        )?,
        end: out
            .constant_pool
            .methodref_index(&hooks.owner, &hooks.end, TraceHooks::END_DESCRIPTOR)?,
    };

    let mut methods = Vec::with_capacity(selected.len());
    for (index, code_index, tag, code, decoded) in selected {
        let method = &class.methods[index];
        let name = method.name(pool)?;
        let descriptor = method.descriptor(pool)?;
        let target = MethodTarget {
            class_name: &class_name,
            name: &name,
            descriptor: &descriptor,
            access_flags: method.access_flags,
            major_version: class.major_version,
            tag: &tag,
        };
        let rewritten = rewrite_method(&mut out.constant_pool, &refs, &target, code, decoded)
            .map_err(|e| e.in_method(&name))?;
        out.methods[index].attributes[code_index].info = rewritten.to_bytes();
        debug!(%tag, "instrumented method");
        methods.push(tag);
    }
    Ok(Some(Instrumented {
        class: out,
        methods,
    }))
}

/// Constant pool indices of the two hook methods.
struct HookRefs {
    begin: u16,
    end: u16,
}

/// Everything about the method being rewritten besides its code.
struct MethodTarget<'a> {
    class_name: &'a str,
    name: &'a str,
    descriptor: &'a str,
    access_flags: u16,
    major_version: u16,
    tag: &'a str,
}

/// Index of the instruction the prologue is inserted before: the first one,
/// or the one after the `super(..)`/`this(..)` call in a constructor.
fn entry_anchor(
    name: &str,
    instructions: &[Instruction],
    pool: &ConstantPool,
) -> Result<Label, ClassFileError> {
    if name != "<init>" {
        return Ok(0);
    }
    Ok(constructor_call(instructions, pool)?.map_or(0, |call| call + 1))
}

/// Whether the method already starts with `ldc <tag>; invokestatic begin`
/// at its entry anchor.
fn has_prologue(
    instructions: &[Instruction],
    pool: &ConstantPool,
    hooks: &TraceHooks,
    name: &str,
    tag: &str,
) -> Result<bool, ClassFileError> {
    let anchor = entry_anchor(name, instructions, pool)?;
    let (Some(load), Some(call)) = (instructions.get(anchor), instructions.get(anchor + 1)) else {
        return Ok(false);
    };
    if !loads_string(load, pool, tag)? || call.opcode() != INVOKESTATIC {
        return Ok(false);
    }
    let Some(index) = call.index_operand() else {
        return Ok(false);
    };
    let callee = pool.member_ref(index)?;
    Ok(callee.owner == hooks.owner.as_str()
        && callee.name == hooks.begin.as_str()
        && callee.descriptor == TraceHooks::BEGIN_DESCRIPTOR)
}

fn loads_string(
    insn: &Instruction,
    pool: &ConstantPool,
    value: &str,
) -> Result<bool, ClassFileError> {
    let index = match insn {
        Instruction::Plain { opcode: LDC, operands } if operands.len() == 1 => operands[0] as u16,
        Instruction::Plain { opcode: LDC_W, .. } => match insn.index_operand() {
            Some(index) => index,
            None => return Ok(false),
        },
        _ => return Ok(false),
    };
    match pool.get(index) {
        Some(Constant::String(utf8)) => Ok(pool.utf8(*utf8)? == value),
        _ => Ok(false),
    }
}

/// Finds the `super(..)`/`this(..)` call in a constructor.
///
/// Every `new` is paired with the next unmatched `<init>` call, so the first
/// `<init>` call without a pending `new` initializes `this`.
fn constructor_call(
    instructions: &[Instruction],
    pool: &ConstantPool,
) -> Result<Option<Label>, ClassFileError> {
    let mut pending = 0usize;
    for (label, insn) in instructions.iter().enumerate() {
        match insn.opcode() {
            NEW => pending += 1,
            INVOKESPECIAL => {
                let index = insn
                    .index_operand()
                    .ok_or_else(|| ClassFileError::code("invokespecial without operand"))?;
                if pool.member_ref(index)?.name != "<init>" {
                    continue;
                }
                if pending == 0 {
                    return Ok(Some(label));
                }
                pending -= 1;
            }
            _ => {}
        }
    }
    Ok(None)
}

/// A `Code` sub-attribute that survives rewriting.
enum Relocatable {
    Lines(Vec<(Label, u16)>),
    Locals(Vec<LocalEntry>),
    StackMap,
}

/// One `LocalVariableTable` or `LocalVariableTypeTable` row.
struct LocalEntry {
    start: Label,
    end: Label,
    name_index: u16,
    descriptor_index: u16,
    slot: u16,
}

fn parse_lines(info: &[u8], code: &Decoded) -> Result<Vec<(Label, u16)>, ClassFileError> {
    let mut r = ByteReader::new(info);
    let count = r.u16()?;
    (0..count)
        .map(|_| Ok((code.label_at(r.u16()? as u32)?, r.u16()?)))
        .collect()
}

fn parse_locals(info: &[u8], code: &Decoded) -> Result<Vec<LocalEntry>, ClassFileError> {
    let mut r = ByteReader::new(info);
    let count = r.u16()?;
    (0..count)
        .map(|_| {
            let start_pc = r.u16()? as u32;
            let length = r.u16()? as u32;
            Ok(LocalEntry {
                start: code.label_at(start_pc)?,
                end: code.label_at(start_pc + length)?,
                name_index: r.u16()?,
                descriptor_index: r.u16()?,
                slot: r.u16()?,
            })
        })
        .collect()
}

fn rewrite_method(
    pool: &mut ConstantPool,
    refs: &HookRefs,
    target: &MethodTarget<'_>,
    code: CodeAttribute,
    decoded: Decoded,
) -> Result<CodeAttribute, ClassFileError> {
    let with_frames = target.major_version >= STACK_MAP_VERSION;
    let initial = if with_frames {
        initial_locals(
            pool,
            target.class_name,
            target.name,
            target.descriptor,
            target.access_flags,
        )?
    } else {
        Vec::new()
    };

    // Expand everything offset-based into labels before the stream moves.
    let old_handlers = decoded.handlers(&code.exception_table)?;
    let mut frames: Vec<Frame> = Vec::new();
    let mut kept: Vec<(u16, Relocatable)> = Vec::new();
    for attribute in &code.attributes {
        let name = pool.utf8(attribute.name_index)?;
        let relocatable = match name.as_ref() {
            "LineNumberTable" => Relocatable::Lines(parse_lines(&attribute.info, &decoded)?),
            "LocalVariableTable" | "LocalVariableTypeTable" => {
                Relocatable::Locals(parse_locals(&attribute.info, &decoded)?)
            }
            "StackMapTable" if with_frames => {
                frames = decode_frames(&attribute.info, &initial, &decoded)?;
                Relocatable::StackMap
            }
            other => {
                debug!(method = target.name, attribute = other, "dropping code attribute");
                continue;
            }
        };
        kept.push((attribute.name_index, relocatable));
    }

    let anchor = entry_anchor(target.name, &decoded.instructions, pool)?;

    let tag_index = pool.string_index(target.tag)?;
    let load_tag = match u8::try_from(tag_index) {
        Ok(index) => Instruction::Plain {
            opcode: LDC,
            operands: vec![index],
        },
        Err(_) => Instruction::with_index(LDC_W, tag_index),
    };
    let end_call = Instruction::with_index(INVOKESTATIC, refs.end);

    // Build the new stream. `remap[old]` is the new label of what used to
    // be at `old`; an injected end call takes over its return's label.
    let old = decoded.instructions;
    let old_len = old.len();
    let mut insns = Vec::with_capacity(old_len + 8);
    let mut remap = vec![0; old_len + 1];
    let mut exits = Vec::new();
    for (label, insn) in old.into_iter().enumerate() {
        if label == anchor {
            insns.push(load_tag.clone());
            insns.push(Instruction::with_index(INVOKESTATIC, refs.begin));
        }
        remap[label] = insns.len();
        if opcodes::is_return(insn.opcode()) {
            exits.push((insns.len(), insns.len() + 2));
            insns.push(end_call.clone());
        }
        insns.push(insn);
    }
    let body_end = insns.len();
    remap[old_len] = body_end;
    for insn in insns.iter_mut() {
        insn.map_targets(|t| remap[t]);
    }

    // Catch-all ranges: the body after the prologue minus each end/return pair.
    let protect_from = remap[anchor.min(old_len)];
    let mut ranges = Vec::new();
    let mut cursor = protect_from;
    for (start, end) in exits {
        if end <= cursor {
            continue;
        }
        if start > cursor {
            ranges.push((cursor, start));
        }
        cursor = end;
    }
    if cursor < body_end {
        ranges.push((cursor, body_end));
    }

    let mut handlers: Vec<Handler> = old_handlers
        .iter()
        .map(|h| Handler {
            start: remap[h.start],
            end: remap[h.end],
            handler: remap[h.handler],
            catch_type: h.catch_type,
        })
        .collect();
    for frame in frames.iter_mut() {
        frame.label = remap[frame.label];
        for item in frame.locals.iter_mut().chain(frame.stack.iter_mut()) {
            if let VerificationType::Uninitialized(label) = item {
                *label = remap[*label];
            }
        }
    }
    if !ranges.is_empty() {
        let handler = body_end;
        insns.push(end_call);
        insns.push(Instruction::simple(ATHROW));
        handlers.extend(ranges.iter().map(|&(start, end)| Handler {
            start,
            end,
            handler,
            catch_type: 0,
        }));
        if with_frames {
            let throwable = pool.class_index("java/lang/Throwable")?;
            frames.push(Frame {
                label: handler,
                locals: Vec::new(),
                stack: vec![VerificationType::Object(throwable)],
            });
        }
    }

    let offsets = layout(&mut insns)?;
    let computed = max_stack(&insns, &handlers, pool)?;
    let at = |label: Label| offsets[label] as u16;

    let mut attributes = Vec::with_capacity(kept.len() + 1);
    let mut wrote_frames = false;
    for (name_index, relocatable) in kept {
        let mut info = Vec::new();
        match relocatable {
            Relocatable::Lines(lines) => {
                info.put_u16(lines.len() as u16);
                for (label, line) in lines {
                    info.put_u16(at(remap[label]));
                    info.put_u16(line);
                }
            }
            Relocatable::Locals(locals) => {
                info.put_u16(locals.len() as u16);
                for local in locals {
                    let start = at(remap[local.start]);
                    info.put_u16(start);
                    info.put_u16(at(remap[local.end]) - start);
                    info.put_u16(local.name_index);
                    info.put_u16(local.descriptor_index);
                    info.put_u16(local.slot);
                }
            }
            Relocatable::StackMap => {
                info = encode_frames(&frames, &initial, &offsets);
                wrote_frames = true;
            }
        }
        attributes.push(Attribute { name_index, info });
    }
    if with_frames && !wrote_frames && !frames.is_empty() {
        attributes.push(Attribute {
            name_index: pool.utf8_index("StackMapTable")?,
            info: encode_frames(&frames, &initial, &offsets),
        });
    }

    Ok(CodeAttribute {
        max_stack: code.max_stack.max(computed),
        max_locals: code.max_locals,
        code: encode(&insns, &offsets),
        exception_table: handlers
            .iter()
            .map(|h| ExceptionHandler {
                start_pc: at(h.start),
                end_pc: at(h.end),
                handler_pc: at(h.handler),
                catch_type: h.catch_type,
            })
            .collect(),
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::find_attribute;
    use crate::testing::{check_trace_balance, ClassBuilder, MethodCode};

    const NONE: [&str; 0] = [];

    fn hooks() -> TraceHooks {
        TraceHooks::default()
    }

    fn all() -> TagFilter {
        TagFilter::new(NONE, NONE).unwrap()
    }

    fn method_code(class: &ClassFile, name: &str) -> CodeAttribute {
        let pool = &class.constant_pool;
        let method = class
            .methods
            .iter()
            .find(|m| m.name(pool).unwrap() == name)
            .unwrap();
        let i = method.attribute_index(pool, "Code").unwrap();
        CodeAttribute::parse(&method.attributes[i].info).unwrap()
    }

    fn rewrite(bytes: &[u8], filter: &TagFilter) -> Option<(ClassFile, Vec<String>)> {
        let class = ClassFile::parse(bytes).unwrap();
        instrument(&class, filter, &hooks())
            .unwrap()
            .map(|i| (i.class, i.methods))
    }

    fn simple_class() -> Vec<u8> {
        let mut b = ClassBuilder::new("com/app/Foo");
        b.default_constructor();
        b.method(0x0001, "bar", "()V", MethodCode::new(0, 1, vec![0xB1]));
        b.method_without_code(0x0401, "abs", "()V");
        b.build()
    }

    #[test]
    fn tag_uses_dotted_class_name() {
        assert_eq!(trace_tag("com/app/Foo", "bar"), "com.app.Foo#bar");
        assert_eq!(trace_tag("Top", "<init>"), "Top#<init>");
    }

    #[test]
    fn void_method_gets_begin_and_end() {
        let (class, methods) = rewrite(&simple_class(), &all()).unwrap();
        assert_eq!(methods, vec!["com.app.Foo#<init>", "com.app.Foo#bar"]);

        let code = method_code(&class, "bar");
        let decoded = decode(&code.code).unwrap();
        let ops: Vec<u8> = decoded.instructions.iter().map(Instruction::opcode).collect();
        assert_eq!(ops, vec![LDC, INVOKESTATIC, INVOKESTATIC, 0xB1]);
        // Nothing between begin and return can throw, so no handler is needed.
        assert!(code.exception_table.is_empty());
        assert_eq!(code.max_stack, 1);

        let pool = &class.constant_pool;
        let Some(Instruction::Plain { operands, .. }) = decoded.instructions.first() else {
            panic!("expected ldc");
        };
        match pool.get(operands[0] as u16) {
            Some(crate::constant_pool::Constant::String(utf8)) => {
                assert_eq!(pool.utf8(*utf8).unwrap(), "com.app.Foo#bar")
            }
            other => panic!("unexpected constant {other:?}"),
        }
        let begin = pool
            .member_ref(decoded.instructions[1].index_operand().unwrap())
            .unwrap();
        assert_eq!(begin.owner, "android/os/Trace");
        assert_eq!(begin.name, "beginSection");
        let end = pool
            .member_ref(decoded.instructions[2].index_operand().unwrap())
            .unwrap();
        assert_eq!(end.name, "endSection");
        assert_eq!(end.descriptor, "()V");

        check_trace_balance(&class.to_bytes(), &hooks()).unwrap();
    }

    #[test]
    fn constructor_prologue_follows_super_call() {
        let (class, _) = rewrite(&simple_class(), &all()).unwrap();
        let code = method_code(&class, "<init>");
        let decoded = decode(&code.code).unwrap();
        let ops: Vec<u8> = decoded.instructions.iter().map(Instruction::opcode).collect();
        // aload_0; invokespecial <init>; ldc; begin; end; return
        assert_eq!(ops, vec![0x2A, INVOKESPECIAL, LDC, INVOKESTATIC, INVOKESTATIC, 0xB1]);
    }

    #[test]
    fn constructor_skips_nested_new() {
        let mut b = ClassBuilder::new("com/app/Holder");
        let list_init = b.methodref("java/util/ArrayList", "<init>", "()V");
        let list = b.class_ref("java/util/ArrayList");
        let super_init = b.methodref("java/lang/Object", "<init>", "(Ljava/lang/Object;)V");
        let [lh, ll] = list.to_be_bytes();
        let [ih, il] = list_init.to_be_bytes();
        let [sh, sl] = super_init.to_be_bytes();
        // aload_0; new ArrayList; dup; invokespecial ArrayList.<init>;
        // invokespecial Object.<init>(Object); return
        let code = vec![0x2A, 0xBB, lh, ll, 0x59, 0xB7, ih, il, 0xB7, sh, sl, 0xB1];
        b.method(0x0001, "<init>", "()V", MethodCode::new(3, 1, code));
        let (class, _) = rewrite(&b.build(), &all()).unwrap();
        let decoded = decode(&method_code(&class, "<init>").code).unwrap();
        assert_eq!(decoded.instructions[5].opcode(), LDC);
        assert_eq!(decoded.instructions[6].opcode(), INVOKESTATIC);
    }

    #[test]
    fn unselected_class_is_untouched() {
        let filter = TagFilter::new([r"com\.lib\..*"], NONE).unwrap();
        assert!(rewrite(&simple_class(), &filter).is_none());
        assert!(rewrite(&simple_class(), &TagFilter::disabled()).is_none());
    }

    #[test]
    fn filter_selects_individual_methods() {
        let filter = TagFilter::new(NONE, [".*#<init>"]).unwrap();
        let (class, methods) = rewrite(&simple_class(), &filter).unwrap();
        assert_eq!(methods, vec!["com.app.Foo#bar"]);
        let original = ClassFile::parse(&simple_class()).unwrap();
        assert_eq!(method_code(&class, "<init>"), method_code(&original, "<init>"));
    }

    #[test]
    fn rewriting_twice_is_a_no_op() {
        let (class, _) = rewrite(&simple_class(), &all()).unwrap();
        assert!(rewrite(&class.to_bytes(), &all()).is_none());
    }

    fn ldc_string(class: &ClassFile, insn: &Instruction) -> String {
        let Instruction::Plain { opcode: LDC, operands } = insn else {
            panic!("expected ldc, got {insn:?}");
        };
        let pool = &class.constant_pool;
        match pool.get(operands[0] as u16) {
            Some(Constant::String(utf8)) => pool.utf8(*utf8).unwrap().into_owned(),
            other => panic!("unexpected constant {other:?}"),
        }
    }

    #[test]
    fn hand_written_hook_calls_do_not_suppress_instrumentation() {
        let mut b = ClassBuilder::new("com/app/Manual");
        let inner = b.string("inner");
        let begin = b.methodref("android/os/Trace", "beginSection", "(Ljava/lang/String;)V");
        let end = b.methodref("android/os/Trace", "endSection", "()V");
        let [bh, bl] = begin.to_be_bytes();
        let [eh, el] = end.to_be_bytes();
        // ldc "inner"; beginSection; endSection; return
        let code = vec![0x12, inner as u8, 0xB8, bh, bl, 0xB8, eh, el, 0xB1];
        b.method(0x0001, "work", "()V", MethodCode::new(1, 1, code));

        let filter = TagFilter::new([r"com\.app\..*"], NONE).unwrap();
        let (class, methods) = rewrite(&b.build(), &filter).unwrap();
        assert_eq!(methods, vec!["com.app.Manual#work"]);

        let decoded = decode(&method_code(&class, "work").code).unwrap();
        let insns = &decoded.instructions;
        assert_eq!(ldc_string(&class, &insns[0]), "com.app.Manual#work");
        assert_eq!(insns[1].opcode(), INVOKESTATIC);
        assert_eq!(ldc_string(&class, &insns[2]), "inner");
        // The hand-written pair stays, followed by the injected end call.
        let ops: Vec<u8> = insns.iter().map(Instruction::opcode).collect();
        assert_eq!(
            &ops[..7],
            &[LDC, INVOKESTATIC, LDC, INVOKESTATIC, INVOKESTATIC, INVOKESTATIC, 0xB1]
        );

        assert!(rewrite(&class.to_bytes(), &filter).is_none());
    }

    #[test]
    fn prologue_for_another_tag_is_not_ours() {
        let mut b = ClassBuilder::new("com/app/Copied");
        let other = b.string("com.app.Elsewhere#run");
        let begin = b.methodref("android/os/Trace", "beginSection", "(Ljava/lang/String;)V");
        let end = b.methodref("android/os/Trace", "endSection", "()V");
        let [bh, bl] = begin.to_be_bytes();
        let [eh, el] = end.to_be_bytes();
        let code = vec![0x12, other as u8, 0xB8, bh, bl, 0xB8, eh, el, 0xB1];
        b.method(0x0009, "run", "()V", MethodCode::new(1, 0, code));

        let (class, methods) = rewrite(&b.build(), &all()).unwrap();
        assert_eq!(methods, vec!["com.app.Copied#run"]);
        let decoded = decode(&method_code(&class, "run").code).unwrap();
        assert_eq!(ldc_string(&class, &decoded.instructions[0]), "com.app.Copied#run");
    }

    #[test]
    fn branches_to_returns_hit_the_end_call() {
        let bytes = ClassBuilder::sample_branches("com/app/Pick");
        let (class, _) = rewrite(&bytes, &all()).unwrap();
        let code = method_code(&class, "pick");
        let decoded = decode(&code.code).unwrap();
        // ldc; begin; iload_0; ifeq; iconst_1; end; ireturn; iconst_0; end; ireturn; end; athrow
        let Instruction::Branch { target, .. } = decoded.instructions[3] else {
            panic!("expected ifeq");
        };
        assert_eq!(decoded.instructions[target].opcode(), 0x03);
        assert_eq!(decoded.instructions[target + 1].opcode(), INVOKESTATIC);

        // One catch-all range per gap between the end/return pairs.
        let catch_all: Vec<_> = code
            .exception_table
            .iter()
            .filter(|h| h.catch_type == 0)
            .collect();
        assert_eq!(catch_all.len(), 2);
        assert!(catch_all.iter().all(|h| h.handler_pc == catch_all[0].handler_pc));
        check_trace_balance(&class.to_bytes(), &hooks()).unwrap();
    }

    #[test]
    fn frames_are_relocated_and_handler_frame_added() {
        let bytes = ClassBuilder::sample_branches("com/app/Pick");
        let (class, _) = rewrite(&bytes, &all()).unwrap();
        let pool = &class.constant_pool;
        let code = method_code(&class, "pick");
        let decoded = decode(&code.code).unwrap();
        let i = find_attribute(&code.attributes, pool, "StackMapTable").unwrap();
        let mut pool = pool.clone();
        let initial = initial_locals(&mut pool, "com/app/Pick", "pick", "(I)I", 0x0009).unwrap();
        let frames = decode_frames(&code.attributes[i].info, &initial, &decoded).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(decoded.instructions[frames[0].label].opcode(), 0x03);
        let handler = frames[1].label;
        assert_eq!(decoded.instructions[handler].opcode(), INVOKESTATIC);
        assert_eq!(decoded.instructions[handler + 1].opcode(), ATHROW);
        assert!(frames[1].locals.is_empty());
        let throwable = pool.class_index("java/lang/Throwable").unwrap();
        assert_eq!(frames[1].stack, vec![VerificationType::Object(throwable)]);
    }

    #[test]
    fn existing_handlers_keep_priority() {
        let bytes = ClassBuilder::sample_try_catch("com/app/Risky");
        let original = ClassFile::parse(&bytes).unwrap();
        let before = method_code(&original, "risky");
        let (class, _) = rewrite(&bytes, &all()).unwrap();
        let code = method_code(&class, "risky");
        assert_eq!(code.exception_table[0].catch_type, before.exception_table[0].catch_type);
        assert!(code.exception_table[0].catch_type != 0);
        assert!(code.exception_table[1..].iter().all(|h| h.catch_type == 0));
        check_trace_balance(&class.to_bytes(), &hooks()).unwrap();
    }

    #[test]
    fn loops_back_to_entry_do_not_repeat_begin() {
        let bytes = ClassBuilder::sample_loop("com/app/Loop");
        let (class, _) = rewrite(&bytes, &all()).unwrap();
        let decoded = decode(&method_code(&class, "count").code).unwrap();
        let back_edge = decoded
            .instructions
            .iter()
            .find_map(|insn| match insn {
                Instruction::Branch { opcode: 0xA7, target } => Some(*target),
                _ => None,
            })
            .unwrap();
        assert_eq!(back_edge, 2);
        check_trace_balance(&class.to_bytes(), &hooks()).unwrap();
    }

    #[test]
    fn switch_targets_survive_padding_change() {
        let bytes = ClassBuilder::sample_switch("com/app/Sw");
        let (class, _) = rewrite(&bytes, &all()).unwrap();
        let code = method_code(&class, "sw");
        let decoded = decode(&code.code).unwrap();
        let switch = decoded
            .instructions
            .iter()
            .find(|i| matches!(i, Instruction::TableSwitch { .. }))
            .unwrap();
        for target in switch.targets() {
            // Every case lands on its constant load, never on injected code.
            assert!(matches!(decoded.instructions[target].opcode(), 0x03..=0x05));
        }
        check_trace_balance(&class.to_bytes(), &hooks()).unwrap();
    }

    #[test]
    fn line_numbers_follow_instructions() {
        let bytes = ClassBuilder::sample_branches("com/app/Pick");
        let (class, _) = rewrite(&bytes, &all()).unwrap();
        let pool = &class.constant_pool;
        let code = method_code(&class, "pick");
        let decoded = decode(&code.code).unwrap();
        let i = find_attribute(&code.attributes, pool, "LineNumberTable").unwrap();
        let lines = parse_lines(&code.attributes[i].info, &decoded).unwrap();
        // Line 10 starts at iload_0, line 11 at iconst_0.
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].1, 10);
        assert_eq!(decoded.instructions[lines[0].0].opcode(), 0x1A);
        assert_eq!(lines[1].1, 11);
        assert_eq!(decoded.instructions[lines[1].0].opcode(), 0x03);
    }

    #[test]
    fn old_class_versions_get_no_frames() {
        let mut b = ClassBuilder::new("com/app/Old");
        b.version(49);
        b.method(0x0009, "f", "()V", MethodCode::new(0, 0, vec![0x01, 0xBF]));
        let (class, _) = rewrite(&b.build(), &all()).unwrap();
        let code = method_code(&class, "f");
        assert!(find_attribute(&code.attributes, &class.constant_pool, "StackMapTable").is_none());
        assert_eq!(code.exception_table.len(), 1);
        check_trace_balance(&class.to_bytes(), &hooks()).unwrap();
    }

    #[test]
    fn custom_hooks_are_used() {
        let hooks = TraceHooks {
            owner: "com/example/Tracer".to_string(),
            begin: "push".to_string(),
            end: "pop".to_string(),
        };
        let class = ClassFile::parse(&simple_class()).unwrap();
        let out = instrument(&class, &all(), &hooks).unwrap().unwrap().class;
        let decoded = decode(&method_code(&out, "bar").code).unwrap();
        let begin = out
            .constant_pool
            .member_ref(decoded.instructions[1].index_operand().unwrap())
            .unwrap();
        assert_eq!(begin.owner, "com/example/Tracer");
        assert_eq!(begin.name, "push");
        check_trace_balance(&out.to_bytes(), &hooks).unwrap();
    }

    #[test]
    fn underflowing_method_fails_with_its_name() {
        let mut b = ClassBuilder::new("com/app/Bad");
        b.method(0x0009, "broken", "()V", MethodCode::new(1, 0, vec![0x57, 0xB1]));
        let class = ClassFile::parse(&b.build()).unwrap();
        let err = instrument(&class, &all(), &hooks()).unwrap_err();
        assert!(err.to_string().contains("'broken'"), "{err}");
    }
}
