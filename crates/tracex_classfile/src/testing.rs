//! Test support: a minimal class file builder and a trace-balance checker.
//!
//! Enabled for this crate's own tests and, through the `test-support`
//! feature, for integration tests of dependent crates.

use std::collections::HashSet;

use tracex_config::TraceHooks;

use crate::bytes::PutBytes;
use crate::class::{Attribute, ClassFile, Member};
use crate::code::{decode, CodeAttribute, ExceptionHandler};
use crate::constant_pool::ConstantPool;
use crate::opcodes;

const POOL_FULL: &str = "test class constant pool overflow";

/// Body of a method under construction.
#[derive(Debug, Clone, Default)]
pub struct MethodCode {
    /// Declared maximum stack depth.
    pub max_stack: u16,
    /// Declared local variable slots.
    pub max_locals: u16,
    /// Raw bytecode.
    pub code: Vec<u8>,
    /// Exception table.
    pub exception_table: Vec<ExceptionHandler>,
    /// Raw `StackMapTable` payload, if any.
    pub stack_map: Option<Vec<u8>>,
    /// `(start_pc, line)` pairs for a `LineNumberTable`.
    pub line_numbers: Vec<(u16, u16)>,
}

impl MethodCode {
    /// A body with no handlers, frames or debug info.
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        Self {
            max_stack,
            max_locals,
            code,
            ..Self::default()
        }
    }

    /// Adds an exception table row.
    pub fn handler(mut self, start_pc: u16, end_pc: u16, handler_pc: u16, catch_type: u16) -> Self {
        self.exception_table.push(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        });
        self
    }

    /// Sets the raw `StackMapTable` payload.
    pub fn stack_map(mut self, payload: Vec<u8>) -> Self {
        self.stack_map = Some(payload);
        self
    }

    /// Adds a line number entry.
    pub fn line(mut self, start_pc: u16, line: u16) -> Self {
        self.line_numbers.push((start_pc, line));
        self
    }
}

/// Builds class files byte by byte for tests.
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    major_version: u16,
    pool: ConstantPool,
    this_class: u16,
    super_class: u16,
    methods: Vec<Member>,
}

impl ClassBuilder {
    /// A public class `name` (internal form) extending `java/lang/Object`,
    /// class file version 52.
    pub fn new(name: &str) -> Self {
        let mut pool = ConstantPool::new();
        let this_class = pool.class_index(name).expect(POOL_FULL);
        let super_class = pool.class_index("java/lang/Object").expect(POOL_FULL);
        Self {
            major_version: 52,
            pool,
            this_class,
            super_class,
            methods: Vec::new(),
        }
    }

    /// Sets the major class file version.
    pub fn version(&mut self, major: u16) -> &mut Self {
        self.major_version = major;
        self
    }

    /// Adds a `Methodref` and returns its index.
    pub fn methodref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.pool
            .methodref_index(owner, name, descriptor)
            .expect(POOL_FULL)
    }

    /// Adds a `Class` entry and returns its index.
    pub fn class_ref(&mut self, name: &str) -> u16 {
        self.pool.class_index(name).expect(POOL_FULL)
    }

    /// Adds a `String` entry and returns its index.
    pub fn string(&mut self, value: &str) -> u16 {
        self.pool.string_index(value).expect(POOL_FULL)
    }

    /// Adds a method with a `Code` attribute.
    pub fn method(&mut self, access: u16, name: &str, descriptor: &str, body: MethodCode) -> &mut Self {
        let mut code = CodeAttribute {
            max_stack: body.max_stack,
            max_locals: body.max_locals,
            code: body.code,
            exception_table: body.exception_table,
            attributes: Vec::new(),
        };
        if !body.line_numbers.is_empty() {
            let mut info = Vec::new();
            info.put_u16(body.line_numbers.len() as u16);
            for (pc, line) in body.line_numbers {
                info.put_u16(pc);
                info.put_u16(line);
            }
            code.attributes.push(self.attribute("LineNumberTable", info));
        }
        if let Some(info) = body.stack_map {
            code.attributes.push(self.attribute("StackMapTable", info));
        }
        let code = self.attribute("Code", code.to_bytes());
        self.push_method(access, name, descriptor, vec![code])
    }

    /// Adds an abstract or native method.
    pub fn method_without_code(&mut self, access: u16, name: &str, descriptor: &str) -> &mut Self {
        self.push_method(access, name, descriptor, Vec::new())
    }

    /// Adds `public <init>()V { super(); }`.
    pub fn default_constructor(&mut self) -> &mut Self {
        let [hi, lo] = self
            .methodref("java/lang/Object", "<init>", "()V")
            .to_be_bytes();
        self.method(
            0x0001,
            "<init>",
            "()V",
            MethodCode::new(1, 1, vec![0x2A, 0xB7, hi, lo, 0xB1]),
        )
    }

    /// Serializes the class.
    pub fn build(&self) -> Vec<u8> {
        ClassFile {
            minor_version: 0,
            major_version: self.major_version,
            constant_pool: self.pool.clone(),
            access_flags: 0x0021,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: self.methods.clone(),
            attributes: Vec::new(),
        }
        .to_bytes()
    }

    fn attribute(&mut self, name: &str, info: Vec<u8>) -> Attribute {
        Attribute {
            name_index: self.pool.utf8_index(name).expect(POOL_FULL),
            info,
        }
    }

    fn push_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        attributes: Vec<Attribute>,
    ) -> &mut Self {
        let name_index = self.pool.utf8_index(name).expect(POOL_FULL);
        let descriptor_index = self.pool.utf8_index(descriptor).expect(POOL_FULL);
        self.methods.push(Member {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        self
    }

    /// `static int pick(int v) { return v != 0 ? 1 : 0; }` with a frame at
    /// the else branch and two line numbers.
    pub fn sample_branches(name: &str) -> Vec<u8> {
        let mut b = Self::new(name);
        // 0: iload_0; 1: ifeq 6; 4: iconst_1; 5: ireturn; 6: iconst_0; 7: ireturn
        let code = MethodCode::new(1, 1, vec![0x1A, 0x99, 0x00, 0x05, 0x04, 0xAC, 0x03, 0xAC])
            .stack_map(vec![0x00, 0x01, 6])
            .line(0, 10)
            .line(6, 11);
        b.method(0x0009, "pick", "(I)I", code);
        b.build()
    }

    /// `static void risky() { try { foo(); } catch (Exception e) { bar(); } }`
    pub fn sample_try_catch(name: &str) -> Vec<u8> {
        let mut b = Self::new(name);
        let [fh, fl] = b.methodref(name, "foo", "()V").to_be_bytes();
        let [bh, bl] = b.methodref(name, "bar", "()V").to_be_bytes();
        let exception = b.class_ref("java/lang/Exception");
        let [eh, el] = exception.to_be_bytes();
        // 0: invokestatic foo; 3: goto 10; 6: astore_0; 7: invokestatic bar; 10: return
        let code = MethodCode::new(
            1,
            1,
            vec![0xB8, fh, fl, 0xA7, 0x00, 0x07, 0x4B, 0xB8, bh, bl, 0xB1],
        )
        .handler(0, 3, 6, exception)
        // same_locals_1_stack_item at 6, same at 10
        .stack_map(vec![0x00, 0x02, 64 + 6, 7, eh, el, 3]);
        b.method(0x0009, "risky", "()V", code);
        b.method(0x0009, "foo", "()V", MethodCode::new(0, 0, vec![0xB1]));
        b.method(0x0009, "bar", "()V", MethodCode::new(0, 0, vec![0xB1]));
        b.build()
    }

    /// `static void count(int n) { while (n > 0) n--; }` whose loop header
    /// is the first instruction.
    pub fn sample_loop(name: &str) -> Vec<u8> {
        let mut b = Self::new(name);
        // 0: iload_0; 1: ifle 10; 4: iinc 0 -1; 7: goto 0; 10: return
        let code = MethodCode::new(
            1,
            1,
            vec![0x1A, 0x9E, 0x00, 0x09, 0x84, 0x00, 0xFF, 0xA7, 0xFF, 0xF9, 0xB1],
        )
        .stack_map(vec![0x00, 0x02, 0, 9]);
        b.method(0x0009, "count", "(I)V", code);
        b.build()
    }

    /// `static int sw(int k) { switch (k) { case 0: return 0; case 1: return 1; default: return 2; } }`
    pub fn sample_switch(name: &str) -> Vec<u8> {
        let mut b = Self::new(name);
        // 0: iload_0; 1: tableswitch (2 padding bytes) default 28, 0 -> 24, 1 -> 26;
        // 24: iconst_0; 25: ireturn; 26: iconst_1; 27: ireturn; 28: iconst_2; 29: ireturn
        let mut code = vec![0x1A, 0xAA, 0x00, 0x00];
        for v in [27i32, 0, 1, 23, 25] {
            code.extend_from_slice(&v.to_be_bytes());
        }
        code.extend_from_slice(&[0x03, 0xAC, 0x04, 0xAC, 0x05, 0xAC]);
        let body = MethodCode::new(1, 1, code).stack_map(vec![0x00, 0x03, 24, 1, 1]);
        b.method(0x0009, "sw", "(I)I", body);
        b.build()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Call {
    Begin,
    End,
    Other,
}

/// Verifies that every instrumented method pairs its hook calls.
///
/// Walks every control-flow path of each method that calls the begin hook,
/// including exception edges from any instruction that may throw (all
/// except the end hook call and returns) to every covering handler. Each
/// path must call begin at most once, never call end without a pending
/// begin, return with exactly one begin and one end, and let exceptions
/// escape only when begin and end are balanced.
pub fn check_trace_balance(bytes: &[u8], hooks: &TraceHooks) -> Result<(), String> {
    let class = ClassFile::parse(bytes).map_err(|e| e.to_string())?;
    let pool = &class.constant_pool;
    for method in &class.methods {
        let name = method.name(pool).map_err(|e| e.to_string())?;
        let Some(i) = method.attribute_index(pool, "Code") else {
            continue;
        };
        let code = CodeAttribute::parse(&method.attributes[i].info).map_err(|e| e.to_string())?;
        let decoded = decode(&code.code).map_err(|e| e.to_string())?;
        let handlers = decoded
            .handlers(&code.exception_table)
            .map_err(|e| e.to_string())?;

        let mut calls = Vec::with_capacity(decoded.instructions.len());
        for insn in &decoded.instructions {
            let mut call = Call::Other;
            if insn.opcode() == opcodes::INVOKESTATIC {
                if let Some(index) = insn.index_operand() {
                    let callee = pool.member_ref(index).map_err(|e| e.to_string())?;
                    if callee.owner == hooks.owner.as_str() && callee.name == hooks.begin.as_str() {
                        call = Call::Begin;
                    } else if callee.owner == hooks.owner.as_str()
                        && callee.name == hooks.end.as_str()
                    {
                        call = Call::End;
                    }
                }
            }
            calls.push(call);
        }
        if !calls.contains(&Call::Begin) {
            continue;
        }

        let insns = &decoded.instructions;
        let mut seen = HashSet::new();
        let mut work = vec![(0usize, 0u8, 0u8)];
        while let Some(state) = work.pop() {
            if !seen.insert(state) {
                continue;
            }
            let (at, begun, ended) = state;
            let insn = insns
                .get(at)
                .ok_or_else(|| format!("{name}: execution falls off the end at {at}"))?;
            let returns = opcodes::is_return(insn.opcode());

            if calls[at] != Call::End && !returns {
                let mut caught = false;
                for h in handlers.iter().filter(|h| h.start <= at && at < h.end) {
                    work.push((h.handler, begun, ended));
                    if h.catch_type == 0 {
                        caught = true;
                        break;
                    }
                }
                if !caught && begun != ended {
                    return Err(format!(
                        "{name}: exception at instruction {at} escapes with begin={begun} end={ended}"
                    ));
                }
            }

            let (begun, ended) = match calls[at] {
                Call::Begin if begun > 0 => {
                    return Err(format!("{name}: second begin at instruction {at}"))
                }
                Call::Begin => (begun + 1, ended),
                Call::End if ended >= begun => {
                    return Err(format!("{name}: unmatched end at instruction {at}"))
                }
                Call::End => (begun, ended + 1),
                Call::Other => (begun, ended),
            };
            if returns {
                if begun != 1 || ended != 1 {
                    return Err(format!(
                        "{name}: return at instruction {at} with begin={begun} end={ended}"
                    ));
                }
                continue;
            }
            for t in insn.targets() {
                work.push((t, begun, ended));
            }
            if !insn.ends_block() {
                work.push((at + 1, begun, ended));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_parse() {
        for bytes in [
            ClassBuilder::sample_branches("a/A"),
            ClassBuilder::sample_try_catch("a/B"),
            ClassBuilder::sample_loop("a/C"),
            ClassBuilder::sample_switch("a/D"),
        ] {
            let class = ClassFile::parse(&bytes).unwrap();
            assert_eq!(class.to_bytes(), bytes);
        }
    }

    #[test]
    fn uninstrumented_classes_pass_trivially() {
        let bytes = ClassBuilder::sample_try_catch("a/B");
        check_trace_balance(&bytes, &TraceHooks::default()).unwrap();
    }

    #[test]
    fn missing_end_is_reported() {
        let mut b = ClassBuilder::new("a/E");
        let tag = b.string("a.E#f");
        let [bh, bl] = b
            .methodref("android/os/Trace", "beginSection", "(Ljava/lang/String;)V")
            .to_be_bytes();
        b.method(
            0x0009,
            "f",
            "()V",
            MethodCode::new(1, 0, vec![0x12, tag as u8, 0xB8, bh, bl, 0xB1]),
        );
        let err = check_trace_balance(&b.build(), &TraceHooks::default()).unwrap_err();
        assert!(err.contains("return at instruction 2"), "{err}");
    }

    #[test]
    fn unprotected_throw_is_reported() {
        let mut b = ClassBuilder::new("a/F");
        let tag = b.string("a.F#f");
        let [bh, bl] = b
            .methodref("android/os/Trace", "beginSection", "(Ljava/lang/String;)V")
            .to_be_bytes();
        // ldc; begin; aconst_null; athrow
        b.method(
            0x0009,
            "f",
            "()V",
            MethodCode::new(1, 0, vec![0x12, tag as u8, 0xB8, bh, bl, 0x01, 0xBF]),
        );
        let err = check_trace_balance(&b.build(), &TraceHooks::default()).unwrap_err();
        assert!(err.contains("escapes"), "{err}");
    }
}
