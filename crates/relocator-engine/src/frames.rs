//! Stack map frame recomputation by abstract interpretation.
//!
//! Locals and the operand stack are tracked slot by slot, so a `long` or
//! `double` occupies its own type followed by `Top`. States are converted to
//! the `StackMapTable` layout (one entry per value, trailing `Top` locals
//! dropped) only when frames are emitted.
//!
//! Control flow merges of two reference types go through the
//! [`HierarchyResolver`], which never loads the types involved.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use relocator_classfile::opcodes::*;
use relocator_classfile::{
    access, descriptor_to_internal_name, parse_field_descriptor, parse_method_descriptor,
    BaseType, Code, CodeAttribute, Constant, ExceptionHandler, FieldType, Insn, Instruction,
    ReturnType, StackMapFrame, TargetInfo, VerificationType,
};
use relocator_hierarchy::{HierarchyResolver, OBJECT};

const THROWABLE: &str = "java/lang/Throwable";

/// First class file version whose methods carry a `StackMapTable`.
pub(crate) const STACK_MAP_VERSION: u16 = 50;

type Slot = VerificationType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AnalysisError {
    pub(crate) offset: u32,
    pub(crate) reason: String,
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at offset {}: {}", self.offset, self.reason)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct State {
    locals: Vec<Slot>,
    stack: Vec<Slot>,
}

impl State {
    fn push(&mut self, value: Slot) {
        let wide = value.is_wide();
        self.stack.push(value);
        if wide {
            self.stack.push(Slot::Top);
        }
    }

    fn pop(&mut self) -> Result<Slot, String> {
        self.stack
            .pop()
            .ok_or_else(|| "operand stack underflow".to_string())
    }

    fn pop_n(&mut self, slots: usize) -> Result<(), String> {
        if slots > self.stack.len() {
            return Err("operand stack underflow".to_string());
        }
        self.stack.truncate(self.stack.len() - slots);
        Ok(())
    }

    fn pop_slots<const N: usize>(&mut self) -> Result<[Slot; N], String> {
        let mut slots: [Slot; N] = std::array::from_fn(|_| Slot::Top);
        for slot in slots.iter_mut() {
            *slot = self.pop()?;
        }
        Ok(slots)
    }

    fn push_slots(&mut self, slots: &[&Slot]) {
        self.stack.extend(slots.iter().map(|slot| (*slot).clone()));
    }

    /// Grows the locals so `end` slots exist.
    fn reserve(&mut self, end: usize) {
        if self.locals.len() < end {
            self.locals.resize(end, Slot::Top);
        }
    }

    fn local(&self, index: usize) -> Slot {
        self.locals.get(index).cloned().unwrap_or(Slot::Top)
    }

    fn set_local(&mut self, index: usize, value: Slot) {
        let wide = value.is_wide();
        self.reserve(index + if wide { 2 } else { 1 });
        // Overwriting the second half of a long or double kills it.
        if index > 0 && self.locals[index - 1].is_wide() {
            self.locals[index - 1] = Slot::Top;
        }
        self.locals[index] = value;
        if wide {
            self.locals[index + 1] = Slot::Top;
        }
    }

    /// Replaces every occurrence of an uninitialized value once its
    /// constructor has run.
    fn initialize(&mut self, uninitialized: &Slot, initialized: Slot) {
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if slot == uninitialized {
                *slot = initialized.clone();
            }
        }
    }
}

/// Fixed point of the analysis: the state on entry to each reachable
/// instruction.
struct Analysis {
    states: Vec<Option<State>>,
    max_stack: usize,
    max_locals: usize,
}

/// Recomputes frames and maxima for the methods of one class.
pub(crate) struct FrameComputer<'a> {
    resolver: &'a HierarchyResolver,
    class_name: &'a str,
    major_version: u16,
}

impl<'a> FrameComputer<'a> {
    pub(crate) fn new(resolver: &'a HierarchyResolver, class_name: &'a str, major_version: u16) -> Self {
        Self {
            resolver,
            class_name,
            major_version,
        }
    }

    /// Rebuilds the `StackMapTable`, `max_stack` and `max_locals` of `code`.
    /// Unreachable instructions become `nop … athrow` and are removed from
    /// the exception table.
    pub(crate) fn compute(
        &self,
        name: &str,
        descriptor: &str,
        access_flags: u16,
        code: &mut Code,
    ) -> Result<(), AnalysisError> {
        let at_entry = |reason: String| AnalysisError { offset: 0, reason };
        let initial = self
            .initial_state(name, descriptor, access_flags)
            .map_err(at_entry)?;
        let analysis = self.analyze(code, &initial)?;

        let dead = dead_ranges(code, &analysis.states);
        let index_of = offsets(code);

        let mut frame_states: BTreeMap<u32, State> = BTreeMap::new();
        for (instruction, state) in code.instructions.iter().zip(&analysis.states) {
            if state.is_none() {
                continue;
            }
            for target in instruction.insn.branch_targets() {
                if let Some(state) = index_of.get(&target).and_then(|&i| analysis.states[i].as_ref()) {
                    frame_states.insert(target, state.clone());
                }
            }
        }

        let (exception_table, index_map) = carve_exception_table(&code.exception_table, &dead);
        for handler in &exception_table {
            if let Some(state) = index_of
                .get(&handler.handler)
                .and_then(|&i| analysis.states[i].as_ref())
            {
                frame_states.insert(handler.handler, state.clone());
            }
        }
        for &(start, _) in &dead {
            frame_states.insert(
                start,
                State {
                    locals: Vec::new(),
                    stack: vec![Slot::Object(THROWABLE.to_string())],
                },
            );
        }

        let mut previous = frame_locals(&initial.locals);
        let mut frames = Vec::with_capacity(frame_states.len());
        for (offset, state) in &frame_states {
            let locals = frame_locals(&state.locals);
            let stack = frame_values(&state.stack);
            frames.push(StackMapFrame::compress(*offset, &previous, &locals, &stack));
            previous = locals;
        }

        replace_dead_code(code, &dead);
        code.exception_table = exception_table;
        remap_catch_targets(code, &index_map);

        let max_stack = if dead.is_empty() {
            analysis.max_stack
        } else {
            analysis.max_stack.max(1)
        };
        let too_large = |what: &str| AnalysisError {
            offset: 0,
            reason: format!("{what} exceeds 65535"),
        };
        code.max_stack = u16::try_from(max_stack).map_err(|_| too_large("max_stack"))?;
        code.max_locals = u16::try_from(analysis.max_locals).map_err(|_| too_large("max_locals"))?;

        if self.major_version >= STACK_MAP_VERSION {
            code.set_stack_map_table(frames);
        } else {
            code.set_stack_map_table(Vec::new());
        }
        Ok(())
    }

    fn initial_state(&self, name: &str, descriptor: &str, access_flags: u16) -> Result<State, String> {
        let method = parse_method_descriptor(descriptor).map_err(|err| err.to_string())?;
        let mut state = State::default();
        if access_flags & access::STATIC == 0 {
            let this = if name == "<init>" && self.class_name != OBJECT {
                Slot::UninitializedThis
            } else {
                Slot::Object(self.class_name.to_string())
            };
            state.locals.push(this);
        }
        for param in &method.params {
            let value = value_type(param);
            let wide = value.is_wide();
            state.locals.push(value);
            if wide {
                state.locals.push(Slot::Top);
            }
        }
        Ok(state)
    }

    fn analyze(&self, code: &Code, initial: &State) -> Result<Analysis, AnalysisError> {
        let count = code.instructions.len();
        let index_of = offsets(code);
        let new_types: HashMap<u32, &str> = code
            .instructions
            .iter()
            .filter_map(|instruction| match &instruction.insn {
                Insn::Type { opcode: NEW, class } => Some((instruction.offset, class.as_str())),
                _ => None,
            })
            .collect();
        let lookup = |from: u32, target: u32| {
            index_of.get(&target).copied().ok_or_else(|| AnalysisError {
                offset: from,
                reason: format!("no instruction at offset {target}"),
            })
        };

        let mut states: Vec<Option<State>> = vec![None; count];
        let mut queued = vec![false; count];
        let mut pending = Vec::new();
        let mut max_stack = 0;
        let mut max_locals = initial.locals.len();
        if count > 0 {
            states[0] = Some(initial.clone());
            queued[0] = true;
            pending.push(0);
        }

        while let Some(index) = pending.pop() {
            queued[index] = false;
            let Some(entry) = states[index].clone() else {
                continue;
            };
            let instruction = &code.instructions[index];
            let offset = instruction.offset;
            let fail = |reason: String| AnalysisError { offset, reason };

            let mut exit = entry.clone();
            self.execute(instruction, &mut exit, &new_types).map_err(fail)?;
            max_stack = max_stack.max(entry.stack.len()).max(exit.stack.len());
            max_locals = max_locals.max(exit.locals.len());

            let mut successors = Vec::new();
            for target in instruction.insn.branch_targets() {
                successors.push(lookup(offset, target)?);
            }
            if !instruction.insn.ends_block() {
                if index + 1 >= count {
                    return Err(fail("execution falls off the end of the code".to_string()));
                }
                successors.push(index + 1);
            }
            for successor in successors {
                if self.merge_into(&mut states[successor], &exit).map_err(fail)? && !queued[successor] {
                    queued[successor] = true;
                    pending.push(successor);
                }
            }

            for handler in &code.exception_table {
                if offset < handler.start || offset >= handler.end {
                    continue;
                }
                let target = lookup(offset, handler.handler)?;
                let caught = Slot::Object(
                    handler
                        .catch_type
                        .clone()
                        .unwrap_or_else(|| THROWABLE.to_string()),
                );
                max_stack = max_stack.max(1);
                for locals in [&entry.locals, &exit.locals] {
                    let incoming = State {
                        locals: locals.clone(),
                        stack: vec![caught.clone()],
                    };
                    if self.merge_into(&mut states[target], &incoming).map_err(fail)? && !queued[target] {
                        queued[target] = true;
                        pending.push(target);
                    }
                }
            }
        }

        Ok(Analysis {
            states,
            max_stack,
            max_locals,
        })
    }

    /// Merges `incoming` into the state recorded for an instruction and
    /// reports whether it changed.
    fn merge_into(&self, recorded: &mut Option<State>, incoming: &State) -> Result<bool, String> {
        if recorded.is_none() {
            *recorded = Some(incoming.clone());
            return Ok(true);
        }
        let Some(current) = recorded.as_mut() else {
            return Ok(false);
        };
        if current.stack.len() != incoming.stack.len() {
            return Err(format!(
                "operand stacks of height {} and {} meet",
                current.stack.len(),
                incoming.stack.len()
            ));
        }
        let mut changed = false;
        current.reserve(incoming.locals.len());
        for (index, slot) in current.locals.iter_mut().enumerate() {
            let other = incoming.locals.get(index).unwrap_or(&Slot::Top);
            let merged = self.merge_types(slot, other);
            if merged != *slot {
                *slot = merged;
                changed = true;
            }
        }
        for (slot, other) in current.stack.iter_mut().zip(&incoming.stack) {
            let merged = self.merge_types(slot, other);
            if merged != *slot {
                *slot = merged;
                changed = true;
            }
        }
        Ok(changed)
    }

    fn merge_types(&self, a: &Slot, b: &Slot) -> Slot {
        if a == b {
            return a.clone();
        }
        match (a, b) {
            (Slot::Null, Slot::Object(_)) => b.clone(),
            (Slot::Object(_), Slot::Null) => a.clone(),
            (Slot::Object(x), Slot::Object(y)) => Slot::Object(self.merge_references(x, y)),
            _ => Slot::Top,
        }
    }

    fn merge_references(&self, a: &str, b: &str) -> String {
        match (a.starts_with('['), b.starts_with('[')) {
            (false, false) => self.resolver.common_ancestor(a, b),
            (true, true) => self.merge_arrays(a, b),
            _ => OBJECT.to_string(),
        }
    }

    fn merge_arrays(&self, a: &str, b: &str) -> String {
        let (dims_a, element_a) = split_array(a);
        let (dims_b, element_b) = split_array(b);
        let class_a = descriptor_to_internal_name(element_a);
        let class_b = descriptor_to_internal_name(element_b);
        if dims_a == dims_b {
            if let (Some(x), Some(y)) = (class_a, class_b) {
                return format!("{}L{};", "[".repeat(dims_a), self.merge_references(x, y));
            }
        }
        // An array of primitives is itself an Object one dimension up.
        let dims = match dims_a.cmp(&dims_b) {
            std::cmp::Ordering::Equal => dims_a - 1,
            std::cmp::Ordering::Less if class_a.is_some() => dims_a,
            std::cmp::Ordering::Less => dims_a - 1,
            std::cmp::Ordering::Greater if class_b.is_some() => dims_b,
            std::cmp::Ordering::Greater => dims_b - 1,
        };
        if dims == 0 {
            OBJECT.to_string()
        } else {
            format!("{}L{OBJECT};", "[".repeat(dims))
        }
    }

    fn execute(
        &self,
        instruction: &Instruction,
        state: &mut State,
        new_types: &HashMap<u32, &str>,
    ) -> Result<(), String> {
        match &instruction.insn {
            Insn::Simple(opcode) => self.execute_simple(*opcode, state)?,
            Insn::Push { .. } => state.push(Slot::Integer),
            Insn::Ldc { constant, .. } => state.push(constant_type(constant)?),
            Insn::Var { opcode, index, .. } => {
                let index = *index as usize;
                match *opcode {
                    ILOAD..=ALOAD => load(state, *opcode - ILOAD, index),
                    ISTORE..=ASTORE => store(state, *opcode - ISTORE, index)?,
                    _ => return Err("subroutines are not analyzed".to_string()),
                }
            }
            Insn::Iinc { index, .. } => state.set_local(*index as usize, Slot::Integer),
            Insn::Jump { opcode, .. } => match *opcode {
                IFEQ..=IFLE | IFNULL | IFNONNULL => state.pop_n(1)?,
                IF_ICMPEQ..=IF_ACMPNE => state.pop_n(2)?,
                GOTO | GOTO_W => {}
                _ => return Err("subroutines are not analyzed".to_string()),
            },
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => state.pop_n(1)?,
            Insn::Type { opcode, class } => match *opcode {
                NEW => state.push(Slot::Uninitialized(instruction.offset)),
                ANEWARRAY => {
                    state.pop_n(1)?;
                    state.push(Slot::Object(array_of(class)));
                }
                CHECKCAST => {
                    state.pop_n(1)?;
                    state.push(Slot::Object(class.clone()));
                }
                _ => {
                    state.pop_n(1)?;
                    state.push(Slot::Integer);
                }
            },
            Insn::Field { opcode, field } => {
                let ty = parse_field_descriptor(&field.descriptor).map_err(|err| err.to_string())?;
                match *opcode {
                    GETSTATIC => state.push(value_type(&ty)),
                    PUTSTATIC => state.pop_n(ty.slot_size())?,
                    GETFIELD => {
                        state.pop_n(1)?;
                        state.push(value_type(&ty));
                    }
                    _ => state.pop_n(ty.slot_size() + 1)?,
                }
            }
            Insn::Method { opcode, method, .. } => {
                let descriptor =
                    parse_method_descriptor(&method.descriptor).map_err(|err| err.to_string())?;
                state.pop_n(descriptor.param_slots())?;
                if *opcode != INVOKESTATIC {
                    let receiver = state.pop()?;
                    if *opcode == INVOKESPECIAL && method.name == "<init>" {
                        let initialized = match &receiver {
                            Slot::UninitializedThis => Some(self.class_name.to_string()),
                            Slot::Uninitialized(at) => Some(
                                new_types
                                    .get(at)
                                    .map(|class| class.to_string())
                                    .ok_or_else(|| format!("no `new` at offset {at}"))?,
                            ),
                            _ => None,
                        };
                        if let Some(class) = initialized {
                            state.initialize(&receiver, Slot::Object(class));
                        }
                    }
                }
                if let ReturnType::Type(ty) = &descriptor.return_type {
                    state.push(value_type(ty));
                }
            }
            Insn::InvokeDynamic { descriptor, .. } => {
                let descriptor = parse_method_descriptor(descriptor).map_err(|err| err.to_string())?;
                state.pop_n(descriptor.param_slots())?;
                if let ReturnType::Type(ty) = &descriptor.return_type {
                    state.push(value_type(ty));
                }
            }
            Insn::NewArray(atype) => {
                state.pop_n(1)?;
                state.push(Slot::Object(primitive_array(*atype)?.to_string()));
            }
            Insn::MultiANewArray { class, dimensions } => {
                state.pop_n(*dimensions as usize)?;
                state.push(Slot::Object(class.clone()));
            }
        }
        Ok(())
    }

    fn execute_simple(&self, opcode: u8, state: &mut State) -> Result<(), String> {
        match opcode {
            NOP => {}
            ACONST_NULL => state.push(Slot::Null),
            ICONST_M1..=ICONST_5 => state.push(Slot::Integer),
            LCONST_0 | LCONST_1 => state.push(Slot::Long),
            FCONST_0..=FCONST_2 => state.push(Slot::Float),
            DCONST_0 | DCONST_1 => state.push(Slot::Double),
            ILOAD_0..=ALOAD_3 => {
                let n = opcode - ILOAD_0;
                load(state, n / 4, (n % 4) as usize);
            }
            IALOAD | BALOAD | CALOAD | SALOAD => binary(state, 2, Slot::Integer)?,
            LALOAD => binary(state, 2, Slot::Long)?,
            FALOAD => binary(state, 2, Slot::Float)?,
            DALOAD => binary(state, 2, Slot::Double)?,
            AALOAD => {
                state.pop_n(1)?;
                let array = state.pop()?;
                state.push(element_type(&array)?);
            }
            ISTORE_0..=ASTORE_3 => {
                let n = opcode - ISTORE_0;
                store(state, n / 4, (n % 4) as usize)?;
            }
            IASTORE | FASTORE | AASTORE | BASTORE | CASTORE | SASTORE => state.pop_n(3)?,
            LASTORE | DASTORE => state.pop_n(4)?,
            POP => state.pop_n(1)?,
            POP2 => state.pop_n(2)?,
            DUP => {
                let [v1] = state.pop_slots::<1>()?;
                state.push_slots(&[&v1, &v1]);
            }
            DUP_X1 => {
                let [v1, v2] = state.pop_slots::<2>()?;
                state.push_slots(&[&v1, &v2, &v1]);
            }
            DUP_X2 => {
                let [v1, v2, v3] = state.pop_slots::<3>()?;
                state.push_slots(&[&v1, &v3, &v2, &v1]);
            }
            DUP2 => {
                let [v1, v2] = state.pop_slots::<2>()?;
                state.push_slots(&[&v2, &v1, &v2, &v1]);
            }
            DUP2_X1 => {
                let [v1, v2, v3] = state.pop_slots::<3>()?;
                state.push_slots(&[&v2, &v1, &v3, &v2, &v1]);
            }
            DUP2_X2 => {
                let [v1, v2, v3, v4] = state.pop_slots::<4>()?;
                state.push_slots(&[&v2, &v1, &v4, &v3, &v2, &v1]);
            }
            SWAP => {
                let [v1, v2] = state.pop_slots::<2>()?;
                state.push_slots(&[&v1, &v2]);
            }
            IADD..=DREM => {
                let ty = numeric_type((opcode - IADD) % 4);
                let size = slot_size(&ty);
                binary(state, 2 * size, ty)?;
            }
            INEG..=DNEG => {
                let ty = numeric_type((opcode - INEG) % 4);
                binary(state, slot_size(&ty), ty)?;
            }
            ISHL..=LUSHR if (opcode - ISHL) % 2 == 0 => binary(state, 2, Slot::Integer)?,
            ISHL..=LUSHR => binary(state, 3, Slot::Long)?,
            IAND..=LXOR if (opcode - IAND) % 2 == 0 => binary(state, 2, Slot::Integer)?,
            IAND..=LXOR => binary(state, 4, Slot::Long)?,
            I2L => binary(state, 1, Slot::Long)?,
            I2F => binary(state, 1, Slot::Float)?,
            I2D => binary(state, 1, Slot::Double)?,
            L2I => binary(state, 2, Slot::Integer)?,
            L2F => binary(state, 2, Slot::Float)?,
            L2D => binary(state, 2, Slot::Double)?,
            F2I => binary(state, 1, Slot::Integer)?,
            F2L => binary(state, 1, Slot::Long)?,
            F2D => binary(state, 1, Slot::Double)?,
            D2I => binary(state, 2, Slot::Integer)?,
            D2L => binary(state, 2, Slot::Long)?,
            D2F => binary(state, 2, Slot::Float)?,
            I2B | I2C | I2S => binary(state, 1, Slot::Integer)?,
            LCMP => binary(state, 4, Slot::Integer)?,
            FCMPL | FCMPG => binary(state, 2, Slot::Integer)?,
            DCMPL | DCMPG => binary(state, 4, Slot::Integer)?,
            IRETURN | FRETURN | ARETURN => state.pop_n(1)?,
            LRETURN | DRETURN => state.pop_n(2)?,
            RETURN => {}
            ARRAYLENGTH => binary(state, 1, Slot::Integer)?,
            ATHROW | MONITORENTER | MONITOREXIT => state.pop_n(1)?,
            _ => return Err(format!("unexpected opcode {opcode:#04x}")),
        }
        Ok(())
    }
}

/// Pops `slots` operand slots and pushes `result`.
fn binary(state: &mut State, slots: usize, result: Slot) -> Result<(), String> {
    state.pop_n(slots)?;
    state.push(result);
    Ok(())
}

/// `kind` follows the opcode order: int, long, float, double, reference.
fn load(state: &mut State, kind: u8, index: usize) {
    let value = match kind {
        0 => Slot::Integer,
        1 => Slot::Long,
        2 => Slot::Float,
        3 => Slot::Double,
        _ => state.local(index),
    };
    state.reserve(index + slot_size(&value));
    state.push(value);
}

fn store(state: &mut State, kind: u8, index: usize) -> Result<(), String> {
    let value = match kind {
        0 => Slot::Integer,
        1 => Slot::Long,
        2 => Slot::Float,
        3 => Slot::Double,
        _ => {
            let value = state.pop()?;
            state.set_local(index, value);
            return Ok(());
        }
    };
    state.pop_n(slot_size(&value))?;
    state.set_local(index, value);
    Ok(())
}

fn numeric_type(kind: u8) -> Slot {
    match kind {
        0 => Slot::Integer,
        1 => Slot::Long,
        2 => Slot::Float,
        _ => Slot::Double,
    }
}

fn slot_size(value: &Slot) -> usize {
    if value.is_wide() {
        2
    } else {
        1
    }
}

fn value_type(ty: &FieldType) -> Slot {
    match ty {
        FieldType::Base(BaseType::Long) => Slot::Long,
        FieldType::Base(BaseType::Double) => Slot::Double,
        FieldType::Base(BaseType::Float) => Slot::Float,
        FieldType::Base(_) => Slot::Integer,
        FieldType::Object(name) => Slot::Object(name.clone()),
        FieldType::Array(_) => Slot::Object(ty.to_string()),
    }
}

fn constant_type(constant: &Constant) -> Result<Slot, String> {
    Ok(match constant {
        Constant::Integer(_) => Slot::Integer,
        Constant::Float(_) => Slot::Float,
        Constant::Long(_) => Slot::Long,
        Constant::Double(_) => Slot::Double,
        Constant::String(_) => Slot::Object("java/lang/String".to_string()),
        Constant::Class(_) => Slot::Object("java/lang/Class".to_string()),
        Constant::MethodType(_) => Slot::Object("java/lang/invoke/MethodType".to_string()),
        Constant::MethodHandle(_) => Slot::Object("java/lang/invoke/MethodHandle".to_string()),
        Constant::Dynamic(dynamic) => {
            let ty = parse_field_descriptor(&dynamic.descriptor).map_err(|err| err.to_string())?;
            value_type(&ty)
        }
    })
}

fn element_type(array: &Slot) -> Result<Slot, String> {
    match array {
        Slot::Null => Ok(Slot::Null),
        Slot::Object(descriptor) if descriptor.starts_with('[') => {
            let ty = parse_field_descriptor(&descriptor[1..]).map_err(|err| err.to_string())?;
            Ok(value_type(&ty))
        }
        other => Err(format!("aaload from non-array {other:?}")),
    }
}

/// `anewarray` operand to the resulting array type.
fn array_of(class: &str) -> String {
    if class.starts_with('[') {
        format!("[{class}")
    } else {
        format!("[L{class};")
    }
}

fn primitive_array(atype: u8) -> Result<&'static str, String> {
    Ok(match atype {
        array_type::BOOLEAN => "[Z",
        array_type::CHAR => "[C",
        array_type::FLOAT => "[F",
        array_type::DOUBLE => "[D",
        array_type::BYTE => "[B",
        array_type::SHORT => "[S",
        array_type::INT => "[I",
        array_type::LONG => "[J",
        _ => return Err(format!("invalid newarray type {atype}")),
    })
}

fn split_array(descriptor: &str) -> (usize, &str) {
    let element = descriptor.trim_start_matches('[');
    (descriptor.len() - element.len(), element)
}

fn offsets(code: &Code) -> HashMap<u32, usize> {
    code.instructions
        .iter()
        .enumerate()
        .map(|(index, instruction)| (instruction.offset, index))
        .collect()
}

/// Values in `StackMapTable` layout: one entry per value.
fn frame_values(slots: &[Slot]) -> Vec<Slot> {
    let mut values = Vec::with_capacity(slots.len());
    let mut index = 0;
    while let Some(slot) = slots.get(index) {
        values.push(slot.clone());
        index += slot_size(slot);
    }
    values
}

fn frame_locals(slots: &[Slot]) -> Vec<Slot> {
    let mut values = frame_values(slots);
    while values.last() == Some(&Slot::Top) {
        values.pop();
    }
    values
}

/// Old-offset `[start, end)` ranges of consecutive unreachable instructions.
fn dead_ranges(code: &Code, states: &[Option<State>]) -> Vec<(u32, u32)> {
    let mut ranges = Vec::new();
    let mut index = 0;
    while index < states.len() {
        if states[index].is_some() {
            index += 1;
            continue;
        }
        let start = code.instructions[index].offset;
        while index < states.len() && states[index].is_none() {
            index += 1;
        }
        ranges.push((start, code.instruction_end(index - 1)));
    }
    ranges
}

fn replace_dead_code(code: &mut Code, dead: &[(u32, u32)]) {
    if dead.is_empty() {
        return;
    }
    let is_dead = |offset: u32| dead.iter().any(|&(start, end)| start <= offset && offset < end);
    let mut instructions = Vec::with_capacity(code.instructions.len());
    for instruction in std::mem::take(&mut code.instructions) {
        if !is_dead(instruction.offset) {
            instructions.push(instruction);
            continue;
        }
        if let Some(&(start, end)) = dead.iter().find(|&&(start, _)| start == instruction.offset) {
            for offset in start..end - 1 {
                instructions.push(Instruction {
                    offset,
                    insn: Insn::Simple(NOP),
                });
            }
            instructions.push(Instruction {
                offset: end - 1,
                insn: Insn::Simple(ATHROW),
            });
        }
    }
    code.instructions = instructions;
}

/// Removes dead ranges from every handler range. Returns the new table and,
/// for each old entry, the index of its first surviving piece.
fn carve_exception_table(
    table: &[ExceptionHandler],
    dead: &[(u32, u32)],
) -> (Vec<ExceptionHandler>, Vec<Option<usize>>) {
    let mut carved = Vec::with_capacity(table.len());
    let mut index_map = Vec::with_capacity(table.len());
    for handler in table {
        let mut pieces = vec![(handler.start, handler.end)];
        for &(dead_start, dead_end) in dead {
            pieces = pieces
                .into_iter()
                .flat_map(|(start, end)| {
                    [(start, end.min(dead_start)), (start.max(dead_end), end)]
                        .into_iter()
                        .filter(|(s, e)| s < e)
                        .collect::<Vec<_>>()
                })
                .collect();
        }
        index_map.push((!pieces.is_empty()).then_some(carved.len()));
        for (start, end) in pieces {
            carved.push(ExceptionHandler {
                start,
                end,
                handler: handler.handler,
                catch_type: handler.catch_type.clone(),
            });
        }
    }
    (carved, index_map)
}

/// Points `catch` type annotation targets at the carved exception table,
/// dropping those whose entry disappeared.
fn remap_catch_targets(code: &mut Code, index_map: &[Option<usize>]) {
    let identity = index_map
        .iter()
        .enumerate()
        .all(|(old, new)| *new == Some(old));
    if identity {
        return;
    }
    for attribute in &mut code.attributes {
        if let CodeAttribute::TypeAnnotations { annotations, .. } = attribute {
            annotations.retain_mut(|annotation| match &mut annotation.target {
                TargetInfo::Catch {
                    exception_table_index,
                } => match index_map
                    .get(*exception_table_index as usize)
                    .copied()
                    .flatten()
                    .and_then(|new| u16::try_from(new).ok())
                {
                    Some(new) => {
                        *exception_table_index = new;
                        true
                    }
                    None => false,
                },
                _ => true,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relocator_hierarchy::MemorySource;

    use super::*;

    fn resolver() -> HierarchyResolver {
        HierarchyResolver::new(Arc::new(MemorySource::new()))
    }

    #[test]
    fn array_merges() {
        let resolver = resolver();
        let computer = FrameComputer::new(&resolver, "demo/A", 52);
        assert_eq!(computer.merge_references("[I", "[F"), OBJECT);
        assert_eq!(computer.merge_references("[[I", "[[F"), "[Ljava/lang/Object;");
        assert_eq!(
            computer.merge_references("[Ljava/lang/String;", "[[I"),
            "[Ljava/lang/Object;"
        );
        assert_eq!(
            computer.merge_references("[Ldemo/A;", "[Ldemo/B;"),
            "[Ljava/lang/Object;"
        );
        assert_eq!(computer.merge_references("[I", "java/lang/String"), OBJECT);
    }

    #[test]
    fn null_merges_into_references_only() {
        let resolver = resolver();
        let computer = FrameComputer::new(&resolver, "demo/A", 52);
        let string = Slot::Object("java/lang/String".to_string());
        assert_eq!(computer.merge_types(&Slot::Null, &string), string);
        assert_eq!(computer.merge_types(&Slot::Null, &Slot::Integer), Slot::Top);
        assert_eq!(
            computer.merge_types(&Slot::Uninitialized(3), &Slot::Uninitialized(7)),
            Slot::Top
        );
    }

    #[test]
    fn frame_layout_collapses_wide_values() {
        let slots = vec![
            Slot::Integer,
            Slot::Long,
            Slot::Top,
            Slot::Object("demo/A".to_string()),
            Slot::Top,
        ];
        assert_eq!(
            frame_locals(&slots),
            vec![Slot::Integer, Slot::Long, Slot::Object("demo/A".to_string())]
        );
    }

    #[test]
    fn carving_splits_and_drops_handlers() {
        let handler = |start, end| ExceptionHandler {
            start,
            end,
            handler: 20,
            catch_type: None,
        };
        let (table, index_map) =
            carve_exception_table(&[handler(0, 10), handler(4, 6)], &[(4, 6)]);
        assert_eq!(table, vec![handler(0, 4), handler(6, 10)]);
        assert_eq!(index_map, vec![Some(0), None]);
    }

    #[test]
    fn initial_frame_of_a_constructor_is_uninitialized() {
        let resolver = resolver();
        let computer = FrameComputer::new(&resolver, "demo/A", 52);
        let state = computer.initial_state("<init>", "(JLjava/lang/String;)V", 0).unwrap();
        assert_eq!(
            state.locals,
            vec![
                Slot::UninitializedThis,
                Slot::Long,
                Slot::Top,
                Slot::Object("java/lang/String".to_string()),
            ]
        );
        let state = computer
            .initial_state("run", "([I)V", access::STATIC)
            .unwrap();
        assert_eq!(state.locals, vec![Slot::Object("[I".to_string())]);
    }
}
