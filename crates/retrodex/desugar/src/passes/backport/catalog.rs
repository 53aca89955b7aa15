// Retrodex
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Catalog of backportable library methods
//!
//! Each entry pairs a library method with the API level that introduced it and
//! a self-contained reference body. Bodies only use their arguments; a body
//! may call other library methods, which are backported in turn.

use crate::error::DesugarResult;
use retrodex_common::{
    ApiLevel, BinaryOp, Code, CodeBuilder, Condition, Conversion, Instruction, InvokeKind, MethodProto, MethodRef, NumKind, TypeRef, ValueKind,
    ValueType,
};
use std::collections::{BTreeMap, HashMap};

const INT: Option<ValueKind> = Some(ValueKind::Int);
const LONG: Option<ValueKind> = Some(ValueKind::Long);
const REF: Option<ValueKind> = Some(ValueKind::Ref);

/// A backportable library method
#[derive(Debug, Clone)]
pub struct BackportEntry {
    pub method: MethodRef,
    /// Whether the library method is an instance method
    pub receiver: bool,
    pub introduced: ApiLevel,
    /// 1-based index among the catalog's overloads of the same owner and name
    pub overload: u32,
    build: fn() -> Code,
}

impl BackportEntry {
    /// Reference body operating on the backport's arguments
    pub fn body(&self) -> Code {
        (self.build)()
    }

    /// Prototype of the static backport, with the receiver as first argument for instance methods
    pub fn static_proto(&self) -> MethodProto {
        if self.receiver {
            self.method.proto.prepend(self.method.owner.as_value_type())
        } else {
            self.method.proto.clone()
        }
    }
}

/// Lookup table of backportable methods
#[derive(Debug, Clone, Default)]
pub struct BackportCatalog {
    entries: Vec<BackportEntry>,
    index: HashMap<MethodRef, usize>,
}

impl BackportCatalog {
    /// Catalog without entries
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in catalog
    pub fn standard() -> DesugarResult<Self> {
        let specs: [(&str, &str, &str, bool, ApiLevel, fn() -> Code); 26] = [
            ("java/lang/Boolean", "compare", "(ZZ)I", false, ApiLevel::K, boolean_compare),
            ("java/lang/Character", "compare", "(CC)I", false, ApiLevel::K, character_compare),
            ("java/lang/Integer", "compare", "(II)I", false, ApiLevel::K, integer_compare),
            ("java/lang/Integer", "compareUnsigned", "(II)I", false, ApiLevel::O, integer_compare_unsigned),
            ("java/lang/Integer", "divideUnsigned", "(II)I", false, ApiLevel::O, integer_divide_unsigned),
            ("java/lang/Integer", "hashCode", "(I)I", false, ApiLevel::N, integer_hash_code),
            ("java/lang/Integer", "max", "(II)I", false, ApiLevel::N, integer_max),
            ("java/lang/Integer", "min", "(II)I", false, ApiLevel::N, integer_min),
            ("java/lang/Integer", "remainderUnsigned", "(II)I", false, ApiLevel::O, integer_remainder_unsigned),
            ("java/lang/Integer", "sum", "(II)I", false, ApiLevel::N, integer_sum),
            ("java/lang/Integer", "toUnsignedLong", "(I)J", false, ApiLevel::O, integer_to_unsigned_long),
            ("java/lang/Long", "compare", "(JJ)I", false, ApiLevel::K, long_compare),
            ("java/lang/Long", "compareUnsigned", "(JJ)I", false, ApiLevel::O, long_compare_unsigned),
            ("java/lang/Long", "hashCode", "(J)I", false, ApiLevel::N, long_hash_code),
            ("java/lang/Math", "addExact", "(II)I", false, ApiLevel::N, math_add_exact_int),
            ("java/lang/Math", "addExact", "(JJ)J", false, ApiLevel::N, math_add_exact_long),
            ("java/lang/Math", "floorDiv", "(II)I", false, ApiLevel::N, math_floor_div),
            ("java/lang/Math", "floorMod", "(II)I", false, ApiLevel::N, math_floor_mod),
            ("java/lang/Math", "negateExact", "(I)I", false, ApiLevel::N, math_negate_exact),
            ("java/util/Objects", "equals", "(Ljava/lang/Object;Ljava/lang/Object;)Z", false, ApiLevel::K, objects_equals),
            ("java/util/Objects", "hashCode", "(Ljava/lang/Object;)I", false, ApiLevel::K, objects_hash_code),
            ("java/util/Objects", "isNull", "(Ljava/lang/Object;)Z", false, ApiLevel::N, objects_is_null),
            ("java/util/Objects", "nonNull", "(Ljava/lang/Object;)Z", false, ApiLevel::N, objects_non_null),
            ("java/util/Objects", "requireNonNull", "(Ljava/lang/Object;)Ljava/lang/Object;", false, ApiLevel::K, objects_require_non_null),
            (
                "java/util/Objects",
                "requireNonNull",
                "(Ljava/lang/Object;Ljava/lang/String;)Ljava/lang/Object;",
                false,
                ApiLevel::K,
                objects_require_non_null_message,
            ),
            (
                "java/util/Objects",
                "requireNonNullElse",
                "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
                false,
                ApiLevel::R,
                objects_require_non_null_else,
            ),
        ];

        let mut catalog = Self::empty();
        for (owner, name, descriptor, receiver, introduced, build) in specs {
            catalog.insert(owner, name, descriptor, receiver, introduced, build)?;
        }
        catalog.insert("java/util/Optional", "isEmpty", "()Z", true, ApiLevel::T, optional_is_empty)?;
        Ok(catalog)
    }

    /// Add an entry; an existing entry for the same method is replaced
    pub fn insert(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        receiver: bool,
        introduced: ApiLevel,
        build: fn() -> Code,
    ) -> DesugarResult<()> {
        let method = MethodRef::parse(owner, name, descriptor)?;
        let entry = BackportEntry {
            method: method.clone(),
            receiver,
            introduced,
            overload: 0,
            build,
        };
        match self.index.get(&method) {
            Some(&slot) => self.entries[slot] = entry,
            None => {
                self.index.insert(method, self.entries.len());
                self.entries.push(entry);
            }
        }
        self.number_overloads();
        Ok(())
    }

    fn number_overloads(&mut self) {
        let mut groups: BTreeMap<(TypeRef, String), Vec<(String, usize)>> = BTreeMap::new();
        for (slot, entry) in self.entries.iter().enumerate() {
            groups
                .entry((entry.method.owner.clone(), entry.method.name.to_string()))
                .or_default()
                .push((entry.method.proto.descriptor(), slot));
        }
        for mut members in groups.into_values() {
            members.sort();
            for (position, (_, slot)) in members.into_iter().enumerate() {
                self.entries[slot].overload = position as u32 + 1;
            }
        }
    }

    pub fn lookup(&self, method: &MethodRef) -> Option<&BackportEntry> {
        self.index.get(method).map(|&slot| &self.entries[slot])
    }

    pub fn entries(&self) -> impl Iterator<Item = &BackportEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn library_method(owner: &str, name: &str, params: Vec<ValueType>, ret: ValueType) -> MethodRef {
    MethodRef::new(TypeRef::new(owner), name, MethodProto::new(params, Some(ret)))
}

fn object_type() -> ValueType {
    ValueType::Object(TypeRef::object())
}

/// Push -1, 0 or 1 comparing two int locals and return it
fn return_int_ordering(b: &mut CodeBuilder, lhs: u16, rhs: u16) {
    let less = b.new_label();
    let greater = b.new_label();
    b.load(ValueKind::Int, lhs)
        .load(ValueKind::Int, rhs)
        .push(Instruction::IfCmp { cond: Condition::Lt, target: less });
    b.load(ValueKind::Int, lhs)
        .load(ValueKind::Int, rhs)
        .push(Instruction::IfCmp {
            cond: Condition::Gt,
            target: greater,
        });
    b.const_int(0).ret(INT);
    b.mark(less).const_int(-1).ret(INT);
    b.mark(greater).const_int(1).ret(INT);
}

/// Zero-extend an int local to a long on the stack
fn push_unsigned_long(b: &mut CodeBuilder, slot: u16) {
    b.load(ValueKind::Int, slot)
        .push(Instruction::Convert(Conversion::IntToLong))
        .const_long(0xffff_ffff)
        .binary(BinaryOp::And, NumKind::Long);
}

fn boolean_compare() -> Code {
    let mut b = CodeBuilder::new(2);
    let equal = b.new_label();
    let negative = b.new_label();
    b.load(ValueKind::Int, 0)
        .load(ValueKind::Int, 1)
        .push(Instruction::IfCmp { cond: Condition::Eq, target: equal });
    b.load(ValueKind::Int, 0).push(Instruction::If {
        cond: Condition::Eq,
        target: negative,
    });
    b.const_int(1).ret(INT);
    b.mark(negative).const_int(-1).ret(INT);
    b.mark(equal).const_int(0).ret(INT);
    b.build()
}

fn character_compare() -> Code {
    let mut b = CodeBuilder::new(2);
    b.load(ValueKind::Int, 0)
        .load(ValueKind::Int, 1)
        .binary(BinaryOp::Sub, NumKind::Int)
        .ret(INT);
    b.build()
}

fn integer_compare() -> Code {
    let mut b = CodeBuilder::new(2);
    return_int_ordering(&mut b, 0, 1);
    b.build()
}

fn integer_compare_unsigned() -> Code {
    let mut b = CodeBuilder::new(2);
    for slot in [0, 1] {
        b.load(ValueKind::Int, slot)
            .const_int(i32::MIN)
            .binary(BinaryOp::Xor, NumKind::Int)
            .store(ValueKind::Int, slot);
    }
    return_int_ordering(&mut b, 0, 1);
    b.build()
}

fn integer_divide_unsigned() -> Code {
    let mut b = CodeBuilder::new(2);
    push_unsigned_long(&mut b, 0);
    push_unsigned_long(&mut b, 1);
    b.binary(BinaryOp::Div, NumKind::Long)
        .push(Instruction::Convert(Conversion::LongToInt))
        .ret(INT);
    b.build()
}

fn integer_remainder_unsigned() -> Code {
    let mut b = CodeBuilder::new(2);
    push_unsigned_long(&mut b, 0);
    push_unsigned_long(&mut b, 1);
    b.binary(BinaryOp::Rem, NumKind::Long)
        .push(Instruction::Convert(Conversion::LongToInt))
        .ret(INT);
    b.build()
}

fn integer_to_unsigned_long() -> Code {
    let mut b = CodeBuilder::new(1);
    push_unsigned_long(&mut b, 0);
    b.ret(LONG);
    b.build()
}

fn integer_hash_code() -> Code {
    let mut b = CodeBuilder::new(1);
    b.load(ValueKind::Int, 0).ret(INT);
    b.build()
}

fn integer_sum() -> Code {
    let mut b = CodeBuilder::new(2);
    b.load(ValueKind::Int, 0)
        .load(ValueKind::Int, 1)
        .binary(BinaryOp::Add, NumKind::Int)
        .ret(INT);
    b.build()
}

fn integer_extreme(keep_first: Condition) -> Code {
    let mut b = CodeBuilder::new(2);
    let first = b.new_label();
    b.load(ValueKind::Int, 0).load(ValueKind::Int, 1).push(Instruction::IfCmp {
        cond: keep_first,
        target: first,
    });
    b.load(ValueKind::Int, 1).ret(INT);
    b.mark(first).load(ValueKind::Int, 0).ret(INT);
    b.build()
}

fn integer_max() -> Code {
    integer_extreme(Condition::Ge)
}

fn integer_min() -> Code {
    integer_extreme(Condition::Le)
}

fn long_compare() -> Code {
    let mut b = CodeBuilder::new(2);
    b.load(ValueKind::Long, 0)
        .load(ValueKind::Long, 1)
        .push(Instruction::LongCompare)
        .ret(INT);
    b.build()
}

fn long_compare_unsigned() -> Code {
    let mut b = CodeBuilder::new(2);
    for slot in [0, 1] {
        b.load(ValueKind::Long, slot)
            .const_long(i64::MIN)
            .binary(BinaryOp::Xor, NumKind::Long);
    }
    b.push(Instruction::LongCompare).ret(INT);
    b.build()
}

fn long_hash_code() -> Code {
    let mut b = CodeBuilder::new(1);
    b.load(ValueKind::Long, 0)
        .load(ValueKind::Long, 0)
        .const_int(32)
        .binary(BinaryOp::Ushr, NumKind::Long)
        .binary(BinaryOp::Xor, NumKind::Long)
        .push(Instruction::Convert(Conversion::LongToInt))
        .ret(INT);
    b.build()
}

fn math_add_exact_int() -> Code {
    let mut b = CodeBuilder::new(2);
    let result = b.new_local();
    let no_overflow = b.new_label();
    b.load(ValueKind::Int, 0)
        .load(ValueKind::Int, 1)
        .binary(BinaryOp::Add, NumKind::Int)
        .store(ValueKind::Int, result);
    // Overflow iff both operands differ in sign from the result
    b.load(ValueKind::Int, 0)
        .load(ValueKind::Int, result)
        .binary(BinaryOp::Xor, NumKind::Int)
        .load(ValueKind::Int, 1)
        .load(ValueKind::Int, result)
        .binary(BinaryOp::Xor, NumKind::Int)
        .binary(BinaryOp::And, NumKind::Int)
        .push(Instruction::If {
            cond: Condition::Ge,
            target: no_overflow,
        });
    b.throw_new("java/lang/ArithmeticException", Some("integer overflow"));
    b.mark(no_overflow).load(ValueKind::Int, result).ret(INT);
    b.build()
}

fn math_add_exact_long() -> Code {
    let mut b = CodeBuilder::new(2);
    let result = b.new_local();
    let no_overflow = b.new_label();
    b.load(ValueKind::Long, 0)
        .load(ValueKind::Long, 1)
        .binary(BinaryOp::Add, NumKind::Long)
        .store(ValueKind::Long, result);
    b.load(ValueKind::Long, 0)
        .load(ValueKind::Long, result)
        .binary(BinaryOp::Xor, NumKind::Long)
        .load(ValueKind::Long, 1)
        .load(ValueKind::Long, result)
        .binary(BinaryOp::Xor, NumKind::Long)
        .binary(BinaryOp::And, NumKind::Long)
        .const_long(0)
        .push(Instruction::LongCompare)
        .push(Instruction::If {
            cond: Condition::Ge,
            target: no_overflow,
        });
    b.throw_new("java/lang/ArithmeticException", Some("long overflow"));
    b.mark(no_overflow).load(ValueKind::Long, result).ret(LONG);
    b.build()
}

fn math_floor_div() -> Code {
    let mut b = CodeBuilder::new(2);
    let quotient = b.new_local();
    let done = b.new_label();
    b.load(ValueKind::Int, 0)
        .load(ValueKind::Int, 1)
        .binary(BinaryOp::Div, NumKind::Int)
        .store(ValueKind::Int, quotient);
    b.load(ValueKind::Int, 0)
        .load(ValueKind::Int, 1)
        .binary(BinaryOp::Xor, NumKind::Int)
        .push(Instruction::If { cond: Condition::Ge, target: done });
    b.load(ValueKind::Int, quotient)
        .load(ValueKind::Int, 1)
        .binary(BinaryOp::Mul, NumKind::Int)
        .load(ValueKind::Int, 0)
        .push(Instruction::IfCmp { cond: Condition::Eq, target: done });
    b.load(ValueKind::Int, quotient)
        .const_int(1)
        .binary(BinaryOp::Sub, NumKind::Int)
        .store(ValueKind::Int, quotient);
    b.mark(done).load(ValueKind::Int, quotient).ret(INT);
    b.build()
}

fn math_floor_mod() -> Code {
    let mut b = CodeBuilder::new(2);
    let modulus = b.new_local();
    let done = b.new_label();
    b.load(ValueKind::Int, 0)
        .load(ValueKind::Int, 1)
        .binary(BinaryOp::Rem, NumKind::Int)
        .store(ValueKind::Int, modulus);
    b.load(ValueKind::Int, modulus)
        .load(ValueKind::Int, 1)
        .binary(BinaryOp::Xor, NumKind::Int)
        .push(Instruction::If { cond: Condition::Ge, target: done });
    b.load(ValueKind::Int, modulus).push(Instruction::If { cond: Condition::Eq, target: done });
    b.load(ValueKind::Int, modulus)
        .load(ValueKind::Int, 1)
        .binary(BinaryOp::Add, NumKind::Int)
        .store(ValueKind::Int, modulus);
    b.mark(done).load(ValueKind::Int, modulus).ret(INT);
    b.build()
}

fn math_negate_exact() -> Code {
    let mut b = CodeBuilder::new(1);
    let safe = b.new_label();
    b.load(ValueKind::Int, 0)
        .const_int(i32::MIN)
        .push(Instruction::IfCmp { cond: Condition::Ne, target: safe });
    b.throw_new("java/lang/ArithmeticException", Some("integer overflow"));
    b.mark(safe).load(ValueKind::Int, 0).push(Instruction::Neg(NumKind::Int)).ret(INT);
    b.build()
}

fn objects_equals() -> Code {
    let mut b = CodeBuilder::new(2);
    let same = b.new_label();
    let different = b.new_label();
    b.load(ValueKind::Ref, 0)
        .load(ValueKind::Ref, 1)
        .push(Instruction::IfRefEq { target: same });
    b.load(ValueKind::Ref, 0).push(Instruction::IfNull { target: different });
    b.load(ValueKind::Ref, 0).load(ValueKind::Ref, 1).invoke(
        InvokeKind::Virtual,
        library_method("java/lang/Object", "equals", vec![object_type()], ValueType::Boolean),
        false,
    );
    b.ret(INT);
    b.mark(same).const_int(1).ret(INT);
    b.mark(different).const_int(0).ret(INT);
    b.build()
}

fn objects_hash_code() -> Code {
    let mut b = CodeBuilder::new(1);
    let present = b.new_label();
    b.load(ValueKind::Ref, 0).push(Instruction::IfNonNull { target: present });
    b.const_int(0).ret(INT);
    b.mark(present)
        .load(ValueKind::Ref, 0)
        .invoke(InvokeKind::Virtual, library_method("java/lang/Object", "hashCode", Vec::new(), ValueType::Int), false)
        .ret(INT);
    b.build()
}

fn objects_null_test(null_result: i32) -> Code {
    let mut b = CodeBuilder::new(1);
    let is_null = b.new_label();
    b.load(ValueKind::Ref, 0).push(Instruction::IfNull { target: is_null });
    b.const_int(1 - null_result).ret(INT);
    b.mark(is_null).const_int(null_result).ret(INT);
    b.build()
}

fn objects_is_null() -> Code {
    objects_null_test(1)
}

fn objects_non_null() -> Code {
    objects_null_test(0)
}

fn objects_require_non_null() -> Code {
    // getClass() raises the platform's own NullPointerException for null
    let mut b = CodeBuilder::new(1);
    b.load(ValueKind::Ref, 0)
        .invoke(
            InvokeKind::Virtual,
            library_method("java/lang/Object", "getClass", Vec::new(), ValueType::object("java/lang/Class")),
            false,
        )
        .push(Instruction::Pop)
        .load(ValueKind::Ref, 0)
        .ret(REF);
    b.build()
}

fn objects_require_non_null_message() -> Code {
    let mut b = CodeBuilder::new(2);
    let present = b.new_label();
    let npe = TypeRef::new("java/lang/NullPointerException");
    b.load(ValueKind::Ref, 0).push(Instruction::IfNonNull { target: present });
    b.push(Instruction::New(npe.clone()))
        .push(Instruction::Dup)
        .load(ValueKind::Ref, 1)
        .invoke(
            InvokeKind::Special,
            MethodRef::new(npe, "<init>", MethodProto::new(vec![ValueType::object("java/lang/String")], None)),
            false,
        )
        .push(Instruction::Throw);
    b.mark(present).load(ValueKind::Ref, 0).ret(REF);
    b.build()
}

fn objects_require_non_null_else() -> Code {
    let mut b = CodeBuilder::new(2);
    let fallback = b.new_label();
    b.load(ValueKind::Ref, 0).push(Instruction::IfNull { target: fallback });
    b.load(ValueKind::Ref, 0).ret(REF);
    b.mark(fallback)
        .load(ValueKind::Ref, 1)
        .const_string("defaultObj")
        .invoke(
            InvokeKind::Static,
            library_method(
                "java/util/Objects",
                "requireNonNull",
                vec![object_type(), ValueType::object("java/lang/String")],
                object_type(),
            ),
            false,
        )
        .ret(REF);
    b.build()
}

fn optional_is_empty() -> Code {
    let mut b = CodeBuilder::new(1);
    let present = b.new_label();
    b.load(ValueKind::Ref, 0)
        .invoke(InvokeKind::Virtual, library_method("java/util/Optional", "isPresent", Vec::new(), ValueType::Boolean), false)
        .push(Instruction::If {
            cond: Condition::Ne,
            target: present,
        });
    b.const_int(1).ret(INT);
    b.mark(present).const_int(0).ret(INT);
    b.build()
}
