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

//! Library methods implemented by the runtime
//!
//! Each native exists from the API level that introduced it. Instance natives
//! receive the receiver as their first argument.

use crate::errors::{VmError, VmResult};
use crate::value::{Heap, Payload, Value};
use retrodex_common::{ApiLevel, MethodRef, TypeRef};
use std::collections::HashMap;

/// Implementation of a native method
pub type NativeFn = fn(&mut Heap, &[Value]) -> VmResult<Option<Value>>;

/// A native method and the level it appeared at
#[derive(Clone, Copy)]
pub struct Native {
    pub introduced: ApiLevel,
    pub function: NativeFn,
}

/// Natives by method reference
#[derive(Clone, Default)]
pub struct NativeTable {
    entries: HashMap<MethodRef, Native>,
}

const OPTIONAL: &str = "java/util/Optional";

impl NativeTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Natives of the modelled platform library
    pub fn standard() -> Self {
        let specs: [(&str, &str, &str, ApiLevel, NativeFn); 36] = [
            ("java/lang/Object", "getClass", "()Ljava/lang/Class;", ApiLevel::B, object_get_class),
            ("java/lang/Object", "equals", "(Ljava/lang/Object;)Z", ApiLevel::B, object_equals),
            ("java/lang/Object", "hashCode", "()I", ApiLevel::B, object_hash_code),
            ("java/lang/Throwable", "getMessage", "()Ljava/lang/String;", ApiLevel::B, throwable_get_message),
            ("java/lang/String", "length", "()I", ApiLevel::B, string_length),
            ("java/lang/Boolean", "compare", "(ZZ)I", ApiLevel::K, boolean_compare),
            ("java/lang/Character", "compare", "(CC)I", ApiLevel::K, character_compare),
            ("java/lang/Integer", "compare", "(II)I", ApiLevel::K, integer_compare),
            ("java/lang/Integer", "compareUnsigned", "(II)I", ApiLevel::O, integer_compare_unsigned),
            ("java/lang/Integer", "divideUnsigned", "(II)I", ApiLevel::O, integer_divide_unsigned),
            ("java/lang/Integer", "remainderUnsigned", "(II)I", ApiLevel::O, integer_remainder_unsigned),
            ("java/lang/Integer", "toUnsignedLong", "(I)J", ApiLevel::O, integer_to_unsigned_long),
            ("java/lang/Integer", "hashCode", "(I)I", ApiLevel::N, integer_hash_code),
            ("java/lang/Integer", "max", "(II)I", ApiLevel::N, integer_max),
            ("java/lang/Integer", "min", "(II)I", ApiLevel::N, integer_min),
            ("java/lang/Integer", "sum", "(II)I", ApiLevel::N, integer_sum),
            ("java/lang/Long", "compare", "(JJ)I", ApiLevel::K, long_compare),
            ("java/lang/Long", "compareUnsigned", "(JJ)I", ApiLevel::O, long_compare_unsigned),
            ("java/lang/Long", "hashCode", "(J)I", ApiLevel::N, long_hash_code),
            ("java/lang/Math", "addExact", "(II)I", ApiLevel::N, math_add_exact_int),
            ("java/lang/Math", "addExact", "(JJ)J", ApiLevel::N, math_add_exact_long),
            ("java/lang/Math", "floorDiv", "(II)I", ApiLevel::N, math_floor_div),
            ("java/lang/Math", "floorMod", "(II)I", ApiLevel::N, math_floor_mod),
            ("java/lang/Math", "negateExact", "(I)I", ApiLevel::N, math_negate_exact),
            ("java/util/Objects", "equals", "(Ljava/lang/Object;Ljava/lang/Object;)Z", ApiLevel::K, objects_equals),
            ("java/util/Objects", "hashCode", "(Ljava/lang/Object;)I", ApiLevel::K, objects_hash_code),
            ("java/util/Objects", "isNull", "(Ljava/lang/Object;)Z", ApiLevel::N, objects_is_null),
            ("java/util/Objects", "nonNull", "(Ljava/lang/Object;)Z", ApiLevel::N, objects_non_null),
            ("java/util/Objects", "requireNonNull", "(Ljava/lang/Object;)Ljava/lang/Object;", ApiLevel::K, objects_require_non_null),
            (
                "java/util/Objects",
                "requireNonNull",
                "(Ljava/lang/Object;Ljava/lang/String;)Ljava/lang/Object;",
                ApiLevel::K,
                objects_require_non_null_message,
            ),
            (
                "java/util/Objects",
                "requireNonNullElse",
                "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
                ApiLevel::R,
                objects_require_non_null_else,
            ),
            (OPTIONAL, "empty", "()Ljava/util/Optional;", ApiLevel::N, optional_empty),
            (OPTIONAL, "of", "(Ljava/lang/Object;)Ljava/util/Optional;", ApiLevel::N, optional_of),
            (OPTIONAL, "isPresent", "()Z", ApiLevel::N, optional_is_present),
            (OPTIONAL, "get", "()Ljava/lang/Object;", ApiLevel::N, optional_get),
            (OPTIONAL, "isEmpty", "()Z", ApiLevel::T, optional_is_empty),
        ];
        let mut table = Self::empty();
        for (owner, name, descriptor, introduced, function) in specs {
            if let Ok(method) = MethodRef::parse(owner, name, descriptor) {
                table.insert(method, introduced, function);
            }
        }
        table
    }

    pub fn insert(&mut self, method: MethodRef, introduced: ApiLevel, function: NativeFn) {
        self.entries.insert(method, Native { introduced, function });
    }

    /// Native implementing `method` on a runtime at `api`
    pub fn lookup(&self, method: &MethodRef, api: ApiLevel) -> Option<NativeFn> {
        self.entries
            .get(method)
            .filter(|native| api >= native.introduced)
            .map(|native| native.function)
    }

    /// Whether `owner` has any native, at any level
    pub fn knows_class(&self, owner: &TypeRef) -> bool {
        self.entries.keys().any(|method| &method.owner == owner)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn int(args: &[Value], index: usize) -> VmResult<i32> {
    arg(args, index)?.as_int("native")
}

fn long(args: &[Value], index: usize) -> VmResult<i64> {
    arg(args, index)?.as_long("native")
}

fn arg(args: &[Value], index: usize) -> VmResult<Value> {
    args.get(index)
        .copied()
        .ok_or_else(|| VmError::StackUnderflow { method: "native".to_string() })
}

fn ret_int(value: i32) -> VmResult<Option<Value>> {
    Ok(Some(Value::Int(value)))
}

fn ret_bool(value: bool) -> VmResult<Option<Value>> {
    ret_int(i32::from(value))
}

fn ordering(ordering: std::cmp::Ordering) -> VmResult<Option<Value>> {
    ret_int(ordering as i32)
}

fn arithmetic(message: &str) -> VmError {
    VmError::thrown("java/lang/ArithmeticException", message)
}

/// Identity hash of an object; strings hash by content
pub fn hash_code(heap: &Heap, value: Value) -> VmResult<i32> {
    match value {
        Value::Null => Ok(0),
        Value::Ref(index) => match &heap.get(index)?.payload {
            Payload::Str(text) => Ok(text.encode_utf16().fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))),
            _ => Ok(index as i32),
        },
        other => Err(VmError::TypeMismatch {
            method: "hashCode".to_string(),
            expected: "reference",
            found: other.to_string(),
        }),
    }
}

/// `Object.equals` of the modelled library: identity, content for strings
pub fn equals(heap: &Heap, lhs: Value, rhs: Value) -> bool {
    if lhs == rhs {
        return true;
    }
    match (heap.text(lhs), heap.text(rhs)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn receiver(args: &[Value], method: &str) -> VmResult<usize> {
    arg(args, 0)?
        .as_object(method)?
        .ok_or_else(|| VmError::null_pointer(format!("Attempt to invoke {method} on a null object reference")))
}

fn object_get_class(heap: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let index = receiver(args, "getClass")?;
    let class = heap.get(index)?.class.clone();
    Ok(Some(heap.allocate(TypeRef::new("java/lang/Class"), Payload::Class(class))))
}

fn object_equals(heap: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let index = receiver(args, "equals")?;
    ret_bool(equals(heap, Value::Ref(index), arg(args, 1)?))
}

fn object_hash_code(heap: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let index = receiver(args, "hashCode")?;
    ret_int(hash_code(heap, Value::Ref(index))?)
}

fn throwable_get_message(heap: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let index = receiver(args, "getMessage")?;
    let message = match &heap.get(index)?.payload {
        Payload::Throwable { message } => message.clone(),
        _ => None,
    };
    Ok(Some(match message {
        Some(text) => heap.string(&text),
        None => Value::Null,
    }))
}

fn string_length(heap: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let index = receiver(args, "length")?;
    let text = heap.text(Value::Ref(index)).unwrap_or_default();
    ret_int(text.encode_utf16().count() as i32)
}

fn boolean_compare(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ordering((int(args, 0)? != 0).cmp(&(int(args, 1)? != 0)))
}

fn character_compare(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ret_int(int(args, 0)?.wrapping_sub(int(args, 1)?))
}

fn integer_compare(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ordering(int(args, 0)?.cmp(&int(args, 1)?))
}

fn integer_compare_unsigned(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ordering((int(args, 0)? as u32).cmp(&(int(args, 1)? as u32)))
}

fn integer_divide_unsigned(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let divisor = int(args, 1)? as u32;
    if divisor == 0 {
        return Err(arithmetic("/ by zero"));
    }
    ret_int(((int(args, 0)? as u32) / divisor) as i32)
}

fn integer_remainder_unsigned(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let divisor = int(args, 1)? as u32;
    if divisor == 0 {
        return Err(arithmetic("/ by zero"));
    }
    ret_int(((int(args, 0)? as u32) % divisor) as i32)
}

fn integer_to_unsigned_long(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    Ok(Some(Value::Long(i64::from(int(args, 0)? as u32))))
}

fn integer_hash_code(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ret_int(int(args, 0)?)
}

fn integer_max(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ret_int(int(args, 0)?.max(int(args, 1)?))
}

fn integer_min(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ret_int(int(args, 0)?.min(int(args, 1)?))
}

fn integer_sum(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ret_int(int(args, 0)?.wrapping_add(int(args, 1)?))
}

fn long_compare(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ordering(long(args, 0)?.cmp(&long(args, 1)?))
}

fn long_compare_unsigned(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ordering((long(args, 0)? as u64).cmp(&(long(args, 1)? as u64)))
}

fn long_hash_code(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let value = long(args, 0)?;
    ret_int((value ^ ((value as u64) >> 32) as i64) as i32)
}

fn math_add_exact_int(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let sum = int(args, 0)?.checked_add(int(args, 1)?).ok_or_else(|| arithmetic("integer overflow"))?;
    ret_int(sum)
}

fn math_add_exact_long(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let sum = long(args, 0)?.checked_add(long(args, 1)?).ok_or_else(|| arithmetic("long overflow"))?;
    Ok(Some(Value::Long(sum)))
}

fn math_floor_div(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let (x, y) = (int(args, 0)?, int(args, 1)?);
    if y == 0 {
        return Err(arithmetic("/ by zero"));
    }
    let quotient = x.wrapping_div(y);
    if (x ^ y) < 0 && quotient.wrapping_mul(y) != x {
        return ret_int(quotient - 1);
    }
    ret_int(quotient)
}

fn math_floor_mod(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let (x, y) = (int(args, 0)?, int(args, 1)?);
    if y == 0 {
        return Err(arithmetic("/ by zero"));
    }
    let modulus = x.wrapping_rem(y);
    if (modulus ^ y) < 0 && modulus != 0 {
        return ret_int(modulus + y);
    }
    ret_int(modulus)
}

fn math_negate_exact(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let value = int(args, 0)?.checked_neg().ok_or_else(|| arithmetic("integer overflow"))?;
    ret_int(value)
}

fn objects_equals(heap: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ret_bool(equals(heap, arg(args, 0)?, arg(args, 1)?))
}

fn objects_hash_code(heap: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ret_int(hash_code(heap, arg(args, 0)?)?)
}

fn objects_is_null(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ret_bool(arg(args, 0)?.is_null())
}

fn objects_non_null(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ret_bool(!arg(args, 0)?.is_null())
}

fn objects_require_non_null(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let value = arg(args, 0)?;
    if value.is_null() {
        return Err(VmError::Thrown {
            class: "java/lang/NullPointerException".to_string(),
            message: None,
        });
    }
    Ok(Some(value))
}

fn objects_require_non_null_message(heap: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let value = arg(args, 0)?;
    if value.is_null() {
        return Err(VmError::Thrown {
            class: "java/lang/NullPointerException".to_string(),
            message: heap.text(arg(args, 1)?).map(|text| text.to_string()),
        });
    }
    Ok(Some(value))
}

fn objects_require_non_null_else(_: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let value = arg(args, 0)?;
    if !value.is_null() {
        return Ok(Some(value));
    }
    let fallback = arg(args, 1)?;
    if fallback.is_null() {
        return Err(VmError::null_pointer("defaultObj"));
    }
    Ok(Some(fallback))
}

fn optional_empty(heap: &mut Heap, _: &[Value]) -> VmResult<Option<Value>> {
    Ok(Some(heap.allocate(TypeRef::new(OPTIONAL), Payload::Optional(None))))
}

fn optional_of(heap: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    let value = arg(args, 0)?;
    if value.is_null() {
        return Err(VmError::Thrown {
            class: "java/lang/NullPointerException".to_string(),
            message: None,
        });
    }
    Ok(Some(heap.allocate(TypeRef::new(OPTIONAL), Payload::Optional(Some(value)))))
}

fn optional_contents(heap: &Heap, args: &[Value], method: &str) -> VmResult<Option<Value>> {
    let index = receiver(args, method)?;
    match &heap.get(index)?.payload {
        Payload::Optional(contents) => Ok(*contents),
        _ => Err(VmError::Unsupported(format!("{method} on a non-Optional receiver"))),
    }
}

fn optional_is_present(heap: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ret_bool(optional_contents(heap, args, "isPresent")?.is_some())
}

fn optional_is_empty(heap: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    ret_bool(optional_contents(heap, args, "isEmpty")?.is_none())
}

fn optional_get(heap: &mut Heap, args: &[Value]) -> VmResult<Option<Value>> {
    optional_contents(heap, args, "get")?
        .map(Some)
        .ok_or_else(|| VmError::thrown("java/util/NoSuchElementException", "No value present"))
}
