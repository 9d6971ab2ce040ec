use std::fmt;

use crate::{
    typesystem::PrimitiveKind,
    value::{ArrayValue, FieldMap, MockValue, Primitive, Value},
};

/// Elements shown before an array rendering is cut short.
const MAX_RENDERED_ELEMENTS: usize = 32;

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PrimitiveKind::Boolean => write!(f, "{}", self.as_bool()),
            PrimitiveKind::Char => match char::from_u32(self.bits as u32) {
                Some(c) => write!(f, "{:?}", c),
                None => write!(f, "'\\u{{{:04x}}}'", self.bits),
            },
            PrimitiveKind::R4 => write!(f, "{}", f32::from_bits(self.bits as u32)),
            PrimitiveKind::R8 => write!(f, "{}", f64::from_bits(self.bits)),
            kind if kind.is_signed() => write!(f, "{}", self.as_i64()),
            _ => write!(f, "{}", self.bits),
        }
    }
}

fn write_fields(f: &mut fmt::Formatter<'_>, fields: &FieldMap<Value>) -> fmt::Result {
    if fields.is_empty() {
        return f.write_str(" {}");
    }

    f.write_str(" { ")?;
    for (i, (name, value)) in fields.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}: {}", name, value)?;
    }
    f.write_str(" }")
}

fn write_list<'a>(
    f: &mut fmt::Formatter<'_>,
    values: impl Iterator<Item = &'a Value>,
    total: usize,
) -> fmt::Result {
    for (i, value) in values.take(MAX_RENDERED_ELEMENTS).enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", value)?;
    }
    if total > MAX_RENDERED_ELEMENTS {
        write!(f, ", ... ({} more)", total - MAX_RENDERED_ELEMENTS)?;
    }
    Ok(())
}

impl fmt::Display for ArrayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.element)?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if dim.lower_bound == 0 {
                write!(f, "{}", dim.length)?;
            } else {
                let upper = i64::from(dim.lower_bound) + i64::from(dim.length) - 1;
                write!(f, "{}..{}", dim.lower_bound, upper)?;
            }
        }
        f.write_str("]")?;

        if self.is_empty() {
            return f.write_str(" {}");
        }
        f.write_str(" { ")?;
        write_list(f, self.iter(), self.len())?;
        f.write_str(" }")
    }
}

impl fmt::Display for MockValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mock {}", self.ty)?;
        if self.methods.is_empty() {
            return f.write_str(" {}");
        }

        f.write_str(" { ")?;
        for (i, method) in self.methods.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: [", method.name)?;
            write_list(f, method.returns.iter(), method.returns.len())?;
            f.write_str("]")?;
        }
        f.write_str(" }")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Primitive(primitive) => write!(f, "{}", primitive),
            Value::Text(text) => write!(f, "{:?}", text),
            Value::Enum(value) => write!(f, "{}({})", value.ty, value.value),
            Value::Array(array) => write!(f, "{}", array),
            Value::Struct(value) => {
                write!(f, "{}", value.ty)?;
                write_fields(f, &value.fields)
            }
            Value::Object(value) => {
                write!(f, "{}#{}", value.ty, value.identity.0)?;
                if value.fields.is_empty() {
                    Ok(())
                } else {
                    write_fields(f, &value.fields)
                }
            }
            Value::Mock(mock) => write!(f, "{}", mock),
        }
    }
}
