//! Binary operation dispatch.

use crate::{
    types::BinOpsHandler,
    value::{BinOp, Value},
    Error, Flow, Forth,
};

fn unsupported<T: 'static>(a: &Value<T>, b: &Value<T>, op: BinOp) -> Error {
    Error::TypeMismatch(format!(
        "unsupported operation on these types: {} {} {}",
        a.kind_name(),
        op.symbol(),
        b.kind_name()
    ))
}

fn int_op<T: 'static>(a: i64, b: i64, op: BinOp) -> Result<Value<T>, Error> {
    Ok(match op {
        BinOp::Add => Value::Int(a.wrapping_add(b)),
        BinOp::Sub => Value::Int(a.wrapping_sub(b)),
        BinOp::Mul => Value::Int(a.wrapping_mul(b)),
        BinOp::Div => {
            if b == 0 {
                return Err(Error::DivideByZero);
            }
            Value::Int(a.wrapping_div(b))
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(Error::DivideByZero);
            }
            Value::Int(a.wrapping_rem(b))
        }
        BinOp::Eq => Value::Bool(a == b),
        BinOp::Ne => Value::Bool(a != b),
        BinOp::Lt => Value::Bool(a < b),
        BinOp::Gt => Value::Bool(a > b),
        BinOp::Le => Value::Bool(a <= b),
        BinOp::Ge => Value::Bool(a >= b),
        BinOp::And => Value::Int(a & b),
        BinOp::Or => Value::Int(a | b),
        BinOp::Xor => Value::Int(a ^ b),
    })
}

fn float_op<T: 'static>(a: f64, b: f64, op: BinOp) -> Result<Value<T>, Error> {
    Ok(match op {
        BinOp::Add => Value::Float(a + b),
        BinOp::Sub => Value::Float(a - b),
        BinOp::Mul => Value::Float(a * b),
        BinOp::Div | BinOp::Mod if b == 0.0 => return Err(Error::DivideByZero),
        BinOp::Div => Value::Float(a / b),
        BinOp::Mod => Value::Float(a % b),
        BinOp::Eq => Value::Bool(a == b),
        BinOp::Ne => Value::Bool(a != b),
        BinOp::Lt => Value::Bool(a < b),
        BinOp::Gt => Value::Bool(a > b),
        BinOp::Le => Value::Bool(a <= b),
        BinOp::Ge => Value::Bool(a >= b),
        BinOp::And | BinOp::Or | BinOp::Xor => {
            return Err(Error::TypeMismatch(format!(
                "'{}' is not defined for floats",
                op.symbol()
            )))
        }
    })
}

/// `=`/`<>` on values that only support identity or equality.
fn eq_only<T: 'static>(a: &Value<T>, b: &Value<T>, op: BinOp) -> Result<Value<T>, Error> {
    match op {
        BinOp::Eq => Ok(Value::Bool(a == b)),
        BinOp::Ne => Ok(Value::Bool(a != b)),
        _ => Err(unsupported(a, b, op)),
    }
}

fn is_number<T: 'static>(v: &Value<T>) -> bool {
    matches!(v, Value::Float(_)) || v.is_int_like()
}

/// Binary operations on values that don't involve an object handler.
pub fn value_binop<T: 'static>(a: &Value<T>, b: &Value<T>, op: BinOp) -> Result<Value<T>, Error> {
    match (a, b) {
        (Value::Float(_), _) | (_, Value::Float(_)) if is_number(a) && is_number(b) => {
            float_op(a.as_float()?, b.as_float()?, op)
        }
        (Value::Bool(x), Value::Bool(y)) => match op {
            BinOp::Eq => Ok(Value::Bool(x == y)),
            BinOp::Ne => Ok(Value::Bool(x != y)),
            BinOp::And => Ok(Value::Bool(*x && *y)),
            BinOp::Or => Ok(Value::Bool(*x || *y)),
            BinOp::Xor => Ok(Value::Bool(x ^ y)),
            _ => Err(unsupported(a, b, op)),
        },
        _ if a.is_int_like() && b.is_int_like() => int_op(a.as_int()?, b.as_int()?, op),
        (Value::Ptr(p), Value::Int(n)) => match op {
            BinOp::Add => Ok(Value::Ptr(p.offset(*n)?)),
            BinOp::Sub => Ok(Value::Ptr(p.offset(n.wrapping_neg())?)),
            _ => Err(unsupported(a, b, op)),
        },
        (Value::Int(n), Value::Ptr(p)) if op == BinOp::Add => Ok(Value::Ptr(p.offset(*n)?)),
        (Value::Ptr(x), Value::Ptr(y)) => match op {
            BinOp::Sub if x.same_target(y) => {
                Ok(Value::Int(x.index() as i64 - y.index() as i64))
            }
            BinOp::Eq | BinOp::Ne => eq_only(a, b, op),
            _ => Err(unsupported(a, b, op)),
        },
        (Value::Type(_), Value::Type(_))
        | (Value::BinOp(_), Value::BinOp(_))
        | (Value::Xt(_), Value::Xt(_))
        | (Value::Obj(_), Value::Obj(_)) => eq_only(a, b, op),
        _ => Err(unsupported(a, b, op)),
    }
}

impl<T: 'static> Forth<T> {
    /// Apply `op`, dispatching to an object type's handler when either
    /// operand has one (the left operand's type first).
    pub fn apply_binop(&mut self, a: Value<T>, b: Value<T>, op: BinOp) -> Result<Value<T>, Error> {
        let handler = [&a, &b]
            .into_iter()
            .filter(|v| matches!(v, Value::Obj(_)))
            .find_map(|v| self.types.binops(v.type_id()));
        let Some(handler) = handler else {
            return value_binop(&a, &b, op);
        };

        let before = self.data_stack.depth();
        self.data_stack.push(a)?;
        self.data_stack.push(b)?;
        self.data_stack.push(Value::BinOp(op))?;
        match handler {
            BinOpsHandler::Native(func) => match func(self)? {
                Flow::Call(word) => self.execute_word(word)?,
                Flow::Continue | Flow::Exit => {}
            },
            BinOpsHandler::Word(word) => self.execute_word(word)?,
        }
        if self.data_stack.depth() != before + 1 {
            tracing::debug!(
                before,
                after = self.data_stack.depth(),
                op = op.symbol(),
                "binop handler broke the stack contract"
            );
            return Err(Error::BinOpContract);
        }
        Ok(self.data_stack.try_pop()?)
    }

    /// `( a b -- a<op>b )`
    pub(crate) fn binary(&mut self, op: BinOp) -> Result<Flow<T>, Error> {
        let b = self.data_stack.try_pop()?;
        let a = self.data_stack.try_pop()?;
        let res = self.apply_binop(a, b, op)?;
        self.data_stack.push(res)?;
        Ok(Flow::Continue)
    }

    pub fn add(&mut self) -> Result<Flow<T>, Error> {
        self.binary(BinOp::Add)
    }

    pub fn minus(&mut self) -> Result<Flow<T>, Error> {
        self.binary(BinOp::Sub)
    }

    pub fn mul(&mut self) -> Result<Flow<T>, Error> {
        self.binary(BinOp::Mul)
    }

    pub fn div(&mut self) -> Result<Flow<T>, Error> {
        self.binary(BinOp::Div)
    }

    pub fn modu(&mut self) -> Result<Flow<T>, Error> {
        self.binary(BinOp::Mod)
    }

    pub fn equal(&mut self) -> Result<Flow<T>, Error> {
        self.binary(BinOp::Eq)
    }

    pub fn not_equal(&mut self) -> Result<Flow<T>, Error> {
        self.binary(BinOp::Ne)
    }

    pub fn less(&mut self) -> Result<Flow<T>, Error> {
        self.binary(BinOp::Lt)
    }

    pub fn greater(&mut self) -> Result<Flow<T>, Error> {
        self.binary(BinOp::Gt)
    }

    pub fn less_eq(&mut self) -> Result<Flow<T>, Error> {
        self.binary(BinOp::Le)
    }

    pub fn greater_eq(&mut self) -> Result<Flow<T>, Error> {
        self.binary(BinOp::Ge)
    }

    pub fn logical_and(&mut self) -> Result<Flow<T>, Error> {
        self.binary(BinOp::And)
    }

    pub fn logical_or(&mut self) -> Result<Flow<T>, Error> {
        self.binary(BinOp::Or)
    }

    pub fn logical_xor(&mut self) -> Result<Flow<T>, Error> {
        self.binary(BinOp::Xor)
    }

    fn pick_by(&mut self, op: BinOp) -> Result<Flow<T>, Error> {
        let b = self.data_stack.try_pop()?;
        let a = self.data_stack.try_pop()?;
        let keep_a = self.apply_binop(a.clone(), b.clone(), op)?.is_truthy()?;
        self.data_stack.push(if keep_a { a } else { b })?;
        Ok(Flow::Continue)
    }

    pub fn min(&mut self) -> Result<Flow<T>, Error> {
        self.pick_by(BinOp::Le)
    }

    pub fn max(&mut self) -> Result<Flow<T>, Error> {
        self.pick_by(BinOp::Ge)
    }

    pub fn one_plus(&mut self) -> Result<Flow<T>, Error> {
        let a = self.data_stack.try_pop()?;
        let res = self.apply_binop(a, Value::Int(1), BinOp::Add)?;
        self.data_stack.push(res)?;
        Ok(Flow::Continue)
    }

    pub fn one_minus(&mut self) -> Result<Flow<T>, Error> {
        let a = self.data_stack.try_pop()?;
        let res = self.apply_binop(a, Value::Int(1), BinOp::Sub)?;
        self.data_stack.push(res)?;
        Ok(Flow::Continue)
    }

    pub fn negate(&mut self) -> Result<Flow<T>, Error> {
        let val = match self.data_stack.try_pop()? {
            Value::Float(f) => Value::Float(-f),
            other => Value::Int(other.as_int()?.wrapping_neg()),
        };
        self.data_stack.push(val)?;
        Ok(Flow::Continue)
    }

    pub fn abs(&mut self) -> Result<Flow<T>, Error> {
        let val = match self.data_stack.try_pop()? {
            Value::Float(f) => Value::Float(f.abs()),
            other => Value::Int(other.as_int()?.wrapping_abs()),
        };
        self.data_stack.push(val)?;
        Ok(Flow::Continue)
    }

    /// Logical not: bools flip, other flags become `true` when zero.
    pub fn not(&mut self) -> Result<Flow<T>, Error> {
        let val = match self.data_stack.try_pop()? {
            Value::Bool(b) => Value::Bool(!b),
            other => Value::Bool(!other.is_truthy()?),
        };
        self.data_stack.push(val)?;
        Ok(Flow::Continue)
    }

    /// Bitwise not.
    pub fn invert(&mut self) -> Result<Flow<T>, Error> {
        let a = self.data_stack.try_pop()?.as_int()?;
        self.data_stack.push(Value::Int(!a))?;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
pub mod test {
    use std::rc::Rc;

    use super::value_binop;
    use crate::{
        object::StrObject,
        value::{BinOp, Pointer, Value},
        word::{BodyElem, Word},
        Error,
    };

    type V = Value<()>;

    #[test]
    fn numeric_promotion() {
        assert_eq!(
            value_binop(&V::Int(7), &V::Int(2), BinOp::Div).unwrap(),
            V::Int(3)
        );
        assert_eq!(
            value_binop(&V::Int(7), &V::Float(2.0), BinOp::Div).unwrap(),
            V::Float(3.5)
        );
        assert_eq!(
            value_binop(&V::Char(b'a'), &V::Int(1), BinOp::Add).unwrap(),
            V::Int(98)
        );
        assert_eq!(
            value_binop(&V::Bool(true), &V::Int(1), BinOp::Add).unwrap(),
            V::Int(2)
        );
        assert_eq!(
            value_binop(&V::Int(i64::MAX), &V::Int(1), BinOp::Add).unwrap(),
            V::Int(i64::MIN)
        );
        assert_eq!(
            value_binop(&V::Int(3), &V::Int(4), BinOp::Lt).unwrap(),
            V::Bool(true)
        );
    }

    #[test]
    fn divide_by_zero() {
        assert_eq!(
            value_binop(&V::Int(1), &V::Int(0), BinOp::Div),
            Err(Error::DivideByZero)
        );
        assert_eq!(
            value_binop(&V::Int(1), &V::Int(0), BinOp::Mod),
            Err(Error::DivideByZero)
        );
        assert_eq!(
            value_binop(&V::Float(1.0), &V::Int(0), BinOp::Div),
            Err(Error::DivideByZero)
        );
    }

    #[test]
    fn restricted_kinds() {
        assert_eq!(
            value_binop(&V::Bool(true), &V::Bool(false), BinOp::Xor).unwrap(),
            V::Bool(true)
        );
        assert!(value_binop(&V::Bool(true), &V::Bool(false), BinOp::Lt).is_err());
        assert_eq!(
            value_binop(&V::BinOp(BinOp::Add), &V::BinOp(BinOp::Add), BinOp::Eq).unwrap(),
            V::Bool(true)
        );
        assert!(value_binop(&V::BinOp(BinOp::Add), &V::BinOp(BinOp::Add), BinOp::Add).is_err());

        let s: V = Value::Obj(Rc::new(StrObject::new("x")));
        assert_eq!(value_binop(&s, &s.clone(), BinOp::Eq).unwrap(), V::Bool(true));
        assert!(matches!(
            value_binop(&s, &V::Int(1), BinOp::Add),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn pointer_arithmetic() {
        let w = Rc::new(Word::<()>::variable("buf"));
        w.push(BodyElem::Literal(Value::Int(0))).unwrap();
        w.push(BodyElem::Literal(Value::Int(0))).unwrap();
        let p = V::Ptr(Pointer::new(w.clone(), 1));
        let q = value_binop(&p, &V::Int(2), BinOp::Add).unwrap();
        assert_eq!(value_binop(&q, &p, BinOp::Sub).unwrap(), V::Int(2));
        assert_eq!(
            value_binop(&V::Int(1), &p, BinOp::Add).unwrap(),
            V::Ptr(Pointer::new(w.clone(), 2))
        );
        assert!(value_binop(&p, &V::Int(-1), BinOp::Add).is_err());
        assert_eq!(value_binop(&p, &q, BinOp::Ne).unwrap(), V::Bool(true));
    }
}
