use crate::{value::Value, Error, Flow, Forth};
use core::fmt::Write;

impl<T: 'static> Forth<T> {
    fn float_unary(&mut self, f: fn(f64) -> f64) -> Result<Flow<T>, Error> {
        let a = self.data_stack.try_pop()?.as_float()?;
        self.data_stack.push(Value::Float(f(a)))?;
        Ok(Flow::Continue)
    }

    pub fn to_float(&mut self) -> Result<Flow<T>, Error> {
        self.float_unary(|a| a)
    }

    /// Truncates toward zero. Out of range floats saturate.
    pub fn to_int(&mut self) -> Result<Flow<T>, Error> {
        let a = self.data_stack.try_pop()?;
        let i = match a {
            Value::Float(f) => f as i64,
            other => other.as_int()?,
        };
        self.data_stack.push(Value::Int(i))?;
        Ok(Flow::Continue)
    }

    pub fn float_sqrt(&mut self) -> Result<Flow<T>, Error> {
        self.float_unary(f64::sqrt)
    }

    pub fn float_floor(&mut self) -> Result<Flow<T>, Error> {
        self.float_unary(f64::floor)
    }

    pub fn float_ceil(&mut self) -> Result<Flow<T>, Error> {
        self.float_unary(f64::ceil)
    }

    pub fn float_round(&mut self) -> Result<Flow<T>, Error> {
        self.float_unary(f64::round)
    }

    pub fn float_pop_print(&mut self) -> Result<Flow<T>, Error> {
        let a = self.data_stack.try_pop()?.as_float()?;
        write!(&mut self.output, "{} ", Value::<T>::Float(a))?;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
pub mod test {
    use crate::testutil::runtest;

    #[test]
    fn floats() {
        runtest(
            r#"
            > 3 >float f. 2.5 f. 7 2 / f.
            < 3.0 2.5 3.0 ok.
            > 16 sqrt . 2.5 floor . 2.5 ceil . 2.5 round . -2.7 >int .
            < 4.0 2.0 3.0 3.0 -2 ok.
            > 1.5 2 + . 1 2.0 * . 7.0 2 / .
            < 3.5 2.0 3.5 ok.
            x s" 4" sqrt
            x s" 1.0" >float
            "#,
        );
    }
}
