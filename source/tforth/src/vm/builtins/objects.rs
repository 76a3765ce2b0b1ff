use std::rc::Rc;

use crate::{
    object::{string_binop, ArrayObject, ObjFunc, StrObject, UserObject},
    types::{BinOpsHandler, TypeId, TypeKind, UserTypeDef},
    value::{BinOp, Value},
    Error, Flow, Forth,
};

/// Name of the word pushing the tag of `op`, as handed to binary-ops
/// handlers.
pub fn op_word_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "op.add",
        BinOp::Sub => "op.sub",
        BinOp::Mul => "op.mul",
        BinOp::Div => "op.div",
        BinOp::Mod => "op.mod",
        BinOp::Eq => "op.eq",
        BinOp::Ne => "op.ne",
        BinOp::Lt => "op.lt",
        BinOp::Gt => "op.gt",
        BinOp::Le => "op.le",
        BinOp::Ge => "op.ge",
        BinOp::And => "op.and",
        BinOp::Or => "op.or",
        BinOp::Xor => "op.xor",
    }
}

impl<T: 'static> Forth<T> {
    /// Register the built-in object types, and define the words naming
    /// them and the binary operation tags.
    pub(crate) fn register_builtin_types(&mut self) -> Result<(), Error> {
        let string = self.types.register_object_type(
            "string",
            Self::construct_string,
            Some(BinOpsHandler::Native(Self::string_binops)),
        )?;
        debug_assert_eq!(string, TypeId::STRING);
        let array = self
            .types
            .register_object_type("array", Self::construct_array, None)?;
        debug_assert_eq!(array, TypeId::ARRAY);

        self.add_constant("string", Value::Type(string))?;
        self.add_constant("array", Value::Type(array))?;
        for op in BinOp::ALL {
            self.add_constant(op_word_name(op), Value::BinOp(op))?;
        }
        Ok(())
    }

    /// `( -- str )`
    fn construct_string(&mut self, _ty: TypeId) -> Result<(), Error> {
        self.data_stack
            .push(Value::Obj(Rc::new(StrObject::new(""))))?;
        Ok(())
    }

    /// `( n -- array )`, with `n` slots holding `0`.
    fn construct_array(&mut self, _ty: TypeId) -> Result<(), Error> {
        let n = self.data_stack.try_pop()?.as_int()?;
        let n = usize::try_from(n)
            .map_err(|_| Error::ConstructionError(format!("array of negative size {n}")))?;
        let items = (0..n).map(|_| Value::Int(0)).collect();
        self.data_stack
            .push(Value::Obj(Rc::new(ArrayObject::new(items))))?;
        Ok(())
    }

    /// `( a b op -- r )`
    fn string_binops(&mut self) -> Result<Flow<T>, Error> {
        let op = match self.data_stack.try_pop()? {
            Value::BinOp(op) => op,
            other => {
                return Err(Error::TypeMismatch(format!(
                    "expected a binop, got {}",
                    other.kind_name()
                )))
            }
        };
        let b = self.data_stack.try_pop()?;
        let a = self.data_stack.try_pop()?;
        self.data_stack.push(string_binop(&a, &b, op)?)?;
        Ok(Flow::Continue)
    }

    /// `( type -- obj )`
    pub fn new_object(&mut self) -> Result<Flow<T>, Error> {
        let ty = self.data_stack.try_pop()?.as_type()?;
        let name = self.types.name_of(ty);
        if ty.is_pointer() {
            return Err(Error::ConstructionError(format!(
                "'{name}' is a pointer type"
            )));
        }
        let entry = self
            .types
            .get(ty)
            .ok_or_else(|| Error::UnknownType(name.clone()))?;
        match &entry.kind {
            TypeKind::Value => Err(Error::ConstructionError(format!(
                "'{name}' is a value type"
            ))),
            TypeKind::Object { construct, .. } => {
                let construct = *construct;
                construct(self, ty)?;
                Ok(Flow::Continue)
            }
            TypeKind::User { def, .. } => {
                let obj = UserObject::new(ty, def.clone());
                self.data_stack.push(Value::Obj(Rc::new(obj)))?;
                Ok(Flow::Continue)
            }
        }
    }

    /// `( v -- type )`
    pub fn type_of_value(&mut self) -> Result<Flow<T>, Error> {
        let val = self.data_stack.try_pop()?;
        self.data_stack.push(Value::Type(val.type_id()))?;
        Ok(Flow::Continue)
    }

    /// Pop an object and run one of its functions on the data stack.
    fn obj_call(&mut self, func: ObjFunc) -> Result<Flow<T>, Error> {
        let val = self.data_stack.try_pop()?;
        let obj = val.as_obj()?;
        if !obj.implements(func) {
            return Err(Error::UnsupportedFunction {
                func,
                ty: self.types.name_of(obj.type_id()),
            });
        }
        obj.invoke(func, &mut self.data_stack)?;
        Ok(Flow::Continue)
    }

    pub fn obj_size(&mut self) -> Result<Flow<T>, Error> {
        self.obj_call(ObjFunc::Size)
    }

    pub fn obj_hash(&mut self) -> Result<Flow<T>, Error> {
        self.obj_call(ObjFunc::Hash)
    }

    /// `( idx obj -- v )`
    pub fn obj_get(&mut self) -> Result<Flow<T>, Error> {
        self.obj_call(ObjFunc::Get)
    }

    /// `( v idx obj -- )`
    pub fn obj_set(&mut self) -> Result<Flow<T>, Error> {
        self.obj_call(ObjFunc::Set)
    }

    pub fn obj_contains(&mut self) -> Result<Flow<T>, Error> {
        self.obj_call(ObjFunc::Contains)
    }

    pub fn obj_index_of(&mut self) -> Result<Flow<T>, Error> {
        self.obj_call(ObjFunc::IndexOf)
    }

    /// `( start len obj -- obj' )`
    pub fn obj_sub_range(&mut self) -> Result<Flow<T>, Error> {
        self.obj_call(ObjFunc::SubRange)
    }

    pub fn obj_deconstruct(&mut self) -> Result<Flow<T>, Error> {
        self.obj_call(ObjFunc::Deconstruct)
    }

    /// `( v obj -- )`
    pub fn obj_append(&mut self) -> Result<Flow<T>, Error> {
        self.obj_call(ObjFunc::Append)
    }

    /// `( idx obj -- bool )`
    pub fn obj_implements(&mut self) -> Result<Flow<T>, Error> {
        self.obj_call(ObjFunc::Implements)
    }

    /// `( v -- v n )`: how many references keep alive the object `v` refers
    /// to, directly or through pointers. `0` for plain values and for
    /// pointer chains that loop.
    pub fn refcount(&mut self) -> Result<Flow<T>, Error> {
        let n = self.data_stack.try_peek()?.live_count().unwrap_or(0);
        self.data_stack.push(Value::Int(n as i64))?;
        Ok(Flow::Continue)
    }

    /// `struct: NAME FIELD.. ;struct`
    ///
    /// Registers a user object type, and defines `NAME` (the type) and one
    /// `NAME.FIELD` word per field, pushing the field's index.
    pub fn struct_def(&mut self) -> Result<Flow<T>, Error> {
        let name = self.munch_name("struct:")?;
        let mut fields = Vec::new();
        loop {
            self.input.advance();
            match self.input.cur_word() {
                Some(";struct") => break,
                Some(field) => fields.push(field.to_string()),
                None => {
                    return Err(Error::CompileStateError(format!(
                        "struct '{name}' is missing ;struct"
                    )))
                }
            }
        }

        let ty = self.types.register_user_type(UserTypeDef {
            name: name.clone(),
            fields: fields.clone(),
        })?;
        tracing::debug!(name = name.as_str(), fields = fields.len(), "defined struct");
        self.define_constant(&name, Value::Type(ty))?;
        for (i, field) in fields.iter().enumerate() {
            self.define_constant(&format!("{name}.{field}"), Value::Int(i as i64))?;
        }
        Ok(Flow::Continue)
    }

    /// `( xt type -- )`: `xt` handles binary operations with an object of
    /// `type` on either side.
    pub fn set_binops(&mut self) -> Result<Flow<T>, Error> {
        let ty = self.data_stack.try_pop()?.as_type()?;
        let xt = self.data_stack.try_pop()?.as_xt()?.clone();
        self.types.set_binops(ty, BinOpsHandler::Word(xt))?;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
pub mod test {
    use crate::{testutil::runtest, Error, Forth, Params};

    #[test]
    fn strings() {
        runtest(
            r#"
            > s" hello" size .
            < 5 ok.
            > 1 s" hello" get emit
            < eok.
            > s" hello" hash s" hello" hash = .
            < true ok.
            > char l s" hello" index-of . s" ell" s" hello" contains .
            < 2 true ok.
            > 1 3 s" hello" sub-range type
            < ellok.
            > s" ab" s" cd" + type s"  n=" 5 + type
            < abcd n=5ok.
            > s" ab" s" ab" = . s" ab" s" b" < . s" ab" 1 = .
            < true true false ok.
            > string new dup char x swap append type
            < xok.
            x s" ab" s" ab" *
            x 9 s" ab" get
            "#,
        );
    }

    #[test]
    fn arrays() {
        runtest(
            r#"
            > 2 array new constant arr
            > 7 0 arr set 5 1 arr set 9 arr append arr .
            < [7 5 9] ok.
            > arr size . 1 arr get . 5 arr contains . 4 arr contains . 9 arr index-of .
            < 3 5 true false 2 ok.
            > 1 array new constant names s" ann" 0 names set
            > s" ann" names contains . s" bob" names contains . s" ann" names index-of .
            < true false 0 ok.
            > 0 array new names contains . names names index-of .
            < false -1 ok.
            > arr deconstruct .s
            < <4> 7 5 9 3
            < ok.
            > clear 1 2 arr sub-range . arr type-of . 5 type-of . 10 arr implements? .
            < [5 9] array int false ok.
            x 0 array new 5 swap get
            x -1 array new
            x 5 size
            "#,
        );
    }

    #[test]
    fn structs() {
        runtest(
            r#"
            > struct: point x y ;struct
            > point new constant p
            > 3 point.x p set 4 point.y p set p .
            < point{x: 3, y: 4} ok.
            > point.y p get . p size . p type-of .
            < 4 2 point ok.
            x 1 p append
            x struct: broken a b
            x struct: point z ;struct
            x 5 type-of new
            "#,
        );
    }

    #[test]
    fn binop_handlers() {
        runtest(
            r#"
            > struct: point x y ;struct
            > point new constant p 3 point.x p set
            > : point-op drop point.x swap get swap point.x swap get + ;
            > ' point-op point binops!
            > p p + .
            < 6 ok.
            > op.eq op.eq = . op.add op.sub = .
            < true false ok.
            > : bad-op 2drop drop ;
            > ' bad-op point binops!
            x p p +
            x ' dup 5 type-of binops!
            "#,
        );
    }

    #[test]
    fn refcounts() {
        runtest(
            r#"
            > s" hi" refcount . drop
            < 1 ok.
            > variable v s" x" v ! v refcount . drop v @ refcount . drop
            < 1 2 ok.
            > 1 array new constant box v @ 0 box set v @ refcount . drop
            < 3 ok.
            > 5 refcount . drop
            < 0 ok.
            > v v ! v refcount . drop v @ v = .
            < 0 true ok.
            > 0 v ! 0 box get refcount . drop
            < 2 ok.
            "#,
        );
    }

    #[test]
    fn unsupported_functions() {
        let mut forth = Forth::new(Params::default(), (), Forth::FULL_BUILTINS).unwrap();
        forth
            .input
            .fill("struct: pair a b ;struct 1 pair new append")
            .unwrap();
        let err = forth.process_line().unwrap_err();
        assert!(
            matches!(err, Error::UnsupportedFunction { ref ty, .. } if ty == "pair"),
            "{err:?}"
        );
    }
}
