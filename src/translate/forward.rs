use crate::expression::{
    CatchBlock, ElementInit, Expr, LabelTarget, MemberBinding, SwitchCase, Variable,
};
use crate::portable::{
    ConstructorRef, DynValue, MemberRef, MethodRef, PortableCatchBlock, PortableConstant,
    PortableElementInit, PortableExpr, PortableLabel, PortableMemberBinding, PortableParameter,
    PortableSwitchCase, PropertyBag, ResourceRef, TypeRef,
};
use crate::runtime::{Object, Type, Value};
use crate::translate::mapper::DynamicObjectMapper;
use crate::translate::{Result, TranslationError};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Native to portable translation.
///
/// One instance numbers parameters and labels in order of first encounter
/// and decomposes each captured object once per declared type. Use a fresh
/// instance per tree.
#[derive(Debug, Default)]
pub struct ForwardTranslator {
    parameters: Mutex<HashMap<Variable, u32>>,
    labels: Mutex<HashMap<LabelTarget, u32>>,
    bags: Mutex<HashMap<(usize, Type), Arc<PropertyBag>>>,
    mapper: DynamicObjectMapper,
}

impl ForwardTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translate(&self, expr: &Expr) -> Result<PortableExpr> {
        let portable = self.visit(expr)?;
        debug!(
            "forward translation: {} native nodes, {} portable nodes, {} parameters",
            expr.node_count(),
            portable.node_count(),
            self.parameters.lock().len()
        );
        Ok(portable)
    }

    fn visit(&self, expr: &Expr) -> Result<PortableExpr> {
        let portable = match expr {
            Expr::Binary {
                op,
                left,
                right,
                ty,
                method,
            } => PortableExpr::Binary {
                op: *op,
                left: self.boxed(left)?,
                right: self.boxed(right)?,
                ty: TypeRef::of(ty),
                method: method.as_ref().map(MethodRef::of),
            },
            Expr::Unary {
                op,
                operand,
                ty,
                method,
            } => PortableExpr::Unary {
                op: *op,
                operand: self.boxed(operand)?,
                ty: TypeRef::of(ty),
                method: method.as_ref().map(MethodRef::of),
            },
            Expr::Constant { value, ty } | Expr::Captured { value, ty } => {
                PortableExpr::Constant(self.constant(value, ty)?)
            }
            Expr::Parameter(variable) => PortableExpr::Parameter(self.parameter(variable)),
            Expr::MemberAccess { target, member } => PortableExpr::MemberAccess {
                target: self.boxed(target)?,
                member: MemberRef::of(member),
                ty: TypeRef::of(member.ty()),
            },
            Expr::Call {
                target,
                method,
                args,
            } => PortableExpr::Call {
                target: target.as_deref().map(|t| self.boxed(t)).transpose()?,
                method: MethodRef::of(method),
                args: self.visit_all(args)?,
            },
            Expr::New { constructor, args } => PortableExpr::New {
                constructor: ConstructorRef::of(constructor),
                args: self.visit_all(args)?,
            },
            Expr::NewArray {
                kind,
                element,
                exprs,
            } => {
                if *element == Type::Void {
                    return Err(TranslationError::ElementType {
                        ty: expr.ty().to_string(),
                    });
                }
                PortableExpr::NewArray {
                    kind: *kind,
                    element: TypeRef::of(element),
                    exprs: self.visit_all(exprs)?,
                }
            }
            Expr::ListInit { new, initializers } => PortableExpr::ListInit {
                new: self.boxed(new)?,
                initializers: self.element_inits(initializers)?,
            },
            Expr::MemberInit { new, bindings } => PortableExpr::MemberInit {
                new: self.boxed(new)?,
                bindings: self.member_bindings(bindings)?,
            },
            Expr::Lambda { ty, params, body } => {
                let params = params.iter().map(|p| self.parameter(p)).collect();
                PortableExpr::Lambda {
                    ty: TypeRef::of(ty),
                    params,
                    body: self.boxed(body)?,
                }
            }
            Expr::Invoke { target, args } => PortableExpr::Invoke {
                target: self.boxed(target)?,
                args: self.visit_all(args)?,
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ty,
            } => PortableExpr::Conditional {
                test: self.boxed(test)?,
                if_true: self.boxed(if_true)?,
                if_false: self.boxed(if_false)?,
                ty: TypeRef::of(ty),
            },
            Expr::TypeIs {
                operand,
                type_operand,
            } => PortableExpr::TypeIs {
                operand: self.boxed(operand)?,
                type_operand: TypeRef::of(type_operand),
            },
            Expr::Block {
                ty,
                variables,
                exprs,
            } => {
                let variables = variables.iter().map(|v| self.parameter(v)).collect();
                PortableExpr::Block {
                    ty: TypeRef::of(ty),
                    variables,
                    exprs: self.visit_all(exprs)?,
                }
            }
            Expr::Default(ty) => PortableExpr::Default(TypeRef::of(ty)),
            Expr::Label { target, default } => PortableExpr::Label {
                target: self.label(target),
                default: self.boxed_opt(default)?,
            },
            Expr::Goto {
                kind,
                target,
                value,
                ty,
            } => PortableExpr::Goto {
                kind: *kind,
                target: self.label(target),
                value: self.boxed_opt(value)?,
                ty: TypeRef::of(ty),
            },
            Expr::Loop {
                body,
                break_label,
                continue_label,
            } => {
                let break_label = break_label.as_ref().map(|l| self.label(l));
                let continue_label = continue_label.as_ref().map(|l| self.label(l));
                PortableExpr::Loop {
                    body: self.boxed(body)?,
                    break_label,
                    continue_label,
                }
            }
            Expr::Switch {
                ty,
                value,
                cases,
                default,
                comparison,
            } => PortableExpr::Switch {
                ty: TypeRef::of(ty),
                value: self.boxed(value)?,
                cases: cases
                    .iter()
                    .map(|case| self.switch_case(case))
                    .collect::<Result<_>>()?,
                default: self.boxed_opt(default)?,
                comparison: comparison.as_ref().map(MethodRef::of),
            },
            Expr::Try {
                ty,
                body,
                handlers,
                finally,
                fault,
            } => PortableExpr::Try {
                ty: TypeRef::of(ty),
                body: self.boxed(body)?,
                handlers: handlers
                    .iter()
                    .map(|handler| self.catch_block(handler))
                    .collect::<Result<_>>()?,
                finally: self.boxed_opt(finally)?,
                fault: self.boxed_opt(fault)?,
            },
            Expr::Extension(extension) => match extension.0.reduce() {
                Some(reduced) => self.visit(&reduced)?,
                None => {
                    return Err(TranslationError::UnsupportedExpression {
                        kind: format!("extension {}", extension.0.name()),
                    })
                }
            },
        };
        Ok(portable)
    }

    fn boxed(&self, expr: &Expr) -> Result<Box<PortableExpr>> {
        self.visit(expr).map(Box::new)
    }

    fn boxed_opt(&self, expr: &Option<Box<Expr>>) -> Result<Option<Box<PortableExpr>>> {
        expr.as_deref().map(|e| self.boxed(e)).transpose()
    }

    fn visit_all(&self, exprs: &[Expr]) -> Result<Vec<PortableExpr>> {
        exprs.iter().map(|e| self.visit(e)).collect()
    }

    fn parameter(&self, variable: &Variable) -> PortableParameter {
        let mut ids = self.parameters.lock();
        let next = ids.len() as u32 + 1;
        let instance_id = *ids.entry(variable.clone()).or_insert(next);
        PortableParameter {
            instance_id,
            name: variable.name().to_string(),
            ty: TypeRef::of(variable.ty()),
        }
    }

    fn label(&self, target: &LabelTarget) -> PortableLabel {
        let mut ids = self.labels.lock();
        let next = ids.len() as u32 + 1;
        let instance_id = *ids.entry(target.clone()).or_insert(next);
        PortableLabel {
            instance_id,
            name: target.name().to_string(),
            ty: TypeRef::of(target.ty()),
        }
    }

    fn element_inits(&self, inits: &[ElementInit]) -> Result<Vec<PortableElementInit>> {
        inits
            .iter()
            .map(|init| {
                Ok(PortableElementInit {
                    add_method: MethodRef::of(&init.add_method),
                    args: self.visit_all(&init.args)?,
                })
            })
            .collect()
    }

    fn member_bindings(&self, bindings: &[MemberBinding]) -> Result<Vec<PortableMemberBinding>> {
        bindings
            .iter()
            .map(|binding| {
                Ok(match binding {
                    MemberBinding::Assignment { member, expr } => PortableMemberBinding::Assignment {
                        member: MemberRef::of(member),
                        expr: self.visit(expr)?,
                    },
                    MemberBinding::Member { member, bindings } => {
                        PortableMemberBinding::MemberBinding {
                            member: MemberRef::of(member),
                            bindings: self.member_bindings(bindings)?,
                        }
                    }
                    MemberBinding::List {
                        member,
                        initializers,
                    } => PortableMemberBinding::ListBinding {
                        member: MemberRef::of(member),
                        initializers: self.element_inits(initializers)?,
                    },
                })
            })
            .collect()
    }

    fn switch_case(&self, case: &SwitchCase) -> Result<PortableSwitchCase> {
        Ok(PortableSwitchCase {
            test_values: self.visit_all(&case.test_values)?,
            body: self.visit(&case.body)?,
        })
    }

    fn catch_block(&self, handler: &CatchBlock) -> Result<PortableCatchBlock> {
        let variable = handler.variable.as_ref().map(|v| self.parameter(v));
        Ok(PortableCatchBlock {
            test: TypeRef::of(&handler.test),
            variable,
            filter: handler.filter.as_ref().map(|f| self.visit(f)).transpose()?,
            body: self.visit(&handler.body)?,
        })
    }

    fn constant(&self, value: &Value, declared: &Type) -> Result<PortableConstant> {
        let runtime = value.runtime_type();
        let concrete_type = if value.is_null() || runtime == *declared {
            None
        } else {
            Some(TypeRef::of(&runtime))
        };
        Ok(PortableConstant {
            declared_type: TypeRef::of(declared),
            concrete_type,
            value: self.dyn_value(value, declared)?,
        })
    }

    fn dyn_value(&self, value: &Value, declared: &Type) -> Result<DynValue> {
        if let Some(primitive) = self.mapper.primitive(value) {
            return Ok(DynValue::Primitive(primitive));
        }
        match value {
            Value::Null => Ok(DynValue::Null),
            Value::Type(ty) => Ok(DynValue::Type(TypeRef::of(ty))),
            Value::Resource(resource) => Ok(DynValue::Resource(ResourceRef {
                name: resource.name.clone(),
                element: TypeRef::of(&resource.element),
            })),
            Value::Expression(tree) => Ok(DynValue::Expression(self.boxed(tree)?)),
            Value::Sequence(seq) => self.dyn_list(seq.items(), seq.element()),
            Value::Deferred(deferred) => self.dyn_list(&deferred.materialize()?, deferred.element()),
            Value::Object(object) => Ok(DynValue::Bag(self.bag(object, declared)?)),
            other => Err(TranslationError::UnsupportedValue {
                ty: other.runtime_type().to_string(),
                reason: "delegates have no portable form".to_string(),
            }),
        }
    }

    fn dyn_list(&self, items: &[Value], element: &Type) -> Result<DynValue> {
        items
            .iter()
            .map(|item| self.dyn_value(item, element))
            .collect::<Result<_>>()
            .map(DynValue::List)
    }

    fn bag(&self, object: &Arc<Object>, declared: &Type) -> Result<Arc<PropertyBag>> {
        let key = (Arc::as_ptr(object) as usize, declared.clone());
        if let Some(bag) = self.bags.lock().get(&key) {
            return Ok(bag.clone());
        }
        let bag = self
            .mapper
            .decompose_with(object, &mut |v, ty| self.dyn_value(v, ty))
            .map(Arc::new)?;
        self.bags.lock().insert(key, bag.clone());
        Ok(bag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ExtensionNode;
    use crate::portable::Primitive;
    use crate::runtime::{ClassInfo, FieldInfo, Function};

    fn int(n: i32) -> Expr {
        Expr::constant(Value::Int32(n))
    }

    #[test]
    fn test_parameter_ids_follow_identity() {
        let x = Variable::new("x", Type::Int32);
        let shadow = Variable::new("x", Type::Int32);
        let expr = Expr::lambda(
            vec![x.clone(), shadow.clone()],
            Expr::add(Expr::parameter(&x), Expr::parameter(&shadow)),
        );
        let portable = ForwardTranslator::new().translate(&expr).unwrap();
        let PortableExpr::Lambda { params, body, .. } = portable else {
            panic!("expected a lambda");
        };
        assert_eq!(params[0].instance_id, 1);
        assert_eq!(params[1].instance_id, 2);
        let PortableExpr::Binary { left, right, .. } = *body else {
            panic!("expected a binary node");
        };
        assert_eq!(*left, PortableExpr::Parameter(params[0].clone()));
        assert_eq!(*right, PortableExpr::Parameter(params[1].clone()));
    }

    #[test]
    fn test_captured_becomes_constant_with_concrete_type() {
        let expr = Expr::Captured {
            value: Value::Int64(5),
            ty: Type::Object,
        };
        let portable = ForwardTranslator::new().translate(&expr).unwrap();
        assert_eq!(
            portable,
            PortableExpr::Constant(PortableConstant {
                declared_type: TypeRef::named("object"),
                concrete_type: Some(TypeRef::named("i64")),
                value: DynValue::Primitive(Primitive::Int64(5)),
            })
        );
    }

    #[test]
    fn test_objects_decompose_once() {
        let point = ClassInfo::new(
            "demo.Point",
            vec![FieldInfo::new("x", Type::Int32), FieldInfo::new("y", Type::Int32)],
        );
        let object = Value::object(
            Object::with_fields(point.clone(), [("x", Value::Int32(1)), ("y", Value::Int32(2))])
                .unwrap(),
        );
        let shared = Expr::constant(object);
        let expr = Expr::new_array(Type::Class(point), vec![shared.clone(), shared]);
        let portable = ForwardTranslator::new().translate(&expr).unwrap();

        let PortableExpr::NewArray { exprs, .. } = portable else {
            panic!("expected an array");
        };
        let bags: Vec<Arc<PropertyBag>> = exprs
            .iter()
            .map(|e| match e {
                PortableExpr::Constant(PortableConstant {
                    value: DynValue::Bag(bag),
                    ..
                }) => bag.clone(),
                other => panic!("expected a bag constant, got {:?}", other),
            })
            .collect();
        assert!(Arc::ptr_eq(&bags[0], &bags[1]));
        assert_eq!(bags[0].get("y"), Some(&DynValue::Primitive(Primitive::Int32(2))));
    }

    #[test]
    fn test_nested_expression_values_are_translated() {
        let p = Variable::new("p", Type::Int32);
        let tree = Expr::lambda(vec![p.clone()], Expr::parameter(&p));
        let expr = Expr::constant(Value::Expression(Arc::new(tree)));
        let portable = ForwardTranslator::new().translate(&expr).unwrap();
        match portable {
            PortableExpr::Constant(PortableConstant {
                value: DynValue::Expression(inner),
                ..
            }) => assert_eq!(inner.kind_name(), "Lambda"),
            other => panic!("expected a nested tree, got {:?}", other),
        }
    }

    #[test]
    fn test_delegate_constants_are_rejected() {
        let f = Function::new(Type::function(vec![], Type::Int32), |_| Ok(Value::Int32(1)));
        let err = ForwardTranslator::new()
            .translate(&Expr::constant(Value::Function(f)))
            .unwrap_err();
        assert!(matches!(err, TranslationError::UnsupportedValue { .. }));
    }

    #[derive(Debug)]
    struct Twice(i32);

    impl ExtensionNode for Twice {
        fn name(&self) -> &str {
            "Twice"
        }

        fn ty(&self) -> Type {
            Type::Int32
        }

        fn reduce(&self) -> Option<Expr> {
            Some(Expr::add(int(self.0), int(self.0)))
        }
    }

    #[derive(Debug)]
    struct Opaque;

    impl ExtensionNode for Opaque {
        fn name(&self) -> &str {
            "Opaque"
        }

        fn ty(&self) -> Type {
            Type::Int32
        }
    }

    #[test]
    fn test_extensions_reduce_or_fail() {
        let translator = ForwardTranslator::new();
        let reduced = translator
            .translate(&Expr::extension(Arc::new(Twice(4))))
            .unwrap();
        assert_eq!(reduced.kind_name(), "Binary");

        let err = translator
            .translate(&Expr::extension(Arc::new(Opaque)))
            .unwrap_err();
        assert_eq!(
            err,
            TranslationError::UnsupportedExpression {
                kind: "extension Opaque".to_string()
            }
        );
    }

    #[test]
    fn test_void_array_has_no_element_type() {
        let expr = Expr::NewArray {
            kind: crate::expression::NewArrayKind::Init,
            element: Type::Void,
            exprs: vec![],
        };
        let err = ForwardTranslator::new().translate(&expr).unwrap_err();
        assert!(matches!(err, TranslationError::ElementType { .. }));
    }
}
