use crate::expression::{
    CatchBlock, ElementInit, Expr, LabelTarget, MemberBinding, SwitchCase, Variable,
};
use crate::portable::{
    PortableCatchBlock, PortableConstant, PortableElementInit, PortableExpr, PortableLabel,
    PortableMemberBinding, PortableParameter, PortableSwitchCase, TypeRef,
};
use crate::runtime::{Type, Value};
use crate::translate::mapper::DynamicObjectMapper;
use crate::translate::resolver::TypeResolver;
use crate::translate::Result;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Portable to native translation.
///
/// Parameters and labels are rebuilt once per instance id, so every
/// reference to an id yields the same native variable. Use a fresh instance
/// per tree.
pub struct ReverseTranslator<'a> {
    resolver: &'a dyn TypeResolver,
    parameters: Mutex<HashMap<u32, Variable>>,
    labels: Mutex<HashMap<u32, LabelTarget>>,
    mapper: DynamicObjectMapper,
}

impl<'a> ReverseTranslator<'a> {
    pub fn new(resolver: &'a dyn TypeResolver) -> Self {
        Self {
            resolver,
            parameters: Mutex::new(HashMap::new()),
            labels: Mutex::new(HashMap::new()),
            mapper: DynamicObjectMapper::new(),
        }
    }

    pub fn translate(&self, expr: &PortableExpr) -> Result<Expr> {
        let native = self.visit(expr)?;
        debug!(
            "reverse translation: {} portable nodes, {} native nodes",
            expr.node_count(),
            native.node_count()
        );
        Ok(native)
    }

    fn visit(&self, expr: &PortableExpr) -> Result<Expr> {
        let native = match expr {
            PortableExpr::Binary {
                op,
                left,
                right,
                ty,
                method,
            } => Expr::Binary {
                op: *op,
                left: self.boxed(left)?,
                right: self.boxed(right)?,
                ty: self.ty(ty)?,
                method: method
                    .as_ref()
                    .map(|m| self.resolver.resolve_method(m))
                    .transpose()?,
            },
            PortableExpr::Unary {
                op,
                operand,
                ty,
                method,
            } => Expr::Unary {
                op: *op,
                operand: self.boxed(operand)?,
                ty: self.ty(ty)?,
                method: method
                    .as_ref()
                    .map(|m| self.resolver.resolve_method(m))
                    .transpose()?,
            },
            PortableExpr::Constant(constant) => self.constant(constant)?,
            PortableExpr::Parameter(p) => Expr::Parameter(self.parameter(p)?),
            PortableExpr::MemberAccess { target, member, .. } => Expr::MemberAccess {
                target: self.boxed(target)?,
                member: self.resolver.resolve_member(member)?,
            },
            PortableExpr::Call {
                target,
                method,
                args,
            } => Expr::Call {
                target: target.as_deref().map(|t| self.boxed(t)).transpose()?,
                method: self.resolver.resolve_method(method)?,
                args: self.visit_all(args)?,
            },
            PortableExpr::New { constructor, args } => Expr::New {
                constructor: self.resolver.resolve_constructor(constructor)?,
                args: self.visit_all(args)?,
            },
            PortableExpr::NewArray {
                kind,
                element,
                exprs,
            } => Expr::NewArray {
                kind: *kind,
                element: self.ty(element)?,
                exprs: self.visit_all(exprs)?,
            },
            PortableExpr::ListInit { new, initializers } => Expr::ListInit {
                new: self.boxed(new)?,
                initializers: self.element_inits(initializers)?,
            },
            PortableExpr::MemberInit { new, bindings } => Expr::MemberInit {
                new: self.boxed(new)?,
                bindings: self.member_bindings(bindings)?,
            },
            PortableExpr::Lambda { ty, params, body } => {
                let params = params
                    .iter()
                    .map(|p| self.parameter(p))
                    .collect::<Result<Vec<_>>>()?;
                Expr::Lambda {
                    ty: self.ty(ty)?,
                    params,
                    body: Arc::new(self.visit(body)?),
                }
            }
            PortableExpr::Invoke { target, args } => Expr::Invoke {
                target: self.boxed(target)?,
                args: self.visit_all(args)?,
            },
            PortableExpr::Conditional {
                test,
                if_true,
                if_false,
                ty,
            } => {
                let ty = self.ty(ty)?;
                match if_false.as_ref() {
                    PortableExpr::Default(d) if ty == Type::Void && self.ty(d)? == Type::Void => {
                        Expr::if_then(self.visit(test)?, self.visit(if_true)?)
                    }
                    _ => Expr::Conditional {
                        test: self.boxed(test)?,
                        if_true: self.boxed(if_true)?,
                        if_false: self.boxed(if_false)?,
                        ty,
                    },
                }
            }
            PortableExpr::TypeIs {
                operand,
                type_operand,
            } => Expr::TypeIs {
                operand: self.boxed(operand)?,
                type_operand: self.ty(type_operand)?,
            },
            PortableExpr::Block {
                ty,
                variables,
                exprs,
            } => {
                let variables = variables
                    .iter()
                    .map(|v| self.parameter(v))
                    .collect::<Result<Vec<_>>>()?;
                Expr::Block {
                    ty: self.ty(ty)?,
                    variables,
                    exprs: self.visit_all(exprs)?,
                }
            }
            PortableExpr::Default(ty) => Expr::Default(self.ty(ty)?),
            PortableExpr::Label { target, default } => Expr::Label {
                target: self.label(target)?,
                default: self.boxed_opt(default)?,
            },
            PortableExpr::Goto {
                kind,
                target,
                value,
                ty,
            } => Expr::Goto {
                kind: *kind,
                target: self.label(target)?,
                value: self.boxed_opt(value)?,
                ty: self.ty(ty)?,
            },
            PortableExpr::Loop {
                body,
                break_label,
                continue_label,
            } => {
                let break_label = break_label.as_ref().map(|l| self.label(l)).transpose()?;
                let continue_label = continue_label.as_ref().map(|l| self.label(l)).transpose()?;
                Expr::Loop {
                    body: self.boxed(body)?,
                    break_label,
                    continue_label,
                }
            }
            PortableExpr::Switch {
                ty,
                value,
                cases,
                default,
                comparison,
            } => Expr::Switch {
                ty: self.ty(ty)?,
                value: self.boxed(value)?,
                cases: cases
                    .iter()
                    .map(|case| self.switch_case(case))
                    .collect::<Result<_>>()?,
                default: self.boxed_opt(default)?,
                comparison: comparison
                    .as_ref()
                    .map(|m| self.resolver.resolve_method(m))
                    .transpose()?,
            },
            PortableExpr::Try {
                ty,
                body,
                handlers,
                finally,
                fault,
            } => Expr::Try {
                ty: self.ty(ty)?,
                body: self.boxed(body)?,
                handlers: handlers
                    .iter()
                    .map(|handler| self.catch_block(handler))
                    .collect::<Result<_>>()?,
                finally: self.boxed_opt(finally)?,
                fault: self.boxed_opt(fault)?,
            },
        };
        Ok(native)
    }

    fn ty(&self, reference: &TypeRef) -> Result<Type> {
        self.resolver.resolve_type(reference)
    }

    fn boxed(&self, expr: &PortableExpr) -> Result<Box<Expr>> {
        self.visit(expr).map(Box::new)
    }

    fn boxed_opt(&self, expr: &Option<Box<PortableExpr>>) -> Result<Option<Box<Expr>>> {
        expr.as_deref().map(|e| self.boxed(e)).transpose()
    }

    fn visit_all(&self, exprs: &[PortableExpr]) -> Result<Vec<Expr>> {
        exprs.iter().map(|e| self.visit(e)).collect()
    }

    fn parameter(&self, parameter: &PortableParameter) -> Result<Variable> {
        if let Some(variable) = self.parameters.lock().get(&parameter.instance_id) {
            return Ok(variable.clone());
        }
        let variable = Variable::new(parameter.name.clone(), self.ty(&parameter.ty)?);
        Ok(self
            .parameters
            .lock()
            .entry(parameter.instance_id)
            .or_insert(variable)
            .clone())
    }

    fn label(&self, label: &PortableLabel) -> Result<LabelTarget> {
        if let Some(target) = self.labels.lock().get(&label.instance_id) {
            return Ok(target.clone());
        }
        let target = LabelTarget::new(label.name.clone(), self.ty(&label.ty)?);
        Ok(self
            .labels
            .lock()
            .entry(label.instance_id)
            .or_insert(target)
            .clone())
    }

    fn element_inits(&self, inits: &[PortableElementInit]) -> Result<Vec<ElementInit>> {
        inits
            .iter()
            .map(|init| {
                Ok(ElementInit {
                    add_method: self.resolver.resolve_method(&init.add_method)?,
                    args: self.visit_all(&init.args)?,
                })
            })
            .collect()
    }

    fn member_bindings(&self, bindings: &[PortableMemberBinding]) -> Result<Vec<MemberBinding>> {
        bindings
            .iter()
            .map(|binding| {
                Ok(match binding {
                    PortableMemberBinding::Assignment { member, expr } => MemberBinding::Assignment {
                        member: self.resolver.resolve_member(member)?,
                        expr: self.visit(expr)?,
                    },
                    PortableMemberBinding::MemberBinding { member, bindings } => {
                        MemberBinding::Member {
                            member: self.resolver.resolve_member(member)?,
                            bindings: self.member_bindings(bindings)?,
                        }
                    }
                    PortableMemberBinding::ListBinding {
                        member,
                        initializers,
                    } => MemberBinding::List {
                        member: self.resolver.resolve_member(member)?,
                        initializers: self.element_inits(initializers)?,
                    },
                })
            })
            .collect()
    }

    fn switch_case(&self, case: &PortableSwitchCase) -> Result<SwitchCase> {
        Ok(SwitchCase {
            test_values: self.visit_all(&case.test_values)?,
            body: self.visit(&case.body)?,
        })
    }

    fn catch_block(&self, handler: &PortableCatchBlock) -> Result<CatchBlock> {
        let variable = handler
            .variable
            .as_ref()
            .map(|v| self.parameter(v))
            .transpose()?;
        Ok(CatchBlock {
            test: self.ty(&handler.test)?,
            variable,
            filter: handler.filter.as_ref().map(|f| self.visit(f)).transpose()?,
            body: self.visit(&handler.body)?,
        })
    }

    /// Values are rebuilt as their concrete type when one was recorded,
    /// while the node keeps the declared type
    fn constant(&self, constant: &PortableConstant) -> Result<Expr> {
        let declared = self.ty(&constant.declared_type)?;
        let target = match &constant.concrete_type {
            Some(concrete) => self.ty(concrete)?,
            None => declared.clone(),
        };
        let value = self.mapper.from_dyn_with(
            &constant.value,
            &target,
            self.resolver,
            &mut |nested| {
                self.visit(nested)
                    .map(|tree| Value::Expression(Arc::new(tree)))
            },
        )?;
        Ok(Expr::Constant {
            value,
            ty: declared,
        })
    }
}
