//! Portable expression nodes.

use crate::expression::{BinaryOperator, GotoKind, NewArrayKind, UnaryOperator};
use crate::portable::constant::PortableConstant;
use crate::portable::type_ref::{ConstructorRef, MemberRef, MethodRef, TypeRef};
use serde::{Deserialize, Serialize};

/// Declaration or reference of a bound variable.
///
/// `instance_id` is unique within one translation and is only used to tell
/// references to the same variable apart from references to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortableParameter {
    pub instance_id: u32,
    pub name: String,
    pub ty: TypeRef,
}

/// Declaration or reference of a jump target; identity as for parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortableLabel {
    pub instance_id: u32,
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortableElementInit {
    pub add_method: MethodRef,
    pub args: Vec<PortableExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortableMemberBinding {
    Assignment {
        member: MemberRef,
        expr: PortableExpr,
    },
    MemberBinding {
        member: MemberRef,
        bindings: Vec<PortableMemberBinding>,
    },
    ListBinding {
        member: MemberRef,
        initializers: Vec<PortableElementInit>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortableSwitchCase {
    pub test_values: Vec<PortableExpr>,
    pub body: PortableExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortableCatchBlock {
    pub test: TypeRef,
    pub variable: Option<PortableParameter>,
    pub filter: Option<PortableExpr>,
    pub body: PortableExpr,
}

/// Serializable expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortableExpr {
    Binary {
        op: BinaryOperator,
        left: Box<PortableExpr>,
        right: Box<PortableExpr>,
        ty: TypeRef,
        method: Option<MethodRef>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<PortableExpr>,
        ty: TypeRef,
        method: Option<MethodRef>,
    },
    Constant(PortableConstant),
    Parameter(PortableParameter),
    MemberAccess {
        target: Box<PortableExpr>,
        member: MemberRef,
        ty: TypeRef,
    },
    Call {
        target: Option<Box<PortableExpr>>,
        method: MethodRef,
        args: Vec<PortableExpr>,
    },
    New {
        constructor: ConstructorRef,
        args: Vec<PortableExpr>,
    },
    NewArray {
        kind: NewArrayKind,
        element: TypeRef,
        exprs: Vec<PortableExpr>,
    },
    ListInit {
        new: Box<PortableExpr>,
        initializers: Vec<PortableElementInit>,
    },
    MemberInit {
        new: Box<PortableExpr>,
        bindings: Vec<PortableMemberBinding>,
    },
    Lambda {
        ty: TypeRef,
        params: Vec<PortableParameter>,
        body: Box<PortableExpr>,
    },
    Invoke {
        target: Box<PortableExpr>,
        args: Vec<PortableExpr>,
    },
    Conditional {
        test: Box<PortableExpr>,
        if_true: Box<PortableExpr>,
        if_false: Box<PortableExpr>,
        ty: TypeRef,
    },
    TypeIs {
        operand: Box<PortableExpr>,
        type_operand: TypeRef,
    },
    Block {
        ty: TypeRef,
        variables: Vec<PortableParameter>,
        exprs: Vec<PortableExpr>,
    },
    Default(TypeRef),
    Label {
        target: PortableLabel,
        default: Option<Box<PortableExpr>>,
    },
    Goto {
        kind: GotoKind,
        target: PortableLabel,
        value: Option<Box<PortableExpr>>,
        ty: TypeRef,
    },
    Loop {
        body: Box<PortableExpr>,
        break_label: Option<PortableLabel>,
        continue_label: Option<PortableLabel>,
    },
    Switch {
        ty: TypeRef,
        value: Box<PortableExpr>,
        cases: Vec<PortableSwitchCase>,
        default: Option<Box<PortableExpr>>,
        comparison: Option<MethodRef>,
    },
    Try {
        ty: TypeRef,
        body: Box<PortableExpr>,
        handlers: Vec<PortableCatchBlock>,
        finally: Option<Box<PortableExpr>>,
        fault: Option<Box<PortableExpr>>,
    },
}

impl PortableExpr {
    /// Name of the node kind, as it appears on the wire
    pub fn kind_name(&self) -> &'static str {
        match self {
            PortableExpr::Binary { .. } => "Binary",
            PortableExpr::Unary { .. } => "Unary",
            PortableExpr::Constant(_) => "Constant",
            PortableExpr::Parameter(_) => "Parameter",
            PortableExpr::MemberAccess { .. } => "MemberAccess",
            PortableExpr::Call { .. } => "Call",
            PortableExpr::New { .. } => "New",
            PortableExpr::NewArray { .. } => "NewArray",
            PortableExpr::ListInit { .. } => "ListInit",
            PortableExpr::MemberInit { .. } => "MemberInit",
            PortableExpr::Lambda { .. } => "Lambda",
            PortableExpr::Invoke { .. } => "Invoke",
            PortableExpr::Conditional { .. } => "Conditional",
            PortableExpr::TypeIs { .. } => "TypeIs",
            PortableExpr::Block { .. } => "Block",
            PortableExpr::Default(_) => "Default",
            PortableExpr::Label { .. } => "Label",
            PortableExpr::Goto { .. } => "Goto",
            PortableExpr::Loop { .. } => "Loop",
            PortableExpr::Switch { .. } => "Switch",
            PortableExpr::Try { .. } => "Try",
        }
    }

    /// Direct sub-expressions, excluding trees nested inside constants
    pub fn children(&self) -> Vec<&PortableExpr> {
        let mut out: Vec<&PortableExpr> = Vec::new();
        match self {
            PortableExpr::Binary { left, right, .. } => {
                out.push(left);
                out.push(right);
            }
            PortableExpr::Unary { operand, .. } => out.push(operand),
            PortableExpr::Constant(_) | PortableExpr::Parameter(_) | PortableExpr::Default(_) => {}
            PortableExpr::MemberAccess { target, .. } => out.push(target),
            PortableExpr::Call { target, args, .. } => {
                out.extend(target.as_deref());
                out.extend(args.iter());
            }
            PortableExpr::New { args, .. } => out.extend(args.iter()),
            PortableExpr::NewArray { exprs, .. } => out.extend(exprs.iter()),
            PortableExpr::ListInit { new, initializers } => {
                out.push(new);
                for init in initializers {
                    out.extend(init.args.iter());
                }
            }
            PortableExpr::MemberInit { new, bindings } => {
                out.push(new);
                push_binding_children(bindings, &mut out);
            }
            PortableExpr::Lambda { body, .. } => out.push(body),
            PortableExpr::Invoke { target, args } => {
                out.push(target);
                out.extend(args.iter());
            }
            PortableExpr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => {
                out.push(test);
                out.push(if_true);
                out.push(if_false);
            }
            PortableExpr::TypeIs { operand, .. } => out.push(operand),
            PortableExpr::Block { exprs, .. } => out.extend(exprs.iter()),
            PortableExpr::Label { default, .. } => out.extend(default.as_deref()),
            PortableExpr::Goto { value, .. } => out.extend(value.as_deref()),
            PortableExpr::Loop { body, .. } => out.push(body),
            PortableExpr::Switch {
                value,
                cases,
                default,
                ..
            } => {
                out.push(value);
                for case in cases {
                    out.extend(case.test_values.iter());
                    out.push(&case.body);
                }
                out.extend(default.as_deref());
            }
            PortableExpr::Try {
                body,
                handlers,
                finally,
                fault,
                ..
            } => {
                out.push(body);
                for handler in handlers {
                    out.extend(handler.filter.as_ref());
                    out.push(&handler.body);
                }
                out.extend(finally.as_deref());
                out.extend(fault.as_deref());
            }
        }
        out
    }

    /// Visit this node and every descendant in pre-order
    pub fn walk(&self, f: &mut dyn FnMut(&PortableExpr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Number of nodes in the tree
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }
}

fn push_binding_children<'a>(bindings: &'a [PortableMemberBinding], out: &mut Vec<&'a PortableExpr>) {
    for binding in bindings {
        match binding {
            PortableMemberBinding::Assignment { expr, .. } => out.push(expr),
            PortableMemberBinding::MemberBinding { bindings, .. } => {
                push_binding_children(bindings, out)
            }
            PortableMemberBinding::ListBinding { initializers, .. } => {
                for init in initializers {
                    out.extend(init.args.iter());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portable::constant::{DynValue, Primitive};

    fn int(n: i32) -> PortableExpr {
        PortableExpr::Constant(PortableConstant {
            declared_type: TypeRef::named("i32"),
            concrete_type: None,
            value: DynValue::Primitive(Primitive::Int32(n)),
        })
    }

    #[test]
    fn test_walk_visits_every_node() {
        let expr = PortableExpr::Binary {
            op: BinaryOperator::Add,
            left: Box::new(int(1)),
            right: Box::new(int(2)),
            ty: TypeRef::named("i32"),
            method: None,
        };
        let mut kinds = Vec::new();
        expr.walk(&mut |node| kinds.push(node.kind_name()));
        assert_eq!(kinds, vec!["Binary", "Constant", "Constant"]);
        assert_eq!(expr.node_count(), 3);
    }

    #[test]
    fn test_externally_tagged_wire_shape() {
        let param = PortableExpr::Parameter(PortableParameter {
            instance_id: 1,
            name: "c".to_string(),
            ty: TypeRef::named("demo.Customer"),
        });
        let json = serde_json::to_value(&param).unwrap();
        assert_eq!(json["Parameter"]["instance_id"], 1);
        assert_eq!(json["Parameter"]["ty"]["name"], "demo.Customer");
    }
}
