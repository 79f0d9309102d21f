//! Metadata filter compiler.
//!
//! Filters are declared as a small JSON-like tree of leaf operators
//! (`$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists`,
//! `$regex`) and logical composers (`$and`, `$or`, `$not`). [`Filter::compile`]
//! walks the tree once and produces a boxed closure closed over any
//! precompiled state (currently: `$regex` patterns), so that repeated
//! evaluation against many candidate records during a scan does not re-parse
//! anything.

mod matching;

use crate::error::{Error, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

type Evaluator = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;

/// A compiled metadata filter. Cheap to clone; evaluation is lock-free.
#[derive(Clone)]
pub struct Filter {
    eval: Evaluator,
}

impl Filter {
    /// Compiles a declarative filter tree into an
    /// evaluator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] for an unknown operator or a
    /// malformed leaf (e.g. `$regex` with a non-string pattern, or an
    /// unparseable regex).
    pub fn compile(spec: &Value) -> Result<Self> {
        let node = compile_node(spec)?;
        Ok(Self {
            eval: Arc::new(move |metadata| node.eval(metadata)),
        })
    }

    /// Evaluates the compiled filter against a record's metadata.
    #[must_use]
    pub fn matches(&self, metadata: Option<&Value>) -> bool {
        (self.eval)(metadata)
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter").finish_non_exhaustive()
    }
}

/// An internal compiled node. Kept separate from the public `Filter` so that
/// `$and`/`$or`/`$not` can recurse without re-boxing at every level.
enum Node {
    Leaf {
        field: String,
        op: LeafOp,
    },
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

enum LeafOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
}

impl Node {
    fn eval(&self, metadata: Option<&Value>) -> bool {
        match self {
            Self::Leaf { field, op } => {
                let value = metadata.and_then(|m| crate::metadata::get_path(m, field));
                matching::eval_leaf(op, value)
            }
            Self::And(nodes) => nodes.iter().all(|n| n.eval(metadata)),
            Self::Or(nodes) => nodes.iter().any(|n| n.eval(metadata)),
            Self::Not(node) => !node.eval(metadata),
        }
    }
}

fn compile_node(spec: &Value) -> Result<Node> {
    let obj = spec
        .as_object()
        .ok_or_else(|| Error::InvalidFormat("filter node must be an object".into()))?;

    if let Some(conds) = obj.get("$and") {
        return Ok(Node::And(compile_list(conds)?));
    }
    if let Some(conds) = obj.get("$or") {
        return Ok(Node::Or(compile_list(conds)?));
    }
    if let Some(cond) = obj.get("$not") {
        return Ok(Node::Not(Box::new(compile_node(cond)?)));
    }

    // Otherwise every key is a field name whose value is either a leaf
    // operator object (e.g. {"value": {"$gte": 2}}) or a bare value, which is
    // sugar for {"$eq": value}.
    let mut leaves = Vec::with_capacity(obj.len());
    for (field, value) in obj {
        leaves.push(compile_field(field, value)?);
    }
    Ok(match leaves.len() {
        1 => leaves.into_iter().next().unwrap(),
        _ => Node::And(leaves),
    })
}

fn compile_list(spec: &Value) -> Result<Vec<Node>> {
    spec.as_array()
        .ok_or_else(|| Error::InvalidFormat("$and/$or expects an array".into()))?
        .iter()
        .map(compile_node)
        .collect()
}

fn compile_field(field: &str, value: &Value) -> Result<Node> {
    let op = if let Some(ops) = value.as_object() {
        if ops.keys().any(|k| k.starts_with('$')) {
            let (op_name, op_value) = ops
                .iter()
                .next()
                .ok_or_else(|| Error::InvalidFormat(format!("empty operator object for '{field}'")))?;
            compile_op(op_name, op_value)?
        } else {
            LeafOp::Eq(value.clone())
        }
    } else {
        LeafOp::Eq(value.clone())
    };

    Ok(Node::Leaf {
        field: field.to_string(),
        op,
    })
}

fn compile_op(op_name: &str, op_value: &Value) -> Result<LeafOp> {
    Ok(match op_name {
        "$eq" => LeafOp::Eq(op_value.clone()),
        "$ne" => LeafOp::Ne(op_value.clone()),
        "$gt" => LeafOp::Gt(op_value.clone()),
        "$gte" => LeafOp::Gte(op_value.clone()),
        "$lt" => LeafOp::Lt(op_value.clone()),
        "$lte" => LeafOp::Lte(op_value.clone()),
        "$in" => LeafOp::In(as_array(op_value, "$in")?),
        "$nin" => LeafOp::Nin(as_array(op_value, "$nin")?),
        "$exists" => LeafOp::Exists(op_value.as_bool().unwrap_or(true)),
        "$regex" => {
            let pattern = op_value
                .as_str()
                .ok_or_else(|| Error::InvalidFormat("$regex expects a string pattern".into()))?;
            let regex = Regex::new(pattern)
                .map_err(|e| Error::InvalidFormat(format!("invalid $regex pattern: {e}")))?;
            LeafOp::Regex(regex)
        }
        other => {
            return Err(Error::InvalidFormat(format!(
                "unknown filter operator '{other}'"
            )))
        }
    })
}

fn as_array(value: &Value, op: &str) -> Result<Vec<Value>> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| Error::InvalidFormat(format!("{op} expects an array")))
}
