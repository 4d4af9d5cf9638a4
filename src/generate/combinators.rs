//! Generator combinators for composite shapes.
//!
//! Each combinator wraps child generators behind `Arc<dyn ValueGenerator>`
//! and records its own decision as an interior tree node. Recursion-guard
//! behaviour lives here: at the depth limit an `Optional` draws none and a
//! `OneOf` takes its most-default (lowest-index) variant.

use std::sync::Arc;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::generate::Draw;
use crate::generate::DrawTree;
use crate::generate::GenContext;
use crate::generate::GenError;
use crate::generate::ValueGenerator;
use crate::value::Value;

/// 50/50 none-or-value; shrinks toward none.
pub struct OptionalGen {
    inner: Arc<dyn ValueGenerator>,
}

impl OptionalGen {
    pub fn new(inner: Arc<dyn ValueGenerator>) -> Self {
        Self { inner }
    }
}

impl ValueGenerator for OptionalGen {
    fn draw(&self, rng: &mut ChaCha8Rng, cx: GenContext) -> Result<Draw, GenError> {
        if cx.at_limit() || !rng.gen_bool(0.5) {
            return Ok(Draw { value: Value::Null, tree: DrawTree::Maybe { child: None } });
        }
        let inner = self.inner.draw(rng, cx)?;
        Ok(Draw {
            value: inner.value,
            tree: DrawTree::Maybe { child: Some(Box::new(inner.tree)) },
        })
    }

    fn replay(&self, tree: &DrawTree, cx: GenContext) -> Result<Value, GenError> {
        match tree {
            DrawTree::Maybe { child: None } => Ok(Value::Null),
            DrawTree::Maybe { child: Some(child) } => self.inner.replay(child, cx),
            other => Err(GenError::mismatch("maybe", other)),
        }
    }
}

/// Length-bounded sequences; shrink by element removal, then element-wise.
pub struct SeqGen {
    item: Arc<dyn ValueGenerator>,
    min: usize,
    max: usize,
}

impl SeqGen {
    pub fn new(item: Arc<dyn ValueGenerator>, min: usize, max: usize) -> Self {
        Self { item, min, max: max.max(min) }
    }
}

impl ValueGenerator for SeqGen {
    fn draw(&self, rng: &mut ChaCha8Rng, cx: GenContext) -> Result<Draw, GenError> {
        let len = rng.gen_range(self.min..=self.max);
        let mut values = Vec::with_capacity(len);
        let mut children = Vec::with_capacity(len);
        for _ in 0..len {
            let item = self.item.draw(rng, cx)?;
            values.push(item.value);
            children.push(item.tree);
        }
        Ok(Draw {
            value: Value::Seq(values),
            tree: DrawTree::Seq { min: self.min, children },
        })
    }

    fn replay(&self, tree: &DrawTree, cx: GenContext) -> Result<Value, GenError> {
        let children = match tree {
            DrawTree::Seq { children, .. } => children,
            other => return Err(GenError::mismatch("seq", other)),
        };
        if children.len() < self.min || children.len() > self.max {
            return Err(GenError::TreeMismatch {
                expected: "seq length within bounds",
                found: format!("length {}", children.len()),
            });
        }
        let mut values = Vec::with_capacity(children.len());
        for child in children {
            values.push(self.item.replay(child, cx)?);
        }
        Ok(Value::Seq(values))
    }
}

/// Maps drawn as sequences of (key, value) pairs, deduplicated on the
/// rendered key; the first occurrence of a key wins.
pub struct MapGen {
    key: Arc<dyn ValueGenerator>,
    value: Arc<dyn ValueGenerator>,
    min: usize,
    max: usize,
}

impl MapGen {
    pub fn new(
        key: Arc<dyn ValueGenerator>,
        value: Arc<dyn ValueGenerator>,
        min: usize,
        max: usize,
    ) -> Self {
        Self { key, value, min, max: max.max(min) }
    }

    fn dedup(pairs: Vec<(Value, Value)>) -> Vec<(Value, Value)> {
        let mut seen: Vec<String> = Vec::with_capacity(pairs.len());
        let mut out = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            let rendered = k.render_plain();
            if seen.contains(&rendered) {
                continue;
            }
            seen.push(rendered);
            out.push((k, v));
        }
        out
    }
}

impl ValueGenerator for MapGen {
    fn draw(&self, rng: &mut ChaCha8Rng, cx: GenContext) -> Result<Draw, GenError> {
        let len = rng.gen_range(self.min..=self.max);
        let mut pairs = Vec::with_capacity(len);
        let mut children = Vec::with_capacity(len);
        for _ in 0..len {
            let k = self.key.draw(rng, cx)?;
            let v = self.value.draw(rng, cx)?;
            pairs.push((k.value, v.value));
            children.push(DrawTree::Product { children: vec![k.tree, v.tree] });
        }
        Ok(Draw {
            value: Value::Map(Self::dedup(pairs)),
            tree: DrawTree::Seq { min: self.min, children },
        })
    }

    fn replay(&self, tree: &DrawTree, cx: GenContext) -> Result<Value, GenError> {
        let children = match tree {
            DrawTree::Seq { children, .. } => children,
            other => return Err(GenError::mismatch("seq of map entries", other)),
        };
        if children.len() < self.min || children.len() > self.max {
            return Err(GenError::TreeMismatch {
                expected: "map entry count within bounds",
                found: format!("length {}", children.len()),
            });
        }
        let mut pairs = Vec::with_capacity(children.len());
        for child in children {
            let entry = match child {
                DrawTree::Product { children } if children.len() == 2 => children,
                other => return Err(GenError::mismatch("map entry pair", other)),
            };
            let k = self.key.replay(&entry[0], cx)?;
            let v = self.value.replay(&entry[1], cx)?;
            pairs.push((k, v));
        }
        Ok(Value::Map(Self::dedup(pairs)))
    }
}

/// Field-wise record generation in declaration order.
///
/// Required fields draw directly; optional fields wrap in an
/// include/exclude decision and are omitted from the record when absent.
pub struct RecordGen {
    fields: Vec<RecordField>,
}

pub struct RecordField {
    pub name: String,
    pub generator: Arc<dyn ValueGenerator>,
    pub required: bool,
}

impl RecordGen {
    pub fn new(fields: Vec<RecordField>) -> Self {
        Self { fields }
    }
}

impl ValueGenerator for RecordGen {
    fn draw(&self, rng: &mut ChaCha8Rng, cx: GenContext) -> Result<Draw, GenError> {
        let mut values = Vec::with_capacity(self.fields.len());
        let mut children = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            if field.required {
                let drawn = field.generator.draw(rng, cx)?;
                values.push((field.name.clone(), drawn.value));
                children.push(drawn.tree);
            } else if !cx.at_limit() && rng.gen_bool(0.5) {
                let drawn = field.generator.draw(rng, cx)?;
                values.push((field.name.clone(), drawn.value));
                children.push(DrawTree::Maybe { child: Some(Box::new(drawn.tree)) });
            } else {
                children.push(DrawTree::Maybe { child: None });
            }
        }
        Ok(Draw { value: Value::Record(values), tree: DrawTree::Product { children } })
    }

    fn replay(&self, tree: &DrawTree, cx: GenContext) -> Result<Value, GenError> {
        let children = match tree {
            DrawTree::Product { children } if children.len() == self.fields.len() => children,
            other => return Err(GenError::mismatch("record product", other)),
        };
        let mut values = Vec::with_capacity(self.fields.len());
        for (field, child) in self.fields.iter().zip(children) {
            if field.required {
                values.push((field.name.clone(), field.generator.replay(child, cx)?));
            } else {
                match child {
                    DrawTree::Maybe { child: None } => {}
                    DrawTree::Maybe { child: Some(inner) } => {
                        values.push((field.name.clone(), field.generator.replay(inner, cx)?));
                    }
                    other => return Err(GenError::mismatch("optional field maybe", other)),
                }
            }
        }
        Ok(Value::Record(values))
    }
}

/// Tagged-union generation; shrinks toward the lowest-index variant.
pub struct OneOfGen {
    variants: Vec<Arc<dyn ValueGenerator>>,
}

impl OneOfGen {
    pub fn new(variants: Vec<Arc<dyn ValueGenerator>>) -> Self {
        Self { variants }
    }
}

impl ValueGenerator for OneOfGen {
    fn draw(&self, rng: &mut ChaCha8Rng, cx: GenContext) -> Result<Draw, GenError> {
        if self.variants.is_empty() {
            return Err(GenError::Unsupported { type_name: "one_of with no variants".to_string() });
        }
        let index = if cx.at_limit() { 0 } else { rng.gen_range(0..self.variants.len()) };
        let inner = self.variants[index].draw(rng, cx)?;
        Ok(Draw {
            value: inner.value,
            tree: DrawTree::Choice {
                index,
                arity: self.variants.len(),
                child: Box::new(inner.tree),
            },
        })
    }

    fn replay(&self, tree: &DrawTree, cx: GenContext) -> Result<Value, GenError> {
        match tree {
            DrawTree::Choice { index, child, .. } if *index < self.variants.len() => {
                self.variants[*index].replay(child, cx)
            }
            other => Err(GenError::mismatch("variant choice", other)),
        }
    }
}

/// Closed string enumeration; shrinks toward the first declared value.
pub struct EnumGen {
    values: Vec<String>,
}

impl EnumGen {
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }
}

impl ValueGenerator for EnumGen {
    fn draw(&self, rng: &mut ChaCha8Rng, _cx: GenContext) -> Result<Draw, GenError> {
        if self.values.is_empty() {
            return Err(GenError::Unsupported { type_name: "enum with no values".to_string() });
        }
        let index = rng.gen_range(0..self.values.len());
        Ok(Draw {
            value: Value::Str(self.values[index].clone()),
            tree: DrawTree::Choice {
                index,
                arity: self.values.len(),
                child: Box::new(DrawTree::unit()),
            },
        })
    }

    fn replay(&self, tree: &DrawTree, _cx: GenContext) -> Result<Value, GenError> {
        match tree {
            DrawTree::Choice { index, .. } if *index < self.values.len() => {
                Ok(Value::Str(self.values[*index].clone()))
            }
            other => Err(GenError::mismatch("enum choice", other)),
        }
    }
}
