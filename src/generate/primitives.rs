//! Built-in primitive generators.
//!
//! Default ranges: strings of 1–100 code points over lower/upper/digit,
//! integers uniform in [-1000, 1000], finite floats, uniform booleans,
//! v4 UUIDs, datetimes/dates across the representable range, byte strings
//! of 1–100 bytes. Shrink targets are encoded as leaf origins: integers to
//! 0, strings toward empty then the least character, UUIDs to nil,
//! datetimes and dates to the Unix epoch, bytes to empty.

use chrono::DateTime;
use chrono::NaiveDate;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use crate::generate::draw_int_leaf;
use crate::generate::replay_int_leaf;
use crate::generate::Draw;
use crate::generate::DrawTree;
use crate::generate::GenContext;
use crate::generate::GenError;
use crate::generate::ValueGenerator;
use crate::value::Value;

/// 0001-01-01T00:00:00Z, seconds relative to the Unix epoch.
const MIN_TIMESTAMP_SECS: i64 = -62_135_596_800;
/// 9999-12-31T23:59:59Z.
const MAX_TIMESTAMP_SECS: i64 = 253_402_300_799;
/// 0001-01-01, days relative to 1970-01-01.
const MIN_EPOCH_DAYS: i64 = -719_162;
/// 9999-12-31.
const MAX_EPOCH_DAYS: i64 = 2_932_896;
/// Days between 0001-01-01 (day 1 of the common era) and 1970-01-01.
const EPOCH_DAYS_FROM_CE: i64 = 719_163;

/// Code-point sampling over a fixed alphabet, length-bounded.
///
/// The alphabet is kept sorted ascending so that leaf index 0 is the least
/// character, which is the per-character shrink target.
#[derive(Debug, Clone)]
pub struct StrGen {
    alphabet: Vec<char>,
    min_len: usize,
    max_len: usize,
}

impl StrGen {
    pub fn new(mut alphabet: Vec<char>, min_len: usize, max_len: usize) -> Self {
        alphabet.sort_unstable();
        alphabet.dedup();
        Self { alphabet, min_len, max_len }
    }

    /// Default text generator: lower/upper/digit, 1–100 code points.
    pub fn text() -> Self {
        let alphabet = ('0'..='9').chain('A'..='Z').chain('a'..='z').collect();
        Self::new(alphabet, 1, 100)
    }

    /// URL-safe strings for path positions: letters, digits, `-`, `_`,
    /// 1–50 code points. Nothing here requires percent-encoding.
    pub fn path_safe() -> Self {
        let alphabet = ('0'..='9')
            .chain('A'..='Z')
            .chain('a'..='z')
            .chain(['-', '_'])
            .collect();
        Self::new(alphabet, 1, 50)
    }
}

impl ValueGenerator for StrGen {
    fn draw(&self, rng: &mut ChaCha8Rng, _cx: GenContext) -> Result<Draw, GenError> {
        let len = rng.gen_range(self.min_len..=self.max_len);
        let top = self.alphabet.len() as i64 - 1;
        let mut chars = String::with_capacity(len);
        let mut children = Vec::with_capacity(len);
        for _ in 0..len {
            let (idx, leaf) = draw_int_leaf(rng, 0, top, 0);
            chars.push(self.alphabet[idx as usize]);
            children.push(leaf);
        }
        Ok(Draw {
            value: Value::Str(chars),
            tree: DrawTree::Seq { min: self.min_len, children },
        })
    }

    fn replay(&self, tree: &DrawTree, _cx: GenContext) -> Result<Value, GenError> {
        let children = match tree {
            DrawTree::Seq { children, .. } => children,
            other => return Err(GenError::mismatch("seq of char draws", other)),
        };
        if children.len() < self.min_len || children.len() > self.max_len {
            return Err(GenError::TreeMismatch {
                expected: "seq length within string bounds",
                found: format!("length {}", children.len()),
            });
        }
        let top = self.alphabet.len() as i64 - 1;
        let mut out = String::with_capacity(children.len());
        for child in children {
            let idx = replay_int_leaf(child, 0, top)?;
            out.push(self.alphabet[idx as usize]);
        }
        Ok(Value::Str(out))
    }
}

/// Uniform integer in a closed range; shrink origin is 0 clamped into range.
#[derive(Debug, Clone, Copy)]
pub struct IntGen {
    min: i64,
    max: i64,
    origin: i64,
}

impl IntGen {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max, origin: 0.clamp(min, max) }
    }
}

impl Default for IntGen {
    fn default() -> Self {
        Self::new(-1000, 1000)
    }
}

impl ValueGenerator for IntGen {
    fn draw(&self, rng: &mut ChaCha8Rng, _cx: GenContext) -> Result<Draw, GenError> {
        let value = rng.gen_range(self.min..=self.max);
        Ok(Draw {
            value: Value::Int(value),
            tree: DrawTree::Int { value, min: self.min, max: self.max, origin: self.origin },
        })
    }

    fn replay(&self, tree: &DrawTree, _cx: GenContext) -> Result<Value, GenError> {
        Ok(Value::Int(replay_int_leaf(tree, self.min, self.max)?))
    }
}

/// Finite floats only; no NaN, no infinities.
#[derive(Debug, Clone, Copy)]
pub struct FloatGen {
    min: f64,
    max: f64,
}

impl FloatGen {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl Default for FloatGen {
    fn default() -> Self {
        Self::new(-1.0e6, 1.0e6)
    }
}

impl ValueGenerator for FloatGen {
    fn draw(&self, rng: &mut ChaCha8Rng, _cx: GenContext) -> Result<Draw, GenError> {
        let value = rng.gen_range(self.min..=self.max);
        Ok(Draw { value: Value::Float(value), tree: DrawTree::Float { value } })
    }

    fn replay(&self, tree: &DrawTree, _cx: GenContext) -> Result<Value, GenError> {
        match tree {
            DrawTree::Float { value } if value.is_finite() => Ok(Value::Float(*value)),
            other => Err(GenError::mismatch("finite float leaf", other)),
        }
    }
}

/// Uniform boolean; shrinks to `false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolGen;

impl ValueGenerator for BoolGen {
    fn draw(&self, rng: &mut ChaCha8Rng, _cx: GenContext) -> Result<Draw, GenError> {
        let (raw, tree) = draw_int_leaf(rng, 0, 1, 0);
        Ok(Draw { value: Value::Bool(raw != 0), tree })
    }

    fn replay(&self, tree: &DrawTree, _cx: GenContext) -> Result<Value, GenError> {
        Ok(Value::Bool(replay_int_leaf(tree, 0, 1)? != 0))
    }
}

/// Uniform v4 UUID from two 64-bit leaves.
///
/// A tree with both leaves at zero renders the nil UUID, which is the
/// documented shrink target; any other draw has the version and variant
/// bits forced to v4.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGen;

impl UuidGen {
    fn render(hi: i64, lo: i64) -> Uuid {
        if hi == 0 && lo == 0 {
            return Uuid::nil();
        }
        let raw = ((hi as u64 as u128) << 64) | (lo as u64 as u128);
        let mut bytes = raw.to_be_bytes();
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Uuid::from_bytes(bytes)
    }
}

impl ValueGenerator for UuidGen {
    fn draw(&self, rng: &mut ChaCha8Rng, _cx: GenContext) -> Result<Draw, GenError> {
        let (hi, hi_leaf) = draw_int_leaf(rng, i64::MIN, i64::MAX, 0);
        let (lo, lo_leaf) = draw_int_leaf(rng, i64::MIN, i64::MAX, 0);
        Ok(Draw {
            value: Value::Uuid(Self::render(hi, lo)),
            tree: DrawTree::Product { children: vec![hi_leaf, lo_leaf] },
        })
    }

    fn replay(&self, tree: &DrawTree, _cx: GenContext) -> Result<Value, GenError> {
        let children = match tree {
            DrawTree::Product { children } if children.len() == 2 => children,
            other => return Err(GenError::mismatch("product of two u64 leaves", other)),
        };
        let hi = replay_int_leaf(&children[0], i64::MIN, i64::MAX)?;
        let lo = replay_int_leaf(&children[1], i64::MIN, i64::MAX)?;
        Ok(Value::Uuid(Self::render(hi, lo)))
    }
}

/// Datetimes across years 1–9999; shrinks toward the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeGen;

impl DateTimeGen {
    fn render(secs: i64) -> Result<Value, GenError> {
        DateTime::from_timestamp(secs, 0)
            .map(Value::DateTime)
            .ok_or(GenError::TreeMismatch {
                expected: "timestamp within representable range",
                found: format!("{secs}s"),
            })
    }
}

impl ValueGenerator for DateTimeGen {
    fn draw(&self, rng: &mut ChaCha8Rng, _cx: GenContext) -> Result<Draw, GenError> {
        let (secs, tree) = draw_int_leaf(rng, MIN_TIMESTAMP_SECS, MAX_TIMESTAMP_SECS, 0);
        Ok(Draw { value: Self::render(secs)?, tree })
    }

    fn replay(&self, tree: &DrawTree, _cx: GenContext) -> Result<Value, GenError> {
        Self::render(replay_int_leaf(tree, MIN_TIMESTAMP_SECS, MAX_TIMESTAMP_SECS)?)
    }
}

/// Dates across years 1–9999; shrinks toward 1970-01-01.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateGen;

impl DateGen {
    fn render(epoch_days: i64) -> Result<Value, GenError> {
        let days_from_ce = epoch_days + EPOCH_DAYS_FROM_CE;
        i32::try_from(days_from_ce)
            .ok()
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(Value::Date)
            .ok_or(GenError::TreeMismatch {
                expected: "date within representable range",
                found: format!("{epoch_days} days from epoch"),
            })
    }
}

impl ValueGenerator for DateGen {
    fn draw(&self, rng: &mut ChaCha8Rng, _cx: GenContext) -> Result<Draw, GenError> {
        let (days, tree) = draw_int_leaf(rng, MIN_EPOCH_DAYS, MAX_EPOCH_DAYS, 0);
        Ok(Draw { value: Self::render(days)?, tree })
    }

    fn replay(&self, tree: &DrawTree, _cx: GenContext) -> Result<Value, GenError> {
        Self::render(replay_int_leaf(tree, MIN_EPOCH_DAYS, MAX_EPOCH_DAYS)?)
    }
}

/// Byte strings of 1–100 bytes by default; shrink toward empty.
#[derive(Debug, Clone, Copy)]
pub struct BytesGen {
    min_len: usize,
    max_len: usize,
}

impl BytesGen {
    pub fn new(min_len: usize, max_len: usize) -> Self {
        Self { min_len, max_len }
    }
}

impl Default for BytesGen {
    fn default() -> Self {
        Self::new(1, 100)
    }
}

impl ValueGenerator for BytesGen {
    fn draw(&self, rng: &mut ChaCha8Rng, _cx: GenContext) -> Result<Draw, GenError> {
        let len = rng.gen_range(self.min_len..=self.max_len);
        let mut bytes = Vec::with_capacity(len);
        let mut children = Vec::with_capacity(len);
        for _ in 0..len {
            let (b, leaf) = draw_int_leaf(rng, 0, 255, 0);
            bytes.push(b as u8);
            children.push(leaf);
        }
        Ok(Draw {
            value: Value::Bytes(bytes),
            tree: DrawTree::Seq { min: self.min_len, children },
        })
    }

    fn replay(&self, tree: &DrawTree, _cx: GenContext) -> Result<Value, GenError> {
        let children = match tree {
            DrawTree::Seq { children, .. } => children,
            other => return Err(GenError::mismatch("seq of byte draws", other)),
        };
        if children.len() < self.min_len || children.len() > self.max_len {
            return Err(GenError::TreeMismatch {
                expected: "seq length within byte-string bounds",
                found: format!("length {}", children.len()),
            });
        }
        let mut bytes = Vec::with_capacity(children.len());
        for child in children {
            bytes.push(replay_int_leaf(child, 0, 255)? as u8);
        }
        Ok(Value::Bytes(bytes))
    }
}
