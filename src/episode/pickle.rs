//! Pickle decoding with numpy reconstruction.
//!
//! Trajectory payloads are written by `pickle` and `np.save`, so they
//! reference numpy callables (`_reconstruct`, `dtype`, `scalar`,
//! `_frombuffer`) and, under protocol 2, `_codecs.encode` for raw bytes.
//! [`decode`] runs the opcode stream against a small object graph, then
//! rebuilds those objects as [`FieldValue`] arrays. Other callables decode
//! to [`FieldValue::None`].
//!
//! Objects live in an arena and the stack and memo hold indices, so `BUILD`,
//! `APPEND` and `SETITEMS` applied after a `BINPUT` are visible through later
//! `BINGET`s. numpy memoizes a `dtype` before its `BUILD` and reuses it for
//! every following array.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use anyhow::{anyhow, bail, ensure, Context, Result};
use ndarray::{ArrayD, IxDyn, ShapeBuilder};

use super::fields::FieldValue;

/// Nesting limit when converting the object graph; also stops cycles.
const MAX_DEPTH: usize = 256;

type NodeId = usize;

#[derive(Debug, Clone)]
enum Node {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<NodeId>),
    Tuple(Vec<NodeId>),
    Dict(Vec<(NodeId, NodeId)>),
    Set(Vec<NodeId>),
    Global { module: String, name: String },
    /// Result of calling `class` with `args`, plus any `BUILD` state.
    Object {
        class: NodeId,
        args: NodeId,
        state: Option<NodeId>,
    },
}

impl Node {
    fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::Global { .. } => "global",
            Self::Object { .. } => "object",
        }
    }
}

/// Decode a pickle stream (protocols 0 to 5, in-band buffers only).
pub fn decode(bytes: &[u8]) -> Result<FieldValue> {
    let mut machine = Machine::default();
    let root = machine.run(bytes)?;
    Resolver {
        nodes: &machine.nodes,
    }
    .value(root, 0)
}

// ---------------------------------------------------------------------------
// Opcode reader
// ---------------------------------------------------------------------------

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| anyhow!("pickle truncated at offset {}", self.pos))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn len_u64(&mut self) -> Result<usize> {
        Ok(usize::try_from(u64::from_le_bytes(self.array()?))?)
    }

    /// A newline-terminated argument, without the newline.
    fn line(&mut self) -> Result<&'a [u8]> {
        let rest = &self.bytes[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| anyhow!("unterminated pickle line at offset {}", self.pos))?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    fn line_str(&mut self) -> Result<&'a str> {
        std::str::from_utf8(self.line()?).context("invalid UTF-8 in pickle line")
    }
}

fn utf8(raw: &[u8]) -> Result<String> {
    Ok(std::str::from_utf8(raw)
        .context("invalid UTF-8 in pickle string")?
        .to_owned())
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Machine {
    nodes: Vec<Node>,
    stack: Vec<NodeId>,
    marks: Vec<usize>,
    memo: HashMap<u64, NodeId>,
}

impl Machine {
    fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn push(&mut self, node: Node) {
        let id = self.alloc(node);
        self.stack.push(id);
    }

    fn pop(&mut self) -> Result<NodeId> {
        ensure!(
            self.marks.last().map_or(true, |&mark| mark < self.stack.len()),
            "pickle pops past a MARK"
        );
        self.stack.pop().ok_or_else(|| anyhow!("pickle stack underflow"))
    }

    fn top(&self) -> Result<NodeId> {
        self.stack
            .last()
            .copied()
            .ok_or_else(|| anyhow!("pickle stack is empty"))
    }

    fn pop_mark(&mut self) -> Result<Vec<NodeId>> {
        let mark = self.marks.pop().ok_or_else(|| anyhow!("pickle MARK missing"))?;
        ensure!(mark <= self.stack.len(), "pickle MARK beyond stack top");
        Ok(self.stack.split_off(mark))
    }

    fn pop_tuple(&mut self, n: usize) -> Result<()> {
        let mut items = Vec::with_capacity(n);
        for _ in 0..n {
            items.push(self.pop()?);
        }
        items.reverse();
        self.push(Node::Tuple(items));
        Ok(())
    }

    fn memoize(&mut self, key: u64) -> Result<()> {
        let top = self.top()?;
        self.memo.insert(key, top);
        Ok(())
    }

    fn recall(&mut self, key: u64) -> Result<()> {
        let id = *self
            .memo
            .get(&key)
            .ok_or_else(|| anyhow!("pickle memo key {key} is not defined"))?;
        self.stack.push(id);
        Ok(())
    }

    fn text(&self, id: NodeId) -> Result<String> {
        match &self.nodes[id] {
            Node::Text(s) => Ok(s.clone()),
            Node::Bytes(b) => utf8(b),
            other => bail!("expected a string, found {}", other.kind()),
        }
    }

    fn extend_list(&mut self, target: NodeId, items: Vec<NodeId>) -> Result<()> {
        match &mut self.nodes[target] {
            Node::List(list) | Node::Set(list) => {
                list.extend(items);
                Ok(())
            }
            other => bail!("cannot append to {}", other.kind()),
        }
    }

    fn extend_dict(&mut self, target: NodeId, items: Vec<NodeId>) -> Result<()> {
        ensure!(items.len() % 2 == 0, "odd number of items for SETITEMS");
        let pairs = items.chunks_exact(2).map(|pair| (pair[0], pair[1]));
        match &mut self.nodes[target] {
            Node::Dict(dict) => {
                dict.extend(pairs);
                Ok(())
            }
            other => bail!("cannot set items on {}", other.kind()),
        }
    }

    fn reduce(&mut self, class: NodeId, args: NodeId) {
        let dict_like = matches!(
            &self.nodes[class],
            Node::Global { module, name }
                if matches!(
                    (module.as_str(), name.as_str()),
                    ("collections", "OrderedDict")
                        | ("collections", "defaultdict")
                        | ("builtins" | "__builtin__", "dict")
                )
        );
        if dict_like {
            self.push(Node::Dict(Vec::new()));
        } else {
            self.push(Node::Object {
                class,
                args,
                state: None,
            });
        }
    }

    fn build(&mut self, target: NodeId, state: NodeId) -> Result<()> {
        let extra = match &self.nodes[state] {
            Node::Dict(items) => Some(items.clone()),
            _ => None,
        };
        match (&mut self.nodes[target], extra) {
            (Node::Object { state: slot, .. }, _) => *slot = Some(state),
            (Node::Dict(items), Some(extra)) => items.extend(extra),
            (other, _) => bail!("cannot BUILD {}", other.kind()),
        }
        Ok(())
    }

    fn run(&mut self, bytes: &[u8]) -> Result<NodeId> {
        let mut r = Reader { bytes, pos: 0 };
        loop {
            let offset = r.pos;
            let op = r.u8()?;
            self.step(op, &mut r)
                .with_context(|| format!("pickle opcode 0x{op:02x} at offset {offset}"))?;
            if op == b'.' {
                return self.pop();
            }
        }
    }

    fn step(&mut self, op: u8, r: &mut Reader<'_>) -> Result<()> {
        match op {
            // Framing
            0x80 => {
                r.u8()?;
            }
            0x95 => {
                r.take(8)?;
            }
            b'.' => {}

            // Stack
            b'(' => self.marks.push(self.stack.len()),
            b'0' => {
                if self.marks.last() == Some(&self.stack.len()) {
                    self.marks.pop();
                } else {
                    self.pop()?;
                }
            }
            b'1' => {
                self.pop_mark()?;
            }
            b'2' => {
                let top = self.top()?;
                self.stack.push(top);
            }

            // Scalars
            b'N' => self.push(Node::None),
            0x88 => self.push(Node::Bool(true)),
            0x89 => self.push(Node::Bool(false)),
            b'I' => {
                let node = match r.line_str()? {
                    "00" => Node::Bool(false),
                    "01" => Node::Bool(true),
                    text => Node::Int(text.parse().context("invalid INT")?),
                };
                self.push(node);
            }
            b'J' => {
                let value = r.i32()?;
                self.push(Node::Int(value.into()));
            }
            b'K' => {
                let value = r.u8()?;
                self.push(Node::Int(value.into()));
            }
            b'M' => {
                let value = r.u16()?;
                self.push(Node::Int(value.into()));
            }
            b'L' => {
                let text = r.line_str()?.trim_end_matches('L');
                let node = match text.parse::<i64>() {
                    Ok(i) => Node::Int(i),
                    Err(_) => Node::Float(text.parse().context("invalid LONG")?),
                };
                self.push(node);
            }
            0x8a => {
                let n = usize::from(r.u8()?);
                let node = long_from_le(r.take(n)?);
                self.push(node);
            }
            0x8b => {
                let n = usize::try_from(r.u32()?)?;
                let node = long_from_le(r.take(n)?);
                self.push(node);
            }
            b'F' => {
                let value = r.line_str()?.parse().context("invalid FLOAT")?;
                self.push(Node::Float(value));
            }
            b'G' => {
                let value = f64::from_be_bytes(r.array()?);
                self.push(Node::Float(value));
            }

            // Strings and bytes
            b'S' => {
                let node = Node::Bytes(unescape_string_literal(r.line()?)?);
                self.push(node);
            }
            b'T' => {
                let n = usize::try_from(r.i32()?).context("negative BINSTRING length")?;
                self.push(Node::Bytes(r.take(n)?.to_vec()));
            }
            b'U' => {
                let n = usize::from(r.u8()?);
                self.push(Node::Bytes(r.take(n)?.to_vec()));
            }
            b'V' => {
                let node = Node::Text(decode_raw_unicode(r.line()?)?);
                self.push(node);
            }
            b'X' => {
                let n = usize::try_from(r.u32()?)?;
                self.push(Node::Text(utf8(r.take(n)?)?));
            }
            0x8c => {
                let n = usize::from(r.u8()?);
                self.push(Node::Text(utf8(r.take(n)?)?));
            }
            0x8d => {
                let n = r.len_u64()?;
                self.push(Node::Text(utf8(r.take(n)?)?));
            }
            b'B' => {
                let n = usize::try_from(r.u32()?)?;
                self.push(Node::Bytes(r.take(n)?.to_vec()));
            }
            b'C' => {
                let n = usize::from(r.u8()?);
                self.push(Node::Bytes(r.take(n)?.to_vec()));
            }
            0x8e | 0x96 => {
                let n = r.len_u64()?;
                self.push(Node::Bytes(r.take(n)?.to_vec()));
            }

            // Containers
            b']' => self.push(Node::List(Vec::new())),
            b'l' => {
                let items = self.pop_mark()?;
                self.push(Node::List(items));
            }
            b'a' => {
                let item = self.pop()?;
                let list = self.top()?;
                self.extend_list(list, vec![item])?;
            }
            b'e' => {
                let items = self.pop_mark()?;
                let list = self.top()?;
                self.extend_list(list, items)?;
            }
            b')' => self.push(Node::Tuple(Vec::new())),
            b't' => {
                let items = self.pop_mark()?;
                self.push(Node::Tuple(items));
            }
            0x85 => self.pop_tuple(1)?,
            0x86 => self.pop_tuple(2)?,
            0x87 => self.pop_tuple(3)?,
            b'}' => self.push(Node::Dict(Vec::new())),
            b'd' => {
                let items = self.pop_mark()?;
                let dict = self.alloc(Node::Dict(Vec::new()));
                self.extend_dict(dict, items)?;
                self.stack.push(dict);
            }
            b's' => {
                let value = self.pop()?;
                let key = self.pop()?;
                let dict = self.top()?;
                self.extend_dict(dict, vec![key, value])?;
            }
            b'u' => {
                let items = self.pop_mark()?;
                let dict = self.top()?;
                self.extend_dict(dict, items)?;
            }
            0x8f => self.push(Node::Set(Vec::new())),
            0x90 => {
                let items = self.pop_mark()?;
                let set = self.top()?;
                self.extend_list(set, items)?;
            }
            0x91 => {
                let items = self.pop_mark()?;
                self.push(Node::Set(items));
            }

            // Callables
            b'c' => {
                let module = r.line_str()?.to_owned();
                let name = r.line_str()?.to_owned();
                self.push(Node::Global { module, name });
            }
            0x93 => {
                let name = self.pop()?;
                let module = self.pop()?;
                let node = Node::Global {
                    module: self.text(module)?,
                    name: self.text(name)?,
                };
                self.push(node);
            }
            b'R' => {
                let args = self.pop()?;
                let class = self.pop()?;
                self.reduce(class, args);
            }
            0x81 => {
                let args = self.pop()?;
                let class = self.pop()?;
                self.reduce(class, args);
            }
            0x92 => {
                self.pop()?;
                let args = self.pop()?;
                let class = self.pop()?;
                self.reduce(class, args);
            }
            b'i' => {
                let module = r.line_str()?.to_owned();
                let name = r.line_str()?.to_owned();
                let items = self.pop_mark()?;
                let class = self.alloc(Node::Global { module, name });
                let args = self.alloc(Node::Tuple(items));
                self.reduce(class, args);
            }
            b'o' => {
                let mut items = self.pop_mark()?;
                ensure!(!items.is_empty(), "OBJ without a class");
                let class = items.remove(0);
                let args = self.alloc(Node::Tuple(items));
                self.reduce(class, args);
            }
            b'b' => {
                let state = self.pop()?;
                let target = self.top()?;
                self.build(target, state)?;
            }

            // Memo
            b'p' => {
                let key = r.line_str()?.parse().context("invalid PUT index")?;
                self.memoize(key)?;
            }
            b'q' => {
                let key = r.u8()?;
                self.memoize(key.into())?;
            }
            b'r' => {
                let key = r.u32()?;
                self.memoize(key.into())?;
            }
            0x94 => self.memoize(self.memo.len() as u64)?,
            b'g' => {
                let key = r.line_str()?.parse().context("invalid GET index")?;
                self.recall(key)?;
            }
            b'h' => {
                let key = r.u8()?;
                self.recall(key.into())?;
            }
            b'j' => {
                let key = r.u32()?;
                self.recall(key.into())?;
            }

            0x98 => {}
            0x97 => bail!("out-of-band pickle buffers are not supported"),
            other => bail!("unsupported pickle opcode 0x{other:02x}"),
        }
        Ok(())
    }
}

/// Two's-complement little-endian integer from `LONG1` / `LONG4`.
fn long_from_le(data: &[u8]) -> Node {
    let negative = data.last().is_some_and(|b| b & 0x80 != 0);
    if data.len() <= 8 {
        let mut buf = if negative { [0xff; 8] } else { [0; 8] };
        buf[..data.len()].copy_from_slice(data);
        return Node::Int(i64::from_le_bytes(buf));
    }
    let magnitude = data
        .iter()
        .rev()
        .fold(0.0f64, |acc, &b| acc * 256.0 + f64::from(b));
    let value = if negative {
        magnitude - 256f64.powi(data.len() as i32)
    } else {
        magnitude
    };
    Node::Float(value)
}

/// Protocol 0 `STRING` argument: a quoted Python bytes literal.
fn unescape_string_literal(line: &[u8]) -> Result<Vec<u8>> {
    let body = match line {
        [b'\'', body @ .., b'\''] | [b'"', body @ .., b'"'] => body,
        _ => bail!("STRING argument is not quoted"),
    };
    let mut out = Vec::with_capacity(body.len());
    let mut iter = body.iter().copied();
    while let Some(b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b't') => out.push(b'\t'),
            Some(b'x') => {
                let hex = [iter.next(), iter.next()];
                let [Some(hi), Some(lo)] = hex else {
                    bail!("truncated \\x escape");
                };
                let text = std::str::from_utf8(&[hi, lo])?.to_owned();
                out.push(u8::from_str_radix(&text, 16)?);
            }
            Some(other) => out.push(other),
            None => bail!("dangling backslash in STRING"),
        }
    }
    Ok(out)
}

/// Protocol 0 `UNICODE` argument: latin-1 with `\uXXXX` and `\UXXXXXXXX`
/// escapes.
fn decode_raw_unicode(line: &[u8]) -> Result<String> {
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let width = match (line[i], line.get(i + 1).copied()) {
            (b'\\', Some(b'u')) => 4,
            (b'\\', Some(b'U')) => 8,
            (b, _) => {
                out.push(char::from(b));
                i += 1;
                continue;
            }
        };
        let hex = line
            .get(i + 2..i + 2 + width)
            .ok_or_else(|| anyhow!("truncated unicode escape"))?;
        let code = u32::from_str_radix(std::str::from_utf8(hex)?, 16)?;
        out.push(char::from_u32(code).ok_or_else(|| anyhow!("invalid code point {code:#x}"))?);
        i += 2 + width;
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

struct Resolver<'a> {
    nodes: &'a [Node],
}

impl Resolver<'_> {
    fn value(&self, id: NodeId, depth: usize) -> Result<FieldValue> {
        ensure!(
            depth <= MAX_DEPTH,
            "pickle nesting deeper than {MAX_DEPTH} levels (recursive structure?)"
        );
        let next = depth + 1;
        Ok(match &self.nodes[id] {
            Node::None => FieldValue::None,
            Node::Bool(b) => FieldValue::Bool(*b),
            Node::Int(i) => FieldValue::Int(*i),
            Node::Float(f) => FieldValue::Float(*f),
            Node::Text(s) => FieldValue::Text(s.clone()),
            Node::Bytes(b) => FieldValue::Bytes(b.clone()),
            Node::List(items) | Node::Tuple(items) | Node::Set(items) => FieldValue::List(
                items
                    .iter()
                    .map(|&item| self.value(item, next))
                    .collect::<Result<_>>()?,
            ),
            Node::Dict(pairs) => {
                let mut map = BTreeMap::new();
                for &(key, value) in pairs {
                    map.insert(self.key(key)?, self.value(value, next)?);
                }
                FieldValue::Dict(map)
            }
            Node::Global { module, name } => FieldValue::Text(format!("{module}.{name}")),
            Node::Object { .. } => self.object(id, next)?,
        })
    }

    fn key(&self, id: NodeId) -> Result<String> {
        Ok(match &self.nodes[id] {
            Node::Text(s) => s.clone(),
            Node::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Node::Int(i) => i.to_string(),
            Node::Float(f) => f.to_string(),
            Node::Bool(b) => (if *b { "True" } else { "False" }).to_string(),
            other => bail!("unsupported dict key type {}", other.kind()),
        })
    }

    fn global(&self, id: NodeId) -> Option<(&str, &str)> {
        match &self.nodes[id] {
            Node::Global { module, name } => Some((module.as_str(), name.as_str())),
            _ => None,
        }
    }

    fn items(&self, id: NodeId) -> Result<&[NodeId]> {
        match &self.nodes[id] {
            Node::Tuple(items) | Node::List(items) => Ok(items),
            other => bail!("expected a tuple, found {}", other.kind()),
        }
    }

    fn text(&self, id: NodeId) -> Result<&str> {
        match &self.nodes[id] {
            Node::Text(s) => Ok(s),
            Node::Bytes(b) => std::str::from_utf8(b).context("invalid UTF-8 in pickle string"),
            other => bail!("expected a string, found {}", other.kind()),
        }
    }

    fn truthy(&self, id: NodeId) -> Result<bool> {
        match &self.nodes[id] {
            Node::Bool(b) => Ok(*b),
            Node::Int(i) => Ok(*i != 0),
            other => bail!("expected a bool, found {}", other.kind()),
        }
    }

    fn shape(&self, id: NodeId) -> Result<Vec<usize>> {
        self.items(id)?
            .iter()
            .map(|&dim| match &self.nodes[dim] {
                Node::Int(n) => usize::try_from(*n).context("negative array dimension"),
                other => bail!("expected an array dimension, found {}", other.kind()),
            })
            .collect()
    }

    /// Raw bytes, including the `_codecs.encode(str, "latin1")` and
    /// `bytes()` forms protocol 2 uses for Python 3 bytes.
    fn bytes(&self, id: NodeId) -> Result<Vec<u8>> {
        match &self.nodes[id] {
            Node::Bytes(b) => Ok(b.clone()),
            Node::Object { class, args, .. } => match self.global(*class) {
                Some(("_codecs", "encode")) => {
                    let args = self.items(*args)?;
                    let text = self.text(*args.first().context("encode() without text")?)?;
                    let encoding = match args.get(1) {
                        Some(&encoding) => self.text(encoding)?,
                        None => "utf-8",
                    };
                    match encoding.to_ascii_lowercase().as_str() {
                        "latin1" | "latin-1" | "iso-8859-1" => latin1(text),
                        _ => Ok(text.as_bytes().to_vec()),
                    }
                }
                Some(("builtins" | "__builtin__", "bytes" | "bytearray")) => {
                    match self.items(*args)?.first() {
                        Some(&inner) => self.bytes(inner),
                        None => Ok(Vec::new()),
                    }
                }
                _ => bail!("expected bytes, found an object"),
            },
            other => bail!("expected bytes, found {}", other.kind()),
        }
    }

    fn dtype(&self, id: NodeId) -> Result<Dtype> {
        let Node::Object { class, args, state } = &self.nodes[id] else {
            bail!("expected a numpy dtype, found {}", self.nodes[id].kind());
        };
        ensure!(
            matches!(self.global(*class), Some((module, "dtype")) if module.starts_with("numpy")),
            "expected a numpy dtype"
        );
        let descr = self.text(*self.items(*args)?.first().context("dtype() without type")?)?;
        let mut big_endian = false;
        if let Some(state) = state {
            if let Some(&order) = self.items(*state)?.get(1) {
                big_endian = self.text(order)? == ">";
            }
        }
        Dtype::parse(descr, big_endian)
    }

    fn object(&self, id: NodeId, depth: usize) -> Result<FieldValue> {
        let Node::Object { class, args, state } = &self.nodes[id] else {
            bail!("expected an object");
        };
        let Some((module, name)) = self.global(*class) else {
            return Ok(FieldValue::None);
        };
        let numpy = module == "numpy" || module.starts_with("numpy.");
        match name {
            "_reconstruct" if numpy => {
                let state = (*state).context("numpy array pickle has no state")?;
                self.ndarray(state, depth)
            }
            "_frombuffer" if numpy => {
                let args = self.items(*args)?;
                let [buffer, dtype, shape, order] = args else {
                    bail!("_frombuffer expects 4 arguments, found {}", args.len());
                };
                let dtype = self.dtype(*dtype)?;
                let fortran = self.text(*order)? == "F";
                dtype.array(&self.shape(*shape)?, fortran, &self.bytes(*buffer)?)
            }
            "scalar" if numpy => {
                let args = self.items(*args)?;
                let [dtype, payload] = args else {
                    bail!("scalar expects 2 arguments, found {}", args.len());
                };
                let dtype = self.dtype(*dtype)?;
                if dtype.kind == b'O' {
                    return self.value(*payload, depth);
                }
                dtype.scalar(&self.bytes(*payload)?)
            }
            _ if module == "_codecs" || module == "builtins" || module == "__builtin__" => {
                Ok(self.bytes(id).map(FieldValue::Bytes).unwrap_or(FieldValue::None))
            }
            _ => Ok(FieldValue::None),
        }
    }

    /// `ndarray.__setstate__` payload: `(version, shape, dtype, fortran, data)`,
    /// or the same without the version.
    fn ndarray(&self, state: NodeId, depth: usize) -> Result<FieldValue> {
        let items = self.items(state)?;
        let fields = match items.len() {
            5 => &items[1..],
            4 => items,
            n => bail!("numpy array state has {n} fields"),
        };
        let shape = self.shape(fields[0])?;
        let dtype = self.dtype(fields[1])?;
        let fortran = self.truthy(fields[2])?;

        if dtype.kind == b'O' {
            let elements = self
                .items(fields[3])?
                .iter()
                .map(|&item| self.value(item, depth))
                .collect::<Result<Vec<_>>>()?;
            return nest(&shape, elements);
        }
        dtype.array(&shape, fortran, &self.bytes(fields[3])?)
    }
}

fn latin1(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| u8::try_from(c).map_err(|_| anyhow!("character {c:?} is not latin-1")))
        .collect()
}

/// Arrange flat row-major elements as nested lists following `shape`.
/// A zero-dimensional shape yields the single element itself.
fn nest(shape: &[usize], elements: Vec<FieldValue>) -> Result<FieldValue> {
    let count: usize = shape.iter().product();
    ensure!(
        elements.len() == count,
        "array has {} elements, expected {count} for shape {shape:?}",
        elements.len()
    );
    let mut iter = elements.into_iter();
    Ok(nest_from(shape, &mut iter))
}

fn nest_from(shape: &[usize], iter: &mut impl Iterator<Item = FieldValue>) -> FieldValue {
    match shape.split_first() {
        None => iter.next().unwrap_or(FieldValue::None),
        Some((&n, rest)) => FieldValue::List((0..n).map(|_| nest_from(rest, &mut *iter)).collect()),
    }
}

// ---------------------------------------------------------------------------
// dtype
// ---------------------------------------------------------------------------

/// A numpy element type: kind character, item size in bytes, byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Dtype {
    kind: u8,
    size: usize,
    big_endian: bool,
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = if self.big_endian { '>' } else { '<' };
        write!(f, "{order}{}{}", char::from(self.kind), self.size)
    }
}

impl Dtype {
    fn parse(descr: &str, big_endian: bool) -> Result<Self> {
        let big_endian = big_endian || descr.starts_with('>');
        let descr = descr.trim_start_matches(|c: char| matches!(c, '<' | '>' | '|' | '='));
        let (&kind, size) = descr
            .as_bytes()
            .split_first()
            .ok_or_else(|| anyhow!("empty numpy dtype"))?;
        let size = match (kind, size) {
            (b'O', []) => 8,
            (b'?', []) => 1,
            (_, digits) => std::str::from_utf8(digits)?
                .parse::<usize>()
                .with_context(|| format!("unsupported numpy dtype `{descr}`"))?,
        };
        let kind = if kind == b'?' { b'b' } else { kind };
        let numeric = matches!(
            (kind, size),
            (b'f', 4 | 8) | (b'i' | b'u', 1 | 2 | 4 | 8) | (b'b', 1)
        );
        ensure!(
            numeric || matches!(kind, b'O' | b'U' | b'S'),
            "unsupported numpy dtype `{descr}`"
        );
        Ok(Self {
            kind,
            size,
            big_endian,
        })
    }

    fn number(&self, raw: &[u8]) -> Result<f64> {
        ensure!(raw.len() == self.size && self.size <= 8, "bad element width for {self}");
        let mut buf = [0u8; 8];
        buf[..raw.len()].copy_from_slice(raw);
        if self.big_endian {
            buf[..raw.len()].reverse();
        }
        let [b0, b1, b2, b3, ..] = buf;
        Ok(match (self.kind, self.size) {
            (b'f', 8) => f64::from_le_bytes(buf),
            (b'f', 4) => f64::from(f32::from_le_bytes([b0, b1, b2, b3])),
            (b'i', 1) => f64::from(b0 as i8),
            (b'i', 2) => f64::from(i16::from_le_bytes([b0, b1])),
            (b'i', 4) => f64::from(i32::from_le_bytes([b0, b1, b2, b3])),
            (b'i', 8) => i64::from_le_bytes(buf) as f64,
            (b'u', _) => u64::from_le_bytes(buf) as f64,
            (b'b', 1) => f64::from(u8::from(b0 != 0)),
            _ => bail!("numpy dtype {self} is not numeric"),
        })
    }

    fn text(&self, raw: &[u8]) -> Result<String> {
        let text = if self.kind == b'U' {
            raw.chunks_exact(4)
                .map(|c| {
                    let code = if self.big_endian {
                        u32::from_be_bytes([c[0], c[1], c[2], c[3]])
                    } else {
                        u32::from_le_bytes([c[0], c[1], c[2], c[3]])
                    };
                    char::from_u32(code).ok_or_else(|| anyhow!("invalid code point {code:#x}"))
                })
                .collect::<Result<String>>()?
        } else {
            String::from_utf8_lossy(raw).into_owned()
        };
        Ok(text.trim_end_matches('\0').to_string())
    }

    fn array(&self, shape: &[usize], fortran: bool, data: &[u8]) -> Result<FieldValue> {
        let count: usize = shape.iter().product();
        ensure!(
            data.len() == count * self.size,
            "numpy array data has {} bytes, expected {} for shape {shape:?} and dtype {self}",
            data.len(),
            count * self.size
        );

        if matches!(self.kind, b'U' | b'S') {
            let texts = if self.size == 0 {
                vec![FieldValue::Text(String::new()); count]
            } else {
                data.chunks_exact(self.size)
                    .map(|raw| self.text(raw).map(FieldValue::Text))
                    .collect::<Result<_>>()?
            };
            return nest(shape, texts);
        }
        ensure!(self.kind != b'O', "object arrays carry a list, not raw bytes");

        let values = data
            .chunks_exact(self.size)
            .map(|raw| self.number(raw))
            .collect::<Result<Vec<_>>>()?;
        let array = if fortran {
            ArrayD::from_shape_vec(IxDyn(shape).f(), values)?
        } else {
            ArrayD::from_shape_vec(IxDyn(shape), values)?
        };
        Ok(FieldValue::Array(array))
    }

    fn scalar(&self, raw: &[u8]) -> Result<FieldValue> {
        Ok(match self.kind {
            b'U' | b'S' => FieldValue::Text(self.text(raw)?),
            b'b' => FieldValue::Bool(self.number(raw)? != 0.0),
            b'i' | b'u' => FieldValue::Int(self.number(raw)? as i64),
            _ => FieldValue::Float(self.number(raw)?),
        })
    }
}
