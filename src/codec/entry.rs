use std::collections::BTreeMap;

use super::CodecError;

pub type EntryDict = BTreeMap<String, Entry>;

/// Deepest list/dictionary nesting accepted when decoding.
pub const MAX_DEPTH: usize = 64;

/// Generic ordered key/value tree. Its canonical byte form is bencode.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Entry {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Entry>),
    Dict(EntryDict),
}

impl Default for Entry {
    fn default() -> Self {
        Entry::Dict(EntryDict::new())
    }
}

impl Entry {
    pub fn dict() -> Self {
        Entry::Dict(EntryDict::new())
    }

    /// Inserts `value` under `key`. A no-op unless `self` is a dictionary.
    pub fn insert(&mut self, key: &str, value: Entry) {
        if let Entry::Dict(map) = self {
            map.insert(key.to_string(), value);
        }
    }

    pub fn find_key(&self, key: &str) -> Option<&Entry> {
        match self {
            Entry::Dict(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Entry::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Entry::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Entry]> {
        match self {
            Entry::List(l) => Some(l),
            _ => None,
        }
    }

    /// Bytes stored under `key`, if present and of the right kind.
    pub fn bytes_at(&self, key: &str) -> Option<&[u8]> {
        self.find_key(key).and_then(Entry::as_bytes)
    }

    pub fn int_at(&self, key: &str) -> Option<i64> {
        self.find_key(key).and_then(Entry::as_int)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Entry::Int(v) => {
                out.push(b'i');
                out.extend_from_slice(v.to_string().as_bytes());
                out.push(b'e');
            }
            Entry::Bytes(b) => write_bytes(out, b),
            Entry::List(items) => {
                out.push(b'l');
                for item in items {
                    item.write_to(out);
                }
                out.push(b'e');
            }
            Entry::Dict(map) => {
                out.push(b'd');
                // BTreeMap<String, _> iterates in bytewise key order.
                for (k, v) in map {
                    write_bytes(out, k.as_bytes());
                    v.write_to(out);
                }
                out.push(b'e');
            }
        }
    }

    /// Parses exactly one entry spanning all of `input`.
    pub fn decode(input: &[u8]) -> Result<Entry, CodecError> {
        let mut reader = Reader {
            input,
            pos: 0,
            depth: 0,
        };
        let entry = reader.entry()?;
        if reader.pos != input.len() {
            return Err(CodecError::TrailingBytes(input.len() - reader.pos));
        }
        Ok(entry)
    }
}

fn write_bytes(out: &mut Vec<u8>, b: &[u8]) {
    out.extend_from_slice(b.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(b);
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Reader<'_> {
    fn peek(&self) -> Result<u8, CodecError> {
        self.input
            .get(self.pos)
            .copied()
            .ok_or(CodecError::UnexpectedEof(self.pos))
    }

    fn enter(&mut self) -> Result<(), CodecError> {
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::TooDeep(MAX_DEPTH, self.pos));
        }
        self.depth += 1;
        Ok(())
    }

    fn entry(&mut self) -> Result<Entry, CodecError> {
        match self.peek()? {
            b'i' => {
                self.pos += 1;
                let v = self.integer_until(b'e')?;
                Ok(Entry::Int(v))
            }
            b'l' => {
                self.enter()?;
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.entry()?);
                }
                self.pos += 1;
                self.depth -= 1;
                Ok(Entry::List(items))
            }
            b'd' => {
                self.enter()?;
                self.pos += 1;
                let mut map = EntryDict::new();
                while self.peek()? != b'e' {
                    let at = self.pos;
                    let key = self.bytes()?;
                    let key = String::from_utf8(key).map_err(|_| CodecError::InvalidKey(at))?;
                    let value = self.entry()?;
                    map.insert(key, value);
                }
                self.pos += 1;
                self.depth -= 1;
                Ok(Entry::Dict(map))
            }
            b'0'..=b'9' => Ok(Entry::Bytes(self.bytes()?)),
            byte => Err(CodecError::UnexpectedByte {
                byte,
                offset: self.pos,
            }),
        }
    }

    fn integer_until(&mut self, end: u8) -> Result<i64, CodecError> {
        let start = self.pos;
        let rel = self.input[start..]
            .iter()
            .position(|&b| b == end)
            .ok_or(CodecError::UnexpectedEof(self.input.len()))?;
        let text = std::str::from_utf8(&self.input[start..start + rel])
            .map_err(|_| CodecError::InvalidInteger(start))?;
        let v = text
            .parse::<i64>()
            .map_err(|_| CodecError::InvalidInteger(start))?;
        self.pos = start + rel + 1;
        Ok(v)
    }

    fn bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let at = self.pos;
        let len = self.integer_until(b':')?;
        let len = usize::try_from(len).map_err(|_| CodecError::InvalidLength(at))?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.input.len())
            .ok_or(CodecError::UnexpectedEof(self.input.len()))?;
        let out = self.input[self.pos..end].to_vec();
        self.pos = end;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionary_keys_are_sorted() {
        let mut e = Entry::dict();
        e.insert("t", Entry::Int(7));
        e.insert("a", Entry::Bytes(b"xy".to_vec()));
        assert_eq!(e.encode(), b"d1:a2:xy1:ti7ee".to_vec());
    }

    #[test]
    fn decode_nested() {
        let raw = b"d1:pli1ei-2ee3:sig0:e";
        let e = Entry::decode(raw).unwrap();
        assert_eq!(
            e.find_key("p"),
            Some(&Entry::List(vec![Entry::Int(1), Entry::Int(-2)]))
        );
        assert_eq!(e.bytes_at("sig"), Some(&[][..]));
        assert_eq!(e.encode(), raw.to_vec());
    }

    #[test]
    fn rejects_truncated_and_trailing_input() {
        assert!(matches!(
            Entry::decode(b"5:abc"),
            Err(CodecError::UnexpectedEof(_))
        ));
        assert_eq!(Entry::decode(b"i1eX"), Err(CodecError::TrailingBytes(1)));
        assert!(matches!(
            Entry::decode(b"x"),
            Err(CodecError::UnexpectedByte { byte: b'x', .. })
        ));
    }

    #[test]
    fn nesting_is_capped() {
        let mut deep = vec![b'l'; 200_000];
        deep.extend(vec![b'e'; 200_000]);
        assert!(matches!(Entry::decode(&deep), Err(CodecError::TooDeep(MAX_DEPTH, _))));

        let mut ok = vec![b'l'; MAX_DEPTH];
        ok.extend(vec![b'e'; MAX_DEPTH]);
        assert!(Entry::decode(&ok).is_ok());

        let mut over = vec![b'l'; MAX_DEPTH + 1];
        over.extend(vec![b'e'; MAX_DEPTH + 1]);
        assert!(matches!(Entry::decode(&over), Err(CodecError::TooDeep(..))));
    }
}
