//! Reads interpreter objects through gdb's expression evaluator.
//!
//! Nothing here touches target memory directly. Every fact is obtained by
//! printing a C expression over the interpreter's own structures.

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::gdb::Debugger;
use crate::layout::Layout;
use crate::reply::{hex_tail, leading_int, parse_number};

/// Builtin type of a heap object, from its header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    None,
    Object,
    Class,
    Module,
    Float,
    String,
    Regexp,
    Array,
    Hash,
    Struct,
    Bignum,
    File,
    Data,
    Match,
    Complex,
    Rational,
    Node,
    IClass,
    Zombie,
}

impl ObjectType {
    fn from_name(name: &str) -> Option<Self> {
        let ty = match name.strip_prefix("RUBY_T_")? {
            "NONE" => ObjectType::None,
            "OBJECT" => ObjectType::Object,
            "CLASS" => ObjectType::Class,
            "MODULE" => ObjectType::Module,
            "FLOAT" => ObjectType::Float,
            "STRING" => ObjectType::String,
            "REGEXP" => ObjectType::Regexp,
            "ARRAY" => ObjectType::Array,
            "HASH" => ObjectType::Hash,
            "STRUCT" => ObjectType::Struct,
            "BIGNUM" => ObjectType::Bignum,
            "FILE" => ObjectType::File,
            "DATA" => ObjectType::Data,
            "MATCH" => ObjectType::Match,
            "COMPLEX" => ObjectType::Complex,
            "RATIONAL" => ObjectType::Rational,
            "NODE" => ObjectType::Node,
            "ICLASS" => ObjectType::IClass,
            "ZOMBIE" => ObjectType::Zombie,
            _ => return None,
        };
        Some(ty)
    }
}

/// Classification of a tagged `VALUE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Fixnum,
    Flonum,
    True,
    False,
    Nil,
    Symbol,
    Undef,
    Object(ObjectType),
}

pub struct RubyInternal<'a, D: Debugger + ?Sized> {
    dbg: &'a mut D,
    layout: &'static Layout,
}

impl<'a, D: Debugger + ?Sized> RubyInternal<'a, D> {
    pub fn new(dbg: &'a mut D, layout: &'static Layout) -> Self {
        Self { dbg, layout }
    }

    pub fn debugger(&mut self) -> &mut D {
        &mut *self.dbg
    }

    pub fn layout(&self) -> &'static Layout {
        self.layout
    }

    pub fn value(&mut self, command: &str) -> Result<String> {
        self.dbg.execute_for_value(command)
    }

    /// Evaluates a C condition, anything but a non-zero number is false.
    fn test(&mut self, command: &str) -> Result<bool> {
        let value = self.value(command)?;
        Ok(parse_number(&value).is_some_and(|n| n != 0))
    }

    /// Type of `value`. Immediates are recognized from their tag bits before
    /// the object header is ever dereferenced.
    pub fn classify(&mut self, value: &str) -> Result<ValueType> {
        if self.test(&format!("p (int)({value}) & RUBY_IMMEDIATE_MASK"))? {
            if self.test(&format!("p (int)({value}) & RUBY_FIXNUM_FLAG"))? {
                return Ok(ValueType::Fixnum);
            }
            if self.test(&format!("p ((int)({value}) & RUBY_FLONUM_MASK) == RUBY_FLONUM_FLAG"))? {
                return Ok(ValueType::Flonum);
            }
            if self.test(&format!("p ({value}) == RUBY_Qtrue"))? {
                return Ok(ValueType::True);
            }
            if self.test(&format!(
                "p ((VALUE)({value}) & ~(~(VALUE)0 << RUBY_SPECIAL_SHIFT)) == RUBY_SYMBOL_FLAG"
            ))? {
                return Ok(ValueType::Symbol);
            }
            if self.test(&format!("p ({value}) == RUBY_Qundef"))? {
                return Ok(ValueType::Undef);
            }
            return Err(Error::Unclassified(value.to_string()));
        }

        // !RTEST: only nil and false have no bits outside Qnil
        if self.test(&format!("p ((VALUE)({value}) & ~(VALUE)RUBY_Qnil) == 0"))? {
            return if self.test(&format!("p ({value}) == RUBY_Qnil"))? {
                Ok(ValueType::Nil)
            } else {
                Ok(ValueType::False)
            };
        }

        let name = self.value(&format!(
            "p (enum ruby_value_type)(((struct RBasic *)({value}))->flags & RUBY_T_MASK)"
        ))?;
        ObjectType::from_name(&name)
            .map(ValueType::Object)
            .ok_or_else(|| Error::Unclassified(format!("{value} ({name})")))
    }

    /// Bytes of a `String` object, whichever storage it uses.
    pub fn string_contents(&mut self, value: &str) -> Result<String> {
        let value = value.trim();
        if value.is_empty() || parse_number(value) == Some(0) {
            return Ok(String::new());
        }

        let noembed = self.layout.string_noembed;
        let field = if self.test(&format!("p ((struct RBasic *)({value}))->flags & {noembed}"))? {
            "as.heap.ptr"
        } else {
            "as.ary"
        };
        self.value(&format!("p (char *)((struct RString *)({value}))->{field}"))
    }

    /// Prints `expression` and reads the resulting `String` object.
    pub fn string_at(&mut self, expression: &str) -> Result<String> {
        let value = self.value(&format!("p {expression}"))?;
        self.string_contents(&value)
    }

    /// True for a control frame of a method implemented in C.
    pub fn is_cfunc_frame(&mut self, cfp: &str) -> Result<bool> {
        let Layout {
            frame_magic_mask,
            cfunc_frame_magic,
            ..
        } = *self.layout;
        self.test(&format!("p ({cfp}->flag & {frame_magic_mask}) == {cfunc_frame_magic}"))
    }

    fn is_ifunc(&mut self, iseq: &str) -> Result<bool> {
        self.test(&format!(
            "p (enum ruby_value_type)(((struct RBasic *)({iseq}))->flags & RUBY_T_MASK) == RUBY_T_NODE"
        ))
    }

    /// Non-null and not an ifunc node disguised as an iseq.
    pub fn is_normal_iseq(&mut self, iseq: &str) -> Result<bool> {
        Ok(self.test(&format!("p ({iseq}) != 0"))? && !self.is_ifunc(iseq)?)
    }

    /// Source line the frame is executing, 0 when it cannot be known.
    pub fn source_line(&mut self, cfp: &str, iseq: &str) -> Result<u32> {
        if !self.is_normal_iseq(iseq)? {
            return Ok(0);
        }

        let mut position = leading_int(&self.value(&format!("p {cfp}->pc - {iseq}->iseq_encoded"))?);
        // pc already points past the executing instruction
        if position != 0 {
            position -= 1;
        }

        let size = leading_int(&self.value(&format!("p {iseq}->line_info_size"))?);
        let table = format!("{iseq}->line_info_table");
        match size {
            i64::MIN..=0 => Ok(0),
            1 => self.line_no(&table, 0),
            _ => {
                for i in 1..size {
                    let entry_position =
                        leading_int(&self.value(&format!("p {table}[{i}].position"))?);
                    if entry_position == position {
                        return self.line_no(&table, i);
                    } else if entry_position > position {
                        return self.line_no(&table, i - 1);
                    }
                }
                self.line_no(&table, size - 1)
            }
        }
    }

    fn line_no(&mut self, table: &str, index: i64) -> Result<u32> {
        let line = leading_int(&self.value(&format!("p {table}[{index}].line_no"))?);
        Ok(u32::try_from(line).unwrap_or(0))
    }

    /// Name of a symbol id, looked up in the global id to string table.
    pub fn symbol_name(&mut self, id: &str) -> Result<String> {
        match self.table_lookup(self.layout.symbol_table, id)? {
            Some(record) => self.string_contents(&record),
            None => Ok(String::new()),
        }
    }

    /// `st_lookup` for a table whose hash and compare are numeric identity.
    ///
    /// Walks the bucket chain for `key` and returns the stored record. A chain
    /// never holds more nodes than the table has entries, a longer one is
    /// treated as corrupt and yields `None`.
    pub fn table_lookup(&mut self, table: &str, key: &str) -> Result<Option<String>> {
        if self.test(&format!("p ({table})->entries_packed"))? {
            return Err(Error::PackedTable(table.to_string()));
        }
        let Layout {
            numeric_hash_fn,
            numeric_compare_fn,
            ..
        } = *self.layout;
        if !self.test(&format!("p ({table})->type->hash == {numeric_hash_fn}"))?
            || !self.test(&format!("p ({table})->type->compare == {numeric_compare_fn}"))?
        {
            return Err(Error::NonNumericTable(table.to_string()));
        }

        let Some(wanted) = parse_number(key) else {
            debug!("lookup of non numeric key `{key}` in {table}");
            return Ok(None);
        };

        let bin = self.value(&format!("p ({key}) % ({table})->num_bins"))?;
        let mut entry = self.entry_pointer(&format!("p ({table})->as.big.bins[{bin}]"))?;
        let num_entries = leading_int(&self.value(&format!("p ({table})->num_entries"))?);
        let mut walked = 0;
        while entry != 0 {
            if walked >= num_entries {
                warn!("{table}: chain of bin {bin} is longer than its {num_entries} entries");
                return Ok(None);
            }
            walked += 1;
            let node = format!("((struct st_table_entry *)0x{entry:x})");
            let hash = parse_number(&self.value(&format!("p {node}->hash"))?);
            let stored_key = parse_number(&self.value(&format!("p {node}->key"))?);
            if hash == Some(wanted) && stored_key == Some(wanted) {
                return Ok(Some(self.value(&format!("p {node}->record"))?));
            }
            entry = self.entry_pointer(&format!("p {node}->next"))?;
        }
        Ok(None)
    }

    fn entry_pointer(&mut self, command: &str) -> Result<u64> {
        Ok(hex_tail(&self.value(command)?).unwrap_or(0))
    }
}
