//! Decoder for the textual change format of PostgreSQL's `test_decoding`
//! logical decoding plugin.
//!
//! A peeked change is one line:
//!
//! ```text
//! BEGIN 529
//! table public.post: INSERT: id[bigint]:1 title[text]:'it''s' "isDelete"[smallint]:0
//! table public.post: UPDATE: old-key: id[bigint]:1 new-tuple: id[bigint]:2 title[text]:null
//! table public.post: DELETE: id[bigint]:1
//! COMMIT 529
//! ```
//!
//! [`decode_line`] splits a line into a [`ChangeEntry`] header and its raw
//! payload. [`decode_row_change`] turns that payload into typed rows.

use crate::{
    errors::{self, Errors},
    sync::{ChangeEntry, Column, EntryType, EventType, RowChange, RowData},
};

const NO_TUPLE_DATA: &str = "(no-tuple-data)";
const UNCHANGED_TOAST: &str = "unchanged-toast-datum";
const OLD_KEY: &str = "old-key:";
const NEW_TUPLE: &str = "new-tuple:";

/// Returns `None` for lines that carry neither a transaction boundary nor a
/// row change (logical messages, for example).
pub fn decode_line(line: &str) -> errors::Result<Option<ChangeEntry>> {
    if line == "BEGIN" || line.starts_with("BEGIN ") {
        return Ok(Some(ChangeEntry::transaction_marker(EntryType::TxBegin)));
    }

    if line == "COMMIT" || line.starts_with("COMMIT ") {
        return Ok(Some(ChangeEntry::transaction_marker(EntryType::TxEnd)));
    }

    let Some(rest) = line.strip_prefix("table ") else {
        return Ok(None);
    };

    let mut cursor = Cursor::new(rest);
    let schema_name = cursor.identifier()?;
    cursor.expect(".")?;
    let table_name = cursor.identifier()?;
    cursor.expect(": ")?;

    Ok(Some(ChangeEntry::row_change(
        &schema_name,
        &table_name,
        cursor.remaining(),
    )))
}

pub fn decode_row_change(store_value: &str) -> errors::Result<RowChange> {
    let (action, tuples) = store_value.split_once(':').ok_or_else(|| {
        Errors::ChangeDecodeError(format!("missing action in payload: {store_value}"))
    })?;
    let tuples = tuples.strip_prefix(' ').unwrap_or(tuples);

    let event_type = match action {
        "INSERT" => EventType::Insert,
        "UPDATE" => EventType::Update,
        "DELETE" => EventType::Delete,
        other => {
            return Err(Errors::ChangeDecodeError(format!(
                "unsupported action: {other}"
            )));
        }
    };

    let mut cursor = Cursor::new(tuples);
    let row = match event_type {
        EventType::Insert => RowData {
            before_columns: Vec::new(),
            after_columns: cursor.tuple(false)?,
        },
        EventType::Delete => RowData {
            before_columns: cursor.tuple(false)?,
            after_columns: Vec::new(),
        },
        EventType::Update => {
            if cursor.eat(OLD_KEY) {
                cursor.eat(" ");
                let before_columns = cursor.tuple(true)?;
                cursor.expect(NEW_TUPLE)?;
                cursor.eat(" ");
                let mut after_columns = cursor.tuple(false)?;
                fill_unchanged(&mut after_columns, &before_columns);

                RowData {
                    before_columns,
                    after_columns,
                }
            } else {
                RowData {
                    before_columns: Vec::new(),
                    after_columns: cursor.tuple(false)?,
                }
            }
        }
    };

    if !cursor.is_done() {
        return Err(Errors::ChangeDecodeError(format!(
            "trailing data at offset {}: {}",
            cursor.position,
            cursor.remaining()
        )));
    }

    Ok(RowChange {
        event_type,
        rows: vec![row],
    })
}

/// Unchanged TOAST values are decoded as absent columns. When the old tuple
/// has them, they are carried over so the new image stays complete.
fn fill_unchanged(after_columns: &mut Vec<Column>, before_columns: &[Column]) {
    for before in before_columns {
        if !after_columns.iter().any(|after| after.name == before.name) {
            after_columns.push(before.clone());
        }
    }
}

struct Cursor<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Cursor { input, position: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.position..]
    }

    fn is_done(&self) -> bool {
        self.remaining().trim_end().is_empty()
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.position).copied()
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.remaining().starts_with(token) {
            self.position += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> errors::Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{token}'")))
        }
    }

    fn error(&self, message: &str) -> Errors {
        Errors::ChangeDecodeError(format!(
            "{message} at offset {} in: {}",
            self.position, self.input
        ))
    }

    /// Reads columns until the end of input, or until `new-tuple:` when
    /// `stop_at_new_tuple` is set.
    fn tuple(&mut self, stop_at_new_tuple: bool) -> errors::Result<Vec<Column>> {
        let mut columns = Vec::new();

        if self.eat(NO_TUPLE_DATA) {
            self.eat(" ");
            return Ok(columns);
        }

        loop {
            if self.is_done() || (stop_at_new_tuple && self.remaining().starts_with(NEW_TUPLE)) {
                break;
            }

            let name = self.identifier()?;
            self.type_name()?;
            self.expect(":")?;

            match self.value()? {
                Value::Text(text) => columns.push(Column {
                    name,
                    value: Some(text),
                }),
                Value::Null => columns.push(Column { name, value: None }),
                Value::UnchangedToast => {}
            }

            if !self.eat(" ") {
                break;
            }
        }

        Ok(columns)
    }

    fn identifier(&mut self) -> errors::Result<String> {
        if self.eat("\"") {
            let mut identifier = String::new();
            loop {
                let rest = self.remaining();
                let Some(index) = rest.find('"') else {
                    return Err(self.error("unterminated quoted identifier"));
                };
                identifier.push_str(&rest[..index]);
                self.position += index + 1;

                if self.eat("\"") {
                    identifier.push('"');
                } else {
                    return Ok(identifier);
                }
            }
        }

        let rest = self.remaining();
        let end = rest
            .find(['[', '.', ':', ' '])
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(self.error("expected identifier"));
        }
        self.position += end;

        Ok(rest[..end].to_string())
    }

    /// Type names may nest brackets, e.g. `tags[text[]]`.
    fn type_name(&mut self) -> errors::Result<String> {
        self.expect("[")?;
        let start = self.position;
        let mut depth = 1;

        while let Some(byte) = self.peek() {
            match byte {
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        let type_name = self.input[start..self.position].to_string();
                        self.position += 1;
                        return Ok(type_name);
                    }
                }
                _ => {}
            }
            self.position += 1;
        }

        Err(self.error("unterminated type name"))
    }

    fn value(&mut self) -> errors::Result<Value> {
        // bit strings are printed as B'0101'
        if self.remaining().starts_with("B'") {
            self.position += 1;
        }

        if self.eat("'") {
            let mut text = String::new();
            loop {
                let rest = self.remaining();
                let Some(index) = rest.find('\'') else {
                    return Err(self.error("unterminated literal"));
                };
                text.push_str(&rest[..index]);
                self.position += index + 1;

                if self.eat("'") {
                    text.push('\'');
                } else {
                    return Ok(Value::Text(text));
                }
            }
        }

        let rest = self.remaining();
        let end = rest.find(' ').unwrap_or(rest.len());
        if end == 0 {
            return Err(self.error("expected value"));
        }
        self.position += end;

        Ok(match &rest[..end] {
            "null" => Value::Null,
            UNCHANGED_TOAST => Value::UnchangedToast,
            token => Value::Text(token.to_string()),
        })
    }
}

enum Value {
    Text(String),
    Null,
    UnchangedToast,
}
