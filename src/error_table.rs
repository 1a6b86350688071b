// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use crate::types::{Error, ERR_OK};
use std::collections::HashMap;

const UNKNOWN: &str = "Unknown error";

/// Fixed table of human readable messages for every error code.
///
/// Build one at startup and share it (usually behind an `Arc`) with
/// everything that reports errors.
#[derive(Debug, Clone)]
pub struct ErrorTable {
    messages: HashMap<i32, String>,
}

impl ErrorTable {
    pub fn new() -> Self {
        let mut messages: HashMap<i32, String> = Error::ALL
            .iter()
            .map(|e| (e.code(), e.to_string()))
            .collect();
        messages.insert(ERR_OK, "No Error".into());
        ErrorTable { messages }
    }

    pub fn message(&self, code: i32) -> &str {
        self.messages.get(&code).map(String::as_str).unwrap_or(UNKNOWN)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for ErrorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn test_messages() {
    let table = ErrorTable::new();
    assert_eq!(table.message(-13), "No instrument loaded");
    assert_eq!(table.message(0), "No Error");
    assert_eq!(table.message(8), "Operation time-out");
    assert_eq!(table.message(-16), "Could not load the instrument library");
    assert_eq!(table.message(999_999), "Unknown error");
    assert_eq!(table.message(-1), "Unknown Error");
    assert_eq!(table.len(), 20);
}
