//! Command-name dispatch.

use cache_core::{ArithmeticCommand, StorageCommand};

/// Every command the ASCII protocol understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Get,
    Gets,
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
    Delete,
    Incr,
    Decr,
    Touch,
    Stats,
    Version,
    FlushAll,
    Quit,
}

impl Command {
    /// Identify a command by its name, O(1): the name length and first
    /// byte select a candidate, one literal compare confirms it.
    pub fn parse(name: &[u8]) -> Option<Command> {
        let first = *name.first()?;
        let candidate = match (name.len(), first) {
            (3, b'a') => (Command::Add, &b"add"[..]),
            (3, b'c') => (Command::Cas, &b"cas"[..]),
            (3, b'g') => (Command::Get, &b"get"[..]),
            (3, b's') => (Command::Set, &b"set"[..]),
            (4, b'd') => (Command::Decr, &b"decr"[..]),
            (4, b'g') => (Command::Gets, &b"gets"[..]),
            (4, b'i') => (Command::Incr, &b"incr"[..]),
            (4, b'q') => (Command::Quit, &b"quit"[..]),
            (5, b't') => (Command::Touch, &b"touch"[..]),
            (5, b's') => (Command::Stats, &b"stats"[..]),
            (6, b'a') => (Command::Append, &b"append"[..]),
            (6, b'd') => (Command::Delete, &b"delete"[..]),
            (7, b'p') => (Command::Prepend, &b"prepend"[..]),
            (7, b'r') => (Command::Replace, &b"replace"[..]),
            (7, b'v') => (Command::Version, &b"version"[..]),
            (9, b'f') => (Command::FlushAll, &b"flush_all"[..]),
            _ => return None,
        };
        (name == candidate.1).then_some(candidate.0)
    }

    /// The storage semantics this command selects, if it is one.
    pub fn storage(self) -> Option<StorageCommand> {
        match self {
            Command::Set => Some(StorageCommand::Set),
            Command::Add => Some(StorageCommand::Add),
            Command::Replace => Some(StorageCommand::Replace),
            Command::Append => Some(StorageCommand::Append),
            Command::Prepend => Some(StorageCommand::Prepend),
            Command::Cas => Some(StorageCommand::Cas),
            _ => None,
        }
    }

    /// The arithmetic direction this command selects, if it is one.
    pub fn arithmetic(self) -> Option<ArithmeticCommand> {
        match self {
            Command::Incr => Some(ArithmeticCommand::Incr),
            Command::Decr => Some(ArithmeticCommand::Decr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_command_names() {
        let table: &[(&[u8], Command)] = &[
            (b"add", Command::Add),
            (b"cas", Command::Cas),
            (b"get", Command::Get),
            (b"set", Command::Set),
            (b"decr", Command::Decr),
            (b"gets", Command::Gets),
            (b"incr", Command::Incr),
            (b"quit", Command::Quit),
            (b"touch", Command::Touch),
            (b"stats", Command::Stats),
            (b"append", Command::Append),
            (b"delete", Command::Delete),
            (b"prepend", Command::Prepend),
            (b"replace", Command::Replace),
            (b"version", Command::Version),
            (b"flush_all", Command::FlushAll),
        ];
        for (name, command) in table {
            assert_eq!(Command::parse(name), Some(*command));
        }
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(Command::parse(b""), None);
        assert_eq!(Command::parse(b"wibble"), None);
        assert_eq!(Command::parse(b"gex"), None); // right length and first byte
        assert_eq!(Command::parse(b"getx"), None);
        assert_eq!(Command::parse(b"GET"), None); // commands are case-sensitive
        assert_eq!(Command::parse(b"flush_al"), None);
    }
}
