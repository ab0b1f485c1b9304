//! In-memory representation of a parsed `.xml` protocol description.

#[derive(Debug, Default)]
pub struct Protocol {
    pub name: String,
    pub interfaces: Vec<Interface>,
}

#[derive(Debug, Default)]
pub struct Interface {
    pub name: String,
    pub version: u32,
    pub requests: Vec<Message>,
    pub events: Vec<Message>,
    pub enums: Vec<Enum>,
}

#[derive(Debug, Default)]
pub struct Message {
    pub name: String,
    pub since: u32,
    pub is_destructor: bool,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Int,
    Uint,
    Fixed,
    String,
    Object,
    NewId,
    Array,
    Fd,
}

#[derive(Debug, Default)]
pub struct Arg {
    pub name: String,
    pub typ: Option<ArgType>,
    pub interface: Option<String>,
    pub allow_null: bool,
    pub enum_: Option<String>,
}

#[derive(Debug, Default)]
pub struct Enum {
    pub name: String,
    pub bitfield: bool,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Default)]
pub struct Entry {
    pub name: String,
    pub value: String,
}

impl Message {
    /// The object argument supplying the message's `new_id`, if any.
    pub fn new_id_arg(&self) -> Option<&Arg> {
        self.args.iter().find(|a| a.typ == Some(ArgType::NewId))
    }
}
