//! Turns protocol XML text into the [`crate::ast`] tree.
//!
//! Deliberately hand-rolled over `quick_xml`'s pull API rather than its
//! `serde` feature: the schema's nesting is shallow and irregular enough
//! (attributes mean different things on `request` vs `event` vs `enum`)
//! that a small stack of "what am I currently building" beats a derived
//! struct.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::ast::{Arg, ArgType, Entry, Enum, Interface, Message, Protocol};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed protocol file: {0}")]
    Malformed(String),
}

pub fn parse_protocol(xml: &str) -> Result<Protocol, ParseError> {
    let mut reader = Reader::from_str(xml);
    {
        let config = reader.config_mut();
        config.trim_text_start = true;
        config.trim_text_end = true;
    }

    let mut protocol = Protocol::default();
    let mut interface: Option<Interface> = None;
    let mut message: Option<Message> = None;
    let mut en: Option<Enum> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                let name = local_name(e.name().as_ref());
                let attrs = attributes(&e)?;
                match name.as_str() {
                    "protocol" => {
                        protocol.name = attr(&attrs, "name").unwrap_or_default();
                    }
                    "interface" => {
                        interface = Some(Interface {
                            name: attr(&attrs, "name").ok_or_else(|| missing("interface", "name"))?,
                            version: attr(&attrs, "version").and_then(|v| v.parse().ok()).unwrap_or(1),
                            ..Default::default()
                        });
                    }
                    "request" | "event" => {
                        message = Some(Message {
                            name: attr(&attrs, "name").ok_or_else(|| missing(&name, "name"))?,
                            since: attr(&attrs, "since").and_then(|v| v.parse().ok()).unwrap_or(1),
                            is_destructor: attr(&attrs, "type").as_deref() == Some("destructor"),
                            args: Vec::new(),
                        });
                    }
                    "arg" => {
                        let msg = message.as_mut().ok_or_else(|| missing("arg", "enclosing message"))?;
                        let typ = attr(&attrs, "type").and_then(|t| arg_type(&t));
                        msg.args.push(Arg {
                            name: attr(&attrs, "name").unwrap_or_default(),
                            typ,
                            interface: attr(&attrs, "interface"),
                            allow_null: attr(&attrs, "allow-null").as_deref() == Some("true"),
                            enum_: attr(&attrs, "enum"),
                        });
                    }
                    "enum" => {
                        en = Some(Enum {
                            name: attr(&attrs, "name").ok_or_else(|| missing("enum", "name"))?,
                            bitfield: attr(&attrs, "bitfield").as_deref() == Some("true"),
                            entries: Vec::new(),
                        });
                    }
                    "entry" => {
                        let e = en.as_mut().ok_or_else(|| missing("entry", "enclosing enum"))?;
                        e.entries.push(Entry {
                            name: attr(&attrs, "name").unwrap_or_default(),
                            value: attr(&attrs, "value").unwrap_or_default(),
                        });
                    }
                    _ => {}
                }
            }
            Event::End(e) => {
                let name = local_name(e.name().as_ref());
                match name.as_str() {
                    "request" => {
                        if let (Some(m), Some(iface)) = (message.take(), interface.as_mut()) {
                            iface.requests.push(m);
                        }
                    }
                    "event" => {
                        if let (Some(m), Some(iface)) = (message.take(), interface.as_mut()) {
                            iface.events.push(m);
                        }
                    }
                    "enum" => {
                        if let (Some(e), Some(iface)) = (en.take(), interface.as_mut()) {
                            iface.enums.push(e);
                        }
                    }
                    "interface" => {
                        if let Some(iface) = interface.take() {
                            protocol.interfaces.push(iface);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        buf.clear();
    }

    // `wl_callback.done` has a lone event but behaves as a destructor: the
    // protocol schema format has no way to express "this event destroys
    // its object", so the generator hardcodes the one core-protocol case
    // that needs it, the way the reference scanner does.
    if protocol.name == "wayland" {
        for iface in &mut protocol.interfaces {
            if iface.name == "wl_callback" {
                if let Some(done) = iface.events.first_mut() {
                    done.is_destructor = true;
                }
            }
        }
    }

    Ok(protocol)
}

fn local_name(qname: &[u8]) -> String {
    String::from_utf8_lossy(qname).into_owned()
}

fn attributes(e: &quick_xml::events::BytesStart) -> Result<Vec<(String, String)>, ParseError> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ParseError::Malformed(err.to_string()))?;
        let key = local_name(attr.key.as_ref());
        let value = attr.unescape_value()?.into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn attr(attrs: &[(String, String)], key: &str) -> Option<String> {
    attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

fn arg_type(t: &str) -> Option<ArgType> {
    Some(match t {
        "int" => ArgType::Int,
        "uint" => ArgType::Uint,
        "fixed" => ArgType::Fixed,
        "string" => ArgType::String,
        "object" => ArgType::Object,
        "new_id" => ArgType::NewId,
        "array" => ArgType::Array,
        "fd" => ArgType::Fd,
        _ => return None,
    })
}

fn missing(elem: &str, what: &str) -> ParseError {
    ParseError::Malformed(format!("<{elem}> missing {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <protocol name="wayland">
          <interface name="wl_callback" version="1">
            <event name="done">
              <arg name="callback_data" type="uint"/>
            </event>
          </interface>
          <interface name="wl_seat" version="7">
            <request name="get_pointer">
              <arg name="id" type="new_id" interface="wl_pointer"/>
            </request>
            <event name="capabilities">
              <arg name="capabilities" type="uint" enum="capability" bitfield="true"/>
            </event>
            <enum name="capability" bitfield="true">
              <entry name="pointer" value="1"/>
              <entry name="keyboard" value="2"/>
            </enum>
          </interface>
        </protocol>
    "#;

    #[test]
    fn parses_interfaces_messages_and_enums() {
        let protocol = parse_protocol(SAMPLE).unwrap();
        assert_eq!(protocol.name, "wayland");
        assert_eq!(protocol.interfaces.len(), 2);

        let seat = protocol.interfaces.iter().find(|i| i.name == "wl_seat").unwrap();
        assert_eq!(seat.version, 7);
        assert_eq!(seat.requests.len(), 1);
        assert_eq!(seat.requests[0].name, "get_pointer");
        assert_eq!(seat.requests[0].new_id_arg().unwrap().interface.as_deref(), Some("wl_pointer"));

        assert_eq!(seat.enums.len(), 1);
        assert!(seat.enums[0].bitfield);
        assert_eq!(seat.enums[0].entries.len(), 2);
        assert_eq!(seat.enums[0].entries[1].name, "keyboard");
    }

    #[test]
    fn wl_callback_done_is_hardcoded_as_a_destructor() {
        let protocol = parse_protocol(SAMPLE).unwrap();
        let callback = protocol.interfaces.iter().find(|i| i.name == "wl_callback").unwrap();
        assert!(callback.events[0].is_destructor);
    }

    #[test]
    fn rejects_missing_required_attributes() {
        let bad = r#"<protocol name="x"><interface version="1"></interface></protocol>"#;
        assert!(matches!(parse_protocol(bad), Err(ParseError::Malformed(_))));
    }
}
