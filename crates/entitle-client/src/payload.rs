//! Decoding of the entitlement list payload.
//!
//! The schema is fixed: a `LIST` root holding zero or more `APPLI` children,
//! each carrying a `code` attribute. Any other element nested under the root
//! is ignored; anything that breaks the schema is a malformed payload.

use entitle_core::ApplicationEntitlement;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{ClientError, ClientResult};

const ROOT_ELEMENT: &[u8] = b"LIST";
const ENTRY_ELEMENT: &[u8] = b"APPLI";
const CODE_ATTRIBUTE: &str = "code";

/// Maximum accepted payload size in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Parse an entitlement list payload.
pub fn parse_entitlements(xml: &str) -> ClientResult<Vec<ApplicationEntitlement>> {
    if xml.len() > MAX_PAYLOAD_BYTES {
        return Err(ClientError::malformed(format!(
            "payload too large ({} bytes)",
            xml.len()
        )));
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entitlements = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut root_closed = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                open_element(e, &stack, root_closed, &mut entitlements)?;
                stack.push(e.name().as_ref().to_vec());
            }
            Ok(Event::Empty(ref e)) => {
                open_element(e, &stack, root_closed, &mut entitlements)?;
                if stack.is_empty() {
                    root_closed = true;
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
                if stack.is_empty() {
                    root_closed = true;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ClientError::malformed(format!(
                    "XML parse error at position {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
    }

    if !root_closed {
        return Err(ClientError::malformed(if stack.is_empty() {
            "missing LIST root element"
        } else {
            "unclosed LIST root element"
        }));
    }

    Ok(entitlements)
}

fn open_element(
    element: &BytesStart<'_>,
    stack: &[Vec<u8>],
    root_closed: bool,
    entitlements: &mut Vec<ApplicationEntitlement>,
) -> ClientResult<()> {
    let name = element.name();

    if stack.is_empty() {
        if root_closed {
            return Err(ClientError::malformed("multiple root elements"));
        }
        if name.as_ref() != ROOT_ELEMENT {
            return Err(ClientError::malformed(format!(
                "unexpected root element '{}'",
                String::from_utf8_lossy(name.as_ref())
            )));
        }
        return Ok(());
    }

    if stack.len() == 1 && name.as_ref() == ENTRY_ELEMENT {
        entitlements.push(ApplicationEntitlement::new(read_code(element)?));
    }

    Ok(())
}

fn read_code(element: &BytesStart<'_>) -> ClientResult<String> {
    let attribute = element
        .try_get_attribute(CODE_ATTRIBUTE)
        .map_err(|e| ClientError::malformed(format!("invalid APPLI attribute: {e}")))?
        .ok_or_else(|| ClientError::malformed("APPLI element without code attribute"))?;

    let code = attribute
        .unescape_value()
        .map_err(|e| ClientError::malformed(format!("invalid APPLI code: {e}")))?;

    let code = code.trim();
    if code.is_empty() {
        return Err(ClientError::malformed("APPLI element with empty code"));
    }

    Ok(code.to_string())
}
