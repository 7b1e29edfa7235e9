use xmlparser::{ElementEnd, Token, Tokenizer};

use crate::error::{DfsError, Result};

/// One `<property>` entry of a configuration resource.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub value: Option<String>,
    pub is_final: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Value,
    Final,
}

/// Parses a Hadoop-style `<configuration>` document.
///
/// Unknown elements inside `<property>` (e.g. `<description>`) are skipped.
pub fn parse_properties(resource: &str, text: &str) -> Result<Vec<Property>> {
    let fail = |reason: String| DfsError::Xml {
        resource: resource.to_string(),
        reason,
    };

    let mut properties = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<Property> = None;
    let mut field: Option<Field> = None;
    let mut buffer = String::new();
    let mut saw_root = false;

    for token in Tokenizer::from(text) {
        let token = token.map_err(|err| fail(err.to_string()))?;
        match token {
            Token::ElementStart { local, .. } => {
                let local = local.as_str();
                match (stack.len(), local) {
                    (0, "configuration") => saw_root = true,
                    (0, other) => {
                        return Err(fail(format!(
                            "bad root element <{}>, expected <configuration>",
                            other
                        )))
                    }
                    (1, "property") => current = Some(Property::default()),
                    (2, "name") if current.is_some() => field = Some(Field::Name),
                    (2, "value") if current.is_some() => field = Some(Field::Value),
                    (2, "final") if current.is_some() => field = Some(Field::Final),
                    _ => {}
                }
                buffer.clear();
                stack.push(local.to_string());
            }
            Token::ElementEnd { end, .. } => match end {
                ElementEnd::Open => {}
                ElementEnd::Empty | ElementEnd::Close(..) => {
                    let closed = stack
                        .pop()
                        .ok_or_else(|| fail("unbalanced closing tag".to_string()))?;
                    if let ElementEnd::Close(_, local) = end {
                        if local.as_str() != closed {
                            return Err(fail(format!(
                                "expected </{}>, found </{}>",
                                closed,
                                local.as_str()
                            )));
                        }
                    }
                    match (stack.len(), closed.as_str()) {
                        (2, _) => {
                            if let (Some(property), Some(f)) = (current.as_mut(), field.take()) {
                                let text = buffer.trim().to_string();
                                match f {
                                    Field::Name => property.name = text,
                                    Field::Value => property.value = Some(text),
                                    Field::Final => property.is_final = text == "true",
                                }
                            }
                        }
                        (1, "property") => {
                            if let Some(property) = current.take() {
                                if property.name.is_empty() {
                                    return Err(fail("property without a name".to_string()));
                                }
                                properties.push(property);
                            }
                        }
                        _ => {}
                    }
                    buffer.clear();
                }
            },
            Token::Text { text } => {
                if field.is_some() {
                    buffer.push_str(&unescape(text.as_str()));
                }
            }
            Token::Cdata { text, .. } => {
                if field.is_some() {
                    buffer.push_str(text.as_str());
                }
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(fail("missing <configuration> element".to_string()));
    }
    if !stack.is_empty() {
        return Err(fail(format!("unclosed element <{}>", stack.join("><"))));
    }
    Ok(properties)
}

fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail.find(';').and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|ch| (ch, end + 1))
        });
        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
