//! Output-format parsing (spec.md §4.7 step 4): turn the LLM's raw text
//! response into a `serde_json::Value` the schema validator can walk.
//!
//! JSON parsing is `serde_json` (already the crate-wide wire format). CSV
//! and XML have no precedent anywhere in the retrieved pack, so this reaches
//! directly for the `csv` crate and for `quick-xml` (the XML crate
//! `stencila-stencila` uses) rather than hand-rolling either format.

use serde_json::{Map, Value};

use crate::error::AgentError;

use super::config::OutputFormat;

pub fn parse(format: OutputFormat, raw: &str) -> Result<Value, AgentError> {
    match format {
        OutputFormat::Json => parse_json(raw),
        OutputFormat::Csv => parse_csv(raw),
        OutputFormat::Xml => parse_xml(raw),
        OutputFormat::Plain => Ok(Value::String(raw.trim().to_string())),
    }
}

fn parse_json(raw: &str) -> Result<Value, AgentError> {
    let trimmed = extract_fenced_block(raw, "json").unwrap_or(raw);
    serde_json::from_str(trimmed.trim()).map_err(|e| AgentError::FormatError(format!("invalid JSON: {e}")))
}

/// A single data row becomes a flat object (`{header: value, ...}`); zero or
/// multiple rows become `{"rows": [...]}` so the result is always an object
/// a [`Schema`](archflow_schemas::Schema) can validate at the top level.
fn parse_csv(raw: &str) -> Result<Value, AgentError> {
    let trimmed = extract_fenced_block(raw, "csv").unwrap_or(raw);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(trimmed.trim().as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| AgentError::FormatError(format!("invalid CSV header: {e}")))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AgentError::FormatError(format!("invalid CSV row: {e}")))?;
        let mut row = Map::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), Value::String(field.to_string()));
        }
        rows.push(Value::Object(row));
    }

    match rows.len() {
        1 => Ok(rows.into_iter().next().expect("checked len == 1")),
        _ => {
            let mut wrapper = Map::new();
            wrapper.insert("rows".to_string(), Value::Array(rows));
            Ok(Value::Object(wrapper))
        }
    }
}

fn parse_xml(raw: &str) -> Result<Value, AgentError> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let trimmed = extract_fenced_block(raw, "xml").unwrap_or(raw);
    let mut reader = Reader::from_str(trimmed.trim());
    reader.config_mut().trim_text(true);

    fn read_element(reader: &mut Reader<&[u8]>) -> Result<Value, AgentError> {
        let mut children: Map<String, Value> = Map::new();
        let mut text = String::new();
        let mut buf = Vec::new();

        loop {
            match reader
                .read_event_into(&mut buf)
                .map_err(|e| AgentError::FormatError(format!("invalid XML: {e}")))?
            {
                Event::Start(start) => {
                    let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
                    let child = read_element(reader)?;
                    insert_child(&mut children, name, child);
                }
                Event::Empty(start) => {
                    let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
                    insert_child(&mut children, name, Value::String(String::new()));
                }
                Event::Text(t) => {
                    text.push_str(
                        &t.unescape()
                            .map_err(|e| AgentError::FormatError(format!("invalid XML text: {e}")))?,
                    );
                }
                Event::End(_) | Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if children.is_empty() {
            Ok(Value::String(text))
        } else {
            Ok(Value::Object(children))
        }
    }

    fn insert_child(children: &mut Map<String, Value>, name: String, value: Value) {
        match children.remove(&name) {
            None => {
                children.insert(name, value);
            }
            Some(Value::Array(mut items)) => {
                items.push(value);
                children.insert(name, Value::Array(items));
            }
            Some(existing) => {
                children.insert(name, Value::Array(vec![existing, value]));
            }
        }
    }

    // Consume the document's root start tag, then read its body as the result.
    loop {
        let mut buf = Vec::new();
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| AgentError::FormatError(format!("invalid XML: {e}")))?
        {
            Event::Start(_) => return read_element(&mut reader),
            Event::Empty(_) => return Ok(Value::Object(Map::new())),
            Event::Eof => return Err(AgentError::FormatError("empty XML document".to_string())),
            _ => {}
        }
    }
}

/// Strip a single ```lang ... ``` fence if present, a common LLM quirk this
/// parser should tolerate rather than reject outright.
fn extract_fenced_block<'a>(raw: &'a str, lang: &str) -> Option<&'a str> {
    let fence = format!("```{lang}");
    let start = raw.find(&fence)? + fence.len();
    let rest = &raw[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let value = parse(OutputFormat::Json, r#"{"name": "Ada"}"#).unwrap();
        assert_eq!(value["name"], "Ada");
    }

    #[test]
    fn parses_json_inside_a_fenced_code_block() {
        let raw = "Here you go:\n```json\n{\"name\": \"Ada\"}\n```\nThanks!";
        let value = parse(OutputFormat::Json, raw).unwrap();
        assert_eq!(value["name"], "Ada");
    }

    #[test]
    fn single_csv_row_becomes_a_flat_object() {
        let value = parse(OutputFormat::Csv, "name,age\nAda,30\n").unwrap();
        assert_eq!(value["name"], "Ada");
        assert_eq!(value["age"], "30");
    }

    #[test]
    fn multiple_csv_rows_are_wrapped_under_rows() {
        let value = parse(OutputFormat::Csv, "name,age\nAda,30\nGrace,40\n").unwrap();
        assert_eq!(value["rows"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn parses_nested_xml_elements() {
        let value = parse(OutputFormat::Xml, "<person><name>Ada</name><age>30</age></person>").unwrap();
        assert_eq!(value["name"], "Ada");
        assert_eq!(value["age"], "30");
    }

    #[test]
    fn repeated_xml_elements_become_an_array() {
        let value = parse(OutputFormat::Xml, "<list><item>a</item><item>b</item></list>").unwrap();
        assert_eq!(value["item"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn plain_format_passes_through_trimmed_text() {
        let value = parse(OutputFormat::Plain, "  hello world  \n").unwrap();
        assert_eq!(value, Value::String("hello world".to_string()));
    }
}
