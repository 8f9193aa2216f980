//! Sectioned CSV text: field encoding, line tokenizing, section splitting.
//!
//! # Responsibility
//! - Render one titled section: title line, header line, one line per row,
//!   blank line terminator.
//! - Read sections back, tolerating quoted commas, JSON escapes and `""`.
//!
//! # Invariants
//! - Encoded fields never contain a raw line break, so one row is one line.
//! - `(no data)` sections carry no header and are skipped on read.

use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Placeholder line of a section without rows.
pub const NO_DATA: &str = "(no data)";

/// Encodes one field: strings as JSON strings, numbers and booleans bare,
/// null as `""`.
pub fn encode_field(value: &Value) -> String {
    match value {
        Value::Null => "\"\"".to_string(),
        other => other.to_string(),
    }
}

/// Renders one titled section.
pub fn render_section(title: &str, headers: &[&str], rows: &[Vec<Value>]) -> String {
    if rows.is_empty() {
        return format!("{title}\n{NO_DATA}\n\n");
    }
    let mut out = String::new();
    out.push_str(title);
    out.push('\n');
    out.push_str(&headers.join(","));
    out.push('\n');
    for row in rows {
        let line = row.iter().map(encode_field).collect::<Vec<_>>().join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Line that could not be split into fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizeError {
    pub column: usize,
    pub reason: &'static str,
}

impl Display for TokenizeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed csv field at column {}: {}", self.column, self.reason)
    }
}

impl Error for TokenizeError {}

/// Splits one line into fields.
///
/// Quoted fields accept JSON backslash escapes and doubled quotes; commas
/// inside quotes are data. Bare fields are trimmed.
pub fn tokenize_line(line: &str) -> Result<Vec<String>, TokenizeError> {
    let chars = line
        .trim_end_matches(&['\r', '\n'][..])
        .chars()
        .collect::<Vec<_>>();
    let mut fields = Vec::new();
    let mut pos = 0;
    loop {
        while chars.get(pos).is_some_and(|ch| *ch == ' ' || *ch == '\t') {
            pos += 1;
        }
        if pos < chars.len() && chars[pos] == '"' {
            let (field, next) = read_quoted(&chars, pos + 1)?;
            fields.push(field);
            pos = next;
            while pos < chars.len() && chars[pos].is_whitespace() {
                pos += 1;
            }
            match chars.get(pos) {
                None => return Ok(fields),
                Some(',') => pos += 1,
                Some(_) => {
                    return Err(TokenizeError {
                        column: pos,
                        reason: "unexpected text after closing quote",
                    })
                }
            }
        } else {
            let start = pos;
            while pos < chars.len() && chars[pos] != ',' {
                pos += 1;
            }
            fields.push(chars[start..pos].iter().collect::<String>().trim().to_string());
            if pos >= chars.len() {
                return Ok(fields);
            }
            pos += 1;
        }
    }
}

/// Reads a quoted field starting after its opening quote and returns the
/// decoded text plus the position after the closing quote.
///
/// The span is rewritten into a JSON string body (`""` becomes `\"`, raw
/// control characters become `\u` escapes) and decoded by `serde_json`.
fn read_quoted(chars: &[char], start: usize) -> Result<(String, usize), TokenizeError> {
    let mut body = String::new();
    let mut pos = start;
    while pos < chars.len() {
        match chars[pos] {
            '"' if chars.get(pos + 1) == Some(&'"') => {
                body.push_str("\\\"");
                pos += 2;
            }
            '"' => {
                let field = serde_json::from_str::<String>(&format!("\"{body}\"")).map_err(
                    |_| TokenizeError {
                        column: start,
                        reason: "invalid escape in quoted field",
                    },
                )?;
                return Ok((field, pos + 1));
            }
            '\\' => {
                let Some(escaped) = chars.get(pos + 1) else {
                    break;
                };
                body.push('\\');
                body.push(*escaped);
                pos += 2;
            }
            ch if (ch as u32) < 0x20 => {
                body.push_str(&format!("\\u{:04x}", ch as u32));
                pos += 1;
            }
            ch => {
                body.push(ch);
                pos += 1;
            }
        }
    }
    Err(TokenizeError {
        column: pos,
        reason: "unterminated quoted field",
    })
}

/// One section as read from text, before tokenizing rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSection<'a> {
    pub title: &'a str,
    pub header: &'a str,
    pub rows: Vec<&'a str>,
}

/// Splits text on blank lines into titled sections.
///
/// Sections with fewer than two content lines (including `(no data)`
/// placeholders) are dropped.
pub fn split_sections(text: &str) -> Vec<RawSection<'_>> {
    let mut sections = Vec::new();
    let mut block: Vec<&str> = Vec::new();
    for line in text.lines().chain(std::iter::once("")) {
        let line = line.trim_end_matches('\r');
        if !line.trim().is_empty() {
            block.push(line);
            continue;
        }
        if block.len() >= 2 && block[1].trim() != NO_DATA {
            sections.push(RawSection {
                title: block[0].trim(),
                header: block[1],
                rows: block[2..].to_vec(),
            });
        }
        block.clear();
    }
    sections
}

/// Tokenized section with header-name lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Section {
    /// Tokenizes every line of a raw section.
    pub fn parse(raw: &RawSection<'_>) -> Result<Self, TokenizeError> {
        let headers = tokenize_line(raw.header)?;
        let rows = raw
            .rows
            .iter()
            .map(|line| tokenize_line(line))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            title: raw.title.to_string(),
            headers,
            rows,
        })
    }

    /// Iterates rows as header-keyed views.
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(move |row| Record {
            headers: &self.headers,
            fields: row,
        })
    }
}

/// One row addressed by header name.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    headers: &'a [String],
    fields: &'a [String],
}

impl<'a> Record<'a> {
    /// Trimmed field under `name`; missing columns and blanks are `None`.
    pub fn text(&self, name: &str) -> Option<&'a str> {
        let index = self.headers.iter().position(|header| header == name)?;
        self.fields
            .get(index)
            .map(|field| field.trim())
            .filter(|field| !field.is_empty())
    }

    /// First present field among `names`.
    pub fn text_any(&self, names: &[&str]) -> Option<&'a str> {
        names.iter().find_map(|name| self.text(name))
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        let text = self.text(name)?;
        text.parse::<i64>().ok().or_else(|| {
            text.parse::<f64>()
                .ok()
                .filter(|value| value.fract() == 0.0 && value.is_finite())
                .map(|value| value as i64)
        })
    }

    pub fn real(&self, name: &str) -> Option<f64> {
        self.text(name)?
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
    }

    /// `true`/`1` and `false`/`0`, case-insensitive.
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.text(name).and_then(parse_flag)
    }
}

pub(crate) fn parse_flag(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{encode_field, render_section, split_sections, tokenize_line, Section};
    use serde_json::{json, Value};

    #[test]
    fn encode_field_quotes_strings_only() {
        assert_eq!(encode_field(&json!("Tree, \"old\"")), r#""Tree, \"old\"""#);
        assert_eq!(encode_field(&json!(52.2215)), "52.2215");
        assert_eq!(encode_field(&json!(7)), "7");
        assert_eq!(encode_field(&json!(true)), "true");
        assert_eq!(encode_field(&Value::Null), r#""""#);
    }

    #[test]
    fn tokenizer_keeps_quoted_commas_and_escapes() {
        let fields = tokenize_line(r#"1,"Tree, \"old\"", 4.5 ,"""""#).unwrap();
        assert_eq!(fields, vec!["1", "Tree, \"old\"", "4.5", "\""]);
    }

    #[test]
    fn tokenizer_reads_unicode_escapes() {
        let fields = tokenize_line(r#""café","🌳","a\nb""#).unwrap();
        assert_eq!(fields, vec!["café", "🌳", "a\nb"]);
    }

    #[test]
    fn tokenizer_decodes_json_unicode_escapes() {
        let fields = tokenize_line(r#""caf\u00e9","\ud83c\udf33","tab\there""#).unwrap();
        assert_eq!(fields, vec!["café", "🌳", "tab\there"]);
    }

    #[test]
    fn tokenizer_rejects_bad_escapes() {
        assert!(tokenize_line(r#""bad \q escape""#).is_err());
        assert!(tokenize_line(r#""lone \ud83c surrogate""#).is_err());
        assert!(tokenize_line(r#""trailing \"#).is_err());
    }

    #[test]
    fn tokenizer_reads_empty_fields() {
        assert_eq!(tokenize_line(r#""",,x"#).unwrap(), vec!["", "", "x"]);
        assert_eq!(tokenize_line("a,").unwrap(), vec!["a", ""]);
    }

    #[test]
    fn tokenizer_rejects_unterminated_quote() {
        assert!(tokenize_line(r#"1,"open"#).is_err());
        assert!(tokenize_line(r#""a"b"#).is_err());
    }

    #[test]
    fn render_then_split_skips_no_data_sections() {
        let text = render_section("EMPTY", &["id"], &[])
            + &render_section("ITEMS", &["id", "name"], &[vec![json!(1), json!("Oak")]]);
        let sections = split_sections(&text);
        assert_eq!(sections.len(), 1);
        let section = Section::parse(&sections[0]).unwrap();
        assert_eq!(section.title, "ITEMS");
        let record = section.records().next().unwrap();
        assert_eq!(record.int("id"), Some(1));
        assert_eq!(record.text("name"), Some("Oak"));
        assert_eq!(record.text("missing"), None);
    }

    #[test]
    fn split_treats_whitespace_lines_as_separators() {
        let text = "A\r\nh\r\n1\r\n   \r\nB\nh\n2\n";
        let sections = split_sections(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "A");
        assert_eq!(sections[0].rows, vec!["1"]);
        assert_eq!(sections[1].title, "B");
    }
}
