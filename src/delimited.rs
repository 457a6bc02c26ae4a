use std::borrow::Cow;

pub const MISSING_TOKENS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-nan", "null", "NULL", "None", "<NA>", "#N/A",
];

pub fn is_missing(value: &str) -> bool {
    MISSING_TOKENS.contains(&value)
}

// Unquoted fields are trimmed; quoted fields keep their content verbatim,
// line breaks included, with `""` unescaped to `"`.
pub fn split_record(line: &str) -> Result<Vec<String>, String> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(' ' | '\t')) {
            chars.next();
        }

        let mut field = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        field.push('"');
                    }
                    Some('"') => break,
                    Some(ch) => field.push(ch),
                    None => return Err("unterminated quoted field".to_string()),
                }
            }
            while matches!(chars.peek(), Some(' ' | '\t')) {
                chars.next();
            }
            match chars.next() {
                None => {
                    fields.push(field);
                    return Ok(fields);
                }
                Some(',') => fields.push(field),
                Some(ch) => return Err(format!("unexpected '{ch}' after quoted field")),
            }
        } else {
            let mut ended = true;
            for ch in chars.by_ref() {
                if ch == ',' {
                    ended = false;
                    break;
                }
                field.push(ch);
            }
            fields.push(field.trim_end().to_string());
            if ended {
                return Ok(fields);
            }
        }
    }
}

// True while `text` ends inside a quoted field, so the record continues on
// the next line.
pub fn has_open_quote(text: &str) -> bool {
    let mut quoted = false;
    let mut field_start = true;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if quoted {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                } else {
                    quoted = false;
                    field_start = false;
                }
            }
            continue;
        }
        match ch {
            '"' if field_start => quoted = true,
            ',' => field_start = true,
            ' ' | '\t' => {}
            _ => field_start = false,
        }
    }
    quoted
}

pub fn quote_field(value: &str) -> Cow<'_, str> {
    let needs_quotes = value.contains([',', '"', '\n', '\r'])
        || value.starts_with([' ', '\t'])
        || value.ends_with([' ', '\t']);
    if needs_quotes {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

pub fn join_record<'a>(fields: impl IntoIterator<Item = &'a str>) -> String {
    fields
        .into_iter()
        .map(quote_field)
        .collect::<Vec<_>>()
        .join(",")
}
