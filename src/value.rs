use chrono::{DateTime, NaiveDate};
use serde_json::{Number, Value};

/// Renders a payload value as cell text.
///
/// Nulls vanish, dates (ISO `YYYY-MM-DD` or RFC 3339 strings) become
/// `YYYY/MM/DD`, everything else uses its canonical display form.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        Value::String(s) => match parse_iso_date(s) {
            Some(date) => date.format("%Y/%m/%d").to_string(),
            None => s.clone(),
        },
        other => other.to_string(),
    }
}

/// Integral floats print without the fractional part, so an amount that
/// arrives as `100.0` shows up as `100`.
fn format_number(n: &Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() <= 9_007_199_254_740_992.0 => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

static NULL: Value = Value::Null;

/// `Null` with a `'static` lifetime, for absent-element fallbacks.
pub fn null() -> &'static Value {
    &NULL
}

/// Resolves a dotted field path (`明細.単価` into `data["明細"]["単価"]`)
/// inside one data element. A missing segment resolves to `Null`.
pub fn lookup<'a>(element: &'a Value, path: &str) -> &'a Value {
    let mut cur = element;
    for segment in path.split('.') {
        match cur.get(segment) {
            Some(next) => cur = next,
            None => return &NULL,
        }
    }
    cur
}

/// W3C-style escaping for text written into part XML.
pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dates_render_slash_separated() {
        assert_eq!(stringify(&json!("2025-03-01")), "2025/03/01");
        assert_eq!(stringify(&json!("2025-03-01T09:30:00+09:00")), "2025/03/01");
        assert_eq!(stringify(&json!("not a date")), "not a date");
    }

    #[test]
    fn scalars_render_plainly() {
        assert_eq!(stringify(&json!(null)), "");
        assert_eq!(stringify(&json!(42)), "42");
        assert_eq!(stringify(&json!(1.5)), "1.5");
        assert_eq!(stringify(&json!(true)), "true");
    }

    #[test]
    fn integral_floats_render_without_fraction() {
        assert_eq!(stringify(&json!(100.0)), "100");
        assert_eq!(stringify(&json!(-2.0)), "-2");
        assert_eq!(stringify(&json!(0.25)), "0.25");
        assert_eq!(stringify(&json!(1.0e20)), json!(1.0e20).to_string());
    }

    #[test]
    fn dotted_lookup_descends_maps() {
        let v = json!({"a": {"b": {"c": 7}}});
        assert_eq!(lookup(&v, "a.b.c"), &json!(7));
        assert_eq!(lookup(&v, "a.x"), &Value::Null);
    }

    #[test]
    fn escape_covers_the_five() {
        assert_eq!(xml_escape(r#"<a & "b"'>"#), "&lt;a &amp; &quot;b&quot;&apos;&gt;");
    }
}
