//! Helpers for rendering metrics in the Prometheus exposition format.

use crate::name::MetricName;

/// Writes a metric type line in the Prometheus [exposition format].
///
/// [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
pub fn write_type_line(buffer: &mut String, name: &str, metric_type: &str) {
    buffer.push_str("# TYPE ");
    buffer.push_str(name);
    buffer.push(' ');
    buffer.push_str(metric_type);
    buffer.push('\n');
}

/// Writes a metric in the Prometheus [exposition format].
///
/// When `suffix` is specified, it is appended to `name` after an underscore, which is how the
/// `_total`, `_bucket`, `_sum` and `_count` series of a family are written.  `additional_label` is
/// appended after the regular labels, typically `le` for histogram buckets.
///
/// [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
pub fn write_metric_line<T, T2>(
    buffer: &mut String,
    name: &str,
    suffix: Option<&'static str>,
    labels: &[String],
    additional_label: Option<(&'static str, T)>,
    value: T2,
) where
    T: std::fmt::Display,
    T2: std::fmt::Display,
{
    buffer.push_str(name);
    if let Some(suffix) = suffix {
        buffer.push('_');
        buffer.push_str(suffix);
    }

    if !labels.is_empty() || additional_label.is_some() {
        buffer.push('{');
        buffer.push_str(&labels.join(","));

        if let Some((name, value)) = additional_label {
            if !labels.is_empty() {
                buffer.push(',');
            }
            buffer.push_str(name);
            buffer.push_str("=\"");
            buffer.push_str(&value.to_string());
            buffer.push('"');
        }

        buffer.push('}');
    }

    buffer.push(' ');
    buffer.push_str(&value.to_string());
    buffer.push('\n');
}

/// Renders the tags of `name` as sanitized `key="value"` pairs.
pub fn label_pairs(name: &MetricName) -> Vec<String> {
    name.tags()
        .iter()
        .map(|tag| {
            format!("{}=\"{}\"", sanitize_label_key(tag.key()), sanitize_label_value(tag.value()))
        })
        .collect()
}

/// Formats a bucket bound for the `le` label.
pub fn format_bound(bound: f64) -> String {
    if bound == f64::INFINITY {
        "+Inf".to_string()
    } else {
        bound.to_string()
    }
}

/// Sanitizes a metric name to be valid under the Prometheus [data model].
///
/// [data model]: https://prometheus.io/docs/concepts/data_model/#metric-names-and-labels
pub fn sanitize_metric_name(name: &str) -> String {
    // The first character must be [a-zA-Z_:], and all subsequent characters must be [a-zA-Z0-9_:].
    name.chars()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 && valid_metric_name_start_character(c)
                || i != 0 && valid_metric_name_character(c)
            {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Sanitizes a label key to be valid under the Prometheus [data model].
///
/// [data model]: https://prometheus.io/docs/concepts/data_model/#metric-names-and-labels
pub fn sanitize_label_key(key: &str) -> String {
    // The first character must be [a-zA-Z_], and all subsequent characters must be [a-zA-Z0-9_].
    key.chars()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 && valid_label_key_start_character(c)
                || i != 0 && valid_label_key_character(c)
            {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Escapes a label value for the Prometheus [exposition format].
///
/// Every backslash, double quote and line feed is escaped; everything else passes through.
///
/// [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
pub fn sanitize_label_value(value: &str) -> String {
    let mut sanitized = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => sanitized.push_str("\\\\"),
            '"' => sanitized.push_str("\\\""),
            '\n' => sanitized.push_str("\\n"),
            c => sanitized.push(c),
        }
    }
    sanitized
}

#[inline]
fn valid_metric_name_start_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z_:].
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

#[inline]
fn valid_metric_name_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z0-9_:].
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

#[inline]
fn valid_label_key_start_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z_].
    c.is_ascii_alphabetic() || c == '_'
}

#[inline]
fn valid_label_key_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z0-9_].
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{
        format_bound, label_pairs, sanitize_label_key, sanitize_label_value, sanitize_metric_name,
        valid_label_key_character, valid_label_key_start_character, valid_metric_name_character,
        valid_metric_name_start_character, write_metric_line,
    };
    use crate::name::MetricName;

    #[test]
    fn test_sanitize_metric_name_known_cases() {
        let cases = &[
            ("*", "_"),
            ("requests.total", "requests_total"),
            ("foo1:bar2", "foo1:bar2"),
            ("1foobar", "_foobar"),
            ("app-counter", "app_counter"),
        ];

        for (input, expected) in cases {
            assert_eq!(expected, &sanitize_metric_name(input));
        }
    }

    #[test]
    fn test_sanitize_label_key_known_cases() {
        let cases =
            &[(":", "_"), ("region", "region"), ("1id", "_id"), ("http.method", "http_method")];

        for (input, expected) in cases {
            assert_eq!(expected, &sanitize_label_key(input));
        }
    }

    #[test]
    fn test_sanitize_label_value_known_cases() {
        let cases = &[
            ("*", "*"),
            ("\"", "\\\""),
            ("\\", "\\\\"),
            ("a\\b", "a\\\\b"),
            ("\n", "\\n"),
            ("us-east-1", "us-east-1"),
        ];

        for (input, expected) in cases {
            assert_eq!(expected, &sanitize_label_value(input));
        }
    }

    #[test]
    fn test_write_metric_line() {
        let name = MetricName::with_tags("latency", [("method", "GET"), ("code", "200")]).unwrap();
        let labels = label_pairs(&name);

        let mut buffer = String::new();
        write_metric_line(&mut buffer, "latency", Some("bucket"), &labels, Some(("le", "+Inf")), 7);
        write_metric_line::<&str, u64>(&mut buffer, "latency", Some("count"), &[], None, 7);
        assert_eq!(
            buffer,
            "latency_bucket{code=\"200\",method=\"GET\",le=\"+Inf\"} 7\nlatency_count 7\n"
        );
    }

    #[test]
    fn test_format_bound() {
        assert_eq!(format_bound(1.0), "1");
        assert_eq!(format_bound(0.25), "0.25");
        assert_eq!(format_bound(f64::INFINITY), "+Inf");
    }

    proptest! {
        #[test]
        fn test_sanitize_metric_name(input in "[\n\"\\\\.]?.*[\n\"\\\\.]?") {
            let result = sanitize_metric_name(&input);
            let as_chars = result.chars().collect::<Vec<_>>();

            if let Some(c) = as_chars.first() {
                assert!(valid_metric_name_start_character(*c),
                    "first character of metric name was not valid");
            }

            assert!(as_chars.iter().all(|c| valid_metric_name_character(*c)),
                "invalid character in metric name");
        }

        #[test]
        fn test_sanitize_label_key(input in "[\n\"\\\\:]?.*[\n\"\\\\:]?") {
            let result = sanitize_label_key(&input);
            let as_chars = result.chars().collect::<Vec<_>>();

            if let Some(c) = as_chars.first() {
                assert!(valid_label_key_start_character(*c),
                    "first character of label key was not valid");
            }

            assert!(as_chars.iter().all(|c| valid_label_key_character(*c)),
                "invalid character in label key");
        }

        #[test]
        fn test_sanitize_label_value(input in "[\n\"\\\\]?.*[\n\"\\\\]?") {
            let result = sanitize_label_value(&input);

            assert!(!result.contains('\n'), "raw/unescaped newlines present");

            // Dropping escaped backslashes leaves only escape sequences for quotes and newlines.
            let unescaped = result.replace("\\\\", "");
            let as_chars = unescaped.chars().collect::<Vec<_>>();
            for (i, c) in as_chars.iter().enumerate() {
                if *c == '"' {
                    assert!(i > 0 && as_chars[i - 1] == '\\', "unescaped double quote: {}", result);
                }
            }
        }
    }
}
