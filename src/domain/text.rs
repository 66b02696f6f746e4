// Text rules shared by the complaint and station transforms

/// Capitalize each word, treating `-` and `/` as word boundaries as well.
///
/// Segments that contain a digit are uppercased whole so model codes such as
/// `f-150` or `4wd` keep their conventional form.
pub fn capitalize_words(text: &str) -> String {
    text.split_whitespace()
        .map(capitalize_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize_word(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut segment = String::new();
    for c in word.chars() {
        if c == '-' || c == '/' {
            out.push_str(&capitalize_segment(&segment));
            out.push(c);
            segment.clear();
        } else {
            segment.push(c);
        }
    }
    out.push_str(&capitalize_segment(&segment));
    out
}

fn capitalize_segment(segment: &str) -> String {
    if segment.chars().any(|c| c.is_ascii_digit()) {
        return segment.to_uppercase();
    }

    let mut out = String::with_capacity(segment.len());
    let mut seen_letter = false;
    for c in segment.chars() {
        if !seen_letter && c.is_alphabetic() {
            out.extend(c.to_uppercase());
            seen_letter = true;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// Single-line postal address: `Street, City, ST 12345-6789`.
pub fn station_address(
    street: Option<&str>,
    city: Option<&str>,
    state: Option<&str>,
    zip: Option<&str>,
    plus4: Option<&str>,
) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    if let Some(street) = present(street) {
        parts.push(capitalize_words(street));
    }
    if let Some(city) = present(city) {
        parts.push(capitalize_words(city));
    }

    let mut tail = present(state).map(str::to_uppercase).unwrap_or_default();
    if let Some(zip) = present(zip) {
        if !tail.is_empty() {
            tail.push(' ');
        }
        tail.push_str(zip);
        if let Some(plus4) = present(plus4) {
            tail.push('-');
            tail.push_str(plus4);
        }
    }
    if !tail.is_empty() {
        parts.push(tail);
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn present(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// WKT point, longitude first.
pub fn wkt_point(longitude: f64, latitude: f64) -> String {
    format!("POINT ({} {})", longitude, latitude)
}

/// `"J1772 CHADEMO"` -> `"(J1772, CHADEMO)"`.
pub fn list_literal(text: &str) -> Option<String> {
    let items: Vec<&str> = text.split_whitespace().collect();
    if items.is_empty() {
        return None;
    }
    Some(format!("({})", items.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capitalize_words() {
        assert_eq!(capitalize_words("MERCEDES-BENZ"), "Mercedes-Benz");
        assert_eq!(capitalize_words("f-150  super duty"), "F-150 Super Duty");
        assert_eq!(capitalize_words("ROLLS/ROYCE"), "Rolls/Royce");
        assert_eq!(capitalize_words("4wd (canada)"), "4WD (Canada)");
        assert_eq!(capitalize_words(""), "");
    }

    #[test]
    fn test_station_address() {
        let full = station_address(
            Some("1500 WEST MAIN ST"),
            Some("salt lake city"),
            Some("ut"),
            Some("84101"),
            Some("1234"),
        );
        assert_eq!(full.as_deref(), Some("1500 West Main St, Salt Lake City, UT 84101-1234"));

        let partial = station_address(None, Some("Denver"), Some("CO"), None, Some("1234"));
        assert_eq!(partial.as_deref(), Some("Denver, CO"));

        assert_eq!(station_address(None, Some(" "), None, None, None), None);
    }

    #[test]
    fn test_wkt_point_and_list_literal() {
        assert_eq!(wkt_point(-104.99, 39.74), "POINT (-104.99 39.74)");
        assert_eq!(list_literal("J1772 CHADEMO").as_deref(), Some("(J1772, CHADEMO)"));
        assert_eq!(list_literal("  "), None);
    }
}
