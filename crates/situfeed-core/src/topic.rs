//! Topic segment normalization.

/// Turns a region or type name into a broker-legal topic segment.
///
/// `"València/Valencia"` becomes `"valència"`, `"Santa Cruz de Tenerife"`
/// becomes `"santa_cruz_de_tenerife"` and `"MaintenanceWorks"` becomes
/// `"maintenance_works"`. MQTT wildcards never survive.
pub fn normalize_for_topic(raw: &str) -> String {
    let first = raw.split('/').next().unwrap_or_default().trim();
    let snake = to_snake_case(&first.replace(' ', "_"));
    let cleaned: String = snake
        .chars()
        .map(|c| if matches!(c, '+' | '#') { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        crate::record::UNKNOWN.to_string()
    } else {
        cleaned
    }
}

/// `roadMaintenance` → `road_maintenance`; only a lower-to-upper boundary
/// gets an underscore, so acronyms stay glued together.
pub fn to_snake_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for c in raw.chars() {
        if c.is_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = c.is_lowercase();
        out.extend(c.to_lowercase());
    }
    out
}

/// `{prefix}/{region}/{category}/{event_type}` with normalized segments.
pub fn topic(prefix: &str, region: &str, category: &str, event_type: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        prefix.trim_end_matches('/'),
        normalize_for_topic(region),
        category,
        normalize_for_topic(event_type)
    )
}
