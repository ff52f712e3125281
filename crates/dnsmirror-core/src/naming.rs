//! Conversion between zone-relative and fully-qualified record names
//!
//! Users type names relative to the zone apex (`www`, `@`), the remote store
//! works with fully-qualified names (`www.example.com`).

/// Turn user input into a fully-qualified name under `apex`
pub fn to_absolute(apex: &str, input: &str) -> String {
    let name = input.trim();
    if name.is_empty() || name == "@" {
        return apex.to_string();
    }
    if apex.is_empty() || is_within(apex, name) {
        return name.to_string();
    }
    format!("{}.{}", name, apex)
}

/// Turn a fully-qualified name into the form shown to users
pub fn to_relative(apex: &str, fqdn: &str) -> String {
    let name = fqdn.trim();
    if apex.is_empty() {
        return name.to_string();
    }
    if name == apex {
        return "@".to_string();
    }
    match name.strip_suffix(apex).and_then(|rest| rest.strip_suffix('.')) {
        Some(label) if !label.is_empty() => label.to_string(),
        _ => name.to_string(),
    }
}

/// Whether `name` is the apex itself or a name beneath it
fn is_within(apex: &str, name: &str) -> bool {
    name == apex
        || name
            .strip_suffix(apex)
            .is_some_and(|rest| rest.ends_with('.'))
}
