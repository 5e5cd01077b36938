//! Entry types known across docsets.
//!
//! Docsets tag entries with short encoded types (`clm`, `func`, `tdef`) or
//! with full names in any case. This module maps them onto one canonical
//! singular name, a plural used for display, and a fixed order in which
//! types are listed.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryType {
    pub singular: &'static str,
    pub plural: &'static str,
    /// Lowercase encoded forms besides the singular name.
    aliases: &'static [&'static str],
}

const fn entry(
    singular: &'static str,
    plural: &'static str,
    aliases: &'static [&'static str],
) -> EntryType {
    EntryType {
        singular,
        plural,
        aliases,
    }
}

/// Known types, in listing order.
const TYPES: &[EntryType] = &[
    entry("Guide", "Guides", &["doc"]),
    entry("Section", "Sections", &["sect"]),
    entry("Sample", "Samples", &["example"]),
    entry("Namespace", "Namespaces", &["ns"]),
    entry("Module", "Modules", &["mod"]),
    entry("Package", "Packages", &["pkg"]),
    entry("Class", "Classes", &["cl", "cls"]),
    entry("Protocol", "Protocols", &["intf"]),
    entry("Interface", "Interfaces", &["iface"]),
    entry("Trait", "Traits", &[]),
    entry("Category", "Categories", &["cat"]),
    entry("Struct", "Structs", &["structure"]),
    entry("Enum", "Enums", &["enumeration"]),
    entry("Union", "Unions", &[]),
    entry("Type", "Types", &["tdef", "typedef", "alias"]),
    entry("Constructor", "Constructors", &["ctor", "init"]),
    entry("Method", "Methods", &["clm", "instm", "intfm", "intfcm"]),
    entry("Function", "Functions", &["func", "fn"]),
    entry("Property", "Properties", &["instp", "intfp", "prop"]),
    entry("Field", "Fields", &["member"]),
    entry("Attribute", "Attributes", &["attr"]),
    entry("Variable", "Variables", &["var", "gvar"]),
    entry("Constant", "Constants", &["const", "econst", "clconst"]),
    entry("Macro", "Macros", &[]),
    entry("Operator", "Operators", &["op"]),
    entry("Event", "Events", &[]),
    entry("Keyword", "Keywords", &["kw"]),
    entry("Binding", "Bindings", &[]),
];

/// The known type `encoded` stands for, ignoring case.
pub fn lookup(encoded: &str) -> Option<&'static EntryType> {
    let encoded = encoded.trim();
    TYPES.iter().find(|t| {
        t.singular.eq_ignore_ascii_case(encoded)
            || t.aliases.iter().any(|a| a.eq_ignore_ascii_case(encoded))
    })
}

/// Canonical singular name of `encoded`, or `not_found` for unknown types.
pub fn singular<'a>(encoded: &str, not_found: &'a str) -> &'a str {
    lookup(encoded).map_or(not_found, |t| t.singular)
}

/// Canonical name of `encoded`; unknown types are kept as given.
pub fn normalize(encoded: &str) -> &str {
    singular(encoded, encoded)
}

/// Plural display name. Unknown types are returned unchanged.
pub fn plural(encoded: &str) -> &str {
    lookup(encoded).map_or(encoded, |t| t.plural)
}

/// Listing position of `encoded`. Unknown types come after all known ones.
pub fn order(encoded: &str) -> usize {
    lookup(encoded)
        .and_then(|t| TYPES.iter().position(|known| known == t))
        .unwrap_or(TYPES.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_forms_map_to_one_name() {
        for encoded in ["clm", "instm", "Method", "METHOD", " method "] {
            assert_eq!(normalize(encoded), "Method");
        }
        assert_eq!(normalize("tdef"), "Type");
        assert_eq!(normalize("func"), "Function");
    }

    #[test]
    fn unknown_types_pass_through() {
        assert_eq!(normalize("Widget"), "Widget");
        assert_eq!(singular("Widget", "Entry"), "Entry");
        assert_eq!(plural("Widget"), "Widget");
        assert!(lookup("Widget").is_none());
    }

    #[test]
    fn plurals() {
        assert_eq!(plural("cl"), "Classes");
        assert_eq!(plural("Property"), "Properties");
    }

    #[test]
    fn order_lists_guides_first_and_unknown_last() {
        assert!(order("Guide") < order("Class"));
        assert!(order("cl") < order("clm"));
        assert_eq!(order("Method"), order("instm"));
        assert!(order("Binding") < order("Widget"));
    }

    #[test]
    fn aliases_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for t in TYPES {
            assert!(seen.insert(t.singular.to_ascii_lowercase()));
            for alias in t.aliases {
                assert!(seen.insert(alias.to_string()), "duplicate {alias}");
            }
        }
    }
}
