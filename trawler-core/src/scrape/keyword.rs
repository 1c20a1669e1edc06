use serde_json::Value;

/// Case-insensitive substring filter over every string leaf of an extracted
/// record, arrays included. An empty keyword list accepts everything.
pub fn matches_keywords(value: &Value, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let needles: Vec<String> = keywords
        .iter()
        .map(|keyword| keyword.to_lowercase())
        .filter(|keyword| !keyword.is_empty())
        .collect();
    if needles.is_empty() {
        return true;
    }
    any_string_leaf(value, &|leaf| {
        let haystack = leaf.to_lowercase();
        needles.iter().any(|needle| haystack.contains(needle))
    })
}

fn any_string_leaf(value: &Value, predicate: &dyn Fn(&str) -> bool) -> bool {
    match value {
        Value::String(text) => predicate(text),
        Value::Array(items) => items.iter().any(|item| any_string_leaf(item, predicate)),
        Value::Object(map) => map.values().any(|item| any_string_leaf(item, predicate)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matching_is_case_insensitive() {
        let record = json!({ "title": "alpha BETA" });
        assert!(matches_keywords(&record, &["beta".to_string()]));
        assert!(!matches_keywords(&record, &["gamma".to_string()]));
    }

    #[test]
    fn empty_keyword_list_accepts_everything() {
        let record = json!({ "title": "anything" });
        assert!(matches_keywords(&record, &[]));
    }

    #[test]
    fn nested_arrays_and_objects_are_searched() {
        let record = json!({ "meta": { "tags": ["one", "Two"] } });
        assert!(matches_keywords(&record, &["two".to_string()]));
        assert!(!matches_keywords(&record, &["three".to_string()]));
    }

    #[test]
    fn numbers_do_not_match() {
        let record = json!({ "count": 42 });
        assert!(!matches_keywords(&record, &["42".to_string()]));
    }
}
